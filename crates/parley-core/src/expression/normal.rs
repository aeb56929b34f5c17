//! Disjunctive normal form.
//!
//! A condition is rewritten into an OR of clauses, each an AND of predicates.
//! Negation is pushed down to the predicates. Two clauses are compared by the
//! canonical text of their predicates, which is how rule specificity is
//! decided.

use std::collections::BTreeSet;

use super::{BinaryOp, Expression, UnaryOp};

/// Clause count above which a condition is kept as a single opaque predicate.
const MAX_CLAUSES: usize = 64;

/// A conjunction of predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    predicates: Vec<Expression>,
    signature: BTreeSet<String>,
}

impl Clause {
    fn new(predicates: Vec<Expression>) -> Self {
        let mut signature = BTreeSet::new();
        let mut unique = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            if signature.insert(predicate.to_string()) {
                unique.push(predicate);
            }
        }
        Self {
            predicates: unique,
            signature,
        }
    }

    /// Predicates that must all hold.
    pub fn predicates(&self) -> &[Expression] {
        &self.predicates
    }

    /// Number of distinct predicates.
    pub fn len(&self) -> usize {
        self.signature.len()
    }

    /// Returns `true` if the clause has no predicates.
    pub fn is_empty(&self) -> bool {
        self.signature.is_empty()
    }

    /// Returns `true` if this clause has every predicate of `other` plus more.
    pub fn is_more_specific_than(&self, other: &Clause) -> bool {
        self.signature.len() > other.signature.len() && other.signature.is_subset(&self.signature)
    }
}

type Terms = Vec<Vec<Expression>>;

fn product(left: Terms, right: Terms) -> Option<Terms> {
    if left.len().saturating_mul(right.len()) > MAX_CLAUSES {
        return None;
    }
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in &right {
            out.push(l.iter().chain(r).cloned().collect());
        }
    }
    Some(out)
}

fn union(mut left: Terms, right: Terms) -> Option<Terms> {
    if left.len() + right.len() > MAX_CLAUSES {
        return None;
    }
    left.extend(right);
    Some(left)
}

fn negate_predicate(expr: &Expression) -> Expression {
    if let Expression::Binary(op, l, r) = expr {
        let flipped = match op {
            BinaryOp::Eq => Some(BinaryOp::NotEq),
            BinaryOp::NotEq => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::Ge),
            BinaryOp::Le => Some(BinaryOp::Gt),
            BinaryOp::Gt => Some(BinaryOp::Le),
            BinaryOp::Ge => Some(BinaryOp::Lt),
            _ => None,
        };
        if let Some(op) = flipped {
            return Expression::Binary(op, l.clone(), r.clone());
        }
    }
    Expression::Unary(UnaryOp::Not, Box::new(expr.clone()))
}

fn terms(expr: &Expression, negated: bool) -> Option<Terms> {
    match (expr, negated) {
        (Expression::Binary(BinaryOp::And, l, r), false) | (Expression::Binary(BinaryOp::Or, l, r), true) => {
            product(terms(l, negated)?, terms(r, negated)?)
        }
        (Expression::Binary(BinaryOp::Or, l, r), false) | (Expression::Binary(BinaryOp::And, l, r), true) => {
            union(terms(l, negated)?, terms(r, negated)?)
        }
        (Expression::Unary(UnaryOp::Not, inner), _) => terms(inner, !negated),
        (Expression::Call(name, args), _) if name.eq_ignore_ascii_case("not") && args.len() == 1 => {
            terms(&args[0], !negated)
        }
        (predicate, false) => Some(vec![vec![predicate.clone()]]),
        (predicate, true) => Some(vec![vec![negate_predicate(predicate)]]),
    }
}

pub(super) fn clauses(expr: &Expression) -> Vec<Clause> {
    terms(expr, false)
        .unwrap_or_else(|| vec![vec![expr.clone()]])
        .into_iter()
        .map(Clause::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(expr: &str) -> Vec<Vec<String>> {
        Expression::parse(expr)
            .unwrap()
            .to_clauses()
            .iter()
            .map(|c| c.predicates().iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn test_distributes_and_over_or() {
        assert_eq!(
            texts("a && (b || c)"),
            vec![vec!["a", "b"], vec!["a", "c"]]
        );
    }

    #[test]
    fn test_pushes_negation_down() {
        assert_eq!(texts("!(a == 1 && b < 2)"), vec![vec!["a != 1"], vec!["b >= 2"]]);
        assert_eq!(texts("not(a || b)"), vec![vec!["!a", "!b"]]);
        assert_eq!(texts("!!a"), vec![vec!["a"]]);
    }

    #[test]
    fn test_duplicate_predicates_collapse() {
        let clauses = Expression::parse("a && a && b").unwrap().to_clauses();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].len(), 2);
    }

    #[test]
    fn test_specificity() {
        let general = &Expression::parse("x == 1").unwrap().to_clauses()[0];
        let specific = &Expression::parse("x == 1 && exists(y)").unwrap().to_clauses()[0];
        let other = &Expression::parse("z == 1 && exists(y)").unwrap().to_clauses()[0];
        assert!(specific.is_more_specific_than(general));
        assert!(!general.is_more_specific_than(specific));
        assert!(!other.is_more_specific_than(general));
        assert!(!specific.is_more_specific_than(specific));
    }

    #[test]
    fn test_explosion_falls_back_to_single_clause() {
        let wide = (0..8)
            .map(|i| format!("(a{i} || b{i})"))
            .collect::<Vec<_>>()
            .join(" && ");
        assert_eq!(Expression::parse(&wide).unwrap().to_clauses().len(), 1);
    }
}
