//! Rule selectors.
//!
//! A selector is initialized once with every rule's condition and then asked,
//! per routed event, which rules are candidates. The adaptive dialog fires
//! only the first candidate.
//!
//! | Selector                 | Candidates                                       |
//! |--------------------------|--------------------------------------------------|
//! | [`FirstSelector`]        | the first matching rule                          |
//! | [`TrueSelector`]         | every matching rule, in registration order       |
//! | [`MostSpecificSelector`] | every matching rule, most specific first         |
//!
//! Conditions that fail to evaluate count as not matched.

use parley_core::expression::{Clause, Expression};
use parley_core::{ExpressionEvaluator, MemoryRead, ValueExt};
use tracing::trace;

/// Chooses candidate rules for the current event.
pub trait TriggerSelector: Send + Sync {
    /// Registers the conditions of every rule, indexed by position.
    fn initialize(&mut self, conditions: &[Expression]);

    /// Indices of candidate rules, best first.
    fn select(&self, memory: &dyn MemoryRead, evaluator: &dyn ExpressionEvaluator) -> Vec<usize>;
}

fn holds(
    expression: &Expression,
    memory: &dyn MemoryRead,
    evaluator: &dyn ExpressionEvaluator,
) -> bool {
    match evaluator.evaluate_parsed(expression, memory) {
        Ok(value) => value.is_truthy(),
        Err(err) => {
            trace!(condition = %expression, error = %err, "Condition failed to evaluate");
            false
        }
    }
}

// ============================================================================
// First / True
// ============================================================================

/// Selects the first rule, in registration order, whose condition holds.
#[derive(Debug, Default)]
pub struct FirstSelector {
    conditions: Vec<Expression>,
}

impl FirstSelector {
    /// Creates the selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriggerSelector for FirstSelector {
    fn initialize(&mut self, conditions: &[Expression]) {
        self.conditions = conditions.to_vec();
    }

    fn select(&self, memory: &dyn MemoryRead, evaluator: &dyn ExpressionEvaluator) -> Vec<usize> {
        self.conditions
            .iter()
            .position(|condition| holds(condition, memory, evaluator))
            .into_iter()
            .collect()
    }
}

/// Selects every rule whose condition holds, in registration order.
#[derive(Debug, Default)]
pub struct TrueSelector {
    conditions: Vec<Expression>,
}

impl TrueSelector {
    /// Creates the selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TriggerSelector for TrueSelector {
    fn initialize(&mut self, conditions: &[Expression]) {
        self.conditions = conditions.to_vec();
    }

    fn select(&self, memory: &dyn MemoryRead, evaluator: &dyn ExpressionEvaluator) -> Vec<usize> {
        self.conditions
            .iter()
            .enumerate()
            .filter(|(_, condition)| holds(condition, memory, evaluator))
            .map(|(index, _)| index)
            .collect()
    }
}

// ============================================================================
// Most specific
// ============================================================================

struct CompiledRule {
    clauses: Vec<(Clause, Expression)>,
}

/// Ranks matching rules by how constrained their satisfied conditions are.
///
/// Every condition is normalized into disjunctive clauses. Rule `a` outranks
/// rule `b` when one of `a`'s satisfied clauses contains every predicate of
/// one of `b`'s satisfied clauses plus at least one more. Rules are emitted in
/// layers of mutually unranked rules; within a layer registration order is
/// kept unless a tie breaker reorders it.
#[derive(Default)]
pub struct MostSpecificSelector {
    rules: Vec<CompiledRule>,
    tie_breaker: Option<Box<dyn TriggerSelector>>,
}

impl MostSpecificSelector {
    /// Creates the selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders rules within a layer with `selector`.
    pub fn tie_breaker(mut self, selector: impl TriggerSelector + 'static) -> Self {
        self.tie_breaker = Some(Box::new(selector));
        self
    }

    fn satisfied(
        &self,
        memory: &dyn MemoryRead,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Vec<(usize, Vec<&Clause>)> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| {
                let clauses: Vec<&Clause> = rule
                    .clauses
                    .iter()
                    .filter(|(_, expression)| holds(expression, memory, evaluator))
                    .map(|(clause, _)| clause)
                    .collect();
                (!clauses.is_empty()).then_some((index, clauses))
            })
            .collect()
    }

    fn order_layer(
        &self,
        layer: Vec<usize>,
        memory: &dyn MemoryRead,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Vec<usize> {
        let Some(tie_breaker) = self.tie_breaker.as_ref().filter(|_| layer.len() > 1) else {
            return layer;
        };
        let mut ordered: Vec<usize> = tie_breaker
            .select(memory, evaluator)
            .into_iter()
            .filter(|index| layer.contains(index))
            .collect();
        for index in layer {
            if !ordered.contains(&index) {
                ordered.push(index);
            }
        }
        ordered
    }
}

impl TriggerSelector for MostSpecificSelector {
    fn initialize(&mut self, conditions: &[Expression]) {
        self.rules = conditions
            .iter()
            .map(|condition| CompiledRule {
                clauses: condition
                    .to_clauses()
                    .into_iter()
                    .map(|clause| {
                        let expression = Expression::all(clause.predicates().iter().cloned());
                        (clause, expression)
                    })
                    .collect(),
            })
            .collect();
        if let Some(tie_breaker) = self.tie_breaker.as_mut() {
            tie_breaker.initialize(conditions);
        }
    }

    fn select(&self, memory: &dyn MemoryRead, evaluator: &dyn ExpressionEvaluator) -> Vec<usize> {
        let mut remaining = self.satisfied(memory, evaluator);
        let mut selection = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let outranked = |index: usize, clauses: &[&Clause]| {
                remaining.iter().any(|(other, others)| {
                    *other != index
                        && others.iter().any(|theirs| {
                            clauses.iter().any(|ours| theirs.is_more_specific_than(ours))
                        })
                })
            };
            let mut layer: Vec<usize> = remaining
                .iter()
                .filter(|(index, clauses)| !outranked(*index, clauses))
                .map(|(index, _)| *index)
                .collect();
            if layer.is_empty() {
                layer = remaining.iter().map(|(index, _)| *index).collect();
            }
            trace!(layer = ?layer, "Most specific layer");
            remaining.retain(|(index, _)| !layer.contains(index));
            selection.extend(self.order_layer(layer, memory, evaluator));
        }
        selection
    }
}

impl std::fmt::Debug for MostSpecificSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MostSpecificSelector")
            .field("rules", &self.rules.len())
            .field("tie_breaker", &self.tie_breaker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::DefaultEvaluator;
    use serde_json::{Value, json};

    fn conditions(texts: &[&str]) -> Vec<Expression> {
        texts.iter().map(|t| Expression::parse(t).unwrap()).collect()
    }

    fn run(selector: &mut dyn TriggerSelector, texts: &[&str], memory: Value) -> Vec<usize> {
        selector.initialize(&conditions(texts));
        selector.select(&memory, &DefaultEvaluator::new())
    }

    #[test]
    fn test_first_and_true() {
        let texts = ["user.a == 1", "user.b == 2", "user.a == 1"];
        let memory = json!({ "user": { "a": 1, "b": 3 } });
        assert_eq!(run(&mut FirstSelector::new(), &texts, memory.clone()), [0]);
        assert_eq!(run(&mut TrueSelector::new(), &texts, memory), [0, 2]);
    }

    #[test]
    fn test_more_specific_wins() {
        let texts = ["user.a == 1", "user.a == 1 && user.b == 2", "user.c"];
        let memory = json!({ "user": { "a": 1, "b": 2, "c": true } });
        assert_eq!(run(&mut MostSpecificSelector::new(), &texts, memory), [1, 2, 0]);
    }

    #[test]
    fn test_unsatisfied_clause_does_not_rank() {
        let texts = ["user.a == 1", "(user.a == 1 && user.b == 2) || user.z"];
        let memory = json!({ "user": { "a": 1, "z": true } });
        assert_eq!(run(&mut MostSpecificSelector::new(), &texts, memory), [0, 1]);
    }

    #[test]
    fn test_errors_count_as_false() {
        let texts = ["user.a + 'x' > 1", "user.a == 1"];
        let memory = json!({ "user": { "a": 1 } });
        assert_eq!(run(&mut MostSpecificSelector::new(), &texts, memory), [1]);
        assert!(run(&mut FirstSelector::new(), &["undefined(1)"], json!({})).is_empty());
    }

    #[test]
    fn test_tie_breaker_orders_layer() {
        struct Reverse(usize);

        impl TriggerSelector for Reverse {
            fn initialize(&mut self, conditions: &[Expression]) {
                self.0 = conditions.len();
            }

            fn select(&self, _: &dyn MemoryRead, _: &dyn ExpressionEvaluator) -> Vec<usize> {
                (0..self.0).rev().collect()
            }
        }

        let texts = ["user.a", "user.b", "user.a && user.b"];
        let memory = json!({ "user": { "a": true, "b": true } });
        let mut selector = MostSpecificSelector::new().tie_breaker(Reverse(0));
        assert_eq!(run(&mut selector, &texts, memory), [2, 1, 0]);
    }
}
