//! Condition and value expressions.
//!
//! The default language is small and JSON-typed:
//!
//! - literals: `42`, `1.5`, `'text'`, `"text"`, `true`, `false`, `null`
//! - memory paths: `user.name`, `$count`, `^title`, `turn.recognized.entities['due date']`
//! - operators: `!`, unary `-`, `* / %`, `+ -`, `< <= > >=`, `== !=`, `&&`, `||`
//! - calls: `exists(x)`, `count(x)`, `contains(a, b)`, `concat(...)` and friends
//!
//! Missing paths evaluate to `null`; type errors are reported as
//! [`ExpressionError`]s and callers treat them as "could not compute".
//!
//! The engine talks to expressions through [`ExpressionEvaluator`] so the
//! language can be swapped. [`Expression`] itself is also used structurally:
//! rule conditions are built and normalized as trees.

mod eval;
mod normal;
mod parser;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ExpressionResult;
use crate::memory::MemoryRead;

pub use eval::values_equal;
pub use normal::Clause;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Negate,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `||`
    Or,
    /// `&&`
    And,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

impl BinaryOp {
    /// Operator token.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

/// A parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant value.
    Literal(Value),
    /// Memory path, kept as written.
    Path(String),
    /// Unary operation.
    Unary(UnaryOp, Box<Expression>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    /// Function call.
    Call(String, Vec<Expression>),
}

impl Expression {
    /// Parses expression text.
    pub fn parse(text: &str) -> ExpressionResult<Self> {
        parser::parse(text)
    }

    /// Evaluates against `memory`.
    pub fn evaluate(&self, memory: &dyn MemoryRead) -> ExpressionResult<Value> {
        eval::evaluate(self, memory)
    }

    /// Memory path node.
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    /// Literal node.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Function call node.
    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Call(name.into(), args)
    }

    /// `self == other`
    pub fn equals(self, other: Expression) -> Self {
        Self::Binary(BinaryOp::Eq, Box::new(self), Box::new(other))
    }

    /// `self && other`
    pub fn and(self, other: Expression) -> Self {
        Self::Binary(BinaryOp::And, Box::new(self), Box::new(other))
    }

    /// `self || other`
    pub fn or(self, other: Expression) -> Self {
        Self::Binary(BinaryOp::Or, Box::new(self), Box::new(other))
    }

    /// `!self`
    pub fn negate(self) -> Self {
        Self::Unary(UnaryOp::Not, Box::new(self))
    }

    /// Conjunction of all `parts`; `true` when empty.
    pub fn all(parts: impl IntoIterator<Item = Expression>) -> Self {
        parts
            .into_iter()
            .reduce(Expression::and)
            .unwrap_or(Self::Literal(Value::Bool(true)))
    }

    /// Disjunction of all `parts`; `false` when empty.
    pub fn any(parts: impl IntoIterator<Item = Expression>) -> Self {
        parts
            .into_iter()
            .reduce(Expression::or)
            .unwrap_or(Self::Literal(Value::Bool(false)))
    }

    /// Normalizes into disjunctive clauses of conjoined predicates.
    pub fn to_clauses(&self) -> Vec<Clause> {
        normal::clauses(self)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn operand(f: &mut fmt::Formatter<'_>, expr: &Expression) -> fmt::Result {
            match expr {
                Expression::Binary(..) => write!(f, "({expr})"),
                _ => write!(f, "{expr}"),
            }
        }

        match self {
            Self::Literal(Value::String(s)) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            Self::Literal(value) => write!(f, "{value}"),
            Self::Path(path) => f.write_str(path),
            Self::Unary(op, inner) => {
                f.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Negate => "-",
                })?;
                operand(f, inner)
            }
            Self::Binary(op, left, right) => {
                operand(f, left)?;
                write!(f, " {} ", op.symbol())?;
                operand(f, right)
            }
            Self::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

// =============================================================================
// Evaluator seam
// =============================================================================

/// Pluggable expression engine.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates expression text against `memory`.
    fn evaluate(&self, expression: &str, memory: &dyn MemoryRead) -> ExpressionResult<Value>;

    /// Evaluates an already built tree.
    fn evaluate_parsed(
        &self,
        expression: &Expression,
        memory: &dyn MemoryRead,
    ) -> ExpressionResult<Value> {
        self.evaluate(&expression.to_string(), memory)
    }
}

const PARSE_CACHE_LIMIT: usize = 1024;

/// The built-in evaluator with a parse cache.
#[derive(Default)]
pub struct DefaultEvaluator {
    cache: RwLock<HashMap<String, Arc<Expression>>>,
}

impl DefaultEvaluator {
    /// Creates an evaluator.
    pub fn new() -> Self {
        Self::default()
    }

    fn parsed(&self, text: &str) -> ExpressionResult<Arc<Expression>> {
        if let Some(expr) = self.cache.read().get(text) {
            return Ok(expr.clone());
        }
        let expr = Arc::new(Expression::parse(text)?);
        let mut cache = self.cache.write();
        if cache.len() >= PARSE_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(text.to_owned(), expr.clone());
        Ok(expr)
    }
}

impl fmt::Debug for DefaultEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultEvaluator")
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

impl ExpressionEvaluator for DefaultEvaluator {
    fn evaluate(&self, expression: &str, memory: &dyn MemoryRead) -> ExpressionResult<Value> {
        self.parsed(expression)?.evaluate(memory)
    }

    fn evaluate_parsed(
        &self,
        expression: &Expression,
        memory: &dyn MemoryRead,
    ) -> ExpressionResult<Value> {
        expression.evaluate(memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_round_trips_through_parse() {
        let text = "turn.dialogEvent.name == 'recognizedIntent' && !(user.age < 18 || exists($x))";
        let expr = Expression::parse(text).unwrap();
        let reparsed = Expression::parse(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn test_builders() {
        let expr = Expression::path("turn.x")
            .equals(Expression::literal("it's"))
            .and(Expression::call("exists", vec![Expression::path("user.y")]));
        assert_eq!(expr.to_string(), "(turn.x == 'it\\'s') && exists(user.y)");
        assert_eq!(Expression::all([]), Expression::literal(true));
    }

    #[test]
    fn test_default_evaluator_caches_parses() {
        let evaluator = DefaultEvaluator::new();
        let memory = json!({ "user": { "n": 2 } });
        assert_eq!(evaluator.evaluate("user.n * 3", &memory).unwrap(), json!(6));
        assert_eq!(evaluator.evaluate("user.n * 3", &memory).unwrap(), json!(6));
        assert_eq!(evaluator.cache.read().len(), 1);
        assert!(evaluator.evaluate("user.n *", &memory).is_err());
    }
}
