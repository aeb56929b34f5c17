//! Tokenizer and recursive-descent parser.

use serde_json::{Number, Value};

use super::{BinaryOp, Expression, UnaryOp};
use crate::error::{ExpressionError, ExpressionResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Op(&'static str),
}

const OPERATORS: [&str; 14] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || matches!(c, '_' | '$' | '^' | '@')
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.')
}

fn tokenize(text: &str) -> ExpressionResult<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((offset, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((offset, Token::Comma));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i].1;
                    i += 1;
                    match c {
                        '\\' => {
                            let escaped = chars
                                .get(i)
                                .map(|(_, c)| *c)
                                .ok_or_else(|| ExpressionError::parse(offset, "dangling escape"))?;
                            i += 1;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(ExpressionError::parse(offset, "unterminated string"));
                }
                tokens.push((offset, Token::Str(value)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().map(|(_, c)| c).collect();
                tokens.push((offset, Token::Number(parse_number(&literal, offset)?)));
            }
            c if is_ident_start(c) => {
                let mut ident = String::new();
                while i < chars.len() {
                    let c = chars[i].1;
                    if is_ident_continue(c) || (ident.is_empty() && is_ident_start(c)) {
                        ident.push(c);
                        i += 1;
                    } else if c == '[' {
                        // Bracket segments are part of the path, quotes included.
                        let mut quote: Option<char> = None;
                        loop {
                            let Some(&(_, c)) = chars.get(i) else {
                                return Err(ExpressionError::parse(offset, "unclosed '['"));
                            };
                            ident.push(c);
                            i += 1;
                            match quote {
                                None if c == ']' => break,
                                None if c == '\'' || c == '"' => quote = Some(c),
                                Some(q) if c == q => quote = None,
                                _ => {}
                            }
                        }
                    } else {
                        break;
                    }
                }
                tokens.push((offset, Token::Ident(ident)));
            }
            _ => {
                let rest = &text[offset..];
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| ExpressionError::parse(offset, format!("unexpected '{c}'")))?;
                tokens.push((offset, Token::Op(*op)));
                i += op.len();
            }
        }
    }
    Ok(tokens)
}

fn parse_number(literal: &str, offset: usize) -> ExpressionResult<Number> {
    if !literal.contains('.')
        && let Ok(n) = literal.parse::<i64>()
    {
        return Ok(Number::from(n));
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| ExpressionError::parse(offset, format!("invalid number '{literal}'")))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> ExpressionResult<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExpressionError::parse(self.offset(), format!("expected {what}")))
        }
    }

    fn binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> ExpressionResult<Expression>,
    ) -> ExpressionResult<Expression> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let right = next(self)?;
            left = Expression::Binary(binary_op(op), Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> ExpressionResult<Expression> {
        self.binary_level(&["||"], Self::and)
    }

    fn and(&mut self) -> ExpressionResult<Expression> {
        self.binary_level(&["&&"], Self::equality)
    }

    fn equality(&mut self) -> ExpressionResult<Expression> {
        self.binary_level(&["==", "!="], Self::comparison)
    }

    fn comparison(&mut self) -> ExpressionResult<Expression> {
        self.binary_level(&["<", "<=", ">", ">="], Self::additive)
    }

    fn additive(&mut self) -> ExpressionResult<Expression> {
        self.binary_level(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> ExpressionResult<Expression> {
        self.binary_level(&["*", "/", "%"], Self::unary)
    }

    fn unary(&mut self) -> ExpressionResult<Expression> {
        match self.eat_op(&["!", "-"]) {
            Some("!") => Ok(Expression::Unary(UnaryOp::Not, Box::new(self.unary()?))),
            Some(_) => Ok(Expression::Unary(UnaryOp::Negate, Box::new(self.unary()?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> ExpressionResult<Expression> {
        let offset = self.offset();
        let Some((_, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(ExpressionError::parse(offset, "unexpected end of expression"));
        };
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(Expression::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expression::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen, "')' after arguments")?;
                Ok(Expression::Call(name, args))
            }
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expression::Literal(Value::Bool(true)),
                "false" => Expression::Literal(Value::Bool(false)),
                "null" => Expression::Literal(Value::Null),
                _ => Expression::Path(name),
            }),
            other => Err(ExpressionError::parse(offset, format!("unexpected {other:?}"))),
        }
    }
}

fn binary_op(op: &str) -> BinaryOp {
    match op {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::NotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Mod,
    }
}

pub(super) fn parse(text: &str) -> ExpressionResult<Expression> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        end: text.len(),
    };
    let expr = parser.or()?;
    if parser.pos < parser.tokens.len() {
        return Err(ExpressionError::parse(parser.offset(), "unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3 == 7 && !false").unwrap();
        let Expression::Binary(BinaryOp::And, left, right) = expr else {
            panic!("expected && at the top");
        };
        assert!(matches!(*left, Expression::Binary(BinaryOp::Eq, _, _)));
        assert!(matches!(*right, Expression::Unary(UnaryOp::Not, _)));
    }

    #[test]
    fn test_paths_with_brackets_and_prefixes() {
        assert_eq!(
            parse("turn.recognized.entities['due date'][0]").unwrap(),
            Expression::path("turn.recognized.entities['due date'][0]")
        );
        assert_eq!(parse("$count").unwrap(), Expression::path("$count"));
        assert_eq!(parse("^title").unwrap(), Expression::path("^title"));
    }

    #[test]
    fn test_calls_and_literals() {
        assert_eq!(
            parse("concat('a', \"b\", 1.5, null)").unwrap(),
            Expression::call(
                "concat",
                vec![
                    Expression::literal("a"),
                    Expression::literal("b"),
                    Expression::literal(json!(1.5)),
                    Expression::Literal(Value::Null),
                ]
            )
        );
        assert_eq!(parse("count()").unwrap(), Expression::call("count", vec![]));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(parse(r"'it\'s'").unwrap(), Expression::literal("it's"));
    }

    #[test]
    fn test_errors() {
        assert!(parse("").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("a = b").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("a[0").is_err());
    }
}
