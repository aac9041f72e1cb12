//! Parser for the condition expression surface syntax.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | "(" expr ")" | compare
//! compare := path op literal
//! op      := "==" | "!=" | "<=" | ">=" | "<" | ">"
//! path    := "state" ("." ident)+
//! literal := 'string' | number | true | false | null
//! ```
//!
//! The `state.` prefix is mandatory on paths and stripped during parsing;
//! compiled [`Predicate`]s address fields directly.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use super::{CmpOp, Predicate};

/// Errors from parsing a condition expression.
///
/// These surface at compile time, wrapped into the compiler's
/// `InvalidCondition` variant with the offending edge or trigger named.
#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum PredicateParseError {
    #[error("unexpected character `{found}` at offset {offset}")]
    #[diagnostic(code(harmonyspace::condition::unexpected_char))]
    UnexpectedChar { found: char, offset: usize },

    #[error("unterminated string literal starting at offset {offset}")]
    #[diagnostic(code(harmonyspace::condition::unterminated_string))]
    UnterminatedString { offset: usize },

    #[error("expected {expected}, found `{found}`")]
    #[diagnostic(code(harmonyspace::condition::unexpected_token))]
    UnexpectedToken { expected: &'static str, found: String },

    #[error("expected {expected}, found end of expression")]
    #[diagnostic(code(harmonyspace::condition::unexpected_end))]
    UnexpectedEnd { expected: &'static str },

    #[error("state paths must start with `state.`, found `{found}`")]
    #[diagnostic(
        code(harmonyspace::condition::bad_path),
        help("Write conditions as `state.<field>[.<field>...] <op> <literal>`.")
    )]
    BadPath { found: String },

    #[error("invalid number literal `{found}`")]
    #[diagnostic(code(harmonyspace::condition::bad_number))]
    BadNumber { found: String },

    #[error("trailing input after expression: `{found}`")]
    #[diagnostic(code(harmonyspace::condition::trailing_input))]
    TrailingInput { found: String },
}

/// Parse a condition expression into a [`Predicate`] tree.
pub fn parse_predicate(input: &str) -> Result<Predicate, PredicateParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let predicate = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(PredicateParseError::TrailingInput {
            found: token.describe(),
        });
    }
    Ok(predicate)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Path(p) => format!("state.{p}"),
            Self::Str(s) => format!("'{s}'"),
            Self::Num(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Null => "null".into(),
            Self::Op(op) => op.as_str().into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
            Self::Not => "!".into(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, PredicateParseError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::Op(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CmpOp::Lt));
                i += 1;
            }
            '>' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::Op(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(CmpOp::Gt));
                i += 1;
            }
            '\'' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'\'' {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(PredicateParseError::UnterminatedString { offset: i });
                }
                tokens.push(Token::Str(input[start..j].to_string()));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                let text = &input[start..i];
                let num = text
                    .parse::<f64>()
                    .map_err(|_| PredicateParseError::BadNumber { found: text.into() })?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'.')
                {
                    i += 1;
                }
                let word = &input[start..i];
                match word {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    _ => {
                        let Some(path) = word.strip_prefix("state.") else {
                            return Err(PredicateParseError::BadPath { found: word.into() });
                        };
                        if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
                            return Err(PredicateParseError::BadPath { found: word.into() });
                        }
                        tokens.push(Token::Path(path.to_string()));
                    }
                }
            }
            other => {
                return Err(PredicateParseError::UnexpectedChar {
                    found: other,
                    offset: i,
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateParseError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::Any(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateParseError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::All(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateParseError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Predicate::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(PredicateParseError::UnexpectedToken {
                        expected: "`)`",
                        found: token.describe(),
                    }),
                    None => Err(PredicateParseError::UnexpectedEnd { expected: "`)`" }),
                }
            }
            _ => self.parse_compare(),
        }
    }

    fn parse_compare(&mut self) -> Result<Predicate, PredicateParseError> {
        let path = match self.next() {
            Some(Token::Path(path)) => path,
            Some(token) => {
                return Err(PredicateParseError::UnexpectedToken {
                    expected: "a state path",
                    found: token.describe(),
                });
            }
            None => {
                return Err(PredicateParseError::UnexpectedEnd {
                    expected: "a state path",
                });
            }
        };
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            Some(token) => {
                return Err(PredicateParseError::UnexpectedToken {
                    expected: "a comparison operator",
                    found: token.describe(),
                });
            }
            None => {
                return Err(PredicateParseError::UnexpectedEnd {
                    expected: "a comparison operator",
                });
            }
        };
        let value = match self.next() {
            Some(Token::Str(s)) => Value::String(s),
            Some(Token::Num(n)) => serde_json::json!(n),
            Some(Token::Bool(b)) => Value::Bool(b),
            Some(Token::Null) => Value::Null,
            Some(token) => {
                return Err(PredicateParseError::UnexpectedToken {
                    expected: "a literal",
                    found: token.describe(),
                });
            }
            None => {
                return Err(PredicateParseError::UnexpectedEnd {
                    expected: "a literal",
                });
            }
        };
        Ok(Predicate::Compare { path, op, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_equality() {
        let pred = parse_predicate("state.agent_selection.agent_id == 'tech_support'").unwrap();
        assert_eq!(
            pred,
            Predicate::Compare {
                path: "agent_selection.agent_id".into(),
                op: CmpOp::Eq,
                value: json!("tech_support"),
            }
        );
    }

    #[test]
    fn parses_relational_number() {
        let pred = parse_predicate("state.solution_confidence < 0.8").unwrap();
        assert_eq!(
            pred,
            Predicate::Compare {
                path: "solution_confidence".into(),
                op: CmpOp::Lt,
                value: json!(0.8),
            }
        );
    }

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let pred =
            parse_predicate("state.a == 1 || state.b == 2 && state.c == 3").unwrap();
        let Predicate::Any(terms) = pred else {
            panic!("expected Any at top level");
        };
        assert_eq!(terms.len(), 2);
        assert!(matches!(terms[1], Predicate::All(_)));
    }

    #[test]
    fn parens_and_negation() {
        let pred = parse_predicate("!(state.resolved == true || state.count > 5)").unwrap();
        assert!(matches!(pred, Predicate::Not(_)));
    }

    #[test]
    fn rejects_path_without_state_prefix() {
        let err = parse_predicate("resolved == true").unwrap_err();
        assert!(matches!(err, PredicateParseError::BadPath { .. }));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = parse_predicate("state.x == 'oops").unwrap_err();
        assert!(matches!(err, PredicateParseError::UnterminatedString { .. }));
    }

    #[test]
    fn rejects_trailing_input() {
        let err = parse_predicate("state.x == 1 state.y == 2").unwrap_err();
        assert!(matches!(err, PredicateParseError::TrailingInput { .. }));
    }
}
