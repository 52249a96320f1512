//! Expression lexer and recursive-descent parser
//!
//! Precedence, lowest first:
//! `?:`, `||`, `&&`, `|`, `^`, `&`, `== !=`, `< <= > >=`, `<< >>`,
//! `+ -`, `* / // %`, unary `- ! ~`.

use super::{BinOp, Expr, ExprError, UnaryOp, Var};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
}

/// Multi-character operators must come before their prefixes
const OPERATORS: &[&str] = &[
    "//", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "<", ">",
    "&", "|", "^", "!", "~",
];

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        match c {
            b'(' => {
                tokens.push((start, Token::LParen));
                pos += 1;
            }
            b')' => {
                tokens.push((start, Token::RParen));
                pos += 1;
            }
            b'?' => {
                tokens.push((start, Token::Question));
                pos += 1;
            }
            b':' => {
                tokens.push((start, Token::Colon));
                pos += 1;
            }
            b'"' | b'\'' => {
                let quote = c;
                pos += 1;
                while pos < bytes.len() && bytes[pos] != quote {
                    pos += 1;
                }
                if pos >= bytes.len() {
                    return Err(ExprError::Syntax {
                        pos: start,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push((start, Token::Str(src[start + 1..pos].to_string())));
                pos += 1;
            }
            b'0'..=b'9' => {
                let (value, len) = lex_int(&src[start..]).ok_or_else(|| ExprError::Syntax {
                    pos: start,
                    message: "invalid integer literal".to_string(),
                })?;
                tokens.push((start, Token::Int(value)));
                pos += len;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                let word = &src[start..pos];
                let token = match word {
                    "and" => Token::Op("&&"),
                    "or" => Token::Op("||"),
                    "not" => Token::Op("!"),
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((start, token));
            }
            _ => {
                let rest = &src[start..];
                let op = OPERATORS
                    .iter()
                    .copied()
                    .find(|op| rest.starts_with(*op))
                    .ok_or_else(|| ExprError::Syntax {
                        pos: start,
                        message: format!("unexpected character '{}'", rest.chars().next().unwrap_or('?')),
                    })?;
                tokens.push((start, Token::Op(op)));
                pos += op.len();
            }
        }
    }

    Ok(tokens)
}

/// Lex a decimal or `0x` hexadecimal literal, returning value and length
fn lex_int(s: &str) -> Option<(i64, usize)> {
    let bytes = s.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        let len = bytes[2..].iter().take_while(|b| b.is_ascii_hexdigit()).count();
        if len == 0 {
            return None;
        }
        let value = u64::from_str_radix(&s[2..2 + len], 16).ok()? as i64;
        return Some((value, 2 + len));
    }
    let len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    let value = s[..len].parse::<i64>().ok()?;
    Some((value, len))
}

struct ExprParser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

pub(super) fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(ExprError::Syntax {
            pos: 0,
            message: "empty expression".to_string(),
        });
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        end: src.len(),
    };
    let expr = parser.parse_ternary()?;
    if let Some((pos, token)) = parser.tokens.get(parser.pos) {
        return Err(ExprError::Syntax {
            pos: *pos,
            message: format!("unexpected trailing token {:?}", token),
        });
    }
    Ok(expr)
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError::Syntax {
                pos: self.offset(),
                message: format!("expected {:?}", expected),
            })
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.parse_binary(0)?;
        if self.peek() == Some(&Token::Question) {
            self.advance();
            let then_expr = self.parse_ternary()?;
            self.expect(Token::Colon)?;
            let else_expr = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        Ok(cond)
    }

    /// Left-associative binary operators, one precedence level per call
    fn parse_binary(&mut self, level: usize) -> Result<Expr, ExprError> {
        if level >= BINARY_LEVELS.len() {
            return self.parse_unary();
        }

        let mut lhs = self.parse_binary(level + 1)?;
        while let Some(op) = self.peek_binary_op(level) {
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self, level: usize) -> Option<BinOp> {
        match self.peek() {
            Some(Token::Op(op)) => BINARY_LEVELS[level]
                .iter()
                .find(|(sym, _)| sym == op)
                .map(|(_, bin)| *bin),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(Token::Op("-")) => Some(UnaryOp::Neg),
            Some(Token::Op("!")) => Some(UnaryOp::Not),
            Some(Token::Op("~")) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let pos = self.offset();
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => Var::from_name(&name)
                .map(Expr::Var)
                .ok_or(ExprError::UnknownName { name, pos }),
            Some(Token::LParen) => {
                let inner = self.parse_ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ExprError::Syntax {
                pos,
                message: format!("unexpected token {:?}", token),
            }),
            None => Err(ExprError::Syntax {
                pos,
                message: "unexpected end of expression".to_string(),
            }),
        }
    }
}

const BINARY_LEVELS: &[&[(&str, BinOp)]] = &[
    &[("||", BinOp::Or)],
    &[("&&", BinOp::And)],
    &[("|", BinOp::BitOr)],
    &[("^", BinOp::BitXor)],
    &[("&", BinOp::BitAnd)],
    &[("==", BinOp::Eq), ("!=", BinOp::Ne)],
    &[("<", BinOp::Lt), ("<=", BinOp::Le), (">", BinOp::Gt), (">=", BinOp::Ge)],
    &[("<<", BinOp::Shl), (">>", BinOp::Shr)],
    &[("+", BinOp::Add), ("-", BinOp::Sub)],
    &[("*", BinOp::Mul), ("/", BinOp::Div), ("//", BinOp::Div), ("%", BinOp::Rem)],
];
