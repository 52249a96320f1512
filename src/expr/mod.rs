//! Grammar expressions
//!
//! A small, sandboxed expression language used by grammars to transform
//! field contents (`mod_contents`), compute repeat counts (`count_mod`) and
//! test field presence (`match_mod`). Expressions are parsed once when the
//! grammar is loaded and evaluated against a fixed binding set:
//!
//! - `value` (aliases `count_field`, `field_contents`, `match_field`): the
//!   referenced field value
//! - `struct.size`: bytes consumed so far by the open struct
//! - `struct.instance`: instance id of the open struct

mod parse;

use std::fmt;

use crate::value::FieldValue;

/// Expression errors, raised at load time (syntax) or evaluation time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("syntax error at column {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("unknown name '{name}' at column {pos}")]
    UnknownName { name: String, pos: usize },

    #[error("no value bound for '{0}'")]
    Unbound(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("operator {op} cannot be applied to {operands}")]
    Type { op: &'static str, operands: String },
}

/// Named inputs available to an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    Value,
    StructSize,
    StructInstance,
}

impl Var {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "value" | "count_field" | "field_contents" | "match_field" => Some(Var::Value),
            "struct.size" => Some(Var::StructSize),
            "struct.instance" => Some(Var::StructInstance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

/// Expression syntax tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Var(Var),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

/// View of the open struct span exposed to expressions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanInfo {
    /// Bytes consumed by the struct so far
    pub size: usize,
    /// Struct instance id
    pub instance: usize,
}

/// Values bound for one evaluation
#[derive(Debug, Clone, Copy, Default)]
pub struct Bindings<'a> {
    pub value: Option<&'a FieldValue>,
    pub span: Option<SpanInfo>,
}

impl<'a> Bindings<'a> {
    pub fn new(value: Option<&'a FieldValue>, span: Option<SpanInfo>) -> Self {
        Self { value, span }
    }
}

/// A parsed expression together with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression from source
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let ast = parse::parse(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            ast,
        })
    }

    /// The expression that passes `value` through unchanged
    pub fn identity() -> Self {
        Self {
            source: "value".to_string(),
            ast: Expr::Var(Var::Value),
        }
    }

    /// `value == <literal>`
    pub fn equals(literal: &FieldValue) -> Self {
        let (source, rhs) = match literal {
            FieldValue::Number(n) => (format!("value == {}", n), Expr::Int(*n)),
            FieldValue::Text(s) => (format!("value == {:?}", s), Expr::Str(s.clone())),
        };
        Self {
            source,
            ast: Expr::Binary {
                op: BinOp::Eq,
                lhs: Box::new(Expr::Var(Var::Value)),
                rhs: Box::new(rhs),
            },
        }
    }

    /// Whether this expression is a bare reference to `value`
    pub fn is_identity(&self) -> bool {
        self.ast == Expr::Var(Var::Value)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against the given bindings
    pub fn eval(&self, bindings: &Bindings<'_>) -> Result<FieldValue, ExprError> {
        eval(&self.ast, bindings)
    }

    /// Evaluate and require an integer result
    pub fn eval_int(&self, bindings: &Bindings<'_>) -> Result<i64, ExprError> {
        match self.eval(bindings)? {
            FieldValue::Number(n) => Ok(n),
            FieldValue::Text(_) => Err(ExprError::Type {
                op: "count",
                operands: "text".to_string(),
            }),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(expr: &Expr, bindings: &Bindings<'_>) -> Result<FieldValue, ExprError> {
    match expr {
        Expr::Int(n) => Ok(FieldValue::Number(*n)),
        Expr::Str(s) => Ok(FieldValue::Text(s.clone())),
        Expr::Var(Var::Value) => bindings.value.cloned().ok_or(ExprError::Unbound("value")),
        Expr::Var(Var::StructSize) => bindings
            .span
            .map(|s| FieldValue::Number(s.size as i64))
            .ok_or(ExprError::Unbound("struct.size")),
        Expr::Var(Var::StructInstance) => bindings
            .span
            .map(|s| FieldValue::Number(s.instance as i64))
            .ok_or(ExprError::Unbound("struct.instance")),
        Expr::Unary { op, operand } => {
            let v = eval(operand, bindings)?;
            match (op, v) {
                (UnaryOp::Not, v) => Ok(bool_value(!v.is_truthy())),
                (UnaryOp::Neg, FieldValue::Number(n)) => Ok(FieldValue::Number(n.wrapping_neg())),
                (UnaryOp::BitNot, FieldValue::Number(n)) => Ok(FieldValue::Number(!n)),
                (op, FieldValue::Text(_)) => Err(ExprError::Type {
                    op: if *op == UnaryOp::Neg { "-" } else { "~" },
                    operands: "text".to_string(),
                }),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            // Short-circuit logical operators before evaluating the right side
            match op {
                BinOp::Or => {
                    let l = eval(lhs, bindings)?;
                    if l.is_truthy() {
                        return Ok(bool_value(true));
                    }
                    return Ok(bool_value(eval(rhs, bindings)?.is_truthy()));
                }
                BinOp::And => {
                    let l = eval(lhs, bindings)?;
                    if !l.is_truthy() {
                        return Ok(bool_value(false));
                    }
                    return Ok(bool_value(eval(rhs, bindings)?.is_truthy()));
                }
                _ => {}
            }
            let l = eval(lhs, bindings)?;
            let r = eval(rhs, bindings)?;
            binary(*op, l, r)
        }
        Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            if eval(cond, bindings)?.is_truthy() {
                eval(then_expr, bindings)
            } else {
                eval(else_expr, bindings)
            }
        }
    }
}

fn bool_value(b: bool) -> FieldValue {
    FieldValue::Number(b as i64)
}

fn binary(op: BinOp, l: FieldValue, r: FieldValue) -> Result<FieldValue, ExprError> {
    let (a, b) = match (&l, &r) {
        (FieldValue::Number(a), FieldValue::Number(b)) => (*a, *b),
        (FieldValue::Text(a), FieldValue::Text(b)) => {
            return match op {
                BinOp::Eq => Ok(bool_value(a == b)),
                BinOp::Ne => Ok(bool_value(a != b)),
                BinOp::Add => Ok(FieldValue::Text(format!("{}{}", a, b))),
                _ => Err(type_error(op, "text and text")),
            };
        }
        _ => {
            return match op {
                BinOp::Eq => Ok(bool_value(false)),
                BinOp::Ne => Ok(bool_value(true)),
                _ => Err(type_error(op, "number and text")),
            };
        }
    };

    let n = match op {
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::BitAnd => a & b,
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::Shl => a.checked_shl(b as u32).unwrap_or(0),
        BinOp::Shr => a.checked_shr(b as u32).unwrap_or(0),
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ExprError::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        BinOp::Rem => {
            if b == 0 {
                return Err(ExprError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }
        BinOp::Or | BinOp::And => unreachable!("logical operators are short-circuited"),
    };
    Ok(FieldValue::Number(n))
}

fn type_error(op: BinOp, operands: &str) -> ExprError {
    ExprError::Type {
        op: op.symbol(),
        operands: operands.to_string(),
    }
}
