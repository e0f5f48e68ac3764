//! Runtime values and their operators.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

use crate::sandbox::parser::{BinOp, CmpOp};

/// Largest value a script may build, counted as string bytes plus list
/// entries at every level.
pub const MAX_VALUE_SIZE: usize = 1 << 20;

/// Deepest list nesting a script may build.
pub const MAX_LIST_DEPTH: usize = 32;

/// Why an operator could not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error("{0}")]
    Invalid(String),

    #[error("value would exceed {limit} items")]
    TooLarge { limit: usize },

    #[error("lists would nest deeper than {limit} levels")]
    TooDeep { limit: usize },
}

impl From<String> for OpError {
    fn from(message: String) -> Self {
        OpError::Invalid(message)
    }
}

impl From<&str> for OpError {
    fn from(message: &str) -> Self {
        OpError::Invalid(message.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
        }
    }

    /// Quoted form used inside list displays.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<i64> {
        self.as_i64()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operators
// ─────────────────────────────────────────────────────────────────────────────

/// Apply a binary operator.  `Err` carries a message for the script author.
pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, OpError> {
    use Value::{Float, Int, List, Str};

    let unsupported = || {
        OpError::Invalid(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op_symbol(op),
            left.type_name(),
            right.type_name()
        ))
    };

    match (op, left, right) {
        (BinOp::Add, Str(a), Str(b)) => {
            check_size(a.len().saturating_add(b.len()))?;
            return Ok(Str(format!("{a}{b}")));
        }
        (BinOp::Add, List(a), List(b)) => {
            let (size_a, _) = measure(a);
            let (size_b, _) = measure(b);
            check_size(size_a.saturating_add(size_b))?;
            return Ok(List(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Mul, Str(s), n) | (BinOp::Mul, n, Str(s)) if n.as_i64().is_some() => {
            let times = repeat_count(n, s.len())?;
            return Ok(Str(s.repeat(times)));
        }
        (BinOp::Mul, List(l), n) | (BinOp::Mul, n, List(l)) if n.as_i64().is_some() => {
            let times = repeat_count(n, measure(l).0)?;
            let mut out = Vec::with_capacity(l.len() * times);
            for _ in 0..times {
                out.extend(l.iter().cloned());
            }
            return Ok(List(out));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let overflow = || OpError::from("integer overflow");
        return match op {
            BinOp::Add => a.checked_add(b).map(Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err("division by zero".into()),
            BinOp::Div => Ok(Float(a as f64 / b as f64)),
            BinOp::FloorDiv | BinOp::Mod if b == 0 => Err("integer division or modulo by zero".into()),
            BinOp::FloorDiv => {
                let q = a.checked_div(b).ok_or_else(overflow)?;
                Ok(Int(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }))
            }
            BinOp::Mod => {
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            BinOp::Pow if b >= 0 => {
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                a.checked_pow(exp).map(Int).ok_or_else(overflow)
            }
            BinOp::Pow => Ok(Float((a as f64).powf(b as f64))),
        };
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(unsupported());
    };
    match op {
        BinOp::Add => Ok(Float(a + b)),
        BinOp::Sub => Ok(Float(a - b)),
        BinOp::Mul => Ok(Float(a * b)),
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => Err("float division by zero".into()),
        BinOp::Div => Ok(Float(a / b)),
        BinOp::FloorDiv => Ok(Float((a / b).floor())),
        BinOp::Mod => Ok(Float(a - b * (a / b).floor())),
        BinOp::Pow => Ok(Float(a.powf(b))),
    }
}

fn repeat_count(n: &Value, size: usize) -> Result<usize, OpError> {
    let times = usize::try_from(n.as_i64().unwrap_or(0)).unwrap_or(0);
    check_size(times.saturating_mul(size))?;
    Ok(times)
}

fn check_size(size: usize) -> Result<(), OpError> {
    if size > MAX_VALUE_SIZE {
        return Err(OpError::TooLarge {
            limit: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Size (string bytes plus entries at every level) and nesting depth of a
/// list's contents.  Counting stops early once the size limit is passed.
fn measure(items: &[Value]) -> (usize, usize) {
    let mut size = items.len();
    let mut depth = 1;
    for item in items {
        match item {
            Value::Str(s) => size = size.saturating_add(s.len()),
            Value::List(inner) => {
                let (inner_size, inner_depth) = measure(inner);
                size = size.saturating_add(inner_size);
                depth = depth.max(inner_depth + 1);
            }
            _ => {}
        }
        if size > MAX_VALUE_SIZE {
            break;
        }
    }
    (size, depth)
}

/// Build a list, refusing one that breaks the size or depth limits.
pub fn list(items: Vec<Value>) -> Result<Value, OpError> {
    let (size, depth) = measure(&items);
    check_size(size)?;
    if depth > MAX_LIST_DEPTH {
        return Err(OpError::TooDeep {
            limit: MAX_LIST_DEPTH,
        });
    }
    Ok(Value::List(items))
}

/// Refuse a string that breaks the size limit.
pub fn string(s: String) -> Result<Value, OpError> {
    check_size(s.len())?;
    Ok(Value::Str(s))
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, String> {
    match op {
        CmpOp::Eq => Ok(equals(left, right)),
        CmpOp::NotEq => Ok(!equals(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = order(left, right).ok_or_else(|| {
                format!(
                    "'{}' not supported between '{}' and '{}'",
                    cmp_symbol(op),
                    left.type_name(),
                    right.type_name()
                )
            })?;
            Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y))
        }
        (Value::None, Value::None) => true,
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

pub fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                match order(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match (container, item) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::List(items), _) => Ok(items.iter().any(|v| equals(v, item))),
        _ => Err(format!(
            "'in' not supported for '{}' in '{}'",
            item.type_name(),
            container.type_name()
        )),
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}
