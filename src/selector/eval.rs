//! Three-valued evaluation of a parsed selector against a message.

use std::borrow::Cow;
use std::cmp::Ordering;

use super::parser::{ArithOp, CmpOp, Expr, LikeToken, Literal};
use crate::message::{Message, Value};

/// SQL truth value. `Unknown` arises from missing identifiers and `NULL`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    True,
    False,
    Unknown,
}

impl Tri {
    pub fn is_true(self) -> bool {
        self == Tri::True
    }

    pub fn not(self) -> Tri {
        match self {
            Tri::True => Tri::False,
            Tri::False => Tri::True,
            Tri::Unknown => Tri::Unknown,
        }
    }

    pub fn and(self, other: Tri) -> Tri {
        match (self, other) {
            (Tri::False, _) | (_, Tri::False) => Tri::False,
            (Tri::True, Tri::True) => Tri::True,
            _ => Tri::Unknown,
        }
    }

    pub fn or(self, other: Tri) -> Tri {
        match (self, other) {
            (Tri::True, _) | (_, Tri::True) => Tri::True,
            (Tri::False, Tri::False) => Tri::False,
            _ => Tri::Unknown,
        }
    }
}

impl From<bool> for Tri {
    fn from(b: bool) -> Self {
        if b { Tri::True } else { Tri::False }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand<'a> {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(Cow<'a, str>),
}

fn resolve<'a>(name: &str, message: &'a Message) -> Operand<'a> {
    let header = match name {
        "JMSDeliveryMode" => Some(Operand::Str(Cow::Borrowed(
            message.delivery_mode().as_str(),
        ))),
        "JMSPriority" => Some(Operand::Long(i64::from(message.priority()))),
        "JMSTimestamp" => Some(Operand::Long(message.timestamp())),
        "JMSMessageID" => Some(optional_str(message.message_id())),
        "JMSCorrelationID" => Some(optional_str(message.correlation_id())),
        "JMSType" => Some(optional_str(message.jms_type())),
        _ => None,
    };
    if let Some(operand) = header {
        return operand;
    }

    match message.get_property(name) {
        None => Operand::Null,
        Some(Value::Boolean(b)) => Operand::Bool(*b),
        Some(Value::Byte(v)) => Operand::Long(i64::from(*v)),
        Some(Value::Short(v)) => Operand::Long(i64::from(*v)),
        Some(Value::Int(v)) => Operand::Long(i64::from(*v)),
        Some(Value::Long(v)) => Operand::Long(*v),
        Some(Value::Float(v)) => Operand::Double(f64::from(*v)),
        Some(Value::Double(v)) => Operand::Double(*v),
        Some(Value::String(s)) => Operand::Str(Cow::Borrowed(s)),
        // not settable as properties
        Some(Value::Char(_) | Value::Bytes(_)) => Operand::Null,
    }
}

fn optional_str(value: Option<&str>) -> Operand<'_> {
    value.map_or(Operand::Null, |s| Operand::Str(Cow::Borrowed(s)))
}

fn value<'a>(expr: &'a Expr, message: &'a Message) -> Operand<'a> {
    match expr {
        Expr::Literal(Literal::Bool(b)) => Operand::Bool(*b),
        Expr::Literal(Literal::Long(v)) => Operand::Long(*v),
        Expr::Literal(Literal::Double(v)) => Operand::Double(*v),
        Expr::Literal(Literal::Str(s)) => Operand::Str(Cow::Borrowed(s)),
        Expr::Ident(name) => resolve(name, message),
        Expr::Arith(op, l, r) => arith(*op, value(l, message), value(r, message)),
        Expr::Neg(inner) => match value(inner, message) {
            Operand::Long(v) => Operand::Long(v.wrapping_neg()),
            Operand::Double(v) => Operand::Double(-v),
            _ => Operand::Null,
        },
        predicate => match truth(predicate, message) {
            Tri::True => Operand::Bool(true),
            Tri::False => Operand::Bool(false),
            Tri::Unknown => Operand::Null,
        },
    }
}

fn arith(op: ArithOp, l: Operand<'_>, r: Operand<'_>) -> Operand<'static> {
    match (l, r) {
        (Operand::Long(a), Operand::Long(b)) => match op {
            ArithOp::Add => Operand::Long(a.wrapping_add(b)),
            ArithOp::Sub => Operand::Long(a.wrapping_sub(b)),
            ArithOp::Mul => Operand::Long(a.wrapping_mul(b)),
            ArithOp::Div => a.checked_div(b).map_or(Operand::Null, Operand::Long),
        },
        (l, r) => match (as_double(&l), as_double(&r)) {
            (Some(a), Some(b)) => Operand::Double(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            }),
            _ => Operand::Null,
        },
    }
}

fn as_double(operand: &Operand<'_>) -> Option<f64> {
    match operand {
        Operand::Long(v) => Some(*v as f64),
        Operand::Double(v) => Some(*v),
        _ => None,
    }
}

fn compare(op: CmpOp, l: &Operand<'_>, r: &Operand<'_>) -> Tri {
    let ordering = match (l, r) {
        (Operand::Null, _) | (_, Operand::Null) => return Tri::Unknown,
        (Operand::Long(a), Operand::Long(b)) => Some(a.cmp(b)),
        (Operand::Long(_) | Operand::Double(_), Operand::Long(_) | Operand::Double(_)) => {
            match (as_double(l), as_double(r)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            }
        }
        (Operand::Str(a), Operand::Str(b)) => {
            return equality(op, a == b);
        }
        (Operand::Bool(a), Operand::Bool(b)) => {
            return equality(op, a == b);
        }
        // unlike types never compare equal
        _ => return Tri::False,
    };
    let Some(ordering) = ordering else {
        // NaN
        return Tri::False;
    };
    Tri::from(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

fn equality(op: CmpOp, equal: bool) -> Tri {
    match op {
        CmpOp::Eq => Tri::from(equal),
        CmpOp::Ne => Tri::from(!equal),
        _ => Tri::False,
    }
}

fn negate_if(tri: Tri, negated: bool) -> Tri {
    if negated { tri.not() } else { tri }
}

pub(crate) fn truth(expr: &Expr, message: &Message) -> Tri {
    match expr {
        Expr::Not(inner) => truth(inner, message).not(),
        Expr::And(l, r) => {
            let left = truth(l, message);
            if left == Tri::False {
                return Tri::False;
            }
            left.and(truth(r, message))
        }
        Expr::Or(l, r) => {
            let left = truth(l, message);
            if left == Tri::True {
                return Tri::True;
            }
            left.or(truth(r, message))
        }
        Expr::Compare(op, l, r) => compare(*op, &value(l, message), &value(r, message)),
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let v = value(expr, message);
            let in_range = compare(CmpOp::Ge, &v, &value(low, message))
                .and(compare(CmpOp::Le, &v, &value(high, message)));
            negate_if(in_range, *negated)
        }
        Expr::In {
            ident,
            list,
            negated,
        } => {
            let result = match resolve(ident, message) {
                Operand::Null => Tri::Unknown,
                Operand::Str(s) => Tri::from(list.iter().any(|item| *item == *s)),
                _ => Tri::False,
            };
            negate_if(result, *negated)
        }
        Expr::Like {
            ident,
            pattern,
            negated,
        } => {
            let result = match resolve(ident, message) {
                Operand::Null => Tri::Unknown,
                Operand::Str(s) => {
                    let text: Vec<char> = s.chars().collect();
                    Tri::from(like_matches(pattern, &text))
                }
                _ => Tri::False,
            };
            negate_if(result, *negated)
        }
        Expr::IsNull { ident, negated } => {
            let is_null = resolve(ident, message) == Operand::Null;
            negate_if(Tri::from(is_null), *negated)
        }
        other => match value(other, message) {
            Operand::Bool(b) => Tri::from(b),
            _ => Tri::Unknown,
        },
    }
}

/// Glob match where `_` is one character and `%` is any run of characters.
fn like_matches(pattern: &[LikeToken], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(LikeToken::AnyMany) => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(LikeToken::AnyOne) => {
                p += 1;
                t += 1;
                continue;
            }
            Some(LikeToken::Char(c)) if *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|token| *token == LikeToken::AnyMany)
}
