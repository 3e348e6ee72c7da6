//! Filter expressions, evaluated server-side against each record before an
//! operation is applied. Records that do not match fail with the
//! filtered-out result code instead of being read or written.
//!
//! Expressions form a small predicate tree that is serialized as
//! MessagePack: every node is a list of `[opcode, args...]`.
//!
//! # Examples
//!
//! ```
//! use meridian::expressions as exp;
//!
//! // a == 1 && b != "x"
//! let filter = exp::and(vec![
//!     exp::eq(exp::int_bin("a"), exp::int_val(1)),
//!     exp::ne(exp::string_bin("b"), exp::string_val("x")),
//! ]);
//! ```

use crate::{
    commands::ParticleType,
    msgpack::{encoder, Write},
    Value,
};

const OP_EQ: i64 = 1;
const OP_NE: i64 = 2;
const OP_GT: i64 = 3;
const OP_GE: i64 = 4;
const OP_LT: i64 = 5;
const OP_LE: i64 = 6;
const OP_AND: i64 = 16;
const OP_OR: i64 = 17;
const OP_NOT: i64 = 18;
const OP_BIN: i64 = 81;
const OP_BIN_EXISTS: i64 = 82;

/// A server-side predicate over record contents.
#[derive(Clone, Debug)]
pub struct FilterExpression(Node);

#[derive(Clone, Debug)]
enum Node {
    Cmp(i64, Box<Node>, Box<Node>),
    Junction(i64, Vec<Node>),
    Not(Box<Node>),
    Bin(ParticleType, String),
    BinExists(String),
    Val(Value),
}

impl FilterExpression {
    /// Serialize the expression, returning the encoded size.
    pub(crate) fn pack(&self, w: &mut impl Write) -> usize {
        self.0.pack(w)
    }
}

impl Node {
    fn pack(&self, w: &mut impl Write) -> usize {
        match self {
            Self::Cmp(op, left, right) => {
                let mut size = pack_array_header(w, 3);
                size += encoder::pack_value(w, &Value::Int(*op));
                size += left.pack(w);
                size += right.pack(w);
                size
            }
            Self::Junction(op, nodes) => {
                let mut size = pack_array_header(w, 1 + nodes.len());
                size += encoder::pack_value(w, &Value::Int(*op));
                for node in nodes {
                    size += node.pack(w);
                }
                size
            }
            Self::Not(node) => {
                let mut size = pack_array_header(w, 2);
                size += encoder::pack_value(w, &Value::Int(OP_NOT));
                size += node.pack(w);
                size
            }
            Self::Bin(ty, name) => {
                let mut size = pack_array_header(w, 3);
                size += encoder::pack_value(w, &Value::Int(OP_BIN));
                size += encoder::pack_value(w, &Value::Int(*ty as i64));
                size += encoder::pack_value(w, &Value::String(name.clone()));
                size
            }
            Self::BinExists(name) => {
                let mut size = pack_array_header(w, 2);
                size += encoder::pack_value(w, &Value::Int(OP_BIN_EXISTS));
                size += encoder::pack_value(w, &Value::String(name.clone()));
                size
            }
            Self::Val(value) => encoder::pack_value(w, value),
        }
    }
}

fn pack_array_header(w: &mut impl Write, len: usize) -> usize {
    debug_assert!(len < 16);
    w.write_u8(0x90 | len as u8);
    1
}

fn cmp(op: i64, left: FilterExpression, right: FilterExpression) -> FilterExpression {
    FilterExpression(Node::Cmp(op, Box::new(left.0), Box::new(right.0)))
}

/// Left equals right.
#[must_use]
pub fn eq(left: FilterExpression, right: FilterExpression) -> FilterExpression {
    cmp(OP_EQ, left, right)
}

/// Left does not equal right.
#[must_use]
pub fn ne(left: FilterExpression, right: FilterExpression) -> FilterExpression {
    cmp(OP_NE, left, right)
}

/// Left is greater than right.
#[must_use]
pub fn gt(left: FilterExpression, right: FilterExpression) -> FilterExpression {
    cmp(OP_GT, left, right)
}

/// Left is greater than or equal to right.
#[must_use]
pub fn ge(left: FilterExpression, right: FilterExpression) -> FilterExpression {
    cmp(OP_GE, left, right)
}

/// Left is less than right.
#[must_use]
pub fn lt(left: FilterExpression, right: FilterExpression) -> FilterExpression {
    cmp(OP_LT, left, right)
}

/// Left is less than or equal to right.
#[must_use]
pub fn le(left: FilterExpression, right: FilterExpression) -> FilterExpression {
    cmp(OP_LE, left, right)
}

/// All sub-expressions match.
#[must_use]
pub fn and(exps: Vec<FilterExpression>) -> FilterExpression {
    FilterExpression(Node::Junction(
        OP_AND,
        exps.into_iter().map(|e| e.0).collect(),
    ))
}

/// Any sub-expression matches.
#[must_use]
pub fn or(exps: Vec<FilterExpression>) -> FilterExpression {
    FilterExpression(Node::Junction(
        OP_OR,
        exps.into_iter().map(|e| e.0).collect(),
    ))
}

/// The sub-expression does not match.
#[must_use]
pub fn not(exp: FilterExpression) -> FilterExpression {
    FilterExpression(Node::Not(Box::new(exp.0)))
}

/// The value of an integer bin.
#[must_use]
pub fn int_bin(name: impl Into<String>) -> FilterExpression {
    FilterExpression(Node::Bin(ParticleType::Integer, name.into()))
}

/// The value of a string bin.
#[must_use]
pub fn string_bin(name: impl Into<String>) -> FilterExpression {
    FilterExpression(Node::Bin(ParticleType::String, name.into()))
}

/// The value of a float bin.
#[must_use]
pub fn float_bin(name: impl Into<String>) -> FilterExpression {
    FilterExpression(Node::Bin(ParticleType::Float, name.into()))
}

/// The value of a boolean bin.
#[must_use]
pub fn bool_bin(name: impl Into<String>) -> FilterExpression {
    FilterExpression(Node::Bin(ParticleType::Bool, name.into()))
}

/// Whether the named bin exists.
#[must_use]
pub fn bin_exists(name: impl Into<String>) -> FilterExpression {
    FilterExpression(Node::BinExists(name.into()))
}

/// An integer literal.
#[must_use]
pub fn int_val(value: i64) -> FilterExpression {
    FilterExpression(Node::Val(Value::Int(value)))
}

/// A string literal.
#[must_use]
pub fn string_val(value: impl Into<String>) -> FilterExpression {
    FilterExpression(Node::Val(Value::String(value.into())))
}

/// A float literal.
#[must_use]
pub fn float_val(value: f64) -> FilterExpression {
    FilterExpression(Node::Val(Value::from(value)))
}

/// A boolean literal.
#[must_use]
pub fn bool_val(value: bool) -> FilterExpression {
    FilterExpression(Node::Val(Value::Bool(value)))
}
