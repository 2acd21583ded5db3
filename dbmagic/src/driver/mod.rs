//! The driver service-provider contract.
//!
//! A generic caller (see [`crate::frontend`]) drives any implementation of
//! these traits without knowing which backing resource sits behind it:
//! [`Driver::open`] yields a [`Connection`], [`Connection::query`] yields
//! [`Rows`], and the caller pulls rows with [`Rows::next`] until it reports
//! [`RowStatus::Exhausted`]. Every method exists on every implementation;
//! operations an implementation cannot support return an error instead of
//! being left out.

use crate::error::Result;
use serde::Serialize;
use std::fmt;

/// A single field value crossing the driver boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// Outcome of a successful [`Rows::next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    /// The destination buffer now holds the next row.
    Ready,
    /// No more rows. The destination buffer is untouched.
    Exhausted,
}

/// A named factory of connections. Holds no per-connection state.
pub trait Driver: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn Connection>>;
}

/// A live binding to one backing resource.
pub trait Connection: Send {
    fn prepare(&mut self, query: &str) -> Result<Box<dyn Statement>>;

    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>>;

    fn query(&mut self, query: &str, args: &[Value]) -> Result<Box<dyn Rows>>;

    /// Release the connection's resources. Further calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

pub trait Transaction {
    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// A precompiled statement.
pub trait Statement: Send {
    /// Number of bind placeholders, or `None` if the driver cannot tell.
    fn num_input(&self) -> Option<usize>;

    /// Execute and return the number of affected rows.
    fn exec(&mut self, args: &[Value]) -> Result<u64>;

    fn query(&mut self, args: &[Value]) -> Result<Box<dyn Rows>>;

    fn close(&mut self) -> Result<()>;
}

/// A forward-only cursor over a query result.
pub trait Rows: Send {
    /// Column names, fixed for the lifetime of the cursor.
    fn columns(&self) -> &[String];

    /// Read exactly one row into `dest`, which must hold `columns().len()` slots.
    fn next(&mut self, dest: &mut [Value]) -> Result<RowStatus>;

    /// Release the cursor. Safe after exhaustion and safe to repeat.
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("rob").to_string(), "rob");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
    }

    #[test]
    fn test_value_default_is_null() {
        assert_eq!(Value::default(), Value::Null);
    }
}
