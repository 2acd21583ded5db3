//! Caller side of the driver contract.
//!
//! Drivers are registered under a name and opened by that name with a
//! locator string. [`Database::query`] hands back [`QueryRows`], which owns
//! the connection and cursor for that query and closes both once the rows
//! run out, an error surfaces, or it is dropped.

use crate::driver::{Connection, Driver, RowStatus, Rows, Value};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Named drivers.
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver` under `name`. Names are unique for the registry's lifetime.
    pub fn register(&self, name: &str, driver: Arc<dyn Driver>) -> Result<()> {
        let mut drivers = self
            .drivers
            .write()
            .map_err(|_| Error::Other("driver registry poisoned".into()))?;
        if drivers.contains_key(name) {
            return Err(Error::DuplicateDriver(name.to_string()));
        }
        drivers.insert(name.to_string(), driver);
        log::debug!("Registered driver '{name}'");
        Ok(())
    }

    /// Registered driver names, sorted.
    pub fn drivers(&self) -> Result<Vec<String>> {
        let drivers = self
            .drivers
            .read()
            .map_err(|_| Error::Other("driver registry poisoned".into()))?;
        let mut names: Vec<String> = drivers.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Bind a registered driver to `locator`. No connection is made until the first query.
    pub fn open(&self, name: &str, locator: &str) -> Result<Database> {
        let drivers = self
            .drivers
            .read()
            .map_err(|_| Error::Other("driver registry poisoned".into()))?;
        let driver = drivers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))?;
        Ok(Database {
            driver,
            locator: locator.to_string(),
        })
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Register a driver in the process-wide registry.
pub fn register(name: &str, driver: Arc<dyn Driver>) -> Result<()> {
    REGISTRY.register(name, driver)
}

/// Open a database through the process-wide registry.
pub fn open(name: &str, locator: &str) -> Result<Database> {
    REGISTRY.open(name, locator)
}

/// A driver bound to a locator.
#[derive(Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
    locator: String,
}

impl Database {
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Open a raw connection. The caller is responsible for closing it.
    pub fn connect(&self) -> Result<Box<dyn Connection>> {
        self.driver.open(&self.locator)
    }

    /// Run `query` on a fresh connection.
    pub fn query(&self, query: &str) -> Result<QueryRows> {
        let mut conn = self.connect()?;
        match conn.query(query, &[]) {
            Ok(rows) => Ok(QueryRows::new(conn, rows)),
            Err(e) => {
                if let Err(close_err) = conn.close() {
                    log::warn!("Failed to close connection after query error: {close_err}");
                }
                Err(e)
            }
        }
    }
}

/// Result set of one query. Owns the connection that produced it.
pub struct QueryRows {
    conn: Option<Box<dyn Connection>>,
    rows: Option<Box<dyn Rows>>,
    columns: Arc<[String]>,
}

impl QueryRows {
    fn new(conn: Box<dyn Connection>, rows: Box<dyn Rows>) -> Self {
        let columns: Arc<[String]> = rows.columns().into();
        QueryRows {
            conn: Some(conn),
            rows: Some(rows),
            columns,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Fetch the next row, or `None` once the result set is exhausted.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let rows = match self.rows.as_mut() {
            Some(rows) => rows,
            None => return Ok(None),
        };

        let mut values = vec![Value::Null; self.columns.len()];
        match rows.next(&mut values) {
            Ok(RowStatus::Ready) => Ok(Some(Row {
                columns: Arc::clone(&self.columns),
                values,
            })),
            Ok(RowStatus::Exhausted) => {
                self.close()?;
                Ok(None)
            }
            Err(e) => {
                if let Err(close_err) = self.close() {
                    log::warn!("Failed to close rows after error: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Close the cursor and its connection. Repeated calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        let rows_result = match self.rows.take() {
            Some(mut rows) => rows.close(),
            None => Ok(()),
        };
        let conn_result = match self.conn.take() {
            Some(mut conn) => conn.close(),
            None => Ok(()),
        };
        rows_result.and(conn_result)
    }
}

impl Iterator for QueryRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for QueryRows {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close rows on drop: {e}");
        }
    }
}

/// One fetched row.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert the value at `idx`.
    pub fn get<T: FromValue>(&self, idx: usize) -> Result<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            Error::Conversion(format!(
                "column index {idx} out of range for {} columns",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Convert the value of the column called `name`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::Conversion(format!("no column named '{name}'")))?;
        self.get(idx)
    }

    /// Column name and value pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Conversion from a driver [`Value`] into a typed destination.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(conversion_error(value, "String")),
            Value::Bytes(bytes) => String::from_utf8(bytes.clone())
                .map_err(|e| Error::Conversion(format!("bytes are not UTF-8: {e}"))),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Text(s) => s.trim().parse().map_err(|_| conversion_error(value, "i64")),
            _ => Err(conversion_error(value, "i64")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(x) => Ok(*x),
            Value::Int(i) => Ok(*i as f64),
            Value::Text(s) => s.trim().parse().map_err(|_| conversion_error(value, "f64")),
            _ => Err(conversion_error(value, "f64")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Text(s) => match s.trim() {
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
                _ => Err(conversion_error(value, "bool")),
            },
            _ => Err(conversion_error(value, "bool")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn conversion_error(value: &Value, target: &str) -> Error {
    Error::Conversion(format!("cannot convert {value:?} into {target}"))
}
