//! Expose a flat CSV file as a queryable relational data source.
//!
//! [`CsvDriver`] implements the [`driver`] contract over a single file whose
//! first record is the column header. [`frontend`] is the thin caller that
//! registers drivers by name and turns cursors into typed rows, and
//! [`config`] loads layered YAML settings with environment expansion.

// Lets `#[derive(ExpandEnv)]` name `::dbmagic` from inside this crate.
extern crate self as dbmagic;

pub mod config;
pub mod csv_driver;
pub mod driver;
pub mod error;
pub mod frontend;

pub use config::{ConfigLoader, ExpandEnv};
pub use csv_driver::{CsvConnection, CsvDriver, CsvRows, HandleMode, SUPPORTED_QUERY};
pub use driver::{Connection, Driver, RowStatus, Rows, Statement, Transaction, Value};
pub use error::{Error, Result};
pub use frontend::{Database, FromValue, QueryRows, Registry, Row};
