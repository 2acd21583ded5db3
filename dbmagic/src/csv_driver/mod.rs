//! The CSV driver: one file, one table, one query.
//!
//! The file's first record names the columns and every later record is a
//! row of text values. The only accepted query is [`SUPPORTED_QUERY`].
//! Statements and transactions are part of the driver contract but are
//! answered with [`Error::Unsupported`].

mod quoting;
mod rows;

pub use rows::CsvRows;

use crate::config::ExpandEnv;
use crate::driver::{Connection, Driver, Rows, Statement, Transaction, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The one query text the driver answers, matched byte for byte.
pub const SUPPORTED_QUERY: &str = "SELECT * FROM csv";

/// How a connection obtains read handles for its cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleMode {
    /// Every query opens its own handle, closed with its cursor.
    /// Cursors from one connection are independent of each other.
    #[default]
    PerQuery,
    /// `open` keeps one handle that every query rewinds and reads.
    ///
    /// Only strictly sequential use is correct: a cursor must be drained
    /// or closed before the next query. Two live cursors share one read
    /// position and silently skip or steal each other's rows.
    Shared,
}

impl ExpandEnv for HandleMode {}

/// Driver factory. Stateless apart from the handle mode it hands to
/// every connection it opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvDriver {
    mode: HandleMode,
}

impl CsvDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: HandleMode) -> Self {
        CsvDriver { mode }
    }

    pub fn mode(&self) -> HandleMode {
        self.mode
    }
}

impl Driver for CsvDriver {
    fn open(&self, locator: &str) -> Result<Box<dyn Connection>> {
        let conn = CsvConnection::open(Path::new(locator), self.mode)?;
        Ok(Box::new(conn))
    }
}

enum Handle {
    PerQuery,
    Shared(SharedFile),
    Closed,
}

/// A connection bound to one CSV file.
pub struct CsvConnection {
    path: PathBuf,
    mode: HandleMode,
    handle: Handle,
}

impl CsvConnection {
    /// Open a connection to `path`, failing fast if the file cannot be read.
    pub fn open(path: &Path, mode: HandleMode) -> Result<Self> {
        let file = open_file(path)?;
        let handle = match mode {
            HandleMode::PerQuery => Handle::PerQuery,
            HandleMode::Shared => Handle::Shared(SharedFile::new(file)),
        };
        log::debug!("Opened CSV connection to {} ({mode:?})", path.display());

        Ok(CsvConnection {
            path: path.to_path_buf(),
            mode,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> HandleMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.handle, Handle::Closed)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed("connection"));
        }
        Ok(())
    }

    fn unavailable(&self, source: io::Error) -> Error {
        Error::ResourceUnavailable {
            path: self.path.clone(),
            source,
        }
    }
}

impl Connection for CsvConnection {
    fn prepare(&mut self, _query: &str) -> Result<Box<dyn Statement>> {
        self.check_open()?;
        Err(Error::Unsupported("Prepare"))
    }

    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        self.check_open()?;
        Err(Error::Unsupported("Begin"))
    }

    fn query(&mut self, query: &str, args: &[Value]) -> Result<Box<dyn Rows>> {
        self.check_open()?;
        if query != SUPPORTED_QUERY {
            return Err(Error::UnsupportedQuery {
                query: query.to_string(),
            });
        }
        if !args.is_empty() {
            return Err(Error::Unsupported("bind arguments"));
        }

        let rows: Box<dyn Rows> = match &self.handle {
            Handle::PerQuery => {
                let file = open_file(&self.path)?;
                Box::new(CsvRows::from_reader(file)?)
            }
            Handle::Shared(shared) => {
                shared.rewind().map_err(|e| self.unavailable(e))?;
                Box::new(CsvRows::from_reader(shared.clone())?)
            }
            Handle::Closed => return Err(Error::Closed("connection")),
        };

        log::debug!(
            "Query on {} returned columns {:?}",
            self.path.display(),
            rows.columns()
        );
        Ok(rows)
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_closed() {
            self.handle = Handle::Closed;
            log::debug!("Closed CSV connection to {}", self.path.display());
        }
        Ok(())
    }
}

impl Transaction for CsvConnection {
    fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        Err(Error::Unsupported("Commit"))
    }

    fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        Err(Error::Unsupported("Rollback"))
    }
}

/// One file handle shared by every cursor of a [`HandleMode::Shared`] connection.
#[derive(Clone)]
struct SharedFile(Arc<Mutex<File>>);

impl SharedFile {
    fn new(file: File) -> Self {
        SharedFile(Arc::new(Mutex::new(file)))
    }

    fn rewind(&self) -> io::Result<()> {
        self.lock()?.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "shared CSV handle poisoned"))
    }
}

impl Read for SharedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock()?.read(buf)
    }
}

fn open_file(path: &Path) -> Result<File> {
    let unavailable = |source: io::Error| Error::ResourceUnavailable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unavailable)?;
    let metadata = file.metadata().map_err(unavailable)?;
    if !metadata.is_file() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    Ok(file)
}
