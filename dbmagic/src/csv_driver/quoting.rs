//! Strict quote rules on top of the `csv` reader.
//!
//! The `csv` crate accepts a `"` inside an unquoted field and glues text
//! after a closing quote onto the field. Both are rejected here: a field is
//! either fully quoted, with `""` as the only escape, or contains no quote.

use std::io::{self, Read};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Keeps a copy of the bytes handed to the CSV reader until the record
/// they belong to has been checked.
pub(crate) struct RawRecorder<R> {
    inner: R,
    buf: Vec<u8>,
    /// Stream offset of `buf[0]`.
    offset: u64,
}

impl<R> RawRecorder<R> {
    pub(crate) fn new(inner: R) -> Self {
        RawRecorder {
            inner,
            buf: Vec::new(),
            offset: 0,
        }
    }

    /// Check the raw bytes in `start..end` and release everything before `end`.
    pub(crate) fn check_record(&mut self, start: u64, end: u64) -> Result<(), QuoteError> {
        let lo = start.saturating_sub(self.offset) as usize;
        let hi = (end.saturating_sub(self.offset) as usize).min(self.buf.len());
        let result = match self.buf.get(lo..hi) {
            Some(raw) => check_quotes(raw),
            None => Ok(()),
        };

        self.buf.drain(..hi);
        self.offset += hi as u64;
        result
    }
}

impl<R: Read> Read for RawRecorder<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(out)?;
        self.buf.extend_from_slice(&out[..n]);
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuoteError {
    /// `"` inside a field that did not start with one.
    BareQuote { field: usize },
    /// Something other than a delimiter or terminator after a closing quote.
    AfterClosingQuote { field: usize },
    /// Input ended inside a quoted field.
    Unterminated { field: usize },
}

impl std::fmt::Display for QuoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteError::BareQuote { field } => {
                write!(f, "field {field}: bare \" in non-quoted field")
            }
            QuoteError::AfterClosingQuote { field } => {
                write!(f, "field {field}: extraneous or missing \" in quoted field")
            }
            QuoteError::Unterminated { field } => {
                write!(f, "field {field}: quoted field is never closed")
            }
        }
    }
}

#[derive(Clone, Copy)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Validate the raw bytes of one record. Leading blank lines and the
/// record terminator may be part of `raw`.
fn check_quotes(raw: &[u8]) -> Result<(), QuoteError> {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    let begin = raw
        .iter()
        .position(|&b| b != b'\r' && b != b'\n')
        .unwrap_or(raw.len());

    let mut state = State::FieldStart;
    let mut field = 1;
    for &b in &raw[begin..] {
        state = match (state, b) {
            (State::Quoted, b'"') => State::QuoteInQuoted,
            (State::Quoted, _) => State::Quoted,
            (State::QuoteInQuoted, b'"') => State::Quoted,
            (_, b',') => {
                field += 1;
                State::FieldStart
            }
            (_, b'\r' | b'\n') => return Ok(()),
            (State::FieldStart, b'"') => State::Quoted,
            (State::Unquoted, b'"') => return Err(QuoteError::BareQuote { field }),
            (State::FieldStart | State::Unquoted, _) => State::Unquoted,
            (State::QuoteInQuoted, _) => return Err(QuoteError::AfterClosingQuote { field }),
        };
    }

    match state {
        State::Quoted => Err(QuoteError::Unterminated { field }),
        _ => Ok(()),
    }
}
