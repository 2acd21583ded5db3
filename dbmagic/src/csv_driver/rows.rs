use super::quoting::RawRecorder;
use crate::driver::{RowStatus, Rows, Value};
use crate::error::{Error, Result};
use csv::{ReaderBuilder, StringRecord};
use std::io::Read;

/// Cursor over the records of one CSV stream.
///
/// The first record is taken as the header when the cursor is created.
/// Every later record must carry exactly as many fields as the header.
/// A `"` is only allowed in a fully quoted field.
pub struct CsvRows<R> {
    reader: Option<csv::Reader<RawRecorder<R>>>,
    columns: Vec<String>,
    record: StringRecord,
}

impl<R: Read> CsvRows<R> {
    /// Wrap `source` and consume its header record.
    pub fn from_reader(source: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(false)
            .from_reader(RawRecorder::new(source));

        let mut header = StringRecord::new();
        match reader.read_record(&mut header) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::MalformedData(
                    "missing header record: input is empty".into(),
                ))
            }
            Err(e) => return Err(malformed(e)),
        }
        check_quoting(&mut reader, &header)?;

        let columns = header.iter().map(str::to_string).collect();
        Ok(CsvRows {
            reader: Some(reader),
            columns,
            record: StringRecord::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

impl<R: Read + Send> Rows for CsvRows<R> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next(&mut self, dest: &mut [Value]) -> Result<RowStatus> {
        let reader = self.reader.as_mut().ok_or(Error::Closed("cursor"))?;
        if dest.len() != self.columns.len() {
            return Err(Error::DestinationMismatch {
                expected: self.columns.len(),
                actual: dest.len(),
            });
        }

        match reader.read_record(&mut self.record) {
            Ok(true) => {}
            Ok(false) => return Ok(RowStatus::Exhausted),
            Err(e) => return Err(malformed(e)),
        }
        check_quoting(reader, &self.record)?;

        // Also enforced by the reader, kept explicit so `dest` is never half written.
        if self.record.len() != self.columns.len() {
            let line = self.record.position().map(|p| p.line()).unwrap_or_default();
            return Err(Error::MalformedData(format!(
                "line {line}: found {} fields, header has {}",
                self.record.len(),
                self.columns.len()
            )));
        }

        for (slot, field) in dest.iter_mut().zip(self.record.iter()) {
            *slot = Value::Text(field.to_string());
        }
        Ok(RowStatus::Ready)
    }

    fn close(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            log::debug!("Closed CSV cursor over {} columns", self.columns.len());
        }
        Ok(())
    }
}

/// Run the raw bytes of the record just read through the strict quote rules.
fn check_quoting<R: Read>(reader: &mut csv::Reader<RawRecorder<R>>, record: &StringRecord) -> Result<()> {
    let (start, line) = record
        .position()
        .map(|p| (p.byte(), p.line()))
        .unwrap_or_default();
    let end = reader.position().byte();
    reader
        .get_mut()
        .check_record(start, end)
        .map_err(|e| Error::MalformedData(format!("line {line}: {e}")))
}

fn malformed(err: csv::Error) -> Error {
    Error::MalformedData(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn rows(input: &str) -> CsvRows<Cursor<Vec<u8>>> {
        CsvRows::from_reader(Cursor::new(input.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_header_respects_quoting() {
        let cursor = rows("\"last, first\",\"note\nwith newline\",id\nx,y,z\n");
        assert_eq!(
            cursor.columns(),
            &["last, first", "note\nwith newline", "id"]
        );
    }

    #[test]
    fn test_next_yields_text_values() {
        let mut cursor = rows("a,b\n1,\"two, quoted\"\n");
        let mut dest = vec![Value::Null; 2];

        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Ready);
        assert_eq!(dest, vec![Value::from("1"), Value::from("two, quoted")]);
        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Exhausted);
        // Exhaustion is sticky
        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Exhausted);
    }

    #[test]
    fn test_empty_input_is_malformed() {
        let err = CsvRows::from_reader(Cursor::new(Vec::<u8>::new())).err().unwrap();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
    }

    #[test]
    fn test_short_record_leaves_destination_untouched() {
        let mut cursor = rows("a,b,c\n1,2\n");
        let mut dest = vec![Value::Int(7); 3];

        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
        assert_eq!(dest, vec![Value::Int(7); 3]);
    }

    #[test]
    fn test_long_record_is_malformed() {
        let mut cursor = rows("a,b\n1,2\n3,4,5\n");
        let mut dest = vec![Value::Null; 2];

        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Ready);
        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
        assert_eq!(dest, vec![Value::from("1"), Value::from("2")]);
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut input = b"a,b\n".to_vec();
        input.extend_from_slice(&[0xff, 0xfe, b',', b'x', b'\n']);
        let mut cursor = CsvRows::from_reader(Cursor::new(input)).unwrap();
        let mut dest = vec![Value::Null; 2];

        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
    }

    #[test]
    fn test_bare_quote_is_malformed() {
        let mut cursor = rows("a,b\nx\"y,z\n");
        let mut dest = vec![Value::Int(1); 2];

        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
        assert_eq!(dest, vec![Value::Int(1); 2]);
    }

    #[test]
    fn test_text_after_closing_quote_is_malformed() {
        let mut cursor = rows("a,b\n1,2\n\"x\"y,z\n");
        let mut dest = vec![Value::Null; 2];

        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Ready);
        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
        assert_eq!(dest, vec![Value::from("1"), Value::from("2")]);
    }

    #[test]
    fn test_unterminated_quote_is_malformed() {
        let mut cursor = rows("a\n\"open\n");
        let mut dest = vec![Value::Null];

        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
        assert_eq!(dest, vec![Value::Null]);
    }

    #[test]
    fn test_header_with_bare_quote_is_malformed() {
        let err = CsvRows::from_reader(Cursor::new(b"na\"me,id\n1,2\n".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::MalformedData(_)), "got {err:?}");
    }

    #[test]
    fn test_escaped_quotes_and_crlf_are_accepted() {
        let mut cursor = rows("a,b\r\n\"say \"\"hi\"\"\",2\r\n\r\n3,\"\"\r\n");
        let mut dest = vec![Value::Null; 2];

        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Ready);
        assert_eq!(dest, vec![Value::from("say \"hi\""), Value::from("2")]);
        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Ready);
        assert_eq!(dest, vec![Value::from("3"), Value::from("")]);
        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Exhausted);
    }

    #[test]
    fn test_destination_size_mismatch() {
        let mut cursor = rows("a,b\n1,2\n");
        let mut dest = vec![Value::Null; 3];

        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(
            err,
            Error::DestinationMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let mut cursor = rows("a\n1\n2\n");
        let mut dest = vec![Value::Null];

        assert_eq!(cursor.next(&mut dest).unwrap(), RowStatus::Ready);
        cursor.close().unwrap();
        cursor.close().unwrap();
        assert!(cursor.is_closed());
        assert_eq!(cursor.columns(), &["a"]);

        let err = cursor.next(&mut dest).unwrap_err();
        assert!(matches!(err, Error::Closed("cursor")));
    }
}
