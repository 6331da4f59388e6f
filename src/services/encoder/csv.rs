use std::borrow::Cow;
use std::io::Write;

use super::RowEncoder;
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, Row};

/// Header row of column names, then one record per row. NULL is an empty field.
pub struct CsvEncoder<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvEncoder<W> {
    pub fn new(writer: W, columns: &[ColumnDescriptor]) -> Result<Self, AppError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer
            .write_record(columns.iter().map(|c| c.name.as_str()))
            .map_err(|e| AppError::internal_with_details("Error writing CSV header", e.to_string()))?;
        Ok(Self { writer })
    }
}

impl<W: Write> RowEncoder<W> for CsvEncoder<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), AppError> {
        let fields: Vec<Cow<'_, str>> = row.iter().map(|v| v.to_text()).collect();
        self.writer
            .write_record(fields.iter().map(|f| f.as_bytes()))
            .map_err(|e| AppError::internal_with_details("Error writing CSV row", e.to_string()))
    }

    fn finish(self: Box<Self>) -> Result<W, AppError> {
        self.writer
            .into_inner()
            .map_err(|e| AppError::internal_with_details("Error flushing CSV writer", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnKind, Value};
    use crate::services::database::testing::sample_result;

    #[test]
    fn test_csv_round_trip() {
        let (columns, rows) = sample_result();
        let mut encoder = Box::new(CsvEncoder::new(Vec::new(), &columns).unwrap());
        for row in &rows {
            encoder.write_row(row).unwrap();
        }
        let bytes = encoder.finish().unwrap();

        let mut reader = csv::Reader::from_reader(&bytes[..]);
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["id", "name", "score"]);

        let records: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(
            records,
            vec![vec!["1", "alice", "1.5"], vec!["2", "", "-2.25"]]
        );
    }

    #[test]
    fn test_csv_quotes_separators() {
        let columns = vec![ColumnDescriptor::new("note", "text", ColumnKind::Text)];
        let mut encoder = Box::new(CsvEncoder::new(Vec::new(), &columns).unwrap());
        encoder
            .write_row(&vec![Value::Text("a,\"b\"".to_string())])
            .unwrap();
        let text = String::from_utf8(encoder.finish().unwrap()).unwrap();

        assert_eq!(text, "note\n\"a,\"\"b\"\"\"\n");
    }
}
