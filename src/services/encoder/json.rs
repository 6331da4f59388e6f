use std::io::Write;

use super::RowEncoder;
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, FieldNames, Row, RowObject};

fn write_error(e: impl std::fmt::Display) -> AppError {
    AppError::internal_with_details("Error encoding row", e.to_string())
}

/// `{"data":[{"col":value,...},...]}`
pub struct JsonEncoder<W: Write> {
    writer: W,
    columns: Vec<ColumnDescriptor>,
    first: bool,
}

impl<W: Write> JsonEncoder<W> {
    pub fn new(mut writer: W, columns: &[ColumnDescriptor]) -> Result<Self, AppError> {
        writer.write_all(br#"{"data":["#).map_err(write_error)?;
        Ok(Self {
            writer,
            columns: columns.to_vec(),
            first: true,
        })
    }
}

impl<W: Write> RowEncoder<W> for JsonEncoder<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), AppError> {
        if !self.first {
            self.writer.write_all(b",").map_err(write_error)?;
        }
        self.first = false;

        let object = RowObject {
            columns: &self.columns,
            values: row,
        };
        serde_json::to_writer(&mut self.writer, &object).map_err(write_error)
    }

    fn finish(mut self: Box<Self>) -> Result<W, AppError> {
        self.writer.write_all(b"]}").map_err(write_error)?;
        Ok(self.writer)
    }
}

/// `{"data":{"fields":[...],"rows":[[...],...]}}`
pub struct JsonDataArrayEncoder<W: Write> {
    writer: W,
    first: bool,
}

impl<W: Write> JsonDataArrayEncoder<W> {
    pub fn new(mut writer: W, columns: &[ColumnDescriptor]) -> Result<Self, AppError> {
        writer.write_all(br#"{"data":{"fields":"#).map_err(write_error)?;
        serde_json::to_writer(&mut writer, &FieldNames(columns)).map_err(write_error)?;
        writer.write_all(br#","rows":["#).map_err(write_error)?;
        Ok(Self { writer, first: true })
    }
}

impl<W: Write> RowEncoder<W> for JsonDataArrayEncoder<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), AppError> {
        if !self.first {
            self.writer.write_all(b",").map_err(write_error)?;
        }
        self.first = false;
        serde_json::to_writer(&mut self.writer, row).map_err(write_error)
    }

    fn finish(mut self: Box<Self>) -> Result<W, AppError> {
        self.writer.write_all(b"]}}").map_err(write_error)?;
        Ok(self.writer)
    }
}
