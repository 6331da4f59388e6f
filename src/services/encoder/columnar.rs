// Arrow IPC stream and Parquet output
use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Float32Builder, Float64Builder,
    Int16Builder, Int32Builder, Int64Builder, StringBuilder, TimestampMillisecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::Datelike;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;
use std::io::Write;
use std::sync::Arc;

use super::RowEncoder;
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, ColumnKind, Row, Value};

/// Rows per record batch
pub const BATCH_SIZE: usize = 1000;

/// Days from 0001-01-01 (CE) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn arrow_type(kind: ColumnKind) -> Option<DataType> {
    let data_type = match kind {
        ColumnKind::Int16 => DataType::Int16,
        ColumnKind::Int32 => DataType::Int32,
        ColumnKind::Int64 => DataType::Int64,
        ColumnKind::Float32 => DataType::Float32,
        ColumnKind::Float64 | ColumnKind::Numeric => DataType::Float64,
        ColumnKind::Bool => DataType::Boolean,
        ColumnKind::Text | ColumnKind::Json | ColumnKind::Uuid => DataType::Utf8,
        ColumnKind::Timestamp | ColumnKind::TimestampTz => {
            DataType::Timestamp(TimeUnit::Millisecond, None)
        }
        ColumnKind::Date => DataType::Date32,
        ColumnKind::Bytes => DataType::Binary,
        ColumnKind::Unsupported => return None,
    };
    Some(data_type)
}

/// Build the Arrow schema for a result, failing on the first column without a mapping.
pub fn arrow_schema(columns: &[ColumnDescriptor]) -> Result<SchemaRef, AppError> {
    let fields = columns
        .iter()
        .map(|column| {
            arrow_type(column.kind)
                .map(|data_type| Field::new(&column.name, data_type, true))
                .ok_or_else(|| {
                    AppError::internal(format!(
                        "unsupported column type {} for column {}",
                        column.source_type, column.name
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

enum ColumnBuilder {
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Boolean(BooleanBuilder),
    Utf8(StringBuilder),
    Timestamp(TimestampMillisecondBuilder),
    Date32(Date32Builder),
    Binary(BinaryBuilder),
}

impl ColumnBuilder {
    fn for_type(data_type: &DataType) -> Result<Self, AppError> {
        let builder = match data_type {
            DataType::Int16 => ColumnBuilder::Int16(Int16Builder::with_capacity(BATCH_SIZE)),
            DataType::Int32 => ColumnBuilder::Int32(Int32Builder::with_capacity(BATCH_SIZE)),
            DataType::Int64 => ColumnBuilder::Int64(Int64Builder::with_capacity(BATCH_SIZE)),
            DataType::Float32 => ColumnBuilder::Float32(Float32Builder::with_capacity(BATCH_SIZE)),
            DataType::Float64 => ColumnBuilder::Float64(Float64Builder::with_capacity(BATCH_SIZE)),
            DataType::Boolean => ColumnBuilder::Boolean(BooleanBuilder::with_capacity(BATCH_SIZE)),
            DataType::Utf8 => ColumnBuilder::Utf8(StringBuilder::new()),
            DataType::Timestamp(TimeUnit::Millisecond, None) => {
                ColumnBuilder::Timestamp(TimestampMillisecondBuilder::with_capacity(BATCH_SIZE))
            }
            DataType::Date32 => ColumnBuilder::Date32(Date32Builder::with_capacity(BATCH_SIZE)),
            DataType::Binary => ColumnBuilder::Binary(BinaryBuilder::new()),
            other => {
                return Err(AppError::internal(format!(
                    "no column builder for arrow type {}",
                    other
                )))
            }
        };
        Ok(builder)
    }

    fn append(&mut self, value: &Value, column: &str) -> Result<(), AppError> {
        match (self, value) {
            (ColumnBuilder::Int16(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Int32(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Int64(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Float32(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Float64(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Boolean(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Utf8(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Timestamp(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Date32(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Binary(b), Value::Null) => b.append_null(),

            (ColumnBuilder::Int16(b), Value::Int16(v)) => b.append_value(*v),
            (ColumnBuilder::Int32(b), Value::Int32(v)) => b.append_value(*v),
            (ColumnBuilder::Int64(b), Value::Int64(v)) => b.append_value(*v),
            (ColumnBuilder::Float32(b), Value::Float32(v)) => b.append_value(*v),
            (ColumnBuilder::Float64(b), Value::Float64(v)) => b.append_value(*v),
            (ColumnBuilder::Boolean(b), Value::Bool(v)) => b.append_value(*v),
            (ColumnBuilder::Utf8(b), Value::Text(v)) => b.append_value(v),
            (ColumnBuilder::Utf8(b), Value::Json(v)) => b.append_value(v.to_string()),
            (ColumnBuilder::Timestamp(b), Value::Timestamp(v)) => {
                b.append_value(v.and_utc().timestamp_millis())
            }
            (ColumnBuilder::Timestamp(b), Value::TimestampTz(v)) => {
                b.append_value(v.timestamp_millis())
            }
            (ColumnBuilder::Date32(b), Value::Date(v)) => {
                b.append_value(v.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
            }
            (ColumnBuilder::Binary(b), Value::Bytes(v)) => b.append_value(v),

            (builder, value) => {
                return Err(AppError::internal_with_details(
                    "Error building columnar batch",
                    format!(
                        "value {:?} does not fit {} column '{}'",
                        value,
                        builder.type_name(),
                        column
                    ),
                ))
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int16(b) => Arc::new(b.finish()),
            ColumnBuilder::Int32(b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(b) => Arc::new(b.finish()),
            ColumnBuilder::Float32(b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(b) => Arc::new(b.finish()),
            ColumnBuilder::Boolean(b) => Arc::new(b.finish()),
            ColumnBuilder::Utf8(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
            ColumnBuilder::Date32(b) => Arc::new(b.finish()),
            ColumnBuilder::Binary(b) => Arc::new(b.finish()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ColumnBuilder::Int16(_) => "Int16",
            ColumnBuilder::Int32(_) => "Int32",
            ColumnBuilder::Int64(_) => "Int64",
            ColumnBuilder::Float32(_) => "Float32",
            ColumnBuilder::Float64(_) => "Float64",
            ColumnBuilder::Boolean(_) => "Boolean",
            ColumnBuilder::Utf8(_) => "Utf8",
            ColumnBuilder::Timestamp(_) => "Timestamp",
            ColumnBuilder::Date32(_) => "Date32",
            ColumnBuilder::Binary(_) => "Binary",
        }
    }
}

/// Accumulates rows into typed builders and cuts a record batch every [`BATCH_SIZE`] rows.
struct Batcher {
    schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    rows: usize,
}

impl Batcher {
    fn new(schema: SchemaRef) -> Result<Self, AppError> {
        let builders = schema
            .fields()
            .iter()
            .map(|field| ColumnBuilder::for_type(field.data_type()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            schema,
            builders,
            rows: 0,
        })
    }

    /// Append a row; returns a full batch when one is ready.
    fn push(&mut self, row: &Row) -> Result<Option<RecordBatch>, AppError> {
        if row.len() != self.builders.len() {
            return Err(AppError::internal(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                self.builders.len()
            )));
        }
        for ((builder, value), field) in self.builders.iter_mut().zip(row).zip(self.schema.fields()) {
            builder.append(value, field.name())?;
        }
        self.rows += 1;

        if self.rows >= BATCH_SIZE {
            self.take().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Take the partial batch, if any rows are pending.
    fn take_remaining(&mut self) -> Result<Option<RecordBatch>, AppError> {
        if self.rows == 0 {
            return Ok(None);
        }
        self.take().map(Some)
    }

    fn take(&mut self) -> Result<RecordBatch, AppError> {
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.rows));
        self.rows = 0;
        RecordBatch::try_new_with_options(Arc::clone(&self.schema), arrays, &options)
            .map_err(|e| AppError::internal_with_details("Error building columnar batch", e.to_string()))
    }
}

fn arrow_error(e: arrow::error::ArrowError) -> AppError {
    AppError::internal_with_details("Error writing arrow stream", e.to_string())
}

fn parquet_error(e: parquet::errors::ParquetError) -> AppError {
    AppError::internal_with_details("Error writing parquet file", e.to_string())
}

/// Arrow IPC stream: schema message, then one message per batch.
pub struct ArrowStreamEncoder<W: Write> {
    writer: StreamWriter<W>,
    batcher: Batcher,
}

impl<W: Write> ArrowStreamEncoder<W> {
    pub fn new(writer: W, schema: SchemaRef) -> Result<Self, AppError> {
        let writer = StreamWriter::try_new(writer, &schema).map_err(arrow_error)?;
        Ok(Self {
            writer,
            batcher: Batcher::new(schema)?,
        })
    }
}

impl<W: Write> RowEncoder<W> for ArrowStreamEncoder<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), AppError> {
        if let Some(batch) = self.batcher.push(row)? {
            self.writer.write(&batch).map_err(arrow_error)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<W, AppError> {
        if let Some(batch) = self.batcher.take_remaining()? {
            self.writer.write(&batch).map_err(arrow_error)?;
        }
        self.writer.into_inner().map_err(arrow_error)
    }
}

/// Parquet file, snappy compressed, one row group per batch.
pub struct ParquetEncoder<W: Write + Send> {
    writer: ArrowWriter<W>,
    batcher: Batcher,
}

impl<W: Write + Send> ParquetEncoder<W> {
    pub fn new(writer: W, schema: SchemaRef) -> Result<Self, AppError> {
        let props = WriterProperties::builder()
            .set_compression(ParquetCompression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(writer, Arc::clone(&schema), Some(props)).map_err(parquet_error)?;
        Ok(Self {
            writer,
            batcher: Batcher::new(schema)?,
        })
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), AppError> {
        self.writer.write(batch).map_err(parquet_error)?;
        self.writer.flush().map_err(parquet_error)
    }
}

impl<W: Write + Send> RowEncoder<W> for ParquetEncoder<W> {
    fn write_row(&mut self, row: &Row) -> Result<(), AppError> {
        if let Some(batch) = self.batcher.push(row)? {
            self.write_batch(&batch)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<W, AppError> {
        if let Some(batch) = self.batcher.take_remaining()? {
            self.write_batch(&batch)?;
        }
        self.writer.into_inner().map_err(parquet_error)
    }
}
