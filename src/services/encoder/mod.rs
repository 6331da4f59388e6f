// Result encoding: turns a live cursor into a streamed, optionally compressed response body
pub mod columnar;
pub mod csv;
pub mod json;
pub mod sink;

pub use sink::{BodyChunk, BodySink, Compression, Compressor, SharedBuffer, CHUNK_SIZE};

use arrow::datatypes::SchemaRef;
use axum::body::Body;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io::Write;
use tokio::sync::OwnedSemaphorePermit;

use self::columnar::{arrow_schema, ArrowStreamEncoder, ParquetEncoder};
use self::csv::CsvEncoder;
use self::json::{JsonDataArrayEncoder, JsonEncoder};
use crate::api::middleware::AppError;
use crate::models::{ColumnDescriptor, OutputFormat, Row};
use crate::services::database::ResultCursor;
use crate::services::lifecycle::RequestLifecycle;

/// Chunks queued between the encoding task and the response body
const CHANNEL_DEPTH: usize = 4;

/// Writes rows of one result in a specific wire format.
pub trait RowEncoder<W: Write> {
    fn write_row(&mut self, row: &Row) -> Result<(), AppError>;

    /// Write any trailer and hand back the underlying writer.
    fn finish(self: Box<Self>) -> Result<W, AppError>;
}

/// Format chosen for a result, checked against its columns before any byte is written.
#[derive(Debug, Clone)]
pub enum EncoderPlan {
    Json,
    JsonDataArray,
    Csv,
    Arrow(SchemaRef),
    Parquet(SchemaRef),
}

impl EncoderPlan {
    /// Columnar formats fail here when a column has no Arrow mapping.
    pub fn prepare(format: OutputFormat, columns: &[ColumnDescriptor]) -> Result<Self, AppError> {
        let plan = match format {
            OutputFormat::Json => EncoderPlan::Json,
            OutputFormat::JsonDataArray => EncoderPlan::JsonDataArray,
            OutputFormat::Csv => EncoderPlan::Csv,
            OutputFormat::Arrow => EncoderPlan::Arrow(arrow_schema(columns)?),
            OutputFormat::Parquet => EncoderPlan::Parquet(arrow_schema(columns)?),
        };
        Ok(plan)
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            EncoderPlan::Json => OutputFormat::Json,
            EncoderPlan::JsonDataArray => OutputFormat::JsonDataArray,
            EncoderPlan::Csv => OutputFormat::Csv,
            EncoderPlan::Arrow(_) => OutputFormat::Arrow,
            EncoderPlan::Parquet(_) => OutputFormat::Parquet,
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.format().content_type()
    }

    pub fn build<W>(
        self,
        writer: W,
        columns: &[ColumnDescriptor],
    ) -> Result<Box<dyn RowEncoder<W> + Send>, AppError>
    where
        W: Write + Send + 'static,
    {
        let encoder: Box<dyn RowEncoder<W> + Send> = match self {
            EncoderPlan::Json => Box::new(JsonEncoder::new(writer, columns)?),
            EncoderPlan::JsonDataArray => Box::new(JsonDataArrayEncoder::new(writer, columns)?),
            EncoderPlan::Csv => Box::new(CsvEncoder::new(writer, columns)?),
            EncoderPlan::Arrow(schema) => Box::new(ArrowStreamEncoder::new(writer, schema)?),
            EncoderPlan::Parquet(schema) => Box::new(ParquetEncoder::new(writer, schema)?),
        };
        Ok(encoder)
    }
}

/// A result whose writer chain is open and whose rows are still to be read.
///
/// Everything that can fail before the first row is done by [`ResultEncoder::open`], so
/// those errors still reach the client as a JSON error instead of a cut body.
pub struct ResultEncoder {
    encoder: Box<dyn RowEncoder<Compressor<SharedBuffer>> + Send>,
    rows: BoxStream<'static, Result<Row, AppError>>,
    sink: BodySink,
    rx: mpsc::Receiver<BodyChunk>,
    content_type: &'static str,
}

impl ResultEncoder {
    pub fn open(plan: EncoderPlan, cursor: ResultCursor, compression: Compression) -> Result<Self, AppError> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let sink = BodySink::new(tx);
        let content_type = plan.content_type();
        let ResultCursor { columns, rows } = cursor;
        let encoder = plan.build(Compressor::new(compression, sink.buffer()), &columns)?;

        Ok(Self {
            encoder,
            rows,
            sink,
            rx,
            content_type,
        })
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Stream the rows into a response body on a separate task.
    ///
    /// The task keeps observing the request's cancellation and deadline, and holds
    /// `permit` until the last byte is handed over. Once the head is sent an error
    /// can only cut the body short.
    pub fn into_body(self, lifecycle: RequestLifecycle, permit: Option<OwnedSemaphorePermit>) -> Body {
        let ResultEncoder {
            encoder,
            rows,
            mut sink,
            rx,
            ..
        } = self;

        tokio::spawn(async move {
            let _permit = permit;
            let result = lifecycle.watch(encode_rows(encoder, rows, &mut sink)).await;

            if let Err(e) = result {
                tracing::error!(
                    status = e.status_code().as_u16(),
                    "Error while streaming query result: {}",
                    e
                );
                sink.abort(&e).await;
            }
        });

        Body::from_stream(rx)
    }
}

/// Stream every row through the writer chain, then finish compression and flush.
async fn encode_rows(
    mut encoder: Box<dyn RowEncoder<Compressor<SharedBuffer>> + Send>,
    mut rows: BoxStream<'static, Result<Row, AppError>>,
    sink: &mut BodySink,
) -> Result<(), AppError> {
    sink.flush_if_full().await?;

    let mut count: u64 = 0;
    while let Some(row) = rows.next().await {
        encoder.write_row(&row?)?;
        count += 1;
        sink.flush_if_full().await?;
    }
    // Hand the connection back before the trailer is written
    drop(rows);

    let compressor = encoder.finish()?;
    compressor.finish()?;
    sink.flush().await?;

    tracing::debug!(rows = count, "Query result streamed");
    Ok(())
}
