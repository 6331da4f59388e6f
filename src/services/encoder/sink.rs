// Buffered output path: encoder -> compressor -> shared buffer -> response body channel
use axum::body::Bytes;
use brotli::CompressorWriter;
use flate2::write::GzEncoder;
use futures::channel::mpsc;
use futures::SinkExt;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

use crate::api::middleware::AppError;

/// Bytes accumulated before a chunk is handed to the response body
pub const CHUNK_SIZE: usize = 64 * 1024;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 6;
const BROTLI_WINDOW: u32 = 22;

/// Content coding applied to the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Identity,
    Gzip,
    Brotli,
}

impl Compression {
    /// Pick a coding from an `Accept-Encoding` header. `br` wins over `gzip`;
    /// codings listed with `q=0` are refused.
    pub fn from_accept_encoding(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Compression::Identity;
        };

        let mut gzip = false;
        let mut brotli = false;
        for token in header.split(',') {
            let mut parts = token.split(';');
            let coding = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let quality = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .next()
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if quality <= 0.0 {
                continue;
            }
            match coding.as_str() {
                "br" => brotli = true,
                "gzip" | "x-gzip" => gzip = true,
                _ => {}
            }
        }

        if brotli {
            Compression::Brotli
        } else if gzip {
            Compression::Gzip
        } else {
            Compression::Identity
        }
    }

    /// Value for the `Content-Encoding` header, if any
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::Identity => None,
            Compression::Gzip => Some("gzip"),
            Compression::Brotli => Some("br"),
        }
    }
}

/// In-memory buffer shared between the synchronous writer chain and the async sink.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move everything written so far out of the buffer
    pub fn take(&self) -> Bytes {
        let mut inner = self.0.lock();
        Bytes::from(std::mem::take(&mut *inner))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Optional compression transform in front of a writer.
pub enum Compressor<W: Write> {
    Identity(W),
    Gzip(GzEncoder<W>),
    Brotli(Box<CompressorWriter<W>>),
}

impl<W: Write> Compressor<W> {
    pub fn new(compression: Compression, inner: W) -> Self {
        match compression {
            Compression::Identity => Compressor::Identity(inner),
            Compression::Gzip => Compressor::Gzip(GzEncoder::new(inner, flate2::Compression::default())),
            Compression::Brotli => Compressor::Brotli(Box::new(CompressorWriter::new(
                inner,
                BROTLI_BUFFER,
                BROTLI_QUALITY,
                BROTLI_WINDOW,
            ))),
        }
    }

    /// Write the compression trailer and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Identity(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Compressor::Gzip(encoder) => encoder.finish(),
            Compressor::Brotli(encoder) => Ok(encoder.into_inner()),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Identity(w) => w.write(buf),
            Compressor::Gzip(w) => w.write(buf),
            Compressor::Brotli(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Identity(w) => w.flush(),
            Compressor::Gzip(w) => w.flush(),
            Compressor::Brotli(w) => w.flush(),
        }
    }
}

pub type BodyChunk = Result<Bytes, io::Error>;

/// Forwards the shared buffer to the response body in chunks of [`CHUNK_SIZE`].
pub struct BodySink {
    buffer: SharedBuffer,
    tx: mpsc::Sender<BodyChunk>,
}

impl BodySink {
    pub fn new(tx: mpsc::Sender<BodyChunk>) -> Self {
        Self {
            buffer: SharedBuffer::default(),
            tx,
        }
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }

    /// Send a chunk once enough bytes have accumulated.
    pub async fn flush_if_full(&mut self) -> Result<(), AppError> {
        if self.buffer.len() >= CHUNK_SIZE {
            self.send().await?;
        }
        Ok(())
    }

    /// Send whatever is buffered.
    pub async fn flush(&mut self) -> Result<(), AppError> {
        if !self.buffer.is_empty() {
            self.send().await?;
        }
        Ok(())
    }

    /// Cut the body: the client sees a broken transfer instead of a clean end.
    pub async fn abort(&mut self, reason: &AppError) {
        let _ = self
            .tx
            .send(Err(io::Error::other(reason.to_string())))
            .await;
    }

    async fn send(&mut self) -> Result<(), AppError> {
        let chunk = self.buffer.take();
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| AppError::internal("Response stream closed by client"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Read;

    #[test]
    fn test_accept_encoding_selection() {
        assert_eq!(Compression::from_accept_encoding(None), Compression::Identity);
        assert_eq!(Compression::from_accept_encoding(Some("gzip, deflate")), Compression::Gzip);
        assert_eq!(Compression::from_accept_encoding(Some("gzip, br")), Compression::Brotli);
        assert_eq!(Compression::from_accept_encoding(Some("br;q=0, gzip")), Compression::Gzip);
        assert_eq!(Compression::from_accept_encoding(Some("gzip;q=0")), Compression::Identity);
        assert_eq!(Compression::from_accept_encoding(Some("identity")), Compression::Identity);
        assert_eq!(Compression::Brotli.content_encoding(), Some("br"));
        assert_eq!(Compression::Identity.content_encoding(), None);
    }

    #[test]
    fn test_gzip_compressor_output() {
        let buffer = SharedBuffer::default();
        let mut compressor = Compressor::new(Compression::Gzip, buffer.clone());
        compressor.write_all(b"hello gateway").unwrap();
        compressor.finish().unwrap();

        let compressed = buffer.take();
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "hello gateway");
    }

    #[test]
    fn test_brotli_compressor_output() {
        let buffer = SharedBuffer::default();
        let mut compressor = Compressor::new(Compression::Brotli, buffer.clone());
        compressor.write_all(b"hello gateway").unwrap();
        compressor.finish().unwrap();

        let compressed = buffer.take();
        let mut decoded = String::new();
        brotli::Decompressor::new(&compressed[..], 4096)
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "hello gateway");
    }

    #[tokio::test]
    async fn test_sink_sends_in_chunks() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = BodySink::new(tx);
        let mut buffer = sink.buffer();

        buffer.write_all(b"small").unwrap();
        sink.flush_if_full().await.unwrap();
        assert_eq!(buffer.len(), 5);

        buffer.write_all(&vec![b'x'; CHUNK_SIZE]).unwrap();
        sink.flush_if_full().await.unwrap();
        assert!(buffer.is_empty());

        let chunk = rx.next().await.unwrap().unwrap();
        assert_eq!(chunk.len(), CHUNK_SIZE + 5);
    }
}
