//! `Content-Length` framing for JSON-RPC over byte streams.
//!
//! Every message on the wire is `Content-Length: N\r\n\r\n` followed by `N`
//! bytes of JSON. Both ends of a lintbridge connection (the delivery client
//! and the reconciler) share this codec.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error on frame stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream ended inside frame headers")]
    TruncatedHeaders,
    #[error("missing Content-Length header")]
    MissingLength,
    #[error("invalid Content-Length value {0:?}")]
    InvalidLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads framed JSON values.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    header: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            header: String::new(),
        }
    }

    /// Next frame, or `Ok(None)` when the peer closed the stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, FrameError> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };
        if length > MAX_FRAME_BYTES {
            return Err(FrameError::Oversized(length));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut length = None;
        let mut started = false;

        loop {
            self.header.clear();
            if self.reader.read_line(&mut self.header).await? == 0 {
                // A clean close is only possible before the first header byte.
                return if started {
                    Err(FrameError::TruncatedHeaders)
                } else {
                    Ok(None)
                };
            }
            started = true;

            let line = self.header.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                length = Some(
                    value
                        .parse()
                        .map_err(|_| FrameError::InvalidLength(value.to_string()))?,
                );
            }
        }

        length.map(Some).ok_or(FrameError::MissingLength)
    }
}

/// Writes framed JSON values and flushes after each frame.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<(), FrameError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
