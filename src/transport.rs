//! TCP line transport for the server link.
//!
//! Plain TCP with CRLF framing. Lines are length-capped and rejected on
//! embedded control characters before they ever reach the parser. Reads
//! go through `fill_buf`/`consume` with a persistent partial-line buffer,
//! so a read future dropped by `select!` never loses data.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::warn;

/// Longest inbound line we accept, terminator included.
pub const MAX_LINE_LEN: usize = 8191;

const MAX_LINE_PREVIEW_LEN: usize = 512;

/// Errors surfaced while reading from the peer.
#[derive(Debug)]
pub enum TransportReadError {
    Io(std::io::Error),
    LineTooLong { preview: String },
    IllegalControlChar { ch: char, preview: String },
}

impl From<std::io::Error> for TransportReadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl std::fmt::Display for TransportReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {}", e),
            Self::LineTooLong { preview } => write!(f, "line too long: {:?}...", preview),
            Self::IllegalControlChar { ch, preview } => {
                write!(f, "illegal control character {:?} in {:?}", ch, preview)
            }
        }
    }
}

impl std::error::Error for TransportReadError {}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(MAX_LINE_PREVIEW_LEN)
        .collect()
}

/// One established server link.
pub struct Transport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    partial: Vec<u8>,
}

impl Transport {
    /// Wrap an accepted or freshly connected stream.
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = Self::enable_keepalive(&stream) {
            warn!("failed to enable TCP keepalive: {}", e);
        }
        let (read, write) = stream.into_split();
        Transport {
            reader: BufReader::new(read),
            writer: write,
            partial: Vec::new(),
        }
    }

    /// Dial the uplink.
    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }

    fn enable_keepalive(stream: &TcpStream) -> Result<()> {
        use socket2::{SockRef, TcpKeepalive};
        use std::time::Duration;

        let sock = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(120))
            .with_interval(Duration::from_secs(30));
        sock.set_tcp_keepalive(&keepalive)?;
        Ok(())
    }

    /// Read one line, without its terminator. `None` means EOF.
    ///
    /// Cancel safe: dropping the returned future between polls leaves any
    /// partially read line buffered for the next call.
    pub async fn read_line(&mut self) -> Result<Option<String>, TransportReadError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                // EOF. A dangling partial line is dropped with the peer.
                return Ok(None);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.partial.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    let mut bytes = std::mem::take(&mut self.partial);
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    if bytes.len() > MAX_LINE_LEN {
                        return Err(TransportReadError::LineTooLong { preview: preview(&bytes) });
                    }
                    let line = String::from_utf8_lossy(&bytes).into_owned();
                    if let Some(ch) = line.chars().find(|c| c.is_control()) {
                        return Err(TransportReadError::IllegalControlChar {
                            ch,
                            preview: preview(&bytes),
                        });
                    }
                    return Ok(Some(line));
                }
                None => {
                    let taken = available.len();
                    self.partial.extend_from_slice(available);
                    self.reader.consume(taken);
                    if self.partial.len() > MAX_LINE_LEN {
                        let bytes = std::mem::take(&mut self.partial);
                        return Err(TransportReadError::LineTooLong { preview: preview(&bytes) });
                    }
                }
            }
        }
    }

    /// Write one line, appending CRLF.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}
