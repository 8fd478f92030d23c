//! Line and literal framing for the IMAP protocol.
//!
//! Responses are CRLF-terminated lines which may embed literals of the
//! form `{n}\r\n<n octets>`. A single "response" as returned here is one
//! logical line with all of its literals inlined.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::Result;

const READ_BUFFER_SIZE: usize = 8192;

/// Upper bound on a single response line.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Upper bound on one literal; larger announcements abort the connection.
const MAX_LITERAL_SIZE: usize = 512 * 1024 * 1024;

/// Buffered IMAP framing over any async stream.
#[derive(Debug)]
pub struct Framed<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> Framed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Reads one complete response, literals included.
    ///
    /// # Errors
    ///
    /// Fails on connection loss, oversized lines, or oversized literals.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        loop {
            let line = self.read_line().await?;
            response.extend_from_slice(&line);

            let Some(len) = trailing_literal_length(&line) else {
                break;
            };
            if len > MAX_LITERAL_SIZE {
                return Err(crate::Error::Protocol(format!(
                    "literal too large: {len} bytes"
                )));
            }
            let mut literal = vec![0u8; len];
            self.reader.read_exact(&mut literal).await?;
            response.extend_from_slice(&literal);
            // A literal is always followed by the rest of the line.
        }
        Ok(response)
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(crate::Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            // CRLF may straddle the buffer boundary.
            if line.last() == Some(&b'\r') && buf[0] == b'\n' {
                line.push(b'\n');
                self.reader.consume(1);
                break;
            }
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);
            if line.len() > MAX_LINE_LENGTH {
                return Err(crate::Error::Protocol("line too long".to_string()));
            }
        }
        Ok(line)
    }

    /// Consumes the framing and returns the inner stream. Any buffered
    /// bytes are discarded; only call between complete exchanges.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    /// Writes bytes to the stream and flushes.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        Ok(())
    }
}

/// Length of a literal announced at the end of a line (`{n}` or `{n+}`).
fn trailing_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}
