use core::cmp;

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// max length of a chunk size line or a trailer line.
const MAX_LINE: usize = 4096;

/// Decoder for response body framing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransferCoding {
    /// Content-Length header with remaining bytes.
    Length(u64),
    /// Transfer-Encoding is `chunked`.
    Chunked(Chunked),
    /// body is delimited by connection close.
    Eof,
}

/// position inside a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chunked {
    Size,
    /// chunk data with remaining bytes.
    Data(u64),
    /// CRLF closing chunk data.
    DataEnd,
    /// trailer section after the last chunk.
    Trailer,
    Done,
}

impl TransferCoding {
    #[inline]
    pub(crate) const fn length(len: u64) -> Self {
        Self::Length(len)
    }

    #[inline]
    pub(crate) const fn decode_chunked() -> Self {
        Self::Chunked(Chunked::Size)
    }

    #[inline]
    pub(crate) fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /// Decode body from buffer.
    ///
    /// `Ok(None)` means more bytes are needed. `Ok(Some(bytes))` with empty bytes means end of body.
    /// [TransferCoding::Eof] yields everything buffered and its end is signaled by [TransferCoding::decode_eof].
    pub(crate) fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        match *self {
            Self::Length(0) => Ok(Some(Bytes::new())),
            Self::Length(ref mut remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let n = cmp::min(*remaining, src.len() as u64);
                *remaining -= n;
                Ok(Some(src.split_to(n as usize).freeze()))
            }
            Self::Chunked(ref mut state) => loop {
                match *state {
                    Chunked::Size => {
                        let Some(line) = take_line(src)? else {
                            return Ok(None);
                        };
                        *state = match chunk_size(&line)? {
                            0 => Chunked::Trailer,
                            size => Chunked::Data(size),
                        };
                    }
                    Chunked::Data(remaining) => {
                        if src.is_empty() {
                            return Ok(None);
                        }
                        let n = cmp::min(remaining, src.len() as u64);
                        *state = if n == remaining {
                            Chunked::DataEnd
                        } else {
                            Chunked::Data(remaining - n)
                        };
                        return Ok(Some(src.split_to(n as usize).freeze()));
                    }
                    Chunked::DataEnd => {
                        if src.len() < 2 {
                            return Ok(None);
                        }
                        if &src[..2] != b"\r\n" {
                            return Err(invalid("chunk data is not followed by CRLF"));
                        }
                        src.advance(2);
                        *state = Chunked::Size;
                    }
                    Chunked::Trailer => {
                        let Some(line) = take_line(src)? else {
                            return Ok(None);
                        };
                        if line.is_empty() {
                            *state = Chunked::Done;
                        } else {
                            trace!("skipping chunked trailer of {} bytes", line.len());
                        }
                    }
                    Chunked::Done => return Ok(Some(Bytes::new())),
                }
            },
            Self::Eof => {
                if src.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(src.split().freeze()))
                }
            }
        }
    }

    /// Handle connection closed by peer. Only [TransferCoding::Eof] can end cleanly on close.
    pub(crate) fn decode_eof(&self) -> io::Result<()> {
        match *self {
            Self::Eof | Self::Length(0) | Self::Chunked(Chunked::Done) => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before end of response body",
            )),
        }
    }
}

/// split one line off the buffer without its line ending.
fn take_line(src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
    let Some(pos) = src.iter().position(|b| *b == b'\n') else {
        if src.len() > MAX_LINE {
            return Err(invalid("chunked line is too long"));
        }
        return Ok(None);
    };

    let mut line = src.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }
    Ok(Some(line))
}

/// parse hex size of a chunk size line. chunk extensions are ignored.
fn chunk_size(line: &[u8]) -> io::Result<u64> {
    let digits = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    if digits.is_empty() {
        return Err(invalid("chunk size is empty"));
    }
    digits.iter().try_fold(0u64, |size, b| {
        let digit = char::from(*b).to_digit(16).ok_or_else(|| invalid("chunk size is not hex"))?;
        size.checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or_else(|| invalid("chunk size overflow"))
    })
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// encode one chunk of chunked transfer encoding.
pub(crate) fn encode_chunk(bytes: &[u8], buf: &mut BytesMut) {
    if bytes.is_empty() {
        return;
    }
    buf.reserve(bytes.len() + 12);
    buf.put_slice(format!("{:X}\r\n", bytes.len()).as_bytes());
    buf.put_slice(bytes);
    buf.put_slice(b"\r\n");
}

/// terminal chunk of chunked transfer encoding.
pub(crate) const CHUNKED_EOF: &[u8] = b"0\r\n\r\n";
