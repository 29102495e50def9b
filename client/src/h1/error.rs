use std::{error, fmt, io};

/// error of http/1.1 codec.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(httparse::Error),
    /// response head exceeds buffer limit.
    HeadTooLarge,
    InvalidStatus,
    InvalidContentLength,
    /// malformed chunked transfer encoding.
    Chunked(io::Error),
    /// response body exceeds the configured limit.
    BodyTooLarge(usize),
    /// connection is closed before a complete response is received.
    ConnectionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => fmt::Display::fmt(e, f),
            Self::Parse(e) => write!(f, "malformed response head: {e}"),
            Self::HeadTooLarge => f.write_str("response head too large"),
            Self::InvalidStatus => f.write_str("invalid response status code"),
            Self::InvalidContentLength => f.write_str("invalid content-length header"),
            Self::Chunked(e) => write!(f, "malformed chunked body: {e}"),
            Self::BodyTooLarge(limit) => write!(f, "response body exceeds limit of {limit} bytes"),
            Self::ConnectionClosed => f.write_str("connection closed before response is complete"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Self::Parse(e)
    }
}
