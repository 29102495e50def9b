use std::{error, fmt};

use h2::Reason;

use crate::error::ErrorKind;

#[derive(Debug)]
pub enum Error {
    H2(h2::Error),
    /// stream is closed before request body is fully sent.
    StreamClosed,
}

impl Error {
    /// peer refused the stream before processing it. safe to retry.
    pub fn is_refused_stream(&self) -> bool {
        matches!(self, Self::H2(e) if e.reason() == Some(Reason::REFUSED_STREAM) && e.is_remote())
    }

    /// error is scoped to one stream and leaves the connection usable.
    pub(crate) fn is_stream_level(&self) -> bool {
        matches!(self, Self::H2(e) if e.is_reset())
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::H2(e) if e.is_io() => ErrorKind::Connectivity,
            _ => ErrorKind::Protocol,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H2(e) => fmt::Display::fmt(e, f),
            Self::StreamClosed => f.write_str("http2 stream closed before request body is sent"),
        }
    }
}

impl error::Error for Error {}

impl From<h2::Error> for Error {
    fn from(e: h2::Error) -> Self {
        Self::H2(e)
    }
}
