use core::future::poll_fn;

use std::{
    error, fmt,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use futures_core::stream::Stream;

use crate::error::Error;

pub type BodyError = Box<dyn error::Error + Send + Sync>;

pub type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

/// request body type.
///
/// [Body::Empty] and [Body::Bytes] are repeatable and can be replayed by retry and follow up.
/// [Body::Stream] is a one shot body. Once it started to be sent it can not be replayed.
#[derive(Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(OneShot),
}

impl Body {
    /// construct a one shot streaming body.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self::Stream(OneShot::new(Box::pin(stream)))
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }

    /// exact length of body. streaming body has no known length.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::Empty } else { Self::Bytes(bytes) }
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(s: &'static [u8]) -> Self {
        Bytes::from_static(s).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

/// one shot streaming body shared between clones of the same request.
/// the inner stream can be taken exactly once.
#[derive(Clone)]
pub struct OneShot {
    stream: Arc<Mutex<Option<BoxStream>>>,
}

impl OneShot {
    fn new(stream: BoxStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }

    pub(crate) fn take(&self) -> Option<BoxStream> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// true when the stream has been handed to a connection.
    pub fn is_taken(&self) -> bool {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

/// poll next chunk of a streaming body.
pub(crate) async fn next_chunk(stream: &mut BoxStream) -> Result<Option<Bytes>, Error> {
    match poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
        Some(Ok(chunk)) => Ok(Some(chunk)),
        Some(Err(e)) => Err(Error::Std(e)),
        None => Ok(None),
    }
}
