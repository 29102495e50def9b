//! strongly typed library error.

use std::{convert::Infallible, error, fmt, io, str};

use http::{StatusCode, uri};

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Io(io::Error),
    Std(Box<dyn error::Error + Send + Sync>),
    InvalidUri(InvalidUri),
    #[cfg(feature = "http1")]
    H1(crate::h1::Error),
    #[cfg(feature = "http2")]
    H2(crate::h2::Error),
    #[cfg(feature = "rustls")]
    Rustls(RustlsError),
    Timeout(TimeoutError),
    Resolve(ResolveError),
    Route(RouteError),
    Chain(ChainError),
    FollowUp(FollowUpError),
    Feature(FeatureError),
    Response(ErrorResponse),
    /// call is canceled by [Call::cancel](crate::Call::cancel) or [Dispatcher::cancel_all](crate::Dispatcher::cancel_all).
    Canceled,
    /// asynchronous call can not be handed to the dispatcher's executor.
    Rejected,
}

/// closed category of every [Error] produced by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// dns failure, connect refused, tls handshake failure and socket level io error.
    Connectivity,
    /// malformed response or premature stream reset.
    Protocol,
    /// any phase timeout or the call's deadline.
    Timeout,
    Canceled,
    /// misuse of the api. double execution of a call or misbehaving network interceptor for example.
    Programming,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Resolve(_) | Self::Rejected => ErrorKind::Connectivity,
            #[cfg(feature = "rustls")]
            Self::Rustls(_) => ErrorKind::Connectivity,
            #[cfg(feature = "http1")]
            Self::H1(crate::h1::Error::Io(_) | crate::h1::Error::ConnectionClosed) => ErrorKind::Connectivity,
            #[cfg(feature = "http1")]
            Self::H1(_) => ErrorKind::Protocol,
            #[cfg(feature = "http2")]
            Self::H2(e) => e.kind(),
            Self::Response(_) => ErrorKind::Protocol,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Canceled => ErrorKind::Canceled,
            Self::Route(e) => e.first().kind(),
            Self::Chain(_) | Self::InvalidUri(_) | Self::Feature(_) => ErrorKind::Programming,
            Self::FollowUp(_) | Self::Std(_) => ErrorKind::Other,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Canceled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => fmt::Display::fmt(e, f),
            Self::Std(e) => fmt::Display::fmt(e, f),
            Self::InvalidUri(e) => fmt::Debug::fmt(e, f),
            #[cfg(feature = "http1")]
            Self::H1(e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "http2")]
            Self::H2(e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "rustls")]
            Self::Rustls(e) => fmt::Debug::fmt(e, f),
            Self::Timeout(e) => fmt::Display::fmt(e, f),
            Self::Resolve(e) => fmt::Display::fmt(e, f),
            Self::Route(e) => fmt::Display::fmt(e, f),
            Self::Chain(e) => fmt::Display::fmt(e, f),
            Self::FollowUp(e) => fmt::Display::fmt(e, f),
            Self::Feature(e) => fmt::Display::fmt(e, f),
            Self::Response(e) => fmt::Display::fmt(e, f),
            Self::Canceled => f.write_str("call canceled"),
            Self::Rejected => f.write_str("call rejected by dispatcher executor"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Std(e) => Some(&**e),
            Self::Route(e) => Some(e.first()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<Box<dyn error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn error::Error + Send + Sync>) -> Self {
        Self::Std(e)
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Self::Std(Box::new(e))
    }
}

#[derive(Debug)]
pub enum InvalidUri {
    MissingHost,
    MissingScheme,
    UnknownScheme,
    Other(uri::InvalidUri),
}

impl From<uri::InvalidUri> for InvalidUri {
    fn from(uri: uri::InvalidUri) -> Self {
        Self::Other(uri)
    }
}

impl From<uri::InvalidUri> for Error {
    fn from(e: uri::InvalidUri) -> Self {
        Self::InvalidUri(e.into())
    }
}

impl From<InvalidUri> for Error {
    fn from(e: InvalidUri) -> Self {
        Self::InvalidUri(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    Resolve,
    Connect,
    Write,
    Read,
    /// the call's single deadline spanning every phase and retry.
    Call,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => f.write_str("dns look up timeout"),
            Self::Connect => f.write_str("socket connect timeout"),
            Self::Write => f.write_str("request sending timeout"),
            Self::Read => f.write_str("response receiving timeout"),
            Self::Call => f.write_str("call deadline exceeded"),
        }
    }
}

impl error::Error for TimeoutError {}

impl From<TimeoutError> for Error {
    fn from(e: TimeoutError) -> Self {
        Self::Timeout(e)
    }
}

#[derive(Debug)]
pub struct ResolveError {
    domain: String,
}

impl ResolveError {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain: {} can't be resolved to socket address", self.domain)
    }
}

impl error::Error for ResolveError {}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

/// every route of an address failed to connect.
#[derive(Debug)]
pub struct RouteError {
    first: Box<Error>,
    attempts: usize,
}

impl RouteError {
    pub(crate) fn new(first: Error) -> Self {
        Self {
            first: Box::new(first),
            attempts: 1,
        }
    }

    pub(crate) fn add_attempt(&mut self) {
        self.attempts += 1;
    }

    /// the first connect failure observed.
    pub fn first(&self) -> &Error {
        &self.first
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub(crate) fn into_first(self) -> Error {
        *self.first
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect after {} attempt(s): {}", self.attempts, self.first)
    }
}

impl error::Error for RouteError {}

impl From<RouteError> for Error {
    fn from(e: RouteError) -> Self {
        Self::Route(e)
    }
}

/// misuse of the call or interceptor contract.
#[derive(Debug)]
pub enum ChainError {
    AlreadyExecuted,
    /// network interceptor returned without calling proceed.
    NetworkShortCircuit,
    /// network interceptor changed host or port of the request it proceeded with.
    NetworkRetarget,
    /// interceptor placed in front of connect stage tried to reach the network directly.
    MissingConnection,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExecuted => f.write_str("call already executed"),
            Self::NetworkShortCircuit => f.write_str("network interceptor must call proceed exactly once"),
            Self::NetworkRetarget => f.write_str("network interceptor must retain the same host and port"),
            Self::MissingConnection => f.write_str("network stage reached without an exchange"),
        }
    }
}

impl error::Error for ChainError {}

impl From<ChainError> for Error {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

#[derive(Debug)]
pub enum FollowUpError {
    TooMany(usize),
    /// follow up would replay a one shot request body.
    UnrepeatableBody,
}

impl fmt::Display for FollowUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooMany(n) => write!(f, "too many follow-up requests: {n}"),
            Self::UnrepeatableBody => f.write_str("follow-up request can not replay one shot body"),
        }
    }
}

impl error::Error for FollowUpError {}

impl From<FollowUpError> for Error {
    fn from(e: FollowUpError) -> Self {
        Self::FollowUp(e)
    }
}

#[derive(Debug)]
pub enum FeatureError {
    Http1NotEnabled,
    Http2NotEnabled,
    TlsNotEnabled,
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http1NotEnabled => f.write_str("http1")?,
            Self::Http2NotEnabled => f.write_str("http2")?,
            Self::TlsNotEnabled => f.write_str("rustls")?,
        };
        f.write_str(" crate feature is not enabled")
    }
}

impl error::Error for FeatureError {}

impl From<FeatureError> for Error {
    fn from(e: FeatureError) -> Self {
        Self::Feature(e)
    }
}

/// error type for unexpected http response.
/// proxy tunnel needs specific http response to function properly and an unexpected http response
/// will be converted into this error type.
#[derive(Debug)]
pub struct ErrorResponse {
    pub expect_status: StatusCode,
    pub status: StatusCode,
    pub description: &'static str,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expecting response with status code {}, got {} instead. {}",
            self.expect_status, self.status, self.description
        )
    }
}

impl error::Error for ErrorResponse {}

impl From<ErrorResponse> for Error {
    fn from(e: ErrorResponse) -> Self {
        Self::Response(e)
    }
}

#[cfg(feature = "rustls")]
#[derive(Debug)]
pub enum RustlsError {
    InvalidDnsName,
    Io(io::Error),
}

#[cfg(feature = "rustls")]
impl From<RustlsError> for Error {
    fn from(e: RustlsError) -> Self {
        Self::Rustls(e)
    }
}

#[cfg(feature = "http1")]
impl From<crate::h1::Error> for Error {
    fn from(e: crate::h1::Error) -> Self {
        Self::H1(e)
    }
}

#[cfg(feature = "http2")]
impl From<crate::h2::Error> for Error {
    fn from(e: crate::h2::Error) -> Self {
        Self::H2(e)
    }
}

#[cfg(feature = "http2")]
impl From<::h2::Error> for Error {
    fn from(e: ::h2::Error) -> Self {
        Self::H2(e.into())
    }
}

impl From<str::Utf8Error> for Error {
    fn from(e: str::Utf8Error) -> Self {
        Self::Std(Box::new(e))
    }
}
