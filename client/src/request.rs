use http::{
    Uri,
    uri::{Authority, Scheme},
};

use crate::{
    body::Body,
    error::{Error, InvalidUri},
};

/// request type flowing through the interceptor chain.
pub type Request = http::Request<Body>;

/// clone request head and body. extensions are not carried over.
pub(crate) fn clone_request(req: &Request) -> Request {
    let mut cloned = http::Request::new(req.body().clone());
    *cloned.method_mut() = req.method().clone();
    *cloned.uri_mut() = req.uri().clone();
    *cloned.version_mut() = req.version();
    *cloned.headers_mut() = req.headers().clone();
    cloned
}

/// scheme, host and port of a request target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Target {
    pub(crate) tls: bool,
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl Target {
    pub(crate) fn try_from_uri(uri: &Uri) -> Result<Self, Error> {
        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(_) => return Err(InvalidUri::UnknownScheme.into()),
            None => return Err(InvalidUri::MissingScheme.into()),
        };

        let host = uri.host().ok_or(InvalidUri::MissingHost)?;
        // ipv6 literal is stored without brackets.
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self { tls, host, port })
    }

    pub(crate) fn is_default_port(&self) -> bool {
        self.port == if self.tls { 443 } else { 80 }
    }

    /// host header value. default port is omitted.
    pub(crate) fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.is_default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// origin uri with only scheme and authority.
    pub(crate) fn to_uri(&self) -> Result<Uri, Error> {
        let scheme = if self.tls { Scheme::HTTPS } else { Scheme::HTTP };
        let authority = Authority::try_from(self.host_header())?;
        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query("/")
            .build()
            .map_err(Into::into)
    }
}

/// true when the two uris would be served by the same connection.
pub(crate) fn same_connection(a: &Uri, b: &Uri) -> bool {
    match (Target::try_from_uri(a), Target::try_from_uri(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
