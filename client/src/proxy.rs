use core::fmt;

use http::Uri;

use crate::error::Error;

/// intermediary a route goes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Proxy {
    Direct,
    /// plain http proxy. https target is reached through a CONNECT tunnel.
    Http { host: String, port: u16 },
}

impl Proxy {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::Http {
            host: host.into(),
            port,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("DIRECT"),
            Self::Http { host, port } => write!(f, "HTTP @ {host}:{port}"),
        }
    }
}

/// Trait for choosing proxies of a request target when no explicit proxy is configured.
pub trait ProxySelector: Send + Sync {
    /// proxies to try in order. an empty list falls back to [Proxy::Direct].
    fn select(&self, uri: &Uri) -> Vec<Proxy>;

    /// notify selector a proxy failed to be connected.
    fn connect_failed(&self, uri: &Uri, proxy: &Proxy, err: &Error) {
        let _ = (uri, proxy, err);
    }
}

/// default selector always connecting directly.
pub struct NoProxy;

impl ProxySelector for NoProxy {
    fn select(&self, _: &Uri) -> Vec<Proxy> {
        vec![Proxy::Direct]
    }
}
