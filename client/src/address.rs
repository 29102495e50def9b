use core::{
    fmt,
    hash::{Hash, Hasher},
};

use std::sync::Arc;

use http::Uri;

use crate::{
    auth::Authenticator,
    error::Error,
    proxy::{Proxy, ProxySelector},
    resolver::DnsDyn,
    tls::connector::TlsConnector,
};

/// application protocol spoken over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http11,
    /// http/2 negotiated with alpn over tls.
    H2,
    /// http/2 over clear text without upgrade. must be the only protocol of a client.
    H2PriorKnowledge,
}

impl Protocol {
    /// identifier used in tls alpn extension.
    pub fn alpn_id(&self) -> Option<&'static str> {
        match self {
            Self::Http11 => Some("http/1.1"),
            Self::H2 => Some("h2"),
            Self::H2PriorKnowledge => None,
        }
    }

    pub fn from_alpn_id(id: &[u8]) -> Option<Self> {
        match id {
            b"http/1.1" => Some(Self::Http11),
            b"h2" => Some(Self::H2),
            _ => None,
        }
    }

    pub fn is_multiplexed(&self) -> bool {
        matches!(self, Self::H2 | Self::H2PriorKnowledge)
    }

    pub(crate) fn default_list() -> Vec<Self> {
        #[cfg(feature = "http2")]
        {
            vec![Self::H2, Self::Http11]
        }

        #[cfg(not(feature = "http2"))]
        {
            vec![Self::Http11]
        }
    }

    /// protocol list must be non empty and contain http/1.1 unless it's exactly prior knowledge http/2.
    pub(crate) fn validate(list: &[Self]) -> Result<(), Error> {
        let err = |msg: &'static str| Err(Error::Std(msg.into()));

        if list.is_empty() {
            return err("protocol list must not be empty");
        }

        if list.contains(&Self::H2PriorKnowledge) {
            if list.len() > 1 {
                return err("h2 prior knowledge can not be combined with other protocols");
            }
            return Ok(());
        }

        if !list.contains(&Self::Http11) {
            return err("protocol list must contain http/1.1");
        }

        Ok(())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http11 => f.write_str("http/1.1"),
            Self::H2 => f.write_str("h2"),
            Self::H2PriorKnowledge => f.write_str("h2_prior_knowledge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

/// Everything it takes to reach an origin. Calls with equal address can share connection.
#[derive(Clone)]
pub struct Address {
    pub(crate) scheme: Scheme,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) uri: Uri,
    pub(crate) protocols: Arc<[Protocol]>,
    pub(crate) proxy: Option<Proxy>,
    pub(crate) proxy_selector: Arc<dyn ProxySelector>,
    pub(crate) dns: Arc<dyn DnsDyn>,
    pub(crate) tls_connector: Option<Arc<dyn TlsConnector>>,
    pub(crate) proxy_authenticator: Arc<dyn Authenticator>,
}

impl Address {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// origin uri of address. only scheme and authority are present.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// explicit proxy overriding proxy selector.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.scheme, Scheme::Https)
    }

    /// equality of everything except host and port.
    ///
    /// collaborators are compared by identity.
    pub fn equals_non_host(&self, other: &Self) -> bool {
        self.protocols == other.protocols
            && self.proxy == other.proxy
            && Arc::ptr_eq(&self.proxy_selector, &other.proxy_selector)
            && Arc::ptr_eq(&self.dns, &other.dns)
            && Arc::ptr_eq(&self.proxy_authenticator, &other.proxy_authenticator)
            && match (&self.tls_connector, &other.tls_connector) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme && self.host == other.host && self.port == other.port && self.equals_non_host(other)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("uri", &self.uri)
            .field("protocols", &self.protocols)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::net::SocketAddr;

    use crate::{auth::NoAuth, proxy::NoProxy, request::Target, resolver::Dns};

    use super::*;

    pub(crate) struct LocalDns;

    impl Dns for LocalDns {
        async fn lookup(&self, _: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
            Ok(vec![SocketAddr::from(([127, 0, 0, 1], port))])
        }
    }

    /// address of http origin with fresh collaborators.
    pub(crate) fn address(uri: &str) -> Address {
        let uri = Uri::try_from(uri).unwrap();
        let target = Target::try_from_uri(&uri).unwrap();
        Address {
            scheme: if target.tls { Scheme::Https } else { Scheme::Http },
            uri: target.to_uri().unwrap(),
            host: target.host,
            port: target.port,
            protocols: Arc::from(vec![Protocol::Http11]),
            proxy: None,
            proxy_selector: Arc::new(NoProxy),
            dns: Arc::new(LocalDns),
            tls_connector: None,
            proxy_authenticator: Arc::new(NoAuth),
        }
    }

    #[test]
    fn equality() {
        let a = address("http://a.com");
        let mut b = a.clone();
        assert_eq!(a, b);

        b.host = "b.com".into();
        assert_ne!(a, b);
        assert!(a.equals_non_host(&b));

        let c = address("http://a.com");
        assert_ne!(a, c, "collaborators compare by identity");
        assert!(!a.equals_non_host(&c));
    }

    #[test]
    fn protocol_list() {
        assert!(Protocol::validate(&[]).is_err());
        assert!(Protocol::validate(&[Protocol::H2]).is_err());
        assert!(Protocol::validate(&[Protocol::H2PriorKnowledge, Protocol::Http11]).is_err());
        assert!(Protocol::validate(&[Protocol::H2PriorKnowledge]).is_ok());
        assert!(Protocol::validate(&[Protocol::H2, Protocol::Http11]).is_ok());
        assert!(Protocol::validate(&Protocol::default_list()).is_ok());
    }
}
