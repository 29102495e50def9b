use futures_core::future::BoxFuture;

use crate::{address::Protocol, error::Error};

use super::stream::Io;

/// Trait for custom tls connector.
///
/// # Examples
/// ```rust
/// use tandem_client::{error::Error, BoxFuture, ClientBuilder, Io, Protocol, TlsConnector};
///
/// struct MyConnector;
///
/// impl TlsConnector for MyConnector {
///     fn connect<'s, 'f>(
///         &'s self,
///         hostname: &'f str,
///         io: Box<dyn Io>,
///         alpn: &'f [Protocol],
///     ) -> BoxFuture<'f, Result<(Box<dyn Io>, Protocol), Error>>
///     where
///         's: 'f,
///     {
///         // tls handshake logic
///         Box::pin(async move { Ok((io, Protocol::Http11)) })
///     }
/// }
///
/// # fn resolve() {
/// let client = ClientBuilder::new().tls_connector(MyConnector).finish();
/// # }
/// ```
pub trait TlsConnector: Send + Sync {
    /// `Box<dyn Io>` is an async read/write type. See [Io] trait for detail.
    ///
    /// `alpn` is the protocol list of the address in preference order. returned protocol is the one
    /// negotiated with server and http/1.1 when server does not speak alpn.
    #[allow(clippy::type_complexity)]
    fn connect<'s, 'f>(
        &'s self,
        hostname: &'f str,
        io: Box<dyn Io>,
        alpn: &'f [Protocol],
    ) -> BoxFuture<'f, Result<(Box<dyn Io>, Protocol), Error>>
    where
        's: 'f;
}

#[cfg(feature = "rustls")]
pub use self::rustls::RustlsConnector;

#[cfg(feature = "rustls")]
mod rustls {
    use std::sync::Arc;

    use futures_core::future::BoxFuture;
    use tokio_rustls::{
        TlsConnector as Connector,
        rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
    };
    use webpki_roots::TLS_SERVER_ROOTS;

    use crate::{
        address::Protocol,
        error::{Error, RustlsError},
    };

    use super::{Io, TlsConnector};

    /// tls connector backed by rustls with webpki root certificates.
    pub struct RustlsConnector {
        config: Arc<ClientConfig>,
    }

    impl Default for RustlsConnector {
        fn default() -> Self {
            let mut root_certs = RootCertStore::empty();
            root_certs.extend(TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder()
                .with_root_certificates(root_certs)
                .with_no_client_auth();

            Self::from(config)
        }
    }

    impl From<ClientConfig> for RustlsConnector {
        fn from(config: ClientConfig) -> Self {
            Self {
                config: Arc::new(config),
            }
        }
    }

    impl TlsConnector for RustlsConnector {
        fn connect<'s, 'f>(
            &'s self,
            hostname: &'f str,
            io: Box<dyn Io>,
            alpn: &'f [Protocol],
        ) -> BoxFuture<'f, Result<(Box<dyn Io>, Protocol), Error>>
        where
            's: 'f,
        {
            Box::pin(async move {
                let name = ServerName::try_from(hostname.to_owned()).map_err(|_| RustlsError::InvalidDnsName)?;

                let mut config = ClientConfig::clone(&self.config);
                config.alpn_protocols = alpn
                    .iter()
                    .filter_map(|p| p.alpn_id())
                    .map(|id| id.as_bytes().to_vec())
                    .collect();

                let stream = Connector::from(Arc::new(config))
                    .connect(name, io)
                    .await
                    .map_err(RustlsError::Io)?;

                let protocol = stream
                    .get_ref()
                    .1
                    .alpn_protocol()
                    .and_then(Protocol::from_alpn_id)
                    .unwrap_or(Protocol::Http11);

                Ok((Box::new(stream) as Box<dyn Io>, protocol))
            })
        }
    }
}
