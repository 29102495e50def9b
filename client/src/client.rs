use std::sync::Arc;

use http::{HeaderValue, Uri};

use crate::{
    address::{Address, Protocol, Scheme},
    auth::Authenticator,
    builder::ClientBuilder,
    cache::CacheStore,
    call::Call,
    chain::{InterceptorDyn, Stages},
    cookie::CookieJar,
    dispatcher::Dispatcher,
    error::Error,
    events::EventListener,
    pool::ConnectionPool,
    proxy::{Proxy, ProxySelector},
    request::{Request, Target},
    resolver::DnsDyn,
    timeout::TimeoutConfig,
    tls::connector::TlsConnector,
};

/// http client type used for creating [Call] of [Request].
///
/// Client is a reference counted handle. Cloning it is cheap and every clone shares the same
/// connection pool, dispatcher and configuration.
///
/// # Examples
/// ```rust
/// use tandem_client::{error::Error, Client};
///
/// async fn get(client: &Client) -> Result<(), Error> {
///     let req = tandem_client::http::Request::get("http://example.com/").body(Default::default())?;
///     let res = client.new_call(req).execute().await?;
///     println!("{}", res.status());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) pool: ConnectionPool,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) stages: Stages,
    pub(crate) interceptors: Vec<Arc<dyn InterceptorDyn>>,
    pub(crate) network_interceptors: Vec<Arc<dyn InterceptorDyn>>,
    pub(crate) timeouts: TimeoutConfig,
    pub(crate) protocols: Arc<[Protocol]>,
    pub(crate) proxy: Option<Proxy>,
    pub(crate) proxy_selector: Arc<dyn ProxySelector>,
    pub(crate) dns: Arc<dyn DnsDyn>,
    pub(crate) tls_connector: Option<Arc<dyn TlsConnector>>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) proxy_authenticator: Arc<dyn Authenticator>,
    pub(crate) cookie_jar: Arc<dyn CookieJar>,
    pub(crate) events: Arc<dyn EventListener>,
    pub(crate) cache: Option<Arc<dyn CacheStore>>,
    pub(crate) retry_on_connection_failure: bool,
    pub(crate) follow_redirects: bool,
    pub(crate) follow_tls_redirects: bool,
    pub(crate) max_follow_ups: usize,
    pub(crate) max_connection_retries: usize,
    pub(crate) max_response_body: usize,
    pub(crate) user_agent: HeaderValue,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Construct a new Client with default setting.
    pub fn new() -> Self {
        Self::builder().finish()
    }

    /// Start a new ClientBuilder and with customizable configuration.
    ///
    /// See [ClientBuilder] for detail.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a builder configured like this client.
    ///
    /// Client built from it shares connection pool, dispatcher and every collaborator with this
    /// client. Interceptors are inherited and more can be appended.
    pub fn new_builder(&self) -> ClientBuilder {
        ClientBuilder::from_inner(&self.inner)
    }

    /// prepare request for execution. see [Call] for how it's executed.
    pub fn new_call(&self, request: Request) -> Call {
        Call::new(self.clone(), request)
    }

    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.inner.timeouts
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.inner.protocols
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.inner.cache.as_ref()
    }

    /// address of origin the uri points to with this client's collaborators attached.
    pub fn address_for(&self, uri: &Uri) -> Result<Address, Error> {
        let target = Target::try_from_uri(uri)?;
        let inner = &*self.inner;

        let (scheme, tls_connector) = if target.tls {
            (Scheme::Https, inner.tls_connector.clone())
        } else {
            (Scheme::Http, None)
        };

        Ok(Address {
            scheme,
            uri: target.to_uri()?,
            host: target.host,
            port: target.port,
            protocols: inner.protocols.clone(),
            proxy: inner.proxy.clone(),
            proxy_selector: inner.proxy_selector.clone(),
            dns: inner.dns.clone(),
            tls_connector,
            proxy_authenticator: inner.proxy_authenticator.clone(),
        })
    }
}
