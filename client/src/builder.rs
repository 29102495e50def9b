use core::time::Duration;

use std::sync::Arc;

use http::HeaderValue;

use crate::{
    address::Protocol,
    auth::{Authenticator, NoAuth},
    cache::{CacheStage, CacheStore},
    chain::{Interceptor, InterceptorDyn, Stages},
    client::{Client, ClientInner},
    cookie::{CookieJar, NoCookies},
    dispatcher::Dispatcher,
    error::Error,
    events::{EventListener, NoEvents},
    interceptor::{Bridge, CallServer, ConnectStage, RetryAndFollowUp},
    pool::ConnectionPool,
    proxy::{NoProxy, Proxy, ProxySelector},
    resolver::{Dns, DnsDyn, SystemDns},
    response::DEFAULT_PAYLOAD_LIMIT,
    timeout::TimeoutConfig,
    tls::connector::TlsConnector,
};

/// Builder type for [Client]. Offer configurations before a client instance is created.
pub struct ClientBuilder {
    pool: Option<ConnectionPool>,
    dispatcher: Option<Dispatcher>,
    interceptors: Vec<Arc<dyn InterceptorDyn>>,
    network_interceptors: Vec<Arc<dyn InterceptorDyn>>,
    timeouts: TimeoutConfig,
    protocols: Vec<Protocol>,
    proxy: Option<Proxy>,
    proxy_selector: Arc<dyn ProxySelector>,
    dns: Arc<dyn DnsDyn>,
    tls_connector: Option<Arc<dyn TlsConnector>>,
    authenticator: Arc<dyn Authenticator>,
    proxy_authenticator: Arc<dyn Authenticator>,
    cookie_jar: Arc<dyn CookieJar>,
    events: Arc<dyn EventListener>,
    cache: Option<Arc<dyn CacheStore>>,
    retry_on_connection_failure: bool,
    follow_redirects: bool,
    follow_tls_redirects: bool,
    max_follow_ups: usize,
    max_connection_retries: usize,
    max_response_body: usize,
    user_agent: HeaderValue,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder {
            pool: None,
            dispatcher: None,
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            timeouts: TimeoutConfig::default(),
            protocols: Protocol::default_list(),
            proxy: None,
            proxy_selector: Arc::new(NoProxy),
            dns: Arc::new(SystemDns),
            tls_connector: None,
            authenticator: Arc::new(NoAuth),
            proxy_authenticator: Arc::new(NoAuth),
            cookie_jar: Arc::new(NoCookies),
            events: Arc::new(NoEvents),
            cache: None,
            retry_on_connection_failure: true,
            follow_redirects: true,
            follow_tls_redirects: true,
            max_follow_ups: 20,
            max_connection_retries: 10,
            max_response_body: DEFAULT_PAYLOAD_LIMIT,
            user_agent: HeaderValue::from_static(concat!("tandem/", env!("CARGO_PKG_VERSION"))),
        }
    }

    /// builder sharing pool, dispatcher and collaborators of an existing client.
    pub(crate) fn from_inner(inner: &ClientInner) -> Self {
        Self {
            pool: Some(inner.pool.clone()),
            dispatcher: Some(inner.dispatcher.clone()),
            interceptors: inner.interceptors.clone(),
            network_interceptors: inner.network_interceptors.clone(),
            timeouts: inner.timeouts,
            protocols: inner.protocols.to_vec(),
            proxy: inner.proxy.clone(),
            proxy_selector: inner.proxy_selector.clone(),
            dns: inner.dns.clone(),
            tls_connector: inner.tls_connector.clone(),
            authenticator: inner.authenticator.clone(),
            proxy_authenticator: inner.proxy_authenticator.clone(),
            cookie_jar: inner.cookie_jar.clone(),
            events: inner.events.clone(),
            cache: inner.cache.clone(),
            retry_on_connection_failure: inner.retry_on_connection_failure,
            follow_redirects: inner.follow_redirects,
            follow_tls_redirects: inner.follow_tls_redirects,
            max_follow_ups: inner.max_follow_ups,
            max_connection_retries: inner.max_connection_retries,
            max_response_body: inner.max_response_body,
            user_agent: inner.user_agent.clone(),
        }
    }

    /// add interceptor running once per call in front of retry and follow up.
    ///
    /// Interceptors run in the order they are added. See [Interceptor] for detail.
    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// add interceptor running once per network exchange, after a connection is found.
    ///
    /// Network interceptor must proceed exactly once and must keep host and port of request.
    pub fn network_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.network_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Set custom DNS resolver.
    ///
    /// See [Dns] for detail.
    pub fn dns<D>(mut self, dns: D) -> Self
    where
        D: Dns + 'static,
    {
        self.dns = Arc::new(dns);
        self
    }

    #[cfg(feature = "rustls")]
    /// enable rustls with webpki root certificates as tls connector.
    pub fn rustls(self) -> Self {
        self.tls_connector(crate::tls::connector::RustlsConnector::default())
    }

    /// Set custom tls connector used for https targets and tls tunnels through proxy.
    ///
    /// See [TlsConnector] for detail.
    pub fn tls_connector<T>(mut self, connector: T) -> Self
    where
        T: TlsConnector + 'static,
    {
        self.tls_connector = Some(Arc::new(connector));
        self
    }

    /// Set protocols in preference order.
    ///
    /// List must contain http/1.1 unless it's exactly [Protocol::H2PriorKnowledge].
    pub fn protocols(mut self, protocols: Vec<Protocol>) -> Result<Self, Error> {
        Protocol::validate(&protocols)?;

        #[cfg(not(feature = "http2"))]
        if protocols.iter().any(Protocol::is_multiplexed) {
            return Err(crate::error::FeatureError::Http2NotEnabled.into());
        }

        #[cfg(not(feature = "http1"))]
        if protocols.contains(&Protocol::Http11) {
            return Err(crate::error::FeatureError::Http1NotEnabled.into());
        }

        self.protocols = protocols;
        Ok(self)
    }

    /// Set explicit proxy for every request. It takes precedence over proxy selector.
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn proxy_selector<S>(mut self, selector: S) -> Self
    where
        S: ProxySelector + 'static,
    {
        self.proxy_selector = Arc::new(selector);
        self
    }

    /// Set connection pool. Pool can be shared between clients.
    pub fn connection_pool(mut self, pool: ConnectionPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set dispatcher of asynchronous calls. Dispatcher can be shared between clients.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Enable response caching with given store.
    pub fn cache<C>(mut self, store: C) -> Self
    where
        C: CacheStore + 'static,
    {
        self.cache = Some(Arc::new(store));
        self
    }

    /// Set timeout for DNS look up of one route selection.
    ///
    /// Default to 5 seconds.
    pub fn resolve_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.resolve_timeout = dur;
        self
    }

    /// Set timeout for establishing connection, including tls handshake and proxy tunnel.
    ///
    /// Default to 10 seconds.
    pub fn connect_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.connect_timeout = dur;
        self
    }

    /// Set timeout for every write of request head and body.
    ///
    /// Default to 10 seconds.
    pub fn write_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.write_timeout = dur;
        self
    }

    /// Set timeout for every read of response head and body.
    ///
    /// Default to 10 seconds.
    pub fn read_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.read_timeout = dur;
        self
    }

    /// Set deadline of a whole call, spanning every retry and follow up.
    ///
    /// Default to unbounded.
    pub fn call_timeout(mut self, dur: Duration) -> Self {
        self.timeouts.call_timeout = Some(dur);
        self
    }

    /// Set authenticator answering 401 challenges of origin server.
    pub fn authenticator<A>(mut self, authenticator: A) -> Self
    where
        A: Authenticator + 'static,
    {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Set authenticator answering 407 challenges of http proxy, including challenges to tunnel
    /// establishment.
    pub fn proxy_authenticator<A>(mut self, authenticator: A) -> Self
    where
        A: Authenticator + 'static,
    {
        self.proxy_authenticator = Arc::new(authenticator);
        self
    }

    pub fn cookie_jar<C>(mut self, jar: C) -> Self
    where
        C: CookieJar + 'static,
    {
        self.cookie_jar = Arc::new(jar);
        self
    }

    pub fn event_listener<E>(mut self, listener: E) -> Self
    where
        E: EventListener + 'static,
    {
        self.events = Arc::new(listener);
        self
    }

    /// Retry recoverable connectivity failures on other routes or fresh connections.
    ///
    /// Default to true.
    pub fn retry_on_connection_failure(mut self, value: bool) -> Self {
        self.retry_on_connection_failure = value;
        self
    }

    /// Follow 3xx redirect responses. Default to true.
    pub fn follow_redirects(mut self, value: bool) -> Self {
        self.follow_redirects = value;
        self
    }

    /// Follow redirects switching between http and https. Default to true.
    pub fn follow_tls_redirects(mut self, value: bool) -> Self {
        self.follow_tls_redirects = value;
        self
    }

    /// Set max number of follow up requests of a call. Default to 20.
    pub fn max_follow_ups(mut self, value: usize) -> Self {
        self.max_follow_ups = value;
        self
    }

    /// Set max number of retries after connectivity failures of a call. Default to 10.
    pub fn max_connection_retries(mut self, value: usize) -> Self {
        self.max_connection_retries = value;
        self
    }

    /// Set max size in bytes of a buffered response body. Default to 8 MiB.
    pub fn max_response_body(mut self, value: usize) -> Self {
        self.max_response_body = value;
        self
    }

    /// Set value of `User-Agent` header added to requests without one.
    pub fn user_agent(mut self, value: HeaderValue) -> Self {
        self.user_agent = value;
        self
    }

    /// Finish the builder and construct [Client] instance.
    pub fn finish(self) -> Client {
        let mut stages = self.interceptors.clone();
        stages.push(Arc::new(RetryAndFollowUp));
        stages.push(Arc::new(Bridge));
        stages.push(Arc::new(CacheStage::new(self.cache.clone())));
        let connect = stages.len();
        stages.push(Arc::new(ConnectStage));
        stages.extend(self.network_interceptors.iter().cloned());
        stages.push(Arc::new(CallServer));

        Client {
            inner: Arc::new(ClientInner {
                pool: self.pool.unwrap_or_default(),
                dispatcher: self.dispatcher.unwrap_or_default(),
                stages: Stages { stages, connect },
                interceptors: self.interceptors,
                network_interceptors: self.network_interceptors,
                timeouts: self.timeouts,
                protocols: Arc::from(self.protocols),
                proxy: self.proxy,
                proxy_selector: self.proxy_selector,
                dns: self.dns,
                tls_connector: self.tls_connector,
                authenticator: self.authenticator,
                proxy_authenticator: self.proxy_authenticator,
                cookie_jar: self.cookie_jar,
                events: self.events,
                cache: self.cache,
                retry_on_connection_failure: self.retry_on_connection_failure,
                follow_redirects: self.follow_redirects,
                follow_tls_redirects: self.follow_tls_redirects,
                max_follow_ups: self.max_follow_ups,
                max_connection_retries: self.max_connection_retries,
                max_response_body: self.max_response_body,
                user_agent: self.user_agent,
            }),
        }
    }
}
