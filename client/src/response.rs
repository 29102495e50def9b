use std::{
    fmt,
    ops::{Deref, DerefMut},
    str,
    time::SystemTime,
};

use bytes::Bytes;

use crate::{
    error::Error,
    request::{Request, clone_request},
    route::Route,
};

pub(crate) const DEFAULT_PAYLOAD_LIMIT: usize = 1024 * 1024 * 8;

/// where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// served from cache without touching network.
    Cache,
    /// cached response validated by a conditional network request.
    ConditionalCache,
}

/// buffered http response with the request that produced it.
pub struct Response {
    res: http::Response<Bytes>,
    request: Request,
    prior: Option<Box<Response>>,
    source: ResponseSource,
    sent_at: SystemTime,
    received_at: SystemTime,
    route: Option<Route>,
}

impl Deref for Response {
    type Target = http::Response<Bytes>;

    fn deref(&self) -> &Self::Target {
        &self.res
    }
}

impl DerefMut for Response {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.res
    }
}

impl Clone for Response {
    fn clone(&self) -> Self {
        let mut res = self.strip_body();
        res.replace_body(self.res.body().clone());
        res
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.res.status())
            .field("headers", self.res.headers())
            .field("request", &format_args!("{} {}", self.request.method(), self.request.uri()))
            .field("source", &self.source)
            .field("prior", &self.prior)
            .finish()
    }
}

impl Response {
    pub(crate) fn new(res: http::Response<Bytes>, request: Request) -> Self {
        let now = SystemTime::now();
        Self {
            res,
            request,
            prior: None,
            source: ResponseSource::Network,
            sent_at: now,
            received_at: now,
            route: None,
        }
    }

    /// Get a reference of the inner response type.
    pub fn inner(&self) -> &http::Response<Bytes> {
        &self.res
    }

    /// Get a mutable reference of the inner response type.
    pub fn inner_mut(&mut self) -> &mut http::Response<Bytes> {
        &mut self.res
    }

    pub fn into_inner(self) -> http::Response<Bytes> {
        self.res
    }

    /// The request that produced this response. It's the request after every rewrite of the chain,
    /// not the request the call was created with.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The response that triggered the follow up ended with this response.
    /// Prior responses never carry a body.
    pub fn prior_response(&self) -> Option<&Response> {
        self.prior.as_deref()
    }

    pub fn source(&self) -> ResponseSource {
        self.source
    }

    pub fn sent_request_at(&self) -> SystemTime {
        self.sent_at
    }

    pub fn received_response_at(&self) -> SystemTime {
        self.received_at
    }

    /// route of the connection carried this response. None for response served from cache.
    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }

    pub fn body(&self) -> &Bytes {
        self.res.body()
    }

    pub fn bytes(self) -> Bytes {
        self.res.into_body()
    }

    /// Collect response body as String.
    pub fn text(&self) -> Result<String, Error> {
        str::from_utf8(self.res.body()).map(str::to_owned).map_err(Into::into)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status().as_u16(), 300..=303 | 307 | 308)
    }

    pub(crate) fn with_prior(mut self, prior: Option<Response>) -> Self {
        self.prior = prior.map(|p| Box::new(p.strip_body()));
        self
    }

    pub(crate) fn with_request(mut self, request: Request) -> Self {
        self.request = request;
        self
    }

    pub(crate) fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    pub(crate) fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub(crate) fn without_route(mut self) -> Self {
        self.route = None;
        self
    }

    pub(crate) fn with_timestamps(mut self, sent_at: SystemTime, received_at: SystemTime) -> Self {
        self.sent_at = sent_at;
        self.received_at = received_at;
        self
    }

    /// a copy of the response with every field except body.
    pub(crate) fn strip_body(&self) -> Response {
        let mut res = http::Response::new(Bytes::new());
        *res.status_mut() = self.res.status();
        *res.version_mut() = self.res.version();
        *res.headers_mut() = self.res.headers().clone();
        Response {
            res,
            request: clone_request(&self.request),
            prior: self.prior.as_ref().map(|p| Box::new(p.strip_body())),
            source: self.source,
            sent_at: self.sent_at,
            received_at: self.received_at,
            route: self.route.clone(),
        }
    }

    pub(crate) fn replace_body(&mut self, body: Bytes) {
        *self.res.body_mut() = body;
    }
}
