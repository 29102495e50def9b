use std::io;

use http::{
    Method, StatusCode, Uri,
    header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, RETRY_AFTER, TRANSFER_ENCODING},
    uri::{Authority, PathAndQuery, Scheme},
};
use tracing::{debug, trace};

use crate::{
    body::Body,
    chain::{Chain, Interceptor},
    client::Client,
    error::{Error, ErrorResponse, FollowUpError, RouteError, TimeoutError},
    proxy::Proxy,
    request::{Request, clone_request, same_connection},
    response::Response,
    transmitter::Transmitter,
};

/// recover from connection failures and follow redirects and authentication challenges.
pub(crate) struct RetryAndFollowUp;

impl Interceptor for RetryAndFollowUp {
    async fn intercept(&self, chain: Chain<'_>) -> Result<Response, Error> {
        let tx = chain.transmitter();
        let client = chain.client();

        let mut req = chain.request_cloned();
        let mut prior = None;
        let mut follow_ups = 0;
        let mut retries = 0;
        let mut route_error: Option<RouteError> = None;

        loop {
            tx.prepare_to_connect(&req)?;
            tx.check_live()?;

            let res = match chain.proceed_again(clone_request(&req)).await {
                Ok(res) => res,
                // connect failure. request is not sent.
                Err(Error::Route(e)) => {
                    let first = e.into_first();
                    if !recover(client, tx, &req, &first, false, retries) {
                        return Err(match route_error {
                            Some(mut acc) => {
                                acc.add_attempt();
                                acc.into()
                            }
                            None => RouteError::new(first).into(),
                        });
                    }
                    match route_error {
                        Some(ref mut acc) => acc.add_attempt(),
                        None => route_error = Some(RouteError::new(first)),
                    }
                    retries += 1;
                    continue;
                }
                Err(e) => {
                    if !recover(client, tx, &req, &e, true, retries) {
                        return Err(e);
                    }
                    retries += 1;
                    continue;
                }
            };

            let res = res.with_prior(prior.take());

            let Some(follow_up) = follow_up_request(client, &res)? else {
                return Ok(res);
            };

            if follow_up.body().is_one_shot() {
                return Err(FollowUpError::UnrepeatableBody.into());
            }

            follow_ups += 1;
            if follow_ups > client.inner.max_follow_ups {
                return Err(FollowUpError::TooMany(follow_ups).into());
            }

            debug!(
                target: "retry",
                "follow up {} {} after {}",
                follow_up.method(),
                follow_up.uri(),
                res.status()
            );

            req = follow_up;
            prior = Some(res);
        }
    }
}

/// Failures a call recovers from by trying again on another connection or route.
///
/// Anything outside of this set is final. Protocol errors, certificate and name verification
/// failures, cancellation and the call deadline in particular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recoverable {
    /// host of a route (origin or proxy) can not be resolved.
    UnknownHost,
    ConnectRefused,
    ConnectionReset,
    /// connect or dns timeout of a route. only before request is sent.
    RouteTimeout,
    /// pooled connection closed by peer while idle.
    StaleConnection,
    /// http/2 stream refused by peer before processing it.
    RefusedStream,
    /// tls handshake aborted by transport. certificate and name failures are not in this set.
    TlsHandshake,
}

impl Recoverable {
    pub(crate) fn classify(err: &Error, sent: bool) -> Option<Self> {
        match *err {
            Error::Io(ref e) => Self::from_io(e),
            #[cfg(feature = "http1")]
            Error::H1(crate::h1::Error::Io(ref e)) => Self::from_io(e),
            #[cfg(feature = "http1")]
            Error::H1(crate::h1::Error::ConnectionClosed) => Some(Self::StaleConnection),
            #[cfg(feature = "http2")]
            Error::H2(ref e) if e.is_refused_stream() => Some(Self::RefusedStream),
            Error::Timeout(TimeoutError::Connect | TimeoutError::Resolve) if !sent => Some(Self::RouteTimeout),
            Error::Resolve(_) if !sent => Some(Self::UnknownHost),
            #[cfg(feature = "rustls")]
            Error::Rustls(crate::error::RustlsError::Io(ref e)) if !sent => Self::from_handshake_io(e),
            _ => None,
        }
    }

    fn from_io(e: &io::Error) -> Option<Self> {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => Some(Self::ConnectRefused),
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
                Some(Self::ConnectionReset)
            }
            _ => None,
        }
    }

    /// rustls reports certificate and protocol failures as [io::ErrorKind::InvalidData].
    #[cfg(feature = "rustls")]
    fn from_handshake_io(e: &io::Error) -> Option<Self> {
        match e.kind() {
            io::ErrorKind::InvalidData => None,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Some(Self::TlsHandshake),
            _ => Self::from_io(e),
        }
    }
}

/// decide whether a failed attempt of request can be made again.
fn recover(client: &Client, tx: &Transmitter, req: &Request, err: &Error, sent: bool, retries: usize) -> bool {
    if !client.inner.retry_on_connection_failure {
        return false;
    }

    // one shot body can not be replayed once handed to a connection.
    if let Body::Stream(ref stream) = *req.body() {
        if stream.is_taken() {
            return false;
        }
    }

    let Some(reason) = Recoverable::classify(err, sent) else {
        return false;
    };

    if !tx.can_retry() {
        trace!(target: "retry", "{reason:?} not retried. no route left");
        return false;
    }

    if retries >= client.inner.max_connection_retries {
        debug!(target: "retry", "{reason:?} not retried. retry limit reached");
        return false;
    }

    debug!(target: "retry", "recover from {reason:?}: {err}");
    true
}

/// request answering response's challenge or redirect. None when response is final.
fn follow_up_request(client: &Client, res: &Response) -> Result<Option<Request>, Error> {
    let route = res.route();

    match res.status().as_u16() {
        407 => {
            if !matches!(route.map(|r| r.proxy()), Some(Proxy::Http { .. })) {
                return Err(ErrorResponse {
                    expect_status: StatusCode::OK,
                    status: StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                    description: "received 407 while not using an http proxy",
                }
                .into());
            }
            client.inner.proxy_authenticator.authenticate(route, res)
        }
        401 => client.inner.authenticator.authenticate(route, res),
        307 | 308 => {
            let method = res.request().method();
            if *method != Method::GET && *method != Method::HEAD {
                return Ok(None);
            }
            redirect_request(client, res)
        }
        300..=303 => redirect_request(client, res),
        408 => {
            if !client.inner.retry_on_connection_failure || res.request().body().is_one_shot() {
                return Ok(None);
            }
            if res.prior_response().is_some_and(|p| p.status() == StatusCode::REQUEST_TIMEOUT) {
                return Ok(None);
            }
            if retry_after(res, 0).is_some_and(|secs| secs > 0) {
                return Ok(None);
            }
            Ok(Some(clone_request(res.request())))
        }
        503 => {
            if res.prior_response().is_some_and(|p| p.status() == StatusCode::SERVICE_UNAVAILABLE) {
                return Ok(None);
            }
            // only an explicit immediate retry is honored.
            if retry_after(res, u64::MAX) == Some(0) {
                return Ok(Some(clone_request(res.request())));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// seconds of Retry-After header. malformed value falls back to `malformed`.
fn retry_after(res: &Response, malformed: u64) -> Option<u64> {
    res.headers()
        .get(RETRY_AFTER)
        .map(|v| v.to_str().ok().and_then(|v| v.trim().parse().ok()).unwrap_or(malformed))
}

fn redirect_request(client: &Client, res: &Response) -> Result<Option<Request>, Error> {
    if !client.inner.follow_redirects {
        return Ok(None);
    }

    let Some(location) = res.headers().get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    let prev = res.request();

    let Some(uri) = resolve(prev.uri(), location) else {
        trace!(target: "retry", "unresolvable redirect location {location}");
        return Ok(None);
    };

    if uri.scheme() != prev.uri().scheme() && !client.inner.follow_tls_redirects {
        return Ok(None);
    }

    let mut req = clone_request(prev);
    *req.uri_mut() = uri;

    let method = prev.method();
    if *method != Method::GET && *method != Method::HEAD {
        let keeps_body = method.as_str() == "PROPFIND";
        if !keeps_body {
            *req.method_mut() = Method::GET;
            *req.body_mut() = Body::Empty;
            let headers = req.headers_mut();
            headers.remove(TRANSFER_ENCODING);
            headers.remove(CONTENT_LENGTH);
            headers.remove(CONTENT_TYPE);
        }
    }

    // credentials never leak to another origin.
    if !same_connection(prev.uri(), req.uri()) {
        req.headers_mut().remove(AUTHORIZATION);
    }

    Ok(Some(req))
}

/// resolve redirect location against uri of the redirected request. only http and https targets
/// are followed.
fn resolve(base: &Uri, location: &str) -> Option<Uri> {
    let location = location.trim();

    if let Ok(uri) = location.parse::<Uri>() {
        if let Some(scheme) = uri.scheme_str() {
            return matches!(scheme, "http" | "https").then_some(uri).filter(|uri| uri.host().is_some());
        }
    }

    let scheme = base.scheme().cloned().unwrap_or(Scheme::HTTP);

    // network path reference.
    if let Some(rest) = location.strip_prefix("//") {
        return format!("{scheme}://{rest}").parse().ok();
    }

    let authority = base.authority()?.clone();

    let path = if location.starts_with('/') {
        location.to_owned()
    } else if location.starts_with('?') {
        format!("{}{location}", base.path())
    } else {
        let dir = base.path().rfind('/').map_or("/", |i| &base.path()[..=i]);
        format!("{dir}{location}")
    };

    build(scheme, authority, &path)
}

fn build(scheme: Scheme, authority: Authority, path: &str) -> Option<Uri> {
    // fragment is client side only.
    let path = path.split('#').next().unwrap_or_default();
    let path = if path.is_empty() { "/" } else { path };
    let path_and_query = PathAndQuery::try_from(path).ok()?;
    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .ok()
}
