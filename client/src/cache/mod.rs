//! http caching stage and its storage.

mod control;
mod store;
mod strategy;

pub use self::control::CacheControl;
pub use self::store::{CacheStore, MemoryCache};

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, Method, StatusCode,
    header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, WARNING},
};
use tracing::{debug, warn};

use crate::{
    chain::{Chain, Interceptor},
    error::Error,
    response::{Response, ResponseSource},
};

pub(crate) use self::strategy::has_body;

use self::strategy::{CacheStrategy, is_cacheable};

/// serve requests from cache and write network responses to it. a client without cache store
/// passes every request through.
pub(crate) struct CacheStage {
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheStage {
    pub(crate) fn new(store: Option<Arc<dyn CacheStore>>) -> Self {
        Self { store }
    }
}

impl Interceptor for CacheStage {
    async fn intercept(&self, chain: Chain<'_>) -> Result<Response, Error> {
        let Some(ref store) = self.store else {
            let req = chain.request_cloned();
            return chain.proceed(req).await;
        };

        let candidate = store.get(chain.request());
        let CacheStrategy {
            network_request,
            cache_response,
        } = CacheStrategy::compute(SystemTime::now(), chain.request(), candidate);

        store.track_response(network_request.is_some(), cache_response.is_some());

        let Some(network_request) = network_request else {
            return Ok(match cache_response {
                Some(res) => {
                    debug!(target: "cache", "hit {}", chain.request().uri());
                    res.with_source(ResponseSource::Cache).without_route()
                }
                None => unsatisfiable(&chain),
            });
        };

        let method = network_request.method().clone();
        let res = chain.proceed(network_request).await?;

        if let Some(cached) = cache_response {
            if res.status() == StatusCode::NOT_MODIFIED {
                debug!(target: "cache", "conditional hit {}", res.request().uri());
                let mut merged = cached.clone();
                *merged.headers_mut() = combine(cached.headers(), res.headers());
                let merged = merged
                    .with_timestamps(res.sent_request_at(), res.received_response_at())
                    .with_source(ResponseSource::ConditionalCache);
                store.track_conditional_cache_hit();
                store.update(&cached, &merged);
                return Ok(merged);
            }
        }

        if invalidates_cache(&method) {
            store.remove(res.request());
        } else if method == Method::GET && has_body(&method, &res) && is_cacheable(&res, res.request()) {
            store.put(&res);
        }

        Ok(res)
    }
}

/// response of only-if-cached request without usable cache entry.
fn unsatisfiable(chain: &Chain<'_>) -> Response {
    warn!(target: "cache", "unsatisfiable only-if-cached request {}", chain.request().uri());
    let mut res = http::Response::new(Bytes::new());
    *res.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    Response::new(res, chain.request_cloned())
        .with_timestamps(UNIX_EPOCH, SystemTime::now())
        .with_source(ResponseSource::Cache)
}

fn invalidates_cache(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PATCH | Method::PUT | Method::DELETE) || method.as_str() == "MOVE"
}

/// merge headers of a 304 response into stored response headers. end to end headers of network
/// response win. content describing headers of stored response are kept.
fn combine(cached: &HeaderMap, network: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in cached {
        // 1xx warnings describe freshness of the stored response.
        if *name == WARNING && value.as_bytes().starts_with(b"1") {
            continue;
        }
        if is_content_specific(name) || !is_end_to_end(name) || !network.contains_key(name) {
            headers.append(name, value.clone());
        }
    }

    for (name, value) in network {
        if !is_content_specific(name) && is_end_to_end(name) {
            headers.append(name, value.clone());
        }
    }

    headers
}

fn is_end_to_end(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn is_content_specific(name: &HeaderName) -> bool {
    *name == CONTENT_LENGTH || *name == CONTENT_ENCODING || *name == CONTENT_TYPE
}
