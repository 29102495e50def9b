use core::time::Duration;

use std::time::SystemTime;

use http::{
    HeaderName, HeaderValue, Method, StatusCode,
    header::{AGE, DATE, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, WARNING},
};

use crate::{
    request::{Request, clone_request},
    response::Response,
};

use super::control::CacheControl;

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of matching a request against a cached response.
///
/// `network_request` is None when network must not be used. `cache_response` is None when the
/// cached response can not be used. Both None means only-if-cached can not be satisfied.
pub(crate) struct CacheStrategy {
    pub(crate) network_request: Option<Request>,
    pub(crate) cache_response: Option<Response>,
}

impl CacheStrategy {
    pub(crate) fn compute(now: SystemTime, req: &Request, candidate: Option<Response>) -> Self {
        let strategy = match candidate {
            Some(cached) => Candidate::new(now, cached).strategy(req),
            None => Self::network(req),
        };

        if strategy.network_request.is_some() && CacheControl::parse(req.headers()).only_if_cached {
            return Self {
                network_request: None,
                cache_response: None,
            };
        }

        strategy
    }

    fn network(req: &Request) -> Self {
        Self {
            network_request: Some(clone_request(req)),
            cache_response: None,
        }
    }
}

/// true when response can be stored and later served for request.
pub(crate) fn is_cacheable(res: &Response, req: &Request) -> bool {
    let res_cc = CacheControl::parse(res.headers());

    match res.status().as_u16() {
        200 | 203 | 204 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 501 => {}
        // temporary redirects are cacheable only with explicit freshness or visibility.
        302 | 307 => {
            if !(res.headers().contains_key(EXPIRES) || res_cc.max_age.is_some() || res_cc.public || res_cc.private) {
                return false;
            }
        }
        _ => return false,
    }

    !res_cc.no_store && !CacheControl::parse(req.headers()).no_store
}

/// true when response of method is expected to carry a body.
pub(crate) fn has_body(method: &Method, res: &Response) -> bool {
    if *method == Method::HEAD {
        return false;
    }
    let status = res.status();
    if !status.is_informational() && status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED {
        return true;
    }
    !res.body().is_empty()
}

/// cached response with its caching related headers parsed.
struct Candidate {
    now: SystemTime,
    res: Response,
    served_date: Option<SystemTime>,
    served_date_raw: Option<HeaderValue>,
    last_modified: Option<SystemTime>,
    last_modified_raw: Option<HeaderValue>,
    expires: Option<SystemTime>,
    etag: Option<HeaderValue>,
    age_seconds: Option<u64>,
}

impl Candidate {
    fn new(now: SystemTime, res: Response) -> Self {
        let headers = res.headers();
        let date = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| httpdate::parse_http_date(v).ok())
        };

        Self {
            now,
            served_date: date(DATE),
            served_date_raw: headers.get(DATE).cloned(),
            last_modified: date(LAST_MODIFIED),
            last_modified_raw: headers.get(LAST_MODIFIED).cloned(),
            expires: date(EXPIRES),
            etag: headers.get(ETAG).cloned(),
            age_seconds: headers
                .get(AGE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
            res,
        }
    }

    fn strategy(self, req: &Request) -> CacheStrategy {
        if !is_cacheable(&self.res, req) {
            return CacheStrategy::network(req);
        }

        let req_cc = CacheControl::parse(req.headers());
        if req_cc.no_cache || has_conditions(req) {
            return CacheStrategy::network(req);
        }

        let res_cc = CacheControl::parse(self.res.headers());

        let age = self.age();
        let mut fresh = self.freshness_lifetime(&res_cc);
        if let Some(max_age) = req_cc.max_age {
            fresh = fresh.min(secs(max_age));
        }
        let min_fresh = req_cc.min_fresh.map(secs).unwrap_or_default();
        let max_stale = match req_cc.max_stale {
            Some(max_stale) if !res_cc.must_revalidate => secs(max_stale),
            _ => Duration::ZERO,
        };

        if !res_cc.no_cache && age + min_fresh < fresh.saturating_add(max_stale) {
            let heuristic = res_cc.max_age.is_none() && self.expires.is_none();
            let mut res = self.res;
            if age + min_fresh >= fresh {
                res.headers_mut()
                    .append(WARNING, HeaderValue::from_static("110 tandem \"Response is stale\""));
            }
            if age > ONE_DAY && heuristic {
                res.headers_mut()
                    .append(WARNING, HeaderValue::from_static("113 tandem \"Heuristic expiration\""));
            }
            return CacheStrategy {
                network_request: None,
                cache_response: Some(res),
            };
        }

        // validate stored response with the strongest validator available.
        let condition = match (self.etag, self.last_modified_raw, self.served_date_raw) {
            (Some(etag), _, _) => (IF_NONE_MATCH, etag),
            (None, Some(last_modified), _) => (IF_MODIFIED_SINCE, last_modified),
            (None, None, Some(date)) => (IF_MODIFIED_SINCE, date),
            (None, None, None) => return CacheStrategy::network(req),
        };

        let mut conditional = clone_request(req);
        conditional.headers_mut().insert(condition.0, condition.1);

        CacheStrategy {
            network_request: Some(conditional),
            cache_response: Some(self.res),
        }
    }

    /// how long response stays fresh counted from when it was served.
    fn freshness_lifetime(&self, res_cc: &CacheControl) -> Duration {
        if let Some(max_age) = res_cc.max_age {
            return secs(max_age);
        }

        if let Some(expires) = self.expires {
            let served = self.served_date.unwrap_or(self.res.received_response_at());
            return expires.duration_since(served).unwrap_or_default();
        }

        // heuristic of a tenth of the document's age at serving time. uris with query are excluded.
        if let Some(last_modified) = self.last_modified {
            if self.res.request().uri().query().is_none() {
                let served = self.served_date.unwrap_or(self.res.sent_request_at());
                return served.duration_since(last_modified).unwrap_or_default() / 10;
            }
        }

        Duration::ZERO
    }

    /// current age of response.
    fn age(&self) -> Duration {
        let received = self.res.received_response_at();
        let sent = self.res.sent_request_at();

        let apparent = self
            .served_date
            .map(|served| received.duration_since(served).unwrap_or_default())
            .unwrap_or_default();
        let received_age = match self.age_seconds {
            Some(age) => apparent.max(Duration::from_secs(age)),
            None => apparent,
        };
        let response_duration = received.duration_since(sent).unwrap_or_default();
        let resident_duration = self.now.duration_since(received).unwrap_or_default();

        received_age + response_duration + resident_duration
    }
}

fn has_conditions(req: &Request) -> bool {
    req.headers().contains_key(IF_MODIFIED_SINCE) || req.headers().contains_key(IF_NONE_MATCH)
}

fn secs(s: u32) -> Duration {
    Duration::from_secs(s as u64)
}
