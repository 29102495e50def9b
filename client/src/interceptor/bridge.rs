use http::{
    HeaderValue, Method,
    header::{
        ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, COOKIE, HOST, RANGE, SET_COOKIE, TRANSFER_ENCODING, USER_AGENT,
    },
};

use crate::{
    chain::{Chain, Interceptor},
    error::Error,
    request::{Request, Target},
    response::Response,
};

/// turn application request into network request and network response back into application
/// response. framing, host, cookie and user agent headers are filled here.
pub(crate) struct Bridge;

impl Interceptor for Bridge {
    async fn intercept(&self, chain: Chain<'_>) -> Result<Response, Error> {
        let client = chain.client();
        let user_req = chain.request_cloned();
        let mut req = chain.request_cloned();

        frame_body(&mut req);

        let headers = req.headers_mut();

        if !headers.contains_key(HOST) {
            let target = Target::try_from_uri(user_req.uri())?;
            headers.insert(HOST, HeaderValue::try_from(target.host_header()).map_err(http::Error::from)?);
        }

        if !headers.contains_key(CONNECTION) {
            headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        }

        // transparent decoding is only requested when caller has no say in encoding and no byte
        // range is asked for.
        let transparent_gzip = cfg!(feature = "compress")
            && !headers.contains_key(ACCEPT_ENCODING)
            && !headers.contains_key(RANGE);
        if transparent_gzip {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let cookies = client.inner.cookie_jar.load_for_request(user_req.uri());
        if !cookies.is_empty() {
            let cookie = cookies.join("; ");
            headers.insert(COOKIE, HeaderValue::try_from(cookie).map_err(http::Error::from)?);
        }

        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, client.inner.user_agent.clone());
        }

        let res = chain.proceed(req).await?;

        let set_cookies = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect::<Vec<_>>();
        if !set_cookies.is_empty() {
            client.inner.cookie_jar.save_from_response(user_req.uri(), set_cookies);
        }

        let res = res.with_request(user_req);

        #[cfg(feature = "compress")]
        let res = if transparent_gzip {
            decode::decode(res, client.inner.max_response_body)?
        } else {
            res
        };

        Ok(res)
    }
}

/// set framing headers of request body. streaming body is sent chunked.
fn frame_body(req: &mut Request) {
    let length = req.body().content_length();
    let needs_length = matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH);
    let headers = req.headers_mut();

    match length {
        Some(0) if !needs_length => {
            headers.remove(TRANSFER_ENCODING);
        }
        Some(len) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            headers.remove(TRANSFER_ENCODING);
        }
        None => {
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            headers.remove(CONTENT_LENGTH);
        }
    }
}

#[cfg(feature = "compress")]
mod decode {
    use std::io::Read;

    use bytes::Bytes;
    use flate2::read::{GzDecoder, ZlibDecoder};
    use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};

    use crate::{cache::has_body, error::Error, response::Response};

    /// decode gzip or deflate encoded body in place. encoding headers are removed after decoding.
    pub(super) fn decode(mut res: Response, limit: usize) -> Result<Response, Error> {
        if !has_body(res.request().method(), &res) || res.body().is_empty() {
            return Ok(res);
        }

        let Some(encoding) = res.headers().get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()) else {
            return Ok(res);
        };

        let body = match encoding.trim().to_ascii_lowercase().as_str() {
            "gzip" => read_limited(GzDecoder::new(res.body().as_ref()), limit)?,
            "deflate" => read_limited(ZlibDecoder::new(res.body().as_ref()), limit)?,
            _ => return Ok(res),
        };

        res.headers_mut().remove(CONTENT_ENCODING);
        res.headers_mut().remove(CONTENT_LENGTH);
        res.replace_body(Bytes::from(body));

        Ok(res)
    }

    fn read_limited(reader: impl Read, limit: usize) -> Result<Vec<u8>, Error> {
        let mut decoded = Vec::new();
        // one byte past limit tells an exact fit from an overflow.
        reader
            .take(limit as u64 + 1)
            .read_to_end(&mut decoded)
            .map_err(|e| Error::Std(Box::new(e)))?;
        if decoded.len() > limit {
            return Err(Error::Std(format!("decoded response body exceeds limit of {limit} bytes").into()));
        }
        Ok(decoded)
    }
}
