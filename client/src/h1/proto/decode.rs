use bytes::BytesMut;
use http::{
    HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Version,
    header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING},
};
use httparse::{EMPTY_HEADER, Status};

use crate::h1::Error;

use super::codec::TransferCoding;

const HEADER_LIMIT: usize = 128;

/// max bytes of response head.
pub(crate) const MAX_HEAD_SIZE: usize = 1024 * 64;

/// decoded response head.
pub(crate) struct Head {
    pub(crate) res: Response<()>,
    pub(crate) decoder: TransferCoding,
    /// connection can carry another exchange after this response.
    pub(crate) keep_alive: bool,
}

/// Decode response head from buffer. `Ok(None)` means more bytes are needed.
///
/// `method` is the method of request the response answers. It decides if the response carries body.
pub(crate) fn decode_head(buf: &mut BytesMut, method: &Method) -> Result<Option<Head>, Error> {
    let mut headers = [EMPTY_HEADER; HEADER_LIMIT];

    let mut parsed = httparse::Response::new(&mut headers);

    let len = match parsed.parse(buf.as_ref())? {
        Status::Complete(len) => len,
        Status::Partial if buf.len() >= MAX_HEAD_SIZE => return Err(Error::HeadTooLarge),
        Status::Partial => return Ok(None),
    };

    let version = if parsed.version == Some(1) {
        Version::HTTP_11
    } else {
        Version::HTTP_10
    };

    let status = parsed
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(Error::InvalidStatus)?;

    let mut map = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| Error::Parse(httparse::Error::HeaderName))?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| Error::Parse(httparse::Error::HeaderValue))?;
        map.append(name, value);
    }

    let _ = buf.split_to(len);

    let mut keep_alive = version == Version::HTTP_11;
    for value in map.get_all(CONNECTION) {
        for token in value.to_str().unwrap_or_default().split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("close") {
                keep_alive = false;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
    }

    let decoder = if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || (*method == Method::CONNECT && status.is_success())
    {
        TransferCoding::length(0)
    } else if is_chunked(&map) {
        TransferCoding::decode_chunked()
    } else if let Some(value) = map.get(CONTENT_LENGTH) {
        let len = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(Error::InvalidContentLength)?;
        TransferCoding::length(len)
    } else {
        TransferCoding::Eof
    };

    // body delimited by close can not be followed by another exchange.
    if decoder.is_eof() {
        keep_alive = false;
    }

    let mut res = Response::new(());
    *res.version_mut() = version;
    *res.status_mut() = status;
    *res.headers_mut() = map;

    Ok(Some(Head { res, decoder, keep_alive }))
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .next_back()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("chunked"))
}
