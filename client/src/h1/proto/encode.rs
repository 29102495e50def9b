use bytes::{BufMut, BytesMut};
use http::{HeaderMap, Method, Uri};

/// form of request target in request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestTarget {
    /// `/path?query`. request sent to origin server directly.
    Origin,
    /// `http://host:port/path?query`. plain http request sent through a proxy.
    Absolute,
    /// `host:port`. CONNECT request opening a proxy tunnel.
    Authority,
}

/// encode request line and headers. headers are written as is.
///
/// `length` is written as content-length after headers. caller passes it only when the header map
/// carries no framing header of its own.
pub(crate) fn encode_head(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    target: RequestTarget,
    length: Option<u64>,
    buf: &mut BytesMut,
) {
    let target = match target {
        RequestTarget::Origin => uri.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_owned(),
        RequestTarget::Absolute => uri.to_string(),
        RequestTarget::Authority => uri.authority().map(|a| a.as_str()).unwrap_or_default().to_owned(),
    };

    // encode line of "Method Target Version"
    let method = method.as_str().as_bytes();
    buf.reserve(method.len() + 1 + target.len() + 11);
    buf.put_slice(method);
    buf.put_slice(b" ");
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers {
        let name = name.as_str().as_bytes();
        let value = value.as_bytes();
        buf.reserve(name.len() + value.len() + 4);
        buf.put_slice(name);
        buf.put_slice(b": ");
        buf.put_slice(value);
        buf.put_slice(b"\r\n");
    }

    if let Some(length) = length {
        let mut buffer = itoa::Buffer::new();
        let buffer = buffer.format(length).as_bytes();

        buf.reserve(buffer.len() + 18);
        buf.put_slice(b"content-length: ");
        buf.put_slice(buffer);
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
}
