use bytes::{Bytes, BytesMut};
use http::{
    Method, StatusCode,
    header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    body::{Body, next_chunk},
    connection::Connection,
    error::{Error, FollowUpError},
    h1::Error as H1Error,
    request::Request,
    tls::stream::Io,
    transmitter::{Phase, Transmitter},
};

use super::{
    codec::{CHUNKED_EOF, TransferCoding, encode_chunk},
    decode::{Head, decode_head},
    encode::{RequestTarget, encode_head},
};

/// Send request and read full response on an http/1.1 connection.
///
/// The io is taken from connection for the duration of exchange and only put back when response is
/// complete and connection can carry another exchange.
pub(crate) async fn send(
    tx: &Transmitter,
    conn: &Connection,
    req: &Request,
    body_limit: usize,
) -> Result<http::Response<Bytes>, Error> {
    let mut io = conn.take_io().ok_or(H1Error::ConnectionClosed)?;

    let target = if conn.is_proxied() && !conn.route().requires_tunnel() {
        RequestTarget::Absolute
    } else {
        RequestTarget::Origin
    };

    let chunked = is_chunked(req);

    let mut buf = BytesMut::new();
    encode_head(req.method(), req.uri(), req.headers(), target, unframed_length(req, chunked), &mut buf);
    write_buf(tx, &mut io, &buf).await?;
    buf.clear();

    let events = tx.events();
    events.request_headers_end(tx.call_id(), req);

    let written = send_body(tx, &mut io, req.body(), chunked, &mut buf).await?;
    events.request_body_end(tx.call_id(), written);

    let head = loop {
        let head = read_head(tx, &mut io, &mut buf, req.method()).await?;
        // interim responses are skipped. upgrade is final.
        if head.res.status().is_informational() && head.res.status() != StatusCode::SWITCHING_PROTOCOLS {
            continue;
        }
        break head;
    };

    events.response_headers_end(tx.call_id(), head.res.status(), head.res.headers());

    let body = read_body(tx, &mut io, &mut buf, head.decoder, body_limit).await?;

    events.response_body_end(tx.call_id(), body.len() as u64);

    if head.keep_alive && buf.is_empty() && !wants_close(req) {
        conn.put_io(io);
    } else {
        conn.no_new_streams();
    }

    Ok(head.res.map(|_| body))
}

async fn send_body(
    tx: &Transmitter,
    io: &mut Box<dyn Io>,
    body: &Body,
    chunked: bool,
    buf: &mut BytesMut,
) -> Result<u64, Error> {
    match *body {
        Body::Empty => Ok(0),
        Body::Bytes(ref bytes) => {
            if chunked {
                encode_chunk(bytes, buf);
                buf.extend_from_slice(CHUNKED_EOF);
                write_buf(tx, io, buf).await?;
                buf.clear();
            } else {
                write_buf(tx, io, bytes).await?;
            }
            Ok(bytes.len() as u64)
        }
        Body::Stream(ref stream) => {
            let mut stream = stream.take().ok_or(FollowUpError::UnrepeatableBody)?;
            let mut written = 0;
            while let Some(chunk) = tx.guard(Phase::Write, next_chunk(&mut stream)).await? {
                written += chunk.len() as u64;
                if chunked {
                    encode_chunk(&chunk, buf);
                    write_buf(tx, io, buf).await?;
                    buf.clear();
                } else {
                    write_buf(tx, io, &chunk).await?;
                }
            }
            if chunked {
                write_buf(tx, io, CHUNKED_EOF).await?;
            }
            Ok(written)
        }
    }
}

pub(crate) async fn write_buf(tx: &Transmitter, io: &mut Box<dyn Io>, buf: &[u8]) -> Result<(), Error> {
    tx.guard(Phase::Write, async {
        io.write_all(buf).await?;
        io.flush().await
    })
    .await
}

/// read until a complete response head is decoded.
pub(crate) async fn read_head(
    tx: &Transmitter,
    io: &mut Box<dyn Io>,
    buf: &mut BytesMut,
    method: &Method,
) -> Result<Head, Error> {
    loop {
        if let Some(head) = decode_head(buf, method)? {
            return Ok(head);
        }
        if tx.guard(Phase::Read, io.read_buf(buf)).await? == 0 {
            return Err(H1Error::ConnectionClosed.into());
        }
    }
}

/// read and decode full response body.
pub(crate) async fn read_body(
    tx: &Transmitter,
    io: &mut Box<dyn Io>,
    buf: &mut BytesMut,
    mut decoder: TransferCoding,
    limit: usize,
) -> Result<Bytes, Error> {
    let mut body = BytesMut::new();

    loop {
        match decoder.decode(buf).map_err(H1Error::Chunked)? {
            Some(bytes) if bytes.is_empty() => return Ok(body.freeze()),
            Some(bytes) => {
                if body.len() + bytes.len() > limit {
                    return Err(H1Error::BodyTooLarge(limit).into());
                }
                body.extend_from_slice(&bytes);
            }
            None => {
                if tx.guard(Phase::Read, io.read_buf(buf)).await? == 0 {
                    decoder.decode_eof().map_err(|_| H1Error::ConnectionClosed)?;
                    return Ok(body.freeze());
                }
            }
        }
    }
}

fn is_chunked(req: &Request) -> bool {
    req.headers()
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("chunked"))
}

// sized body a network interceptor swapped in after framing headers were set.
fn unframed_length(req: &Request, chunked: bool) -> Option<u64> {
    if chunked || req.headers().contains_key(CONTENT_LENGTH) {
        return None;
    }
    req.body().content_length().filter(|len| *len > 0)
}

fn wants_close(req: &Request) -> bool {
    req.headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
}
