//! http/2 transport on top of h2 crate. framing and flow control are delegated to h2.

mod error;

pub use self::error::Error;

use core::{cmp, future::poll_fn};

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::{Bytes, BytesMut};
use h2::{
    RecvStream, SendStream,
    client::{self, ResponseFuture, SendRequest},
};
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING, UPGRADE};
use tokio::sync::Notify;
use tracing::debug;

use crate::{
    body::{Body, next_chunk},
    error::Error as CallError,
    request::Request,
    timeout::{Select, SelectOutput},
    tls::stream::Io,
    transmitter::{Phase, Transmitter},
};

/// handle of a http/2 connection. the connection itself is driven by a spawned task.
pub(crate) struct Connection {
    send: SendRequest<Bytes>,
    open: Arc<AtomicBool>,
    close: Arc<Notify>,
}

impl Connection {
    pub(crate) async fn handshake(io: Box<dyn Io>) -> Result<Self, Error> {
        let mut builder = client::Builder::new();
        builder.enable_push(false);

        let (send, conn) = builder.handshake::<_, Bytes>(io).await?;

        let open = Arc::new(AtomicBool::new(true));
        let close = Arc::new(Notify::new());

        {
            let open = open.clone();
            let close = close.clone();
            tokio::spawn(async move {
                if let SelectOutput::A(Err(e)) = conn.select(close.notified()).await {
                    debug!(target: "h2_client", "connection closed with error: {e}");
                }
                open.store(false, Ordering::Release);
            });
        }

        Ok(Self { send, open, close })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// tear down connection task and close the io.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.close.notify_one();
    }

    pub(crate) fn max_concurrent_streams(&self) -> usize {
        cmp::max(self.send.current_max_send_streams(), 1)
    }

    /// open a stream for request head. body is sent with returned [SendStream].
    pub(crate) async fn send_head(
        &self,
        req: &Request,
        end_of_stream: bool,
    ) -> Result<(ResponseFuture, SendStream<Bytes>), Error> {
        let mut head = http::Request::new(());
        *head.method_mut() = req.method().clone();
        *head.uri_mut() = req.uri().clone();
        *head.version_mut() = http::Version::HTTP_2;
        *head.headers_mut() = req.headers().clone();

        // omit HTTP/1.x only headers. host is carried by :authority pseudo header.
        let headers = head.headers_mut();
        headers.remove(CONNECTION);
        headers.remove(TRANSFER_ENCODING);
        headers.remove(UPGRADE);
        headers.remove(HOST);
        headers.remove("keep-alive");
        headers.remove("proxy-connection");

        let mut send = self.send.clone().ready().await?;
        send.send_request(head, end_of_stream).map_err(Into::into)
    }
}

/// send one chunk of request body respecting flow control capacity.
pub(crate) async fn send_data(stream: &mut SendStream<Bytes>, mut chunk: Bytes) -> Result<(), Error> {
    while !chunk.is_empty() {
        let len = chunk.len();

        stream.reserve_capacity(len);

        let cap = poll_fn(|cx| stream.poll_capacity(cx))
            .await
            .ok_or(Error::StreamClosed)??;

        // Split chuck to writeable size and send to server.
        let bytes = chunk.split_to(cmp::min(cap, len));

        stream.send_data(bytes, false)?;
    }

    Ok(())
}

pub(crate) fn send_eof(stream: &mut SendStream<Bytes>) -> Result<(), Error> {
    stream.send_data(Bytes::new(), true).map_err(Into::into)
}

/// receive next data frame and release its flow control capacity.
pub(crate) async fn recv_data(body: &mut RecvStream) -> Option<Result<Bytes, Error>> {
    let res = body.data().await?;
    Some(res.map_err(Error::from).and_then(|bytes| {
        body.flow_control().release_capacity(bytes.len())?;
        Ok(bytes)
    }))
}

/// send request on a new stream and collect full response.
pub(crate) async fn send(
    tx: &Transmitter,
    conn: &Connection,
    req: &Request,
    body_limit: usize,
) -> Result<http::Response<Bytes>, CallError> {
    let end_of_stream = matches!(req.body(), Body::Empty);
    let (fut, mut stream) = tx.guard(Phase::Write, conn.send_head(req, end_of_stream)).await?;

    let events = tx.events();
    events.request_headers_end(tx.call_id(), req);

    let written = match *req.body() {
        Body::Empty => 0,
        Body::Bytes(ref bytes) => {
            tx.guard(Phase::Write, send_data(&mut stream, bytes.clone())).await?;
            send_eof(&mut stream)?;
            bytes.len() as u64
        }
        Body::Stream(ref body) => {
            let mut body = body.take().ok_or(crate::error::FollowUpError::UnrepeatableBody)?;
            let mut written = 0;
            while let Some(chunk) = tx.guard(Phase::Write, next_chunk(&mut body)).await? {
                written += chunk.len() as u64;
                tx.guard(Phase::Write, send_data(&mut stream, chunk)).await?;
            }
            send_eof(&mut stream)?;
            written
        }
    };
    events.request_body_end(tx.call_id(), written);

    let res = tx.guard(Phase::Read, fut).await?;
    events.response_headers_end(tx.call_id(), res.status(), res.headers());

    let (parts, mut body) = res.into_parts();
    let mut buf = BytesMut::new();

    while let Some(chunk) = tx.guard(Phase::Read, async { Ok::<_, CallError>(recv_data(&mut body).await) }).await? {
        let chunk = chunk?;
        if buf.len() + chunk.len() > body_limit {
            return Err(CallError::Std(format!("response body exceeds limit of {body_limit} bytes").into()));
        }
        buf.extend_from_slice(&chunk);
    }

    events.response_body_end(tx.call_id(), buf.len() as u64);

    Ok(http::Response::from_parts(parts, buf.freeze()))
}
