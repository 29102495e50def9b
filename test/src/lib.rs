//! scriptable http/1.1 server for integration tests of tandem-client.
//!
//! Responses are served in the order they are enqueued. When the queue is empty the default
//! response is served. Every request is recorded together with the index of the connection it
//! arrived on so connection reuse can be observed.

use std::{
    collections::VecDeque,
    error, io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Notify,
    task::JoinHandle,
};

pub type Error = Box<dyn error::Error + Send + Sync>;

/// what server does with connection around a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPolicy {
    /// keep connection open for next request.
    KeepOpen,
    /// close connection after writing response without announcing it.
    CloseAfter,
    /// close connection after reading request without writing anything.
    DisconnectAtStart,
    /// write response head and part of body then hang.
    StallBody,
    /// read request and never answer.
    NoResponse,
}

/// scripted response of [TestServer].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    chunked: bool,
    delay: Option<Duration>,
    policy: SocketPolicy,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new(200)
    }
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            chunked: false,
            delay: None,
            policy: SocketPolicy::KeepOpen,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// send body with chunked transfer coding.
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// wait before writing response.
    pub fn delay(mut self, dur: Duration) -> Self {
        self.delay = Some(dur);
        self
    }

    pub fn policy(mut self, policy: SocketPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// redirect response pointing at location.
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self::new(status).header("location", location)
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    fn encode_head(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status)).as_bytes());
        for (name, value) in &self.headers {
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if self.chunked {
            buf.extend_from_slice(b"transfer-encoding: chunked\r\n");
        } else if !self.has_header("content-length") && !matches!(self.status, 100..=199 | 204 | 304) {
            buf.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        if self.chunked {
            if !self.body.is_empty() {
                buf.extend_from_slice(format!("{:x}\r\n", self.body.len()).as_bytes());
                buf.extend_from_slice(&self.body);
                buf.extend_from_slice(b"\r\n");
            }
            buf.extend_from_slice(b"0\r\n\r\n");
        } else {
            buf.extend_from_slice(&self.body);
        }
    }
}

/// request as received by [TestServer].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// zero based index of the connection request arrived on.
    pub connection: usize,
    /// zero based index of request on its connection.
    pub sequence: usize,
}

impl RecordedRequest {
    /// first value of header with given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct State {
    queue: Mutex<VecDeque<MockResponse>>,
    default: Mutex<MockResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
    connections: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    recorded: Notify,
}

/// request being answered. counted from arrival until its response is written or abandoned.
struct Active<'a>(&'a State);

impl<'a> Active<'a> {
    fn enter(state: &'a State) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        state.peak.fetch_max(now, Ordering::AcqRel);
        Self(state)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// http/1.1 server bound to a random local port. server is stopped on drop.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// bind server to `127.0.0.1:0` and start accepting connections on current runtime.
    pub async fn start() -> Result<Self, Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(State {
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(MockResponse::default()),
            requests: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            recorded: Notify::new(),
        });

        let handle = tokio::spawn(accept(listener, state.clone()));

        Ok(Self { addr, state, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ip_port_string(&self) -> String {
        format!("{}:{}", self.addr.ip(), self.addr.port())
    }

    /// absolute url of path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.ip_port_string())
    }

    pub fn enqueue(&self, res: MockResponse) {
        lock(&self.state.queue).push_back(res);
    }

    /// response served when queue is empty.
    pub fn set_default(&self, res: MockResponse) {
        *lock(&self.state.default) = res;
    }

    /// number of accepted connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Acquire)
    }

    /// highest number of requests answered at the same time so far.
    pub fn max_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::Acquire)
    }

    pub fn request_count(&self) -> usize {
        lock(&self.state.requests).len()
    }

    /// every request received so far in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }

    /// wait until at least `n` requests are received.
    pub async fn wait_for_requests(&self, n: usize) {
        loop {
            let notified = self.state.recorded.notified();
            if self.request_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept(listener: TcpListener, state: Arc<State>) {
    let mut conns = Vec::new();
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            break;
        };
        let index = state.connections.fetch_add(1, Ordering::AcqRel);
        conns.push(AbortOnDrop(tokio::spawn(serve(stream, index, state.clone()))));
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn serve(mut stream: TcpStream, connection: usize, state: Arc<State>) {
    let mut buf = BytesMut::new();
    let mut sequence = 0;

    loop {
        let (method, path, headers) = match read_head(&mut stream, &mut buf).await {
            Ok(Some(head)) => head,
            _ => return,
        };

        let Ok(body) = read_body(&mut stream, &mut buf, &headers).await else {
            return;
        };

        let _active = Active::enter(&state);

        let res = lock(&state.queue)
            .pop_front()
            .unwrap_or_else(|| lock(&state.default).clone());

        lock(&state.requests).push(RecordedRequest {
            method,
            path,
            headers,
            body,
            connection,
            sequence,
        });
        state.recorded.notify_waiters();
        sequence += 1;

        if let Some(delay) = res.delay {
            tokio::time::sleep(delay).await;
        }

        let mut out = Vec::new();
        match res.policy {
            SocketPolicy::DisconnectAtStart => return,
            SocketPolicy::NoResponse => {
                core::future::pending::<()>().await;
            }
            SocketPolicy::StallBody => {
                res.encode_head(&mut out);
                let partial = res.body.len() / 2;
                out.extend_from_slice(&res.body[..partial]);
                if stream.write_all(&out).await.is_err() {
                    return;
                }
                core::future::pending::<()>().await;
            }
            SocketPolicy::KeepOpen | SocketPolicy::CloseAfter => {
                res.encode_head(&mut out);
                res.encode_body(&mut out);
                if stream.write_all(&out).await.is_err() {
                    return;
                }
                let closes = res.policy == SocketPolicy::CloseAfter
                    || res
                        .headers
                        .iter()
                        .any(|(k, v)| k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"));
                if closes {
                    let _ = stream.shutdown().await;
                    return;
                }
            }
        }
    }
}

type Head = (String, String, Vec<(String, String)>);

/// read request head. Ok(None) is a clean close between requests.
async fn read_head(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<Option<Head>> {
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(buf) {
            Ok(httparse::Status::Complete(len)) => {
                let head = (
                    req.method.unwrap_or_default().to_owned(),
                    req.path.unwrap_or_default().to_owned(),
                    req.headers
                        .iter()
                        .map(|h| (h.name.to_ascii_lowercase(), String::from_utf8_lossy(h.value).into_owned()))
                        .collect(),
                );
                buf.advance(len);
                return Ok(Some(head));
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }

        if stream.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(io::ErrorKind::UnexpectedEof.into())
            };
        }
    }
}

async fn read_body(stream: &mut TcpStream, buf: &mut BytesMut, headers: &[(String, String)]) -> io::Result<Bytes> {
    let header = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        let mut body = BytesMut::new();
        loop {
            let line = read_line(stream, buf).await?;
            let size = line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size, 16).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if size == 0 {
                // trailers end with an empty line.
                while !read_line(stream, buf).await?.is_empty() {}
                return Ok(body.freeze());
            }
            fill(stream, buf, size + 2).await?;
            body.extend_from_slice(&buf[..size]);
            buf.advance(size + 2);
        }
    }

    let len = header("content-length").and_then(|v| v.trim().parse().ok()).unwrap_or(0);
    fill(stream, buf, len).await?;
    Ok(buf.split_to(len).freeze())
}

async fn fill(stream: &mut TcpStream, buf: &mut BytesMut, len: usize) -> io::Result<()> {
    while buf.len() < len {
        if stream.read_buf(buf).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
    Ok(())
}

async fn read_line(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<String> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
            buf.advance(pos + 2);
            return Ok(line);
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        401 => "Unauthorized",
        404 => "Not Found",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
