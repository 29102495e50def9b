use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use tokio::{
    io::{AsyncRead, ReadBuf},
    time::Instant,
};

use crate::{
    address::{Address, Protocol},
    error::Error,
    proxy::Proxy,
    route::{Route, RouteDatabase},
    tls::stream::Io,
};

/// Established transport bound to a [Route].
///
/// http/1.1 connection carries one exchange at a time. http/2 connection carries up to the peer's
/// max concurrent streams.
pub struct Connection {
    id: u64,
    route: Route,
    protocol: Protocol,
    created_at: Instant,
    transport: Transport,
    state: Mutex<ConnState>,
}

pub(crate) enum Transport {
    /// io slot is empty while an exchange owns the io.
    H1(Mutex<Option<Box<dyn Io>>>),
    #[cfg(feature = "http2")]
    H2(crate::h2::Connection),
}

struct ConnState {
    allocations: usize,
    idle_since: Instant,
    no_new_streams: bool,
    success_count: u32,
    route_failure_count: u32,
    refused_streams: u32,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(route: Route, protocol: Protocol, transport: Transport) -> Self {
        static ID: AtomicU64 = AtomicU64::new(0);

        let now = Instant::now();
        Self {
            id: ID.fetch_add(1, Ordering::Relaxed),
            route,
            protocol,
            created_at: now,
            transport,
            state: Mutex::new(ConnState {
                allocations: 0,
                idle_since: now,
                no_new_streams: false,
                success_count: 0,
                route_failure_count: 0,
                refused_streams: 0,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_multiplexed(&self) -> bool {
        self.protocol.is_multiplexed()
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    fn state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// max number of concurrent exchanges.
    pub(crate) fn allocation_limit(&self) -> usize {
        match self.transport {
            Transport::H1(_) => 1,
            #[cfg(feature = "http2")]
            Transport::H2(ref conn) => conn.max_concurrent_streams(),
        }
    }

    /// allocate a stream on connection when it can carry an exchange of given address.
    /// `routes` enables http/2 connection coalescing of different hosts sharing the same socket address.
    pub(crate) fn try_acquire(&self, address: &Address, routes: Option<&[Route]>) -> bool {
        let limit = self.allocation_limit();
        let mut state = self.state();
        if state.allocations >= limit || state.no_new_streams || !self.is_eligible(address, routes) {
            return false;
        }
        state.allocations += 1;
        true
    }

    /// allocate the first exchange of a freshly established connection.
    pub(crate) fn allocate(&self) {
        self.state().allocations += 1;
    }

    fn is_eligible(&self, address: &Address, routes: Option<&[Route]>) -> bool {
        let own = self.route.address();

        if !own.equals_non_host(address) || own.scheme() != address.scheme() || own.port() != address.port() {
            return false;
        }

        if own.host() == address.host() {
            return true;
        }

        // coalescing requires certificate of the connection to cover the new host. the tls layer
        // exposes no certificate, so only clear text http/2 is coalesced.
        if !self.is_multiplexed() || address.is_tls() || !self.route.proxy().is_direct() {
            return false;
        }

        routes.is_some_and(|routes| {
            routes
                .iter()
                .any(|r| r.proxy().is_direct() && r.socket_addr() == self.route.socket_addr())
        })
    }

    /// release an allocation. return true when connection becomes idle.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.state();
        state.allocations = state.allocations.saturating_sub(1);
        if state.allocations == 0 {
            state.idle_since = Instant::now();
            true
        } else {
            false
        }
    }

    /// instant connection became idle. None when connection is in use.
    pub(crate) fn idle_since(&self) -> Option<Instant> {
        let state = self.state();
        (state.allocations == 0).then_some(state.idle_since)
    }

    /// prevent connection from carrying new exchanges. it's closed once released.
    pub(crate) fn no_new_streams(&self) {
        self.state().no_new_streams = true;
    }

    pub(crate) fn is_no_new_streams(&self) -> bool {
        self.state().no_new_streams
    }

    pub(crate) fn success_count(&self) -> u32 {
        self.state().success_count
    }

    pub(crate) fn route_failure_count(&self) -> u32 {
        self.state().route_failure_count
    }

    pub(crate) fn track_success(&self) {
        let mut state = self.state();
        state.success_count += 1;
        state.refused_streams = 0;
    }

    /// record an exchange failure. a connection never succeeded marks its route failed.
    pub(crate) fn track_failure(&self, err: &Error, db: &RouteDatabase) {
        let mut state = self.state();

        #[cfg(feature = "http2")]
        if let Error::H2(ref e) = *err {
            if e.is_refused_stream() {
                state.refused_streams += 1;
                // one refused stream is retried on the same connection. the second one gives up on it.
                if state.refused_streams > 1 {
                    state.no_new_streams = true;
                    state.route_failure_count += 1;
                }
                return;
            }
            if e.is_stream_level() {
                return;
            }
        }

        if matches!(*err, Error::Canceled) && self.is_multiplexed() {
            return;
        }

        state.no_new_streams = true;
        if state.success_count == 0 {
            db.failed(&self.route);
            state.route_failure_count += 1;
        }
    }

    /// true when connection can still carry exchanges. http/1.1 io is probed with a non blocking read.
    pub(crate) fn is_healthy(&self) -> bool {
        if self.is_no_new_streams() {
            return false;
        }

        match self.transport {
            Transport::H1(ref io) => {
                let mut io = io.lock().unwrap_or_else(PoisonError::into_inner);
                match *io {
                    // an exchange owns the io.
                    None => true,
                    Some(ref mut io) => {
                        let mut buf = [0; 1];
                        let mut buf = ReadBuf::new(&mut buf);
                        let mut cx = Context::from_waker(Waker::noop());
                        // pending read is the only healthy state of an idle connection.
                        // eof, error or unsolicited bytes all render it unusable.
                        matches!(Pin::new(&mut **io).poll_read(&mut cx, &mut buf), Poll::Pending)
                    }
                }
            }
            #[cfg(feature = "http2")]
            Transport::H2(ref conn) => conn.is_open(),
        }
    }

    /// take io out of http/1.1 connection for an exchange.
    pub(crate) fn take_io(&self) -> Option<Box<dyn Io>> {
        match self.transport {
            Transport::H1(ref io) => io.lock().unwrap_or_else(PoisonError::into_inner).take(),
            #[cfg(feature = "http2")]
            Transport::H2(_) => None,
        }
    }

    /// return io after a complete exchange leaving the connection reusable.
    pub(crate) fn put_io(&self, io: Box<dyn Io>) {
        if let Transport::H1(ref slot) = self.transport {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(io);
        }
    }

    /// close connection. in flight http/2 streams are left to finish.
    pub(crate) fn shutdown(&self) {
        self.no_new_streams();
        match self.transport {
            Transport::H1(ref io) => drop(io.lock().unwrap_or_else(PoisonError::into_inner).take()),
            #[cfg(feature = "http2")]
            Transport::H2(ref conn) => conn.close(),
        }
    }

    pub(crate) fn is_proxied(&self) -> bool {
        !matches!(self.route.proxy(), Proxy::Direct)
    }
}
