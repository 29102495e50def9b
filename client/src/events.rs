use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use http::{HeaderMap, StatusCode};

use crate::{
    address::Protocol, connection::Connection, error::Error, proxy::Proxy, request::Request, route::Route,
};

/// unique id of a call. a cloned call gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    pub(crate) fn next() -> Self {
        static ID: AtomicU64 = AtomicU64::new(0);
        Self(ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Lifecycle callbacks of calls.
///
/// Callbacks are invoked inline on the task driving the call. Implementors must return fast and
/// must not block on io. Every method has a no-op default.
#[allow(unused_variables)]
pub trait EventListener: Send + Sync {
    fn call_start(&self, call: CallId, req: &Request) {}

    fn call_end(&self, call: CallId) {}

    fn call_failed(&self, call: CallId, err: &Error) {}

    fn canceled(&self, call: CallId) {}

    fn dns_start(&self, call: CallId, host: &str) {}

    fn dns_end(&self, call: CallId, host: &str, addrs: &[SocketAddr]) {}

    fn connect_start(&self, call: CallId, addr: SocketAddr, proxy: &Proxy) {}

    fn secure_connect_start(&self, call: CallId) {}

    fn secure_connect_end(&self, call: CallId, protocol: Protocol) {}

    fn connect_end(&self, call: CallId, route: &Route, protocol: Protocol) {}

    fn connect_failed(&self, call: CallId, route: &Route, err: &Error) {}

    fn connection_acquired(&self, call: CallId, conn: &Connection) {}

    fn connection_released(&self, call: CallId, conn: &Connection) {}

    fn request_headers_end(&self, call: CallId, req: &Request) {}

    fn request_body_end(&self, call: CallId, bytes: u64) {}

    fn response_headers_end(&self, call: CallId, status: StatusCode, headers: &HeaderMap) {}

    fn response_body_end(&self, call: CallId, bytes: u64) {}
}

/// default listener ignoring every event.
pub struct NoEvents;

impl EventListener for NoEvents {}
