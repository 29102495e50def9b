//! bridge between a call and the connections carrying its exchanges.

use core::{future::Future, pin::pin};

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    sync::Notify,
    time::{Instant, sleep_until},
};
use tracing::{debug, trace};

use crate::{
    client::Client,
    connection::Connection,
    error::{Error, TimeoutError},
    events::{CallId, EventListener},
    exchange::{Exchange, ExchangeFinder},
    pool::ConnectionPool,
    request::{Request, same_connection},
    resolver::DnsDyn,
    response::Response,
    timeout::{Select, SelectOutput, Timeout},
};

/// io phase guarded by its own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Resolve,
    Connect,
    Write,
    Read,
}

impl Phase {
    fn timeout_error(self) -> TimeoutError {
        match self {
            Self::Resolve => TimeoutError::Resolve,
            Self::Connect => TimeoutError::Connect,
            Self::Write => TimeoutError::Write,
            Self::Read => TimeoutError::Read,
        }
    }
}

pub(crate) struct Transmitter {
    client: Client,
    call: CallId,
    canceled: AtomicBool,
    cancel_notify: Notify,
    state: Mutex<TxState>,
}

#[derive(Default)]
struct TxState {
    deadline: Option<Instant>,
    /// taken out while a connection is being looked up.
    finder: Option<ExchangeFinder>,
    /// connection of the latest exchange.
    connection: Option<Arc<Connection>>,
    no_more_exchanges: bool,
}

impl Transmitter {
    pub(crate) fn new(client: Client, call: CallId) -> Self {
        Self {
            client,
            call,
            canceled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            state: Mutex::new(TxState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn call_id(&self) -> CallId {
        self.call
    }

    pub(crate) fn events(&self) -> &dyn EventListener {
        &*self.client.inner.events
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.client.inner.pool
    }

    /// start the call's deadline. it spans every retry and follow up of the call.
    pub(crate) fn call_start(&self, req: &Request) {
        let deadline = self.client.inner.timeouts.call_timeout.map(|dur| Instant::now() + dur);
        self.state().deadline = deadline;
        self.events().call_start(self.call, req);
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.state().deadline
    }

    pub(crate) fn cancel(&self) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(target: "call", "cancel call {}", self.call.as_u64());
        // an aborted http/1.1 exchange leaves its io in unknown state. multiplexed connections only
        // lose the stream.
        if let Some(ref conn) = self.state().connection {
            if !conn.is_multiplexed() {
                conn.no_new_streams();
            }
        }
        self.cancel_notify.notify_waiters();
        self.events().canceled(self.call);
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    async fn canceled(&self) {
        loop {
            // register interest before checking flag so a concurrent cancel is never missed.
            let notified = self.cancel_notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }

    /// fail fast when call is canceled or its deadline has passed.
    pub(crate) fn check_live(&self) -> Result<(), Error> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        match self.deadline() {
            Some(deadline) if deadline <= Instant::now() => Err(TimeoutError::Call.into()),
            _ => Ok(()),
        }
    }

    /// race io future against cancellation, the phase timeout and the call deadline.
    pub(crate) async fn guard<F, T, E>(&self, phase: Phase, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, E>>,
        Error: From<E>,
    {
        self.check_live()?;

        let timeouts = &self.client.inner.timeouts;
        let dur = match phase {
            Phase::Resolve => timeouts.resolve_timeout,
            Phase::Connect => timeouts.connect_timeout,
            Phase::Write => timeouts.write_timeout,
            Phase::Read => timeouts.read_timeout,
        };

        let phase_deadline = Instant::now() + dur;
        let (deadline, err) = match self.deadline() {
            Some(call) if call <= phase_deadline => (call, TimeoutError::Call),
            _ => (phase_deadline, phase.timeout_error()),
        };

        let mut timer = pin!(sleep_until(deadline));

        match fut.select(self.canceled()).timeout(timer.as_mut()).await {
            Ok(SelectOutput::A(res)) => res.map_err(Error::from),
            Ok(SelectOutput::B(_)) => Err(Error::Canceled),
            Err(_) => {
                trace!(target: "call", "{phase:?} phase of call {} timed out", self.call.as_u64());
                Err(err.into())
            }
        }
    }

    /// resolve host of a route with dns events emitted.
    pub(crate) async fn resolve(&self, dns: &dyn DnsDyn, host: String, port: u16) -> Result<Vec<SocketAddr>, Error> {
        self.events().dns_start(self.call, &host);
        let addrs = self.guard(Phase::Resolve, dns.lookup_dyn(&host, port)).await?;
        self.events().dns_end(self.call, &host, &addrs);
        Ok(addrs)
    }

    /// get ready to find a connection for request. the current exchange finder and its route
    /// progress is kept when request targets the same origin and routes remain.
    pub(crate) fn prepare_to_connect(&self, req: &Request) -> Result<(), Error> {
        let mut state = self.state();

        if let Some(ref finder) = state.finder {
            if same_connection(finder.address().uri(), req.uri()) && finder.has_route_to_try(state.connection.as_ref()) {
                return Ok(());
            }
        }

        let address = self.client.address_for(req.uri())?;
        state.finder = Some(ExchangeFinder::new(address));
        Ok(())
    }

    /// find a healthy connection and allocate an exchange on it.
    pub(crate) async fn new_exchange(&self) -> Result<Exchange, Error> {
        let (mut finder, last) = {
            let mut state = self.state();
            if state.no_more_exchanges {
                return Err(Error::Canceled);
            }
            let finder = state
                .finder
                .take()
                .ok_or(crate::error::ChainError::MissingConnection)?;
            (finder, state.connection.clone())
        };

        let res = finder.find(self, last.as_ref()).await;

        let mut state = self.state();
        state.finder = Some(finder);
        let conn = res?;
        state.connection = Some(conn.clone());
        drop(state);

        self.events().connection_acquired(self.call, &conn);
        Ok(Exchange::new(conn, self.pool().clone(), self.client.inner.events.clone(), self.call))
    }

    /// exchange failed. record the failure on connection and finder before releasing it.
    pub(crate) fn exchange_failed(&self, exchange: Exchange, err: &Error) {
        exchange.connection().track_failure(err, self.pool().route_database());
        if let Some(ref mut finder) = self.state().finder {
            finder.track_failure();
        }
        exchange.release();
    }

    /// true when a stream failure was observed and another route can be tried.
    pub(crate) fn can_retry(&self) -> bool {
        let state = self.state();
        state
            .finder
            .as_ref()
            .is_some_and(|f| f.has_stream_failure() && f.has_route_to_try(state.connection.as_ref()))
    }

    /// call is done with network. emit the terminal event of the call.
    pub(crate) fn no_more_exchanges(&self, res: Result<&Response, &Error>) {
        {
            let mut state = self.state();
            if state.no_more_exchanges {
                return;
            }
            state.no_more_exchanges = true;
            state.finder = None;
            state.connection = None;
        }

        match res {
            Ok(_) => self.events().call_end(self.call),
            Err(e) => self.events().call_failed(self.call, e),
        }
    }
}
