use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    address::Address,
    connect,
    connection::Connection,
    error::{Error, RouteError, TimeoutError},
    events::{CallId, EventListener},
    pool::ConnectionPool,
    proxy::Proxy,
    request::same_connection,
    route::{Route, RouteSelector, Selection},
    transmitter::Transmitter,
};

/// Find a connection able to carry the next exchange of a call.
///
/// Lookup order is: the call's latest connection, the pool, the pool again with resolved routes
/// for http/2 coalescing, then a new connection. Freshly established multiplexed connections are
/// deduplicated against the pool so concurrent calls end up sharing one.
pub(crate) struct ExchangeFinder {
    address: Address,
    selector: RouteSelector,
    selection: Option<Selection>,
    next_route_to_try: Option<Route>,
    has_stream_failure: bool,
}

impl ExchangeFinder {
    pub(crate) fn new(address: Address) -> Self {
        Self {
            selector: RouteSelector::new(address.clone()),
            address,
            selection: None,
            next_route_to_try: None,
            has_stream_failure: false,
        }
    }

    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    /// find a healthy connection with one allocation acquired for caller.
    pub(crate) async fn find(&mut self, tx: &Transmitter, last: Option<&Arc<Connection>>) -> Result<Arc<Connection>, Error> {
        loop {
            let (conn, fresh) = match self.find_connection(tx, last).await {
                Ok(res) => res,
                Err(e) => {
                    self.track_failure();
                    return Err(match e {
                        e @ (Error::Canceled | Error::Timeout(TimeoutError::Call) | Error::Route(_)) => e,
                        e => RouteError::new(e).into(),
                    });
                }
            };

            if fresh || conn.is_healthy() {
                return Ok(conn);
            }

            debug!(target: "exchange", "discard unhealthy {conn:?}");
            conn.no_new_streams();
            if conn.release() && tx.pool().connection_became_idle(&conn) {
                conn.shutdown();
            }
        }
    }

    async fn find_connection(
        &mut self,
        tx: &Transmitter,
        last: Option<&Arc<Connection>>,
    ) -> Result<(Arc<Connection>, bool), Error> {
        self.has_stream_failure = false;

        tx.check_live()?;

        if let Some(last) = last {
            if last.try_acquire(&self.address, None) {
                trace!(target: "exchange", "reuse connection of previous exchange {last:?}");
                return Ok((last.clone(), false));
            }
        }

        let pool = tx.pool();

        if let Some(conn) = pool.get(&self.address, None, false) {
            trace!(target: "exchange", "reuse pooled {conn:?}");
            return Ok((conn, false));
        }

        let route = match self.next_route_to_try.take().or_else(|| self.retry_current_route(last)) {
            Some(route) => route,
            None => {
                if !self.selection.as_ref().is_some_and(Selection::has_next) {
                    let dns = self.address.dns.clone();
                    let selection = self
                        .selector
                        .next(pool.route_database(), |host, port| {
                            let dns = dns.clone();
                            async move { tx.resolve(&*dns, host, port).await }
                        })
                        .await?;

                    // resolved routes may open coalescing opportunity on pooled http/2 connection.
                    if let Some(conn) = pool.get(&self.address, Some(selection.routes()), false) {
                        trace!(target: "exchange", "coalesce onto pooled {conn:?}");
                        self.selection = Some(selection);
                        return Ok((conn, false));
                    }

                    self.selection = Some(selection);
                }

                self.selection
                    .as_mut()
                    .and_then(Selection::next)
                    .ok_or_else(|| Error::from(crate::error::ResolveError::new(self.address.host())))?
            }
        };

        let conn = match connect::connect(tx, &route).await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                if !matches!(e, Error::Canceled | Error::Timeout(TimeoutError::Call)) {
                    debug!(target: "exchange", "failed to connect {route:?}: {e}");
                    pool.route_database().failed(&route);
                    if !matches!(route.proxy(), Proxy::Direct) {
                        self.address
                            .proxy_selector
                            .connect_failed(self.address.uri(), route.proxy(), &e);
                    }
                    tx.events().connect_failed(tx.call_id(), &route, &e);
                }
                return Err(e);
            }
        };

        pool.route_database().connected(&route);
        conn.allocate();

        let routes = self.selection.as_ref().map(Selection::routes);
        let pooled = pool.deduplicate(conn.clone(), &self.address, routes);

        if Arc::ptr_eq(&pooled, &conn) {
            Ok((conn, true))
        } else {
            // another call won the race. keep the route for a later attempt.
            trace!(target: "exchange", "close {conn:?} in favor of pooled {pooled:?}");
            conn.shutdown();
            self.next_route_to_try = Some(route);
            Ok((pooled, false))
        }
    }

    /// route of previous connection is retried when it never failed.
    fn retry_current_route(&self, last: Option<&Arc<Connection>>) -> Option<Route> {
        last.filter(|conn| {
            conn.route_failure_count() == 0 && same_connection(conn.route().address().uri(), self.address.uri())
        })
        .map(|conn| conn.route().clone())
    }

    pub(crate) fn track_failure(&mut self) {
        self.has_stream_failure = true;
    }

    pub(crate) fn has_stream_failure(&self) -> bool {
        self.has_stream_failure
    }

    /// true when another route can be attempted.
    pub(crate) fn has_route_to_try(&self, last: Option<&Arc<Connection>>) -> bool {
        self.next_route_to_try.is_some()
            || self.retry_current_route(last).is_some()
            || self.selection.as_ref().is_some_and(Selection::has_next)
            || self.selector.has_next()
    }
}

/// Lease of one allocation on a connection for a single request and response.
///
/// The allocation is given back exactly once, by [Exchange::finish], [Exchange::release] or on drop.
/// An exchange dropped before completion leaves http/1.1 connection in undefined state so it's
/// closed.
pub(crate) struct Exchange {
    conn: Arc<Connection>,
    pool: ConnectionPool,
    events: Arc<dyn EventListener>,
    call: CallId,
    released: bool,
}

impl Exchange {
    pub(crate) fn new(conn: Arc<Connection>, pool: ConnectionPool, events: Arc<dyn EventListener>, call: CallId) -> Self {
        Self {
            conn,
            pool,
            events,
            call,
            released: false,
        }
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// exchange completed with a full response.
    pub(crate) fn finish(mut self) {
        self.conn.track_success();
        self.release_allocation();
    }

    pub(crate) fn release(mut self) {
        self.release_allocation();
    }

    fn release_allocation(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.conn.release() && self.pool.connection_became_idle(&self.conn) {
            trace!(target: "exchange", "close released {:?}", self.conn);
            self.conn.shutdown();
        }

        self.events.connection_released(self.call, &self.conn);
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if !self.released && !self.conn.is_multiplexed() {
            self.conn.no_new_streams();
        }
        self.release_allocation();
    }
}
