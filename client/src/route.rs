use core::{
    fmt,
    future::Future,
    hash::{Hash, Hasher},
};

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Mutex, PoisonError},
};

use tracing::trace;

use crate::{
    address::Address,
    error::{Error, ResolveError},
    proxy::Proxy,
};

/// One concrete attempt to reach an [Address]. A proxy and a resolved socket address.
#[derive(Clone)]
pub struct Route {
    address: Address,
    proxy: Proxy,
    socket_addr: SocketAddr,
}

impl Route {
    pub(crate) fn new(address: Address, proxy: Proxy, socket_addr: SocketAddr) -> Self {
        Self {
            address,
            proxy,
            socket_addr,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// socket address of origin server or proxy server.
    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }

    /// https target going through http proxy must be tunneled with CONNECT method.
    pub fn requires_tunnel(&self) -> bool {
        self.address.is_tls() && matches!(self.proxy, Proxy::Http { .. })
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.proxy == other.proxy && self.socket_addr == other.socket_addr
    }
}

impl Eq for Route {}

impl Hash for Route {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.proxy.hash(state);
        self.socket_addr.hash(state);
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Route({}:{} via {} at {})",
            self.address.host(),
            self.address.port(),
            self.proxy,
            self.socket_addr
        )
    }
}

/// Advisory registry of routes failed to connect recently.
///
/// A failed route is postponed on next selection and forgotten once it connects successfully.
#[derive(Default)]
pub struct RouteDatabase {
    failed: Mutex<HashSet<Route>>,
}

impl RouteDatabase {
    pub fn failed(&self, route: &Route) {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(route.clone());
    }

    pub fn connected(&self, route: &Route) {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner).remove(route);
    }

    pub fn should_postpone(&self, route: &Route) -> bool {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner).contains(route)
    }

    pub fn len(&self) -> usize {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A set of routes sharing the same proxy, or the postponed routes tried last.
pub(crate) struct Selection {
    routes: Vec<Route>,
    next: usize,
}

impl Selection {
    pub(crate) fn has_next(&self) -> bool {
        self.next < self.routes.len()
    }

    pub(crate) fn next(&mut self) -> Option<Route> {
        let route = self.routes.get(self.next).cloned();
        self.next += 1;
        route
    }

    pub(crate) fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Iterate routes of an address. Proxies are walked in order and every proxy's socket addresses are
/// resolved lazily. Routes flagged by [RouteDatabase] are held back until every other route is tried.
pub(crate) struct RouteSelector {
    address: Address,
    proxies: Vec<Proxy>,
    next_proxy: usize,
    postponed: Vec<Route>,
}

impl RouteSelector {
    pub(crate) fn new(address: Address) -> Self {
        let proxies = match address.proxy {
            Some(ref proxy) => vec![proxy.clone()],
            None => {
                let proxies = address.proxy_selector.select(&address.uri);
                if proxies.is_empty() { vec![Proxy::Direct] } else { proxies }
            }
        };

        Self {
            address,
            proxies,
            next_proxy: 0,
            postponed: Vec::new(),
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        self.next_proxy < self.proxies.len() || !self.postponed.is_empty()
    }

    /// select next batch of routes. `resolve` is called with host and port of the socket to connect.
    pub(crate) async fn next<F, Fut>(&mut self, db: &RouteDatabase, mut resolve: F) -> Result<Selection, Error>
    where
        F: FnMut(String, u16) -> Fut,
        Fut: Future<Output = Result<Vec<SocketAddr>, Error>>,
    {
        let mut routes = Vec::new();

        while routes.is_empty() && self.next_proxy < self.proxies.len() {
            let proxy = self.proxies[self.next_proxy].clone();
            self.next_proxy += 1;

            let (host, port) = match proxy {
                Proxy::Direct => (self.address.host.clone(), self.address.port),
                Proxy::Http { ref host, port } => (host.clone(), port),
            };

            for addr in resolve(host, port).await? {
                let route = Route::new(self.address.clone(), proxy.clone(), addr);
                if db.should_postpone(&route) {
                    trace!(target: "route", "postpone recently failed {route:?}");
                    self.postponed.push(route);
                } else {
                    routes.push(route);
                }
            }
        }

        if routes.is_empty() {
            routes.append(&mut self.postponed);
        }

        if routes.is_empty() {
            return Err(ResolveError::new(self.address.host.as_str()).into());
        }

        Ok(Selection { routes, next: 0 })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use http::Uri;

    use crate::{address::test::address, proxy::ProxySelector};

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn two_addrs(_: String, _: u16) -> Result<Vec<SocketAddr>, Error> {
        Ok(vec![addr(1), addr(2)])
    }

    #[tokio::test]
    async fn postponed_route_tried_last() {
        let address = address("http://a.com");
        let db = RouteDatabase::default();
        db.failed(&Route::new(address.clone(), Proxy::Direct, addr(1)));

        let mut selector = RouteSelector::new(address.clone());
        let mut selection = selector.next(&db, two_addrs).await.unwrap();
        assert_eq!(selection.next().unwrap().socket_addr(), addr(2));
        assert!(!selection.has_next());

        assert!(selector.has_next());
        let mut selection = selector.next(&db, two_addrs).await.unwrap();
        assert_eq!(selection.next().unwrap().socket_addr(), addr(1));
        assert!(!selector.has_next());

        db.connected(&Route::new(address, Proxy::Direct, addr(1)));
        assert_eq!(db.len(), 0);
    }

    #[tokio::test]
    async fn proxies_in_order() {
        struct Two;

        impl ProxySelector for Two {
            fn select(&self, _: &Uri) -> Vec<Proxy> {
                vec![Proxy::http("proxy", 3128), Proxy::Direct]
            }
        }

        let mut address = address("https://a.com");
        address.proxy_selector = Arc::new(Two);

        let db = RouteDatabase::default();
        let mut selector = RouteSelector::new(address);

        let mut hosts = Vec::new();
        while selector.has_next() {
            let selection = selector
                .next(&db, |host, port| {
                    hosts.push((host, port));
                    async move { Ok(vec![addr(port)]) }
                })
                .await
                .unwrap();
            assert_eq!(selection.routes().len(), 1);
        }

        assert_eq!(hosts, vec![("proxy".to_string(), 3128), ("a.com".to_string(), 443)]);
    }

    #[test]
    fn tunnel() {
        let address = address("https://a.com");
        assert!(Route::new(address.clone(), Proxy::http("p", 1), addr(1)).requires_tunnel());
        assert!(!Route::new(address, Proxy::Direct, addr(1)).requires_tunnel());
    }
}
