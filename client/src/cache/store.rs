use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use http::{HeaderMap, Method, header::VARY};
use tracing::trace;

use crate::{request::Request, response::Response};

/// Trait for storage of cached responses.
///
/// Entries are keyed by request uri. Only responses to GET are handed to [CacheStore::put].
/// Returned response of [CacheStore::get] must carry the request it was stored with so `Vary`
/// matching and freshness computation can be done against it.
pub trait CacheStore: Send + Sync {
    fn get(&self, req: &Request) -> Option<Response>;

    fn put(&self, res: &Response);

    fn remove(&self, req: &Request);

    /// replace metadata of stored response after a successful conditional request.
    fn update(&self, cached: &Response, updated: &Response);

    /// a response is produced. `network` is true when network is used and `cache_hit` when a
    /// cached response is served without network.
    fn track_response(&self, network: bool, cache_hit: bool) {
        let _ = (network, cache_hit);
    }

    fn track_conditional_cache_hit(&self) {}
}

impl<C> CacheStore for Arc<C>
where
    C: CacheStore + ?Sized,
{
    fn get(&self, req: &Request) -> Option<Response> {
        (**self).get(req)
    }

    fn put(&self, res: &Response) {
        (**self).put(res)
    }

    fn remove(&self, req: &Request) {
        (**self).remove(req)
    }

    fn update(&self, cached: &Response, updated: &Response) {
        (**self).update(cached, updated)
    }

    fn track_response(&self, network: bool, cache_hit: bool) {
        (**self).track_response(network, cache_hit)
    }

    fn track_conditional_cache_hit(&self) {
        (**self).track_conditional_cache_hit()
    }
}

/// In memory least recently used cache bounded by total size of stored responses.
pub struct MemoryCache {
    max_size: usize,
    state: Mutex<MemoryState>,
    request_count: AtomicUsize,
    network_count: AtomicUsize,
    hit_count: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    size: usize,
    tick: u64,
}

struct Entry {
    res: Response,
    last_used: u64,
}

impl MemoryCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            state: Mutex::new(MemoryState::default()),
            request_count: AtomicUsize::new(0),
            network_count: AtomicUsize::new(0),
            hit_count: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// total size of stored entries.
    pub fn size(&self) -> usize {
        self.state().size
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn network_count(&self) -> usize {
        self.network_count.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> usize {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn evict_all(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.size = 0;
    }
}

impl MemoryState {
    fn insert(&mut self, key: String, res: Response, max_size: usize) {
        self.remove(&key);

        let size = entry_size(&res);
        if size > max_size {
            return;
        }

        self.tick += 1;
        self.size += size;
        self.entries.insert(key, Entry { res, last_used: self.tick });

        while self.size > max_size {
            let Some(lru) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            trace!(target: "cache", "evict {lru}");
            self.remove(&lru);
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.size -= entry_size(&entry.res);
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, req: &Request) -> Option<Response> {
        let mut state = self.state();
        state.tick += 1;
        let tick = state.tick;

        let entry = state.entries.get_mut(&key(req))?;
        if !vary_matches(&entry.res, req.headers()) {
            return None;
        }
        entry.last_used = tick;
        Some(entry.res.clone())
    }

    fn put(&self, res: &Response) {
        if *res.request().method() != Method::GET || has_vary_all(res) {
            return;
        }
        self.state().insert(key(res.request()), res.clone(), self.max_size);
    }

    fn remove(&self, req: &Request) {
        self.state().remove(&key(req));
    }

    fn update(&self, cached: &Response, updated: &Response) {
        let key = key(cached.request());
        let mut state = self.state();
        if state.entries.contains_key(&key) {
            state.insert(key, updated.clone(), self.max_size);
        }
    }

    fn track_response(&self, network: bool, cache_hit: bool) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if network {
            self.network_count.fetch_add(1, Ordering::Relaxed);
        } else if cache_hit {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn track_conditional_cache_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }
}

fn key(req: &Request) -> String {
    req.uri().to_string()
}

fn entry_size(res: &Response) -> usize {
    let headers = res
        .headers()
        .iter()
        .map(|(k, v)| k.as_str().len() + v.len())
        .sum::<usize>();
    res.body().len() + headers
}

fn vary_fields(res: &Response) -> impl Iterator<Item = &str> {
    res.headers()
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn has_vary_all(res: &Response) -> bool {
    vary_fields(res).any(|f| f == "*")
}

/// true when request carries the same values of every header named by cached response's `Vary`.
fn vary_matches(cached: &Response, headers: &HeaderMap) -> bool {
    let stored = cached.request().headers();
    vary_fields(cached).all(|name| stored.get_all(name).iter().eq(headers.get_all(name).iter()))
}
