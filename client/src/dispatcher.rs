//! admission control of asynchronous calls.

use core::fmt;

use std::{
    collections::VecDeque,
    error,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
};

use futures_core::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::{
    call::{AsyncCall, Call},
    error::Error,
};

/// Trait for running asynchronous calls.
pub trait Executor: Send + Sync {
    /// run task to completion. a rejected task is dropped by executor.
    fn execute(&self, task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution>;

    /// stop accepting new tasks.
    fn shutdown(&self) {}
}

/// executor refused to run a task.
#[derive(Debug)]
pub struct RejectedExecution;

impl fmt::Display for RejectedExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("executor rejected task")
    }
}

impl error::Error for RejectedExecution {}

/// executor spawning tasks on a tokio runtime.
///
/// Without an explicit handle tasks are spawned on the runtime current to [Executor::execute].
#[derive(Default)]
pub struct TokioExecutor {
    handle: Option<Handle>,
    shutdown: AtomicBool,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            shutdown: AtomicBool::new(false),
        }
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: BoxFuture<'static, ()>) -> Result<(), RejectedExecution> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RejectedExecution);
        }

        let handle = match self.handle {
            Some(ref handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| RejectedExecution)?,
        };

        handle.spawn(task);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Policy on when asynchronous calls are executed.
///
/// At most `max_requests` asynchronous calls run concurrently and at most `max_requests_per_host`
/// calls run against the same host. Calls beyond the limits wait in FIFO order and are promoted as
/// running calls finish.
///
/// Dispatcher is a reference counted handle and can be shared between clients.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    executor: Box<dyn Executor>,
    state: Mutex<State>,
}

struct State {
    max_requests: usize,
    max_requests_per_host: usize,
    ready: VecDeque<AsyncCall>,
    running_async: Vec<Call>,
    running_sync: Vec<Call>,
    idle_callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl State {
    fn running_calls_for_host(&self, host: &str) -> usize {
        self.running_async
            .iter()
            .chain(self.running_sync.iter())
            .filter(|c| c.host() == host)
            .count()
    }

    fn running_calls_count(&self) -> usize {
        self.running_async.len() + self.running_sync.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(TokioExecutor::default())
    }
}

impl Dispatcher {
    pub fn new<E>(executor: E) -> Self
    where
        E: Executor + 'static,
    {
        Self {
            inner: Arc::new(DispatcherInner {
                executor: Box::new(executor),
                state: Mutex::new(State {
                    max_requests: 64,
                    max_requests_per_host: 5,
                    ready: VecDeque::new(),
                    running_async: Vec::new(),
                    running_sync: Vec::new(),
                    idle_callback: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_requests(&self) -> usize {
        self.state().max_requests
    }

    pub fn set_max_requests(&self, max: usize) -> Result<(), Error> {
        if max == 0 {
            return Err(Error::Std("max requests must be positive".into()));
        }
        self.state().max_requests = max;
        self.promote_and_execute(false);
        Ok(())
    }

    pub fn max_requests_per_host(&self) -> usize {
        self.state().max_requests_per_host
    }

    pub fn set_max_requests_per_host(&self, max: usize) -> Result<(), Error> {
        if max == 0 {
            return Err(Error::Std("max requests per host must be positive".into()));
        }
        self.state().max_requests_per_host = max;
        self.promote_and_execute(false);
        Ok(())
    }

    /// callback invoked every time dispatcher becomes idle: the number of running calls drops
    /// to zero.
    pub fn set_idle_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.state().idle_callback = Some(Arc::new(callback));
    }

    pub fn queued_calls_count(&self) -> usize {
        self.state().ready.len()
    }

    pub fn running_calls_count(&self) -> usize {
        self.state().running_calls_count()
    }

    /// snapshot of calls waiting to be executed.
    pub fn queued_calls(&self) -> Vec<Call> {
        self.state().ready.iter().map(|c| c.call().share()).collect()
    }

    /// snapshot of calls executing, both synchronous and asynchronous.
    pub fn running_calls(&self) -> Vec<Call> {
        let state = self.state();
        state
            .running_async
            .iter()
            .chain(state.running_sync.iter())
            .map(Call::share)
            .collect()
    }

    /// cancel every queued and running call.
    pub fn cancel_all(&self) {
        let calls = {
            let state = self.state();
            state
                .ready
                .iter()
                .map(|c| c.call().share())
                .chain(state.running_async.iter().map(Call::share))
                .chain(state.running_sync.iter().map(Call::share))
                .collect::<Vec<_>>()
        };

        debug!(target: "dispatcher", "cancel {} call(s)", calls.len());

        for call in calls {
            call.cancel();
        }
    }

    /// stop executor. calls promoted afterwards fail with [Error::Rejected].
    pub fn shutdown(&self) {
        self.inner.executor.shutdown();
    }

    pub(crate) fn enqueue(&self, call: AsyncCall) {
        self.state().ready.push_back(call);
        self.promote_and_execute(false);
    }

    pub(crate) fn executed(&self, call: Call) {
        self.state().running_sync.push(call);
    }

    pub(crate) fn finished_sync(&self, call: &Call) {
        self.finished(call, false, true);
    }

    /// remove call from running set. promotion is skipped for a task dropped while being handed to
    /// executor. the promoting pass picks the freed slot up itself.
    fn finished(&self, call: &Call, is_async: bool, promote: bool) {
        {
            let mut state = self.state();
            let running = if is_async {
                &mut state.running_async
            } else {
                &mut state.running_sync
            };
            if let Some(idx) = running.iter().position(|c| c.is_same(call)) {
                running.swap_remove(idx);
            }
        }

        if promote {
            self.promote_and_execute(true);
        }
    }

    /// move eligible calls from ready queue to running and hand them to executor. passes repeat
    /// until executor accepts every promoted call or nothing is left to promote.
    ///
    /// idle callback fires at the end when `freed` or a rejection left no call running.
    fn promote_and_execute(&self, mut freed: bool) {
        loop {
            let executable = {
                let mut state = self.state();
                let mut executable = Vec::new();

                let mut idx = 0;
                while idx < state.ready.len() {
                    if state.running_async.len() >= state.max_requests {
                        break;
                    }

                    if state.running_calls_for_host(state.ready[idx].host()) >= state.max_requests_per_host {
                        idx += 1;
                        continue;
                    }

                    if let Some(call) = state.ready.remove(idx) {
                        state.running_async.push(call.call().share());
                        executable.push(call);
                    }
                }

                executable
            };

            if executable.is_empty() {
                break;
            }

            let mut rejected = 0;

            for call in executable {
                trace!(target: "dispatcher", "promote {:?}", call.call());

                let hand_off = Arc::new(AtomicU8::new(PENDING));

                let mut running = Running {
                    call: Some(call),
                    dispatcher: self.clone(),
                    hand_off: hand_off.clone(),
                };

                let task = Box::pin(async move {
                    if let Some(ref mut call) = running.call {
                        call.run().await;
                    }
                });

                // rejected task is dropped by executor and its call fails through Running's drop.
                let accepted = self.inner.executor.execute(task).is_ok();
                if !accepted || hand_off.swap(HANDED_OFF, Ordering::AcqRel) == DROPPED {
                    rejected += 1;
                }
            }

            if rejected == 0 {
                break;
            }

            debug!(target: "dispatcher", "{rejected} call(s) dropped by executor before hand off");
            freed = true;
        }

        if freed {
            let idle_callback = {
                let state = self.state();
                (state.running_calls_count() == 0)
                    .then(|| state.idle_callback.clone())
                    .flatten()
            };
            if let Some(callback) = idle_callback {
                callback();
            }
        }
    }
}

const PENDING: u8 = 0;
const HANDED_OFF: u8 = 1;
const DROPPED: u8 = 2;

/// async call handed to executor. dispatcher is notified when it's dropped, completed or not.
struct Running {
    call: Option<AsyncCall>,
    dispatcher: Dispatcher,
    /// [PENDING] until executor returns from accepting the task.
    hand_off: Arc<AtomicU8>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            let handle = call.call().share();
            // fire pending callback before the call leaves running set.
            drop(call);
            let handed_off = self
                .hand_off
                .compare_exchange(PENDING, DROPPED, Ordering::AcqRel, Ordering::Acquire)
                .is_err();
            self.dispatcher.finished(&handle, true, handed_off);
        }
    }
}
