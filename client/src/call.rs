use core::{fmt, time::Duration};

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::oneshot;
use tracing::trace;

use crate::{
    chain,
    client::Client,
    dispatcher::Dispatcher,
    error::{ChainError, Error},
    events::CallId,
    request::{Request, clone_request},
    response::Response,
    transmitter::Transmitter,
};

/// A request prepared for execution.
///
/// A call executes once, either inline with [Call::execute] or through the client's dispatcher
/// with [Call::enqueue]. Cloning a call yields a fresh call of the same request that can be
/// executed again.
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    id: CallId,
    request: Request,
    /// lowercase host of the request. key of dispatcher's per host limit.
    host: String,
    executed: AtomicBool,
    transmitter: Transmitter,
}

impl Clone for Call {
    fn clone(&self) -> Self {
        Self::new(self.inner.transmitter.client().clone(), clone_request(&self.inner.request))
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("method", self.inner.request.method())
            .field("uri", self.inner.request.uri())
            .finish()
    }
}

impl Call {
    pub(crate) fn new(client: Client, request: Request) -> Self {
        let id = CallId::next();
        let host = request.uri().host().unwrap_or_default().to_ascii_lowercase();
        Self {
            inner: Arc::new(CallInner {
                id,
                request,
                host,
                executed: AtomicBool::new(false),
                transmitter: Transmitter::new(client, id),
            }),
        }
    }

    /// another handle to the same call.
    pub(crate) fn share(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    pub(crate) fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> CallId {
        self.inner.id
    }

    /// the original request of call.
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub(crate) fn host(&self) -> &str {
        &self.inner.host
    }

    pub(crate) fn transmitter(&self) -> &Transmitter {
        &self.inner.transmitter
    }

    /// deadline of the whole call including retries and follow ups. None means unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.transmitter.client().inner.timeouts.call_timeout
    }

    pub fn is_executed(&self) -> bool {
        self.inner.executed.load(Ordering::Acquire)
    }

    /// cancel the call. in flight io is aborted and pending or future execution fails with
    /// [Error::Canceled].
    pub fn cancel(&self) {
        self.inner.transmitter.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.transmitter.is_canceled()
    }

    fn mark_executed(&self) -> Result<(), Error> {
        if self.inner.executed.swap(true, Ordering::AcqRel) {
            return Err(ChainError::AlreadyExecuted.into());
        }
        Ok(())
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.transmitter.client().inner.dispatcher
    }

    /// execute call on current task and wait for its response.
    ///
    /// Synchronous calls are not bound by dispatcher's max requests but do count toward its per
    /// host limit of asynchronous calls.
    pub async fn execute(&self) -> Result<Response, Error> {
        self.mark_executed()?;

        self.transmitter().call_start(self.request());

        let dispatcher = self.dispatcher().clone();
        dispatcher.executed(self.share());

        struct Finished<'a>(&'a Dispatcher, &'a Call);

        impl Drop for Finished<'_> {
            fn drop(&mut self) {
                self.0.finished_sync(self.1);
            }
        }

        let _finished = Finished(&dispatcher, self);

        let res = self.response_with_interceptor_chain().await;
        self.transmitter().no_more_exchanges(res.as_ref());
        res
    }

    /// schedule call on dispatcher. callback is invoked exactly once with the outcome.
    pub fn enqueue<C>(&self, callback: C)
    where
        C: Callback,
    {
        if let Err(e) = self.mark_executed() {
            Box::new(callback).on_response(Err(e));
            return;
        }

        self.transmitter().call_start(self.request());

        self.dispatcher().enqueue(AsyncCall::new(self.share(), Box::new(callback)));
    }

    pub(crate) async fn response_with_interceptor_chain(&self) -> Result<Response, Error> {
        let client = self.transmitter().client().clone();
        let res = chain::start(self, &client.inner.stages, clone_request(self.request())).await;

        if self.is_canceled() {
            trace!(target: "call", "drop response of canceled call {}", self.id().as_u64());
            return Err(Error::Canceled);
        }

        res
    }
}

/// Receiver of the outcome of an enqueued call.
pub trait Callback: Send + 'static {
    fn on_response(self: Box<Self>, res: Result<Response, Error>);
}

impl Callback for oneshot::Sender<Result<Response, Error>> {
    fn on_response(self: Box<Self>, res: Result<Response, Error>) {
        let _ = (*self).send(res);
    }
}

/// construct a [Callback] from closure.
pub fn callback_fn<F>(func: F) -> CallbackFn<F>
where
    F: FnOnce(Result<Response, Error>) + Send + 'static,
{
    CallbackFn(func)
}

pub struct CallbackFn<F>(F);

impl<F> Callback for CallbackFn<F>
where
    F: FnOnce(Result<Response, Error>) + Send + 'static,
{
    fn on_response(self: Box<Self>, res: Result<Response, Error>) {
        (self.0)(res)
    }
}

/// call waiting in or running on dispatcher.
///
/// Its callback fires exactly once. When the call is dropped before producing a response the
/// callback receives [Error::Rejected] if it never ran and [Error::Canceled] otherwise.
pub(crate) struct AsyncCall {
    call: Call,
    callback: Option<Box<dyn Callback>>,
    started: bool,
}

impl AsyncCall {
    pub(crate) fn new(call: Call, callback: Box<dyn Callback>) -> Self {
        Self {
            call,
            callback: Some(callback),
            started: false,
        }
    }

    pub(crate) fn call(&self) -> &Call {
        &self.call
    }

    pub(crate) fn host(&self) -> &str {
        self.call.host()
    }

    pub(crate) async fn run(&mut self) {
        self.started = true;

        let res = self.call.response_with_interceptor_chain().await;
        self.call.transmitter().no_more_exchanges(res.as_ref());

        if let Some(callback) = self.callback.take() {
            callback.on_response(res);
        }
    }
}

impl Drop for AsyncCall {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            let err = if self.started { Error::Canceled } else { Error::Rejected };
            self.call.transmitter().no_more_exchanges(Err(&err));
            callback.on_response(Err(err));
        }
    }
}
