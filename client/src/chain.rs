//! interceptor chain driving a call from application stages down to the network.

use core::future::Future;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures_core::future::BoxFuture;

use crate::{
    call::Call,
    client::Client,
    connection::Connection,
    error::{ChainError, Error},
    exchange::Exchange,
    request::{Request, Target},
    response::Response,
    transmitter::Transmitter,
};

/// Trait for a stage of the interceptor chain.
///
/// An interceptor observes the request in [Chain::request], optionally rewrites it and hands it to
/// the rest of chain with [Chain::proceed]. It can also answer without proceeding.
///
/// Interceptors registered with [ClientBuilder::interceptor] run once per call in front of retry
/// and follow up. Interceptors registered with [ClientBuilder::network_interceptor] run once per
/// network exchange. They must proceed exactly once and can not change host or port of request.
///
/// # Examples
/// ```rust
/// use tandem_client::{error::Error, Chain, ClientBuilder, Interceptor, Response};
///
/// struct Logger;
///
/// impl Interceptor for Logger {
///     async fn intercept(&self, chain: Chain<'_>) -> Result<Response, Error> {
///         let req = chain.request();
///         println!("{} {}", req.method(), req.uri());
///         let req = chain.request_cloned();
///         chain.proceed(req).await
///     }
/// }
///
/// # fn build() {
/// let client = ClientBuilder::new().interceptor(Logger).finish();
/// # }
/// ```
///
/// [ClientBuilder::interceptor]: crate::ClientBuilder::interceptor
/// [ClientBuilder::network_interceptor]: crate::ClientBuilder::network_interceptor
pub trait Interceptor: Send + Sync {
    fn intercept(&self, chain: Chain<'_>) -> impl Future<Output = Result<Response, Error>> + Send;
}

pub(crate) trait InterceptorDyn: Send + Sync {
    fn intercept_dyn<'s, 'c>(&'s self, chain: Chain<'c>) -> BoxFuture<'c, Result<Response, Error>>
    where
        's: 'c;
}

impl<I> InterceptorDyn for I
where
    I: Interceptor,
{
    #[inline]
    fn intercept_dyn<'s, 'c>(&'s self, chain: Chain<'c>) -> BoxFuture<'c, Result<Response, Error>>
    where
        's: 'c,
    {
        Box::pin(self.intercept(chain))
    }
}

/// construct an [Interceptor] from closure returning boxed future.
///
/// # Examples
/// ```rust
/// use tandem_client::{http::header::USER_AGENT, interceptor_fn, ClientBuilder};
///
/// # fn build() {
/// let client = ClientBuilder::new()
///     .interceptor(interceptor_fn(|chain| {
///         Box::pin(async move {
///             let mut req = chain.request_cloned();
///             req.headers_mut().insert(USER_AGENT, "my-agent".parse().unwrap());
///             chain.proceed(req).await
///         })
///     }))
///     .finish();
/// # }
/// ```
pub fn interceptor_fn<F>(func: F) -> InterceptorFn<F>
where
    F: for<'c> Fn(Chain<'c>) -> BoxFuture<'c, Result<Response, Error>> + Send + Sync,
{
    InterceptorFn(func)
}

pub struct InterceptorFn<F>(F);

impl<F> Interceptor for InterceptorFn<F>
where
    F: for<'c> Fn(Chain<'c>) -> BoxFuture<'c, Result<Response, Error>> + Send + Sync,
{
    fn intercept(&self, chain: Chain<'_>) -> impl Future<Output = Result<Response, Error>> + Send {
        (self.0)(chain)
    }
}

/// ordered stages of a client's chain.
pub(crate) struct Stages {
    pub(crate) stages: Vec<Arc<dyn InterceptorDyn>>,
    /// index of connect stage. stages between it and the last one are network interceptors.
    pub(crate) connect: usize,
}

impl Stages {
    fn is_network(&self, index: usize) -> bool {
        index > self.connect && index + 1 < self.stages.len()
    }
}

/// A position in the interceptor chain of a call.
///
/// [Chain::proceed] consumes the chain so a stage can proceed at most once.
pub struct Chain<'c> {
    call: &'c Call,
    stages: &'c Stages,
    /// index of the stage [Chain::proceed] hands the request to.
    index: usize,
    request: Request,
    exchange: Option<Exchange>,
    /// set when the stage owning this chain is a network interceptor.
    proceeded: Option<Arc<AtomicBool>>,
}

impl<'c> Chain<'c> {
    /// request handed to current stage.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// a copy of current request to be modified and proceeded with.
    pub fn request_cloned(&self) -> Request {
        crate::request::clone_request(&self.request)
    }

    pub fn call(&self) -> &Call {
        self.call
    }

    /// connection carrying the exchange. only available to network interceptors.
    pub fn connection(&self) -> Option<&Connection> {
        self.exchange.as_ref().map(|e| &**e.connection())
    }

    pub(crate) fn transmitter(&self) -> &'c Transmitter {
        self.call.transmitter()
    }

    pub(crate) fn client(&self) -> &'c Client {
        self.call.transmitter().client()
    }

    pub(crate) fn take_exchange(&mut self) -> Option<Exchange> {
        self.exchange.take()
    }

    /// hand request to the rest of chain and wait for its response.
    pub async fn proceed(mut self, request: Request) -> Result<Response, Error> {
        if let Some(proceeded) = self.proceeded.take() {
            if let Some(ref exchange) = self.exchange {
                let route = exchange.connection().route().address();
                let target = Target::try_from_uri(request.uri())?;
                if target.host != route.host() || target.port != route.port() {
                    return Err(ChainError::NetworkRetarget.into());
                }
            }
            proceeded.store(true, Ordering::Release);
        }

        let exchange = self.exchange.take();
        invoke(self.call, self.stages, self.index, request, exchange).await
    }

    /// proceed without consuming chain. it's for stages that make multiple attempts.
    pub(crate) async fn proceed_again(&self, request: Request) -> Result<Response, Error> {
        invoke(self.call, self.stages, self.index, request, None).await
    }

    /// proceed with exchange handed to the network stages.
    pub(crate) async fn proceed_with_exchange(self, request: Request, exchange: Exchange) -> Result<Response, Error> {
        invoke(self.call, self.stages, self.index, request, Some(exchange)).await
    }
}

/// run request through every stage of call's client.
pub(crate) async fn start(call: &Call, stages: &Stages, request: Request) -> Result<Response, Error> {
    invoke(call, stages, 0, request, None).await
}

async fn invoke<'c>(
    call: &'c Call,
    stages: &'c Stages,
    index: usize,
    request: Request,
    exchange: Option<Exchange>,
) -> Result<Response, Error> {
    let stage = stages.stages.get(index).ok_or(ChainError::MissingConnection)?;

    let proceeded = stages.is_network(index).then(|| Arc::new(AtomicBool::new(false)));

    let next = Chain {
        call,
        stages,
        index: index + 1,
        request,
        exchange,
        proceeded: proceeded.clone(),
    };

    let res = stage.intercept_dyn(next).await?;

    if let Some(proceeded) = proceeded {
        if !proceeded.load(Ordering::Acquire) {
            return Err(ChainError::NetworkShortCircuit.into());
        }
    }

    Ok(res)
}
