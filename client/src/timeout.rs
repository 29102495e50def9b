use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use tokio::time::Sleep;

/// Configuration for the phase timeouts of a call.
///
/// Every phase timeout is bounded by the call timeout when one is set. The call timeout is computed
/// once when the call starts and spans every retry and follow up.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Timeout for dns look up of one route selection.
    /// Default to 5 seconds.
    pub(crate) resolve_timeout: Duration,
    /// Timeout for establishing connection, including tls handshake and proxy tunnel.
    /// Default to 10 seconds.
    pub(crate) connect_timeout: Duration,
    /// Timeout for every write of request head and body.
    /// Default to 10 seconds.
    pub(crate) write_timeout: Duration,
    /// Timeout for every read of response head and body.
    /// Default to 10 seconds.
    pub(crate) read_timeout: Duration,
    /// Deadline of the whole call. Default to unbounded.
    pub(crate) call_timeout: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            call_timeout: None,
        }
    }
}

pub(crate) trait Timeout: Sized {
    fn timeout(self, timer: Pin<&mut Sleep>) -> TimeoutFuture<'_, Self>;
}

impl<F> Timeout for F
where
    F: Future,
{
    fn timeout(self, timer: Pin<&mut Sleep>) -> TimeoutFuture<'_, Self> {
        TimeoutFuture { fut: self, timer }
    }
}

pin_project! {
    pub(crate) struct TimeoutFuture<'a, F> {
        #[pin]
        fut: F,
        timer: Pin<&'a mut Sleep>
    }
}

impl<F: Future> Future for TimeoutFuture<'_, F> {
    type Output = Result<F::Output, ()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.fut.poll(cx) {
            Poll::Ready(res) => Poll::Ready(Ok(res)),
            Poll::Pending => this.timer.as_mut().poll(cx).map(Err),
        }
    }
}

pub(crate) trait Select: Sized {
    fn select<Fut>(self, other: Fut) -> SelectFuture<Self, Fut>;
}

impl<F> Select for F
where
    F: Future,
{
    #[inline]
    fn select<Fut>(self, other: Fut) -> SelectFuture<Self, Fut> {
        SelectFuture {
            fut1: self,
            fut2: other,
        }
    }
}

pin_project! {
    pub(crate) struct SelectFuture<Fut1, Fut2> {
        #[pin]
        fut1: Fut1,
        #[pin]
        fut2: Fut2,
    }
}

impl<Fut1, Fut2> Future for SelectFuture<Fut1, Fut2>
where
    Fut1: Future,
    Fut2: Future,
{
    type Output = SelectOutput<Fut1::Output, Fut2::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(a) = this.fut1.poll(cx) {
            return Poll::Ready(SelectOutput::A(a));
        }

        this.fut2.poll(cx).map(SelectOutput::B)
    }
}

pub(crate) enum SelectOutput<A, B> {
    A(A),
    B(B),
}
