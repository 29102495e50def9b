//! an http client engine with call dispatching, interceptor chain and connection pooling.
//!
//! # Quick Start
//! ```no_run
//! use tandem_client::{error::Error, http, Client};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let client = Client::new();
//!     let req = http::Request::get("http://www.example.com/").body(Default::default())?;
//!     // execute the call on current task and wait for buffered response.
//!     let res = client.new_call(req).execute().await?;
//!     println!("{}", res.text()?);
//!     Ok(())
//! }
//! ```
//!
//! # Calls
//! A [Call] executes once. [Call::execute] drives it on the current task while [Call::enqueue]
//! hands it to the client's [Dispatcher] which bounds concurrency globally and per host.
//!
//! # Interceptors
//! Every call goes through a chain of stages: application interceptors, retry and follow up,
//! bridge, cache, connect, network interceptors and finally the stage talking to server.
//! Please reference [ClientBuilder::interceptor] and [ClientBuilder::network_interceptor].
//!
//! ## Customize core feature
//! Please reference [ClientBuilder::dns], [ClientBuilder::tls_connector] and [ClientBuilder::cache]

#![forbid(unsafe_code)]

mod address;
mod auth;
mod body;
mod builder;
mod cache;
mod call;
mod chain;
mod client;
mod connect;
mod connection;
mod cookie;
mod dispatcher;
mod events;
mod exchange;
mod interceptor;
mod pool;
mod proxy;
mod request;
mod resolver;
mod response;
mod route;
mod timeout;
mod tls;
mod transmitter;

#[cfg(feature = "http1")]
mod h1;

#[cfg(feature = "http2")]
mod h2;

pub mod error;

pub use self::address::{Address, Protocol, Scheme};
pub use self::auth::{Authenticator, NoAuth, basic_credentials};
pub use self::body::{Body, BodyError, OneShot};
pub use self::builder::ClientBuilder;
pub use self::cache::{CacheControl, CacheStore, MemoryCache};
pub use self::call::{Call, Callback, CallbackFn, callback_fn};
pub use self::chain::{Chain, Interceptor, InterceptorFn, interceptor_fn};
pub use self::client::Client;
pub use self::connection::Connection;
pub use self::cookie::{CookieJar, NoCookies};
pub use self::dispatcher::{Dispatcher, Executor, RejectedExecution, TokioExecutor};
pub use self::events::{CallId, EventListener, NoEvents};
pub use self::pool::ConnectionPool;
pub use self::proxy::{NoProxy, Proxy, ProxySelector};
pub use self::request::Request;
pub use self::resolver::{Dns, SystemDns};
pub use self::response::{Response, ResponseSource};
pub use self::route::{Route, RouteDatabase};
pub use self::timeout::TimeoutConfig;
pub use self::tls::{connector::TlsConnector, stream::Io};

#[cfg(feature = "rustls")]
pub use self::tls::connector::RustlsConnector;

// re-export http crate.
pub use http;

// re-export bytes crate.
pub use bytes;

pub use futures_core::future::BoxFuture;
