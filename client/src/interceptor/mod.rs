//! built in stages of the interceptor chain.

mod bridge;
mod call_server;
mod connect;
mod retry;

pub(crate) use self::bridge::Bridge;
pub(crate) use self::call_server::CallServer;
pub(crate) use self::connect::ConnectStage;
pub(crate) use self::retry::RetryAndFollowUp;
