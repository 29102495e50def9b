use std::time::SystemTime;

use tracing::trace;

use crate::{
    chain::{Chain, Interceptor},
    connection::Transport,
    error::{ChainError, Error},
    response::Response,
};

/// last stage of chain. write request to the exchange's connection and read the full response.
pub(crate) struct CallServer;

impl Interceptor for CallServer {
    async fn intercept(&self, mut chain: Chain<'_>) -> Result<Response, Error> {
        let exchange = chain.take_exchange().ok_or(ChainError::MissingConnection)?;
        let tx = chain.transmitter();
        let req = chain.request_cloned();
        let limit = chain.client().inner.max_response_body;
        let conn = exchange.connection().clone();

        let sent_at = SystemTime::now();

        let res = match *conn.transport() {
            Transport::H1(_) => {
                #[cfg(feature = "http1")]
                {
                    crate::h1::proto::dispatcher::send(tx, &conn, &req, limit).await
                }

                #[cfg(not(feature = "http1"))]
                {
                    Err(crate::error::FeatureError::Http1NotEnabled.into())
                }
            }
            #[cfg(feature = "http2")]
            Transport::H2(ref h2) => crate::h2::send(tx, h2, &req, limit).await,
        };

        match res {
            Ok(res) => {
                let route = conn.route().clone();
                exchange.finish();
                Ok(Response::new(res, req)
                    .with_timestamps(sent_at, SystemTime::now())
                    .with_route(route))
            }
            Err(e) => {
                trace!(target: "exchange", "exchange on {conn:?} failed: {e}");
                tx.exchange_failed(exchange, &e);
                Err(e)
            }
        }
    }
}
