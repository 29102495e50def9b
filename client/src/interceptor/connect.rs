use crate::{
    chain::{Chain, Interceptor},
    error::Error,
    response::Response,
};

/// open or reuse a connection and hand the exchange allocated on it to network stages.
pub(crate) struct ConnectStage;

impl Interceptor for ConnectStage {
    async fn intercept(&self, chain: Chain<'_>) -> Result<Response, Error> {
        let exchange = chain.transmitter().new_exchange().await?;
        let req = chain.request_cloned();
        chain.proceed_with_exchange(req, exchange).await
    }
}
