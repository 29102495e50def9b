use base64::{Engine, engine::general_purpose::STANDARD};
use http::HeaderValue;

use crate::{error::Error, request::Request, response::Response, route::Route};

/// Trait for answering 401 and 407 challenges.
///
/// Returning `Ok(None)` gives up on the challenge and the challenge response is returned to caller.
/// Returned request is sent as a follow up of the challenge.
///
/// # Examples
/// ```rust
/// use tandem_client::{basic_credentials, error::Error, http::header::AUTHORIZATION, Authenticator, Request, Response, Route};
///
/// struct Credentials;
///
/// impl Authenticator for Credentials {
///     fn authenticate(&self, _: Option<&Route>, res: &Response) -> Result<Option<Request>, Error> {
///         // give up when credentials already failed once.
///         if res.request().headers().contains_key(AUTHORIZATION) {
///             return Ok(None);
///         }
///         let mut req = tandem_client::http::Request::new(res.request().body().clone());
///         *req.uri_mut() = res.request().uri().clone();
///         *req.method_mut() = res.request().method().clone();
///         *req.headers_mut() = res.request().headers().clone();
///         req.headers_mut().insert(AUTHORIZATION, basic_credentials("user", "password")?);
///         Ok(Some(req))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, route: Option<&Route>, response: &Response) -> Result<Option<Request>, Error>;
}

impl<F> Authenticator for F
where
    F: Fn(Option<&Route>, &Response) -> Result<Option<Request>, Error> + Send + Sync,
{
    fn authenticate(&self, route: Option<&Route>, response: &Response) -> Result<Option<Request>, Error> {
        (self)(route, response)
    }
}

/// default authenticator giving up on every challenge.
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn authenticate(&self, _: Option<&Route>, _: &Response) -> Result<Option<Request>, Error> {
        Ok(None)
    }
}

/// construct value for `Authorization` or `Proxy-Authorization` header with basic scheme.
pub fn basic_credentials(user: &str, password: &str) -> Result<HeaderValue, Error> {
    let encoded = STANDARD.encode(format!("{user}:{password}"));
    HeaderValue::try_from(format!("Basic {encoded}")).map_err(|e| Error::from(http::Error::from(e)))
}
