use core::future::Future;

use std::net::SocketAddr;

use futures_core::future::BoxFuture;

use crate::error::{Error, ResolveError};

/// Trait for custom DNS resolver.
///
/// # Examples
/// ```rust
/// use std::net::SocketAddr;
///
/// use tandem_client::{error::Error, ClientBuilder, Dns};
///
/// struct MyDns;
///
/// impl Dns for MyDns {
///     // hostname is stripped of port number(if given).
///     async fn lookup(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
///         Ok(vec![SocketAddr::from(([127, 0, 0, 1], port))])
///     }
/// }
///
/// # fn resolve() {
/// let client = ClientBuilder::new().dns(MyDns).finish();
/// # }
/// ```
pub trait Dns: Send + Sync {
    /// resolve hostname to ordered list of socket addresses. an empty list is treated as unknown host.
    fn lookup(&self, hostname: &str, port: u16) -> impl Future<Output = Result<Vec<SocketAddr>, Error>> + Send;
}

pub(crate) trait DnsDyn: Send + Sync {
    fn lookup_dyn<'s, 'h>(&'s self, hostname: &'h str, port: u16) -> BoxFuture<'h, Result<Vec<SocketAddr>, Error>>
    where
        's: 'h;
}

impl<D> DnsDyn for D
where
    D: Dns,
{
    #[inline]
    fn lookup_dyn<'s, 'h>(&'s self, hostname: &'h str, port: u16) -> BoxFuture<'h, Result<Vec<SocketAddr>, Error>>
    where
        's: 'h,
    {
        Box::pin(async move {
            let addrs = self.lookup(hostname, port).await?;
            if addrs.is_empty() {
                return Err(ResolveError::new(hostname).into());
            }
            Ok(addrs)
        })
    }
}

/// default resolver backed by operating system through [tokio::net::lookup_host].
pub struct SystemDns;

impl Dns for SystemDns {
    async fn lookup(&self, hostname: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
        tokio::net::lookup_host((hostname, port))
            .await
            .map(Iterator::collect)
            .map_err(|_| ResolveError::new(hostname).into())
    }
}
