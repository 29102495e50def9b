use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use tandem_client::{
    Body, Client, ClientBuilder, Dns, Proxy, ProxySelector, Request, Response, Route, basic_credentials,
    error::{Error as ClientError, ErrorKind, FollowUpError, ResolveError, TimeoutError},
    http::{self, Uri, header::AUTHORIZATION},
};
use tandem_test::{Error, MockResponse, TestServer};

fn get(url: &str) -> Result<Request, Error> {
    Ok(http::Request::get(url).body(Body::Empty)?)
}

#[tokio::test]
async fn redirect_to_other_origin_strips_authorization() -> Result<(), Error> {
    let origin = TestServer::start().await?;
    let other = TestServer::start().await?;

    origin.enqueue(MockResponse::redirect(302, other.url("/landing")));
    other.enqueue(MockResponse::new(200).body("landed"));

    let c = Client::new();

    let mut req = get(&origin.url("/start"))?;
    req.headers_mut().insert(AUTHORIZATION, basic_credentials("user", "secret")?);

    let res = c.new_call(req).execute().await?;
    assert_eq!(res.text()?, "landed");
    assert_eq!(res.request().uri().path(), "/landing");

    let prior = res.prior_response().expect("redirect response is kept");
    assert_eq!(prior.status().as_u16(), 302);
    assert!(prior.body().is_empty());

    assert!(origin.requests()[0].header("authorization").is_some());
    assert!(other.requests()[0].header("authorization").is_none());

    Ok(())
}

#[tokio::test]
async fn redirect_on_same_origin_keeps_authorization() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::redirect(301, "/moved"));

    let c = Client::new();

    let mut req = get(&server.url("/"))?;
    req.headers_mut().insert(AUTHORIZATION, basic_credentials("user", "secret")?);

    let res = c.new_call(req).execute().await?;
    assert_eq!(res.status().as_u16(), 200);

    let requests = server.requests();
    assert_eq!(requests[1].path, "/moved");
    assert!(requests[1].header("authorization").is_some());
    // follow up reuses connection of the redirect.
    assert_eq!(server.connection_count(), 1);

    Ok(())
}

#[tokio::test]
async fn see_other_turns_post_into_get() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::redirect(303, "/result"));

    let c = Client::new();

    let req = http::Request::post(server.url("/form")).body(Body::from("a=1"))?;
    c.new_call(req).execute().await?;

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[1].method, "GET");
    assert!(requests[1].body.is_empty());
    assert!(requests[1].header("content-length").is_none());

    Ok(())
}

#[tokio::test]
async fn too_many_redirects() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.set_default(MockResponse::redirect(302, "/again"));

    let c = Client::new();

    let err = c.new_call(get(&server.url("/"))?).execute().await.unwrap_err();
    assert!(matches!(err, ClientError::FollowUp(FollowUpError::TooMany(21))));
    assert_eq!(server.request_count(), 21);

    Ok(())
}

#[tokio::test]
async fn redirects_disabled() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::redirect(302, "/elsewhere"));

    let c = ClientBuilder::new().follow_redirects(false).finish();

    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.status().as_u16(), 302);
    assert_eq!(server.request_count(), 1);

    Ok(())
}

#[tokio::test]
async fn authenticator_answers_challenge() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::new(401).header("www-authenticate", "Basic realm=\"tandem\""));
    server.enqueue(MockResponse::new(200).body("welcome"));

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let c = ClientBuilder::new()
        .authenticator(move |_: Option<&Route>, res: &Response| -> Result<Option<Request>, ClientError> {
            counter.fetch_add(1, Ordering::Relaxed);
            if res.request().headers().contains_key(AUTHORIZATION) {
                return Ok(None);
            }
            let mut req = http::Request::new(res.request().body().clone());
            *req.uri_mut() = res.request().uri().clone();
            *req.headers_mut() = res.request().headers().clone();
            req.headers_mut().insert(AUTHORIZATION, basic_credentials("user", "secret")?);
            Ok(Some(req))
        })
        .finish();

    let res = c.new_call(get(&server.url("/private"))?).execute().await?;
    assert_eq!(res.text()?, "welcome");
    assert_eq!(attempts.load(Ordering::Relaxed), 1);
    assert_eq!(
        server.requests()[1].header("authorization"),
        Some("Basic dXNlcjpzZWNyZXQ=")
    );

    Ok(())
}

#[tokio::test]
async fn unavailable_with_immediate_retry() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::new(503).header("retry-after", "0"));
    server.enqueue(MockResponse::new(503).header("retry-after", "0"));

    let c = Client::new();

    // second 503 in a row is final.
    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.status().as_u16(), 503);
    assert_eq!(res.prior_response().map(|p| p.status().as_u16()), Some(503));
    assert_eq!(server.request_count(), 2);

    Ok(())
}

/// resolve every host to the given addresses in order.
struct Fixed(Vec<SocketAddr>);

impl Dns for Fixed {
    async fn lookup(&self, _: &str, port: u16) -> Result<Vec<SocketAddr>, ClientError> {
        Ok(self.0.iter().map(|addr| SocketAddr::new(addr.ip(), port)).collect())
    }
}

/// local address nothing listens on.
async fn closed_addr() -> Result<SocketAddr, Error> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

#[tokio::test]
async fn all_routes_fail() -> Result<(), Error> {
    let addr = closed_addr().await?;

    let c = ClientBuilder::new()
        .dns(Fixed(vec![
            SocketAddr::from(([127, 0, 0, 1], 0)),
            SocketAddr::from(([127, 0, 0, 2], 0)),
        ]))
        .finish();

    let err = c
        .new_call(get(&format!("http://tandem.test:{}/", addr.port()))?)
        .execute()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connectivity);
    match err {
        ClientError::Route(e) => assert_eq!(e.attempts(), 2),
        e => panic!("unexpected error: {e}"),
    }

    Ok(())
}

#[tokio::test]
async fn failed_route_falls_back_to_next() -> Result<(), Error> {
    let server = TestServer::start().await?;

    // nothing listens on the first address.
    let c = ClientBuilder::new()
        .dns(Fixed(vec![SocketAddr::from(([127, 0, 0, 2], 0)), server.addr()]))
        .finish();

    let res = c
        .new_call(get(&format!("http://tandem.test:{}/", server.addr().port()))?)
        .execute()
        .await?;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.route().map(|r| r.socket_addr()), Some(server.addr()));

    Ok(())
}

#[tokio::test]
async fn retry_disabled() -> Result<(), Error> {
    let addr = closed_addr().await?;

    let c = ClientBuilder::new()
        .retry_on_connection_failure(false)
        .dns(Fixed(vec![
            SocketAddr::from(([127, 0, 0, 1], 0)),
            SocketAddr::from(([127, 0, 0, 2], 0)),
        ]))
        .finish();

    let err = c
        .new_call(get(&format!("http://tandem.test:{}/", addr.port()))?)
        .execute()
        .await
        .unwrap_err();

    match err {
        ClientError::Route(e) => assert_eq!(e.attempts(), 1),
        e => panic!("unexpected error: {e}"),
    }

    Ok(())
}

/// resolve every host but the ones ending with `.invalid` to one address.
struct Partial(SocketAddr);

impl Dns for Partial {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ClientError> {
        if host.ends_with(".invalid") {
            return Err(ResolveError::new(host).into());
        }
        Ok(vec![SocketAddr::new(self.0.ip(), port)])
    }
}

struct ProxyThenDirect;

impl ProxySelector for ProxyThenDirect {
    fn select(&self, _: &Uri) -> Vec<Proxy> {
        vec![Proxy::http("proxy.invalid", 3128), Proxy::Direct]
    }
}

#[tokio::test]
async fn unresolvable_proxy_falls_back_to_direct() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::new(200).body("direct"));

    let c = ClientBuilder::new()
        .dns(Partial(server.addr()))
        .proxy_selector(ProxyThenDirect)
        .finish();

    let res = c
        .new_call(get(&format!("http://tandem.test:{}/", server.addr().port()))?)
        .execute()
        .await?;
    assert_eq!(res.text()?, "direct");
    assert!(res.route().unwrap().proxy().is_direct());
    assert_eq!(server.requests()[0].path, "/");

    // with no route left an unknown host is final.
    let err = c
        .new_call(get("http://origin.invalid/")?)
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Route(ref e) if matches!(e.first(), ClientError::Resolve(_))));

    Ok(())
}

/// every lookup fails after a delay.
struct SlowFailing(Arc<AtomicUsize>);

impl Dns for SlowFailing {
    async fn lookup(&self, host: &str, _: u16) -> Result<Vec<SocketAddr>, ClientError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(ResolveError::new(host).into())
    }
}

struct ManyProxies;

impl ProxySelector for ManyProxies {
    fn select(&self, _: &Uri) -> Vec<Proxy> {
        (0..8).map(|i| Proxy::http(format!("proxy{i}.invalid"), 3128)).collect()
    }
}

#[tokio::test]
async fn call_timeout_spans_route_retries() -> Result<(), Error> {
    let lookups = Arc::new(AtomicUsize::new(0));

    let c = ClientBuilder::new()
        .dns(SlowFailing(lookups.clone()))
        .proxy_selector(ManyProxies)
        .call_timeout(Duration::from_millis(350))
        .finish();

    let start = Instant::now();
    let err = c
        .new_call(get("http://tandem.test/")?)
        .execute()
        .await
        .unwrap_err();

    // each route fails within its own phase timeout. the call deadline ends the retries.
    assert!(matches!(err, ClientError::Timeout(TimeoutError::Call)), "{err:?}");
    assert!(lookups.load(Ordering::SeqCst) >= 2);
    assert!(lookups.load(Ordering::SeqCst) < 8);
    assert!(start.elapsed() < Duration::from_millis(700));

    Ok(())
}
