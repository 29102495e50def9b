use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use flate2::{Compression, write::GzEncoder};
use tandem_client::{
    Body, Chain, Client, ClientBuilder, CookieJar, Interceptor, Request, Response, interceptor_fn,
    error::{ChainError, Error as ClientError, ErrorKind},
    http::{self, Uri, header::ACCEPT_ENCODING},
};
use tandem_test::{Error, MockResponse, TestServer};

fn get(url: &str) -> Result<Request, Error> {
    Ok(http::Request::get(url).body(Body::Empty)?)
}

#[tokio::test]
async fn default_headers() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = Client::new();
    c.new_call(get(&server.url("/"))?).execute().await?;

    let recorded = &server.requests()[0];
    assert_eq!(recorded.header("host"), Some(server.ip_port_string().as_str()));
    assert_eq!(recorded.header("accept-encoding"), Some("gzip"));
    assert!(recorded.header("user-agent").unwrap().starts_with("tandem/"));
    assert!(recorded.header("content-length").is_none());

    Ok(())
}

#[tokio::test]
async fn transparent_gzip() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"Hello,World!")?;
    server.enqueue(
        MockResponse::new(200)
            .header("content-encoding", "gzip")
            .body(encoder.finish()?),
    );

    let c = Client::new();

    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.text()?, "Hello,World!");
    assert!(res.headers().get("content-encoding").is_none());
    assert!(res.headers().get("content-length").is_none());

    Ok(())
}

#[tokio::test]
async fn explicit_accept_encoding_is_left_alone() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"raw")?;
    let encoded = encoder.finish()?;
    server.enqueue(
        MockResponse::new(200)
            .header("content-encoding", "gzip")
            .body(encoded.clone()),
    );

    let c = Client::new();

    let mut req = get(&server.url("/"))?;
    req.headers_mut().insert(ACCEPT_ENCODING, "gzip".parse()?);
    let res = c.new_call(req).execute().await?;
    assert_eq!(res.body().as_ref(), encoded.as_slice());
    assert_eq!(res.headers().get("content-encoding").unwrap(), "gzip");

    Ok(())
}

#[derive(Default)]
struct Jar(Mutex<Vec<String>>);

impl CookieJar for Jar {
    fn save_from_response(&self, _: &Uri, cookies: Vec<String>) {
        let mut jar = self.0.lock().unwrap();
        for cookie in cookies {
            // keep name=value pair only.
            let pair = cookie.split(';').next().unwrap_or_default().trim().to_owned();
            jar.push(pair);
        }
    }

    fn load_for_request(&self, _: &Uri) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn cookies_round_trip() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(
        MockResponse::new(200)
            .header("set-cookie", "session=abc; Path=/")
            .header("set-cookie", "theme=dark"),
    );

    let jar = Arc::new(Jar::default());

    struct Shared(Arc<Jar>);

    impl CookieJar for Shared {
        fn save_from_response(&self, uri: &Uri, cookies: Vec<String>) {
            self.0.save_from_response(uri, cookies)
        }

        fn load_for_request(&self, uri: &Uri) -> Vec<String> {
            self.0.load_for_request(uri)
        }
    }

    let c = ClientBuilder::new().cookie_jar(Shared(jar.clone())).finish();

    c.new_call(get(&server.url("/login"))?).execute().await?;
    c.new_call(get(&server.url("/profile"))?).execute().await?;

    let requests = server.requests();
    assert!(requests[0].header("cookie").is_none());
    assert_eq!(requests[1].header("cookie"), Some("session=abc; theme=dark"));
    assert_eq!(jar.0.lock().unwrap().len(), 2);

    Ok(())
}

struct Tagger;

impl Interceptor for Tagger {
    async fn intercept(&self, chain: Chain<'_>) -> Result<Response, ClientError> {
        let mut req = chain.request_cloned();
        req.headers_mut().insert("x-tagged", "1".parse().unwrap());
        let res = chain.proceed(req).await?;
        Ok(res)
    }
}

#[tokio::test]
async fn interceptors_see_every_stage() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let network_seen = seen.clone();

    let c = ClientBuilder::new()
        .interceptor(Tagger)
        .network_interceptor(interceptor_fn(move |chain| {
            let seen = network_seen.clone();
            Box::pin(async move {
                let conn = chain.connection().map(|c| c.route().socket_addr());
                let encoding = chain.request().headers().get(ACCEPT_ENCODING).cloned();
                seen.lock().unwrap().push((conn, encoding));
                let req = chain.request_cloned();
                chain.proceed(req).await
            })
        }))
        .finish();

    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.status().as_u16(), 200);

    // network interceptor runs after bridge on an established connection.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Some(server.addr()));
    assert_eq!(seen[0].1.as_ref().unwrap(), "gzip");
    assert_eq!(server.requests()[0].header("x-tagged"), Some("1"));

    Ok(())
}

#[tokio::test]
async fn network_interceptor_can_not_retarget() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = ClientBuilder::new()
        .network_interceptor(interceptor_fn(|chain| {
            Box::pin(async move {
                let mut req = chain.request_cloned();
                *req.uri_mut() = "http://127.0.0.2:1/".parse().unwrap();
                chain.proceed(req).await
            })
        }))
        .finish();

    let err = c.new_call(get(&server.url("/"))?).execute().await.unwrap_err();
    assert!(matches!(err, ClientError::Chain(ChainError::NetworkRetarget)));
    assert_eq!(err.kind(), ErrorKind::Programming);
    assert_eq!(server.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn network_interceptor_body_is_framed() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = ClientBuilder::new()
        .network_interceptor(interceptor_fn(|chain| {
            Box::pin(async move {
                let mut req = chain.request_cloned();
                *req.body_mut() = Body::from("late body");
                chain.proceed(req).await
            })
        }))
        .finish();

    c.new_call(get(&server.url("/"))?).execute().await?;

    let recorded = &server.requests()[0];
    assert_eq!(recorded.header("content-length"), Some("9"));
    assert_eq!(recorded.body.as_ref(), b"late body");

    Ok(())
}
