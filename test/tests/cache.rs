use std::sync::Arc;

use tandem_client::{
    Body, ClientBuilder, MemoryCache, Request, ResponseSource,
    http::{self, header::CACHE_CONTROL},
};
use tandem_test::{Error, MockResponse, TestServer};

fn get(url: &str) -> Result<Request, Error> {
    Ok(http::Request::get(url).body(Body::Empty)?)
}

#[tokio::test]
async fn fresh_response_is_served_from_cache() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(
        MockResponse::new(200)
            .header("cache-control", "max-age=60")
            .body("cached body"),
    );

    let cache = Arc::new(MemoryCache::new(1024 * 1024));
    let c = ClientBuilder::new().cache(cache.clone()).finish();

    let res = c.new_call(get(&server.url("/doc"))?).execute().await?;
    assert_eq!(res.source(), ResponseSource::Network);
    assert_eq!(cache.len(), 1);

    let res = c.new_call(get(&server.url("/doc"))?).execute().await?;
    assert_eq!(res.source(), ResponseSource::Cache);
    assert_eq!(res.text()?, "cached body");
    assert!(res.route().is_none());

    assert_eq!(server.request_count(), 1);
    assert_eq!(cache.request_count(), 2);
    assert_eq!(cache.network_count(), 1);
    assert_eq!(cache.hit_count(), 1);

    Ok(())
}

#[tokio::test]
async fn stale_response_is_validated() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(
        MockResponse::new(200)
            .header("cache-control", "max-age=0")
            .header("etag", "\"v1\"")
            .header("x-version", "1")
            .body("validated body"),
    );
    server.enqueue(MockResponse::new(304).header("x-version", "2"));

    let cache = Arc::new(MemoryCache::new(1024 * 1024));
    let c = ClientBuilder::new().cache(cache.clone()).finish();

    c.new_call(get(&server.url("/doc"))?).execute().await?;

    let res = c.new_call(get(&server.url("/doc"))?).execute().await?;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.source(), ResponseSource::ConditionalCache);
    assert_eq!(res.text()?, "validated body");
    assert_eq!(res.headers().get("x-version").unwrap(), "2");

    let requests = server.requests();
    assert_eq!(requests[1].header("if-none-match"), Some("\"v1\""));
    assert_eq!(cache.hit_count(), 1);

    Ok(())
}

#[tokio::test]
async fn only_if_cached_without_entry() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = ClientBuilder::new().cache(MemoryCache::new(1024)).finish();

    let mut req = get(&server.url("/"))?;
    req.headers_mut().insert(CACHE_CONTROL, "only-if-cached".parse()?);

    let res = c.new_call(req).execute().await?;
    assert_eq!(res.status().as_u16(), 504);
    assert_eq!(res.source(), ResponseSource::Cache);
    assert_eq!(server.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn unsafe_method_invalidates_entry() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::new(200).header("cache-control", "max-age=60").body("v1"));

    let cache = Arc::new(MemoryCache::new(1024 * 1024));
    let c = ClientBuilder::new().cache(cache.clone()).finish();

    c.new_call(get(&server.url("/doc"))?).execute().await?;
    assert_eq!(cache.len(), 1);

    let req = http::Request::post(server.url("/doc")).body(Body::from("update"))?;
    c.new_call(req).execute().await?;
    assert_eq!(cache.len(), 0);

    Ok(())
}

#[tokio::test]
async fn no_store_is_not_cached() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.set_default(MockResponse::new(200).header("cache-control", "no-store").body("secret"));

    let cache = Arc::new(MemoryCache::new(1024 * 1024));
    let c = ClientBuilder::new().cache(cache.clone()).finish();

    for _ in 0..2 {
        let res = c.new_call(get(&server.url("/"))?).execute().await?;
        assert_eq!(res.source(), ResponseSource::Network);
    }

    assert_eq!(cache.len(), 0);
    assert_eq!(server.request_count(), 2);

    Ok(())
}
