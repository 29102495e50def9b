use std::{sync::Arc, time::Duration};

use tandem_client::{
    Body, BodyError, Client, ClientBuilder, Dispatcher, Request, ResponseSource, callback_fn,
    bytes::Bytes,
    error::{ChainError, Error as ClientError, TimeoutError},
    http,
};
use tandem_test::{Error, MockResponse, SocketPolicy, TestServer};
use tokio::sync::{mpsc, oneshot};

fn get(url: &str) -> Result<Request, Error> {
    Ok(http::Request::get(url).body(Body::Empty)?)
}

#[tokio::test]
async fn h1_get_reuses_connection() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.set_default(MockResponse::new(200).body("GET Response"));

    let c = Client::new();

    for _ in 0..3 {
        let res = c.new_call(get(&server.url("/"))?).execute().await?;
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.source(), ResponseSource::Network);
        assert!(res.route().is_some());
        assert_eq!(res.text()?, "GET Response");
    }

    assert_eq!(server.connection_count(), 1);
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].sequence, 2);
    assert_eq!(c.connection_pool().idle_connection_count(), 1);

    Ok(())
}

#[tokio::test]
async fn h1_post_body() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = Client::new();

    let body = "Hello,World!".repeat(1024);
    let req = http::Request::post(server.url("/")).body(Body::from(body.clone()))?;
    let res = c.new_call(req).execute().await?;
    assert_eq!(res.status().as_u16(), 200);

    let recorded = &server.requests()[0];
    assert_eq!(recorded.method, "POST");
    assert_eq!(recorded.header("content-length"), Some("12288"));
    assert_eq!(recorded.body, body.as_bytes());

    Ok(())
}

#[tokio::test]
async fn h1_streaming_body_is_chunked() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = Client::new();

    let chunks = ["Hello", ",", "World!"].map(|s| Ok::<_, BodyError>(Bytes::from_static(s.as_bytes())));
    let req = http::Request::put(server.url("/upload")).body(Body::stream(futures_util::stream::iter(chunks)))?;
    let res = c.new_call(req).execute().await?;
    assert_eq!(res.status().as_u16(), 200);

    let recorded = &server.requests()[0];
    assert_eq!(recorded.header("transfer-encoding"), Some("chunked"));
    assert_eq!(recorded.body, "Hello,World!".as_bytes());

    Ok(())
}

#[tokio::test]
async fn double_execute() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = Client::new();
    let call = c.new_call(get(&server.url("/"))?);

    call.execute().await?;
    assert!(call.is_executed());

    let err = call.execute().await.unwrap_err();
    assert!(matches!(err, ClientError::Chain(ChainError::AlreadyExecuted)));

    // a clone is a fresh call of the same request.
    let res = call.clone().execute().await?;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(server.request_count(), 2);

    Ok(())
}

#[tokio::test]
async fn cancel_mid_read() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(
        MockResponse::new(200)
            .body("0123456789".repeat(10))
            .policy(SocketPolicy::StallBody),
    );

    let c = Client::new();
    let call = Arc::new(c.new_call(get(&server.url("/"))?));

    let handle = {
        let call = call.clone();
        tokio::spawn(async move { call.execute().await })
    };

    server.wait_for_requests(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    call.cancel();

    let err = handle.await?.unwrap_err();
    assert!(matches!(err, ClientError::Canceled));
    assert!(call.is_canceled());

    // aborted connection is not reused.
    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(server.connection_count(), 2);

    Ok(())
}

#[tokio::test]
async fn canceled_before_execute() -> Result<(), Error> {
    let server = TestServer::start().await?;

    let c = Client::new();
    let call = c.new_call(get(&server.url("/"))?);
    call.cancel();

    let err = call.execute().await.unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(server.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn call_timeout_spans_call() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::new(200).policy(SocketPolicy::NoResponse));

    let c = ClientBuilder::new().call_timeout(Duration::from_millis(200)).finish();

    let err = c.new_call(get(&server.url("/"))?).execute().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(TimeoutError::Call)));
    assert!(err.is_timeout());

    Ok(())
}

#[tokio::test]
async fn read_timeout() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.enqueue(MockResponse::new(200).policy(SocketPolicy::NoResponse));

    let c = ClientBuilder::new().read_timeout(Duration::from_millis(100)).finish();

    let err = c.new_call(get(&server.url("/"))?).execute().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(TimeoutError::Read)));

    Ok(())
}

#[tokio::test]
async fn stale_pooled_connection_is_replaced() -> Result<(), Error> {
    let server = TestServer::start().await?;
    // server closes connection silently after first response.
    server.enqueue(MockResponse::new(200).body("first").policy(SocketPolicy::CloseAfter));
    server.enqueue(MockResponse::new(200).body("second"));

    let c = Client::new();

    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.text()?, "first");

    tokio::time::sleep(Duration::from_millis(50)).await;

    let res = c.new_call(get(&server.url("/"))?).execute().await?;
    assert_eq!(res.text()?, "second");
    assert_eq!(server.connection_count(), 2);

    Ok(())
}

#[tokio::test]
async fn enqueue_respects_per_host_limit() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.set_default(MockResponse::new(200).delay(Duration::from_millis(100)));

    let dispatcher = Dispatcher::default();
    dispatcher.set_max_requests_per_host(1)?;
    let c = ClientBuilder::new().dispatcher(dispatcher.clone()).finish();

    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = oneshot::channel();
        c.new_call(get(&server.url("/"))?).enqueue(tx);
        receivers.push(rx);
    }

    assert_eq!(dispatcher.running_calls_count(), 1);
    assert_eq!(dispatcher.queued_calls_count(), 2);

    for rx in receivers {
        let res = rx.await??;
        assert_eq!(res.status().as_u16(), 200);
    }

    assert_eq!(server.request_count(), 3);
    assert_eq!(dispatcher.queued_calls_count(), 0);

    Ok(())
}

#[tokio::test]
async fn per_host_limit_bounds_server_concurrency() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.set_default(MockResponse::new(200).delay(Duration::from_millis(30)));

    let dispatcher = Dispatcher::default();
    dispatcher.set_max_requests_per_host(2)?;
    let c = ClientBuilder::new().dispatcher(dispatcher.clone()).finish();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..10 {
        let tx = tx.clone();
        let running = dispatcher.clone();
        c.new_call(get(&server.url(&format!("/{i}")))?)
            .enqueue(callback_fn(move |res| {
                let status = res.map(|res| res.status().as_u16()).ok();
                let _ = tx.send((i, status, running.running_calls_count()));
            }));
    }
    drop(tx);

    assert_eq!(dispatcher.running_calls_count(), 2);
    assert_eq!(dispatcher.queued_calls_count(), 8);

    let mut done = Vec::new();
    while let Some((i, status, running)) = rx.recv().await {
        assert_eq!(status, Some(200));
        assert!(running <= 2);
        done.push(i);
    }
    assert_eq!(done.len(), 10);

    assert!(server.max_concurrency() <= 2);
    assert_eq!(dispatcher.running_calls_count(), 0);
    assert_eq!(dispatcher.queued_calls_count(), 0);

    // calls start in enqueue order. a request overtakes at most the one running beside it.
    let arrived = server
        .requests()
        .iter()
        .map(|r| r.path[1..].parse::<usize>().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(arrived.len(), 10);
    for (position, index) in arrived.iter().enumerate() {
        assert!(*index <= position + 1, "{arrived:?}");
    }

    Ok(())
}

#[tokio::test]
async fn cancel_all_fails_queued_calls() -> Result<(), Error> {
    let server = TestServer::start().await?;
    server.set_default(MockResponse::new(200).policy(SocketPolicy::NoResponse));

    let dispatcher = Dispatcher::default();
    dispatcher.set_max_requests(1)?;
    let c = ClientBuilder::new().dispatcher(dispatcher.clone()).finish();

    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    c.new_call(get(&server.url("/a"))?).enqueue(tx1);
    c.new_call(get(&server.url("/b"))?).enqueue(tx2);

    server.wait_for_requests(1).await;
    dispatcher.cancel_all();

    assert!(rx1.await?.unwrap_err().is_canceled());
    assert!(rx2.await?.unwrap_err().is_canceled());
    assert_eq!(server.request_count(), 1);

    Ok(())
}
