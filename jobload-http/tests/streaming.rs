use std::time::Duration;

use bytes::Bytes;
use jobload_http::{HttpClient, HttpRequest};
use jobload_testserver::{MockBehavior, PATH_SUBMIT, StreamScript, TestServer};

async fn submit(client: &HttpClient, server: &TestServer) -> serde_json::Value {
    let res = client
        .request(
            HttpRequest::post_owned(server.url(PATH_SUBMIT), Bytes::from_static(b"{}"))
                .header("content-type", "application/json"),
        )
        .await
        .unwrap_or_else(|e| panic!("submit: {e}"));
    assert_eq!(res.status, 202);
    serde_json::from_slice(&res.body).unwrap_or_else(|e| panic!("{e}"))
}

fn field(body: &serde_json::Value, name: &str) -> String {
    body.get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| panic!("missing {name} in {body}"))
}

#[tokio::test]
async fn stream_body_arrives_in_chunks_until_close() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let client = HttpClient::default();
    let job = submit(&client, &server).await;

    let mut stream = client
        .open_stream(
            HttpRequest::get_owned(server.url(&field(&job, "stream_url")))
                .header("accept", "text/event-stream"),
        )
        .await
        .unwrap_or_else(|e| panic!("open: {e}"));
    assert!(stream.is_success());
    assert_eq!(stream.header("content-type"), Some("text/event-stream"));

    let mut chunks = 0usize;
    let mut body = Vec::new();
    while let Some(chunk) = stream
        .next_chunk()
        .await
        .unwrap_or_else(|e| panic!("read: {e}"))
    {
        chunks += 1;
        body.extend_from_slice(&chunk);
    }

    let text = String::from_utf8(body).unwrap_or_else(|e| panic!("{e}"));
    assert!(chunks > 1, "chunks={chunks}");
    assert!(text.starts_with("data: "));
    assert!(text.contains("\"stage\":\"done\""));

    server.shutdown().await;
}

#[tokio::test]
async fn stream_timeout_covers_headers_only() {
    let server = TestServer::start_with(MockBehavior {
        script: StreamScript::Complete,
        event_delay: Duration::from_millis(40),
        ..MockBehavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));
    let client = HttpClient::default();
    let job = submit(&client, &server).await;

    let mut stream = client
        .open_stream(
            HttpRequest::get_owned(server.url(&field(&job, "stream_url")))
                .timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_or_else(|e| panic!("open: {e}"));

    // Nine events at 40ms each outlive the 100ms head timeout.
    let mut total = 0usize;
    while let Some(chunk) = stream
        .next_chunk()
        .await
        .unwrap_or_else(|e| panic!("read: {e}"))
    {
        total += chunk.len();
    }
    assert!(total > 0);

    server.shutdown().await;
}

#[tokio::test]
async fn buffered_request_times_out_on_hung_stream() {
    let server = TestServer::start_with(MockBehavior {
        script: StreamScript::Hang,
        ..MockBehavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));
    let client = HttpClient::default();
    let job = submit(&client, &server).await;

    let err = client
        .request(
            HttpRequest::get_owned(server.url(&field(&job, "stream_url")))
                .timeout(Duration::from_millis(200)),
        )
        .await
        .err()
        .unwrap_or_else(|| panic!("expected a timeout"));
    assert!(err.is_timeout(), "{err}");

    server.shutdown().await;
}

#[tokio::test]
async fn result_endpoint_reports_not_found_first() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let client = HttpClient::default();
    let job = submit(&client, &server).await;
    let url = server.url(&field(&job, "result_url"));

    let first = client.get(&url).await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(first.status, 404);
    let second = client.get(&url).await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(second.status, 200);
    assert!(second.body_utf8().is_some_and(|b| b.contains("pending")));

    server.shutdown().await;
}
