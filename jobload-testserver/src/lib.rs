use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, sleep};
use tokio_stream::wrappers::ReceiverStream;

pub const PATH_SUBMIT: &str = "/api/v1/scan";
pub const PATH_STREAM: &str = "/api/v1/stream";
pub const PATH_RESULT: &str = "/api/v1/scan/result";
pub const PATH_HEALTH: &str = "/api/health";

/// Spacing between event timestamps when [`MockBehavior::event_epoch`] is set.
pub const EVENT_TS_STEP: f64 = 0.25;

pub const STAGES: [&str; 4] = ["vision", "rule", "answer", "reward"];

/// What the stream endpoint emits for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamScript {
    /// Every stage starts and completes, then `done`.
    #[default]
    Complete,
    /// Only `vision` and `rule` complete before `done`.
    Partial,
    /// Every `completed` event is sent twice.
    Duplicates,
    /// Complete, but the reward payload is null.
    NoReward,
    /// `vision` completes, then a failed terminal event.
    Failed,
    /// `vision` completes, then the stream stays open without further events.
    Hang,
    /// Answers with `application/json` instead of an event stream.
    WrongContentType,
    /// Streams like `Hang`; every result poll after the first says `pending`.
    Pending,
}

impl std::str::FromStr for StreamScript {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "complete" => Self::Complete,
            "partial" => Self::Partial,
            "duplicates" => Self::Duplicates,
            "no-reward" => Self::NoReward,
            "failed" => Self::Failed,
            "hang" => Self::Hang,
            "wrong-content-type" => Self::WrongContentType,
            "pending" => Self::Pending,
            other => anyhow::bail!("unknown stream script: {other}"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub script: StreamScript,
    /// Delay between stream events.
    pub event_delay: Duration,
    /// Result polls answered with `pending` before the final state.
    /// The very first poll of a job always gets `404`.
    pub pending_polls: u32,
    pub reject_submit: bool,
    /// Send keepalive comment lines between events.
    pub keepalive: bool,
    /// Event `n` of a stream is stamped `event_epoch + n * EVENT_TS_STEP`
    /// instead of the wall clock.
    pub event_epoch: Option<f64>,
    /// The health endpoint answers `503`.
    pub unhealthy: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            script: StreamScript::Complete,
            event_delay: Duration::from_millis(5),
            pending_polls: 1,
            reject_submit: false,
            keepalive: false,
            event_epoch: None,
            unhealthy: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    submits_total: Arc<AtomicU64>,
    streams_total: Arc<AtomicU64>,
    polls_total: Arc<AtomicU64>,
    health_checks: Arc<AtomicU64>,
    saw_auth_header: Arc<AtomicU64>,
    saw_idempotency_key: Arc<AtomicU64>,
}

impl TestServerStats {
    pub fn submits_total(&self) -> u64 {
        self.submits_total.load(Ordering::Relaxed)
    }

    pub fn streams_total(&self) -> u64 {
        self.streams_total.load(Ordering::Relaxed)
    }

    pub fn polls_total(&self) -> u64 {
        self.polls_total.load(Ordering::Relaxed)
    }

    pub fn health_checks(&self) -> u64 {
        self.health_checks.load(Ordering::Relaxed)
    }

    pub fn saw_auth_header(&self) -> u64 {
        self.saw_auth_header.load(Ordering::Relaxed)
    }

    pub fn saw_idempotency_key(&self) -> u64 {
        self.saw_idempotency_key.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Job {
    script: StreamScript,
    polls: AtomicU32,
}

#[derive(Debug, Clone, Default)]
pub struct MockPipeline {
    behavior: Arc<RwLock<MockBehavior>>,
    jobs: Arc<RwLock<HashMap<String, Arc<Job>>>>,
    next_id: Arc<AtomicU64>,
    stats: TestServerStats,
}

impl MockPipeline {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(RwLock::new(behavior)),
            ..Self::default()
        }
    }

    /// Applies to jobs submitted after the call.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write() = behavior;
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().get(id).cloned()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn data_line(event: &Value) -> Bytes {
    Bytes::from(format!("data: {event}\n\n"))
}

fn reward_payload(script: StreamScript) -> Value {
    match script {
        StreamScript::NoReward | StreamScript::Partial => Value::Null,
        _ => json!({ "name": "sprout", "points": 3 }),
    }
}

async fn handle_submit(State(pipeline): State<MockPipeline>, headers: HeaderMap) -> Response {
    let stats = pipeline.stats();
    stats.submits_total.fetch_add(1, Ordering::Relaxed);
    if headers.contains_key(header::AUTHORIZATION) || headers.contains_key(header::COOKIE) {
        stats.saw_auth_header.fetch_add(1, Ordering::Relaxed);
    }
    if headers.contains_key("x-idempotency-key") {
        stats.saw_idempotency_key.fetch_add(1, Ordering::Relaxed);
    }

    let behavior = pipeline.behavior.read().clone();
    if behavior.reject_submit {
        return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
    }

    let id = format!("job-{}", pipeline.next_id.fetch_add(1, Ordering::Relaxed) + 1);
    pipeline.jobs.write().insert(
        id.clone(),
        Arc::new(Job {
            script: behavior.script,
            polls: AtomicU32::new(0),
        }),
    );

    let body = json!({
        "job_id": id,
        "status": "queued",
        "stream_url": format!("{PATH_STREAM}?job_id={id}"),
        "result_url": format!("{PATH_RESULT}/{id}"),
    });
    (StatusCode::ACCEPTED, axum::Json(body)).into_response()
}

fn stream_events(script: StreamScript) -> Vec<Value> {
    let stages: &[&str] = match script {
        StreamScript::Partial => &STAGES[..2],
        StreamScript::Failed | StreamScript::Hang | StreamScript::Pending => &STAGES[..1],
        _ => &STAGES,
    };

    let mut out = Vec::new();
    for stage in stages {
        out.push(json!({ "stage": stage, "status": "started" }));
        let result = if *stage == "reward" {
            json!({ "reward": reward_payload(script) })
        } else {
            json!({ "ok": true })
        };
        let completed = json!({ "stage": stage, "status": "completed", "result": result });
        if script == StreamScript::Duplicates {
            out.push(completed.clone());
        }
        out.push(completed);
    }

    match script {
        StreamScript::Failed => out.push(json!({ "stage": "done", "status": "failed" })),
        StreamScript::Hang | StreamScript::Pending => {}
        _ => out.push(json!({ "stage": "done", "status": "completed" })),
    }
    out
}

async fn handle_stream(
    State(pipeline): State<MockPipeline>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    pipeline.stats.streams_total.fetch_add(1, Ordering::Relaxed);

    let Some(job) = query.get("job_id").and_then(|id| pipeline.job(id)) else {
        return (StatusCode::NOT_FOUND, "unknown job").into_response();
    };
    if job.script == StreamScript::WrongContentType {
        return (StatusCode::OK, axum::Json(json!({ "status": "pending" }))).into_response();
    }

    let behavior = pipeline.behavior.read().clone();
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);

    tokio::spawn(async move {
        let connected = json!({ "status": "connected" });
        if tx.send(Ok(data_line(&connected))).await.is_err() {
            return;
        }

        for (seq, mut event) in stream_events(job.script).into_iter().enumerate() {
            sleep(behavior.event_delay).await;
            if behavior.keepalive && tx.send(Ok(Bytes::from_static(b": keepalive\n\n"))).await.is_err() {
                return;
            }
            if let Some(obj) = event.as_object_mut() {
                let ts = behavior
                    .event_epoch
                    .map_or_else(unix_now, |epoch| epoch + seq as f64 * EVENT_TS_STEP);
                obj.insert("ts".into(), json!(ts));
                obj.insert("seq".into(), json!(seq));
            }
            if tx.send(Ok(data_line(&event))).await.is_err() {
                return;
            }
        }

        if matches!(job.script, StreamScript::Hang | StreamScript::Pending) {
            tx.closed().await;
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_result(State(pipeline): State<MockPipeline>, Path(id): Path<String>) -> Response {
    pipeline.stats.polls_total.fetch_add(1, Ordering::Relaxed);

    let Some(job) = pipeline.job(&id) else {
        return (StatusCode::NOT_FOUND, "unknown job").into_response();
    };
    let attempt = job.polls.fetch_add(1, Ordering::Relaxed);
    if attempt == 0 {
        return (StatusCode::NOT_FOUND, "not ready").into_response();
    }

    let pending_polls = pipeline.behavior.read().pending_polls;
    let body = match job.script {
        StreamScript::Hang | StreamScript::Pending => json!({ "status": "pending" }),
        _ if attempt <= pending_polls => json!({ "status": "pending" }),
        StreamScript::Failed => json!({ "status": "failed", "error": "rule engine crashed" }),
        script => json!({
            "status": "completed",
            "pipeline_result": { "stages": STAGES },
            "reward": reward_payload(script),
        }),
    };
    (StatusCode::OK, axum::Json(body)).into_response()
}

async fn handle_health(State(pipeline): State<MockPipeline>) -> Response {
    pipeline.stats.health_checks.fetch_add(1, Ordering::Relaxed);
    if pipeline.behavior.read().unhealthy {
        return (StatusCode::SERVICE_UNAVAILABLE, axum::Json(json!({ "status": "down" })))
            .into_response();
    }
    (StatusCode::OK, axum::Json(json!({ "status": "ok" }))).into_response()
}

pub fn router(pipeline: MockPipeline) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_SUBMIT, post(handle_submit))
        .route(PATH_STREAM, get(handle_stream))
        .route(&format!("{PATH_RESULT}/{{id}}"), get(handle_result))
        .with_state(pipeline)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    pipeline: MockPipeline,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(MockBehavior::default()).await
    }

    pub async fn start_with(behavior: MockBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let pipeline = MockPipeline::new(behavior);
        let app = router(pipeline.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            pipeline,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn pipeline(&self) -> &MockPipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> &TestServerStats {
        self.pipeline.stats()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Hung streams keep graceful shutdown waiting.
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
