use std::sync::Arc;
use std::time::Duration;

use jobload_core::job_metrics::JobMetrics;
use jobload_core::pipeline::{HealthError, PipelineClient, PollError, StreamError, SubmitError};
use jobload_core::workload::{IterationContext, Workload};
use jobload_core::{
    Auth, Disposition, ManualClock, ObservationStrategy, PipelineConfig, SharedClock, SystemClock,
    TerminalStatus, classify,
};
use jobload_http::{HttpClient, TransportErrorKind};
use jobload_metrics::{MetricValue, Registry, TrendSummary};
use jobload_testserver::{EVENT_TS_STEP, MockBehavior, PATH_HEALTH, STAGES, StreamScript, TestServer};

async fn server(script: StreamScript) -> TestServer {
    TestServer::start_with(MockBehavior {
        script,
        ..MockBehavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("failed to start test server: {e}"))
}

fn config(server: &TestServer) -> PipelineConfig {
    let mut cfg = PipelineConfig::new(server.base_url()).unwrap_or_else(|e| panic!("{e}"));
    cfg.stream_timeout = Duration::from_secs(5);
    cfg.poll_interval = Duration::from_millis(10);
    cfg.poll_max_attempts = 10;
    cfg.result_settle = Duration::from_millis(10);
    cfg
}

fn client(cfg: PipelineConfig) -> PipelineClient {
    client_with_clock(cfg, Arc::new(SystemClock))
}

fn client_with_clock(cfg: PipelineConfig, clock: SharedClock) -> PipelineClient {
    let metrics = JobMetrics::register(Arc::new(Registry::default())).unwrap_or_else(|e| panic!("{e}"));
    PipelineClient::new(Arc::new(cfg), HttpClient::default(), clock, metrics)
        .unwrap_or_else(|e| panic!("{e}"))
}

fn context(client: &PipelineClient) -> IterationContext {
    IterationContext::new(1, 0, client.clock().as_ref())
}

fn trend(client: &PipelineClient, name: &str) -> TrendSummary {
    let summary = client.metrics().registry().summarize();
    match summary.into_iter().find(|m| m.name == name).map(|m| m.values) {
        Some(MetricValue::Trend(t)) => t,
        other => panic!("{name}: expected a trend, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_then_stream_observes_every_stage() {
    let server = server(StreamScript::Complete).await;
    let mut cfg = config(&server);
    cfg.auth = Auth::Bearer("t0k".into());
    cfg.idempotency_keys = true;
    let client = client(cfg);

    let job = client
        .submit("key-1")
        .await
        .unwrap_or_else(|e| panic!("submit: {e}"));
    assert_eq!(job.job_id, "job-1");
    assert!(job.stream_url.is_some() && job.result_url.is_some());

    let observed = client
        .subscribe(&job, Duration::from_secs(5))
        .await
        .unwrap_or_else(|e| panic!("subscribe: {e}"));
    assert_eq!(observed.terminal, Some(TerminalStatus::Completed));
    assert!(observed.time_to_first_event.is_some());

    let outcome = classify(&client.config().expected_stages, &observed, false);
    assert_eq!(outcome.disposition, Disposition::Completed);
    assert!(outcome.missing.is_empty());
    for record in &observed.records {
        assert!(record.duration.is_some(), "{} has no duration", record.name);
    }

    let metrics = client.metrics();
    assert_eq!(metrics.jobs_submitted.get_counter(), 1);
    assert_eq!(metrics.submit_success_rate.get_rate(), (1, 1));
    assert_eq!(metrics.stream_connected.get_counter(), 1);
    assert_eq!(metrics.active_streams.get_gauge(), 0);
    assert_eq!(server.stats().saw_auth_header(), 1);
    assert_eq!(server.stats().saw_idempotency_key(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn duplicate_completions_are_counted_once() {
    let server = server(StreamScript::Duplicates).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let observed = client
        .subscribe(&job, Duration::from_secs(5))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(observed.duplicates, 4);
    assert_eq!(
        classify(&client.config().expected_stages, &observed, false).disposition,
        Disposition::Completed
    );

    server.shutdown().await;
}

#[tokio::test]
async fn early_done_leaves_a_partial_job() {
    let server = server(StreamScript::Partial).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let observed = client
        .subscribe(&job, Duration::from_secs(5))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let outcome = classify(&client.config().expected_stages, &observed, false);
    assert_eq!(outcome.disposition, Disposition::Partial);
    assert_eq!(outcome.completed, vec!["vision", "rule"]);
    assert_eq!(outcome.missing, vec!["answer", "reward"]);

    server.shutdown().await;
}

#[tokio::test]
async fn failed_terminal_event_keeps_completed_stages() {
    let server = server(StreamScript::Failed).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let observed = client
        .subscribe(&job, Duration::from_secs(5))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(observed.terminal, Some(TerminalStatus::Failed));
    let outcome = classify(&client.config().expected_stages, &observed, false);
    assert_eq!(outcome.disposition, Disposition::Partial);
    assert_eq!(outcome.completed, vec!["vision"]);

    server.shutdown().await;
}

#[tokio::test]
async fn hung_stream_times_out_with_what_arrived() {
    let server = server(StreamScript::Hang).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let err = client
        .subscribe(&job, Duration::from_millis(300))
        .await
        .err()
        .unwrap_or_else(|| panic!("expected a timeout"));

    let StreamError::Timeout { elapsed, partial } = err else {
        panic!("expected a timeout, got {err}");
    };
    assert!(elapsed >= Duration::from_millis(300));
    assert!(partial.is_completed("vision"));

    let outcome = classify(&client.config().expected_stages, &partial, true);
    assert_eq!(outcome.disposition, Disposition::Timeout);
    assert_eq!(client.metrics().active_streams.get_gauge(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn non_event_stream_response_is_a_protocol_mismatch() {
    let server = server(StreamScript::WrongContentType).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let err = client
        .subscribe(&job, Duration::from_secs(5))
        .await
        .err()
        .unwrap_or_else(|| panic!("expected a protocol mismatch"));

    assert!(
        matches!(&err, StreamError::ProtocolMismatch { status: 200, content_type: Some(ct) } if ct.starts_with("application/json")),
        "{err}"
    );
    assert_eq!(client.metrics().stream_errors.get_counter(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn polling_waits_through_not_found_and_pending() {
    let server = server(StreamScript::Complete).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let observed = client
        .poll(&job, Duration::from_millis(10), 5)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    // 404, pending, completed.
    assert_eq!(server.stats().polls_total(), 3);
    assert_eq!(client.metrics().poll_requests.get_counter(), 3);
    assert_eq!(
        classify(&client.config().expected_stages, &observed, false).disposition,
        Disposition::Completed
    );

    server.shutdown().await;
}

#[tokio::test]
async fn polling_gives_up_after_max_attempts() {
    let server = server(StreamScript::Complete).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let err = client.poll(&job, Duration::from_millis(10), 1).await;

    assert!(matches!(err, Err(PollError::Exhausted { attempts: 1 })));
    assert_eq!(server.stats().polls_total(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn polling_reports_job_failure() {
    let server = server(StreamScript::Failed).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let err = client.poll(&job, Duration::from_millis(10), 10).await;

    assert!(matches!(err, Err(PollError::JobFailed { attempts: 3 })));

    server.shutdown().await;
}

#[tokio::test]
async fn polled_completion_without_reward_still_completes_every_stage() {
    let server = server(StreamScript::NoReward).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let observed = client
        .poll(&job, Duration::from_millis(10), 10)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let outcome = classify(&client.config().expected_stages, &observed, false);
    assert_eq!(outcome.disposition, Disposition::Completed);
    assert!(outcome.missing.is_empty());
    let reward = observed
        .record("reward")
        .and_then(|r| r.payload.as_ref())
        .unwrap_or_else(|| panic!("reward stage has no payload"));
    assert_eq!(reward, &serde_json::json!({ "reward": null }));

    server.shutdown().await;
}

#[tokio::test]
async fn polled_and_streamed_no_reward_jobs_record_the_same_outcome() {
    for strategy in [ObservationStrategy::Stream, ObservationStrategy::Poll] {
        let server = server(StreamScript::NoReward).await;
        let mut cfg = config(&server);
        cfg.strategy = strategy;
        let workload = Workload::new(client(cfg));

        let report = workload.run_iteration(&context(workload.client())).await;
        assert_eq!(
            report.outcome.map(|o| o.disposition),
            Some(Disposition::Completed),
            "{strategy}"
        );

        let metrics = workload.client().metrics();
        assert_eq!(metrics.completion_rate.get_rate(), (1, 1), "{strategy}");
        assert_eq!(metrics.reward_rate.get_rate(), (1, 0), "{strategy}");
        assert_eq!(metrics.rewards_missing.get_counter(), 1, "{strategy}");

        server.shutdown().await;
    }
}

#[tokio::test]
async fn always_pending_job_exhausts_every_poll_attempt() {
    let server = server(StreamScript::Pending).await;
    let client = client(config(&server));

    let job = client.submit("k").await.unwrap_or_else(|e| panic!("{e}"));
    let err = client.poll(&job, Duration::from_millis(5), 4).await;

    assert!(matches!(err, Err(PollError::Exhausted { attempts: 4 })), "{err:?}");
    assert_eq!(server.stats().polls_total(), 4);
    assert_eq!(client.metrics().poll_requests.get_counter(), 4);

    server.shutdown().await;
}

#[tokio::test]
async fn polled_iteration_that_never_finishes_is_a_timeout() {
    let server = server(StreamScript::Pending).await;
    let mut cfg = config(&server);
    cfg.strategy = ObservationStrategy::Poll;
    cfg.poll_max_attempts = 3;
    let workload = Workload::new(client(cfg));

    let report = workload.run_iteration(&context(workload.client())).await;
    assert_eq!(
        report.outcome.map(|o| o.disposition),
        Some(Disposition::Timeout)
    );
    assert_eq!(server.stats().polls_total(), 3);
    assert_eq!(workload.client().metrics().jobs_timeout.get_counter(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn manual_clock_fixes_stage_and_pipeline_durations() {
    const EPOCH: f64 = 1_700_000_000.0;
    let server = TestServer::start_with(MockBehavior {
        event_epoch: Some(EPOCH),
        event_delay: Duration::from_millis(1),
        ..MockBehavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));
    let clock = Arc::new(ManualClock::new(EPOCH - 2.0));
    let workload = Workload::new(client_with_clock(config(&server), clock.clone()));
    let ctx = context(workload.client());

    let job = workload
        .client()
        .submit(&ctx.idempotency_key)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    clock.advance(Duration::from_millis(1500));
    let report = workload.follow(&ctx, job).await;
    assert_eq!(
        report.outcome.map(|o| o.disposition),
        Some(Disposition::Completed)
    );

    let client = workload.client();
    let step_ms = EVENT_TS_STEP * 1000.0;
    for stage in STAGES {
        let t = trend(client, &format!("stage_{stage}_duration"));
        assert_eq!((t.count, t.min, t.max), (1, Some(step_ms), Some(step_ms)), "{stage}");
    }
    let pipeline = trend(client, "pipeline_duration");
    assert_eq!((pipeline.count, pipeline.max), (1, Some(1500.0)));
    // The stream opens at EPOCH - 0.5 on the manual clock; the first event is stamped EPOCH.
    assert_eq!(trend(client, "time_to_first_event").max, Some(500.0));

    server.shutdown().await;
}

#[tokio::test]
async fn health_check_accepts_a_healthy_pipeline() {
    let server = server(StreamScript::Complete).await;
    let client = client(config(&server));

    client
        .check_health(PATH_HEALTH)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(server.stats().health_checks(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn health_check_reports_the_failing_status() {
    let server = TestServer::start_with(MockBehavior {
        unhealthy: true,
        ..MockBehavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));
    let client = client(config(&server));

    let err = client.check_health(PATH_HEALTH).await;
    assert!(matches!(err, Err(HealthError::Status { status: 503 })), "{err:?}");

    server.shutdown().await;
}

#[tokio::test]
async fn unreachable_pipeline_fails_submit_with_a_connect_kind() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or_else(|e| panic!("{e}"));
    let mut cfg = PipelineConfig::new(&format!("http://127.0.0.1:{port}"))
        .unwrap_or_else(|e| panic!("{e}"));
    cfg.request_timeout = Duration::from_secs(2);
    let client = client(cfg);

    let err = client
        .submit("k")
        .await
        .err()
        .unwrap_or_else(|| panic!("expected a transport failure"));
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Connect), "{err}");
    assert_eq!(client.metrics().submit_errors.get_counter(), 1);
}

#[tokio::test]
async fn rejected_submit_is_counted_as_a_failure() {
    let server = TestServer::start_with(MockBehavior {
        reject_submit: true,
        ..MockBehavior::default()
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));
    let client = client(config(&server));

    let err = client.submit("k").await;
    assert!(matches!(err, Err(SubmitError::Status { status: 503 })));
    assert_eq!(client.metrics().submit_errors.get_counter(), 1);
    assert_eq!(client.metrics().submit_success_rate.get_rate(), (1, 0));

    server.shutdown().await;
}

#[tokio::test]
async fn stream_then_poll_falls_back_when_the_stream_is_unusable() {
    let server = server(StreamScript::WrongContentType).await;
    let mut cfg = config(&server);
    cfg.strategy = ObservationStrategy::StreamThenPoll;
    let workload = Workload::new(client(cfg));

    let report = workload.run_iteration(&context(workload.client())).await;
    let outcome = report.outcome.unwrap_or_else(|| panic!("job was not submitted"));
    assert_eq!(outcome.disposition, Disposition::Completed);

    let metrics = workload.client().metrics();
    assert_eq!(metrics.jobs_completed.get_counter(), 1);
    assert_eq!(metrics.reward_rate.get_rate(), (1, 1));
    assert!(server.stats().polls_total() >= 3);

    server.shutdown().await;
}

#[tokio::test]
async fn streamed_iteration_fetches_result_when_asked() {
    let server = server(StreamScript::NoReward).await;
    let mut cfg = config(&server);
    cfg.fetch_result = true;
    let workload = Workload::new(client(cfg));

    let report = workload.run_iteration(&context(workload.client())).await;
    assert_eq!(
        report.outcome.map(|o| o.disposition),
        Some(Disposition::Completed)
    );

    let metrics = workload.client().metrics();
    assert_eq!(metrics.rewards_missing.get_counter(), 1);
    // The first result fetch of a job answers 404.
    assert_eq!(metrics.result_errors.get_counter(), 1);
    assert_eq!(server.stats().polls_total(), 1);

    server.shutdown().await;
}
