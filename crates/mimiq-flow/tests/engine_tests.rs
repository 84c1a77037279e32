//! Dispatch-engine integration tests.
//!
//! Every test drives a real registry with a virtual clock and a recording
//! dispatcher, so timing assertions are exact rather than sleep-based.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use mimiq_core::{Clock, OidcSigner, QueueName, TestClock};
use mimiq_flow::{
    DispatchOutcome, DispatchRequest, Dispatcher, NewTask, QueueConfig, QueueState, RateLimits,
    Registry, RegistryOptions, RetryConfig, TaskPayload,
};

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

/// One recorded outbound attempt.
#[derive(Debug, Clone)]
struct CallRecord {
    url: String,
    at: DateTime<Utc>,
    headers: Vec<(String, String)>,
}

impl CallRecord {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    /// Respond immediately with this status.
    Status(u16),
    /// Hold the request for a virtual-clock delay, then respond.
    DelayThen(Duration, u16),
    /// Fail at the network level.
    NetworkError,
}

struct RecordingDispatcher {
    clock: Arc<TestClock>,
    behavior: Behavior,
    calls: Mutex<Vec<CallRecord>>,
}

impl RecordingDispatcher {
    fn new(clock: Arc<TestClock>, behavior: Behavior) -> Self {
        Self {
            clock,
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        request: DispatchRequest,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        self.calls.lock().unwrap().push(CallRecord {
            url: request.url.clone(),
            at: self.clock.now(),
            headers: request.headers.clone(),
        });
        match &self.behavior {
            Behavior::Status(status) => DispatchOutcome::from_status(*status),
            Behavior::NetworkError => DispatchOutcome::network_error("connection refused"),
            Behavior::DelayThen(delay, status) => {
                tokio::select! {
                    () = self.clock.sleep(*delay) => DispatchOutcome::from_status(*status),
                    () = cancel.cancelled() => DispatchOutcome::cancelled(),
                }
            }
        }
    }
}

struct Harness {
    clock: Arc<TestClock>,
    dispatcher: Arc<RecordingDispatcher>,
    registry: Registry,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

// RSA key generation dominates test startup; share one signer.
fn signer() -> Arc<OidcSigner> {
    static SIGNER: OnceLock<Arc<OidcSigner>> = OnceLock::new();
    Arc::clone(SIGNER.get_or_init(|| {
        Arc::new(OidcSigner::new(Some("http://e:9".to_string())).expect("signer"))
    }))
}

fn harness_with(behavior: Behavior, options: RegistryOptions) -> Harness {
    let clock = Arc::new(TestClock::new(t0()));
    let dispatcher = Arc::new(RecordingDispatcher::new(Arc::clone(&clock), behavior));
    let registry = Registry::new(
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
        signer(),
        options,
    );
    Harness {
        clock,
        dispatcher,
        registry,
    }
}

fn harness(behavior: Behavior) -> Harness {
    harness_with(behavior, RegistryOptions::default())
}

fn queue_name(id: &str) -> QueueName {
    format!("projects/p/locations/l/queues/{id}").parse().unwrap()
}

fn http_task(task_id: Option<&str>) -> NewTask {
    NewTask {
        task_id: task_id.map(str::to_string),
        payload: TaskPayload::Http(mimiq_flow::HttpTarget {
            method: http::Method::POST,
            url: "http://target.test/hook".to_string(),
            headers: Vec::new(),
            body: b"{}".to_vec(),
            oidc: None,
        }),
        schedule_time: None,
        dispatch_deadline: None,
    }
}

/// Polls a condition under real time while the engine runs on the
/// virtual clock.
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for {what}");
}

/// Lets in-flight work drain without advancing the virtual clock.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ----------------------------------------------------------------------
// Scenario 1: single successful dispatch
// ----------------------------------------------------------------------

#[tokio::test]
async fn successful_dispatch_removes_the_task() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();

    let created = h.registry.create_task(&queue, http_task(None)).unwrap();
    assert_eq!(created.dispatch_count, 0);
    assert_eq!(created.response_count, 0);
    assert_eq!(created.name.task_id.len(), 32);

    eventually("one dispatch", || h.dispatcher.call_count() == 1).await;
    settle().await;

    assert!(h.registry.list_tasks(&queue).unwrap().is_empty());
    assert!(h.registry.get_task(&created.name).is_err());

    let call = &h.dispatcher.calls()[0];
    assert_eq!(call.url, "http://target.test/hook");
    assert_eq!(call.header("X-CloudTasks-QueueName"), Some("q"));
    assert_eq!(
        call.header("X-CloudTasks-TaskName"),
        Some(created.name.task_id.as_str())
    );
    assert_eq!(call.header("X-CloudTasks-TaskRetryCount"), Some("0"));
    assert_eq!(call.header("X-CloudTasks-TaskExecutionCount"), Some("0"));
}

// ----------------------------------------------------------------------
// Scenario 2: retry spacing under the default policy
// ----------------------------------------------------------------------

#[tokio::test]
async fn retry_backoff_spacing_matches_default_policy() {
    let h = harness(Behavior::Status(405));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    h.registry.create_task(&queue, http_task(None)).unwrap();

    // Backoffs after attempts 1..4 are 0.1, 0.2, 0.4, 0.8 seconds.
    for (attempt, backoff_ms) in [(1, 100), (2, 200), (3, 400), (4, 800)] {
        eventually("attempt", || h.dispatcher.call_count() == attempt).await;
        settle().await;
        assert_eq!(h.dispatcher.call_count(), attempt, "no early retry");
        h.clock.advance(Duration::from_millis(backoff_ms));
    }
    eventually("fifth attempt", || h.dispatcher.call_count() == 5).await;

    let calls = h.dispatcher.calls();
    let spread = calls[4].at - calls[0].at;
    assert!(
        spread >= chrono::Duration::milliseconds(1_500),
        "first five attempts spread only {spread}"
    );

    // The retry count header tracks prior attempts.
    assert_eq!(calls[4].header("X-CloudTasks-TaskRetryCount"), Some("4"));
}

// ----------------------------------------------------------------------
// Scenario 3: max_attempts exhaustion
// ----------------------------------------------------------------------

#[tokio::test]
async fn task_is_dropped_after_max_attempts() {
    let h = harness(Behavior::Status(500));
    let queue = queue_name("q");
    let config = QueueConfig {
        retry: RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        },
        ..QueueConfig::default()
    };
    h.registry.create_queue(queue.clone(), config).unwrap();
    h.registry.create_task(&queue, http_task(None)).unwrap();

    for (attempt, backoff_ms) in [(1, 100), (2, 200)] {
        eventually("attempt", || h.dispatcher.call_count() == attempt).await;
        h.clock.advance(Duration::from_millis(backoff_ms));
    }
    eventually("third attempt", || h.dispatcher.call_count() == 3).await;
    settle().await;
    assert!(h.registry.list_tasks(&queue).unwrap().is_empty());

    // No fourth attempt, however long the clock runs.
    h.clock.advance(Duration::from_secs(3_600));
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 3);
}

// ----------------------------------------------------------------------
// Scenario 4: token bucket burst and refill
// ----------------------------------------------------------------------

#[tokio::test]
async fn burst_limit_gates_the_eleventh_dispatch() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    let config = QueueConfig {
        rate_limits: RateLimits {
            max_dispatches_per_second: 10.0,
            max_burst_size: 10,
            ..RateLimits::default()
        },
        ..QueueConfig::default()
    };
    h.registry.create_queue(queue.clone(), config).unwrap();
    for _ in 0..100 {
        h.registry.create_task(&queue, http_task(None)).unwrap();
    }

    eventually("burst of ten", || h.dispatcher.call_count() == 10).await;
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 10, "token bucket must hold at 10");

    h.clock.advance(Duration::from_millis(100));
    eventually("eleventh dispatch", || h.dispatcher.call_count() == 11).await;

    let calls = h.dispatcher.calls();
    assert!(
        calls[10].at - calls[0].at >= chrono::Duration::milliseconds(100),
        "eleventh dispatch came too early"
    );

    // Refill drains the rest at the configured rate; the bucket caps at
    // the burst size, so time moves in steps the loop can consume.
    for _ in 0..9 {
        h.clock.advance(Duration::from_secs(1));
        settle().await;
    }
    eventually("all hundred dispatched", || {
        h.dispatcher.call_count() == 100
    })
    .await;
}

// ----------------------------------------------------------------------
// Scenario 5: concurrency cap of one serializes dispatches
// ----------------------------------------------------------------------

#[tokio::test]
async fn concurrency_cap_serializes_inflight_dispatches() {
    let h = harness(Behavior::DelayThen(Duration::from_millis(500), 200));
    let queue = queue_name("q");
    let config = QueueConfig {
        rate_limits: RateLimits {
            max_concurrent_dispatches: 1,
            ..RateLimits::default()
        },
        ..QueueConfig::default()
    };
    h.registry.create_queue(queue.clone(), config).unwrap();
    h.registry.create_task(&queue, http_task(None)).unwrap();
    h.registry.create_task(&queue, http_task(None)).unwrap();

    eventually("first dispatch", || h.dispatcher.call_count() == 1).await;
    settle().await;
    assert_eq!(
        h.dispatcher.call_count(),
        1,
        "second dispatch must wait for the first to return"
    );

    h.clock.advance(Duration::from_millis(500));
    eventually("second dispatch", || h.dispatcher.call_count() == 2).await;

    let calls = h.dispatcher.calls();
    assert!(calls[1].at - calls[0].at >= chrono::Duration::milliseconds(500));
}

// ----------------------------------------------------------------------
// Scenario 6: OIDC tokens on outbound requests
// ----------------------------------------------------------------------

#[tokio::test]
async fn oidc_task_carries_a_verifiable_bearer_token() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();

    let task = NewTask {
        task_id: None,
        payload: TaskPayload::Http(mimiq_flow::HttpTarget {
            method: http::Method::POST,
            url: "http://x".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            oidc: Some(mimiq_flow::OidcTokenSpec {
                service_account_email: "a@b".to_string(),
                audience: Some("http://x".to_string()),
            }),
        }),
        schedule_time: None,
        dispatch_deadline: None,
    };
    h.registry.create_task(&queue, task).unwrap();
    eventually("dispatch", || h.dispatcher.call_count() == 1).await;

    let calls = h.dispatcher.calls();
    let bearer = calls[0].header("Authorization").expect("bearer header");
    let token = bearer.strip_prefix("Bearer ").expect("bearer scheme");

    let jwks_json = serde_json::to_string(signer().jwks()).unwrap();
    let jwks: jsonwebtoken::jwk::JwkSet = serde_json::from_str(&jwks_json).unwrap();
    let header = jsonwebtoken::decode_header(token).unwrap();
    let jwk = jwks.find(header.kid.as_deref().unwrap()).expect("kid");
    let key = jsonwebtoken::DecodingKey::from_jwk(jwk).unwrap();
    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);
    validation.set_issuer(&["http://e:9"]);
    validation.set_audience(&["http://x"]);
    // The virtual clock is in the past; expiry is checked by value below.
    validation.validate_exp = false;

    let data =
        jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation).expect("valid jwt");
    assert_eq!(data.claims["iss"], "http://e:9");
    assert_eq!(data.claims["sub"], "a@b");
    assert_eq!(data.claims["email"], "a@b");
    assert_eq!(data.claims["aud"], "http://x");
    let iat = data.claims["iat"].as_i64().unwrap();
    let exp = data.claims["exp"].as_i64().unwrap();
    assert_eq!(iat, t0().timestamp());
    assert_eq!(exp - iat, 3_600);
}

// ----------------------------------------------------------------------
// Deferred scheduling and RunTask
// ----------------------------------------------------------------------

#[tokio::test]
async fn deferred_task_waits_for_its_schedule_time() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();

    let task = NewTask {
        schedule_time: Some(t0() + chrono::Duration::seconds(30)),
        ..http_task(None)
    };
    h.registry.create_task(&queue, task).unwrap();

    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);

    h.clock.advance(Duration::from_secs(29));
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);

    h.clock.advance(Duration::from_secs(1));
    eventually("deferred dispatch", || h.dispatcher.call_count() == 1).await;
}

#[tokio::test]
async fn run_task_forces_immediate_dispatch() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();

    let task = NewTask {
        schedule_time: Some(t0() + chrono::Duration::hours(1)),
        ..http_task(Some("deferred"))
    };
    let created = h.registry.create_task(&queue, task).unwrap();

    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);

    let rearmed = h.registry.run_task(&created.name).unwrap();
    assert_eq!(rearmed.schedule_time, t0());

    eventually("forced dispatch", || h.dispatcher.call_count() == 1).await;
}

// ----------------------------------------------------------------------
// Pause / resume
// ----------------------------------------------------------------------

#[tokio::test]
async fn paused_queue_defers_dispatch_until_resume() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();

    let paused = h.registry.pause_queue(&queue).unwrap();
    assert_eq!(paused.state, QueueState::Paused);

    h.registry.create_task(&queue, http_task(None)).unwrap();
    h.clock.advance(Duration::from_secs(10));
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);

    // The task is still visible while paused.
    assert_eq!(h.registry.list_tasks(&queue).unwrap().len(), 1);

    let resumed = h.registry.resume_queue(&queue).unwrap();
    assert_eq!(resumed.state, QueueState::Running);
    eventually("dispatch after resume", || h.dispatcher.call_count() == 1).await;
}

// ----------------------------------------------------------------------
// Delete / purge semantics
// ----------------------------------------------------------------------

#[tokio::test]
async fn deleted_queue_never_dispatches_again() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    let task = NewTask {
        schedule_time: Some(t0() + chrono::Duration::seconds(5)),
        ..http_task(None)
    };
    h.registry.create_task(&queue, task).unwrap();

    h.registry.delete_queue(&queue).await.unwrap();
    assert!(h.registry.get_queue(&queue).is_err());

    h.clock.advance(Duration::from_secs(60));
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);

    // The name is free again; DELETED queues do not block recreation.
    h.registry
        .create_queue(queue, QueueConfig::default())
        .unwrap();
}

#[tokio::test]
async fn purge_drops_tasks_but_keeps_tombstones() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    let task = NewTask {
        schedule_time: Some(t0() + chrono::Duration::seconds(5)),
        ..http_task(Some("once"))
    };
    h.registry.create_task(&queue, task.clone()).unwrap();

    h.registry.purge_queue(&queue).await.unwrap();
    assert!(h.registry.list_tasks(&queue).unwrap().is_empty());

    h.clock.advance(Duration::from_secs(60));
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);

    // Default purge retains the tombstone.
    let err = h.registry.create_task(&queue, task).unwrap_err();
    assert_eq!(err.status_name(), "ALREADY_EXISTS");
}

#[tokio::test]
async fn hard_reset_purge_aborts_inflight_and_frees_names() {
    let h = harness_with(
        Behavior::DelayThen(Duration::from_secs(3_600), 200),
        RegistryOptions {
            hard_reset_on_purge_queue: true,
            ..RegistryOptions::default()
        },
    );
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    h.registry
        .create_task(&queue, http_task(Some("sticky")))
        .unwrap();

    eventually("dispatch in flight", || h.dispatcher.call_count() == 1).await;

    // Returns only once the held dispatch has been aborted.
    h.registry.purge_queue(&queue).await.unwrap();
    assert!(h.registry.list_tasks(&queue).unwrap().is_empty());

    // The tombstone was cleared, so the name is reusable.
    h.registry
        .create_task(&queue, http_task(Some("sticky")))
        .unwrap();
    eventually("redispatch", || h.dispatcher.call_count() == 2).await;
}

// ----------------------------------------------------------------------
// Tombstones and task name reuse
// ----------------------------------------------------------------------

#[tokio::test]
async fn completed_task_names_stay_tombstoned() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    h.registry
        .create_task(&queue, http_task(Some("t1")))
        .unwrap();

    eventually("dispatch", || h.dispatcher.call_count() == 1).await;
    settle().await;

    let err = h
        .registry
        .create_task(&queue, http_task(Some("t1")))
        .unwrap_err();
    assert_eq!(err.status_name(), "ALREADY_EXISTS");

    // A different name is fine.
    h.registry
        .create_task(&queue, http_task(Some("t2")))
        .unwrap();
}

#[tokio::test]
async fn delete_task_cancels_its_timer() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    let task = NewTask {
        schedule_time: Some(t0() + chrono::Duration::seconds(5)),
        ..http_task(Some("doomed"))
    };
    let created = h.registry.create_task(&queue, task).unwrap();

    h.registry.delete_task(&created.name).unwrap();
    assert!(h.registry.get_task(&created.name).is_err());

    h.clock.advance(Duration::from_secs(60));
    settle().await;
    assert_eq!(h.dispatcher.call_count(), 0);
}

// ----------------------------------------------------------------------
// App Engine targets
// ----------------------------------------------------------------------

fn app_engine_task(service: Option<&str>) -> NewTask {
    NewTask {
        task_id: None,
        payload: TaskPayload::AppEngine(mimiq_flow::AppEngineTarget {
            method: http::Method::POST,
            relative_uri: "/work".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            routing: service.map(|service| mimiq_flow::AppEngineRouting {
                service: Some(service.to_string()),
                ..mimiq_flow::AppEngineRouting::default()
            }),
        }),
        schedule_time: None,
        dispatch_deadline: None,
    }
}

#[tokio::test]
async fn app_engine_target_rewrites_the_host() {
    let h = harness_with(
        Behavior::Status(200),
        RegistryOptions {
            app_engine_emulator_host: Some("gae.test:8080".to_string()),
            ..RegistryOptions::default()
        },
    );
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    h.registry
        .create_task(&queue, app_engine_task(Some("worker")))
        .unwrap();
    h.registry.create_task(&queue, app_engine_task(None)).unwrap();

    eventually("both dispatches", || h.dispatcher.call_count() == 2).await;
    let calls = h.dispatcher.calls();
    assert_eq!(calls[0].url, "http://worker.gae.test:8080/work");
    assert_eq!(calls[1].url, "http://gae.test:8080/work");
    assert!(calls[0].header("X-AppEngine-TaskName").is_some());
    assert_eq!(calls[0].header("X-AppEngine-QueueName"), Some("q"));
}

#[tokio::test]
async fn app_engine_without_host_fails_without_an_attempt() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    h.registry.create_task(&queue, app_engine_task(None)).unwrap();

    settle().await;
    // No outbound request was issued and the task is gone.
    assert_eq!(h.dispatcher.call_count(), 0);
    assert!(h.registry.list_tasks(&queue).unwrap().is_empty());
}

// ----------------------------------------------------------------------
// Attempt bookkeeping
// ----------------------------------------------------------------------

#[tokio::test]
async fn network_errors_count_dispatches_but_not_responses() {
    let h = harness(Behavior::NetworkError);
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    let created = h.registry.create_task(&queue, http_task(None)).unwrap();

    eventually("first attempt", || h.dispatcher.call_count() == 1).await;
    settle().await;

    let task = h.registry.get_task(&created.name).unwrap();
    assert_eq!(task.dispatch_count, 1);
    assert_eq!(task.response_count, 0);
    let last = task.last_attempt.expect("last attempt recorded");
    assert_eq!(last.response_status, None);
    assert!(last.response_message.unwrap().contains("refused"));
    // Backoff pushed the schedule forward, never backward.
    assert!(task.schedule_time > created.schedule_time);
}

#[tokio::test]
async fn failed_http_responses_update_attempt_descriptors() {
    let h = harness(Behavior::Status(503));
    let queue = queue_name("q");
    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    let created = h.registry.create_task(&queue, http_task(None)).unwrap();

    eventually("first attempt", || h.dispatcher.call_count() == 1).await;
    h.clock.advance(Duration::from_millis(100));
    eventually("second attempt", || h.dispatcher.call_count() == 2).await;
    settle().await;

    let task = h.registry.get_task(&created.name).unwrap();
    assert_eq!(task.dispatch_count, 2);
    assert_eq!(task.response_count, 2);
    let first = task.first_attempt.expect("first attempt");
    let last = task.last_attempt.expect("last attempt");
    assert_eq!(first.response_status, Some(503));
    assert_eq!(last.response_status, Some(503));
    assert!(last.dispatch_time >= first.dispatch_time);
}

// ----------------------------------------------------------------------
// Registry surface
// ----------------------------------------------------------------------

#[tokio::test]
async fn queue_names_are_unique_and_listed_by_parent() {
    let h = harness(Behavior::Status(200));
    let a = queue_name("alpha");
    let b = queue_name("beta");
    let elsewhere: QueueName = "projects/p/locations/other/queues/gamma".parse().unwrap();

    h.registry
        .create_queue(b.clone(), QueueConfig::default())
        .unwrap();
    h.registry
        .create_queue(a.clone(), QueueConfig::default())
        .unwrap();
    h.registry
        .create_queue(elsewhere, QueueConfig::default())
        .unwrap();

    let err = h
        .registry
        .create_queue(a.clone(), QueueConfig::default())
        .unwrap_err();
    assert_eq!(err.status_name(), "ALREADY_EXISTS");

    let parent = "projects/p/locations/l".parse().unwrap();
    let listed = h.registry.list_queues(&parent);
    let names: Vec<String> = listed
        .iter()
        .map(|snapshot| snapshot.name.queue_id.clone())
        .collect();
    assert_eq!(names, ["alpha", "beta"]);
}

#[tokio::test]
async fn create_task_validates_queue_and_id() {
    let h = harness(Behavior::Status(200));
    let queue = queue_name("q");

    let err = h.registry.create_task(&queue, http_task(None)).unwrap_err();
    assert_eq!(err.status_name(), "NOT_FOUND");

    h.registry
        .create_queue(queue.clone(), QueueConfig::default())
        .unwrap();
    let err = h
        .registry
        .create_task(&queue, http_task(Some("bad id")))
        .unwrap_err();
    assert_eq!(err.status_name(), "INVALID_ARGUMENT");
}
