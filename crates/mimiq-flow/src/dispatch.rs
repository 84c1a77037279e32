//! Outbound dispatch: target resolution and the dispatcher contract.
//!
//! The engine resolves each attempt into a fully formed
//! [`DispatchRequest`] (absolute URL, compatibility headers, OIDC bearer
//! token) and hands it to a [`Dispatcher`]. Production wires in the
//! reqwest-backed [`HttpDispatcher`]; tests substitute recording mocks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::Method;
use mimiq_core::{Error, OidcSigner, Result};
use tokio_util::sync::CancellationToken;

use crate::config::AppEngineRouting;
use crate::task::{Task, TaskPayload};

/// Default per-dispatch deadline, the managed product's HTTP-task maximum.
pub const DEFAULT_DISPATCH_DEADLINE: Duration = Duration::from_secs(600);

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: String,
    /// All headers, user-supplied first, in order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Per-call timeout.
    pub deadline: Duration,
}

/// Outcome of one outbound attempt.
///
/// `status: None` is the network-error sentinel; both shapes drive the
/// same retry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// HTTP status code, when a response arrived.
    pub status: Option<u16>,
    /// Error description, for network failures and cancellations.
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Outcome for a received HTTP response.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    /// Outcome for a network-level failure.
    #[must_use]
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            status: None,
            error: Some(message.into()),
        }
    }

    /// Outcome for an aborted in-flight dispatch.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::network_error("dispatch cancelled")
    }

    /// True for 2xx responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|code| (200..300).contains(&code))
    }

    /// Human-readable description for attempt records.
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.status, self.error.as_deref()) {
            (Some(code), _) => format!("HTTP {code}"),
            (None, Some(error)) => error.to_string(),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Issues one outbound HTTP request for a task.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Performs the request, honoring the deadline and the cancel signal.
    ///
    /// Never fails: every failure mode collapses into a
    /// [`DispatchOutcome`].
    async fn dispatch(&self, request: DispatchRequest, cancel: CancellationToken)
        -> DispatchOutcome;
}

/// Production dispatcher backed by a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    /// Creates a dispatcher with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        request: DispatchRequest,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.deadline)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tokio::select! {
            () = cancel.cancelled() => DispatchOutcome::cancelled(),
            result = builder.send() => match result {
                Ok(response) => DispatchOutcome::from_status(response.status().as_u16()),
                Err(error) => DispatchOutcome::network_error(error.to_string()),
            },
        }
    }
}

/// Per-queue context needed to resolve a task into a request.
pub(crate) struct TargetResolver<'a> {
    pub(crate) queue_id: &'a str,
    pub(crate) routing_default: Option<&'a AppEngineRouting>,
    pub(crate) app_engine_host: Option<&'a str>,
    pub(crate) signer: &'a OidcSigner,
}

impl TargetResolver<'_> {
    /// Builds the outbound request for the task's next attempt.
    ///
    /// Called before the attempt is counted, so `task.dispatch_count` is
    /// the number of prior attempts.
    ///
    /// # Errors
    ///
    /// Fails non-retryably when App Engine dispatch is unconfigured or
    /// token minting fails; the caller drops the task.
    pub(crate) fn build(&self, task: &Task, now: DateTime<Utc>) -> Result<DispatchRequest> {
        let deadline = task.dispatch_deadline.unwrap_or(DEFAULT_DISPATCH_DEADLINE);
        let retry_count = task.dispatch_count;
        let execution_count = task.response_count;
        let eta = format_eta(task.schedule_time);

        match &task.payload {
            TaskPayload::Http(target) => {
                let mut headers = target.headers.clone();
                headers.push(("X-CloudTasks-TaskName".into(), task.name.task_id.clone()));
                headers.push(("X-CloudTasks-QueueName".into(), self.queue_id.to_string()));
                headers.push(("X-CloudTasks-TaskRetryCount".into(), retry_count.to_string()));
                headers.push((
                    "X-CloudTasks-TaskExecutionCount".into(),
                    execution_count.to_string(),
                ));
                headers.push(("X-CloudTasks-TaskETA".into(), eta));
                if let Some(oidc) = &target.oidc {
                    let audience = oidc.audience.as_deref().unwrap_or(&target.url);
                    let token = self
                        .signer
                        .sign(&oidc.service_account_email, audience, now)?;
                    headers.push(("Authorization".into(), format!("Bearer {token}")));
                }
                Ok(DispatchRequest {
                    method: target.method.clone(),
                    url: target.url.clone(),
                    headers,
                    body: target.body.clone(),
                    deadline,
                })
            }
            TaskPayload::AppEngine(target) => {
                let Some(host) = self.app_engine_host else {
                    return Err(Error::failed_precondition(
                        "app engine dispatch requires an app engine emulator host",
                    ));
                };
                let service = target
                    .routing
                    .as_ref()
                    .and_then(|routing| routing.service.as_deref())
                    .or_else(|| {
                        self.routing_default
                            .and_then(|routing| routing.service.as_deref())
                    });
                let url = resolve_app_engine_url(host, service, &target.relative_uri);

                let mut headers = target.headers.clone();
                headers.push(("X-AppEngine-TaskName".into(), task.name.task_id.clone()));
                headers.push(("X-AppEngine-QueueName".into(), self.queue_id.to_string()));
                headers.push(("X-AppEngine-TaskRetryCount".into(), retry_count.to_string()));
                headers.push((
                    "X-AppEngine-TaskExecutionCount".into(),
                    execution_count.to_string(),
                ));
                headers.push(("X-AppEngine-TaskETA".into(), eta));
                Ok(DispatchRequest {
                    method: target.method.clone(),
                    url,
                    headers,
                    body: target.body.clone(),
                    deadline,
                })
            }
        }
    }
}

/// Unix seconds of the schedule time, with microsecond precision.
fn format_eta(schedule_time: DateTime<Utc>) -> String {
    format!(
        "{}.{:06}",
        schedule_time.timestamp(),
        schedule_time.timestamp_subsec_micros()
    )
}

/// `http://<service>.<host><relative_uri>`, service portion omitted when
/// empty.
fn resolve_app_engine_url(host: &str, service: Option<&str>, relative_uri: &str) -> String {
    let host = host
        .trim_start_matches("http://")
        .trim_end_matches('/');
    match service {
        Some(service) if !service.is_empty() => {
            format!("http://{service}.{host}{relative_uri}")
        }
        _ => format!("http://{host}{relative_uri}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    use chrono::TimeZone;
    use mimiq_core::TaskName;

    use crate::task::{AppEngineTarget, HttpTarget, OidcTokenSpec, TaskState};

    fn signer() -> &'static OidcSigner {
        static SIGNER: OnceLock<OidcSigner> = OnceLock::new();
        SIGNER.get_or_init(|| OidcSigner::new(None).expect("signer"))
    }

    fn task_with_payload(payload: TaskPayload) -> Task {
        let name: TaskName = "projects/p/locations/l/queues/q/tasks/t1".parse().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Task {
            name,
            payload,
            schedule_time: at,
            create_time: at,
            dispatch_deadline: None,
            dispatch_count: 2,
            response_count: 1,
            first_attempt: None,
            last_attempt: None,
            state: TaskState::Ready,
            seq: 0,
            timer_epoch: 0,
        }
    }

    fn http_payload(oidc: Option<OidcTokenSpec>) -> TaskPayload {
        TaskPayload::Http(HttpTarget {
            method: Method::POST,
            url: "http://target.test/hook".to_string(),
            headers: vec![("X-Custom".to_string(), "yes".to_string())],
            body: b"payload".to_vec(),
            oidc,
        })
    }

    fn header<'a>(request: &'a DispatchRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn http_request_carries_compatibility_headers() {
        let resolver = TargetResolver {
            queue_id: "q",
            routing_default: None,
            app_engine_host: None,
            signer: signer(),
        };
        let task = task_with_payload(http_payload(None));
        let request = resolver.build(&task, Utc::now()).expect("request");

        assert_eq!(request.url, "http://target.test/hook");
        assert_eq!(request.deadline, DEFAULT_DISPATCH_DEADLINE);
        assert_eq!(header(&request, "X-Custom"), Some("yes"));
        assert_eq!(header(&request, "X-CloudTasks-TaskName"), Some("t1"));
        assert_eq!(header(&request, "X-CloudTasks-QueueName"), Some("q"));
        assert_eq!(header(&request, "X-CloudTasks-TaskRetryCount"), Some("2"));
        assert_eq!(header(&request, "X-CloudTasks-TaskExecutionCount"), Some("1"));
        let eta = header(&request, "X-CloudTasks-TaskETA").expect("eta");
        assert_eq!(eta, format!("{}.000000", task.schedule_time.timestamp()));
        assert!(header(&request, "Authorization").is_none());
    }

    #[test]
    fn oidc_task_gets_bearer_token_with_url_audience_default() {
        let resolver = TargetResolver {
            queue_id: "q",
            routing_default: None,
            app_engine_host: None,
            signer: signer(),
        };
        let task = task_with_payload(http_payload(Some(OidcTokenSpec {
            service_account_email: "sa@p.test".to_string(),
            audience: None,
        })));
        let request = resolver.build(&task, Utc::now()).expect("request");

        let bearer = header(&request, "Authorization").expect("authorization header");
        let token = bearer.strip_prefix("Bearer ").expect("bearer scheme");
        // Claims are unverified here; the signer's own tests cover the
        // signature. Check the audience defaulted to the task URL.
        let payload = token.split('.').nth(1).expect("payload segment");
        use base64::Engine as _;
        let claims = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .expect("base64 payload");
        let claims: serde_json::Value = serde_json::from_slice(&claims).expect("claims json");
        assert_eq!(claims["aud"], "http://target.test/hook");
        assert_eq!(claims["email"], "sa@p.test");
    }

    #[test]
    fn app_engine_url_resolution() {
        assert_eq!(
            resolve_app_engine_url("localhost:8080", Some("worker"), "/run"),
            "http://worker.localhost:8080/run"
        );
        assert_eq!(
            resolve_app_engine_url("http://localhost:8080/", None, "/run"),
            "http://localhost:8080/run"
        );
        assert_eq!(
            resolve_app_engine_url("localhost:8080", Some(""), "/run"),
            "http://localhost:8080/run"
        );
    }

    #[test]
    fn app_engine_task_uses_queue_routing_default() {
        let routing = AppEngineRouting {
            service: Some("background".to_string()),
            ..AppEngineRouting::default()
        };
        let resolver = TargetResolver {
            queue_id: "q",
            routing_default: Some(&routing),
            app_engine_host: Some("gae.test:9000"),
            signer: signer(),
        };
        let task = task_with_payload(TaskPayload::AppEngine(AppEngineTarget {
            method: Method::GET,
            relative_uri: "/jobs/1".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            routing: None,
        }));
        let request = resolver.build(&task, Utc::now()).expect("request");
        assert_eq!(request.url, "http://background.gae.test:9000/jobs/1");
        assert_eq!(header(&request, "X-AppEngine-TaskName"), Some("t1"));
        assert_eq!(header(&request, "X-AppEngine-QueueName"), Some("q"));
    }

    #[test]
    fn app_engine_without_host_is_a_fatal_failure() {
        let resolver = TargetResolver {
            queue_id: "q",
            routing_default: None,
            app_engine_host: None,
            signer: signer(),
        };
        let task = task_with_payload(TaskPayload::AppEngine(AppEngineTarget {
            method: Method::GET,
            relative_uri: "/jobs/1".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            routing: None,
        }));
        assert!(resolver.build(&task, Utc::now()).is_err());
    }

    #[test]
    fn outcome_triage() {
        assert!(DispatchOutcome::from_status(200).is_success());
        assert!(DispatchOutcome::from_status(299).is_success());
        assert!(!DispatchOutcome::from_status(301).is_success());
        assert!(!DispatchOutcome::from_status(500).is_success());
        assert!(!DispatchOutcome::network_error("refused").is_success());
        assert_eq!(DispatchOutcome::from_status(405).describe(), "HTTP 405");
        assert_eq!(
            DispatchOutcome::network_error("connection refused").describe(),
            "connection refused"
        );
    }
}
