//! Cloud Tasks v2 wire resources and their engine conversions.
//!
//! Field names, casing, timestamp and duration encodings follow the v2
//! REST mapping: camelCase keys, RFC 3339 timestamps, `"3.5s"`-style
//! duration strings, base64 request bodies.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use mimiq_core::{Error, QueueName, Result, TaskName};
use mimiq_flow::{
    AppEngineRouting, AppEngineTarget, Attempt, HttpTarget, NewTask, OidcTokenSpec, QueueConfig,
    QueueSnapshot, RateLimits, RetryConfig, TaskPayload, TaskSnapshot,
};

// ======================================================================
// Queue resources
// ======================================================================

/// A queue resource on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueResource {
    /// Fully qualified queue name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Queue state name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Rate limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<RateLimitsResource>,
    /// Retry configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfigResource>,
    /// Default App Engine routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_engine_routing_override: Option<AppEngineRoutingResource>,
}

/// Queue rate limits on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitsResource {
    /// Token refill rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_dispatches_per_second: Option<f64>,
    /// Token bucket capacity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_burst_size: Option<i32>,
    /// Concurrency cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_dispatches: Option<i32>,
}

/// Queue retry configuration on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfigResource {
    /// Attempt cap, `-1` for unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
    /// Retry deadline from the first attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry_duration: Option<String>,
    /// Minimum backoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_backoff: Option<String>,
    /// Maximum backoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    /// Doubling cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_doublings: Option<i32>,
}

/// App Engine routing on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppEngineRoutingResource {
    /// Target service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Target version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Target instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// `ListQueues` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQueuesResponse {
    /// Queues under the requested parent.
    pub queues: Vec<QueueResource>,
}

/// Builds the wire view of a queue snapshot.
#[must_use]
pub fn queue_to_resource(snapshot: &QueueSnapshot) -> QueueResource {
    QueueResource {
        name: Some(snapshot.name.to_string()),
        state: Some(snapshot.state.as_str_name().to_string()),
        rate_limits: Some(RateLimitsResource {
            max_dispatches_per_second: Some(snapshot.config.rate_limits.max_dispatches_per_second),
            max_burst_size: Some(snapshot.config.rate_limits.max_burst_size),
            max_concurrent_dispatches: Some(
                snapshot.config.rate_limits.max_concurrent_dispatches,
            ),
        }),
        retry_config: Some(RetryConfigResource {
            max_attempts: Some(snapshot.config.retry.max_attempts),
            max_retry_duration: snapshot.config.retry.max_retry_duration.map(format_duration),
            min_backoff: Some(format_duration(snapshot.config.retry.min_backoff)),
            max_backoff: Some(format_duration(snapshot.config.retry.max_backoff)),
            max_doublings: Some(snapshot.config.retry.max_doublings),
        }),
        app_engine_routing_override: snapshot
            .config
            .app_engine_routing_override
            .as_ref()
            .map(routing_to_resource),
    }
}

/// Builds an engine configuration from a wire queue, filling defaults.
///
/// # Errors
///
/// Returns `InvalidArgument` for malformed duration strings.
pub fn queue_config_from(resource: &QueueResource) -> Result<QueueConfig> {
    let mut config = QueueConfig::default();

    if let Some(limits) = &resource.rate_limits {
        let defaults = RateLimits::default();
        config.rate_limits = RateLimits {
            max_dispatches_per_second: limits
                .max_dispatches_per_second
                .unwrap_or(defaults.max_dispatches_per_second),
            max_burst_size: limits.max_burst_size.unwrap_or(defaults.max_burst_size),
            max_concurrent_dispatches: limits
                .max_concurrent_dispatches
                .unwrap_or(defaults.max_concurrent_dispatches),
        };
    }

    if let Some(retry) = &resource.retry_config {
        let defaults = RetryConfig::default();
        config.retry = RetryConfig {
            max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
            max_retry_duration: retry
                .max_retry_duration
                .as_deref()
                .map(parse_duration)
                .transpose()?,
            min_backoff: retry
                .min_backoff
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(defaults.min_backoff),
            max_backoff: retry
                .max_backoff
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(defaults.max_backoff),
            max_doublings: retry.max_doublings.unwrap_or(defaults.max_doublings),
        };
    }

    config.app_engine_routing_override = resource
        .app_engine_routing_override
        .as_ref()
        .map(routing_from_resource);

    Ok(config)
}

fn routing_to_resource(routing: &AppEngineRouting) -> AppEngineRoutingResource {
    AppEngineRoutingResource {
        service: routing.service.clone(),
        version: routing.version.clone(),
        instance: routing.instance.clone(),
    }
}

fn routing_from_resource(resource: &AppEngineRoutingResource) -> AppEngineRouting {
    AppEngineRouting {
        service: resource.service.clone(),
        version: resource.version.clone(),
        instance: resource.instance.clone(),
    }
}

// ======================================================================
// Task resources
// ======================================================================

/// A task resource on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskResource {
    /// Fully qualified task name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// HTTP target payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequestResource>,
    /// App Engine target payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_engine_http_request: Option<AppEngineHttpRequestResource>,
    /// Firing time, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    /// Creation time, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Per-dispatch deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_deadline: Option<String>,
    /// Outbound requests issued so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_count: Option<i32>,
    /// Attempts that received a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_count: Option<i32>,
    /// First attempt descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_attempt: Option<AttemptResource>,
    /// Latest attempt descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<AttemptResource>,
}

/// HTTP target on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpRequestResource {
    /// Absolute target URL.
    pub url: String,
    /// HTTP method name; defaults to POST.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    /// Request headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Base64-encoded body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// OIDC token configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc_token: Option<OidcTokenResource>,
}

/// App Engine target on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppEngineHttpRequestResource {
    /// Relative URI.
    pub relative_uri: String,
    /// HTTP method name; defaults to POST.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    /// Request headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Base64-encoded body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Routing override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_engine_routing: Option<AppEngineRoutingResource>,
}

/// OIDC token configuration on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OidcTokenResource {
    /// Service-account email.
    pub service_account_email: String,
    /// Audience; defaults to the task URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

/// Attempt descriptor on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttemptResource {
    /// Schedule time this attempt fired for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    /// When the request was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_time: Option<String>,
    /// When the response arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<String>,
    /// Response status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<AttemptStatusResource>,
}

/// Attempt status on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttemptStatusResource {
    /// HTTP status code, or 2 for network errors.
    pub code: i32,
    /// Outcome description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `CreateTask` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// The task to create.
    pub task: TaskResource,
}

/// `ListTasks` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTasksResponse {
    /// Tasks in creation order.
    pub tasks: Vec<TaskResource>,
}

/// Builds the wire view of a task snapshot.
#[must_use]
pub fn task_to_resource(snapshot: &TaskSnapshot) -> TaskResource {
    let (http_request, app_engine_http_request) = match &snapshot.payload {
        TaskPayload::Http(target) => (
            Some(HttpRequestResource {
                url: target.url.clone(),
                http_method: Some(target.method.to_string()),
                headers: headers_to_map(&target.headers),
                body: encode_body(&target.body),
                oidc_token: target.oidc.as_ref().map(|oidc| OidcTokenResource {
                    service_account_email: oidc.service_account_email.clone(),
                    audience: oidc.audience.clone(),
                }),
            }),
            None,
        ),
        TaskPayload::AppEngine(target) => (
            None,
            Some(AppEngineHttpRequestResource {
                relative_uri: target.relative_uri.clone(),
                http_method: Some(target.method.to_string()),
                headers: headers_to_map(&target.headers),
                body: encode_body(&target.body),
                app_engine_routing: target.routing.as_ref().map(routing_to_resource),
            }),
        ),
    };

    TaskResource {
        name: Some(snapshot.name.to_string()),
        http_request,
        app_engine_http_request,
        schedule_time: Some(format_time(snapshot.schedule_time)),
        create_time: Some(format_time(snapshot.create_time)),
        dispatch_deadline: snapshot.dispatch_deadline.map(format_duration),
        dispatch_count: Some(snapshot.dispatch_count),
        response_count: Some(snapshot.response_count),
        first_attempt: snapshot.first_attempt.as_ref().map(attempt_to_resource),
        last_attempt: snapshot.last_attempt.as_ref().map(attempt_to_resource),
    }
}

fn attempt_to_resource(attempt: &Attempt) -> AttemptResource {
    let response_status = if attempt.response_time.is_some() {
        Some(AttemptStatusResource {
            code: attempt
                .response_status
                .map_or(2, i32::from),
            message: attempt.response_message.clone(),
        })
    } else {
        None
    };
    AttemptResource {
        schedule_time: Some(format_time(attempt.schedule_time)),
        dispatch_time: attempt.dispatch_time.map(format_time),
        response_time: attempt.response_time.map(format_time),
        response_status,
    }
}

/// Builds a `NewTask` from the wire request.
///
/// # Errors
///
/// Returns `InvalidArgument` for malformed names, methods, encodings, or
/// a payload count other than one.
pub fn new_task_from(queue: &QueueName, resource: &TaskResource) -> Result<NewTask> {
    let task_id = match &resource.name {
        Some(name) => {
            let parsed: TaskName = name.parse()?;
            if &parsed.queue != queue {
                return Err(Error::invalid_argument(format!(
                    "task name {parsed} does not belong to queue {queue}"
                )));
            }
            Some(parsed.task_id)
        }
        None => None,
    };

    let payload = match (&resource.http_request, &resource.app_engine_http_request) {
        (Some(http), None) => TaskPayload::Http(HttpTarget {
            method: parse_method(http.http_method.as_deref())?,
            url: require_non_empty(&http.url, "httpRequest.url")?,
            headers: headers_from_map(http.headers.as_ref()),
            body: decode_body(http.body.as_deref())?,
            oidc: http
                .oidc_token
                .as_ref()
                .map(|oidc| {
                    Ok::<_, Error>(OidcTokenSpec {
                        service_account_email: require_non_empty(
                            &oidc.service_account_email,
                            "oidcToken.serviceAccountEmail",
                        )?,
                        audience: oidc.audience.clone(),
                    })
                })
                .transpose()?,
        }),
        (None, Some(app_engine)) => TaskPayload::AppEngine(AppEngineTarget {
            method: parse_method(app_engine.http_method.as_deref())?,
            relative_uri: require_non_empty(
                &app_engine.relative_uri,
                "appEngineHttpRequest.relativeUri",
            )?,
            headers: headers_from_map(app_engine.headers.as_ref()),
            body: decode_body(app_engine.body.as_deref())?,
            routing: app_engine
                .app_engine_routing
                .as_ref()
                .map(routing_from_resource),
        }),
        _ => {
            return Err(Error::invalid_argument(
                "task requires exactly one of httpRequest or appEngineHttpRequest",
            ));
        }
    };

    Ok(NewTask {
        task_id,
        payload,
        schedule_time: resource
            .schedule_time
            .as_deref()
            .map(parse_time)
            .transpose()?,
        dispatch_deadline: resource
            .dispatch_deadline
            .as_deref()
            .map(parse_duration)
            .transpose()?,
    })
}

// ======================================================================
// Encoding helpers
// ======================================================================

fn headers_to_map(headers: &[(String, String)]) -> Option<BTreeMap<String, String>> {
    if headers.is_empty() {
        return None;
    }
    Some(
        headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    )
}

fn headers_from_map(headers: Option<&BTreeMap<String, String>>) -> Vec<(String, String)> {
    headers
        .map(|map| {
            map.iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn encode_body(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        None
    } else {
        Some(BASE64.encode(body))
    }
}

fn decode_body(body: Option<&str>) -> Result<Vec<u8>> {
    match body {
        None => Ok(Vec::new()),
        Some(encoded) => BASE64
            .decode(encoded)
            .map_err(|e| Error::invalid_argument(format!("body is not valid base64: {e}"))),
    }
}

fn parse_method(method: Option<&str>) -> Result<http::Method> {
    match method {
        None => Ok(http::Method::POST),
        Some(name) => http::Method::from_bytes(name.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::invalid_argument(format!("unknown http method: {name}"))),
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::invalid_argument(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Formats a timestamp the way the v2 API does.
#[must_use]
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns `InvalidArgument` for unparseable input.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| Error::invalid_argument(format!("invalid timestamp {value:?}: {e}")))
}

/// Formats a duration as an API duration string (`"10s"`, `"1.005s"`).
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        return format!("{secs}s");
    }

    let mut fractional = format!("{nanos:09}");
    while fractional.ends_with('0') {
        fractional.pop();
    }

    format!("{secs}.{fractional}s")
}

/// Parses an API duration string.
///
/// # Errors
///
/// Returns `InvalidArgument` for anything but a non-negative decimal
/// number of seconds with an `s` suffix.
pub fn parse_duration(value: &str) -> Result<Duration> {
    // Upper bound from the protobuf Duration range.
    const MAX_SECONDS: f64 = 315_576_000_000.0;
    let seconds = value
        .strip_suffix('s')
        .and_then(|digits| digits.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && (0.0..=MAX_SECONDS).contains(seconds))
        .ok_or_else(|| Error::invalid_argument(format!("invalid duration {value:?}")))?;
    Ok(Duration::from_secs_f64(seconds))
}
