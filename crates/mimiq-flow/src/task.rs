//! Task records: payloads, attempts, and scheduling state.
//!
//! Tasks store only the name of their parent queue, never a handle to it;
//! the registry resolves names on demand. Likewise the queue's timers
//! reference tasks by id, so there are no cyclic references to manage.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::Method;
use mimiq_core::TaskName;

use crate::config::AppEngineRouting;

/// OIDC configuration carried by an HTTP task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcTokenSpec {
    /// Service-account email to mint the token for.
    pub service_account_email: String,
    /// Token audience; defaults to the task URL when unset.
    pub audience: Option<String>,
}

/// An HTTP task target: an arbitrary absolute URL.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: String,
    /// User-supplied headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Optional OIDC token configuration.
    pub oidc: Option<OidcTokenSpec>,
}

/// An App Engine task target: a relative URI resolved against the
/// configured App Engine emulator host at dispatch time.
#[derive(Debug, Clone)]
pub struct AppEngineTarget {
    /// HTTP method.
    pub method: Method,
    /// Relative URI, beginning with `/`.
    pub relative_uri: String,
    /// User-supplied headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Routing override; falls back to the queue's default.
    pub routing: Option<AppEngineRouting>,
}

/// The tagged task payload.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    /// Dispatch to an arbitrary HTTP endpoint.
    Http(HttpTarget),
    /// Dispatch to the App Engine emulator.
    AppEngine(AppEngineTarget),
}

/// Input to `CreateTask`.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Client-supplied task id; generated when absent.
    pub task_id: Option<String>,
    /// The payload.
    pub payload: TaskPayload,
    /// First firing time; defaults to now.
    pub schedule_time: Option<DateTime<Utc>>,
    /// Per-dispatch deadline override.
    pub dispatch_deadline: Option<Duration>,
}

/// One dispatch attempt, as reported on the task resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// The schedule time this attempt fired for.
    pub schedule_time: DateTime<Utc>,
    /// When the outbound request was issued.
    pub dispatch_time: Option<DateTime<Utc>>,
    /// When the response (or network error) arrived.
    pub response_time: Option<DateTime<Utc>>,
    /// HTTP status code; absent for network errors.
    pub response_status: Option<u16>,
    /// Human-readable outcome description.
    pub response_message: Option<String>,
}

/// Scheduling state of a task inside its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on its timer.
    Pending,
    /// Timer fired; waiting for rate and concurrency budget.
    Ready,
    /// An outbound request is in flight.
    Dispatching,
}

/// A task record, owned by its queue.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub(crate) name: TaskName,
    pub(crate) payload: TaskPayload,
    pub(crate) schedule_time: DateTime<Utc>,
    pub(crate) create_time: DateTime<Utc>,
    pub(crate) dispatch_deadline: Option<Duration>,
    pub(crate) dispatch_count: i32,
    pub(crate) response_count: i32,
    pub(crate) first_attempt: Option<Attempt>,
    pub(crate) last_attempt: Option<Attempt>,
    pub(crate) state: TaskState,
    /// Creation order within the queue; breaks scheduling ties.
    pub(crate) seq: u64,
    /// Bumped whenever the timer is rearmed; stale heap entries are
    /// detected by comparing epochs.
    pub(crate) timer_epoch: u64,
}

impl Task {
    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            name: self.name.clone(),
            payload: self.payload.clone(),
            schedule_time: self.schedule_time,
            create_time: self.create_time,
            dispatch_deadline: self.dispatch_deadline,
            dispatch_count: self.dispatch_count,
            response_count: self.response_count,
            first_attempt: self.first_attempt.clone(),
            last_attempt: self.last_attempt.clone(),
        }
    }
}

/// A point-in-time view of a task, as returned by `GetTask`/`ListTasks`.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    /// Fully qualified name.
    pub name: TaskName,
    /// The payload.
    pub payload: TaskPayload,
    /// Next (or last armed) firing time.
    pub schedule_time: DateTime<Utc>,
    /// Creation time.
    pub create_time: DateTime<Utc>,
    /// Per-dispatch deadline override.
    pub dispatch_deadline: Option<Duration>,
    /// Number of outbound requests issued so far.
    pub dispatch_count: i32,
    /// Number of attempts that received an HTTP response.
    pub response_count: i32,
    /// The first attempt, once one has fired.
    pub first_attempt: Option<Attempt>,
    /// The most recent attempt.
    pub last_attempt: Option<Attempt>,
}
