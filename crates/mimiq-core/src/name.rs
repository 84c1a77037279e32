//! Strongly-typed resource names.
//!
//! Cloud Tasks names follow the grammar
//! `projects/<P>/locations/<L>/queues/<Q>/tasks/<T>` where every segment
//! matches `[A-Za-z0-9_-]+`. Queue names are the prefix up to the queue
//! segment. Parsing happens once at the API boundary; everything past it
//! works with these types.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A `projects/<P>/locations/<L>` path, the parent of queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationPath {
    /// Project segment.
    pub project: String,
    /// Location segment.
    pub location: String,
}

impl LocationPath {
    /// Builds a location path from validated segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when a segment violates the name grammar.
    pub fn new(project: impl Into<String>, location: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let location = location.into();
        if !is_valid_segment(&project) || !is_valid_segment(&location) {
            return Err(Error::invalid_argument(format!(
                "invalid parent: projects/{project}/locations/{location}"
            )));
        }
        Ok(Self { project, location })
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/locations/{}", self.project, self.location)
    }
}

impl FromStr for LocationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "locations", location] => Self::new(*project, *location),
            _ => Err(Error::invalid_argument(format!("invalid parent: {s}"))),
        }
    }
}

/// A fully qualified queue name, `projects/<P>/locations/<L>/queues/<Q>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName {
    /// Parent location path.
    pub parent: LocationPath,
    /// Queue segment.
    pub queue_id: String,
}

impl QueueName {
    /// Builds a queue name from validated parts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when a segment violates the name grammar.
    pub fn new(parent: LocationPath, queue_id: impl Into<String>) -> Result<Self> {
        let queue_id = queue_id.into();
        if !is_valid_segment(&queue_id) {
            return Err(Error::invalid_argument(format!(
                "invalid queue id: {queue_id}"
            )));
        }
        Ok(Self { parent, queue_id })
    }

    /// Returns true when this queue lives under the given parent.
    #[must_use]
    pub fn has_parent(&self, parent: &LocationPath) -> bool {
        &self.parent == parent
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/queues/{}", self.parent, self.queue_id)
    }
}

impl FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "locations", location, "queues", queue_id] => {
                Self::new(LocationPath::new(*project, *location)?, *queue_id)
            }
            _ => Err(Error::invalid_argument(format!("invalid queue name: {s}"))),
        }
    }
}

/// A fully qualified task name,
/// `projects/<P>/locations/<L>/queues/<Q>/tasks/<T>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskName {
    /// Parent queue name.
    pub queue: QueueName,
    /// Task segment.
    pub task_id: String,
}

impl TaskName {
    /// Builds a task name from validated parts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the task segment violates the name grammar.
    pub fn new(queue: QueueName, task_id: impl Into<String>) -> Result<Self> {
        let task_id = task_id.into();
        if !is_valid_segment(&task_id) {
            return Err(Error::invalid_argument(format!(
                "invalid task id: {task_id}"
            )));
        }
        Ok(Self { queue, task_id })
    }

    /// Generates a task name with a random 16-byte hex ID under the queue.
    #[must_use]
    pub fn generate(queue: QueueName) -> Self {
        Self {
            queue,
            task_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tasks/{}", self.queue, self.task_id)
    }
}

impl FromStr for TaskName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "locations", location, "queues", queue_id, "tasks", task_id] => {
                let queue = QueueName::new(LocationPath::new(*project, *location)?, *queue_id)?;
                Self::new(queue, *task_id)
            }
            _ => Err(Error::invalid_argument(format!("invalid task name: {s}"))),
        }
    }
}
