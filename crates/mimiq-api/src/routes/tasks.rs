//! Task handlers.

use axum::Json;
use axum::extract::{Path, State};

use mimiq_core::{LocationPath, QueueName, TaskName};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::wire::{self, CreateTaskRequest, ListTasksResponse, TaskResource};

fn queue_name(project: &str, location: &str, queue_id: &str) -> ApiResult<QueueName> {
    Ok(QueueName::new(
        LocationPath::new(project, location)?,
        queue_id,
    )?)
}

fn task_name(project: &str, location: &str, queue_id: &str, task_id: &str) -> ApiResult<TaskName> {
    Ok(TaskName::new(
        queue_name(project, location, queue_id)?,
        task_id,
    )?)
}

/// `POST /v2/projects/{p}/locations/{l}/queues/{q}/tasks`
pub(crate) async fn create_task(
    State(state): State<AppState>,
    Path((project, location, queue_id)): Path<(String, String, String)>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<Json<TaskResource>> {
    let queue = queue_name(&project, &location, &queue_id)?;
    let new_task = wire::new_task_from(&queue, &body.task)?;
    let snapshot = state.registry.create_task(&queue, new_task)?;
    Ok(Json(wire::task_to_resource(&snapshot)))
}

/// `GET /v2/projects/{p}/locations/{l}/queues/{q}/tasks`
pub(crate) async fn list_tasks(
    State(state): State<AppState>,
    Path((project, location, queue_id)): Path<(String, String, String)>,
) -> ApiResult<Json<ListTasksResponse>> {
    let queue = queue_name(&project, &location, &queue_id)?;
    let tasks = state
        .registry
        .list_tasks(&queue)?
        .iter()
        .map(wire::task_to_resource)
        .collect();
    Ok(Json(ListTasksResponse { tasks }))
}

/// `GET /v2/projects/{p}/locations/{l}/queues/{q}/tasks/{t}`
pub(crate) async fn get_task(
    State(state): State<AppState>,
    Path((project, location, queue_id, task_id)): Path<(String, String, String, String)>,
) -> ApiResult<Json<TaskResource>> {
    let name = task_name(&project, &location, &queue_id, &task_id)?;
    let snapshot = state.registry.get_task(&name)?;
    Ok(Json(wire::task_to_resource(&snapshot)))
}

/// `DELETE /v2/projects/{p}/locations/{l}/queues/{q}/tasks/{t}`
pub(crate) async fn delete_task(
    State(state): State<AppState>,
    Path((project, location, queue_id, task_id)): Path<(String, String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = task_name(&project, &location, &queue_id, &task_id)?;
    state.registry.delete_task(&name)?;
    Ok(Json(serde_json::json!({})))
}

/// `POST /v2/projects/{p}/locations/{l}/queues/{q}/tasks/{t}:run`
pub(crate) async fn task_verb(
    State(state): State<AppState>,
    Path((project, location, queue_id, segment)): Path<(String, String, String, String)>,
) -> ApiResult<Json<TaskResource>> {
    let Some((task_id, verb)) = segment.split_once(':') else {
        return Err(ApiError::not_found(format!(
            "no such method on task: {segment}"
        )));
    };
    if verb != "run" {
        return Err(ApiError::invalid_argument(format!(
            "unsupported task verb: {verb}"
        )));
    }
    let name = task_name(&project, &location, &queue_id, task_id)?;
    let snapshot = state.registry.run_task(&name)?;
    Ok(Json(wire::task_to_resource(&snapshot)))
}
