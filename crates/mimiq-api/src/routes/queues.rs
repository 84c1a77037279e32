//! Queue handlers.
//!
//! Google-style custom verbs arrive as a `name:verb` final path segment
//! (`queues/q1:pause`), so the POST handler splits the segment itself.

use axum::Json;
use axum::extract::{Path, State};

use mimiq_core::{LocationPath, QueueName};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::wire::{self, ListQueuesResponse, QueueResource};

fn queue_name(project: &str, location: &str, queue_id: &str) -> ApiResult<QueueName> {
    Ok(QueueName::new(
        LocationPath::new(project, location)?,
        queue_id,
    )?)
}

/// `POST /v2/projects/{p}/locations/{l}/queues`
pub(crate) async fn create_queue(
    State(state): State<AppState>,
    Path((project, location)): Path<(String, String)>,
    Json(body): Json<QueueResource>,
) -> ApiResult<Json<QueueResource>> {
    let parent = LocationPath::new(project, location)?;
    let Some(name) = body.name.as_deref() else {
        return Err(ApiError::invalid_argument("queue.name is required"));
    };
    let name: QueueName = name.parse()?;
    if !name.has_parent(&parent) {
        return Err(ApiError::invalid_argument(format!(
            "queue {name} does not belong to parent {parent}"
        )));
    }
    let config = wire::queue_config_from(&body)?;
    let snapshot = state.registry.create_queue(name, config)?;
    Ok(Json(wire::queue_to_resource(&snapshot)))
}

/// `GET /v2/projects/{p}/locations/{l}/queues`
pub(crate) async fn list_queues(
    State(state): State<AppState>,
    Path((project, location)): Path<(String, String)>,
) -> ApiResult<Json<ListQueuesResponse>> {
    let parent = LocationPath::new(project, location)?;
    let queues = state
        .registry
        .list_queues(&parent)
        .iter()
        .map(wire::queue_to_resource)
        .collect();
    Ok(Json(ListQueuesResponse { queues }))
}

/// `GET /v2/projects/{p}/locations/{l}/queues/{q}`
pub(crate) async fn get_queue(
    State(state): State<AppState>,
    Path((project, location, queue_id)): Path<(String, String, String)>,
) -> ApiResult<Json<QueueResource>> {
    let name = queue_name(&project, &location, &queue_id)?;
    let snapshot = state.registry.get_queue(&name)?;
    Ok(Json(wire::queue_to_resource(&snapshot)))
}

/// `PATCH /v2/projects/{p}/locations/{l}/queues/{q}`
pub(crate) async fn update_queue(
    State(_state): State<AppState>,
    Path((_project, _location, _queue_id)): Path<(String, String, String)>,
) -> ApiResult<Json<QueueResource>> {
    Err(ApiError::unimplemented(
        "UpdateQueue is not supported by the emulator",
    ))
}

/// `DELETE /v2/projects/{p}/locations/{l}/queues/{q}`
pub(crate) async fn delete_queue(
    State(state): State<AppState>,
    Path((project, location, queue_id)): Path<(String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let name = queue_name(&project, &location, &queue_id)?;
    state.registry.delete_queue(&name).await?;
    Ok(Json(serde_json::json!({})))
}

/// `POST /v2/projects/{p}/locations/{l}/queues/{q}:pause|:resume|:purge`
pub(crate) async fn queue_verb(
    State(state): State<AppState>,
    Path((project, location, segment)): Path<(String, String, String)>,
) -> ApiResult<Json<QueueResource>> {
    let Some((queue_id, verb)) = segment.split_once(':') else {
        return Err(ApiError::not_found(format!(
            "no such method on queue: {segment}"
        )));
    };
    let name = queue_name(&project, &location, queue_id)?;
    let snapshot = match verb {
        "pause" => state.registry.pause_queue(&name)?,
        "resume" => state.registry.resume_queue(&name)?,
        "purge" => state.registry.purge_queue(&name).await?,
        other => {
            return Err(ApiError::invalid_argument(format!(
                "unsupported queue verb: {other}"
            )));
        }
    };
    Ok(Json(wire::queue_to_resource(&snapshot)))
}
