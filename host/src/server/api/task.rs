use apollo_lib::api::{ErrorBody, PutTaskResponse, TaskListItem, TaskSpec};
use axum::{
    extract::{Query, State},
    routing::put,
    Json, Router,
};
use utoipa::OpenApi;

use crate::{
    auth::{Principal, RequestId},
    error::ApiError,
    processors::task::{ListTasksProcessor, SubmitTaskProcessor, TaskListQuery},
    HostState,
};

#[utoipa::path(put, path = "/task",
    tag = "Task",
    request_body = TaskSpec,
    responses(
        (status = 200, description = "Task array accepted", body = PutTaskResponse),
        (status = 400, description = "Invalid task", body = ErrorBody),
    )
)]
async fn put_task_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Principal(principal): Principal,
    Json(task): Json<TaskSpec>,
) -> Result<Json<PutTaskResponse>, ApiError> {
    SubmitTaskProcessor {
        state: &state,
        principal,
        task,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

#[utoipa::path(get, path = "/task",
    tag = "Task",
    params(TaskListQuery),
    responses((status = 200, description = "Tasks", body = [TaskListItem]))
)]
async fn list_tasks_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskListItem>>, ApiError> {
    ListTasksProcessor {
        state: &state,
        query,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

pub fn create_docs() -> utoipa::openapi::OpenApi {
    #[derive(OpenApi)]
    #[openapi(paths(put_task_handler, list_tasks_handler))]
    struct Docs;
    Docs::openapi()
}

pub fn create_router() -> Router<HostState> {
    Router::new().route("/task", put(put_task_handler).get(list_tasks_handler))
}
