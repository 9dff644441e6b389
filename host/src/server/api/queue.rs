use apollo_lib::api::{ErrorBody, PutQueueResponse, Queue, QueueListItem};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::put,
    Json, Router,
};
use utoipa::OpenApi;

use crate::{
    auth::{Principal, RequestId},
    error::ApiError,
    processors::queue::{
        DeleteQueueProcessor, DeleteQueueQuery, ListQueuesProcessor, PutQueueProcessor,
        QueueListQuery,
    },
    HostState,
};

#[utoipa::path(put, path = "/queue",
    tag = "Queue",
    request_body = Queue,
    responses(
        (status = 200, description = "Queue created or modified", body = PutQueueResponse),
        (status = 400, description = "Invalid queue", body = ErrorBody),
    )
)]
async fn put_queue_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Principal(principal): Principal,
    Json(queue): Json<Queue>,
) -> Result<Json<PutQueueResponse>, ApiError> {
    PutQueueProcessor {
        state: &state,
        principal: principal.render_entity(),
        queue,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

#[utoipa::path(get, path = "/queue",
    tag = "Queue",
    params(QueueListQuery),
    responses((status = 200, description = "Queues", body = [QueueListItem]))
)]
async fn list_queues_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Query(query): Query<QueueListQuery>,
) -> Result<Json<Vec<QueueListItem>>, ApiError> {
    ListQueuesProcessor {
        state: &state,
        query,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

#[utoipa::path(delete, path = "/queue",
    tag = "Queue",
    params(DeleteQueueQuery),
    responses(
        (status = 200, description = "Queue deleted"),
        (status = 409, description = "Queue is still in use", body = ErrorBody),
    )
)]
async fn delete_queue_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Query(query): Query<DeleteQueueQuery>,
) -> Result<StatusCode, ApiError> {
    DeleteQueueProcessor {
        state: &state,
        queue: query.queue,
    }
    .enact()
    .await
    .map(|_| StatusCode::OK)
    .map_err(|e| request_id.wrap(e))
}

pub fn create_docs() -> utoipa::openapi::OpenApi {
    #[derive(OpenApi)]
    #[openapi(paths(put_queue_handler, list_queues_handler, delete_queue_handler))]
    struct Docs;
    Docs::openapi()
}

pub fn create_router() -> Router<HostState> {
    Router::new().route(
        "/queue",
        put(put_queue_handler)
            .get(list_queues_handler)
            .delete(delete_queue_handler),
    )
}
