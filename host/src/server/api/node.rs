use apollo_lib::api::{ErrorBody, NodeListItem, NodeStateRequest, PutUnmanagedNodeRequest};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use utoipa::OpenApi;

use crate::{
    auth::RequestId,
    error::ApiError,
    processors::node::{
        ListNodesProcessor, NodeListQuery, PostNodeStateProcessor, PutUnmanagedNodeProcessor,
    },
    HostState,
};

#[utoipa::path(put, path = "/unmanaged-node",
    tag = "Node",
    request_body = PutUnmanagedNodeRequest,
    responses(
        (status = 200, description = "Node registered"),
        (status = 409, description = "Conflicting registration", body = ErrorBody),
    )
)]
async fn put_unmanaged_node_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Json(node): Json<PutUnmanagedNodeRequest>,
) -> Result<StatusCode, ApiError> {
    PutUnmanagedNodeProcessor {
        state: &state,
        node,
    }
    .enact()
    .await
    .map(|_| StatusCode::OK)
    .map_err(|e| request_id.wrap(e))
}

#[utoipa::path(get, path = "/node",
    tag = "Node",
    params(NodeListQuery),
    responses((status = 200, description = "Nodes", body = [NodeListItem]))
)]
async fn list_nodes_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Query(query): Query<NodeListQuery>,
) -> Result<Json<Vec<NodeListItem>>, ApiError> {
    ListNodesProcessor {
        state: &state,
        query,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

#[utoipa::path(post, path = "/node-state",
    tag = "Node",
    request_body = NodeStateRequest,
    responses(
        (status = 200, description = "Telemetry recorded"),
        (status = 400, description = "Unknown node", body = ErrorBody),
    )
)]
async fn post_node_state_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Json(body): Json<NodeStateRequest>,
) -> Result<StatusCode, ApiError> {
    PostNodeStateProcessor {
        state: &state,
        body,
    }
    .enact()
    .await
    .map(|_| StatusCode::OK)
    .map_err(|e| request_id.wrap(e))
}

pub fn create_docs() -> utoipa::openapi::OpenApi {
    #[derive(OpenApi)]
    #[openapi(paths(put_unmanaged_node_handler, list_nodes_handler, post_node_state_handler))]
    struct Docs;
    Docs::openapi()
}

pub fn create_router() -> Router<HostState> {
    Router::new()
        .route("/unmanaged-node", put(put_unmanaged_node_handler))
        .route("/node", get(list_nodes_handler))
        .route("/node-state", post(post_node_state_handler))
}
