use apollo_lib::api::{ErrorBody, LoginRequest, LoginResponse, NodeTokenResponse};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};

use crate::{
    auth::{Principal, RequestId},
    error::ApiError,
    processors::login::{LoginProcessor, NodeTokenProcessor},
    HostState,
};

#[utoipa::path(post, path = "/sigv4-login",
    tag = "Login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 401, description = "Authentication failed", body = ErrorBody),
    )
)]
async fn sigv4_login_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    LoginProcessor {
        state: &state,
        body,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct NodeTokenQuery {
    node_id: String,
}

#[utoipa::path(get, path = "/node-token",
    tag = "Login",
    params(NodeTokenQuery),
    responses(
        (status = 200, description = "Node token issued", body = NodeTokenResponse),
        (status = 401, description = "Authentication failed", body = ErrorBody),
    )
)]
async fn node_token_handler(
    State(state): State<HostState>,
    request_id: RequestId,
    Principal(principal): Principal,
    Query(query): Query<NodeTokenQuery>,
) -> Result<Json<NodeTokenResponse>, ApiError> {
    NodeTokenProcessor {
        state: &state,
        principal,
        node_id: query.node_id,
    }
    .enact()
    .await
    .map(Json)
    .map_err(|e| request_id.wrap(e))
}

#[utoipa::path(get, path = "/ping",
    tag = "Login",
    responses((status = 200, description = "The server is reachable"))
)]
async fn ping_handler() -> StatusCode {
    StatusCode::OK
}

pub fn create_docs() -> utoipa::openapi::OpenApi {
    #[derive(OpenApi)]
    #[openapi(paths(sigv4_login_handler, node_token_handler, ping_handler))]
    struct Docs;
    Docs::openapi()
}

/// Login itself runs before any token exists.
pub fn create_public_router() -> Router<HostState> {
    Router::new().route("/sigv4-login", post(sigv4_login_handler))
}

pub fn create_router() -> Router<HostState> {
    Router::new()
        .route("/node-token", get(node_token_handler))
        .route("/ping", get(ping_handler))
}
