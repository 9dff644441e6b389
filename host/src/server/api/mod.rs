use std::any::Any;

use apollo_lib::api::ErrorBody;
use axum::{
    http::{StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{request_id_middleware, token_auth_middleware},
    HostState,
};

mod login;
mod node;
mod queue;
mod task;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Apollo Control Plane API",
        version = "1.0",
        description = "The scheduler for computational tasks",
    ),
    components(
        schemas(
            apollo_lib::api::ErrorBody,
            apollo_lib::api::LoginRequest,
            apollo_lib::api::LoginResponse,
            apollo_lib::api::NodeTokenResponse,
            apollo_lib::api::Queue,
            apollo_lib::api::PutQueueResponse,
            apollo_lib::api::QueueListItem,
            apollo_lib::api::TaskSpec,
            apollo_lib::api::JobSpec,
            apollo_lib::api::PutTaskResponse,
            apollo_lib::api::TaskListItem,
            apollo_lib::api::NodeState,
            apollo_lib::api::NodeInfo,
            apollo_lib::api::DiskInfo,
            apollo_lib::api::PutUnmanagedNodeRequest,
            apollo_lib::api::NodeListItem,
            apollo_lib::api::NodeStateRequest,
        )
    ),
    tags(
        (name = "Login", description = "Authentication and token issuance"),
        (name = "Queue", description = "Queue management"),
        (name = "Task", description = "Task submission and listing"),
        (name = "Node", description = "Worker node registry"),
    )
)]
pub struct Docs;

#[must_use]
pub fn create_docs() -> utoipa::openapi::OpenApi {
    [
        login::create_docs(),
        queue::create_docs(),
        task::create_docs(),
        node::create_docs(),
    ]
    .into_iter()
    .fold(Docs::openapi(), |mut docs, sub_docs| {
        docs.merge(sub_docs);
        docs
    })
}

pub fn create_router(state: HostState) -> Router {
    let protected = Router::new()
        .merge(login::create_router())
        .merge(queue::create_router())
        .merge(task::create_router())
        .merge(node::create_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            token_auth_middleware,
        ));

    Router::new()
        .merge(login::create_public_router())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(middleware::from_fn(request_id_middleware)),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", create_docs()))
        .fallback(|uri: Uri| async move {
            (StatusCode::NOT_FOUND, format!("no handler found for {uri}"))
        })
        .with_state(state)
}

/// An un-recovered handler failure becomes a structured response rather
/// than tearing down the listener.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("panic during request processing");
    tracing::error!("panic during request processing: {detail}");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: "panic during request processing".to_string(),
            request_id: String::new(),
        }),
    )
        .into_response()
}
