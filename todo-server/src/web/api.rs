use std::sync::Arc;

use crate::todo::TodoState;
use axum::Router;
use utoipa::OpenApi;

pub mod v1 {
    use axum::response::Json;
    use serde::{Deserialize, Serialize};
    use utoipa::ToSchema;

    /// JSON response for API errors.
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    pub struct ErrorResponse {
        /// Human-readable description of the error
        pub error: String,
    }

    impl ErrorResponse {
        pub fn new(error: String) -> Self {
            Self { error }
        }
    }

    /// JSON response for the health endpoint.
    #[derive(Debug, Serialize, Deserialize, ToSchema)]
    pub struct HealthResponse {
        /// Always "ok" while the server is able to respond
        pub status: String,
    }

    /// Handler for GET /api/v1/health - Returns a status of "ok" if the
    /// server is running and listening to requests.
    #[tracing::instrument]
    #[utoipa::path(
        get,
        path = "/api/v1/health",
        responses(
            (status = 200, description = "Server is healthy", body = HealthResponse)
        ),
        tag = "Health"
    )]
    pub async fn health_check_handler() -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "ok".to_string(),
        })
    }
}

/// OpenAPI documentation for the JSON API.
#[derive(OpenApi)]
#[openapi(
    paths(
        v1::health_check_handler,
        crate::todo::api::v1::list_todos_handler,
        crate::todo::api::v1::get_todo_handler,
        crate::todo::api::v1::create_todo_handler,
        crate::todo::api::v1::update_todo_handler,
        crate::todo::api::v1::delete_todo_handler,
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Todos", description = "Todo management endpoints")
    )
)]
pub struct ApiDoc;

/// Creates the API routes for JSON API endpoints.
pub fn create_api_router(todo_state: Arc<TodoState>) -> axum::Router {
    let todos_router = crate::todo::api::v1::create_api_router(todo_state);
    let api_routes = Router::new()
        .route("/health", axum::routing::get(v1::health_check_handler))
        .merge(todos_router);
    Router::new().nest("/api/v1", api_routes)
}
