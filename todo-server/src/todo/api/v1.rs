use crate::todo::{
    NewTodo, Todo, TodoChanges, TodoFilter, TodoService, TodoServiceError, TodoState,
};
use crate::web::api::v1::ErrorResponse;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use utoipa::ToSchema;

/// Field names accepted in POST and PUT request bodies.
const ALLOWED_FIELDS: [&str; 4] = ["title", "description", "completed", "deadline_at"];

type ApiError = (StatusCode, Json<ErrorResponse>);

/// JSON representation of a Todo for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TodoJson {
    /// Unique identifier for the todo
    pub id: i32,
    /// Short title of the task
    pub title: String,
    /// Optional longer description of the task
    pub description: Option<String>,
    /// Whether the task has been completed
    pub completed: bool,
    /// Optional deadline for the task
    pub deadline_at: Option<DateTime<Utc>>,
    /// When the todo was created
    pub created_at: DateTime<Utc>,
    /// When the todo was last updated
    pub updated_at: DateTime<Utc>,
}

impl From<Todo> for TodoJson {
    fn from(todo: Todo) -> Self {
        Self {
            id: todo.id(),
            title: todo.title().to_string(),
            description: todo.description().map(str::to_string),
            completed: todo.completed(),
            deadline_at: todo.deadline_at(),
            created_at: todo.created_at(),
            updated_at: todo.updated_at(),
        }
    }
}

/// Query parameters for filtering the todo list. Both parameters arrive as
/// raw strings so that malformed values can be ignored rather than rejected.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListTodosQuery {
    /// Optional completion state to filter by
    #[serde(default)]
    completed: Option<String>,
    /// Optional number of days; only todos due before now + `window` days match
    #[serde(default)]
    window: Option<String>,
}

impl ListTodosQuery {
    /// Coerces the raw query parameters into a store filter. Values that do
    /// not parse, or put the deadline bound out of range, are dropped
    /// silently.
    fn into_filter(self, now: DateTime<Utc>) -> TodoFilter {
        TodoFilter {
            completed: self.completed.as_deref().and_then(|v| v.parse().ok()),
            due_before: self
                .window
                .as_deref()
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(Duration::try_days)
                .and_then(|window| now.checked_add_signed(window)),
        }
    }
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(message.to_string())),
    )
}

fn todo_not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("Todo not found".to_string())),
    )
}

fn internal_server_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error".to_string())),
    )
}

fn service_error_response(err: TodoServiceError) -> ApiError {
    match err {
        TodoServiceError::TodoNotFound(_) => todo_not_found(),
        TodoServiceError::Database(err) => {
            tracing::error!("Database error: {}", err);
            internal_server_error()
        }
    }
}

/// Rejects request bodies containing keys outside the allowed field set.
fn check_allowed_fields(body: &Map<String, Value>) -> Result<(), ApiError> {
    for key in body.keys() {
        if !ALLOWED_FIELDS.contains(&key.as_str()) {
            tracing::debug!("Key '{}' not allowed", key);
            return Err(bad_request("Extra fields are detected."));
        }
    }
    Ok(())
}

/// Parses an ISO-8601 timestamp, with or without a UTC offset. Naive
/// timestamps are interpreted as UTC.
fn parse_deadline(value: &str) -> Option<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| value.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc()))
}

/// Builds the insertable fields for a new todo from a validated request body.
fn new_todo_from_body(body: &Map<String, Value>) -> Result<NewTodo, ApiError> {
    let title = match body.get("title") {
        None | Some(Value::Null) => {
            return Err(bad_request("Title field is not given in request body"));
        }
        Some(Value::String(title)) => title.clone(),
        Some(_) => return Err(bad_request("Title field is not given in request body")),
    };

    let description = match body.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(description)) => Some(description.clone()),
        Some(_) => return Err(bad_request("Extra fields are detected.")),
    };

    let completed = match body.get("completed") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(completed)) => *completed,
        Some(_) => return Err(bad_request("Extra fields are detected.")),
    };

    // The original service used 404 for an unparsable deadline on create;
    // reproduced for wire compatibility.
    let deadline_at = match body.get("deadline_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(deadline)) => match parse_deadline(deadline) {
            Some(deadline) => Some(deadline),
            None => {
                return Err((
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse::new("Invalid 'deadline_at' datetime".to_string())),
                ));
            }
        },
        Some(_) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Invalid 'deadline_at' datetime".to_string())),
            ));
        }
    };

    Ok(NewTodo {
        title,
        description,
        completed,
        deadline_at,
    })
}

/// Builds the partial update for an existing todo from a validated request
/// body. Explicit nulls clear the nullable fields; nulls on non-nullable
/// fields are treated as absent.
fn changes_from_body(body: &Map<String, Value>) -> Result<TodoChanges, ApiError> {
    let mut changes = TodoChanges::default();

    match body.get("title") {
        None | Some(Value::Null) => {}
        Some(Value::String(title)) => changes.title = Some(title.clone()),
        Some(_) => return Err(bad_request("Extra fields are detected.")),
    }

    match body.get("description") {
        None => {}
        Some(Value::Null) => changes.description = Some(None),
        Some(Value::String(description)) => {
            changes.description = Some(Some(description.clone()));
        }
        Some(_) => return Err(bad_request("Extra fields are detected.")),
    }

    match body.get("completed") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(completed)) => changes.completed = Some(*completed),
        Some(_) => return Err(bad_request("Extra fields are detected.")),
    }

    match body.get("deadline_at") {
        None => {}
        Some(Value::Null) => changes.deadline_at = Some(None),
        Some(Value::String(deadline)) => match parse_deadline(deadline) {
            Some(deadline) => changes.deadline_at = Some(Some(deadline)),
            None => return Err(bad_request("Invalid 'deadline_at' datetime")),
        },
        Some(_) => return Err(bad_request("Invalid 'deadline_at' datetime")),
    }

    Ok(changes)
}

/// Handler for GET /api/v1/todos - Returns todos matching the optional
/// filters in JSON format.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/todos",
    params(
        ("completed" = Option<String>, Query, description = "Optional completion state to filter todos by"),
        ("window" = Option<String>, Query, description = "Optional number of days; only todos due before now + window days are returned")
    ),
    responses(
        (status = 200, description = "Successfully retrieved todos", body = [TodoJson]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn list_todos_handler(
    State(state): State<Arc<TodoState>>,
    Query(query): Query<ListTodosQuery>,
) -> Result<Json<Vec<TodoJson>>, ApiError> {
    let service = TodoService::new(&state.db);
    let filter = query.into_filter(Utc::now());

    let todos = service
        .list_todos(filter)
        .await
        .map_err(service_error_response)?;
    Ok(Json(todos.into_iter().map(TodoJson::from).collect()))
}

/// Handler for GET /api/v1/todos/{id} - Returns the details of a todo.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/todos/{id}",
    params(
        ("id" = i32, Path, description = "ID of the todo to retrieve")
    ),
    responses(
        (status = 200, description = "Successfully retrieved todo", body = TodoJson),
        (status = 404, description = "Todo not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn get_todo_handler(
    State(state): State<Arc<TodoState>>,
    Path(id): Path<i32>,
) -> Result<Json<TodoJson>, ApiError> {
    let service = TodoService::new(&state.db);
    let todo = service
        .get_todo_by_id(id)
        .await
        .map_err(service_error_response)?;
    Ok(Json(TodoJson::from(todo)))
}

/// Handler for POST /api/v1/todos - Creates a new todo and returns it.
#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    post,
    path = "/api/v1/todos",
    request_body = Value,
    responses(
        (status = 201, description = "Successfully created todo", body = TodoJson),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 404, description = "Invalid deadline", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn create_todo_handler(
    State(state): State<Arc<TodoState>>,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<TodoJson>), ApiError> {
    check_allowed_fields(&body)?;
    let new_todo = new_todo_from_body(&body)?;

    let service = TodoService::new(&state.db);
    let todo = service
        .create_todo(new_todo)
        .await
        .map_err(service_error_response)?;
    Ok((StatusCode::CREATED, Json(TodoJson::from(todo))))
}

/// Handler for PUT /api/v1/todos/{id} - Applies a partial update to a todo
/// and returns the updated todo.
#[tracing::instrument(skip(state, body))]
#[utoipa::path(
    put,
    path = "/api/v1/todos/{id}",
    params(
        ("id" = i32, Path, description = "ID of the todo to update")
    ),
    request_body = Value,
    responses(
        (status = 200, description = "Successfully updated todo", body = TodoJson),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn update_todo_handler(
    State(state): State<Arc<TodoState>>,
    Path(id): Path<i32>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<TodoJson>, ApiError> {
    if body.contains_key("id") {
        return Err(bad_request("Not allowed to change the 'id' field of a todo"));
    }
    check_allowed_fields(&body)?;
    let changes = changes_from_body(&body)?;

    let service = TodoService::new(&state.db);
    let todo = service
        .update_todo_by_id(id, changes)
        .await
        .map_err(service_error_response)?;
    Ok(Json(TodoJson::from(todo)))
}

/// Handler for DELETE /api/v1/todos/{id} - Deletes a todo and returns it.
/// Deleting a todo that does not exist is a success with an empty object.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/api/v1/todos/{id}",
    params(
        ("id" = i32, Path, description = "ID of the todo to delete")
    ),
    responses(
        (status = 200, description = "Todo deleted, or no todo with the given ID existed", body = TodoJson),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Todos"
)]
pub async fn delete_todo_handler(
    State(state): State<Arc<TodoState>>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let service = TodoService::new(&state.db);
    let deleted = service
        .delete_todo_by_id(id)
        .await
        .map_err(service_error_response)?;

    match deleted {
        Some(todo) => Ok(Json(TodoJson::from(todo)).into_response()),
        None => Ok(Json(serde_json::json!({})).into_response()),
    }
}

/// Creates and returns the todos API router.
pub fn create_api_router(state: Arc<TodoState>) -> Router {
    Router::new()
        .route("/todos", get(list_todos_handler).post(create_todo_handler))
        .route(
            "/todos/{id}",
            get(get_todo_handler)
                .put(update_todo_handler)
                .delete(delete_todo_handler),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn body(json: &str) -> Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn can_parse_naive_deadline_as_utc() {
        let parsed = parse_deadline("2023-02-27T00:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn can_parse_deadline_with_offset() {
        let parsed = parse_deadline("2023-02-27T10:00:00+10:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_malformed_deadline() {
        assert!(parse_deadline("next tuesday").is_none());
        assert!(parse_deadline("").is_none());
    }

    #[test]
    fn allows_whitelisted_fields() {
        let body = body(r#"{"title":"a","description":"b","completed":true,"deadline_at":null}"#);
        assert!(check_allowed_fields(&body).is_ok());
    }

    #[test]
    fn rejects_unknown_field() {
        let body = body(r#"{"title":"a","extra":"y"}"#);
        let (status, Json(response)) = check_allowed_fields(&body).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error, "Extra fields are detected.");
    }

    #[test]
    fn new_todo_requires_title() {
        let (status, Json(response)) = new_todo_from_body(&body(r#"{}"#)).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error, "Title field is not given in request body");

        let (status, _) = new_todo_from_body(&body(r#"{"title":null}"#)).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn new_todo_defaults_optional_fields() {
        let new_todo = new_todo_from_body(&body(r#"{"title":"Buy milk"}"#)).unwrap();
        assert_eq!(new_todo.title, "Buy milk");
        assert_eq!(new_todo.description, None);
        assert!(!new_todo.completed);
        assert_eq!(new_todo.deadline_at, None);
    }

    #[test]
    fn new_todo_rejects_malformed_deadline_with_not_found() {
        let (status, Json(response)) =
            new_todo_from_body(&body(r#"{"title":"a","deadline_at":"soon"}"#)).unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response.error, "Invalid 'deadline_at' datetime");
    }

    #[test]
    fn changes_clear_nullable_fields_on_explicit_null() {
        let changes =
            changes_from_body(&body(r#"{"description":null,"deadline_at":null}"#)).unwrap();
        assert_eq!(changes.description, Some(None));
        assert_eq!(changes.deadline_at, Some(None));
        assert_eq!(changes.title, None);
        assert_eq!(changes.completed, None);
    }

    #[test]
    fn changes_treat_null_title_as_absent() {
        let changes = changes_from_body(&body(r#"{"title":null,"completed":null}"#)).unwrap();
        assert_eq!(changes.title, None);
        assert_eq!(changes.completed, None);
    }

    #[test]
    fn changes_reject_malformed_deadline_with_bad_request() {
        let (status, Json(response)) =
            changes_from_body(&body(r#"{"deadline_at":"soon"}"#)).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error, "Invalid 'deadline_at' datetime");
    }

    #[test]
    fn query_filters_parse_well_formed_values() {
        let query = ListTodosQuery {
            completed: Some("true".to_string()),
            window: Some("7".to_string()),
        };
        let now = Utc.with_ymd_and_hms(2023, 2, 20, 0, 0, 0).unwrap();
        let filter = query.into_filter(now);
        assert_eq!(filter.completed, Some(true));
        assert_eq!(
            filter.due_before,
            Some(Utc.with_ymd_and_hms(2023, 2, 27, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn query_filters_ignore_malformed_values() {
        let query = ListTodosQuery {
            completed: Some("yes".to_string()),
            window: Some("soon".to_string()),
        };
        let filter = query.into_filter(Utc::now());
        assert_eq!(filter.completed, None);
        assert_eq!(filter.due_before, None);
    }

    #[test]
    fn query_filters_ignore_out_of_range_window() {
        let query = ListTodosQuery {
            completed: None,
            window: Some(i64::MAX.to_string()),
        };
        let filter = query.into_filter(Utc::now());
        assert_eq!(filter.due_before, None);

        let query = ListTodosQuery {
            completed: None,
            window: Some(i64::MIN.to_string()),
        };
        let filter = query.into_filter(Utc::now());
        assert_eq!(filter.due_before, None);
    }

    #[test]
    fn todo_json_serializes_timestamps_as_iso8601_or_null() {
        let todo = TodoJson {
            id: 1,
            title: "Buy milk".to_string(),
            description: None,
            completed: false,
            deadline_at: None,
            created_at: Utc.with_ymd_and_hms(2023, 2, 20, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2023, 2, 20, 0, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&todo).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["description"], Value::Null);
        assert_eq!(json["deadline_at"], Value::Null);
        assert_eq!(json["created_at"], "2023-02-20T00:00:00Z");
    }
}
