use crate::entities::*;
use chrono::{DateTime, Utc};
use sea_orm::*;
use std::sync::Arc;

pub mod api;

/// Shared state holding the database connection for todo handlers.
#[derive(Clone)]
pub struct TodoState {
    pub db: Arc<sea_orm::DatabaseConnection>,
}

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Todo {
    id: i32,
    title: String,
    description: Option<String>,
    completed: bool,
    deadline_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Todo {
    /// Returns the ID of the todo.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the title of the todo.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the description of the todo, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns whether the todo is completed.
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Returns the deadline of the todo, if any.
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.deadline_at
    }

    /// Returns when the todo was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the todo was last updated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl From<todo::Model> for Todo {
    fn from(model: todo::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            description: model.description,
            completed: model.completed,
            deadline_at: model.deadline_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Fields for creating a new todo. Timestamps and the ID are generated by the
/// service.
#[derive(Debug, Clone, Default)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub deadline_at: Option<DateTime<Utc>>,
}

/// Partial update to an existing todo. The outer `Option` distinguishes
/// "leave unchanged" from "set"; for nullable columns the inner `Option`
/// distinguishes "set to a value" from "clear".
#[derive(Debug, Clone, Default)]
pub struct TodoChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub deadline_at: Option<Option<DateTime<Utc>>>,
}

/// Optional filters for listing todos.
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoFilter {
    /// Only return todos with this completion state.
    pub completed: Option<bool>,
    /// Only return todos whose deadline falls before this instant. Todos
    /// without a deadline never match.
    pub due_before: Option<DateTime<Utc>>,
}

/// Error type for TodoService operations.
#[derive(Debug, thiserror::Error)]
pub enum TodoServiceError {
    /// Represents a todo not found error.
    #[error("Todo with ID {0} not found")]
    TodoNotFound(i32),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub struct TodoService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl TodoService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TodoService {
        TodoService { db }
    }

    /// Creates a new todo record in the database.
    ///
    /// # Arguments
    ///
    /// * `new_todo` - The fields of the todo to create.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `Todo` with its generated ID and
    /// timestamps if successful, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn create_todo(&self, new_todo: NewTodo) -> Result<Todo, TodoServiceError> {
        let now = Utc::now();
        let active_model = todo::ActiveModel {
            title: ActiveValue::Set(new_todo.title),
            description: ActiveValue::Set(new_todo.description),
            completed: ActiveValue::Set(new_todo.completed),
            deadline_at: ActiveValue::Set(new_todo.deadline_at),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        Ok(Todo::from(created_model))
    }

    /// Retrieves a todo record by its ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to retrieve.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Todo` if successful, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn get_todo_by_id(&self, id: i32) -> Result<Todo, TodoServiceError> {
        let todo_model = todo::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(TodoServiceError::TodoNotFound(id))?;
        Ok(Todo::from(todo_model))
    }

    /// Retrieves todo records matching the given filter, in storage order.
    ///
    /// # Arguments
    ///
    /// * `filter` - Optional completion and deadline upper-bound filters.
    ///
    /// # Returns
    ///
    /// A `Result` containing a vector of matching `Todo` records if
    /// successful, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn list_todos(&self, filter: TodoFilter) -> Result<Vec<Todo>, TodoServiceError> {
        let mut query = todo::Entity::find();

        if let Some(completed) = filter.completed {
            query = query.filter(todo::Column::Completed.eq(completed));
        }
        if let Some(due_before) = filter.due_before {
            query = query.filter(todo::Column::DeadlineAt.lt(due_before));
        }

        let todos = query
            .all(self.db)
            .await?
            .into_iter()
            .map(Todo::from)
            .collect();
        Ok(todos)
    }

    /// Applies a partial update to a todo record by its ID, refreshing
    /// `updated_at`.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to update.
    /// * `changes` - The fields to change.
    ///
    /// # Returns
    ///
    /// A `Result` containing the updated `Todo` if successful, or an error
    /// otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn update_todo_by_id(
        &self,
        id: i32,
        changes: TodoChanges,
    ) -> Result<Todo, TodoServiceError> {
        let todo_to_update = todo::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(TodoServiceError::TodoNotFound(id))?;

        let mut active_model: todo::ActiveModel = todo_to_update.into();
        if let Some(title) = changes.title {
            active_model.title = ActiveValue::Set(title);
        }
        if let Some(description) = changes.description {
            active_model.description = ActiveValue::Set(description);
        }
        if let Some(completed) = changes.completed {
            active_model.completed = ActiveValue::Set(completed);
        }
        if let Some(deadline_at) = changes.deadline_at {
            active_model.deadline_at = ActiveValue::Set(deadline_at);
        }
        active_model.updated_at = ActiveValue::Set(Utc::now());
        let updated_model = active_model.update(self.db).await?;

        Ok(Todo::from(updated_model))
    }

    /// Deletes a todo record by its ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the todo to delete.
    ///
    /// # Returns
    ///
    /// A `Result` containing the deleted `Todo` if it existed, or `None` if
    /// no record had the given ID. A missing record is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_todo_by_id(&self, id: i32) -> Result<Option<Todo>, TodoServiceError> {
        let todo_to_delete = todo::Entity::find_by_id(id).one(self.db).await?;

        let Some(todo_to_delete) = todo_to_delete else {
            return Ok(None);
        };

        let todo_copy = Todo::from(todo_to_delete);
        todo::Entity::delete_by_id(id).exec(self.db).await?;
        Ok(Some(todo_copy))
    }
}
