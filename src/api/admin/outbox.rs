use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::entities::outbox_task::TaskStatus;
use crate::error::ApiError;
use crate::services::outbox;
use crate::state::AppState;

pub fn admin_outbox_router(state: AppState) -> Router {
    Router::new()
        .route("/outbox", get(list_tasks))
        .route("/outbox/:id/retry", post(retry_task))
        .layer(Extension(state))
}

#[derive(Deserialize)]
struct TasksQuery {
    status: Option<TaskStatus>,
}

async fn list_tasks(
    Query(params): Query<TasksQuery>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = outbox::list(state.db.as_ref(), params.status).await?;
    Ok(Json(tasks))
}

/// Requeues the task and runs the order's pending work right away.
async fn retry_task(
    Path(id): Path<i32>,
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let task = outbox::retry(state.db.as_ref(), id).await?;
    outbox::dispatch_for_order(&state, task.order_id).await;

    let task = outbox::find(state.db.as_ref(), task.id).await?;
    Ok(Json(task))
}
