//! Durable follow-up work for paid orders.
//!
//! Tasks are written in the same transaction that marks an order paid, run
//! once right after commit, and retried by a background dispatcher with
//! exponential backoff until they succeed or exhaust `max_attempts`.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::entities::outbox_task::{self, TaskKind, TaskStatus};
use crate::error::ApiError;
use crate::notify::Delivery;
use crate::services::orders::{self, OrderError};
use crate::state::AppState;

const BASE_BACKOFF_SECS: i64 = 30;
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Delay before the next attempt after `attempts` failures: 30s × 2^attempts.
pub fn backoff(attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts).unwrap_or(0).min(MAX_BACKOFF_EXPONENT);
    Duration::seconds(BASE_BACKOFF_SECS * 2_i64.pow(exponent))
}

pub async fn enqueue<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    kind: TaskKind,
    max_attempts: i32,
) -> Result<outbox_task::Model, DbErr> {
    let now = Utc::now();
    outbox_task::ActiveModel {
        order_id: Set(order_id),
        kind: Set(kind),
        status: Set(TaskStatus::Pending),
        attempts: Set(0),
        max_attempts: Set(max_attempts.max(1)),
        last_error: Set(None),
        next_attempt_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn list<C: ConnectionTrait>(
    db: &C,
    status: Option<TaskStatus>,
) -> Result<Vec<outbox_task::Model>, DbErr> {
    let mut query = outbox_task::Entity::find().order_by_desc(outbox_task::Column::Id);
    if let Some(status) = status {
        query = query.filter(outbox_task::Column::Status.eq(status));
    }
    query.all(db).await
}

/// Runs one task against the external collaborators.
async fn execute(state: &AppState, task: &outbox_task::Model) -> Result<(), String> {
    match task.kind {
        TaskKind::AdminEmail => {
            let email = orders::order_email(state.db.as_ref(), task.order_id)
                .await
                .map_err(|err| err.to_string())?;
            match state.notifier.order_paid(&email).await {
                Ok(Delivery::Sent) => Ok(()),
                Ok(Delivery::Disabled) => {
                    info!(order_id = task.order_id, "Admin email skipped, SMTP disabled");
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
        TaskKind::CreateShipment => {
            match orders::create_shipment(state.db.as_ref(), state.shipping.as_ref(), task.order_id)
                .await
            {
                Ok(_) => Ok(()),
                // Moved on by hand (or cancelled) since the task was queued.
                Err(OrderError::NotShippable(status)) => {
                    info!(order_id = task.order_id, ?status, "Shipment no longer needed");
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
    }
}

async fn record_outcome<C: ConnectionTrait>(
    db: &C,
    task: outbox_task::Model,
    outcome: Result<(), String>,
) -> Result<outbox_task::Model, DbErr> {
    let now = Utc::now();
    let attempts = task.attempts + 1;
    let max_attempts = task.max_attempts;
    let (id, kind, order_id) = (task.id, task.kind, task.order_id);

    let mut active: outbox_task::ActiveModel = task.into();
    active.attempts = Set(attempts);
    active.updated_at = Set(now);

    match outcome {
        Ok(()) => {
            active.status = Set(TaskStatus::Done);
            active.last_error = Set(None);
            info!(task_id = id, ?kind, order_id, "Outbox task done");
        }
        Err(reason) if attempts >= max_attempts => {
            active.status = Set(TaskStatus::Failed);
            active.last_error = Set(Some(reason.clone()));
            error!(task_id = id, ?kind, order_id, attempts, reason, "Outbox task failed permanently");
        }
        Err(reason) => {
            let delay = backoff(attempts);
            active.next_attempt_at = Set(now + delay);
            active.last_error = Set(Some(reason.clone()));
            warn!(
                task_id = id,
                ?kind,
                order_id,
                attempts,
                retry_in_secs = delay.num_seconds(),
                reason,
                "Outbox task failed, will retry"
            );
        }
    }

    active.update(db).await
}

async fn run(state: &AppState, task: outbox_task::Model) -> Result<outbox_task::Model, DbErr> {
    let outcome = execute(state, &task).await;
    record_outcome(state.db.as_ref(), task, outcome).await
}

/// Runs the pending tasks of one order, right after its transition committed.
/// Failures stay in the outbox; nothing is returned to the caller.
pub async fn dispatch_for_order(state: &AppState, order_id: i32) {
    let tasks = outbox_task::Entity::find()
        .filter(outbox_task::Column::OrderId.eq(order_id))
        .filter(outbox_task::Column::Status.eq(TaskStatus::Pending))
        .order_by_asc(outbox_task::Column::Id)
        .all(state.db.as_ref())
        .await;

    let tasks = match tasks {
        Ok(tasks) => tasks,
        Err(err) => {
            error!(order_id, error = %err, "Failed to load outbox tasks");
            return;
        }
    };

    for task in tasks {
        if let Err(err) = run(state, task).await {
            error!(order_id, error = %err, "Failed to record outbox task outcome");
        }
    }
}

/// Runs every pending task whose retry time has come. Returns how many ran.
pub async fn dispatch_due(state: &AppState) -> Result<usize, DbErr> {
    let now = Utc::now();
    let due: Vec<outbox_task::Model> = outbox_task::Entity::find()
        .filter(outbox_task::Column::Status.eq(TaskStatus::Pending))
        .order_by_asc(outbox_task::Column::Id)
        .all(state.db.as_ref())
        .await?
        .into_iter()
        .filter(|task| task.next_attempt_at <= now)
        .collect();

    let count = due.len();
    for task in due {
        run(state, task).await?;
    }
    Ok(count)
}

pub fn spawn_dispatcher(state: AppState, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            match dispatch_due(&state).await {
                Ok(0) => {}
                Ok(count) => info!(count, "Dispatched outbox tasks"),
                Err(err) => error!(error = %err, "Outbox dispatch failed"),
            }
        }
    })
}

pub async fn find<C: ConnectionTrait>(db: &C, task_id: i32) -> Result<outbox_task::Model, ApiError> {
    outbox_task::Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_owned()))
}

/// Puts a task back in the queue with a fresh attempt budget.
pub async fn retry<C: ConnectionTrait>(db: &C, task_id: i32) -> Result<outbox_task::Model, ApiError> {
    let task = find(db, task_id).await?;

    if task.status == TaskStatus::Done {
        return Err(ApiError::Conflict("Task already completed".to_owned()));
    }

    let now = Utc::now();
    let mut active: outbox_task::ActiveModel = task.into();
    active.status = Set(TaskStatus::Pending);
    active.attempts = Set(0);
    active.next_attempt_at = Set(now);
    active.updated_at = Set(now);
    Ok(active.update(db).await?)
}
