//! Per-user task board, stored as a subcollection under each profile.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::UserContext;
use crate::clock::Clock;
use crate::models::{Task, TaskPriority, TaskStatus};
use crate::store::{DocumentStore, Query, StoreError, Subscription};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
}

pub fn tasks_collection(user_id: &str) -> String {
    format!("users/{user_id}/tasks")
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(&self, ctx: &UserContext, new: NewTask) -> TaskResult<Task> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }

        let now = self.clock.now();
        let id = self
            .store
            .create(
                &tasks_collection(ctx.user_id()),
                json!({
                    "title": title,
                    "description": new.description.as_str(),
                    "priority": new.priority,
                    "status": TaskStatus::Todo,
                    "createdAt": now,
                    "completedAt": Value::Null,
                }),
            )
            .await?;

        Ok(Task {
            id,
            title: title.to_string(),
            description: new.description,
            priority: new.priority,
            status: TaskStatus::Todo,
            created_at: now,
            completed_at: None,
        })
    }

    /// Move a task between todo / inprogress / done. Completing stamps
    /// `completedAt`; any other target clears it again.
    pub async fn set_status(
        &self,
        ctx: &UserContext,
        task_id: &str,
        status: TaskStatus,
    ) -> TaskResult<()> {
        let completed_at = match status {
            TaskStatus::Done => json!(self.clock.now()),
            _ => Value::Null,
        };

        self.store
            .patch(
                &tasks_collection(ctx.user_id()),
                task_id,
                json!({
                    "status": status,
                    "completedAt": completed_at,
                }),
            )
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => TaskError::NotFound(task_id.to_string()),
                other => TaskError::Store(other),
            })
    }

    /// All of the user's tasks, newest first.
    pub async fn list(&self, ctx: &UserContext) -> TaskResult<Vec<Task>> {
        let docs = self
            .store
            .query(
                &tasks_collection(ctx.user_id()),
                Query::new().order_by_desc("createdAt"),
            )
            .await?;

        let mut tasks = Vec::with_capacity(docs.len());
        for doc in docs {
            tasks.push(doc.decode()?);
        }
        Ok(tasks)
    }

    pub async fn counts(&self, ctx: &UserContext) -> TaskResult<TaskCounts> {
        let tasks = self.list(ctx).await?;
        let mut counts = TaskCounts {
            total: tasks.len(),
            ..TaskCounts::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Todo => counts.todo += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Done => counts.done += 1,
            }
        }
        Ok(counts)
    }

    /// Live feed of the user's tasks, newest first.
    pub async fn watch(&self, ctx: &UserContext) -> TaskResult<Subscription> {
        Ok(self
            .store
            .subscribe(
                &tasks_collection(ctx.user_id()),
                Query::new().order_by_desc("createdAt"),
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::clock::ManualClock;
    use crate::store::SqliteStore;
    use chrono::TimeZone;
    use chrono::Utc;

    async fn setup() -> (TaskService, UserContext, Arc<ManualClock>) {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap(),
        ));
        let ctx = UserContext::establish(
            store.clone(),
            clock.as_ref(),
            AuthUser {
                id: "alice".into(),
                name: "Alice".into(),
                email: "alice@example.com".into(),
                avatar_url: None,
            },
        )
        .await
        .unwrap();
        let service = TaskService::new(store, clock.clone() as Arc<dyn Clock>);
        (service, ctx, clock)
    }

    fn new_task(title: &str, priority: TaskPriority) -> NewTask {
        NewTask {
            title: title.into(),
            description: String::new(),
            priority,
        }
    }

    #[tokio::test]
    async fn blank_title_is_rejected_before_any_write() {
        let (tasks, ctx, _clock) = setup().await;
        assert!(matches!(
            tasks.create(&ctx, new_task("   ", TaskPriority::High)).await,
            Err(TaskError::EmptyTitle)
        ));
        assert!(tasks.list(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let (tasks, ctx, clock) = setup().await;

        tasks.create(&ctx, new_task("first", TaskPriority::Low)).await.unwrap();
        clock.advance_secs(60);
        tasks.create(&ctx, new_task("second", TaskPriority::Medium)).await.unwrap();
        clock.advance_secs(60);
        tasks.create(&ctx, new_task("third", TaskPriority::High)).await.unwrap();

        let listed = tasks.list(&ctx).await.unwrap();
        let titles: Vec<&str> = listed.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn completing_stamps_and_reopening_clears_completed_at() {
        let (tasks, ctx, clock) = setup().await;
        let task = tasks.create(&ctx, new_task("ship it", TaskPriority::High)).await.unwrap();

        clock.advance_secs(3600);
        tasks.set_status(&ctx, &task.id, TaskStatus::Done).await.unwrap();
        let done = &tasks.list(&ctx).await.unwrap()[0];
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.completed_at, Some(clock.now()));

        tasks.set_status(&ctx, &task.id, TaskStatus::Todo).await.unwrap();
        let reopened = &tasks.list(&ctx).await.unwrap()[0];
        assert_eq!(reopened.status, TaskStatus::Todo);
        assert_eq!(reopened.completed_at, None);
    }

    #[tokio::test]
    async fn counts_split_by_status() {
        let (tasks, ctx, _clock) = setup().await;
        let a = tasks.create(&ctx, new_task("a", TaskPriority::Low)).await.unwrap();
        let b = tasks.create(&ctx, new_task("b", TaskPriority::Low)).await.unwrap();
        tasks.create(&ctx, new_task("c", TaskPriority::Low)).await.unwrap();

        tasks.set_status(&ctx, &a.id, TaskStatus::InProgress).await.unwrap();
        tasks.set_status(&ctx, &b.id, TaskStatus::Done).await.unwrap();

        let counts = tasks.counts(&ctx).await.unwrap();
        assert_eq!(
            counts,
            TaskCounts {
                total: 3,
                todo: 1,
                in_progress: 1,
                done: 1,
            }
        );
    }

    #[tokio::test]
    async fn unknown_task_id_is_not_found() {
        let (tasks, ctx, _clock) = setup().await;
        assert!(matches!(
            tasks.set_status(&ctx, "missing", TaskStatus::Done).await,
            Err(TaskError::NotFound(_))
        ));
    }
}
