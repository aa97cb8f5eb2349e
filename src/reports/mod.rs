//! Reporting queries: today's profile counters, the weekly completed
//! session count, and ranged task statistics. All date bucketing is
//! UTC.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::auth::{UserContext, USERS_COLLECTION};
use crate::clock::Clock;
use crate::models::{FocusSession, SessionKind, SessionStatus, Task, TaskPriority, TaskStatus};
use crate::store::{DocumentStore, Filter, Query, StoreError};
use crate::tasks::tasks_collection;
use crate::timer::engine::SESSIONS_COLLECTION;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("profile record missing for user {0}")]
    ProfileMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportRange {
    Last7Days,
    Last30Days,
    AllTime,
}

impl ReportRange {
    /// Days included when filtering by creation date; `None` means no
    /// filter.
    fn window_days(&self) -> Option<u64> {
        match self {
            ReportRange::Last7Days => Some(7),
            ReportRange::Last30Days => Some(30),
            ReportRange::AllTime => None,
        }
    }

    /// Days shown in the completed-per-day series; the all-time view
    /// still charts a week.
    fn chart_days(&self) -> u64 {
        match self {
            ReportRange::Last30Days => 30,
            _ => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TodayStats {
    pub sessions_completed: u32,
    /// Focus minutes expressed as hours, rounded to one decimal.
    pub focus_hours: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayCount {
    pub date: NaiveDate,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityCount {
    pub priority: TaskPriority,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub total: usize,
    pub done: usize,
    pub in_progress: usize,
    pub todo: usize,
    /// Percent of in-range tasks completed, rounded.
    pub completion_rate: u32,
    pub completed_per_day: Vec<DayCount>,
    pub by_priority: Vec<PriorityCount>,
    /// Consecutive days ending today with at least one completion.
    pub streak_days: u32,
    pub recent_completed: Vec<Task>,
}

#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl ReportService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Today's counters straight off the profile record.
    pub async fn today(&self, ctx: &UserContext) -> ReportResult<TodayStats> {
        let doc = self
            .store
            .get(USERS_COLLECTION, ctx.user_id())
            .await?
            .ok_or_else(|| ReportError::ProfileMissing(ctx.user_id().to_string()))?;
        let profile: crate::models::UserProfile = doc.decode()?;

        Ok(TodayStats {
            sessions_completed: profile.total_sessions_today,
            focus_hours: (profile.total_minutes_today as f64 / 60.0 * 10.0).round() / 10.0,
        })
    }

    /// Completed work sessions in the current Sunday-to-Sunday week.
    pub async fn work_sessions_this_week(&self, ctx: &UserContext) -> ReportResult<usize> {
        let (start, end) = week_bounds(self.clock.now());

        let docs = self
            .store
            .query(
                SESSIONS_COLLECTION,
                Query::new()
                    .filter(Filter::eq("userId", ctx.user_id()))
                    .filter(Filter::eq("status", json!(SessionStatus::Completed)))
                    .filter(Filter::ge("completedAt", json!(start)))
                    .filter(Filter::lt("completedAt", json!(end))),
            )
            .await?;

        let mut count = 0;
        for doc in docs {
            let session: FocusSession = doc.decode()?;
            if session.kind == SessionKind::Work {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn task_report(
        &self,
        ctx: &UserContext,
        range: ReportRange,
    ) -> ReportResult<TaskReport> {
        let docs = self
            .store
            .query(
                &tasks_collection(ctx.user_id()),
                Query::new().order_by_desc("createdAt"),
            )
            .await?;

        let mut tasks = Vec::with_capacity(docs.len());
        for doc in docs {
            tasks.push(doc.decode::<Task>()?);
        }

        Ok(build_task_report(&tasks, self.clock.now().date_naive(), range))
    }
}

/// Start (inclusive) and end (exclusive) of the week containing `now`,
/// with Sunday as the first day.
fn week_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let start_date = today - Days::new(today.weekday().num_days_from_sunday() as u64);
    let start = start_date.and_time(NaiveTime::MIN).and_utc();
    let end = (start_date + Days::new(7)).and_time(NaiveTime::MIN).and_utc();
    (start, end)
}

fn build_task_report(tasks: &[Task], today: NaiveDate, range: ReportRange) -> TaskReport {
    let in_range: Vec<&Task> = match range.window_days() {
        Some(days) => {
            let cutoff = today - Days::new(days - 1);
            tasks
                .iter()
                .filter(|t| t.created_at.date_naive() >= cutoff)
                .collect()
        }
        None => tasks.iter().collect(),
    };

    let total = in_range.len();
    let done = in_range.iter().filter(|t| t.status == TaskStatus::Done).count();
    let in_progress = in_range
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .count();
    let todo = in_range.iter().filter(|t| t.status == TaskStatus::Todo).count();

    let completion_rate = if total > 0 {
        ((done as f64 / total as f64) * 100.0).round() as u32
    } else {
        0
    };

    // The daily series and the streak look at every task, not just the
    // filtered window, matching the dashboard's behavior.
    let window = range.chart_days();
    let completed_per_day = (0..window)
        .map(|i| {
            let date = today - Days::new(window - 1 - i);
            let completed = tasks
                .iter()
                .filter(|t| t.completed_at.map(|c| c.date_naive()) == Some(date))
                .count();
            DayCount { date, completed }
        })
        .collect();

    let by_priority = [TaskPriority::High, TaskPriority::Medium, TaskPriority::Low]
        .into_iter()
        .map(|priority| PriorityCount {
            priority,
            count: in_range.iter().filter(|t| t.priority == priority).count(),
        })
        .collect();

    let completed_days: BTreeSet<NaiveDate> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .filter_map(|t| t.completed_at.map(|c| c.date_naive()))
        .collect();
    let mut streak_days = 0;
    let mut cursor = Some(today);
    while let Some(day) = cursor {
        if !completed_days.contains(&day) {
            break;
        }
        streak_days += 1;
        cursor = day.pred_opt();
    }

    let mut recent_completed: Vec<Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done && t.completed_at.is_some())
        .cloned()
        .collect();
    recent_completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    recent_completed.truncate(10);

    TaskReport {
        total,
        done,
        in_progress,
        todo,
        completion_rate,
        completed_per_day,
        by_priority,
        streak_days,
        recent_completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::clock::ManualClock;
    use crate::store::SqliteStore;
    use chrono::{Duration, TimeZone, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn task(
        id: &str,
        status: TaskStatus,
        priority: TaskPriority,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            priority,
            status,
            created_at,
            completed_at,
        }
    }

    #[test]
    fn week_bounds_cover_a_sunday_started_week() {
        let now = at(2026, 8, 7, 15);
        let (start, end) = week_bounds(now);

        assert_eq!(start.weekday(), Weekday::Sun);
        assert_eq!(end - start, Duration::days(7));
        assert!(start <= now && now < end);
    }

    #[test]
    fn report_counts_rate_and_streak() {
        let today = at(2026, 8, 7, 12).date_naive();
        let tasks = vec![
            task(
                "a",
                TaskStatus::Done,
                TaskPriority::High,
                at(2026, 8, 6, 9),
                Some(at(2026, 8, 7, 10)),
            ),
            task(
                "b",
                TaskStatus::Done,
                TaskPriority::Medium,
                at(2026, 8, 5, 9),
                Some(at(2026, 8, 6, 18)),
            ),
            task(
                "c",
                TaskStatus::InProgress,
                TaskPriority::High,
                at(2026, 8, 7, 8),
                None,
            ),
            task(
                "d",
                TaskStatus::Todo,
                TaskPriority::Low,
                at(2026, 8, 1, 8),
                None,
            ),
            // Outside the 7-day window, but its completion still feeds
            // the daily series and the streak.
            task(
                "old",
                TaskStatus::Done,
                TaskPriority::Low,
                at(2026, 7, 1, 8),
                Some(at(2026, 8, 5, 9)),
            ),
        ];

        let report = build_task_report(&tasks, today, ReportRange::Last7Days);
        assert_eq!(report.total, 4);
        assert_eq!(report.done, 2);
        assert_eq!(report.in_progress, 1);
        assert_eq!(report.todo, 1);
        assert_eq!(report.completion_rate, 50);

        // Completions on the 5th, 6th and 7th: a three-day streak.
        assert_eq!(report.streak_days, 3);

        assert_eq!(report.completed_per_day.len(), 7);
        let last = report.completed_per_day.last().unwrap();
        assert_eq!(last.date, today);
        assert_eq!(last.completed, 1);

        assert_eq!(report.by_priority[0].priority, TaskPriority::High);
        assert_eq!(report.by_priority[0].count, 2);

        assert_eq!(report.recent_completed.len(), 3);
        assert_eq!(report.recent_completed[0].id, "a");
    }

    #[test]
    fn streak_is_zero_without_a_completion_today() {
        let today = at(2026, 8, 7, 12).date_naive();
        let tasks = vec![task(
            "a",
            TaskStatus::Done,
            TaskPriority::Medium,
            at(2026, 8, 1, 9),
            Some(at(2026, 8, 5, 10)),
        )];
        let report = build_task_report(&tasks, today, ReportRange::AllTime);
        assert_eq!(report.streak_days, 0);
    }

    #[tokio::test]
    async fn weekly_count_filters_status_kind_and_window() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let now = at(2026, 8, 7, 12);
        let clock = Arc::new(ManualClock::new(now));
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
        let reports = ReportService::new(store.clone(), clock.clone() as Arc<dyn Clock>);

        let seed = |kind: &'static str, status: &'static str, completed: Option<DateTime<Utc>>| {
            let store = store.clone();
            async move {
                store
                    .create(
                        SESSIONS_COLLECTION,
                        json!({
                            "userId": "alice",
                            "teamId": null,
                            "taskId": null,
                            "type": kind,
                            "status": status,
                            "startTime": now - Duration::hours(2),
                            "endTime": now - Duration::hours(1),
                            "duration": 1500,
                            "completedAt": completed,
                        }),
                    )
                    .await
                    .unwrap();
            }
        };

        seed("work", "completed", Some(now - Duration::hours(1))).await;
        seed("break", "completed", Some(now - Duration::hours(1))).await;
        seed("work", "completed", Some(now - Duration::days(30))).await;
        seed("work", "stopped", None).await;

        assert_eq!(reports.work_sessions_this_week(&ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn today_stats_round_hours_to_one_decimal() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(at(2026, 8, 7, 12)));
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
        store
            .patch(
                USERS_COLLECTION,
                "alice",
                json!({"totalMinutesToday": 125, "totalSessionsToday": 5}),
            )
            .await
            .unwrap();

        let reports = ReportService::new(store, clock as Arc<dyn Clock>);
        let stats = reports.today(&ctx).await.unwrap();
        assert_eq!(stats.sessions_completed, 5);
        assert!((stats.focus_hours - 2.1).abs() < f64::EPSILON);
    }
}
