//! Focus-session engine: owns the countdown for the current work or
//! break interval, persists every lifecycle transition to the document
//! store, and reconstructs its state from the store on startup.
//!
//! The 1 s tick is a single spawned interval task; suspension is the
//! absence of that task. Ticks only decrement the local counter —
//! records are written exclusively at transition boundaries, so write
//! volume is one write per user action plus one per completed interval.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time,
};

use crate::auth::USERS_COLLECTION;
use crate::clock::Clock;
use crate::models::{FocusSession, SessionKind, SessionStatus, UserProfile, UserStatus};
use crate::store::{DocumentStore, Filter, Query};

use super::{TimerPhase, TimerState};

pub const SESSIONS_COLLECTION: &str = "sessions";

/// Planned interval lengths and scheduling knobs. Defaults follow the
/// classic 25/5 split with a 2 s grace before an auto-started break.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub work_secs: u32,
    pub break_secs: u32,
    pub grace: Duration,
    pub tick_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_secs: 1500,
            break_secs: 300,
            grace: Duration::from_secs(2),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl TimerConfig {
    pub fn planned_secs(&self, kind: SessionKind) -> u32 {
        match kind {
            SessionKind::Work => self.work_secs,
            SessionKind::Break => self.break_secs,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub remaining_secs: u32,
}

/// Broadcast to the presentation layer after every transition and tick.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(TimerSnapshot),
    Tick(TimerSnapshot),
    SessionCompleted {
        session_id: String,
        kind: SessionKind,
    },
}

enum TickOutcome {
    Continue,
    Completed,
    Suspended,
}

#[derive(Clone)]
pub struct FocusSessionEngine {
    user_id: String,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
    state: Arc<Mutex<TimerState>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    linked_task: Arc<Mutex<Option<String>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl FocusSessionEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
        config: TimerConfig,
    ) -> Self {
        let ready = TimerState::ready(SessionKind::Work, config.work_secs);
        let (events, _) = broadcast::channel(64);
        Self {
            user_id: user_id.into(),
            store,
            clock,
            config,
            state: Arc::new(Mutex::new(ready)),
            ticker: Arc::new(Mutex::new(None)),
            linked_task: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let state = self.state.lock().await;
        TimerSnapshot {
            remaining_secs: state.remaining_secs,
            state: state.clone(),
        }
    }

    /// Task the next started session will reference, if any.
    pub async fn set_linked_task(&self, task_id: Option<String>) {
        *self.linked_task.lock().await = task_id;
    }

    /// Start the offered interval (work when idle, break right after a
    /// work completion).
    pub async fn start(&self) -> Result<TimerSnapshot> {
        let kind = {
            let state = self.state.lock().await;
            if state.phase != TimerPhase::Idle {
                bail!("timer already active");
            }
            state.kind
        };
        self.begin_interval(kind).await?;
        Ok(self.snapshot().await)
    }

    pub async fn pause(&self) -> Result<TimerSnapshot> {
        let session_id = {
            let mut state = self.state.lock().await;
            if state.phase != TimerPhase::Active {
                bail!("no active session to pause");
            }
            let session_id = state
                .session_id
                .clone()
                .ok_or_else(|| anyhow!("missing session id"))?;
            let anchor = state.cycle_anchor;
            state.pause();
            drop(state);

            let now = self.clock.now();
            let credit = anchor.map(|a| minutes_between(a, now)).unwrap_or(0);

            self.patch_session(
                &session_id,
                json!({
                    "status": SessionStatus::Paused,
                    "pausedAt": now,
                }),
                "pause",
            )
            .await;
            self.flush_profile(credit, UserStatus::Paused, None, "pause")
                .await;
            session_id
        };

        self.cancel_ticker().await;
        self.emit_state_changed().await;
        info!("Paused session {session_id}");
        Ok(self.snapshot().await)
    }

    pub async fn resume(&self) -> Result<TimerSnapshot> {
        let now = self.clock.now();
        let (session_id, status) = {
            let mut state = self.state.lock().await;
            if state.phase != TimerPhase::Paused {
                bail!("no paused session to resume");
            }
            let session_id = state
                .session_id
                .clone()
                .ok_or_else(|| anyhow!("missing session id"))?;
            state.resume(now);
            (session_id, state.user_status())
        };

        self.patch_session(
            &session_id,
            json!({
                "status": SessionStatus::Active,
                "resumedAt": now,
            }),
            "resume",
        )
        .await;
        self.flush_profile(0, status, None, "resume").await;

        self.spawn_ticker().await;
        self.emit_state_changed().await;
        info!("Resumed session {session_id}");
        Ok(self.snapshot().await)
    }

    /// Cancel the in-flight session from either the active or the
    /// paused phase. A paused session credits nothing further; its
    /// elapsed time was already flushed at the pause boundary.
    pub async fn stop(&self) -> Result<TimerSnapshot> {
        let (session_id, credit) = {
            let mut state = self.state.lock().await;
            if state.phase == TimerPhase::Idle {
                bail!("no session to stop");
            }
            let session_id = state
                .session_id
                .clone()
                .ok_or_else(|| anyhow!("missing session id"))?;
            let anchor = if state.phase == TimerPhase::Active {
                state.cycle_anchor
            } else {
                None
            };
            state.reset_to(SessionKind::Work, self.config.work_secs);

            let now = self.clock.now();
            (session_id, anchor.map(|a| minutes_between(a, now)).unwrap_or(0))
        };

        self.cancel_ticker().await;

        let now = self.clock.now();
        self.patch_session(
            &session_id,
            json!({
                "status": SessionStatus::Stopped,
                "actualEndTime": now,
            }),
            "stop",
        )
        .await;
        self.flush_profile(credit, UserStatus::Idle, Some(Value::Null), "stop")
            .await;

        self.emit_state_changed().await;
        info!("Stopped session {session_id}");
        Ok(self.snapshot().await)
    }

    /// Rebuild in-memory state from the persisted records; safe to call
    /// any number of times. The profile's session pointer is
    /// authoritative; a query over the user's sessions is only used to
    /// stop stray non-terminal records when the pointer yields nothing.
    pub async fn restore(&self) -> Result<TimerSnapshot> {
        let profile = self.profile().await?;
        let now = self.clock.now();

        let Some(session_id) = profile.current_session_id else {
            self.enter_fresh().await;
            self.reconcile_stray_sessions().await;
            return Ok(self.snapshot().await);
        };

        let session = self
            .store
            .get(SESSIONS_COLLECTION, &session_id)
            .await
            .context("failed to read session for restoration")?
            .and_then(|doc| match doc.decode::<FocusSession>() {
                Ok(session) => Some(session),
                Err(err) => {
                    warn!("Session {session_id} is undecodable, treating as missing: {err}");
                    None
                }
            });

        let Some(session) = session else {
            self.clear_pointer_and_enter_fresh("missing").await;
            return Ok(self.snapshot().await);
        };

        match session.status {
            SessionStatus::Completed | SessionStatus::Stopped => {
                self.clear_pointer_and_enter_fresh("terminal").await;
            }
            SessionStatus::Active => {
                let remaining = (session.end_time - now).num_seconds().max(0) as u32;
                if remaining > 0 {
                    {
                        let mut state = self.state.lock().await;
                        state.begin(
                            session.id.clone(),
                            session.kind,
                            session.duration_secs,
                            remaining,
                            session.start_time,
                            session.last_resume_instant(),
                        );
                    }
                    self.spawn_ticker().await;
                    self.emit_state_changed().await;
                    info!(
                        "Restored active session {} with {remaining}s remaining",
                        session.id
                    );
                } else {
                    // Expired while no client was running. Process the
                    // completion as if the tick had reached zero at the
                    // scheduled end, then continue normally.
                    {
                        let mut state = self.state.lock().await;
                        state.begin(
                            session.id.clone(),
                            session.kind,
                            session.duration_secs,
                            0,
                            session.start_time,
                            session.last_resume_instant(),
                        );
                    }
                    info!("Session {} expired while offline, completing it", session.id);
                    self.handle_completion(session.end_time).await;
                }
            }
            SessionStatus::Paused => match session.paused_at {
                Some(paused_at) => {
                    let remaining = (session.end_time - paused_at).num_seconds().max(0) as u32;
                    {
                        let mut state = self.state.lock().await;
                        state.begin_paused(
                            session.id.clone(),
                            session.kind,
                            session.duration_secs,
                            remaining,
                            session.start_time,
                        );
                    }
                    self.emit_state_changed().await;
                    info!(
                        "Restored paused session {} with {remaining}s remaining",
                        session.id
                    );
                }
                None => {
                    warn!("Paused session {} has no pausedAt, discarding", session.id);
                    self.clear_pointer_and_enter_fresh("malformed").await;
                }
            },
        }

        Ok(self.snapshot().await)
    }

    async fn begin_interval(&self, kind: SessionKind) -> Result<()> {
        let now = self.clock.now();
        let planned = self.config.planned_secs(kind);
        let profile = self.profile().await?;
        let task_id = self.linked_task.lock().await.clone();

        let session_id = self
            .store
            .create(
                SESSIONS_COLLECTION,
                json!({
                    "userId": self.user_id.as_str(),
                    "teamId": profile.team_id,
                    "taskId": task_id,
                    "type": kind,
                    "status": SessionStatus::Active,
                    "startTime": now,
                    "endTime": now + chrono::Duration::seconds(planned as i64),
                    "duration": planned,
                }),
            )
            .await
            .context("failed to create session record")?;

        let status = {
            let mut state = self.state.lock().await;
            if state.phase != TimerPhase::Idle {
                bail!("timer already active");
            }
            state.begin(session_id.clone(), kind, planned, planned, now, now);
            state.user_status()
        };

        self.update_profile(
            json!({
                "status": status,
                "currentSessionId": session_id.as_str(),
            }),
            "start",
        )
        .await;

        self.spawn_ticker().await;
        self.emit_state_changed().await;
        info!("Started {} session {session_id} ({planned}s)", kind.as_str());
        Ok(())
    }

    /// Completion side effects, with `instant` as the moment the
    /// interval ended: the current time for live completions, the
    /// session's scheduled end for the offline self-heal path.
    fn handle_completion(&self, instant: DateTime<Utc>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        let (session_id, kind, anchor) = {
            let mut state = self.state.lock().await;
            let Some(session_id) = state.session_id.clone() else {
                return;
            };
            let kind = state.kind;
            let anchor = state.cycle_anchor;
            let next = match kind {
                SessionKind::Work => SessionKind::Break,
                SessionKind::Break => SessionKind::Work,
            };
            state.reset_to(next, self.config.planned_secs(next));
            (session_id, kind, anchor)
        };

        self.patch_session(
            &session_id,
            json!({
                "status": SessionStatus::Completed,
                "completedAt": instant,
                "actualEndTime": instant,
            }),
            "completion",
        )
        .await;

        let credit = anchor.map(|a| minutes_between(a, instant)).unwrap_or(0);
        match self.profile().await {
            Ok(profile) => {
                let sessions = profile.total_sessions_today
                    + if kind == SessionKind::Work { 1 } else { 0 };
                self.update_profile(
                    json!({
                        "totalMinutesToday": profile.total_minutes_today + credit,
                        "totalSessionsToday": sessions,
                        "status": UserStatus::Idle,
                        "currentSessionId": Value::Null,
                    }),
                    "completion",
                )
                .await;
            }
            Err(err) => error!("Failed to read profile during completion: {err}"),
        }

        let _ = self.events.send(EngineEvent::SessionCompleted {
            session_id: session_id.clone(),
            kind,
        });
        self.emit_state_changed().await;
        info!("Completed {} session {session_id}", kind.as_str());

        // Breaks start themselves after the grace period; going back to
        // work is always an explicit user action.
        if kind == SessionKind::Work {
            let engine = self.clone();
            let grace = self.config.grace;
            tokio::spawn(async move {
                time::sleep(grace).await;
                engine.auto_start_break().await;
            });
        }
        })
    }

    async fn auto_start_break(&self) {
        {
            let state = self.state.lock().await;
            // The user may have stopped, restarted or restored in the
            // meantime; only the untouched post-completion state
            // auto-advances.
            if state.phase != TimerPhase::Idle || state.kind != SessionKind::Break {
                return;
            }
        }
        if let Err(err) = self.begin_interval(SessionKind::Break).await {
            error!("Failed to auto-start break session: {err}");
        }
    }

    /// Stop any non-terminal session records the pointer no longer
    /// references, restoring the at-most-one-live-session invariant.
    async fn reconcile_stray_sessions(&self) {
        let query = Query::new().filter(Filter::eq("userId", self.user_id.as_str()));
        let docs = match self.store.query(SESSIONS_COLLECTION, query).await {
            Ok(docs) => docs,
            Err(err) => {
                error!("Stray-session reconciliation query failed: {err}");
                return;
            }
        };

        let now = self.clock.now();
        for doc in docs {
            let Ok(session) = doc.decode::<FocusSession>() else {
                continue;
            };
            if session.status.is_terminal() {
                continue;
            }
            warn!("Stopping stray {} session {}", session.status.as_str(), session.id);
            self.patch_session(
                &session.id,
                json!({
                    "status": SessionStatus::Stopped,
                    "actualEndTime": now,
                }),
                "reconciliation",
            )
            .await;
        }
    }

    async fn enter_fresh(&self) {
        {
            let mut state = self.state.lock().await;
            state.reset_to(SessionKind::Work, self.config.work_secs);
        }
        self.cancel_ticker().await;
        self.emit_state_changed().await;
    }

    async fn clear_pointer_and_enter_fresh(&self, reason: &str) {
        info!("Clearing session pointer ({reason}) and entering fresh state");
        self.update_profile(
            json!({
                "status": UserStatus::Idle,
                "currentSessionId": Value::Null,
            }),
            "restoration",
        )
        .await;
        self.enter_fresh().await;
        self.reconcile_stray_sessions().await;
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let engine = self.clone();
        let tick_interval = self.config.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            // The first interval tick completes immediately; skip it so
            // the countdown starts a full period after spawning.
            interval.tick().await;
            loop {
                interval.tick().await;
                match engine.advance_tick().await {
                    TickOutcome::Continue => {}
                    TickOutcome::Suspended => break,
                    TickOutcome::Completed => {
                        let now = engine.clock.now();
                        engine.handle_completion(now).await;
                        break;
                    }
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    async fn advance_tick(&self) -> TickOutcome {
        let (snapshot, done) = {
            let mut state = self.state.lock().await;
            if state.phase != TimerPhase::Active {
                return TickOutcome::Suspended;
            }
            let done = state.tick();
            (state.clone(), done)
        };

        let _ = self.events.send(EngineEvent::Tick(TimerSnapshot {
            remaining_secs: snapshot.remaining_secs,
            state: snapshot,
        }));

        if done {
            TickOutcome::Completed
        } else {
            TickOutcome::Continue
        }
    }

    /// Single countdown step plus completion handling; what one firing
    /// of the ticker does. Exposed for deterministic tests.
    #[cfg(test)]
    pub(crate) async fn tick_once(&self) {
        if let TickOutcome::Completed = self.advance_tick().await {
            let now = self.clock.now();
            self.handle_completion(now).await;
        }
    }

    async fn profile(&self) -> Result<UserProfile> {
        let doc = self
            .store
            .get(USERS_COLLECTION, &self.user_id)
            .await
            .context("failed to read user profile")?
            .with_context(|| format!("profile record missing for user {}", self.user_id))?;
        Ok(doc.decode()?)
    }

    /// Add `credit` minutes to the daily counter and write the new
    /// presence status, optionally rewriting the session pointer.
    /// Failures are logged and swallowed; the local transition already
    /// happened and no rollback is attempted.
    async fn flush_profile(
        &self,
        credit: u64,
        status: UserStatus,
        session_pointer: Option<Value>,
        op: &str,
    ) {
        match self.profile().await {
            Ok(profile) => {
                let mut fields = json!({
                    "totalMinutesToday": profile.total_minutes_today + credit,
                    "status": status,
                });
                if let Some(pointer) = session_pointer {
                    fields["currentSessionId"] = pointer;
                }
                self.update_profile(fields, op).await;
            }
            Err(err) => error!("Failed to read profile during {op}: {err}"),
        }
    }

    async fn update_profile(&self, fields: Value, op: &str) {
        if let Err(err) = self
            .store
            .patch(USERS_COLLECTION, &self.user_id, fields)
            .await
        {
            error!("Failed to update profile during {op}: {err}");
        }
    }

    async fn patch_session(&self, session_id: &str, fields: Value, op: &str) {
        if let Err(err) = self
            .store
            .patch(SESSIONS_COLLECTION, session_id, fields)
            .await
        {
            error!("Failed to update session {session_id} during {op}: {err}");
        }
    }

    async fn emit_state_changed(&self) {
        let snapshot = self.snapshot().await;
        let _ = self.events.send(EngineEvent::StateChanged(snapshot));
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    ((to - from).num_seconds().max(0) as u64) / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    const USER: &str = "u1";

    fn start_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap()
    }

    async fn setup(config: TimerConfig) -> (FocusSessionEngine, Arc<SqliteStore>, Arc<ManualClock>) {
        let store = Arc::new(SqliteStore::in_memory().expect("in-memory store"));
        let clock = Arc::new(ManualClock::new(start_instant()));

        store
            .put(
                USERS_COLLECTION,
                USER,
                json!({
                    "name": "Alice",
                    "email": "alice@example.com",
                    "avatarUrl": null,
                    "createdAt": start_instant(),
                    "status": "idle",
                    "currentSessionId": null,
                    "teamId": null,
                    "totalMinutesToday": 0,
                    "totalSessionsToday": 0,
                }),
            )
            .await
            .unwrap();

        let engine = FocusSessionEngine::new(
            store.clone() as Arc<dyn DocumentStore>,
            clock.clone() as Arc<dyn Clock>,
            USER,
            config,
        );
        (engine, store, clock)
    }

    fn test_config() -> TimerConfig {
        TimerConfig {
            // An hour-long tick keeps the spawned ticker inert so tests
            // drive the countdown explicitly.
            tick_interval: Duration::from_secs(3600),
            grace: Duration::from_millis(40),
            ..TimerConfig::default()
        }
    }

    async fn run_ticks(engine: &FocusSessionEngine, clock: &ManualClock, n: u32) {
        for _ in 0..n {
            clock.advance_secs(1);
            engine.tick_once().await;
        }
    }

    async fn profile(store: &SqliteStore) -> UserProfile {
        store
            .get(USERS_COLLECTION, USER)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap()
    }

    async fn session(store: &SqliteStore, id: &str) -> FocusSession {
        store
            .get(SESSIONS_COLLECTION, id)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap()
    }

    #[tokio::test]
    async fn work_completion_credits_counters_and_schedules_break() {
        let (engine, store, clock) = setup(test_config()).await;

        let snapshot = engine.start().await.unwrap();
        let work_id = snapshot.state.session_id.clone().unwrap();
        assert_eq!(profile(&store).await.status, UserStatus::Active);

        run_ticks(&engine, &clock, 1500).await;

        let completed = session(&store, &work_id).await;
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.completed_at.is_some());

        let p = profile(&store).await;
        assert_eq!(p.total_sessions_today, 1);
        assert_eq!(p.total_minutes_today, 25);

        // Offered interval flips to a full break while idle.
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.state.phase, TimerPhase::Idle);
        assert_eq!(snapshot.state.kind, SessionKind::Break);
        assert_eq!(snapshot.remaining_secs, 300);

        // The break starts itself within the grace window.
        time::sleep(Duration::from_millis(120)).await;
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.state.phase, TimerPhase::Active);
        assert_eq!(snapshot.state.kind, SessionKind::Break);

        let p = profile(&store).await;
        assert_eq!(p.status, UserStatus::Break);
        assert_eq!(p.current_session_id, snapshot.state.session_id);
    }

    #[tokio::test]
    async fn break_completion_returns_to_idle_without_auto_start() {
        let config = TimerConfig {
            work_secs: 2,
            break_secs: 3,
            ..test_config()
        };
        let (engine, store, clock) = setup(config).await;

        engine.start().await.unwrap();
        run_ticks(&engine, &clock, 2).await;
        time::sleep(Duration::from_millis(120)).await;
        assert_eq!(engine.snapshot().await.state.kind, SessionKind::Break);

        run_ticks(&engine, &clock, 3).await;

        let p = profile(&store).await;
        // Only the work interval counts as a completed session.
        assert_eq!(p.total_sessions_today, 1);
        assert_eq!(p.status, UserStatus::Idle);
        assert_eq!(p.current_session_id, None);

        // No auto-start after a break: still idle, offering work.
        time::sleep(Duration::from_millis(120)).await;
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.state.phase, TimerPhase::Idle);
        assert_eq!(snapshot.state.kind, SessionKind::Work);
    }

    #[tokio::test]
    async fn pause_resume_stop_accounting_matches_elapsed_wall_time() {
        let (engine, store, clock) = setup(test_config()).await;

        engine.start().await.unwrap();
        let work_id = engine.snapshot().await.state.session_id.clone().unwrap();

        run_ticks(&engine, &clock, 300).await;
        let snapshot = engine.pause().await.unwrap();
        assert_eq!(snapshot.state.phase, TimerPhase::Paused);
        assert_eq!(snapshot.remaining_secs, 1200);
        assert_eq!(profile(&store).await.total_minutes_today, 5);

        let paused = session(&store, &work_id).await;
        assert_eq!(paused.status, SessionStatus::Paused);
        assert!(paused.paused_at.is_some());

        // Ten minutes of wall time pass while paused; none of it counts.
        clock.advance_secs(600);
        engine.resume().await.unwrap();
        assert_eq!(
            session(&store, &work_id).await.resumed_at,
            Some(start_instant() + chrono::Duration::seconds(900))
        );

        run_ticks(&engine, &clock, 100).await;
        engine.stop().await.unwrap();

        let p = profile(&store).await;
        // 5 from the pause flush + floor(100 / 60) from the stop flush.
        assert_eq!(p.total_minutes_today, 6);
        assert_eq!(p.total_sessions_today, 0);
        assert_eq!(p.status, UserStatus::Idle);
        assert_eq!(p.current_session_id, None);

        let stopped = session(&store, &work_id).await;
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert!(stopped.actual_end_time.is_some());
    }

    #[tokio::test]
    async fn stop_from_paused_credits_nothing_further() {
        let (engine, store, clock) = setup(test_config()).await;

        engine.start().await.unwrap();
        run_ticks(&engine, &clock, 120).await;
        engine.pause().await.unwrap();
        assert_eq!(profile(&store).await.total_minutes_today, 2);

        // However long the pause lasts, stopping adds nothing.
        clock.advance_secs(5000);
        engine.stop().await.unwrap();

        let p = profile(&store).await;
        assert_eq!(p.total_minutes_today, 2);
        assert_eq!(p.status, UserStatus::Idle);
    }

    #[tokio::test]
    async fn double_pause_never_double_counts_a_cycle() {
        let (engine, store, clock) = setup(test_config()).await;

        engine.start().await.unwrap();
        run_ticks(&engine, &clock, 90).await;
        engine.pause().await.unwrap();
        assert_eq!(profile(&store).await.total_minutes_today, 1);

        engine.resume().await.unwrap();
        run_ticks(&engine, &clock, 150).await;
        engine.pause().await.unwrap();

        // floor(90/60) + floor(150/60): each flush rounds down at most
        // one minute, and nothing is counted twice.
        assert_eq!(profile(&store).await.total_minutes_today, 3);
    }

    #[tokio::test]
    async fn events_trace_the_session_lifecycle() {
        let config = TimerConfig {
            work_secs: 2,
            ..test_config()
        };
        let (engine, _store, clock) = setup(config).await;
        let mut events = engine.subscribe();

        engine.start().await.unwrap();
        run_ticks(&engine, &clock, 2).await;

        let mut saw_tick = false;
        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                EngineEvent::Tick(_) => saw_tick = true,
                EngineEvent::SessionCompleted { kind, .. } => {
                    assert_eq!(kind, SessionKind::Work);
                    saw_completed = true;
                }
                EngineEvent::StateChanged(_) => {}
            }
        }
        assert!(saw_tick);
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn start_is_rejected_while_a_session_is_live() {
        let (engine, _store, clock) = setup(test_config()).await;

        engine.start().await.unwrap();
        assert!(engine.start().await.is_err());

        run_ticks(&engine, &clock, 10).await;
        engine.pause().await.unwrap();
        assert!(engine.start().await.is_err());
        assert!(engine.pause().await.is_err());
    }

    #[tokio::test]
    async fn started_session_records_schedule_and_linkage() {
        let (engine, store, _clock) = setup(test_config()).await;
        store
            .patch(USERS_COLLECTION, USER, json!({"teamId": "team-9"}))
            .await
            .unwrap();

        engine.set_linked_task(Some("task-3".into())).await;
        engine.start().await.unwrap();

        let id = engine.snapshot().await.state.session_id.clone().unwrap();
        let s = session(&store, &id).await;
        assert_eq!(s.user_id, USER);
        assert_eq!(s.team_id.as_deref(), Some("team-9"));
        assert_eq!(s.task_id.as_deref(), Some("task-3"));
        assert_eq!(s.kind, SessionKind::Work);
        assert_eq!(s.duration_secs, 1500);
        assert_eq!(s.end_time - s.start_time, chrono::Duration::seconds(1500));
    }
}
