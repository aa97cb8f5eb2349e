use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{SessionKind, UserStatus};

/// Engine-local lifecycle phase. Deliberately distinct from both
/// persisted status vocabularies; [`TimerState::user_status`] is the
/// one place the mapping to the profile's presence enum lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerPhase {
    Idle,
    Active,
    Paused,
}

impl Default for TimerPhase {
    fn default() -> Self {
        TimerPhase::Idle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub phase: TimerPhase,
    /// Interval being counted down, or the one offered next while idle.
    pub kind: SessionKind,
    pub session_id: Option<String>,
    pub planned_secs: u32,
    pub remaining_secs: u32,
    pub started_at: Option<DateTime<Utc>>,
    /// Start of the current pause-free stretch; minute credits are
    /// measured from here at the next flush.
    #[serde(skip)]
    pub cycle_anchor: Option<DateTime<Utc>>,
}

impl TimerState {
    /// Idle, ready to start `kind` with the full planned duration.
    pub fn ready(kind: SessionKind, planned_secs: u32) -> Self {
        Self {
            phase: TimerPhase::Idle,
            kind,
            session_id: None,
            planned_secs,
            remaining_secs: planned_secs,
            started_at: None,
            cycle_anchor: None,
        }
    }

    pub fn begin(
        &mut self,
        session_id: String,
        kind: SessionKind,
        planned_secs: u32,
        remaining_secs: u32,
        started_at: DateTime<Utc>,
        anchor: DateTime<Utc>,
    ) {
        *self = Self {
            phase: TimerPhase::Active,
            kind,
            session_id: Some(session_id),
            planned_secs,
            remaining_secs,
            started_at: Some(started_at),
            cycle_anchor: Some(anchor),
        };
    }

    /// Restore directly into the paused phase; time does not advance
    /// while paused, so no anchor is set until the next resume.
    pub fn begin_paused(
        &mut self,
        session_id: String,
        kind: SessionKind,
        planned_secs: u32,
        remaining_secs: u32,
        started_at: DateTime<Utc>,
    ) {
        *self = Self {
            phase: TimerPhase::Paused,
            kind,
            session_id: Some(session_id),
            planned_secs,
            remaining_secs,
            started_at: Some(started_at),
            cycle_anchor: None,
        };
    }

    pub fn pause(&mut self) {
        self.phase = TimerPhase::Paused;
        self.cycle_anchor = None;
    }

    pub fn resume(&mut self, anchor: DateTime<Utc>) {
        self.phase = TimerPhase::Active;
        self.cycle_anchor = Some(anchor);
    }

    pub fn reset_to(&mut self, kind: SessionKind, planned_secs: u32) {
        *self = Self::ready(kind, planned_secs);
    }

    /// One countdown step; returns true when the interval just reached
    /// zero.
    pub fn tick(&mut self) -> bool {
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        self.remaining_secs == 0
    }

    /// Presence status the profile record should carry for this state.
    pub fn user_status(&self) -> UserStatus {
        match (self.phase, self.kind) {
            (TimerPhase::Idle, _) => UserStatus::Idle,
            (TimerPhase::Paused, _) => UserStatus::Paused,
            (TimerPhase::Active, SessionKind::Work) => UserStatus::Active,
            (TimerPhase::Active, SessionKind::Break) => UserStatus::Break,
        }
    }
}
