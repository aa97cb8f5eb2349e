use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence state shown to teammates. Distinct from the session
/// lifecycle vocabulary: a profile is `Break` while a break session is
/// counting down, `Paused` whenever the current session is paused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UserStatus {
    Idle,
    Active,
    Paused,
    Break,
}

impl Default for UserStatus {
    fn default() -> Self {
        UserStatus::Idle
    }
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Idle => "idle",
            UserStatus::Active => "active",
            UserStatus::Paused => "paused",
            UserStatus::Break => "break",
        }
    }
}

/// One profile record per identity, keyed by the identity provider's id.
///
/// Invariant: `current_session_id` is non-null exactly when `status` is
/// active/paused/break and the referenced session is non-terminal.
/// The daily counters are reset externally at the day boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub current_session_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub total_minutes_today: u64,
    #[serde(default)]
    pub total_sessions_today: u32,
}
