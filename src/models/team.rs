use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A focus room. Members join by code; the owner can evict members and
/// rotate the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub join_code: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}
