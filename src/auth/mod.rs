//! Identity provider contract and the per-user context threaded through
//! the services. Identity itself (sign-in flows, token handling) is an
//! external collaborator; the crate only consumes a stream of
//! signed-in/signed-out events.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::models::UserProfile;
use crate::store::DocumentStore;

pub const USERS_COLLECTION: &str = "users";

/// The profile fields the identity provider supplies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Auth-state change feed: `None` while signed out, `Some(user)` once
/// signed in.
pub trait IdentityProvider: Send + Sync {
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;
}

/// Identity provider backed by a watch channel the embedder pushes
/// into. Suits local single-user setups and tests.
pub struct StaticIdentityProvider {
    tx: watch::Sender<Option<AuthUser>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn signed_in(user: AuthUser) -> Self {
        let (tx, _) = watch::channel(Some(user));
        Self { tx }
    }

    pub fn sign_in(&self, user: AuthUser) {
        let _ = self.tx.send(Some(user));
    }

    pub fn sign_out(&self) {
        let _ = self.tx.send(None);
    }
}

impl Default for StaticIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn watch(&self) -> watch::Receiver<Option<AuthUser>> {
        self.tx.subscribe()
    }
}

/// Explicit current-user context, constructed once per signed-in user
/// and handed to every component that needs identity.
#[derive(Clone)]
pub struct UserContext {
    store: Arc<dyn DocumentStore>,
    user: AuthUser,
}

impl UserContext {
    /// Build the context, creating the `users/{id}` profile record on
    /// first sign-in (idle, no session, zeroed counters).
    pub async fn establish(
        store: Arc<dyn DocumentStore>,
        clock: &dyn Clock,
        user: AuthUser,
    ) -> Result<Self> {
        let existing = store
            .get(USERS_COLLECTION, &user.id)
            .await
            .context("failed to look up user profile")?;

        if existing.is_none() {
            store
                .put(
                    USERS_COLLECTION,
                    &user.id,
                    new_profile_fields(&user, clock.now()),
                )
                .await
                .context("failed to create user profile")?;
            info!("Created profile record for user {}", user.id);
        }

        Ok(Self { store, user })
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Point read of the caller's profile record.
    pub async fn profile(&self) -> Result<UserProfile> {
        let doc = self
            .store
            .get(USERS_COLLECTION, &self.user.id)
            .await
            .context("failed to read user profile")?
            .with_context(|| format!("profile record missing for user {}", self.user.id))?;
        Ok(doc.decode()?)
    }
}

fn new_profile_fields(user: &AuthUser, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "name": user.name.as_str(),
        "email": user.email.as_str(),
        "avatarUrl": &user.avatar_url,
        "createdAt": now,
        "status": "idle",
        "currentSessionId": null,
        "teamId": null,
        "totalMinutesToday": 0,
        "totalSessionsToday": 0,
    })
}
