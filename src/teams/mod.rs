//! Team rooms: creation, membership by join code, owner maintenance
//! and the dashboard aggregates.

use std::sync::Arc;

use log::info;
use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::{UserContext, USERS_COLLECTION};
use crate::clock::Clock;
use crate::models::{Team, UserProfile, UserStatus};
use crate::store::{DocumentStore, Filter, Query, StoreError, Subscription};

pub const TEAMS_COLLECTION: &str = "teams";

const JOIN_CODE_LEN: usize = 8;
const JOIN_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("team name must not be empty")]
    EmptyName,

    #[error("join code must be {JOIN_CODE_LEN} letters or digits")]
    InvalidJoinCode,

    #[error("no team found for that join code")]
    NotFound,

    #[error("you are not a member of any team")]
    NotAMember,

    #[error("only the team owner can do that")]
    NotOwner,

    #[error("the owner cannot be removed from their own team")]
    CannotRemoveOwner,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TeamResult<T> = Result<T, TeamError>;

/// Dashboard view of one team: member profiles plus the aggregate
/// cards.
#[derive(Debug, Clone)]
pub struct TeamOverview {
    pub team: Team,
    pub members: Vec<UserProfile>,
    pub total_sessions_today: u32,
    pub total_minutes_today: u64,
    pub active_now: usize,
}

impl TeamOverview {
    /// Members ordered by focus minutes today, most first.
    pub fn leaderboard(&self) -> Vec<&UserProfile> {
        let mut ranked: Vec<&UserProfile> = self.members.iter().collect();
        ranked.sort_by(|a, b| b.total_minutes_today.cmp(&a.total_minutes_today));
        ranked
    }
}

#[derive(Clone)]
pub struct TeamService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

fn random_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_CHARS[rng.gen_range(0..JOIN_CODE_CHARS.len())] as char)
        .collect()
}

fn normalize_join_code(input: &str) -> TeamResult<String> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() != JOIN_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TeamError::InvalidJoinCode);
    }
    Ok(code)
}

impl TeamService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// A code no existing team uses; re-rolled until unique.
    pub async fn generate_unique_join_code(&self) -> TeamResult<String> {
        loop {
            let code = random_join_code();
            let taken = self
                .store
                .query(
                    TEAMS_COLLECTION,
                    Query::new()
                        .filter(Filter::eq("joinCode", code.as_str()))
                        .limit(1),
                )
                .await?;
            if taken.is_empty() {
                return Ok(code);
            }
        }
    }

    pub async fn create_team(&self, ctx: &UserContext, name: &str) -> TeamResult<Team> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TeamError::EmptyName);
        }

        let join_code = self.generate_unique_join_code().await?;
        let now = self.clock.now();
        let owner_id = ctx.user_id();

        let id = self
            .store
            .create(
                TEAMS_COLLECTION,
                json!({
                    "name": name,
                    "ownerId": owner_id,
                    "joinCode": join_code.as_str(),
                    "members": [owner_id],
                    "createdAt": now,
                }),
            )
            .await?;

        self.store
            .patch(USERS_COLLECTION, ctx.user_id(), json!({"teamId": id.as_str()}))
            .await?;

        info!("Created team {id} ({name}) owned by {owner_id}");
        Ok(Team {
            id,
            name: name.to_string(),
            owner_id: ctx.user_id().to_string(),
            join_code,
            members: vec![ctx.user_id().to_string()],
            created_at: now,
        })
    }

    /// Join the team behind `code`. An unknown code is a
    /// [`TeamError::NotFound`] and leaves the caller's profile
    /// untouched.
    pub async fn join_team(&self, ctx: &UserContext, code: &str) -> TeamResult<Team> {
        let code = normalize_join_code(code)?;

        let docs = self
            .store
            .query(
                TEAMS_COLLECTION,
                Query::new()
                    .filter(Filter::eq("joinCode", code.as_str()))
                    .limit(1),
            )
            .await?;
        let Some(doc) = docs.into_iter().next() else {
            return Err(TeamError::NotFound);
        };
        let mut team: Team = doc.decode()?;

        if !team.has_member(ctx.user_id()) {
            team.members.push(ctx.user_id().to_string());
            self.store
                .patch(
                    TEAMS_COLLECTION,
                    &team.id,
                    json!({"members": &team.members}),
                )
                .await?;
        }

        self.store
            .patch(
                USERS_COLLECTION,
                ctx.user_id(),
                json!({"teamId": team.id.as_str()}),
            )
            .await?;

        info!("User {} joined team {}", ctx.user_id(), team.id);
        Ok(team)
    }

    /// Leave the caller's current team.
    pub async fn leave_team(&self, ctx: &UserContext) -> TeamResult<()> {
        let profile = self.profile_of(ctx.user_id()).await?;
        let team_id = profile.team_id.ok_or(TeamError::NotAMember)?;

        if let Some(doc) = self.store.get(TEAMS_COLLECTION, &team_id).await? {
            let mut team: Team = doc.decode()?;
            team.members.retain(|m| m != ctx.user_id());
            self.store
                .patch(
                    TEAMS_COLLECTION,
                    &team_id,
                    json!({"members": &team.members}),
                )
                .await?;
        }

        self.store
            .patch(
                USERS_COLLECTION,
                ctx.user_id(),
                json!({"teamId": Value::Null}),
            )
            .await?;

        info!("User {} left team {team_id}", ctx.user_id());
        Ok(())
    }

    /// Evict a member from the caller's team. Owner only.
    pub async fn remove_member(&self, ctx: &UserContext, member_id: &str) -> TeamResult<()> {
        let team = self.owned_team(ctx).await?;
        if member_id == team.owner_id {
            return Err(TeamError::CannotRemoveOwner);
        }

        let mut members = team.members.clone();
        members.retain(|m| m != member_id);
        self.store
            .patch(TEAMS_COLLECTION, &team.id, json!({"members": members}))
            .await?;

        // The evicted member's profile may already be gone; that is not
        // an error worth surfacing to the owner.
        match self
            .store
            .patch(
                USERS_COLLECTION,
                member_id,
                json!({"teamId": Value::Null}),
            )
            .await
        {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        info!("Removed member {member_id} from team {}", team.id);
        Ok(())
    }

    /// Rotate the caller's team join code. Owner only; returns the new
    /// code.
    pub async fn regenerate_join_code(&self, ctx: &UserContext) -> TeamResult<String> {
        let team = self.owned_team(ctx).await?;
        let code = self.generate_unique_join_code().await?;
        self.store
            .patch(
                TEAMS_COLLECTION,
                &team.id,
                json!({"joinCode": code.as_str()}),
            )
            .await?;
        Ok(code)
    }

    /// Team plus member profiles and the dashboard aggregates. Members
    /// whose profile record is missing are skipped.
    pub async fn team_overview(&self, team_id: &str) -> TeamResult<TeamOverview> {
        let doc = self
            .store
            .get(TEAMS_COLLECTION, team_id)
            .await?
            .ok_or(TeamError::NotFound)?;
        let team: Team = doc.decode()?;

        let mut members = Vec::with_capacity(team.members.len());
        for member_id in &team.members {
            if let Some(doc) = self.store.get(USERS_COLLECTION, member_id).await? {
                if let Ok(profile) = doc.decode::<UserProfile>() {
                    members.push(profile);
                }
            }
        }

        let total_sessions_today = members.iter().map(|m| m.total_sessions_today).sum();
        let total_minutes_today = members.iter().map(|m| m.total_minutes_today).sum();
        let active_now = members
            .iter()
            .filter(|m| m.status == UserStatus::Active)
            .count();

        Ok(TeamOverview {
            team,
            members,
            total_sessions_today,
            total_minutes_today,
            active_now,
        })
    }

    /// Live feed of the profiles currently pointing at `team_id`.
    pub async fn watch_members(&self, team_id: &str) -> TeamResult<Subscription> {
        Ok(self
            .store
            .subscribe(
                USERS_COLLECTION,
                Query::new().filter(Filter::eq("teamId", team_id)),
            )
            .await?)
    }

    async fn owned_team(&self, ctx: &UserContext) -> TeamResult<Team> {
        let profile = self.profile_of(ctx.user_id()).await?;
        let team_id = profile.team_id.ok_or(TeamError::NotAMember)?;
        let doc = self
            .store
            .get(TEAMS_COLLECTION, &team_id)
            .await?
            .ok_or(TeamError::NotFound)?;
        let team: Team = doc.decode()?;
        if !team.is_owner(ctx.user_id()) {
            return Err(TeamError::NotOwner);
        }
        Ok(team)
    }

    async fn profile_of(&self, user_id: &str) -> TeamResult<UserProfile> {
        let doc = self
            .store
            .get(USERS_COLLECTION, user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: USERS_COLLECTION.to_string(),
                id: user_id.to_string(),
            })?;
        Ok(doc.decode()?)
    }
}
