//! FocusTeam engine: a Pomodoro-style focus timer with team rooms,
//! task tracking and reporting, persisted through a pluggable document
//! store. The crate owns session lifecycle, restoration and accounting;
//! rendering, routing and real authentication backends are the
//! embedder's business.

pub mod auth;
pub mod clock;
pub mod models;
pub mod reports;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod teams;
pub mod timer;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::info;

pub use auth::{AuthUser, IdentityProvider, StaticIdentityProvider, UserContext};
pub use clock::{Clock, ManualClock, SystemClock};
pub use reports::ReportService;
pub use settings::{SettingsStore, TimerSettings};
pub use store::{DocumentStore, SqliteStore};
pub use tasks::TaskService;
pub use teams::TeamService;
pub use timer::{EngineEvent, FocusSessionEngine, TimerConfig, TimerSnapshot};

/// Initialize logging from `RUST_LOG`, defaulting to info. Safe to call
/// more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Everything a client process needs, wired once at startup.
pub struct App {
    store: SqliteStore,
    settings: SettingsStore,
    clock: Arc<dyn Clock>,
}

impl App {
    /// Open the store and settings under `data_dir`, creating it as
    /// needed.
    pub fn bootstrap(data_dir: &Path) -> Result<Self> {
        init_logging();
        std::fs::create_dir_all(data_dir)?;

        let store = SqliteStore::open(data_dir.join("focusteam.sqlite3"))?;
        let settings = SettingsStore::new(data_dir.join("settings.json"))?;

        info!("FocusTeam engine starting up");
        Ok(Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.store.clone())
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Establish the signed-in user's context and a restored session
    /// engine; called whenever the identity provider reports a user.
    pub async fn connect_user(&self, user: AuthUser) -> Result<(UserContext, FocusSessionEngine)> {
        let ctx = UserContext::establish(self.store(), self.clock.as_ref(), user).await?;

        let engine = FocusSessionEngine::new(
            self.store(),
            self.clock.clone(),
            ctx.user_id(),
            self.settings.timer().into(),
        );
        engine.restore().await?;

        Ok((ctx, engine))
    }

    pub fn teams(&self) -> TeamService {
        TeamService::new(self.store(), self.clock.clone())
    }

    pub fn tasks(&self) -> TaskService {
        TaskService::new(self.store(), self.clock.clone())
    }

    pub fn reports(&self) -> ReportService {
        ReportService::new(self.store(), self.clock.clone())
    }
}
