use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::timer::TimerConfig;

/// Interval lengths and scheduling knobs, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    pub work_secs: u32,
    pub break_secs: u32,
    pub grace_secs: u32,
    pub tick_secs: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_secs: 1500,
            break_secs: 300,
            grace_secs: 2,
            tick_secs: 1,
        }
    }
}

impl From<TimerSettings> for TimerConfig {
    fn from(settings: TimerSettings) -> Self {
        Self {
            work_secs: settings.work_secs,
            break_secs: settings.break_secs,
            grace: Duration::from_secs(settings.grace_secs as u64),
            tick_interval: Duration::from_secs(settings.tick_secs.max(1) as u64),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    timer: TimerSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn timer(&self) -> TimerSettings {
        self.data.read().unwrap().timer.clone()
    }

    pub fn update_timer(&self, settings: TimerSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            guard.timer = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl SettingsStore {
    #[allow(dead_code)]
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("focusteam-settings-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn defaults_follow_the_25_5_split() {
        let settings = TimerSettings::default();
        assert_eq!(settings.work_secs, 1500);
        assert_eq!(settings.break_secs, 300);
        assert_eq!(settings.grace_secs, 2);

        let config = TimerConfig::from(settings);
        assert_eq!(config.grace, Duration::from_secs(2));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn updates_survive_a_reload() {
        let path = temp_path();
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update_timer(TimerSettings {
                work_secs: 3000,
                ..TimerSettings::default()
            })
            .unwrap();

        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reopened.timer().work_secs, 3000);

        let _ = fs::remove_file(path);
    }
}
