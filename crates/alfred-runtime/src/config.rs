//! §6.6 recognized configuration: TOML on disk, a `resolve_workspace_path`
//! priority chain (reused from `alfred-core` rather than duplicated here),
//! `load`/`load_from`/`save`/`save_to`, and a `#[derive(Default)]` struct so
//! a missing file yields sane defaults.

use crate::{Error, Result};
use alfred_core::resolve_workspace_path;
use alfred_types::UserId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_maxlen_approx() -> usize {
    1000
}

fn default_mismatch_threshold_s() -> u64 {
    120
}

fn default_mismatch_cooldown_s() -> u64 {
    60
}

fn default_planner_rate_per_min() -> u32 {
    10
}

fn default_planner_rate_per_hour() -> u32 {
    120
}

fn default_email_send_cap_per_hour() -> u32 {
    30
}

/// The Runtime's full configuration (§6.6). `users` is the set the Runtime
/// watches; every other option is shared across users, matching the
/// teacher's single-`Config`-for-the-whole-workspace shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub users: Vec<String>,

    #[serde(default = "default_planner_url")]
    pub planner_url: String,
    #[serde(default = "default_calendar_reader_url")]
    pub calendar_reader_url: String,
    #[serde(default = "default_email_classifier_url")]
    pub email_classifier_url: String,
    #[serde(default = "default_mailer_url")]
    pub mailer_url: String,

    /// Initial `last_wb_id_processed`, as a `<millis>-<seq>` string; empty
    /// means `$` (§4.6 step 1 — no persisted cursor, no backlog replay).
    #[serde(default)]
    pub start_after_id: Option<String>,

    #[serde(default = "default_maxlen_approx")]
    pub maxlen_approx: usize,
    #[serde(default = "default_mismatch_threshold_s")]
    pub mismatch_threshold_s: u64,
    #[serde(default = "default_mismatch_cooldown_s")]
    pub mismatch_cooldown_s: u64,
    #[serde(default = "default_planner_rate_per_min")]
    pub planner_rate_per_min: u32,
    #[serde(default = "default_planner_rate_per_hour")]
    pub planner_rate_per_hour: u32,
    #[serde(default = "default_email_send_cap_per_hour")]
    pub email_send_cap_per_hour: u32,
}

fn default_planner_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_calendar_reader_url() -> String {
    "http://localhost:8091".to_string()
}

fn default_email_classifier_url() -> String {
    "http://localhost:8092".to_string()
}

fn default_mailer_url() -> String {
    "http://localhost:8093".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            planner_url: default_planner_url(),
            calendar_reader_url: default_calendar_reader_url(),
            email_classifier_url: default_email_classifier_url(),
            mailer_url: default_mailer_url(),
            start_after_id: None,
            maxlen_approx: default_maxlen_approx(),
            mismatch_threshold_s: default_mismatch_threshold_s(),
            mismatch_cooldown_s: default_mismatch_cooldown_s(),
            planner_rate_per_min: default_planner_rate_per_min(),
            planner_rate_per_hour: default_planner_rate_per_hour(),
            email_send_cap_per_hour: default_email_send_cap_per_hour(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)
            .map_err(|e| Error::Config(e.to_string()))?
            .join("config.toml"))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(resolve_workspace_path(None)
            .map_err(|e| Error::Config(e.to_string()))?
            .join("alfred.db"))
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.iter().map(UserId::new).collect()
    }

    /// Projects this configuration onto the subset `alfred-agents` needs to
    /// build a user's subagent fleet (§4.10 `registry::build_fleet`).
    pub fn to_agent_config(&self) -> alfred_agents::AgentConfig {
        alfred_agents::AgentConfig {
            planner_url: self.planner_url.clone(),
            planner_rate_per_min: self.planner_rate_per_min,
            planner_rate_per_hour: self.planner_rate_per_hour,
            calendar_reader_url: self.calendar_reader_url.clone(),
            email_classifier_url: self.email_classifier_url.clone(),
            email_send_cap_per_hour: self.email_send_cap_per_hour,
            mailer_url: self.mailer_url.clone(),
            mismatch_threshold_s: self.mismatch_threshold_s,
            mismatch_cooldown_s: self.mismatch_cooldown_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_has_no_users_but_sane_option_values() {
        let config = Config::default();
        assert!(config.users.is_empty());
        assert_eq!(config.maxlen_approx, 1000);
        assert_eq!(config.mismatch_threshold_s, 120);
    }

    #[test]
    fn save_and_load_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.users.push("alice".to_string());
        config.planner_rate_per_min = 5;

        config.save_to(&config_path)?;
        assert!(config_path.exists());

        let loaded = Config::load_from(&config_path)?;
        assert_eq!(loaded.users, vec!["alice".to_string()]);
        assert_eq!(loaded.planner_rate_per_min, 5);

        Ok(())
    }

    #[test]
    fn load_nonexistent_returns_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path)?;
        assert!(config.users.is_empty());

        Ok(())
    }

    #[test]
    fn to_agent_config_projects_matching_fields() {
        let mut config = Config::default();
        config.email_send_cap_per_hour = 42;
        let agent_config = config.to_agent_config();
        assert_eq!(agent_config.email_send_cap_per_hour, 42);
        assert_eq!(agent_config.planner_url, config.planner_url);
    }
}
