//! Per-user subagent fleet construction (§4.10 AMBIENT "Subagent trait
//! shape"). Each subagent needs a different collaborator wired in, so this
//! module takes a single `AgentConfig` (the subset of §6.6 this crate cares
//! about) plus the shared `Bus`/`ChannelBus`/`Database` handles and returns
//! the four boxed `Subagent`s the Runtime supervisor (`alfred-runtime`)
//! spawns one task per.

use crate::calendar_planner::{CalendarPlanner, HttpCalendarReader};
use crate::email_triage::{EmailTriage, HttpEmailClassifier};
use crate::mailer::{HttpMailSender, Mailer};
use crate::planner::PlannerClient;
use crate::productivity::Productivity;
use crate::subagent::Subagent;
use alfred_core::{Bus, ChannelBus};
use alfred_index::Database;
use alfred_types::UserId;
use std::sync::Arc;

/// Stable role identifiers, matching `Subagent::id()` (§4.10).
pub const ROLE_CALENDAR_PLANNER: &str = "calendar_planner";
pub const ROLE_PRODUCTIVITY: &str = "productivity";
pub const ROLE_EMAIL_TRIAGE: &str = "email_triage";
pub const ROLE_MAILER: &str = "mailer";

pub const ALL_ROLES: &[&str] = &[
    ROLE_CALENDAR_PLANNER,
    ROLE_PRODUCTIVITY,
    ROLE_EMAIL_TRIAGE,
    ROLE_MAILER,
];

/// The subset of §6.6 configuration this crate needs to build its fleet.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub planner_url: String,
    pub planner_rate_per_min: u32,
    pub planner_rate_per_hour: u32,
    pub calendar_reader_url: String,
    pub email_classifier_url: String,
    pub email_send_cap_per_hour: u32,
    pub mailer_url: String,
    pub mismatch_threshold_s: u64,
    pub mismatch_cooldown_s: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            planner_url: "http://localhost:8090".to_string(),
            planner_rate_per_min: 10,
            planner_rate_per_hour: 120,
            calendar_reader_url: "http://localhost:8091".to_string(),
            email_classifier_url: "http://localhost:8092".to_string(),
            email_send_cap_per_hour: 30,
            mailer_url: "http://localhost:8093".to_string(),
            mismatch_threshold_s: 120,
            mismatch_cooldown_s: 60,
        }
    }
}

/// Shared handles every subagent constructor draws from. One `ChannelBus`
/// backs every input stream and control channel (§6.1) — they're
/// distinguished by stream key, not by instance.
pub struct AgentDeps {
    pub whiteboard: Arc<Bus>,
    pub channels: Arc<ChannelBus>,
    pub db: Arc<Database>,
}

/// Builds one instance of `role` for `user_id`: a name-to-constructor
/// dispatch generalized to per-role dependency wiring.
pub fn build(role: &str, user_id: UserId, cfg: &AgentConfig, deps: &AgentDeps) -> Option<Box<dyn Subagent>> {
    match role {
        ROLE_CALENDAR_PLANNER => {
            let planner = Arc::new(PlannerClient::new(
                cfg.planner_url.clone(),
                cfg.planner_rate_per_min,
                cfg.planner_rate_per_hour,
            ));
            let external = Arc::new(HttpCalendarReader::new(cfg.calendar_reader_url.clone()));
            Some(Box::new(CalendarPlanner::new(
                user_id,
                deps.channels.clone(),
                deps.whiteboard.clone(),
                deps.db.clone(),
                planner,
                external,
            )))
        }
        ROLE_PRODUCTIVITY => Some(Box::new(Productivity::new(
            user_id,
            deps.channels.clone(),
            deps.whiteboard.clone(),
            deps.db.clone(),
            cfg.mismatch_threshold_s,
            cfg.mismatch_cooldown_s,
        ))),
        ROLE_EMAIL_TRIAGE => {
            let classifier = Arc::new(HttpEmailClassifier::new(cfg.email_classifier_url.clone()));
            Some(Box::new(EmailTriage::new(
                user_id,
                deps.channels.clone(),
                deps.whiteboard.clone(),
                deps.db.clone(),
                classifier,
                cfg.email_send_cap_per_hour,
            )))
        }
        ROLE_MAILER => {
            let sender = Arc::new(HttpMailSender::new(cfg.mailer_url.clone()));
            Some(Box::new(Mailer::new(
                user_id,
                deps.channels.clone(),
                deps.db.clone(),
                sender,
            )))
        }
        _ => None,
    }
}

/// Builds all four subagents for `user_id` (§5 "one long-lived worker per
/// `(user, role)`").
pub fn build_fleet(user_id: &UserId, cfg: &AgentConfig, deps: &AgentDeps) -> Vec<Box<dyn Subagent>> {
    ALL_ROLES
        .iter()
        .filter_map(|role| build(role, user_id.clone(), cfg, deps))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps() -> AgentDeps {
        AgentDeps {
            whiteboard: Arc::new(Bus::default()),
            channels: Arc::new(ChannelBus::default()),
            db: Arc::new(Database::open_in_memory().unwrap()),
        }
    }

    #[test]
    fn build_fleet_constructs_all_four_roles() {
        let fleet = build_fleet(&UserId::new("u1"), &AgentConfig::default(), &deps());
        let ids: Vec<&str> = fleet.iter().map(|s| s.id()).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&ROLE_CALENDAR_PLANNER));
        assert!(ids.contains(&ROLE_PRODUCTIVITY));
        assert!(ids.contains(&ROLE_EMAIL_TRIAGE));
        assert!(ids.contains(&ROLE_MAILER));
    }

    #[test]
    fn unknown_role_returns_none() {
        assert!(build("bogus", UserId::new("u1"), &AgentConfig::default(), &deps()).is_none());
    }
}
