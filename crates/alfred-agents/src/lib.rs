//! The four autonomous subagents (C7-C10, §4.7-§4.10): Calendar-Planner,
//! Productivity, Email-Triage, and the Mailer. Each consumes its own input
//! stream or control channel (§6.1), emits decisions to the whiteboard (or,
//! for the Mailer, to an external mail API), and respects the backpressure/
//! degradation rules in §4.12/§5.

pub mod error;
pub mod subagent;

pub mod policy;

pub mod planner;

pub mod calendar_planner;
pub mod email_triage;
pub mod mailer;
pub mod productivity;

pub mod registry;

pub use calendar_planner::{CalendarPlanner, ExternalCalendarReader, ExternalEventSnapshot, HttpCalendarReader};
pub use email_triage::{Classification, EmailClassifier, EmailMessage, EmailTriage, HttpEmailClassifier};
pub use error::{Error, Result};
pub use mailer::{HttpMailSender, MailSender, Mailer, OutgoingMail, draft_hash};
pub use planner::PlannerClient;
pub use policy::DegradedGate;
pub use productivity::{Productivity, compute_expected_apps};
pub use registry::{ALL_ROLES, AgentConfig, AgentDeps, build, build_fleet};
pub use subagent::Subagent;
