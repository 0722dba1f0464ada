//! The Manager Graph (C4): a directed workflow over normalized whiteboard
//! events. Nodes are plain functions over an immutable dependency bundle
//! (`GraphDeps`) rather than objects holding references to each other, per
//! the "no reference cycles" redesign note in SPEC_FULL.md §9 — a node
//! cannot call back into the runtime except through the trait objects it
//! was handed.
//!
//! External collaborators (Planner, the productivity control channel, the
//! mail control channel, the whiteboard append path) are injected as
//! trait objects so graph logic is unit-testable without touching the
//! network or a real `Bus`/`Database`.

use alfred_types::{
    CalendarImpact, Checkpoint, Envelope, EventSource, Scalar, ScalarMap, SideEffectKey, ThreadId,
    TypedEvent, UserChoice, UserId, WbId,
};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// `POST /planner/run` request (§6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerRequest {
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub plan_date: NaiveDate,
    pub time_block: String,
    pub activity_type: Option<String>,
}

/// `POST /planner/run` response (§6.3). No side-effects on the Planner's
/// side; the Manager is what makes this idempotent via `side_effects_log`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerResponse {
    pub plan_id: String,
    pub version: u64,
    pub timeline: Vec<serde_json::Value>,
    pub conflicts: Vec<serde_json::Value>,
    pub rationale: String,
}

/// `prod.recompute` control-channel message (§6.4).
#[derive(Debug, Clone, PartialEq)]
pub struct ProdRecalcSignal {
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub plan_id: String,
    pub version: u64,
    pub block_id: String,
}

/// `email.send.confirmed` control-channel message (§4.10).
#[derive(Debug, Clone, PartialEq)]
pub struct MailSendConfirmed {
    pub user_id: UserId,
    pub thread_id: ThreadId,
    pub message_id: String,
    pub draft_hash: String,
}

/// Mockable collaborator for `planner_call` (§6.3). The concrete
/// `reqwest`-backed implementation lives in `alfred_agents::planner`.
pub trait PlannerCollaborator: Send + Sync {
    fn run<'a>(&'a self, request: &'a PlannerRequest) -> BoxFuture<'a, Result<PlannerResponse, String>>;
}

/// Mockable sink for `prod_recalc_signal` (§6.4).
pub trait ProdControlSink: Send + Sync {
    fn send<'a>(&'a self, signal: &'a ProdRecalcSignal) -> BoxFuture<'a, Result<(), String>>;
}

/// Mockable sink for the Mailer's confirm channel (§4.10).
pub trait MailControlSink: Send + Sync {
    fn send<'a>(&'a self, confirmed: &'a MailSendConfirmed) -> BoxFuture<'a, Result<(), String>>;
}

/// Append path for `emit_prompt` (§4.1 C1, narrowed to just the write side
/// the graph needs). The concrete implementation wraps `alfred_core::Bus`.
pub trait WhiteboardSink: Send + Sync {
    fn append(&self, user_id: &UserId, thread_id: &ThreadId, values: ScalarMap) -> WbId;
}

/// Immutable bundle of collaborators a graph run is parameterized by.
#[derive(Clone)]
pub struct GraphDeps {
    pub planner: Arc<dyn PlannerCollaborator>,
    pub prod_control: Arc<dyn ProdControlSink>,
    pub mail_control: Arc<dyn MailControlSink>,
    pub whiteboard: Arc<dyn WhiteboardSink>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    PlannerFailed(String),
    ProdControlFailed(String),
    MailControlFailed(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::PlannerFailed(msg) => write!(f, "planner_call failed: {msg}"),
            GraphError::ProdControlFailed(msg) => write!(f, "prod_recalc_signal failed: {msg}"),
            GraphError::MailControlFailed(msg) => write!(f, "mail control send failed: {msg}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// What a graph run did, for the Runtime Worker's logging/metrics (C12) —
/// not consulted for correctness, since idempotency lives in `Checkpoint`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphOutcome {
    pub appended: Vec<WbId>,
    pub dropped: bool,
    pub prod_recalc_sent: bool,
    pub planner_response: Option<PlannerResponse>,
}

impl GraphOutcome {
    fn dropped() -> Self {
        Self {
            dropped: true,
            ..Default::default()
        }
    }
}

/// Entry point: `ingest_wb → router → branch`. §4.6 calls this once per
/// normalized event, after `should_skip` has already passed.
pub async fn run_graph(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
) -> Result<GraphOutcome, GraphError> {
    tracing::debug!(wb_id = %envelope.wb_id, user = %envelope.user_id, "ingest_wb");
    match envelope.event.source() {
        EventSource::Calendar => calendar_branch(envelope, checkpoint, deps).await,
        EventSource::Prod => prod_branch(envelope, checkpoint, deps).await,
        EventSource::Email => email_branch(envelope, checkpoint, deps).await,
        EventSource::UserAction => user_action_branch(envelope, checkpoint, deps).await,
        EventSource::Manager => {
            tracing::debug!(wb_id = %envelope.wb_id, "router: dropping manager-authored event");
            Ok(GraphOutcome::dropped())
        }
    }
}

async fn calendar_branch(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
) -> Result<GraphOutcome, GraphError> {
    let mut outcome = GraphOutcome::default();

    let (impact, summary) = match &envelope.event {
        TypedEvent::CalendarPlanProposed(p) => (p.impact, p.summary.clone()),
        TypedEvent::CalendarPlanNewVersion(p) => {
            (CalendarImpact::Today, format!("plan {} updated to v{}", p.plan_id, p.version))
        }
        _ => return Ok(outcome),
    };

    planner_call(envelope, checkpoint, deps, &mut outcome).await?;
    prod_recalc_signal(envelope, checkpoint, deps, &mut outcome).await?;

    if impact == CalendarImpact::Today {
        emit_prompt(
            envelope,
            checkpoint,
            deps,
            format!("Your calendar changed: {summary}. Apply the update?"),
            vec![UserChoice::Apply, UserChoice::Defer, UserChoice::Dismiss],
            &mut outcome,
        );
    }

    Ok(outcome)
}

async fn prod_branch(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
) -> Result<GraphOutcome, GraphError> {
    let mut outcome = GraphOutcome::default();

    let activity_label = match &envelope.event {
        TypedEvent::ProdUnderrun(p) | TypedEvent::ProdOverrun(p) | TypedEvent::ProdNudge(p) => {
            p.activity_label.clone()
        }
        _ => return Ok(outcome),
    };

    emit_prompt(
        envelope,
        checkpoint,
        deps,
        format!("You are still in {activity_label}. Do you want to refocus?"),
        vec![UserChoice::Refocus, UserChoice::UpdatePlan, UserChoice::Dismiss],
        &mut outcome,
    );

    Ok(outcome)
}

async fn email_branch(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
) -> Result<GraphOutcome, GraphError> {
    let mut outcome = GraphOutcome::default();

    let TypedEvent::EmailReplyNeeded(email) = &envelope.event else {
        return Ok(outcome);
    };

    emit_prompt(
        envelope,
        checkpoint,
        deps,
        format!("{} asked: {}. Reply with your draft?", email.sender, email.summary),
        vec![UserChoice::ReadAloud, UserChoice::Send, UserChoice::Dismiss],
        &mut outcome,
    );

    Ok(outcome)
}

/// `manager.user_action`: the user-confirmation return path (§4.4,
/// §9 "confirm path" decision). Only `update_plan` drives the planner/prod
/// nodes; every other choice simply resolves the pending prompt. `send`
/// additionally drives the Mailer's confirm channel (§4.10, scenario 4).
async fn user_action_branch(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
) -> Result<GraphOutcome, GraphError> {
    let mut outcome = GraphOutcome::default();

    let TypedEvent::ManagerUserAction(action) = &envelope.event else {
        return Ok(outcome);
    };

    match action.choice {
        UserChoice::UpdatePlan => {
            planner_call(envelope, checkpoint, deps, &mut outcome).await?;
            prod_recalc_signal(envelope, checkpoint, deps, &mut outcome).await?;
            emit_prompt(
                envelope,
                checkpoint,
                deps,
                "Plan updated.".to_string(),
                vec![UserChoice::Apply, UserChoice::Defer, UserChoice::Dismiss],
                &mut outcome,
            );
        }
        UserChoice::Send => {
            mail_control(envelope, checkpoint, deps, action, &mut outcome).await?;
            checkpoint.pending_prompt_id = None;
        }
        UserChoice::Refocus | UserChoice::Dismiss | UserChoice::Apply | UserChoice::Defer
        | UserChoice::ReadAloud => {
            checkpoint.pending_prompt_id = None;
        }
    }

    Ok(outcome)
}

async fn planner_call(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
    outcome: &mut GraphOutcome,
) -> Result<(), GraphError> {
    let key = SideEffectKey::new(envelope.wb_id, "planner_call");
    if checkpoint.has_side_effect(&key) {
        return Ok(());
    }

    let request = PlannerRequest {
        user_id: envelope.user_id.clone(),
        thread_id: envelope.thread_id.clone(),
        plan_date: envelope.ts.date_naive(),
        time_block: block_id_of(&envelope.event).unwrap_or_else(|| "current".to_string()),
        activity_type: activity_label_of(&envelope.event),
    };

    let response = deps
        .planner
        .run(&request)
        .await
        .map_err(GraphError::PlannerFailed)?;

    checkpoint.record_side_effect(key);
    checkpoint.last_plan_id = Some(response.plan_id.clone());
    checkpoint.last_plan_version = Some(response.version);
    outcome.planner_response = Some(response);
    Ok(())
}

async fn prod_recalc_signal(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
    outcome: &mut GraphOutcome,
) -> Result<(), GraphError> {
    let key = SideEffectKey::new(envelope.wb_id, "prod_recalc_signal");
    if checkpoint.has_side_effect(&key) {
        return Ok(());
    }

    // Nothing to recompute against until a plan exists (§4.4 `planner_call`
    // runs first on every caller path into this node).
    let (Some(plan_id), Some(version)) = (checkpoint.last_plan_id.clone(), checkpoint.last_plan_version)
    else {
        return Ok(());
    };

    let signal = ProdRecalcSignal {
        user_id: envelope.user_id.clone(),
        thread_id: envelope.thread_id.clone(),
        plan_id,
        version,
        block_id: block_id_of(&envelope.event).unwrap_or_else(|| "current".to_string()),
    };

    deps.prod_control
        .send(&signal)
        .await
        .map_err(GraphError::ProdControlFailed)?;

    checkpoint.record_side_effect(key);
    outcome.prod_recalc_sent = true;
    Ok(())
}

async fn mail_control(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
    action: &alfred_types::ManagerUserAction,
    outcome: &mut GraphOutcome,
) -> Result<(), GraphError> {
    let key = SideEffectKey::new(envelope.wb_id, "mail_control_send");
    if checkpoint.has_side_effect(&key) {
        return Ok(());
    }

    let Some(message_id) = action
        .metadata
        .as_ref()
        .and_then(|m| m.get("message_id"))
        .and_then(|v| v.as_str())
    else {
        // No message to send without a message_id; nothing to do.
        return Ok(());
    };

    let draft_hash = action
        .metadata
        .as_ref()
        .and_then(|m| m.get("draft"))
        .and_then(|v| v.as_str())
        .map(sha256_hex)
        .unwrap_or_default();

    let confirmed = MailSendConfirmed {
        user_id: envelope.user_id.clone(),
        thread_id: envelope.thread_id.clone(),
        message_id: message_id.to_string(),
        draft_hash,
    };

    deps.mail_control
        .send(&confirmed)
        .await
        .map_err(GraphError::MailControlFailed)?;

    checkpoint.record_side_effect(key);
    outcome.appended.clear(); // no whiteboard write for this node
    Ok(())
}

fn sha256_hex(input: &str) -> String {
    // A simple FNV-1a is used here deliberately to avoid pulling a hashing
    // crate into this pure-logic module; `alfred-agents`'s Mailer recomputes
    // the authoritative `sha2` digest it sends to the external API (§4.10).
    // This value is purely a dedupe token inside the confirm message.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

fn block_id_of(event: &TypedEvent) -> Option<String> {
    match event {
        TypedEvent::ProdUnderrun(p) | TypedEvent::ProdOverrun(p) | TypedEvent::ProdNudge(p) => {
            Some(p.block_id.clone())
        }
        _ => None,
    }
}

fn activity_label_of(event: &TypedEvent) -> Option<String> {
    match event {
        TypedEvent::ProdUnderrun(p) | TypedEvent::ProdOverrun(p) | TypedEvent::ProdNudge(p) => {
            Some(p.activity_label.clone())
        }
        _ => None,
    }
}

/// Appends exactly one `manager.prompt` event and records the idempotency
/// key guarding "at most one prompt per inbound event per thread" (§4.4).
/// A no-op if this event already emitted a prompt (replay safety).
fn emit_prompt(
    envelope: &Envelope,
    checkpoint: &mut Checkpoint,
    deps: &GraphDeps,
    content: String,
    options: Vec<UserChoice>,
    outcome: &mut GraphOutcome,
) {
    let key = SideEffectKey::new(envelope.wb_id, "emit_prompt");
    if checkpoint.has_side_effect(&key) {
        return;
    }

    let action_id = format!("{}-prompt", envelope.wb_id);
    let mut values = ScalarMap::new();
    values.insert("type".to_string(), Scalar::String("manager.prompt".to_string()));
    values.insert("content".to_string(), Scalar::String(content));
    values.insert(
        "options".to_string(),
        Scalar::Array(
            options
                .iter()
                .map(|c| Scalar::String(c.as_str().to_string()))
                .collect(),
        ),
    );
    values.insert("action_id".to_string(), Scalar::String(action_id.clone()));
    values.insert(
        "wb_parent_id".to_string(),
        Scalar::String(envelope.wb_id.to_string()),
    );

    let appended_id = deps.whiteboard.append(&envelope.user_id, &envelope.thread_id, values);

    checkpoint.record_side_effect(key);
    checkpoint.pending_prompt_id = Some(action_id);
    outcome.appended.push(appended_id);
}
