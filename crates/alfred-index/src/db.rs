use alfred_types::{
    Checkpoint, InputStreamOffset, Proposal, ProposalStatus, ShadowCalendarEvent, SideEffectKey,
    SyncToken, ThreadId, UserId, WbId, WhiteboardEvent,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;

use crate::schema::init_schema;
use crate::{Error, Result};

/// SQLite-backed Checkpoint Store (C5) plus the rest of the durable
/// persistence layout (§6.7): shadow calendar, sync tokens, proposals, and a
/// whiteboard archive for cold-start replay.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    // --- Checkpoints (§4.5) ---------------------------------------------

    /// Returns the checkpoint for `(user, thread)`, or a fresh zero-value one
    /// if none has been saved yet.
    pub fn get_checkpoint(&self, user_id: &UserId, thread_id: &ThreadId) -> Result<Checkpoint> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT last_wb_id, last_plan_id, last_plan_version, pending_prompt_id
                FROM checkpoints
                WHERE user_id = ?1 AND thread_id = ?2
                "#,
                params![user_id.as_str(), thread_id.as_str()],
                |row| {
                    let last_wb_id: String = row.get(0)?;
                    let last_plan_id: Option<String> = row.get(1)?;
                    let last_plan_version: Option<i64> = row.get(2)?;
                    let pending_prompt_id: Option<String> = row.get(3)?;
                    Ok((last_wb_id, last_plan_id, last_plan_version, pending_prompt_id))
                },
            )
            .optional()?;

        let mut checkpoint = Checkpoint::new(user_id.clone(), thread_id.clone());
        if let Some((last_wb_id, last_plan_id, last_plan_version, pending_prompt_id)) = row {
            checkpoint.last_wb_id_processed =
                WbId::from_str(&last_wb_id).map_err(|_| Error::Query("malformed wb_id".into()))?;
            checkpoint.last_plan_id = last_plan_id;
            checkpoint.last_plan_version = last_plan_version.map(|v| v as u64);
            checkpoint.pending_prompt_id = pending_prompt_id;
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT wb_id, node_name FROM side_effect_keys
            WHERE user_id = ?1 AND thread_id = ?2
            "#,
        )?;
        let rows = stmt.query_map(params![user_id.as_str(), thread_id.as_str()], |row| {
            let wb_id: String = row.get(0)?;
            let node_name: String = row.get(1)?;
            Ok((wb_id, node_name))
        })?;
        for row in rows {
            let (wb_id, node_name) = row?;
            let wb_id =
                WbId::from_str(&wb_id).map_err(|_| Error::Query("malformed wb_id".into()))?;
            checkpoint
                .side_effects_log
                .insert(SideEffectKey::new(wb_id, node_name));
        }

        Ok(checkpoint)
    }

    /// Persists the scalar fields of a checkpoint. Side-effect keys are
    /// written individually via `record_side_effect`, not here.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO checkpoints (user_id, thread_id, last_wb_id, last_plan_id, last_plan_version, pending_prompt_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, thread_id) DO UPDATE SET
                last_wb_id = ?3,
                last_plan_id = ?4,
                last_plan_version = ?5,
                pending_prompt_id = ?6
            "#,
            params![
                checkpoint.user_id.as_str(),
                checkpoint.thread_id.as_str(),
                checkpoint.last_wb_id_processed.to_string(),
                checkpoint.last_plan_id,
                checkpoint.last_plan_version.map(|v| v as i64),
                checkpoint.pending_prompt_id,
            ],
        )?;
        Ok(())
    }

    /// Records a side-effect key if absent, returning whether it was newly
    /// inserted. A graph node consults this before performing the external
    /// call it guards (§4.4).
    pub fn record_side_effect(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
        key: &SideEffectKey,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO side_effect_keys (user_id, thread_id, wb_id, node_name, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user_id.as_str(),
                thread_id.as_str(),
                key.wb_id.to_string(),
                key.node_name,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn has_side_effect(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
        key: &SideEffectKey,
    ) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM side_effect_keys
            WHERE user_id = ?1 AND thread_id = ?2 AND wb_id = ?3 AND node_name = ?4
            "#,
            params![
                user_id.as_str(),
                thread_id.as_str(),
                key.wb_id.to_string(),
                key.node_name,
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// §4.5 compaction: drops all but the most recent `keep_last` side-effect
    /// keys for a thread. `last_wb_id_processed`/`last_plan_*` are untouched —
    /// they live on the `checkpoints` row, not here. Returns the number of
    /// keys removed.
    pub fn compact_side_effects(
        &self,
        user_id: &UserId,
        thread_id: &ThreadId,
        keep_last: usize,
    ) -> Result<usize> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM side_effect_keys
            WHERE user_id = ?1 AND thread_id = ?2
            AND wb_id NOT IN (
                SELECT wb_id FROM side_effect_keys
                WHERE user_id = ?1 AND thread_id = ?2
                ORDER BY recorded_at DESC
                LIMIT ?3
            )
            "#,
            params![user_id.as_str(), thread_id.as_str(), keep_last as i64],
        )?;
        Ok(removed)
    }

    // --- Shadow calendar & sync tokens (§4.7) ----------------------------

    pub fn upsert_shadow_event(&self, event: &ShadowCalendarEvent) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO shadow_calendar_events
                (user_id, calendar_id, external_event_id, title, start_ts, end_ts, etag)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id, calendar_id, external_event_id) DO UPDATE SET
                title = ?4,
                start_ts = ?5,
                end_ts = ?6,
                etag = COALESCE(?7, etag)
            "#,
            params![
                event.user_id.as_str(),
                event.calendar_id,
                event.external_event_id,
                event.title,
                event.start.to_rfc3339(),
                event.end.to_rfc3339(),
                event.etag,
            ],
        )?;
        Ok(())
    }

    pub fn get_shadow_event(
        &self,
        user_id: &UserId,
        calendar_id: &str,
        external_event_id: &str,
    ) -> Result<Option<ShadowCalendarEvent>> {
        self.conn
            .query_row(
                r#"
                SELECT title, start_ts, end_ts, etag FROM shadow_calendar_events
                WHERE user_id = ?1 AND calendar_id = ?2 AND external_event_id = ?3
                "#,
                params![user_id.as_str(), calendar_id, external_event_id],
                |row| {
                    let title: String = row.get(0)?;
                    let start: String = row.get(1)?;
                    let end: String = row.get(2)?;
                    let etag: Option<String> = row.get(3)?;
                    Ok((title, start, end, etag))
                },
            )
            .optional()?
            .map(|(title, start, end, etag)| {
                Ok(ShadowCalendarEvent {
                    user_id: user_id.clone(),
                    calendar_id: calendar_id.to_string(),
                    external_event_id: external_event_id.to_string(),
                    title,
                    start: parse_rfc3339(&start)?,
                    end: parse_rfc3339(&end)?,
                    etag,
                })
            })
            .transpose()
    }

    pub fn save_sync_token(&self, token: &SyncToken) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO sync_tokens (user_id, calendar_id, token, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, calendar_id) DO UPDATE SET
                token = ?3,
                updated_at = ?4
            "#,
            params![
                token.user_id.as_str(),
                token.calendar_id,
                token.token,
                token.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_sync_token(&self, user_id: &UserId, calendar_id: &str) -> Result<Option<SyncToken>> {
        self.conn
            .query_row(
                r#"
                SELECT token, updated_at FROM sync_tokens
                WHERE user_id = ?1 AND calendar_id = ?2
                "#,
                params![user_id.as_str(), calendar_id],
                |row| {
                    let token: String = row.get(0)?;
                    let updated_at: String = row.get(1)?;
                    Ok((token, updated_at))
                },
            )
            .optional()?
            .map(|(token, updated_at)| {
                Ok(SyncToken {
                    user_id: user_id.clone(),
                    calendar_id: calendar_id.to_string(),
                    token,
                    updated_at: parse_rfc3339(&updated_at)?,
                })
            })
            .transpose()
    }

    // --- Input stream offsets (§3, §4.7 replay safety) --------------------

    /// Durable high-water mark for an external input stream (`in:calendar`/
    /// `in:prod`/`in:email`), so a restarted subagent resumes rather than
    /// reprocessing everything from the start.
    pub fn save_input_offset(&self, offset: &InputStreamOffset) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO input_stream_offsets (stream_key, last_entry_id)
            VALUES (?1, ?2)
            ON CONFLICT(stream_key) DO UPDATE SET last_entry_id = ?2
            "#,
            params![offset.stream_key, offset.last_entry_id],
        )?;
        Ok(())
    }

    pub fn get_input_offset(&self, stream_key: &str) -> Result<Option<InputStreamOffset>> {
        self.conn
            .query_row(
                "SELECT last_entry_id FROM input_stream_offsets WHERE stream_key = ?1",
                params![stream_key],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|last_entry_id| {
                Ok(InputStreamOffset {
                    stream_key: stream_key.to_string(),
                    last_entry_id,
                })
            })
            .transpose()
    }

    // --- Proposals (§4.7, §9 calendar confirm decision) ------------------

    pub fn insert_proposal(&self, proposal: &Proposal) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO proposals
                (proposal_id, user_id, plan_id, version, delta_id, status, affected_event_ids, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(proposal_id) DO UPDATE SET
                status = ?6,
                affected_event_ids = ?7
            "#,
            params![
                proposal.proposal_id,
                proposal.user_id.as_str(),
                proposal.plan_id,
                proposal.version as i64,
                proposal.delta_id,
                status_str(proposal.status),
                serde_json::to_string(&proposal.affected_event_ids)?,
                proposal.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_proposal_status(&self, proposal_id: &str, status: ProposalStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE proposals SET status = ?1 WHERE proposal_id = ?2",
            params![status_str(status), proposal_id],
        )?;
        if changed == 0 {
            return Err(Error::Query(format!("no such proposal: {proposal_id}")));
        }
        Ok(())
    }

    pub fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT user_id, plan_id, version, delta_id, status, affected_event_ids, created_at
                FROM proposals WHERE proposal_id = ?1
                "#,
                params![proposal_id],
                |row| {
                    let user_id: String = row.get(0)?;
                    let plan_id: String = row.get(1)?;
                    let version: i64 = row.get(2)?;
                    let delta_id: String = row.get(3)?;
                    let status: String = row.get(4)?;
                    let affected_event_ids: String = row.get(5)?;
                    let created_at: String = row.get(6)?;
                    Ok((
                        user_id,
                        plan_id,
                        version,
                        delta_id,
                        status,
                        affected_event_ids,
                        created_at,
                    ))
                },
            )
            .optional()?;

        let Some((user_id, plan_id, version, delta_id, status, affected_event_ids, created_at)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(Proposal {
            proposal_id: proposal_id.to_string(),
            user_id: UserId::new(user_id),
            plan_id,
            version: version as u64,
            delta_id,
            status: parse_status(&status)?,
            affected_event_ids: serde_json::from_str(&affected_event_ids)?,
            created_at: parse_rfc3339(&created_at)?,
        }))
    }

    pub fn list_proposals_by_status(
        &self,
        user_id: &UserId,
        status: ProposalStatus,
    ) -> Result<Vec<Proposal>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT proposal_id, plan_id, version, delta_id, affected_event_ids, created_at
            FROM proposals WHERE user_id = ?1 AND status = ?2
            ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id.as_str(), status_str(status)], |row| {
            let proposal_id: String = row.get(0)?;
            let plan_id: String = row.get(1)?;
            let version: i64 = row.get(2)?;
            let delta_id: String = row.get(3)?;
            let affected_event_ids: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok((
                proposal_id,
                plan_id,
                version,
                delta_id,
                affected_event_ids,
                created_at,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (proposal_id, plan_id, version, delta_id, affected_event_ids, created_at) = row?;
            out.push(Proposal {
                proposal_id,
                user_id: user_id.clone(),
                plan_id,
                version: version as u64,
                delta_id,
                status,
                affected_event_ids: serde_json::from_str(&affected_event_ids)?,
                created_at: parse_rfc3339(&created_at)?,
            });
        }
        Ok(out)
    }

    // --- Mailer Worker idempotency (§4.10) --------------------------------

    /// Records `(message_id, draft_hash)` as sent, returning whether this is
    /// the first time — `false` means a retry of an already-sent key, which
    /// the caller must not resend.
    pub fn mark_sent(&self, user_id: &UserId, message_id: &str, draft_hash: &str) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO mailer_sent_keys (user_id, message_id, draft_hash, sent_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![user_id.as_str(), message_id, draft_hash, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn has_sent(&self, user_id: &UserId, message_id: &str, draft_hash: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM mailer_sent_keys
            WHERE user_id = ?1 AND message_id = ?2 AND draft_hash = ?3
            "#,
            params![user_id.as_str(), message_id, draft_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- Email-Triage dedupe (§4.9) ----------------------------------------

    /// Records `(message_id, internal_date)` as seen, returning whether this
    /// is the first time.
    pub fn mark_email_seen(&self, user_id: &UserId, message_id: &str, internal_date: &str) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO email_dedupe_keys (user_id, message_id, internal_date, seen_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![user_id.as_str(), message_id, internal_date, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    // --- Whiteboard archive (cold-start replay backing C1) ---------------

    pub fn archive_whiteboard_event(&self, event: &WhiteboardEvent) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO whiteboard_archive
                (user_id, wb_id, wb_id_millis, wb_id_seq, thread_id, ts, values_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                event.user_id.as_str(),
                event.wb_id.to_string(),
                event.wb_id.millis as i64,
                event.wb_id.seq as i64,
                event.thread_id.as_str(),
                event.ts.to_rfc3339(),
                serde_json::to_string(&event.values)?,
            ],
        )?;
        Ok(())
    }

    pub fn replay_whiteboard_events_after(
        &self,
        user_id: &UserId,
        after_id: WbId,
        limit: usize,
    ) -> Result<Vec<WhiteboardEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT wb_id, thread_id, ts, values_json FROM whiteboard_archive
            WHERE user_id = ?1 AND (wb_id_millis, wb_id_seq) > (?2, ?3)
            ORDER BY wb_id_millis ASC, wb_id_seq ASC
            LIMIT ?4
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                user_id.as_str(),
                after_id.millis as i64,
                after_id.seq as i64,
                limit as i64
            ],
            |row| {
                let wb_id: String = row.get(0)?;
                let thread_id: String = row.get(1)?;
                let ts: String = row.get(2)?;
                let values_json: String = row.get(3)?;
                Ok((wb_id, thread_id, ts, values_json))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (wb_id, thread_id, ts, values_json) = row?;
            out.push(WhiteboardEvent {
                wb_id: WbId::from_str(&wb_id).map_err(|_| Error::Query("malformed wb_id".into()))?,
                user_id: user_id.clone(),
                thread_id: ThreadId::new(thread_id)
                    .ok_or_else(|| Error::Query("empty archived thread_id".into()))?,
                ts: parse_rfc3339(&ts)?,
                values: serde_json::from_str(&values_json)?,
            });
        }
        Ok(out)
    }

    /// Reclaims disk space after a compaction pass.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

fn status_str(status: ProposalStatus) -> &'static str {
    match status {
        ProposalStatus::Pending => "pending",
        ProposalStatus::Applied => "applied",
        ProposalStatus::Dismissed => "dismissed",
        ProposalStatus::Stale => "stale",
    }
}

fn parse_status(s: &str) -> Result<ProposalStatus> {
    match s {
        "pending" => Ok(ProposalStatus::Pending),
        "applied" => Ok(ProposalStatus::Applied),
        "dismissed" => Ok(ProposalStatus::Dismissed),
        "stale" => Ok(ProposalStatus::Stale),
        other => Err(Error::Query(format!("unknown proposal status: {other}"))),
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Query(format!("malformed timestamp {s:?}: {e}")))
}
