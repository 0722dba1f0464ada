use rusqlite::Connection;

use crate::Result;

/// Increment when changing table definitions; a mismatch drops and recreates
/// every table rather than attempting an in-place migration.
pub const SCHEMA_VERSION: i32 = 4;

// NOTE: Database Design Rationale
//
// Why normalized side-effect keys instead of a JSON blob on the checkpoint row?
// - Idempotency checks (`record_side_effect`) are point lookups by
//   (user, thread, wb_id, node) and want an index, not a deserialize-then-scan.
// - Compaction (§4.5) needs to delete individual old keys while leaving
//   last_wb_id_processed/last_plan_* untouched; a normalized table makes that
//   a plain DELETE instead of a read-modify-write of a blob.
//
// Why keep a whiteboard archive here at all, when the live Bus is in-process
// memory?
// - Cold start needs somewhere durable to replay from; this table is that,
//   not a second source of truth. The Bus's own ring buffer wins when both
//   have the entry.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            user_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            last_wb_id TEXT NOT NULL,
            last_plan_id TEXT,
            last_plan_version INTEGER,
            pending_prompt_id TEXT,
            PRIMARY KEY (user_id, thread_id)
        );

        CREATE TABLE IF NOT EXISTS side_effect_keys (
            user_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            wb_id TEXT NOT NULL,
            node_name TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (user_id, thread_id, wb_id, node_name)
        );

        CREATE INDEX IF NOT EXISTS idx_side_effect_keys_thread
            ON side_effect_keys(user_id, thread_id);

        CREATE TABLE IF NOT EXISTS shadow_calendar_events (
            user_id TEXT NOT NULL,
            calendar_id TEXT NOT NULL,
            external_event_id TEXT NOT NULL,
            title TEXT NOT NULL,
            start_ts TEXT NOT NULL,
            end_ts TEXT NOT NULL,
            etag TEXT,
            PRIMARY KEY (user_id, calendar_id, external_event_id)
        );

        CREATE TABLE IF NOT EXISTS sync_tokens (
            user_id TEXT NOT NULL,
            calendar_id TEXT NOT NULL,
            token TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, calendar_id)
        );

        CREATE TABLE IF NOT EXISTS proposals (
            proposal_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            delta_id TEXT NOT NULL,
            status TEXT NOT NULL,
            affected_event_ids TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_proposals_user_status ON proposals(user_id, status);

        CREATE TABLE IF NOT EXISTS input_stream_offsets (
            stream_key TEXT PRIMARY KEY,
            last_entry_id TEXT NOT NULL
        );

        -- wb_id_millis/wb_id_seq are the numeric halves of `WbId` stored as
        -- INTEGER so `ORDER BY`/`>` match `WbId::cmp` exactly; the combined
        -- `<millis>-<seq>` TEXT column sorts lexically and diverges from
        -- that order once seq reaches double digits within one millisecond.
        CREATE TABLE IF NOT EXISTS whiteboard_archive (
            user_id TEXT NOT NULL,
            wb_id TEXT NOT NULL,
            wb_id_millis INTEGER NOT NULL,
            wb_id_seq INTEGER NOT NULL,
            thread_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            values_json TEXT NOT NULL,
            PRIMARY KEY (user_id, wb_id)
        );

        CREATE INDEX IF NOT EXISTS idx_whiteboard_archive_order
            ON whiteboard_archive(user_id, wb_id_millis, wb_id_seq);

        -- Mailer Worker (C10, §4.10) idempotency: the send key is
        -- (message_id, draft_hash), not thread-scoped, so it can't reuse the
        -- Checkpoint side-effect log.
        CREATE TABLE IF NOT EXISTS mailer_sent_keys (
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            draft_hash TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            PRIMARY KEY (user_id, message_id, draft_hash)
        );

        -- Email-Triage (C9, §4.9) dedupe: (message_id, internal_date) is
        -- also not thread-scoped (a message may arrive before any thread
        -- exists for it).
        CREATE TABLE IF NOT EXISTS email_dedupe_keys (
            user_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            internal_date TEXT NOT NULL,
            seen_at TEXT NOT NULL,
            PRIMARY KEY (user_id, message_id, internal_date)
        );
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS email_dedupe_keys;
        DROP TABLE IF EXISTS mailer_sent_keys;
        DROP TABLE IF EXISTS whiteboard_archive;
        DROP TABLE IF EXISTS input_stream_offsets;
        DROP TABLE IF EXISTS proposals;
        DROP TABLE IF EXISTS sync_tokens;
        DROP TABLE IF EXISTS shadow_calendar_events;
        DROP TABLE IF EXISTS side_effect_keys;
        DROP TABLE IF EXISTS checkpoints;
        "#,
    )?;
    Ok(())
}
