// Durable persistence for the Checkpoint Store (C5) and the rest of the
// SQLite-backed state in §6.7: shadow calendar, sync tokens, proposals, and
// the whiteboard archive used for cold-start replay.

mod db;
pub mod error;
mod schema;

pub use db::Database;
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
