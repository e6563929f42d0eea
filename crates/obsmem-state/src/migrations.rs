//! `om_records` table definition, applied on every connect.
//!
//! Row layout:
//! ```text
//! om_records {
//!   record_id:                 string, unique
//!   scope_key:                 string, "thread:<id>" | "resource:<id>"
//!   generation_count:          int, unique within scope_key
//!   is_observing:              bool
//!   is_reflecting:             bool
//!   is_buffering_observation:  bool
//!   is_buffering_reflection:   bool
//!   body:                      object, the record minus its flags
//! }
//! ```
//!
//! Flags live in their own columns so that rewriting `body` can never
//! clobber a flag raised concurrently.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::{Result, StateError};

/// Table holding every generation of every key
pub const RECORDS_TABLE: &str = "om_records";

const STATEMENTS: &[&str] = &[
    "DEFINE TABLE IF NOT EXISTS om_records SCHEMALESS PERMISSIONS FULL",
    "DEFINE INDEX IF NOT EXISTS idx_om_record_id ON TABLE om_records COLUMNS record_id UNIQUE",
    "DEFINE INDEX IF NOT EXISTS idx_om_scope_key ON TABLE om_records COLUMNS scope_key",
    "DEFINE INDEX IF NOT EXISTS idx_om_scope_generation ON TABLE om_records \
     COLUMNS scope_key, generation_count UNIQUE",
];

/// Define `om_records` and its indexes. Every statement is `IF NOT EXISTS`.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    for statement in STATEMENTS {
        debug!(statement = *statement, "applying schema statement");
        db.query(*statement)
            .await
            .and_then(|res| res.check())
            .map_err(|e| StateError::SchemaSetup(format!("{statement}: {e}")))?;
    }
    info!(table = RECORDS_TABLE, "schema ready");
    Ok(())
}
