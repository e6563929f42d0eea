//! SurrealDB-backed RecordStore implementation
//!
//! Each generation is one `om_records` row: the indexed lookup columns
//! (`record_id`, `scope_key`, `generation_count`), one column per in-flight
//! flag, and the rest of the record as a JSON `body`.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::config::{AuthLevel, Credentials, StoreConfig, StoreTarget};
use crate::error::{StateError, StorageError};
use crate::migrations::{self, RECORDS_TABLE};
use crate::schema::{ObservationalMemoryRecord, RecordFlag, RecordId, ScopeKey};
use crate::storage_traits::{RecordStore, StorageResult};

/// One `om_records` row
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordRow {
    /// SurrealDB record ID
    id: Option<surrealdb::sql::Thing>,
    record_id: String,
    scope_key: String,
    generation_count: u64,
    is_observing: bool,
    is_reflecting: bool,
    is_buffering_observation: bool,
    is_buffering_reflection: bool,
    body: serde_json::Value,
}

impl RecordRow {
    fn from_record(record: &ObservationalMemoryRecord) -> StorageResult<Self> {
        let mut body = serde_json::to_value(record)?;
        if let Some(fields) = body.as_object_mut() {
            for flag in RecordFlag::ALL {
                fields.remove(flag.field_name());
            }
        }
        Ok(RecordRow {
            id: None,
            record_id: record.id.0.clone(),
            scope_key: record.scope_key().to_string(),
            generation_count: record.generation_count,
            is_observing: record.is_observing,
            is_reflecting: record.is_reflecting,
            is_buffering_observation: record.is_buffering_observation,
            is_buffering_reflection: record.is_buffering_reflection,
            body,
        })
    }

    fn into_record(self) -> StorageResult<ObservationalMemoryRecord> {
        let mut record: ObservationalMemoryRecord = match self.body {
            serde_json::Value::Object(mut fields) => {
                for flag in RecordFlag::ALL {
                    fields.insert(flag.field_name().to_string(), false.into());
                }
                serde_json::from_value(serde_json::Value::Object(fields))?
            }
            other => serde_json::from_value(other)?,
        };
        record.is_observing = self.is_observing;
        record.is_reflecting = self.is_reflecting;
        record.is_buffering_observation = self.is_buffering_observation;
        record.is_buffering_reflection = self.is_buffering_reflection;
        Ok(record)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// SurrealDB-backed implementation of [`RecordStore`].
#[derive(Clone)]
pub struct SurrealRecordStore {
    db: Surreal<Any>,
}

impl SurrealRecordStore {
    /// Create an in-memory instance (`mem://`) with the schema applied.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::open(StoreConfig::memory()).await
    }

    /// Connect to any SurrealDB URL (`mem://`, `surrealkv://path`, `ws://...`)
    /// using the default namespace and database.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        Self::open(StoreConfig::url(url)).await
    }

    /// Resolve the target from the environment, see [`StoreConfig::from_env`].
    pub async fn from_env() -> crate::Result<Self> {
        Self::open(StoreConfig::from_env()).await
    }

    /// Connect, sign in when credentials are configured, select the
    /// namespace and database, then apply the schema.
    #[instrument(skip_all, fields(url = %config.target.url(), namespace = %config.namespace, database = %config.database))]
    pub async fn open(config: StoreConfig) -> crate::Result<Self> {
        if let StoreTarget::Local(path) = &config.target {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {e}",
                    path.display()
                ))
            })?;
        }

        let url = config.target.url();
        let db = surrealdb::engine::any::connect(url.as_str())
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        if let StoreTarget::Remote {
            credentials: Some(credentials),
            ..
        } = &config.target
        {
            Self::signin(&db, &config, credentials).await?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealRecordStore connected");
        Ok(Self { db })
    }

    async fn signin(
        db: &Surreal<Any>,
        config: &StoreConfig,
        credentials: &Credentials,
    ) -> crate::Result<()> {
        match credentials.level {
            AuthLevel::Root => db
                .signin(Root {
                    username: &credentials.username,
                    password: &credentials.password,
                })
                .await
                .map(|_| ())
                .map_err(|e| StateError::Connection(format!("Root auth failed: {e}"))),
            AuthLevel::Database => db
                .signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: &credentials.username,
                    password: &credentials.password,
                })
                .await
                .map(|_| ())
                .map_err(|e| StateError::Connection(format!("DB auth failed: {e}"))),
        }
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_row(&self, id: &RecordId) -> StorageResult<Option<RecordRow>> {
        let rid = id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM om_records WHERE record_id = $rid")
            .bind(("rid", rid))
            .await?;
        let rows: Vec<RecordRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_existing(&self, id: &RecordId) -> StorageResult<RecordRow> {
        self.fetch_row(id)
            .await?
            .ok_or_else(|| StorageError::RecordNotFound { id: id.0.clone() })
    }
}

#[async_trait]
impl RecordStore for SurrealRecordStore {
    async fn get(&self, id: &RecordId) -> StorageResult<Option<ObservationalMemoryRecord>> {
        self.fetch_row(id)
            .await?
            .map(RecordRow::into_record)
            .transpose()
    }

    async fn current(&self, key: &ScopeKey) -> StorageResult<Option<ObservationalMemoryRecord>> {
        Ok(self.history(key, Some(1)).await?.into_iter().next())
    }

    async fn history(
        &self,
        key: &ScopeKey,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ObservationalMemoryRecord>> {
        let sk = key.to_string();
        let mut res = match limit {
            Some(limit) => {
                self.db
                    .query(
                        "SELECT * FROM om_records WHERE scope_key = $sk \
                         ORDER BY generation_count DESC LIMIT $limit",
                    )
                    .bind(("sk", sk))
                    .bind(("limit", limit as i64))
                    .await?
            }
            None => {
                self.db
                    .query(
                        "SELECT * FROM om_records WHERE scope_key = $sk \
                         ORDER BY generation_count DESC",
                    )
                    .bind(("sk", sk))
                    .await?
            }
        };
        let rows: Vec<RecordRow> = res.take(0)?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn append(&self, record: ObservationalMemoryRecord) -> StorageResult<()> {
        if self.fetch_row(&record.id).await?.is_some() {
            return Err(StorageError::DuplicateRecord {
                id: record.id.0.clone(),
            });
        }

        let row = RecordRow::from_record(&record)?;
        debug!(scope_key = %row.scope_key, record_id = %row.record_id, generation = row.generation_count, "appending generation");

        let _created: Option<RecordRow> = self.db.create(RECORDS_TABLE).content(row).await?;
        Ok(())
    }

    async fn upsert(&self, record: ObservationalMemoryRecord) -> StorageResult<()> {
        self.fetch_existing(&record.id).await?;
        let row = RecordRow::from_record(&record)?;

        // Lookup columns never change for a given id; flag columns are left alone.
        self.db
            .query("UPDATE om_records SET body = $body WHERE record_id = $rid")
            .bind(("body", row.body))
            .bind(("rid", row.record_id))
            .await?
            .check()?;
        Ok(())
    }

    async fn compare_and_set_flag(
        &self,
        id: &RecordId,
        flag: RecordFlag,
        expected: bool,
        new: bool,
    ) -> StorageResult<bool> {
        // Distinguish "missing" from "flag did not match".
        self.fetch_existing(id).await?;

        // A single conditional UPDATE keeps check-and-set atomic.
        let field = flag.field_name();
        let sql = format!(
            "UPDATE om_records SET {field} = $new, body.updated_at = $now \
             WHERE record_id = $rid AND {field} = $expected RETURN AFTER"
        );
        let now = now_rfc3339();
        let mut res = self
            .db
            .query(sql)
            .bind(("new", new))
            .bind(("now", now))
            .bind(("rid", id.0.clone()))
            .bind(("expected", expected))
            .await?;
        let updated: Vec<RecordRow> = res.take(0)?;
        Ok(!updated.is_empty())
    }

    async fn set_flag(&self, id: &RecordId, flag: RecordFlag, value: bool) -> StorageResult<()> {
        self.fetch_existing(id).await?;

        let field = flag.field_name();
        let sql = format!(
            "UPDATE om_records SET {field} = $value, body.updated_at = $now WHERE record_id = $rid"
        );
        self.db
            .query(sql)
            .bind(("value", value))
            .bind(("now", now_rfc3339()))
            .bind(("rid", id.0.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn clear(&self, key: &ScopeKey) -> StorageResult<usize> {
        let sk = key.to_string();
        let mut res = self
            .db
            .query("DELETE om_records WHERE scope_key = $sk RETURN BEFORE")
            .bind(("sk", sk))
            .await?;
        let removed: Vec<RecordRow> = res.take(0)?;
        debug!(scope_key = %key, removed = removed.len(), "cleared generations");
        Ok(removed.len())
    }
}
