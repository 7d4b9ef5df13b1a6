//! PostgreSQL-backed [`forge_core::store::DurableStore`] (spec §6).
//!
//! Persists the three tables the durable store contract names: `capsules`,
//! an append-only `llm_usage` ledger, and `workflow_checkpoints`. Table
//! names are configurable (for multi-tenant schema-per-database
//! deployments) but validated against SQL identifier rules before any query
//! string is built from them.
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_postgres_store::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection_string = "host=localhost user=postgres password=postgres dbname=forge";
//!     let store = PostgresStore::new(connection_string).await?;
//!     Ok(())
//! }
//! ```

mod error;

pub use error::PostgresError;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use forge_core::capsule::Capsule;
use forge_core::cost::CostRecord;
use forge_core::error::Result;
use forge_core::ids::{CapsuleId, RequestId, WorkflowId};
use forge_core::store::DurableStore;
use forge_core::workflow::checkpoint::WorkflowCheckpoint;

/// Validate a PostgreSQL identifier (table name).
///
/// PostgreSQL identifiers must start with a letter or underscore, contain
/// only letters/digits/underscores, and be at most 63 characters. Table
/// names reach this module as configuration, not user input, but they still
/// get interpolated directly into query strings (table names can't be bound
/// parameters), so this check stands between a misconfigured deployment and
/// a malformed or injected query.
fn validate_identifier(name: &str) -> std::result::Result<(), PostgresError> {
    if name.is_empty() {
        return Err(PostgresError::InvalidIdentifier("identifier cannot be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(PostgresError::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }

    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(PostgresError::InvalidIdentifier(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(PostgresError::InvalidIdentifier(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

/// PostgreSQL-backed [`DurableStore`].
///
/// Schema (columns beyond the primary key exist only to support the query
/// patterns the trait needs; the payload columns carry the full serialized
/// record):
/// - `capsules(id TEXT PK, request_id TEXT, data JSONB, created_at BIGINT)`
/// - `llm_usage(id TEXT PK, workflow_id TEXT, tenant_id TEXT, data JSONB, created_at BIGINT)`
/// - `workflow_checkpoints(workflow_id TEXT PK, data BYTEA, updated_at BIGINT)`
pub struct PostgresStore {
    client: Client,
    capsules_table: String,
    llm_usage_table: String,
    checkpoints_table: String,
}

impl PostgresStore {
    /// Connect and initialize the default table set (`capsules`, `llm_usage`,
    /// `workflow_checkpoints`).
    pub async fn new(connection_string: &str) -> std::result::Result<Self, PostgresError> {
        Self::with_table_names(connection_string, "capsules", "llm_usage", "workflow_checkpoints").await
    }

    /// Connect with custom table names (each validated independently).
    pub async fn with_table_names(
        connection_string: &str,
        capsules_table: &str,
        llm_usage_table: &str,
        checkpoints_table: &str,
    ) -> std::result::Result<Self, PostgresError> {
        validate_identifier(capsules_table)?;
        validate_identifier(llm_usage_table)?;
        validate_identifier(checkpoints_table)?;

        info!("connecting to postgres durable store");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {e}");
            }
        });

        let store = Self {
            client,
            capsules_table: capsules_table.to_string(),
            llm_usage_table: llm_usage_table.to_string(),
            checkpoints_table: checkpoints_table.to_string(),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> std::result::Result<(), PostgresError> {
        let sql = format!(
            r"
            CREATE TABLE IF NOT EXISTS {capsules} (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{capsules}_request_id ON {capsules} (request_id);

            CREATE TABLE IF NOT EXISTS {usage} (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{usage}_workflow_id ON {usage} (workflow_id);
            CREATE INDEX IF NOT EXISTS idx_{usage}_tenant_created ON {usage} (tenant_id, created_at);

            CREATE TABLE IF NOT EXISTS {checkpoints} (
                workflow_id TEXT PRIMARY KEY,
                data BYTEA NOT NULL,
                updated_at BIGINT NOT NULL
            );
            ",
            capsules = self.capsules_table,
            usage = self.llm_usage_table,
            checkpoints = self.checkpoints_table,
        );

        self.client.batch_execute(&sql).await.map_err(|e| {
            error!("failed to initialize durable store schema: {e}");
            PostgresError::Postgres(e)
        })?;
        debug!(
            capsules = %self.capsules_table,
            llm_usage = %self.llm_usage_table,
            checkpoints = %self.checkpoints_table,
            "durable store schema ready",
        );
        Ok(())
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn put_capsule(&self, capsule: &Capsule) -> Result<()> {
        let payload = serde_json::to_string(capsule).map_err(PostgresError::from)?;
        let created_at = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        self.client
            .execute(
                &format!(
                    "INSERT INTO {} (id, request_id, data, created_at) VALUES ($1, $2, $3::jsonb, $4) \
                     ON CONFLICT (id) DO UPDATE SET data = excluded.data",
                    self.capsules_table
                ),
                &[&capsule.id.to_string(), &capsule.request_id.to_string(), &payload, &created_at],
            )
            .await
            .map_err(PostgresError::from)?;
        Ok(())
    }

    async fn get_capsule(&self, capsule_id: CapsuleId) -> Result<Option<Capsule>> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT data::text FROM {} WHERE id = $1", self.capsules_table),
                &[&capsule_id.to_string()],
            )
            .await
            .map_err(PostgresError::from)?;

        match row {
            Some(row) => {
                let data: String = row.get(0);
                Ok(Some(serde_json::from_str(&data).map_err(PostgresError::from)?))
            }
            None => Ok(None),
        }
    }

    async fn capsules_for_request(&self, request_id: RequestId) -> Result<Vec<Capsule>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT data::text FROM {} WHERE request_id = $1 ORDER BY created_at DESC",
                    self.capsules_table
                ),
                &[&request_id.to_string()],
            )
            .await
            .map_err(PostgresError::from)?;

        rows.into_iter()
            .map(|row| {
                let data: String = row.get(0);
                serde_json::from_str(&data).map_err(|e| PostgresError::from(e).into())
            })
            .collect()
    }

    async fn put_cost_record(&self, record: &CostRecord) -> Result<()> {
        let payload = serde_json::to_string(record).map_err(PostgresError::from)?;
        let created_at = record.timestamp.timestamp_nanos_opt().unwrap_or(0);
        self.client
            .execute(
                &format!(
                    "INSERT INTO {} (id, workflow_id, tenant_id, data, created_at) VALUES ($1, $2, $3, $4::jsonb, $5)",
                    self.llm_usage_table
                ),
                &[
                    &record.id.to_string(),
                    &record.workflow_id.to_string(),
                    &record.tenant_id.to_string(),
                    &payload,
                    &created_at,
                ],
            )
            .await
            .map_err(PostgresError::from)?;
        Ok(())
    }

    async fn put_checkpoint(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let data = checkpoint.encode()?;
        let updated_at = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        self.client
            .execute(
                &format!(
                    "INSERT INTO {} (workflow_id, data, updated_at) VALUES ($1, $2, $3) \
                     ON CONFLICT (workflow_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    self.checkpoints_table
                ),
                &[&checkpoint.workflow_id.to_string(), &data, &updated_at],
            )
            .await
            .map_err(PostgresError::from)?;
        Ok(())
    }

    async fn get_checkpoint(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowCheckpoint>> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT data FROM {} WHERE workflow_id = $1", self.checkpoints_table),
                &[&workflow_id.to_string()],
            )
            .await
            .map_err(PostgresError::from)?;

        match row {
            Some(row) => {
                let data: Vec<u8> = row.get(0);
                Ok(Some(WorkflowCheckpoint::decode(&data)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_identifier() {
        assert!(matches!(validate_identifier(""), Err(PostgresError::InvalidIdentifier(_))));
    }

    #[test]
    fn rejects_identifier_starting_with_digit() {
        assert!(matches!(validate_identifier("1capsules"), Err(PostgresError::InvalidIdentifier(_))));
    }

    #[test]
    fn rejects_identifier_with_special_characters() {
        assert!(matches!(
            validate_identifier("capsules; DROP TABLE users;--"),
            Err(PostgresError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_identifier_over_63_chars() {
        let long = "c".repeat(64);
        assert!(matches!(validate_identifier(&long), Err(PostgresError::InvalidIdentifier(_))));
    }

    #[test]
    fn accepts_ordinary_table_name() {
        assert!(validate_identifier("workflow_checkpoints").is_ok());
        assert!(validate_identifier("_leading_underscore").is_ok());
    }
}
