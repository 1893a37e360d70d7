//! Postgres staging store
//!
//! Customers are written to the `customers` table by the CSV ingest tool with
//! `uploaded = false`; the uploader flips the flag once the CRM accepts them.

use std::time::Duration;

use async_trait::async_trait;
use crm_common::{Customer, PendingRecord, RecordKey};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use super::RecordSource;
use crate::config::DatabaseConfig;
use crate::error::{SourceError, UploaderResult};

const SELECT_PENDING: &str = r#"
    SELECT id, first_name, last_name, email, phone
    FROM customers
    WHERE uploaded = false
    ORDER BY id
"#;

const MARK_DELIVERED: &str = r#"
    UPDATE customers
    SET uploaded = true
    WHERE id = $1
"#;

type CustomerRow = (i64, String, String, String, String);

/// [`RecordSource`] backed by the `customers` table
#[derive(Debug, Clone)]
pub struct PgRecordSource {
    pool: PgPool,
}

impl PgRecordSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> UploaderResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Database connection pool established");
        Ok(Self::new(pool))
    }

    /// Create the staging table if it does not exist yet.
    pub async fn migrate(&self) -> UploaderResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn into_pending((id, first_name, last_name, email, phone): CustomerRow) -> PendingRecord {
    PendingRecord::from(Customer {
        id,
        first_name,
        last_name,
        email,
        phone,
    })
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn select_pending(&self) -> Result<Vec<PendingRecord>, SourceError> {
        let rows: Vec<CustomerRow> = sqlx::query_as(SELECT_PENDING).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(into_pending).collect())
    }

    async fn mark_delivered(&self, key: &RecordKey) -> Result<(), SourceError> {
        let result = sqlx::query(MARK_DELIVERED)
            .bind(key.get())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SourceError::NotFound(*key));
        }
        Ok(())
    }
}
