use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::db::queries;

/// Durable key/value record store, addressed by table and key.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_item(&self, table: &str, key: &str, fields: &Value) -> Result<(), RecordError>;

    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Value>, RecordError>;

    /// Shallow-merge `fields` into the stored record.
    async fn update_item(&self, table: &str, key: &str, fields: &Value) -> Result<(), RecordError>;
}

/// Record store backed by the `records` table in PostgreSQL.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn put_item(&self, table: &str, key: &str, fields: &Value) -> Result<(), RecordError> {
        ensure_object(fields)?;
        queries::put_record(&self.pool, table, key, fields).await?;
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &str) -> Result<Option<Value>, RecordError> {
        Ok(queries::get_record(&self.pool, table, key).await?)
    }

    async fn update_item(&self, table: &str, key: &str, fields: &Value) -> Result<(), RecordError> {
        ensure_object(fields)?;
        queries::update_record(&self.pool, table, key, fields).await?;
        Ok(())
    }
}

fn ensure_object(fields: &Value) -> Result<(), RecordError> {
    if fields.is_object() {
        Ok(())
    } else {
        Err(RecordError::NotAnObject)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record fields must be a JSON object")]
    NotAnObject,
}
