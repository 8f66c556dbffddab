//! Audit log
//!
//! One entry per message-bus dispatch, recording outcome, duration and the
//! serialized message context. The log is append-only and queryable for
//! operational visibility; old entries are purged by the retention job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::StoreError;

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub message_class: String,
    /// Serialized dispatch context (message id, attempt, timestamp)
    pub message_data: serde_json::Value,
    pub user_id: Option<Uuid>,
    pub success: bool,
    pub duration_ms: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(
        message_class: impl Into<String>,
        message_data: serde_json::Value,
        success: bool,
        duration_ms: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_class: message_class.into(),
            message_data,
            user_id: None,
            success,
            duration_ms,
            error: None,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Append-only audit sink with the query surface operators rely on.
///
/// Implementations must keep audit writes outside any ambient store
/// transaction: a rolled-back message still leaves its audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    async fn find_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<AuditEntry>, StoreError>;

    async fn find_by_message_class(
        &self,
        message_class: &str,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    async fn find_errors(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    /// Purge entries older than the cutoff; returns the number removed.
    async fn delete_older_than(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
