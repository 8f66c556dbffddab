//! Scheduled jobs
//!
//! Background maintenance: audit log retention cleanup and the pending
//! verification sweep that re-dispatches VERIFY for initiated transactions
//! whose outcome never arrived.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::audit::AuditStore;
use crate::bus::{BusError, Message, MessageBus, ProcessTransactionMessage, TransactionAction};
use crate::store::{Store, StoreError};

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Delete audit entries older than the retention window.
pub async fn clean_old_audit_logs(
    audit: &dyn AuditStore,
    retention: ChronoDuration,
) -> Result<u64, JobError> {
    let cutoff = Utc::now() - retention;
    let purged = audit.delete_older_than(cutoff).await?;

    if purged > 0 {
        tracing::info!(purged, %cutoff, "purged old audit log entries");
    }

    Ok(purged)
}

/// Re-dispatch VERIFY for PENDING transactions that hold a gateway
/// reference and have been in flight longer than `pending_age`.
pub async fn requeue_pending_verifications(
    store: &dyn Store,
    bus: &MessageBus,
    pending_age: ChronoDuration,
    batch_size: i64,
) -> Result<u64, JobError> {
    let cutoff = Utc::now() - pending_age;
    let stale = store.find_pending_with_reference(cutoff, batch_size).await?;
    let count = stale.len() as u64;

    for transaction in stale {
        tracing::info!(
            transaction_id = %transaction.id,
            created_at = %transaction.created_at,
            "requeueing verification for stale pending transaction"
        );
        bus.dispatch(Message::ProcessTransaction(ProcessTransactionMessage {
            transaction_id: transaction.id,
            action: TransactionAction::Verify,
        }))?;
    }

    Ok(count)
}

/// Configuration for the job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between audit cleanup runs (default: 1 hour)
    pub audit_cleanup_interval: Duration,
    /// Audit retention window (default: 30 days)
    pub audit_retention: ChronoDuration,
    /// Interval between verification sweeps (default: 1 minute)
    pub verification_sweep_interval: Duration,
    /// How long a transaction may stay PENDING before the sweep picks it up
    pub verification_pending_age: ChronoDuration,
    /// Maximum transactions requeued per sweep
    pub verification_batch_size: i64,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            audit_cleanup_interval: Duration::from_secs(3600),
            audit_retention: ChronoDuration::days(30),
            verification_sweep_interval: Duration::from_secs(60),
            verification_pending_age: ChronoDuration::minutes(5),
            verification_batch_size: 100,
        }
    }
}

/// Job scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditStore>,
    bus: MessageBus,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditStore>, bus: MessageBus) -> Self {
        Self {
            store,
            audit,
            bus,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditStore>,
        bus: MessageBus,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            store,
            audit,
            bus,
            config,
        }
    }

    /// Start the scheduler in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("job scheduler started");

        let mut cleanup_interval = interval(self.config.audit_cleanup_interval);
        let mut sweep_interval = interval(self.config.verification_sweep_interval);

        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    if let Err(e) =
                        clean_old_audit_logs(self.audit.as_ref(), self.config.audit_retention).await
                    {
                        tracing::error!(error = %e, "audit cleanup failed");
                    }
                }
                _ = sweep_interval.tick() => {
                    if let Err(e) = requeue_pending_verifications(
                        self.store.as_ref(),
                        &self.bus,
                        self.config.verification_pending_age,
                        self.config.verification_batch_size,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "verification sweep failed");
                    }
                }
            }
        }
    }

    /// Run every maintenance job once (manual trigger and tests).
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match clean_old_audit_logs(self.audit.as_ref(), self.config.audit_retention).await {
            Ok(count) => report.audit_entries_purged = count,
            Err(e) => report.errors.push(format!("audit cleanup: {}", e)),
        }

        match requeue_pending_verifications(
            self.store.as_ref(),
            &self.bus,
            self.config.verification_pending_age,
            self.config.verification_batch_size,
        )
        .await
        {
            Ok(count) => report.verifications_requeued = count,
            Err(e) => report.errors.push(format!("verification sweep: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub audit_entries_purged: u64,
    pub verifications_requeued: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}
