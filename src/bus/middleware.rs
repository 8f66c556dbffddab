//! Dispatch middleware
//!
//! A stack of middleware wraps every message dispatch. `AuditMiddleware`
//! sits outermost and records each dispatch to the audit log;
//! `TransactionMiddleware` brackets the inner handler in a store
//! transaction on first delivery.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditEntry, AuditStore};
use crate::store::Store;

use super::{Envelope, HandlerError, MessageHandler};

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, envelope: &Envelope, next: Stack<'_>) -> Result<(), HandlerError>;
}

/// Remaining middleware chain, ending at the terminal handler.
pub struct Stack<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn MessageHandler,
}

impl<'a> Stack<'a> {
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], terminal: &'a dyn MessageHandler) -> Self {
        Self {
            middlewares,
            terminal,
        }
    }

    /// Hand the envelope to the next middleware, or to the terminal handler
    /// once the chain is exhausted.
    pub fn next(
        self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            match self.middlewares.split_first() {
                Some((head, rest)) => {
                    head.handle(
                        envelope,
                        Stack {
                            middlewares: rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
                }
                None => self.terminal.handle(envelope).await,
            }
        })
    }
}

/// Wraps transactional messages in a store transaction: begin before the
/// handler, commit on success, rollback and re-raise on failure.
///
/// Redelivered envelopes are passed straight through: the first delivery
/// already consumed its transaction and a retry must not double-begin.
pub struct TransactionMiddleware {
    store: Arc<dyn Store>,
}

impl TransactionMiddleware {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Middleware for TransactionMiddleware {
    async fn handle(&self, envelope: &Envelope, next: Stack<'_>) -> Result<(), HandlerError> {
        if !envelope.message.is_transactional() || envelope.redelivered {
            return next.next(envelope).await;
        }

        self.store.begin().await?;
        tracing::debug!(
            message_id = %envelope.id,
            message_class = envelope.message.class(),
            "store transaction started"
        );

        match next.next(envelope).await {
            Ok(()) => {
                self.store.commit().await?;
                tracing::debug!(
                    message_id = %envelope.id,
                    message_class = envelope.message.class(),
                    "store transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                if self.store.in_transaction() {
                    if let Err(rollback_error) = self.store.rollback().await {
                        tracing::error!(
                            message_id = %envelope.id,
                            error = %rollback_error,
                            "rollback failed"
                        );
                    }
                }
                tracing::error!(
                    message_id = %envelope.id,
                    message_class = envelope.message.class(),
                    error = %e,
                    "store transaction rolled back"
                );
                Err(e)
            }
        }
    }
}

/// Records every dispatch to the audit log: message class, context,
/// outcome, duration. A failed audit write is logged and never changes the
/// dispatch outcome.
pub struct AuditMiddleware {
    audit: Arc<dyn AuditStore>,
}

impl AuditMiddleware {
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl Middleware for AuditMiddleware {
    async fn handle(&self, envelope: &Envelope, next: Stack<'_>) -> Result<(), HandlerError> {
        let started = Instant::now();
        let context = json!({
            "message_id": envelope.id,
            "message_class": envelope.message.class(),
            "attempt": envelope.attempt,
            "redelivered": envelope.redelivered,
            "timestamp": Utc::now().to_rfc3339(),
        });

        tracing::info!(
            message_id = %envelope.id,
            message_class = envelope.message.class(),
            attempt = envelope.attempt,
            "message handling started"
        );

        let result = next.next(envelope).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let entry = match &result {
            Ok(()) => {
                tracing::info!(
                    message_id = %envelope.id,
                    message_class = envelope.message.class(),
                    "message handled"
                );
                AuditEntry::new(envelope.message.class(), context, true, duration_ms)
            }
            Err(e) => {
                tracing::error!(
                    message_id = %envelope.id,
                    message_class = envelope.message.class(),
                    error = %e,
                    "message handling failed"
                );
                AuditEntry::new(envelope.message.class(), context, false, duration_ms)
                    .with_error(e.to_string())
            }
        };

        if let Err(audit_error) = self.audit.append(&entry).await {
            tracing::error!(
                message_id = %envelope.id,
                error = %audit_error,
                "failed to write audit entry"
            );
        }

        result
    }
}
