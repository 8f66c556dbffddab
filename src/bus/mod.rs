//! Message bus
//!
//! Asynchronous processing pipeline: messages, envelopes, the middleware
//! stack and the worker loop. Transient failures are retried with linear
//! backoff and marked as redelivered; exhausted retries hit the dead-letter
//! hook so no transaction stays PENDING forever. Permanent failures are
//! never retried.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Provider, TransactionStatus};
use crate::gateway::GatewayError;
use crate::manager::{ManagerError, TransactionManager};
use crate::notification::NotificationDispatcher;
use crate::store::{Store, StoreError};

pub mod middleware;
mod process_transaction;
mod sync_balance;

pub use middleware::{AuditMiddleware, Middleware, Stack, TransactionMiddleware};
pub use process_transaction::ProcessTransactionHandler;
pub use sync_balance::SyncBalanceHandler;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Action requested on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    Process,
    Verify,
    Cancel,
}

impl TransactionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionAction::Process => "PROCESS",
            TransactionAction::Verify => "VERIFY",
            TransactionAction::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESS" => Ok(TransactionAction::Process),
            "VERIFY" => Ok(TransactionAction::Verify),
            "CANCEL" => Ok(TransactionAction::Cancel),
            other => Err(format!("unknown transaction action: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessTransactionMessage {
    pub transaction_id: Uuid,
    pub action: TransactionAction,
}

#[derive(Debug, Clone)]
pub struct SyncBalanceMessage {
    pub account_id: Uuid,
    pub provider: Provider,
}

#[derive(Debug, Clone)]
pub enum Message {
    ProcessTransaction(ProcessTransactionMessage),
    SyncBalance(SyncBalanceMessage),
}

impl Message {
    pub fn class(&self) -> &'static str {
        match self {
            Message::ProcessTransaction(_) => "ProcessTransactionMessage",
            Message::SyncBalance(_) => "SyncBalanceMessage",
        }
    }

    /// Messages wrapped in a database transaction by the middleware.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            Message::ProcessTransaction(_) | Message::SyncBalance(_)
        )
    }
}

/// A message travelling through the bus, with its delivery state.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Uuid,
    pub message: Message,
    /// 1-based delivery attempt
    pub attempt: u32,
    /// Set on every delivery after the first; redelivered envelopes are not
    /// wrapped in a new database transaction
    pub redelivered: bool,
    pub enqueued_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            attempt: 1,
            redelivered: false,
            enqueued_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Binary failure classification driving the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Bad input or bad state; the bus must not retry
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Infrastructure hiccup; the bus may retry
    #[error("transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn permanent(message: impl Into<String>) -> Self {
        HandlerError::Permanent(message.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        HandlerError::Transient(e.to_string())
    }
}

impl From<GatewayError> for HandlerError {
    fn from(e: GatewayError) -> Self {
        HandlerError::Transient(e.to_string())
    }
}

impl From<ManagerError> for HandlerError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::Domain(domain) => HandlerError::Permanent(domain.to_string()),
            ManagerError::Store(store) => HandlerError::Transient(store.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Terminal message handler at the bottom of the middleware stack.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Routes each message to its handler.
pub struct HandlerRegistry {
    process: ProcessTransactionHandler,
    sync: SyncBalanceHandler,
}

impl HandlerRegistry {
    pub fn new(process: ProcessTransactionHandler, sync: SyncBalanceHandler) -> Self {
        Self { process, sync }
    }
}

#[async_trait::async_trait]
impl MessageHandler for HandlerRegistry {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match &envelope.message {
            Message::ProcessTransaction(message) => self.process.handle(message).await,
            Message::SyncBalance(message) => self.sync.handle(message).await,
        }
    }
}

/// Middleware stack plus terminal handler.
pub struct Dispatcher {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn MessageHandler>,
}

impl Dispatcher {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, terminal: Arc<dyn MessageHandler>) -> Self {
        Self {
            middlewares,
            terminal,
        }
    }

    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        Stack::new(&self.middlewares, self.terminal.as_ref())
            .next(envelope)
            .await
    }
}

// ---------------------------------------------------------------------------
// Bus & worker
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("message bus is closed")]
    Closed,
}

/// Producer half of the bus.
#[derive(Clone)]
pub struct MessageBus {
    sender: mpsc::UnboundedSender<Envelope>,
}

impl MessageBus {
    pub fn channel() -> (MessageBus, mpsc::UnboundedReceiver<Envelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (MessageBus { sender }, receiver)
    }

    /// Enqueue a message for asynchronous processing; returns the envelope
    /// id for correlation.
    pub fn dispatch(&self, message: Message) -> Result<Uuid, BusError> {
        let envelope = Envelope::new(message);
        let id = envelope.id;
        tracing::debug!(
            message_id = %id,
            message_class = envelope.message.class(),
            "message dispatched"
        );
        self.sender.send(envelope).map_err(|_| BusError::Closed)?;
        Ok(id)
    }
}

/// Consumer loop: one envelope at a time, retries inline.
pub struct Worker {
    receiver: mpsc::UnboundedReceiver<Envelope>,
    dispatcher: Dispatcher,
    store: Arc<dyn Store>,
    manager: Arc<TransactionManager>,
    notifier: Arc<dyn NotificationDispatcher>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Envelope>,
        dispatcher: Dispatcher,
        store: Arc<dyn Store>,
        manager: Arc<TransactionManager>,
        notifier: Arc<dyn NotificationDispatcher>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            receiver,
            dispatcher,
            store,
            manager,
            notifier,
            max_attempts,
            retry_delay,
        }
    }

    /// Drain the queue until every producer is gone.
    pub async fn run(mut self) {
        tracing::info!("message worker started");
        while let Some(envelope) = self.receiver.recv().await {
            self.process_envelope(envelope).await;
        }
        tracing::info!("message worker stopped");
    }

    /// Process everything currently queued, then return. Used for manual
    /// draining and in tests.
    pub async fn run_until_idle(&mut self) {
        while let Ok(envelope) = self.receiver.try_recv() {
            self.process_envelope(envelope).await;
        }
    }

    /// Deliver one envelope, retrying transient failures until the attempt
    /// budget runs out.
    pub async fn process_envelope(&self, mut envelope: Envelope) {
        loop {
            match self.dispatcher.dispatch(&envelope).await {
                Ok(()) => return,
                Err(HandlerError::Permanent(reason)) => {
                    tracing::error!(
                        message_id = %envelope.id,
                        message_class = envelope.message.class(),
                        attempt = envelope.attempt,
                        reason = %reason,
                        "permanent failure, dropping message"
                    );
                    return;
                }
                Err(HandlerError::Transient(reason)) => {
                    if envelope.attempt >= self.max_attempts {
                        self.dead_letter(&envelope, &reason).await;
                        return;
                    }

                    tracing::warn!(
                        message_id = %envelope.id,
                        attempt = envelope.attempt,
                        max_attempts = self.max_attempts,
                        reason = %reason,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay * envelope.attempt).await;
                    envelope.attempt += 1;
                    envelope.redelivered = true;
                }
            }
        }
    }

    /// Terminal fallback once retries are exhausted: a transaction still
    /// PENDING is failed with the last error as reason, so it does not
    /// linger in flight forever.
    async fn dead_letter(&self, envelope: &Envelope, reason: &str) {
        tracing::error!(
            message_id = %envelope.id,
            message_class = envelope.message.class(),
            attempts = envelope.attempt,
            reason,
            "retries exhausted"
        );

        let Message::ProcessTransaction(message) = &envelope.message else {
            return;
        };

        match self.store.find_transaction(message.transaction_id).await {
            Ok(Some(mut transaction)) if transaction.status == TransactionStatus::Pending => {
                let reason = format!("retries exhausted: {}", reason);
                match self.manager.handle_failure(&mut transaction, &reason).await {
                    Ok(()) => self.notifier.notify_transaction(&transaction).await,
                    Err(e) => tracing::error!(
                        transaction_id = %transaction.id,
                        error = %e,
                        "failed to dead-letter transaction"
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(
                transaction_id = %message.transaction_id,
                error = %e,
                "failed to load transaction for dead-lettering"
            ),
        }
    }
}
