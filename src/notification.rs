//! Notifications
//!
//! User-facing notifications for transaction outcomes. The pipeline builds
//! the payload and hands it to the dispatcher; delivery (push, SMS) happens
//! elsewhere. Dispatch never fails the caller; a lost notification is
//! logged, not escalated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus, TransactionType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Uuid,
    /// `TRANSACTION_<STATUS>`
    pub kind: String,
    pub message: String,
    pub data: serde_json::Value,
}

impl Notification {
    /// Build the notification for a transaction's current state.
    pub fn for_transaction(transaction: &Transaction) -> Self {
        let message = match transaction.kind {
            TransactionType::MoneyTransfer => transfer_message(transaction),
            TransactionType::CreditPurchase => airtime_message(transaction),
        };

        Self {
            user_id: transaction.user_id,
            kind: format!("TRANSACTION_{}", transaction.status),
            message,
            data: serde_json::json!({
                "transactionId": transaction.id,
                "amount": transaction.amount,
                "type": transaction.kind,
                "status": transaction.status,
                "reference": transaction.reference,
            }),
        }
    }
}

fn transfer_message(transaction: &Transaction) -> String {
    let amount = transaction.amount;
    let recipient = &transaction.recipient_number;
    match transaction.status {
        TransactionStatus::Completed => {
            format!("Transfer of {} FCFA to {} completed.", amount, recipient)
        }
        TransactionStatus::Failed => {
            format!("Transfer of {} FCFA to {} failed.", amount, recipient)
        }
        TransactionStatus::Pending => {
            format!("Transfer of {} FCFA to {} is being processed.", amount, recipient)
        }
    }
}

fn airtime_message(transaction: &Transaction) -> String {
    let amount = transaction.amount;
    let recipient = &transaction.recipient_number;
    match transaction.status {
        TransactionStatus::Completed => {
            format!("Airtime purchase of {} FCFA for {} completed.", amount, recipient)
        }
        TransactionStatus::Failed => {
            format!("Airtime purchase of {} FCFA for {} failed.", amount, recipient)
        }
        TransactionStatus::Pending => format!(
            "Airtime purchase of {} FCFA for {} is being processed.",
            amount, recipient
        ),
    }
}

/// Accepts a transaction in a terminal (or pending) state and enqueues a
/// user-facing notification.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_transaction(&self, transaction: &Transaction);
}

/// Channel-backed dispatcher; a background consumer drains the receiver.
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelNotifier {
    async fn notify_transaction(&self, transaction: &Transaction) {
        let notification = Notification::for_transaction(transaction);
        if let Err(e) = self.sender.send(notification) {
            tracing::error!(
                transaction_id = %transaction.id,
                error = %e,
                "failed to enqueue notification"
            );
        } else {
            tracing::info!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "notification enqueued"
            );
        }
    }
}
