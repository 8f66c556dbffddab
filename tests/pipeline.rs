//! End-to-end pipeline tests
//!
//! Drive the full dispatch pipeline (bus -> audit middleware -> store
//! transaction -> handlers -> manager) over the in-memory store and the
//! scripted gateway.

mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestApp;
use onepay::audit::AuditStore;
use onepay::bus::{Message, SyncBalanceMessage, TransactionAction};
use onepay::cache::Cache;
use onepay::domain::{Provider, TransactionStatus};
use onepay::gateway::{PaymentState, PaymentStatusReport};
use onepay::store::Store;

#[tokio::test]
async fn test_money_transfer_settles_end_to_end() {
    let mut app = TestApp::new();
    let user_id = Uuid::new_v4();
    let account = app.seed_account(user_id, dec!(20000)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    // stale limit totals that must be dropped on completion
    let day_key = format!(
        "daily_transactions_{}_{}",
        user_id,
        Utc::now().format("%Y-%m-%d")
    );
    let month_key = format!(
        "monthly_transactions_{}_{}",
        user_id,
        Utc::now().format("%Y-%m")
    );
    app.cache.put(&day_key, "0".to_string(), None).await;
    app.cache.put(&month_key, "0".to_string(), None).await;

    app.dispatch_and_drain(tx.id, TransactionAction::Process)
        .await;

    let settled = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert!(settled.completed_at.is_some());
    assert_eq!(settled.fees, Some(dec!(200)));

    // 20000 - 10000 - 200
    let debited = app.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(debited.balance, Some(dec!(9800)));

    // exactly one notification
    let notification = app.notifications.recv().await.unwrap();
    assert_eq!(notification.kind, "TRANSACTION_COMPLETED");
    assert!(app.notifications.try_recv().is_err());

    // limit caches invalidated
    assert!(app.cache.get(&day_key).await.is_none());
    assert!(app.cache.get(&month_key).await.is_none());

    // and the dispatch is on the audit trail
    let entries = app
        .store
        .find_by_message_class("ProcessTransactionMessage", 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].success);
}

#[tokio::test]
async fn test_gateway_rejection_retries_then_succeeds() {
    let mut app = TestApp::with_max_attempts(5);
    let account = app.seed_account(Uuid::new_v4(), dec!(20000)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    // two rejections, then acceptance
    app.mtn.script_transfers(vec![Ok(false), Ok(false), Ok(true)]);

    app.dispatch_and_drain(tx.id, TransactionAction::Process)
        .await;

    let settled = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(settled.status, TransactionStatus::Completed);

    // every attempt was audited, only the last one succeeded
    let entries = app
        .store
        .find_by_message_class("ProcessTransactionMessage", 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().filter(|e| e.success).count(), 1);
}

#[tokio::test]
async fn test_retry_exhaustion_dead_letters_the_transaction() {
    let mut app = TestApp::with_max_attempts(3);
    let account = app.seed_account(Uuid::new_v4(), dec!(20000)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    app.mtn
        .script_transfers(vec![Ok(false), Ok(false), Ok(false), Ok(false)]);

    app.dispatch_and_drain(tx.id, TransactionAction::Process)
        .await;

    let failed = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);

    let failures = app.store.failed_transactions_for(tx.id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.starts_with("retries exhausted"));

    // the account was never debited
    let untouched = app.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(untouched.balance, Some(dec!(20000)));

    let notification = app.notifications.recv().await.unwrap();
    assert_eq!(notification.kind, "TRANSACTION_FAILED");
}

#[tokio::test]
async fn test_failed_attempt_rolls_back_but_keeps_audit_trail() {
    let mut app = TestApp::with_max_attempts(1);
    let account = app.seed_account(Uuid::new_v4(), dec!(20000)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    app.mtn
        .script_transfers(vec![Err("connection reset".to_string())]);

    app.dispatch_and_drain(tx.id, TransactionAction::Process)
        .await;

    // no partial debit survived the rolled-back attempt
    let untouched = app.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(untouched.balance, Some(dec!(20000)));

    // the audit entry survived the rollback
    let entries = app
        .store
        .find_by_message_class("ProcessTransactionMessage", 10)
        .await
        .unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| !e.success));
}

#[tokio::test]
async fn test_validation_failure_leaves_transaction_pending() {
    let mut app = TestApp::new();
    // balance cannot cover amount + fees
    let account = app.seed_account(Uuid::new_v4(), dec!(500)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    app.dispatch_and_drain(tx.id, TransactionAction::Process)
        .await;

    let loaded = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TransactionStatus::Pending);
    assert!(app
        .store
        .failed_transactions_for(tx.id)
        .await
        .unwrap()
        .is_empty());

    // the rejected dispatch is audited as a failure
    let entries = app
        .store
        .find_by_message_class("ProcessTransactionMessage", 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
}

#[tokio::test]
async fn test_cancellation_flow() {
    let mut app = TestApp::new();
    let account = app.seed_account(Uuid::new_v4(), dec!(20000)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    app.dispatch_and_drain(tx.id, TransactionAction::Cancel)
        .await;

    let cancelled = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Failed);

    let failures = app.store.failed_transactions_for(tx.id).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason, "cancelled by the system");

    // a second cancellation is rejected and changes nothing
    app.dispatch_and_drain(tx.id, TransactionAction::Cancel)
        .await;
    let failures = app.store.failed_transactions_for(tx.id).await.unwrap();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn test_cancelling_completed_transaction_changes_nothing() {
    let mut app = TestApp::new();
    let account = app.seed_account(Uuid::new_v4(), dec!(20000)).await;
    let tx = app.seed_transfer(&account, dec!(10000)).await;

    app.dispatch_and_drain(tx.id, TransactionAction::Process)
        .await;
    app.dispatch_and_drain(tx.id, TransactionAction::Cancel)
        .await;

    let loaded = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TransactionStatus::Completed);
    assert!(app
        .store
        .failed_transactions_for(tx.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_verification_flow_settles_after_pending_polls() {
    let mut app = TestApp::new();
    let account = app.seed_account(Uuid::new_v4(), dec!(20000)).await;
    let mut tx = app.seed_transfer(&account, dec!(10000)).await;
    tx.reference = Some("REF_1".to_string());
    app.store.save_transaction(&tx).await.unwrap();

    app.mtn.script_status(vec![
        PaymentStatusReport {
            status: PaymentState::Pending,
            message: String::new(),
            operator_reference: None,
            completed_at: None,
        },
        PaymentStatusReport {
            status: PaymentState::Completed,
            message: "settled".to_string(),
            operator_reference: Some("FIN_7".to_string()),
            completed_at: Some(Utc::now()),
        },
    ]);

    // first poll: still pending, no state change
    app.dispatch_and_drain(tx.id, TransactionAction::Verify)
        .await;
    let still_pending = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(still_pending.status, TransactionStatus::Pending);

    // second poll: completed at the operator
    app.dispatch_and_drain(tx.id, TransactionAction::Verify)
        .await;
    let settled = app.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert_eq!(settled.operator_reference.as_deref(), Some("FIN_7"));

    let debited = app.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(debited.balance, Some(dec!(9800)));
}

#[tokio::test]
async fn test_balance_sync_through_the_bus() {
    let mut app = TestApp::new();
    let account = app.seed_account(Uuid::new_v4(), dec!(1000)).await;
    app.mtn.set_balance(dec!(77777));

    let number_key = format!("mtn_momo_balance_{}", account.number);
    app.cache.put(&number_key, "1000".to_string(), None).await;

    app.bus
        .dispatch(Message::SyncBalance(SyncBalanceMessage {
            account_id: account.id,
            provider: Provider::MtnMomo,
        }))
        .unwrap();
    app.worker.run_until_idle().await;

    let synced = app.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(synced.balance, Some(dec!(77777)));
    assert!(app.cache.get(&number_key).await.is_none());

    let entries = app
        .store
        .find_by_message_class("SyncBalanceMessage", 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].success);
}

#[tokio::test]
async fn test_daily_limit_enforced_across_transactions() {
    let mut app = TestApp::new();
    let user_id = Uuid::new_v4();
    let account = app.seed_account(user_id, dec!(10000000)).await;

    // four completed transfers of 500,000 land at the daily limit
    for _ in 0..4 {
        let tx = app.seed_transfer(&account, dec!(500000)).await;
        app.dispatch_and_drain(tx.id, TransactionAction::Process)
            .await;
        let settled = app.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);
    }

    // the next one trips DAILY_LIMIT_EXCEEDED and is rejected
    let over = app.seed_transfer(&account, dec!(500)).await;
    app.dispatch_and_drain(over.id, TransactionAction::Process)
        .await;
    let rejected = app.store.find_transaction(over.id).await.unwrap().unwrap();
    assert_eq!(rejected.status, TransactionStatus::Pending);
}
