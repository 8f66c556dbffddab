//! Transaction message handler
//!
//! Drives the transaction state machine from the bus: PROCESS validates and
//! settles through the operator gateway, VERIFY polls the gateway for an
//! asynchronous outcome, CANCEL fails a still-pending transaction.

use std::sync::Arc;

use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::gateway::{GatewayRegistry, MobileMoneyGateway, PaymentState};
use crate::manager::TransactionManager;
use crate::notification::NotificationDispatcher;
use crate::store::Store;

use super::{HandlerError, ProcessTransactionMessage, TransactionAction};

pub struct ProcessTransactionHandler {
    store: Arc<dyn Store>,
    manager: Arc<TransactionManager>,
    gateways: Arc<GatewayRegistry>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl ProcessTransactionHandler {
    pub fn new(
        store: Arc<dyn Store>,
        manager: Arc<TransactionManager>,
        gateways: Arc<GatewayRegistry>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            manager,
            gateways,
            notifier,
        }
    }

    pub async fn handle(&self, message: &ProcessTransactionMessage) -> Result<(), HandlerError> {
        tracing::info!(
            transaction_id = %message.transaction_id,
            action = %message.action,
            "handling transaction message"
        );

        let mut transaction = self
            .store
            .find_transaction(message.transaction_id)
            .await?
            .ok_or_else(|| {
                HandlerError::permanent(format!(
                    "transaction {} not found",
                    message.transaction_id
                ))
            })?;

        let gateway = self.gateway_for(&transaction).await?;

        match message.action {
            TransactionAction::Process => self.process(&mut transaction, gateway.as_ref()).await,
            TransactionAction::Verify => self.verify(&mut transaction, gateway.as_ref()).await,
            TransactionAction::Cancel => self.cancel(&mut transaction).await,
        }
    }

    /// Resolve the operator gateway from the source account's provider.
    async fn gateway_for(
        &self,
        transaction: &Transaction,
    ) -> Result<Arc<dyn MobileMoneyGateway>, HandlerError> {
        let account_id = transaction.source_account_id.ok_or_else(|| {
            HandlerError::permanent(format!(
                "transaction {} has no source account",
                transaction.id
            ))
        })?;

        let account = self.store.find_account(account_id).await?.ok_or_else(|| {
            HandlerError::permanent(format!("mobile money account {} not found", account_id))
        })?;

        let provider = account.provider.ok_or_else(|| {
            HandlerError::permanent(format!(
                "account {} has no mobile money provider",
                account_id
            ))
        })?;

        self.gateways
            .for_provider(provider)
            .ok_or_else(|| HandlerError::permanent(format!("unsupported provider: {}", provider)))
    }

    async fn process(
        &self,
        transaction: &mut Transaction,
        gateway: &dyn MobileMoneyGateway,
    ) -> Result<(), HandlerError> {
        self.manager.calculate_fees(transaction);

        if !self.manager.validate_transaction(transaction).await? {
            return Err(HandlerError::permanent("transaction failed validation"));
        }

        let success = match transaction.kind {
            TransactionType::MoneyTransfer => gateway.transfer_money(transaction).await?,
            TransactionType::CreditPurchase => gateway.purchase_airtime(transaction).await?,
        };

        if !success {
            // generic gateway rejection, worth another attempt
            return Err(HandlerError::Transient(
                "the operator rejected the payment".to_string(),
            ));
        }

        self.manager.process_transaction(transaction).await?;
        self.notifier.notify_transaction(transaction).await;
        Ok(())
    }

    async fn verify(
        &self,
        transaction: &mut Transaction,
        gateway: &dyn MobileMoneyGateway,
    ) -> Result<(), HandlerError> {
        let reference = transaction.reference.clone().ok_or_else(|| {
            HandlerError::permanent(format!(
                "transaction {} has no gateway reference to verify",
                transaction.id
            ))
        })?;

        let report = gateway.check_payment_status(&reference).await?;

        match report.status {
            PaymentState::Completed => {
                if transaction.operator_reference.is_none() {
                    transaction.operator_reference = report.operator_reference;
                }
                self.manager.process_transaction(transaction).await?;
                self.notifier.notify_transaction(transaction).await;
            }
            PaymentState::Failed => {
                let reason = if report.message.is_empty() {
                    "payment failed at the operator".to_string()
                } else {
                    report.message
                };
                self.manager.handle_failure(transaction, &reason).await?;
                self.notifier.notify_transaction(transaction).await;
            }
            PaymentState::Pending => {
                // leave the transaction for a later verification attempt
                tracing::debug!(
                    transaction_id = %transaction.id,
                    reference = %reference,
                    "payment still pending at the operator"
                );
            }
        }

        Ok(())
    }

    async fn cancel(&self, transaction: &mut Transaction) -> Result<(), HandlerError> {
        if transaction.status != TransactionStatus::Pending {
            return Err(HandlerError::permanent(
                "only pending transactions can be cancelled",
            ));
        }

        self.manager
            .handle_failure(transaction, "cancelled by the system")
            .await?;
        self.notifier.notify_transaction(transaction).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::{MobileMoneyAccount, Operator, Provider};
    use crate::gateway::{GatewayError, PaymentStatusReport};
    use crate::limits::LimitTracker;
    use crate::notification::{ChannelNotifier, Notification};
    use crate::store::MemoryStore;
    use crate::validation::TransactionValidator;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    /// Scriptable gateway double.
    struct StubGateway {
        transfer_success: Mutex<Result<bool, String>>,
        status: Mutex<Option<PaymentStatusReport>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl StubGateway {
        fn succeeding() -> Self {
            Self {
                transfer_success: Mutex::new(Ok(true)),
                status: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            let stub = Self::succeeding();
            *stub.transfer_success.lock().unwrap() = Ok(false);
            stub
        }

        fn erroring() -> Self {
            let stub = Self::succeeding();
            *stub.transfer_success.lock().unwrap() = Err("connection reset".to_string());
            stub
        }

        fn with_status(report: PaymentStatusReport) -> Self {
            let stub = Self::succeeding();
            *stub.status.lock().unwrap() = Some(report);
            stub
        }

        fn outcome(&self) -> Result<bool, GatewayError> {
            self.transfer_success
                .lock()
                .unwrap()
                .clone()
                .map_err(GatewayError::InvalidResponse)
        }
    }

    #[async_trait]
    impl MobileMoneyGateway for StubGateway {
        fn provider(&self) -> Provider {
            Provider::MtnMomo
        }

        async fn verify_account(
            &self,
            _account: &MobileMoneyAccount,
        ) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn get_balance(
            &self,
            _account: &MobileMoneyAccount,
        ) -> Result<Decimal, GatewayError> {
            Ok(Decimal::ZERO)
        }

        async fn initiate_payment(
            &self,
            _transaction: &Transaction,
        ) -> Result<String, GatewayError> {
            Ok("MOMO_REF".to_string())
        }

        async fn check_payment_status(
            &self,
            _reference: &str,
        ) -> Result<PaymentStatusReport, GatewayError> {
            self.calls.lock().unwrap().push("check_payment_status");
            Ok(self
                .status
                .lock()
                .unwrap()
                .clone()
                .expect("status report not scripted"))
        }

        async fn purchase_airtime(&self, _transaction: &Transaction) -> Result<bool, GatewayError> {
            self.calls.lock().unwrap().push("purchase_airtime");
            self.outcome()
        }

        async fn transfer_money(&self, _transaction: &Transaction) -> Result<bool, GatewayError> {
            self.calls.lock().unwrap().push("transfer_money");
            self.outcome()
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        handler: ProcessTransactionHandler,
        notifications: UnboundedReceiver<Notification>,
    }

    fn fixture(gateway: Arc<StubGateway>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let limits = LimitTracker::new(store.clone(), cache);
        let validator = TransactionValidator::new(store.clone(), limits.clone());
        let manager = Arc::new(TransactionManager::new(
            store.clone(),
            limits,
            validator,
        ));
        let gateways = Arc::new(GatewayRegistry::new().register(gateway));
        let (notifier, notifications) = ChannelNotifier::new();
        let handler = ProcessTransactionHandler::new(
            store.clone(),
            manager,
            gateways,
            Arc::new(notifier),
        );
        Fixture {
            store,
            handler,
            notifications,
        }
    }

    async fn seeded_transfer(store: &MemoryStore, balance: Decimal) -> Transaction {
        let user_id = Uuid::new_v4();
        let mut account = MobileMoneyAccount::new(user_id, "677000111");
        account.mark_verified();
        account.record_sync(balance, Utc::now()).unwrap();
        store.save_account(&account).await.unwrap();

        let tx = Transaction::new(
            user_id,
            TransactionType::MoneyTransfer,
            dec!(10000),
            "677123456",
        )
        .unwrap()
        .with_operator(Operator::Mtn)
        .with_source_account(account.id);
        store.save_transaction(&tx).await.unwrap();
        tx
    }

    fn process_message(transaction_id: Uuid) -> ProcessTransactionMessage {
        ProcessTransactionMessage {
            transaction_id,
            action: TransactionAction::Process,
        }
    }

    #[tokio::test]
    async fn test_process_settles_transaction_end_to_end() {
        let gateway = Arc::new(StubGateway::succeeding());
        let mut f = fixture(gateway.clone());
        let tx = seeded_transfer(&f.store, dec!(20000)).await;

        f.handler.handle(&process_message(tx.id)).await.unwrap();

        let settled = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);
        assert!(settled.completed_at.is_some());
        assert_eq!(settled.fees, Some(dec!(200)));

        let account = f
            .store
            .find_account(tx.source_account_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, Some(dec!(9800)));

        assert_eq!(*gateway.calls.lock().unwrap(), vec!["transfer_money"]);

        let notification = f.notifications.recv().await.unwrap();
        assert_eq!(notification.kind, "TRANSACTION_COMPLETED");
    }

    #[tokio::test]
    async fn test_airtime_purchase_uses_airtime_endpoint() {
        let gateway = Arc::new(StubGateway::succeeding());
        let f = fixture(gateway.clone());

        let user_id = Uuid::new_v4();
        let mut account = MobileMoneyAccount::new(user_id, "677000111");
        account.mark_verified();
        account.record_sync(dec!(5000), Utc::now()).unwrap();
        f.store.save_account(&account).await.unwrap();

        let tx = Transaction::new(
            user_id,
            TransactionType::CreditPurchase,
            dec!(1000),
            "677123456",
        )
        .unwrap()
        .with_operator(Operator::Mtn)
        .with_source_account(account.id);
        f.store.save_transaction(&tx).await.unwrap();

        f.handler.handle(&process_message(tx.id)).await.unwrap();
        assert_eq!(*gateway.calls.lock().unwrap(), vec!["purchase_airtime"]);
    }

    #[tokio::test]
    async fn test_missing_transaction_is_permanent() {
        let f = fixture(Arc::new(StubGateway::succeeding()));
        let result = f.handler.handle(&process_message(Uuid::new_v4())).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_validation_failure_is_permanent_and_leaves_pending() {
        let f = fixture(Arc::new(StubGateway::succeeding()));
        // balance far below amount + fees
        let tx = seeded_transfer(&f.store, dec!(100)).await;

        let result = f.handler.handle(&process_message(tx.id)).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));

        let loaded = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_gateway_rejection_is_transient() {
        let f = fixture(Arc::new(StubGateway::rejecting()));
        let tx = seeded_transfer(&f.store, dec!(20000)).await;

        let result = f.handler.handle(&process_message(tx.id)).await;
        assert!(matches!(result, Err(HandlerError::Transient(_))));
    }

    #[tokio::test]
    async fn test_gateway_error_is_transient() {
        let f = fixture(Arc::new(StubGateway::erroring()));
        let tx = seeded_transfer(&f.store, dec!(20000)).await;

        let result = f.handler.handle(&process_message(tx.id)).await;
        assert!(matches!(result, Err(HandlerError::Transient(_))));
    }

    #[tokio::test]
    async fn test_account_without_provider_is_permanent() {
        let f = fixture(Arc::new(StubGateway::succeeding()));
        let user_id = Uuid::new_v4();
        // Camtel number: operator tag but no mobile-money provider
        let mut account = MobileMoneyAccount::new(user_id, "622000111");
        account.mark_verified();
        account.record_sync(dec!(20000), Utc::now()).unwrap();
        f.store.save_account(&account).await.unwrap();

        let tx = Transaction::new(
            user_id,
            TransactionType::MoneyTransfer,
            dec!(10000),
            "677123456",
        )
        .unwrap()
        .with_operator(Operator::Mtn)
        .with_source_account(account.id);
        f.store.save_transaction(&tx).await.unwrap();

        let result = f.handler.handle(&process_message(tx.id)).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_verify_completed_settles_and_keeps_operator_reference() {
        let gateway = Arc::new(StubGateway::with_status(PaymentStatusReport {
            status: PaymentState::Completed,
            message: "settled".to_string(),
            operator_reference: Some("FIN_42".to_string()),
            completed_at: Some(Utc::now()),
        }));
        let mut f = fixture(gateway);
        let mut tx = seeded_transfer(&f.store, dec!(20000)).await;
        tx.reference = Some("MOMO_REF".to_string());
        f.store.save_transaction(&tx).await.unwrap();

        f.handler
            .handle(&ProcessTransactionMessage {
                transaction_id: tx.id,
                action: TransactionAction::Verify,
            })
            .await
            .unwrap();

        let settled = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);
        assert_eq!(settled.operator_reference.as_deref(), Some("FIN_42"));

        let notification = f.notifications.recv().await.unwrap();
        assert_eq!(notification.kind, "TRANSACTION_COMPLETED");
    }

    #[tokio::test]
    async fn test_verify_failed_records_failure() {
        let gateway = Arc::new(StubGateway::with_status(PaymentStatusReport {
            status: PaymentState::Failed,
            message: "insufficient operator float".to_string(),
            operator_reference: None,
            completed_at: None,
        }));
        let f = fixture(gateway);
        let mut tx = seeded_transfer(&f.store, dec!(20000)).await;
        tx.reference = Some("MOMO_REF".to_string());
        f.store.save_transaction(&tx).await.unwrap();

        f.handler
            .handle(&ProcessTransactionMessage {
                transaction_id: tx.id,
                action: TransactionAction::Verify,
            })
            .await
            .unwrap();

        let failed = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        let failures = f.store.failed_transactions_for(tx.id).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, "insufficient operator float");
    }

    #[tokio::test]
    async fn test_verify_pending_leaves_transaction_untouched() {
        let gateway = Arc::new(StubGateway::with_status(PaymentStatusReport {
            status: PaymentState::Pending,
            message: String::new(),
            operator_reference: None,
            completed_at: None,
        }));
        let f = fixture(gateway);
        let mut tx = seeded_transfer(&f.store, dec!(20000)).await;
        tx.reference = Some("MOMO_REF".to_string());
        f.store.save_transaction(&tx).await.unwrap();

        f.handler
            .handle(&ProcessTransactionMessage {
                transaction_id: tx.id,
                action: TransactionAction::Verify,
            })
            .await
            .unwrap();

        let loaded = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_verify_without_reference_is_permanent() {
        let f = fixture(Arc::new(StubGateway::succeeding()));
        let tx = seeded_transfer(&f.store, dec!(20000)).await;

        let result = f
            .handler
            .handle(&ProcessTransactionMessage {
                transaction_id: tx.id,
                action: TransactionAction::Verify,
            })
            .await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_cancel_pending_transaction() {
        let mut f = fixture(Arc::new(StubGateway::succeeding()));
        let tx = seeded_transfer(&f.store, dec!(20000)).await;

        f.handler
            .handle(&ProcessTransactionMessage {
                transaction_id: tx.id,
                action: TransactionAction::Cancel,
            })
            .await
            .unwrap();

        let cancelled = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Failed);
        let failures = f.store.failed_transactions_for(tx.id).await.unwrap();
        assert_eq!(failures[0].reason, "cancelled by the system");

        let notification = f.notifications.recv().await.unwrap();
        assert_eq!(notification.kind, "TRANSACTION_FAILED");
    }

    #[tokio::test]
    async fn test_cancel_completed_transaction_is_permanent_noop() {
        let gateway = Arc::new(StubGateway::succeeding());
        let f = fixture(gateway);
        let tx = seeded_transfer(&f.store, dec!(20000)).await;
        f.handler.handle(&process_message(tx.id)).await.unwrap();

        let result = f
            .handler
            .handle(&ProcessTransactionMessage {
                transaction_id: tx.id,
                action: TransactionAction::Cancel,
            })
            .await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));

        let loaded = f.store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Completed);
        assert!(f
            .store
            .failed_transactions_for(tx.id)
            .await
            .unwrap()
            .is_empty());
    }
}
