//! Common test utilities
//!
//! In-memory application fixture and a scriptable operator gateway double
//! for driving the full dispatch pipeline without a database or network.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use onepay::bus::{
    AuditMiddleware, Dispatcher, HandlerRegistry, Message, MessageBus, Middleware,
    ProcessTransactionHandler, ProcessTransactionMessage, SyncBalanceHandler, TransactionAction,
    TransactionMiddleware, Worker,
};
use onepay::cache::MemoryCache;
use onepay::domain::{MobileMoneyAccount, Operator, Provider, Transaction, TransactionType};
use onepay::gateway::{
    GatewayError, GatewayRegistry, MobileMoneyGateway, PaymentState, PaymentStatusReport,
};
use onepay::limits::LimitTracker;
use onepay::notification::{ChannelNotifier, Notification};
use onepay::store::{MemoryStore, Store};
use onepay::{TransactionManager, TransactionValidator};

/// Scriptable gateway: outcomes are popped per call; an empty script means
/// success.
pub struct MockGateway {
    provider: Provider,
    transfer_outcomes: Mutex<VecDeque<Result<bool, String>>>,
    airtime_outcomes: Mutex<VecDeque<Result<bool, String>>>,
    status_reports: Mutex<VecDeque<PaymentStatusReport>>,
    balance: Mutex<Decimal>,
}

impl MockGateway {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            transfer_outcomes: Mutex::new(VecDeque::new()),
            airtime_outcomes: Mutex::new(VecDeque::new()),
            status_reports: Mutex::new(VecDeque::new()),
            balance: Mutex::new(dec!(0)),
        }
    }

    /// Queue transfer outcomes: `Ok(false)` is an operator rejection,
    /// `Err(_)` a connection-level failure.
    pub fn script_transfers(&self, outcomes: Vec<Result<bool, String>>) {
        *self.transfer_outcomes.lock().unwrap() = outcomes.into();
    }

    pub fn script_airtime(&self, outcomes: Vec<Result<bool, String>>) {
        *self.airtime_outcomes.lock().unwrap() = outcomes.into();
    }

    pub fn script_status(&self, reports: Vec<PaymentStatusReport>) {
        *self.status_reports.lock().unwrap() = reports.into();
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap() = balance;
    }

    fn pop(queue: &Mutex<VecDeque<Result<bool, String>>>) -> Result<bool, GatewayError> {
        match queue.lock().unwrap().pop_front() {
            Some(outcome) => outcome.map_err(GatewayError::InvalidResponse),
            None => Ok(true),
        }
    }
}

#[async_trait]
impl MobileMoneyGateway for MockGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn verify_account(&self, _account: &MobileMoneyAccount) -> Result<bool, GatewayError> {
        Ok(true)
    }

    async fn get_balance(&self, _account: &MobileMoneyAccount) -> Result<Decimal, GatewayError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn initiate_payment(&self, transaction: &Transaction) -> Result<String, GatewayError> {
        Ok(format!("REF_{}", transaction.id.simple()))
    }

    async fn check_payment_status(
        &self,
        _reference: &str,
    ) -> Result<PaymentStatusReport, GatewayError> {
        Ok(self
            .status_reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PaymentStatusReport {
                status: PaymentState::Pending,
                message: String::new(),
                operator_reference: None,
                completed_at: None,
            }))
    }

    async fn purchase_airtime(&self, _transaction: &Transaction) -> Result<bool, GatewayError> {
        Self::pop(&self.airtime_outcomes)
    }

    async fn transfer_money(&self, _transaction: &Transaction) -> Result<bool, GatewayError> {
        Self::pop(&self.transfer_outcomes)
    }
}

/// Fully wired in-memory application.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub bus: MessageBus,
    pub worker: Worker,
    pub notifications: UnboundedReceiver<Notification>,
    pub mtn: Arc<MockGateway>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_max_attempts(3)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let limits = LimitTracker::new(store.clone(), cache.clone());
        let validator = TransactionValidator::new(store.clone(), limits.clone());
        let manager = Arc::new(TransactionManager::new(
            store.clone(),
            limits,
            validator,
        ));

        let mtn = Arc::new(MockGateway::new(Provider::MtnMomo));
        let orange = Arc::new(MockGateway::new(Provider::OrangeMoney));
        let gateways = Arc::new(GatewayRegistry::new().register(mtn.clone()).register(orange));

        let (notifier, notifications) = ChannelNotifier::new();
        let notifier = Arc::new(notifier);

        let (bus, receiver) = MessageBus::channel();
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(AuditMiddleware::new(store.clone())),
            Arc::new(TransactionMiddleware::new(store.clone())),
        ];
        let registry = HandlerRegistry::new(
            ProcessTransactionHandler::new(
                store.clone(),
                manager.clone(),
                gateways.clone(),
                notifier.clone(),
            ),
            SyncBalanceHandler::new(store.clone(), gateways, cache.clone()),
        );
        let worker = Worker::new(
            receiver,
            Dispatcher::new(middlewares, Arc::new(registry)),
            store.clone(),
            manager.clone(),
            notifier,
            max_attempts,
            Duration::ZERO,
        );

        Self {
            store,
            cache,
            bus,
            worker,
            notifications,
            mtn,
        }
    }

    /// Seed a verified MTN MoMo account with the given mirrored balance.
    pub async fn seed_account(&self, user_id: Uuid, balance: Decimal) -> MobileMoneyAccount {
        let mut account = MobileMoneyAccount::new(user_id, "677000111");
        account.mark_verified();
        account.record_sync(balance, Utc::now()).unwrap();
        self.store.save_account(&account).await.unwrap();
        account
    }

    /// Seed a PENDING MTN transfer from the given account.
    pub async fn seed_transfer(
        &self,
        account: &MobileMoneyAccount,
        amount: Decimal,
    ) -> Transaction {
        let tx = Transaction::new(
            account.user_id,
            TransactionType::MoneyTransfer,
            amount,
            "677123456",
        )
        .unwrap()
        .with_operator(Operator::Mtn)
        .with_source_account(account.id);
        self.store.save_transaction(&tx).await.unwrap();
        tx
    }

    /// Dispatch an action for a transaction and drain the queue.
    pub async fn dispatch_and_drain(&mut self, transaction_id: Uuid, action: TransactionAction) {
        self.bus
            .dispatch(Message::ProcessTransaction(ProcessTransactionMessage {
                transaction_id,
                action,
            }))
            .unwrap();
        self.worker.run_until_idle().await;
    }
}
