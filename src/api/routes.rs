//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::domain::{
    MobileMoneyAccount, Operator, Provider, Transaction, TransactionStatus, TransactionType,
    Violation,
};
use crate::bus::{Message, ProcessTransactionMessage, SyncBalanceMessage, TransactionAction};
use crate::error::AppError;

use super::AppState;

/// Cached balance snapshots expire after five minutes.
const BALANCE_CACHE_TTL: Duration = Duration::from_secs(300);

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub user_id: Uuid,
    pub transaction_type: String,
    /// Amount as string for precise decimal handling
    pub amount: String,
    pub recipient_number: String,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub source_account_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: String,
    pub amount: Decimal,
    pub fees: Option<Decimal>,
    pub status: String,
    pub recipient_number: String,
    pub operator: Option<String>,
    pub reference: Option<String>,
    pub operator_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(transaction: &Transaction) -> Self {
        Self {
            id: transaction.id,
            user_id: transaction.user_id,
            transaction_type: transaction.kind.to_string(),
            amount: transaction.amount,
            fees: transaction.fees,
            status: transaction.status.to_string(),
            recipient_number: transaction.recipient_number.clone(),
            operator: transaction.operator.map(|o| o.to_string()),
            reference: transaction.reference.clone(),
            operator_reference: transaction.operator_reference.clone(),
            created_at: transaction.created_at,
            completed_at: transaction.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub transaction_id: Uuid,
    pub message_id: Uuid,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ViolationsResponse {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    pub number: String,
    /// Explicit override of the prefix-derived provider
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub number: String,
    pub provider: Option<String>,
    pub is_default: bool,
    pub is_verified: bool,
    pub balance: Option<Decimal>,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&MobileMoneyAccount> for AccountResponse {
    fn from(account: &MobileMoneyAccount) -> Self {
        Self {
            id: account.id,
            user_id: account.user_id,
            number: account.number.clone(),
            provider: account.provider.map(|p| p.to_string()),
            is_default: account.is_default,
            is_verified: account.is_verified,
            balance: account.balance,
            last_sync: account.last_sync,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub balance: Decimal,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuditRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AuditErrorsQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct AuditLimitQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct AuditCleanupRequest {
    pub retention_days: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditCleanupResponse {
    pub purged: u64,
}

fn default_limit() -> i64 {
    50
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Transactions
        .route("/transactions", post(create_transaction))
        .route("/transactions/:transaction_id", get(get_transaction))
        .route(
            "/transactions/:transaction_id/violations",
            get(list_violations),
        )
        .route(
            "/transactions/:transaction_id/initiate",
            post(initiate_transaction),
        )
        .route(
            "/transactions/:transaction_id/cancel",
            post(cancel_transaction),
        )
        .route(
            "/transactions/:transaction_id/verify",
            post(verify_transaction),
        )
        // Mobile money accounts
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/verify", post(verify_account))
        .route("/accounts/:account_id/balance", get(get_account_balance))
        .route("/accounts/:account_id/sync", post(sync_account_balance))
        // Audit log (operators)
        .route("/admin/audit", get(audit_by_range))
        .route("/admin/audit/errors", get(audit_errors))
        .route("/admin/audit/users/:user_id", get(audit_by_user))
        .route("/admin/audit/messages/:message_class", get(audit_by_class))
        .route("/admin/audit/cleanup", post(audit_cleanup))
}

// =========================================================================
// Transactions
// =========================================================================

/// Create a PENDING transaction and enqueue it for processing
async fn create_transaction(
    State(state): State<AppState>,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    let kind = TransactionType::from_str(&request.transaction_type)
        .map_err(AppError::InvalidRequest)?;
    let amount =
        Decimal::from_str(&request.amount).map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let mut transaction = Transaction::new(request.user_id, kind, amount, request.recipient_number)?;

    if let Some(operator) = request.operator {
        let operator = Operator::from_str(&operator).map_err(AppError::InvalidRequest)?;
        transaction = transaction.with_operator(operator);
    }
    if let Some(account_id) = request.source_account_id {
        transaction = transaction.with_source_account(account_id);
    }

    state.store.save_transaction(&transaction).await?;

    let message_id = state
        .bus
        .dispatch(Message::ProcessTransaction(ProcessTransactionMessage {
            transaction_id: transaction.id,
            action: TransactionAction::Process,
        }))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse {
            transaction_id: transaction.id,
            message_id,
            action: TransactionAction::Process.to_string(),
        }),
    ))
}

/// Get transaction by ID
async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = state
        .store
        .find_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;

    Ok(Json(TransactionResponse::from(&transaction)))
}

/// Detailed validation: the full violation list for a transaction
async fn list_violations(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<ViolationsResponse>, AppError> {
    let transaction = state
        .store
        .find_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;

    let violations = state.validator.validate(&transaction).await?;

    Ok(Json(ViolationsResponse {
        valid: violations.is_empty(),
        violations,
    }))
}

/// Initiate the payment at the operator: validate, obtain the gateway
/// reference and store it. Settlement is then learned asynchronously via
/// the verification sweep.
async fn initiate_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let mut transaction = state
        .store
        .find_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;

    if transaction.status != TransactionStatus::Pending {
        return Err(AppError::InvalidRequest(
            "only pending transactions can be initiated".to_string(),
        ));
    }
    if transaction.reference.is_some() {
        return Err(AppError::InvalidRequest(
            "payment already initiated".to_string(),
        ));
    }

    transaction.attach_fees();

    let violations = state.validator.validate(&transaction).await?;
    if !violations.is_empty() {
        return Err(AppError::Validation(violations));
    }

    // an empty violation list guarantees the source account exists
    let account_id = transaction.source_account_id.ok_or_else(|| {
        AppError::InvalidRequest("transaction has no source account".to_string())
    })?;
    let account = state
        .store
        .find_account(account_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;
    let provider = account.provider.ok_or_else(|| {
        AppError::InvalidRequest("account has no mobile money provider".to_string())
    })?;
    let gateway = state
        .gateways
        .for_provider(provider)
        .ok_or_else(|| AppError::InvalidRequest(format!("unsupported provider: {}", provider)))?;

    let reference = gateway.initiate_payment(&transaction).await?;
    transaction.reference = Some(reference);
    state.store.save_transaction(&transaction).await?;

    Ok(Json(TransactionResponse::from(&transaction)))
}

async fn dispatch_action(
    state: &AppState,
    transaction_id: Uuid,
    action: TransactionAction,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    // reject unknown ids synchronously instead of dead-lettering later
    if state
        .store
        .find_transaction(transaction_id)
        .await?
        .is_none()
    {
        return Err(AppError::TransactionNotFound(transaction_id.to_string()));
    }

    let message_id = state
        .bus
        .dispatch(Message::ProcessTransaction(ProcessTransactionMessage {
            transaction_id,
            action,
        }))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse {
            transaction_id,
            message_id,
            action: action.to_string(),
        }),
    ))
}

/// Request cancellation of a pending transaction
async fn cancel_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    dispatch_action(&state, transaction_id, TransactionAction::Cancel).await
}

/// Request a verification poll against the operator
async fn verify_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    dispatch_action(&state, transaction_id, TransactionAction::Verify).await
}

// =========================================================================
// Mobile money accounts
// =========================================================================

/// Create a mobile money account; the provider is derived from the number
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let mut account = MobileMoneyAccount::new(request.user_id, request.number);
    account.is_default = request.is_default;

    if let Some(provider) = request.provider {
        let provider = Provider::from_str(&provider).map_err(AppError::InvalidRequest)?;
        account = account.with_provider(provider);
    }

    state.store.save_account(&account).await?;

    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// Get account by ID
async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .store
        .find_account(account_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

    Ok(Json(AccountResponse::from(&account)))
}

/// Verify the account against the operator; verified accounts may
/// initiate outgoing payments
async fn verify_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let mut account = state
        .store
        .find_account(account_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

    let provider = account.provider.ok_or_else(|| {
        AppError::InvalidRequest("account has no mobile money provider".to_string())
    })?;
    let gateway = state
        .gateways
        .for_provider(provider)
        .ok_or_else(|| AppError::InvalidRequest(format!("unsupported provider: {}", provider)))?;

    if !gateway.verify_account(&account).await? {
        return Err(AppError::InvalidRequest(
            "the operator does not recognise this account".to_string(),
        ));
    }

    account.mark_verified();
    state.store.save_account(&account).await?;

    Ok(Json(AccountResponse::from(&account)))
}

/// Operator-side balance, served from cache when fresh
async fn get_account_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = state
        .store
        .find_account(account_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

    let provider = account.provider.ok_or_else(|| {
        AppError::InvalidRequest("account has no mobile money provider".to_string())
    })?;

    let cache_key = format!(
        "{}_balance_{}",
        provider.as_str().to_lowercase(),
        account.number
    );

    if let Some(cached) = state.cache.get(&cache_key).await {
        if let Ok(balance) = Decimal::from_str(&cached) {
            return Ok(Json(BalanceResponse {
                account_id,
                balance,
                cached: true,
            }));
        }
    }

    let gateway = state
        .gateways
        .for_provider(provider)
        .ok_or_else(|| AppError::InvalidRequest(format!("unsupported provider: {}", provider)))?;

    let balance = gateway.get_balance(&account).await?;

    state
        .cache
        .put(&cache_key, balance.to_string(), Some(BALANCE_CACHE_TTL))
        .await;
    state
        .cache
        .put(
            &format!("account_balance_{}", account.id),
            balance.to_string(),
            Some(BALANCE_CACHE_TTL),
        )
        .await;

    Ok(Json(BalanceResponse {
        account_id,
        balance,
        cached: false,
    }))
}

/// Enqueue a balance sync against the operator
async fn sync_account_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let account = state
        .store
        .find_account(account_id)
        .await?
        .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;

    let provider = account.provider.ok_or_else(|| {
        AppError::InvalidRequest("account has no mobile money provider".to_string())
    })?;

    state.bus.dispatch(Message::SyncBalance(SyncBalanceMessage {
        account_id,
        provider,
    }))?;

    Ok(StatusCode::ACCEPTED)
}

// =========================================================================
// Audit log
// =========================================================================

async fn audit_by_range(
    State(state): State<AppState>,
    Query(query): Query<AuditRangeQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let entries = state.audit.find_by_date_range(query.start, query.end).await?;
    Ok(Json(entries))
}

async fn audit_errors(
    State(state): State<AppState>,
    Query(query): Query<AuditErrorsQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let entries = state.audit.find_errors(query.since, query.limit).await?;
    Ok(Json(entries))
}

async fn audit_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<AuditLimitQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let entries = state.audit.find_by_user(user_id, query.limit).await?;
    Ok(Json(entries))
}

async fn audit_by_class(
    State(state): State<AppState>,
    Path(message_class): Path<String>,
    Query(query): Query<AuditLimitQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let entries = state
        .audit
        .find_by_message_class(&message_class, query.limit)
        .await?;
    Ok(Json(entries))
}

async fn audit_cleanup(
    State(state): State<AppState>,
    Json(request): Json<AuditCleanupRequest>,
) -> Result<Json<AuditCleanupResponse>, AppError> {
    if request.retention_days < 1 {
        return Err(AppError::InvalidRequest(
            "retention_days must be at least 1".to_string(),
        ));
    }

    let cutoff = Utc::now() - ChronoDuration::days(request.retention_days);
    let purged = state.audit.delete_older_than(cutoff).await?;

    Ok(Json(AuditCleanupResponse { purged }))
}
