//! Mobile-money gateways
//!
//! Capability surface for the operator APIs (Orange Money, MTN MoMo) and
//! the provider registry used by the message handlers. Gateways are pure
//! protocol adapters: validation, settlement and notifications happen in
//! the processing pipeline, never here.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::{MobileMoneyAccount, Provider, Transaction};

mod mtn;
mod orange;

pub use mtn::MtnMomoGateway;
pub use orange::OrangeMoneyGateway;

/// Gateway call failures. All of them are transient from the pipeline's
/// point of view: the operator may answer on a later attempt.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operator API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected operator response: {0}")]
    InvalidResponse(String),
}

/// Settlement state reported by an operator for an initiated payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentState::Pending => "PENDING",
            PaymentState::Completed => "COMPLETED",
            PaymentState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PaymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentState::Pending),
            "COMPLETED" => Ok(PaymentState::Completed),
            "FAILED" => Ok(PaymentState::Failed),
            other => Err(format!("unknown payment state: {}", other)),
        }
    }
}

/// Result of a payment-status poll.
#[derive(Debug, Clone)]
pub struct PaymentStatusReport {
    pub status: PaymentState,
    pub message: String,
    pub operator_reference: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Operator gateway capability, one implementation per provider.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Check that the account exists on the operator side.
    async fn verify_account(&self, account: &MobileMoneyAccount) -> Result<bool, GatewayError>;

    /// Operator-side balance of the account.
    async fn get_balance(&self, account: &MobileMoneyAccount) -> Result<Decimal, GatewayError>;

    /// Start a payment; returns the gateway-assigned reference.
    async fn initiate_payment(&self, transaction: &Transaction) -> Result<String, GatewayError>;

    /// Poll the settlement state of an initiated payment.
    async fn check_payment_status(
        &self,
        reference: &str,
    ) -> Result<PaymentStatusReport, GatewayError>;

    /// Buy airtime for the recipient number. `false` means the operator
    /// rejected the purchase.
    async fn purchase_airtime(&self, transaction: &Transaction) -> Result<bool, GatewayError>;

    /// Transfer money to the recipient number. `false` means the operator
    /// rejected the transfer.
    async fn transfer_money(&self, transaction: &Transaction) -> Result<bool, GatewayError>;
}

/// Fixed provider -> gateway mapping used by the handlers.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Provider, Arc<dyn MobileMoneyGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn MobileMoneyGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn for_provider(&self, provider: Provider) -> Option<Arc<dyn MobileMoneyGateway>> {
        self.gateways.get(&provider).cloned()
    }
}

/// Connection settings for one operator API.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// OAuth client-credentials token with in-process caching, shared by the
/// concrete gateways.
pub(crate) struct TokenCache {
    cached: RwLock<Option<(String, DateTime<Utc>)>>,
}

impl TokenCache {
    pub(crate) fn new() -> Self {
        Self {
            cached: RwLock::new(None),
        }
    }

    /// Return the cached token, or fetch a fresh one from the operator's
    /// token endpoint. Tokens are refreshed five minutes before expiry.
    pub(crate) async fn access_token(
        &self,
        client: &reqwest::Client,
        config: &GatewayConfig,
    ) -> Result<String, GatewayError> {
        {
            let cached = self.cached.read().await;
            if let Some((token, expires_at)) = cached.as_ref() {
                if *expires_at > Utc::now() + ChronoDuration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        let response = client
            .post(format!("{}/oauth/token", config.base_url))
            .basic_auth(&config.api_key, Some(&config.api_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = Utc::now() + ChronoDuration::seconds(token.expires_in);

        let mut cached = self.cached.write().await;
        *cached = Some((token.access_token.clone(), expires_at));

        Ok(token.access_token)
    }
}

pub(crate) fn build_client(config: &GatewayConfig) -> Result<reqwest::Client, GatewayError> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout)
        .build()?)
}
