//! Orange Money gateway
//!
//! HTTP client for the Orange Money partner API. Authenticates with a
//! cached client-credentials token and exposes the operator capability set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{MobileMoneyAccount, Provider, Transaction};

use super::{
    build_client, GatewayConfig, GatewayError, MobileMoneyGateway, PaymentState,
    PaymentStatusReport, TokenCache,
};

pub struct OrangeMoneyGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    token: TokenCache,
}

#[derive(Debug, Serialize)]
struct PaymentRequest<'a> {
    amount: String,
    currency: &'a str,
    recipient: &'a str,
    external_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    reference: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    operator_reference: Option<String>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct OutcomeResponse {
    status: String,
}

impl OrangeMoneyGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client,
            token: TokenCache::new(),
        })
    }

    async fn authorized_get(&self, path: &str) -> Result<reqwest::Response, GatewayError> {
        let token = self.token.access_token(&self.client, &self.config).await?;
        Ok(self
            .client
            .get(format!("{}{}", self.config.base_url, path))
            .bearer_auth(token)
            .send()
            .await?)
    }

    async fn authorized_post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, GatewayError> {
        let token = self.token.access_token(&self.client, &self.config).await?;
        Ok(self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }

    fn payment_request<'a>(&self, transaction: &'a Transaction) -> PaymentRequest<'a> {
        PaymentRequest {
            amount: transaction.amount.to_string(),
            currency: "XAF",
            recipient: &transaction.recipient_number,
            external_id: transaction.id.to_string(),
        }
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(GatewayError::Api {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl MobileMoneyGateway for OrangeMoneyGateway {
    fn provider(&self) -> Provider {
        Provider::OrangeMoney
    }

    async fn verify_account(&self, account: &MobileMoneyAccount) -> Result<bool, GatewayError> {
        tracing::info!(number = %account.number, "verifying Orange Money account");

        let response = self
            .authorized_get(&format!("/accounts/{}", account.number))
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response).await?;
        Ok(true)
    }

    async fn get_balance(&self, account: &MobileMoneyAccount) -> Result<Decimal, GatewayError> {
        tracing::info!(number = %account.number, "fetching Orange Money balance");

        let response = self
            .authorized_get(&format!("/accounts/{}/balance", account.number))
            .await?;
        let body: BalanceResponse = expect_success(response).await?.json().await?;

        Decimal::from_str(&body.balance)
            .map_err(|e| GatewayError::InvalidResponse(format!("balance: {}", e)))
    }

    async fn initiate_payment(&self, transaction: &Transaction) -> Result<String, GatewayError> {
        tracing::info!(
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            "initiating Orange Money payment"
        );

        let request = self.payment_request(transaction);
        let response = self.authorized_post("/payments", &request).await?;
        let body: PaymentResponse = expect_success(response).await?.json().await?;
        Ok(body.reference)
    }

    async fn check_payment_status(
        &self,
        reference: &str,
    ) -> Result<PaymentStatusReport, GatewayError> {
        tracing::info!(reference, "checking Orange Money payment status");

        let response = self
            .authorized_get(&format!("/payments/{}", reference))
            .await?;
        let body: StatusResponse = expect_success(response).await?.json().await?;

        let status = PaymentState::from_str(&body.status).map_err(GatewayError::InvalidResponse)?;

        Ok(PaymentStatusReport {
            status,
            message: body.message.unwrap_or_default(),
            operator_reference: body.operator_reference,
            completed_at: body.completed_at,
        })
    }

    async fn purchase_airtime(&self, transaction: &Transaction) -> Result<bool, GatewayError> {
        tracing::info!(
            transaction_id = %transaction.id,
            recipient = %transaction.recipient_number,
            "purchasing Orange airtime"
        );

        let request = self.payment_request(transaction);
        let response = self.authorized_post("/airtime", &request).await?;
        let body: OutcomeResponse = expect_success(response).await?.json().await?;
        Ok(body.status == "SUCCESSFUL")
    }

    async fn transfer_money(&self, transaction: &Transaction) -> Result<bool, GatewayError> {
        tracing::info!(
            transaction_id = %transaction.id,
            recipient = %transaction.recipient_number,
            "transferring money via Orange Money"
        );

        let request = self.payment_request(transaction);
        let response = self.authorized_post("/transfers", &request).await?;
        let body: OutcomeResponse = expect_success(response).await?.json().await?;
        Ok(body.status == "SUCCESSFUL")
    }
}
