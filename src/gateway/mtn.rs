//! MTN Mobile Money gateway
//!
//! HTTP client for the MTN MoMo open API. Requests carry the subscription
//! key header on top of the cached bearer token.

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

const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct MtnMomoGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    token: TokenCache,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    amount: String,
    currency: &'a str,
    #[serde(rename = "partyId")]
    party_id: &'a str,
    #[serde(rename = "externalId")]
    external_id: String,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    #[serde(rename = "referenceId")]
    reference_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default, rename = "financialTransactionId")]
    financial_transaction_id: Option<String>,
    #[serde(default, rename = "completedAt")]
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(rename = "availableBalance")]
    available_balance: String,
}

impl MtnMomoGateway {
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
            .header(SUBSCRIPTION_HEADER, self.config.api_key.as_str())
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
            .header(SUBSCRIPTION_HEADER, self.config.api_key.as_str())
            .json(body)
            .send()
            .await?)
    }

    fn transfer_request<'a>(&self, transaction: &'a Transaction) -> TransferRequest<'a> {
        TransferRequest {
            amount: transaction.amount.to_string(),
            currency: "XAF",
            party_id: &transaction.recipient_number,
            external_id: transaction.id.to_string(),
        }
    }

    /// Start a transfer and report whether the operator accepted it.
    async fn submit(&self, path: &str, transaction: &Transaction) -> Result<bool, GatewayError> {
        let request = self.transfer_request(transaction);
        let response = self.authorized_post(path, &request).await?;

        // MoMo answers 202 on acceptance and 4xx on rejection
        if response.status() == reqwest::StatusCode::BAD_REQUEST
            || response.status() == reqwest::StatusCode::CONFLICT
        {
            tracing::warn!(
                transaction_id = %transaction.id,
                status = response.status().as_u16(),
                "MoMo rejected the request"
            );
            return Ok(false);
        }

        expect_success(response).await?;
        Ok(true)
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
impl MobileMoneyGateway for MtnMomoGateway {
    fn provider(&self) -> Provider {
        Provider::MtnMomo
    }

    async fn verify_account(&self, account: &MobileMoneyAccount) -> Result<bool, GatewayError> {
        tracing::info!(number = %account.number, "verifying MoMo account holder");

        let response = self
            .authorized_get(&format!("/accountholder/msisdn/{}/active", account.number))
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response).await?;
        Ok(true)
    }

    async fn get_balance(&self, account: &MobileMoneyAccount) -> Result<Decimal, GatewayError> {
        tracing::info!(number = %account.number, "fetching MoMo balance");

        let response = self
            .authorized_get(&format!("/account/{}/balance", account.number))
            .await?;
        let body: BalanceResponse = expect_success(response).await?.json().await?;

        Decimal::from_str(&body.available_balance)
            .map_err(|e| GatewayError::InvalidResponse(format!("availableBalance: {}", e)))
    }

    async fn initiate_payment(&self, transaction: &Transaction) -> Result<String, GatewayError> {
        tracing::info!(
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            "initiating MoMo payment"
        );

        let request = self.transfer_request(transaction);
        let response = self.authorized_post("/requesttopay", &request).await?;
        let body: TransferResponse = expect_success(response).await?.json().await?;
        Ok(body.reference_id)
    }

    async fn check_payment_status(
        &self,
        reference: &str,
    ) -> Result<PaymentStatusReport, GatewayError> {
        tracing::info!(reference, "checking MoMo payment status");

        let response = self
            .authorized_get(&format!("/requesttopay/{}", reference))
            .await?;
        let body: StatusResponse = expect_success(response).await?.json().await?;

        // MoMo reports SUCCESSFUL where the pipeline says COMPLETED
        let status = match body.status.as_str() {
            "SUCCESSFUL" => PaymentState::Completed,
            other => PaymentState::from_str(other).map_err(GatewayError::InvalidResponse)?,
        };

        Ok(PaymentStatusReport {
            status,
            message: body.reason.unwrap_or_default(),
            operator_reference: body.financial_transaction_id,
            completed_at: body.completed_at,
        })
    }

    async fn purchase_airtime(&self, transaction: &Transaction) -> Result<bool, GatewayError> {
        tracing::info!(
            transaction_id = %transaction.id,
            recipient = %transaction.recipient_number,
            "purchasing MTN airtime"
        );

        self.submit("/airtime", transaction).await
    }

    async fn transfer_money(&self, transaction: &Transaction) -> Result<bool, GatewayError> {
        tracing::info!(
            transaction_id = %transaction.id,
            recipient = %transaction.recipient_number,
            "transferring money via MoMo"
        );

        self.submit("/transfer", transaction).await
    }
}
