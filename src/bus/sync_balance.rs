//! Balance sync handler
//!
//! Refreshes the mirrored operator-side balance of a mobile-money account
//! and drops the cached balance snapshots for that account.

use chrono::Utc;
use std::sync::Arc;

use crate::cache::Cache;
use crate::domain::MobileMoneyAccount;
use crate::gateway::GatewayRegistry;
use crate::store::Store;

use super::{HandlerError, SyncBalanceMessage};

pub struct SyncBalanceHandler {
    store: Arc<dyn Store>,
    gateways: Arc<GatewayRegistry>,
    cache: Arc<dyn Cache>,
}

impl SyncBalanceHandler {
    pub fn new(
        store: Arc<dyn Store>,
        gateways: Arc<GatewayRegistry>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            store,
            gateways,
            cache,
        }
    }

    pub async fn handle(&self, message: &SyncBalanceMessage) -> Result<(), HandlerError> {
        tracing::info!(
            account_id = %message.account_id,
            provider = %message.provider,
            "syncing account balance"
        );

        let mut account = self
            .store
            .find_account(message.account_id)
            .await?
            .ok_or_else(|| {
                HandlerError::permanent(format!(
                    "mobile money account {} not found",
                    message.account_id
                ))
            })?;

        let gateway = self
            .gateways
            .for_provider(message.provider)
            .ok_or_else(|| {
                HandlerError::permanent(format!("unsupported provider: {}", message.provider))
            })?;

        let balance = gateway.get_balance(&account).await?;

        account
            .record_sync(balance, Utc::now())
            .map_err(|e| HandlerError::Permanent(e.to_string()))?;

        self.invalidate_balance_cache(&account, message).await;
        self.store.save_account(&account).await?;

        tracing::info!(
            account_id = %account.id,
            provider = %message.provider,
            %balance,
            "account balance synced"
        );

        Ok(())
    }

    async fn invalidate_balance_cache(
        &self,
        account: &MobileMoneyAccount,
        message: &SyncBalanceMessage,
    ) {
        let provider = account.provider.unwrap_or(message.provider);
        let keys = [
            format!(
                "{}_balance_{}",
                provider.as_str().to_lowercase(),
                account.number
            ),
            format!("account_balance_{}", account.id),
        ];

        for key in keys {
            self.cache.delete(&key).await;
        }
    }
}
