//! HTTP API
//!
//! Thin glue over the core: endpoints persist entities, enqueue bus
//! messages and read state. No business logic lives here.

pub mod routes;

use std::sync::Arc;

use crate::audit::AuditStore;
use crate::bus::MessageBus;
use crate::cache::Cache;
use crate::gateway::GatewayRegistry;
use crate::store::Store;
use crate::validation::TransactionValidator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub audit: Arc<dyn AuditStore>,
    pub cache: Arc<dyn Cache>,
    pub validator: TransactionValidator,
    pub gateways: Arc<GatewayRegistry>,
    pub bus: MessageBus,
}
