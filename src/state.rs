use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DocumentStore;
use crate::services::gateway::PaymentGateway;
use crate::services::identity::IdentityVerifier;

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: AppConfig,
    pub identity: Box<dyn IdentityVerifier>,
    pub gateway: Box<dyn PaymentGateway>,
}
