use crate::config::environment::AppConfig;
use crate::config::partner::{CrmConfig, PartnerConfig, SignatureConfig};
use crate::service::lead_service::{CrmLeadSource, LeadSource};
use crate::service::partner_service::{PartnerApi, PresencaBankClient};
use crate::service::signature_queue_service::{
    PartnerSignatureDriver, SignatureDispatcher, SignatureQueue,
};
use crate::service::token_service::StaticTokenProvider;
use std::sync::Arc;

/// Outbound collaborators of the flow. Tests swap in their own implementations.
#[derive(Clone)]
pub struct InfraClients {
    pub partner: Arc<dyn PartnerApi>,
    pub leads: Arc<dyn LeadSource>,
    pub signatures: Arc<dyn SignatureDispatcher>,
}

/// Builds the production clients and starts the signature queue on the current runtime.
pub async fn init_infra(config: &AppConfig) -> Result<InfraClients, String> {
    let tokens = Arc::new(StaticTokenProvider::new(config.partner_api_token.clone()));
    let partner: Arc<dyn PartnerApi> = Arc::new(PresencaBankClient::new(
        PartnerConfig::from_app(config),
        tokens,
    )?);
    let leads: Arc<dyn LeadSource> = Arc::new(CrmLeadSource::new(CrmConfig::from_app(config))?);
    let signatures: Arc<dyn SignatureDispatcher> = Arc::new(SignatureQueue::start(
        Arc::new(PartnerSignatureDriver::new(partner.clone())),
        &SignatureConfig::from_app(config),
    ));
    Ok(InfraClients {
        partner,
        leads,
        signatures,
    })
}
