use crate::config::environment::AppConfig;
use crate::service::retry_service::RetryPolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PartnerConfig {
    pub base_url: String,
    pub tenant_id: String,
    pub product_id: u32,
    pub timeout: Duration,
    pub relaxed_tls: bool,
    pub retry: RetryPolicy,
    pub links_retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub url: Option<String>,
    pub api_key: String,
    pub queue_id: String,
    pub pipeline_ids: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SignatureConfig {
    pub concurrency: usize,
    pub capacity: usize,
    pub timeout: Duration,
}

impl PartnerConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        let retry = RetryPolicy {
            max_attempts: app.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(app.retry_base_delay_ms),
            max_delay: Duration::from_millis(app.retry_max_delay_ms),
        };
        Self {
            base_url: app.partner_api_url.clone(),
            tenant_id: app.partner_tenant_id.clone(),
            product_id: app.partner_product_id,
            timeout: Duration::from_secs(app.partner_timeout_seconds),
            relaxed_tls: app.partner_relaxed_tls(),
            retry,
            links_retry: retry
                .with_base_delay(Duration::from_millis(app.links_rate_limit_base_delay_ms)),
        }
    }
}

impl CrmConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            url: app
                .crm_api_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: app.crm_api_key.clone().unwrap_or_default(),
            queue_id: app.crm_queue_id.clone().unwrap_or_default(),
            pipeline_ids: app.crm_pipeline_ids.clone(),
            timeout: Duration::from_secs(app.partner_timeout_seconds),
        }
    }
}

impl SignatureConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            concurrency: app.signature_concurrency.max(1),
            capacity: app.signature_queue_capacity.max(1),
            timeout: Duration::from_millis(app.signature_timeout_ms),
        }
    }
}
