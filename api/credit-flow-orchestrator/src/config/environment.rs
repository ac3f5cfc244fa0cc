use std::env;

pub const DEFAULT_PARTNER_API_URL: &str = "https://presenca-bank-api.azurewebsites.net";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub api_host: String,
    pub api_port: u16,
    pub partner_api_url: String,
    pub partner_api_token: Option<String>,
    pub partner_tenant_id: String,
    pub partner_timeout_seconds: u64,
    pub partner_product_id: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub links_rate_limit_base_delay_ms: u64,
    pub link_poll_attempts: u32,
    pub link_poll_delay_seconds: u64,
    pub default_installments: u32,
    pub demo_profile_enabled: bool,
    pub signature_concurrency: usize,
    pub signature_queue_capacity: usize,
    pub signature_timeout_ms: u64,
    pub webhook_token: Option<String>,
    pub crm_api_url: Option<String>,
    pub crm_api_key: Option<String>,
    pub crm_queue_id: Option<String>,
    pub crm_pipeline_ids: Vec<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        load_dotenv_layers();
        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            api_host: read_var("API_HOST")?,
            api_port: read_var("API_PORT")?
                .parse::<u16>()
                .map_err(|e| format!("invalid API_PORT: {e}"))?,
            partner_api_url: read_optional_string("PARTNER_API_URL", DEFAULT_PARTNER_API_URL)
                .trim_end_matches('/')
                .to_string(),
            partner_api_token: read_non_empty("PARTNER_API_TOKEN"),
            partner_tenant_id: read_optional_string("PARTNER_TENANT_ID", "superuser"),
            partner_timeout_seconds: read_optional_u64("PARTNER_TIMEOUT_SECONDS", 30)?,
            partner_product_id: read_optional_u32("PARTNER_PRODUCT_ID", 28)?,
            retry_max_attempts: read_optional_u32("RETRY_MAX_ATTEMPTS", 5)?,
            retry_base_delay_ms: read_optional_u64("RETRY_BASE_DELAY_MS", 2000)?,
            retry_max_delay_ms: read_optional_u64("RETRY_MAX_DELAY_MS", 60_000)?,
            links_rate_limit_base_delay_ms: read_optional_u64(
                "LINKS_RATE_LIMIT_BASE_DELAY_MS",
                30_000,
            )?,
            link_poll_attempts: read_optional_u32("LINK_POLL_ATTEMPTS", 5)?,
            link_poll_delay_seconds: read_optional_u64("LINK_POLL_DELAY_SECONDS", 30)?,
            default_installments: read_optional_u32("DEFAULT_INSTALLMENTS", 36)?,
            demo_profile_enabled: read_optional_bool("DEMO_PROFILE_ENABLED", false),
            signature_concurrency: read_optional_u64("SIGNATURE_CONCURRENCY", 2)? as usize,
            signature_queue_capacity: read_optional_u64("SIGNATURE_QUEUE_CAPACITY", 64)? as usize,
            signature_timeout_ms: read_optional_u64("SIGNATURE_TIMEOUT_MS", 60_000)?,
            webhook_token: read_non_empty("WEBHOOK_TOKEN"),
            crm_api_url: read_non_empty("CRM_API_URL"),
            crm_api_key: read_non_empty("CRM_API_KEY"),
            crm_queue_id: read_non_empty("CRM_QUEUE_ID"),
            crm_pipeline_ids: read_list("CRM_PIPELINE_IDS", "1,3,4"),
            cors_allowed_origins: read_list(
                "CORS_ALLOWED_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            ),
        })
    }

    /// Relaxed certificate checks are only allowed against the homologation host.
    pub fn partner_relaxed_tls(&self) -> bool {
        self.partner_api_url.contains("homolog")
    }
}

fn read_var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_u32(key: &str, default: u32) -> Result<u32, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u32>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_u64(key: &str, default: u64) -> Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn read_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_list(key: &str, default: &str) -> Vec<String> {
    read_optional_string(key, default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn load_dotenv_layers() {
    for path in [".env", "config/config.env", "../.env", "../../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
