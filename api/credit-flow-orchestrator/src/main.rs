use credit_flow_orchestrator::app::{AppState, build_router};
use credit_flow_orchestrator::config::environment::AppConfig;
use credit_flow_orchestrator::infra::init_infra;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind_addr = %bind_addr, "server bind error");
            std::process::exit(1);
        }
    };

    info!(
        env = %config.rust_env,
        host = %config.api_host,
        port = config.api_port,
        partner_api_url = %config.partner_api_url,
        demo_profile_enabled = config.demo_profile_enabled,
        "credit-flow-orchestrator started"
    );
    if config.partner_api_token.is_none() {
        warn!("PARTNER_API_TOKEN not set; partner calls will fail");
    }
    if config.webhook_token.is_none() {
        warn!("WEBHOOK_TOKEN not set; partner callbacks are accepted unsigned");
    }

    let infra = match init_infra(&config).await {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, "infra init failed");
            std::process::exit(1);
        }
    };
    let app = build_router(AppState::new(config, infra));
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server runtime error");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
