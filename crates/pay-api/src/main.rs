//! # skill-pay
//!
//! Payment and order-settlement service for the skill marketplace.
//!
//! ## Usage
//!
//! ```bash
//! # Any subset of providers; unconfigured ones fall back to the mock
//! # outside production
//! export ALIPAY_APP_ID=2021000000000000
//! export STRIPE_SECRET_KEY=sk_test_...
//! export DATABASE_URL=postgres://localhost/skillhub
//! export JWT_SECRET=...
//!
//! # Run the server (LOG_FORMAT=json for structured logs)
//! skill-pay
//! ```

use pay_api::{routes, state::AppConfig, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    print_banner();

    let config = AppConfig::from_env()?;
    let addr = config.socket_addr()?;
    let is_prod = config.is_production();

    info!("Environment: {}", config.environment);
    info!("Mock payments: {}", if config.allow_mock { "allowed" } else { "disabled" });

    let state = AppState::new(config).await?;
    let app = routes::create_router(state);

    info!("skill-pay starting on http://{}", addr);

    if !is_prod {
        info!("Health: GET http://{}/health", addr);
        info!("Orders: POST http://{}/api/v1/payment/orders", addr);
        info!("Callbacks: POST http://{}/api/v1/payment/callback/{{provider}}", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to one JSON object per line
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn print_banner() {
    println!(
        r#"
  skill-pay
  ━━━━━━━━━━━━━━━━━━━━━━━
  Payment & settlement engine
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
