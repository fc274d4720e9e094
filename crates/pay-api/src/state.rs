//! # Application State
//!
//! Shared state for the Axum application: configuration, the checkout and
//! callback services, and the token verifier.

use crate::auth::JwtVerifier;
use crate::checkout::{CallbackService, CheckoutService};
use crate::factory::{GatewayConfig, GatewayRegistry, DEFAULT_PROVIDER_PRIORITY};
use pay_core::{
    Currency, LedgerStore, PaymentError, PaymentResult, PaymentType, SkillCatalog,
    SkillDirectory,
};
use pay_ledger::{InMemoryLedger, PgLedger, PgSkillDirectory};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "default-secret-change-in-production";

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of this service
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Frontend origin, used for the mock-pay page
    pub frontend_url: String,
    /// Currency for catalog prices read from the database
    pub currency: Currency,
    /// Serve unconfigured providers with the mock gateway
    pub allow_mock: bool,
    pub provider_priority: Vec<PaymentType>,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Explicit skill catalog file; overrides the database skill table
    pub skill_catalog_path: Option<String>,
}

impl AppConfig {
    /// Defaults for a local run without any environment
    pub fn development() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            environment: "development".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            currency: Currency::CNY,
            allow_mock: true,
            provider_priority: DEFAULT_PROVIDER_PRIORITY.to_vec(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            database_url: None,
            database_max_connections: 10,
            skill_catalog_path: None,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::development();

        let environment = env_or("ENVIRONMENT", &defaults.environment);
        let production = environment == "production";

        let port = match non_empty_env("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| PaymentError::Configuration(format!("PORT is not a port: {}", p)))?,
            None => defaults.port,
        };

        let currency = match non_empty_env("PAYMENT_CURRENCY") {
            Some(c) => c
                .parse()
                .map_err(|e: PaymentError| PaymentError::Configuration(e.to_string()))?,
            None => defaults.currency,
        };

        let allow_mock = match non_empty_env("PAYMENT_ALLOW_MOCK") {
            Some(v) => parse_flag("PAYMENT_ALLOW_MOCK", &v)?,
            None => !production,
        };

        let provider_priority = match non_empty_env("PAYMENT_PROVIDER_PRIORITY") {
            Some(list) => parse_priority(&list)?,
            None => defaults.provider_priority,
        };

        let jwt_secret = match non_empty_env("JWT_SECRET") {
            Some(secret) => secret,
            None if production => {
                return Err(PaymentError::Configuration(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                warn!("JWT_SECRET not set, using the development secret");
                defaults.jwt_secret
            }
        };

        let database_max_connections = match non_empty_env("DATABASE_MAX_CONNECTIONS") {
            Some(n) => n.parse().map_err(|_| {
                PaymentError::Configuration(format!("DATABASE_MAX_CONNECTIONS: {}", n))
            })?,
            None => defaults.database_max_connections,
        };

        Ok(Self {
            host: env_or("HOST", &defaults.host),
            port,
            base_url: env_or("BASE_URL", &defaults.base_url),
            environment,
            frontend_url: env_or("FRONTEND_URL", &defaults.frontend_url),
            currency,
            allow_mock,
            provider_priority,
            jwt_secret,
            database_url: non_empty_env("DATABASE_URL"),
            database_max_connections,
            skill_catalog_path: non_empty_env("SKILL_CATALOG_PATH"),
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> PaymentResult<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().map_err(|_| {
            PaymentError::Configuration(format!("invalid bind address {}:{}", self.host, self.port))
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_flag(key: &str, raw: &str) -> PaymentResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PaymentError::Configuration(format!(
            "{} must be true or false, got {:?}",
            key, other
        ))),
    }
}

/// Parse `alipay,wechat,...`; `mock` is not a valid entry.
fn parse_priority(raw: &str) -> PaymentResult<Vec<PaymentType>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| match name.parse::<PaymentType>() {
            Ok(PaymentType::Mock) | Err(_) => Err(PaymentError::Configuration(format!(
                "PAYMENT_PROVIDER_PRIORITY: unknown provider {:?}",
                name
            ))),
            Ok(provider) => Ok(provider),
        })
        .collect()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub callbacks: Arc<CallbackService>,
    pub auth: Arc<JwtVerifier>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire storage, catalog and gateways from configuration.
    ///
    /// With `DATABASE_URL` the ledger and skills live in PostgreSQL;
    /// without it everything is in memory and skills come from
    /// `config/skills.toml`.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let gateway_config = GatewayConfig::from_env(
            config.allow_mock,
            config.provider_priority.clone(),
            config.frontend_url.clone(),
            config.currency,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load payment providers: {}", e))?;
        let gateways = GatewayRegistry::build(&gateway_config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize payment gateways: {}", e))?;

        let (skills, ledger): (Arc<dyn SkillDirectory>, Arc<dyn LedgerStore>) =
            match &config.database_url {
                Some(url) => {
                    let pool = pay_ledger::connect(url, config.database_max_connections)
                        .await
                        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
                    info!("Ledger: PostgreSQL");

                    match load_skill_catalog(config.skill_catalog_path.as_deref(), false)? {
                        // purchase counts live with the catalog, not in our database
                        Some(catalog) => (
                            Arc::new(catalog),
                            Arc::new(PgLedger::new(pool).without_purchase_counter()),
                        ),
                        None => (
                            Arc::new(PgSkillDirectory::new(pool.clone(), config.currency)),
                            Arc::new(PgLedger::new(pool)),
                        ),
                    }
                }
                None => {
                    warn!("DATABASE_URL not set, orders are kept in memory only");
                    let catalog = load_skill_catalog(config.skill_catalog_path.as_deref(), true)?
                        .unwrap_or_default();
                    (Arc::new(catalog), Arc::new(InMemoryLedger::new()))
                }
            };

        Ok(Self::from_parts(config, skills, ledger, gateways))
    }

    pub fn from_parts(
        config: AppConfig,
        skills: Arc<dyn SkillDirectory>,
        ledger: Arc<dyn LedgerStore>,
        gateways: GatewayRegistry,
    ) -> Self {
        let gateways = Arc::new(gateways);
        Self {
            checkout: Arc::new(CheckoutService::new(
                skills,
                Arc::clone(&ledger),
                Arc::clone(&gateways),
            )),
            callbacks: Arc::new(CallbackService::new(ledger, gateways)),
            auth: Arc::new(JwtVerifier::new(&config.jwt_secret)),
            config: Arc::new(config),
        }
    }
}

/// Load the skill catalog from an explicit path, or search the usual
/// `config/skills.toml` locations when `search` is set.
fn load_skill_catalog(explicit: Option<&str>, search: bool) -> anyhow::Result<Option<SkillCatalog>> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
        return parse_catalog(path, &content).map(Some);
    }
    if !search {
        return Ok(None);
    }

    let config_paths = [
        "config/skills.toml",
        "../config/skills.toml",
        "../../config/skills.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            return parse_catalog(path, &content).map(Some);
        }
    }

    warn!("No skill catalog found, using empty catalog");
    Ok(None)
}

fn parse_catalog(path: &str, content: &str) -> anyhow::Result<SkillCatalog> {
    let catalog = SkillCatalog::from_toml(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
    info!("Loaded {} skills from {}", catalog.skills.len(), path);
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            ..AppConfig::development()
        };

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_bad_host_is_configuration_error() {
        let config = AppConfig {
            host: "not a host".to_string(),
            ..AppConfig::development()
        };
        assert!(matches!(
            config.socket_addr(),
            Err(PaymentError::Configuration(_))
        ));
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!(
            parse_priority("stripe, paypal").unwrap(),
            vec![PaymentType::Stripe, PaymentType::Paypal]
        );
        assert!(parse_priority("stripe,mock").is_err());
        assert!(parse_priority("bitcoin").is_err());
    }

    #[test]
    fn test_flag_parsing() {
        assert!(parse_flag("X", "TRUE").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }

    #[test]
    fn test_explicit_catalog_must_exist() {
        assert!(load_skill_catalog(Some("/nonexistent/skills.toml"), false).is_err());
        assert!(load_skill_catalog(None, false).unwrap().is_none());
    }
}
