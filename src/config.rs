use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_PREAUTH_HOLD_DAYS: i64 = 7;
const DEFAULT_PRINT_COPIES: u32 = 2;
const DEFAULT_PRINT_ATTEMPTS: u32 = 3;
const DEFAULT_PRINT_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_REMINDER_BATCH_SIZE: u64 = 10;
const DEFAULT_REMINDER_LOOKAHEAD_MINS: i64 = 5;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to validate bearer tokens issued by the auth service
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Shared secret for cron and internal server-to-server endpoints
    #[validate(length(min = 16))]
    pub cron_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Currency code used for all orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Payment gateway secret key
    pub gateway_secret_key: String,

    /// Payment gateway API base URL (overridable for tests)
    #[serde(default = "default_gateway_api_base")]
    pub gateway_api_base: String,

    /// Redirect targets for hosted payment pages
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,

    /// Days a pre-authorization hold stays valid
    #[serde(default = "default_preauth_hold_days")]
    pub preauth_hold_days: i64,

    /// SMS provider (HTTP API, account-sid + token auth)
    #[serde(default)]
    pub sms_api_base: Option<String>,
    #[serde(default)]
    pub sms_account_sid: Option<String>,
    #[serde(default)]
    pub sms_auth_token: Option<String>,
    #[serde(default)]
    pub sms_from: Option<String>,
    /// Shop's phone number, target of staff alerts
    #[serde(default)]
    pub shop_phone: Option<String>,

    /// Email provider (HTTP API, bearer auth)
    #[serde(default)]
    pub email_api_url: Option<String>,
    #[serde(default)]
    pub email_api_key: Option<String>,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    /// Shop's inbox, target of order copies and staff alerts
    pub shop_email: String,

    /// POS receipt printer (HTTP API)
    #[serde(default)]
    pub printer_api_url: Option<String>,
    #[serde(default)]
    pub printer_api_key: Option<String>,
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default = "default_print_copies")]
    pub print_copies: u32,
    #[serde(default = "default_print_attempts")]
    pub print_attempts: u32,
    #[serde(default = "default_print_retry_delay_secs")]
    pub print_retry_delay_secs: u64,

    /// Reminder sweep tuning
    #[serde(default = "default_reminder_batch_size")]
    pub reminder_batch_size: u64,
    #[serde(default = "default_reminder_lookahead_mins")]
    pub reminder_lookahead_mins: i64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_gateway_api_base() -> String {
    "https://api.stripe.com/v1".to_string()
}
fn default_preauth_hold_days() -> i64 {
    DEFAULT_PREAUTH_HOLD_DAYS
}
fn default_email_from() -> String {
    "orders@patisserie.example".to_string()
}
fn default_print_copies() -> u32 {
    DEFAULT_PRINT_COPIES
}
fn default_print_attempts() -> u32 {
    DEFAULT_PRINT_ATTEMPTS
}
fn default_print_retry_delay_secs() -> u64 {
    DEFAULT_PRINT_RETRY_DELAY_SECS
}
fn default_reminder_batch_size() -> u64 {
    DEFAULT_REMINDER_BATCH_SIZE
}
fn default_reminder_lookahead_mins() -> i64 {
    DEFAULT_REMINDER_LOOKAHEAD_MINS
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        cron_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            cron_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            currency: default_currency(),
            gateway_secret_key: "sk_test_unset".to_string(),
            gateway_api_base: default_gateway_api_base(),
            checkout_success_url: "http://localhost:3000/checkout/success".to_string(),
            checkout_cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
            preauth_hold_days: default_preauth_hold_days(),
            sms_api_base: None,
            sms_account_sid: None,
            sms_auth_token: None,
            sms_from: None,
            shop_phone: None,
            email_api_url: None,
            email_api_key: None,
            email_from: default_email_from(),
            shop_email: "shop@patisserie.example".to_string(),
            printer_api_url: None,
            printer_api_key: None,
            printer_id: None,
            print_copies: default_print_copies(),
            print_attempts: default_print_attempts(),
            print_retry_delay_secs: default_print_retry_delay_secs(),
            reminder_batch_size: default_reminder_batch_size(),
            reminder_lookahead_mins: default_reminder_lookahead_mins(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Load configuration from `config/{default,ENV}.toml` with `APP__`-prefixed
/// environment overrides.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret and cron_secret have no defaults: they MUST come from the
    // environment or a config file so an insecure default can never ship.
    let builder = Config::builder()
        .set_default("database_url", "sqlite://patisserie.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("shop_email", "shop@patisserie.example")?
        .set_default("gateway_secret_key", "")?
        .set_default("checkout_success_url", "http://localhost:3000/checkout/success")?
        .set_default("checkout_cancel_url", "http://localhost:3000/checkout/cancel")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET with a secure random string (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }
    if config.get_string("cron_secret").is_err() {
        error!("Cron secret is not configured. Set APP__CRON_SECRET with a secure random string (minimum 16 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "cron_secret is required but not configured. Set APP__CRON_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Install the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
