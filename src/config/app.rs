//! Application configuration.
//!
//! Settings come from `config.toml` (path overridable with `CONFIG_PATH`).
//! Secrets are usually kept out of the file and supplied through the
//! environment or a `.env` file; environment values win over the file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::database::DEFAULT_DATABASE_URL;

/// Mercado Pago credentials and charge settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MercadoPagoConfig {
    /// API access token
    pub access_token: String,
    /// API base URL
    pub base_url: String,
    /// Public URL of the webhook endpoint sent with every charge
    pub notification_url: Option<String>,
    /// Minutes until an unpaid PIX charge expires
    pub pix_expiration_minutes: i64,
    /// Payer e-mail used when the buyer has none
    pub default_payer_email: String,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: "https://api.mercadopago.com".to_string(),
            notification_url: None,
            pix_expiration_minutes: 30,
            default_payer_email: "comprador@example.com".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Game server remote console
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RconConfig {
    /// Server address
    pub host: String,
    /// Remote console port
    pub port: u16,
    /// Remote console password
    pub password: String,
    /// Session timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 28016,
            password: String::new(),
            timeout_secs: 10,
        }
    }
}

/// HTTP endpoint for gateway notifications
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    /// Whether the HTTP server is started
    pub enabled: bool,
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Background job intervals, in seconds
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Expiry and removal sweep
    pub expiry_interval_secs: u64,
    /// Pending payment poll
    pub payment_poll_interval_secs: u64,
    /// Delivery retry
    pub delivery_retry_interval_secs: u64,
    /// Low stock report
    pub low_stock_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: 300,
            payment_poll_interval_secs: 60,
            delivery_retry_interval_secs: 120,
            low_stock_interval_secs: 3600,
        }
    }
}

/// Everything the bot needs besides the Discord token
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// `SeaORM` database URL
    pub database_url: String,
    /// Where collection backups are written
    pub backup_dir: PathBuf,
    /// Directory with legacy `*.json` files imported on first start
    pub legacy_data_dir: Option<PathBuf>,
    /// Stock level at or below which a product is reported
    pub low_stock_threshold: u32,
    /// Guild for instant command registration; global registration otherwise
    pub guild_id: Option<u64>,
    /// Prefix for text commands
    pub command_prefix: String,
    /// Payment gateway
    pub mercado_pago: MercadoPagoConfig,
    /// Game server console
    pub rcon: RconConfig,
    /// Webhook server
    pub webhook: WebhookConfig,
    /// Background jobs
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            backup_dir: PathBuf::from("data/backups"),
            legacy_data_dir: None,
            low_stock_threshold: 5,
            guild_id: None,
            command_prefix: "!".to_string(),
            mercado_pago: MercadoPagoConfig::default(),
            rcon: RconConfig::default(),
            webhook: WebhookConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::Config {
        message: format!("{name} has an invalid value '{value}'"),
    })
}

impl AppConfig {
    /// Applies environment overrides through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(token) = get("MERCADO_PAGO_ACCESS_TOKEN") {
            self.mercado_pago.access_token = token;
        }
        if let Some(url) = get("MERCADO_PAGO_NOTIFICATION_URL") {
            self.mercado_pago.notification_url = Some(url);
        }
        if let Some(host) = get("RCON_HOST") {
            self.rcon.host = host;
        }
        if let Some(port) = get("RCON_PORT") {
            self.rcon.port = parse_var("RCON_PORT", &port)?;
        }
        if let Some(password) = get("RCON_PASSWORD") {
            self.rcon.password = password;
        }
        if let Some(port) = get("WEBHOOK_PORT").or_else(|| get("PORT")) {
            self.webhook.port = parse_var("WEBHOOK_PORT", &port)?;
        }
        if let Some(guild) = get("GUILD_ID") {
            self.guild_id = Some(parse_var("GUILD_ID", &guild)?);
        }
        Ok(())
    }
}

/// Reads `path`; a missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} not found, using default configuration", path.display());
            return Ok(AppConfig::default());
        }
        Err(e) => {
            return Err(Error::Config {
                message: format!("Failed to read config file {}: {e}", path.display()),
            });
        }
    };
    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse TOML from {}: {e}", path.display()),
    })
}

/// Loads the file named by `CONFIG_PATH` (default `config.toml`) and applies
/// environment overrides.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut config = load_config(&path)?;
    config.apply_overrides(|name| std::env::var(name).ok())?;
    info!(
        gateway_configured = !config.mercado_pago.access_token.is_empty(),
        rcon = %format!("{}:{}", config.rcon.host, config.rcon.port),
        "Configuration loaded"
    );
    Ok(config)
}
