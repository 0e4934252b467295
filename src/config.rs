//! Configuration management for the copy trading bot

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// USDC.e on Polygon (6 decimals)
pub const DEFAULT_USDC_CONTRACT: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Wallet whose trades are mirrored
    pub target_wallet: String,

    /// Wallet the bot trades from (Safe proxy holding the funds)
    pub bot_wallet: String,

    /// Private key used to sign orders for the bot wallet
    pub private_key: String,

    /// CLOB API endpoint
    pub clob_url: String,

    /// Data API endpoint for activity and positions
    pub data_api_url: String,

    /// Polygon RPC URL for balance queries
    pub polygon_rpc_url: String,

    /// USDC token contract queried for balances
    pub usdc_contract: String,

    /// SQLite database holding the trade ledger
    pub database_path: String,

    /// Directory for the persisted stats documents
    pub stats_dir: String,

    /// Attempts a trade gets before it is abandoned
    pub retry_limit: i64,

    /// Trades worth less than this (USDC) are skipped
    pub min_usdc_threshold: Decimal,

    /// Maximum share of the portfolio one position may take, in percent
    pub max_position_limit_pct: Decimal,

    /// Positions priced below this are liquidated
    pub stop_loss_price: Decimal,

    /// Activity feed polling interval
    pub fetch_interval: Duration,

    /// Stop-loss polling interval
    pub stop_loss_interval: Duration,

    /// Redemption sweep interval
    pub redemption_interval: Duration,

    /// Trades older than this (hours) are ignored by the monitor
    pub max_trade_age_hours: i64,

    /// Executor wait between empty ledger queries
    pub executor_idle: Duration,

    /// Stats snapshot save interval
    pub stats_save_interval: Duration,

    /// Stats report interval
    pub stats_report_interval: Duration,

    /// Bound on every outbound HTTP/RPC call
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = Self {
            target_wallet: required("TARGET_WALLET")?,
            bot_wallet: required("BOT_WALLET")?,
            private_key: required("POLYMARKET_PRIVATE_KEY")?,
            clob_url: env::var("CLOB_HTTP_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
            data_api_url: env::var("DATA_API_URL")
                .unwrap_or_else(|_| "https://data-api.polymarket.com".to_string()),
            polygon_rpc_url: env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| "https://polygon-rpc.com".to_string()),
            usdc_contract: env::var("USDC_CONTRACT_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_USDC_CONTRACT.to_string()),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "sqlite:copy_trading.db".to_string()),
            stats_dir: env::var("STATS_DIR").unwrap_or_else(|_| "logs".to_string()),
            retry_limit: parsed("RETRY_LIMIT", 3),
            min_usdc_threshold: decimal("MIN_USDC_THRESHOLD", Decimal::ONE),
            max_position_limit_pct: decimal("MAX_POSITION_LIMIT_PCT", dec!(20)),
            stop_loss_price: decimal("STOP_LOSS_PRICE", dec!(0.10)),
            fetch_interval: Duration::from_secs(parsed("FETCH_INTERVAL_SECONDS", 1)),
            stop_loss_interval: Duration::from_secs(parsed("STOP_LOSS_INTERVAL_SECONDS", 30)),
            redemption_interval: Duration::from_secs(parsed("REDEMPTION_INTERVAL_SECONDS", 2 * 60 * 60)),
            max_trade_age_hours: parsed("MAX_TRADE_AGE_HOURS", 1),
            executor_idle: Duration::from_millis(parsed("EXECUTOR_IDLE_MS", 0)),
            stats_save_interval: Duration::from_secs(parsed("STATS_SAVE_INTERVAL_SECONDS", 30)),
            stats_report_interval: Duration::from_secs(parsed("STATS_REPORT_INTERVAL_SECONDS", 5 * 60)),
            http_timeout: Duration::from_secs(parsed("HTTP_TIMEOUT_SECONDS", 30)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the services cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_address("TARGET_WALLET", &self.target_wallet)?;
        validate_address("BOT_WALLET", &self.bot_wallet)?;

        if self.retry_limit < 1 {
            bail!("RETRY_LIMIT must be at least 1, got {}", self.retry_limit);
        }
        if self.min_usdc_threshold < Decimal::ZERO {
            bail!("MIN_USDC_THRESHOLD must not be negative");
        }
        if self.max_position_limit_pct <= Decimal::ZERO || self.max_position_limit_pct > dec!(100) {
            bail!(
                "MAX_POSITION_LIMIT_PCT must be in (0, 100], got {}",
                self.max_position_limit_pct
            );
        }
        if self.stop_loss_price < Decimal::ZERO || self.stop_loss_price >= Decimal::ONE {
            bail!("STOP_LOSS_PRICE must be in [0, 1), got {}", self.stop_loss_price);
        }
        if self.max_trade_age_hours < 0 {
            bail!("MAX_TRADE_AGE_HOURS must not be negative");
        }

        Ok(())
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .with_context(|| format!("{} is not defined", key))
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(v.trim()).ok())
        .unwrap_or(default)
}

fn validate_address(key: &str, address: &str) -> Result<()> {
    let hex_part = address
        .strip_prefix("0x")
        .with_context(|| format!("{} must start with 0x", key))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("{} is not a valid address: {}", key, address);
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        target_wallet: "0x1111111111111111111111111111111111111111".to_string(),
        bot_wallet: "0x2222222222222222222222222222222222222222".to_string(),
        private_key: "0x00".to_string(),
        clob_url: "http://localhost".to_string(),
        data_api_url: "http://localhost".to_string(),
        polygon_rpc_url: "http://localhost".to_string(),
        usdc_contract: DEFAULT_USDC_CONTRACT.to_string(),
        database_path: "sqlite::memory:".to_string(),
        stats_dir: "logs".to_string(),
        retry_limit: 3,
        min_usdc_threshold: dec!(10),
        max_position_limit_pct: dec!(10),
        stop_loss_price: dec!(0.50),
        fetch_interval: Duration::from_secs(1),
        stop_loss_interval: Duration::from_secs(30),
        redemption_interval: Duration::from_secs(7200),
        max_trade_age_hours: 1,
        executor_idle: Duration::ZERO,
        stats_save_interval: Duration::from_secs(30),
        stats_report_interval: Duration::from_secs(300),
        http_timeout: Duration::from_secs(30),
    }
}
