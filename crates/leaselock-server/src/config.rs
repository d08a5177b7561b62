//! Configuration for the demo server
//!
//! Sources, lowest precedence first: built-in defaults, the optional
//! `conf/application.yml`, `LEASELOCK__*` environment variables, then
//! command line flags.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment};
use leaselock_core::LeaseOptions;

use crate::logging::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application";
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
pub const DEFAULT_LOCK_KEY: &str = "stock_key";
pub const DEFAULT_STOCK_KEY: &str = "stock";
pub const DEFAULT_INITIAL_STOCK: i64 = 50;
pub const DEFAULT_LEASE_MS: u64 = 30_000;
pub const DEFAULT_WAIT_MS: u64 = 3_000;

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "leaselock-server", about = "Stock deduction guarded by a lease lock")]
pub struct Cli {
    /// Config file without extension
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<String>,
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
    /// `memory` or `redis`
    #[arg(short = 's', long = "store")]
    pub store: Option<String>,
    #[arg(long = "redis-url", env = "REDIS_URL")]
    pub redis_url: Option<String>,
    #[arg(long = "initial-stock")]
    pub initial_stock: Option<i64>,
}

/// Which backend holds both the leases and the stock counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Redis,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis),
            other => Err(format!("unknown store kind '{}', expected memory or redis", other)),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Redis => write!(f, "redis"),
        }
    }
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Parse the process arguments and load every source.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> Result<Self, ConfigError> {
        let file = args
            .config_file
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let mut builder = Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("LEASELOCK")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.port {
            builder = builder.set_override("server.port", v)?;
        }
        if let Some(v) = args.store {
            builder = builder.set_override("store.kind", v)?;
        }
        if let Some(v) = args.redis_url {
            builder = builder.set_override("store.redis_url", v)?;
        }
        if let Some(v) = args.initial_stock {
            builder = builder.set_override("stock.initial", v)?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string("server.address")
            .unwrap_or(DEFAULT_SERVER_ADDRESS.to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int("server.port")
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    // ========================================================================
    // Store
    // ========================================================================

    pub fn store_kind(&self) -> Result<StoreKind, String> {
        match self.config.get_string("store.kind") {
            Ok(v) => v.parse(),
            Err(_) => Ok(StoreKind::Memory),
        }
    }

    pub fn redis_url(&self) -> String {
        self.config
            .get_string("store.redis_url")
            .unwrap_or(DEFAULT_REDIS_URL.to_string())
    }

    // ========================================================================
    // Lock
    // ========================================================================

    pub fn lock_key(&self) -> String {
        self.config
            .get_string("lock.key")
            .unwrap_or(DEFAULT_LOCK_KEY.to_string())
    }

    /// Stable prefix for owner tokens; random per process when unset.
    pub fn client_id(&self) -> Option<String> {
        self.config
            .get_string("lock.client_id")
            .ok()
            .filter(|v| !v.is_empty())
    }

    /// Lease options from the `lock` section.
    ///
    /// Unset keys keep the server defaults (30s lease, 3s wait) or the
    /// library's derived values.
    pub fn lease_options(&self) -> Result<LeaseOptions, ConfigError> {
        let lease = self
            .millis("lock.lease_ms")
            .unwrap_or(Duration::from_millis(DEFAULT_LEASE_MS));
        let wait = self
            .millis("lock.wait_ms")
            .unwrap_or(Duration::from_millis(DEFAULT_WAIT_MS));

        let mut options = LeaseOptions::new(lease).with_wait(wait);
        if let Some(v) = self.millis("lock.renewal_interval_ms") {
            options = options.with_renewal_interval(v);
        }
        if let Some(v) = self.millis("lock.store_timeout_ms") {
            options = options.with_store_timeout(v);
        }
        if let Ok(v) = self.config.get_int("lock.max_renewal_failures") {
            options = options.with_max_renewal_failures(u32::try_from(v).unwrap_or(0));
        }
        if let (Some(initial), Some(max)) = (
            self.millis("lock.retry_initial_ms"),
            self.millis("lock.retry_max_ms"),
        ) {
            options = options.with_retry(initial, max);
        }

        options
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid lock settings: {}", e)))?;
        Ok(options)
    }

    fn millis(&self, key: &str) -> Option<Duration> {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .map(Duration::from_millis)
    }

    // ========================================================================
    // Stock
    // ========================================================================

    pub fn stock_key(&self) -> String {
        self.config
            .get_string("stock.key")
            .unwrap_or(DEFAULT_STOCK_KEY.to_string())
    }

    pub fn initial_stock(&self) -> i64 {
        self.config
            .get_int("stock.initial")
            .unwrap_or(DEFAULT_INITIAL_STOCK)
    }

    /// Simulated work inside the critical section.
    pub fn work_duration(&self) -> Duration {
        self.millis("stock.work_ms").unwrap_or(Duration::ZERO)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("logging.dir").ok(),
            self.config.get_bool("logging.console").unwrap_or(true),
            self.config.get_bool("logging.file").unwrap_or(false),
            self.config
                .get_string("logging.level")
                .unwrap_or("info".to_string()),
            self.config
                .get_string("logging.rotation")
                .unwrap_or("daily".to_string()),
        )
    }
}
