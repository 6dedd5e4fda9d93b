use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use cosmwasm_std::{Addr, Uint128};
use custody::address_codec::ledger_address;
use custody::fees::FeeOptions;
use custody::tx::Fee;
use custody::BitcoinNetwork;
use eyre::{eyre, Result, WrapErr};
use k256::ecdsa::SigningKey;
use serde::Deserialize;

/// Main configuration for the custody node
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub validator: ValidatorConfig,
    pub bitcoin: BitcoinConfig,
    pub jobs: JobConfig,
    pub fees: FeeConfig,
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Key material of the local validator
#[derive(Clone, Deserialize)]
pub struct ValidatorConfig {
    /// Hex secp256k1 secret, `0x` + 64 hex chars
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for ValidatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ValidatorConfig {
    pub fn signing_key(&self) -> Result<SigningKey> {
        let raw = self
            .private_key
            .strip_prefix("0x")
            .ok_or_else(|| eyre!("validator.private_key must start with 0x"))?;
        let bytes = hex::decode(raw).wrap_err("validator.private_key is not valid hex")?;
        SigningKey::from_slice(&bytes).map_err(|_| eyre!("validator.private_key is not a valid secp256k1 scalar"))
    }

    /// Home ledger account the key signs for.
    pub fn address(&self) -> Result<Addr> {
        let key = self.signing_key()?;
        ledger_address(&key.verifying_key().to_sec1_bytes())
            .map_err(|e| eyre!("failed to derive validator address: {}", e))
    }
}

/// Bitcoin network and finality oracle configuration
#[derive(Clone, Deserialize)]
pub struct BitcoinConfig {
    #[serde(default)]
    pub network: BitcoinNetwork,
    /// Access token for the finality oracle
    #[serde(default)]
    pub oracle_token: String,
}

impl fmt::Debug for BitcoinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoinConfig")
            .field("network", &self.network)
            .field("oracle_token", &"<redacted>")
            .finish()
    }
}

/// Job scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_ms: u64,
    #[serde(default = "default_max_retry_backoff")]
    pub max_retry_backoff_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl JobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            job_timeout_ms: default_job_timeout(),
            max_retry_backoff_ms: default_max_retry_backoff(),
            batch_size: default_batch_size(),
        }
    }
}

/// Fee configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeeConfig {
    /// Minimum fee accepted by the ledger, also paid by job transactions
    #[serde(default)]
    pub min_fee: Uint128,
}

impl FeeConfig {
    /// Fee policy handed to the ledger
    pub fn fee_options(&self) -> FeeOptions {
        FeeOptions {
            min_fee: self.min_fee,
        }
    }

    /// Fee attached to job transactions
    pub fn job_fee(&self) -> Fee {
        Fee {
            amount: self.min_fee,
            gas: 0,
        }
    }
}

/// Default functions
fn default_poll_interval() -> u64 {
    1000
}

fn default_job_timeout() -> u64 {
    30_000
}

fn default_max_retry_backoff() -> u64 {
    60_000
}

fn default_batch_size() -> u32 {
    100
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {}", key, v)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let validator = ValidatorConfig {
            private_key: env::var("VALIDATOR_PRIVATE_KEY")
                .map_err(|_| eyre!("VALIDATOR_PRIVATE_KEY environment variable is required"))?,
        };

        let network = match env::var("BTC_NETWORK") {
            Ok(v) => BitcoinNetwork::from_str(&v)
                .map_err(|e| eyre!("BTC_NETWORK is invalid: {}", e))?,
            Err(_) => BitcoinNetwork::default(),
        };
        let bitcoin = BitcoinConfig {
            network,
            oracle_token: env::var("BLOCKCYPHER_TOKEN").unwrap_or_default(),
        };

        let jobs = JobConfig {
            poll_interval_ms: parsed_or("POLL_INTERVAL_MS", default_poll_interval())?,
            job_timeout_ms: parsed_or("JOB_TIMEOUT_MS", default_job_timeout())?,
            max_retry_backoff_ms: parsed_or("MAX_RETRY_BACKOFF_MS", default_max_retry_backoff())?,
            batch_size: parsed_or("JOB_BATCH_SIZE", default_batch_size())?,
        };

        let fees = FeeConfig {
            min_fee: Uint128::new(parsed_or("MIN_FEE", 0u128)?),
        };

        let config = Config {
            database,
            validator,
            bitcoin,
            jobs,
            fees,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.validator.private_key.len() != 66 || !self.validator.private_key.starts_with("0x") {
            return Err(eyre!(
                "validator.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }
        self.validator.signing_key()?;

        if self.bitcoin.network == BitcoinNetwork::Mainnet && self.bitcoin.oracle_token.is_empty() {
            return Err(eyre!("bitcoin.oracle_token is required on mainnet"));
        }

        if self.jobs.poll_interval_ms == 0 {
            return Err(eyre!("jobs.poll_interval_ms must be positive"));
        }
        if self.jobs.job_timeout_ms == 0 {
            return Err(eyre!("jobs.job_timeout_ms must be positive"));
        }
        if self.jobs.max_retry_backoff_ms < self.jobs.poll_interval_ms {
            return Err(eyre!(
                "jobs.max_retry_backoff_ms cannot be shorter than jobs.poll_interval_ms"
            ));
        }
        if self.jobs.batch_size == 0 {
            return Err(eyre!("jobs.batch_size must be positive"));
        }

        Ok(())
    }
}
