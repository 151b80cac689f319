//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub mpesa: MpesaConfig,
    pub reconciler: ReconcilerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub max_connections: u32,
}

/// Daraja gateway configuration
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub initiator_name: String,
    pub security_credential: String,
    pub base_url: String,
    pub callback_base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Upper bound on a single STK push charge, in whole KES.
    pub max_charge_amount: u64,
}

/// Reconciliation policy knobs
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Recency window for the last-resort reversal match.
    pub reversal_match_window: Duration,
    /// When set, unmatched reversal callbacks are treated as orphans instead
    /// of falling back to the most recent refund_pending record.
    pub strict_reversal_match: bool,
    /// Advisory completion window reported to admins after a refund request.
    pub refund_advisory_window: Duration,
    /// WebSocket fan-out endpoint informed of state changes, if any.
    pub notify_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
            reconciler: ReconcilerConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.mpesa.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").ok(),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL").ok(),
            max_connections: env::var("CACHE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()))?,
        })
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(MpesaConfig {
            consumer_key: env::var("MPESA_CONSUMER_KEY")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CONSUMER_KEY".to_string()))?,
            consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CONSUMER_SECRET".to_string()))?,
            shortcode: env::var("MPESA_SHORTCODE").unwrap_or_else(|_| "174379".to_string()),
            passkey: env::var("MPESA_PASSKEY")
                .map_err(|_| ConfigError::MissingVariable("MPESA_PASSKEY".to_string()))?,
            initiator_name: env::var("MPESA_INITIATOR_NAME")
                .unwrap_or_else(|_| "testapi".to_string()),
            security_credential: env::var("MPESA_SECURITY_CREDENTIAL").unwrap_or_default(),
            base_url: env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            callback_base_url: env::var("MPESA_CALLBACK_BASE_URL")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CALLBACK_BASE_URL".to_string()))?,
            timeout_secs: env::var("MPESA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: env::var("MPESA_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            max_charge_amount: env::var("MPESA_MAX_CHARGE_AMOUNT")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(300_000),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_key.is_empty() || self.consumer_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET are required".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.max_charge_amount == 0 {
            return Err(ConfigError::InvalidValue(
                "MPESA_MAX_CHARGE_AMOUNT cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Charge result callback URL registered with the gateway.
    pub fn charge_callback_url(&self) -> String {
        format!(
            "{}/payments/mpesa/callback/contributions",
            self.callback_base_url.trim_end_matches('/')
        )
    }

    /// Reversal result callback URL registered with the gateway.
    pub fn reversal_callback_url(&self) -> String {
        format!(
            "{}/payments/mpesa/callback/reversal",
            self.callback_base_url.trim_end_matches('/')
        )
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ReconcilerConfig {
            reversal_match_window: Duration::from_secs(
                env::var("REVERSAL_MATCH_WINDOW_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(3600),
            ),
            strict_reversal_match: env::var("MPESA_STRICT_REVERSAL_MATCH")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
            refund_advisory_window: Duration::from_secs(
                env::var("REFUND_ADVISORY_WINDOW_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(900),
            ),
            notify_url: env::var("NOTIFY_URL").ok(),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpesa_config() -> MpesaConfig {
        MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            initiator_name: "testapi".to_string(),
            security_credential: String::new(),
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            callback_base_url: "https://api.harambee.example/".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            max_charge_amount: 300_000,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_callback_urls_strip_trailing_slash() {
        let config = mpesa_config();
        assert_eq!(
            config.charge_callback_url(),
            "https://api.harambee.example/payments/mpesa/callback/contributions"
        );
        assert_eq!(
            config.reversal_callback_url(),
            "https://api.harambee.example/payments/mpesa/callback/reversal"
        );
    }

    #[test]
    fn test_zero_charge_ceiling_rejected() {
        let mut config = mpesa_config();
        config.max_charge_amount = 0;
        assert!(config.validate().is_err());
    }
}
