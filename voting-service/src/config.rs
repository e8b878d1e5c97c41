//! Service configuration, resolved once at startup and passed to constructors

use std::time::Duration;

use crate::database::constants::DEFAULT_DB_PATH;

/// Runtime configuration for the service. Everything is read from the
/// environment in `from_env`; nothing else in the crate touches env vars for
/// behavior.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: String,
    pub port: u16,
    pub ledger_rpc_url: String,
    pub ledger_timeout_secs: u64,
    pub ledger_max_inflight: usize,
    pub confirm_timeout_secs: i64,
    pub db_max_connections: u32,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            port: env_parse("PORT", 3000),
            ledger_rpc_url: std::env::var("LEDGER_RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            ledger_timeout_secs: env_parse("LEDGER_TIMEOUT_SECS", 30),
            ledger_max_inflight: env_parse("LEDGER_MAX_INFLIGHT", 10),
            confirm_timeout_secs: env_parse("CONFIRM_TIMEOUT_SECS", 120),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 5),
        }
    }

    /// Per-call timeout for ledger RPCs.
    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    /// Age past which a still-pending vote is reported as stale.
    pub fn confirm_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.confirm_timeout_secs)
    }
}

/// Parse an environment variable into a type implementing FromStr, with a
/// default fallback
pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn env_parse_reads_and_falls_back() {
        std::env::set_var("CONFIG_TEST_PORT", "8080");
        assert_eq!(env_parse("CONFIG_TEST_PORT", 3000u16), 8080);

        std::env::set_var("CONFIG_TEST_PORT", "not-a-number");
        assert_eq!(env_parse("CONFIG_TEST_PORT", 3000u16), 3000);

        std::env::remove_var("CONFIG_TEST_PORT");
        assert_eq!(env_parse("CONFIG_TEST_PORT", 3000u16), 3000);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_defaults() {
        for key in [
            "DB_PATH",
            "PORT",
            "LEDGER_RPC_URL",
            "LEDGER_TIMEOUT_SECS",
            "LEDGER_MAX_INFLIGHT",
            "CONFIRM_TIMEOUT_SECS",
            "DB_MAX_CONNECTIONS",
        ] {
            std::env::remove_var(key);
        }
        let cfg = ServiceConfig::from_env();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.ledger_timeout_secs, 30);
        assert_eq!(cfg.ledger_max_inflight, 10);
    }
}
