use std::time::Duration;

use anyhow::{Context, Result};

use crate::db::DbConfig;

/// Default interval between repair passes.
pub const DEFAULT_REPAIR_INTERVAL: Duration = Duration::from_secs(60);

/// Default first port assigned to channels.
pub const DEFAULT_PORT_RANGE_START: u16 = 20000;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub repair_interval: Duration,
    /// Cancels a reschedule batch that takes longer. `None` waits forever.
    pub notify_timeout: Option<Duration>,
    pub port_range_start: u16,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("BERTH_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("BERTH_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let repair_interval = match lookup("BERTH_REPAIR_INTERVAL_SECS") {
            Some(v) => {
                let secs: u64 = v
                    .parse()
                    .with_context(|| format!("invalid BERTH_REPAIR_INTERVAL_SECS '{v}'"))?;
                anyhow::ensure!(secs > 0, "BERTH_REPAIR_INTERVAL_SECS must be positive");
                Duration::from_secs(secs)
            }
            None => DEFAULT_REPAIR_INTERVAL,
        };

        let notify_timeout = lookup("BERTH_NOTIFY_TIMEOUT_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("invalid BERTH_NOTIFY_TIMEOUT_SECS '{v}'"))
            })
            .transpose()?;

        let port_range_start = lookup("BERTH_PORT_RANGE_START")
            .map(|v| {
                v.parse::<u16>()
                    .with_context(|| format!("invalid BERTH_PORT_RANGE_START '{v}'"))
            })
            .transpose()?
            .unwrap_or(DEFAULT_PORT_RANGE_START);

        let database = DbConfig::from_lookup(&lookup);

        Ok(Self {
            log_level,
            dev_mode,
            repair_interval,
            notify_timeout,
            port_range_start,
            database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.repair_interval, DEFAULT_REPAIR_INTERVAL);
        assert_eq!(config.notify_timeout, None);
        assert_eq!(config.port_range_start, 20000);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("BERTH_DEV", "TRUE"),
            ("BERTH_REPAIR_INTERVAL_SECS", "5"),
            ("BERTH_NOTIFY_TIMEOUT_SECS", "3"),
            ("BERTH_PORT_RANGE_START", "31000"),
            ("DATABASE_URL", "postgres://db/berth"),
            ("DB_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert!(config.dev_mode);
        assert_eq!(config.repair_interval, Duration::from_secs(5));
        assert_eq!(config.notify_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.port_range_start, 31000);
        assert_eq!(config.database.database_url, "postgres://db/berth");
        assert_eq!(config.database.max_connections, 4);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("BERTH_REPAIR_INTERVAL_SECS", "soon")]).is_err());
        assert!(config(&[("BERTH_REPAIR_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("BERTH_PORT_RANGE_START", "70000")]).is_err());
    }
}
