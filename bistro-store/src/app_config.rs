use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub booking: BookingRules,
    #[serde(default)]
    pub tables: Vec<TableSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Empty means in-memory
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn postgres_url(&self) -> Option<&str> {
        let url = self.url.trim();
        (!url.is_empty()).then_some(url)
    }
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            probe_interval_seconds: default_probe_interval(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_probe_interval() -> u64 { 30 }
fn default_subscriber_buffer() -> usize { 256 }

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    #[serde(default = "default_code_prefix")]
    pub code_prefix: String,
    #[serde(default = "default_offsets")]
    pub alternate_offsets_minutes: Vec<i64>,
    #[serde(default = "default_max_party_size")]
    pub max_party_size: u32,
    #[serde(default = "default_grace")]
    pub no_show_grace_minutes: i64,
    /// 0 disables the sweeper
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            code_prefix: default_code_prefix(),
            alternate_offsets_minutes: default_offsets(),
            max_party_size: default_max_party_size(),
            no_show_grace_minutes: default_grace(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_code_prefix() -> String { "BST".to_string() }
fn default_offsets() -> Vec<i64> { vec![-30, 30, -60, 60, -90, 90] }
fn default_max_party_size() -> u32 { 20 }
fn default_grace() -> i64 { 15 }
fn default_sweep_interval() -> u64 { 60 }

/// Table provisioned at startup
#[derive(Debug, Deserialize, Clone)]
pub struct TableSeed {
    pub number: u32,
    pub capacity: u32,
    #[serde(default)]
    pub location: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `BISTRO__SERVER__PORT=9000`
            .add_source(config::Environment::with_prefix("BISTRO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[server]\nport = 9000\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.server.port, 9000);
        assert!(cfg.database.postgres_url().is_none());
        assert_eq!(cfg.broker.probe_interval_seconds, 30);
        assert_eq!(cfg.booking.alternate_offsets_minutes, vec![-30, 30, -60, 60, -90, 90]);
        assert_eq!(cfg.booking.code_prefix, "BST");
        assert!(cfg.tables.is_empty());
    }

    #[test]
    fn test_table_seeds() {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 8080

                [database]
                url = "  "

                [[tables]]
                number = 5
                capacity = 4
                location = "main"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(cfg.database.postgres_url().is_none());
        assert_eq!(cfg.tables.len(), 1);
        assert_eq!(cfg.tables[0].number, 5);
        assert_eq!(cfg.tables[0].capacity, 4);
    }
}
