//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file; defaults apply only when no file exists.
//!
//! structure:
//!     - ServerConfig: where the dashboards are served.
//!     - PollingConfig: tick interval and how many points each fetch asks for.
//!     - SthConfig: history api endpoint and the entity attribute to chart.
//!     - MqttConfig: broker and topics for the live view.
//!     - DisplayConfig: the time zone timestamps are shown in.
//!
//! ==============================================================================

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;

/// one day; keeps the page refresh period (in ms) far from overflow
pub const MAX_INTERVAL_SECONDS: u64 = 86_400;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub sth: SthConfig,
    pub mqtt: MqttConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    /// lastN sent with every history query
    pub last_n: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SthConfig {
    pub host: String,
    pub port: u16,
    /// fiware-service header
    pub service: String,
    /// fiware-servicepath header
    pub service_path: String,
    pub entity_type: String,
    pub entity_id: String,
    pub attribute: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub keep_alive_seconds: u64,
    pub client_id: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    /// IANA zone name, e.g. "Europe/Lisbon"
    pub timezone: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1".to_string(), port: 8050 }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 5, last_n: 10 }
    }
}

impl Default for SthConfig {
    fn default() -> Self {
        Self {
            host: "20.206.240.145".to_string(),
            port: 8666,
            service: "smart".to_string(),
            service_path: "/".to_string(),
            entity_type: "hosp".to_string(),
            entity_id: "urn:ngsi-ld:hosp:200".to_string(),
            attribute: "luminosity".to_string(),
            timeout_seconds: 4,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "20.206.240.145".to_string(),
            port: 1883,
            keep_alive_seconds: 60,
            client_id: "sensor-dashboard".to_string(),
            topics: vec![
                "/TEF/hosp200/attrs/l".to_string(),
                "/TEF/hosp200/attrs/t".to_string(),
                "/TEF/hosp200/attrs/h".to_string(),
            ],
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { timezone: "Europe/Lisbon".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    /// Parse and validate a toml document
    pub fn parse(content: &str) -> Result<Self> {
        let config: DashboardConfig = toml::from_str(content)
            .map_err(|e| anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the first config file found, defaults only when none exists
    ///
    /// a file that exists but does not parse or validate is an error.
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            std::path::PathBuf::from("config").join("dashboard.toml"),
            std::path::PathBuf::from("..").join("config").join("dashboard.toml"),
        ];
        Self::load_first(&paths)
    }

    fn load_first<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        for path in paths {
            let path = path.as_ref();
            if path.exists() {
                let config = Self::load(path)
                    .with_context(|| format!("invalid config {}", path.display()))?;
                tracing::info!("[CONFIG] Loaded from {}", path.display());
                return Ok(config);
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        self.timezone()?;
        if !(1..=MAX_INTERVAL_SECONDS).contains(&self.polling.interval_seconds) {
            return Err(anyhow!(
                "polling.interval_seconds must be between 1 and {}",
                MAX_INTERVAL_SECONDS
            ));
        }
        if self.polling.last_n == 0 {
            return Err(anyhow!("polling.last_n must be at least 1"));
        }
        Ok(())
    }

    /// Resolve the configured display zone
    pub fn timezone(&self) -> Result<Tz> {
        self.display
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown timezone {:?}: {}", self.display.timezone, e))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            bind = %self.server.bind,
            port = self.server.port,
            interval_seconds = self.polling.interval_seconds,
            last_n = self.polling.last_n,
            "[CONFIG] Dashboard server"
        );
        tracing::info!(
            host = %self.sth.host,
            port = self.sth.port,
            entity = %self.sth.entity_id,
            attribute = %self.sth.attribute,
            timezone = %self.display.timezone,
            "[CONFIG] History source"
        );
        if self.mqtt.enabled {
            tracing::info!(
                broker = %self.mqtt.broker,
                port = self.mqtt.port,
                topics = ?self.mqtt.topics,
                "[CONFIG] Live broker"
            );
        }
    }
}
