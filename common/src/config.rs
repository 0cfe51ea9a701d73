use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::GeoLocation};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;
const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Lower-cased level, with `warning` folded into `warn`.
    pub fn normalized_level(&self) -> Result<String, ConfigError> {
        let level = self.level.trim().to_ascii_lowercase();
        let level = if level == "warning" {
            "warn".to_string()
        } else {
            level
        };

        if LOG_LEVELS.contains(&level.as_str()) {
            Ok(level)
        } else {
            Err(ConfigError::InvalidLogLevel(self.level.clone()))
        }
    }
}

/// The on-disk configuration. Every scheduling field is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub device_address: String,
    pub switch_id: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub sunrise_offset_minutes: i32,
    pub enable_sunset_automation: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// A configuration that passed validation, with parsed location and zone.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub device_address: String,
    pub switch_id: u32,
    pub location: GeoLocation,
    pub timezone: Tz,
    pub sunrise_offset_minutes: i32,
    pub enable_sunset_automation: bool,
    pub request_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn validate(&self) -> Result<SyncConfig, ConfigError> {
        let device_address = self.device_address.trim();
        if device_address.is_empty() {
            return Err(ConfigError::EmptyDeviceAddress);
        }

        let location = GeoLocation::new(self.latitude, self.longitude)?;
        let timezone: Tz = self
            .timezone
            .trim()
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))?;

        if !(1..=MAX_REQUEST_TIMEOUT_SECS).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }

        self.logging.normalized_level()?;

        Ok(SyncConfig {
            device_address: device_address.to_string(),
            switch_id: self.switch_id,
            location,
            timezone,
            sunrise_offset_minutes: self.sunrise_offset_minutes,
            enable_sunset_automation: self.enable_sunset_automation,
            request_timeout_secs: self.request_timeout_secs,
        })
    }
}
