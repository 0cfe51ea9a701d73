use chrono::NaiveDate;

/// The sun does not cross the horizon at this latitude on this date.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("polar day at latitude {latitude:.4} on {date}: the sun does not set")]
    PolarDay { latitude: f64, date: NaiveDate },
    #[error("polar night at latitude {latitude:.4} on {date}: the sun does not rise")]
    PolarNight { latitude: f64, date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("latitude must be between -90 and 90, got: {0}")]
    InvalidLatitude(f64),
    #[error("longitude must be between -180 and 180, got: {0}")]
    InvalidLongitude(f64),
    #[error("unknown timezone: {0:?}")]
    UnknownTimezone(String),
    #[error("device_address cannot be empty")]
    EmptyDeviceAddress,
    #[error("request_timeout_secs must be between 1 and 300, got: {0}")]
    InvalidTimeout(u64),
    #[error("logging.level must be one of debug, info, warn, error; got: {0:?}")]
    InvalidLogLevel(String),
}
