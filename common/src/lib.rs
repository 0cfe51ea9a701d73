pub mod config;
pub mod error;
pub mod reconcile;
pub mod schedule;
pub mod sun;
pub mod types;

pub use config::{LoggingConfig, SchedulerConfig, SyncConfig};
pub use error::{ConfigError, GeometryError};
pub use reconcile::{synchronize, ReconciliationPlan};
pub use schedule::{DesiredSchedules, DeviceScheduleEntry, ScheduleKind, ScheduleSpec, ScheduleTime};
pub use sun::SunTimes;
pub use types::{GeoLocation, SwitchAction, SwitchState};
