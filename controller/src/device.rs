use std::future::Future;

use sunswitch_common::{DeviceScheduleEntry, ScheduleSpec};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device at {address} unreachable during {method}")]
    Unreachable {
        address: String,
        method: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("device rejected {method}: {message}{}", code_suffix(.code))]
    Rejected {
        method: &'static str,
        code: Option<i64>,
        message: String,
    },
    #[error("schedule {id} not found on device")]
    NotFound { id: u32 },
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|code| format!(" (code {code})")).unwrap_or_default()
}

impl DeviceError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Schedule RPCs the sync run needs from a device.
pub trait ScheduleDevice {
    fn list_schedules(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceScheduleEntry>, DeviceError>>;

    fn create_schedule(
        &self,
        spec: &ScheduleSpec,
    ) -> impl Future<Output = Result<DeviceScheduleEntry, DeviceError>>;

    fn delete_schedule(&self, id: u32) -> impl Future<Output = Result<(), DeviceError>>;
}
