use chrono::NaiveDate;
use tracing::{info, warn};

use sunswitch_common::{
    sun, synchronize, DesiredSchedules, DeviceScheduleEntry, GeometryError, ReconciliationPlan,
    ScheduleSpec, SunTimes, SyncConfig,
};

use crate::device::{DeviceError, ScheduleDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Apply,
    DryRun,
}

#[derive(Debug)]
pub enum Operation {
    Delete { id: u32 },
    Create { spec: ScheduleSpec },
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete { id } => write!(f, "delete schedule ID {id}"),
            Self::Create { spec } => write!(f, "create {}", spec.description()),
        }
    }
}

#[derive(Debug)]
pub struct OperationFailure {
    pub operation: Operation,
    pub error: DeviceError,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub created: Vec<DeviceScheduleEntry>,
    pub deleted: Vec<u32>,
    /// Scheduled for deletion but already gone from the device.
    pub already_absent: Vec<u32>,
    pub unchanged: usize,
    pub failures: Vec<OperationFailure>,
}

impl ApplyReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("could not read schedules from device")]
    Fetch(#[source] DeviceError),
    #[error(
        "device became unreachable while trying to {operation} \
         ({} deleted, {} created before the failure; the next run will converge)",
        .report.deleted.len(),
        .report.created.len()
    )]
    Interrupted {
        operation: String,
        report: ApplyReport,
        #[source]
        source: DeviceError,
    },
}

#[derive(Debug)]
pub struct RunSummary {
    pub sun: SunTimes,
    pub desired: DesiredSchedules,
    pub before: Vec<DeviceScheduleEntry>,
    pub plan: ReconciliationPlan,
    /// `None` in dry-run mode.
    pub report: Option<ApplyReport>,
    /// Whether a fresh listing after the apply needed no further changes.
    pub converged: Option<bool>,
}

/// Runs all deletes, then all creates, one RPC each.
///
/// A rejected operation is recorded and the rest still run. Losing the device
/// stops the apply immediately; whatever was done so far is returned in the
/// error.
pub async fn apply_plan<D: ScheduleDevice>(
    device: &D,
    plan: &ReconciliationPlan,
) -> Result<ApplyReport, SyncError> {
    let mut report = ApplyReport {
        unchanged: plan.unchanged.len(),
        ..ApplyReport::default()
    };

    for &id in &plan.to_delete {
        match device.delete_schedule(id).await {
            Ok(()) => report.deleted.push(id),
            Err(DeviceError::NotFound { .. }) => {
                warn!("schedule ID {id} was already gone");
                report.already_absent.push(id);
            }
            Err(err) if err.is_unreachable() => {
                return Err(SyncError::Interrupted {
                    operation: Operation::Delete { id }.to_string(),
                    report,
                    source: err,
                });
            }
            Err(err) => {
                warn!("failed to delete schedule {id}: {err}");
                report.failures.push(OperationFailure {
                    operation: Operation::Delete { id },
                    error: err,
                });
            }
        }
    }

    for spec in &plan.to_create {
        match device.create_schedule(spec).await {
            Ok(entry) => {
                info!("created: {} (ID: {})", spec.description(), entry.id);
                report.created.push(entry);
            }
            Err(err) if err.is_unreachable() => {
                return Err(SyncError::Interrupted {
                    operation: Operation::Create { spec: spec.clone() }.to_string(),
                    report,
                    source: err,
                });
            }
            Err(err) => {
                warn!("failed to create {}: {err}", spec.description());
                report.failures.push(OperationFailure {
                    operation: Operation::Create { spec: spec.clone() },
                    error: err,
                });
            }
        }
    }

    Ok(report)
}

/// One full reconciliation for `date`: compute, fetch, diff, apply, verify.
pub async fn run_once<D: ScheduleDevice>(
    config: &SyncConfig,
    device: &D,
    date: NaiveDate,
    mode: RunMode,
) -> Result<RunSummary, SyncError> {
    info!("calculating sunrise/sunset for {date}");
    let sun = sun::compute(
        config.location,
        date,
        config.timezone,
        config.sunrise_offset_minutes,
    )?;
    info!(
        "sunrise {} → sunset {} ({}); sunrise{:+}min = {}",
        sun.sunrise.format("%H:%M"),
        sun.sunset.format("%H:%M"),
        sun.timezone,
        sun.sunrise_offset_minutes,
        sun.adjusted_sunrise.format("%H:%M"),
    );

    let desired =
        DesiredSchedules::from_sun_times(&sun, config.switch_id, config.enable_sunset_automation);

    let before = device.list_schedules().await.map_err(SyncError::Fetch)?;
    if before.is_empty() {
        info!("no existing schedules on device");
    } else {
        info!("found {} existing schedule(s):", before.len());
        for entry in &before {
            info!("  - {}", entry.summary());
        }
    }

    let plan = synchronize(&desired, &before);
    info!("plan: {plan}");

    if mode == RunMode::DryRun {
        return Ok(RunSummary {
            sun,
            desired,
            before,
            plan,
            report: None,
            converged: None,
        });
    }

    let report = apply_plan(device, &plan).await?;

    let converged = if report.succeeded() {
        verify(device, &desired).await
    } else {
        None
    };

    Ok(RunSummary {
        sun,
        desired,
        before,
        plan,
        report: Some(report),
        converged,
    })
}

/// Re-lists the device and diffs again. The changes are already made, so a
/// failed listing only leaves the outcome unverified.
async fn verify<D: ScheduleDevice>(device: &D, desired: &DesiredSchedules) -> Option<bool> {
    let after = match device.list_schedules().await {
        Ok(after) => after,
        Err(err) => {
            warn!("could not verify schedules after apply: {err}");
            return None;
        }
    };
    let remaining = synchronize(desired, &after);
    if !remaining.is_empty() {
        warn!("device still differs after apply: {remaining}");
    }
    Some(remaining.is_empty())
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, io};

    use sunswitch_common::{
        GeoLocation, ScheduleKind, ScheduleTime, SwitchAction, SwitchState,
    };

    use super::*;

    /// In-memory device with scripted failures.
    #[derive(Default)]
    struct FakeDevice {
        entries: RefCell<Vec<DeviceScheduleEntry>>,
        next_id: RefCell<u32>,
        calls: RefCell<Vec<String>>,
        /// Outcomes consumed by mutating calls; `None` means succeed.
        script: RefCell<VecDeque<Option<Failure>>>,
        /// Number of listings answered before the device drops off.
        reachable_lists: Option<usize>,
    }

    #[derive(Clone, Copy)]
    enum Failure {
        Reject,
        Unreachable,
    }

    impl FakeDevice {
        fn with_entries(entries: Vec<DeviceScheduleEntry>) -> Self {
            let next_id = entries.iter().map(|entry| entry.id).max().unwrap_or(0);
            Self {
                entries: RefCell::new(entries),
                next_id: RefCell::new(next_id),
                ..Self::default()
            }
        }

        fn scripted(self, script: Vec<Option<Failure>>) -> Self {
            *self.script.borrow_mut() = script.into();
            self
        }

        fn next_failure(&self, method: &'static str) -> Result<(), DeviceError> {
            match self.script.borrow_mut().pop_front().flatten() {
                None => Ok(()),
                Some(Failure::Reject) => Err(DeviceError::Rejected {
                    method,
                    code: Some(-103),
                    message: "Invalid argument".to_string(),
                }),
                Some(Failure::Unreachable) => Err(unreachable(method)),
            }
        }
    }

    fn unreachable(method: &'static str) -> DeviceError {
        DeviceError::Unreachable {
            address: "10.0.0.9".to_string(),
            method,
            source: Box::new(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
        }
    }

    impl ScheduleDevice for FakeDevice {
        async fn list_schedules(&self) -> Result<Vec<DeviceScheduleEntry>, DeviceError> {
            let mut calls = self.calls.borrow_mut();
            let answered = calls.iter().filter(|call| call.as_str() == "list").count();
            calls.push("list".to_string());
            if self.reachable_lists.is_some_and(|limit| answered >= limit) {
                return Err(unreachable("Schedule.List"));
            }
            Ok(self.entries.borrow().clone())
        }

        async fn create_schedule(
            &self,
            spec: &ScheduleSpec,
        ) -> Result<DeviceScheduleEntry, DeviceError> {
            self.calls
                .borrow_mut()
                .push(format!("create {}", spec.timespec()));
            self.next_failure("Schedule.Create")?;

            let mut next_id = self.next_id.borrow_mut();
            *next_id += 1;
            let entry = DeviceScheduleEntry {
                id: *next_id,
                enabled: true,
                timespec: spec.timespec(),
                action: Some(spec.action),
            };
            self.entries.borrow_mut().push(entry.clone());
            Ok(entry)
        }

        async fn delete_schedule(&self, id: u32) -> Result<(), DeviceError> {
            self.calls.borrow_mut().push(format!("delete {id}"));
            self.next_failure("Schedule.Delete")?;

            let mut entries = self.entries.borrow_mut();
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            if entries.len() == before {
                return Err(DeviceError::NotFound { id });
            }
            Ok(())
        }
    }

    fn config(enable_sunset_automation: bool) -> SyncConfig {
        SyncConfig {
            device_address: "10.0.0.9".to_string(),
            switch_id: 0,
            location: GeoLocation::new(59.437, 24.7536).unwrap(),
            timezone: chrono_tz::Europe::Tallinn,
            sunrise_offset_minutes: 0,
            enable_sunset_automation,
            request_timeout_secs: 10,
        }
    }

    fn equinox() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    fn entry(id: u32, hour: u32, minute: u32, state: SwitchState) -> DeviceScheduleEntry {
        DeviceScheduleEntry {
            id,
            enabled: true,
            timespec: ScheduleTime::from_hm(hour, minute).unwrap().to_timespec(),
            action: Some(SwitchAction::new(0, state)),
        }
    }

    fn spec(hour: u32, minute: u32) -> ScheduleSpec {
        ScheduleSpec::new(
            ScheduleKind::SunriseOff,
            ScheduleTime::from_hm(hour, minute).unwrap(),
            0,
        )
    }

    #[tokio::test]
    async fn first_run_creates_both_and_second_run_is_a_no_op() {
        let device = FakeDevice::default();

        let first = run_once(&config(true), &device, equinox(), RunMode::Apply)
            .await
            .unwrap();
        let report = first.report.unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.deleted.is_empty());
        assert_eq!(first.converged, Some(true));

        let second = run_once(&config(true), &device, equinox(), RunMode::Apply)
            .await
            .unwrap();
        assert!(second.plan.is_empty());
        assert_eq!(second.report.unwrap().unchanged, 2);
    }

    #[tokio::test]
    async fn deletes_run_before_creates() {
        let device = FakeDevice::with_entries(vec![
            entry(1, 5, 0, SwitchState::Off),
            entry(2, 20, 0, SwitchState::On),
        ]);

        run_once(&config(true), &device, equinox(), RunMode::Apply)
            .await
            .unwrap();

        let calls = device.calls.borrow().clone();
        let mutations: Vec<_> = calls
            .iter()
            .filter(|call| call.as_str() != "list")
            .map(|call| call.split(' ').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(mutations, ["delete", "delete", "create", "create"]);
    }

    #[tokio::test]
    async fn dry_run_leaves_device_untouched() {
        let device = FakeDevice::with_entries(vec![entry(1, 5, 0, SwitchState::Off)]);

        let summary = run_once(&config(false), &device, equinox(), RunMode::DryRun)
            .await
            .unwrap();

        assert!(summary.report.is_none());
        assert_eq!(summary.plan.to_delete.len(), 1);
        assert_eq!(device.calls.borrow().as_slice(), ["list"]);
    }

    #[tokio::test]
    async fn polar_night_fails_before_touching_device() {
        let mut config = config(true);
        config.location = GeoLocation::new(78.22, 15.65).unwrap();
        config.timezone = chrono_tz::Arctic::Longyearbyen;
        let device = FakeDevice::default();
        let december = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();

        let err = run_once(&config, &device, december, RunMode::Apply)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Geometry(GeometryError::PolarNight { .. })
        ));
        assert!(device.calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn unreachable_listing_is_fatal() {
        let device = FakeDevice {
            reachable_lists: Some(0),
            ..FakeDevice::default()
        };

        let err = run_once(&config(true), &device, equinox(), RunMode::Apply)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch(ref source) if source.is_unreachable()));
    }

    #[tokio::test]
    async fn rejected_operation_does_not_block_the_rest() {
        let device = FakeDevice::with_entries(vec![
            entry(1, 5, 0, SwitchState::Off),
            entry(2, 20, 0, SwitchState::On),
        ])
        .scripted(vec![Some(Failure::Reject), None, None, None]);
        let plan = ReconciliationPlan {
            to_create: vec![spec(6, 22)],
            to_delete: [1, 2].into(),
            unchanged: Default::default(),
        };

        let report = apply_plan(&device, &plan).await.unwrap();

        assert_eq!(report.deleted, vec![2]);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].operation,
            Operation::Delete { id: 1 }
        ));
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn unreachable_mid_apply_stops_and_reports_progress() {
        let device = FakeDevice::with_entries(vec![entry(1, 5, 0, SwitchState::Off)])
            .scripted(vec![None, Some(Failure::Unreachable), None]);
        let plan = ReconciliationPlan {
            to_create: vec![spec(6, 22), spec(6, 23)],
            to_delete: [1].into(),
            unchanged: Default::default(),
        };

        let err = apply_plan(&device, &plan).await.unwrap_err();

        match err {
            SyncError::Interrupted {
                operation, report, ..
            } => {
                assert!(operation.starts_with("create 06:22"), "{operation}");
                assert_eq!(report.deleted, vec![1]);
                assert!(report.created.is_empty());
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        // The second create never ran.
        assert_eq!(
            device.calls.borrow().as_slice(),
            ["delete 1", "create 0 22 6 * * *"]
        );
    }

    #[tokio::test]
    async fn missing_delete_target_counts_as_absent() {
        let device = FakeDevice::default();
        let plan = ReconciliationPlan {
            to_create: Vec::new(),
            to_delete: [7].into(),
            unchanged: Default::default(),
        };

        let report = apply_plan(&device, &plan).await.unwrap();

        assert_eq!(report.already_absent, vec![7]);
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn disabling_sunset_removes_the_on_schedule() {
        let device = FakeDevice::default();
        run_once(&config(true), &device, equinox(), RunMode::Apply)
            .await
            .unwrap();

        let summary = run_once(&config(false), &device, equinox(), RunMode::Apply)
            .await
            .unwrap();

        assert_eq!(summary.plan.to_delete.len(), 1);
        assert!(summary.plan.to_create.is_empty());
        let remaining = device.entries.borrow().clone();
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            remaining[0].action,
            Some(SwitchAction::new(0, SwitchState::Off))
        );
        assert_eq!(summary.converged, Some(true));
    }

    #[tokio::test]
    async fn failed_verification_keeps_the_apply_report() {
        let device = FakeDevice {
            reachable_lists: Some(1),
            ..FakeDevice::default()
        };

        let summary = run_once(&config(true), &device, equinox(), RunMode::Apply)
            .await
            .unwrap();

        let report = summary.report.unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.succeeded());
        assert_eq!(summary.converged, None);
        assert_eq!(device.entries.borrow().len(), 2);
    }
}
