use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{
    sun::SunTimes,
    types::{SwitchAction, SwitchState},
};

/// A daily wall-clock time at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ScheduleTime {
    minutes: u16,
}

impl ScheduleTime {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self {
            minutes: (hour * 60 + minute) as u16,
        })
    }

    /// Drops seconds; callers hand in minute-rounded times.
    pub fn from_naive(time: NaiveTime) -> Self {
        Self {
            minutes: (time.hour() * 60 + time.minute()) as u16,
        }
    }

    pub fn hour(self) -> u32 {
        u32::from(self.minutes / 60)
    }

    pub fn minute(self) -> u32 {
        u32::from(self.minutes % 60)
    }

    /// Device cron form with a leading seconds field: `0 MM HH * * *`.
    pub fn to_timespec(self) -> String {
        format!("0 {} {} * * *", self.minute(), self.hour())
    }

    /// Reads a timespec that fires once every day at a fixed minute.
    ///
    /// Accepts the six-field form written by [`Self::to_timespec`] and the
    /// plain five-field cron form. Anything else (weekday lists, ranges,
    /// steps, `@sunrise` style tokens) is not a daily time and returns `None`.
    pub fn parse_timespec(timespec: &str) -> Option<Self> {
        let fields: Vec<&str> = timespec.split_whitespace().collect();
        let (minute, hour, rest) = match fields.as_slice() {
            [second, minute, hour, rest @ ..] if rest.len() == 3 => {
                if second.parse::<u32>().ok()? != 0 {
                    return None;
                }
                (*minute, *hour, rest)
            }
            [minute, hour, rest @ ..] if rest.len() == 3 => (*minute, *hour, rest),
            _ => return None,
        };

        if rest.iter().any(|field| *field != "*") {
            return None;
        }

        Self::from_hm(hour.parse().ok()?, minute.parse().ok()?)
    }
}

impl std::fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl From<ScheduleTime> for String {
    fn from(time: ScheduleTime) -> Self {
        time.to_string()
    }
}

impl TryFrom<String> for ScheduleTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (hour, minute) = value
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {value:?}"))?;
        let hour = hour.parse().map_err(|_| format!("invalid hour in {value:?}"))?;
        let minute = minute
            .parse()
            .map_err(|_| format!("invalid minute in {value:?}"))?;
        Self::from_hm(hour, minute).ok_or_else(|| format!("time out of range: {value:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleKind {
    SunriseOff,
    SunsetOn,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SunriseOff => "sunrise→OFF",
            Self::SunsetOn => "sunset→ON",
        }
    }

    pub fn state(self) -> SwitchState {
        match self {
            Self::SunriseOff => SwitchState::Off,
            Self::SunsetOn => SwitchState::On,
        }
    }
}

/// A recurring daily job we want on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub kind: ScheduleKind,
    pub time: ScheduleTime,
    pub action: SwitchAction,
}

impl ScheduleSpec {
    pub fn new(kind: ScheduleKind, time: ScheduleTime, switch_id: u32) -> Self {
        Self {
            kind,
            time,
            action: SwitchAction::new(switch_id, kind.state()),
        }
    }

    pub fn timespec(&self) -> String {
        self.time.to_timespec()
    }

    pub fn description(&self) -> String {
        format!(
            "{} ({}) → Turn {} daily",
            self.time,
            self.kind.as_str(),
            self.action.state.as_str()
        )
    }
}

/// The device's own record of a schedule job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceScheduleEntry {
    pub id: u32,
    pub enabled: bool,
    pub timespec: String,
    /// `None` when the job does something other than a single switch set.
    pub action: Option<SwitchAction>,
}

impl DeviceScheduleEntry {
    pub fn daily_time(&self) -> Option<ScheduleTime> {
        ScheduleTime::parse_timespec(&self.timespec)
    }

    /// Same action, enabled, and firing daily at the wanted minute.
    pub fn satisfies(&self, spec: &ScheduleSpec) -> bool {
        self.enabled && self.action == Some(spec.action) && self.daily_time() == Some(spec.time)
    }

    pub fn summary(&self) -> String {
        let action = self
            .action
            .map(|action| action.to_string())
            .unwrap_or_else(|| "unmanaged call".to_string());
        let status = if self.enabled { "enabled" } else { "disabled" };
        format!("ID {}: {} → {} ({})", self.id, self.timespec, action, status)
    }
}

/// Schedules this run wants on the device, plus the actions it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredSchedules {
    pub switch_id: u32,
    pub specs: Vec<ScheduleSpec>,
}

impl DesiredSchedules {
    pub fn from_sun_times(sun: &SunTimes, switch_id: u32, enable_sunset_automation: bool) -> Self {
        let mut specs = vec![ScheduleSpec::new(
            ScheduleKind::SunriseOff,
            ScheduleTime::from_naive(sun.adjusted_sunrise),
            switch_id,
        )];

        if enable_sunset_automation {
            specs.push(ScheduleSpec::new(
                ScheduleKind::SunsetOn,
                ScheduleTime::from_naive(sun.sunset),
                switch_id,
            ));
        }

        Self { switch_id, specs }
    }

    /// Both logical schedules stay managed even when one is switched off, so
    /// a disabled sunset job gets cleaned up.
    pub fn managed_actions(&self) -> [SwitchAction; 2] {
        [
            SwitchAction::new(self.switch_id, ScheduleKind::SunriseOff.state()),
            SwitchAction::new(self.switch_id, ScheduleKind::SunsetOn.state()),
        ]
    }

    pub fn spec_for(&self, action: SwitchAction) -> Option<&ScheduleSpec> {
        self.specs.iter().find(|spec| spec.action == action)
    }
}
