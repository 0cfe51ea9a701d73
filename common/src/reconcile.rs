use std::collections::BTreeSet;

use serde::Serialize;

use crate::schedule::{DesiredSchedules, DeviceScheduleEntry, ScheduleSpec};

/// Operations that move the device's schedule list to the desired set.
///
/// Deletes run before creates so the device never holds two jobs for the same
/// switch action at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    #[serde(rename = "toCreate")]
    pub to_create: Vec<ScheduleSpec>,
    #[serde(rename = "toDelete")]
    pub to_delete: BTreeSet<u32>,
    pub unchanged: BTreeSet<u32>,
}

impl ReconciliationPlan {
    /// True when the device already matches.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

impl std::fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to delete, {} unchanged",
            self.to_create.len(),
            self.to_delete.len(),
            self.unchanged.len()
        )
    }
}

/// Diffs desired schedules against a live snapshot of the device.
///
/// Entries are grouped by action. Within a group the first entry that already
/// satisfies the desired schedule is kept; every other entry in the group is
/// deleted, and the schedule is created when nothing was kept. Entries whose
/// action is not managed here are never touched.
pub fn synchronize(
    desired: &DesiredSchedules,
    current: &[DeviceScheduleEntry],
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    for action in desired.managed_actions() {
        let spec = desired.spec_for(action);
        let mut kept = false;

        for entry in current.iter().filter(|entry| entry.action == Some(action)) {
            let keep = !kept && spec.is_some_and(|spec| entry.satisfies(spec));
            if keep {
                kept = true;
                plan.unchanged.insert(entry.id);
            } else {
                plan.to_delete.insert(entry.id);
            }
        }

        if let Some(spec) = spec {
            if !kept {
                plan.to_create.push(spec.clone());
            }
        }
    }

    plan
}
