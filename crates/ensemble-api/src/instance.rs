//! Instance lifecycle vocabulary: states and status conditions.

use std::fmt;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use serde::{Deserialize, Serialize};

/// Condition reflecting whether every member resource is in its desired
/// state. Always present on a reconciled instance.
pub const CONDITION_INSTANCE_SYNCED: &str = "InstanceSynced";

/// Lifecycle of an instance, surfaced as `status.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Accepted, nothing materialized yet.
    Pending,
    /// Some member resources applied, others still rendering or blocked.
    InProgress,
    /// Every member resource applied and ready.
    Active,
    /// Unrecoverable error; waits for a user edit.
    Failed,
    /// Deletion requested, children being torn down.
    Terminating,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "Pending",
            InstanceState::InProgress => "InProgress",
            InstanceState::Active => "Active",
            InstanceState::Failed => "Failed",
            InstanceState::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

/// Build a condition stamped with the current time.
pub fn new_condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Utc::now()),
        observed_generation,
    }
}

/// Insert or replace a condition by type.
///
/// The transition time of an existing condition is preserved when its status
/// did not change, so repeated reconciles of an unchanged instance produce
/// byte-identical status documents.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Look up a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
