use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_code(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionReason {
    AlertIsFiring,
    AlertIsNotFiring,
    AlertsUnavailable,
}

impl ConditionReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            ConditionReason::AlertIsFiring => "AlertIsFiring",
            ConditionReason::AlertIsNotFiring => "AlertIsNotFiring",
            ConditionReason::AlertsUnavailable => "AlertsUnavailable",
        }
    }
}

/// A Node status condition.
///
/// `status` and `reason` stay plain strings so conditions written by other
/// controllers survive a round trip unchanged; an empty `reason` or `message`
/// means the field is absent on the Node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCondition {
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl NodeCondition {
    pub fn has_status(&self, status: ConditionStatus) -> bool {
        self.status == status.as_code()
    }
}
