use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use prometheus::{IntCounterVec, Opts, Registry};
use tracing::{debug, info};

use crate::domain::alert::alert_record::{AlertRecord, PRIORITY_LABEL};
use crate::domain::node::node_condition::{ConditionReason, ConditionStatus, NodeCondition};
use crate::errors::ReconcileError;

pub const DEFAULT_PRIORITY: i64 = 9;

/// Alert data available to a single reconcile pass.
#[derive(Debug, Clone, Copy)]
pub enum AlertInput<'a> {
    Matched(&'a [AlertRecord]),
    /// The cache could not answer for this node.
    Unavailable,
}

/// Candidate condition derived from a matched alert.
#[derive(Debug)]
struct Incoming {
    condition_type: String,
    message: String,
    priority: i64,
    active_since: Option<DateTime<Utc>>,
    consumed: bool,
}

/// Computes the next condition list for a node from its current conditions
/// and the alerts matched to it.
///
/// Only conditions whose type starts with `prefix` are touched.
pub struct ConditionReconciler {
    prefix: String,
    linger: Option<TimeDelta>,
    transitions: IntCounterVec,
}

impl ConditionReconciler {
    /// A zero `linger` keeps resolved conditions forever.
    pub fn new(prefix: &str, linger: Duration, registry: &Registry) -> prometheus::Result<Self> {
        let transitions = IntCounterVec::new(
            Opts::new("update_status", "Count of node condition status transitions")
                .subsystem("reconcile"),
            &["old_status", "new_status"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let linger = if linger.is_zero() {
            None
        } else {
            Some(TimeDelta::from_std(linger).unwrap_or(TimeDelta::MAX))
        };

        Ok(Self {
            prefix: prefix.to_string(),
            linger,
            transitions,
        })
    }

    pub fn reconcile(
        &self,
        existing: &[NodeCondition],
        alerts: AlertInput<'_>,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeCondition>, ReconcileError> {
        let unavailable = matches!(alerts, AlertInput::Unavailable);
        let mut incoming = match alerts {
            AlertInput::Matched(matched) => self.incoming_conditions(matched)?,
            AlertInput::Unavailable => Vec::new(),
        };
        let by_type: HashMap<String, usize> = incoming
            .iter()
            .enumerate()
            .map(|(i, c)| (c.condition_type.clone(), i))
            .collect();

        let mut next = Vec::with_capacity(existing.len() + incoming.len());
        for current in existing {
            if !current.condition_type.starts_with(&self.prefix) {
                next.push(current.clone());
                continue;
            }

            let mut cond = current.clone();
            cond.last_heartbeat_time = Some(now);

            if unavailable {
                self.set_status(&mut cond, ConditionStatus::Unknown, now);
                cond.reason = ConditionReason::AlertsUnavailable.as_code().to_string();
                cond.message.clear();
                next.push(cond);
                continue;
            }

            if let Some(&idx) = by_type.get(&cond.condition_type) {
                let firing = &mut incoming[idx];
                firing.consumed = true;
                self.set_status(&mut cond, ConditionStatus::True, now);
                cond.reason = ConditionReason::AlertIsFiring.as_code().to_string();
                cond.message = firing.message.clone();
                next.push(cond);
                continue;
            }

            self.set_status(&mut cond, ConditionStatus::False, now);
            cond.reason = ConditionReason::AlertIsNotFiring.as_code().to_string();
            cond.message.clear();

            if self.lingered(&cond, now) {
                info!(condition = %cond.condition_type, "removing resolved condition");
                self.record(ConditionStatus::False.as_code(), "");
                continue;
            }
            next.push(cond);
        }

        for firing in incoming.into_iter().filter(|c| !c.consumed) {
            debug!(
                condition = %firing.condition_type,
                active_since = ?firing.active_since,
                "adding condition"
            );
            self.record("", ConditionStatus::True.as_code());
            next.push(NodeCondition {
                condition_type: firing.condition_type,
                status: ConditionStatus::True.as_code().to_string(),
                reason: ConditionReason::AlertIsFiring.as_code().to_string(),
                message: firing.message,
                last_heartbeat_time: Some(now),
                last_transition_time: Some(now),
            });
        }

        Ok(next)
    }

    /// One candidate per condition type, in first-seen order. The smallest
    /// priority wins; ties keep the earlier alert.
    fn incoming_conditions(&self, alerts: &[AlertRecord]) -> Result<Vec<Incoming>, ReconcileError> {
        let mut incoming: Vec<Incoming> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for alert in alerts {
            let name = alert.alert_name().ok_or(ReconcileError::MissingAlertName)?;
            let priority = match alert.labels.get(PRIORITY_LABEL) {
                None => DEFAULT_PRIORITY,
                Some(value) => value.parse::<i64>().map_err(|_| ReconcileError::MalformedPriority {
                    alertname: name.to_string(),
                    value: value.clone(),
                })?,
            };

            let mut message = format!("[P{priority}]");
            if let Some(summary) = alert.summary() {
                message.push(' ');
                message.push_str(summary);
            }

            let condition_type = format!("{}{}", self.prefix, name);
            match index.get(&condition_type) {
                Some(&i) => {
                    if priority < incoming[i].priority {
                        incoming[i].priority = priority;
                        incoming[i].message = message;
                        incoming[i].active_since = alert.active_since;
                    }
                }
                None => {
                    index.insert(condition_type.clone(), incoming.len());
                    incoming.push(Incoming {
                        condition_type,
                        message,
                        priority,
                        active_since: alert.active_since,
                        consumed: false,
                    });
                }
            }
        }

        Ok(incoming)
    }

    fn set_status(&self, cond: &mut NodeCondition, status: ConditionStatus, now: DateTime<Utc>) {
        if cond.has_status(status) {
            return;
        }
        debug!(
            condition = %cond.condition_type,
            old_status = %cond.status,
            new_status = status.as_code(),
            "condition status changed"
        );
        self.record(&cond.status, status.as_code());
        cond.status = status.as_code().to_string();
        cond.last_transition_time = Some(now);
    }

    /// False for longer than the linger period. Conditions without a
    /// transition time are kept.
    fn lingered(&self, cond: &NodeCondition, now: DateTime<Utc>) -> bool {
        match (self.linger, cond.last_transition_time) {
            (Some(linger), Some(since)) => now - since > linger,
            _ => false,
        }
    }

    fn record(&self, old: &str, new: &str) {
        self.transitions.with_label_values(&[old, new]).inc();
    }
}
