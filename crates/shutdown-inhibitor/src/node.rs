//! `node` contains the node changes made by the inhibitor: the cordon and the
//! condition telling the kubelet to postpone its own graceful shutdown.
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Node as KubeNode;

/// Annotation put on a node cordoned by this process.
pub const CORDONED_BY_ANNOTATION: &str = "node.deckhouse.io/cordoned-by";
/// Value of [`CORDONED_BY_ANNOTATION`].
pub const CORDONED_BY: &str = "shutdown-inhibitor";

/// Condition read by the kubelet before it starts its graceful shutdown.
pub const GRACEFUL_SHUTDOWN_POSTPONE: &str = "GracefulShutdownPostpone";

/// Status of a node condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionStatus {
    /// `True`
    True,
    /// `False`
    False,
}

impl ConditionStatus {
    /// The status as written to the node.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
        }
    }
}

/// Machine readable reason of the postpone condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionReason {
    /// Labelled pods may still be running; the kubelet has to wait.
    PodsWithLabelAreRunningOnNode,
    /// No labelled pod is running; the kubelet may proceed.
    NoRunningPodsWithLabel,
}

impl ConditionReason {
    /// The reason as written to the node.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::PodsWithLabelAreRunningOnNode => "PodsWithLabelAreRunningOnNode",
            ConditionReason::NoRunningPodsWithLabel => "NoRunningPodsWithLabel",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node status condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    /// Condition type, e.g. [`GRACEFUL_SHUTDOWN_POSTPONE`].
    pub type_: String,
    /// Condition status.
    pub status: ConditionStatus,
    /// Machine readable reason.
    pub reason: ConditionReason,
    /// Human readable message.
    pub message: String,
}

impl Condition {
    /// `GracefulShutdownPostpone=True`: the kubelet must wait for pods
    /// labelled with `label`.
    pub fn postpone(label: &str) -> Self {
        Condition {
            type_: GRACEFUL_SHUTDOWN_POSTPONE.to_string(),
            status: ConditionStatus::True,
            reason: ConditionReason::PodsWithLabelAreRunningOnNode,
            message: format!(
                "Node shutdown is postponed while pods with label {} are running",
                label
            ),
        }
    }

    /// `GracefulShutdownPostpone=False`: no pod labelled with `label` is
    /// left, the kubelet may shut down.
    pub fn release(label: &str) -> Self {
        Condition {
            type_: GRACEFUL_SHUTDOWN_POSTPONE.to_string(),
            status: ConditionStatus::False,
            reason: ConditionReason::NoRunningPodsWithLabel,
            message: format!("No running pods with label {} on the node", label),
        }
    }
}

/// The status of the `type_` condition currently on `node`, if any.
pub fn condition_status<'a>(node: &'a KubeNode, type_: &str) -> Option<&'a str> {
    node.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status.as_str())
}

/// Strategic merge patch for the node status adding or updating `condition`.
///
/// Node conditions merge on `type`, so other conditions are left untouched.
/// `lastTransitionTime` is only sent when the status differs from `current`,
/// the status found on the node; otherwise the existing value is kept.
pub fn condition_patch(
    condition: &Condition,
    current: Option<&str>,
    now: DateTime<Utc>,
) -> serde_json::Value {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut entry = serde_json::json!({
        "type": condition.type_,
        "status": condition.status.as_str(),
        "reason": condition.reason.as_str(),
        "message": condition.message,
        "lastHeartbeatTime": now,
    });
    if current != Some(condition.status.as_str()) {
        entry["lastTransitionTime"] = serde_json::Value::String(now);
    }
    serde_json::json!({
        "status": {
            "conditions": [entry]
        }
    })
}

/// Merge patch marking the node unschedulable and recording who did it.
pub fn cordon_patch() -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "annotations": {
                (CORDONED_BY_ANNOTATION): CORDONED_BY,
            }
        },
        "spec": {
            "unschedulable": true
        }
    })
}
