//! Condition management for PullSubscription status
//!
//! Conditions follow Kubernetes API conventions. `Ready` is never set
//! directly: every `mark_*` call recomputes it from the dependent conditions
//! in [`READY_DEPENDENTS`] order.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;

use crate::crd::{
    Condition, ConditionSeverity, ConditionStatus, ConditionType, PullSubscriptionStatus,
};

/// Conditions that gate `Ready`, in evaluation order
pub const READY_DEPENDENTS: [ConditionType; 3] = [
    ConditionType::SinkProvided,
    ConditionType::Subscribed,
    ConditionType::Deployed,
];

/// Conditions tracked but not folded into `Ready`
pub const INFORMATIONAL: [ConditionType; 1] = [ConditionType::EventTypesProvided];

pub const REASON_INITIALIZING: &str = "Initializing";

/// Update or add a condition
///
/// The transition time only moves when the status changes, so marking the
/// same state twice leaves the condition untouched.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    let severity = severity_for(type_, status);

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.severity = severity;
    } else {
        conditions.push(Condition {
            type_,
            status,
            last_transition_time: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            severity,
        });
    }
}

fn severity_for(type_: ConditionType, status: ConditionStatus) -> ConditionSeverity {
    if INFORMATIONAL.contains(&type_) && status != ConditionStatus::True {
        ConditionSeverity::Info
    } else {
        ConditionSeverity::Error
    }
}

/// Find a condition by type
pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find_condition(conditions, type_)
        .map(Condition::is_true)
        .unwrap_or(false)
}

/// Fold the dependents into the aggregate `(status, reason, message)`
///
/// The first `False` dependent wins; otherwise the first non-True one makes
/// the aggregate `Unknown`. A missing dependent counts as `Unknown`.
pub fn aggregate_ready(conditions: &[Condition]) -> (ConditionStatus, String, String) {
    let dependents: Vec<(ConditionType, Option<&Condition>)> = READY_DEPENDENTS
        .iter()
        .map(|t| (*t, find_condition(conditions, *t)))
        .collect();

    if let Some((_, Some(failed))) = dependents
        .iter()
        .find(|(_, c)| c.map(Condition::is_false).unwrap_or(false))
    {
        return (
            ConditionStatus::False,
            failed.reason.clone(),
            failed.message.clone(),
        );
    }

    if let Some((type_, pending)) = dependents
        .iter()
        .find(|(_, c)| !c.map(Condition::is_true).unwrap_or(false))
    {
        return match pending {
            Some(c) => (ConditionStatus::Unknown, c.reason.clone(), c.message.clone()),
            None => (
                ConditionStatus::Unknown,
                REASON_INITIALIZING.to_string(),
                format!("{type_} has not been evaluated"),
            ),
        };
    }

    (ConditionStatus::True, String::new(), String::new())
}

impl PullSubscriptionStatus {
    /// Set every tracked condition to Unknown unless already present
    pub fn initialize_conditions(&mut self) {
        let tracked = READY_DEPENDENTS
            .iter()
            .chain(INFORMATIONAL.iter())
            .chain(std::iter::once(&ConditionType::Ready));
        for type_ in tracked {
            if find_condition(&self.conditions, *type_).is_none() {
                set_condition(
                    &mut self.conditions,
                    *type_,
                    ConditionStatus::Unknown,
                    "",
                    "",
                );
            }
        }
        self.recompute_ready();
    }

    pub fn get_condition(&self, type_: ConditionType) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    pub fn is_ready(&self) -> bool {
        is_condition_true(&self.conditions, ConditionType::Ready)
    }

    fn mark(&mut self, type_: ConditionType, status: ConditionStatus, reason: &str, message: &str) {
        set_condition(&mut self.conditions, type_, status, reason, message);
        self.recompute_ready();
    }

    fn recompute_ready(&mut self) {
        let (status, reason, message) = aggregate_ready(&self.conditions);
        set_condition(
            &mut self.conditions,
            ConditionType::Ready,
            status,
            &reason,
            &message,
        );
    }

    pub fn mark_sink(&mut self, uri: &str) {
        self.sink_uri = Some(uri.to_string());
        self.mark(ConditionType::SinkProvided, ConditionStatus::True, "", "");
    }

    pub fn mark_no_sink(&mut self, reason: &str, message: &str) {
        self.sink_uri = None;
        self.mark(
            ConditionType::SinkProvided,
            ConditionStatus::False,
            reason,
            message,
        );
    }

    /// The sink is not resolvable yet, e.g. its target has no address
    pub fn mark_sink_unknown(&mut self, reason: &str, message: &str) {
        self.sink_uri = None;
        self.mark(
            ConditionType::SinkProvided,
            ConditionStatus::Unknown,
            reason,
            message,
        );
    }

    pub fn mark_subscribed(&mut self, subscription_id: &str) {
        self.subscription_id = Some(subscription_id.to_string());
        self.mark(ConditionType::Subscribed, ConditionStatus::True, "", "");
    }

    pub fn mark_no_subscription(&mut self, reason: &str, message: &str) {
        self.mark(
            ConditionType::Subscribed,
            ConditionStatus::False,
            reason,
            message,
        );
    }

    pub fn mark_subscription_unknown(&mut self, reason: &str, message: &str) {
        self.mark(
            ConditionType::Subscribed,
            ConditionStatus::Unknown,
            reason,
            message,
        );
    }

    pub fn mark_deployed(&mut self) {
        self.mark(ConditionType::Deployed, ConditionStatus::True, "", "");
    }

    pub fn mark_not_deployed(&mut self, reason: &str, message: &str) {
        self.mark(
            ConditionType::Deployed,
            ConditionStatus::False,
            reason,
            message,
        );
    }

    pub fn mark_deployed_unknown(&mut self, reason: &str, message: &str) {
        self.mark(
            ConditionType::Deployed,
            ConditionStatus::Unknown,
            reason,
            message,
        );
    }

    /// Map the receive adapter's `Available` condition onto `Deployed`
    pub fn propagate_deployment_availability(&mut self, deployment: &Deployment) {
        let available = deployment
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.type_ == "Available"));

        match available {
            Some(c) if c.status == "True" => self.mark_deployed(),
            Some(c) if c.status == "False" => self.mark_not_deployed(
                c.reason.as_deref().unwrap_or("DeploymentUnavailable"),
                c.message.as_deref().unwrap_or("The receive adapter is unavailable"),
            ),
            _ => self.mark_deployed_unknown(
                "DeploymentUnavailable",
                "The receive adapter has not reported availability yet",
            ),
        }
    }

    pub fn mark_event_types(&mut self) {
        self.mark(
            ConditionType::EventTypesProvided,
            ConditionStatus::True,
            "",
            "",
        );
    }

    pub fn mark_no_event_types(&mut self, reason: &str, message: &str) {
        self.mark(
            ConditionType::EventTypesProvided,
            ConditionStatus::False,
            reason,
            message,
        );
    }
}
