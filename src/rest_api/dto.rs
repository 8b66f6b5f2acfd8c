//! Response bodies served by the REST API

use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::crd::{ConditionType, PullSubscription, PullSubscriptionSpec, PullSubscriptionStatus};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// One row of the list endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub name: String,
    pub namespace: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// "True", "False" or "Unknown"
    pub ready: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

impl From<&PullSubscription> for SubscriptionSummary {
    fn from(ps: &PullSubscription) -> Self {
        let ready = ps
            .status
            .as_ref()
            .and_then(|s| s.get_condition(ConditionType::Ready));
        Self {
            name: ps.name_any(),
            namespace: ps.namespace().unwrap_or_default(),
            topic: ps.spec.topic.clone(),
            project: ps
                .status
                .as_ref()
                .and_then(|s| s.project_id.clone())
                .or_else(|| ps.spec.project.clone()),
            ready: ready
                .map(|c| c.status.to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            reason: ready.map(|c| c.reason.clone()).unwrap_or_default(),
            subscription_id: ps.status.as_ref().and_then(|s| s.subscription_id.clone()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionListResponse {
    pub items: Vec<SubscriptionSummary>,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDetailResponse {
    pub name: String,
    pub namespace: String,
    pub spec: PullSubscriptionSpec,
    pub status: PullSubscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
