//! PullSubscription Custom Resource Definition
//!
//! A PullSubscription declares a Cloud Pub/Sub subscription on an existing
//! topic, plus the sink that received messages are delivered to.

use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::duration::parse_duration;
use super::types::{Condition, Destination, ModeType, SecretKeySelector};

/// Default acknowledgement deadline
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(30);
/// Default message retention
pub const DEFAULT_RETENTION_DURATION: Duration = Duration::from_secs(7 * 24 * 3600);

const MIN_ACK_DEADLINE: Duration = Duration::from_secs(10);
const MAX_ACK_DEADLINE: Duration = Duration::from_secs(600);
const MIN_RETENTION_DURATION: Duration = Duration::from_secs(600);
const MAX_RETENTION_DURATION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Structured validation error for `PullSubscriptionSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Join validation errors into a single condition message
pub fn format_validation_errors(errors: &[SpecValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pubsub.k8s.dev",
    version = "v1alpha1",
    kind = "PullSubscription",
    namespaced,
    status = "PullSubscriptionStatus",
    shortname = "ps",
    printcolumn = r#"{"name":"Topic","type":"string","jsonPath":".spec.topic"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PullSubscriptionSpec {
    /// Project that owns the topic; discovered from the environment when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Topic to subscribe to
    pub topic: String,

    /// Credentials used to talk to Pub/Sub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeySelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// How long Pub/Sub waits for an ack, e.g. "30s"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_deadline: Option<String>,

    #[serde(default)]
    pub retain_acked_messages: bool,

    /// How long unacknowledged messages are kept, e.g. "168h"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_duration: Option<String>,

    /// Where received messages are delivered
    pub sink: Destination,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeType>,
}

impl PullSubscriptionSpec {
    /// Credentials secret, falling back to the conventional default
    pub fn effective_secret(&self) -> SecretKeySelector {
        self.secret.clone().unwrap_or_default()
    }

    pub fn effective_mode(&self) -> ModeType {
        self.mode.clone().unwrap_or_default()
    }

    /// Parsed ack deadline, defaulted
    pub fn ack_deadline(&self) -> Result<Duration, String> {
        self.ack_deadline
            .as_deref()
            .map(parse_duration)
            .unwrap_or(Ok(DEFAULT_ACK_DEADLINE))
    }

    /// Parsed retention duration, defaulted
    pub fn retention_duration(&self) -> Result<Duration, String> {
        self.retention_duration
            .as_deref()
            .map(parse_duration)
            .unwrap_or(Ok(DEFAULT_RETENTION_DURATION))
    }

    /// Validate the spec
    ///
    /// Collects every problem instead of stopping at the first so the status
    /// message tells the user everything that needs fixing.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.topic.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.topic",
                "topic must not be empty",
                "Set spec.topic to the name of an existing Pub/Sub topic",
            ));
        }

        if let Some(project) = &self.project {
            if project.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.project",
                    "project must not be empty when set",
                    "Remove spec.project to use the ambient project, or set it",
                ));
            }
        }

        if let Some(secret) = &self.secret {
            if secret.name.is_empty() || secret.key.is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.secret",
                    "secret name and key must both be set",
                    "Reference the Secret and the key holding the credential",
                ));
            }
        }

        match self.ack_deadline() {
            Ok(d) if d < MIN_ACK_DEADLINE || d > MAX_ACK_DEADLINE => {
                errors.push(SpecValidationError::new(
                    "spec.ackDeadline",
                    format!("ack deadline {d:?} is outside 10s..=600s"),
                    "Use a value between 10s and 10m",
                ));
            }
            Ok(_) => {}
            Err(e) => errors.push(SpecValidationError::new(
                "spec.ackDeadline",
                e,
                "Use a duration such as 30s or 2m",
            )),
        }

        match self.retention_duration() {
            Ok(d) if d < MIN_RETENTION_DURATION || d > MAX_RETENTION_DURATION => {
                errors.push(SpecValidationError::new(
                    "spec.retentionDuration",
                    format!("retention {d:?} is outside 10m..=7d"),
                    "Use a value between 10m and 168h",
                ));
            }
            Ok(_) => {}
            Err(e) => errors.push(SpecValidationError::new(
                "spec.retentionDuration",
                e,
                "Use a duration such as 24h or 168h",
            )),
        }

        if self.sink.reference.is_none() && self.sink.uri.is_none() {
            errors.push(SpecValidationError::new(
                "spec.sink",
                "sink needs a ref, a uri, or both",
                "Point spec.sink.ref at an addressable or set spec.sink.uri",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Check that an update leaves the immutable fields alone
///
/// `project` and `serviceAccountName` only become immutable once set.
pub fn validate_update(
    old: &PullSubscriptionSpec,
    new: &PullSubscriptionSpec,
) -> Result<(), Vec<SpecValidationError>> {
    let mut errors = Vec::new();
    let mut immutable = |field: &str, changed: bool| {
        if changed {
            errors.push(SpecValidationError::new(
                field,
                "field is immutable",
                "Delete and recreate the PullSubscription to change it",
            ));
        }
    };

    immutable(
        "spec.project",
        old.project.is_some() && old.project != new.project,
    );
    immutable("spec.topic", old.topic != new.topic);

    let (old_secret, new_secret) = (old.effective_secret(), new.effective_secret());
    immutable("spec.secret.name", old_secret.name != new_secret.name);
    immutable("spec.secret.key", old_secret.key != new_secret.key);

    let old_ref = old.sink.reference.as_ref();
    let new_ref = new.sink.reference.as_ref();
    immutable(
        "spec.sink.ref.apiVersion",
        old_ref.map(|r| &r.api_version) != new_ref.map(|r| &r.api_version),
    );
    immutable(
        "spec.sink.ref.kind",
        old_ref.map(|r| &r.kind) != new_ref.map(|r| &r.kind),
    );
    immutable(
        "spec.sink.ref.namespace",
        old_ref.map(|r| &r.namespace) != new_ref.map(|r| &r.namespace),
    );
    immutable(
        "spec.sink.ref.name",
        old_ref.map(|r| &r.name) != new_ref.map(|r| &r.name),
    );
    immutable("spec.sink.uri", old.sink.uri != new.sink.uri);

    immutable(
        "spec.serviceAccountName",
        old.service_account_name.is_some()
            && old.service_account_name != new.service_account_name,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Observed state of a PullSubscription
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullSubscriptionStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Last generation reconciled without error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<String>,

    /// Name of the Pub/Sub subscription once it exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,

    /// Project the subscription lives in, as reported by the executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl PullSubscription {
    /// Mutable status, created empty when absent
    pub fn status_mut(&mut self) -> &mut PullSubscriptionStatus {
        self.status.get_or_insert_with(Default::default)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
