//! Shared types used by the PullSubscription CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default name of the secret holding Pub/Sub credentials
pub const DEFAULT_SECRET_NAME: &str = "google-cloud-key";

/// Default key inside the credentials secret
pub const DEFAULT_SECRET_KEY: &str = "key.json";

/// Reference to a key within a Secret in the owner's namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the Secret
    pub name: String,
    /// Key within the Secret holding the credential
    pub key: String,
}

impl Default for SecretKeySelector {
    fn default() -> Self {
        Self {
            name: DEFAULT_SECRET_NAME.to_string(),
            key: DEFAULT_SECRET_KEY.to_string(),
        }
    }
}

/// Reference to an addressable Kubernetes object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KReference {
    pub api_version: String,
    pub kind: String,
    /// Defaults to the owner's namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// Delivery destination: an object reference, a URI, or a URI relative to the reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<KReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Destination {
    /// True when the destination points at an eventing Broker
    pub fn is_broker(&self) -> bool {
        self.reference
            .as_ref()
            .map(|r| r.kind == "Broker")
            .unwrap_or(false)
    }
}

/// How the receive adapter encodes events sent to the sink
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ModeType {
    #[default]
    CloudEventsBinary,
    CloudEventsStructured,
    PushCompatible,
}

impl std::fmt::Display for ModeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeType::CloudEventsBinary => write!(f, "CloudEventsBinary"),
            ModeType::CloudEventsStructured => write!(f, "CloudEventsStructured"),
            ModeType::PushCompatible => write!(f, "PushCompatible"),
        }
    }
}

/// Closed set of condition types tracked on a PullSubscription
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Aggregate of the dependent conditions
    Ready,
    /// The sink resolved to a concrete URI
    SinkProvided,
    /// The external subscription exists and matches the spec
    Subscribed,
    /// The receive adapter is deployed and available
    Deployed,
    /// Event types were registered with the sink broker
    EventTypesProvided,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::SinkProvided => "SinkProvided",
            ConditionType::Subscribed => "Subscribed",
            ConditionType::Deployed => "Deployed",
            ConditionType::EventTypesProvided => "EventTypesProvided",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How much a non-True condition matters; `Error` is the default and is not serialized
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    #[default]
    Error,
    Warning,
    Info,
}

impl ConditionSeverity {
    pub fn is_error(&self) -> bool {
        *self == ConditionSeverity::Error
    }
}

/// Status condition following Kubernetes API conventions
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    /// Last time the condition's status changed (RFC 3339)
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "ConditionSeverity::is_error")]
    pub severity: ConditionSeverity,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }
}
