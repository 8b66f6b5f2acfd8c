//! Cloud Pub/Sub admin client
//!
//! The controller only needs the admin surface: topic and subscription
//! lifecycle. Message flow belongs to the receive adapter.

mod auth;
mod rest;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use auth::TokenSource;
pub use rest::{PubSubRestClient, DEFAULT_ENDPOINT, EMULATOR_HOST_ENV};

/// A Pub/Sub topic as returned by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Fully qualified name, `projects/<p>/topics/<t>`
    pub name: String,
}

/// A Pub/Sub subscription as returned by the API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Fully qualified name, `projects/<p>/subscriptions/<s>`
    #[serde(default)]
    pub name: String,
    /// Fully qualified topic name
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub ack_deadline_seconds: i64,
    #[serde(default)]
    pub retain_acked_messages: bool,
    /// Protobuf duration string, e.g. "604800s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_retention_duration: Option<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,
}

/// Settings the controller owns on a subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub ack_deadline: Duration,
    pub retain_acked_messages: bool,
    pub retention_duration: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            ack_deadline: crate::crd::DEFAULT_ACK_DEADLINE,
            retain_acked_messages: false,
            retention_duration: crate::crd::DEFAULT_RETENTION_DURATION,
        }
    }
}

impl SubscriptionConfig {
    /// Build the API body for a new subscription on `topic_path`
    pub fn to_subscription(&self, name: &str, topic_path: &str) -> Subscription {
        Subscription {
            name: name.to_string(),
            topic: topic_path.to_string(),
            ack_deadline_seconds: self.ack_deadline.as_secs() as i64,
            retain_acked_messages: self.retain_acked_messages,
            message_retention_duration: Some(to_proto_duration(self.retention_duration)),
            labels: Default::default(),
        }
    }

    /// Field mask of the settings that drifted on a live subscription
    ///
    /// Labels and the topic are not compared: labels are not ours and the
    /// topic is only used at creation.
    pub fn drift(&self, live: &Subscription) -> Vec<&'static str> {
        let mut mask = Vec::new();
        if live.ack_deadline_seconds != self.ack_deadline.as_secs() as i64 {
            mask.push("ackDeadlineSeconds");
        }
        if live.retain_acked_messages != self.retain_acked_messages {
            mask.push("retainAckedMessages");
        }
        let live_retention = live
            .message_retention_duration
            .as_deref()
            .and_then(parse_proto_duration);
        if live_retention != Some(self.retention_duration) {
            mask.push("messageRetentionDuration");
        }
        mask
    }
}

/// Admin operations against Pub/Sub
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Project to use when the caller does not name one
    async fn default_project(&self) -> Result<String>;

    async fn get_topic(&self, project: &str, topic: &str) -> Result<Option<Topic>>;

    /// Create a topic; an already existing topic is not an error
    async fn create_topic(&self, project: &str, topic: &str) -> Result<Topic>;

    /// Delete a topic; a missing topic is not an error
    async fn delete_topic(&self, project: &str, topic: &str) -> Result<()>;

    async fn get_subscription(
        &self,
        project: &str,
        subscription: &str,
    ) -> Result<Option<Subscription>>;

    async fn create_subscription(
        &self,
        project: &str,
        subscription: &str,
        topic: &str,
        config: &SubscriptionConfig,
    ) -> Result<Subscription>;

    /// Patch the fields named in `mask`
    async fn update_subscription(
        &self,
        project: &str,
        subscription: &str,
        config: &SubscriptionConfig,
        mask: &[&str],
    ) -> Result<Subscription>;

    /// Delete a subscription; a missing subscription is not an error
    async fn delete_subscription(&self, project: &str, subscription: &str) -> Result<()>;
}

pub fn topic_path(project: &str, topic: &str) -> String {
    format!("projects/{project}/topics/{topic}")
}

pub fn subscription_path(project: &str, subscription: &str) -> String {
    format!("projects/{project}/subscriptions/{subscription}")
}

/// Encode a duration the way protobuf JSON does ("604800s", "1.5s")
pub fn to_proto_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        let s = format!("{}.{:09}", duration.as_secs(), duration.subsec_nanos());
        format!("{}s", s.trim_end_matches('0'))
    }
}

/// Decode a protobuf JSON duration
pub fn parse_proto_duration(value: &str) -> Option<Duration> {
    let number = value.strip_suffix('s')?;
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let secs: u64 = whole.parse().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<9}");
        padded.get(..9)?.parse().ok()?
    };
    Some(Duration::new(secs, nanos))
}
