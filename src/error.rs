//! Error types for the PullSubscription controller

use thiserror::Error;

/// Errors surfaced by reconciliation, provisioning and the ops entrypoint
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP transport error talking to Pub/Sub or the metadata server
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error (credentials file, termination message)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The Pub/Sub API rejected a request
    #[error("Pub/Sub API error ({status}): {message}")]
    PubSubApi { status: u16, message: String },

    /// Invalid operator or job configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The declared spec failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The sink reference could not be resolved to a URI
    #[error("Sink resolution failed: {0}")]
    SinkResolution(String),

    /// The sink exists but is not addressable yet
    #[error("Sink not ready: {0}")]
    SinkNotReady(String),

    /// A subscription cannot be provisioned because its topic is missing
    #[error("Topic {topic} does not exist in project {project}")]
    TopicNotFound { project: String, topic: String },

    /// An executor submission ended in a non-successful outcome
    #[error("{action} operation {outcome}: {message}")]
    Operation {
        action: String,
        outcome: String,
        message: String,
    },

    /// Optimistic concurrency retries were exhausted
    #[error("Conflict updating {0}")]
    Conflict(String),

    /// The reconcile pass was interrupted by shutdown
    #[error("Reconcile cancelled")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error is worth a fast retry
    ///
    /// Configuration and validation errors still requeue, just slower:
    /// the controller has no permanent-failure state.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::HttpError(_)
            | Error::IoError(_)
            | Error::Conflict(_)
            | Error::Operation { .. }
            | Error::SinkNotReady(_)
            | Error::Cancelled => true,
            Error::PubSubApi { status, .. } => *status == 429 || *status >= 500,
            Error::SerializationError(_)
            | Error::ConfigError(_)
            | Error::ValidationError(_)
            | Error::SinkResolution(_)
            | Error::TopicNotFound { .. } => false,
        }
    }

    /// Whether this is an optimistic-concurrency conflict (HTTP 409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
    }

    /// Whether this is a Kubernetes "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }

    /// Short category used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::HttpError(_) | Error::PubSubApi { .. } => "pubsub",
            Error::SerializationError(_) | Error::IoError(_) => "io",
            Error::ConfigError(_) | Error::ValidationError(_) => "validation",
            Error::SinkResolution(_) | Error::SinkNotReady(_) => "sink",
            Error::TopicNotFound { .. } | Error::Operation { .. } => "operation",
            Error::Conflict(_) => "conflict",
            Error::Cancelled => "cancelled",
        }
    }
}
