//! Controller configuration
//!
//! Built once from the command line in `main.rs` and handed to every
//! reconcile through the shared context. Nothing here is mutated at runtime.

use std::time::Duration;

use clap::ValueEnum;

use crate::ops::JobExecutorConfig;

/// Field manager used for every write the controller makes
pub const FIELD_MANAGER: &str = "pubsub-k8s-controller";

/// How operations against Pub/Sub are executed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExecutorMode {
    /// Call Pub/Sub directly from the controller
    #[default]
    Inline,
    /// Run each operation in a Kubernetes Job with the owner's credentials
    Job,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Requeue interval once a subscription is ready
    pub resync_interval: Duration,
    /// Requeue interval while an operation is in flight
    pub poll_interval: Duration,
    /// Image of the receive adapter Deployment
    pub receive_adapter_image: String,
    pub executor: ExecutorMode,
    pub job: JobExecutorConfig,
    /// Restrict the watch to one namespace
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            receive_adapter_image: "ghcr.io/pubsub-k8s/receive-adapter:latest".to_string(),
            executor: ExecutorMode::default(),
            job: JobExecutorConfig::default(),
            watch_namespace: None,
        }
    }
}
