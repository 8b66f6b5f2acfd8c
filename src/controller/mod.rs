//! Controller module for PullSubscription reconciliation
//! This module contains the main controller loop, reconciliation logic,
//! subscription provisioning and the resources owned by a PullSubscription.

pub mod conditions;
mod finalizers;
mod kube_ops;
pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod provisioning;
mod reconciler;
pub mod resources;
mod sink;

pub use finalizers::{
    ensure_secret_guard, release_secret_guard, PULL_SUBSCRIPTION_FINALIZER, SECRET_FINALIZER,
};
pub use kube_ops::{status_patch, EventRecord, EventType, KubeClientOps, KubeOps};
pub use provisioning::{ensure_subscription_created, ensure_subscription_deleted};
pub use reconciler::{error_policy, reconcile, run_controller, Context, CONTROLLER_NAME};
pub use sink::{join_uri, service_url, KubeSinkResolver, SinkResolver};
