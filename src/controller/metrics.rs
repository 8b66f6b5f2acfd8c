//! Prometheus metrics for the PullSubscription controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `pubsub_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `pubsub_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `pubsub_executor_outcomes_total` (counter): executor submissions labeled by action and outcome.
//! - `pubsub_write_backs_total` (counter): status/finalizer write-backs labeled by target and result.
//! - `pubsub_subscription_ready` (gauge): 1 when a PullSubscription is Ready, labeled by namespace/name.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "pullsubscription"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "pubsub", "sink"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExecutorLabels {
    pub action: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteBackLabels {
    /// "status" or "finalizers"
    pub target: String,
    /// "written", "skipped" or "failed"
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SubscriptionLabels {
    pub namespace: String,
    pub name: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking executor outcomes
pub static EXECUTOR_OUTCOMES_TOTAL: Lazy<Family<ExecutorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking write-backs performed and avoided
pub static WRITE_BACKS_TOTAL: Lazy<Family<WriteBackLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static SUBSCRIPTION_READY: Lazy<Family<SubscriptionLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "pubsub_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "pubsub_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "pubsub_executor_outcomes_total",
        "Operations submitted to the executor by outcome",
        EXECUTOR_OUTCOMES_TOTAL.clone(),
    );
    registry.register(
        "pubsub_write_backs_total",
        "Status and finalizer write-backs by result",
        WRITE_BACKS_TOTAL.clone(),
    );
    registry.register(
        "pubsub_subscription_ready",
        "Whether the PullSubscription is Ready (1) or not (0)",
        SUBSCRIPTION_READY.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn observe_executor_outcome(action: &str, outcome: &str) {
    let labels = ExecutorLabels {
        action: action.to_string(),
        outcome: outcome.to_string(),
    };
    EXECUTOR_OUTCOMES_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_write_back(target: &str, result: &str) {
    let labels = WriteBackLabels {
        target: target.to_string(),
        result: result.to_string(),
    };
    WRITE_BACKS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_subscription_ready(namespace: &str, name: &str, ready: bool) {
    let labels = SubscriptionLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    SUBSCRIPTION_READY
        .get_or_create(&labels)
        .set(i64::from(ready));
}

/// Drop the series of a PullSubscription that is gone
pub fn remove_subscription(namespace: &str, name: &str) {
    let labels = SubscriptionLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    SUBSCRIPTION_READY.remove(&labels);
}
