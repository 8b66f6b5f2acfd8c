//! Main reconciler for PullSubscription resources
//!
//! Implements the controller pattern using kube-rs runtime. Each pass works
//! on a copy of the newest PullSubscription and writes back status and
//! finalizers only when they changed.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::finalizers::{
    ensure_secret_guard, has_finalizer, release_secret_guard, with_finalizer, without_finalizer,
    PULL_SUBSCRIPTION_FINALIZER,
};
use super::kube_ops::{EventRecord, KubeClientOps, KubeOps};
use super::provisioning::{ensure_subscription_created, ensure_subscription_deleted};
use super::resources::{make_event_type, make_receive_adapter, subscription_name, ReceiveAdapterArgs};
use super::sink::{KubeSinkResolver, SinkResolver};
use crate::config::{ControllerConfig, ExecutorMode};
use crate::crd::{format_validation_errors, PullSubscription, PullSubscriptionStatus};
use crate::error::{Error, Result};
use crate::ops::{JobOutcome, OperationExecutor};

pub const CONTROLLER_NAME: &str = "pullsubscription";

pub const REASON_READY: &str = "PullSubscriptionReady";
pub const REASON_FINALIZED: &str = "PullSubscriptionFinalized";
pub const REASON_INTERNAL_ERROR: &str = "InternalError";

pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_SINK_NOT_READY: &str = "SinkNotReady";
pub const REASON_INVALID_SINK: &str = "InvalidSink";
pub const REASON_DEPLOYMENT_FAILED: &str = "DeploymentApplyFailed";
pub const REASON_SINK_NOT_BROKER: &str = "SinkNotBroker";
pub const REASON_EVENT_TYPE_FAILED: &str = "EventTypeApplyFailed";

/// Shared state for every reconcile
pub struct Context {
    pub kube: Arc<dyn KubeOps>,
    pub sinks: Arc<dyn SinkResolver>,
    pub executor: Arc<dyn OperationExecutor>,
    pub config: ControllerConfig,
    /// Flips to `true` when the controller is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl Context {
    pub fn new(
        client: Client,
        executor: Arc<dyn OperationExecutor>,
        config: ControllerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            kube: Arc::new(KubeClientOps::new(client.clone())),
            sinks: Arc::new(KubeSinkResolver::new(client)),
            executor,
            config,
            shutdown,
        }
    }
}

/// Main entry point to start the controller
///
/// Runs until `shutdown` resolves, letting in-flight reconciles finish.
pub async fn run_controller(
    client: Client,
    ctx: Arc<Context>,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) -> Result<()> {
    let subscriptions: Api<PullSubscription> = match &ctx.config.watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!("Starting PullSubscription controller");

    // Verify CRD exists
    match subscriptions.list(&Default::default()).await {
        Ok(_) => info!("PullSubscription CRD is available"),
        Err(e) => {
            error!(
                "PullSubscription CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "PullSubscription CRD not installed".to_string(),
            ));
        }
    }

    let mut controller = Controller::new(subscriptions, Config::default())
        .owns::<Deployment>(Api::all(client.clone()), Config::default());
    if ctx.config.executor == ExecutorMode::Job {
        controller = controller.owns::<Job>(Api::all(client.clone()), Config::default());
    }

    controller
        .graceful_shutdown_on(shutdown)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("PullSubscription controller stopped");
    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A PullSubscription is created, updated, or deleted
/// - An owned receive adapter Deployment or operation Job changes
/// - The requeue timer expires
///
/// The triggering object may be stale, so only its key is used.
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
pub async fn reconcile(obj: Arc<PullSubscription>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();
    let start = Instant::now();

    let result = reconcile_key(&ctx, &namespace, &name).await;

    #[cfg(feature = "metrics")]
    {
        super::metrics::observe_reconcile_duration_seconds(
            CONTROLLER_NAME,
            start.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            super::metrics::inc_reconcile_error(CONTROLLER_NAME, e.kind());
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = start;

    result
}

/// Resolves once shutdown is requested
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        // Sender gone without a shutdown request: never cancel
        std::future::pending::<()>().await;
    }
}

async fn reconcile_key(ctx: &Context, namespace: &str, name: &str) -> Result<Action> {
    let Some(original) = ctx.kube.get_subscription(namespace, name).await? else {
        debug!("PullSubscription {}/{} is gone", namespace, name);
        #[cfg(feature = "metrics")]
        super::metrics::remove_subscription(namespace, name);
        return Ok(Action::await_change());
    };

    info!(
        "Reconciling PullSubscription {}/{} (topic: {})",
        namespace, name, original.spec.topic
    );

    let mut working = original.clone();
    working.status_mut().initialize_conditions();

    let mut shutdown = ctx.shutdown.clone();
    let outcome = tokio::select! {
        biased;
        _ = cancelled(&mut shutdown) => {
            info!("Reconcile of {}/{} cancelled, skipping write-backs", namespace, name);
            return Err(Error::Cancelled);
        }
        res = reconcile_kind(ctx, &mut working) => res,
    };

    if outcome.is_ok() {
        working.status_mut().observed_generation = working.metadata.generation;
    }

    if let Err(e) = &outcome {
        publish(ctx, &working, EventRecord::warning(REASON_INTERNAL_ERROR, e.to_string())).await;
    }

    let written = persist(ctx, &original, &working).await;

    let was_ready = original.status.as_ref().map(|s| s.is_ready()).unwrap_or(false);
    let is_ready = working.status.as_ref().map(|s| s.is_ready()).unwrap_or(false);
    if is_ready && !was_ready && written.is_ok() {
        publish(
            ctx,
            &working,
            EventRecord::normal(REASON_READY, format!("PullSubscription {name} is ready")),
        )
        .await;
    }
    if has_finalizer(original.finalizers(), PULL_SUBSCRIPTION_FINALIZER)
        && !has_finalizer(working.finalizers(), PULL_SUBSCRIPTION_FINALIZER)
        && written.is_ok()
    {
        publish(
            ctx,
            &working,
            EventRecord::normal(
                REASON_FINALIZED,
                format!("PullSubscription {name} was finalized"),
            ),
        )
        .await;
    }

    #[cfg(feature = "metrics")]
    {
        if working.is_being_deleted() {
            super::metrics::remove_subscription(namespace, name);
        } else {
            super::metrics::set_subscription_ready(namespace, name, is_ready);
        }
    }

    match (outcome, written) {
        (Ok(action), Ok(())) => Ok(action),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(write_err)) => {
            warn!("Write-back after failed reconcile also failed: {}", write_err);
            Err(e)
        }
    }
}

async fn publish(ctx: &Context, ps: &PullSubscription, event: EventRecord) {
    if let Err(e) = ctx.kube.publish_event(ps, &event).await {
        warn!("Failed to publish {} event: {}", event.reason, e);
    }
}

/// Write back status, then finalizers, each only when it changed
///
/// The status write comes first so a finalizer removal that lets the object
/// go is always the last write.
async fn persist(
    ctx: &Context,
    original: &PullSubscription,
    working: &PullSubscription,
) -> Result<()> {
    let mut current = original.clone();

    match &working.status {
        Some(status) if original.status.as_ref() != Some(status) => {
            let updated = write_back("status", ctx.kube.update_status(&current, status)).await?;
            current.metadata.resource_version = updated.metadata.resource_version;
        }
        _ => skipped("status"),
    }

    if original.finalizers() != working.finalizers() {
        write_back(
            "finalizers",
            ctx.kube.patch_finalizers(&current, working.finalizers()),
        )
        .await?;
    } else {
        skipped("finalizers");
    }
    Ok(())
}

async fn write_back<T>(target: &str, write: impl Future<Output = Result<T>>) -> Result<T> {
    let result = write.await;
    match &result {
        Ok(_) => debug!("Wrote {}", target),
        Err(e) => warn!("Failed to write {}: {}", target, e),
    }
    #[cfg(feature = "metrics")]
    super::metrics::inc_write_back(target, if result.is_ok() { "written" } else { "failed" });
    result
}

fn skipped(target: &str) {
    debug!("{} unchanged, skipping write", target);
    #[cfg(feature = "metrics")]
    super::metrics::inc_write_back(target, "skipped");
}

async fn reconcile_kind(ctx: &Context, ps: &mut PullSubscription) -> Result<Action> {
    let mut status = ps.status.take().unwrap_or_default();
    let result = if ps.is_being_deleted() {
        finalize(ctx, ps, &mut status).await
    } else {
        apply(ctx, ps, &mut status).await
    };
    ps.status = Some(status);
    result
}

/// Drive a live PullSubscription towards Ready
#[instrument(skip(ctx, ps, status), fields(name = %ps.name_any(), namespace = ps.namespace()))]
async fn apply(
    ctx: &Context,
    ps: &mut PullSubscription,
    status: &mut PullSubscriptionStatus,
) -> Result<Action> {
    let namespace = ps.namespace().unwrap_or_else(|| "default".to_string());

    if let Err(errors) = ps.spec.validate() {
        let message = format_validation_errors(&errors);
        status.mark_no_subscription(REASON_INVALID_SPEC, &message);
        return Err(Error::ValidationError(message));
    }

    // 1. Sink
    let sink_uri = match ctx.sinks.resolve(&ps.spec.sink, &namespace).await {
        Ok(uri) => {
            status.mark_sink(&uri);
            uri
        }
        Err(e) if e.is_retriable() => {
            status.mark_sink_unknown(REASON_SINK_NOT_READY, &e.to_string());
            return Err(e);
        }
        Err(e) => {
            status.mark_no_sink(REASON_INVALID_SINK, &e.to_string());
            return Err(e);
        }
    };

    // 2. Finalizers go on before anything is provisioned
    if !has_finalizer(ps.finalizers(), PULL_SUBSCRIPTION_FINALIZER) {
        ps.metadata.finalizers = Some(with_finalizer(ps.finalizers(), PULL_SUBSCRIPTION_FINALIZER));
    }
    ensure_secret_guard(ctx.kube.as_ref(), ps).await?;

    // 3. Subscription
    if ensure_subscription_created(ctx, ps, status).await? != JobOutcome::CompleteSuccessful {
        debug!("Subscription operation in flight, checking again shortly");
        return Ok(Action::requeue(ctx.config.poll_interval));
    }

    // 4. Receive adapter
    let project = status
        .project_id
        .clone()
        .or_else(|| ps.spec.project.clone())
        .unwrap_or_default();
    let args = ReceiveAdapterArgs {
        image: ctx.config.receive_adapter_image.clone(),
        project: project.clone(),
        subscription_id: status
            .subscription_id
            .clone()
            .unwrap_or_else(|| subscription_name(ps)),
        sink_uri,
    };
    match ctx
        .kube
        .apply_receive_adapter(&make_receive_adapter(ps, &args))
        .await
    {
        Ok(live) => status.propagate_deployment_availability(&live),
        Err(e) => {
            status.mark_not_deployed(REASON_DEPLOYMENT_FAILED, &e.to_string());
            return Err(e);
        }
    }

    // 5. EventTypes, informational only
    match make_event_type(ps, &project) {
        None => status.mark_no_event_types(
            REASON_SINK_NOT_BROKER,
            "EventTypes are only provided for Broker sinks",
        ),
        Some(event_type) => match ctx.kube.apply_event_type(&event_type).await {
            Ok(()) => status.mark_event_types(),
            Err(e) => {
                warn!("Failed to apply EventType for {}: {}", ps.name_any(), e);
                status.mark_no_event_types(REASON_EVENT_TYPE_FAILED, &e.to_string());
            }
        },
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Deprovision a PullSubscription marked for deletion
///
/// The finalizer stays on until the subscription is confirmed gone.
#[instrument(skip(ctx, ps, status), fields(name = %ps.name_any(), namespace = ps.namespace()))]
async fn finalize(
    ctx: &Context,
    ps: &mut PullSubscription,
    status: &mut PullSubscriptionStatus,
) -> Result<Action> {
    if !has_finalizer(ps.finalizers(), PULL_SUBSCRIPTION_FINALIZER) {
        return Ok(Action::await_change());
    }

    info!("Cleaning up PullSubscription: {}", ps.name_any());

    if ensure_subscription_deleted(ctx, ps, status).await? != JobOutcome::CompleteSuccessful {
        return Ok(Action::requeue(ctx.config.poll_interval));
    }

    release_secret_guard(ctx.kube.as_ref(), ps).await?;
    ps.metadata.finalizers = Some(without_finalizer(ps.finalizers(), PULL_SUBSCRIPTION_FINALIZER));

    info!("Cleanup complete for PullSubscription: {}", ps.name_any());
    Ok(Action::await_change())
}

/// Error policy determines how to handle reconciliation errors
pub fn error_policy(ps: Arc<PullSubscription>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!("Reconciliation error for {}: {:?}", ps.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
