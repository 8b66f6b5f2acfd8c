//! Pub/Sub subscription provisioning
//!
//! Drives the executor through `exists` → `create` and `delete`, folding
//! each outcome into the owner's conditions. Nothing here waits on an
//! operation: an in-flight submission is reported as
//! [`JobOutcome::Created`] and observed again on the next pass.

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::reconciler::Context;
use super::resources::subscription_name;
use crate::crd::{ConditionType, PullSubscription, PullSubscriptionStatus};
use crate::error::{Error, Result};
use crate::ops::{JobOutcome, JobOwner, OpAction, OpRequest, OpTarget, OperationJob, Submission};
use crate::pubsub::SubscriptionConfig;

pub const REASON_SUBSCRIPTION_CHECKING: &str = "SubscriptionChecking";
pub const REASON_SUBSCRIPTION_CREATING: &str = "SubscriptionCreating";
pub const REASON_SUBSCRIPTION_DELETING: &str = "SubscriptionDeleting";
pub const REASON_TOPIC_NOT_FOUND: &str = "TopicNotFound";
pub const REASON_CREATE_FAILED: &str = "SubscriptionCreateFailed";
pub const REASON_DELETE_FAILED: &str = "SubscriptionDeleteFailed";

/// Settings the controller owns on the subscription
pub fn subscription_config(ps: &PullSubscription) -> Result<SubscriptionConfig> {
    Ok(SubscriptionConfig {
        ack_deadline: ps.spec.ack_deadline().map_err(Error::ValidationError)?,
        retain_acked_messages: ps.spec.retain_acked_messages,
        retention_duration: ps.spec.retention_duration().map_err(Error::ValidationError)?,
    })
}

/// Project to operate in: declared, then previously discovered
fn project_of(ps: &PullSubscription, status: &PullSubscriptionStatus) -> Option<String> {
    ps.spec
        .project
        .clone()
        .or_else(|| status.project_id.clone())
}

/// Build the job for one operation on behalf of `ps`
pub fn operation_job(
    ps: &PullSubscription,
    status: &PullSubscriptionStatus,
    action: OpAction,
    target: OpTarget,
) -> Result<OperationJob> {
    Ok(OperationJob {
        request: OpRequest {
            action,
            target,
            project: project_of(ps, status),
            topic: ps.spec.topic.clone(),
            subscription: subscription_name(ps),
            config: subscription_config(ps)?,
        },
        owner: JobOwner::from_subscription(ps),
        secret: ps.spec.effective_secret(),
        service_account: ps.spec.service_account_name.clone(),
    })
}

async fn submit(ctx: &Context, job: &OperationJob) -> Submission {
    let submission = ctx.executor.submit(job).await;
    debug!(
        action = %job.request.action,
        resource = %job.request.target,
        outcome = %submission.outcome,
        "Operation submitted"
    );
    #[cfg(feature = "metrics")]
    super::metrics::observe_executor_outcome(
        job.request.action.as_str(),
        submission.outcome.as_str(),
    );
    submission
}

fn operation_error(job: &OperationJob, submission: &Submission) -> Error {
    Error::Operation {
        action: format!("{} {}", job.request.action, job.request.target),
        outcome: submission.outcome.to_string(),
        message: submission.message(),
    }
}

/// Mark the subscription in progress without regressing one already in place
fn mark_in_progress(status: &mut PullSubscriptionStatus, name: &str, reason: &str, message: &str) {
    let subscribed = status.subscription_id.as_deref() == Some(name)
        && status
            .get_condition(ConditionType::Subscribed)
            .map(|c| c.is_true())
            .unwrap_or(false);
    if !subscribed {
        status.mark_subscription_unknown(reason, message);
    }
}

/// Make sure the subscription exists with the declared settings
///
/// Returns `CompleteSuccessful` once the subscription is confirmed, or
/// `Created` while an operation is still in flight. Failures that leave
/// external state unknown return an error without touching the status.
#[instrument(skip(ctx, ps, status), fields(name = %ps.name_any(), namespace = ps.namespace()))]
pub async fn ensure_subscription_created(
    ctx: &Context,
    ps: &PullSubscription,
    status: &mut PullSubscriptionStatus,
) -> Result<JobOutcome> {
    let name = subscription_name(ps);

    let exists_job = operation_job(ps, status, OpAction::Exists, OpTarget::Subscription)?;
    let exists = submit(ctx, &exists_job).await;
    match exists.outcome {
        JobOutcome::CompleteSuccessful => {}
        JobOutcome::Created => {
            mark_in_progress(
                status,
                &name,
                REASON_SUBSCRIPTION_CHECKING,
                "Checking whether the subscription exists",
            );
            return Ok(JobOutcome::Created);
        }
        _ => return Err(operation_error(&exists_job, &exists)),
    }
    if let Some(project) = exists.result.as_ref().and_then(|r| r.project_id.clone()) {
        status.project_id = Some(project);
    }

    let subscription_exists = exists.result.as_ref().and_then(|r| r.exists).unwrap_or(false);
    if !subscription_exists {
        let topic_job = operation_job(ps, status, OpAction::Exists, OpTarget::Topic)?;
        let topic = submit(ctx, &topic_job).await;
        match topic.outcome {
            JobOutcome::CompleteSuccessful => {}
            JobOutcome::Created => {
                mark_in_progress(
                    status,
                    &name,
                    REASON_SUBSCRIPTION_CHECKING,
                    "Checking whether the topic exists",
                );
                return Ok(JobOutcome::Created);
            }
            _ => return Err(operation_error(&topic_job, &topic)),
        }

        if !topic.result.as_ref().and_then(|r| r.exists).unwrap_or(false) {
            let project = topic
                .result
                .as_ref()
                .and_then(|r| r.project_id.clone())
                .or_else(|| project_of(ps, status))
                .unwrap_or_default();
            let err = Error::TopicNotFound {
                project,
                topic: ps.spec.topic.clone(),
            };
            warn!("{}", err);
            status.mark_no_subscription(REASON_TOPIC_NOT_FOUND, &err.to_string());
            return Err(err);
        }
    }

    let create_job = operation_job(ps, status, OpAction::Create, OpTarget::Subscription)?;
    let created = submit(ctx, &create_job).await;
    match created.outcome {
        JobOutcome::CompleteSuccessful => {
            if let Some(project) = created.result.as_ref().and_then(|r| r.project_id.clone()) {
                status.project_id = Some(project);
            }
            if status.subscription_id.as_deref() != Some(name.as_str()) {
                info!(subscription = %name, "Subscription provisioned");
            }
            status.mark_subscribed(&name);
            Ok(JobOutcome::CompleteSuccessful)
        }
        JobOutcome::Created => {
            mark_in_progress(
                status,
                &name,
                REASON_SUBSCRIPTION_CREATING,
                "Creating the Pub/Sub subscription",
            );
            Ok(JobOutcome::Created)
        }
        JobOutcome::CreateFailed | JobOutcome::CompleteFailed => {
            let err = operation_error(&create_job, &created);
            status.mark_no_subscription(REASON_CREATE_FAILED, &created.message());
            Err(err)
        }
        JobOutcome::GetFailed => Err(operation_error(&create_job, &created)),
    }
}

/// Make sure the subscription is gone
///
/// An already absent subscription counts as deleted.
#[instrument(skip(ctx, ps, status), fields(name = %ps.name_any(), namespace = ps.namespace()))]
pub async fn ensure_subscription_deleted(
    ctx: &Context,
    ps: &PullSubscription,
    status: &mut PullSubscriptionStatus,
) -> Result<JobOutcome> {
    let job = operation_job(ps, status, OpAction::Delete, OpTarget::Subscription)?;
    let deleted = submit(ctx, &job).await;
    match deleted.outcome {
        JobOutcome::CompleteSuccessful => {
            info!(subscription = %job.request.subscription, "Subscription deprovisioned");
            status.subscription_id = None;
            Ok(JobOutcome::CompleteSuccessful)
        }
        JobOutcome::Created => {
            status.mark_subscription_unknown(
                REASON_SUBSCRIPTION_DELETING,
                "Deleting the Pub/Sub subscription",
            );
            Ok(JobOutcome::Created)
        }
        JobOutcome::CreateFailed | JobOutcome::CompleteFailed => {
            let err = operation_error(&job, &deleted);
            status.mark_no_subscription(REASON_DELETE_FAILED, &deleted.message());
            Err(err)
        }
        JobOutcome::GetFailed => Err(operation_error(&job, &deleted)),
    }
}
