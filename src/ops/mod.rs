//! External operation executor
//!
//! An operation is a single idempotent `exists`/`create`/`delete` against
//! Pub/Sub. The controller submits an [`OperationJob`] and gets back a
//! [`JobOutcome`]; it never waits on an operation. Work that is still in
//! flight reports [`JobOutcome::Created`] and is observed again on a later
//! reconcile.

mod env;
mod inline;
mod job;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crd::{PullSubscription, SecretKeySelector};
use crate::error::{Error, Result};
use crate::pubsub::{PubSubClient, SubscriptionConfig};

pub use env::{
    ACK_DEADLINE_ENV, ACTION_ENV, PROJECT_ID_ENV, RESOURCE_ENV, RETAIN_ACKED_MESSAGES_ENV,
    RETENTION_DURATION_ENV, SUBSCRIPTION_ID_ENV, TERMINATION_MESSAGE_PATH_ENV, TOPIC_ID_ENV,
};
pub use inline::InlineExecutor;
pub use job::{
    build_job, job_name, job_state, termination_result, JobApi, JobExecutor, JobExecutorConfig,
    JobState, KubeJobApi, CREDENTIALS_MOUNT_PATH, DEFAULT_TERMINATION_MESSAGE_PATH,
};

/// What an operation does
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpAction {
    Exists,
    Create,
    Delete,
}

impl OpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpAction::Exists => "exists",
            OpAction::Create => "create",
            OpAction::Delete => "delete",
        }
    }
}

impl fmt::Display for OpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpAction {
    type Err = Error;

    /// Unknown actions are a configuration error, never retried
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exists" => Ok(OpAction::Exists),
            "create" => Ok(OpAction::Create),
            "delete" => Ok(OpAction::Delete),
            other => Err(Error::ConfigError(format!("unknown action {other:?}"))),
        }
    }
}

/// What an operation acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpTarget {
    Topic,
    Subscription,
}

impl OpTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpTarget::Topic => "topic",
            OpTarget::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "topic" => Ok(OpTarget::Topic),
            "subscription" => Ok(OpTarget::Subscription),
            other => Err(Error::ConfigError(format!("unknown resource {other:?}"))),
        }
    }
}

/// The Pub/Sub side of an operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpRequest {
    pub action: OpAction,
    pub target: OpTarget,
    /// Discovered from the environment when `None`
    pub project: Option<String>,
    pub topic: String,
    pub subscription: String,
    pub config: SubscriptionConfig,
}

/// The resource an operation is run on behalf of
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOwner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl JobOwner {
    pub fn from_subscription(ps: &PullSubscription) -> Self {
        Self {
            api_version: PullSubscription::api_version(&()).to_string(),
            kind: PullSubscription::kind(&()).to_string(),
            name: ps.name_any(),
            namespace: ps.namespace().unwrap_or_else(|| "default".to_string()),
            uid: ps.metadata.uid.clone().unwrap_or_default(),
        }
    }

    /// Owner reference for garbage collection of anything created for this owner
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// A unit of work handed to an [`OperationExecutor`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationJob {
    pub request: OpRequest,
    pub owner: JobOwner,
    /// Credentials the out-of-process form mounts
    pub secret: SecretKeySelector,
    pub service_account: Option<String>,
}

/// Lifecycle outcome of a submission
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    /// Accepted and still in flight
    Created,
    /// Current state could not be determined
    GetFailed,
    /// The operation could not be started
    CreateFailed,
    CompleteSuccessful,
    CompleteFailed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Created => "Created",
            JobOutcome::GetFailed => "GetFailed",
            JobOutcome::CreateFailed => "CreateFailed",
            JobOutcome::CompleteSuccessful => "CompleteSuccessful",
            JobOutcome::CompleteFailed => "CompleteFailed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobOutcome::GetFailed | JobOutcome::CreateFailed | JobOutcome::CompleteFailed
        )
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload an operation reports when it terminates
///
/// The out-of-process form writes this as JSON to its termination message.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Set by `exists` operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResult {
    /// Result describing a failed operation
    pub fn failure(error: &Error) -> Self {
        let reason = match error {
            Error::TopicNotFound { .. } => "TopicNotFound",
            Error::PubSubApi { .. } => "PubSubApiError",
            Error::ConfigError(_) => "InvalidConfiguration",
            _ => "OperationFailed",
        };
        Self {
            reason: Some(reason.to_string()),
            message: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// What a submission returned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub outcome: JobOutcome,
    pub result: Option<OperationResult>,
}

impl Submission {
    pub fn new(outcome: JobOutcome, result: Option<OperationResult>) -> Self {
        Self { outcome, result }
    }

    pub fn in_flight() -> Self {
        Self::new(JobOutcome::Created, None)
    }

    /// Human readable failure detail, if any
    pub fn message(&self) -> String {
        self.result
            .as_ref()
            .and_then(|r| r.message.clone())
            .unwrap_or_else(|| format!("operation ended in {}", self.outcome))
    }
}

/// Write a result where the pod's termination message is read from
pub fn write_result(path: &Path, result: &OperationResult) -> Result<()> {
    std::fs::write(path, serde_json::to_vec(result)?)?;
    Ok(())
}

/// Runs operations, in-process or out
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Submit a job, or observe the job already submitted for the same work
    ///
    /// Must be idempotent under repeated submission.
    async fn submit(&self, job: &OperationJob) -> Submission;
}

/// Run one operation against Pub/Sub
///
/// Create is idempotent and only updates an existing subscription when one
/// of the fields we own drifted. Delete treats "already absent" as success.
pub async fn execute(client: &dyn PubSubClient, request: &OpRequest) -> Result<OperationResult> {
    let project = match &request.project {
        Some(p) if !p.is_empty() => p.clone(),
        _ => client.default_project().await?,
    };
    let mut result = OperationResult {
        project_id: Some(project.clone()),
        ..Default::default()
    };

    match (request.action, request.target) {
        (OpAction::Exists, OpTarget::Topic) => {
            result.exists = Some(client.get_topic(&project, &request.topic).await?.is_some());
        }
        (OpAction::Exists, OpTarget::Subscription) => {
            let live = client
                .get_subscription(&project, &request.subscription)
                .await?;
            result.exists = Some(live.is_some());
        }
        (OpAction::Create, OpTarget::Topic) => {
            client.create_topic(&project, &request.topic).await?;
            info!(project = %project, topic = %request.topic, "Topic ensured");
        }
        (OpAction::Create, OpTarget::Subscription) => {
            create_subscription(client, &project, request).await?;
        }
        (OpAction::Delete, OpTarget::Topic) => {
            client.delete_topic(&project, &request.topic).await?;
            info!(project = %project, topic = %request.topic, "Topic deleted");
        }
        (OpAction::Delete, OpTarget::Subscription) => {
            client
                .delete_subscription(&project, &request.subscription)
                .await?;
            info!(
                project = %project,
                subscription = %request.subscription,
                "Subscription deleted"
            );
        }
    }

    Ok(result)
}

async fn create_subscription(
    client: &dyn PubSubClient,
    project: &str,
    request: &OpRequest,
) -> Result<()> {
    if let Some(live) = client
        .get_subscription(project, &request.subscription)
        .await?
    {
        let mask = request.config.drift(&live);
        if mask.is_empty() {
            debug!(subscription = %request.subscription, "Subscription up to date");
        } else {
            info!(
                subscription = %request.subscription,
                fields = ?mask,
                "Updating drifted subscription"
            );
            client
                .update_subscription(project, &request.subscription, &request.config, &mask)
                .await?;
        }
        return Ok(());
    }

    if client.get_topic(project, &request.topic).await?.is_none() {
        return Err(Error::TopicNotFound {
            project: project.to_string(),
            topic: request.topic.clone(),
        });
    }

    client
        .create_subscription(project, &request.subscription, &request.topic, &request.config)
        .await?;
    info!(
        project = %project,
        subscription = %request.subscription,
        topic = %request.topic,
        "Subscription created"
    );
    Ok(())
}
