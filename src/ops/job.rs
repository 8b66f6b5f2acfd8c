//! Out-of-process executor backed by Kubernetes Jobs
//!
//! Each (owner, action, resource) gets one deterministically named Job that
//! runs the `pubsub-ops` binary. The Job reports its [`OperationResult`]
//! through the container termination message. Once a terminal outcome has
//! been read the Job is deleted, so the next submission of the same work
//! starts a fresh run.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{
    JobOutcome, OpAction, OperationExecutor, OperationJob, OperationResult, Submission,
    TERMINATION_MESSAGE_PATH_ENV,
};
use crate::error::Result;
use crate::pubsub::EMULATOR_HOST_ENV;

/// Where the owner's credentials secret is mounted in the ops pod
pub const CREDENTIALS_MOUNT_PATH: &str = "/var/secrets/google";
pub const DEFAULT_TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";

const CREDENTIALS_VOLUME: &str = "google-cloud-key";

/// Settings for the Job-backed executor
#[derive(Clone, Debug)]
pub struct JobExecutorConfig {
    /// Image containing the `pubsub-ops` binary
    pub image: String,
    pub backoff_limit: i32,
    /// Forwarded to ops pods when set, for testing against the emulator
    pub emulator_host: Option<String>,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            image: "ghcr.io/pubsub-k8s/pubsub-ops:latest".to_string(),
            backoff_limit: 2,
            emulator_host: None,
        }
    }
}

/// Observed state of an ops Job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed(String),
}

/// Deterministic Job name for a piece of work
///
/// Kept within the 63 character label limit, since the Job controller copies
/// the name into the `job-name` pod label.
pub fn job_name(job: &OperationJob) -> String {
    let request = &job.request;
    let mut hasher = Sha256::new();
    hasher.update(job.owner.uid.as_bytes());
    hasher.update(b"/");
    hasher.update(request.action.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(request.target.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(request.topic.as_bytes());
    hasher.update(b"/");
    hasher.update(request.subscription.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let owner: String = job.owner.name.chars().take(30).collect();
    let owner = owner.trim_end_matches(['-', '.']);
    let target = match request.target {
        super::OpTarget::Topic => "topic",
        super::OpTarget::Subscription => "sub",
    };
    format!("{owner}-{}-{target}-{}", request.action, &digest[..8])
}

fn job_labels(job: &OperationJob) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            "pubsub-ops".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "pubsub-k8s".to_string(),
        ),
        ("pubsub.k8s.dev/owner".to_string(), job.owner.name.clone()),
        (
            "pubsub.k8s.dev/action".to_string(),
            job.request.action.to_string(),
        ),
        (
            "pubsub.k8s.dev/resource".to_string(),
            job.request.target.to_string(),
        ),
    ])
}

/// Build the Job that runs one operation
pub fn build_job(job: &OperationJob, config: &JobExecutorConfig) -> Job {
    let labels = job_labels(job);

    let mut env: Vec<EnvVar> = job
        .request
        .to_env()
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect();
    env.push(EnvVar {
        name: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
        value: Some(format!("{CREDENTIALS_MOUNT_PATH}/{}", job.secret.key)),
        ..Default::default()
    });
    env.push(EnvVar {
        name: TERMINATION_MESSAGE_PATH_ENV.to_string(),
        value: Some(DEFAULT_TERMINATION_MESSAGE_PATH.to_string()),
        ..Default::default()
    });
    if let Some(host) = &config.emulator_host {
        env.push(EnvVar {
            name: EMULATOR_HOST_ENV.to_string(),
            value: Some(host.clone()),
            ..Default::default()
        });
    }

    let container = Container {
        name: "pubsub-ops".to_string(),
        image: Some(config.image.clone()),
        env: Some(env),
        termination_message_path: Some(DEFAULT_TERMINATION_MESSAGE_PATH.to_string()),
        volume_mounts: Some(vec![VolumeMount {
            name: CREDENTIALS_VOLUME.to_string(),
            mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(job)),
            namespace: Some(job.owner.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![job.owner.owner_reference()]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(config.backoff_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: job.service_account.clone(),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CREDENTIALS_VOLUME.to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(job.secret.name.clone()),
                            optional: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Classify a Job from its status
pub fn job_state(job: &Job) -> JobState {
    let Some(status) = job.status.as_ref() else {
        return JobState::Running;
    };
    if status.succeeded.unwrap_or(0) >= 1 {
        return JobState::Succeeded;
    }
    let failed = status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == "Failed" && c.status == "True");
    match failed {
        Some(c) => JobState::Failed(
            c.message
                .clone()
                .or_else(|| c.reason.clone())
                .unwrap_or_else(|| "job failed".to_string()),
        ),
        None => JobState::Running,
    }
}

/// Parse the result a terminated ops container left behind
pub fn termination_result(pod: &Pod) -> Option<OperationResult> {
    pod.status
        .as_ref()?
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.terminated.as_ref()?.message.as_deref())
        .find_map(|message| serde_json::from_str(message.trim()).ok())
}

/// Job and Pod calls made by the [`JobExecutor`]
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Delete in the background; an absent Job is not an error
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Pods created for the Job named `job_name`
    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>>;
}

/// [`JobApi`] against a live cluster
#[derive(Clone)]
pub struct KubeJobApi {
    client: Client,
}

impl KubeJobApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobApi for KubeJobApi {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(jobs.get_opt(name).await?)
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or("default");
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        jobs.create(&PostParams::default(), job).await?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        match jobs.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("job-name={job_name}"));
        Ok(pods.list(&params).await?.items)
    }
}

/// Runs each operation as a Kubernetes Job
pub struct JobExecutor {
    jobs: Arc<dyn JobApi>,
    config: JobExecutorConfig,
}

impl JobExecutor {
    pub fn new(client: Client, config: JobExecutorConfig) -> Self {
        Self::with_api(Arc::new(KubeJobApi::new(client)), config)
    }

    pub fn with_api(jobs: Arc<dyn JobApi>, config: JobExecutorConfig) -> Self {
        Self { jobs, config }
    }

    async fn read_result(&self, namespace: &str, name: &str) -> Option<OperationResult> {
        match self.jobs.list_job_pods(namespace, name).await {
            Ok(pods) => pods.iter().rev().find_map(termination_result),
            Err(e) => {
                warn!("Failed to list pods of Job {}/{}: {:?}", namespace, name, e);
                None
            }
        }
    }

    async fn cleanup(&self, namespace: &str, name: &str) {
        match self.jobs.delete_job(namespace, name).await {
            Ok(()) => debug!("Deleted finished Job {}", name),
            Err(e) => warn!("Failed to delete finished Job {}: {:?}", name, e),
        }
    }
}

#[async_trait]
impl OperationExecutor for JobExecutor {
    async fn submit(&self, job: &OperationJob) -> Submission {
        let namespace = &job.owner.namespace;
        let name = job_name(job);

        let existing = match self.jobs.get_job(namespace, &name).await {
            Ok(existing) => existing,
            Err(e) => {
                return Submission::new(JobOutcome::GetFailed, Some(OperationResult::failure(&e)))
            }
        };

        let Some(live) = existing else {
            info!("Creating ops Job {}/{}", namespace, name);
            return match self.jobs.create_job(&build_job(job, &self.config)).await {
                Ok(()) => Submission::in_flight(),
                Err(e) if e.is_conflict() => Submission::in_flight(),
                Err(e) => {
                    Submission::new(JobOutcome::CreateFailed, Some(OperationResult::failure(&e)))
                }
            };
        };

        match job_state(&live) {
            JobState::Running => {
                debug!("Ops Job {}/{} still running", namespace, name);
                Submission::in_flight()
            }
            JobState::Succeeded => {
                let result = self.read_result(namespace, &name).await;
                self.cleanup(namespace, &name).await;
                match result {
                    Some(result) => Submission::new(JobOutcome::CompleteSuccessful, Some(result)),
                    // Without the payload an exists check has no answer
                    None if job.request.action == OpAction::Exists => Submission::new(
                        JobOutcome::GetFailed,
                        Some(OperationResult {
                            reason: Some("MissingResult".to_string()),
                            message: Some(format!("Job {name} finished without a result")),
                            ..Default::default()
                        }),
                    ),
                    None => Submission::new(
                        JobOutcome::CompleteSuccessful,
                        Some(OperationResult::default()),
                    ),
                }
            }
            JobState::Failed(message) => {
                let result = self
                    .read_result(namespace, &name)
                    .await
                    .unwrap_or_else(|| OperationResult {
                        reason: Some("JobFailed".to_string()),
                        message: Some(message),
                        ..Default::default()
                    });
                self.cleanup(namespace, &name).await;
                Submission::new(JobOutcome::CompleteFailed, Some(result))
            }
        }
    }
}
