//! In-memory fakes for unit tests

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use tokio::sync::watch;

use crate::config::ControllerConfig;
use crate::controller::{status_patch, Context, EventRecord, KubeOps, SinkResolver};
use crate::crd::{
    Destination, KReference, PullSubscription, PullSubscriptionSpec, PullSubscriptionStatus,
    DEFAULT_SECRET_NAME,
};
use crate::error::{Error, Result};
use crate::ops::{
    InlineExecutor, JobApi, OpAction, OperationExecutor, OperationJob, Submission,
};
use crate::pubsub::{
    subscription_path, topic_path, PubSubClient, Subscription, SubscriptionConfig, Topic,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

/// Apply a JSON merge patch (RFC 7386) in place
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let Some(changes) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(Default::default());
    }
    if let Some(fields) = target.as_object_mut() {
        for (key, value) in changes {
            if value.is_null() {
                fields.remove(key);
            } else {
                merge_patch(fields.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
    }
}

/// Calls made against a [`FakePubSub`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PubSubCalls {
    pub get_topic: usize,
    pub get_subscription: usize,
    pub create_subscription: usize,
    pub update_subscription: usize,
    pub delete_subscription: usize,
}

#[derive(Default)]
struct PubSubState {
    default_project: String,
    topics: BTreeSet<(String, String)>,
    subscriptions: BTreeMap<(String, String), Subscription>,
    fail_status: Option<u16>,
    calls: PubSubCalls,
}

/// Pub/Sub held in memory
pub struct FakePubSub {
    state: Mutex<PubSubState>,
}

impl Default for FakePubSub {
    fn default() -> Self {
        Self {
            state: Mutex::new(PubSubState {
                default_project: "test-project".to_string(),
                ..Default::default()
            }),
        }
    }
}

impl FakePubSub {
    /// A fake holding one topic, with its project as the ambient default
    pub fn with_topic(project: &str, topic: &str) -> Self {
        let fake = Self::default();
        {
            let mut state = lock(&fake.state);
            state.default_project = project.to_string();
            state
                .topics
                .insert((project.to_string(), topic.to_string()));
        }
        fake
    }

    /// Fail every following call with the given HTTP status
    pub fn fail_with(&self, status: u16) {
        lock(&self.state).fail_status = Some(status);
    }

    pub fn recover(&self) {
        lock(&self.state).fail_status = None;
    }

    pub fn calls(&self) -> PubSubCalls {
        lock(&self.state).calls.clone()
    }

    pub fn subscription(&self, project: &str, subscription: &str) -> Option<Subscription> {
        lock(&self.state)
            .subscriptions
            .get(&(project.to_string(), subscription.to_string()))
            .cloned()
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.state).subscriptions.len()
    }

    fn check(&self) -> Result<MutexGuard<'_, PubSubState>> {
        let state = lock(&self.state);
        match state.fail_status {
            Some(status) => Err(Error::PubSubApi {
                status,
                message: "UNAVAILABLE: injected failure".to_string(),
            }),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl PubSubClient for FakePubSub {
    async fn default_project(&self) -> Result<String> {
        Ok(self.check()?.default_project.clone())
    }

    async fn get_topic(&self, project: &str, topic: &str) -> Result<Option<Topic>> {
        let mut state = self.check()?;
        state.calls.get_topic += 1;
        let key = (project.to_string(), topic.to_string());
        Ok(state.topics.contains(&key).then(|| Topic {
            name: topic_path(project, topic),
        }))
    }

    async fn create_topic(&self, project: &str, topic: &str) -> Result<Topic> {
        let mut state = self.check()?;
        state
            .topics
            .insert((project.to_string(), topic.to_string()));
        Ok(Topic {
            name: topic_path(project, topic),
        })
    }

    async fn delete_topic(&self, project: &str, topic: &str) -> Result<()> {
        let mut state = self.check()?;
        state
            .topics
            .remove(&(project.to_string(), topic.to_string()));
        Ok(())
    }

    async fn get_subscription(
        &self,
        project: &str,
        subscription: &str,
    ) -> Result<Option<Subscription>> {
        let mut state = self.check()?;
        state.calls.get_subscription += 1;
        Ok(state
            .subscriptions
            .get(&(project.to_string(), subscription.to_string()))
            .cloned())
    }

    async fn create_subscription(
        &self,
        project: &str,
        subscription: &str,
        topic: &str,
        config: &SubscriptionConfig,
    ) -> Result<Subscription> {
        let mut state = self.check()?;
        state.calls.create_subscription += 1;
        let created = config.to_subscription(
            &subscription_path(project, subscription),
            &topic_path(project, topic),
        );
        state.subscriptions.insert(
            (project.to_string(), subscription.to_string()),
            created.clone(),
        );
        Ok(created)
    }

    async fn update_subscription(
        &self,
        project: &str,
        subscription: &str,
        config: &SubscriptionConfig,
        _mask: &[&str],
    ) -> Result<Subscription> {
        let mut state = self.check()?;
        state.calls.update_subscription += 1;
        let key = (project.to_string(), subscription.to_string());
        let live = state.subscriptions.get_mut(&key).ok_or(Error::PubSubApi {
            status: 404,
            message: "NOT_FOUND: Resource not found".to_string(),
        })?;
        let updated = config.to_subscription(&live.name, &live.topic);
        *live = updated.clone();
        Ok(updated)
    }

    async fn delete_subscription(&self, project: &str, subscription: &str) -> Result<()> {
        let mut state = self.check()?;
        state.calls.delete_subscription += 1;
        state
            .subscriptions
            .remove(&(project.to_string(), subscription.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct KubeState {
    next_version: u64,
    subscriptions: BTreeMap<(String, String), PullSubscription>,
    secrets: BTreeMap<(String, String), Secret>,
    deployments: BTreeMap<(String, String), Deployment>,
    event_types: Vec<DynamicObject>,
    events: Vec<(String, EventRecord)>,
    status_writes: usize,
    finalizer_writes: usize,
    secret_writes: usize,
    /// Conflicts to inject on the next secret writes
    secret_conflicts: usize,
    deployment_available: Option<bool>,
    fail_event_types: bool,
}

impl KubeState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

fn key_of<K: ResourceExt>(object: &K) -> (String, String) {
    (
        object.namespace().unwrap_or_else(|| "default".to_string()),
        object.name_any(),
    )
}

fn check_version(
    stored: Option<&str>,
    sent: Option<&str>,
    kind: &str,
    name: &str,
) -> Result<()> {
    match sent {
        Some(sent) if Some(sent) != stored => Err(api_error(
            409,
            "Conflict",
            format!("Operation cannot be fulfilled on {kind} {name:?}: the object has been modified"),
        )),
        _ => Ok(()),
    }
}

/// Kubernetes API held in memory
///
/// Writes bump `resourceVersion` and reject stale versions with a 409.
/// An owner marked for deletion disappears once its last finalizer is gone.
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<KubeState>,
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, assigning it a resourceVersion
    pub fn insert_subscription(&self, mut ps: PullSubscription) -> PullSubscription {
        let mut state = lock(&self.state);
        ps.metadata.resource_version = Some(state.bump());
        state.subscriptions.insert(key_of(&ps), ps.clone());
        ps
    }

    pub fn subscription(&self, namespace: &str, name: &str) -> Option<PullSubscription> {
        lock(&self.state)
            .subscriptions
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Simulate `kubectl delete`: objects with finalizers are only marked
    pub fn delete_subscription(&self, namespace: &str, name: &str) {
        let mut state = lock(&self.state);
        let key = (namespace.to_string(), name.to_string());
        let version = state.bump();
        let remove = match state.subscriptions.get_mut(&key) {
            Some(ps) if ps.finalizers().is_empty() => true,
            Some(ps) => {
                ps.metadata.deletion_timestamp = Some(
                    k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
                );
                ps.metadata.resource_version = Some(version);
                false
            }
            None => false,
        };
        if remove {
            state.subscriptions.remove(&key);
        }
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = lock(&self.state);
        secret.metadata.resource_version = Some(state.bump());
        state.secrets.insert(key_of(&secret), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.state)
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Reject the next `count` secret writes with a 409
    pub fn conflict_secret_writes(&self, count: usize) {
        lock(&self.state).secret_conflicts = count;
    }

    /// Availability the receive adapter reports once applied
    pub fn set_deployment_available(&self, available: Option<bool>) {
        lock(&self.state).deployment_available = available;
    }

    pub fn fail_event_types(&self) {
        lock(&self.state).fail_event_types = true;
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.state)
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn event_types(&self) -> Vec<DynamicObject> {
        lock(&self.state).event_types.clone()
    }

    /// Events as `(owner name, event)`
    pub fn events(&self) -> Vec<(String, EventRecord)> {
        lock(&self.state).events.clone()
    }

    pub fn event_reasons(&self) -> Vec<String> {
        lock(&self.state)
            .events
            .iter()
            .map(|(_, e)| e.reason.clone())
            .collect()
    }

    pub fn status_writes(&self) -> usize {
        lock(&self.state).status_writes
    }

    pub fn finalizer_writes(&self) -> usize {
        lock(&self.state).finalizer_writes
    }

    pub fn secret_writes(&self) -> usize {
        lock(&self.state).secret_writes
    }
}

#[async_trait]
impl KubeOps for FakeKube {
    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PullSubscription>> {
        Ok(self.subscription(namespace, name))
    }

    async fn list_subscriptions(&self, namespace: Option<&str>) -> Result<Vec<PullSubscription>> {
        Ok(lock(&self.state)
            .subscriptions
            .iter()
            .filter(|((ns, _), _)| namespace.map(|n| n == ns).unwrap_or(true))
            .map(|(_, ps)| ps.clone())
            .collect())
    }

    async fn update_status(
        &self,
        ps: &PullSubscription,
        status: &PullSubscriptionStatus,
    ) -> Result<PullSubscription> {
        let mut state = lock(&self.state);
        let key = key_of(ps);
        let stored_version = state
            .subscriptions
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", key.1)))?
            .resource_version();
        check_version(
            stored_version.as_deref(),
            ps.resource_version().as_deref(),
            "pullsubscriptions",
            &key.1,
        )?;

        let patch = status_patch(ps.resource_version().as_deref(), status)?;
        let version = state.bump();
        state.status_writes += 1;
        let stored = state
            .subscriptions
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", key.1)))?;
        let mut merged = serde_json::to_value(stored.status.clone().unwrap_or_default())?;
        merge_patch(&mut merged, &patch["status"]);
        stored.status = Some(serde_json::from_value(merged)?);
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn patch_finalizers(
        &self,
        ps: &PullSubscription,
        finalizers: &[String],
    ) -> Result<PullSubscription> {
        let mut state = lock(&self.state);
        let key = key_of(ps);
        let stored_version = state
            .subscriptions
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", key.1)))?
            .resource_version();
        check_version(
            stored_version.as_deref(),
            ps.resource_version().as_deref(),
            "pullsubscriptions",
            &key.1,
        )?;

        let version = state.bump();
        state.finalizer_writes += 1;
        let mut updated = match state.subscriptions.get_mut(&key) {
            Some(stored) => {
                stored.metadata.finalizers = Some(finalizers.to_vec());
                stored.metadata.resource_version = Some(version);
                stored.clone()
            }
            None => return Err(api_error(404, "NotFound", format!("{} not found", key.1))),
        };
        if updated.is_being_deleted() && finalizers.is_empty() {
            state.subscriptions.remove(&key);
            updated.metadata.finalizers = None;
        }
        Ok(updated)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn patch_secret_finalizers(&self, secret: &Secret, finalizers: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        let key = key_of(secret);
        if state.secret_conflicts > 0 {
            state.secret_conflicts -= 1;
            // Someone else wrote the secret in between
            let version = state.bump();
            if let Some(stored) = state.secrets.get_mut(&key) {
                stored.metadata.resource_version = Some(version);
            }
            return Err(api_error(409, "Conflict", format!("secret {} modified", key.1)));
        }
        let stored_version = state
            .secrets
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", key.1)))?
            .resource_version();
        check_version(
            stored_version.as_deref(),
            secret.resource_version().as_deref(),
            "secrets",
            &key.1,
        )?;

        let version = state.bump();
        state.secret_writes += 1;
        if let Some(stored) = state.secrets.get_mut(&key) {
            stored.metadata.finalizers = Some(finalizers.to_vec());
            stored.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    async fn apply_receive_adapter(&self, deployment: &Deployment) -> Result<Deployment> {
        let mut state = lock(&self.state);
        let mut live = deployment.clone();
        live.status = state.deployment_available.map(|available| DeploymentStatus {
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".to_string(),
                status: if available { "True" } else { "False" }.to_string(),
                reason: Some(if available {
                    "MinimumReplicasAvailable".to_string()
                } else {
                    "MinimumReplicasUnavailable".to_string()
                }),
                message: Some("Deployment availability".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        });
        state.deployments.insert(key_of(&live), live.clone());
        Ok(live)
    }

    async fn apply_event_type(&self, event_type: &DynamicObject) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_event_types {
            return Err(api_error(
                404,
                "NotFound",
                "the server could not find the requested resource".to_string(),
            ));
        }
        let name = event_type.name_any();
        state.event_types.retain(|e| e.name_any() != name);
        state.event_types.push(event_type.clone());
        Ok(())
    }

    async fn publish_event(&self, ps: &PullSubscription, event: &EventRecord) -> Result<()> {
        lock(&self.state)
            .events
            .push((ps.name_any(), event.clone()));
        Ok(())
    }
}

/// How a [`FakeSinks`] answers
#[derive(Clone, Debug)]
pub enum SinkAnswer {
    Resolved(String),
    NotReady,
    Invalid,
}

/// Sink resolver with a scripted answer
pub struct FakeSinks {
    answer: Mutex<SinkAnswer>,
}

impl FakeSinks {
    pub fn resolving(uri: &str) -> Self {
        Self {
            answer: Mutex::new(SinkAnswer::Resolved(uri.to_string())),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            answer: Mutex::new(SinkAnswer::NotReady),
        }
    }

    pub fn set(&self, answer: SinkAnswer) {
        *lock(&self.answer) = answer;
    }
}

#[async_trait]
impl SinkResolver for FakeSinks {
    async fn resolve(&self, _destination: &Destination, namespace: &str) -> Result<String> {
        match lock(&self.answer).clone() {
            SinkAnswer::Resolved(uri) => Ok(uri),
            SinkAnswer::NotReady => Err(Error::SinkNotReady(format!(
                "sink in {namespace} does not have an address yet"
            ))),
            SinkAnswer::Invalid => Err(Error::SinkResolution("sink has neither ref nor uri".into())),
        }
    }
}

/// Executor over a [`FakePubSub`]
///
/// In deferred mode the first create or delete for a given piece of work
/// applies its effect but reports it as still in flight, like a Job that
/// has not finished yet.
pub struct FakeExecutor {
    inner: InlineExecutor,
    deferred: bool,
    seen: Mutex<HashSet<String>>,
    submissions: Mutex<Vec<(OpAction, String)>>,
}

impl FakeExecutor {
    pub fn inline(client: Arc<FakePubSub>) -> Self {
        Self::new(client, false)
    }

    pub fn deferred(client: Arc<FakePubSub>) -> Self {
        Self::new(client, true)
    }

    fn new(client: Arc<FakePubSub>, deferred: bool) -> Self {
        Self {
            inner: InlineExecutor::new(client),
            deferred,
            seen: Mutex::new(HashSet::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Submitted `(action, target)` pairs in order
    pub fn submissions(&self) -> Vec<(OpAction, String)> {
        lock(&self.submissions).clone()
    }

    pub fn count(&self, action: OpAction) -> usize {
        lock(&self.submissions)
            .iter()
            .filter(|(a, _)| *a == action)
            .count()
    }
}

#[async_trait]
impl OperationExecutor for FakeExecutor {
    async fn submit(&self, job: &OperationJob) -> Submission {
        let request = &job.request;
        lock(&self.submissions).push((request.action, request.target.to_string()));

        let submission = self.inner.submit(job).await;
        if !self.deferred || request.action == OpAction::Exists || submission.outcome.is_failure() {
            return submission;
        }
        let key = format!(
            "{}/{}/{}/{}",
            job.owner.uid, request.action, request.target, request.subscription
        );
        if lock(&self.seen).insert(key) {
            Submission::in_flight()
        } else {
            submission
        }
    }
}

/// Everything a reconcile test needs
pub struct Harness {
    pub kube: Arc<FakeKube>,
    pub pubsub: Arc<FakePubSub>,
    pub sinks: Arc<FakeSinks>,
    pub executor: Arc<FakeExecutor>,
    pub ctx: Arc<Context>,
    pub shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn new(pubsub: FakePubSub, sinks: FakeSinks, deferred: bool) -> Self {
        let kube = Arc::new(FakeKube::new());
        kube.set_deployment_available(Some(true));
        let pubsub = Arc::new(pubsub);
        let sinks = Arc::new(sinks);
        let executor = Arc::new(if deferred {
            FakeExecutor::deferred(pubsub.clone())
        } else {
            FakeExecutor::inline(pubsub.clone())
        });
        let (shutdown, receiver) = watch::channel(false);
        let ctx = Arc::new(Context {
            kube: kube.clone(),
            sinks: sinks.clone(),
            executor: executor.clone(),
            config: ControllerConfig::default(),
            shutdown: receiver,
        });
        Self {
            kube,
            pubsub,
            sinks,
            executor,
            ctx,
            shutdown,
        }
    }
}

pub const TEST_NAMESPACE: &str = "events";
pub const TEST_PROJECT: &str = "my-project";
pub const TEST_TOPIC: &str = "orders";
pub const BROKER_URI: &str =
    "http://broker-ingress.knative-eventing.svc.cluster.local/events/default";

/// A PullSubscription as the API server hands it out, delivering to a Broker
pub fn sample_subscription(name: &str) -> PullSubscription {
    let mut ps = PullSubscription::new(
        name,
        PullSubscriptionSpec {
            project: Some(TEST_PROJECT.to_string()),
            topic: TEST_TOPIC.to_string(),
            secret: None,
            service_account_name: None,
            ack_deadline: None,
            retain_acked_messages: false,
            retention_duration: None,
            sink: Destination {
                reference: Some(KReference {
                    api_version: "eventing.knative.dev/v1".to_string(),
                    kind: "Broker".to_string(),
                    namespace: None,
                    name: "default".to_string(),
                }),
                uri: None,
            },
            mode: None,
        },
    );
    ps.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    ps.metadata.uid = Some(format!("uid-{name}"));
    ps.metadata.generation = Some(1);
    ps
}

/// The default credentials secret in the test namespace
pub fn sample_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(DEFAULT_SECRET_NAME.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

impl Harness {
    /// Topic present, sink resolvable, operations complete immediately
    pub fn standard() -> Self {
        Self::new(
            FakePubSub::with_topic(TEST_PROJECT, TEST_TOPIC),
            FakeSinks::resolving(BROKER_URI),
            false,
        )
    }

    /// Like [`Harness::standard`] but creates and deletes stay in flight for one pass
    pub fn deferred() -> Self {
        Self::new(
            FakePubSub::with_topic(TEST_PROJECT, TEST_TOPIC),
            FakeSinks::resolving(BROKER_URI),
            true,
        )
    }
}

#[derive(Default)]
struct JobsState {
    jobs: BTreeMap<(String, String), Job>,
    pods: BTreeMap<(String, String), Vec<Pod>>,
    fail_get: Option<u16>,
    fail_create: Option<u16>,
    deleted: Vec<String>,
}

/// Jobs and their pods held in memory
#[derive(Default)]
pub struct FakeJobs {
    state: Mutex<JobsState>,
}

impl FakeJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_job(&self, job: Job) {
        let key = (job.namespace().unwrap_or_default(), job.name_any());
        lock(&self.state).jobs.insert(key, job);
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        lock(&self.state)
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Attach a pod to the Job named `job_name`
    pub fn insert_pod(&self, namespace: &str, job_name: &str, pod: Pod) {
        lock(&self.state)
            .pods
            .entry((namespace.to_string(), job_name.to_string()))
            .or_default()
            .push(pod);
    }

    pub fn fail_gets(&self, code: u16) {
        lock(&self.state).fail_get = Some(code);
    }

    pub fn fail_creates(&self, code: u16) {
        lock(&self.state).fail_create = Some(code);
    }

    /// Names of the Jobs deleted so far, in order
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }
}

#[async_trait]
impl JobApi for FakeJobs {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let state = lock(&self.state);
        if let Some(code) = state.fail_get {
            return Err(api_error(code, "GetFailed", format!("get {name} failed")));
        }
        Ok(state
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = lock(&self.state);
        let key = (job.namespace().unwrap_or_default(), job.name_any());
        if let Some(code) = state.fail_create {
            return Err(api_error(code, "CreateFailed", format!("create {} failed", key.1)));
        }
        if state.jobs.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} already exists", key.1)));
        }
        state.jobs.insert(key, job.clone());
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let key = (namespace.to_string(), name.to_string());
        state.jobs.remove(&key);
        state.pods.remove(&key);
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        Ok(lock(&self.state)
            .pods
            .get(&(namespace.to_string(), job_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
