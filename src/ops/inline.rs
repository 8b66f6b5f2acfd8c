//! In-process executor

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{execute, JobOutcome, OpAction, OperationExecutor, OperationJob, OperationResult, Submission};
use crate::pubsub::PubSubClient;

/// Runs operations directly against a [`PubSubClient`]
///
/// Every submission completes before returning, so this executor never
/// reports [`JobOutcome::Created`]. It uses the controller's own credentials
/// rather than the owner's secret.
pub struct InlineExecutor {
    client: Arc<dyn PubSubClient>,
}

impl InlineExecutor {
    pub fn new(client: Arc<dyn PubSubClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OperationExecutor for InlineExecutor {
    async fn submit(&self, job: &OperationJob) -> Submission {
        let request = &job.request;
        match execute(self.client.as_ref(), request).await {
            Ok(result) => Submission::new(JobOutcome::CompleteSuccessful, Some(result)),
            Err(e) => {
                warn!(
                    action = %request.action,
                    resource = %request.target,
                    owner = %job.owner.name,
                    "Operation failed: {}",
                    e
                );
                // A failed lookup says nothing about external state
                let outcome = if request.action == OpAction::Exists {
                    JobOutcome::GetFailed
                } else {
                    JobOutcome::CompleteFailed
                };
                Submission::new(outcome, Some(OperationResult::failure(&e)))
            }
        }
    }
}
