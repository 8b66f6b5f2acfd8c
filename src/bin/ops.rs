//! Entrypoint of the provisioning Job
//!
//! Runs one Pub/Sub operation described by the environment and writes the
//! JSON result to the termination message path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use pubsub_k8s::ops::{
    execute, write_result, OpRequest, OperationResult, DEFAULT_TERMINATION_MESSAGE_PATH,
    TERMINATION_MESSAGE_PATH_ENV,
};
use pubsub_k8s::pubsub::PubSubRestClient;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .json()
        .init();

    let env: HashMap<String, String> = std::env::vars().collect();
    let result_path = PathBuf::from(
        env.get(TERMINATION_MESSAGE_PATH_ENV)
            .map(String::as_str)
            .unwrap_or(DEFAULT_TERMINATION_MESSAGE_PATH),
    );

    // A bad environment is fatal, there is nothing to retry
    let request = OpRequest::from_env_map(&env).context("invalid operation environment")?;
    info!(
        action = %request.action,
        resource = %request.target,
        topic = %request.topic,
        subscription = %request.subscription,
        "Running operation"
    );

    let client = PubSubRestClient::from_env(REQUEST_TIMEOUT)?;
    match execute(&client, &request).await {
        Ok(result) => {
            write_result(&result_path, &result)
                .with_context(|| format!("writing result to {}", result_path.display()))?;
            info!("Operation complete");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            if let Err(write_err) = write_result(&result_path, &OperationResult::failure(&e)) {
                error!("Failed to write result: {}", write_err);
            }
            Err(e.into())
        }
    }
}
