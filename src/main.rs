use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kube::ResourceExt;
use pubsub_k8s::config::{ControllerConfig, ExecutorMode};
use pubsub_k8s::controller::{self, leader, Context};
use pubsub_k8s::crd::PullSubscription;
use pubsub_k8s::ops::{InlineExecutor, JobExecutor, JobExecutorConfig, OperationExecutor};
use pubsub_k8s::pubsub::{PubSubRestClient, EMULATOR_HOST_ENV};
use pubsub_k8s::Error;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const PUBSUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller
    Run(RunArgs),
    /// Show version information
    Version,
    /// Show the PullSubscriptions in a namespace
    Info(InfoArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace the controller runs in, holds the leader lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Only watch PullSubscriptions in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Where Pub/Sub operations run
    #[arg(long, env = "EXECUTOR_MODE", value_enum, default_value_t = ExecutorMode::Inline)]
    executor: ExecutorMode,

    /// Image of the receive adapter
    #[arg(
        long,
        env = "RECEIVE_ADAPTER_IMAGE",
        default_value = "ghcr.io/pubsub-k8s/receive-adapter:latest"
    )]
    receive_adapter_image: String,

    /// Image of the ops Job, used with `--executor job`
    #[arg(
        long,
        env = "OPS_IMAGE",
        default_value = "ghcr.io/pubsub-k8s/pubsub-ops:latest"
    )]
    ops_image: String,

    /// Seconds between resyncs of a ready PullSubscription
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 300)]
    resync_interval_secs: u64,

    /// Seconds between checks while an operation is in flight
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 5)]
    poll_interval_secs: u64,

    /// Port of the REST API and metrics endpoint
    #[arg(long, env = "REST_API_PORT", default_value_t = 8080)]
    api_port: u16,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run without a leader lease, for single replica deployments
    #[arg(long, env = "DISABLE_LEADER_ELECTION")]
    disable_leader_election: bool,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to inspect
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("pubsub-k8s controller v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: kube::Api<PullSubscription> = kube::Api::namespaced(client, &args.namespace);
    let subscriptions = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    let ready = subscriptions
        .items
        .iter()
        .filter(|ps| ps.status.as_ref().map(|s| s.is_ready()).unwrap_or(false))
        .count();
    println!(
        "PullSubscriptions in {}: {} ({} ready)",
        args.namespace,
        subscriptions.items.len(),
        ready
    );
    for ps in &subscriptions.items {
        println!("  {} -> topic {}", ps.name_any(), ps.spec.topic);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init(),
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting pubsub-k8s controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let config = ControllerConfig {
        resync_interval: Duration::from_secs(args.resync_interval_secs),
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        receive_adapter_image: args.receive_adapter_image.clone(),
        executor: args.executor,
        job: JobExecutorConfig {
            image: args.ops_image.clone(),
            emulator_host: std::env::var(EMULATOR_HOST_ENV).ok(),
            ..Default::default()
        },
        watch_namespace: args.watch_namespace.clone(),
    };

    let executor: Arc<dyn OperationExecutor> = match config.executor {
        ExecutorMode::Inline => {
            info!("Running Pub/Sub operations inline");
            Arc::new(InlineExecutor::new(Arc::new(PubSubRestClient::from_env(
                PUBSUB_REQUEST_TIMEOUT,
            )?)))
        }
        ExecutorMode::Job => {
            info!("Running Pub/Sub operations as Jobs ({})", config.job.image);
            Arc::new(JobExecutor::new(client.clone(), config.job.clone()))
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = Arc::new(Context::new(
        client.clone(),
        executor,
        config,
        shutdown_rx.clone(),
    ));

    // The REST API serves followers too, so it starts before the lease is held
    #[cfg(feature = "rest-api")]
    {
        let api_ctx = ctx.clone();
        let mut api_shutdown = shutdown_rx.clone();
        let port = args.api_port;
        tokio::spawn(async move {
            let stop = async move {
                let _ = api_shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = pubsub_k8s::rest_api::run_server(api_ctx, port, stop).await {
                error!("REST API server error: {:?}", e);
            }
        });
    }

    let (leader_tx, mut leader_rx) = watch::channel(false);
    if args.disable_leader_election {
        info!("Leader election disabled");
        leader_tx.send_replace(true);
    } else {
        let identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });
        let lease_namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
        info!("Leader election using holder ID: {}", identity);

        tokio::spawn(leader::run_leader_election(
            client.clone(),
            lease_namespace,
            identity,
            leader_tx,
        ));
    }

    info!("Waiting for leadership");
    tokio::select! {
        acquired = leader_rx.wait_for(|leader| *leader) => {
            if acquired.is_err() {
                return Err(Error::ConfigError("leader election stopped".to_string()));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before acquiring leadership");
            shutdown_tx.send_replace(true);
            return Ok(());
        }
    }

    // Shut down on interrupt or on losing the lease
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
            _ = leader_rx.wait_for(|leader| !*leader) => warn!("Leadership lost, shutting down"),
        }
        shutdown_tx.send_replace(true);
        let _ = stop_tx.send(());
    });

    controller::run_controller(client, ctx, async move {
        let _ = stop_rx.await;
    })
    .await
}
