//! mvirt-lb: Load balancer agent.
//!
//! This daemon:
//! - Reads desired load balancer topologies from JSON files
//! - Fetches the actual topology from the provider over gRPC
//! - Applies the difference in dependency order, retrying transient failures
//! - Repeats every interval until interrupted

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_lb::config::{ProviderConfig, DEFAULT_REGION};
use mvirt_lb::controller::{Controller, PassStatus};
use mvirt_lb::reconciler::{LoadBalancerReconciler, ReconcilerConfig, RetryPolicy};
use mvirt_lb::remote::GrpcRemoteLb;

/// mvirt Load Balancer Agent
#[derive(Parser, Debug)]
#[command(name = "mvirt-lb", version, about)]
struct Args {
    /// Load balancer provider endpoint (e.g., http://[::1]:50060)
    #[arg(long, default_value = "http://[::1]:50060")]
    endpoint: String,

    /// Provider region
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// Compartment owning the load balancers
    #[arg(long)]
    compartment: String,

    /// Subnet for load balancer placement (repeatable)
    #[arg(long = "subnet")]
    subnets: Vec<String>,

    /// Bearer token sent with every provider request
    #[arg(long)]
    auth_token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Desired topology file (repeatable)
    #[arg(long = "desired", required = true)]
    desired: Vec<PathBuf>,

    /// Seconds between reconciliation passes
    #[arg(long, default_value = "30")]
    interval: u64,

    /// Attempts per operation before a transient failure is reported
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Initial retry backoff in milliseconds
    #[arg(long, default_value = "250")]
    backoff_base_ms: u64,

    /// Retry backoff ceiling in milliseconds
    #[arg(long, default_value = "8000")]
    backoff_max_ms: u64,

    /// Concurrent provider operations per phase
    #[arg(long, default_value = "8")]
    concurrency: usize,

    /// Skip re-fetching the topology after applying
    #[arg(long)]
    no_verify: bool,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Print the planned operations without applying them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_lb=info,tonic=warn,tower=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting mvirt-lb agent");
    info!("Provider endpoint: {} ({})", args.endpoint, args.region);

    let mut provider = ProviderConfig::new(&args.endpoint, &args.compartment);
    provider.region = args.region;
    provider.subnet_ids = args.subnets;
    provider.auth_token = args.auth_token;
    provider.request_timeout = Duration::from_secs(args.request_timeout_secs);

    let remote = GrpcRemoteLb::new(&provider).context("Invalid provider configuration")?;

    let reconciler = Arc::new(LoadBalancerReconciler::new(
        Arc::new(remote),
        ReconcilerConfig {
            retry: RetryPolicy::new(
                args.max_attempts,
                Duration::from_millis(args.backoff_base_ms),
                Duration::from_millis(args.backoff_max_ms),
            ),
            concurrency: args.concurrency,
            verify: !args.no_verify,
        },
    ));

    let controller = Controller::new(
        reconciler,
        args.desired,
        Duration::from_secs(args.interval.max(1)),
    );

    if args.dry_run {
        for (load_balancer_id, plan) in controller.plan_all().await? {
            println!("{}:", load_balancer_id);
            print!("{}", plan);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, finishing in-flight operations");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    if args.once {
        let statuses = controller.run_once(&cancel).await;
        let unconverged = statuses
            .iter()
            .filter(|s| **s != PassStatus::Converged)
            .count();
        if unconverged > 0 {
            warn!("{} of {} passes did not converge", unconverged, statuses.len());
            anyhow::bail!("{} load balancers did not converge", unconverged);
        }
        info!("All load balancers converged");
        return Ok(());
    }

    controller.run(cancel).await;
    Ok(())
}
