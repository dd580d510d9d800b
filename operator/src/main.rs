mod clients;
mod clusters;
mod config;
mod http;
mod monitor;
mod topologies;
mod workerpools;
mod workloads;

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use owo_colors::OwoColorize;
use storm_client::ArtifactFetcher;
use storm_common::colors::FG1;
use tokio_util::sync::CancellationToken;

use clients::NimbusClients;
use config::OperatorConfig;

#[derive(Parser, Debug)]
#[command(name = "storm-operator", about = "Kubernetes operator for Apache Storm clusters")]
struct Cli {
    /// Port the health/readiness/metrics HTTP endpoint listens on.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    /// Root directory the artifact fetcher caches downloaded/extracted JARs under.
    #[arg(long, env = "ARTIFACT_CACHE_ROOT", default_value = "/var/lib/storm-operator/artifacts")]
    artifact_cache_root: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    println!("{}", "storm-operator starting".color(FG1));

    let client = Client::try_default().await?;
    let namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let config = OperatorConfig::load(client.clone(), &namespace).await?;
    let cascade_ratio = config.cascade_ratio();

    let recorder = http::install_recorder();
    let cancel = CancellationToken::new();

    let fetcher = Arc::new(ArtifactFetcher::new(cli.artifact_cache_root));
    let nimbus_clients = Arc::new(NimbusClients::new());

    let http_task = tokio::spawn(http::run(cli.http_port, recorder, cancel.child_token()));
    let cluster_task = tokio::spawn(clusters::run(client.clone(), cancel.child_token()));
    let topology_task = tokio::spawn(topologies::run(client.clone(), fetcher, nimbus_clients, cancel.child_token()));
    let worker_pool_task = tokio::spawn(workerpools::run(client.clone(), cancel.child_token()));
    let monitor_task = tokio::spawn(monitor::run(client, cascade_ratio, cancel.child_token()));

    storm_common::shutdown::shutdown_signal().await;
    println!("{}", "storm-operator shutting down".color(FG1));
    cancel.cancel();

    let _ = tokio::join!(http_task, cluster_task, topology_task, worker_pool_task, monitor_task);
    Ok(())
}
