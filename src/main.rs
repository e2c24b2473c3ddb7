// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use image_distributor::{
    client::KubeClusterClient,
    config_index::{load_ci_configs, reload_ci_configs, ConfigIndex, InMemoryConfigIndex},
    constants::CONFIG_RELOAD_INTERVAL_SECS,
    controller,
    metrics::{ImportMetrics, PrometheusImportMetrics},
    server::{self, ServerState},
    settings::{ClusterSettings, Settings},
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Distributes CI test input images from the registry cluster to the build clusters.
#[derive(Parser, Debug)]
#[command(name = "image-distributor", version, about)]
struct Cli {
    /// Path to the settings file
    #[arg(long, env = "DISTRIBUTOR_CONFIG")]
    config: PathBuf,

    /// Log imports instead of performing them
    #[arg(long)]
    dry_run: bool,

    /// Bind address of the metrics and health server
    #[arg(long, env = "METRICS_ADDRESS")]
    metrics_address: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("image-distributor")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

fn init_logging() {
    // Respects RUST_LOG (default: info) and RUST_LOG_FORMAT (json or text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

/// Build a client for one cluster from its kubeconfig, or the ambient configuration.
async fn cluster_client(cluster: &ClusterSettings) -> Result<KubeClusterClient> {
    let options = KubeConfigOptions {
        context: cluster.context.clone(),
        ..Default::default()
    };

    let client = match (&cluster.kubeconfig, &cluster.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
            Client::try_from(config)?
        }
        (None, Some(_)) => Client::try_from(kube::Config::from_kubeconfig(&options).await?)?,
        (None, None) => Client::try_default().await?,
    };

    debug!(cluster = %cluster.name, "Kubernetes client initialized");
    Ok(KubeClusterClient::new(cluster.name.clone(), client))
}

async fn async_main(cli: Cli) -> Result<()> {
    init_logging();
    info!("Starting image distributor");

    let mut settings = Settings::load(&cli.config)?;
    if cli.dry_run {
        settings.dry_run = true;
    }
    if let Some(address) = cli.metrics_address {
        settings.metrics_address = address;
    }
    info!(
        registry = %settings.registry_cluster.name,
        build_clusters = ?settings.build_cluster_names(),
        dry_run = settings.dry_run,
        "Loaded settings"
    );

    let registry = cluster_client(&settings.registry_cluster)
        .await
        .with_context(|| format!("failed to build client for {}", settings.registry_cluster.name))?;
    let mut build_clusters = Vec::with_capacity(settings.build_clusters.len());
    for cluster in &settings.build_clusters {
        let client = cluster_client(cluster)
            .await
            .with_context(|| format!("failed to build client for {}", cluster.name))?;
        build_clusters.push(client);
    }

    let index = InMemoryConfigIndex::new();
    if let Some(dir) = &settings.ci_config_dir {
        index.replace_all(load_ci_configs(dir)?).await;
        if index.is_empty() {
            warn!(dir = %dir.display(), "No CI configurations found; only allow-listed images are distributed");
        }
        tokio::spawn(reload_ci_configs(
            index.clone(),
            dir.clone(),
            Duration::from_secs(CONFIG_RELOAD_INTERVAL_SECS),
        ));
    }

    let metrics_registry = Registry::new();
    let metrics: Arc<dyn ImportMetrics> =
        Arc::new(PrometheusImportMetrics::register(&metrics_registry)?);
    let ready = Arc::new(AtomicBool::new(false));
    let state = Arc::new(ServerState {
        registry: metrics_registry,
        is_ready: ready.clone(),
    });
    let index: Arc<dyn ConfigIndex> = Arc::new(index);

    tokio::select! {
        result = server::serve(&settings.metrics_address, state) => {
            error!("CRITICAL: HTTP server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("HTTP server exited unexpectedly without error")
        }
        result = controller::run(&settings, registry, build_clusters, index, metrics, ready) => {
            error!("CRITICAL: controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("controller exited unexpectedly without error")
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received shutdown signal, exiting");
            Ok(())
        }
    }
}
