use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use k8s_node_monitor::api::{self, AppState};
use k8s_node_monitor::{
    kubernetes, load_config, monitor, AppContext, ClusterSource, Collector, Config, HealthState,
    HealthStatus, KubernetesSource, MetricsPublisher, OutputFormat, VmSource, VsphereClient,
};

/// Kubernetes pod, node and VMware monitor
#[derive(Parser)]
#[command(name = "k8s-node-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll pods, nodes and VMs and serve Prometheus metrics
    Monitor {
        /// Configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Namespace to monitor, repeatable; replaces the configured list
        #[arg(long, short)]
        namespace: Vec<String>,

        /// Seconds between cycles
        #[arg(long, short)]
        interval: Option<u64>,

        #[arg(long, short)]
        log_level: Option<String>,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },

    /// Print a cluster resource summary
    Cluster {
        /// Configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Count pods in this namespace only
        #[arg(long, short)]
        namespace: Option<String>,

        #[arg(long, short, value_enum, default_value_t = OutputFormat::Console)]
        output: OutputFormat,

        /// Seconds between summaries with --watch
        #[arg(long, short, default_value_t = 60)]
        interval: u64,

        /// Repeat until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            config,
            namespace,
            interval,
            log_level,
            log_format,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if !namespace.is_empty() {
                cfg.namespaces = namespace;
            }
            if let Some(secs) = interval {
                cfg.monitoring_interval = secs;
            }
            if let Some(level) = log_level {
                cfg.log_level = level;
            }
            cfg.validate()?;

            init_tracing(&cfg.log_level, log_format);
            run_monitor(cfg).await
        }
        Commands::Cluster {
            config,
            namespace,
            output,
            interval,
            watch,
        } => {
            let cfg = load_config(config.as_deref())?;
            init_tracing(&cfg.log_level, LogFormat::Text);
            run_cluster(cfg, namespace, output, interval, watch).await
        }
    }
}

async fn run_monitor(cfg: Config) -> Result<()> {
    info!(
        namespaces = ?cfg.namespaces,
        interval_secs = cfg.monitoring_interval,
        vmware = cfg.vmware.is_some(),
        "Starting monitor"
    );

    let publisher = MetricsPublisher::new()?;
    let health = HealthState::new();
    let listener = api::bind(cfg.prometheus_port).await?;
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let state = Arc::new(AppState::new(health.clone(), publisher.clone()));
    let server = tokio::spawn(api::serve(listener, state, shutdown.clone()));

    health.set(HealthStatus::Initializing, None).await;
    let (cluster, vms) = match connect_sources(&cfg).await {
        Ok(sources) => sources,
        Err(e) => {
            error!(error = %e, "Failed to initialize clients");
            health.set(HealthStatus::Error, Some(format!("{:#}", e))).await;
            shutdown.cancel();
            let _ = server.await;
            return Err(e);
        }
    };
    health.set(HealthStatus::Ok, None).await;

    let ctx = Arc::new(AppContext {
        config: cfg,
        cluster,
        vms,
        publisher,
        health,
    });
    monitor::run(ctx, shutdown.clone()).await;

    shutdown.cancel();
    server.await.context("HTTP server task panicked")??;
    info!("Monitor stopped");
    Ok(())
}

async fn connect_sources(cfg: &Config) -> Result<(Arc<dyn ClusterSource>, Option<Arc<dyn VmSource>>)> {
    let client = kubernetes::connect(cfg.kubeconfig_path.as_deref()).await?;
    let cluster: Arc<dyn ClusterSource> = Arc::new(KubernetesSource::new(client));

    let vms = match &cfg.vmware {
        Some(vmware) => {
            let vsphere = VsphereClient::new(vmware)?;
            vsphere
                .connect()
                .await
                .with_context(|| format!("connecting to vCenter {}", vmware.host))?;
            Some(Arc::new(vsphere) as Arc<dyn VmSource>)
        }
        None => None,
    };

    Ok((cluster, vms))
}

async fn run_cluster(
    cfg: Config,
    namespace: Option<String>,
    output: OutputFormat,
    interval: u64,
    watch: bool,
) -> Result<()> {
    let client = kubernetes::connect(cfg.kubeconfig_path.as_deref()).await?;
    let source = KubernetesSource::new(client);
    let collector = Collector::new(&source, None, &cfg);

    if !watch {
        let summary = collector
            .collect_cluster_summary(namespace.as_deref())
            .await
            .context("collecting cluster metrics")?;
        println!("{}", summary.render(output)?);
        return Ok(());
    }

    info!(interval_secs = interval, "Watching cluster resources");
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    while !shutdown.is_cancelled() {
        match collector.collect_cluster_summary(namespace.as_deref()).await {
            Ok(summary) => println!("{}", summary.render(output)?),
            Err(e) => error!(error = %e, "Error monitoring cluster"),
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = shutdown.cancelled() => break,
        }
    }
    Ok(())
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    let registry = tracing_subscriber::registry().with(filter);
    let _ = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
    };
}
