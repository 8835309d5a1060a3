use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kic_core::{ObjectKey, ResourceKind, SyncTarget, WatchEvent};
use kic_dispatch::{DispatchConfig, Dispatcher};
use kic_store::{ingest, spawn_pipeline, ClusterIndex, Informer, TaskQueue};
use serde::Deserialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kicctl", version, about = "Ingress controller notification dispatch")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Ingress class handled by this controller
    #[arg(long = "ingress-class", env = "KIC_INGRESS_CLASS", global = true, default_value = "nginx")]
    ingress_class: String,

    /// Ignore resources without an ingress class
    #[arg(long = "use-ingress-class-only", env = "KIC_USE_INGRESS_CLASS_ONLY", global = true, action = ArgAction::SetTrue)]
    use_ingress_class_only: bool,

    /// Name of the ConfigMap holding the global configuration
    #[arg(long = "nginx-configmaps", env = "KIC_CONFIGMAP", global = true)]
    config_map: Option<String>,

    /// Watch VirtualServer, VirtualServerRoute, GlobalConfiguration and TransportServer
    #[arg(long = "enable-custom-resources", env = "KIC_ENABLE_CUSTOM_RESOURCES", global = true, action = ArgAction::SetTrue)]
    custom_resources: bool,

    /// Service reported in resource status, as namespace/name
    #[arg(long = "external-service", env = "KIC_EXTERNAL_SERVICE", global = true)]
    external_service: Option<String>,

    /// Sync queue capacity
    #[arg(long = "queue-cap", env = "KIC_QUEUE_CAP", global = true, default_value_t = 4096)]
    queue_cap: usize,
}

impl ConfigArgs {
    fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            ingress_class: self.ingress_class.clone(),
            use_ingress_class_only: self.use_ingress_class_only,
            config_map: self.config_map.clone(),
            custom_resources_enabled: self.custom_resources,
            external_service: self.external_service.as_deref().map(ObjectKey::parse),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List which watched kinds the cluster serves
    Kinds,
    /// Watch the cluster and print sync targets as they are enqueued
    Watch {
        /// Restrict watches to one namespace
        #[arg(long = "ns")]
        namespace: Option<String>,
        /// Queue drain interval in milliseconds
        #[arg(long = "tick-ms", default_value_t = 100)]
        tick_ms: u64,
    },
    /// Feed a JSON-lines watch event log through the pipeline offline
    Replay {
        /// File with one `{"kind": .., "watch": {"event": .., "payload": ..}}` object per line
        file: std::path::PathBuf,
    },
}

/// One recorded watch event.
#[derive(Debug, Deserialize)]
struct ReplayLine {
    kind: ResourceKind,
    watch: WatchEvent,
}

fn init_tracing() {
    let env = std::env::var("KIC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KIC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KIC_METRICS_ADDR; expected host:port");
        }
    }
}

struct Pipeline {
    informer: Arc<Informer>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<TaskQueue>,
}

fn build(config: DispatchConfig, queue_cap: usize) -> Pipeline {
    let informer = Arc::new(Informer::new());
    let queue = Arc::new(TaskQueue::with_capacity(queue_cap));
    let index = Arc::new(ClusterIndex::new(config.clone(), informer.clone(), queue.clone()));
    let dispatcher = Arc::new(Dispatcher::new(config, queue.clone(), index));
    Pipeline { informer, dispatcher, queue }
}

fn print_targets(output: Output, targets: &[SyncTarget]) -> Result<()> {
    for t in targets {
        match output {
            Output::Human => println!("sync {}", t),
            Output::Json => println!("{}", serde_json::to_string(t)?),
        }
    }
    Ok(())
}

fn watched_kinds(config: &DispatchConfig, served: &[ResourceKind]) -> Vec<ResourceKind> {
    ResourceKind::ALL
        .iter()
        .copied()
        .filter(|k| !k.is_custom() || config.custom_resources_enabled)
        .filter(|k| {
            let ok = served.contains(k);
            if !ok {
                warn!(kind = %k, "kind not served by the cluster; not watching");
            }
            ok
        })
        .collect()
}

async fn run_watch(cli: &Cli, namespace: Option<String>, tick_ms: u64) -> Result<()> {
    let config = cli.config.dispatch_config();
    let client = kube::Client::try_default().await.context("creating kube client")?;
    let served = kic_kubehub::discover(client.clone()).await?;
    let kinds = watched_kinds(&config, &served);
    info!(kinds = ?kinds, ns = ?namespace, "starting watchers");

    let p = build(config, cli.config.queue_cap);
    let (tx, mut rx) = spawn_pipeline(p.informer, p.dispatcher, p.queue, cli.config.queue_cap, Duration::from_millis(tick_ms));
    let handles = kic_kubehub::spawn_watchers(client, &kinds, namespace, tx);

    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(targets) => print_targets(cli.output, &targets)?,
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("interrupted; stopping watchers");
                break;
            }
        }
    }
    for h in handles {
        h.abort();
    }
    Ok(())
}

fn run_replay(cli: &Cli, file: &std::path::Path) -> Result<()> {
    let p = build(cli.config.dispatch_config(), cli.config.queue_cap);
    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("opening {}", file.display()))?,
    );
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: ReplayLine =
            serde_json::from_str(&line).with_context(|| format!("{}:{}: invalid watch event", file.display(), i + 1))?;
        ingest(&p.informer, &p.dispatcher, rec.kind, rec.watch);
        print_targets(cli.output, &p.queue.drain_ready())?;
    }
    if p.queue.dropped() > 0 {
        warn!(dropped = p.queue.dropped(), "sync queue overflowed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Kinds => {
            let client = kube::Client::try_default().await.context("creating kube client")?;
            let served = kic_kubehub::discover(client).await?;
            match cli.output {
                Output::Human => {
                    for k in ResourceKind::ALL {
                        let state = if served.contains(&k) { "served" } else { "missing" };
                        println!("{} • {} • {}", kic_kubehub::api_group(k), k, state);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&served)?),
            }
        }
        Commands::Watch { namespace, tick_ms } => run_watch(&cli, namespace.clone(), *tick_ms).await?,
        Commands::Replay { file } => run_replay(&cli, file)?,
    }
    Ok(())
}
