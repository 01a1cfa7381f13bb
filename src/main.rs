use clap::{Parser, Subcommand};
use split_zoom::broker::{Broker, RedisBroker};
use split_zoom::config::{self, ServiceConfig};
use split_zoom::imaging::ZoomPercent;
use split_zoom::notifier::Notifier;
use split_zoom::pipeline::Orchestrator;
use split_zoom::registry::PushRegistry;
use split_zoom::rpc::{self, HttpResizeClient};
use split_zoom::storage::HttpImageSink;
use split_zoom::{push, telemetry, work_item};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error>;

#[derive(Parser)]
#[command(name = "split-zoom")]
#[command(about = "Distributed image zoom pipeline")]
#[command(long_about = "\
Distributed image zoom pipeline

An image is cut into a TOP and a BOTTOM half, each half is resized by its own
worker, and the results are stacked back together, stored, and announced.

Processes (run each in its own terminal or container):

  split-zoom worker --bind 127.0.0.1:7001    # resize worker for TOP halves
  split-zoom worker --bind 127.0.0.1:7002    # resize worker for BOTTOM halves
  split-zoom orchestrator                    # consumes work, drives the workers
  split-zoom push                            # WebSocket notifications at /ws

Feed it:

  split-zoom submit photo.png --zoom 150

Run 'split-zoom gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// Config file (stock defaults when it doesn't exist)
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a resize worker
    Worker {
        /// Listen address (overrides worker.bind)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Consume work messages and drive the resize workers
    Orchestrator,
    /// Serve WebSocket completion notifications
    Push,
    /// Publish an image file as a work message
    Submit {
        /// Image file to zoom
        image: PathBuf,
        /// Zoom percentage (100 = unchanged)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        zoom: u32,
    },
    /// Print a stock config file with all options documented
    GenConfig,
    /// Load, merge, and validate the config, then print the effective values
    CheckConfig,
}

fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let service_config = match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            return Ok(());
        }
        _ => config::load_config(&cli.config)?,
    };

    if let Command::CheckConfig = cli.command {
        println!("# {}: OK", cli.config.display());
        print!("{}", toml::to_string_pretty(&service_config)?);
        return Ok(());
    }

    telemetry::init_tracing(&service_config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, service_config))
}

async fn run(command: Command, cfg: ServiceConfig) -> Result<(), BoxError> {
    match command {
        Command::Worker { bind } => {
            let bind = bind.unwrap_or(cfg.worker.bind);
            rpc::run_worker(
                bind,
                cfg.worker.limits(),
                cfg.worker.max_body_bytes,
                shutdown_signal(),
            )
            .await?;
        }
        Command::Orchestrator => {
            let broker = Arc::new(RedisBroker::connect(&cfg.broker.url).await?);
            let timeout = cfg.workers.timeout();
            let orchestrator = Orchestrator::new(
                Arc::new(HttpResizeClient::new(&cfg.workers.top_url, timeout)?),
                Arc::new(HttpResizeClient::new(&cfg.workers.bottom_url, timeout)?),
                Arc::new(HttpImageSink::new(cfg.sink_options())?),
                Notifier::new(broker.clone(), cfg.broker.notification_topic.clone()),
                cfg.pipeline_settings(),
            );
            info!(
                top = %cfg.workers.top_url,
                bottom = %cfg.workers.bottom_url,
                storage = %cfg.storage.url,
                "Orchestrator configured"
            );
            let subscription = broker.subscribe(&cfg.broker.work_topic).await?;
            orchestrator.run(subscription, shutdown_watch()).await?;
        }
        Command::Push => {
            let broker = RedisBroker::connect(&cfg.broker.url).await?;
            let subscription = broker.subscribe(&cfg.broker.notification_topic).await?;
            let registry = Arc::new(PushRegistry::new());
            let shutdown = shutdown_watch();

            let listener = TcpListener::bind(cfg.push.bind).await?;
            info!(bind = %listener.local_addr()?, path = push::WS_PATH, "Push server listening");
            let mut server_shutdown = shutdown.clone();
            let server = tokio::spawn(rpc::serve(
                listener,
                push::router(registry.clone()),
                async move {
                    let _ = server_shutdown.changed().await;
                },
            ));

            push::run_listener(subscription, registry, shutdown).await?;
            server.await??;
        }
        Command::Submit { image, zoom } => {
            let bytes = std::fs::read(&image)?;
            let zoom = ZoomPercent::new(zoom).ok_or("zoom must be positive")?;
            let payload = work_item::encode(&bytes, zoom);

            let broker = RedisBroker::connect(&cfg.broker.url).await?;
            broker.publish(&cfg.broker.work_topic, &payload).await?;
            println!(
                "Submitted {} ({} bytes) at {} to '{}'",
                image.display(),
                bytes.len(),
                zoom,
                cfg.broker.work_topic
            );
        }
        Command::GenConfig | Command::CheckConfig => {}
    }
    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Watch channel flipped to `true` on Ctrl-C.
fn shutdown_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });
    rx
}
