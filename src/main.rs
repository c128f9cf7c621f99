use clap::Parser;
use ringcast::{Broker, BrokerConfig, BrokerOptions, StatusReporter};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ringcast", version, about = "Pub/sub message broker")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, default_value = "./config/broker.yaml")]
    config: PathBuf,

    /// Forward publications to the durable store
    #[arg(long)]
    persist_enabled: Option<bool>,

    /// Append publications to the ring buffer log
    #[arg(long)]
    mmap_enabled: Option<bool>,

    /// Dispatch by priority instead of stack order
    #[arg(long)]
    priority_enabled: Option<bool>,

    /// Log periodic status reports
    #[arg(long)]
    dashboard_enabled: Option<bool>,
}

impl Args {
    fn options(&self) -> BrokerOptions {
        BrokerOptions {
            persist_enabled: self.persist_enabled,
            mmap_enabled: self.mmap_enabled,
            priority_enabled: self.priority_enabled,
            dashboard_enabled: self.dashboard_enabled,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match BrokerConfig::load(&args.config) {
        Ok(config) => config.with_options(args.options()),
        Err(e) => {
            error!("Cannot load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "ringcast {} starting, publish on {}, ingestion on {}",
        env!("CARGO_PKG_VERSION"),
        config.publish_addr(),
        config.ingest_addr()
    );

    let mut broker = match Broker::bind(config).await {
        Ok(broker) => broker,
        Err(e) => {
            error!("Cannot start broker, stopping: {}", e);
            std::process::exit(1);
        }
    };

    if broker.config().dashboard_enabled {
        let interval = broker.config().status_interval();
        broker.inject_module(StatusReporter::new(interval));
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = broker.run_until(shutdown).await {
        error!("Broker stopped with error: {}", e);
        std::process::exit(1);
    }
}
