use std::{path::Path, sync::Arc, time::Duration};

use jemallocator::Jemalloc;
use podlog::{
    cluster::{self, Kubernetes},
    config::{self, Config, DEFAULT_CONFIG_PATH},
    run::{self, Run},
    telemetry,
};
use tokio::runtime::Builder;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Failed to load podlog config: {0}")]
    Config(#[from] config::Error),
    #[error("Could not connect to the cluster: {0}")]
    Cluster(#[from] cluster::Error),
    #[error("Run failed: {0}")]
    Run(#[from] run::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(addr) = config.prometheus_addr {
        telemetry::install_prometheus(addr)?;
    }

    let cluster = Kubernetes::connect(config.kubeconfig_path.as_deref()).await?;
    let summary = Run::new(&config, Arc::new(cluster)).execute().await?;
    info!(
        "Run complete: {cycles} cycles, {deferrals} deferred, {created} pods created, {failed} failed",
        cycles = summary.cycles,
        deferrals = summary.deferrals,
        created = summary.pods_created,
        failed = summary.pods_failed,
    );
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting podlog {version} run.");

    let config = Config::load(Path::new(DEFAULT_CONFIG_PATH))?;

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let res = runtime.block_on(inner_main(config));
    if let Err(ref err) = res {
        error!("{err}");
    }
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Bye. :)");
    res
}
