use std::sync::Arc;

use clap::Parser;
use rqfs::loc::inst;
use rqfsd::{
    processor::{SyncOptions, SyncProcessor},
    queue::{QueuePersist, RequestQueue},
    storage, Shutdown,
};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "rqfsd")]
#[command(author, version, about, long_about=None)]
struct Cli {
    instance: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let config_file = inst::config_file(&cli.instance)?;
    if !config_file.exists() {
        anyhow::bail!("No such config file: {config_file}");
    }
    log::info!("Found config file: {config_file}");

    let config = rqfs::Config::load_from_file(&config_file).await?;
    log::info!("Loaded config: {config:?}");

    tokio::fs::create_dir_all(&config.local_dir).await?;
    tokio::fs::create_dir_all(&config.work_dir).await?;

    let work = storage::fs::FileSystem::new(&config.work_dir)?;
    let remote = storage::http::ContentRepo::new(config.remote_url.clone())?;

    let queue_file = inst::queue_file(&cli.instance)?;
    let queue = Arc::new(RequestQueue::new(QueuePersist::OnDisk(queue_file)));
    queue.load_from_disk().await?;

    let processor = SyncProcessor::new(
        queue.clone(),
        Arc::new(work.clone()),
        Arc::new(remote.clone()),
        SyncOptions::from(&config),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = tokio::spawn(processor.run(stop_rx));

    wait_for_termination().await?;
    log::info!("stopping at the next entry boundary");
    let _ = stop_tx.send(true);
    runner.await?;

    tokio::try_join!(queue.shutdown(), work.shutdown(), remote.shutdown())?;
    Ok(())
}

/// Resolves once the service is asked to terminate.
async fn wait_for_termination() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => log::info!("received SIGTERM"),
        _ = sigint.recv() => log::info!("received SIGINT"),
    }
    Ok(())
}
