//! Housekeep command - one pass, or a periodic task until interrupted

use std::time::Duration;

use clap::Args;
use tokio::signal;
use tracing::info;

use super::{bootstrap, connect, BackendArgs};
use crate::infrastructure::cache::spawn_housekeeping_task;

#[derive(Args, Clone, Debug)]
pub struct HousekeepArgs {
    /// Keep running on the configured interval until Ctrl+C / SIGTERM
    #[arg(long)]
    pub watch: bool,

    /// Interval in seconds (overrides config)
    #[arg(long)]
    pub interval: Option<u64>,
}

pub async fn run(backend: &BackendArgs, args: HousekeepArgs) -> anyhow::Result<()> {
    let (config, driver) = bootstrap(backend)?;
    connect(&driver).await?;

    if !args.watch {
        driver.housekeeping().await;
        driver.quit().await;
        return Ok(());
    }

    let every = Duration::from_secs(
        args.interval
            .unwrap_or(config.housekeeping.interval_secs)
            .max(1),
    );
    let handle = spawn_housekeeping_task(driver.clone(), every);

    shutdown_signal().await?;
    handle.abort();
    driver.quit().await;

    info!("Housekeeping stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => {
                result?;
                info!("Received Ctrl+C, stopping");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, stopping");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        info!("Received Ctrl+C, stopping");
    }

    Ok(())
}
