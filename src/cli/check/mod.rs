//! Check and version commands

use tracing::info;

use super::{bootstrap, connect, BackendArgs};

/// Reports whether the backend is usable and connects to it
pub async fn run(backend: &BackendArgs) -> anyhow::Result<()> {
    let (config, driver) = bootstrap(backend)?;

    info!(
        driver = driver.name(),
        kind = ?driver.kind(),
        "Checking cache backend"
    );
    connect(&driver).await?;

    println!(
        "{} ({}) ready, epoch {}",
        driver.name(),
        config.cache.cache_type,
        driver.epoch().current()
    );

    driver.quit().await;
    Ok(())
}

/// Prints the backend software version
pub async fn version(backend: &BackendArgs) -> anyhow::Result<()> {
    let (_, driver) = bootstrap(backend)?;
    connect(&driver).await?;

    let Some(version) = driver.get_version().await else {
        anyhow::bail!("The {} backend did not report a version", driver.name());
    };
    println!("{}", version);

    driver.quit().await;
    Ok(())
}
