//! Clean command

use clap::Args;
use tracing::info;

use super::{bootstrap, connect, BackendArgs};
use crate::domain::cache::CleanType;

#[derive(Args, Clone, Debug)]
pub struct CleanArgs {
    /// What to clear: all, data, user or expired
    #[arg(long = "type", default_value = "all")]
    pub kind: CleanType,
}

pub async fn run(backend: &BackendArgs, args: CleanArgs) -> anyhow::Result<()> {
    let (_, driver) = bootstrap(backend)?;
    connect(&driver).await?;

    let cleaned = driver.clean_cache(args.kind).await;
    info!(
        driver = driver.name(),
        kind = %args.kind,
        epoch = driver.epoch().current(),
        cleaned,
        "Clean finished"
    );
    driver.quit().await;

    if !cleaned {
        anyhow::bail!(
            "The {} backend did not fully clear ({}); earlier keys are still invalidated",
            driver.name(),
            args.kind
        );
    }
    Ok(())
}
