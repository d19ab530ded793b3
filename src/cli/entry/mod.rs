//! Get and put commands

use std::time::Duration;

use clap::Args;

use super::{bootstrap, connect, BackendArgs};

#[derive(Args, Clone, Debug)]
pub struct GetArgs {
    /// Cache key
    pub key: String,

    /// Freshness window in seconds (defaults to the configured TTL)
    #[arg(long)]
    pub max_age: Option<u64>,
}

#[derive(Args, Clone, Debug)]
pub struct PutArgs {
    /// Cache key
    pub key: String,

    /// Value to store; omit together with --delete to remove the key
    #[arg(required_unless_present = "delete")]
    pub value: Option<String>,

    /// Time to live in seconds (defaults to the configured TTL)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Delete the key instead of writing it
    #[arg(long, conflicts_with = "value")]
    pub delete: bool,
}

/// Prints the value stored under a key, failing on a miss
pub async fn get(backend: &BackendArgs, args: GetArgs) -> anyhow::Result<()> {
    let (_, driver) = bootstrap(backend)?;
    connect(&driver).await?;

    let value = driver
        .get_data(&args.key, args.max_age.map(Duration::from_secs))
        .await;
    driver.quit().await;

    match value {
        Some(value) => {
            println!("{}", value);
            Ok(())
        }
        None => anyhow::bail!("Cache miss for key '{}'", args.key),
    }
}

/// Writes or deletes one key
pub async fn put(backend: &BackendArgs, args: PutArgs) -> anyhow::Result<()> {
    let (_, driver) = bootstrap(backend)?;
    connect(&driver).await?;

    let value = if args.delete { None } else { args.value.as_deref() };
    let applied = driver
        .put_data(&args.key, value, args.ttl.map(Duration::from_secs))
        .await;
    driver.quit().await;

    if !applied {
        anyhow::bail!("The {} backend rejected the write", driver.name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cli::{Cli, Command};
    use clap::Parser;

    #[test]
    fn test_put_requires_value_or_delete() {
        assert!(Cli::try_parse_from(["cachebridge", "put", "k"]).is_err());
        assert!(Cli::try_parse_from(["cachebridge", "put", "k", "--delete"]).is_ok());
        assert!(Cli::try_parse_from(["cachebridge", "put", "k", "v", "--delete"]).is_err());
    }

    #[test]
    fn test_put_with_ttl() {
        let cli = Cli::try_parse_from(["cachebridge", "put", "k", "v", "--ttl", "30"]).unwrap();

        match cli.command {
            Command::Put(args) => {
                assert_eq!(args.value.as_deref(), Some("v"));
                assert_eq!(args.ttl, Some(30));
                assert!(!args.delete);
            }
            _ => panic!("expected put"),
        }
    }
}
