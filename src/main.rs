use clap::Parser;
use cachebridge::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let backend = &cli.backend;

    match cli.command {
        Command::Check => cli::check::run(backend).await,
        Command::Version => cli::check::version(backend).await,
        Command::Get(args) => cli::entry::get(backend, args).await,
        Command::Put(args) => cli::entry::put(backend, args).await,
        Command::Clean(args) => cli::clean::run(backend, args).await,
        Command::Housekeep(args) => cli::housekeep::run(backend, args).await,
        Command::Settings => cli::settings::run(backend).await,
    }
}
