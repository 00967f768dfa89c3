use anyhow::Result;
use clap::Parser;
use ranked_list_sync::cli::{self, Cli};
use ranked_list_sync::replay;
use ranked_list_sync::simulator;
use ranked_list_sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command() {
        cli::Command::Serve(args) => simulator::run_with_config(args.into_config()).await,
        cli::Command::Watch(args) => watch::run(args).await,
        cli::Command::Replay(args) => replay::run(args),
    }
}
