use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::replay::ReplayArgs;
use crate::simulator::SimulatorConfig;
use crate::watch::WatchArgs;

#[derive(Debug, Parser)]
#[command(author, version, about = "Frame-paced ranked list feed engine and simulator")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(self) -> Command {
        self.command
            .unwrap_or_else(|| Command::Serve(ServeArgs::default()))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the simulated feed and its websocket gateway
    Serve(ServeArgs),
    /// Connect the engine to a gateway and print ranked lists
    Watch(WatchArgs),
    /// Feed a JSON-lines capture through the engine and print the lists
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ServeArgs {
    /// Gateway bind address (defaults to 127.0.0.1:9001)
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// Milliseconds between price rounds
    #[arg(long)]
    pub tick_interval_ms: Option<u64>,

    /// Milliseconds between ranking publications
    #[arg(long)]
    pub publish_interval_ms: Option<u64>,

    /// Rows per ranked list
    #[arg(long)]
    pub list_size: Option<usize>,

    /// Number of simulated listings
    #[arg(long)]
    pub universe_size: Option<usize>,

    /// Seed for a reproducible session
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after emitting this many aggregates
    #[arg(long)]
    pub max_ticks: Option<usize>,
}

impl ServeArgs {
    pub fn into_config(self) -> SimulatorConfig {
        let mut config = SimulatorConfig::default();
        if let Some(addr) = self.addr {
            config.gateway_addr = addr;
        }
        if let Some(ms) = self.tick_interval_ms {
            config.tick_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = self.publish_interval_ms {
            config.publish_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(size) = self.list_size {
            config.list_size = size;
        }
        if let Some(size) = self.universe_size {
            config.universe_size = size;
        }
        config.seed = self.seed;
        config.max_ticks = self.max_ticks;
        config
    }
}
