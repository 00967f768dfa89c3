use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

use crate::constants::{GATEWAY_URL, RECONNECT_BACKOFF_MS};
use crate::engine::EngineConfig;
use crate::logging;
use crate::model::MoveDirection;
use crate::runtime::{spawn_engine, ListView};
use crate::simulator::Category;
use crate::transport::run_websocket;

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    /// Gateway websocket URL
    #[arg(short, long, default_value = GATEWAY_URL)]
    pub url: String,

    /// List to follow; repeat for several (defaults to every category)
    #[arg(short = 'L', long = "list")]
    pub list: Vec<String>,

    /// Rows printed per list
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Milliseconds between printed refreshes
    #[arg(long, default_value_t = 1_000)]
    pub refresh_ms: u64,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration_secs: Option<u64>,
}

impl WatchArgs {
    pub fn lists(&self) -> Vec<String> {
        if self.list.is_empty() {
            Category::ALL
                .iter()
                .map(|category| category.name().to_string())
                .collect()
        } else {
            self.list.clone()
        }
    }
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let lists = args.lists();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (engine, engine_task) = spawn_engine(EngineConfig::default(), outbound_tx);
    for list in &lists {
        engine.subscribe(list.as_str());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let transport = tokio::spawn(run_websocket(
        args.url.clone(),
        engine.clone(),
        outbound_rx,
        Duration::from_millis(RECONNECT_BACKOFF_MS),
        shutdown_rx,
    ));

    logging::info(
        "watch.start",
        "Watching ranked lists",
        json!({ "url": args.url, "lists": lists }),
    );

    let mut refresh = time::interval(Duration::from_millis(args.refresh_ms.max(1)));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = async {
        match args.duration_secs {
            Some(secs) => time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                for list in &lists {
                    if let Some(view) = engine.view(list.as_str()).await {
                        println!("{}", render(&view, args.limit));
                    }
                }
            }
            _ = &mut deadline => break,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    transport.await.context("transport task panicked")??;
    engine.shutdown();
    engine_task.await.context("engine task panicked")??;
    Ok(())
}

/// Plain-text table for one list, best rank first.
pub fn render(view: &ListView, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== {} [{}] seq={} rows={}{}",
        view.name,
        view.state,
        view.sequence,
        view.records.len(),
        if view.ready { "" } else { " (stale)" }
    );

    for record in view.records.iter().take(limit) {
        let fields = &record.fields;
        let marker = view
            .moves
            .iter()
            .find(|moved| moved.symbol == record.symbol)
            .map(|moved| match moved.direction {
                MoveDirection::Improved => "^",
                MoveDirection::Worsened => "v",
                MoveDirection::Unchanged => " ",
            })
            .unwrap_or(" ");
        let _ = writeln!(
            out,
            "{:>4}{} {:<8} {:>10} {:>8} {:>12} {:>6}",
            record.rank,
            marker,
            record.symbol,
            format_number(fields.price, 2),
            fields
                .change_percent
                .map(|change| format!("{change:+.2}%"))
                .unwrap_or_else(|| "-".into()),
            format_number(fields.volume_today, 0),
            format_number(fields.rvol, 2),
        );
    }
    out
}

fn format_number(value: Option<f64>, decimals: usize) -> String {
    value
        .filter(|value| value.is_finite())
        .map(|value| format!("{value:.decimals$}"))
        .unwrap_or_else(|| "-".into())
}
