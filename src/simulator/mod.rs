//! Simulated ranked-list feed: correlated prices, category rankings and a
//! websocket gateway speaking the feed protocol.

mod categories;
mod gateway;
mod market;
mod session;
mod universe;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::random;
use serde_json::json;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::{self, MissedTickBehavior};

use crate::constants::{
    ACTIVE_FRACTION, CORRELATION_REFRESH_SECS, GATEWAY_PORT, LIST_SIZE, PUBLISH_INTERVAL_MS,
    TICK_INTERVAL_MS, UNIVERSE_SIZE,
};
use crate::logging;
use crate::protocol::FeedMessage;

pub use categories::Category;
pub use gateway::FeedFrame;
pub use session::FeedSession;

use gateway::run_gateway;

#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    pub gateway_addr: SocketAddr,
    pub tick_interval: Duration,
    pub publish_interval: Duration,
    pub correlation_refresh: Duration,
    pub list_size: usize,
    pub universe_size: usize,
    pub active_fraction: f64,
    /// Stop after this many aggregate messages.
    pub max_ticks: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            gateway_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), GATEWAY_PORT),
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            publish_interval: Duration::from_millis(PUBLISH_INTERVAL_MS),
            correlation_refresh: Duration::from_secs(CORRELATION_REFRESH_SECS),
            list_size: LIST_SIZE,
            universe_size: UNIVERSE_SIZE,
            active_fraction: ACTIVE_FRACTION,
            max_ticks: None,
            seed: None,
        }
    }
}

pub async fn run_with_config(config: SimulatorConfig) -> Result<()> {
    let config = Arc::new(config);
    let seed = config.seed.unwrap_or_else(random);

    let session = FeedSession::new(
        seed,
        config.universe_size,
        config.list_size,
        config.active_fraction,
    )?;
    let session = Arc::new(RwLock::new(session));

    logging::info(
        "simulator.start",
        "Ranked list simulator starting",
        json!({
            "seed": seed,
            "universe_size": config.universe_size,
            "list_size": config.list_size,
            "lists": Category::ALL.iter().map(|category| category.name()).collect::<Vec<_>>(),
        }),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let (frames, _) = broadcast::channel::<FeedFrame>(4096);
    let signals = tokio::spawn(stop_on_signal(stop_tx.clone()));

    let outcome = tokio::try_join!(
        run_gateway(
            config.gateway_addr,
            Arc::clone(&session),
            frames.clone(),
            stop_rx.clone()
        ),
        run_price_rounds(
            Arc::clone(&config),
            Arc::clone(&session),
            frames.clone(),
            stop_tx,
            stop_rx.clone()
        ),
        run_rankings(
            Arc::clone(&config),
            Arc::clone(&session),
            frames,
            stop_rx.clone()
        ),
        run_correlation_refresh(Arc::clone(&config), session, stop_rx)
    );

    signals.abort();
    let _ = signals.await;

    if let Err(err) = &outcome {
        logging::error(
            "simulator.failed",
            "Simulator task failed",
            json!({ "error": format!("{err:?}") }),
        );
    }
    outcome?;
    logging::info_simple("simulator.stop", "Ranked list simulator stopped");
    Ok(())
}

async fn stop_on_signal(stop: watch::Sender<bool>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("failed to listen for SIGINT")?;
            "SIGINT"
        }
    };
    logging::info(
        "signal.received",
        "Stopping simulator",
        json!({ "signal": name }),
    );
    let _ = stop.send(true);
    Ok(())
}

/// Resolves once the stop flag is raised or its sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn broadcast_all(sender: &broadcast::Sender<FeedFrame>, messages: &[FeedMessage]) -> Result<()> {
    for message in messages {
        // No receivers simply means no client is connected yet.
        let _ = sender.send(FeedFrame::encode(message)?);
    }
    Ok(())
}

async fn run_price_rounds(
    config: Arc<SimulatorConfig>,
    session: Arc<RwLock<FeedSession>>,
    frames: broadcast::Sender<FeedFrame>,
    stop_tx: watch::Sender<bool>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let mut rounds = time::interval(config.tick_interval);
    rounds.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut emitted: usize = 0;

    loop {
        tokio::select! {
            _ = rounds.tick() => {}
            _ = stopped(&mut stop) => break,
        }

        let aggregates = session.write().await.step();
        broadcast_all(&frames, &aggregates)?;
        emitted = emitted.saturating_add(aggregates.len());

        if config.max_ticks.is_some_and(|max| emitted >= max) {
            logging::info(
                "prices.limit",
                "Aggregate budget reached",
                json!({ "emitted": emitted }),
            );
            let _ = stop_tx.send(true);
            break;
        }
    }

    logging::info_simple("prices.stop", "Price rounds stopped");
    Ok(())
}

async fn run_rankings(
    config: Arc<SimulatorConfig>,
    session: Arc<RwLock<FeedSession>>,
    frames: broadcast::Sender<FeedFrame>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let mut publishes = time::interval(config.publish_interval);
    publishes.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = publishes.tick() => {}
            _ = stopped(&mut stop) => break,
        }

        // Broadcast under the lock so a concurrent snapshot can never observe
        // a ranking whose delta has not been queued yet.
        let mut guard = session.write().await;
        let deltas = guard.publish();
        broadcast_all(&frames, &deltas)?;
        drop(guard);

        if !deltas.is_empty() {
            logging::info(
                "rankings.publish",
                "Published ranking deltas",
                json!({ "lists": deltas.len() }),
            );
        }
    }

    logging::info_simple("rankings.stop", "Ranking publisher stopped");
    Ok(())
}

async fn run_correlation_refresh(
    config: Arc<SimulatorConfig>,
    session: Arc<RwLock<FeedSession>>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = time::sleep(config.correlation_refresh) => {
                session.write().await.refresh_correlation()?;
                logging::info_simple("correlation.refresh", "Correlation matrix refreshed");
            }
            _ = stopped(&mut stop) => break,
        }
    }

    logging::info_simple("correlation.stop", "Correlation refresher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_resolves_on_flag_or_closed_sender() {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let _ = stop_tx.send(true);
        time::timeout(Duration::from_secs(1), stopped(&mut stop_rx))
            .await
            .expect("flag raised");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        drop(stop_tx);
        time::timeout(Duration::from_secs(1), stopped(&mut stop_rx))
            .await
            .expect("sender dropped");
    }
}
