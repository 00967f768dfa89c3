//! Async owner of an [`Engine`]: commands in, one flush per frame.
//!
//! The frame ticker only exists while at least one list is subscribed, so an
//! idle engine does no periodic work and unsubscribing the last list stops
//! the loop.

use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::engine::{Engine, EngineConfig};
use crate::logging;
use crate::model::{RankMove, Record};
use crate::protocol::ControlMessage;
use crate::subscription::SubscriptionState;

/// Everything the rendering layer reads for one list.
#[derive(Debug, Clone, Serialize)]
pub struct ListView {
    pub name: String,
    pub state: SubscriptionState,
    pub ready: bool,
    pub sequence: u64,
    pub last_update_ms: Option<u128>,
    pub records: Vec<Record>,
    pub moves: Vec<RankMove>,
}

impl ListView {
    pub(crate) fn capture(engine: &Engine, list: &str) -> Option<Self> {
        let store = engine.list(list)?;
        Some(Self {
            name: list.to_string(),
            state: engine.state(list),
            ready: store.is_ready(),
            sequence: store.sequence(),
            last_update_ms: store.last_update_ms(),
            records: store.ordered_records().cloned().collect(),
            moves: store.rank_moves().to_vec(),
        })
    }
}

enum Command {
    Connected,
    Disconnected,
    Visible,
    Payload(String),
    Subscribe(String),
    Unsubscribe(String),
    View {
        list: String,
        reply: oneshot::Sender<Option<ListView>>,
    },
    Shutdown,
}

/// Cheap, cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn connected(&self) -> bool {
        self.send(Command::Connected)
    }

    pub fn disconnected(&self) -> bool {
        self.send(Command::Disconnected)
    }

    pub fn became_visible(&self) -> bool {
        self.send(Command::Visible)
    }

    pub fn deliver(&self, payload: String) -> bool {
        self.send(Command::Payload(payload))
    }

    pub fn subscribe(&self, list: impl Into<String>) -> bool {
        self.send(Command::Subscribe(list.into()))
    }

    pub fn unsubscribe(&self, list: impl Into<String>) -> bool {
        self.send(Command::Unsubscribe(list.into()))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }

    /// Read a consistent view of one list between frames.
    pub async fn view(&self, list: impl Into<String>) -> Option<ListView> {
        let (reply, response) = oneshot::channel();
        if !self.send(Command::View {
            list: list.into(),
            reply,
        }) {
            return None;
        }
        response.await.ok().flatten()
    }

    pub async fn ordered_records(&self, list: impl Into<String>) -> Vec<Record> {
        self.view(list)
            .await
            .map(|view| view.records)
            .unwrap_or_default()
    }

    pub async fn is_ready(&self, list: impl Into<String>) -> bool {
        self.view(list).await.is_some_and(|view| view.ready)
    }

    pub async fn sequence(&self, list: impl Into<String>) -> Option<u64> {
        self.view(list).await.map(|view| view.sequence)
    }

    pub async fn last_update(&self, list: impl Into<String>) -> Option<u128> {
        self.view(list).await.and_then(|view| view.last_update_ms)
    }
}

/// Spawn the engine task. Outbound control messages go to `outbound`.
pub fn spawn_engine(
    config: EngineConfig,
    outbound: mpsc::UnboundedSender<ControlMessage>,
) -> (EngineHandle, JoinHandle<Result<()>>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    let engine = Engine::new(config, outbound);
    let task = tokio::spawn(run_engine(engine, receiver));
    (EngineHandle { commands }, task)
}

async fn run_engine(mut engine: Engine, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<()> {
    logging::info_simple("engine.start", "Ranked list engine started");

    let mut frames: Option<Interval> = None;
    let mut reporter = interval(engine.config().metrics_interval);
    reporter.set_missed_tick_behavior(MissedTickBehavior::Skip);
    reporter.reset();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                if !apply_command(&mut engine, command) {
                    break;
                }
                sync_frame_ticker(&engine, &mut frames);
            }
            _ = next_frame(&mut frames) => {
                engine.poll_timers(Instant::now());
                engine.flush_frame();
            }
            _ = reporter.tick() => {
                let stats = engine.take_stats();
                if !stats.is_idle() {
                    stats.log_summary(engine.list_names().len());
                }
            }
        }
    }

    logging::info_simple("engine.stop", "Ranked list engine stopped");
    Ok(())
}

/// Returns false when the engine should stop.
fn apply_command(engine: &mut Engine, command: Command) -> bool {
    let now = Instant::now();
    match command {
        Command::Connected => engine.connected(now),
        Command::Disconnected => engine.disconnected(),
        Command::Visible => engine.became_visible(now),
        Command::Payload(payload) => {
            engine.handle_text(&payload, now);
        }
        Command::Subscribe(list) => {
            engine.subscribe(&list, now);
        }
        Command::Unsubscribe(list) => {
            engine.unsubscribe(&list);
        }
        Command::View { list, reply } => {
            let _ = reply.send(ListView::capture(engine, &list));
        }
        Command::Shutdown => return false,
    }
    true
}

fn sync_frame_ticker(engine: &Engine, frames: &mut Option<Interval>) {
    match (engine.has_subscriptions(), frames.is_some()) {
        (true, false) => {
            let period = engine.config().frame_interval;
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            *frames = Some(ticker);
            logging::info(
                "frames.start",
                "Frame ticker started",
                json!({ "interval_ms": period.as_millis() }),
            );
        }
        (false, true) => {
            *frames = None;
            logging::info_simple("frames.stop", "Frame ticker stopped, no lists subscribed");
        }
        _ => {}
    }
}

async fn next_frame(frames: &mut Option<Interval>) {
    match frames {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
