//! Synchronous core: routing, per-list state and the frame flush.
//!
//! The engine never spawns or sleeps. Callers hand it the current `Instant`
//! and drive `flush_frame`/`poll_timers` from a ticker (see `runtime`).

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::mpsc;

use crate::constants::{
    AGGREGATE_QUEUE_CAP, DELTA_QUEUE_CAP, FRAME_INTERVAL_MS, METRICS_REPORT_SECS,
    SNAPSHOT_TIMEOUT_MS,
};
use crate::list::TickerList;
use crate::logging;
use crate::metrics::EngineStats;
use crate::model::{AggregateTick, DeltaAction, RankMove, Record, Row};
use crate::protocol::{ControlMessage, DecodeError, FeedMessage};
use crate::scheduler::{FlushReport, FrameQueues};
use crate::subscription::{Subscription, SubscriptionState};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub frame_interval: Duration,
    pub delta_queue_cap: usize,
    pub aggregate_queue_cap: usize,
    pub snapshot_timeout: Duration,
    pub metrics_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(FRAME_INTERVAL_MS),
            delta_queue_cap: DELTA_QUEUE_CAP,
            aggregate_queue_cap: AGGREGATE_QUEUE_CAP,
            snapshot_timeout: Duration::from_millis(SNAPSHOT_TIMEOUT_MS),
            metrics_interval: Duration::from_secs(METRICS_REPORT_SECS),
        }
    }
}

/// Where an inbound message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    SnapshotApplied,
    DeltaQueued,
    DeltaDiscarded { resync_sent: bool },
    AggregateQueued { lists: usize },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unrecognized,
    Malformed,
    NotSubscribed,
}

struct ListSlot {
    store: TickerList,
    queues: FrameQueues,
    subscription: Subscription,
}

struct Outbox {
    sender: mpsc::UnboundedSender<ControlMessage>,
    connected: bool,
}

impl Outbox {
    fn send(&self, message: ControlMessage) -> bool {
        self.connected && self.sender.send(message).is_ok()
    }
}

pub struct Engine {
    config: EngineConfig,
    outbox: Outbox,
    lists: IndexMap<String, ListSlot>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig, outbound: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self {
            config,
            outbox: Outbox {
                sender: outbound,
                connected: false,
            },
            lists: IndexMap::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.outbox.connected
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.lists.is_empty()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.lists.keys().cloned().collect()
    }

    /// Start tracking a list. Returns false when it was already subscribed.
    pub fn subscribe(&mut self, list: &str, now: Instant) -> bool {
        if self.lists.contains_key(list) {
            return false;
        }

        let mut slot = ListSlot {
            store: TickerList::new(list),
            queues: FrameQueues::new(self.config.delta_queue_cap, self.config.aggregate_queue_cap),
            subscription: Subscription::new(list, self.config.snapshot_timeout),
        };
        if self.outbox.connected {
            let message = slot.subscription.begin();
            if self.outbox.send(message) {
                slot.subscription.subscribe_sent(now);
            }
        }

        logging::info(
            "subscription.subscribe",
            "List subscribed",
            json!({ "list": list, "state": slot.subscription.state().to_string() }),
        );
        self.lists.insert(list.to_string(), slot);
        true
    }

    /// Stop tracking a list, discarding its records and queues.
    pub fn unsubscribe(&mut self, list: &str) -> bool {
        let Some(mut slot) = self.lists.shift_remove(list) else {
            return false;
        };

        slot.queues.clear();
        self.outbox.send(ControlMessage::UnsubscribeList {
            list: list.to_string(),
        });
        logging::info(
            "subscription.unsubscribe",
            "List unsubscribed",
            json!({ "list": list }),
        );
        true
    }

    /// Transport connected: every held list restarts its subscribe cycle.
    pub fn connected(&mut self, now: Instant) {
        self.outbox.connected = true;
        for slot in self.lists.values_mut() {
            let message = slot.subscription.begin();
            if self.outbox.send(message) {
                slot.subscription.subscribe_sent(now);
            }
        }
        logging::info(
            "transport.connected",
            "Engine observed transport connect",
            json!({ "lists": self.lists.len() }),
        );
    }

    /// Transport lost: lists fall back to unsubscribed and keep stale records.
    pub fn disconnected(&mut self) {
        self.outbox.connected = false;
        for slot in self.lists.values_mut() {
            slot.subscription.disconnected();
            slot.store.mark_stale();
            slot.queues.clear();
        }
        logging::warn(
            "transport.disconnected",
            "Engine observed transport disconnect",
            json!({ "lists": self.lists.len() }),
        );
    }

    /// The viewing surface was hidden and is visible again.
    pub fn became_visible(&mut self, now: Instant) {
        for (name, slot) in self.lists.iter_mut() {
            if let Some(message) = slot.subscription.became_visible(now) {
                if self.outbox.send(message) {
                    self.stats.resyncs_sent += 1;
                    log_resync(name, "visible");
                }
            }
        }
    }

    /// Decode a raw transport payload and route it.
    pub fn handle_payload(&mut self, payload: &[u8], now: Instant) -> Dispatch {
        match FeedMessage::decode(payload) {
            Ok(message) => self.handle_message(message, now),
            Err(DecodeError::UnrecognizedType(_)) => {
                self.stats.dropped_unrecognized += 1;
                Dispatch::Dropped(DropReason::Unrecognized)
            }
            Err(DecodeError::Json(_) | DecodeError::Malformed(_)) => {
                self.stats.dropped_malformed += 1;
                Dispatch::Dropped(DropReason::Malformed)
            }
        }
    }

    pub fn handle_text(&mut self, payload: &str, now: Instant) -> Dispatch {
        self.handle_payload(payload.as_bytes(), now)
    }

    pub fn handle_message(&mut self, message: FeedMessage, now: Instant) -> Dispatch {
        let dispatch = match message {
            FeedMessage::Snapshot {
                list,
                sequence,
                rows,
            } => self.route_snapshot(&list, rows, sequence),
            FeedMessage::Delta {
                list,
                sequence,
                deltas,
            } => self.route_delta(&list, deltas, sequence, now),
            FeedMessage::Aggregate { symbol, data } => self.route_aggregate(data.into_tick(symbol)),
        };

        match dispatch {
            Dispatch::Dropped(_) => self.stats.dropped_unrouted += 1,
            _ => self.stats.messages_routed += 1,
        }
        dispatch
    }

    fn route_snapshot(&mut self, list: &str, rows: Vec<Row>, sequence: u64) -> Dispatch {
        let Some(slot) = self.lists.get_mut(list) else {
            return Dispatch::Dropped(DropReason::NotSubscribed);
        };

        // Anything buffered predates the new baseline.
        slot.queues.clear();
        slot.store
            .apply_snapshot(rows, sequence, logging::current_timestamp_ms());
        slot.subscription.snapshot_applied();
        self.stats.snapshots_applied += 1;
        Dispatch::SnapshotApplied
    }

    fn route_delta(
        &mut self,
        list: &str,
        deltas: Vec<DeltaAction>,
        sequence: u64,
        now: Instant,
    ) -> Dispatch {
        let Some(slot) = self.lists.get_mut(list) else {
            return Dispatch::Dropped(DropReason::NotSubscribed);
        };

        if !slot.subscription.is_ready() {
            self.stats.deltas_discarded_before_ready += 1;
            let mut resync_sent = false;
            if let Some(message) = slot.subscription.delta_before_ready(now) {
                resync_sent = self.outbox.send(message);
                if resync_sent {
                    self.stats.resyncs_sent += 1;
                    log_resync(list, "delta_before_snapshot");
                }
            }
            return Dispatch::DeltaDiscarded { resync_sent };
        }

        self.stats.overflow_discards += slot.queues.deltas.push_batch(list, deltas, sequence);
        Dispatch::DeltaQueued
    }

    fn route_aggregate(&mut self, tick: AggregateTick) -> Dispatch {
        let mut lists = 0;
        for (name, slot) in self.lists.iter_mut() {
            // Symbols arriving with a queued add exist by the time aggregates flush.
            let known =
                slot.store.contains(&tick.symbol) || slot.queues.deltas.mentions(&tick.symbol);
            if slot.subscription.is_ready() && known {
                self.stats.overflow_discards += slot.queues.aggregates.push(name, tick.clone());
                lists += 1;
            }
        }
        Dispatch::AggregateQueued { lists }
    }

    /// Drain every list's queues into its store. Called once per frame.
    pub fn flush_frame(&mut self) -> FlushReport {
        let now_ms = logging::current_timestamp_ms();
        let mut total = FlushReport::default();
        for slot in self.lists.values_mut() {
            let report = slot.queues.flush_into(&mut slot.store, now_ms);
            self.stats.record_flush(&report);
            total.deltas_applied += report.deltas_applied;
            total.deltas_ignored += report.deltas_ignored;
            total.ticks_applied += report.ticks_applied;
            total.ticks_dropped += report.ticks_dropped;
        }
        self.stats.frames_flushed += 1;
        total
    }

    /// Retry pending subscribes and fire expired snapshot wait timers.
    pub fn poll_timers(&mut self, now: Instant) {
        if !self.outbox.connected {
            return;
        }

        for (name, slot) in self.lists.iter_mut() {
            let Some(message) = slot.subscription.poll(now) else {
                continue;
            };
            let is_subscribe = matches!(message, ControlMessage::SubscribeList { .. });
            if !self.outbox.send(message) {
                continue;
            }
            if is_subscribe {
                slot.subscription.subscribe_sent(now);
            } else {
                self.stats.resyncs_sent += 1;
                log_resync(name, "snapshot_timeout");
            }
        }
    }

    pub fn take_stats(&mut self) -> EngineStats {
        self.stats.take()
    }

    pub fn list(&self, list: &str) -> Option<&TickerList> {
        self.lists.get(list).map(|slot| &slot.store)
    }

    pub fn ordered_records(&self, list: &str) -> Vec<Record> {
        self.list(list)
            .map(|store| store.ordered_records().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sequence(&self, list: &str) -> Option<u64> {
        self.list(list).map(TickerList::sequence)
    }

    pub fn last_update(&self, list: &str) -> Option<u128> {
        self.list(list).and_then(TickerList::last_update_ms)
    }

    pub fn is_ready(&self, list: &str) -> bool {
        self.list(list).is_some_and(TickerList::is_ready)
    }

    pub fn state(&self, list: &str) -> SubscriptionState {
        self.lists
            .get(list)
            .map(|slot| slot.subscription.state())
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn rank_moves(&self, list: &str) -> Vec<RankMove> {
        self.list(list)
            .map(|store| store.rank_moves().to_vec())
            .unwrap_or_default()
    }

    pub fn queued(&self, list: &str) -> Option<(usize, usize)> {
        self.lists
            .get(list)
            .map(|slot| (slot.queues.deltas.len(), slot.queues.aggregates.len()))
    }
}

fn log_resync(list: &str, reason: &str) {
    logging::info(
        "subscription.resync",
        "Requested fresh snapshot",
        json!({ "list": list, "reason": reason }),
    );
}
