//! Frame-paced buffering between message arrival and list mutation.

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde_json::json;

use crate::list::TickerList;
use crate::logging;
use crate::model::{AggregateTick, DeltaAction};

/// Delta actions awaiting the next frame, in arrival order.
#[derive(Debug)]
pub struct DeltaQueue {
    cap: usize,
    actions: VecDeque<DeltaAction>,
    sequence: Option<u64>,
}

impl DeltaQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            actions: VecDeque::new(),
            sequence: None,
        }
    }

    /// Append a batch. Returns how many of the oldest actions were discarded.
    ///
    /// An empty batch queues nothing but still marks the queue pending, so the
    /// next flush refreshes the list's update stamp.
    pub fn push_batch(&mut self, list: &str, actions: Vec<DeltaAction>, sequence: u64) -> usize {
        self.actions.extend(actions);
        self.sequence = Some(sequence);

        let overflow = self.actions.len().saturating_sub(self.cap);
        if overflow > 0 {
            self.actions.drain(..overflow);
            logging::warn(
                "scheduler.delta_overflow",
                "Delta queue over capacity, discarding oldest actions",
                json!({ "list": list, "discarded": overflow, "cap": self.cap }),
            );
        }
        overflow
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when a queued add or update will bring `symbol` into the list.
    pub fn mentions(&self, symbol: &str) -> bool {
        self.actions.iter().any(|action| {
            matches!(action, DeltaAction::Add { .. } | DeltaAction::Update { .. })
                && action.symbol() == symbol
        })
    }

    /// Take every queued action together with the trailing sequence.
    pub fn drain(&mut self) -> Option<(Vec<DeltaAction>, u64)> {
        let sequence = self.sequence.take()?;
        Some((self.actions.drain(..).collect(), sequence))
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.sequence = None;
    }
}

/// Latest tick per symbol awaiting the next frame.
#[derive(Debug)]
pub struct AggregateQueue {
    cap: usize,
    ticks: IndexMap<String, AggregateTick>,
}

impl AggregateQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            ticks: IndexMap::new(),
        }
    }

    /// Queue a tick, replacing any older tick for the same symbol.
    ///
    /// The symbol moves to the most-recent end so overflow always discards
    /// the symbols that have been quiet longest. Returns the discard count.
    pub fn push(&mut self, list: &str, tick: AggregateTick) -> usize {
        let (index, _) = self.ticks.insert_full(tick.symbol.clone(), tick);
        let last = self.ticks.len() - 1;
        if index != last {
            self.ticks.move_index(index, last);
        }

        let overflow = self.ticks.len().saturating_sub(self.cap);
        if overflow > 0 {
            self.ticks.drain(..overflow);
            logging::warn(
                "scheduler.aggregate_overflow",
                "Aggregate queue over capacity, discarding oldest symbols",
                json!({ "list": list, "discarded": overflow, "cap": self.cap }),
            );
        }
        overflow
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&AggregateTick> {
        self.ticks.get(symbol)
    }

    pub fn drain(&mut self) -> Vec<AggregateTick> {
        self.ticks.drain(..).map(|(_, tick)| tick).collect()
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }
}

/// What a single frame flush did to one list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub deltas_applied: usize,
    pub deltas_ignored: usize,
    pub ticks_applied: usize,
    pub ticks_dropped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        *self == FlushReport::default()
    }
}

/// Both queues belonging to one list.
#[derive(Debug)]
pub struct FrameQueues {
    pub deltas: DeltaQueue,
    pub aggregates: AggregateQueue,
}

impl FrameQueues {
    pub fn new(delta_cap: usize, aggregate_cap: usize) -> Self {
        Self {
            deltas: DeltaQueue::new(delta_cap),
            aggregates: AggregateQueue::new(aggregate_cap),
        }
    }

    /// Drain deltas first, then aggregates, into the list.
    pub fn flush_into(&mut self, list: &mut TickerList, now_ms: u128) -> FlushReport {
        let mut report = FlushReport::default();

        if let Some((actions, sequence)) = self.deltas.drain() {
            let outcome = list.apply_deltas(actions, sequence, now_ms);
            report.deltas_applied = outcome.applied;
            report.deltas_ignored = outcome.ignored;
        }

        let ticks = self.aggregates.drain();
        let offered = ticks.len();
        report.ticks_applied = list.apply_aggregates(ticks, now_ms);
        report.ticks_dropped = offered - report.ticks_applied;

        report
    }

    pub fn clear(&mut self) {
        self.deltas.clear();
        self.aggregates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordFields, RecordPatch, Row};

    fn tick(symbol: &str, close: f64) -> AggregateTick {
        AggregateTick {
            symbol: symbol.to_string(),
            close: Some(close),
            high: None,
            low: None,
            volume: None,
        }
    }

    fn remove(symbol: &str) -> DeltaAction {
        DeltaAction::Remove {
            symbol: symbol.to_string(),
        }
    }

    #[test]
    fn aggregate_queue_keeps_last_value_per_symbol() {
        let mut queue = AggregateQueue::new(16);
        queue.push("x", tick("AAA", 1.0));
        queue.push("x", tick("BBB", 2.0));
        queue.push("x", tick("AAA", 3.0));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get("AAA").and_then(|t| t.close), Some(3.0));
        let drained: Vec<_> = queue.drain().into_iter().map(|t| t.symbol).collect();
        assert_eq!(drained, vec!["BBB", "AAA"]);
    }

    #[test]
    fn aggregate_overflow_discards_quietest_symbols() {
        let mut queue = AggregateQueue::new(2);
        queue.push("x", tick("AAA", 1.0));
        queue.push("x", tick("BBB", 1.0));
        queue.push("x", tick("AAA", 2.0));
        let discarded = queue.push("x", tick("CCC", 1.0));

        assert_eq!(discarded, 1);
        assert!(queue.get("BBB").is_none());
        assert!(queue.get("AAA").is_some());
        assert!(queue.get("CCC").is_some());
    }

    #[test]
    fn delta_overflow_keeps_most_recent_actions() {
        let mut queue = DeltaQueue::new(3);
        queue.push_batch("x", vec![remove("A"), remove("B")], 1);
        let discarded = queue.push_batch("x", vec![remove("C"), remove("D")], 2);

        assert_eq!(discarded, 1);
        let (actions, sequence) = queue.drain().expect("queued actions");
        let symbols: Vec<_> = actions.iter().map(DeltaAction::symbol).collect();
        assert_eq!(symbols, vec!["B", "C", "D"]);
        assert_eq!(sequence, 2);
        assert!(queue.drain().is_none());
    }

    #[test]
    fn pending_adds_and_updates_are_mentioned() {
        let mut queue = DeltaQueue::new(8);
        queue.push_batch(
            "x",
            vec![
                remove("GONE"),
                DeltaAction::Add {
                    symbol: "NEW".into(),
                    rank: Some(0),
                    data: RecordPatch::default(),
                },
            ],
            1,
        );

        assert!(queue.mentions("NEW"));
        assert!(!queue.mentions("GONE"));
        assert!(!queue.mentions("OTHER"));
    }

    #[test]
    fn empty_batch_only_marks_pending() {
        let mut list = TickerList::new("x");
        list.apply_snapshot(Vec::new(), 3, 1);
        let mut queues = FrameQueues::new(8, 8);

        assert_eq!(queues.deltas.push_batch("x", Vec::new(), 4), 0);
        assert!(queues.deltas.is_empty());

        let report = queues.flush_into(&mut list, 9);
        assert!(report.is_empty());
        assert_eq!(list.sequence(), 3);
        assert_eq!(list.last_update_ms(), Some(9));
        assert!(queues.deltas.drain().is_none());
    }

    #[test]
    fn flush_applies_deltas_before_aggregates() {
        let mut list = TickerList::new("x");
        list.apply_snapshot(
            vec![Row {
                symbol: "AAA".into(),
                rank: None,
                fields: RecordFields::default(),
            }],
            1,
            1,
        );

        let mut queues = FrameQueues::new(8, 8);
        queues.deltas.push_batch(
            "x",
            vec![DeltaAction::Add {
                symbol: "BBB".into(),
                rank: Some(1),
                data: RecordPatch::default(),
            }],
            2,
        );
        queues.aggregates.push("x", tick("BBB", 4.0));
        queues.aggregates.push("x", tick("ZZZ", 4.0));

        let report = queues.flush_into(&mut list, 5);

        assert_eq!(report.deltas_applied, 1);
        assert_eq!(report.ticks_applied, 1);
        assert_eq!(report.ticks_dropped, 1);
        assert_eq!(list.get("BBB").and_then(|r| r.fields.price), Some(4.0));
        assert_eq!(list.sequence(), 2);
        assert!(queues.deltas.is_empty());
        assert!(queues.aggregates.is_empty());
    }

    #[test]
    fn idle_flush_reports_nothing() {
        let mut list = TickerList::new("x");
        let mut queues = FrameQueues::new(8, 8);
        assert!(queues.flush_into(&mut list, 1).is_empty());
        assert_eq!(list.last_update_ms(), None);
    }
}
