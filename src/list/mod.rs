//! Per-list record store: symbol-keyed records kept in rank order.

mod aggregate;
mod delta;
mod snapshot;

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::model::{MoveDirection, RankMove, Record};

pub use delta::DeltaOutcome;

/// Authoritative state of one ranked list.
///
/// Records live in an insertion-ordered map that is re-sorted by rank after
/// every rank-changing mutation, so iteration order is the display order and
/// always a permutation of the stored symbols.
#[derive(Debug, Clone)]
pub struct TickerList {
    name: String,
    sequence: u64,
    last_update_ms: Option<u128>,
    ready: bool,
    records: IndexMap<String, Record>,
    moves: Vec<RankMove>,
}

impl TickerList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: 0,
            last_update_ms: None,
            ready: false,
            records: IndexMap::new(),
            moves: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn last_update_ms(&self) -> Option<u128> {
        self.last_update_ms
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.records.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Record> {
        self.records.get(symbol)
    }

    /// Records in display order, best rank first.
    pub fn ordered_records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Symbols in display order.
    pub fn order(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Rank moves classified by the most recent delta batch.
    pub fn rank_moves(&self) -> &[RankMove] {
        &self.moves
    }

    /// Drop readiness after the baseline is lost; records stay readable as stale data.
    pub fn mark_stale(&mut self) {
        self.ready = false;
        self.moves.clear();
    }

    fn sort_by_rank(&mut self) {
        self.records.sort_by(|_, left, _, right| left.rank.cmp(&right.rank));
    }

    /// Rank sort where a record that moved up wins ties against records
    /// already at that rank, and one that moved down loses them.
    fn sort_by_rank_with(&mut self, moved: &HashMap<String, MoveDirection>) {
        let weight = |symbol: &str| match moved.get(symbol) {
            Some(MoveDirection::Improved) => 0,
            Some(MoveDirection::Worsened) => 2,
            _ => 1,
        };
        self.records.sort_by(|left_key, left, right_key, right| {
            left.rank
                .cmp(&right.rank)
                .then_with(|| weight(left_key.as_str()).cmp(&weight(right_key.as_str())))
        });
    }

    fn touch(&mut self, now_ms: u128) {
        self.last_update_ms = Some(now_ms);
    }
}
