use std::collections::HashMap;

use crate::model::{DeltaAction, MoveDirection, RankMove, Record, RecordPatch};

use super::TickerList;

/// Summary of one reduced delta batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub applied: usize,
    pub ignored: usize,
    pub resorted: bool,
}

impl TickerList {
    /// Apply a batch of structural changes in array order.
    ///
    /// `sequence` is the trailing sequence of the batch. It is adopted as-is
    /// without gap detection; an empty batch only refreshes the update stamp.
    pub fn apply_deltas<I>(&mut self, actions: I, sequence: u64, now_ms: u128) -> DeltaOutcome
    where
        I: IntoIterator<Item = DeltaAction>,
    {
        let mut outcome = DeltaOutcome::default();
        let mut needs_sort = false;
        let mut moves = Vec::new();
        // Tie-break for records that changed rank in this batch.
        let mut bias: HashMap<String, MoveDirection> = HashMap::new();

        for action in actions {
            let applied = match action {
                DeltaAction::Add { symbol, rank, data } => match rank.or(data.rank) {
                    Some(rank) => {
                        let record = Record::new(symbol, rank, data.fields);
                        self.records.insert(record.symbol.clone(), record);
                        needs_sort = true;
                        true
                    }
                    None => false,
                },
                DeltaAction::Remove { symbol } => {
                    // Order of the remaining records is untouched by shift_remove.
                    self.records.shift_remove(&symbol).is_some()
                }
                DeltaAction::Update { symbol, rank, data } => {
                    match self.merge_update(&symbol, rank, data) {
                        UpdateResult::Ignored => false,
                        UpdateResult::Merged => true,
                        UpdateResult::Ranked(direction) => {
                            needs_sort = true;
                            bias.insert(symbol, direction);
                            true
                        }
                    }
                }
                DeltaAction::Rerank {
                    symbol,
                    old_rank,
                    new_rank,
                } => match self.records.get_mut(&symbol) {
                    Some(record) => {
                        let direction = MoveDirection::classify(old_rank, new_rank);
                        record.rank = new_rank;
                        needs_sort = true;
                        bias.insert(symbol.clone(), direction);
                        moves.push(RankMove {
                            symbol,
                            old_rank,
                            new_rank,
                            direction,
                        });
                        true
                    }
                    None => false,
                },
            };

            if applied {
                outcome.applied += 1;
            } else {
                outcome.ignored += 1;
            }
        }

        if needs_sort {
            self.sort_by_rank_with(&bias);
            outcome.resorted = true;
        }
        if outcome.applied + outcome.ignored > 0 {
            self.sequence = sequence;
            self.moves = moves;
        }
        self.touch(now_ms);
        outcome
    }

    fn merge_update(&mut self, symbol: &str, rank: Option<i64>, data: RecordPatch) -> UpdateResult {
        let rank = rank.or(data.rank);
        match self.records.get_mut(symbol) {
            Some(record) => {
                record.fields.merge_update(data.fields);
                match rank {
                    Some(rank) if rank != record.rank => {
                        let direction = MoveDirection::classify(record.rank, rank);
                        record.rank = rank;
                        UpdateResult::Ranked(direction)
                    }
                    _ => UpdateResult::Merged,
                }
            }
            None => match rank {
                Some(rank) => {
                    let record = Record::new(symbol, rank, data.fields);
                    self.records.insert(record.symbol.clone(), record);
                    UpdateResult::Ranked(MoveDirection::Unchanged)
                }
                None => UpdateResult::Ignored,
            },
        }
    }
}

enum UpdateResult {
    Ignored,
    Merged,
    Ranked(MoveDirection),
}
