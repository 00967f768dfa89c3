use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use crate::model::{DeltaAction, RecordPatch, Row};
use crate::protocol::FeedMessage;

use super::market::{MarketBook, Quote};

/// Ranked lists the simulated feed publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    GappersUp,
    GappersDown,
    VolumeLeaders,
    HighRvol,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::GappersUp,
        Category::GappersDown,
        Category::VolumeLeaders,
        Category::HighRvol,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::GappersUp => "gappers_up",
            Category::GappersDown => "gappers_down",
            Category::VolumeLeaders => "volume_leaders",
            Category::HighRvol => "high_rvol",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.name() == name)
    }

    fn qualifies(self, quote: &Quote) -> bool {
        match self {
            Category::GappersUp => quote.change_percent() > 0.0,
            Category::GappersDown => quote.change_percent() < 0.0,
            Category::VolumeLeaders | Category::HighRvol => true,
        }
    }

    /// Higher score ranks first.
    fn score(self, quote: &Quote) -> f64 {
        match self {
            Category::GappersUp => quote.change_percent(),
            Category::GappersDown => -quote.change_percent(),
            Category::VolumeLeaders => quote.volume_today,
            Category::HighRvol => quote.rvol(),
        }
    }

    /// Top `size` qualifying quotes, ranked from zero.
    pub fn rank(self, quotes: &[Quote], size: usize) -> Vec<Row> {
        let mut candidates: Vec<&Quote> = quotes.iter().filter(|q| self.qualifies(q)).collect();
        candidates.sort_by(|a, b| {
            self.score(b)
                .partial_cmp(&self.score(a))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.symbol().cmp(b.symbol()))
        });

        candidates
            .into_iter()
            .take(size)
            .enumerate()
            .map(|(rank, quote)| Row {
                symbol: quote.symbol().to_string(),
                rank: Some(rank as i64),
                fields: quote.fields(),
            })
            .collect()
    }
}

/// Structural delta turning `previous` into `next`.
///
/// Removals come first, then additions, rank moves and field refreshes.
pub fn diff_rows(previous: &[Row], next: &[Row]) -> Vec<DeltaAction> {
    let old_ranks: HashMap<&str, i64> = previous
        .iter()
        .enumerate()
        .map(|(idx, row)| (row.symbol.as_str(), row.rank.unwrap_or(idx as i64)))
        .collect();
    let new_symbols: HashSet<&str> = next.iter().map(|row| row.symbol.as_str()).collect();

    let mut actions: Vec<DeltaAction> = previous
        .iter()
        .filter(|row| !new_symbols.contains(row.symbol.as_str()))
        .map(|row| DeltaAction::Remove {
            symbol: row.symbol.clone(),
        })
        .collect();

    let mut reranks = Vec::new();
    let mut updates = Vec::new();
    for (idx, row) in next.iter().enumerate() {
        let new_rank = row.rank.unwrap_or(idx as i64);
        let patch = RecordPatch {
            fields: row.fields.clone(),
            ..RecordPatch::default()
        };
        match old_ranks.get(row.symbol.as_str()) {
            None => actions.push(DeltaAction::Add {
                symbol: row.symbol.clone(),
                rank: Some(new_rank),
                data: patch,
            }),
            Some(&old_rank) => {
                if old_rank != new_rank {
                    reranks.push(DeltaAction::Rerank {
                        symbol: row.symbol.clone(),
                        old_rank,
                        new_rank,
                    });
                }
                updates.push(DeltaAction::Update {
                    symbol: row.symbol.clone(),
                    rank: None,
                    data: patch,
                });
            }
        }
    }

    actions.extend(reranks);
    actions.extend(updates);
    actions
}

#[derive(Default)]
struct Board {
    rows: Vec<Row>,
    sequence: u64,
}

/// Last published ranking and sequence of every category.
pub struct CategoryBoard {
    size: usize,
    boards: HashMap<Category, Board>,
}

impl CategoryBoard {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            boards: Category::ALL
                .into_iter()
                .map(|category| (category, Board::default()))
                .collect(),
        }
    }

    /// Re-rank every category and return one delta message per changed list.
    pub fn publish(&mut self, book: &MarketBook) -> Vec<FeedMessage> {
        let size = self.size;
        let rankings: Vec<(Category, Vec<Row>)> = Category::ALL
            .par_iter()
            .map(|category| (*category, category.rank(book.quotes(), size)))
            .collect();

        let mut messages = Vec::new();
        for (category, rows) in rankings {
            let board = self.boards.entry(category).or_default();
            let deltas = diff_rows(&board.rows, &rows);
            board.rows = rows;
            if deltas.is_empty() {
                continue;
            }
            board.sequence += 1;
            messages.push(FeedMessage::Delta {
                list: category.name().to_string(),
                sequence: board.sequence,
                deltas,
            });
        }
        messages
    }

    /// Full state of one list. Rows go out without ranks; position is rank.
    pub fn snapshot(&self, list: &str) -> Option<FeedMessage> {
        let board = self.boards.get(&Category::from_name(list)?)?;
        Some(FeedMessage::Snapshot {
            list: list.to_string(),
            sequence: board.sequence,
            rows: board
                .rows
                .iter()
                .map(|row| Row {
                    rank: None,
                    ..row.clone()
                })
                .collect(),
        })
    }

    pub fn rows(&self, category: Category) -> &[Row] {
        self.boards
            .get(&category)
            .map(|board| board.rows.as_slice())
            .unwrap_or_default()
    }
}
