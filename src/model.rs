use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Market fields shared by snapshot rows, delta payloads and stored records.
///
/// Every numeric field is optional: feeds routinely omit values they have not
/// computed yet. Fields this crate does not model are carried in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_today: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_shares: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rvol: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecordFields {
    /// Merge a ranking-source refresh into the stored fields.
    ///
    /// Price and volume only move when the incoming value is non-zero, high and
    /// low widen, and any other field present in `incoming` replaces ours.
    pub fn merge_update(&mut self, incoming: RecordFields) {
        self.price = truthy(incoming.price).or(self.price);
        self.volume_today = truthy(incoming.volume_today).or(self.volume_today);
        self.high = widest(self.high, incoming.high, f64::max);
        self.low = widest(self.low, incoming.low, f64::min);

        replace_present(&mut self.change_percent, incoming.change_percent);
        replace_present(&mut self.prev_close, incoming.prev_close);
        replace_present(&mut self.market_cap, incoming.market_cap);
        replace_present(&mut self.float_shares, incoming.float_shares);
        replace_present(&mut self.rvol, incoming.rvol);

        for (key, value) in incoming.extra {
            if !value.is_null() {
                self.extra.insert(key, value);
            }
        }
    }

    /// Fold a price tick into the fields and recompute the percentage change.
    pub fn apply_tick(&mut self, tick: &AggregateTick) {
        if let (Some(close), Some(prev_close)) = (tick.close, truthy(self.prev_close)) {
            if close.is_finite() {
                self.change_percent = Some((close - prev_close) / prev_close * 100.0);
            }
        }

        self.price = truthy(tick.close).or(self.price);
        self.volume_today = truthy(tick.volume).or(self.volume_today);
        self.high = widest(self.high, tick.high, f64::max);
        self.low = widest(self.low, tick.low, f64::min);
    }
}

/// Zero, NaN and missing values all count as "no value".
fn truthy(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

fn widest(existing: Option<f64>, incoming: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (truthy(existing), truthy(incoming)) {
        (Some(current), Some(next)) => Some(pick(current, next)),
        (current, next) => next.or(current),
    }
}

fn replace_present(slot: &mut Option<f64>, incoming: Option<f64>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// One member of a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub symbol: String,
    pub rank: i64,
    #[serde(flatten)]
    pub fields: RecordFields,
}

impl Record {
    pub fn new(symbol: impl Into<String>, rank: i64, mut fields: RecordFields) -> Self {
        fields.extra.remove("symbol");
        fields.extra.remove("rank");
        Self {
            symbol: symbol.into(),
            rank,
            fields,
        }
    }
}

/// Snapshot row; a missing rank is filled from the row's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(flatten)]
    pub fields: RecordFields,
}

/// Delta payload. May repeat the symbol and rank of the enclosing action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(flatten)]
    pub fields: RecordFields,
}

/// Structural change to a ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum DeltaAction {
    /// The rank may come on the action or inside `data`.
    Add {
        symbol: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rank: Option<i64>,
        #[serde(default)]
        data: RecordPatch,
    },
    Remove {
        symbol: String,
    },
    Update {
        symbol: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rank: Option<i64>,
        #[serde(default)]
        data: RecordPatch,
    },
    Rerank {
        symbol: String,
        old_rank: i64,
        new_rank: i64,
    },
}

impl DeltaAction {
    pub fn symbol(&self) -> &str {
        match self {
            DeltaAction::Add { symbol, .. }
            | DeltaAction::Remove { symbol }
            | DeltaAction::Update { symbol, .. }
            | DeltaAction::Rerank { symbol, .. } => symbol,
        }
    }
}

/// Price update from the market-data feed, independent of ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateTick {
    pub symbol: String,
    pub close: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Improved,
    Worsened,
    Unchanged,
}

impl MoveDirection {
    pub fn classify(old_rank: i64, new_rank: i64) -> Self {
        match new_rank.cmp(&old_rank) {
            std::cmp::Ordering::Less => MoveDirection::Improved,
            std::cmp::Ordering::Greater => MoveDirection::Worsened,
            std::cmp::Ordering::Equal => MoveDirection::Unchanged,
        }
    }
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MoveDirection::Improved => "up",
            MoveDirection::Worsened => "down",
            MoveDirection::Unchanged => "-",
        };
        f.write_str(label)
    }
}

/// Rank change observed by the most recent delta batch, for row animations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankMove {
    pub symbol: String,
    pub old_rank: i64,
    pub new_rank: i64,
    pub direction: MoveDirection,
}
