use indexmap::IndexMap;

use crate::model::{Record, Row};

use super::TickerList;

impl TickerList {
    /// Replace the whole list from a snapshot.
    ///
    /// Rows without a rank take their array index, fixing the initial order to
    /// the delivery order. An empty snapshot is a loaded, empty list.
    pub fn apply_snapshot(&mut self, rows: Vec<Row>, sequence: u64, now_ms: u128) {
        let mut records = IndexMap::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let rank = row.rank.unwrap_or(index as i64);
            let record = Record::new(row.symbol, rank, row.fields);
            records.insert(record.symbol.clone(), record);
        }

        self.records = records;
        self.sort_by_rank();
        self.sequence = sequence;
        self.ready = true;
        self.moves.clear();
        self.touch(now_ms);
    }
}
