use crate::model::AggregateTick;

use super::TickerList;

impl TickerList {
    /// Fold the latest tick per symbol into existing records.
    ///
    /// Ticks for symbols outside the list are dropped. Rank and membership are
    /// never touched here. Returns the number of ticks applied.
    pub fn apply_aggregates<I>(&mut self, ticks: I, now_ms: u128) -> usize
    where
        I: IntoIterator<Item = AggregateTick>,
    {
        let mut applied = 0;
        for tick in ticks {
            if let Some(record) = self.records.get_mut(&tick.symbol) {
                record.fields.apply_tick(&tick);
                applied += 1;
            }
        }

        if applied > 0 {
            self.touch(now_ms);
        }
        applied
    }
}
