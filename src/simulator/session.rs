use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model::Row;
use crate::protocol::{AggregateData, FeedMessage};

use super::categories::{Category, CategoryBoard};
use super::market::MarketBook;
use super::universe::{generate_listings, ListingUniverse};

/// One simulated trading session: prices, rankings and their sequences.
pub struct FeedSession {
    universe: ListingUniverse,
    book: MarketBook,
    board: CategoryBoard,
    active_fraction: f64,
    rng: StdRng,
}

impl FeedSession {
    pub fn new(seed: u64, universe_size: usize, list_size: usize, active_fraction: f64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let listings = generate_listings(universe_size, &mut rng);
        let book = MarketBook::open(&listings, &mut rng);
        let universe = ListingUniverse::new(listings, &mut rng)?;
        Ok(Self {
            universe,
            book,
            board: CategoryBoard::new(list_size),
            active_fraction,
            rng,
        })
    }

    /// Advance prices one round; one aggregate message per traded symbol.
    pub fn step(&mut self) -> Vec<FeedMessage> {
        let shocks = self.universe.correlated_draws(&mut self.rng);
        self.book
            .step(&shocks, self.active_fraction, &mut self.rng)
            .into_iter()
            .map(|tick| FeedMessage::Aggregate {
                data: AggregateData::from(&tick),
                symbol: tick.symbol,
            })
            .collect()
    }

    /// Re-rank every category; one delta message per changed list.
    pub fn publish(&mut self) -> Vec<FeedMessage> {
        self.board.publish(&self.book)
    }

    pub fn refresh_correlation(&mut self) -> Result<()> {
        self.universe.refresh(&mut self.rng)
    }

    pub fn snapshot(&self, list: &str) -> Option<FeedMessage> {
        self.board.snapshot(list)
    }

    /// Last published ranking of a category.
    pub fn published_rows(&self, category: Category) -> &[Row] {
        self.board.rows(category)
    }
}
