use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde_json::Value;

use crate::model::{AggregateTick, RecordFields};

use super::universe::Listing;

const OPENING_GAP_STD: f64 = 0.06;

/// Intraday state of one simulated ticker.
#[derive(Debug, Clone)]
pub struct Quote {
    pub listing: Listing,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume_today: f64,
}

impl Quote {
    pub fn symbol(&self) -> &str {
        &self.listing.symbol
    }

    pub fn change_percent(&self) -> f64 {
        (self.price - self.listing.prev_close) / self.listing.prev_close * 100.0
    }

    pub fn rvol(&self) -> f64 {
        self.volume_today / self.listing.avg_volume
    }

    pub fn fields(&self) -> RecordFields {
        let mut fields = RecordFields {
            price: Some(self.price),
            volume_today: Some(self.volume_today.round()),
            change_percent: Some(self.change_percent()),
            high: Some(self.high),
            low: Some(self.low),
            prev_close: Some(self.listing.prev_close),
            market_cap: Some(self.price * self.listing.float_shares),
            float_shares: Some(self.listing.float_shares),
            rvol: Some(self.rvol()),
            ..RecordFields::default()
        };
        fields.extra.insert(
            "sector".to_string(),
            Value::String(self.listing.sector.to_string()),
        );
        fields
    }

    pub fn tick(&self) -> AggregateTick {
        AggregateTick {
            symbol: self.listing.symbol.clone(),
            close: Some(self.price),
            high: Some(self.high),
            low: Some(self.low),
            volume: Some(self.volume_today.round()),
        }
    }
}

/// Every quote in the simulated session.
pub struct MarketBook {
    quotes: Vec<Quote>,
}

impl MarketBook {
    /// Open the session: each listing gaps away from its previous close.
    pub fn open(listings: &[Listing], rng: &mut StdRng) -> Self {
        let quotes = listings
            .iter()
            .map(|listing| {
                let gap = rng.sample::<f64, _>(StandardNormal) * OPENING_GAP_STD;
                let price = (listing.prev_close * (1.0 + gap.clamp(-0.5, 1.5))).max(0.01);
                Quote {
                    listing: listing.clone(),
                    price,
                    high: price,
                    low: price,
                    volume_today: listing.avg_volume * rng.gen_range(0.01..0.2),
                }
            })
            .collect();
        Self { quotes }
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    /// Apply one round of correlated shocks and return ticks for the
    /// symbols that traded this round.
    pub fn step(
        &mut self,
        shocks: &DVector<f64>,
        active_fraction: f64,
        rng: &mut StdRng,
    ) -> Vec<AggregateTick> {
        let active: Vec<bool> = (0..self.quotes.len())
            .map(|_| rng.gen_bool(active_fraction.clamp(0.0, 1.0)))
            .collect();

        self.quotes
            .par_iter_mut()
            .zip(shocks.as_slice().par_iter())
            .zip(active.par_iter())
            .filter_map(|((quote, shock), traded)| {
                if !*traded {
                    return None;
                }
                quote.price = (quote.price * (1.0 + shock * 0.004)).max(0.01);
                quote.high = quote.high.max(quote.price);
                quote.low = quote.low.min(quote.price);
                quote.volume_today += quote.listing.avg_volume * 0.001 * (1.0 + shock.abs() * 2.0);
                Some(quote.tick())
            })
            .collect()
    }
}
