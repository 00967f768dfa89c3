use std::fmt;

use anyhow::{Context, Result};
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Technology,
    Financials,
    Healthcare,
    Energy,
    Consumer,
    Materials,
}

impl Sector {
    pub const ALL: [Sector; 6] = [
        Sector::Technology,
        Sector::Financials,
        Sector::Healthcare,
        Sector::Energy,
        Sector::Consumer,
        Sector::Materials,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Sector::Technology => "TK",
            Sector::Financials => "FN",
            Sector::Healthcare => "HC",
            Sector::Energy => "EN",
            Sector::Consumer => "CS",
            Sector::Materials => "MT",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Sector::Technology => 0,
            Sector::Financials => 1,
            Sector::Healthcare => 2,
            Sector::Energy => 3,
            Sector::Consumer => 4,
            Sector::Materials => 5,
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Sector::Technology => "Technology",
            Sector::Financials => "Financials",
            Sector::Healthcare => "Healthcare",
            Sector::Energy => "Energy",
            Sector::Consumer => "Consumer",
            Sector::Materials => "Materials",
        };
        f.write_str(label)
    }
}

/// Static reference data for one simulated ticker.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub symbol: String,
    pub sector: Sector,
    pub prev_close: f64,
    pub float_shares: f64,
    pub avg_volume: f64,
}

/// Generate `size` listings spread round-robin across sectors.
pub fn generate_listings(size: usize, rng: &mut StdRng) -> Vec<Listing> {
    (0..size)
        .map(|idx| {
            let sector = Sector::ALL[idx % Sector::ALL.len()];
            Listing {
                symbol: format!("{}{:03}", sector.prefix(), idx / Sector::ALL.len()),
                sector,
                prev_close: rng.gen_range(1.0..80.0),
                float_shares: rng.gen_range(2.0e6..4.0e8),
                avg_volume: rng.gen_range(2.0e5..2.0e7),
            }
        })
        .collect()
}

/// Listings plus the factor correlation that drives their joint moves.
pub struct ListingUniverse {
    listings: Vec<Listing>,
    correlation: DMatrix<f64>,
    cholesky: DMatrix<f64>,
}

impl ListingUniverse {
    pub fn new(listings: Vec<Listing>, rng: &mut StdRng) -> Result<Self> {
        let correlation = Self::factor_based_correlation(&listings, rng);
        let cholesky = Self::compute_cholesky(&correlation)?;
        Ok(Self {
            listings,
            correlation,
            cholesky,
        })
    }

    /// Drift the correlation structure towards a fresh draw.
    pub fn refresh(&mut self, rng: &mut StdRng) -> Result<()> {
        let candidate = Self::factor_based_correlation(&self.listings, rng);
        let blended = &self.correlation * 0.8 + candidate * 0.2;
        let renormalized = Self::renormalize(blended);
        let cholesky = Self::compute_cholesky(&renormalized)?;
        self.correlation = renormalized;
        self.cholesky = cholesky;
        Ok(())
    }

    /// Correlated standard-normal shocks, one per listing.
    pub fn correlated_draws(&self, rng: &mut StdRng) -> DVector<f64> {
        let dim = self.cholesky.nrows();
        let draws = DVector::from_fn(dim, |_, _| rng.sample::<f64, _>(StandardNormal));
        &self.cholesky * draws
    }

    fn factor_based_correlation(listings: &[Listing], rng: &mut StdRng) -> DMatrix<f64> {
        // market beta, one column per sector, idiosyncratic style
        let columns = 1 + Sector::ALL.len() + 1;
        let mut feature_data = Vec::with_capacity(listings.len() * columns);

        for listing in listings {
            let mut row = vec![0.0; columns];
            row[0] = rng.gen_range(0.45..0.75);
            row[1 + listing.sector.index()] = rng.gen_range(0.4..0.7);
            row[columns - 1] = rng.gen_range(0.05..0.12);
            feature_data.extend(row);
        }

        let feature_matrix = DMatrix::from_row_slice(listings.len(), columns, &feature_data);
        let mut covariance = &feature_matrix * feature_matrix.transpose();

        for i in 0..listings.len() {
            covariance[(i, i)] += rng.gen_range(0.1..0.2);
        }

        Self::renormalize(covariance)
    }

    fn renormalize(matrix: DMatrix<f64>) -> DMatrix<f64> {
        let size = matrix.nrows();
        let diag: Vec<f64> = (0..size)
            .map(|i| matrix[(i, i)].max(f64::EPSILON).sqrt())
            .collect();
        DMatrix::from_fn(size, size, |i, j| {
            if i == j {
                1.0
            } else {
                matrix[(i, j)] / (diag[i] * diag[j])
            }
        })
    }

    fn compute_cholesky(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        Cholesky::new(matrix.clone())
            .map(|decomposition| decomposition.l().clone_owned())
            .context("failed to compute Cholesky factor for listing correlation")
    }
}
