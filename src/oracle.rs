//! The price oracle seam (spec §1, §4.D).
//!
//! The core treats the brokerage importer and the price/dividend/split
//! database as external collaborators; its only contract with a price
//! source is `priceOn(ticker, date) -> price | missing`. [`PriceOracle`]
//! is that contract. The replay driver is the only caller — the engine
//! itself never looks up a price (spec §5: "the engine itself never
//! suspends").

use std::collections::HashMap;

use chrono::NaiveDate;

/// Supplies end-of-day marks for a ticker. Implementations may be
/// synchronous wrappers around a cache, a database, or (for tests) a
/// fixed in-memory table.
pub trait PriceOracle {
    /// The price of `ticker` on `date`, or `None` if no price is on file.
    /// A missing price is not an error: the replay driver carries the
    /// previous mark forward (spec §4.D step 3).
    fn price_on(&self, ticker: &str, date: NaiveDate) -> Option<f64>;
}

/// A `HashMap`-backed oracle for tests and for embedding applications
/// that already hold a price table in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceOracle {
    prices: HashMap<(String, NaiveDate), f64>,
}

impl InMemoryPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, ticker: impl Into<String>, date: NaiveDate, price: f64) {
        self.prices.insert((ticker.into(), date), price);
    }

    pub fn with_price(mut self, ticker: impl Into<String>, date: NaiveDate, price: f64) -> Self {
        self.set(ticker, date, price);
        self
    }
}

impl PriceOracle for InMemoryPriceOracle {
    fn price_on(&self, ticker: &str, date: NaiveDate) -> Option<f64> {
        self.prices.get(&(ticker.to_string(), date)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn missing_price_returns_none() {
        let oracle = InMemoryPriceOracle::new();
        assert_eq!(oracle.price_on("A", d(2024, 1, 1)), None);
    }

    #[test]
    fn set_price_is_retrievable_only_on_its_own_date() {
        let oracle = InMemoryPriceOracle::new().with_price("A", d(2024, 1, 1), 100.0);
        assert_eq!(oracle.price_on("A", d(2024, 1, 1)), Some(100.0));
        assert_eq!(oracle.price_on("A", d(2024, 1, 2)), None);
    }
}
