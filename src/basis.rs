//! FIFO cost basis ledger (spec §4.A).
//!
//! Per-ticker queue of purchase lots consumed oldest-first. Unlike the
//! teacher's `fifo` module this never touches a database: lots live in a
//! `VecDeque` for the lifetime of a [`crate::replay::PortfolioReplayDriver`]
//! run, and a shortfall (selling more shares than are on record) is
//! reported to the caller rather than silently logged, since the basis
//! ledger here has no later reconciliation pass to catch it.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;

use crate::error::{TwrError, TwrResult};

/// One purchase lot: a block of shares acquired on a single date at a
/// single net cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub purchase_date: NaiveDate,
    pub original_shares: f64,
    pub remaining_shares: f64,
    /// Total cost of the original lot, fees included, in basis currency.
    pub original_cost: f64,
}

impl Lot {
    /// Cost basis remaining on this lot, prorated by remaining shares.
    pub fn remaining_cost_basis(&self) -> f64 {
        if self.original_shares == 0.0 {
            return 0.0;
        }
        self.original_cost * (self.remaining_shares / self.original_shares)
    }
}

/// Outcome of consuming shares against a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumption {
    /// Total cost basis released across the lots consumed.
    pub cost_basis_released: f64,
    /// Shares requested that could not be matched to a lot. Nonzero only
    /// when the ledger is asked to sell more than it holds, which means a
    /// short position or an out-of-order transaction stream.
    pub shortfall_shares: f64,
}

/// FIFO lot tracker, one queue per ticker.
#[derive(Debug, Clone, Default)]
pub struct BasisLedger {
    lots: HashMap<String, VecDeque<Lot>>,
}

impl BasisLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new purchase lot.
    pub fn add(&mut self, ticker: &str, date: NaiveDate, shares: f64, cost: f64) -> TwrResult<()> {
        if shares <= 0.0 {
            return Err(TwrError::invalid_basis(
                ticker,
                format!("lot shares must be positive, got {shares}"),
            ));
        }
        self.lots.entry(ticker.to_string()).or_default().push_back(Lot {
            purchase_date: date,
            original_shares: shares,
            remaining_shares: shares,
            original_cost: cost,
        });
        Ok(())
    }

    /// Consume shares against the ticker's queue in FIFO order, releasing
    /// the prorated cost basis of whatever lots are matched. Fails if
    /// `ticker` has never had a lot recorded (spec §4.A); a ticker with a
    /// queue that simply runs short of shares instead reports the
    /// shortfall so callers can detect shorts rather than treating it as
    /// an error.
    pub fn remove(&mut self, ticker: &str, shares: f64) -> TwrResult<Consumption> {
        if shares <= 0.0 {
            return Err(TwrError::invalid_basis(
                ticker,
                format!("shares to remove must be positive, got {shares}"),
            ));
        }
        let queue = self.lots.get_mut(ticker).ok_or_else(|| {
            TwrError::invalid_basis(ticker, "remove on a ticker with no recorded lots")
        })?;
        let mut remaining = shares;
        let mut cost_basis_released = 0.0;

        for lot in queue.iter_mut() {
            if remaining <= 0.0 {
                break;
            }
            if lot.remaining_shares <= 0.0 {
                continue;
            }
            let consumed = lot.remaining_shares.min(remaining);
            let proportion = consumed / lot.original_shares;
            cost_basis_released += lot.original_cost * proportion;
            lot.remaining_shares -= consumed;
            remaining -= consumed;
        }

        while queue.front().is_some_and(|l| l.remaining_shares <= 0.0) {
            queue.pop_front();
        }

        if remaining > 0.0 {
            log::warn!(
                "basis ledger: could not consume all shares for {ticker}: {remaining} remaining"
            );
        }

        Ok(Consumption {
            cost_basis_released,
            shortfall_shares: remaining.max(0.0),
        })
    }

    /// Total shares currently held for a ticker.
    pub fn shares_held(&self, ticker: &str) -> f64 {
        self.lots
            .get(ticker)
            .map(|q| q.iter().map(|l| l.remaining_shares).sum())
            .unwrap_or(0.0)
    }

    /// Total remaining cost basis across all lots for a ticker.
    pub fn get_total_basis(&self, ticker: &str) -> f64 {
        self.lots
            .get(ticker)
            .map(|q| q.iter().map(|l| l.remaining_cost_basis()).sum())
            .unwrap_or(0.0)
    }

    /// Average remaining per-share cost basis for a ticker, if any shares
    /// are held.
    pub fn get_basis(&self, ticker: &str) -> Option<f64> {
        let shares = self.shares_held(ticker);
        if shares <= 0.0 {
            return None;
        }
        Some(self.get_total_basis(ticker) / shares)
    }

    /// Multiply every remaining lot's share count by `ratio`, leaving
    /// each lot's total cost unchanged (so its per-share price divides by
    /// the same factor). Used for `split` transactions (spec §6).
    pub fn apply_split(&mut self, ticker: &str, ratio: f64) {
        if let Some(queue) = self.lots.get_mut(ticker) {
            for lot in queue.iter_mut() {
                lot.original_shares *= ratio;
                lot.remaining_shares *= ratio;
            }
        }
    }

    /// Move a ticker's entire lot queue to a new key. Used for
    /// `tickerChange` transactions.
    pub fn rename_ticker(&mut self, old: &str, new: &str) {
        if let Some(queue) = self.lots.remove(old) {
            self.lots.entry(new.to_string()).or_default().extend(queue);
        }
    }

    /// Tickers currently carrying an open position.
    pub fn open_tickers(&self) -> impl Iterator<Item = &str> {
        self.lots
            .iter()
            .filter(|(_, q)| q.iter().any(|l| l.remaining_shares > 0.0))
            .map(|(t, _)| t.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn remaining_cost_basis_prorates() {
        let lot = Lot {
            purchase_date: d(2024, 1, 1),
            original_shares: 100.0,
            remaining_shares: 50.0,
            original_cost: 1000.0,
        };
        assert_eq!(lot.remaining_cost_basis(), 500.0);
    }

    #[test]
    fn fifo_consumes_oldest_lot_first() {
        let mut ledger = BasisLedger::new();
        ledger.add("A", d(2024, 1, 1), 10.0, 1000.0).unwrap();
        ledger.add("A", d(2024, 2, 1), 10.0, 1400.0).unwrap();

        let consumption = ledger.remove("A", 10.0).unwrap();
        assert_eq!(consumption.cost_basis_released, 1000.0);
        assert_eq!(consumption.shortfall_shares, 0.0);
        assert_eq!(ledger.shares_held("A"), 10.0);
        assert_eq!(ledger.get_total_basis("A"), 1400.0);
    }

    #[test]
    fn consuming_across_lot_boundary_prorates_partial_lot() {
        let mut ledger = BasisLedger::new();
        ledger.add("A", d(2024, 1, 1), 10.0, 1000.0).unwrap();
        ledger.add("A", d(2024, 2, 1), 10.0, 1400.0).unwrap();

        let consumption = ledger.remove("A", 15.0).unwrap();
        assert_eq!(consumption.cost_basis_released, 1000.0 + 700.0);
        assert_eq!(ledger.shares_held("A"), 5.0);
    }

    #[test]
    fn shortfall_is_reported_not_errored() {
        let mut ledger = BasisLedger::new();
        ledger.add("A", d(2024, 1, 1), 5.0, 500.0).unwrap();

        let consumption = ledger.remove("A", 8.0).unwrap();
        assert_eq!(consumption.shortfall_shares, 3.0);
        assert_eq!(ledger.shares_held("A"), 0.0);
    }

    #[test]
    fn remove_on_unknown_ticker_is_an_error() {
        let mut ledger = BasisLedger::new();
        assert!(ledger.remove("A", 1.0).is_err());
    }

    #[test]
    fn basis_is_none_when_no_shares_held() {
        let ledger = BasisLedger::new();
        assert_eq!(ledger.get_basis("A"), None);
    }

    #[test]
    fn split_doubles_shares_and_halves_per_share_basis() {
        let mut ledger = BasisLedger::new();
        ledger.add("A", d(2024, 1, 1), 10.0, 1000.0).unwrap();
        ledger.apply_split("A", 2.0);
        assert_eq!(ledger.shares_held("A"), 20.0);
        assert_eq!(ledger.get_total_basis("A"), 1000.0);
        assert_eq!(ledger.get_basis("A"), Some(50.0));
    }

    #[test]
    fn rename_ticker_preserves_lots() {
        let mut ledger = BasisLedger::new();
        ledger.add("A", d(2024, 1, 1), 10.0, 1000.0).unwrap();
        ledger.rename_ticker("A", "B");
        assert_eq!(ledger.shares_held("A"), 0.0);
        assert_eq!(ledger.shares_held("B"), 10.0);
        assert_eq!(ledger.get_total_basis("B"), 1000.0);
    }
}
