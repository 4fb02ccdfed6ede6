//! The portfolio replay driver (spec §4.D).
//!
//! Sorts the transaction stream into ascending `(date, ordering(kind))`
//! order, partitions it into day-groups, and drives the [`TwrEngine`]
//! one day at a time: every transaction in a day-group is translated into
//! the engine call(s) its kind dictates (spec §6's kind→engine mapping
//! table), then every held ticker whose mark wasn't touched that day is
//! refreshed from the [`PriceOracle`] before the day closes.
//!
//! This is the only component that ever calls the price oracle — the
//! engine itself never suspends (spec §5).

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::error::{TwrError, TwrResult};
use crate::oracle::PriceOracle;
use crate::transaction::{Transaction, TransactionKind, CASH_TICKER};
use crate::twr::{DailySnapshot, TwrEngine};

/// A snapshot of a single ticker's current position, suitable for
/// display or further reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub ticker: String,
    pub shares_long: f64,
    pub shares_short: f64,
    pub average_basis: Option<f64>,
    pub total_basis: f64,
}

/// Drives a [`TwrEngine`] across a sorted, day-grouped transaction
/// stream, using a [`PriceOracle`] to mark held positions on days with no
/// trade for that ticker.
pub struct PortfolioReplayDriver<O: PriceOracle> {
    engine: TwrEngine,
    oracle: O,
    history: Vec<DailySnapshot>,
}

impl<O: PriceOracle> PortfolioReplayDriver<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            engine: TwrEngine::new(),
            oracle,
            history: Vec::new(),
        }
    }

    /// Sort non-deleted transactions ascending by `(date, ordering(kind))`
    /// (spec §4.D). Deposits and opens precede sells within the same day
    /// to avoid spurious short detection.
    fn sorted(transactions: &[Transaction]) -> Vec<&Transaction> {
        let mut sorted: Vec<&Transaction> = transactions.iter().filter(|t| !t.deleted).collect();
        sorted.sort_by(|a, b| a.date.cmp(&b.date).then(a.kind.ordering().cmp(&b.kind.ordering())));
        sorted
    }

    /// Replay every event day present in `transactions`. Days with no
    /// transactions are never visited — use [`Self::replay_daily`] to
    /// additionally sample days between events.
    pub fn replay(&mut self, transactions: &[Transaction]) -> TwrResult<&[DailySnapshot]> {
        let sorted = Self::sorted(transactions);
        let mut i = 0;
        while i < sorted.len() {
            let date = sorted[i].date;
            let mut j = i;
            while j < sorted.len() && sorted[j].date == date {
                j += 1;
            }
            self.run_day(date, &sorted[i..j])?;
            i = j;
        }
        Ok(&self.history)
    }

    /// Replay `transactions`, additionally calling `begin_day`/`end_day`
    /// (with stale-mark refreshes but no transaction activity) for every
    /// calendar day in `[start, end]` that carries no event, so the
    /// returned series is sampled daily rather than only on event days
    /// (spec §4.D: "empty days... MUST still call begin_day/setMark/
    /// end_day when the caller wants the series sampled on those days").
    pub fn replay_daily(
        &mut self,
        transactions: &[Transaction],
        start: NaiveDate,
        end: NaiveDate,
    ) -> TwrResult<&[DailySnapshot]> {
        let sorted = Self::sorted(transactions);
        let mut idx = 0;
        let mut date = start;
        while date <= end {
            let mut day_txns: &[&Transaction] = &[];
            let start_idx = idx;
            while idx < sorted.len() && sorted[idx].date == date {
                idx += 1;
            }
            if idx > start_idx {
                day_txns = &sorted[start_idx..idx];
            }
            self.run_day(date, day_txns)?;
            date = date.succ_opt().expect("date overflow");
        }
        Ok(&self.history)
    }

    fn run_day(&mut self, date: NaiveDate, day_txns: &[&Transaction]) -> TwrResult<()> {
        self.engine.begin_day(date);
        let mut touched: HashSet<String> = HashSet::new();

        for t in day_txns {
            t.validate()?;
            self.apply(t, &mut touched)?;
        }

        for ticker in self.engine.held_tickers() {
            if ticker == CASH_TICKER || touched.contains(&ticker) {
                continue;
            }
            if let Some(price) = self.oracle.price_on(&ticker, date) {
                self.engine.set_value(&ticker, price)?;
            }
            // Missing price: carry the previous mark forward unchanged
            // (spec §4.D step 3 / §7 MissingPrice).
        }

        let snapshot = self.engine.end_day()?;
        self.history.push(snapshot);
        Ok(())
    }

    fn apply(&mut self, t: &Transaction, touched: &mut HashSet<String>) -> TwrResult<()> {
        use TransactionKind::*;

        let shares = || {
            t.shares.ok_or_else(|| {
                TwrError::invalid_input_for(&t.unique_id, format!("{:?} requires shares", t.kind))
            })
        };
        let price = t.price_per_share.unwrap_or(0.0);

        match t.kind {
            Deposit | Withdrawal => {}
            TransferIn if t.ticker == CASH_TICKER => {}
            TransferOut if t.ticker == CASH_TICKER => {}

            Buy | TransferIn => {
                self.engine.add_shares(&t.ticker, shares()?, price)?;
                touched.insert(t.ticker.clone());
                if let Some(fee) = t.fee {
                    self.engine.add_fee(fee)?;
                }
            }
            Sell | TransferOut => {
                self.engine.remove_shares(&t.ticker, shares()?, price)?;
                touched.insert(t.ticker.clone());
                if let Some(fee) = t.fee {
                    self.engine.add_fee(fee)?;
                }
            }
            Short => {
                self.engine.short_shares(&t.ticker, shares()?, price)?;
                touched.insert(t.ticker.clone());
            }
            Cover => {
                self.engine.cover_shares(&t.ticker, shares()?, price)?;
                touched.insert(t.ticker.clone());
            }
            Dividend => {
                self.engine.add_dividend(t.total.unwrap_or(0.0))?;
            }
            DividendReinvest => {
                self.engine.add_dividend_reinvest(&t.ticker, shares()?, price)?;
                touched.insert(t.ticker.clone());
            }
            Split => {
                let ratio = t.total.unwrap_or(1.0);
                self.engine.apply_split(&t.ticker, ratio)?;
                touched.insert(t.ticker.clone());
            }
            StockDividend => {
                self.engine.stock_dividend_shares(&t.ticker, shares()?);
                touched.insert(t.ticker.clone());
            }
            Spinoff => {
                let ticker2 = t.ticker2.as_ref().ok_or_else(|| {
                    TwrError::invalid_input_for(&t.unique_id, "spinoff requires ticker2")
                })?;
                let spun_off_shares = shares()?;
                let delta = spun_off_shares * price;
                self.engine.adjust_basis(&t.ticker, -delta);
                self.engine.add_shares(ticker2, spun_off_shares, price)?;
                touched.insert(t.ticker.clone());
                touched.insert(ticker2.clone());
            }
            TickerChange => {
                let ticker2 = t.ticker2.as_ref().ok_or_else(|| {
                    TwrError::invalid_input_for(&t.unique_id, "tickerChange requires ticker2")
                })?;
                self.engine.rename_ticker(&t.ticker, ticker2);
                touched.insert(t.ticker.clone());
                touched.insert(ticker2.clone());
            }
            Adjustment => {
                if t.ticker == CASH_TICKER {
                    self.engine.add_adjustment(t.total.unwrap_or(0.0));
                } else {
                    self.engine.adjust_basis(&t.ticker, t.total.unwrap_or(0.0));
                    touched.insert(t.ticker.clone());
                }
            }
            Expense => {
                self.engine.add_fee(t.total.unwrap_or(0.0).abs())?;
            }

            BuyToOpen | SellToClose | SellToOpen | BuyToClose => {
                let key = t.option_ticker().ok_or_else(|| {
                    TwrError::invalid_input_for(&t.unique_id, format!("{:?} requires option fields", t.kind))
                })?;
                let n = shares()?;
                match t.kind {
                    BuyToOpen => self.engine.add_shares(&key, n, price)?,
                    SellToClose => self.engine.remove_shares(&key, n, price)?,
                    SellToOpen => self.engine.short_shares(&key, n, price)?,
                    BuyToClose => self.engine.cover_shares(&key, n, price)?,
                    _ => unreachable!(),
                }
                if let Some(fee) = t.fee {
                    self.engine.add_fee(fee)?;
                }
                touched.insert(key);
            }

            Exercise | Assign | Expire => {
                let key = t.option_ticker().ok_or_else(|| {
                    TwrError::invalid_input_for(&t.unique_id, format!("{:?} requires option fields", t.kind))
                })?;
                let n = shares()?;
                let execution_price = if t.kind == Expire { 0.0 } else { t.option_strike.unwrap_or(0.0) };
                if self.engine.shares_short(&key) > 0.0 {
                    self.engine.cover_shares(&key, n, execution_price)?;
                } else {
                    self.engine.remove_shares(&key, n, execution_price)?;
                }
                touched.insert(key);
            }
        }
        Ok(())
    }

    /// The return series and value computed so far, one entry per day
    /// replayed.
    pub fn history(&self) -> &[DailySnapshot] {
        &self.history
    }

    /// Current total portfolio value (spec §4.B `getTotalValue`).
    pub fn total_value(&self) -> f64 {
        self.engine.get_total_value()
    }

    /// Current per-position holdings, including option synthetic
    /// tickers, with FIFO-averaged cost basis.
    pub fn holdings(&self) -> Vec<Holding> {
        self.engine
            .held_tickers()
            .into_iter()
            .map(|ticker| Holding {
                shares_long: self.engine.shares_long(&ticker),
                shares_short: self.engine.shares_short(&ticker),
                average_basis: self.engine.basis().get_basis(&ticker),
                total_basis: self.engine.basis().get_total_basis(&ticker),
                ticker,
            })
            .collect()
    }

    pub fn engine(&self) -> &TwrEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::InMemoryPriceOracle;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn txn(kind: TransactionKind, ticker: &str, date: NaiveDate) -> Transaction {
        Transaction {
            unique_id: format!("{ticker}-{date}-{kind:?}"),
            date,
            kind,
            ticker: ticker.to_string(),
            ticker2: None,
            shares: None,
            price_per_share: None,
            fee: None,
            total: None,
            sub_type: None,
            option_strike: None,
            option_expire: None,
            edited: false,
            deleted: false,
            auto: false,
        }
    }

    #[test]
    fn basic_buy_then_mark_produces_expected_return() {
        let mut buy = txn(TransactionKind::Buy, "A", d(2024, 1, 1));
        buy.shares = Some(10.0);
        buy.price_per_share = Some(100.0);

        let oracle = InMemoryPriceOracle::new().with_price("A", d(2024, 1, 2), 110.0);
        let mut driver = PortfolioReplayDriver::new(oracle);
        driver.replay(&[buy]).unwrap();
        driver.replay_daily(&[], d(2024, 1, 2), d(2024, 1, 2)).unwrap();

        assert!((driver.total_value() - 1100.0).abs() < 1e-6);
        let history = driver.history();
        assert!((history.last().unwrap().return_split - 1.1).abs() < 1e-6);
    }

    #[test]
    fn deposit_and_withdrawal_carry_no_engine_call() {
        let mut deposit = txn(TransactionKind::Deposit, CASH_TICKER, d(2024, 1, 1));
        deposit.total = Some(1000.0);
        let mut withdrawal = txn(TransactionKind::Withdrawal, CASH_TICKER, d(2024, 1, 2));
        withdrawal.total = Some(500.0);

        let oracle = InMemoryPriceOracle::new();
        let mut driver = PortfolioReplayDriver::new(oracle);
        driver.replay(&[deposit, withdrawal]).unwrap();
        assert_eq!(driver.total_value(), 0.0);
        assert!(driver.holdings().is_empty());
    }

    #[test]
    fn deleted_transactions_are_excluded() {
        let mut buy = txn(TransactionKind::Buy, "A", d(2024, 1, 1));
        buy.shares = Some(10.0);
        buy.price_per_share = Some(100.0);
        buy.deleted = true;

        let oracle = InMemoryPriceOracle::new();
        let mut driver = PortfolioReplayDriver::new(oracle);
        driver.replay(&[buy]).unwrap();
        assert!(driver.history().is_empty());
    }

    #[test]
    fn same_day_deposit_and_buy_sort_deposit_first() {
        let mut buy = txn(TransactionKind::Buy, "A", d(2024, 1, 1));
        buy.shares = Some(1.0);
        buy.price_per_share = Some(10.0);
        let mut deposit = txn(TransactionKind::Deposit, CASH_TICKER, d(2024, 1, 1));
        deposit.total = Some(10.0);

        let sorted = PortfolioReplayDriver::<InMemoryPriceOracle>::sorted(&[buy, deposit]);
        assert_eq!(sorted[0].kind, TransactionKind::Deposit);
        assert_eq!(sorted[1].kind, TransactionKind::Buy);
    }

    #[test]
    fn split_doubles_holding_without_changing_value() {
        let mut buy = txn(TransactionKind::Buy, "A", d(2024, 1, 1));
        buy.shares = Some(10.0);
        buy.price_per_share = Some(100.0);

        let mut split = txn(TransactionKind::Split, "A", d(2024, 1, 2));
        split.total = Some(2.0);

        let oracle = InMemoryPriceOracle::new().with_price("A", d(2024, 1, 2), 50.0);
        let mut driver = PortfolioReplayDriver::new(oracle);
        driver.replay(&[buy, split]).unwrap();

        let holding = driver.holdings().into_iter().find(|h| h.ticker == "A").unwrap();
        assert_eq!(holding.shares_long, 20.0);
        assert!((driver.total_value() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn exercised_put_closes_long_option_position() {
        let date = d(2024, 6, 21);
        let mut open = txn(TransactionKind::BuyToOpen, "A", date);
        open.shares = Some(1.0);
        open.price_per_share = Some(2.0);
        open.sub_type = Some(1); // put
        open.option_strike = Some(50.0);
        open.option_expire = Some(d(2024, 7, 1));

        let mut exercise = txn(TransactionKind::Exercise, "A", d(2024, 7, 1));
        exercise.shares = Some(1.0);
        exercise.sub_type = Some(1);
        exercise.option_strike = Some(50.0);
        exercise.option_expire = Some(d(2024, 7, 1));

        let oracle = InMemoryPriceOracle::new();
        let mut driver = PortfolioReplayDriver::new(oracle);
        driver.replay(&[open, exercise]).unwrap();
        assert!(driver.holdings().is_empty());
    }
}
