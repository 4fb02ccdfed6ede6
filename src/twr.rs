//! The time-weighted return engine (spec §4.B).
//!
//! A direct, field-for-field port of the day-boundary batch algorithm: a
//! caller opens a day with [`TwrEngine::begin_day`], feeds it every
//! transaction for that day through the `add_*`/`remove_*`/`short_*`/
//! `cover_*` mutators plus `set_value` marks, then closes the day with
//! [`TwrEngine::end_day`], which folds the day's activity into the
//! running multiplier chain. The multiplier chain is the TWR invariant:
//! external cash flows are weighted out by construction (the
//! `num/den` step below), so deposits and withdrawals never show up as
//! performance.
//!
//! Three chained multipliers are exposed, each a superset of the last:
//! `return_split` (price return only), `return_div` (plus dividends), and
//! `return_fee` (plus fees). Each is a running product since day zero;
//! [`TwrEngine::end_day`] multiplies it by that day's factor.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::basis::BasisLedger;
use crate::error::{TwrError, TwrResult};

const EPSILON: f64 = 1.0e-6;

/// A day's closing snapshot, suitable for building a return series.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub total_value: f64,
    pub return_split: f64,
    pub return_div: f64,
    pub return_fee: f64,
}

/// One (cash-weighted amount, per-unit return) contribution to a day's
/// blended return. Non-public: an implementation detail of `end_day`.
struct Contribution {
    amount: f64,
    factor: f64,
}

/// The day-boundary TWR state machine for a single portfolio.
#[derive(Debug, Clone)]
pub struct TwrEngine {
    day: u32,
    current_date: Option<NaiveDate>,
    primary_ticker: Option<String>,

    shares: HashMap<String, f64>,
    shares_short: HashMap<String, f64>,
    prices: HashMap<String, f64>,
    yesterday_prices: HashMap<String, f64>,
    basis: BasisLedger,
    adjust_basises: HashMap<String, f64>,
    adjustment: f64,
    total_adjustment: f64,

    last_value: f64,
    last_return: f64,
    yesterday_value: f64,
    stock_dividend: HashMap<String, f64>,
    dividend_mod: f64,
    fee_mod: f64,

    // Per-day accumulators, live between begin_day and end_day.
    cash_in: HashMap<String, f64>,
    shares_in: HashMap<String, f64>,
    cash_out: HashMap<String, f64>,
    shares_out: HashMap<String, f64>,
    cash_in_short: HashMap<String, f64>,
    shares_in_short: HashMap<String, f64>,
    cash_out_short: HashMap<String, f64>,
    shares_out_short: HashMap<String, f64>,
    dividends: f64,
    fees: f64,
}

impl Default for TwrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TwrEngine {
    pub fn new() -> Self {
        TwrEngine {
            day: 0,
            current_date: None,
            primary_ticker: None,
            shares: HashMap::new(),
            shares_short: HashMap::new(),
            prices: HashMap::new(),
            yesterday_prices: HashMap::new(),
            basis: BasisLedger::new(),
            adjust_basises: HashMap::new(),
            adjustment: 0.0,
            total_adjustment: 0.0,
            last_value: 0.0,
            last_return: 1.0,
            yesterday_value: 0.0,
            stock_dividend: HashMap::new(),
            dividend_mod: 1.0,
            fee_mod: 1.0,
            cash_in: HashMap::new(),
            shares_in: HashMap::new(),
            cash_out: HashMap::new(),
            shares_out: HashMap::new(),
            cash_in_short: HashMap::new(),
            shares_in_short: HashMap::new(),
            cash_out_short: HashMap::new(),
            shares_out_short: HashMap::new(),
            dividends: 0.0,
            fees: 0.0,
        }
    }

    /// Open a new batch. Must be paired with exactly one `end_day` call;
    /// `date` is recorded only for lot bookkeeping and the returned
    /// snapshot, never compared against anything.
    pub fn begin_day(&mut self, date: NaiveDate) {
        self.current_date = Some(date);
        self.cash_in.clear();
        self.shares_in.clear();
        self.cash_out.clear();
        self.shares_out.clear();
        self.cash_in_short.clear();
        self.shares_in_short.clear();
        self.cash_out_short.clear();
        self.shares_out_short.clear();
        self.dividends = 0.0;
        self.fees = 0.0;
        self.adjustment = 0.0;
    }

    pub fn add_shares(&mut self, ticker: &str, shares: f64, price: f64) -> TwrResult<()> {
        require_nonneg(ticker, "shares", shares)?;
        require_nonneg(ticker, "price", price)?;
        if shares == 0.0 {
            return Ok(());
        }
        if self.primary_ticker.is_none() {
            self.primary_ticker = Some(ticker.to_string());
        }
        if price != 0.0 || !self.prices.contains_key(ticker) {
            self.prices.insert(ticker.to_string(), price);
        }
        self.yesterday_prices.entry(ticker.to_string()).or_insert(price);

        *self.cash_in.entry(ticker.to_string()).or_insert(0.0) += shares * price;
        *self.shares_in.entry(ticker.to_string()).or_insert(0.0) += shares;
        Ok(())
    }

    pub fn remove_shares(&mut self, ticker: &str, shares: f64, price: f64) -> TwrResult<()> {
        require_nonneg(ticker, "shares", shares)?;
        require_nonneg(ticker, "price", price)?;
        if shares == 0.0 {
            return Ok(());
        }
        self.prices.insert(ticker.to_string(), price);
        *self.cash_out.entry(ticker.to_string()).or_insert(0.0) += shares * price;
        *self.shares_out.entry(ticker.to_string()).or_insert(0.0) += shares;
        Ok(())
    }

    pub fn stock_dividend_shares(&mut self, ticker: &str, shares: f64) {
        if shares == 0.0 {
            return;
        }
        if self.primary_ticker.is_none() {
            self.primary_ticker = Some(ticker.to_string());
        }
        *self.stock_dividend.entry(ticker.to_string()).or_insert(0.0) += shares;
    }

    pub fn short_shares(&mut self, ticker: &str, shares: f64, price: f64) -> TwrResult<()> {
        require_nonneg(ticker, "shares", shares)?;
        require_nonneg(ticker, "price", price)?;
        if self.primary_ticker.is_none() {
            self.primary_ticker = Some(ticker.to_string());
        }
        if price != 0.0 {
            self.prices.insert(ticker.to_string(), price);
        }
        *self.cash_in_short.entry(ticker.to_string()).or_insert(0.0) += shares * price;
        *self.shares_in_short.entry(ticker.to_string()).or_insert(0.0) += shares;
        Ok(())
    }

    pub fn cover_shares(&mut self, ticker: &str, shares: f64, price: f64) -> TwrResult<()> {
        require_nonneg(ticker, "shares", shares)?;
        require_nonneg(ticker, "price", price)?;
        self.prices.insert(ticker.to_string(), price);
        *self.cash_out_short.entry(ticker.to_string()).or_insert(0.0) += shares * price;
        *self.shares_out_short.entry(ticker.to_string()).or_insert(0.0) += shares;
        Ok(())
    }

    pub fn add_dividend(&mut self, amount: f64) -> TwrResult<()> {
        if amount < 0.0 {
            return Err(TwrError::invalid_input(format!(
                "dividend amount must be >= 0, got {amount}"
            )));
        }
        self.dividends += amount;
        Ok(())
    }

    pub fn add_dividend_reinvest(&mut self, ticker: &str, shares: f64, price: f64) -> TwrResult<()> {
        require_nonneg(ticker, "shares", shares)?;
        require_nonneg(ticker, "price", price)?;
        self.add_dividend(shares * price)?;
        self.add_shares(ticker, shares, price)
    }

    pub fn add_adjustment(&mut self, amount: f64) {
        self.total_adjustment += amount;
        self.adjustment += amount;
    }

    pub fn adjust_basis(&mut self, ticker: &str, amount: f64) {
        *self.adjust_basises.entry(ticker.to_string()).or_insert(0.0) += amount;
    }

    pub fn add_fee(&mut self, amount: f64) -> TwrResult<()> {
        if amount < 0.0 {
            return Err(TwrError::invalid_input(format!(
                "fee amount must be >= 0, got {amount}"
            )));
        }
        self.fees += amount;
        Ok(())
    }

    pub fn set_value(&mut self, ticker: &str, price: f64) -> TwrResult<()> {
        require_nonneg(ticker, "price", price)?;
        self.prices.insert(ticker.to_string(), price);
        Ok(())
    }

    /// Long shares currently held for `ticker` (0 if none).
    pub fn shares_long(&self, ticker: &str) -> f64 {
        self.shares.get(ticker).copied().unwrap_or(0.0)
    }

    /// Short shares currently held for `ticker` (0 if none).
    pub fn shares_short(&self, ticker: &str) -> f64 {
        self.shares_short.get(ticker).copied().unwrap_or(0.0)
    }

    /// Apply a `split` transaction (spec §6): multiply the held share
    /// count by `ratio` and divide the mark by the same factor, leaving
    /// total value — and therefore measured return — unchanged. Applied
    /// immediately rather than through the per-day accumulators, since a
    /// split carries no cash flow and contributes no return term.
    pub fn apply_split(&mut self, ticker: &str, ratio: f64) -> TwrResult<()> {
        if ratio <= 0.0 {
            return Err(TwrError::invalid_basis(
                ticker,
                format!("split ratio must be > 0, got {ratio}"),
            ));
        }
        if let Some(shares) = self.shares.get_mut(ticker) {
            *shares *= ratio;
        }
        if let Some(shares) = self.shares_short.get_mut(ticker) {
            *shares *= ratio;
        }
        if let Some(price) = self.prices.get_mut(ticker) {
            *price /= ratio;
        }
        if let Some(price) = self.yesterday_prices.get_mut(ticker) {
            *price /= ratio;
        }
        self.basis.apply_split(ticker, ratio);
        Ok(())
    }

    /// Read-only view of the FIFO basis ledger, for callers that want
    /// per-lot cost basis or total basis for a held ticker.
    pub fn basis(&self) -> &BasisLedger {
        &self.basis
    }

    /// Every ticker the engine currently carries a nonzero long or short
    /// position in. Used by the replay driver to find tickers needing a
    /// stale-mark refresh on days with no trade for that ticker.
    pub fn held_tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self
            .shares
            .iter()
            .filter(|(_, &s)| s.abs() > EPSILON)
            .map(|(t, _)| t.clone())
            .collect();
        for (t, &s) in &self.shares_short {
            if s.abs() > EPSILON && !tickers.contains(t) {
                tickers.push(t.clone());
            }
        }
        tickers
    }

    /// Apply a `tickerChange` transaction: move a position from `old` to
    /// `new` without booking any cash flow or return (spec §6 lists no
    /// explicit mapping for this kind; a rename is the only
    /// value-preserving interpretation of a ticker symbol change).
    pub fn rename_ticker(&mut self, old: &str, new: &str) {
        if let Some(shares) = self.shares.remove(old) {
            *self.shares.entry(new.to_string()).or_insert(0.0) += shares;
        }
        if let Some(shares) = self.shares_short.remove(old) {
            *self.shares_short.entry(new.to_string()).or_insert(0.0) += shares;
        }
        if let Some(price) = self.prices.remove(old) {
            self.prices.insert(new.to_string(), price);
        }
        if let Some(price) = self.yesterday_prices.remove(old) {
            self.yesterday_prices.insert(new.to_string(), price);
        }
        self.basis.rename_ticker(old, new);
    }

    /// Value of a short position: positive while the mark stays at or
    /// below the cost basis, inverse-scaled once it rises above (a short
    /// position's loss is unbounded, so the formula keeps it nonlinear
    /// rather than extrapolating past the basis price).
    fn short_value(shares: f64, basis: f64, price: f64, total_basis: f64) -> f64 {
        if price <= basis {
            shares * (basis - price) + total_basis
        } else {
            shares * basis * (basis / price)
        }
    }

    pub fn get_total_value(&self) -> f64 {
        let mut v = 0.0;
        for (t, shares) in &self.shares {
            v += shares * self.prices.get(t).copied().unwrap_or(0.0);
        }
        for (t, shares) in &self.shares_short {
            let basis = self.basis.get_basis(t).unwrap_or(0.0);
            let price = self.prices.get(t).copied().unwrap_or(0.0);
            let total_basis = self.basis.get_total_basis(t);
            v += Self::short_value(*shares, basis, price, total_basis);
        }
        v + self.total_adjustment
    }

    pub fn get_return_split(&self) -> f64 {
        self.last_return
    }

    pub fn get_return_div(&self) -> f64 {
        self.get_return_split() * self.dividend_mod
    }

    pub fn get_return_fee(&self) -> f64 {
        self.get_return_split() * self.dividend_mod * self.fee_mod
    }

    /// Close the day: fold every mutation recorded since `begin_day` into
    /// the running multiplier chain, and return a snapshot of the new
    /// state.
    pub fn end_day(&mut self) -> TwrResult<DailySnapshot> {
        let date = self
            .current_date
            .ok_or_else(|| TwrError::invalid_input("end_day called without a matching begin_day"))?;
        self.day += 1;

        let mut today_net_cash_in = 0.0;
        let mut today_cash_in = 0.0;
        let mut today_cash_out = 0.0;
        for v in self.cash_in.values() {
            today_net_cash_in += v.abs();
            today_cash_in += v.abs();
        }
        for v in self.cash_out.values() {
            today_net_cash_in -= v.abs();
            today_cash_out += v.abs();
        }
        for v in self.cash_in_short.values() {
            today_net_cash_in += v.abs();
            today_cash_in += v.abs();
        }
        for v in self.cash_out_short.values() {
            today_net_cash_in -= v.abs();
            today_cash_out += v.abs();
        }
        let _ = (today_cash_in, today_cash_out);

        for (t, shares) in self.stock_dividend.drain() {
            *self.shares.entry(t).or_insert(0.0) += shares;
        }

        let todays_start_value = self.get_total_value();
        let mut returns_today: Vec<Contribution> = Vec::new();

        for (t, amount) in self.adjust_basises.drain() {
            let basis_value = self.basis.get_basis(&t).unwrap_or(0.0);
            if basis_value == 0.0 {
                return Err(TwrError::invalid_basis(
                    &t,
                    "adjustBasis applied but ticker carries no cost basis",
                ));
            }
            if todays_start_value > 0.0 {
                self.last_return *= (todays_start_value + amount) / todays_start_value;
            }
        }

        for (t, shares_in) in self.shares_in.drain() {
            if shares_in != 0.0 {
                let cash_in = self.cash_in.get(&t).copied().unwrap_or(0.0);
                let this_price = cash_in / shares_in;
                self.basis.add(&t, date, shares_in, cash_in)?;

                let price = self.prices.get(&t).copied().unwrap_or(0.0);
                let factor = if price != 0.0 && this_price != 0.0 {
                    price / this_price
                } else {
                    1.0
                };
                returns_today.push(Contribution { amount: cash_in, factor });
            }
            *self.shares.entry(t).or_insert(0.0) += shares_in;
        }
        self.cash_in.clear();

        for (t, shares_in) in self.shares_in_short.drain() {
            if shares_in != 0.0 {
                let cash_in = self.cash_in_short.get(&t).copied().unwrap_or(0.0);
                let this_price = cash_in / shares_in;
                self.basis.add(&t, date, shares_in, cash_in)?;

                let price = self.prices.get(&t).copied().unwrap_or(0.0);
                let this_return = if this_price < price {
                    this_price / price
                } else {
                    1.0 + (price - this_price) / price
                };
                returns_today.push(Contribution { amount: cash_in, factor: this_return });
            }
            *self.shares_short.entry(t).or_insert(0.0) += shares_in;
        }
        self.cash_in_short.clear();

        for (t, shares_out) in self.shares_out.drain() {
            if shares_out != 0.0 {
                let cash_out_recorded = self.cash_out.get(&t).copied().unwrap_or(0.0);
                let this_price = cash_out_recorded / shares_out;
                let cash_out = if cash_out_recorded == 0.0 {
                    self.basis.get_basis(&t).unwrap_or(0.0)
                } else {
                    cash_out_recorded
                };

                let yesterday_price = self.yesterday_prices.get(&t).copied().unwrap_or(0.0);
                let factor = if yesterday_price != 0.0 {
                    this_price / yesterday_price
                } else {
                    let price = self.prices.get(&t).copied().unwrap_or(0.0);
                    if price != 0.0 {
                        this_price / price
                    } else {
                        1.0
                    }
                };
                returns_today.push(Contribution { amount: cash_out, factor });
            }

            self.basis.remove(&t, shares_out.abs())?;
            *self.shares.entry(t).or_insert(0.0) -= shares_out;
        }
        self.cash_out.clear();

        for (t, shares_out) in self.shares_out_short.drain() {
            if shares_out != 0.0 {
                let cash_out = self.cash_out_short.get(&t).copied().unwrap_or(0.0);
                let sale_price = cash_out / shares_out;
                let _ = sale_price;
                let yesterday_price = match self.yesterday_prices.get(&t) {
                    Some(p) if *p != 0.0 => *p,
                    _ => self.prices.get(&t).copied().unwrap_or(0.0),
                };

                let basis = self.basis.get_basis(&t).unwrap_or(0.0);
                let total_basis = basis * shares_out;
                let price = self.prices.get(&t).copied().unwrap_or(0.0);
                let yesterday_value = Self::short_value(shares_out, basis, yesterday_price, total_basis);
                let today_value = Self::short_value(shares_out, basis, price, total_basis);

                if yesterday_value != 0.0 && today_value != 0.0 {
                    returns_today.push(Contribution {
                        amount: basis,
                        factor: today_value / yesterday_value,
                    });
                }
            }

            self.basis.remove(&t, shares_out)?;
            let entry = self.shares_short.entry(t.clone()).or_insert(0.0);
            *entry -= shares_out;
            if entry.abs() < EPSILON {
                self.shares_short.remove(&t);
            }
        }
        self.cash_out_short.clear();

        let todays_value = self.get_total_value();

        if self.yesterday_value == 0.0 && today_net_cash_in != 0.0 {
            // First holdings, or a position reopened from flat. No return
            // contribution: there is nothing to measure performance against yet.
        } else if todays_start_value != 0.0 && self.yesterday_value != 0.0 {
            returns_today.push(Contribution {
                amount: todays_value,
                factor: todays_start_value / self.yesterday_value,
            });
        } else if todays_value == 0.0 && self.yesterday_value != 0.0 && today_net_cash_in < 0.0 {
            returns_today.push(Contribution {
                amount: -today_net_cash_in,
                factor: -today_net_cash_in / self.yesterday_value,
            });
        }

        let mut num = 0.0;
        let mut den = 0.0;
        for c in &returns_today {
            num += c.amount * c.factor;
            den += c.amount;
        }
        if den > 0.0 {
            self.last_return *= num / den;
        }

        if self.yesterday_value == 0.0 && self.adjustment != 0.0 {
            let without_adjustment = todays_value - self.adjustment;
            if without_adjustment == 0.0 {
                log::warn!(
                    "twr: day-one adjustment of {} on a fully-offset position; \
                     leaving the split multiplier unchanged",
                    self.adjustment
                );
            } else {
                self.last_return *= (without_adjustment + self.adjustment) / without_adjustment;
            }
        }

        if self.fees != 0.0 {
            let mut max_holdings = todays_start_value.max(todays_value).max(today_net_cash_in);
            if max_holdings > 0.0 {
                if self.dividends > self.fees {
                    max_holdings += self.dividends - self.fees;
                }
                if self.primary_ticker.as_deref() == Some(crate::transaction::CASH_TICKER) {
                    if max_holdings < self.fees {
                        self.fee_mod = 0.0;
                    } else {
                        self.fee_mod *= (max_holdings - self.fees) / max_holdings;
                    }
                } else {
                    self.fee_mod *= max_holdings / (max_holdings + self.fees);
                }
            } else {
                self.fee_mod = 0.0;
            }
            self.fees = 0.0;
        }

        if self.dividends != 0.0 {
            if self.yesterday_value > 0.0 {
                self.dividend_mod *= (self.yesterday_value + self.dividends) / self.yesterday_value;
            } else if todays_value > 0.0 {
                self.dividend_mod *= (todays_value + self.dividends) / todays_value;
            } else if self.last_value > 0.0 {
                self.dividend_mod *= (self.last_value + self.dividends) / self.last_value;
            }
            self.dividends = 0.0;
        }

        for (t, p) in self.prices.clone() {
            self.yesterday_prices.insert(t, p);
        }
        self.yesterday_value = todays_value;
        if todays_value != 0.0 {
            self.last_value = todays_value;
        }

        self.current_date = None;
        Ok(DailySnapshot {
            date,
            total_value: todays_value,
            return_split: self.get_return_split(),
            return_div: self.get_return_div(),
            return_fee: self.get_return_fee(),
        })
    }
}

fn require_nonneg(ticker: &str, field: &str, value: f64) -> TwrResult<()> {
    if value < 0.0 {
        return Err(TwrError::invalid_input(format!(
            "{ticker}: {field} must be >= 0, got {value}"
        )));
    }
    Ok(())
}
