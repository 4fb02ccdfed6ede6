//! The transaction data model.
//!
//! A `Transaction` is immutable once created, mutated only by the option
//! lifecycle resolver (which may change `kind`), and thereafter read-only.
//! The flat shape here mirrors the abstract persisted schema (spec §6); it
//! is the contract between an external importer and this crate. Per-kind
//! field interpretation (spec §9's "variants, not class hierarchy" note) is
//! pushed into [`TransactionKind`] and the typed accessors below rather
//! than scattered through the replay driver.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{TwrError, TwrResult};

/// Sentinel ticker denoting the portfolio's cash position.
pub const CASH_TICKER: &str = "__CASH__";

/// Contract multiplier: shares of underlying per option contract.
pub const OPTION_CONTRACT_MULTIPLIER: f64 = 100.0;

/// Stable numeric transaction kind codes, matching the persisted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    Deposit = 0,
    Withdrawal = 1,
    Expense = 2,
    Buy = 3,
    Sell = 4,
    Split = 5,
    Dividend = 6,
    Adjustment = 7,
    StockDividend = 8,
    DividendReinvest = 9,
    Spinoff = 10,
    TransferIn = 11,
    TransferOut = 12,
    Short = 13,
    Cover = 14,
    TickerChange = 15,
    Exercise = 16,
    Assign = 17,
    BuyToOpen = 18,
    SellToClose = 19,
    SellToOpen = 20,
    BuyToClose = 21,
    Expire = 22,
}

impl TransactionKind {
    /// The stable numeric code for this kind (spec §6).
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True for the four option-open kinds and the three option-close
    /// kinds that still carry a price (§6 table).
    pub fn is_option_open_or_close(self) -> bool {
        matches!(
            self,
            TransactionKind::BuyToOpen
                | TransactionKind::SellToClose
                | TransactionKind::SellToOpen
                | TransactionKind::BuyToClose
        )
    }

    /// True for the three terminal option-lifecycle kinds.
    pub fn is_option_terminal(self) -> bool {
        matches!(
            self,
            TransactionKind::Exercise | TransactionKind::Assign | TransactionKind::Expire
        )
    }

    /// True if this kind requires `optionStrike`/`optionExpire`/`subType`
    /// (option put/call) to be present (spec §3 invariant: this applies
    /// to the four option-open/close kinds and the three terminal
    /// lifecycle kinds alike).
    pub fn requires_option_fields(self) -> bool {
        self.is_option_open_or_close() || self.is_option_terminal()
    }

    /// Intra-day processing order (spec §4.D). Lower sorts first.
    pub fn ordering(self) -> u8 {
        use TransactionKind::*;
        match self {
            Deposit | TransferIn => 0,
            Buy | Short | DividendReinvest | BuyToOpen | SellToOpen => 1,
            Split | Dividend | Spinoff | TickerChange => 2,
            Sell | Cover | BuyToClose | SellToClose => 99,
            Withdrawal | TransferOut => 100,
            _ => 50,
        }
    }
}

/// Dividend tax classification. Not used for return computation; informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DividendSubType {
    Ordinary = 1,
    Qualified = 2,
    CapitalGainShortTerm = 3,
    CapitalGainLongTerm = 4,
    ReturnOfCapital = 5,
    TaxExempt = 6,
}

impl DividendSubType {
    fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Ordinary,
            2 => Self::Qualified,
            3 => Self::CapitalGainShortTerm,
            4 => Self::CapitalGainLongTerm,
            5 => Self::ReturnOfCapital,
            6 => Self::TaxExempt,
            _ => return None,
        })
    }
}

/// Option put/call, carried in the overloaded `subType` field on option
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptionRight {
    Put = 1,
    Call = 2,
}

impl OptionRight {
    fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Put,
            2 => Self::Call,
            _ => return None,
        })
    }
}

/// A single immutable portfolio transaction.
///
/// All money-valued fields are signed magnitudes whose sign convention is
/// determined by `kind` (spec §3, §6); `total` when present is *after*
/// `fee`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub unique_id: String,
    pub date: NaiveDate,
    pub kind: TransactionKind,
    pub ticker: String,
    pub ticker2: Option<String>,
    pub shares: Option<f64>,
    pub price_per_share: Option<f64>,
    pub fee: Option<f64>,
    pub total: Option<f64>,
    /// Overloaded: a [`DividendSubType`] code for `dividend`, an
    /// [`OptionRight`] code for option kinds, `None` otherwise.
    pub sub_type: Option<i32>,
    pub option_strike: Option<f64>,
    pub option_expire: Option<NaiveDate>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub auto: bool,
}

impl Transaction {
    /// Typed view of `sub_type` when `kind` is a dividend.
    pub fn dividend_sub_type(&self) -> Option<DividendSubType> {
        if self.kind != TransactionKind::Dividend {
            return None;
        }
        self.sub_type.and_then(DividendSubType::from_code)
    }

    /// Typed view of `sub_type` when `kind` is an option kind.
    pub fn option_right(&self) -> Option<OptionRight> {
        if !self.kind.requires_option_fields() {
            return None;
        }
        self.sub_type.and_then(OptionRight::from_code)
    }

    /// The option identity this transaction's position belongs to, if any:
    /// `(underlying, expire, strike, right)`. The engine keys synthetic
    /// option tickers off this tuple (spec §6).
    pub fn option_key(&self) -> Option<(String, NaiveDate, i64, OptionRight)> {
        let expire = self.option_expire?;
        let strike = self.option_strike?;
        let right = self.option_right()?;
        Some((self.ticker.clone(), expire, strike_key(strike), right))
    }

    /// A synthetic ticker string for the option position, used as the
    /// engine/basis-ledger key for option legs.
    pub fn option_ticker(&self) -> Option<String> {
        self.option_key()
            .map(|(underlying, expire, strike, right)| {
                format!(
                    "{underlying}:{expire}:{}:{}",
                    strike as f64 / STRIKE_SCALE,
                    match right {
                        OptionRight::Put => "P",
                        OptionRight::Call => "C",
                    }
                )
            })
    }

    /// Validate the structural invariants from spec §3. Does not validate
    /// sign/magnitude preconditions owned by the TWR engine (spec §4.B).
    pub fn validate(&self) -> TwrResult<()> {
        match self.kind {
            TransactionKind::Deposit | TransactionKind::Withdrawal => {
                if self.ticker != CASH_TICKER {
                    return Err(TwrError::invalid_input_for(
                        &self.unique_id,
                        format!(
                            "{:?} must use ticker {CASH_TICKER}, got {}",
                            self.kind, self.ticker
                        ),
                    ));
                }
            }
            k if k.requires_option_fields() => {
                if self.option_strike.is_none() || self.option_expire.is_none() {
                    return Err(TwrError::invalid_input_for(
                        &self.unique_id,
                        format!("{k:?} requires optionStrike and optionExpire"),
                    ));
                }
                if self.option_right().is_none() {
                    return Err(TwrError::invalid_input_for(
                        &self.unique_id,
                        format!("{k:?} requires subType of put or call"),
                    ));
                }
            }
            TransactionKind::Spinoff | TransactionKind::TickerChange => match &self.ticker2 {
                Some(t2) if t2 != &self.ticker => {}
                _ => {
                    return Err(TwrError::invalid_input_for(
                        &self.unique_id,
                        format!("{:?} requires ticker2 distinct from ticker", self.kind),
                    ))
                }
            },
            _ => {}
        }
        Ok(())
    }
}

/// Strikes are compared with a `1e-6` tolerance elsewhere (spec §4.C); for
/// use as a hash/equality key we scale and round to the nearest tenth of a
/// cent, which is well inside that tolerance for any realistic strike.
const STRIKE_SCALE: f64 = 10_000.0;

fn strike_key(strike: f64) -> i64 {
    (strike * STRIKE_SCALE).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(kind: TransactionKind) -> Transaction {
        Transaction {
            unique_id: "t1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            kind,
            ticker: "A".to_string(),
            ticker2: None,
            shares: Some(10.0),
            price_per_share: Some(100.0),
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
    fn deposit_requires_cash_ticker() {
        let mut t = base(TransactionKind::Deposit);
        assert!(t.validate().is_err());
        t.ticker = CASH_TICKER.to_string();
        assert!(t.validate().is_ok());
    }

    #[test]
    fn option_kind_requires_strike_expire_and_right() {
        let mut t = base(TransactionKind::SellToClose);
        assert!(t.validate().is_err());
        t.option_strike = Some(50.0);
        t.option_expire = Some(NaiveDate::from_ymd_opt(2024, 6, 21).unwrap());
        assert!(t.validate().is_err(), "missing subType should still fail");
        t.sub_type = Some(OptionRight::Put as i32);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn spinoff_requires_distinct_ticker2() {
        let mut t = base(TransactionKind::Spinoff);
        assert!(t.validate().is_err());
        t.ticker2 = Some("A".to_string());
        assert!(t.validate().is_err(), "ticker2 equal to ticker must fail");
        t.ticker2 = Some("B".to_string());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn ordering_matches_spec_table() {
        assert_eq!(TransactionKind::Deposit.ordering(), 0);
        assert_eq!(TransactionKind::TransferIn.ordering(), 0);
        assert_eq!(TransactionKind::Buy.ordering(), 1);
        assert_eq!(TransactionKind::SellToOpen.ordering(), 1);
        assert_eq!(TransactionKind::Split.ordering(), 2);
        assert_eq!(TransactionKind::Sell.ordering(), 99);
        assert_eq!(TransactionKind::SellToClose.ordering(), 99);
        assert_eq!(TransactionKind::Withdrawal.ordering(), 100);
        assert_eq!(TransactionKind::Expense.ordering(), 50);
    }

    #[test]
    fn dividend_sub_type_round_trips() {
        let mut t = base(TransactionKind::Dividend);
        t.sub_type = Some(DividendSubType::ReturnOfCapital as i32);
        assert_eq!(t.dividend_sub_type(), Some(DividendSubType::ReturnOfCapital));
    }
}
