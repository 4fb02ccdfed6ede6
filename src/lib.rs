//! Return-computation core for a personal portfolio tracker.
//!
//! Ingests a chronologically ordered stream of portfolio transactions and
//! produces three cumulative time-weighted return (TWR) series —
//! split-only, split+dividend, and split+dividend+fee — plus current
//! total portfolio value, per-lot cost basis, and per-position holdings.
//!
//! The crate has no UI, no network I/O and no database: its only external
//! collaborator is a [`oracle::PriceOracle`] supplying end-of-day marks.
//! [`replay::PortfolioReplayDriver`] is the entry point; it drives
//! [`twr::TwrEngine`] (backed by [`basis::BasisLedger`]) one day at a
//! time over a transaction stream already passed through
//! [`option_lifecycle::resolve_option_lifecycles`].

pub mod basis;
pub mod error;
pub mod irr;
pub mod option_lifecycle;
pub mod oracle;
pub mod replay;
pub mod transaction;
pub mod twr;

pub use basis::{BasisLedger, Lot};
pub use error::{TwrError, TwrResult};
pub use oracle::{InMemoryPriceOracle, PriceOracle};
pub use option_lifecycle::resolve_option_lifecycles;
pub use replay::{Holding, PortfolioReplayDriver};
pub use transaction::{DividendSubType, OptionRight, Transaction, TransactionKind, CASH_TICKER};
pub use twr::{DailySnapshot, TwrEngine};
