//! Option lifecycle resolver (spec §4.C).
//!
//! Brokerage feeds report assigns, exercises and expirations of a held
//! option as plain `buyToClose`/`sellToClose` transactions carrying no
//! price and no total. This pass reclassifies those ambiguous close-side
//! transactions by looking for a same-day, same-ticker stock trade at the
//! option's strike: enough matching buys or sells means the option was
//! exercised (or assigned — the two are not distinguished here, see
//! below); none means it expired worthless.
//!
//! Ambiguity between `exercise` and `assign` is not resolved at this
//! layer: both collapse to `exercise`, matching the source this crate was
//! distilled from. `TransactionKind::Assign` remains a valid variant for
//! transactions an importer already tagged that way; this resolver simply
//! never produces it.

use crate::transaction::{OptionRight, Transaction, TransactionKind, OPTION_CONTRACT_MULTIPLIER};

/// Reclassify every ambiguous close-side option transaction in `transactions`
/// in place. Transactions that already carry a price or total, or that are
/// not `buyToClose`/`sellToClose`, are left untouched.
pub fn resolve_option_lifecycles(transactions: &mut [Transaction]) {
    let candidates: Vec<usize> = transactions
        .iter()
        .enumerate()
        .filter(|(_, t)| is_ambiguous_close(t))
        .map(|(i, _)| i)
        .collect();

    for i in candidates {
        let (ticker, date, strike, kind, right, shares) = {
            let t = &transactions[i];
            (
                t.ticker.clone(),
                t.date,
                t.option_strike.unwrap_or(0.0),
                t.kind,
                t.option_right(),
                t.shares.unwrap_or(0.0),
            )
        };

        let mut buys = 0.0;
        let mut sells = 0.0;
        for other in transactions.iter() {
            if other.ticker != ticker || other.date != date {
                continue;
            }
            let Some(price) = other.price_per_share else { continue };
            if (price - strike).abs() >= 1.0e-6 {
                continue;
            }
            match other.kind {
                TransactionKind::Buy => buys += other.shares.unwrap_or(0.0),
                TransactionKind::Sell => sells += other.shares.unwrap_or(0.0),
                _ => {}
            }
        }

        let contract_shares = shares * OPTION_CONTRACT_MULTIPLIER;
        let resolved = match (kind, right) {
            (TransactionKind::SellToClose, Some(OptionRight::Put)) if sells >= contract_shares => {
                TransactionKind::Exercise
            }
            (TransactionKind::SellToClose, Some(OptionRight::Call)) if buys >= contract_shares => {
                TransactionKind::Exercise
            }
            _ => TransactionKind::Expire,
        };

        transactions[i].kind = resolved;
    }
}

fn is_ambiguous_close(t: &Transaction) -> bool {
    matches!(t.kind, TransactionKind::BuyToClose | TransactionKind::SellToClose)
        && t.price_per_share.unwrap_or(0.0) == 0.0
        && t.total.unwrap_or(0.0) == 0.0
}
