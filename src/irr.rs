//! Internal rate of return (Newton–Raphson), a non-core utility.
//!
//! Spec §9's open question notes that IRR treatment diverges subtly from
//! the TWR engine's contract and is explicitly an external concern, not
//! part of the core. This module is kept, trimmed of the teacher's
//! SQLite/currency-conversion plumbing, as a clearly-separated utility the
//! replay driver never calls — callers who want IRR alongside TWR build
//! their own cash-flow series and call [`calculate_irr`] directly.

use chrono::NaiveDate;

/// A single external cash flow: positive for money into the portfolio,
/// negative for money out.
#[derive(Debug, Clone, Copy)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: f64,
}

/// Outcome of a Newton–Raphson IRR solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrrResult {
    /// Annualized IRR as a decimal (0.1 = 10%).
    pub irr: f64,
    pub converged: bool,
    pub iterations: u32,
}

const MAX_ITERATIONS: u32 = 100;
const TOLERANCE: f64 = 1.0e-10;

/// Solve for the discount rate at which the net present value of
/// `cash_flows` plus `final_value` at `final_date` is zero.
pub fn calculate_irr(cash_flows: &[CashFlow], final_value: f64, final_date: NaiveDate) -> IrrResult {
    let Some(first) = cash_flows.first() else {
        return IrrResult { irr: 0.0, converged: true, iterations: 0 };
    };
    let first_date = first.date;

    let mut series: Vec<(f64, f64)> = cash_flows
        .iter()
        .map(|cf| {
            let years = (cf.date - first_date).num_days() as f64 / 365.0;
            (-cf.amount, years)
        })
        .collect();
    let final_years = (final_date - first_date).num_days() as f64 / 365.0;
    series.push((final_value, final_years));

    let mut rate = 0.1;
    for iteration in 0..MAX_ITERATIONS {
        let (npv, dnpv) = npv_and_derivative(&series, rate);

        if dnpv.abs() < TOLERANCE {
            return IrrResult { irr: rate, converged: false, iterations: iteration };
        }

        let new_rate = rate - npv / dnpv;
        if (new_rate - rate).abs() < TOLERANCE {
            return IrrResult { irr: new_rate, converged: true, iterations: iteration };
        }

        rate = new_rate.clamp(-0.99, 10.0);
    }

    IrrResult { irr: rate, converged: false, iterations: MAX_ITERATIONS }
}

fn npv_and_derivative(cash_flows: &[(f64, f64)], rate: f64) -> (f64, f64) {
    let mut npv = 0.0;
    let mut dnpv = 0.0;
    for (cf, years) in cash_flows {
        let discount = (1.0 + rate).powf(*years);
        npv += cf / discount;
        if discount > 0.0 {
            dnpv -= years * cf / (discount * (1.0 + rate));
        }
    }
    (npv, dnpv)
}
