use crate::config::FeeModel;
use crate::exit_rules::{ExitEvent, PRICE_EPSILON};
use crate::models::{generate_trade_id, Pick, SimulatedTrade};

/// Units are floored to four decimal places; fund units are fractional but
/// not arbitrarily divisible.
const UNIT_PRECISION: f64 = 10_000.0;

pub fn floor_units(value: f64) -> f64 {
    (value * UNIT_PRECISION).floor() / UNIT_PRECISION
}

const DAYS_PER_YEAR: f64 = 365.25;

/// Simulate one pick through its exit event. Returns None when the position
/// value cannot buy a single minimum unit; the orchestrator skips such picks
/// without error.
pub fn simulate(
    run_id: &str,
    pick: &Pick,
    exit: &ExitEvent,
    fees: &FeeModel,
    position_value: f64,
) -> Option<SimulatedTrade> {
    if !position_value.is_finite() || position_value < pick.entry_price {
        return None;
    }
    if pick.entry_price <= PRICE_EPSILON {
        return None;
    }

    let units = floor_units(position_value / pick.entry_price);
    if units <= 0.0 {
        return None;
    }

    let entry_notional = pick.entry_price * units;
    let exit_notional = exit.price * units;
    let gross_pnl = (exit.price - pick.entry_price) * units;

    let transaction_fee = exit_notional * fees.transaction_fee_pct / 100.0;
    let periodic_fee = fees.periodic_expense_pct / 100.0
        * (exit.hold_days as f64 / DAYS_PER_YEAR)
        * entry_notional;
    let total_fee = transaction_fee + periodic_fee;

    let net_pnl = gross_pnl - total_fee;
    let return_pct = if entry_notional.abs() < PRICE_EPSILON {
        0.0
    } else {
        net_pnl / entry_notional * 100.0
    };

    Some(SimulatedTrade {
        id: generate_trade_id(run_id, &pick.symbol, &pick.algorithm, pick.pick_date),
        symbol: pick.symbol.clone(),
        algorithm: pick.algorithm.clone(),
        entry_date: pick.pick_date,
        entry_price: pick.entry_price,
        exit_date: exit.date,
        exit_price: exit.price,
        units,
        gross_pnl,
        fees: total_fee,
        net_pnl,
        return_pct,
        exit_reason: exit.reason,
        hold_days: exit.hold_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;
    use chrono::NaiveDate;

    fn pick(entry_price: f64) -> Pick {
        Pick {
            symbol: "VWCE".to_string(),
            algorithm: "momentum_v2".to_string(),
            pick_date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            entry_price,
            score: Some(72.0),
            rating: None,
            risk_level: None,
            timeframe: None,
        }
    }

    fn exit_at(price: f64, hold_days: i64) -> ExitEvent {
        ExitEvent {
            day_index: hold_days as usize,
            price,
            date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap()
                + chrono::Duration::days(hold_days),
            reason: ExitReason::TargetHit,
            hold_days,
        }
    }

    #[test]
    fn net_pnl_equals_gross_minus_fees() {
        let fees = FeeModel {
            transaction_fee_pct: 0.5,
            periodic_expense_pct: 1.0,
        };
        let trade = simulate("run1", &pick(100.0), &exit_at(110.0, 30), &fees, 10_000.0).unwrap();

        assert!((trade.units - 100.0).abs() < 1e-9);
        assert!((trade.gross_pnl - 1_000.0).abs() < 1e-9);
        let expected_transaction = 11_000.0 * 0.005;
        let expected_periodic = 0.01 * (30.0 / 365.25) * 10_000.0;
        assert!((trade.fees - (expected_transaction + expected_periodic)).abs() < 1e-9);
        assert!((trade.net_pnl - (trade.gross_pnl - trade.fees)).abs() < 1e-9);
        assert!((trade.return_pct - trade.net_pnl / 10_000.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_position_value_below_entry_price() {
        let fees = FeeModel::default();
        assert!(simulate("run1", &pick(250.0), &exit_at(260.0, 5), &fees, 200.0).is_none());
    }

    #[test]
    fn units_are_floored_not_rounded() {
        let fees = FeeModel {
            transaction_fee_pct: 0.0,
            periodic_expense_pct: 0.0,
        };
        // 1000 / 3 = 333.3333... -> floored at 4 decimals
        let trade = simulate("run1", &pick(3.0), &exit_at(3.0, 1), &fees, 1_000.0).unwrap();
        assert!((trade.units - 333.3333).abs() < 1e-9);
    }

    #[test]
    fn flat_exit_with_no_fees_returns_zero_percent() {
        let fees = FeeModel {
            transaction_fee_pct: 0.0,
            periodic_expense_pct: 0.0,
        };
        let trade = simulate("run1", &pick(100.0), &exit_at(100.0, 0), &fees, 1_000.0).unwrap();
        assert_eq!(trade.return_pct, 0.0);
        assert_eq!(trade.net_pnl, 0.0);
    }

    #[test]
    fn zero_hold_days_skips_periodic_expense() {
        let fees = FeeModel {
            transaction_fee_pct: 0.0,
            periodic_expense_pct: 2.0,
        };
        let trade = simulate("run1", &pick(100.0), &exit_at(105.0, 0), &fees, 1_000.0).unwrap();
        assert_eq!(trade.fees, 0.0);
        assert!((trade.net_pnl - trade.gross_pnl).abs() < 1e-9);
    }
}
