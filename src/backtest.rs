use crate::config::{BacktestParams, FeeModel};
use crate::database::Database;
use crate::exit_rules::{evaluate_trajectory, ExitEvent};
use crate::metrics::MetricsCalculator;
use crate::models::{EquityPoint, Pick, PickFilter, RunResult, SimulatedTrade};
use crate::simulator;
use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Extra rows fetched beyond the hold cap so `end_of_data` only fires when
/// the series is genuinely exhausted, not when the read window is.
const LOOKAHEAD_MARGIN: i64 = 10;

/// Running capital threaded through the serial half of a run. Capital
/// effects must be applied in chronological order even though exit
/// evaluation is parallel.
pub struct CapitalAccumulator {
    capital: f64,
    curve: Vec<EquityPoint>,
}

impl CapitalAccumulator {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            capital: initial_capital,
            curve: Vec::new(),
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn apply(&mut self, trade: &SimulatedTrade) {
        self.capital += trade.net_pnl;
        self.curve.push(EquityPoint {
            trade_index: self.curve.len() as i32,
            capital: self.capital,
            date: trade.exit_date,
        });
    }

    pub fn into_curve(self) -> Vec<EquityPoint> {
        self.curve
    }
}

/// Picks are unique on (symbol, algorithm, pick_date); a catalog that
/// hands back duplicates contributes one trade per key.
pub fn dedupe_picks(picks: Vec<Pick>) -> Vec<Pick> {
    let mut seen = HashSet::new();
    picks
        .into_iter()
        .filter(|pick| seen.insert(pick.position_key()))
        .collect()
}

/// Serial half of a run: walk the evaluated picks in chronological order,
/// sizing each position from current capital and folding the net P&L back
/// into the accumulator.
pub fn assemble_run(
    run_id: &str,
    params: &BacktestParams,
    mut evaluated: Vec<(Pick, ExitEvent)>,
    expense_map: &HashMap<String, f64>,
) -> RunResult {
    evaluated.sort_by(|a, b| {
        (a.0.pick_date, a.0.symbol.as_str()).cmp(&(b.0.pick_date, b.0.symbol.as_str()))
    });

    let mut accumulator = CapitalAccumulator::new(params.initial_capital);
    let mut trades = Vec::with_capacity(evaluated.len());
    let mut skipped = 0usize;

    for (pick, exit) in &evaluated {
        let position_value = accumulator.capital() * params.position_size_pct / 100.0;
        let fees = FeeModel {
            transaction_fee_pct: params.fee_pct,
            periodic_expense_pct: expense_map.get(&pick.symbol).copied().unwrap_or(0.0),
        };
        match simulator::simulate(run_id, pick, exit, &fees, position_value) {
            Some(trade) => {
                accumulator.apply(&trade);
                trades.push(trade);
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        info!(
            "Skipped {} pick{} whose position value could not cover one unit",
            skipped,
            if skipped == 1 { "" } else { "s" }
        );
    }

    let final_capital = accumulator.capital();
    let total_return_pct = if params.initial_capital > 0.0 {
        (final_capital - params.initial_capital) / params.initial_capital * 100.0
    } else {
        0.0
    };

    let metrics = MetricsCalculator::calculate(&trades, params.initial_capital);
    let by_algorithm = MetricsCalculator::algorithm_breakdown(&trades);
    let exit_reasons = MetricsCalculator::exit_reason_histogram(&trades);

    RunResult {
        id: run_id.to_string(),
        target_pct: params.target_pct,
        stop_pct: params.stop_pct,
        max_hold_days: params.max_hold_days,
        initial_capital: params.initial_capital,
        fee_pct: params.fee_pct,
        position_size_pct: params.position_size_pct,
        algorithm_filter: params.algorithm_filter.clone(),
        final_capital,
        total_return_pct,
        metrics,
        by_algorithm,
        exit_reasons,
        equity_curve: accumulator.into_curve(),
        trades,
        created_at: Utc::now(),
    }
}

pub struct BacktestOrchestrator<'a> {
    db: &'a mut Database,
}

impl<'a> BacktestOrchestrator<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// Replay every pick matching the filter through the exit rules and the
    /// trade simulator. Exit evaluation per pick is capital-independent and
    /// runs in parallel; capital application is serial and chronological.
    pub async fn run(&mut self, params: &BacktestParams, save: bool) -> Result<RunResult> {
        params.validate()?;

        let filter = match params.algorithm_filter.as_deref() {
            Some(algorithm) => PickFilter::for_algorithm(algorithm),
            None => PickFilter::default(),
        };
        let picks = dedupe_picks(self.db.get_picks(&filter).await?);
        if picks.is_empty() {
            info!("No picks matched the backtest filter; returning an empty run");
        }

        let expense_map = self.db.get_expense_ratios().await?;
        let lookahead = params.max_hold_days + LOOKAHEAD_MARGIN;

        let mut fetched = Vec::with_capacity(picks.len());
        for pick in picks {
            let trajectory = self
                .db
                .get_prices(&pick.symbol, pick.pick_date, lookahead)
                .await?;
            fetched.push((pick, trajectory));
        }

        let rules = params.exit_rules();
        let evaluated: Vec<(Pick, ExitEvent)> = fetched
            .into_par_iter()
            .map(|(pick, trajectory)| {
                let mut event = evaluate_trajectory(pick.entry_price, &trajectory, &rules);
                if trajectory.is_empty() {
                    event.date = pick.pick_date;
                }
                (pick, event)
            })
            .collect();

        let run_id = Uuid::new_v4().to_string();
        let result = assemble_run(&run_id, params, evaluated, &expense_map);

        info!(
            "Backtest {} finished with {} trade{} (win rate {:.1}%, return {:.2}%)",
            result.id,
            result.metrics.total_trades,
            if result.metrics.total_trades == 1 {
                ""
            } else {
                "s"
            },
            result.metrics.win_rate,
            result.total_return_pct
        );

        if save {
            if let Err(error) = self.db.insert_backtest_run(&result).await {
                warn!("Failed to persist backtest run {}: {}", result.id, error);
                return Err(error);
            }
            self.db
                .persist_event(
                    "Backtester",
                    "info",
                    "Backtest run persisted",
                    serde_json::json!({
                        "runId": result.id,
                        "totalTrades": result.metrics.total_trades,
                        "finalCapital": result.final_capital,
                        "totalReturnPct": result.total_return_pct,
                    }),
                )
                .await;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_rules::ExitRuleSet;
    use crate::models::ExitReason;
    use chrono::NaiveDate;

    fn pick(symbol: &str, algorithm: &str, day_offset: i64, entry_price: f64) -> Pick {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Pick {
            symbol: symbol.to_string(),
            algorithm: algorithm.to_string(),
            pick_date: base + chrono::Duration::days(day_offset),
            entry_price,
            score: None,
            rating: None,
            risk_level: None,
            timeframe: None,
        }
    }

    fn params() -> BacktestParams {
        BacktestParams {
            target_pct: 5.0,
            stop_pct: 10.0,
            max_hold_days: 10,
            initial_capital: 10_000.0,
            fee_pct: 0.0,
            position_size_pct: 10.0,
            algorithm_filter: None,
        }
    }

    fn trajectory(pick: &Pick, prices: &[f64]) -> Vec<crate::models::PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(offset, price)| crate::models::PricePoint {
                symbol: pick.symbol.clone(),
                date: pick.pick_date + chrono::Duration::days(offset as i64),
                price: *price,
            })
            .collect()
    }

    fn evaluate(pick: &Pick, prices: &[f64], rules: &ExitRuleSet) -> (Pick, ExitEvent) {
        let points = trajectory(pick, prices);
        let event = evaluate_trajectory(pick.entry_price, &points, rules);
        (pick.clone(), event)
    }

    #[test]
    fn duplicate_picks_produce_a_single_trade() {
        let duplicated = vec![
            pick("AAA", "algo1", 0, 100.0),
            pick("AAA", "algo1", 0, 100.0),
        ];
        let unique = dedupe_picks(duplicated);
        assert_eq!(unique.len(), 1);

        let params = params();
        let rules = params.exit_rules();
        let evaluated: Vec<_> = unique
            .iter()
            .map(|p| evaluate(p, &[100.0, 103.0, 108.0, 95.0], &rules))
            .collect();
        let result = assemble_run("run1", &params, evaluated, &HashMap::new());

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TargetHit);
        assert!((trade.exit_price - 108.0).abs() < 1e-9);
        assert!((trade.return_pct - 8.0).abs() < 1e-9);
    }

    #[test]
    fn capital_and_curve_follow_trade_order() {
        let params = params();
        let rules = params.exit_rules();
        let evaluated = vec![
            evaluate(&pick("AAA", "algo1", 0, 100.0), &[100.0, 108.0], &rules),
            evaluate(&pick("BBB", "algo1", 1, 50.0), &[50.0, 44.0], &rules),
        ];
        let result = assemble_run("run1", &params, evaluated, &HashMap::new());

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.equity_curve.len(), 2);
        // first trade: 10% of 10k = 1000 -> 10 units, +8% = +80
        assert!((result.equity_curve[0].capital - 10_080.0).abs() < 1e-6);
        // second trade sized from updated capital: 1008 -> 20.16 units, -6/unit
        let second = &result.trades[1];
        assert!((second.units - 20.16).abs() < 1e-9);
        assert!((result.final_capital - (10_080.0 - 20.16 * 6.0)).abs() < 1e-6);
        assert_eq!(result.equity_curve[1].trade_index, 1);
    }

    #[test]
    fn out_of_order_picks_are_sorted_before_capital_application() {
        let params = params();
        let rules = params.exit_rules();
        let evaluated = vec![
            evaluate(&pick("ZZZ", "algo1", 5, 100.0), &[100.0, 108.0], &rules),
            evaluate(&pick("AAA", "algo1", 0, 100.0), &[100.0, 108.0], &rules),
        ];
        let result = assemble_run("run1", &params, evaluated, &HashMap::new());
        assert_eq!(result.trades[0].symbol, "AAA");
        assert_eq!(result.trades[1].symbol, "ZZZ");
    }

    #[test]
    fn empty_pick_set_is_a_valid_run() {
        let params = params();
        let result = assemble_run("run1", &params, Vec::new(), &HashMap::new());
        assert_eq!(result.metrics.total_trades, 0);
        assert!((result.final_capital - params.initial_capital).abs() < 1e-9);
        assert_eq!(result.total_return_pct, 0.0);
        assert!(result.equity_curve.is_empty());
    }

    #[test]
    fn unaffordable_picks_are_skipped_without_error() {
        let params = BacktestParams {
            position_size_pct: 1.0,
            ..params()
        };
        let rules = params.exit_rules();
        // 1% of 10k = 100 < entry price 500
        let evaluated = vec![evaluate(
            &pick("AAA", "algo1", 0, 500.0),
            &[500.0, 540.0],
            &rules,
        )];
        let result = assemble_run("run1", &params, evaluated, &HashMap::new());
        assert!(result.trades.is_empty());
        assert!((result.final_capital - params.initial_capital).abs() < 1e-9);
    }

    #[test]
    fn expense_map_feeds_periodic_fees() {
        let params = params();
        let rules = ExitRuleSet {
            target_pct: 999.0,
            stop_pct: 999.0,
            max_hold_days: 999,
        };
        let evaluated = vec![evaluate(
            &pick("FUND", "algo1", 0, 100.0),
            &[100.0, 100.0, 100.0],
            &rules,
        )];
        let mut expense_map = HashMap::new();
        expense_map.insert("FUND".to_string(), 3.0);
        let result = assemble_run("run1", &params, evaluated, &expense_map);

        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::EndOfData);
        let expected = 3.0 / 100.0 * (2.0 / 365.25) * 1_000.0;
        assert!((trade.fees - expected).abs() < 1e-9);
        assert!(trade.net_pnl < 0.0);
    }
}
