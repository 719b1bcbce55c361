use crate::models::{AlgorithmBreakdown, ExitReasonCount, RunMetrics, SimulatedTrade};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Upper sentinel for the profit factor when a trade set has wins and no
/// losses. Keeps the ratio finite for storage and ranking.
pub const PROFIT_FACTOR_CAP: f64 = 999.0;

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Pure reducer over a chronologically ordered trade ledger. Every ratio
    /// resolves to a finite value for any input, including empty,
    /// single-element, and all-losing sets.
    pub fn calculate(trades: &[SimulatedTrade], initial_capital: f64) -> RunMetrics {
        if trades.is_empty() {
            return RunMetrics::empty();
        }

        let total_trades = trades.len() as i32;
        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();

        let mut winning_returns = Vec::new();
        let mut losing_returns = Vec::new();
        let mut gross_wins = 0.0;
        let mut gross_losses = 0.0;
        let mut total_fees = 0.0;

        for trade in trades {
            total_fees += trade.fees;
            if trade.net_pnl > 0.0 {
                winning_returns.push(trade.return_pct);
                gross_wins += trade.net_pnl;
            } else {
                // exact-zero results land in the loss bucket
                losing_returns.push(trade.return_pct);
                gross_losses += trade.net_pnl.abs();
            }
        }

        let winning_trades = winning_returns.len() as i32;
        let losing_trades = losing_returns.len() as i32;
        let win_rate = winning_trades as f64 / total_trades as f64 * 100.0;

        let avg_win_pct = Self::average(&winning_returns);
        let avg_loss_pct = Self::average(&losing_returns);

        let win_fraction = winning_trades as f64 / total_trades as f64;
        let loss_fraction = losing_trades as f64 / total_trades as f64;
        let expectancy = win_fraction * avg_win_pct - loss_fraction * avg_loss_pct.abs();

        let profit_factor = if gross_losses > 0.0 {
            (gross_wins / gross_losses).min(PROFIT_FACTOR_CAP)
        } else if gross_wins > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };

        let best_trade_pct = returns
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        let best_trade_pct = if best_trade_pct.is_finite() {
            best_trade_pct
        } else {
            0.0
        };
        let worst_trade_pct = returns
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .fold(f64::INFINITY, f64::min);
        let worst_trade_pct = if worst_trade_pct.is_finite() {
            worst_trade_pct
        } else {
            0.0
        };

        let avg_hold_days =
            trades.iter().map(|t| t.hold_days as f64).sum::<f64>() / total_trades as f64;

        let fee_drag_pct = if initial_capital > 0.0 {
            total_fees / initial_capital * 100.0
        } else {
            0.0
        };

        let (max_win_streak, max_loss_streak) = Self::streaks(trades);

        RunMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            avg_win_pct,
            avg_loss_pct,
            sharpe_ratio: Self::sharpe(&returns),
            sortino_ratio: Self::sortino(&returns),
            profit_factor,
            expectancy,
            max_drawdown_pct: Self::max_drawdown(trades, initial_capital),
            total_fees,
            fee_drag_pct,
            best_trade_pct,
            worst_trade_pct,
            avg_hold_days,
            max_win_streak,
            max_loss_streak,
        }
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// mean/stddev of per-trade returns; 0 with fewer than two samples or a
    /// degenerate deviation.
    fn sharpe(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.to_vec().mean();
        let std_dev = returns.to_vec().std_dev();
        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }
        mean / std_dev
    }

    /// Like Sharpe but against downside deviation only; 0 when no negative
    /// returns exist or the downside set is degenerate.
    fn sortino(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.len() < 2 {
            return 0.0;
        }
        let downside_dev = downside.std_dev();
        if !downside_dev.is_finite() || downside_dev == 0.0 {
            return 0.0;
        }
        returns.to_vec().mean() / downside_dev
    }

    /// Replays the ledger in order against a running peak-capital mark.
    fn max_drawdown(trades: &[SimulatedTrade], initial_capital: f64) -> f64 {
        let mut capital = initial_capital;
        let mut peak = initial_capital;
        let mut max_drawdown_pct = 0.0;

        for trade in trades {
            capital += trade.net_pnl;
            if capital > peak {
                peak = capital;
            } else if peak > 0.0 {
                let drawdown = (peak - capital) / peak * 100.0;
                if drawdown > max_drawdown_pct {
                    max_drawdown_pct = drawdown;
                }
            }
        }

        max_drawdown_pct
    }

    /// Exact chronological streak scan. The ledger is already in entry
    /// order; zero-P&L trades break a win streak and extend a loss streak.
    fn streaks(trades: &[SimulatedTrade]) -> (i32, i32) {
        let mut max_wins = 0;
        let mut max_losses = 0;
        let mut current_wins = 0;
        let mut current_losses = 0;

        for trade in trades {
            if trade.net_pnl > 0.0 {
                current_wins += 1;
                current_losses = 0;
            } else {
                current_losses += 1;
                current_wins = 0;
            }
            max_wins = max_wins.max(current_wins);
            max_losses = max_losses.max(current_losses);
        }

        (max_wins, max_losses)
    }

    /// Per-algorithm aggregates, sorted by net P&L descending.
    pub fn algorithm_breakdown(trades: &[SimulatedTrade]) -> Vec<AlgorithmBreakdown> {
        let mut grouped: BTreeMap<&str, Vec<&SimulatedTrade>> = BTreeMap::new();
        for trade in trades {
            grouped.entry(trade.algorithm.as_str()).or_default().push(trade);
        }

        let mut breakdowns: Vec<AlgorithmBreakdown> = grouped
            .into_iter()
            .map(|(algorithm, group)| {
                let trades_count = group.len() as i32;
                let wins = group.iter().filter(|t| t.net_pnl > 0.0).count() as i32;
                let returns: Vec<f64> = group.iter().map(|t| t.return_pct).collect();
                AlgorithmBreakdown {
                    algorithm: algorithm.to_string(),
                    trades: trades_count,
                    wins,
                    win_rate: wins as f64 / trades_count as f64 * 100.0,
                    avg_return_pct: Self::average(&returns),
                    net_pnl: group.iter().map(|t| t.net_pnl).sum(),
                }
            })
            .collect();

        breakdowns.sort_by(|a, b| {
            b.net_pnl
                .partial_cmp(&a.net_pnl)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        breakdowns
    }

    /// Count of trades per exit reason, sorted by count descending.
    pub fn exit_reason_histogram(trades: &[SimulatedTrade]) -> Vec<ExitReasonCount> {
        let mut counts: BTreeMap<&'static str, (crate::models::ExitReason, i32)> = BTreeMap::new();
        for trade in trades {
            counts
                .entry(trade.exit_reason.as_str())
                .or_insert((trade.exit_reason, 0))
                .1 += 1;
        }

        let mut histogram: Vec<ExitReasonCount> = counts
            .into_values()
            .map(|(reason, count)| ExitReasonCount { reason, count })
            .collect();
        histogram.sort_by(|a, b| b.count.cmp(&a.count));
        histogram
    }
}
