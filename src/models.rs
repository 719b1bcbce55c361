use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub symbol: String,
    pub algorithm: String,
    pub pick_date: NaiveDate,
    pub entry_price: f64,
    pub score: Option<f64>,
    pub rating: Option<String>,
    pub risk_level: Option<String>,
    pub timeframe: Option<String>,
}

impl Pick {
    pub fn position_key(&self) -> (String, String, NaiveDate) {
        (self.symbol.clone(), self.algorithm.clone(), self.pick_date)
    }
}

/// Filter for reading picks from the catalog. An empty algorithm list means
/// all algorithms.
#[derive(Debug, Clone, Default)]
pub struct PickFilter {
    pub algorithms: Vec<String>,
    pub since: Option<NaiveDate>,
}

impl PickFilter {
    pub fn for_algorithm(algorithm: &str) -> Self {
        Self {
            algorithms: vec![algorithm.to_string()],
            since: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(anyhow!("Unknown position status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExitReason {
    TargetHit,
    StopLoss,
    MaxHold,
    EndOfData,
    NoPriceData,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TargetHit => "target_hit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::MaxHold => "max_hold",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::NoPriceData => "no_price_data",
            ExitReason::Manual => "manual",
        }
    }
}

impl FromStr for ExitReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "target_hit" => Ok(ExitReason::TargetHit),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "max_hold" => Ok(ExitReason::MaxHold),
            "end_of_data" => Ok(ExitReason::EndOfData),
            "no_price_data" => Ok(ExitReason::NoPriceData),
            "manual" => Ok(ExitReason::Manual),
            other => Err(anyhow!("Unknown exit reason '{}'", other)),
        }
    }
}

/// A pick being followed forward in time. Created once per
/// (symbol, algorithm, pick_date); mutated on refresh while open; frozen
/// once closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub id: String,
    pub symbol: String,
    pub algorithm: String,
    pub pick_date: NaiveDate,
    pub entry_price: f64,
    pub current_price: f64,
    pub current_return_pct: f64,
    pub peak_price: f64,
    pub trough_price: f64,
    pub hold_days: i64,
    pub status: PositionStatus,
    pub target_pct: f64,
    pub stop_pct: f64,
    pub max_hold_days: i64,
    pub score: Option<f64>,
    pub timeframe: Option<String>,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub final_return_pct: Option<f64>,
}

impl TrackedPosition {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Final return for closed positions, current return otherwise.
    pub fn effective_return_pct(&self) -> f64 {
        self.final_return_pct.unwrap_or(self.current_return_pct)
    }
}

/// One simulated trade inside a backtest run. Run-scoped; never shared
/// across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub id: String,
    pub symbol: String,
    pub algorithm: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub units: f64,
    pub gross_pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
    pub return_pct: f64,
    pub exit_reason: ExitReason,
    pub hold_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub trade_index: i32,
    pub capital: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmBreakdown {
    pub algorithm: String,
    pub trades: i32,
    pub wins: i32,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub net_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitReasonCount {
    pub reason: ExitReason,
    pub count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub max_drawdown_pct: f64,
    pub total_fees: f64,
    pub fee_drag_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub avg_hold_days: f64,
    pub max_win_streak: i32,
    pub max_loss_streak: i32,
}

impl RunMetrics {
    /// All-zero metrics for a run that matched no picks.
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            avg_win_pct: 0.0,
            avg_loss_pct: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            profit_factor: 0.0,
            expectancy: 0.0,
            max_drawdown_pct: 0.0,
            total_fees: 0.0,
            fee_drag_pct: 0.0,
            best_trade_pct: 0.0,
            worst_trade_pct: 0.0,
            avg_hold_days: 0.0,
            max_win_streak: 0,
            max_loss_streak: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub id: String,
    pub target_pct: f64,
    pub stop_pct: f64,
    pub max_hold_days: i64,
    pub initial_capital: f64,
    pub fee_pct: f64,
    pub position_size_pct: f64,
    pub algorithm_filter: Option<String>,
    pub final_capital: f64,
    pub total_return_pct: f64,
    pub metrics: RunMetrics,
    pub by_algorithm: Vec<AlgorithmBreakdown>,
    pub exit_reasons: Vec<ExitReasonCount>,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<SimulatedTrade>,
    pub created_at: DateTime<Utc>,
}

/// One row per calendar day summarizing the tracked population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub track_date: NaiveDate,
    pub open_positions: i32,
    pub closed_positions: i32,
    pub wins: i32,
    pub losses: i32,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub best_symbol: Option<String>,
    pub worst_symbol: Option<String>,
    pub avg_hold_days: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LessonType {
    Algorithm,
    HoldPeriod,
    Trend,
    ExitReason,
    ScoreBracket,
    Overall,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonType::Algorithm => "algorithm",
            LessonType::HoldPeriod => "hold_period",
            LessonType::Trend => "trend",
            LessonType::ExitReason => "exit_reason",
            LessonType::ScoreBracket => "score_bracket",
            LessonType::Overall => "overall",
        }
    }
}

impl FromStr for LessonType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "algorithm" => Ok(LessonType::Algorithm),
            "hold_period" => Ok(LessonType::HoldPeriod),
            "trend" => Ok(LessonType::Trend),
            "exit_reason" => Ok(LessonType::ExitReason),
            "score_bracket" => Ok(LessonType::ScoreBracket),
            "overall" => Ok(LessonType::Overall),
            other => Err(anyhow!("Unknown lesson type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_date: NaiveDate,
    pub lesson_type: LessonType,
    pub title: String,
    pub text: String,
    pub confidence: f64,
    pub supporting_data: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "up",
            TrendDirection::Down => "down",
            TrendDirection::Flat => "flat",
        }
    }
}

/// A closed tracked position joined with its pick, as read by the lesson
/// detector.
#[derive(Debug, Clone)]
pub struct ClosedOutcome {
    pub symbol: String,
    pub algorithm: String,
    pub pick_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub final_return_pct: f64,
    pub hold_days: i64,
    pub exit_reason: ExitReason,
    pub score: Option<f64>,
    pub entry_trend: Option<TrendDirection>,
}

impl ClosedOutcome {
    pub fn is_win(&self) -> bool {
        self.final_return_pct > 0.0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrackSummary {
    pub imported: i32,
    pub updated: i32,
    pub closed: i32,
}

pub fn generate_position_id(symbol: &str, algorithm: &str, pick_date: NaiveDate) -> String {
    format!("{}_{}_{}", symbol, algorithm, pick_date.format("%Y-%m-%d"))
}

pub fn generate_trade_id(
    run_id: &str,
    symbol: &str,
    algorithm: &str,
    entry_date: NaiveDate,
) -> String {
    format!(
        "{}_{}_{}_{}",
        run_id,
        symbol,
        algorithm,
        entry_date.format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_reason_round_trips_through_strings() {
        for reason in [
            ExitReason::TargetHit,
            ExitReason::StopLoss,
            ExitReason::MaxHold,
            ExitReason::EndOfData,
            ExitReason::NoPriceData,
            ExitReason::Manual,
        ] {
            assert_eq!(reason.as_str().parse::<ExitReason>().unwrap(), reason);
        }
        assert!("unwind".parse::<ExitReason>().is_err());
    }

    #[test]
    fn position_ids_are_deterministic() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(
            generate_position_id("VWCE", "momentum_v2", date),
            "VWCE_momentum_v2_2025-03-14"
        );
        assert_eq!(
            generate_position_id("VWCE", "momentum_v2", date),
            generate_position_id("VWCE", "momentum_v2", date)
        );
    }
}
