use crate::exit_rules::{ExitRuleSet, DISABLED_RULE_THRESHOLD};
use thiserror::Error;

/// Parameter errors are surfaced before any persistence happens.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("initial capital must be positive (value: {0})")]
    NonPositiveCapital(f64),
    #[error("position size must be within (0, 100] percent (value: {0})")]
    InvalidPositionSize(f64),
    #[error("fee percentage must be non-negative (value: {0})")]
    NegativeFee(f64),
    #[error("max hold days must be at least 1 (value: {0})")]
    InvalidMaxHold(i64),
    #[error("{name} threshold must be positive (value: {value})")]
    NonPositiveThreshold { name: &'static str, value: f64 },
    #[error("unknown scenario preset '{0}'")]
    UnknownPreset(String),
    #[error("at least one algorithm is required for an algorithm comparison")]
    NoAlgorithms,
}

/// Fee model applied when a simulated trade closes: a transaction fee on the
/// exit notional plus a periodic expense prorated over the holding period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeModel {
    pub transaction_fee_pct: f64,
    pub periodic_expense_pct: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            transaction_fee_pct: 0.1,
            periodic_expense_pct: 0.0,
        }
    }
}

/// Full parameter set for one backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestParams {
    pub target_pct: f64,
    pub stop_pct: f64,
    pub max_hold_days: i64,
    pub initial_capital: f64,
    pub fee_pct: f64,
    pub position_size_pct: f64,
    pub algorithm_filter: Option<String>,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            target_pct: 10.0,
            stop_pct: 7.0,
            max_hold_days: 90,
            initial_capital: 100_000.0,
            fee_pct: 0.1,
            position_size_pct: 10.0,
            algorithm_filter: None,
        }
    }
}

impl BacktestParams {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ParameterError::NonPositiveCapital(self.initial_capital));
        }
        if !self.position_size_pct.is_finite()
            || self.position_size_pct <= 0.0
            || self.position_size_pct > 100.0
        {
            return Err(ParameterError::InvalidPositionSize(self.position_size_pct));
        }
        if !self.fee_pct.is_finite() || self.fee_pct < 0.0 {
            return Err(ParameterError::NegativeFee(self.fee_pct));
        }
        if self.max_hold_days < 1 {
            return Err(ParameterError::InvalidMaxHold(self.max_hold_days));
        }
        if !self.target_pct.is_finite() || self.target_pct <= 0.0 {
            return Err(ParameterError::NonPositiveThreshold {
                name: "target",
                value: self.target_pct,
            });
        }
        if !self.stop_pct.is_finite() || self.stop_pct <= 0.0 {
            return Err(ParameterError::NonPositiveThreshold {
                name: "stop",
                value: self.stop_pct,
            });
        }
        Ok(())
    }

    pub fn exit_rules(&self) -> ExitRuleSet {
        ExitRuleSet {
            target_pct: self.target_pct,
            stop_pct: self.stop_pct,
            max_hold_days: self.max_hold_days,
        }
    }

    pub fn with_rules(&self, rules: ExitRuleSet) -> Self {
        Self {
            target_pct: rules.target_pct,
            stop_pct: rules.stop_pct,
            max_hold_days: rules.max_hold_days,
            ..self.clone()
        }
    }
}

/// Exit thresholds assigned to tracked positions at import time, keyed by
/// the pick's timeframe. Positions keep the thresholds they were seeded
/// with even if these defaults change later.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub short_term: ExitRuleSet,
    pub medium_term: ExitRuleSet,
    pub long_term: ExitRuleSet,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            short_term: ExitRuleSet {
                target_pct: 5.0,
                stop_pct: 3.0,
                max_hold_days: 30,
            },
            medium_term: ExitRuleSet {
                target_pct: 10.0,
                stop_pct: 7.0,
                max_hold_days: 90,
            },
            long_term: ExitRuleSet {
                target_pct: 20.0,
                stop_pct: 12.0,
                max_hold_days: 365,
            },
        }
    }
}

impl TrackerSettings {
    /// Thresholds for a pick's timeframe; unknown or missing timeframes get
    /// the medium-term defaults.
    pub fn rules_for_timeframe(&self, timeframe: Option<&str>) -> ExitRuleSet {
        match timeframe.map(|t| t.trim().to_lowercase()) {
            Some(ref t) if t == "short" || t == "short_term" => self.short_term,
            Some(ref t) if t == "long" || t == "long_term" => self.long_term,
            _ => self.medium_term,
        }
    }
}

/// Rules for a buy-and-hold style run: no target, no stop, hold to the cap.
pub fn buy_and_hold_rules(max_hold_days: i64) -> ExitRuleSet {
    ExitRuleSet {
        target_pct: DISABLED_RULE_THRESHOLD,
        stop_pct: DISABLED_RULE_THRESHOLD,
        max_hold_days,
    }
}
