use crate::backtest::BacktestOrchestrator;
use crate::config::{BacktestParams, ParameterError};
use crate::database::Database;
use crate::exit_rules::ExitRuleSet;
use crate::models::RunResult;
use anyhow::Result;
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct ScenarioPreset {
    pub name: &'static str,
    pub rules: ExitRuleSet,
}

/// Built-in parameter presets. "buy-hold" disables target and stop via the
/// sentinel threshold and rides the position to the hold cap.
pub const PRESETS: [ScenarioPreset; 5] = [
    ScenarioPreset {
        name: "conservative",
        rules: ExitRuleSet {
            target_pct: 5.0,
            stop_pct: 3.0,
            max_hold_days: 30,
        },
    },
    ScenarioPreset {
        name: "balanced",
        rules: ExitRuleSet {
            target_pct: 10.0,
            stop_pct: 7.0,
            max_hold_days: 90,
        },
    },
    ScenarioPreset {
        name: "aggressive",
        rules: ExitRuleSet {
            target_pct: 20.0,
            stop_pct: 10.0,
            max_hold_days: 60,
        },
    },
    ScenarioPreset {
        name: "patient",
        rules: ExitRuleSet {
            target_pct: 15.0,
            stop_pct: 10.0,
            max_hold_days: 180,
        },
    },
    ScenarioPreset {
        name: "buy-hold",
        rules: ExitRuleSet {
            target_pct: 999.0,
            stop_pct: 999.0,
            max_hold_days: 365,
        },
    },
];

pub fn find_preset(name: &str) -> Result<ScenarioPreset, ParameterError> {
    let normalized = name.trim().to_lowercase();
    PRESETS
        .iter()
        .find(|preset| preset.name == normalized)
        .copied()
        .ok_or(ParameterError::UnknownPreset(name.to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntry {
    pub label: String,
    pub result: RunResult,
}

/// Sort comparison entries by total return, best first.
pub fn rank(mut entries: Vec<ComparisonEntry>) -> Vec<ComparisonEntry> {
    entries.sort_by(|a, b| {
        b.result
            .total_return_pct
            .partial_cmp(&a.result.total_return_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    entries
}

pub struct ScenarioComparator<'a> {
    db: &'a mut Database,
}

impl<'a> ScenarioComparator<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// Run one backtest per named preset (all presets when none are named)
    /// and rank the outcomes. Runs are discarded unless `save` is set.
    pub async fn compare_presets(
        &mut self,
        base: &BacktestParams,
        preset_names: &[String],
        save: bool,
    ) -> Result<Vec<ComparisonEntry>> {
        let presets: Vec<ScenarioPreset> = if preset_names.is_empty() {
            PRESETS.to_vec()
        } else {
            preset_names
                .iter()
                .map(|name| find_preset(name))
                .collect::<Result<Vec<_>, _>>()?
        };

        info!(
            "Comparing {} preset scenario(s){}",
            presets.len(),
            if save { " (saving runs)" } else { "" }
        );

        let mut entries = Vec::with_capacity(presets.len());
        for preset in presets {
            let params = base.with_rules(preset.rules);
            let result = BacktestOrchestrator::new(self.db).run(&params, save).await?;
            entries.push(ComparisonEntry {
                label: preset.name.to_string(),
                result,
            });
        }

        Ok(rank(entries))
    }

    /// Hold the rule set fixed and run one backtest per algorithm.
    pub async fn compare_algorithms(
        &mut self,
        base: &BacktestParams,
        algorithms: &[String],
        save: bool,
    ) -> Result<Vec<ComparisonEntry>> {
        if algorithms.is_empty() {
            return Err(ParameterError::NoAlgorithms.into());
        }

        info!(
            "Comparing {} algorithm(s) under fixed exit rules{}",
            algorithms.len(),
            if save { " (saving runs)" } else { "" }
        );

        let mut entries = Vec::with_capacity(algorithms.len());
        for algorithm in algorithms {
            let params = BacktestParams {
                algorithm_filter: Some(algorithm.clone()),
                ..base.clone()
            };
            let result = BacktestOrchestrator::new(self.db).run(&params, save).await?;
            entries.push(ComparisonEntry {
                label: algorithm.clone(),
                result,
            });
        }

        Ok(rank(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::buy_and_hold_rules;
    use crate::models::RunMetrics;
    use chrono::Utc;

    fn entry(label: &str, total_return_pct: f64) -> ComparisonEntry {
        ComparisonEntry {
            label: label.to_string(),
            result: RunResult {
                id: label.to_string(),
                target_pct: 10.0,
                stop_pct: 7.0,
                max_hold_days: 90,
                initial_capital: 10_000.0,
                fee_pct: 0.1,
                position_size_pct: 10.0,
                algorithm_filter: None,
                final_capital: 10_000.0 * (1.0 + total_return_pct / 100.0),
                total_return_pct,
                metrics: RunMetrics::empty(),
                by_algorithm: Vec::new(),
                exit_reasons: Vec::new(),
                equity_curve: Vec::new(),
                trades: Vec::new(),
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn unknown_preset_is_a_parameter_error() {
        assert!(matches!(
            find_preset("yolo"),
            Err(ParameterError::UnknownPreset(_))
        ));
        assert!(find_preset("Balanced").is_ok());
    }

    #[test]
    fn buy_hold_preset_carries_disabled_thresholds() {
        let preset = find_preset("buy-hold").unwrap();
        let reference = buy_and_hold_rules(365);
        assert_eq!(preset.rules, reference);
    }

    #[test]
    fn ranking_is_descending_by_total_return() {
        let ranked = rank(vec![
            entry("low", -2.0),
            entry("high", 9.5),
            entry("mid", 3.0),
        ]);
        let labels: Vec<&str> = ranked.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["high", "mid", "low"]);
    }
}
