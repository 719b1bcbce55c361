use crate::models::{ExitReason, PricePoint};
use chrono::NaiveDate;

pub const PRICE_EPSILON: f64 = 1e-9;

/// Threshold value meaning "this rule never fires". Used to model
/// buy-and-hold parameter sets.
pub const DISABLED_RULE_THRESHOLD: f64 = 999.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRuleSet {
    pub target_pct: f64,
    pub stop_pct: f64,
    pub max_hold_days: i64,
}

/// The rules a trajectory is checked against, in strict priority order.
/// Target beats stop beats max-hold when several fire on the same day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitRule {
    Target,
    Stop,
    MaxHold,
}

const RULE_PRIORITY: [ExitRule; 3] = [ExitRule::Target, ExitRule::Stop, ExitRule::MaxHold];

fn rule_enabled(threshold: f64) -> bool {
    threshold.is_finite() && threshold < DISABLED_RULE_THRESHOLD
}

/// Check one day's state against the rule set. Returns the first rule that
/// fires in priority order, or None while the position stays open.
pub fn check_rules(change_pct: f64, hold_days: i64, rules: &ExitRuleSet) -> Option<ExitReason> {
    for rule in RULE_PRIORITY {
        match rule {
            ExitRule::Target => {
                if rule_enabled(rules.target_pct) && change_pct >= rules.target_pct {
                    return Some(ExitReason::TargetHit);
                }
            }
            ExitRule::Stop => {
                if rule_enabled(rules.stop_pct) && change_pct <= -rules.stop_pct {
                    return Some(ExitReason::StopLoss);
                }
            }
            ExitRule::MaxHold => {
                if rule_enabled(rules.max_hold_days as f64) && hold_days >= rules.max_hold_days {
                    return Some(ExitReason::MaxHold);
                }
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvent {
    pub day_index: usize,
    pub price: f64,
    pub date: NaiveDate,
    pub reason: ExitReason,
    pub hold_days: i64,
}

pub fn change_pct(entry_price: f64, price: f64) -> f64 {
    if entry_price.abs() < PRICE_EPSILON {
        return 0.0;
    }
    (price - entry_price) / entry_price * 100.0
}

/// Walk a chronological price trajectory (first point at or after the pick
/// date) and return the exit event the rule set produces.
///
/// A trajectory with fewer than two points is a degraded but valid outcome:
/// the position exits at the entry price with zero hold days and reason
/// `no_price_data`. A trajectory exhausted without any rule firing exits at
/// the last observed price with reason `end_of_data`.
pub fn evaluate_trajectory(
    entry_price: f64,
    points: &[PricePoint],
    rules: &ExitRuleSet,
) -> ExitEvent {
    let Some(first) = points.first() else {
        return ExitEvent {
            day_index: 0,
            price: entry_price,
            date: NaiveDate::default(),
            reason: ExitReason::NoPriceData,
            hold_days: 0,
        };
    };

    if points.len() < 2 {
        return ExitEvent {
            day_index: 0,
            price: entry_price,
            date: first.date,
            reason: ExitReason::NoPriceData,
            hold_days: 0,
        };
    }

    let start_date = first.date;
    for (index, point) in points.iter().enumerate() {
        let elapsed = (point.date - start_date).num_days();
        let change = change_pct(entry_price, point.price);
        if let Some(reason) = check_rules(change, elapsed, rules) {
            return ExitEvent {
                day_index: index,
                price: point.price,
                date: point.date,
                reason,
                hold_days: elapsed,
            };
        }
    }

    let last = points.last().expect("Checked points is not empty");
    ExitEvent {
        day_index: points.len() - 1,
        price: last.price,
        date: last.date,
        reason: ExitReason::EndOfData,
        hold_days: (last.date - start_date).num_days(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(day_offset: i64, price: f64) -> PricePoint {
        let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        PricePoint {
            symbol: "T".to_string(),
            date: base + chrono::Duration::days(day_offset),
            price,
        }
    }

    fn rules(target: f64, stop: f64, max_hold: i64) -> ExitRuleSet {
        ExitRuleSet {
            target_pct: target,
            stop_pct: stop,
            max_hold_days: max_hold,
        }
    }

    #[test]
    fn target_fires_on_first_qualifying_day() {
        let trajectory = vec![
            point(0, 100.0),
            point(1, 103.0),
            point(2, 108.0),
            point(3, 95.0),
        ];
        let event = evaluate_trajectory(100.0, &trajectory, &rules(5.0, 10.0, 10));
        assert_eq!(event.reason, ExitReason::TargetHit);
        assert_eq!(event.day_index, 2);
        assert!((event.price - 108.0).abs() < 1e-9);
        assert_eq!(event.hold_days, 2);
    }

    #[test]
    fn stop_loss_fires_before_max_hold() {
        let trajectory = vec![point(0, 100.0), point(1, 96.0), point(2, 89.0)];
        let event = evaluate_trajectory(100.0, &trajectory, &rules(20.0, 10.0, 2));
        assert_eq!(event.reason, ExitReason::StopLoss);
        assert_eq!(event.day_index, 2);
    }

    #[test]
    fn target_outranks_stop_on_the_same_day() {
        // A pathological rule set where both thresholds are satisfied at
        // once: target must win by priority order.
        let trajectory = vec![point(0, 100.0), point(1, 100.0)];
        let event = evaluate_trajectory(100.0, &trajectory, &rules(0.0, -0.0, 30));
        // target_pct of 0 fires at zero change before anything else
        assert_eq!(event.reason, ExitReason::TargetHit);
    }

    #[test]
    fn max_hold_fires_when_elapsed_days_reach_cap() {
        let trajectory = vec![
            point(0, 100.0),
            point(1, 101.0),
            point(2, 102.0),
            point(3, 101.0),
        ];
        let event = evaluate_trajectory(100.0, &trajectory, &rules(50.0, 50.0, 3));
        assert_eq!(event.reason, ExitReason::MaxHold);
        assert_eq!(event.hold_days, 3);
        assert!((event.price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_sentinel_never_triggers() {
        let trajectory = vec![point(0, 100.0), point(1, 250.0), point(2, 10.0)];
        let event = evaluate_trajectory(
            100.0,
            &trajectory,
            &rules(DISABLED_RULE_THRESHOLD, DISABLED_RULE_THRESHOLD, 365),
        );
        assert_eq!(event.reason, ExitReason::EndOfData);
        assert!((event.price - 10.0).abs() < 1e-9);
    }

    #[test]
    fn flat_two_point_trajectory_runs_out_of_data() {
        let trajectory = vec![point(0, 100.0), point(1, 100.0)];
        let event = evaluate_trajectory(100.0, &trajectory, &rules(5.0, 5.0, 30));
        assert_eq!(event.reason, ExitReason::EndOfData);
        assert!((change_pct(100.0, event.price)).abs() < 1e-9);
    }

    #[test]
    fn short_trajectories_degrade_to_no_price_data() {
        let event = evaluate_trajectory(100.0, &[], &rules(5.0, 5.0, 30));
        assert_eq!(event.reason, ExitReason::NoPriceData);
        assert!((event.price - 100.0).abs() < 1e-9);
        assert_eq!(event.hold_days, 0);

        let single = vec![point(0, 104.0)];
        let event = evaluate_trajectory(100.0, &single, &rules(1.0, 1.0, 1));
        assert_eq!(event.reason, ExitReason::NoPriceData);
        assert!((event.price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_entry_price_yields_zero_change() {
        assert_eq!(change_pct(0.0, 50.0), 0.0);
        let trajectory = vec![point(0, 50.0), point(1, 60.0)];
        let event = evaluate_trajectory(0.0, &trajectory, &rules(5.0, 5.0, 30));
        assert_eq!(event.reason, ExitReason::EndOfData);
    }
}
