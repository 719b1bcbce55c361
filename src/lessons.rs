use crate::exit_rules::change_pct;
use crate::models::{ClosedOutcome, Lesson, LessonType, PricePoint, TrendDirection};
use chrono::NaiveDate;
use serde_json::json;

/// Detection runs only once this many closed trades exist.
pub const MIN_POPULATION: usize = 5;
/// A breakdown group is reported only with at least this many samples.
pub const MIN_GROUP_SAMPLES: usize = 3;
/// Prices inspected before the pick date to classify the entry trend.
pub const TREND_LOOKBACK_DAYS: i64 = 5;

const CONFIDENCE_BASE: f64 = 50.0;
const CONFIDENCE_PER_SAMPLE: f64 = 2.0;
const CONFIDENCE_CAP: f64 = 95.0;

/// Confidence grows with sample size but is capped.
fn confidence(samples: usize) -> f64 {
    (CONFIDENCE_BASE + CONFIDENCE_PER_SAMPLE * samples as f64).min(CONFIDENCE_CAP)
}

/// Classify the price trend leading into a pick from the prices observed
/// before the pick date. Returns None when no prior data exists.
pub fn classify_trend(prices_before: &[PricePoint], entry_price: f64) -> Option<TrendDirection> {
    let baseline = prices_before.first()?;
    let change = change_pct(baseline.price, entry_price);
    if change > 1.0 {
        Some(TrendDirection::Up)
    } else if change < -1.0 {
        Some(TrendDirection::Down)
    } else {
        Some(TrendDirection::Flat)
    }
}

#[derive(Debug, Clone)]
struct GroupStat {
    label: String,
    samples: usize,
    wins: usize,
    win_rate: f64,
    avg_return_pct: f64,
}

impl GroupStat {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "group": self.label,
            "samples": self.samples,
            "wins": self.wins,
            "winRate": self.win_rate,
            "avgReturnPct": self.avg_return_pct,
        })
    }
}

/// Group outcomes by a classifier and keep groups large enough to report.
fn group_stats<F>(outcomes: &[ClosedOutcome], classify: F) -> Vec<GroupStat>
where
    F: Fn(&ClosedOutcome) -> Option<String>,
{
    let mut grouped: std::collections::BTreeMap<String, Vec<&ClosedOutcome>> =
        std::collections::BTreeMap::new();
    for outcome in outcomes {
        if let Some(label) = classify(outcome) {
            grouped.entry(label).or_default().push(outcome);
        }
    }

    grouped
        .into_iter()
        .filter(|(_, members)| members.len() >= MIN_GROUP_SAMPLES)
        .map(|(label, members)| {
            let samples = members.len();
            let wins = members.iter().filter(|o| o.is_win()).count();
            let avg_return_pct =
                members.iter().map(|o| o.final_return_pct).sum::<f64>() / samples as f64;
            GroupStat {
                label,
                samples,
                wins,
                win_rate: wins as f64 / samples as f64 * 100.0,
                avg_return_pct,
            }
        })
        .collect()
}

fn best_by_win_rate(groups: &[GroupStat]) -> Option<&GroupStat> {
    groups.iter().max_by(|a, b| {
        a.win_rate
            .partial_cmp(&b.win_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.samples.cmp(&b.samples))
    })
}

fn best_by_avg_return(groups: &[GroupStat]) -> Option<&GroupStat> {
    groups.iter().max_by(|a, b| {
        a.avg_return_pct
            .partial_cmp(&b.avg_return_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.samples.cmp(&b.samples))
    })
}

fn lesson(
    lesson_date: NaiveDate,
    lesson_type: LessonType,
    title: &str,
    text: String,
    best: &GroupStat,
    groups: &[GroupStat],
) -> Lesson {
    Lesson {
        lesson_date,
        lesson_type,
        title: title.to_string(),
        text,
        confidence: confidence(best.samples),
        supporting_data: json!({
            "best": best.to_json(),
            "groups": groups.iter().map(GroupStat::to_json).collect::<Vec<_>>(),
        }),
    }
}

fn hold_bucket(hold_days: i64) -> String {
    match hold_days {
        0..=7 => "1 week or less".to_string(),
        8..=30 => "1 week to 1 month".to_string(),
        31..=90 => "1 to 3 months".to_string(),
        _ => "over 3 months".to_string(),
    }
}

fn score_bracket(score: f64) -> String {
    if score < 50.0 {
        "below 50".to_string()
    } else if score < 70.0 {
        "50 to 70".to_string()
    } else if score < 85.0 {
        "70 to 85".to_string()
    } else {
        "85 and above".to_string()
    }
}

pub struct LessonDetector;

impl LessonDetector {
    /// Mine the closed-trade population for patterns. Returns nothing when
    /// the population is below the minimum sample size. Each breakdown
    /// reports only groups with enough samples; selection is by win rate
    /// except the hold-period breakdown, which selects by average return.
    pub fn detect(outcomes: &[ClosedOutcome], today: NaiveDate) -> Vec<Lesson> {
        if outcomes.len() < MIN_POPULATION {
            return Vec::new();
        }

        let mut lessons = Vec::new();

        lessons.push(Self::overall(outcomes, today));
        lessons.extend(Self::by_algorithm(outcomes, today));
        lessons.extend(Self::by_hold_period(outcomes, today));
        lessons.extend(Self::by_trend(outcomes, today));
        lessons.extend(Self::by_exit_reason(outcomes, today));
        lessons.extend(Self::by_score_bracket(outcomes, today));

        lessons
    }

    fn overall(outcomes: &[ClosedOutcome], today: NaiveDate) -> Lesson {
        let samples = outcomes.len();
        let wins = outcomes.iter().filter(|o| o.is_win()).count();
        let win_rate = wins as f64 / samples as f64 * 100.0;
        let avg_return_pct =
            outcomes.iter().map(|o| o.final_return_pct).sum::<f64>() / samples as f64;
        let avg_hold = outcomes.iter().map(|o| o.hold_days as f64).sum::<f64>() / samples as f64;

        Lesson {
            lesson_date: today,
            lesson_type: LessonType::Overall,
            title: "Closed-trade population".to_string(),
            text: format!(
                "Across {} closed trades, {:.0}% were winners with an average return of {:+.1}% over an average hold of {:.0} days.",
                samples, win_rate, avg_return_pct, avg_hold
            ),
            confidence: confidence(samples),
            supporting_data: json!({
                "samples": samples,
                "wins": wins,
                "winRate": win_rate,
                "avgReturnPct": avg_return_pct,
                "avgHoldDays": avg_hold,
            }),
        }
    }

    fn by_algorithm(outcomes: &[ClosedOutcome], today: NaiveDate) -> Option<Lesson> {
        let groups = group_stats(outcomes, |o| Some(o.algorithm.clone()));
        let best = best_by_win_rate(&groups)?;
        Some(lesson(
            today,
            LessonType::Algorithm,
            "Strongest algorithm",
            format!(
                "Algorithm {} has the best closed-trade record: {:.0}% winners over {} trades (avg {:+.1}%).",
                best.label, best.win_rate, best.samples, best.avg_return_pct
            ),
            best,
            &groups,
        ))
    }

    fn by_hold_period(outcomes: &[ClosedOutcome], today: NaiveDate) -> Option<Lesson> {
        let groups = group_stats(outcomes, |o| Some(hold_bucket(o.hold_days)));
        let best = best_by_avg_return(&groups)?;
        Some(lesson(
            today,
            LessonType::HoldPeriod,
            "Best holding period",
            format!(
                "Trades held {} delivered the best average return: {:+.1}% over {} trades ({:.0}% winners).",
                best.label, best.avg_return_pct, best.samples, best.win_rate
            ),
            best,
            &groups,
        ))
    }

    fn by_trend(outcomes: &[ClosedOutcome], today: NaiveDate) -> Option<Lesson> {
        let groups = group_stats(outcomes, |o| {
            o.entry_trend.map(|t| t.as_str().to_string())
        });
        let best = best_by_win_rate(&groups)?;
        Some(lesson(
            today,
            LessonType::Trend,
            "Entry trend edge",
            format!(
                "Entries taken into a {} trend win {:.0}% of the time over {} trades (avg {:+.1}%).",
                best.label, best.win_rate, best.samples, best.avg_return_pct
            ),
            best,
            &groups,
        ))
    }

    fn by_exit_reason(outcomes: &[ClosedOutcome], today: NaiveDate) -> Option<Lesson> {
        let groups = group_stats(outcomes, |o| Some(o.exit_reason.as_str().to_string()));
        let best = best_by_win_rate(&groups)?;
        Some(lesson(
            today,
            LessonType::ExitReason,
            "Exit pattern",
            format!(
                "Positions closed by {} show the best outcomes: {:.0}% winners over {} trades (avg {:+.1}%).",
                best.label, best.win_rate, best.samples, best.avg_return_pct
            ),
            best,
            &groups,
        ))
    }

    fn by_score_bracket(outcomes: &[ClosedOutcome], today: NaiveDate) -> Option<Lesson> {
        let groups = group_stats(outcomes, |o| o.score.map(score_bracket));
        let best = best_by_win_rate(&groups)?;
        Some(lesson(
            today,
            LessonType::ScoreBracket,
            "Score bracket edge",
            format!(
                "Picks scored {} win {:.0}% of the time over {} trades (avg {:+.1}%).",
                best.label, best.win_rate, best.samples, best.avg_return_pct
            ),
            best,
            &groups,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn outcome(
        algorithm: &str,
        return_pct: f64,
        hold_days: i64,
        reason: ExitReason,
        score: Option<f64>,
    ) -> ClosedOutcome {
        ClosedOutcome {
            symbol: "AAA".to_string(),
            algorithm: algorithm.to_string(),
            pick_date: day(0),
            entry_price: 100.0,
            exit_price: 100.0 * (1.0 + return_pct / 100.0),
            final_return_pct: return_pct,
            hold_days,
            exit_reason: reason,
            score,
            entry_trend: None,
        }
    }

    #[test]
    fn small_populations_produce_no_lessons() {
        let outcomes = vec![
            outcome("algo1", 5.0, 10, ExitReason::TargetHit, None),
            outcome("algo1", -3.0, 12, ExitReason::StopLoss, None),
        ];
        assert!(LessonDetector::detect(&outcomes, day(30)).is_empty());
    }

    #[test]
    fn whole_population_lesson_reports_win_rate() {
        let mut outcomes = Vec::new();
        for _ in 0..7 {
            outcomes.push(outcome("algo1", 6.0, 10, ExitReason::TargetHit, None));
        }
        for _ in 0..3 {
            outcomes.push(outcome("algo1", -4.0, 10, ExitReason::StopLoss, None));
        }

        let lessons = LessonDetector::detect(&outcomes, day(30));
        let overall = lessons
            .iter()
            .find(|l| l.lesson_type == LessonType::Overall)
            .expect("overall lesson must always appear for a large population");
        assert!(overall.text.contains("70%"));
        assert_eq!(overall.lesson_date, day(30));
    }

    #[test]
    fn hold_bucket_breakdown_requires_enough_samples_per_group() {
        // 5 closed trades scattered so no hold bucket reaches 3 samples.
        let outcomes = vec![
            outcome("algo1", 5.0, 2, ExitReason::TargetHit, None),
            outcome("algo1", 4.0, 3, ExitReason::TargetHit, None),
            outcome("algo1", 3.0, 20, ExitReason::TargetHit, None),
            outcome("algo1", 2.0, 25, ExitReason::TargetHit, None),
            outcome("algo1", 1.0, 200, ExitReason::MaxHold, None),
        ];
        let lessons = LessonDetector::detect(&outcomes, day(30));
        assert!(lessons
            .iter()
            .all(|l| l.lesson_type != LessonType::HoldPeriod));
        // the whole-population lesson still appears
        assert!(lessons
            .iter()
            .any(|l| l.lesson_type == LessonType::Overall));
    }

    #[test]
    fn best_algorithm_selected_by_win_rate() {
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(outcome("steady", 2.0, 10, ExitReason::TargetHit, None));
        }
        outcomes.push(outcome("flashy", 20.0, 10, ExitReason::TargetHit, None));
        outcomes.push(outcome("flashy", -10.0, 10, ExitReason::StopLoss, None));
        outcomes.push(outcome("flashy", -12.0, 10, ExitReason::StopLoss, None));

        let lessons = LessonDetector::detect(&outcomes, day(30));
        let algo_lesson = lessons
            .iter()
            .find(|l| l.lesson_type == LessonType::Algorithm)
            .unwrap();
        assert!(algo_lesson.text.contains("steady"));
    }

    #[test]
    fn confidence_grows_with_samples_and_is_capped() {
        assert!((confidence(3) - 56.0).abs() < 1e-9);
        assert!((confidence(10) - 70.0).abs() < 1e-9);
        assert_eq!(confidence(1000), CONFIDENCE_CAP);
    }

    #[test]
    fn score_bracket_skips_unscored_outcomes() {
        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(outcome("algo1", 5.0, 10, ExitReason::TargetHit, None));
        }
        let lessons = LessonDetector::detect(&outcomes, day(30));
        assert!(lessons
            .iter()
            .all(|l| l.lesson_type != LessonType::ScoreBracket));
    }

    #[test]
    fn trend_classification_uses_lookback_baseline() {
        let prices: Vec<PricePoint> = (0..5)
            .map(|offset| PricePoint {
                symbol: "AAA".to_string(),
                date: day(offset),
                price: 100.0,
            })
            .collect();
        assert_eq!(classify_trend(&prices, 105.0), Some(TrendDirection::Up));
        assert_eq!(classify_trend(&prices, 94.0), Some(TrendDirection::Down));
        assert_eq!(classify_trend(&prices, 100.5), Some(TrendDirection::Flat));
        assert_eq!(classify_trend(&[], 100.0), None);
    }
}
