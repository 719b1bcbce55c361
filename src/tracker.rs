use crate::config::TrackerSettings;
use crate::database::Database;
use crate::exit_rules::{change_pct, check_rules, ExitRuleSet};
use crate::models::{
    generate_position_id, DailySnapshot, Pick, PickFilter, PositionStatus, PricePoint,
    TrackSummary, TrackedPosition,
};
use crate::retry::retry_persist;
use anyhow::Result;
use chrono::NaiveDate;
use log::{info, warn};

/// Outcome of refreshing one open position against its latest price.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// No price data for the instrument; the position is left untouched.
    Skipped,
    /// Still open; updated running fields should be persisted.
    Updated(TrackedPosition),
    /// An exit rule fired; the position closes with frozen exit fields.
    Closed(TrackedPosition),
}

/// Seed a new open position from a pick. Peak and trough start at the entry
/// price; they track observed extremes, not theoretical bounds.
pub fn seed_position(pick: &Pick, rules: ExitRuleSet) -> TrackedPosition {
    TrackedPosition {
        id: generate_position_id(&pick.symbol, &pick.algorithm, pick.pick_date),
        symbol: pick.symbol.clone(),
        algorithm: pick.algorithm.clone(),
        pick_date: pick.pick_date,
        entry_price: pick.entry_price,
        current_price: pick.entry_price,
        current_return_pct: 0.0,
        peak_price: pick.entry_price,
        trough_price: pick.entry_price,
        hold_days: 0,
        status: PositionStatus::Open,
        target_pct: rules.target_pct,
        stop_pct: rules.stop_pct,
        max_hold_days: rules.max_hold_days,
        score: pick.score,
        timeframe: pick.timeframe.clone(),
        exit_date: None,
        exit_price: None,
        exit_reason: None,
        final_return_pct: None,
    }
}

/// Recompute an open position's running fields from its latest observed
/// price and evaluate the position's own exit thresholds. Closed positions
/// are immutable history and are never passed through here.
pub fn refresh_position(
    position: &TrackedPosition,
    latest: Option<&PricePoint>,
    today: NaiveDate,
) -> RefreshOutcome {
    let Some(latest) = latest else {
        // No data never closes a position.
        return RefreshOutcome::Skipped;
    };

    let mut updated = position.clone();
    updated.current_price = latest.price;
    updated.current_return_pct = change_pct(position.entry_price, latest.price);
    updated.peak_price = position.peak_price.max(latest.price);
    updated.trough_price = position.trough_price.min(latest.price);
    updated.hold_days = (today - position.pick_date).num_days().max(0);

    let rules = ExitRuleSet {
        target_pct: position.target_pct,
        stop_pct: position.stop_pct,
        max_hold_days: position.max_hold_days,
    };

    match check_rules(updated.current_return_pct, updated.hold_days, &rules) {
        Some(reason) => {
            updated.status = PositionStatus::Closed;
            updated.exit_date = Some(latest.date);
            updated.exit_price = Some(latest.price);
            updated.exit_reason = Some(reason);
            updated.final_return_pct = Some(updated.current_return_pct);
            RefreshOutcome::Closed(updated)
        }
        None => RefreshOutcome::Updated(updated),
    }
}

/// Summarize the full tracked population for one calendar day.
pub fn build_snapshot(track_date: NaiveDate, positions: &[TrackedPosition]) -> DailySnapshot {
    let open_positions = positions.iter().filter(|p| p.is_open()).count() as i32;
    let closed: Vec<&TrackedPosition> = positions.iter().filter(|p| !p.is_open()).collect();

    let wins = closed
        .iter()
        .filter(|p| p.final_return_pct.unwrap_or(0.0) > 0.0)
        .count() as i32;
    let losses = closed.len() as i32 - wins;
    let win_rate = if closed.is_empty() {
        0.0
    } else {
        wins as f64 / closed.len() as f64 * 100.0
    };

    let win_returns: Vec<f64> = closed
        .iter()
        .filter_map(|p| p.final_return_pct)
        .filter(|r| *r > 0.0)
        .collect();
    let loss_returns: Vec<f64> = closed
        .iter()
        .filter_map(|p| p.final_return_pct)
        .filter(|r| *r <= 0.0)
        .collect();

    let avg = |values: &[f64]| {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };

    let best_symbol = positions
        .iter()
        .max_by(|a, b| {
            a.effective_return_pct()
                .partial_cmp(&b.effective_return_pct())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|p| p.symbol.clone());
    let worst_symbol = positions
        .iter()
        .min_by(|a, b| {
            a.effective_return_pct()
                .partial_cmp(&b.effective_return_pct())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|p| p.symbol.clone());

    let avg_hold_days = if positions.is_empty() {
        0.0
    } else {
        positions.iter().map(|p| p.hold_days as f64).sum::<f64>() / positions.len() as f64
    };

    DailySnapshot {
        track_date,
        open_positions,
        closed_positions: closed.len() as i32,
        wins,
        losses,
        win_rate,
        avg_win_pct: avg(&win_returns),
        avg_loss_pct: avg(&loss_returns),
        best_symbol,
        worst_symbol,
        avg_hold_days,
    }
}

pub struct ForwardTracker<'a> {
    db: &'a mut Database,
    settings: TrackerSettings,
}

impl<'a> ForwardTracker<'a> {
    pub fn new(db: &'a mut Database, settings: TrackerSettings) -> Self {
        Self { db, settings }
    }

    /// One tracking pass: import new picks, refresh open positions, write
    /// the daily snapshot. Phases run in this order so same-day picks are
    /// eligible for immediate evaluation; each phase is idempotent.
    pub async fn run(&mut self, today: NaiveDate) -> Result<TrackSummary> {
        let imported = self.import().await?;
        let (updated, closed) = self.refresh(today).await?;
        self.snapshot(today).await?;

        let summary = TrackSummary {
            imported,
            updated,
            closed,
        };
        info!(
            "Tracking pass for {}: imported {}, updated {}, closed {}",
            today, summary.imported, summary.updated, summary.closed
        );
        self.db
            .persist_event(
                "Tracker",
                "info",
                "Tracking pass completed",
                serde_json::json!({
                    "trackDate": today,
                    "imported": summary.imported,
                    "updated": summary.updated,
                    "closed": summary.closed,
                }),
            )
            .await;
        Ok(summary)
    }

    /// Create one open position per pick not yet represented. The insert is
    /// conflict-free on (symbol, algorithm, pick_date), so re-seeding an
    /// unchanged catalog imports nothing.
    async fn import(&mut self) -> Result<i32> {
        let picks = self.db.get_picks(&PickFilter::default()).await?;
        let mut imported = 0;
        for pick in &picks {
            let rules = self.settings.rules_for_timeframe(pick.timeframe.as_deref());
            let position = seed_position(pick, rules);
            if self.db.insert_position_if_absent(&position).await? {
                imported += 1;
            }
        }
        if imported > 0 {
            info!("Imported {} new tracked position(s)", imported);
        }
        Ok(imported)
    }

    async fn refresh(&mut self, today: NaiveDate) -> Result<(i32, i32)> {
        let open_positions = self.db.get_open_positions().await?;
        let mut updated = 0;
        let mut closed = 0;

        for position in &open_positions {
            let latest = self.db.get_latest_price(&position.symbol).await?;
            match refresh_position(position, latest.as_ref(), today) {
                RefreshOutcome::Skipped => {
                    warn!(
                        "No price data for {}; leaving position {} unchanged",
                        position.symbol, position.id
                    );
                }
                RefreshOutcome::Updated(refreshed) => {
                    self.db.update_open_position(&refreshed).await?;
                    updated += 1;
                }
                RefreshOutcome::Closed(refreshed) => {
                    // The close carries a status guard; a concurrent pass
                    // closing the same position first makes this a no-op.
                    if self.db.close_position(&refreshed).await? {
                        closed += 1;
                        info!(
                            "Closed {} after {} day(s): {} at {:.2} ({:+.2}%)",
                            refreshed.id,
                            refreshed.hold_days,
                            refreshed
                                .exit_reason
                                .map(|r| r.as_str())
                                .unwrap_or("unknown"),
                            refreshed.exit_price.unwrap_or_default(),
                            refreshed.final_return_pct.unwrap_or_default()
                        );
                    }
                }
            }
        }

        Ok((updated, closed))
    }

    async fn snapshot(&mut self, today: NaiveDate) -> Result<()> {
        let positions = self.db.get_all_positions().await?;
        let snapshot = build_snapshot(today, &positions);
        retry_persist!(format!("daily snapshot for {}", today), async {
            self.db.upsert_daily_snapshot(&snapshot).await
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn pick(symbol: &str, timeframe: Option<&str>) -> Pick {
        Pick {
            symbol: symbol.to_string(),
            algorithm: "momentum_v2".to_string(),
            pick_date: day(0),
            entry_price: 100.0,
            score: Some(80.0),
            rating: None,
            risk_level: None,
            timeframe: timeframe.map(|t| t.to_string()),
        }
    }

    fn rules() -> ExitRuleSet {
        ExitRuleSet {
            target_pct: 10.0,
            stop_pct: 7.0,
            max_hold_days: 90,
        }
    }

    fn latest(offset: i64, price: f64) -> PricePoint {
        PricePoint {
            symbol: "AAA".to_string(),
            date: day(offset),
            price,
        }
    }

    #[test]
    fn seeded_positions_start_at_entry_extremes() {
        let position = seed_position(&pick("AAA", Some("short")), rules());
        assert_eq!(position.status, PositionStatus::Open);
        assert!((position.peak_price - 100.0).abs() < 1e-9);
        assert!((position.trough_price - 100.0).abs() < 1e-9);
        assert_eq!(position.hold_days, 0);
        assert!(position.exit_reason.is_none());
    }

    #[test]
    fn refresh_without_price_data_is_a_no_op() {
        let position = seed_position(&pick("AAA", None), rules());
        assert!(matches!(
            refresh_position(&position, None, day(5)),
            RefreshOutcome::Skipped
        ));
    }

    #[test]
    fn refresh_updates_running_extremes() {
        let mut position = seed_position(&pick("AAA", None), rules());
        position.peak_price = 104.0;
        position.trough_price = 97.0;

        let outcome = refresh_position(&position, Some(&latest(6, 95.0)), day(6));
        let RefreshOutcome::Updated(updated) = outcome else {
            panic!("expected still-open update");
        };
        assert!((updated.current_return_pct + 5.0).abs() < 1e-9);
        assert!((updated.peak_price - 104.0).abs() < 1e-9);
        assert!((updated.trough_price - 95.0).abs() < 1e-9);
        assert_eq!(updated.hold_days, 6);
        assert_eq!(updated.status, PositionStatus::Open);
    }

    #[test]
    fn target_close_freezes_exit_fields() {
        let position = seed_position(&pick("AAA", None), rules());
        let outcome = refresh_position(&position, Some(&latest(3, 111.0)), day(3));
        let RefreshOutcome::Closed(closed) = outcome else {
            panic!("expected close");
        };
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.exit_reason, Some(ExitReason::TargetHit));
        assert_eq!(closed.exit_date, Some(day(3)));
        assert!((closed.exit_price.unwrap() - 111.0).abs() < 1e-9);
        assert!((closed.final_return_pct.unwrap() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn max_hold_close_uses_position_thresholds() {
        let mut position = seed_position(&pick("AAA", Some("short")), rules());
        position.max_hold_days = 30;
        let outcome = refresh_position(&position, Some(&latest(30, 101.0)), day(30));
        assert!(matches!(outcome, RefreshOutcome::Closed(p) if p.exit_reason == Some(ExitReason::MaxHold)));
    }

    #[test]
    fn snapshot_summarizes_open_and_closed_positions() {
        let mut winner = seed_position(&pick("AAA", None), rules());
        winner.status = PositionStatus::Closed;
        winner.final_return_pct = Some(12.0);
        winner.hold_days = 10;

        let mut loser = seed_position(&pick("BBB", None), rules());
        loser.status = PositionStatus::Closed;
        loser.final_return_pct = Some(-8.0);
        loser.hold_days = 20;

        let mut still_open = seed_position(&pick("CCC", None), rules());
        still_open.current_return_pct = 2.0;
        still_open.hold_days = 3;

        let snapshot = build_snapshot(day(30), &[winner, loser, still_open]);
        assert_eq!(snapshot.open_positions, 1);
        assert_eq!(snapshot.closed_positions, 2);
        assert_eq!(snapshot.wins, 1);
        assert_eq!(snapshot.losses, 1);
        assert!((snapshot.win_rate - 50.0).abs() < 1e-9);
        assert!((snapshot.avg_win_pct - 12.0).abs() < 1e-9);
        assert!((snapshot.avg_loss_pct + 8.0).abs() < 1e-9);
        assert_eq!(snapshot.best_symbol.as_deref(), Some("AAA"));
        assert_eq!(snapshot.worst_symbol.as_deref(), Some("BBB"));
        assert!((snapshot.avg_hold_days - 11.0).abs() < 1e-9);
    }

    #[test]
    fn empty_population_snapshot_is_all_zero() {
        let snapshot = build_snapshot(day(0), &[]);
        assert_eq!(snapshot.open_positions, 0);
        assert_eq!(snapshot.win_rate, 0.0);
        assert!(snapshot.best_symbol.is_none());
    }
}
