use crate::models::{
    ClosedOutcome, DailySnapshot, Lesson, Pick, PickFilter, PositionStatus, PricePoint, RunResult,
    TrackedPosition,
};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use log::{error, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tokio_postgres::{Client, NoTls, Row};

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    /// Annual expense ratio per instrument, for time-prorated fee charges.
    pub async fn get_expense_ratios(&self) -> Result<HashMap<String, f64>> {
        let rows = self
            .client
            .query(
                "SELECT symbol, expense_ratio FROM instruments WHERE expense_ratio IS NOT NULL",
                &[],
            )
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(row.get::<_, String>(0), row.get::<_, f64>(1));
        }
        Ok(map)
    }

    /// Ordered forward price trajectory for one instrument, bounded by
    /// `limit` rows so worst-case work per pick stays capped.
    pub async fn get_prices(
        &self,
        symbol: &str,
        from_date: NaiveDate,
        limit: i64,
    ) -> Result<Vec<PricePoint>> {
        let rows = self
            .client
            .query(
                "SELECT symbol, date, price
                 FROM price_points
                 WHERE symbol = $1 AND date >= $2
                 ORDER BY date
                 LIMIT $3",
                &[&symbol, &from_date, &limit],
            )
            .await?;

        Ok(rows.iter().map(row_to_price_point).collect())
    }

    pub async fn get_latest_price(&self, symbol: &str) -> Result<Option<PricePoint>> {
        let row = self
            .client
            .query_opt(
                "SELECT symbol, date, price
                 FROM price_points
                 WHERE symbol = $1
                 ORDER BY date DESC
                 LIMIT 1",
                &[&symbol],
            )
            .await?;

        Ok(row.as_ref().map(row_to_price_point))
    }

    /// The last `limit` prices strictly before a date, oldest first. Used
    /// to classify the trend leading into a pick.
    pub async fn get_prices_before(
        &self,
        symbol: &str,
        before: NaiveDate,
        limit: i64,
    ) -> Result<Vec<PricePoint>> {
        let rows = self
            .client
            .query(
                "SELECT symbol, date, price FROM (
                     SELECT symbol, date, price
                     FROM price_points
                     WHERE symbol = $1 AND date < $2
                     ORDER BY date DESC
                     LIMIT $3
                 ) recent ORDER BY date",
                &[&symbol, &before, &limit],
            )
            .await?;

        Ok(rows.iter().map(row_to_price_point).collect())
    }

    pub async fn get_picks(&self, filter: &PickFilter) -> Result<Vec<Pick>> {
        let rows = if filter.algorithms.is_empty() {
            self.client
                .query(
                    "SELECT symbol, algorithm, pick_date, entry_price, score, rating, risk_level, timeframe
                     FROM picks
                     WHERE ($1::date IS NULL OR pick_date >= $1)
                     ORDER BY pick_date, symbol",
                    &[&filter.since],
                )
                .await?
        } else {
            self.client
                .query(
                    "SELECT symbol, algorithm, pick_date, entry_price, score, rating, risk_level, timeframe
                     FROM picks
                     WHERE algorithm = ANY($1) AND ($2::date IS NULL OR pick_date >= $2)
                     ORDER BY pick_date, symbol",
                    &[&filter.algorithms, &filter.since],
                )
                .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| Pick {
                symbol: row.get(0),
                algorithm: row.get(1),
                pick_date: row.get(2),
                entry_price: row.get(3),
                score: row.get(4),
                rating: row.get(5),
                risk_level: row.get(6),
                timeframe: row.get(7),
            })
            .collect())
    }

    /// Conflict-free seed of a tracked position. Returns true when a row
    /// was actually created, false when the pick was already represented.
    pub async fn insert_position_if_absent(&self, position: &TrackedPosition) -> Result<bool> {
        let affected = self
            .client
            .execute(
                "INSERT INTO tracked_positions (
                     id, symbol, algorithm, pick_date, entry_price, current_price,
                     current_return_pct, peak_price, trough_price, hold_days, status,
                     target_pct, stop_pct, max_hold_days, score, timeframe, updated_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                 ON CONFLICT (symbol, algorithm, pick_date) DO NOTHING",
                &[
                    &position.id,
                    &position.symbol,
                    &position.algorithm,
                    &position.pick_date,
                    &position.entry_price,
                    &position.current_price,
                    &position.current_return_pct,
                    &position.peak_price,
                    &position.trough_price,
                    &position.hold_days,
                    &position.status.as_str(),
                    &position.target_pct,
                    &position.stop_pct,
                    &position.max_hold_days,
                    &position.score,
                    &position.timeframe,
                    &Utc::now(),
                ],
            )
            .await?;

        Ok(affected == 1)
    }

    pub async fn get_open_positions(&self) -> Result<Vec<TrackedPosition>> {
        let rows = self
            .client
            .query(
                &format!("{} WHERE status = 'open' ORDER BY pick_date, symbol", POSITION_SELECT),
                &[],
            )
            .await?;

        rows.iter().map(row_to_position).collect()
    }

    pub async fn get_all_positions(&self) -> Result<Vec<TrackedPosition>> {
        let rows = self
            .client
            .query(
                &format!("{} ORDER BY pick_date, symbol", POSITION_SELECT),
                &[],
            )
            .await?;

        rows.iter().map(row_to_position).collect()
    }

    /// Persist the running fields of a still-open position. The status
    /// guard keeps closed positions immutable.
    pub async fn update_open_position(&self, position: &TrackedPosition) -> Result<()> {
        self.client
            .execute(
                "UPDATE tracked_positions
                 SET current_price = $2,
                     current_return_pct = $3,
                     peak_price = $4,
                     trough_price = $5,
                     hold_days = $6,
                     updated_at = $7
                 WHERE id = $1 AND status = 'open'",
                &[
                    &position.id,
                    &position.current_price,
                    &position.current_return_pct,
                    &position.peak_price,
                    &position.trough_price,
                    &position.hold_days,
                    &Utc::now(),
                ],
            )
            .await?;

        Ok(())
    }

    /// Transition a position to closed and freeze its exit fields. Returns
    /// false when another pass closed it first.
    pub async fn close_position(&self, position: &TrackedPosition) -> Result<bool> {
        let exit_reason = position.exit_reason.map(|reason| reason.as_str());
        let affected = self
            .client
            .execute(
                "UPDATE tracked_positions
                 SET current_price = $2,
                     current_return_pct = $3,
                     peak_price = $4,
                     trough_price = $5,
                     hold_days = $6,
                     status = 'closed',
                     exit_date = $7,
                     exit_price = $8,
                     exit_reason = $9,
                     final_return_pct = $10,
                     updated_at = $11
                 WHERE id = $1 AND status = 'open'",
                &[
                    &position.id,
                    &position.current_price,
                    &position.current_return_pct,
                    &position.peak_price,
                    &position.trough_price,
                    &position.hold_days,
                    &position.exit_date,
                    &position.exit_price,
                    &exit_reason,
                    &position.final_return_pct,
                    &Utc::now(),
                ],
            )
            .await?;

        Ok(affected == 1)
    }

    /// One row per calendar day; re-running the same day replaces it.
    pub async fn upsert_daily_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO daily_snapshots (
                     track_date, open_positions, closed_positions, wins, losses, win_rate,
                     avg_win_pct, avg_loss_pct, best_symbol, worst_symbol, avg_hold_days, created_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                 ON CONFLICT (track_date) DO UPDATE SET
                     open_positions = EXCLUDED.open_positions,
                     closed_positions = EXCLUDED.closed_positions,
                     wins = EXCLUDED.wins,
                     losses = EXCLUDED.losses,
                     win_rate = EXCLUDED.win_rate,
                     avg_win_pct = EXCLUDED.avg_win_pct,
                     avg_loss_pct = EXCLUDED.avg_loss_pct,
                     best_symbol = EXCLUDED.best_symbol,
                     worst_symbol = EXCLUDED.worst_symbol,
                     avg_hold_days = EXCLUDED.avg_hold_days,
                     created_at = EXCLUDED.created_at",
                &[
                    &snapshot.track_date,
                    &snapshot.open_positions,
                    &snapshot.closed_positions,
                    &snapshot.wins,
                    &snapshot.losses,
                    &snapshot.win_rate,
                    &snapshot.avg_win_pct,
                    &snapshot.avg_loss_pct,
                    &snapshot.best_symbol,
                    &snapshot.worst_symbol,
                    &snapshot.avg_hold_days,
                    &Utc::now(),
                ],
            )
            .await?;

        Ok(())
    }

    /// Re-detecting on the same day replaces that type's lesson.
    pub async fn upsert_lesson(&self, lesson: &Lesson) -> Result<()> {
        let supporting = lesson.supporting_data.to_string();
        self.client
            .execute(
                "INSERT INTO lessons (
                     lesson_date, lesson_type, title, text, confidence, supporting_data, created_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (lesson_date, lesson_type) DO UPDATE SET
                     title = EXCLUDED.title,
                     text = EXCLUDED.text,
                     confidence = EXCLUDED.confidence,
                     supporting_data = EXCLUDED.supporting_data,
                     created_at = EXCLUDED.created_at",
                &[
                    &lesson.lesson_date,
                    &lesson.lesson_type.as_str(),
                    &lesson.title,
                    &lesson.text,
                    &lesson.confidence,
                    &supporting,
                    &Utc::now(),
                ],
            )
            .await?;

        Ok(())
    }

    /// Persist a run together with its trade ledger. The ledger is never
    /// written without its parent run: both land in one transaction.
    pub async fn insert_backtest_run(&mut self, result: &RunResult) -> Result<()> {
        let metrics_json =
            serde_json::to_string(&result.metrics).context("Failed to serialize run metrics")?;
        let by_algorithm_json = serde_json::to_string(&result.by_algorithm)
            .context("Failed to serialize algorithm breakdown")?;
        let exit_reasons_json = serde_json::to_string(&result.exit_reasons)
            .context("Failed to serialize exit-reason histogram")?;
        let equity_json = serde_json::to_string(&result.equity_curve)
            .context("Failed to serialize equity curve")?;

        let tx = self.client.transaction().await?;
        tx.execute(
            "INSERT INTO backtest_runs (
                 id, target_pct, stop_pct, max_hold_days, initial_capital, fee_pct,
                 position_size_pct, algorithm_filter, final_capital, total_return_pct,
                 metrics, by_algorithm, exit_reasons, equity_curve, created_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (id) DO UPDATE SET
                 final_capital = EXCLUDED.final_capital,
                 total_return_pct = EXCLUDED.total_return_pct,
                 metrics = EXCLUDED.metrics,
                 by_algorithm = EXCLUDED.by_algorithm,
                 exit_reasons = EXCLUDED.exit_reasons,
                 equity_curve = EXCLUDED.equity_curve,
                 created_at = EXCLUDED.created_at",
            &[
                &result.id,
                &result.target_pct,
                &result.stop_pct,
                &result.max_hold_days,
                &result.initial_capital,
                &result.fee_pct,
                &result.position_size_pct,
                &result.algorithm_filter,
                &result.final_capital,
                &result.total_return_pct,
                &metrics_json,
                &by_algorithm_json,
                &exit_reasons_json,
                &equity_json,
                &result.created_at,
            ],
        )
        .await?;

        if !result.trades.is_empty() {
            let stmt = tx
                .prepare(
                    "INSERT INTO backtest_trades (
                         id, run_id, symbol, algorithm, entry_date, entry_price, exit_date,
                         exit_price, units, gross_pnl, fees, net_pnl, return_pct, exit_reason,
                         hold_days
                     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                     ON CONFLICT (id) DO NOTHING",
                )
                .await?;

            for trade in &result.trades {
                tx.execute(
                    &stmt,
                    &[
                        &trade.id,
                        &result.id,
                        &trade.symbol,
                        &trade.algorithm,
                        &trade.entry_date,
                        &trade.entry_price,
                        &trade.exit_date,
                        &trade.exit_price,
                        &trade.units,
                        &trade.gross_pnl,
                        &trade.fees,
                        &trade.net_pnl,
                        &trade.return_pct,
                        &trade.exit_reason.as_str(),
                        &trade.hold_days,
                    ],
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Closed positions joined with their pick metadata, for lesson mining.
    pub async fn get_closed_outcomes(&self) -> Result<Vec<ClosedOutcome>> {
        let rows = self
            .client
            .query(
                "SELECT symbol, algorithm, pick_date, entry_price, exit_price,
                        final_return_pct, hold_days, exit_reason, score
                 FROM tracked_positions
                 WHERE status = 'closed'
                 ORDER BY exit_date, symbol",
                &[],
            )
            .await?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let reason_raw: String = row.get(7);
            outcomes.push(ClosedOutcome {
                symbol: row.get(0),
                algorithm: row.get(1),
                pick_date: row.get(2),
                entry_price: row.get(3),
                exit_price: row.get(4),
                final_return_pct: row.get(5),
                hold_days: row.get(6),
                exit_reason: crate::models::ExitReason::from_str(&reason_raw)
                    .with_context(|| format!("invalid exit reason in row: {}", reason_raw))?,
                score: row.get(8),
                entry_trend: None,
            });
        }
        Ok(outcomes)
    }

    pub async fn insert_system_log(
        &self,
        source: &str,
        level: &str,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        let created_at = Utc::now();
        let metadata_text = metadata.map(|value| value.to_string());

        self.client
            .execute(
                "INSERT INTO system_logs (source, level, message, metadata, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&source, &level, &message, &metadata_text, &created_at],
            )
            .await?;

        Ok(())
    }

    /// Best-effort operational event; failures are logged, never raised.
    pub async fn persist_event(
        &self,
        source: &str,
        level: &str,
        message: impl Into<String>,
        metadata: Value,
    ) {
        let text = message.into();
        if let Err(err) = self
            .insert_system_log(source, level, &text, Some(metadata))
            .await
        {
            warn!("Failed to persist system log from {}: {}", source, err);
        }
    }
}

const POSITION_SELECT: &str = "SELECT id, symbol, algorithm, pick_date, entry_price, current_price,
        current_return_pct, peak_price, trough_price, hold_days, status,
        target_pct, stop_pct, max_hold_days, score, timeframe,
        exit_date, exit_price, exit_reason, final_return_pct
 FROM tracked_positions";

fn row_to_price_point(row: &Row) -> PricePoint {
    PricePoint {
        symbol: row.get(0),
        date: row.get(1),
        price: row.get(2),
    }
}

fn row_to_position(row: &Row) -> Result<TrackedPosition> {
    let status_raw: String = row.get(10);
    let status = PositionStatus::from_str(&status_raw)
        .with_context(|| format!("invalid position status in row: {}", status_raw))?;
    let exit_reason = row
        .get::<_, Option<String>>(18)
        .map(|raw| {
            crate::models::ExitReason::from_str(&raw)
                .with_context(|| format!("invalid exit reason in row: {}", raw))
        })
        .transpose()?;

    Ok(TrackedPosition {
        id: row.get(0),
        symbol: row.get(1),
        algorithm: row.get(2),
        pick_date: row.get(3),
        entry_price: row.get(4),
        current_price: row.get(5),
        current_return_pct: row.get(6),
        peak_price: row.get(7),
        trough_price: row.get(8),
        hold_days: row.get(9),
        status,
        target_pct: row.get(11),
        stop_pct: row.get(12),
        max_hold_days: row.get(13),
        score: row.get(14),
        timeframe: row.get(15),
        exit_date: row.get(16),
        exit_price: row.get(17),
        exit_reason,
        final_return_pct: row.get(19),
    })
}
