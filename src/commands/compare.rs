use crate::compare::ScenarioComparator;
use crate::config::BacktestParams;
use crate::context::AppContext;
use anyhow::{anyhow, Result};
use log::info;
use serde_json::json;

pub async fn run(
    app: &AppContext,
    base: BacktestParams,
    presets: Vec<String>,
    algorithms: Vec<String>,
    save: bool,
) -> Result<()> {
    if !presets.is_empty() && !algorithms.is_empty() {
        return Err(anyhow!(
            "Compare accepts either preset names or algorithm names, not both."
        ));
    }

    let mut db = app.database().await?;
    let mut comparator = ScenarioComparator::new(&mut db);

    let (mode, ranked) = if algorithms.is_empty() {
        (
            "presets",
            comparator.compare_presets(&base, &presets, save).await?,
        )
    } else {
        (
            "algorithms",
            comparator.compare_algorithms(&base, &algorithms, save).await?,
        )
    };

    for (position, entry) in ranked.iter().enumerate() {
        info!(
            "#{} {} — return {:+.2}%, win rate {:.1}%, {} trade(s)",
            position + 1,
            entry.label,
            entry.result.total_return_pct,
            entry.result.metrics.win_rate,
            entry.result.metrics.total_trades
        );
    }

    let document = json!({
        "mode": mode,
        "saved": save,
        "ranked": ranked
            .iter()
            .map(|entry| json!({
                "label": entry.label,
                "runId": entry.result.id,
                "totalReturnPct": entry.result.total_return_pct,
                "finalCapital": entry.result.final_capital,
                "winRate": entry.result.metrics.win_rate,
                "totalTrades": entry.result.metrics.total_trades,
                "maxDrawdownPct": entry.result.metrics.max_drawdown_pct,
            }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
