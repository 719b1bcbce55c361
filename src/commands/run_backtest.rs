use crate::backtest::BacktestOrchestrator;
use crate::config::BacktestParams;
use crate::context::AppContext;
use anyhow::Result;
use log::info;
use serde_json::json;

pub async fn run(app: &AppContext, params: BacktestParams) -> Result<()> {
    info!(
        "Received backtest command (target {:.1}%, stop {:.1}%, max hold {}d, capital {:.0}{})",
        params.target_pct,
        params.stop_pct,
        params.max_hold_days,
        params.initial_capital,
        params
            .algorithm_filter
            .as_deref()
            .map(|a| format!(", algorithm {}", a))
            .unwrap_or_default()
    );

    // A standalone run is always persisted together with its trade ledger;
    // ad hoc comparisons go through the comparator instead.
    let mut db = app.database().await?;
    let result = BacktestOrchestrator::new(&mut db).run(&params, true).await?;

    let document = json!({
        "runId": result.id,
        "parameters": {
            "targetPct": result.target_pct,
            "stopPct": result.stop_pct,
            "maxHoldDays": result.max_hold_days,
            "initialCapital": result.initial_capital,
            "feePct": result.fee_pct,
            "positionSizePct": result.position_size_pct,
            "algorithmFilter": result.algorithm_filter,
        },
        "finalCapital": result.final_capital,
        "totalReturnPct": result.total_return_pct,
        "metrics": result.metrics,
        "byAlgorithm": result.by_algorithm,
        "exitReasons": result.exit_reasons,
        "tradeCount": result.trades.len(),
        "equityPoints": result.equity_curve.len(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
