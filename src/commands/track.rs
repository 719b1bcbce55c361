use crate::config::TrackerSettings;
use crate::context::AppContext;
use crate::tracker::ForwardTracker;
use anyhow::Result;
use chrono::Utc;
use log::info;
use serde_json::json;

pub async fn run(app: &AppContext) -> Result<()> {
    let today = Utc::now().date_naive();
    info!("Received track command for {}", today);

    let mut db = app.database().await?;
    let summary = ForwardTracker::new(&mut db, TrackerSettings::default())
        .run(today)
        .await?;

    let document = json!({
        "trackDate": today,
        "imported": summary.imported,
        "updated": summary.updated,
        "closed": summary.closed,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
