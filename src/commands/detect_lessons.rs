use crate::context::AppContext;
use crate::lessons::{classify_trend, LessonDetector, MIN_POPULATION, TREND_LOOKBACK_DAYS};
use anyhow::Result;
use chrono::Utc;
use log::info;
use serde_json::json;

pub async fn run(app: &AppContext) -> Result<()> {
    info!("Received detect-lessons command");

    let db = app.database().await?;
    let mut outcomes = db.get_closed_outcomes().await?;
    if outcomes.len() < MIN_POPULATION {
        info!(
            "Only {} closed trade(s) available; detection needs at least {}",
            outcomes.len(),
            MIN_POPULATION
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "lessonsAdded": 0,
                "closedTrades": outcomes.len(),
            }))?
        );
        return Ok(());
    }

    for outcome in &mut outcomes {
        let prior = db
            .get_prices_before(&outcome.symbol, outcome.pick_date, TREND_LOOKBACK_DAYS)
            .await?;
        outcome.entry_trend = classify_trend(&prior, outcome.entry_price);
    }

    let today = Utc::now().date_naive();
    let lessons = LessonDetector::detect(&outcomes, today);
    for lesson in &lessons {
        db.upsert_lesson(lesson).await?;
        info!(
            "Lesson [{}] ({:.0}% confidence): {}",
            lesson.lesson_type.as_str(),
            lesson.confidence,
            lesson.text
        );
    }

    db.persist_event(
        "LessonDetector",
        "info",
        "Lesson detection completed",
        json!({
            "lessonDate": today,
            "closedTrades": outcomes.len(),
            "lessonsAdded": lessons.len(),
        }),
    )
    .await;

    let document = json!({
        "lessonDate": today,
        "closedTrades": outcomes.len(),
        "lessonsAdded": lessons.len(),
        "types": lessons
            .iter()
            .map(|l| l.lesson_type.as_str())
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
