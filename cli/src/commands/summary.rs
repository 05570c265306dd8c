use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use portion_core::service::TrackerService;

use super::helpers::{format_calories, no_neg_zero, parse_date, require_user, truncate};

pub(crate) fn cmd_today(
    svc: &TrackerService,
    username: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Food")]
        name: String,
        #[tabled(rename = "Grams")]
        grams: String,
        #[tabled(rename = "Calories")]
        calories: String,
    }

    let user = require_user(svc, username, json)?;
    let date = parse_date(date)?;
    let dashboard = svc.dashboard(user.id, date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&dashboard)?);
        return Ok(());
    }

    if dashboard.today_entries.is_empty() {
        let date = &dashboard.date;
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    let date = &dashboard.date;
    println!("=== {date} ===\n");

    let rows: Vec<EntryRow> = dashboard
        .today_entries
        .iter()
        .map(|e| EntryRow {
            id: e.id,
            time: e.timestamp.format("%H:%M").to_string(),
            name: truncate(&e.name, 35),
            grams: format!("{:.0}", e.grams),
            calories: format_calories(e.calories),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let total = no_neg_zero(dashboard.calories_consumed_today);
    println!("\n  TOTAL: {total:.0} kcal");
    if let (Some(goal), Some(remaining)) = (
        dashboard.profile.daily_calorie_goal,
        dashboard.calories_remaining,
    ) {
        let remaining = no_neg_zero(remaining);
        println!("  GOAL: {goal} kcal");
        println!("  REMAINING: {remaining:.0} kcal");
    }

    Ok(())
}

pub(crate) fn cmd_progress(svc: &TrackerService, username: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct ProgressRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
    }

    let user = require_user(svc, username, json)?;
    let report = svc.progress(user.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let trend = &report.weight_trend;
    match (trend.start_weight, trend.target_weight) {
        (Some(start), Some(target)) => {
            let by = trend
                .target_date
                .map(|d| format!(" by {}", d.format("%Y-%m-%d")))
                .unwrap_or_default();
            println!("Weight: {start:.1} -> {target:.1}{by}\n");
        }
        _ => println!("Weight: not set\n"),
    }

    let series = &report.calorie_data;
    if series.dates.is_empty() {
        eprintln!("No entries logged yet");
        process::exit(2);
    }

    let rows: Vec<ProgressRow> = series
        .dates
        .iter()
        .zip(&series.calories)
        .map(|(date, calories)| ProgressRow {
            date: date.clone(),
            calories: format!("{:.0}", no_neg_zero(*calories)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_profile(svc: &TrackerService, username: &str, json: bool) -> Result<()> {
    let user = require_user(svc, username, json)?;
    let profile = svc.get_or_create_profile(user.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    let weight = |w: Option<f64>| w.map_or_else(|| "-".to_string(), |w| format!("{w:.1}"));
    println!("User:           {}", user.username);
    println!("Goal:           {}", profile.goal_type.label());
    println!(
        "Daily calories: {}",
        profile
            .daily_calorie_goal
            .map_or_else(|| "-".to_string(), |g| g.to_string())
    );
    println!("Current weight: {}", weight(profile.current_weight));
    println!("Target weight:  {}", weight(profile.target_weight));
    if let Some(date) = profile.target_date {
        println!("Target date:    {}", date.format("%Y-%m-%d"));
    }

    Ok(())
}
