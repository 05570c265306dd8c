use anyhow::Result;
use std::process;

use portion_core::models::FoodForm;
use portion_core::service::TrackerService;

use super::helpers::{format_calories, json_error, require_user};

pub(crate) fn cmd_add(
    svc: &TrackerService,
    username: &str,
    name: String,
    grams: String,
    calories: Option<String>,
    json: bool,
) -> Result<()> {
    let user = require_user(svc, username, json)?;
    let form = FoodForm {
        name: Some(name),
        grams: Some(grams),
        calories,
    };

    let entry = svc.add_food(user.id, &form)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        let id = entry.id;
        let kcal = format_calories(entry.calories);
        println!(
            "Logged [{id}] {} ({:.0}g, {kcal} kcal) at {}",
            entry.name,
            entry.grams,
            entry.timestamp.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

pub(crate) fn cmd_delete(
    svc: &TrackerService,
    username: &str,
    entry_id: i64,
    json: bool,
) -> Result<()> {
    let user = require_user(svc, username, json)?;

    match svc.delete_food(user.id, entry_id) {
        Ok(()) => {
            if json {
                println!("{}", serde_json::json!({ "deleted": entry_id }));
            } else {
                println!("Deleted entry {entry_id}");
            }
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
            }
            process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
