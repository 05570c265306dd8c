//! Calorie aggregation over food entries.
//!
//! Both functions are pure: date filtering and ordering of the input are the
//! store's business, these only sum.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{FoodEntry, ProgressPoint};

/// Total calories across `entries`; entries without a calorie value count as zero.
pub fn daily_total(entries: &[FoodEntry]) -> f64 {
    entries.iter().filter_map(|e| e.calories).sum()
}

/// One point per calendar date that has at least one entry, oldest first.
///
/// Days without entries are not filled in, so consumers must not assume the
/// series is continuous.
pub fn build_series(entries: &[FoodEntry]) -> Vec<ProgressPoint> {
    entries
        .iter()
        .fold(BTreeMap::<NaiveDate, f64>::new(), |mut totals, entry| {
            *totals.entry(entry.date()).or_insert(0.0) += entry.calories.unwrap_or(0.0);
            totals
        })
        .into_iter()
        .map(|(date, calories)| ProgressPoint { date, calories })
        .collect()
}
