use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Response header value telling the presentation layer to refresh the meal list.
pub const MEAL_LIST_UPDATED: &str = "meal-list-updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalType {
    Lose,
    Gain,
    #[default]
    Maintain,
}

/// `(value, label)` pairs offered on the first onboarding step.
pub const GOAL_CHOICES: &[(GoalType, &str)] = &[
    (GoalType::Lose, "Lose Weight"),
    (GoalType::Gain, "Gain Weight"),
    (GoalType::Maintain, "Maintain Weight"),
];

impl GoalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lose => "lose",
            Self::Gain => "gain",
            Self::Maintain => "maintain",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Lose => "Lose Weight",
            Self::Gain => "Gain Weight",
            Self::Maintain => "Maintain Weight",
        }
    }
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalType {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lose" => Ok(Self::Lose),
            "gain" => Ok(Self::Gain),
            "maintain" => Ok(Self::Maintain),
            other => Err(TrackerError::Validation(format!(
                "Invalid goal type '{other}'. Must be one of: lose, gain, maintain"
            ))),
        }
    }
}

/// Fixed daily calorie target for a goal.
///
/// This is a flat table, not a BMR/TDEE estimate: callers must not treat the
/// result as physiologically meaningful.
pub fn calculate_calorie_goal(goal_type: GoalType) -> i64 {
    match goal_type {
        GoalType::Lose => 1500,
        GoalType::Gain => 2500,
        GoalType::Maintain => 2000,
    }
}

/// Same table keyed by raw text; anything unrecognised gets the maintenance goal.
pub fn resolve_calorie_goal(goal_type: &str) -> i64 {
    goal_type
        .parse::<GoalType>()
        .map_or(2000, calculate_calorie_goal)
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub current_weight: Option<f64>,
    pub target_weight: Option<f64>,
    pub target_date: Option<NaiveDate>,
    pub daily_calorie_goal: Option<i64>,
    pub goal_type: GoalType,
}

/// Profile fields collected during onboarding, ready to be written in one go.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDraft {
    pub goal_type: GoalType,
    pub current_weight: f64,
    pub target_weight: f64,
    pub daily_calorie_goal: i64,
}

impl ProfileDraft {
    pub fn new(goal_type: GoalType, current_weight: f64, target_weight: f64) -> Self {
        Self {
            goal_type,
            current_weight,
            target_weight,
            daily_calorie_goal: calculate_calorie_goal(goal_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodEntry {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub grams: f64,
    pub calories: Option<f64>,
    pub timestamp: DateTime<FixedOffset>,
}

impl FoodEntry {
    /// Calendar date of the entry, in the offset it was recorded with.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFoodEntry {
    pub name: String,
    pub grams: f64,
    pub calories: Option<f64>,
}

/// Raw add-food form fields, exactly as submitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FoodForm {
    pub name: Option<String>,
    pub grams: Option<String>,
    pub calories: Option<String>,
}

impl FoodForm {
    /// Validate and parse the form into an insertable entry.
    ///
    /// `name` and `grams` are required; an empty `calories` field means "unknown".
    pub fn parse(&self) -> Result<NewFoodEntry, TrackerError> {
        let name = non_blank(self.name.as_deref());
        let grams = non_blank(self.grams.as_deref());
        let (Some(name), Some(grams)) = (name, grams) else {
            return Err(TrackerError::Validation(
                "Food name and grams are required.".to_string(),
            ));
        };

        let invalid =
            || TrackerError::Validation("Invalid input for grams or calories.".to_string());
        let grams = parse_number(grams).ok_or_else(invalid)?;
        let calories = match non_blank(self.calories.as_deref()) {
            Some(raw) => Some(parse_number(raw).ok_or_else(invalid)?),
            None => None,
        };

        validate_food_entry(name, grams, calories)?;
        Ok(NewFoodEntry {
            name: name.to_string(),
            grams,
            calories,
        })
    }
}

pub fn validate_food_entry(
    name: &str,
    grams: f64,
    calories: Option<f64>,
) -> Result<(), TrackerError> {
    if name.trim().is_empty() {
        return Err(TrackerError::Validation("Food name must not be empty".to_string()));
    }
    if name.chars().count() > 255 {
        return Err(TrackerError::Validation(
            "Food name must be at most 255 characters".to_string(),
        ));
    }
    if grams <= 0.0 {
        return Err(TrackerError::Validation("grams must be greater than 0".to_string()));
    }
    if calories.is_some_and(|c| c < 0.0) {
        return Err(TrackerError::Validation("calories must not be negative".to_string()));
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a finite decimal number; `NaN` and infinities are rejected.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressPoint {
    pub date: NaiveDate,
    pub calories: f64,
}

/// Chart payload: parallel arrays of ISO dates and totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalorieSeries {
    pub dates: Vec<String>,
    pub calories: Vec<f64>,
}

impl From<&[ProgressPoint]> for CalorieSeries {
    fn from(points: &[ProgressPoint]) -> Self {
        Self {
            dates: points
                .iter()
                .map(|p| p.date.format("%Y-%m-%d").to_string())
                .collect(),
            calories: points.iter().map(|p| p.calories).collect(),
        }
    }
}

/// Two-point weight chart: where the user started and where they want to be.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightTrend {
    pub start_weight: Option<f64>,
    pub target_weight: Option<f64>,
    pub target_date: Option<NaiveDate>,
}

impl From<&Profile> for WeightTrend {
    fn from(profile: &Profile) -> Self {
        Self {
            start_weight: profile.current_weight,
            target_weight: profile.target_weight,
            target_date: profile.target_date,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub date: String,
    pub profile: Profile,
    pub today_entries: Vec<FoodEntry>,
    pub calories_consumed_today: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories_remaining: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub profile: Profile,
    pub calorie_data: CalorieSeries,
    pub weight_trend: WeightTrend,
}
