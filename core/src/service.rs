use std::path::Path;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password};
use crate::db::{Database, is_constraint_violation};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{
    CalorieSeries, Dashboard, FoodEntry, FoodForm, Profile, ProgressReport, User, WeightTrend,
};
use crate::onboarding::{self, AccountRequest, OnboardingForm, OnboardingState, Transition};
use crate::progress::{build_series, daily_total};
use crate::session::{SessionData, new_token, token_digest};

pub const USERNAME_TAKEN: &str = "A user with that username already exists.";

/// Result of a request against the onboarding wizard.
#[derive(Debug, Clone)]
pub enum OnboardingOutcome {
    /// The session already belongs to an active account; go to the dashboard.
    AlreadyAuthenticated,
    /// Show `state.step`, with any validation messages.
    InProgress {
        state: OnboardingState,
        errors: Vec<String>,
    },
    /// Account and profile were created and the session is now logged in.
    Completed { user: User, profile: Profile },
}

fn username_taken(state: &OnboardingState) -> OnboardingOutcome {
    OnboardingOutcome::InProgress {
        state: state.clone(),
        errors: vec![USERNAME_TAKEN.to_string()],
    }
}

pub struct TrackerService {
    db: Database,
}

impl TrackerService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Sessions ---

    /// Load the session for `token`, or start a new (unsaved) one.
    pub fn open_session(&self, token: Option<&str>) -> Result<(String, SessionData)> {
        if let Some(token) = token {
            if let Some(data) = self.db.load_session(&token_digest(token))? {
                return Ok((token.to_string(), data));
            }
        }
        Ok((new_token(), SessionData::default()))
    }

    pub fn save_session(&self, token: &str, data: &SessionData) -> Result<()> {
        self.db.save_session(&token_digest(token), data)
    }

    pub fn end_session(&self, token: &str) -> Result<()> {
        self.db.delete_session(&token_digest(token))?;
        Ok(())
    }

    /// Move the session to a fresh token and forget the old one.
    ///
    /// A token issued before login must never be the one that ends up authenticated.
    pub fn cycle_session(&self, old_token: &str, data: &SessionData) -> Result<String> {
        let token = new_token();
        self.db.delete_session(&token_digest(old_token))?;
        self.db.save_session(&token_digest(&token), data)?;
        Ok(token)
    }

    /// Forget sessions idle for longer than `max_age`.
    pub fn purge_stale_sessions(&self, max_age: chrono::Duration) -> Result<usize> {
        let purged = self.db.purge_sessions_before(Utc::now() - max_age)?;
        if purged > 0 {
            info!(purged, "purged stale sessions");
        }
        Ok(purged)
    }

    /// The active account the session is logged in as, if any.
    pub fn authenticated_user(&self, session: &SessionData) -> Result<Option<User>> {
        let Some(user_id) = session.user_id else {
            return Ok(None);
        };
        Ok(self.db.get_user(user_id)?.filter(|u| u.is_active))
    }

    // --- Accounts ---

    pub fn login(
        &self,
        session: &mut SessionData,
        username: &str,
        password: &str,
    ) -> TrackerResult<User> {
        let user = self
            .db
            .get_user_by_username(username.trim())?
            .filter(|u| u.is_active && verify_password(password, &u.password_hash))
            .ok_or(TrackerError::Unauthorized)?;
        session.user_id = Some(user.id);
        info!(user_id = user.id, "user logged in");
        Ok(user)
    }

    pub fn find_user(&self, username: &str) -> TrackerResult<User> {
        self.db
            .get_user_by_username(username)?
            .ok_or_else(|| TrackerError::NotFound(format!("User '{username}' not found")))
    }

    /// Enable or disable an account. Inactive accounts cannot log in and their
    /// sessions stop counting as authenticated.
    pub fn set_account_active(&self, user_id: i64, active: bool) -> TrackerResult<()> {
        if self.db.set_user_active(user_id, active)? {
            info!(user_id, active, "account status changed");
            Ok(())
        } else {
            Err(TrackerError::NotFound(format!("User {user_id} not found")))
        }
    }

    /// Remove the account along with its profile and food log.
    pub fn delete_account(&self, user_id: i64) -> TrackerResult<()> {
        if self.db.delete_user(user_id)? {
            info!(user_id, "account deleted");
            Ok(())
        } else {
            Err(TrackerError::NotFound(format!("User {user_id} not found")))
        }
    }

    // --- Onboarding ---

    /// Where the session currently stands, without submitting anything.
    pub fn onboarding_status(&self, session: &SessionData) -> TrackerResult<OnboardingOutcome> {
        if self.authenticated_user(session)?.is_some() {
            return Ok(OnboardingOutcome::AlreadyAuthenticated);
        }
        Ok(OnboardingOutcome::InProgress {
            state: session.onboarding.clone(),
            errors: Vec::new(),
        })
    }

    /// Apply one submitted wizard step to the session.
    pub fn onboard(
        &self,
        session: &mut SessionData,
        form: &OnboardingForm,
    ) -> TrackerResult<OnboardingOutcome> {
        if self.authenticated_user(session)?.is_some() {
            return Ok(OnboardingOutcome::AlreadyAuthenticated);
        }

        match onboarding::advance(&session.onboarding, form) {
            Transition::Stay { state, errors } => {
                session.onboarding = state.clone();
                Ok(OnboardingOutcome::InProgress { state, errors })
            }
            Transition::Advance(state) => {
                session.onboarding = state.clone();
                Ok(OnboardingOutcome::InProgress {
                    state,
                    errors: Vec::new(),
                })
            }
            Transition::Finalize(request) => self.finalize(session, &request),
        }
    }

    fn finalize(
        &self,
        session: &mut SessionData,
        request: &AccountRequest,
    ) -> TrackerResult<OnboardingOutcome> {
        let username = request.credentials.username.trim();
        if self.db.get_user_by_username(username)?.is_some() {
            return Ok(username_taken(&session.onboarding));
        }

        let password_hash = hash_password(&request.credentials.password1)?;
        match self
            .db
            .create_account_with_profile(username, &password_hash, &request.profile)
        {
            Ok((user, profile)) => {
                info!(
                    user_id = user.id,
                    goal_type = %profile.goal_type,
                    "onboarding completed"
                );
                session.onboarding = OnboardingState::default();
                session.user_id = Some(user.id);
                Ok(OnboardingOutcome::Completed { user, profile })
            }
            Err(err)
                if is_constraint_violation(&err)
                    && self.db.get_user_by_username(username)?.is_some() =>
            {
                Ok(username_taken(&session.onboarding))
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "onboarding finalization rolled back");
                Err(TrackerError::Finalization(
                    "please try again in a moment".to_string(),
                ))
            }
        }
    }

    // --- Profiles ---

    pub fn get_or_create_profile(&self, user_id: i64) -> TrackerResult<Profile> {
        Ok(self.db.get_or_create_profile(user_id)?)
    }

    // --- Food entries ---

    pub fn add_food(&self, user_id: i64, form: &FoodForm) -> TrackerResult<FoodEntry> {
        let entry = form.parse()?;
        Ok(self.db.insert_food_entry(user_id, &entry)?)
    }

    /// Delete one of the user's own entries. Other users' entries are reported
    /// as not found.
    pub fn delete_food(&self, user_id: i64, entry_id: i64) -> TrackerResult<()> {
        if self.db.delete_food_entry(user_id, entry_id)? {
            info!(user_id, entry_id, "food entry deleted");
            Ok(())
        } else {
            Err(TrackerError::NotFound(format!("Food entry {entry_id} not found")))
        }
    }

    pub fn entries_for_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> TrackerResult<Vec<FoodEntry>> {
        Ok(self.db.get_entries_for_date(user_id, date)?)
    }

    pub fn all_entries(&self, user_id: i64) -> TrackerResult<Vec<FoodEntry>> {
        Ok(self.db.get_all_entries(user_id)?)
    }

    // --- Views ---

    #[allow(clippy::cast_precision_loss)]
    pub fn dashboard(&self, user_id: i64, today: NaiveDate) -> TrackerResult<Dashboard> {
        let profile = self.db.get_or_create_profile(user_id)?;
        let today_entries = self.db.get_entries_for_date(user_id, today)?;
        let calories_consumed_today = daily_total(&today_entries);
        let calories_remaining = profile
            .daily_calorie_goal
            .map(|goal| goal as f64 - calories_consumed_today);

        Ok(Dashboard {
            date: today.format("%Y-%m-%d").to_string(),
            profile,
            today_entries,
            calories_consumed_today,
            calories_remaining,
        })
    }

    pub fn progress(&self, user_id: i64) -> TrackerResult<ProgressReport> {
        let profile = self.db.get_or_create_profile(user_id)?;
        let entries = self.db.get_all_entries(user_id)?;
        let points = build_series(&entries);

        Ok(ProgressReport {
            weight_trend: WeightTrend::from(&profile),
            calorie_data: CalorieSeries::from(points.as_slice()),
            profile,
        })
    }
}
