//! The three-step signup wizard.
//!
//! [`advance`] is a pure function of the current [`OnboardingState`] and the
//! submitted [`OnboardingForm`]. It never touches storage: creating the account
//! is requested through [`Transition::Finalize`] and carried out by
//! [`crate::service::TrackerService::onboard`].

use serde::{Deserialize, Serialize};

use crate::auth::{Credentials, validate_new_account};
use crate::models::{GoalType, ProfileDraft, parse_number};

/// Message shown when step 3 is reached without the data from steps 1 and 2.
pub const RESTART_MESSAGE: &str = "Your signup details were lost. Please start again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    #[default]
    ChooseGoal,
    EnterWeights,
    CreateAccount,
}

impl Step {
    pub fn number(self) -> u8 {
        match self {
            Self::ChooseGoal => 1,
            Self::EnterWeights => 2,
            Self::CreateAccount => 3,
        }
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step.number()
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ChooseGoal),
            2 => Ok(Self::EnterWeights),
            3 => Ok(Self::CreateAccount),
            other => Err(format!("onboarding step must be 1-3, got {other}")),
        }
    }
}

/// Wizard progress kept in the session between requests.
///
/// Every field has a default, so a session without stored progress starts
/// over at step 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingState {
    pub step: Step,
    pub goal_type: Option<GoalType>,
    pub current_weight: Option<f64>,
    pub target_weight: Option<f64>,
}

impl OnboardingState {
    pub fn is_pristine(&self) -> bool {
        *self == Self::default()
    }

    /// The profile collected so far, if steps 1 and 2 are both complete.
    pub fn profile_draft(&self) -> Option<ProfileDraft> {
        Some(ProfileDraft::new(
            self.goal_type?,
            self.current_weight?,
            self.target_weight?,
        ))
    }
}

/// Every field any step may submit. Each step reads only its own fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OnboardingForm {
    pub goal_type: Option<String>,
    pub current_weight: Option<String>,
    pub target_weight: Option<String>,
    pub username: Option<String>,
    pub password1: Option<String>,
    pub password2: Option<String>,
}

impl OnboardingForm {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone().unwrap_or_default(),
            password1: self.password1.clone().unwrap_or_default(),
            password2: self.password2.clone().unwrap_or_default(),
        }
    }
}

/// An account to create together with its populated profile.
#[derive(Debug, Clone)]
pub struct AccountRequest {
    pub credentials: Credentials,
    pub profile: ProfileDraft,
}

#[derive(Debug, Clone)]
pub enum Transition {
    /// Redisplay the step held in `state`, with any validation messages.
    Stay {
        state: OnboardingState,
        errors: Vec<String>,
    },
    Advance(OnboardingState),
    Finalize(AccountRequest),
}

pub fn advance(state: &OnboardingState, form: &OnboardingForm) -> Transition {
    match state.step {
        Step::ChooseGoal => choose_goal(state, form),
        Step::EnterWeights => enter_weights(state, form),
        Step::CreateAccount => create_account(state, form),
    }
}

fn stay(state: &OnboardingState, errors: Vec<String>) -> Transition {
    Transition::Stay {
        state: state.clone(),
        errors,
    }
}

fn choose_goal(state: &OnboardingState, form: &OnboardingForm) -> Transition {
    match form.goal_type.as_deref().map(str::parse::<GoalType>) {
        Some(Ok(goal_type)) => Transition::Advance(OnboardingState {
            step: Step::EnterWeights,
            goal_type: Some(goal_type),
            ..state.clone()
        }),
        _ => stay(state, Vec::new()),
    }
}

fn enter_weights(state: &OnboardingState, form: &OnboardingForm) -> Transition {
    let current = parse_weight("Current weight", form.current_weight.as_deref());
    let target = parse_weight("Target weight", form.target_weight.as_deref());

    match (current, target) {
        (Ok(current_weight), Ok(target_weight)) => Transition::Advance(OnboardingState {
            step: Step::CreateAccount,
            current_weight: Some(current_weight),
            target_weight: Some(target_weight),
            ..state.clone()
        }),
        (current, target) => {
            let errors = [current.err(), target.err()].into_iter().flatten().collect();
            stay(state, errors)
        }
    }
}

fn parse_weight(label: &str, raw: Option<&str>) -> Result<f64, String> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty());
    let Some(raw) = raw else {
        return Err(format!("{label} is required."));
    };
    match parse_number(raw) {
        Some(w) if w > 0.0 => Ok(w),
        Some(_) => Err(format!("{label} must be greater than 0.")),
        None => Err(format!("{label} must be a number.")),
    }
}

fn create_account(state: &OnboardingState, form: &OnboardingForm) -> Transition {
    let Some(profile) = state.profile_draft() else {
        return Transition::Stay {
            state: OnboardingState::default(),
            errors: vec![RESTART_MESSAGE.to_string()],
        };
    };

    let credentials = form.credentials();
    let errors = validate_new_account(&credentials);
    if !errors.is_empty() {
        return stay(state, errors);
    }

    Transition::Finalize(AccountRequest {
        credentials,
        profile,
    })
}
