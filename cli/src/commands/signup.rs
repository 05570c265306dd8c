use anyhow::{Result, bail};
use std::io::{self, BufRead};

use portion_core::models::{GOAL_CHOICES, Profile, User};
use portion_core::onboarding::{OnboardingForm, OnboardingState, Step};
use portion_core::service::{OnboardingOutcome, TrackerService};
use portion_core::session::SessionData;

use super::helpers::prompt_line;

/// Answers given on the command line. Anything missing or rejected is prompted for.
#[derive(Default)]
pub(crate) struct SignupAnswers {
    pub goal: Option<String>,
    pub current_weight: Option<String>,
    pub target_weight: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub(crate) fn cmd_signup(svc: &TrackerService, answers: SignupAnswers, json: bool) -> Result<()> {
    let stdin = io::stdin();
    let (user, profile) = run_signup(svc, &mut stdin.lock(), answers)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "user": user, "profile": profile }))?
        );
    } else {
        let goal = profile.goal_type.label();
        let kcal = profile.daily_calorie_goal.unwrap_or_default();
        println!("Welcome, {}! Goal: {goal}, {kcal} kcal per day.", user.username);
    }
    Ok(())
}

fn run_signup(
    svc: &TrackerService,
    input: &mut impl BufRead,
    mut answers: SignupAnswers,
) -> Result<(User, Profile)> {
    let mut session = SessionData::default();

    loop {
        let step = session.onboarding.step;
        let form = next_form(input, &session.onboarding, &mut answers)?;

        match svc.onboard(&mut session, &form)? {
            OnboardingOutcome::Completed { user, profile } => return Ok((user, profile)),
            OnboardingOutcome::AlreadyAuthenticated => bail!("Session is already signed in"),
            OnboardingOutcome::InProgress { state, errors } => {
                if state.step == step && errors.is_empty() {
                    eprintln!("  Choose one of: lose, gain, maintain");
                }
                for error in errors {
                    eprintln!("  {error}");
                }
            }
        }
    }
}

fn next_form(
    input: &mut impl BufRead,
    state: &OnboardingState,
    answers: &mut SignupAnswers,
) -> Result<OnboardingForm> {
    let mut ask = |given: Option<String>, label: &str| match given {
        Some(value) => Ok(value),
        None => prompt_line(input, label),
    };

    let form = match state.step {
        Step::ChooseGoal => {
            if answers.goal.is_none() {
                eprintln!("Step 1 of 3: what is your goal?");
                for (goal, label) in GOAL_CHOICES {
                    eprintln!("  {:<9} {label}", goal.as_str());
                }
            }
            OnboardingForm {
                goal_type: Some(ask(answers.goal.take(), "Goal: ")?),
                ..OnboardingForm::default()
            }
        }
        Step::EnterWeights => OnboardingForm {
            current_weight: Some(ask(answers.current_weight.take(), "Current weight: ")?),
            target_weight: Some(ask(answers.target_weight.take(), "Target weight: ")?),
            ..OnboardingForm::default()
        },
        Step::CreateAccount => {
            let username = ask(answers.username.take(), "Username: ")?;
            let (password1, password2) = match answers.password.take() {
                Some(password) => (password.clone(), password),
                None => (
                    ask(None, "Password: ")?,
                    ask(None, "Confirm password: ")?,
                ),
            };
            OnboardingForm {
                username: Some(username),
                password1: Some(password1),
                password2: Some(password2),
                ..OnboardingForm::default()
            }
        }
    };
    Ok(form)
}
