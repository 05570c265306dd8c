mod account;
mod food;
mod helpers;
mod signup;
mod summary;

pub(crate) use account::{cmd_delete_account, cmd_set_active};
pub(crate) use food::{cmd_add, cmd_delete};
pub(crate) use signup::{SignupAnswers, cmd_signup};
pub(crate) use summary::{cmd_profile, cmd_progress, cmd_today};
