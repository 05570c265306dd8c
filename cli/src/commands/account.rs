use anyhow::{Result, bail};
use std::io;

use portion_core::service::TrackerService;

use super::helpers::{prompt_line, require_user};

pub(crate) fn cmd_delete_account(
    svc: &TrackerService,
    username: &str,
    yes: bool,
    json: bool,
) -> Result<()> {
    let user = require_user(svc, username, json)?;

    if !yes {
        let answer = prompt_line(
            &mut io::stdin().lock(),
            &format!("Delete '{username}' and every logged entry? Type the username to confirm: "),
        )?;
        if answer != user.username {
            bail!("Confirmation did not match; nothing was deleted");
        }
    }

    svc.delete_account(user.id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": user.username }));
    } else {
        println!("Deleted account '{}'", user.username);
    }
    Ok(())
}

/// Turn login on or off for an account without touching its data.
pub(crate) fn cmd_set_active(
    svc: &TrackerService,
    username: &str,
    active: bool,
    json: bool,
) -> Result<()> {
    let user = require_user(svc, username, json)?;
    svc.set_account_active(user.id, active)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "username": user.username, "active": active })
        );
    } else if active {
        println!("Activated account '{}'", user.username);
    } else {
        println!("Deactivated account '{}'; it can no longer log in", user.username);
    }
    Ok(())
}
