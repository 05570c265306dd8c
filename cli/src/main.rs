mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    SignupAnswers, cmd_add, cmd_delete, cmd_delete_account, cmd_profile, cmd_progress,
    cmd_set_active, cmd_signup, cmd_today,
};
use crate::config::Config;
use portion_core::service::TrackerService;

#[derive(Parser)]
#[command(
    name = "portion",
    version,
    about = "A small calorie tracker",
    long_about = "A small calorie tracker.\n\n\
                  Sign up once, log what you eat, and watch the daily totals add up."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account by walking through the three onboarding steps
    Signup {
        /// Goal: lose, gain, or maintain
        #[arg(long)]
        goal: Option<String>,
        /// Current body weight
        #[arg(long)]
        current_weight: Option<String>,
        /// Target body weight
        #[arg(long)]
        target_weight: Option<String>,
        /// Username for the new account
        #[arg(short, long)]
        username: Option<String>,
        /// Password (prompted twice when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log a food entry
    Add {
        /// Food name
        name: String,
        /// Weight in grams
        grams: String,
        /// Calories (leave out if unknown)
        #[arg(short, long)]
        calories: Option<String>,
        /// Account to log for
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a food entry by ID
    Delete {
        /// Entry ID to delete
        entry_id: i64,
        /// Account the entry belongs to
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the day's entries, total, and remaining calories
    Today {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily calorie totals and the weight goal
    Progress {
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the profile (goal, calorie target, weights)
    Profile {
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an account with its profile and food log
    DeleteAccount {
        #[arg(short, long)]
        user: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop an account from logging in
    Deactivate {
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Allow a deactivated account to log in again
    Activate {
        #[arg(short, long)]
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    init_tracing(default_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = TrackerService::new(&config.db_path)?;

    match cli.command {
        Commands::Signup {
            goal,
            current_weight,
            target_weight,
            username,
            password,
            json,
        } => cmd_signup(
            &svc,
            SignupAnswers {
                goal,
                current_weight,
                target_weight,
                username,
                password,
            },
            json,
        ),
        Commands::Add {
            name,
            grams,
            calories,
            user,
            json,
        } => cmd_add(&svc, &user, name, grams, calories, json),
        Commands::Delete {
            entry_id,
            user,
            json,
        } => cmd_delete(&svc, &user, entry_id, json),
        Commands::Today { date, user, json } => cmd_today(&svc, &user, date, json),
        Commands::Progress { user, json } => cmd_progress(&svc, &user, json),
        Commands::Profile { user, json } => cmd_profile(&svc, &user, json),
        Commands::DeleteAccount { user, yes, json } => {
            cmd_delete_account(&svc, &user, yes, json)
        }
        Commands::Deactivate { user, json } => cmd_set_active(&svc, &user, false, json),
        Commands::Activate { user, json } => cmd_set_active(&svc, &user, true, json),
        Commands::Serve { port, bind } => server::start_server(svc, port, &bind).await,
    }
}
