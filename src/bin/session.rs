//! Inspect and manage the locally stored anonymous session.
//!
//! ```text
//! study-relay-session show
//! study-relay-session ensure
//! study-relay-session bind <account-id>
//! study-relay-session clear
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use study_relay::config::AppConfig;
use study_relay::identity::{FileStorage, Session, SessionIdentity};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage the local anonymous session", long_about = None)]
struct Args {
    /// Session file; defaults to `identity.storage_path`
    #[arg(long, env = "SESSION_FILE")]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored session, if any
    Show,
    /// Print the stored session, creating one if none exists
    Ensure,
    /// Attach an authenticated account to the session
    Bind { account_id: String },
    /// Forget the stored session
    Clear,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    study_relay::telemetry::init();

    let args = Args::parse();
    // Defaults, config file and RELAY_* environment; this binary's own flags
    // are parsed above.
    let config = AppConfig::load_from_args(["study-relay"])
        .context("Failed to load configuration")?;

    let path = args
        .file
        .unwrap_or_else(|| PathBuf::from(&config.identity.storage_path));
    let identity = SessionIdentity::with_key(FileStorage::new(path), config.identity.storage_key);

    match args.command {
        Command::Show => match identity.load().await {
            Some(session) => print_session(&session)?,
            None => println!("no session"),
        },
        Command::Ensure => print_session(&identity.get_or_create().await)?,
        Command::Bind { account_id } => print_session(&identity.bind(account_id).await)?,
        Command::Clear => {
            identity.clear().await;
            println!("cleared");
        }
    }
    Ok(())
}

fn print_session(session: &Session) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(session)?);
    Ok(())
}
