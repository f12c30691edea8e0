//! Interactive moderation console.
//!
//! Signs in with a refresh token, waits for the admin claim check, then
//! shows the live roster and lets the operator toggle accounts.
//!
//! # Commands
//!
//! - `list` - Print the roster
//! - `toggle <uid>` - Flip an account's `disabled` flag
//! - `status` - Print the session state
//! - `quit` - Sign out and exit
//!
//! # Environment Variables
//!
//! - `ADMIN_DATABASE_URL` (or `DATABASE_URL`) - roster source
//! - `IDENTITY_BASE_URL`, `IDENTITY_API_KEY` - secure token service
//! - `IDENTITY_TOKEN_SECRET`, `IDENTITY_ISSUER` - ID token verification
//! - `ADMIN_BACKEND_URL` - privileged backend
//! - `IDENTITY_REFRESH_TOKEN` - the operator's refresh token

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use starboard_admin::backend::HttpPrivilegedBackend;
use starboard_admin::config::ConsoleConfig;
use starboard_admin::db::{self, PgDocumentStore};
use starboard_admin::identity::SecureTokenClient;
use starboard_admin::session::{AdminSessionController, MutationOutcome};
use starboard_admin::store::ModerationStore;
use starboard_core::{UserId, UserRecord};

/// Run the console until `quit` or end of input.
///
/// # Errors
///
/// Returns an error if configuration is missing, the database is unreachable,
/// sign-in fails, or stdin cannot be read.
pub async fn console() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConsoleConfig::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    let identity = Arc::new(SecureTokenClient::from_config(&config));
    let controller = AdminSessionController::new(
        identity.clone(),
        ModerationStore::new(Arc::new(PgDocumentStore::new(pool))),
        Arc::new(HttpPrivilegedBackend::new(config.backend_url.clone())),
    );
    let attached = controller.attach();
    let reporter = tokio::spawn(report_state(controller.clone()));

    let principal = identity.sign_in_with_refresh_token(config.refresh_token.clone()).await?;
    info!(uid = %principal.uid, "signed in");
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (None, _) => {}
            (Some("list"), _) => print_roster(&controller.roster()),
            (Some("toggle"), Some(uid)) => toggle(&controller, uid),
            (Some("status"), _) => {
                #[allow(clippy::print_stdout)]
                {
                    println!("session: {}", controller.state());
                }
            }
            (Some("quit" | "exit"), _) => break,
            _ => print_help(),
        }
    }

    identity.sign_out();
    attached.abort();
    reporter.abort();
    info!("signed out");
    Ok(())
}

fn toggle(controller: &AdminSessionController, uid: &str) {
    match controller.toggle_disabled(&UserId::new(uid)) {
        Ok(pending) => {
            #[allow(clippy::print_stdout)]
            {
                println!("{uid}: disabled = {} (pending)", pending.disabled());
            }
            tokio::spawn(async move {
                let target = pending.target().clone();
                match pending.outcome().await {
                    MutationOutcome::Confirmed => info!(uid = %target, "change confirmed"),
                    MutationOutcome::RolledBack { error } => {
                        warn!(uid = %target, error = %error, "change rolled back");
                    }
                    MutationOutcome::Cancelled => info!(uid = %target, "change cancelled"),
                }
            });
        }
        Err(e) => warn!(error = %e, "toggle refused"),
    }
}

/// Log session state transitions.
async fn report_state(controller: AdminSessionController) {
    let mut changes = controller.changes();
    let mut last = controller.state();
    while changes.changed().await.is_ok() {
        let state = controller.state();
        if state != last {
            info!(state = %state, "session state changed");
            last = state;
        }
    }
}

#[allow(clippy::print_stdout)]
fn print_roster(roster: &[UserRecord]) {
    if roster.is_empty() {
        println!("(no records)");
        return;
    }

    println!(
        "{:<20} {:<32} {:<11} {:<13} {:<9} admin",
        "uid", "email", "status", "plan", "disabled"
    );
    for record in roster {
        println!(
            "{:<20} {:<32} {:<11} {:<13} {:<9} {}",
            record.uid.as_str(),
            record.email.as_str(),
            record.subscription_status.as_str(),
            record.plan.map_or("-", |p| p.as_str()),
            record.disabled,
            if record.is_admin { "yes" } else { "" }
        );
    }
}

#[allow(clippy::print_stdout)]
fn print_help() {
    println!("commands: list | toggle <uid> | status | quit");
}
