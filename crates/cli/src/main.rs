//! Starboard CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run admin database migrations
//! sb-cli migrate
//!
//! # Print the plan table
//! sb-cli plans list
//! sb-cli plans show growth
//!
//! # Insert sample user records
//! sb-cli seed
//!
//! # Open the moderation console
//! sb-cli moderate
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `plans` - Inspect the shipped entitlement table
//! - `seed` - Seed `user_records` with sample tenants
//! - `moderate` - Interactive account moderation

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sb-cli")]
#[command(author, version, about = "Starboard CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run admin database migrations
    Migrate,
    /// Inspect the entitlement table
    Plans {
        #[command(subcommand)]
        action: PlansAction,
    },
    /// Insert sample user records
    Seed,
    /// Open the moderation console
    Moderate,
}

#[derive(Subcommand)]
enum PlansAction {
    /// List every plan with its price
    List,
    /// Print one plan's entitlements as JSON
    Show {
        /// Plan id (`starter`, `growth`, `professional`, `agency`)
        plan: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::admin().await?,
        Commands::Plans { action } => match action {
            PlansAction::List => commands::plans::list(),
            PlansAction::Show { plan } => commands::plans::show(&plan)?,
        },
        Commands::Seed => commands::seed::user_records().await?,
        Commands::Moderate => commands::moderate::console().await?,
    }
    Ok(())
}
