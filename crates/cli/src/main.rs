//! Emporium CLI - database migrations and admin claim management.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! emporium migrate
//!
//! # Grant the admin claim, creating the account if needed (bootstrap)
//! emporium admin grant --email owner@example.com --create
//!
//! # Revoke the admin claim
//! emporium admin revoke --uid 3xYzAbCdEf
//!
//! # Show an account's live claim, mirrored role, and audit trail
//! emporium admin show --email owner@example.com
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `admin grant|revoke|show` - Manage the admin claim

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "emporium")]
#[command(author, version, about = "Emporium CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage the admin claim
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

/// Exactly one of `--email` or `--uid`.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Account email address
    #[arg(short, long)]
    email: Option<String>,

    /// Account uid
    #[arg(short, long)]
    uid: Option<String>,
}

#[derive(Subcommand)]
enum AdminAction {
    /// Grant the admin claim
    Grant {
        #[command(flatten)]
        target: TargetArgs,

        /// Create the account if no account has this email
        #[arg(long)]
        create: bool,
    },
    /// Revoke the admin claim
    Revoke {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Show the live claim, mirrored role, and recent audit entries
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Admin { action } => match action {
            AdminAction::Grant { target, create } => {
                commands::admin::grant(target.uid.as_deref(), target.email.as_deref(), create)
                    .await?;
            }
            AdminAction::Revoke { target } => {
                commands::admin::revoke(target.uid.as_deref(), target.email.as_deref()).await?;
            }
            AdminAction::Show { target } => {
                commands::admin::show(target.uid.as_deref(), target.email.as_deref()).await?;
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_target_requires_exactly_one() {
        assert!(Cli::try_parse_from(["emporium", "admin", "grant"]).is_err());
        assert!(
            Cli::try_parse_from(["emporium", "admin", "grant", "-e", "a@b.co", "-u", "x"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["emporium", "admin", "grant", "-e", "a@b.co", "--create"]).is_ok()
        );
        assert!(Cli::try_parse_from(["emporium", "admin", "revoke", "--uid", "x"]).is_ok());
    }
}
