//! CLI module - command-line interface for authd
//!
//! Parsed with clap. Running without a subcommand serves the HTTP API.

mod commands;

use clap::{Parser, Subcommand};

/// authd - minimal authentication service
/// Registers users and issues bearer tokens
#[derive(Parser)]
#[command(name = "authd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API until Ctrl-C
    #[command(alias = "daemon")]
    Serve,

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new account
    Add {
        /// Username
        username: String,
        /// Password (prompted when omitted; ignored under the token scheme)
        #[arg(long)]
        password: Option<String>,
    },
    /// List accounts
    #[command(alias = "ls")]
    List {
        /// Print a single JSON document instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one account as JSON
    Show {
        /// Username
        username: String,
    },
    /// Re-enable a deactivated account
    Activate {
        /// Username
        username: String,
    },
    /// Disable an account without deleting it
    Deactivate {
        /// Username
        username: String,
    },
    /// Delete an account by id
    #[command(alias = "rm")]
    Remove {
        /// Account id
        id: i32,
    },
}

pub use commands::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["authd"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_user_add_with_password() {
        let cli = Cli::try_parse_from(["authd", "user", "add", "alice", "--password", "s3cret"])
            .unwrap();

        match cli.command {
            Some(Commands::User {
                command: UserCommands::Add { username, password },
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(password.as_deref(), Some("s3cret"));
            }
            _ => panic!("expected user add"),
        }
    }

    #[test]
    fn user_remove_requires_numeric_id() {
        assert!(Cli::try_parse_from(["authd", "user", "remove", "alice"]).is_err());
        assert!(Cli::try_parse_from(["authd", "user", "rm", "7"]).is_ok());
    }
}
