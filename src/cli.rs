//! Offline account management for the `file-drop` binary.
//!
//! Accounts are only ever created here: the HTTP API lets an existing user
//! mint more tokens but has no sign-up route. Commands work directly on the
//! metadata engine, so run them while the server is stopped when using redb.

use clap::{Parser, Subcommand};

use crate::error::Error;
use crate::metadata::MetadataBackend;
use crate::models::User;

const DEFAULT_PROVIDER: &str = "local";

#[derive(Parser)]
#[command(name = "file-drop", version, about = "Transient file-sharing server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Manage user tokens
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Create a user and print its first token
    Add {
        #[arg(long)]
        login: String,
        #[arg(long, default_value = DEFAULT_PROVIDER)]
        provider: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        admin: bool,
    },
    /// List user ids
    List,
    /// Show one user with its tokens
    Show {
        #[arg(long)]
        login: String,
        #[arg(long, default_value = DEFAULT_PROVIDER)]
        provider: String,
    },
    /// Delete a user and revoke its tokens
    Delete {
        #[arg(long)]
        login: String,
        #[arg(long, default_value = DEFAULT_PROVIDER)]
        provider: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Mint a new token for a user
    Create {
        #[arg(long)]
        login: String,
        #[arg(long, default_value = DEFAULT_PROVIDER)]
        provider: String,
        #[arg(long)]
        comment: Option<String>,
    },
}

fn user_id(provider: &str, login: &str) -> String {
    format!("{provider}:{login}")
}

/// Run a user command, returns what to print.
pub fn run_user_command(metadata: &dyn MetadataBackend, command: UserCommand) -> Result<String, Error> {
    match command {
        UserCommand::Add {
            login,
            provider,
            name,
            email,
            admin,
        } => {
            if login.is_empty() {
                return Err(Error::Invalid("missing user login".to_string()));
            }
            let mut user = User::new(provider, login);
            user.name = name;
            user.email = email;
            user.is_admin = admin;
            let token = user.new_token(Some("created from the command line".to_string()));
            metadata.create_user(&user)?;
            Ok(format!("user {} created, token {}", user.id, token.token))
        }
        UserCommand::List => {
            let ids = metadata.get_users()?;
            if ids.is_empty() {
                return Ok("no users".to_string());
            }
            Ok(ids.join("\n"))
        }
        UserCommand::Show { login, provider } => {
            let id = user_id(&provider, &login);
            let user = metadata
                .get_user(&id)?
                .ok_or_else(|| Error::NotFound(format!("user {id} not found")))?;
            serde_json::to_string_pretty(&user).map_err(|e| Error::backend("serialize user", e))
        }
        UserCommand::Delete { login, provider } => {
            let id = user_id(&provider, &login);
            if metadata.get_user(&id)?.is_none() {
                return Err(Error::NotFound(format!("user {id} not found")));
            }
            metadata.remove_user(&id)?;
            Ok(format!("user {id} has been deleted"))
        }
    }
}

pub fn run_token_command(
    metadata: &dyn MetadataBackend,
    command: TokenCommand,
) -> Result<String, Error> {
    match command {
        TokenCommand::Create {
            login,
            provider,
            comment,
        } => {
            let id = user_id(&provider, &login);
            let mut created = None;
            metadata.update_user(&id, &mut |stored| {
                let user = stored.ok_or_else(|| Error::NotFound(format!("user {id} not found")))?;
                created = Some(user.new_token(comment.clone()));
                Ok(())
            })?;
            let token = created.ok_or_else(|| Error::NotFound(format!("user {id} not found")))?;
            Ok(token.token)
        }
    }
}
