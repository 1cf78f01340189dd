//! User administration command handlers

use anyhow::Context;
use serde_json::Value as JsonValue;

use crate::config::{Config, CredentialScheme};
use crate::db::Store;
use crate::services::{AccountError, AccountService, SeaOrmAccountService};

async fn open_service(config: &Config) -> anyhow::Result<SeaOrmAccountService> {
    let store = Store::with_pool_options(
        &config.general.database_url,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await?;
    SeaOrmAccountService::new(&store, &config.security)
}

fn prompt_password() -> anyhow::Result<String> {
    println!("Password:");
    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .context("Failed to read password from stdin")?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

pub async fn cmd_user_add(
    config: &Config,
    username: &str,
    password: Option<&str>,
) -> anyhow::Result<()> {
    let service = open_service(config).await?;

    let password = match (service.scheme(), password) {
        (CredentialScheme::Password, None) => Some(prompt_password()?),
        (_, password) => password.map(str::to_string),
    };

    match service.register(username, password.as_deref()).await {
        Ok(registration) => {
            println!(
                "✓ Created user '{}' (ID: {})",
                registration.account.username, registration.account.id
            );
            if let Some(token) = registration.token {
                println!("  Token: {token}");
                println!("  Store it now; it is the only credential for this account.");
            }
        }
        Err(AccountError::DuplicateUsername) => {
            println!("User '{username}' already exists.");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub async fn cmd_user_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let service = open_service(config).await?;

    if json {
        let aggregate = service.accounts_json().await?;
        println!("{}", serde_json::to_string_pretty(&aggregate)?);
        return Ok(());
    }

    let accounts = service.list_accounts().await?;

    if accounts.is_empty() {
        println!("No users registered.");
        println!();
        println!("Add one with: authd user add <username>");
        return Ok(());
    }

    println!("Users ({} total)", accounts.len());
    println!("{:-<50}", "");

    for account in accounts {
        let id = account.get("id").map_or_else(String::new, JsonValue::to_string);
        let username = account
            .get("username")
            .and_then(JsonValue::as_str)
            .unwrap_or("?");
        let active = if is_truthy(account.get("is_active")) {
            "active"
        } else {
            "inactive"
        };

        println!("{id:>5}  {username:<30} {active}");
    }

    Ok(())
}

/// SQLite hands booleans back as integers in JSON projections.
fn is_truthy(value: Option<&JsonValue>) -> bool {
    match value {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

pub async fn cmd_user_show(config: &Config, username: &str) -> anyhow::Result<()> {
    let service = open_service(config).await?;

    match service.account_json(username).await? {
        Some(account) => println!("{}", serde_json::to_string_pretty(&account)?),
        None => println!("User '{username}' not found."),
    }

    Ok(())
}

pub async fn cmd_user_set_active(
    config: &Config,
    username: &str,
    active: bool,
) -> anyhow::Result<()> {
    let service = open_service(config).await?;

    match service.set_active(username, active).await {
        Ok(()) if active => println!("✓ Activated: {username}"),
        Ok(()) => println!("✓ Deactivated: {username}"),
        Err(AccountError::NotFound) => println!("User '{username}' not found."),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

pub async fn cmd_user_remove(config: &Config, id: i32) -> anyhow::Result<()> {
    let service = open_service(config).await?;
    service.remove(id).await?;
    println!("✓ Removed user with ID {id} (if it existed)");
    Ok(())
}
