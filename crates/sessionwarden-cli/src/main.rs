//! sessionwarden - a command-line front-end for the account service.
//!
//! Logs in, keeps the session between runs, and shows who you are and how
//! much of your plan you have used. Tokens are renewed transparently.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionwarden_core::{
    ChangePasswordRequest, Config, CredentialStore, EncryptedFileStorage, KeyringStorage,
    LoginRequest, MemoryStorage, ProfileUpdate, RegisterRequest, SessionEvent, StorageBackend,
    TokenStorage, UserStats,
};

/// Environment variable holding the token file passphrase
const PASSPHRASE_ENV: &str = "SESSIONWARDEN_PASSPHRASE";

const USAGE: &str = "\
Usage: sessionwarden <command> [args]

Commands:
  login [email]                    Log in and remember the session
  register <email> <username>      Create an account and log in
  logout                           Revoke the session and forget tokens
  whoami                           Show the signed-in user
  stats                            Show plan usage
  profile [first=..] [last=..] [username=..]
                                   Update profile fields
  change-password                  Change the account password
  refresh                          Renew the access token now
  config                           Show the effective configuration";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    if command == "config" {
        println!("{}", serde_json::to_string_pretty(&config)?);
        println!("base_url: {}", config.base_url());
        return Ok(());
    }

    let storage = open_storage(&config)?;
    let store = CredentialStore::open(&config, storage)?;
    spawn_event_printer(&store);
    info!(base_url = %config.base_url(), "sessionwarden starting");

    match command.as_str() {
        "login" => login(&store, args.get(1)).await,
        "register" => register(&store, &args[1..]).await,
        "logout" => {
            store.logout().await;
            println!("Logged out.");
            Ok(())
        }
        "whoami" => whoami(&store).await,
        "stats" => stats(&store).await,
        "profile" => update_profile(&store, &args[1..]).await,
        "change-password" => change_password(&store).await,
        "refresh" => {
            store
                .refresh_access_token()
                .await
                .context("Token refresh failed, you have been logged out")?;
            println!("Access token renewed.");
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            Ok(())
        }
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn TokenStorage>> {
    let storage: Arc<dyn TokenStorage> = match config.storage {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
        StorageBackend::File => {
            let passphrase = match std::env::var(PASSPHRASE_ENV) {
                Ok(p) => p,
                Err(_) => rpassword::prompt_password("Token file passphrase: ")
                    .context("Failed to read passphrase")?,
            };
            Arc::new(EncryptedFileStorage::open(config.token_file_path()?, &passphrase)?)
        }
    };
    Ok(storage)
}

/// Print notices and session expiry as they happen
fn spawn_event_printer(store: &CredentialStore) {
    let mut events = store.transport().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Notice(notice)) => eprintln!("! {}", notice),
                Ok(SessionEvent::SessionExpired) => {
                    eprintln!("! Session expired. Please log in again.")
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(store: &CredentialStore, email: Option<&String>) -> Result<()> {
    let email = match email {
        Some(email) => email.clone(),
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    store.login(&LoginRequest::new(email, password)).await?;
    if let Some(user) = store.user() {
        println!("Logged in as {} ({} plan).", user.full_name(), store.plan_tier());
    }
    Ok(())
}

async fn register(store: &CredentialStore, args: &[String]) -> Result<()> {
    let [email, username] = args else {
        bail!("Usage: sessionwarden register <email> <username>");
    };
    let password = rpassword::prompt_password("Password: ")?;
    let password_confirm = rpassword::prompt_password("Confirm password: ")?;

    let request = RegisterRequest {
        email: email.clone(),
        username: username.clone(),
        password,
        password_confirm,
        first_name: None,
        last_name: None,
    };
    store.register(&request).await?;
    println!("Account created, you are logged in.");
    Ok(())
}

async fn whoami(store: &CredentialStore) -> Result<()> {
    store.initialize().await;
    if !store.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }

    match store.user() {
        Some(user) => {
            println!("{} <{}>", user.full_name(), user.email);
            let premium = if store.is_premium_user() { " (premium)" } else { "" };
            println!("Plan: {}{}", store.plan_tier(), premium);
        }
        None => println!("Logged in (profile unavailable)."),
    }
    Ok(())
}

async fn stats(store: &CredentialStore) -> Result<()> {
    let stats = store.fetch_user_stats().await?;
    println!("Plan: {}", stats.plan);
    println!(
        "Transcriptions this month: {}",
        UserStats::usage_display(stats.monthly_transcriptions, stats.limits.transcriptions)
    );
    println!(
        "Content generations this month: {}",
        UserStats::usage_display(
            stats.monthly_content_generations,
            stats.limits.content_generations
        )
    );
    Ok(())
}

async fn update_profile(store: &CredentialStore, args: &[String]) -> Result<()> {
    let mut changes = ProfileUpdate::default();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected key=value, got '{}'", arg))?;
        match key {
            "first" | "first_name" => changes.first_name = Some(value.to_string()),
            "last" | "last_name" => changes.last_name = Some(value.to_string()),
            "username" => changes.username = Some(value.to_string()),
            other => bail!("Unknown profile field '{}'", other),
        }
    }
    if changes.is_empty() {
        bail!("Nothing to update");
    }

    store.update_profile(&changes).await?;
    if let Some(user) = store.user() {
        println!("Profile updated: {} ({})", user.full_name(), user.username);
    }
    Ok(())
}

async fn change_password(store: &CredentialStore) -> Result<()> {
    let request = ChangePasswordRequest {
        old_password: rpassword::prompt_password("Current password: ")?,
        new_password: rpassword::prompt_password("New password: ")?,
        new_password_confirm: rpassword::prompt_password("Confirm new password: ")?,
    };
    store.change_password(&request).await?;
    println!("Password changed.");
    Ok(())
}
