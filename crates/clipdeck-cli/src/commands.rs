//! Command implementations.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use reqwest::Method;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use clipdeck_core::api::{RequestBody, RequestOptions};
use clipdeck_core::models::{
    CreateAccountRequest, PlatformCredentials, TaskStarted, TaskState, TaskStatus, UpdateAccountRequest,
};
use clipdeck_core::tasks::{wait_for_task, DEFAULT_POLL_INTERVAL};
use clipdeck_core::{AuthEvent, Config, LoginOutcome, RefreshOutcome, SessionManager, SessionState};

use crate::{AccountCommand, ApiCommand, BackendConfigCommand, Command, CredentialArgs};

const ENV_USERNAME: &str = "CLIPDECK_USERNAME";
const ENV_PASSWORD: &str = "CLIPDECK_PASSWORD";

pub async fn run(command: Command, session: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { username } => login(session, config, username).await,
        Command::Logout => {
            session.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Status => status(session).await,
        Command::Refresh => refresh(session).await,
        Command::Watch => watch(session).await,
        Command::Api(command) => {
            require_session(session).await?;
            run_authenticated(command, session).await
        }
    }
}

async fn run_authenticated(command: ApiCommand, session: &SessionManager) -> Result<()> {
    let api = session.api();
    match command {
        ApiCommand::Platforms { accounts } => {
            let platforms = api.list_platforms().await?;
            if !accounts {
                for p in &platforms {
                    println!("{:<12} {:<4} accounts: {}", p.name, on_off(p.active), p.account_count);
                }
                return Ok(());
            }

            let futures: Vec<_> = platforms.iter().map(|p| api.list_accounts(&p.name)).collect();
            let results = futures::future::join_all(futures).await;
            for (p, accounts) in platforms.iter().zip(results) {
                println!("{} ({})", p.name, on_off(p.active));
                match accounts {
                    Ok(accounts) => {
                        for a in accounts {
                            println!("  {:<20} {}", a.name, auth_label(a.authenticated));
                        }
                    }
                    Err(e) => println!("  error: {}", e),
                }
            }
            Ok(())
        }
        ApiCommand::Account(command) => account(session, command).await,
        ApiCommand::Toggle { platform } => {
            let response = api.toggle_platform(&platform).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        ApiCommand::Generate {
            platform,
            account,
            url,
            file,
            no_mobile,
            wait,
        } => {
            let started = match (url, file) {
                (Some(url), _) => api.generate_from_url(&platform, &account, &url, !no_mobile).await?,
                (None, Some(file)) => api.generate_from_file(&platform, &account, &file, !no_mobile).await?,
                (None, None) => bail!("Either --url or --file is required"),
            };
            report_started(session, started, wait).await
        }
        ApiCommand::Upload {
            platform,
            account,
            wait,
        } => {
            let started = api.start_upload(&platform, &account).await?;
            report_started(session, started, wait).await
        }
        ApiCommand::Task { task_id, wait } => {
            if wait {
                follow_task(session, &task_id).await
            } else {
                print_task(&task_id, &api.task_status(&task_id).await?);
                Ok(())
            }
        }
        ApiCommand::BackendConfig(BackendConfigCommand::Show) => {
            println!("{}", serde_json::to_string_pretty(&api.get_config().await?)?);
            Ok(())
        }
        ApiCommand::BackendConfig(BackendConfigCommand::Save { file }) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let config: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", file.display()))?;
            println!("{}", api.save_config(&config).await?.message);
            Ok(())
        }
        ApiCommand::Request {
            method,
            path,
            data,
            query,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;
            let body = match data {
                Some(raw) => RequestBody::Json(serde_json::from_str(&raw).context("--data is not valid JSON")?),
                None => RequestBody::Empty,
            };
            let mut options = RequestOptions::new();
            for pair in query {
                let (key, value) = split_pair(&pair)?;
                options = options.query(key, value);
            }
            let response: serde_json::Value = api.request(method, &path, body, options).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

async fn account(session: &SessionManager, command: AccountCommand) -> Result<()> {
    let api = session.api();
    match command {
        AccountCommand::List { platform } => {
            for a in api.list_accounts(&platform).await? {
                println!(
                    "{:<20} {:<4} {:<16} {}",
                    a.name,
                    on_off(a.active),
                    auth_label(a.authenticated),
                    a.clip_folder
                );
            }
        }
        AccountCommand::Add {
            platform,
            name,
            fields,
            inactive,
            credentials,
        } => {
            let request = CreateAccountRequest {
                active: !inactive,
                description: fields.description,
                tags: fields.tags,
                title: fields.title,
                category_id: fields.category_id,
                clip_duration: fields.clip_duration,
                credentials: parse_credentials(&credentials)?,
                ..CreateAccountRequest::new(name)
            };
            let created = api.create_account(&platform, &request).await?;
            println!("{}", created.message);
            if !created.authenticated {
                println!("Not authenticated: {}", created.auth_message);
            }
        }
        AccountCommand::Update {
            platform,
            name,
            fields,
            active,
        } => {
            let update = UpdateAccountRequest {
                active,
                description: fields.description,
                tags: fields.tags,
                title: fields.title,
                category_id: fields.category_id,
                clip_duration: fields.clip_duration,
                schedule: None,
            };
            if update.is_empty() {
                bail!("Nothing to update");
            }
            println!("{}", api.update_account(&platform, &name, &update).await?.message);
        }
        AccountCommand::Delete { platform, name } => {
            println!("{}", api.delete_account(&platform, &name).await?.message);
        }
        AccountCommand::Reauth {
            platform,
            name,
            replace_credentials,
            credentials,
        } => {
            let credentials = parse_credentials(&credentials)?;
            let result = api
                .reauth_account(&platform, &name, credentials, !replace_credentials)
                .await?;
            println!("{}", result.message);
            if !result.auth_message.is_empty() {
                println!("{}", result.auth_message);
            }
            if !result.success {
                bail!("Re-authentication failed");
            }
        }
    }
    Ok(())
}

fn parse_credentials(args: &CredentialArgs) -> Result<PlatformCredentials> {
    let mut credentials = PlatformCredentials::default();
    for pair in &args.credentials {
        let (name, value) = split_pair(pair)?;
        if !credentials.set(name, value) {
            bail!("Unknown credential '{}'", name);
        }
    }
    if let Some(path) = &args.client_secrets {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        credentials.client_secrets_content = Some(contents);
    }
    Ok(credentials)
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    pair.split_once('=')
        .with_context(|| format!("'{}' is not name=value", pair))
}

// ============================================================================
// Session commands
// ============================================================================

async fn login(session: &SessionManager, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var(ENV_USERNAME).ok())
        .filter(|u| !u.trim().is_empty())
    {
        Some(u) => u,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = match std::env::var(ENV_PASSWORD).ok().filter(|p| !p.is_empty()) {
        Some(p) => p,
        None => rpassword::prompt_password("Password: ")?,
    };

    match session.login(&username, &password).await {
        LoginOutcome::Success { user } => {
            config.last_username = Some(user.clone());
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Logged in as {}.", user);
            Ok(())
        }
        LoginOutcome::Rejected { message } => bail!("{}", message),
        LoginOutcome::Cancelled => bail!("Login was cancelled"),
    }
}

fn prompt_username(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    match (input.is_empty(), last) {
        (false, _) => Ok(input.to_string()),
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => bail!("Username required"),
    }
}

async fn status(session: &SessionManager) -> Result<()> {
    match session.initialize().await {
        SessionState::Authenticated { user } => {
            println!("Logged in as {}.", user);
            match session.token_expires_in() {
                Some(remaining) if remaining.num_seconds() > 0 => {
                    println!("Token expires in {}.", format_duration(remaining))
                }
                Some(_) => println!("Token has expired."),
                None => println!("Token expiry unknown."),
            }
        }
        _ => println!("Not logged in."),
    }
    Ok(())
}

async fn refresh(session: &SessionManager) -> Result<()> {
    require_session(session).await?;
    match session.refresh().await {
        RefreshOutcome::Renewed => println!("Session token renewed."),
        RefreshOutcome::Unchanged => println!("Session is valid; the backend kept the current token."),
        RefreshOutcome::LoggedOut => bail!("Refresh failed; you have been logged out"),
        RefreshOutcome::Stale | RefreshOutcome::NoSession => bail!("No active session"),
    }
    Ok(())
}

async fn watch(session: &SessionManager) -> Result<()> {
    require_session(session).await?;
    let mut events = session.events();
    let _expiry_check = session.spawn_expiry_check();
    info!(
        interval_secs = session.settings().check_interval.as_secs(),
        "Watching session"
    );
    println!("Watching session; press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped.");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(AuthEvent::TokenRefreshed) => println!("Session token refreshed."),
                Ok(AuthEvent::LoggedIn { user }) => println!("Logged in as {}.", user),
                Ok(AuthEvent::LoggedOut) => bail!("Session ended; run `clipdeck login` to log in again"),
                Ok(AuthEvent::LoginRequired { reason }) => {
                    bail!("{}; run `clipdeck login` to log in again", reason)
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Restore the stored session, failing with a login hint when there is none
async fn require_session(session: &SessionManager) -> Result<()> {
    match session.initialize().await {
        SessionState::Authenticated { .. } => Ok(()),
        _ => bail!("Not logged in. Run `clipdeck login` first"),
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn report_started(session: &SessionManager, started: TaskStarted, wait: bool) -> Result<()> {
    println!(
        "Started task {}{}",
        started.task_id,
        started.message.map(|m| format!(": {}", m)).unwrap_or_default()
    );
    if wait {
        follow_task(session, &started.task_id).await?;
    }
    Ok(())
}

async fn follow_task(session: &SessionManager, task_id: &str) -> Result<()> {
    let status = wait_for_task(session.api(), task_id, DEFAULT_POLL_INTERVAL, |s| print_task(task_id, s)).await?;
    if status.status == TaskState::Failed {
        bail!("Task {} failed", task_id);
    }
    Ok(())
}

fn print_task(task_id: &str, status: &TaskStatus) {
    println!(
        "{} [{:?}] {:>3.0}% {}",
        task_id,
        status.status,
        status.progress,
        status.message.as_deref().unwrap_or("")
    );
}

// ============================================================================
// Formatting
// ============================================================================

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn auth_label(authenticated: bool) -> &'static str {
    if authenticated {
        "authenticated"
    } else {
        "not authenticated"
    }
}

fn format_duration(d: chrono::Duration) -> String {
    let minutes = d.num_minutes();
    if minutes < 60 {
        format!("{}m", minutes.max(0))
    } else if minutes < 1440 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        format!("{}d {}h", minutes / 1440, (minutes % 1440) / 60)
    }
}
