//! Command handlers for Patcher CLI
//!
//! This module implements the command handlers that coordinate between
//! CLI arguments and the core application functionality.

use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::app::{
    CacheEntry, Coordinator, CoordinatorConfig, FetchOptions, FetchReport, PatchTitle,
};
use crate::auth::{
    get_auth_status, prompt_credentials, reset_credentials, save_credentials, CredentialKey,
    CredentialStore, KeyringStore,
};
use crate::cli::{
    AuthAction, AuthArgs, CacheAction, CacheArgs, FetchArgs, GlobalArgs, ResetArgs, ResetTarget,
};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Resolve configuration from file, environment and global flags
async fn load_config(global: &GlobalArgs) -> Result<CoordinatorConfig> {
    let app_config = AppConfig::load(global.config.clone()).await?;
    let mut config = app_config.to_coordinator_config();
    if let Some(cache_dir) = &global.cache_dir {
        config.cache.cache_root = Some(cache_dir.clone());
    }
    Ok(config)
}

fn spinner(global: &GlobalArgs, message: &str) -> Option<ProgressBar> {
    if global.quiet || !atty::is(atty::Stream::Stderr) {
        return None;
    }

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style.tick_strings(&["◐", "◓", "◑", "◒"]));
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    Some(spinner)
}

/// Handle the fetch command
///
/// Builds the coordinator, runs the fetch with a spinner on interactive
/// terminals, then prints a summary table and optionally exports JSON.
pub async fn handle_fetch(global: &GlobalArgs, args: FetchArgs) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let status = get_auth_status(&KeyringStore::default())?;
    if !status.has_credentials() {
        error!("{}", status.status_message());
        return Err(AppError::generic(status.status_message()));
    }

    let config = load_config(global).await?;
    let coordinator = Coordinator::from_config(config).await?;
    let _signals = coordinator.install_signal_handler();

    let mut options = FetchOptions::default()
        .with_cache(!args.no_cache)
        .with_ios(args.ios)
        .with_omit_recent(args.omit);
    if let Some(concurrency) = args.concurrency {
        options = options.with_concurrency(concurrency);
    }
    if let Some(sort) = args.sort {
        options = options.with_sort(sort);
    }

    let progress = spinner(global, "Fetching patch data from Jamf Pro...");
    let result = coordinator.fetch_patch_data(&options).await;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }
    let report = result?;

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&report.records)
            .map_err(|e| AppError::generic(format!("Failed to serialize records: {}", e)))?;
        tokio::fs::write(path, json).await?;
        info!("Wrote {} records to {}", report.records.len(), path.display());
    }

    if !global.quiet {
        print_records(&report.records);
        print_fetch_summary(&report);
    }

    Ok(())
}

fn print_fetch_summary(report: &FetchReport) {
    println!();
    println!(
        "Fetched {} titles in {:.1}s ({} requests, {} retries, {} token refreshes)",
        report.records.len(),
        report.elapsed.as_secs_f64(),
        report.stats.attempts,
        report.stats.retries,
        report.token_exchanges
    );
    if report.omitted > 0 {
        println!("{} titles released in the last 48 hours omitted", report.omitted);
    }
    if report.duplicates > 0 {
        println!("{} duplicate items dropped", report.duplicates);
    }
    if report.skipped_count() > 0 {
        println!("{} items skipped", report.skipped_count());
        for item in &report.skipped {
            println!("  - {}: {}", item.source, item.reason);
        }
    }
    match (&report.cache_key, &report.cache_error) {
        (Some(key), _) => println!("Snapshot saved as {}", key),
        (None, Some(e)) => println!("Snapshot not saved: {}", e),
        (None, None) => {}
    }
}

/// Display records as a clean table
fn print_records(records: &[PatchTitle]) {
    if records.is_empty() {
        println!("No patch titles found.");
        return;
    }

    let title_width = records
        .iter()
        .map(|r| r.title.len())
        .max()
        .unwrap_or(5)
        .max(5);
    let version_width = records
        .iter()
        .map(|r| r.latest_version.len())
        .max()
        .unwrap_or(14)
        .max(14);

    println!(
        "{:<title_width$}  {:<11}  {:>8}  {:>8}  {:<version_width$}  {:>7}  {:>5}",
        "Title",
        "Released",
        "Patched",
        "Missing",
        "Latest Version",
        "Done %",
        "Total",
    );
    println!("{}", "─".repeat(title_width + version_width + 51));

    for record in records {
        println!(
            "{:<title_width$}  {:<11}  {:>8}  {:>8}  {:<version_width$}  {:>7.2}  {:>5}",
            record.title,
            record.released,
            record.hosts_patched,
            record.missing_patch,
            record.latest_version,
            record.completion_percent,
            record.total_hosts,
        );
    }
}

/// Handle cache management commands
pub async fn handle_cache(global: &GlobalArgs, args: CacheArgs) -> Result<()> {
    let config = load_config(global).await?;
    let coordinator = Coordinator::from_config(config).await?;

    match args.action {
        CacheAction::Latest { max_age } => match coordinator.load_cached(max_age).await? {
            Some(entry) => {
                print_entry_header(&entry);
                print_records(&entry.records);
            }
            None => println!("No cached snapshot found. Run 'patcher fetch' first."),
        },
        CacheAction::List => {
            let entries = coordinator.list_cached().await?;
            println!("Cache location: {}", coordinator.cache().cache_root().display());
            if entries.is_empty() {
                println!("No cached snapshots.");
            }
            for entry in &entries {
                print_entry_header(entry);
            }
        }
        CacheAction::Clear => {
            let removed = coordinator.reset_cache().await?;
            println!("Removed {} cached snapshots", removed);
        }
    }

    Ok(())
}

fn print_entry_header(entry: &CacheEntry) {
    let age = entry.age_at(Utc::now());
    println!(
        "{}  {} records  ({}h old)",
        entry.key,
        entry.records.len(),
        age.as_secs() / 3600
    );
}

/// Handle authentication commands
pub async fn handle_auth(args: AuthArgs) -> Result<()> {
    let store = KeyringStore::default();

    match args.action {
        AuthAction::Setup { force } => {
            if !force && get_auth_status(&store)?.has_credentials() {
                println!("Credentials already configured. Use --force to update.");
                return Ok(());
            }
            let (url, client_id, client_secret) = prompt_credentials()?;
            save_credentials(&store, &url, &client_id, &client_secret)?;
            println!("Credentials saved to the system keychain.");
        }
        AuthAction::Status => {
            let status = get_auth_status(&store)?;
            println!("{}", status.status_message());
            if let Some(url) = store.get(CredentialKey::Url)? {
                println!("Server: {}", url);
            }
        }
        AuthAction::Clear { key } => {
            let removed = reset_credentials(&store, key)?;
            for key in removed {
                println!("Removed {}", key);
            }
        }
    }

    Ok(())
}

/// Handle the reset command
pub async fn handle_reset(global: &GlobalArgs, args: ResetArgs) -> Result<()> {
    let config = load_config(global).await?;
    let coordinator = Coordinator::from_config(config).await?;

    if matches!(args.target, ResetTarget::Cache | ResetTarget::All) {
        let removed = coordinator.reset_cache().await?;
        println!("Removed {} cached snapshots", removed);
    }

    if matches!(args.target, ResetTarget::Credentials | ResetTarget::All) {
        match coordinator.reset_credentials(None).await {
            Ok(removed) => println!("Removed {} stored credentials", removed.len()),
            Err(e) => {
                warn!("Credential reset failed: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}
