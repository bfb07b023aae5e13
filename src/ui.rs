// UI layer: terminal output for uploads and the interactive account flows.
// Prompts go through `dialoguer`, the running upload is an `indicatif` bar
// whose message is the formatted status line.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};

use crate::account::{token_from_jwt, AccountResolver, TokenCache};
use crate::engine::{MessageKind, ProgressObserver};
use crate::format::{self, header_lines, progress_line};
use crate::record::{UploadRecord, UploadStatus};
use crate::retry::RetryNotice;
use crate::state::StateStore;

/// Draws the upload header once and redraws the status line on every
/// progress event.
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        TerminalProgress { bar }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TerminalProgress {
    fn on_start(&mut self, record: &UploadRecord) {
        for line in header_lines(&record.filename) {
            self.bar.println(line);
        }
        self.bar.set_message(progress_line(record));
    }

    fn on_progress(&mut self, record: &UploadRecord) {
        self.bar.set_message(progress_line(record));
        if record.status != UploadStatus::Running {
            self.bar.finish();
        }
    }

    fn on_retry(&mut self, notice: &RetryNotice) {
        let text = format!(
            "attempt {} failed ({}), retrying in {}s",
            notice.attempt,
            notice.error,
            notice.delay.as_secs()
        );
        self.bar.println(text.yellow().to_string());
    }

    fn on_message(&mut self, kind: MessageKind, text: &str) {
        let line = match kind {
            MessageKind::Info => text.to_string(),
            MessageKind::Success => text.green().to_string(),
            MessageKind::Warning => text.yellow().to_string(),
        };
        self.bar.println(line);
    }
}

/// Prints the cached accounts as a numbered table.
pub fn list_accounts(cache: &TokenCache, all: bool) {
    for line in account_table(cache, all) {
        println!("{line}");
    }
}

fn account_table(cache: &TokenCache, all: bool) -> Vec<String> {
    let accounts = cache.accounts(None);
    let mut lines = Vec::with_capacity(accounts.len() + 2);
    if all {
        lines.push(format!(
            "{:<4} {:<32} {:<14} {:<28} {:<40} {:<38} {}",
            "No.", "USERNAME", "AUTHORITY_TYPE", "ENVIRONMENT", "HOME_ACCOUNT_ID", "LOCAL_ACCOUNT_ID", "REALM"
        ));
    } else {
        lines.push(format!(
            "{:<4} {:<32} {:<14} {}",
            "No.", "USERNAME", "AUTHORITY_TYPE", "ENVIRONMENT"
        ));
    }
    for (i, a) in accounts.iter().enumerate() {
        let no = format!("{}.", i + 1);
        if all {
            lines.push(format!(
                "{:<4} {:<32} {:<14} {:<28} {:<40} {:<38} {}",
                no,
                a.username,
                a.authority_type,
                a.environment,
                a.home_account_id,
                a.local_account_id,
                a.realm
            ));
        } else {
            lines.push(format!(
                "{:<4} {:<32} {:<14} {}",
                no, a.username, a.authority_type, a.environment
            ));
        }
    }
    lines.push(format!("{} account(s) in total", accounts.len()));
    lines
}

/// Prompts for an access token and caches the account it belongs to.
pub fn add_account(cache: &mut TokenCache) -> Result<()> {
    let raw: String = Password::new()
        .with_prompt("Access token")
        .interact()
        .context("failed to read access token")?;
    let token = token_from_jwt(&raw)?;
    let username = token.account.username.clone();
    if let Some(expires_at) = token.expires_at {
        println!("Token for {username} expires at {expires_at}");
    }
    cache.insert(token);
    cache.save();
    if cache.has_changed() {
        anyhow::bail!("account {username} could not be saved, see the warning above");
    }
    println!("{}", format!("Account {username} added.").green());
    Ok(())
}

/// Lists accounts, asks which numbers to drop and removes them after
/// confirmation.
pub fn remove_accounts(cache: &mut TokenCache) -> Result<()> {
    let accounts = cache.accounts(None);
    if accounts.is_empty() {
        println!("No accounts cached.");
        return Ok(());
    }
    list_accounts(cache, false);

    let input: String = Input::new()
        .with_prompt("Numbers to remove (comma separated)")
        .interact_text()
        .context("failed to read selection")?;
    let picked = parse_selection(&input, accounts.len());
    if picked.is_empty() {
        println!("Nothing selected.");
        return Ok(());
    }

    let names: Vec<&str> = picked.iter().map(|&i| accounts[i].username.as_str()).collect();
    let confirmed = Confirm::new()
        .with_prompt(format!("Remove {}?", names.join(", ")))
        .default(false)
        .interact()
        .context("failed to read confirmation")?;
    if !confirmed {
        return Ok(());
    }

    for &i in &picked {
        cache.remove(&accounts[i]);
    }
    cache.save();
    println!("{}", format!("Removed {} account(s).", picked.len()).green());
    Ok(())
}

/// Zero-based indices from a comma separated list of 1-based numbers.
/// Entries that are not numbers or out of range are skipped.
fn parse_selection(input: &str, count: usize) -> Vec<usize> {
    input
        .split(',')
        .filter_map(|part| part.trim().parse::<usize>().ok())
        .filter(|n| (1..=count).contains(n))
        .map(|n| n - 1)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Prints uploads that can still be resumed.
pub fn list_pending(store: &StateStore) -> Result<()> {
    let records = store.list()?;
    if records.is_empty() {
        println!("No pending uploads in {}.", store.dir().display());
        return Ok(());
    }
    for line in pending_table(&records) {
        println!("{line}");
    }
    Ok(())
}

fn pending_table(records: &[UploadRecord]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<16} {:<8} {:>7} {:>7}  {:<24} {}",
        "FINGERPRINT", "STATUS", "SIZE", "DONE", "ACCOUNT", "PATH"
    )];
    for r in records {
        let mut line = format!(
            "{:<16} {:<8} {:>7} {:>7}  {:<24} {}",
            r.fingerprint.chars().take(16).collect::<String>(),
            r.status,
            format::human_size(r.total_size),
            format::percent(r.bytes_finished, r.total_size),
            r.account.username,
            r.item_path()
        );
        if !r.last_error.is_empty() {
            line.push_str(&format!("\n{:<16} last error: {}", "", r.last_error));
        }
        lines.push(line);
    }
    lines
}

/// Drops the cached record whose fingerprint starts with `prefix`.
pub fn discard_pending(store: &StateStore, prefix: &str) -> Result<()> {
    let matches: Vec<UploadRecord> = store
        .list()?
        .into_iter()
        .filter(|r| r.fingerprint.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no pending upload matches {prefix}"),
        [record] => {
            store.delete(&record.fingerprint)?;
            println!("Discarded pending upload of {}.", record.filename);
            Ok(())
        }
        _ => anyhow::bail!("{prefix} matches {} pending uploads, use a longer prefix", matches.len()),
    }
}
