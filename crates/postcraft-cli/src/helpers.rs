//! Shared CLI helpers: path expansion, config path resolution, stats printing.

use std::path::{Path, PathBuf};

use colored::Colorize;

use postcraft_core::config::get_config_path;
use postcraft_providers::UsageSnapshot;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// `--config` if given, else `CONFIG_FILE`, else `./config.json`.
pub fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    match flag {
        Some(path) => expand_tilde(&path.to_string_lossy()),
        None => get_config_path(),
    }
}

/// Print the usage counters as a small table.
pub fn print_stats(snapshot: &UsageSnapshot) {
    println!();
    println!("{}", "📊 Provider usage".cyan().bold());
    if snapshot.successes.is_empty() && snapshot.abandoned.is_empty() {
        println!("  {}", "(no calls recorded)".dimmed());
    }

    let mut names: Vec<&String> = snapshot
        .successes
        .keys()
        .chain(snapshot.abandoned.keys())
        .collect();
    names.sort();
    names.dedup();
    for name in names {
        let abandoned = snapshot.abandoned.get(name).copied().unwrap_or(0);
        println!(
            "  {:<16} {} ok  {}",
            name,
            snapshot.success_count(name).to_string().green(),
            format!("{abandoned} abandoned").dimmed()
        );
    }

    let failed = snapshot.failed.to_string();
    println!(
        "  {:<16} {}",
        "failed tasks",
        if snapshot.failed == 0 {
            failed.dimmed()
        } else {
            failed.red()
        }
    );
    println!();
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
