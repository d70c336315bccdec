//! `postcraft status`: show configuration, provider readiness, chains and progress.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use postcraft_core::config::{load_config, Config, TASK_NAMES};
use postcraft_core::utils::mask_key;
use postcraft_providers::registry::spec_for;
use postcraft_providers::RateLimiter;

use crate::helpers::{expand_tilde, resolve_config_path};
use crate::progress::Progress;

/// Run the status command.
pub fn run(config_flag: Option<&Path>) -> Result<()> {
    let config_path = resolve_config_path(config_flag);
    let loaded = load_config(Some(config_path.as_path()));
    let config = loaded.config;

    println!();
    println!("{}", "🧾 Postcraft Status".cyan().bold());
    println!();

    println!(
        "  {:<14} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using defaults)".red().to_string()
        }
    );

    print_providers(&config);
    print_chains(&config);
    print_progress(&config);

    let mut issues = loaded.warnings;
    issues.extend(config.validate());
    println!();
    if issues.is_empty() {
        println!("  {} configuration looks good", "✓".green());
    } else {
        println!("  {}", "Issues:".bold());
        for issue in issues {
            println!("    {} {}", "!".yellow(), issue);
        }
    }
    println!();

    Ok(())
}

fn print_providers(config: &Config) {
    let names = config.providers.names();
    let limiter = RateLimiter::from_config(&config.rate_limit, &names);

    println!();
    println!("  {}", "Providers:".bold());
    for name in &names {
        let Some(provider) = config.providers.get_by_name(name) else {
            continue;
        };
        let state = if !provider.enabled {
            "· disabled".dimmed().to_string()
        } else if provider.is_configured() {
            format!("{} {}", "✓".green(), mask_key(&provider.api_key).dimmed())
        } else {
            "✗ no API key".red().to_string()
        };
        let endpoint = provider
            .api_base
            .as_deref()
            .or(spec_for(name).default_api_base)
            .unwrap_or("(no endpoint)");

        println!("    {:<14} {}", name, state);
        println!(
            "    {:<14} {}",
            "",
            format!(
                "{} | every {:.1}s | timeout {}s",
                endpoint,
                limiter.interval(name).as_secs_f64(),
                provider.timeout_secs
            )
            .dimmed()
        );
    }
}

fn print_chains(config: &Config) {
    println!();
    println!("  {}", "Task chains:".bold());
    for task in TASK_NAMES {
        let chain = config
            .tasks
            .get(task)
            .map(|t| {
                t.chain
                    .iter()
                    .map(|e| format!("{}:{}", e.provider, e.model))
                    .collect::<Vec<_>>()
                    .join(" → ")
            })
            .unwrap_or_default();
        let chain = if chain.is_empty() {
            "(empty)".red().to_string()
        } else {
            chain
        };
        println!("    {:<14} {}", task, chain);
    }
}

fn print_progress(config: &Config) {
    let output_dir = expand_tilde(&config.files.output_dir);
    let path = Progress::path_in(&output_dir);
    if !path.exists() {
        return;
    }
    let progress = Progress::load(&path);

    println!();
    println!(
        "  {:<14} {} completed, {} unresolved{}",
        "Progress:".bold(),
        progress.completed.len().to_string().green(),
        progress.unresolved.len().to_string().yellow(),
        progress
            .updated_at
            .map(|t| format!(" (updated {})", t.format("%Y-%m-%d %H:%M:%S UTC")))
            .unwrap_or_default()
            .dimmed()
    );
}
