//! Terminal output: colour control, status lines and download progress.
//!
//! Colour follows the NO_COLOR standard (https://no-color.org/) and the
//! CLICOLOR / CLICOLOR_FORCE conventions; otherwise it is enabled only when
//! stdout is a terminal.

use colored::{Colorize, control};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;

/// Configure colour output for the whole process. Call early in `main`.
pub fn init_colors() {
    if std::env::var_os("NO_COLOR").is_some() {
        control::set_override(false);
        return;
    }

    if std::env::var("CLICOLOR_FORCE")
        .map(|v| v != "0")
        .unwrap_or(false)
    {
        control::set_override(true);
        return;
    }

    if std::env::var("CLICOLOR").map(|v| v == "0").unwrap_or(false) {
        control::set_override(false);
        return;
    }

    control::set_override(std::io::stdout().is_terminal());
}

/// `==> Installing termexplain 1.0.0`
pub fn step(message: &str) {
    println!("{} {}", "==>".blue().bold(), message.bold());
}

pub fn detail(message: &str) {
    println!("    {}", message);
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message);
}

pub fn failure(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Progress bar for a download; hidden when stderr is not a terminal
pub fn download_bar(label: &str, total: Option<u64>) -> ProgressBar {
    let pb = ProgressBar::new(total.unwrap_or(0));
    if !std::io::stderr().is_terminal() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }

    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(format!("⬇ {}", label));
    pb
}
