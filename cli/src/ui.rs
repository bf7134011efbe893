// Terminal output helpers for operator-facing progress

use colored::{ColoredString, Colorize};

pub fn print_header(title: &str) {
    println!();
    println!(
        "{}",
        "╔════════════════════════════════════════════════════════════╗".bright_blue()
    );
    println!("{}", format!("║  {:<58}║", title).bright_blue());
    println!(
        "{}",
        "╚════════════════════════════════════════════════════════════╝".bright_blue()
    );
    println!();
}

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {}", message).bright_green().bold());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("❌ {}", message).bright_red().bold());
}

pub fn print_info(message: &str) {
    println!("{}", format!("ℹ️  {}", message).bright_cyan());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {}", message).bright_yellow());
}

/// Aligned `label: value` line
pub fn print_field(label: &str, value: &str) {
    println!("   {:<16} {}", format!("{}:", label).dimmed(), value);
}

/// Colour a lowercase status word for tables
pub fn status(word: &str) -> ColoredString {
    match word {
        "succeeded" | "applied" | "healthy" | "no-op" => word.green(),
        "failed" | "unhealthy" | "destroy" => word.red().bold(),
        "running" | "applying" | "update" | "publishing" | "migrating" | "deploying"
        | "verifying" => word.yellow(),
        "create" => word.cyan(),
        _ => word.dimmed(),
    }
}
