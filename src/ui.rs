//! Terminal output for the sync commands.
//!
//! One visual language everywhere: a right-aligned status marker in a
//! narrow gutter, detail in plain text after it.

#![allow(dead_code)]

use colored::Colorize;

/// Informational line.
pub fn info(msg: &str) {
    println!("{:>4} {}", "info".blue(), msg);
}

/// Success line.
pub fn success(msg: &str) {
    println!("{:>4} {}", "ok".green().bold(), msg);
}

/// Warning line; loader warnings and skipped references end up here.
pub fn warn(msg: &str) {
    println!("{:>4} {}", "warn".yellow().bold(), msg);
}

/// Error line, on stderr.
pub fn error(msg: &str) {
    eprintln!("{:>4} {}", "err".red().bold(), msg);
}

/// Muted hint under a section or list entry, indented past the gutter.
pub fn hint(msg: &str) {
    println!("     {}", msg.dimmed());
}

/// Title for a command run.
pub fn header(title: &str) {
    println!();
    println!("{} {}", "::".cyan().bold(), title.bold());
}

/// Section inside a command run.
pub fn section(title: &str) {
    println!();
    println!("{}{}", "── ".cyan(), title.cyan().bold());
}

/// Aligned key/value detail line.
pub fn kv(key: &str, value: &str) {
    println!("     {:<10} {}", format!("{}:", key).dimmed(), value);
}
