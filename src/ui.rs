// src/ui.rs

use crate::{constants, symbols};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

pub fn print_header(title: &str) {
    println!("\n{}", "═".repeat(constants::UI_WIDTH));
    println!(" {}", title.cyan().bold());
    println!("{}", "═".repeat(constants::UI_WIDTH));
}

pub fn print_sub_header(title: &str) {
    println!("\n--- {} ---", title.bold());
}

pub fn info(msg: &str) {
    println!("{} {}", *symbols::INFO, msg);
}

pub fn warn(msg: &str) {
    println!("{} {}", *symbols::WARN, msg.yellow());
}

/// 单任务百分比进度条，由任务的进度回调驱动。
pub fn new_percent_progress_bar(prefix: &str) -> ProgressBar {
    let pbar = ProgressBar::new(100);
    pbar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pbar.set_prefix(prefix.to_string());
    pbar
}
