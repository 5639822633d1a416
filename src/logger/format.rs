//! Log formatting and console output
//!
//! Handles:
//! - Colorized tag and level columns
//! - Text wrapping at word boundaries
//! - Broken pipe handling for piped commands

use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Column widths for alignment
const TAG_WIDTH: usize = 10;
const LEVEL_WIDTH: usize = 8;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let time = Local::now().format("%H:%M:%S").to_string();
    let prefix = format!("{} ", time).dimmed().to_string();

    let base_line = format!("{}[{}] [{}] ", prefix, format_tag(&tag), format_level(level));
    let base_length = strip_ansi_codes(&base_line).len();
    let available_space = if MAX_LINE_LENGTH > base_length + 20 {
        MAX_LINE_LENGTH - base_length
    } else {
        50
    };

    let chunks = wrap_text(message, available_space);
    print_stdout_safe(&format!("{}{}", base_line, chunks[0]));

    if chunks.len() > 1 {
        let continuation = " ".repeat(base_length);
        for chunk in &chunks[1..] {
            print_stdout_safe(&format!("{}{}", continuation, chunk));
        }
    }
}

/// Format a tag with its color
fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.yellow().bold(),
        LogTag::Transport => label.bright_cyan().bold(),
        LogTag::Heartbeat => label.cyan().bold(),
        LogTag::Subscriptions => label.bright_magenta().bold(),
        LogTag::Poller => label.bright_blue().bold(),
        LogTag::Store => label.bright_green().bold(),
        LogTag::Coordinator => label.bright_white().bold(),
    }
}

fn format_level(level: LogLevel) -> ColoredString {
    let label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.bright_yellow().bold(),
        LogLevel::Info => label.white().bold(),
        LogLevel::Debug | LogLevel::Verbose => label.dimmed(),
    }
}

/// Print to stdout, silently dropping output on a closed pipe
fn print_stdout_safe(message: &str) {
    let mut out = stdout().lock();
    if let Err(e) = writeln!(out, "{}", message) {
        if e.kind() != ErrorKind::BrokenPipe {
            let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
        }
        return;
    }
    let _ = out.flush();
}

/// Remove ANSI color codes from text
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::new();
    let mut in_escape = false;

    for ch in text.chars() {
        if ch == '\x1b' {
            in_escape = true;
        } else if in_escape && ch == 'm' {
            in_escape = false;
        } else if !in_escape {
            result.push(ch);
        }
    }
    result
}

/// Wrap text at word boundaries, respecting existing newlines
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current_line = String::new();
        for word in line.split_whitespace() {
            let word_length = word.chars().count();
            let current_length = current_line.chars().count();

            if word_length > max_width {
                if !current_line.is_empty() {
                    result.push(std::mem::take(&mut current_line));
                }
                result.extend(break_long_word(word, max_width));
            } else if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_length + word_length + 1 <= max_width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                result.push(std::mem::replace(&mut current_line, word.to_string()));
            }
        }

        if !current_line.is_empty() {
            result.push(current_line);
        }
    }

    if result.is_empty() {
        result.push(String::new());
    }

    result
}

/// Break a very long word (URLs, JSON payloads) into fixed-width chunks
fn break_long_word(word: &str, max_width: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_width.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}
