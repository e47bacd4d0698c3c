//! Console summaries
//!
//! Tables are fixed-width boxes: three 29-wide columns for totals, two
//! 40-wide columns for the discarded breakdown.

use crate::generator::Tally;
use crossterm::style::{Color, Stylize};
use std::io::{self, IsTerminal, Write};
use unicode_width::UnicodeWidthStr;

const WIDE: usize = 29;
const NARROW: usize = 40;
const RULE: &str = "<=========================================>";

/// Pad `text` on both sides to `width` display columns. Surrounding quotes
/// are dropped; text that is already too wide is returned as is.
pub fn center_align(text: &str, width: usize) -> String {
    let text = text.trim_matches('"');
    let len = UnicodeWidthStr::width(text);
    if len >= width {
        return text.to_string();
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
}

fn border(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for w in widths {
        line.push_str(&"-".repeat(w + 2));
        line.push('+');
    }
    line
}

fn padding_row(widths: &[usize]) -> String {
    let mut line = String::from("|");
    for w in widths {
        line.push_str(&" ".repeat(w + 2));
        line.push('|');
    }
    line
}

fn row(cells: &[(String, Option<Color>)], width: usize, color: bool) -> String {
    let mut line = String::from("|");
    for (text, tint) in cells {
        let cell = center_align(text, width);
        let cell = match tint {
            Some(c) if color => cell.with(*c).to_string(),
            _ => cell,
        };
        line.push_str(&format!(" {} |", cell));
    }
    line
}

fn table(out: &mut String, headers: &[&str], values: &[(String, Option<Color>)], width: usize, color: bool) {
    let widths = vec![width; headers.len()];
    let headers: Vec<(String, Option<Color>)> = headers.iter().map(|h| (h.to_string(), None)).collect();
    out.push_str(&border(&widths));
    out.push('\n');
    out.push_str(&row(&headers, width, false));
    out.push('\n');
    out.push_str(&border(&widths));
    out.push('\n');
    out.push_str(&padding_row(&widths));
    out.push('\n');
    out.push_str(&row(values, width, color));
    out.push('\n');
    out.push_str(&padding_row(&widths));
    out.push('\n');
    out.push_str(&border(&widths));
    out.push('\n');
}

/// Totals table followed by the discarded breakdown
pub fn render_tally(tally: &Tally, title: &str, discarded_title: &str, color: bool) -> String {
    let mut out = String::new();
    out.push_str(title);
    out.push('\n');
    table(
        &mut out,
        &["Total Test Cases", "Test Cases Passed", "Test Cases Failed"],
        &[
            (tally.total.to_string(), Some(Color::Yellow)),
            (tally.passed.to_string(), Some(Color::DarkGreen)),
            (tally.discarded().to_string(), Some(Color::Yellow)),
        ],
        WIDE,
        color,
    );
    out.push_str(discarded_title);
    out.push('\n');
    table(
        &mut out,
        &["Build failures", "No Coverage output"],
        &[
            (tally.failed_build.to_string(), Some(Color::Magenta)),
            (tally.no_coverage_gain.to_string(), Some(Color::Green)),
        ],
        NARROW,
        color,
    );
    out
}

fn use_color() -> bool {
    io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn emit(text: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
        tracing::warn!(error = %err, "failed to write report");
    }
}

pub fn print_iteration_summary(tally: &Tally) {
    let body = render_tally(tally, "Tests generated in Session", "Discarded tests in session", use_color());
    emit(&format!("\n{}\n{}{}\n", RULE, body, RULE));
}

pub fn print_session_summary(counters: &Tally) {
    let body = render_tally(counters, "Total Test Summary", "Discarded Cases Summary", use_color());
    emit(&format!("\n{}\nCOMPLETE TEST GENERATE SUMMARY\n{}{}\n", RULE, body, RULE));
}

fn highlight(text: String) -> String {
    if use_color() {
        text.with(Color::Green).to_string()
    } else {
        text
    }
}

pub fn print_progress(current_percent: f64, desired_percent: f64, source: &str) {
    emit(&highlight(format!(
        "Current Coverage: {}% for file {}\nDesired Coverage: {}% for file {}\n",
        current_percent, source, desired_percent, source
    )));
}

pub fn print_target_reached(source: &str, desired_percent: f64, current_percent: f64, iterations: u32) {
    emit(&highlight(format!(
        "For File {} Reached above target coverage of {}% (Current Coverage: {}%) in {} iterations.\n",
        source, desired_percent, current_percent, iterations
    )));
}

pub fn print_iteration_limit(source: &str, current_percent: f64) {
    emit(&highlight(format!(
        "For File {} Reached maximum iteration limit without achieving desired coverage. Current Coverage: {}%\n",
        source, current_percent
    )));
}
