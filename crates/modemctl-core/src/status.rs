//! Status rows and presentation sinks.
//!
//! Every discovery result and session step is rendered as a
//! [`StatusRow`] with a message, a detail column, and a [`Severity`].
//! The console sink prints each row as a small grid table coloured by
//! severity; the recording sink keeps rows for assertions.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

// ─── Shared types ───────────────────────────────────────────────────────────

/// Outcome severity of a reported row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Pass,
    Warn,
    Fail,
    Info,
}

/// A single human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub message: String,
    pub detail: String,
    pub severity: Severity,
}

impl StatusRow {
    pub fn new(message: impl Into<String>, detail: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
            severity,
        }
    }

    pub fn pass(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(message, detail, Severity::Pass)
    }

    pub fn warn(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(message, detail, Severity::Warn)
    }

    pub fn fail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(message, detail, Severity::Fail)
    }

    pub fn info(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(message, detail, Severity::Info)
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Receives status rows.  Purely observational: implementations must not
/// fail the caller.
pub trait StatusSink: Send + Sync {
    fn report(&self, row: StatusRow);
}

/// Prints rows to stdout as coloured grid tables.
#[derive(Debug, Default)]
pub struct ConsoleStatusSink;

impl ConsoleStatusSink {
    pub fn new() -> Self {
        Self
    }
}

impl StatusSink for ConsoleStatusSink {
    fn report(&self, row: StatusRow) {
        let table = render_grid(&[("Message", "Details")], std::slice::from_ref(&row));
        let style = match row.severity {
            Severity::Pass => console::Style::new().green(),
            Severity::Warn => console::Style::new().yellow(),
            Severity::Fail => console::Style::new().red(),
            Severity::Info => console::Style::new().cyan(),
        };
        println!("{}", style.apply_to(table));
    }
}

/// Keeps every reported row in memory.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    rows: Mutex<Vec<StatusRow>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<StatusRow> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl StatusSink for RecordingStatusSink {
    fn report(&self, row: StatusRow) {
        match self.rows.lock() {
            Ok(mut rows) => rows.push(row),
            Err(e) => log::error!("status recorder poisoned: {}", e),
        }
    }
}

// ─── Grid rendering ─────────────────────────────────────────────────────────

/// Render rows as a two-column grid table with a header separator.
///
/// Multi-line cells (raw modem responses usually are) are split on line
/// breaks and padded so the borders stay aligned.
pub fn render_grid(header: &[(&str, &str)], rows: &[StatusRow]) -> String {
    let cells: Vec<(Vec<&str>, Vec<&str>)> = header
        .iter()
        .map(|(a, b)| (vec![*a], vec![*b]))
        .chain(
            rows.iter()
                .map(|r| (split_cell(&r.message), split_cell(&r.detail))),
        )
        .collect();

    let w0 = column_width(cells.iter().map(|c| &c.0));
    let w1 = column_width(cells.iter().map(|c| &c.1));

    let border = |fill: char| {
        format!(
            "+{}+{}+",
            fill.to_string().repeat(w0 + 2),
            fill.to_string().repeat(w1 + 2)
        )
    };

    let mut out = Vec::new();
    out.push(border('-'));
    for (i, (left, right)) in cells.iter().enumerate() {
        let height = left.len().max(right.len());
        for line in 0..height {
            let l = left.get(line).copied().unwrap_or("");
            let r = right.get(line).copied().unwrap_or("");
            out.push(format!(
                "| {}{} | {}{} |",
                l,
                " ".repeat(w0 - l.chars().count()),
                r,
                " ".repeat(w1 - r.chars().count())
            ));
        }
        if i + 1 == header.len() {
            out.push(border('='));
        } else {
            out.push(border('-'));
        }
    }
    out.join("\n")
}

fn column_width<'a, 'b: 'a>(column: impl Iterator<Item = &'a Vec<&'b str>>) -> usize {
    column
        .flat_map(|lines| lines.iter())
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0)
}

fn split_cell(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
    if lines.is_empty() {
        vec![""]
    } else {
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_row_serializes_camel_case() {
        let row = StatusRow::warn("AT+QFDEL=\"a.pem\"", "File not found");
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"severity\":\"warn\""));
        let back: StatusRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_render_grid_widest_cell_sets_column() {
        let table = render_grid(
            &[("Message", "Details")],
            &[
                StatusRow::pass("AT", "OK"),
                StatusRow::fail("AT+QFUPL=\"cert.pem\"", "x"),
            ],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "+---------------------+---------+");
        assert_eq!(lines[3], "| AT                  | OK      |");
        assert_eq!(lines[5], "| AT+QFUPL=\"cert.pem\" | x       |");
    }

    #[test]
    fn test_render_grid_single_row() {
        let table = render_grid(
            &[("Message", "Details")],
            &[StatusRow::pass("Modem found", "on port: COM3")],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "+-------------+---------------+");
        assert_eq!(lines[1], "| Message     | Details       |");
        assert_eq!(lines[2], "+=============+===============+");
        assert_eq!(lines[3], "| Modem found | on port: COM3 |");
        assert_eq!(lines[4], "+-------------+---------------+");
    }

    #[test]
    fn test_render_grid_multiline_detail() {
        let table = render_grid(
            &[("Message", "Details")],
            &[StatusRow::pass("AT+CFUN?", "+CFUN: 1\r\n\r\nOK")],
        );
        assert!(table.contains("| AT+CFUN? | +CFUN: 1 |"));
        assert!(table.contains("|          | OK       |"));
        let widths: Vec<usize> = table.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_render_grid_empty_detail() {
        let table = render_grid(&[("Message", "Details")], &[StatusRow::fail("AT", "")]);
        assert!(table.contains("| AT      |         |"));
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingStatusSink::new();
        sink.report(StatusRow::info("one", ""));
        sink.report(StatusRow::fail("two", "x"));
        let rows = sink.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "one");
        assert_eq!(rows[1].severity, Severity::Fail);
    }
}
