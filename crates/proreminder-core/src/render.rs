use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_local;
use crate::notify::Notification;
use crate::reminder::Entity;

const ALARM_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    /// Positions in the `#` column are 1-based and are what `move` expects.
    /// Rows without a position are hidden by the view and left unnumbered.
    #[tracing::instrument(skip(self, items, now), fields(count = items.len()))]
    pub fn print_reminder_table<E: Entity>(
        &self,
        items: &[(Option<usize>, E)],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let headers = ["#", "", "Title", "Alarm", "Description", "ID"]
            .map(String::from)
            .to_vec();

        let mut rows = Vec::with_capacity(items.len());
        for (position, item) in items {
            let alarm = match item.alarm_at() {
                Some(at) if at <= now => self.paint(&format_local(at, ALARM_FORMAT), "31"),
                Some(at) => format_local(at, ALARM_FORMAT),
                None => String::new(),
            };

            rows.push(vec![
                position.map_or_else(String::new, |pos| self.paint(&pos.to_string(), "33")),
                item.symbol().to_string(),
                item.title().to_string(),
                alarm,
                item.description().unwrap_or_default().to_string(),
                item.id().to_string(),
            ]);
        }

        write_table(io::stdout().lock(), headers, rows)
    }

    /// One `key on|off` line per stored preference, under its wire name.
    pub fn print_filters<F: Serialize>(&self, filters: &F) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let value = serde_json::to_value(filters)?;
        if let Some(fields) = value.as_object() {
            for (key, flag) in fields {
                let state = if flag.as_bool().unwrap_or(false) { "on" } else { "off" };
                writeln!(out, "{key:<12}{state}")?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, rows), fields(count = rows.len()))]
    pub fn print_notifications(&self, rows: &[&Notification]) -> anyhow::Result<()> {
        let headers = ["Slot", "Fires", "Title", "Body"].map(String::from).to_vec();
        let rows = rows
            .iter()
            .map(|n| {
                vec![
                    self.paint(&n.id.to_string(), "33"),
                    format_local(n.fire_at, ALARM_FORMAT),
                    n.title.clone(),
                    n.body.clone(),
                ]
            })
            .collect();

        write_table(io::stdout().lock(), headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{strip_ansi, write_table};

    #[test]
    fn emoji_cells_are_padded_by_display_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["#".into(), "Title".into()],
            vec![
                vec!["🔴".into(), "Pay rent".into()],
                vec!["x".into(), "Gym".into()],
            ],
        )
        .expect("table");

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#  Title    ");
        assert_eq!(lines[2], "🔴 Pay rent ");
        assert_eq!(lines[3], "x  Gym      ");
    }

    #[test]
    fn ansi_sequences_do_not_count_toward_width() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }
}
