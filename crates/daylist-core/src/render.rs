use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::display_date;
use crate::filter::{Stats, ViewEntry};
use crate::task::Priority;

const EMPTY_VIEW_MESSAGE: &str =
    "No tasks found for the selected date range and filters. Try adjusting your search criteria.";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg
            .get_bool("color")
            .map_err(|_| anyhow!("invalid color setting: {}", cfg.get("color").unwrap_or_default()))?
            .unwrap_or(true);

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, view, stats))]
    pub fn print_view(&mut self, view: &[ViewEntry], stats: Stats, today: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_view(&mut out, view, stats, today)
    }

    pub fn write_view<W: Write>(
        &self,
        mut out: W,
        view: &[ViewEntry],
        stats: Stats,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        if view.is_empty() {
            writeln!(out, "{EMPTY_VIEW_MESSAGE}")?;
        } else {
            let headers = ["Date", "#", "Done", "Priority", "Project", "Assignee", "Task"]
                .into_iter()
                .map(str::to_string)
                .collect();

            let rows = view
                .iter()
                .map(|entry| {
                    let task = &entry.task;
                    let done = if task.done { "[x]" } else { "[ ]" };
                    let text = if task.text.is_empty() {
                        "No description".to_string()
                    } else if task.done {
                        self.paint(&task.text, "2")
                    } else {
                        task.text.clone()
                    };
                    vec![
                        display_date(entry.date, today),
                        self.paint(&entry.original_index.to_string(), "33"),
                        done.to_string(),
                        self.paint(task.priority.label(), priority_color(task.priority)),
                        task.project.clone(),
                        task.assignee.clone(),
                        text,
                    ]
                })
                .collect();

            write_table(&mut out, headers, rows)?;
        }

        writeln!(out)?;
        write_stats(&mut out, stats)?;
        Ok(())
    }

    pub fn print_stats(&mut self, stats: Stats) -> anyhow::Result<()> {
        write_stats(io::stdout().lock(), stats)
    }

    pub fn print_lines<I, S>(&mut self, lines: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = io::stdout().lock();
        for line in lines {
            writeln!(out, "{}", line.as_ref())?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "31",
        Priority::Medium => "33",
        Priority::Low => "32",
    }
}

fn write_stats<W: Write>(mut writer: W, stats: Stats) -> anyhow::Result<()> {
    writeln!(
        writer,
        "{} task(s): {} completed, {} pending",
        stats.total, stats.completed, stats.pending
    )?;
    Ok(())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ", width = *width)?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
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
