//! Statement display payloads (DISP tables, INFO listings) and their plain-text
//! rendering as ASCII grids.

use serde::Serialize;

use crate::types::Value;

/// Widest a single cell may render before it is truncated.
const MAX_CELL_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Display {
    Table { columns: Vec<String>, rows: Vec<Vec<Value>> },
    Info { entries: Vec<(String, String)> },
}

impl Display {
    pub fn row_count(&self) -> usize {
        match self {
            Display::Table { rows, .. } => rows.len(),
            Display::Info { entries } => entries.len(),
        }
    }
}

/// Render a display payload as text.
pub fn render_text(d: &Display) -> String {
    match d {
        Display::Table { columns, rows } => {
            let cells: Vec<Vec<String>> = rows.iter().map(|r| r.iter().map(|v| v.render()).collect()).collect();
            render_grid(columns, &cells)
        }
        Display::Info { entries } => {
            let w = entries.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
            let mut out = String::new();
            for (k, v) in entries {
                out.push_str(&format!("{:<w$}  {}\n", k, v, w = w));
            }
            out
        }
    }
}

fn render_grid(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count().min(MAX_CELL_WIDTH)).collect();
    for r in rows {
        for (i, cell) in r.iter().enumerate().take(columns.len()) {
            widths[i] = widths[i].max(cell.chars().count().min(MAX_CELL_WIDTH));
        }
    }
    let sep = build_separator(&widths);
    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&build_row(columns, &widths, false));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for r in rows {
        out.push_str(&build_row(r, &widths, true));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&format!("rows: {}, cols: {}\n", rows.len(), columns.len()));
    out
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize], align_numbers: bool) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(|c| c.as_str()).unwrap_or("");
        let text = truncate(cell, *w);
        let pad = " ".repeat(w.saturating_sub(text.chars().count()));
        s.push(' ');
        if align_numbers && is_numeric_like(cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    !st.is_empty() && st.chars().any(|c| c.is_ascii_digit()) && st.chars().all(|c| c.is_ascii_digit() || ".-+eE".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_aligns_numbers_right() {
        let d = Display::Table {
            columns: vec!["id".into(), "pid".into()],
            rows: vec![vec![Value::Str("p1".into()), Value::Int(4)], vec![Value::Str("p22".into()), Value::Int(1234)]],
        };
        let text = render_text(&d);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "+-----+------+");
        assert_eq!(lines[1], "| id  | pid  |");
        assert_eq!(lines[3], "| p1  |    4 |");
        assert_eq!(lines[4], "| p22 | 1234 |");
        assert_eq!(lines[6], "rows: 2, cols: 2");
    }

    #[test]
    fn long_cells_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
