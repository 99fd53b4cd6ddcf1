//! Leaderboard export: CSV, JSON, Markdown.
//!
//! Writers are hand-rolled builders over the sorted row slice; the same
//! rows always produce the same bytes.

use std::io::Write;
use std::path::Path;

use crate::LeaderboardRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())?.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Render rows in the given format.
pub fn export_rows(rows: &[LeaderboardRow], format: ExportFormat) -> String {
    match format {
        ExportFormat::Csv => export_csv(rows),
        ExportFormat::Json => export_json(rows),
        ExportFormat::Markdown => export_markdown(rows),
    }
}

/// Render and write to `path`.
pub fn write_leaderboard(
    rows: &[LeaderboardRow],
    format: ExportFormat,
    path: &Path,
) -> Result<(), String> {
    let content = export_rows(rows, format);
    let mut file =
        std::fs::File::create(path).map_err(|e| format!("Failed to create file: {}", e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write: {}", e))?;
    Ok(())
}

const COLUMNS: &[&str] = &[
    "metric",
    "benchmark",
    "value",
    "split",
    "method",
    "category",
    "strategy",
    "paper_id",
    "paper_title",
    "evidence",
];

fn format_value(value: f64) -> String {
    format!("{}", value)
}

fn row_fields(row: &LeaderboardRow) -> Vec<String> {
    vec![
        row.metric.clone(),
        row.benchmark.clone(),
        format_value(row.value),
        row.split.clone().unwrap_or_default(),
        row.method.clone(),
        row.category.clone(),
        row.strategy.clone(),
        row.paper_id.clone(),
        row.paper_title.clone(),
        row.evidence.clone(),
    ]
}

// ── CSV ─────────────────────────────────────────────────────────────

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn export_csv(rows: &[LeaderboardRow]) -> String {
    let mut out = String::new();
    out.push_str(&COLUMNS.join(","));
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row_fields(row).iter().map(|f| csv_escape(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

// ── JSON ────────────────────────────────────────────────────────────

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\x20' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

fn json_str(s: &str) -> String {
    format!("\"{}\"", json_escape(s))
}

fn json_opt_str(s: &Option<String>) -> String {
    match s {
        Some(v) => json_str(v),
        None => "null".to_string(),
    }
}

fn export_json(rows: &[LeaderboardRow]) -> String {
    let mut out = String::from("[\n");
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            "  {{\n    \"metric\": {},\n    \"benchmark\": {},\n    \"value\": {},\n    \"split\": {},\n    \"method\": {},\n    \"category\": {},\n    \"strategy\": {},\n    \"paper_id\": {},\n    \"paper_title\": {},\n    \"evidence\": {}\n  }}{}\n",
            json_str(&row.metric),
            json_str(&row.benchmark),
            format_value(row.value),
            json_opt_str(&row.split),
            json_str(&row.method),
            json_str(&row.category),
            json_str(&row.strategy),
            json_str(&row.paper_id),
            json_str(&row.paper_title),
            json_str(&row.evidence),
            if i + 1 < rows.len() { "," } else { "" },
        ));
    }
    out.push_str("]\n");
    out
}

// ── Markdown ────────────────────────────────────────────────────────

fn md_escape(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn export_markdown(rows: &[LeaderboardRow]) -> String {
    let mut out = String::new();
    out.push_str("| Metric | Benchmark | Value | Method | Category | Strategy | Paper | Evidence |\n");
    out.push_str("|---|---|---|---|---|---|---|---|\n");
    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            md_escape(&row.metric),
            md_escape(&row.benchmark),
            format_value(row.value),
            md_escape(&row.method),
            md_escape(&row.category),
            md_escape(&row.strategy),
            md_escape(&row.paper_id),
            md_escape(&row.evidence),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> LeaderboardRow {
        LeaderboardRow {
            metric: "worst-group accuracy".into(),
            value: 0.855,
            split: Some("test".into()),
            method: "RLS".into(),
            category: "Invariant Learning".into(),
            strategy: "Invariant Risk Minimization".into(),
            benchmark: "Waterbirds".into(),
            paper_id: "2301.00001".into(),
            paper_title: "Robust Learning, \"Revisited\"".into(),
            evidence: "RLS reaches 85.5% worst-group accuracy.".into(),
        }
    }

    #[test]
    fn csv_has_header_and_escapes_quotes() {
        let out = export_rows(&[row()], ExportFormat::Csv);
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), COLUMNS.len());
        let data = lines.next().unwrap();
        // The title contains a comma and quotes, so it must be quoted.
        assert!(data.contains("\"Robust Learning, \"\"Revisited\"\"\""));
    }

    #[test]
    fn json_is_parseable_and_escaped() {
        let out = export_rows(&[row()], ExportFormat::Json);
        // json parsing via std: just assert structure markers; the
        // escaping helper is exercised by the quote in the title.
        assert!(out.starts_with("[\n"));
        assert!(out.contains("\\\"Revisited\\\""));
        assert!(out.contains("\"value\": 0.855"));
    }

    #[test]
    fn markdown_escapes_pipes() {
        let mut r = row();
        r.evidence = "a | b".into();
        let out = export_rows(&[r], ExportFormat::Markdown);
        assert!(out.contains("a \\| b"));
    }

    #[test]
    fn export_is_byte_identical_across_runs() {
        let rows = vec![row(), row()];
        for format in [ExportFormat::Csv, ExportFormat::Json, ExportFormat::Markdown] {
            assert_eq!(export_rows(&rows, format), export_rows(&rows, format));
        }
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.csv")),
            Some(ExportFormat::Csv)
        );
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.MD")),
            Some(ExportFormat::Markdown)
        );
        assert_eq!(ExportFormat::from_extension(Path::new("out.xlsx")), None);
    }

    #[test]
    fn empty_rows_still_render_headers() {
        let csv = export_rows(&[], ExportFormat::Csv);
        assert!(csv.starts_with("metric,"));
        let json = export_rows(&[], ExportFormat::Json);
        assert_eq!(json, "[\n]\n");
    }

    #[test]
    fn write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaderboard.csv");
        write_leaderboard(&[row()], ExportFormat::Csv, &path).unwrap();
        assert!(path.is_file());
    }
}
