//! Session reports: last-N table, per-kind summary, progress medians and
//! CSV export over the persisted session outcomes.

use crate::db::Db;
use crate::models::{Disposition, Session};
use crate::path::PathError;
use chrono::{DateTime, Utc};
use sprechpfad_core::LearnerContext;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// One report line, extracted from a session row and its outcome payload.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub step_kind: String,
    pub template_id: String,
    pub wpm: Option<f64>,
    pub unique_ratio: Option<f64>,
    pub word_count: Option<usize>,
    pub target_rate: Option<f64>,
    pub bonus_rate: Option<f64>,
    pub low_quality: Option<bool>,
    pub asr_empty: Option<bool>,
    pub abandoned: bool,
}

impl ReportRow {
    fn from_session(session: &Session, template_id: String) -> Self {
        let outcome = session.outcome.as_ref().map(|o| &o.0);
        let flags = outcome.and_then(|o| o.flags.as_ref());
        Self {
            session_id: session.id,
            started_at: session.started_at,
            step_kind: session.step_kind.clone(),
            template_id,
            wpm: outcome.and_then(|o| o.wpm),
            unique_ratio: outcome.and_then(|o| o.stats.as_ref()).map(|s| s.unique_ratio),
            word_count: outcome.and_then(|o| o.stats.as_ref()).map(|s| s.word_count),
            target_rate: outcome
                .and_then(|o| o.target_usage.as_ref())
                .and_then(|u| u.rate),
            bonus_rate: outcome
                .and_then(|o| o.bonus_usage.as_ref())
                .and_then(|u| u.rate),
            low_quality: flags.map(|f| f.low_quality),
            asr_empty: flags.map(|f| f.asr_empty),
            abandoned: outcome.map(|o| o.disposition == Disposition::Abandoned).unwrap_or(false),
        }
    }
}

/// The learner's most recent sessions, newest first, optionally filtered by
/// step kind.
pub async fn fetch_last_sessions(
    db: &Db,
    ctx: &LearnerContext,
    last: i64,
    kind: Option<&str>,
) -> Result<Vec<ReportRow>, PathError> {
    let mut sql = String::from(
        "SELECT s.id, s.run_id, s.step_index, s.step_kind, s.text_id, s.status, s.outcome, \
                s.started_at, s.completed_at, r.template_id \
         FROM sessions s JOIN runs r ON r.id = s.run_id \
         WHERE r.learner = ?",
    );
    if kind.is_some() {
        sql.push_str(" AND s.step_kind = ?");
    }
    sql.push_str(" ORDER BY s.started_at DESC LIMIT ?");

    let mut query = sqlx::query(&sql).bind(ctx.as_str());
    if let Some(kind) = kind {
        query = query.bind(kind);
    }
    let rows = query.bind(last).fetch_all(db.pool()).await?;

    use sqlx::Row;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let session = Session {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_index: row.try_get("step_index")?,
            step_kind: row.try_get("step_kind")?,
            text_id: row.try_get("text_id")?,
            status: row.try_get("status")?,
            outcome: row.try_get("outcome")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        };
        let template_id: String = row.try_get("template_id")?;
        out.push(ReportRow::from_session(&session, template_id));
    }
    Ok(out)
}

fn fmt_opt_f64(value: Option<f64>, decimals: usize) -> String {
    value.map(|v| format!("{v:.decimals$}")).unwrap_or_default()
}

fn fmt_opt_bool(value: Option<bool>) -> String {
    match value {
        Some(true) => "Y".into(),
        Some(false) => "N".into(),
        None => String::new(),
    }
}

/// Fixed-width table of the rows.
pub fn render_table(rows: &[ReportRow]) -> String {
    if rows.is_empty() {
        return "Keine Sessions gefunden.".to_string();
    }

    let headers = ["started_at", "kind", "template", "wpm", "uniq", "target", "bonus", "lowq"];
    let data: Vec<[String; 8]> = rows
        .iter()
        .map(|r| {
            [
                r.started_at.format("%Y-%m-%d %H:%M").to_string(),
                if r.abandoned {
                    format!("{}*", r.step_kind)
                } else {
                    r.step_kind.clone()
                },
                r.template_id.clone(),
                fmt_opt_f64(r.wpm, 1),
                fmt_opt_f64(r.unique_ratio, 3),
                fmt_opt_f64(r.target_rate, 3),
                fmt_opt_f64(r.bonus_rate, 3),
                fmt_opt_bool(r.low_quality),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &data {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let fmt_row = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut out = String::new();
    out.push_str(&fmt_row(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>()));
    out.push('\n');
    out.push_str(&fmt_row(
        &widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>(),
    ));
    for row in &data {
        out.push('\n');
        out.push_str(&fmt_row(row));
    }
    out
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        None
    } else {
        Some(collected.iter().sum::<f64>() / collected.len() as f64)
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn fmt_stat(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{v:.decimals$}"))
        .unwrap_or_else(|| "-".to_string())
}

/// Per-kind averages (trend view).
pub fn render_summary(rows: &[ReportRow]) -> String {
    if rows.is_empty() {
        return "Keine Sessions gefunden.".to_string();
    }

    let mut groups: BTreeMap<&str, Vec<&ReportRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.step_kind.as_str()).or_default().push(row);
    }

    let mut out = String::from("SUMMARY (Durchschnittswerte):");
    for (kind, items) in groups {
        let wpm = mean(items.iter().filter_map(|r| r.wpm));
        let uniq = mean(items.iter().filter_map(|r| r.unique_ratio));
        let target = mean(items.iter().filter_map(|r| r.target_rate));
        let bonus = mean(items.iter().filter_map(|r| r.bonus_rate));
        let empty_rate = mean(
            items
                .iter()
                .filter_map(|r| r.asr_empty.map(|b| if b { 1.0 } else { 0.0 })),
        );

        out.push_str(&format!(
            "\n- {kind:<12} | n={:3} | wpm={} | uniq={} | target={} | bonus={} | empty={}",
            items.len(),
            fmt_stat(wpm, 1),
            fmt_stat(uniq, 3),
            fmt_stat(target, 3),
            fmt_stat(bonus, 3),
            fmt_stat(empty_rate, 2),
        ));
    }
    out
}

/// Per-kind medians plus low-quality/abandon rates (progress view).
pub fn render_progress(rows: &[ReportRow]) -> String {
    if rows.is_empty() {
        return "Keine Sessions gefunden.".to_string();
    }

    let mut groups: BTreeMap<&str, Vec<&ReportRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.step_kind.as_str()).or_default().push(row);
    }

    let mut out = String::from("PROGRESS (Median / Quoten):");
    for (kind, items) in groups {
        let wc = median(items.iter().filter_map(|r| r.word_count.map(|w| w as f64)).collect());
        let wpm = median(items.iter().filter_map(|r| r.wpm).collect());
        let uniq = median(items.iter().filter_map(|r| r.unique_ratio).collect());
        let lowq_rate = mean(
            items
                .iter()
                .filter_map(|r| r.low_quality.map(|b| if b { 1.0 } else { 0.0 })),
        );
        let abandon_rate = mean(
            items
                .iter()
                .map(|r| if r.abandoned { 1.0 } else { 0.0 }),
        );

        out.push_str(&format!(
            "\n- {kind:<12} | n={:3} | wc~{} | wpm~{} | uniq~{} | lowq={} | abandoned={}",
            items.len(),
            fmt_stat(wc, 0),
            fmt_stat(wpm, 1),
            fmt_stat(uniq, 3),
            fmt_stat(lowq_rate, 2),
            fmt_stat(abandon_rate, 2),
        ));
    }
    out
}

/// Writes the rows as CSV. The header is written even for zero rows.
pub fn write_csv(rows: &[ReportRow], out_path: &Path) -> std::io::Result<()> {
    fn escape(field: &str) -> String {
        if field.contains([',', '"', '\n']) {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    let mut out = String::from(
        "session_id,started_at,step_kind,template_id,wpm,unique_ratio,target_rate,bonus_rate,low_quality,abandoned\n",
    );
    for r in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            r.session_id,
            r.started_at.to_rfc3339(),
            escape(&r.step_kind),
            escape(&r.template_id),
            fmt_opt_f64(r.wpm, 1),
            fmt_opt_f64(r.unique_ratio, 4),
            fmt_opt_f64(r.target_rate, 4),
            fmt_opt_f64(r.bonus_rate, 4),
            fmt_opt_bool(r.low_quality),
            if r.abandoned { "Y" } else { "N" },
        ));
    }
    std::fs::write(out_path, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, wpm: Option<f64>, low_quality: Option<bool>, abandoned: bool) -> ReportRow {
        ReportRow {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            step_kind: kind.to_string(),
            template_id: "daily-news".to_string(),
            wpm,
            unique_ratio: Some(0.8),
            word_count: Some(42),
            target_rate: None,
            bonus_rate: None,
            low_quality,
            asr_empty: Some(false),
            abandoned,
        }
    }

    #[test]
    fn table_marks_abandoned_sessions() {
        let rows = vec![row("read_respond", Some(90.0), Some(false), true)];
        let table = render_table(&rows);
        assert!(table.contains("read_respond*"), "{table}");
        assert!(table.contains("90.0"), "{table}");
    }

    #[test]
    fn empty_table_has_message() {
        assert_eq!(render_table(&[]), "Keine Sessions gefunden.");
    }

    #[test]
    fn summary_groups_by_kind() {
        let rows = vec![
            row("read_respond", Some(80.0), Some(false), false),
            row("read_respond", Some(100.0), Some(false), false),
            row("review", None, None, false),
        ];
        let summary = render_summary(&rows);
        assert!(summary.contains("read_respond"), "{summary}");
        assert!(summary.contains("wpm=90.0"), "{summary}");
        assert!(summary.contains("review"), "{summary}");
    }

    #[test]
    fn progress_reports_medians_and_rates() {
        let rows = vec![
            row("read_respond", Some(80.0), Some(true), false),
            row("read_respond", Some(100.0), Some(false), false),
            row("read_respond", Some(120.0), Some(false), true),
        ];
        let progress = render_progress(&rows);
        assert!(progress.contains("wpm~100.0"), "{progress}");
        assert!(progress.contains("lowq=0.33"), "{progress}");
        assert!(progress.contains("abandoned=0.33"), "{progress}");
    }

    #[test]
    fn csv_writes_header_for_zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&[], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("session_id,started_at,"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn csv_contains_row_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rows = vec![row("review", Some(77.5), Some(false), false)];
        write_csv(&rows, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("review"), "{content}");
        assert!(content.contains("77.5"), "{content}");
        assert!(content.contains(",N\n"), "{content}");
    }
}
