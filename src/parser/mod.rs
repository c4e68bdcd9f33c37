pub mod accumulator;
pub mod classify;
pub mod context;
pub mod table;

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::models::Roster;
use accumulator::Accumulator;
use classify::RowKind;
use context::ParseContext;

const EXPORT_EXTENSIONS: &[&str] = &["htm", "html"];

/// Three-stage pipeline: markup → table rows → classified rows → roster.
///
/// Never fails: rows that match no rule are dropped, and a document without
/// usable tables yields an empty roster.
pub fn process_html(markup: &str) -> Roster {
    let tables = table::extract_tables(markup);
    info!("Found {} tables", tables.len());

    let mut acc = Accumulator::new();
    for (i, rows) in tables.iter().enumerate() {
        debug!("Table {}: {} rows", i + 1, rows.len());
        rows.iter().fold(ParseContext::default(), |ctx, row| {
            let kind = classify::classify(row);
            let ctx = ctx.advance(&kind);
            match kind {
                RowKind::GroupTeacherHeader {
                    teacher: Some(teacher),
                    ..
                } => {
                    acc.upsert_teacher(teacher);
                }
                RowKind::StudentRow(student) => {
                    if let Some(schedule) = ctx.schedule_for(&student.student_id) {
                        acc.append_schedule(schedule);
                    }
                    acc.upsert_student(student);
                }
                _ => {}
            }
            ctx
        });
    }

    let roster = acc.finish();
    info!(
        "Extracted {} students, {} teachers, {} schedules",
        roster.students.len(),
        roster.teachers.len(),
        roster.schedules.len()
    );
    roster
}

/// Read an exported schedule file. Only `.htm`/`.html` files are accepted,
/// and the check happens before anything is read.
pub fn load_export(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if !ext.is_some_and(|e| EXPORT_EXTENSIONS.contains(&e.as_str())) {
        bail!("{} is not an .htm or .html file", path.display());
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
