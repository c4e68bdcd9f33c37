use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;

use crate::models::Roster;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS upload_runs (
            id          INTEGER PRIMARY KEY,
            source      TEXT NOT NULL,
            description TEXT NOT NULL,
            students    INTEGER NOT NULL,
            teachers    INTEGER NOT NULL,
            schedules   INTEGER NOT NULL,
            status      TEXT NOT NULL DEFAULT 'running'
                        CHECK(status IN ('running','completed','failed','partial')),
            error       TEXT,
            started_at  TEXT NOT NULL,
            finished_at TEXT
        );

        CREATE TABLE IF NOT EXISTS upload_batches (
            id       INTEGER PRIMARY KEY,
            run_id   INTEGER NOT NULL REFERENCES upload_runs(id),
            kind     TEXT NOT NULL CHECK(kind IN ('students','schedules')),
            batch    INTEGER NOT NULL,
            total    INTEGER NOT NULL,
            records  INTEGER NOT NULL,
            accepted BOOLEAN NOT NULL,
            reason   TEXT,
            UNIQUE(run_id, kind, batch)
        );
        CREATE INDEX IF NOT EXISTS idx_batches_run ON upload_batches(run_id);
        ",
    )?;
    Ok(())
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ── Runs ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    /// Nothing reached the server.
    Failed,
    /// Some batches were accepted before the failure.
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    fn parse(s: &str) -> RunStatus {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "partial" => RunStatus::Partial,
            _ => RunStatus::Running,
        }
    }
}

pub fn start_run(conn: &Connection, source: &str, description: &str, roster: &Roster) -> Result<i64> {
    conn.execute(
        "INSERT INTO upload_runs (source, description, students, teachers, schedules, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            source,
            description,
            roster.students.len(),
            roster.teachers.len(),
            roster.schedules.len(),
            now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Close a run. A failed run with accepted batches is stored as `partial`.
pub fn finish_run(conn: &Connection, run_id: i64, error: Option<&str>) -> Result<RunStatus> {
    let status = match error {
        None => RunStatus::Completed,
        Some(_) => {
            let accepted: usize = conn.query_row(
                "SELECT COUNT(*) FROM upload_batches WHERE run_id = ?1 AND accepted = 1",
                [run_id],
                |r| r.get(0),
            )?;
            if accepted > 0 {
                RunStatus::Partial
            } else {
                RunStatus::Failed
            }
        }
    };
    conn.execute(
        "UPDATE upload_runs SET status = ?1, error = ?2, finished_at = ?3 WHERE id = ?4",
        rusqlite::params![status.as_str(), error, now(), run_id],
    )?;
    Ok(status)
}

pub struct RunRow {
    pub id: i64,
    pub source: String,
    pub description: String,
    pub students: usize,
    pub teachers: usize,
    pub schedules: usize,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

pub fn fetch_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, source, description, students, teachers, schedules, status, error,
                started_at, finished_at
         FROM upload_runs
         ORDER BY id DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |row| {
            let status: String = row.get(6)?;
            Ok(RunRow {
                id: row.get(0)?,
                source: row.get(1)?,
                description: row.get(2)?,
                students: row.get(3)?,
                teachers: row.get(4)?,
                schedules: row.get(5)?,
                status: RunStatus::parse(&status),
                error: row.get(7)?,
                started_at: row.get(8)?,
                finished_at: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Batches ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    pub kind: String,
    pub batch: usize,
    pub total: usize,
    pub records: usize,
    pub accepted: bool,
    pub reason: Option<String>,
}

pub fn record_batch(conn: &Connection, run_id: i64, b: &BatchRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO upload_batches (run_id, kind, batch, total, records, accepted, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![run_id, b.kind, b.batch, b.total, b.records, b.accepted, b.reason],
    )?;
    Ok(())
}

pub fn fetch_batches(conn: &Connection, run_id: i64) -> Result<Vec<BatchRow>> {
    let mut stmt = conn.prepare(
        "SELECT kind, batch, total, records, accepted, reason
         FROM upload_batches
         WHERE run_id = ?1
         ORDER BY CASE kind WHEN 'students' THEN 0 ELSE 1 END, batch",
    )?;
    let rows = stmt
        .query_map([run_id], |row| {
            Ok(BatchRow {
                kind: row.get(0)?,
                batch: row.get(1)?,
                total: row.get(2)?,
                records: row.get(3)?,
                accepted: row.get(4)?,
                reason: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn batch(kind: &str, n: usize, accepted: bool) -> BatchRow {
        BatchRow {
            kind: kind.into(),
            batch: n,
            total: 3,
            records: 50,
            accepted,
            reason: (!accepted).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn completed_run() {
        let conn = memory();
        let id = start_run(&conn, "horario.htm", "desc", &Roster::default()).unwrap();
        record_batch(&conn, id, &batch("students", 1, true)).unwrap();
        assert_eq!(finish_run(&conn, id, None).unwrap(), RunStatus::Completed);

        let runs = fetch_runs(&conn, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].source, "horario.htm");
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].error.is_none());
    }

    #[test]
    fn failure_after_accepted_batch_is_partial() {
        let conn = memory();
        let id = start_run(&conn, "a.htm", "", &Roster::default()).unwrap();
        record_batch(&conn, id, &batch("students", 1, true)).unwrap();
        record_batch(&conn, id, &batch("students", 2, false)).unwrap();
        let status = finish_run(&conn, id, Some("students batch 2 of 3 was rejected")).unwrap();
        assert_eq!(status, RunStatus::Partial);

        let batches = fetch_batches(&conn, id).unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].accepted);
        assert_eq!(batches[1].reason.as_deref(), Some("boom"));
    }

    #[test]
    fn failure_on_first_batch_is_failed() {
        let conn = memory();
        let id = start_run(&conn, "a.htm", "", &Roster::default()).unwrap();
        record_batch(&conn, id, &batch("students", 1, false)).unwrap();
        assert_eq!(finish_run(&conn, id, Some("x")).unwrap(), RunStatus::Failed);
        assert_eq!(fetch_runs(&conn, 1).unwrap()[0].error.as_deref(), Some("x"));
    }

    #[test]
    fn runs_newest_first_with_limit() {
        let conn = memory();
        for name in ["a.htm", "b.htm", "c.htm"] {
            start_run(&conn, name, "", &Roster::default()).unwrap();
        }
        let runs = fetch_runs(&conn, 2).unwrap();
        let names: Vec<_> = runs.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(names, vec!["c.htm", "b.htm"]);
        assert_eq!(runs[0].status, RunStatus::Running);
    }

    #[test]
    fn batches_ordered_students_then_schedules() {
        let conn = memory();
        let id = start_run(&conn, "a.htm", "", &Roster::default()).unwrap();
        record_batch(&conn, id, &batch("schedules", 1, true)).unwrap();
        record_batch(&conn, id, &batch("students", 2, true)).unwrap();
        record_batch(&conn, id, &batch("students", 1, true)).unwrap();
        let order: Vec<_> = fetch_batches(&conn, id)
            .unwrap()
            .into_iter()
            .map(|b| (b.kind, b.batch))
            .collect();
        assert_eq!(
            order,
            vec![
                ("students".to_string(), 1),
                ("students".to_string(), 2),
                ("schedules".to_string(), 1),
            ]
        );
    }

    #[test]
    fn connect_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("horarios-db-{}", std::process::id()));
        let path = dir.join("nested").join("ledger.sqlite");
        let conn = connect(path.to_str().unwrap()).unwrap();
        init_schema(&conn).unwrap();
        assert!(path.exists());
        drop(conn);
        std::fs::remove_dir_all(&dir).ok();
    }
}
