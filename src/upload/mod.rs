pub mod client;

use std::fmt;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::db::{self, BatchRow};
use crate::models::{Roster, Schedule, Student};
pub use client::{HttpIngestClient, IngestClient, IngestPayload, IngestResponse};

/// Reason reported when the server rejects a batch without saying why.
const FALLBACK_REASON: &str = "unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Students,
    Schedules,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Students => "students",
            BatchKind::Schedules => "schedules",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct UploadOptions<'a> {
    pub student_batch_size: usize,
    pub schedule_batch_size: usize,
    pub description: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started {
        student_batches: usize,
        schedule_batches: usize,
    },
    BatchAccepted {
        kind: BatchKind,
        batch: usize,
        total: usize,
        records: usize,
    },
    BatchFailed {
        kind: BatchKind,
        batch: usize,
        total: usize,
        records: usize,
        reason: String,
    },
}

impl UploadEvent {
    /// Ledger row for a finished batch; `None` for `Started`.
    pub fn batch_row(&self) -> Option<BatchRow> {
        match self {
            UploadEvent::Started { .. } => None,
            UploadEvent::BatchAccepted {
                kind,
                batch,
                total,
                records,
            } => Some(BatchRow {
                kind: kind.as_str().to_string(),
                batch: *batch,
                total: *total,
                records: *records,
                accepted: true,
                reason: None,
            }),
            UploadEvent::BatchFailed {
                kind,
                batch,
                total,
                records,
                reason,
            } => Some(BatchRow {
                kind: kind.as_str().to_string(),
                batch: *batch,
                total: *total,
                records: *records,
                accepted: false,
                reason: Some(reason.clone()),
            }),
        }
    }
}

/// Counts submitted by a fully successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub students: usize,
    pub teachers: usize,
    pub schedules: usize,
    pub requests: usize,
}

/// Batch numbers are 1-based. Batches before the failing one stay applied on
/// the server.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{kind} batch {batch} of {total} was rejected (HTTP {status}): {reason}")]
    Rejected {
        kind: BatchKind,
        batch: usize,
        total: usize,
        status: u16,
        reason: String,
    },
    #[error("{kind} batch {batch} of {total} could not be sent: {reason}")]
    Transport {
        kind: BatchKind,
        batch: usize,
        total: usize,
        reason: String,
    },
}

impl UploadError {
    pub fn reason(&self) -> &str {
        match self {
            UploadError::Rejected { reason, .. } | UploadError::Transport { reason, .. } => reason,
        }
    }
}

/// Submit a roster in sequential batches, stopping at the first failure.
///
/// Students go first, `student_batch_size` per request, with the full teacher
/// list attached to the first request only. Schedules follow,
/// `schedule_batch_size` per request. No request starts before the previous
/// one has been answered.
pub async fn upload_roster<C: IngestClient>(
    client: &C,
    roster: &Roster,
    opts: &UploadOptions<'_>,
    mut on_event: impl FnMut(&UploadEvent),
) -> Result<UploadReport, UploadError> {
    let student_chunks: Vec<&[Student]> = if roster.students.is_empty() {
        // teachers still need one request of their own
        if roster.teachers.is_empty() {
            Vec::new()
        } else {
            vec![roster.students.as_slice()]
        }
    } else {
        roster
            .students
            .chunks(opts.student_batch_size.max(1))
            .collect()
    };
    let schedule_chunks: Vec<&[Schedule]> = roster
        .schedules
        .chunks(opts.schedule_batch_size.max(1))
        .collect();

    info!(
        "Uploading in {} student batches and {} schedule batches",
        student_chunks.len(),
        schedule_chunks.len()
    );
    on_event(&UploadEvent::Started {
        student_batches: student_chunks.len(),
        schedule_batches: schedule_chunks.len(),
    });

    let mut report = UploadReport::default();

    let total = student_chunks.len();
    for (i, chunk) in student_chunks.into_iter().enumerate() {
        let teachers = if i == 0 { roster.teachers.as_slice() } else { &[] };
        let payload = IngestPayload {
            students: chunk,
            teachers,
            schedules: &[],
            description: opts.description,
        };
        send(client, &payload, BatchKind::Students, i + 1, total, &mut on_event).await?;
        report.students += chunk.len();
        report.teachers += teachers.len();
        report.requests += 1;
    }

    let total = schedule_chunks.len();
    for (i, chunk) in schedule_chunks.into_iter().enumerate() {
        let payload = IngestPayload {
            students: &[],
            teachers: &[],
            schedules: chunk,
            description: opts.description,
        };
        send(client, &payload, BatchKind::Schedules, i + 1, total, &mut on_event).await?;
        report.schedules += chunk.len();
        report.requests += 1;
    }

    info!(
        "Upload complete: {} students, {} teachers, {} schedules in {} requests",
        report.students, report.teachers, report.schedules, report.requests
    );
    Ok(report)
}

/// [`upload_roster`] with every finished batch written to the ledger as it
/// happens, and the run closed afterwards.
///
/// Ledger write failures are logged and never replace the upload outcome.
pub async fn upload_logged<C: IngestClient>(
    client: &C,
    conn: &Connection,
    run_id: i64,
    roster: &Roster,
    opts: &UploadOptions<'_>,
    mut on_event: impl FnMut(&UploadEvent),
) -> Result<UploadReport, UploadError> {
    let outcome = upload_roster(client, roster, opts, |event| {
        if let Some(row) = event.batch_row() {
            if let Err(e) = db::record_batch(conn, run_id, &row) {
                warn!(
                    "Failed to record {} batch {}/{} of run #{}: {:#}",
                    row.kind, row.batch, row.total, run_id, e
                );
            }
        }
        on_event(event);
    })
    .await;

    let error = outcome.as_ref().err().map(|e| e.to_string());
    match db::finish_run(conn, run_id, error.as_deref()) {
        Ok(status) => debug!("Run #{} closed as {}", run_id, status.as_str()),
        Err(e) => warn!("Failed to close run #{}: {:#}", run_id, e),
    }
    outcome
}

async fn send<C: IngestClient>(
    client: &C,
    payload: &IngestPayload<'_>,
    kind: BatchKind,
    batch: usize,
    total: usize,
    on_event: &mut impl FnMut(&UploadEvent),
) -> Result<(), UploadError> {
    let records = payload.students.len() + payload.teachers.len() + payload.schedules.len();
    debug!("Sending {} batch {}/{} ({} records)", kind, batch, total, records);

    let err = match client.submit(payload).await {
        Ok(resp) if resp.is_success() => {
            on_event(&UploadEvent::BatchAccepted {
                kind,
                batch,
                total,
                records,
            });
            return Ok(());
        }
        Ok(resp) => UploadError::Rejected {
            kind,
            batch,
            total,
            status: resp.status,
            reason: resp
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_REASON.to_string()),
        },
        Err(e) => UploadError::Transport {
            kind,
            batch,
            total,
            reason: format!("{:#}", e),
        },
    };

    warn!("{}", err);
    on_event(&UploadEvent::BatchFailed {
        kind,
        batch,
        total,
        records,
        reason: err.reason().to_string(),
    });
    Err(err)
}
