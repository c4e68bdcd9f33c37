mod db;
mod models;
mod parser;
mod settings;
mod upload;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};

use models::Roster;
use settings::Settings;
use upload::{HttpIngestClient, IngestClient, IngestPayload, IngestResponse, UploadEvent, UploadOptions};

#[derive(Parser)]
#[command(name = "horarios_sync", about = "Import student rosters from schedule HTML exports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract students, teachers and schedules without uploading
    Parse {
        /// One or more .htm/.html exports
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print the extracted records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract an export and upload it to the ingestion endpoint in batches
    Upload {
        file: PathBuf,
        /// Description sent with every batch (default: derived from file name)
        #[arg(short, long)]
        description: Option<String>,
        /// Plan the batches without sending anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show past uploads, including partially applied ones
    History {
        /// Max runs to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse { files, json } => parse_files(&files, json),
        Commands::Upload {
            file,
            description,
            dry_run,
        } => {
            let settings = Settings::load()?;
            upload_file(&settings, &file, description, dry_run).await
        }
        Commands::History { limit } => {
            let settings = Settings::load()?;
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            show_history(&conn, limit)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn parse_files(files: &[PathBuf], json: bool) -> Result<()> {
    use rayon::prelude::*;

    let results: Vec<(&PathBuf, Result<Roster>)> = files
        .par_iter()
        .map(|path| {
            let roster = parser::load_export(path).map(|html| parser::process_html(&html));
            (path, roster)
        })
        .collect();

    if json {
        let mut out = serde_json::Map::new();
        for (path, roster) in &results {
            if let Ok(roster) = roster {
                out.insert(path.display().to_string(), serde_json::to_value(roster)?);
            }
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "{:<40} | {:>8} | {:>8} | {:>9}",
            "File", "Students", "Teachers", "Schedules"
        );
        println!("{}", "-".repeat(74));
        for (path, roster) in &results {
            if let Ok(r) = roster {
                println!(
                    "{:<40} | {:>8} | {:>8} | {:>9}",
                    truncate(&path.display().to_string(), 40),
                    r.students.len(),
                    r.teachers.len(),
                    r.schedules.len()
                );
            }
        }
    }

    let failed: Vec<_> = results
        .iter()
        .filter_map(|(path, r)| r.as_ref().err().map(|e| (path, e)))
        .collect();
    for (path, e) in &failed {
        eprintln!("{}: {:#}", path.display(), e);
    }
    if !failed.is_empty() {
        anyhow::bail!("{} of {} files could not be read", failed.len(), results.len());
    }
    Ok(())
}

/// Accepts every batch; used to preview the batch plan.
struct DryRunClient;

impl IngestClient for DryRunClient {
    async fn submit(&self, payload: &IngestPayload<'_>) -> Result<IngestResponse> {
        println!(
            "  would send {} students, {} teachers, {} schedules",
            payload.students.len(),
            payload.teachers.len(),
            payload.schedules.len()
        );
        Ok(IngestResponse {
            status: 200,
            error: None,
        })
    }
}

async fn upload_file(
    settings: &Settings,
    file: &Path,
    description: Option<String>,
    dry_run: bool,
) -> Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let html = parser::load_export(file)?;
    let roster = parser::process_html(&html);
    if roster.is_empty() {
        println!("No students, teachers or schedules found in {}.", file.display());
        return Ok(());
    }

    let source = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let description = description.unwrap_or_else(|| format!("Importación de {}", source));
    let opts = UploadOptions {
        student_batch_size: settings.student_batch_size,
        schedule_batch_size: settings.schedule_batch_size,
        description: &description,
    };

    println!(
        "Extracted {} students, {} teachers, {} schedules from {}",
        roster.students.len(),
        roster.teachers.len(),
        roster.schedules.len(),
        source
    );

    if dry_run {
        let report = upload::upload_roster(&DryRunClient, &roster, &opts, |_| {}).await?;
        println!("Dry run: {} requests would be sent.", report.requests);
        return Ok(());
    }

    let client = HttpIngestClient::new(&settings.ingest_url, settings.require_api_key()?)?;
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    let run_id = db::start_run(&conn, &source, &description, &roster)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} batches {msg}")?
            .progress_chars("=> "),
    );
    let mut accepted = 0;

    let outcome = upload::upload_logged(&client, &conn, run_id, &roster, &opts, |event| match event {
        UploadEvent::Started {
            student_batches,
            schedule_batches,
        } => {
            pb.set_length((student_batches + schedule_batches) as u64);
        }
        UploadEvent::BatchAccepted { kind, .. } => {
            accepted += 1;
            pb.set_message(kind.as_str());
            pb.inc(1);
        }
        UploadEvent::BatchFailed { .. } => {}
    })
    .await;
    pb.finish_and_clear();

    match outcome {
        Ok(report) => {
            println!(
                "Uploaded {} students, {} teachers, {} schedules in {} requests.",
                report.students, report.teachers, report.schedules, report.requests
            );
            Ok(())
        }
        Err(e) => {
            if accepted > 0 {
                eprintln!(
                    "Upload partially applied: {} batches were accepted before the failure (run #{}).",
                    accepted, run_id
                );
                eprintln!("See `horarios_sync history` for the batches that reached the server.");
            }
            Err(e.into())
        }
    }
}

fn show_history(conn: &rusqlite::Connection, limit: usize) -> Result<()> {
    let runs = db::fetch_runs(conn, limit)?;
    if runs.is_empty() {
        println!("No uploads recorded.");
        return Ok(());
    }

    println!(
        "{:>4} | {:<19} | {:<24} | {:>8} | {:>8} | {:>9} | {:<9}",
        "#", "Started", "File", "Students", "Teachers", "Schedules", "Status"
    );
    println!("{}", "-".repeat(98));
    for r in &runs {
        println!(
            "{:>4} | {:<19} | {:<24} | {:>8} | {:>8} | {:>9} | {:<9}",
            r.id,
            r.started_at,
            truncate(&r.source, 24),
            r.students,
            r.teachers,
            r.schedules,
            r.status.as_str()
        );
    }

    let troubled: Vec<_> = runs
        .iter()
        .filter(|r| matches!(r.status, db::RunStatus::Partial | db::RunStatus::Failed))
        .collect();
    if !troubled.is_empty() {
        println!("\n--- Failed uploads ---");
        for r in troubled {
            println!(
                "  #{} ({}): {}",
                r.id,
                r.description,
                r.error.as_deref().unwrap_or("-")
            );
            if let Some(finished) = &r.finished_at {
                println!("    finished {}", finished);
            }
            for b in db::fetch_batches(conn, r.id)? {
                let state = if b.accepted { "accepted" } else { "FAILED" };
                println!(
                    "    {} {}/{}: {} ({} records){}",
                    b.kind,
                    b.batch,
                    b.total,
                    state,
                    b.records,
                    b.reason.map(|x| format!(" - {}", x)).unwrap_or_default()
                );
            }
        }
    }

    println!("\n{} runs", runs.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
