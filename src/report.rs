use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::model::{Collection, Record};
use crate::orchestrator::OrchestratorRun;
use crate::steps::{StepKind, StepReport};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StepReportFile<'a> {
    generated_at: String,
    #[serde(flatten)]
    report: &'a StepReport,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDumpFile<'a> {
    generated_at: String,
    step: StepKind,
    collection: Collection,
    record_count: usize,
    schema: &'a serde_json::Value,
    records: &'a [Record],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportFile<'a> {
    generated_at: String,
    #[serde(flatten)]
    run: &'a OrchestratorRun,
}

fn write_json<T: Serialize>(dir: &Path, prefix: &str, payload: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create reports directory {}", dir.display()))?;

    let file_name = format!("{prefix}-{}.json", Utc::now().format("%Y%m%d-%H%M%S%.3f"));
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(payload)
        .with_context(|| format!("serialize {prefix} report"))?;
    fs::write(&path, json).with_context(|| format!("write report {}", path.display()))?;
    Ok(path)
}

pub fn write_step_report(reports_dir: &Path, report: &StepReport) -> Result<PathBuf> {
    write_json(
        reports_dir,
        report.step.as_str(),
        &StepReportFile {
            generated_at: Utc::now().to_rfc3339(),
            report,
        },
    )
}

/// Dumps a step's working set exactly as read, with the collection schema.
pub fn write_raw_dump(
    raw_dir: &Path,
    step: StepKind,
    records: &[Record],
    schema: &serde_json::Value,
) -> Result<PathBuf> {
    write_json(
        raw_dir,
        &format!("raw-{}", step.as_str()),
        &RawDumpFile {
            generated_at: Utc::now().to_rfc3339(),
            step,
            collection: step.collection(),
            record_count: records.len(),
            schema,
            records,
        },
    )
}

pub fn write_run_report(reports_dir: &Path, run: &OrchestratorRun) -> Result<PathBuf> {
    write_json(
        reports_dir,
        "demo",
        &RunReportFile {
            generated_at: Utc::now().to_rfc3339(),
            run,
        },
    )
}
