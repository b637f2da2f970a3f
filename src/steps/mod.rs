//! Batch steps over the marker-filtered working set.
//!
//! Each step queries its working set once, handles records one after the
//! other in store order and reports every record as succeeded, skipped or
//! failed. A failing record never stops the batch; only fatal errors
//! (credentials, aborted operator) do.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MigrationConfig;
use crate::eligibility::mark_error;
use crate::model::{Collection, MigrationMarker, Person, Prop, Record};
use crate::operator::Operator;
use crate::store::{Filter, RecordStore};
use crate::summary::RecordSummary;
use crate::{report, transfer, AppError, AppResult};

pub mod fix_assignee;
pub mod post_move;
pub mod relink_parents;
pub mod relink_subtasks;
pub mod remove_subtasks;
pub mod save_parents;
pub mod save_subtasks;
pub mod validate;
pub mod verify_move;

pub const NOT_YET_MOVED: &str = "No records found in Projects: not yet moved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Validate,
    FixAssignee,
    SaveParentRelations,
    SaveSubtaskRelations,
    RemoveSubtasks,
    VerifyMove,
    PostMoveUpdate,
    RelinkParentProjects,
    RelinkSubtasks,
}

impl StepKind {
    /// Operator order. The manual move sits between `RemoveSubtasks` and `VerifyMove`.
    pub const ALL: [StepKind; 9] = [
        StepKind::Validate,
        StepKind::FixAssignee,
        StepKind::SaveParentRelations,
        StepKind::SaveSubtaskRelations,
        StepKind::RemoveSubtasks,
        StepKind::VerifyMove,
        StepKind::PostMoveUpdate,
        StepKind::RelinkParentProjects,
        StepKind::RelinkSubtasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Validate => "validate",
            StepKind::FixAssignee => "fix-assignee",
            StepKind::SaveParentRelations => "save-parent-relations",
            StepKind::SaveSubtaskRelations => "save-subtask-relations",
            StepKind::RemoveSubtasks => "remove-subtasks",
            StepKind::VerifyMove => "verify-move",
            StepKind::PostMoveUpdate => "post-move-update",
            StepKind::RelinkParentProjects => "relink-parent-projects",
            StepKind::RelinkSubtasks => "relink-subtasks",
        }
    }

    /// Steps before the move read Tasks, the others read Projects.
    pub fn collection(&self) -> Collection {
        match self {
            StepKind::Validate
            | StepKind::FixAssignee
            | StepKind::SaveParentRelations
            | StepKind::SaveSubtaskRelations
            | StepKind::RemoveSubtasks => Collection::Tasks,
            StepKind::VerifyMove
            | StepKind::PostMoveUpdate
            | StepKind::RelinkParentProjects
            | StepKind::RelinkSubtasks => Collection::Projects,
        }
    }

    /// Whether a failed record gets the `Error` marker.
    pub fn marks_failures(&self) -> bool {
        matches!(
            self,
            StepKind::SaveParentRelations
                | StepKind::SaveSubtaskRelations
                | StepKind::RelinkParentProjects
        )
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Succeeded,
    Skipped,
    Failed,
}

/// What a step did to one record, before it is wrapped into a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub outcome: RecordOutcome,
    pub message: String,
    pub details: Vec<String>,
}

impl Applied {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            outcome: RecordOutcome::Succeeded,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            outcome: RecordOutcome::Skipped,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            outcome: RecordOutcome::Failed,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReport {
    pub record: RecordSummary,
    pub outcome: RecordOutcome,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step: StepKind,
    pub collection: Collection,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub records: Vec<RecordReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl StepReport {
    fn new(step: StepKind) -> Self {
        Self {
            step,
            collection: step.collection(),
            started_at: Utc::now(),
            duration_ms: 0,
            records: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn count(&self, outcome: RecordOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RecordOutcome::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(RecordOutcome::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(RecordOutcome::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn find(&self, record_id: &str) -> Option<&RecordReport> {
        self.records.iter().find(|r| r.record.id == record_id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    Started {
        step: StepKind,
        total: usize,
    },
    Record {
        step: StepKind,
        index: usize,
        total: usize,
        report: RecordReport,
    },
    Finished {
        step: StepKind,
        succeeded: usize,
        skipped: usize,
        failed: usize,
    },
}

pub type StepEventHandler = Arc<dyn Fn(StepEvent) + Send + Sync + 'static>;

/// Everything a step needs, handed in by the caller.
pub struct StepContext<'a> {
    pub store: &'a dyn RecordStore,
    pub config: &'a MigrationConfig,
    pub operator: &'a dyn Operator,
    pub observer: Option<StepEventHandler>,
    /// When set, the working set and collection schema are dumped here.
    pub raw_dir: Option<PathBuf>,
    fallback: OnceCell<Person>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        config: &'a MigrationConfig,
        operator: &'a dyn Operator,
    ) -> Self {
        Self {
            store,
            config,
            operator,
            observer: None,
            raw_dir: None,
            fallback: OnceCell::new(),
        }
    }

    pub fn with_observer(mut self, observer: StepEventHandler) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_raw_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw_dir = Some(dir.into());
        self
    }

    fn emit(&self, event: StepEvent) {
        if let Some(callback) = &self.observer {
            callback(event);
        }
    }

    pub(crate) fn encode_ids<S: AsRef<str>>(&self, ids: &[S]) -> String {
        transfer::encode_as(ids, self.config.transfer_format, &self.config.page_url_base)
    }
}

/// Runs `step` over its whole working set.
pub async fn run_step(ctx: &StepContext<'_>, step: StepKind) -> AppResult<StepReport> {
    let started = Instant::now();
    let mut report = StepReport::new(step);
    let records = ctx
        .store
        .query(step.collection(), Filter::Marker(MigrationMarker::ToMigrate))
        .await
        .map_err(|err| err.with_context("step", step.as_str()))?;

    if let Some(dir) = &ctx.raw_dir {
        let schema = ctx.store.collection_schema(step.collection()).await?;
        let path = report::write_raw_dump(dir, step, &records, &schema)?;
        info!(target: "taskmover", event = "raw_dump_written", step = step.as_str(), path = %path.display());
    }

    let total = records.len();
    info!(
        target: "taskmover",
        event = "step_started",
        step = step.as_str(),
        collection = step.collection().as_str(),
        total
    );
    ctx.emit(StepEvent::Started { step, total });

    if step == StepKind::VerifyMove && records.is_empty() {
        report.notes.push(NOT_YET_MOVED.to_string());
    }

    for (index, record) in records.iter().enumerate() {
        let record_report = process_record(ctx, step, record).await?;
        ctx.emit(StepEvent::Record {
            step,
            index,
            total,
            report: record_report.clone(),
        });
        report.records.push(record_report);
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        target: "taskmover",
        event = "step_finished",
        step = step.as_str(),
        succeeded = report.succeeded(),
        skipped = report.skipped(),
        failed = report.failed(),
        duration_ms = report.duration_ms
    );
    ctx.emit(StepEvent::Finished {
        step,
        succeeded: report.succeeded(),
        skipped: report.skipped(),
        failed: report.failed(),
    });
    Ok(report)
}

/// Applies `step` to one record and folds failures into the report. Only
/// fatal errors escape.
pub async fn process_record(
    ctx: &StepContext<'_>,
    step: StepKind,
    record: &Record,
) -> AppResult<RecordReport> {
    let summary = RecordSummary::from_record(record);
    let result = match step {
        StepKind::Validate => validate::apply(ctx, record).await,
        StepKind::FixAssignee => fix_assignee::apply(ctx, record).await,
        StepKind::SaveParentRelations => save_parents::apply(ctx, record).await,
        StepKind::SaveSubtaskRelations => save_subtasks::apply(ctx, record).await,
        StepKind::RemoveSubtasks => remove_subtasks::apply(ctx, record).await,
        StepKind::VerifyMove => verify_move::apply(ctx, record).await,
        StepKind::PostMoveUpdate => post_move::apply(ctx, record).await,
        StepKind::RelinkParentProjects => relink_parents::apply(ctx, record).await,
        StepKind::RelinkSubtasks => relink_subtasks::apply(ctx, record).await,
    };

    match result {
        Ok(mut applied) => {
            if applied.outcome == RecordOutcome::Failed && step.marks_failures() {
                warn!(
                    target: "taskmover",
                    event = "record_failed",
                    step = step.as_str(),
                    record_id = %record.id,
                    error = %applied.message
                );
                applied.details.push(mark_failed(ctx, record).await);
            }
            Ok(RecordReport {
                record: summary,
                outcome: applied.outcome,
                message: applied.message,
                details: applied.details,
                error: None,
            })
        }
        Err(err) if err.is_fatal() => Err(err
            .with_context("step", step.as_str())
            .with_context("record_id", record.id.clone())),
        Err(err) => {
            warn!(
                target: "taskmover",
                event = "record_failed",
                step = step.as_str(),
                record_id = %record.id,
                code = err.code(),
                error = %err.message()
            );
            let mut details = Vec::new();
            if step.marks_failures() {
                details.push(mark_failed(ctx, record).await);
            }
            Ok(RecordReport {
                record: summary,
                outcome: RecordOutcome::Failed,
                message: err.message().to_string(),
                details,
                error: Some(err),
            })
        }
    }
}

/// Takes the record out of the working set. Returns the report line.
async fn mark_failed(ctx: &StepContext<'_>, record: &Record) -> String {
    match mark_error(ctx.store, &record.id).await {
        Ok(()) => format!("marked {}", MigrationMarker::Error),
        Err(err) => format!("could not set Error marker: {}", err.message()),
    }
}

/// Save steps never overwrite a parked relation list.
pub(crate) fn ensure_transfer_empty(record: &Record, prop: Prop) -> AppResult<()> {
    if let Some(existing) = record.text(prop)? {
        return Err(AppError::new(
            AppError::TRANSFER_FILLED,
            format!("'{prop}' is already filled; clear it before saving again"),
        )
        .with_context("record_id", record.id.clone())
        .with_context("property", prop.name())
        .with_context("existing", existing.to_string()));
    }
    Ok(())
}

pub(crate) fn decode_transfer(record: &Record, prop: Prop) -> AppResult<Option<Vec<String>>> {
    match record.text(prop)? {
        None => Ok(None),
        Some(text) => transfer::decode(text).map(Some).map_err(|err| {
            AppError::from(err)
                .with_context("record_id", record.id.clone())
                .with_context("property", prop.name())
        }),
    }
}
