use tracing::warn;

use super::{ensure_transfer_empty, Applied, RecordOutcome, StepContext};
use crate::eligibility::OverflowPolicy;
use crate::model::{MigrationMarker, Prop, PropertyPatch, PropertyValue, Record};
use crate::store::full_relation;
use crate::{transfer, AppError, AppResult};

/// Parks the child relation in `Subtask Transfer` and queues every subtask
/// for relinking with the project id in its own `Parent Transfer`.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let (ids, has_more) = record.relation(Prop::ChildLink)?;
    if has_more && ctx.config.overflow_policy == OverflowPolicy::Reject {
        return Err(AppError::new(
            AppError::RELATION_OVERFLOW,
            format!("more than {} subtasks on one page read", ids.len()),
        )
        .with_context("record_id", record.id.clone()));
    }
    if ids.is_empty() && !has_more {
        return Ok(Applied::skipped("no subtasks"));
    }
    ensure_transfer_empty(record, Prop::SubtaskTransfer)?;

    let subtasks = full_relation(ctx.store, record, Prop::ChildLink).await?;
    let patch = PropertyPatch::new().set(
        Prop::SubtaskTransfer,
        PropertyValue::Text(ctx.encode_ids(&subtasks)),
    );
    ctx.store.update(&record.id, patch.into_map()).await?;

    let mut details = Vec::with_capacity(subtasks.len());
    let mut failures = 0usize;
    for subtask_id in &subtasks {
        match queue_subtask(ctx, subtask_id, &record.id).await {
            Ok(note) => details.push(format!("{subtask_id}: {note}")),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    target: "taskmover",
                    event = "subtask_queue_failed",
                    record_id = %record.id,
                    subtask_id = %subtask_id,
                    code = err.code(),
                    error = %err.message()
                );
                failures += 1;
                details.push(format!("{subtask_id}: {}", err.message()));
            }
        }
    }

    let message = format!("saved {} subtasks", subtasks.len());
    let mut applied = Applied::succeeded(message).with_details(details);
    if failures > 0 {
        applied.outcome = RecordOutcome::Failed;
        applied.message = format!(
            "saved {} subtasks, {failures} could not be queued for relinking",
            subtasks.len()
        );
    }
    Ok(applied)
}

async fn queue_subtask(
    ctx: &StepContext<'_>,
    subtask_id: &str,
    project_id: &str,
) -> AppResult<&'static str> {
    let subtask = ctx.store.retrieve(subtask_id).await?;
    let mut patch = PropertyPatch::new();
    match subtask.text(Prop::ParentTransfer)? {
        None => patch.insert(
            Prop::ParentTransfer,
            PropertyValue::Text(ctx.encode_ids(&[project_id])),
        ),
        Some(existing) => {
            let parked = transfer::decode(existing)?;
            if parked != [project_id] {
                return Err(AppError::new(
                    AppError::TRANSFER_FILLED,
                    format!("subtask already holds another parent: {existing}"),
                )
                .with_context("subtask_id", subtask_id.to_string()));
            }
        }
    }
    if subtask.marker()? != Some(MigrationMarker::ToRelink) {
        patch.insert(
            Prop::Marker,
            PropertyValue::marker(Some(MigrationMarker::ToRelink)),
        );
    }
    if patch.is_empty() {
        return Ok("already queued");
    }
    ctx.store.update(subtask_id, patch.into_map()).await?;
    Ok("queued for relink")
}
