use super::{decode_transfer, Applied, StepContext};
use crate::model::{Prop, PropertyPatch, PropertyValue, Record};
use crate::store::full_relation;
use crate::{AppError, AppResult};

/// Detaches the subtasks so the page can be moved. Refuses while any
/// attached subtask is missing from `Subtask Transfer`.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let (ids, has_more) = record.relation(Prop::ChildLink)?;
    if ids.is_empty() && !has_more {
        return Ok(Applied::skipped("no subtasks attached"));
    }
    let Some(saved) = decode_transfer(record, Prop::SubtaskTransfer)? else {
        return Err(not_saved(record, "subtasks are attached but were never saved"));
    };
    let attached = full_relation(ctx.store, record, Prop::ChildLink).await?;
    if let Some(missing) = attached.iter().find(|id| !saved.contains(id)) {
        return Err(
            not_saved(record, "an attached subtask is missing from the saved list")
                .with_context("subtask_id", missing.clone()),
        );
    }

    let patch = PropertyPatch::new().set(Prop::ChildLink, PropertyValue::relation(Vec::new()));
    ctx.store.update(&record.id, patch.into_map()).await?;
    Ok(Applied::succeeded(format!("removed {} subtasks", attached.len())))
}

fn not_saved(record: &Record, message: &str) -> AppError {
    AppError::new(AppError::RELATION_NOT_SAVED, message.to_string())
        .with_context("record_id", record.id.clone())
        .with_context("property", Prop::SubtaskTransfer.name())
}
