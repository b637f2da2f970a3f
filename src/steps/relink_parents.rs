use tracing::{debug, warn};

use super::{decode_transfer, Applied, StepContext};
use crate::model::{MigrationMarker, Prop, PropertyPatch, PropertyValue, Record};
use crate::summary::RecordSummary;
use crate::AppResult;

/// Restores the parked parents into `Parent Projects` and clears the
/// transfer field in the same update. With no subtasks left to relink the
/// record is finished and marked `Migrated` there as well.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let Some(parents) = decode_transfer(record, Prop::ParentTransfer)? else {
        return Ok(Applied::skipped("no parents to relink"));
    };

    let mut details = Vec::with_capacity(parents.len());
    for parent_id in &parents {
        let summary = match ctx.store.retrieve(parent_id).await {
            Ok(parent) => RecordSummary::from_record(&parent),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) if err.is_not_found() => {
                debug!(target: "taskmover", event = "parent_missing", parent_id = %parent_id);
                RecordSummary::unknown(parent_id.clone())
            }
            Err(err) => {
                warn!(
                    target: "taskmover",
                    event = "parent_lookup_failed",
                    parent_id = %parent_id,
                    code = err.code(),
                    error = %err.message()
                );
                RecordSummary::unknown(parent_id.clone())
            }
        };
        details.push(format!("parent: {} ({})", summary.title, summary.id));
    }

    let mut patch = PropertyPatch::new()
        .set(Prop::ParentProjects, PropertyValue::relation(parents.clone()))
        .set(Prop::ParentTransfer, PropertyValue::Text(String::new()));
    let finished = record.text(Prop::SubtaskTransfer)?.is_none();
    if finished {
        patch.insert(
            Prop::Marker,
            PropertyValue::marker(Some(MigrationMarker::Migrated)),
        );
    }
    ctx.store.update(&record.id, patch.into_map()).await?;
    let mut message = format!(
        "linked {} parent project{}",
        parents.len(),
        if parents.len() == 1 { "" } else { "s" }
    );
    if finished {
        message.push_str(&format!("; marked {}", MigrationMarker::Migrated));
    }
    Ok(Applied::succeeded(message).with_details(details))
}
