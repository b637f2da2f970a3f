use tracing::warn;

use super::{decode_transfer, Applied, StepContext};
use crate::model::{MigrationMarker, Prop, PropertyPatch, PropertyValue, Record};
use crate::store::full_relation;
use crate::{transfer, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtaskLink {
    Linked,
    AlreadyLinked,
}

/// Links every parked subtask back to the moved project. The transfer field
/// is only cleared when all subtasks succeeded, so a partial run can be
/// repeated; links that already exist are never added twice.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let parents_pending = record.text(Prop::ParentTransfer)?.is_some();
    let Some(subtasks) = decode_transfer(record, Prop::SubtaskTransfer)? else {
        if parents_pending {
            return Ok(Applied::skipped("no subtasks; parent relink still pending"));
        }
        finish(ctx, record, None).await?;
        return Ok(Applied::succeeded(format!(
            "no subtasks; marked {}",
            MigrationMarker::Migrated
        )));
    };

    let mut details = Vec::with_capacity(subtasks.len());
    let mut failures = 0usize;
    let mut linked = 0usize;
    for subtask_id in &subtasks {
        match link_subtask(ctx, subtask_id, &record.id).await {
            Ok(SubtaskLink::Linked) => {
                linked += 1;
                details.push(format!("{subtask_id}: linked"));
            }
            Ok(SubtaskLink::AlreadyLinked) => details.push(format!("{subtask_id}: already linked")),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(
                    target: "taskmover",
                    event = "subtask_relink_failed",
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

    if failures > 0 {
        return Ok(Applied::failed(format!(
            "{failures} of {} subtasks could not be relinked; transfer field kept for a re-run",
            subtasks.len()
        ))
        .with_details(details));
    }

    let marker = (!parents_pending).then_some(MigrationMarker::Migrated);
    finish(ctx, record, marker).await?;
    let mut message = format!("relinked {linked} of {} subtasks", subtasks.len());
    if let Some(marker) = marker {
        message.push_str(&format!("; marked {marker}"));
    }
    Ok(Applied::succeeded(message).with_details(details))
}

/// Adds `project_id` to the subtask's `Project` relation unless present and
/// takes the subtask out of the relink queue. The subtask's `Parent Transfer`
/// is cleared only when it holds exactly `project_id`.
pub async fn link_subtask(
    ctx: &StepContext<'_>,
    subtask_id: &str,
    project_id: &str,
) -> AppResult<SubtaskLink> {
    let subtask = ctx.store.retrieve(subtask_id).await?;
    let mut projects = full_relation(ctx.store, &subtask, Prop::TaskProject).await?;
    let mut patch = PropertyPatch::new();
    let already = projects.iter().any(|id| same_page(id, project_id));
    if !already {
        projects.push(project_id.to_string());
        patch.insert(Prop::TaskProject, PropertyValue::relation(projects));
    }
    if parked_for(&subtask, project_id)? {
        patch.insert(Prop::ParentTransfer, PropertyValue::Text(String::new()));
    }
    if subtask.marker()? == Some(MigrationMarker::ToRelink) {
        patch.insert(Prop::Marker, PropertyValue::marker(None));
    }
    if !patch.is_empty() {
        ctx.store.update(subtask_id, patch.into_map()).await?;
    }
    Ok(if already {
        SubtaskLink::AlreadyLinked
    } else {
        SubtaskLink::Linked
    })
}

async fn finish(
    ctx: &StepContext<'_>,
    record: &Record,
    marker: Option<MigrationMarker>,
) -> AppResult<()> {
    let mut patch = PropertyPatch::new();
    if record.text(Prop::SubtaskTransfer)?.is_some() {
        patch.insert(Prop::SubtaskTransfer, PropertyValue::Text(String::new()));
    }
    if let Some(marker) = marker {
        patch.insert(Prop::Marker, PropertyValue::marker(Some(marker)));
    }
    if patch.is_empty() {
        return Ok(());
    }
    ctx.store.update(&record.id, patch.into_map()).await?;
    Ok(())
}

fn parked_for(subtask: &Record, project_id: &str) -> AppResult<bool> {
    let Some(text) = subtask.text(Prop::ParentTransfer)? else {
        return Ok(false);
    };
    Ok(match transfer::decode(text) {
        Ok(ids) => matches!(ids.as_slice(), [only] if same_page(only, project_id)),
        Err(_) => false,
    })
}

/// Page ids compare equal with or without hyphens.
fn same_page(a: &str, b: &str) -> bool {
    a.replace('-', "").eq_ignore_ascii_case(&b.replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ids_match_across_hyphenation() {
        assert!(same_page(
            "0f2e1c3a-9b8d-4e7f-a6b5-c4d3e2f1a0b9",
            "0F2E1C3A9B8D4E7FA6B5C4D3E2F1A0B9"
        ));
        assert!(!same_page("0f2e1c3a-9b8d-4e7f-a6b5-c4d3e2f1a0b9", "x"));
    }
}
