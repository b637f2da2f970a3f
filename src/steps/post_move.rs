use super::{Applied, StepContext};
use crate::model::{Prop, PropertyPatch, PropertyValue, Record};
use crate::AppResult;

/// Task status values and the project status each one becomes.
pub const STATUS_MAP: &[(&str, &str)] = &[
    ("Done", "Completed"),
    ("Cancelled", "Cancelled"),
    ("Ongoing", "Ongoing"),
];

/// Properties copied verbatim under their project-side name.
const RENAMES: &[(Prop, Prop)] = &[
    (Prop::Kind, Prop::Category),
    (Prop::Importance, Prop::Priority),
    (Prop::Deadline, Prop::TargetDate),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub patch: PropertyPatch,
    pub warnings: Vec<String>,
}

/// Builds the sparse project payload. Absent or empty source values are
/// left out so the update never clears a destination property.
pub fn build_update(record: &Record) -> AppResult<ProjectUpdate> {
    let mut update = ProjectUpdate::default();

    if let Some(status) = record.select(Prop::Status)? {
        match STATUS_MAP.iter().find(|(from, _)| *from == status) {
            Some((_, to)) => update
                .patch
                .insert(Prop::ProjectStatus, PropertyValue::select(*to)),
            None => update.warnings.push(format!(
                "status '{status}' has no project equivalent; '{}' left unchanged",
                Prop::ProjectStatus
            )),
        }
    }

    for (from, to) in RENAMES {
        if let Some(value) = record.value(*from)? {
            update.patch.insert(*to, value.clone());
        }
    }

    let assignees = record.people(Prop::Assignee)?;
    match assignees.len() {
        0 => {}
        1 => update
            .patch
            .insert(Prop::Owner, PropertyValue::People(assignees.to_vec())),
        n => update.warnings.push(format!(
            "{n} assignees; '{}' not set, run fix-assignee first",
            Prop::Owner
        )),
    }

    Ok(update)
}

pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let ProjectUpdate { patch, warnings } = build_update(record)?;
    if patch.is_empty() {
        return Ok(Applied::skipped("nothing to copy").with_details(warnings));
    }
    let written: Vec<String> = patch.as_map().keys().cloned().collect();
    ctx.store.update(&record.id, patch.into_map()).await?;
    let mut details: Vec<String> = written.iter().map(|name| format!("set {name}")).collect();
    details.extend(warnings);
    Ok(Applied::succeeded(format!("updated {} properties", written.len())).with_details(details))
}
