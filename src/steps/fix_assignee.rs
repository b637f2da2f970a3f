use tracing::info;

use super::{Applied, StepContext};
use crate::model::{Person, Prop, PropertyPatch, PropertyValue, Record};
use crate::summary::RecordSummary;
use crate::{AppError, AppResult};

/// Leaves exactly one assignee on the record. Without any assignee the
/// configured fallback principal is used; with several the operator picks
/// one and the others move to participants.
pub async fn apply(ctx: &StepContext<'_>, record: &Record) -> AppResult<Applied> {
    let assignees = record.people(Prop::Assignee)?;
    match assignees.len() {
        1 => Ok(Applied::skipped("single assignee")),
        0 => {
            let fallback = fallback_assignee(ctx).await?;
            let patch = PropertyPatch::new().set(
                Prop::Assignee,
                PropertyValue::People(vec![fallback.clone()]),
            );
            ctx.store.update(&record.id, patch.into_map()).await?;
            info!(
                target: "taskmover",
                event = "assignee_fallback",
                record_id = %record.id,
                assignee = %fallback.id
            );
            Ok(Applied::succeeded(format!(
                "assigned fallback {}",
                fallback.display_name()
            )))
        }
        _ => {
            let summary = RecordSummary::from_record(record);
            let Some(index) = ctx.operator.choose_assignee(&summary, assignees).await? else {
                return Ok(Applied::skipped("operator left the assignees unchanged"));
            };
            let chosen = assignees.get(index).cloned().ok_or_else(|| {
                AppError::new(
                    "ASSIGNEE/INVALID_CHOICE",
                    format!("choice {index} is out of range"),
                )
                .with_context("candidates", assignees.len().to_string())
            })?;
            let others: Vec<Person> = assignees
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, person)| person.clone())
                .collect();
            let participants = merge_participants(record.people(Prop::Participants)?, &others);
            let patch = PropertyPatch::new()
                .set(Prop::Assignee, PropertyValue::People(vec![chosen.clone()]))
                .set(Prop::Participants, PropertyValue::People(participants));
            ctx.store.update(&record.id, patch.into_map()).await?;
            Ok(Applied::succeeded(format!(
                "kept {}, moved {} to participants",
                chosen.display_name(),
                others.len()
            ))
            .with_details(
                others
                    .iter()
                    .map(|person| format!("participant: {}", person.display_name()))
                    .collect(),
            ))
        }
    }
}

/// Existing participants first, then the demoted assignees not already listed.
pub fn merge_participants(existing: &[Person], added: &[Person]) -> Vec<Person> {
    let mut merged = existing.to_vec();
    for person in added {
        if !merged.iter().any(|p| p.id == person.id) {
            merged.push(person.clone());
        }
    }
    merged
}

/// Matches `wanted` against a principal's id, email (case-insensitive) or name.
pub fn resolve_principal<'a>(principals: &'a [Person], wanted: &str) -> Option<&'a Person> {
    let wanted = wanted.trim();
    principals.iter().find(|person| {
        person.id == wanted
            || person
                .email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(wanted))
            || person.name.as_deref() == Some(wanted)
    })
}

async fn fallback_assignee(ctx: &StepContext<'_>) -> AppResult<Person> {
    if let Some(person) = ctx.fallback.get() {
        return Ok(person.clone());
    }
    let wanted = ctx.config.fallback_assignee.as_deref().ok_or_else(|| {
        AppError::new(
            "ASSIGNEE/NO_FALLBACK",
            "Record has no assignee and no fallback assignee is configured",
        )
    })?;
    let principals = ctx.store.list_principals().await?;
    let person = resolve_principal(&principals, wanted)
        .cloned()
        .ok_or_else(|| {
            AppError::new(
                "ASSIGNEE/FALLBACK_NOT_FOUND",
                format!("No workspace user matches the fallback assignee '{wanted}'"),
            )
            .with_context("principals", principals.len().to_string())
        })?;
    Ok(ctx.fallback.get_or_init(|| person).clone())
}
