//! Structural preconditions a Tasks record must meet before it can move.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{MigrationMarker, Prop, PropertyPatch, PropertyValue, Record};
use crate::store::RecordStore;
use crate::{AppError, AppResult};

pub const FINISHED_STATUSES: &[&str] = &["Done", "Cancelled"];
pub const ACTIVITY_STATUSES: &[&str] = &["Done", "Cancelled", "Ongoing"];
pub const PROJECT_KINDS: &[&str] = &["Project"];
pub const ACTIVITY_KINDS: &[&str] = &["Project", "Activity"];

/// What to do when a record has more subtasks than one page read returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Page through the relation and carry on.
    #[default]
    ReadAll,
    /// Refuse the record.
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EligibilityRules {
    pub allow_activities: bool,
    pub overflow_policy: OverflowPolicy,
}

impl EligibilityRules {
    pub fn allowed_statuses(&self) -> &'static [&'static str] {
        if self.allow_activities {
            ACTIVITY_STATUSES
        } else {
            FINISHED_STATUSES
        }
    }

    pub fn allowed_kinds(&self) -> &'static [&'static str] {
        if self.allow_activities {
            ACTIVITY_KINDS
        } else {
            PROJECT_KINDS
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Eligibility {
    pub fn into_error(self, record_id: &str) -> Option<AppError> {
        if self.valid {
            return None;
        }
        Some(
            AppError::new(AppError::INELIGIBLE, self.errors.join("; "))
                .with_context("record_id", record_id.to_string())
                .with_context("error_count", self.errors.len().to_string()),
        )
    }
}

/// Runs every check and collects all failures.
pub fn validate_record(record: &Record, rules: &EligibilityRules) -> Eligibility {
    let mut errors = Vec::new();

    let allowed = rules.allowed_statuses();
    match record.select(Prop::Status) {
        Ok(Some(status)) if allowed.contains(&status) => {}
        Ok(Some(status)) => errors.push(format!(
            "Status is '{status}', expected one of: {}",
            allowed.join(", ")
        )),
        Ok(None) => errors.push(format!(
            "Status is empty, expected one of: {}",
            allowed.join(", ")
        )),
        Err(err) => errors.push(err.to_string()),
    }

    let kinds = rules.allowed_kinds();
    match record.select(Prop::Kind) {
        Ok(Some(kind)) if kinds.contains(&kind) => {}
        Ok(Some(kind)) => errors.push(format!(
            "Type is '{kind}', expected {}",
            kinds.join(" or ")
        )),
        Ok(None) => errors.push(format!("Type is empty, expected {}", kinds.join(" or "))),
        Err(err) => errors.push(err.to_string()),
    }

    match record.relation(Prop::ParentLink) {
        Ok((ids, has_more)) if !ids.is_empty() || has_more => errors.push(format!(
            "Record has a parent ({}); migrate the parent first",
            ids.first().map(String::as_str).unwrap_or("more than one page")
        )),
        Ok(_) => {}
        Err(err) => errors.push(err.to_string()),
    }

    match record.relation(Prop::ChildLink) {
        Ok((ids, true)) if rules.overflow_policy == OverflowPolicy::Reject => {
            errors.push(format!(
                "Subtasks exceed one page ({} shown, more available)",
                ids.len()
            ))
        }
        Ok(_) => {}
        Err(err) => errors.push(err.to_string()),
    }

    Eligibility {
        valid: errors.is_empty(),
        errors,
    }
}

/// Validates and, when the record is not eligible, writes the `Error`
/// marker so later steps stop selecting it.
pub async fn validate_and_mark(
    store: &dyn RecordStore,
    record: &Record,
    rules: &EligibilityRules,
) -> AppResult<Eligibility> {
    let eligibility = validate_record(record, rules);
    if !eligibility.valid {
        mark_error(store, &record.id).await?;
        info!(
            target: "taskmover",
            event = "record_ineligible",
            record_id = %record.id,
            errors = %eligibility.errors.join("; ")
        );
    }
    Ok(eligibility)
}

pub async fn mark_error(store: &dyn RecordStore, id: &str) -> AppResult<()> {
    let patch = PropertyPatch::new().set(
        Prop::Marker,
        PropertyValue::marker(Some(MigrationMarker::Error)),
    );
    store.update(id, patch.into_map()).await?;
    Ok(())
}
