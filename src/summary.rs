use std::fmt;

use serde::Serialize;

use crate::model::{MigrationMarker, Prop, Record};

pub const UNTITLED: &str = "Untitled";

/// Display projection of a record. Never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<MigrationMarker>,
}

impl RecordSummary {
    /// Summaries are built for logs and reports, so malformed properties
    /// degrade to empty fields instead of failing.
    pub fn from_record(record: &Record) -> Self {
        let title = record
            .title()
            .ok()
            .flatten()
            .unwrap_or(UNTITLED)
            .to_string();
        let status = record
            .select(Prop::Status)
            .ok()
            .flatten()
            .or_else(|| record.select(Prop::ProjectStatus).ok().flatten())
            .map(str::to_string);
        let mut assignees: Vec<String> = record
            .people(Prop::Assignee)
            .unwrap_or_default()
            .iter()
            .map(|person| person.display_name().to_string())
            .collect();
        if assignees.is_empty() {
            assignees = record
                .people(Prop::Owner)
                .unwrap_or_default()
                .iter()
                .map(|person| person.display_name().to_string())
                .collect();
        }
        Self {
            id: record.id.clone(),
            title,
            url: record.url.clone(),
            status,
            assignees,
            marker: record.marker().ok().flatten(),
        }
    }

    /// Placeholder for records that could not be fetched.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: "Unknown".to_string(),
            url: String::new(),
            status: None,
            assignees: Vec::new(),
            marker: None,
        }
    }
}

impl fmt::Display for RecordSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.id)?;
        if let Some(status) = &self.status {
            write!(f, " [{status}]")?;
        }
        if !self.assignees.is_empty() {
            write!(f, " @{}", self.assignees.join(", @"))?;
        }
        if let Some(marker) = &self.marker {
            write!(f, " <{marker}>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Person, PropertyValue};

    #[test]
    fn summarises_known_fields() {
        let record = Record::new("abc")
            .with(Prop::Title, PropertyValue::Title("Website".into()))
            .with(Prop::Status, PropertyValue::select("Done"))
            .with(
                Prop::Assignee,
                PropertyValue::People(vec![Person::named("u1", "Ada")]),
            )
            .with(Prop::Marker, PropertyValue::select("ToMigrate"));
        let summary = RecordSummary::from_record(&record);
        assert_eq!(summary.title, "Website");
        assert_eq!(summary.status.as_deref(), Some("Done"));
        assert_eq!(summary.assignees, vec!["Ada".to_string()]);
        assert_eq!(summary.marker, Some(MigrationMarker::ToMigrate));
        assert_eq!(summary.to_string(), "Website (abc) [Done] @Ada <ToMigrate>");
    }

    #[test]
    fn tolerates_malformed_properties() {
        let record = Record::new("abc")
            .with(Prop::Title, PropertyValue::Text("not a title".into()))
            .with(Prop::Marker, PropertyValue::select("Bogus"));
        let summary = RecordSummary::from_record(&record);
        assert_eq!(summary.title, UNTITLED);
        assert_eq!(summary.marker, None);
    }
}
