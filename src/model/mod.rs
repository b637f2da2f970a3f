//! Records as the store hands them out, plus the typed accessor layer.
//!
//! Property names are never spelled at call sites: every access goes through
//! [`Prop`], and the accessors report absent values and values of an
//! unexpected kind separately.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod props;

pub use props::{Prop, PropKind, PropertyError};

/// The two partitions records move between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tasks,
    Projects,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Projects => "projects",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Collection::Tasks => "Tasks",
            Collection::Projects => "Projects",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Work-queue marker stored in the `Migration` select property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationMarker {
    ToMigrate,
    ToRelink,
    Migrated,
    Error,
}

impl MigrationMarker {
    pub const ALL: [MigrationMarker; 4] = [
        MigrationMarker::ToMigrate,
        MigrationMarker::ToRelink,
        MigrationMarker::Migrated,
        MigrationMarker::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMarker::ToMigrate => "ToMigrate",
            MigrationMarker::ToRelink => "ToRelink",
            MigrationMarker::Migrated => "Migrated",
            MigrationMarker::Error => "Error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|marker| marker.as_str() == raw.trim())
    }
}

impl fmt::Display for MigrationMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Person {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            email: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Date properties keep the store's ISO strings; they are copied, never computed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    Text(String),
    Select(Option<String>),
    People(Vec<Person>),
    Relation { ids: Vec<String>, has_more: bool },
    Number(Option<f64>),
    Date(Option<DateRange>),
    Timestamp(DateTime<Utc>),
    Unsupported { kind: String },
}

impl PropertyValue {
    pub fn kind(&self) -> PropKind {
        match self {
            PropertyValue::Title(_) => PropKind::Title,
            PropertyValue::Text(_) => PropKind::Text,
            PropertyValue::Select(_) => PropKind::Select,
            PropertyValue::People(_) => PropKind::People,
            PropertyValue::Relation { .. } => PropKind::Relation,
            PropertyValue::Number(_) => PropKind::Number,
            PropertyValue::Date(_) => PropKind::Date,
            PropertyValue::Timestamp(_) => PropKind::Timestamp,
            PropertyValue::Unsupported { .. } => PropKind::Unsupported,
        }
    }

    /// Whether the value carries anything worth copying.
    pub fn is_empty(&self) -> bool {
        match self {
            PropertyValue::Title(text) | PropertyValue::Text(text) => text.trim().is_empty(),
            PropertyValue::Select(value) => value.is_none(),
            PropertyValue::People(people) => people.is_empty(),
            PropertyValue::Relation { ids, has_more } => ids.is_empty() && !has_more,
            PropertyValue::Number(value) => value.is_none(),
            PropertyValue::Date(value) => value.is_none(),
            PropertyValue::Timestamp(_) => false,
            PropertyValue::Unsupported { .. } => true,
        }
    }

    pub fn select(name: impl Into<String>) -> Self {
        PropertyValue::Select(Some(name.into()))
    }

    pub fn relation(ids: Vec<String>) -> Self {
        PropertyValue::Relation {
            ids,
            has_more: false,
        }
    }

    pub fn marker(marker: Option<MigrationMarker>) -> Self {
        PropertyValue::Select(marker.map(|m| m.as_str().to_string()))
    }
}

/// Sparse property payload for updates and creates, keyed by property name.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Builder for update payloads keyed by [`Prop`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyPatch {
    values: PropertyMap,
}

impl PropertyPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, prop: Prop, value: PropertyValue) -> Self {
        self.values.insert(prop.name().to_string(), value);
        self
    }

    pub fn insert(&mut self, prop: Prop, value: PropertyValue) {
        self.values.insert(prop.name().to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, prop: Prop) -> bool {
        self.values.contains_key(prop.name())
    }

    pub fn get(&self, prop: Prop) -> Option<&PropertyValue> {
        self.values.get(prop.name())
    }

    pub fn into_map(self) -> PropertyMap {
        self.values
    }

    pub fn as_map(&self) -> &PropertyMap {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    pub properties: PropertyMap,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: String::new(),
            collection_id: None,
            properties: PropertyMap::new(),
        }
    }

    pub fn with(mut self, prop: Prop, value: PropertyValue) -> Self {
        self.properties.insert(prop.name().to_string(), value);
        self
    }

    pub fn raw(&self, prop: Prop) -> Option<&PropertyValue> {
        self.properties.get(prop.name())
    }

    /// Applies a sparse payload the way the store does: listed keys replace, others stay.
    pub fn apply(&mut self, properties: &PropertyMap) {
        for (name, value) in properties {
            self.properties.insert(name.clone(), value.clone());
        }
    }

    fn typed(&self, prop: Prop, expected: PropKind) -> Result<Option<&PropertyValue>, PropertyError> {
        match self.raw(prop) {
            None => Ok(None),
            Some(value) if value.kind() == expected => Ok(Some(value)),
            Some(value) => Err(PropertyError::WrongType {
                prop,
                expected,
                found: value.kind(),
            }),
        }
    }

    /// The value of `prop` checked against its declared kind; empty values read as absent.
    pub fn value(&self, prop: Prop) -> Result<Option<&PropertyValue>, PropertyError> {
        Ok(self
            .typed(prop, prop.kind())?
            .filter(|value| !value.is_empty()))
    }

    /// Title text; empty titles read as absent.
    pub fn title(&self) -> Result<Option<&str>, PropertyError> {
        match self.typed(Prop::Title, PropKind::Title)? {
            Some(PropertyValue::Title(text)) if !text.trim().is_empty() => Ok(Some(text.as_str())),
            _ => Ok(None),
        }
    }

    pub fn text(&self, prop: Prop) -> Result<Option<&str>, PropertyError> {
        match self.typed(prop, PropKind::Text)? {
            Some(PropertyValue::Text(text)) if !text.trim().is_empty() => Ok(Some(text.as_str())),
            _ => Ok(None),
        }
    }

    pub fn select(&self, prop: Prop) -> Result<Option<&str>, PropertyError> {
        match self.typed(prop, PropKind::Select)? {
            Some(PropertyValue::Select(Some(name))) if !name.trim().is_empty() => {
                Ok(Some(name.as_str()))
            }
            _ => Ok(None),
        }
    }

    pub fn people(&self, prop: Prop) -> Result<&[Person], PropertyError> {
        match self.typed(prop, PropKind::People)? {
            Some(PropertyValue::People(people)) => Ok(people.as_slice()),
            _ => Ok(&[]),
        }
    }

    /// Relation ids as returned with the page plus the overflow flag.
    pub fn relation(&self, prop: Prop) -> Result<(&[String], bool), PropertyError> {
        match self.typed(prop, PropKind::Relation)? {
            Some(PropertyValue::Relation { ids, has_more }) => Ok((ids.as_slice(), *has_more)),
            _ => Ok((&[], false)),
        }
    }

    pub fn date(&self, prop: Prop) -> Result<Option<&DateRange>, PropertyError> {
        match self.typed(prop, PropKind::Date)? {
            Some(PropertyValue::Date(value)) => Ok(value.as_ref()),
            _ => Ok(None),
        }
    }

    /// The migration marker. Unknown select values read as a typed error so a
    /// typo in the store never silently drops a record out of the queue.
    pub fn marker(&self) -> Result<Option<MigrationMarker>, PropertyError> {
        match self.select(Prop::Marker)? {
            None => Ok(None),
            Some(raw) => MigrationMarker::parse(raw)
                .map(Some)
                .ok_or_else(|| PropertyError::UnknownValue {
                    prop: Prop::Marker,
                    value: raw.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new("11111111-2222-3333-4444-555555555555")
            .with(Prop::Title, PropertyValue::Title("Launch site".into()))
            .with(Prop::Status, PropertyValue::select("Done"))
            .with(Prop::Kind, PropertyValue::Text("Project".into()))
            .with(Prop::Marker, PropertyValue::select("ToMigrate"))
            .with(
                Prop::ChildLink,
                PropertyValue::Relation {
                    ids: vec!["a".into(), "b".into()],
                    has_more: true,
                },
            )
    }

    #[test]
    fn typed_accessors_read_present_values() {
        let record = sample();
        assert_eq!(record.title().unwrap(), Some("Launch site"));
        assert_eq!(record.select(Prop::Status).unwrap(), Some("Done"));
        assert_eq!(record.marker().unwrap(), Some(MigrationMarker::ToMigrate));
        let (ids, has_more) = record.relation(Prop::ChildLink).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(has_more);
    }

    #[test]
    fn absent_properties_read_as_empty() {
        let record = sample();
        assert_eq!(record.select(Prop::Importance).unwrap(), None);
        assert!(record.people(Prop::Assignee).unwrap().is_empty());
        assert_eq!(record.relation(Prop::ParentLink).unwrap(), (&[][..], false));
        assert_eq!(record.text(Prop::ParentTransfer).unwrap(), None);
    }

    #[test]
    fn wrong_kind_is_reported_not_hidden() {
        let record = sample();
        let err = record.select(Prop::Kind).unwrap_err();
        assert_eq!(
            err,
            PropertyError::WrongType {
                prop: Prop::Kind,
                expected: PropKind::Select,
                found: PropKind::Text,
            }
        );
        assert!(err.to_string().contains("Type"));
    }

    #[test]
    fn unknown_marker_value_is_an_error() {
        let record = sample().with(Prop::Marker, PropertyValue::select("Later"));
        assert!(matches!(
            record.marker(),
            Err(PropertyError::UnknownValue { .. })
        ));
    }

    #[test]
    fn apply_replaces_only_listed_properties() {
        let mut record = sample();
        let patch = PropertyPatch::new().set(Prop::Status, PropertyValue::select("Cancelled"));
        record.apply(patch.as_map());
        assert_eq!(record.select(Prop::Status).unwrap(), Some("Cancelled"));
        assert_eq!(record.title().unwrap(), Some("Launch site"));
    }
}
