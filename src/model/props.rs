use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Every property the migration reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Prop {
    Title,
    Status,
    Kind,
    Assignee,
    Participants,
    Importance,
    Deadline,
    ParentLink,
    ChildLink,
    Marker,
    ParentTransfer,
    SubtaskTransfer,
    ProjectStatus,
    Category,
    Priority,
    Owner,
    TargetDate,
    ParentProjects,
    TaskProject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropKind {
    Title,
    Text,
    Select,
    People,
    Relation,
    Number,
    Date,
    Timestamp,
    Unsupported,
}

impl PropKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropKind::Title => "title",
            PropKind::Text => "rich_text",
            PropKind::Select => "select",
            PropKind::People => "people",
            PropKind::Relation => "relation",
            PropKind::Number => "number",
            PropKind::Date => "date",
            PropKind::Timestamp => "timestamp",
            PropKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for PropKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Prop {
    pub const ALL: [Prop; 19] = [
        Prop::Title,
        Prop::Status,
        Prop::Kind,
        Prop::Assignee,
        Prop::Participants,
        Prop::Importance,
        Prop::Deadline,
        Prop::ParentLink,
        Prop::ChildLink,
        Prop::Marker,
        Prop::ParentTransfer,
        Prop::SubtaskTransfer,
        Prop::ProjectStatus,
        Prop::Category,
        Prop::Priority,
        Prop::Owner,
        Prop::TargetDate,
        Prop::ParentProjects,
        Prop::TaskProject,
    ];

    /// Property name as it appears in the databases.
    pub fn name(&self) -> &'static str {
        match self {
            Prop::Title => "Name",
            Prop::Status => "Status",
            Prop::Kind => "Type",
            Prop::Assignee => "Assignee",
            Prop::Participants => "Participants",
            Prop::Importance => "Importance",
            Prop::Deadline => "Deadline",
            Prop::ParentLink => "Parent",
            Prop::ChildLink => "Subtasks",
            Prop::Marker => "Migration",
            Prop::ParentTransfer => "Parent Transfer",
            Prop::SubtaskTransfer => "Subtask Transfer",
            Prop::ProjectStatus => "Project Status",
            Prop::Category => "Category",
            Prop::Priority => "Priority",
            Prop::Owner => "Owner",
            Prop::TargetDate => "Target Date",
            Prop::ParentProjects => "Parent Projects",
            Prop::TaskProject => "Project",
        }
    }

    pub fn kind(&self) -> PropKind {
        match self {
            Prop::Title => PropKind::Title,
            Prop::Status
            | Prop::Kind
            | Prop::Importance
            | Prop::Marker
            | Prop::ProjectStatus
            | Prop::Category
            | Prop::Priority => PropKind::Select,
            Prop::Assignee | Prop::Participants | Prop::Owner => PropKind::People,
            Prop::Deadline | Prop::TargetDate => PropKind::Date,
            Prop::ParentLink | Prop::ChildLink | Prop::ParentProjects | Prop::TaskProject => {
                PropKind::Relation
            }
            Prop::ParentTransfer | Prop::SubtaskTransfer => PropKind::Text,
        }
    }

    pub fn from_name(name: &str) -> Option<Prop> {
        Self::ALL.iter().copied().find(|prop| prop.name() == name)
    }
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("property '{prop}' is {found}, expected {expected}")]
    WrongType {
        prop: Prop,
        expected: PropKind,
        found: PropKind,
    },
    #[error("property '{prop}' has unrecognised value '{value}'")]
    UnknownValue { prop: Prop, value: String },
}

impl PropertyError {
    pub fn prop(&self) -> Prop {
        match self {
            PropertyError::WrongType { prop, .. } | PropertyError::UnknownValue { prop, .. } => {
                *prop
            }
        }
    }
}

impl From<PropertyError> for crate::AppError {
    fn from(error: PropertyError) -> Self {
        let code = match error {
            PropertyError::WrongType { .. } => "PROPERTY/WRONG_TYPE",
            PropertyError::UnknownValue { .. } => "PROPERTY/UNKNOWN_VALUE",
        };
        crate::AppError::new(code, error.to_string())
            .with_context("property", error.prop().name())
    }
}
