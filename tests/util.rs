#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use taskmover_lib::model::{Collection, MigrationMarker, Person, Prop, PropertyValue, Record};
use taskmover_lib::store::MemoryStore;
use uuid::Uuid;

/// Stable page id for fixture number `n`.
pub fn uid(n: u128) -> String {
    Uuid::from_u128(0x1000_0000_0000_4000_8000_0000_0000_0000 + n)
        .hyphenated()
        .to_string()
}

pub fn ada() -> Person {
    Person {
        id: uid(900),
        name: Some("Ada".into()),
        email: Some("ada@example.com".into()),
    }
}

pub fn grace() -> Person {
    Person::named(uid(901), "Grace")
}

/// A finished root project queued for migration.
pub fn project(id: &str, title: &str) -> Record {
    Record::new(id)
        .with(Prop::Title, PropertyValue::Title(title.into()))
        .with(Prop::Status, PropertyValue::select("Done"))
        .with(Prop::Kind, PropertyValue::select("Project"))
        .with(Prop::Assignee, PropertyValue::People(vec![ada()]))
        .with(
            Prop::Marker,
            PropertyValue::marker(Some(MigrationMarker::ToMigrate)),
        )
}

pub fn subtask(id: &str, title: &str) -> Record {
    Record::new(id)
        .with(Prop::Title, PropertyValue::Title(title.into()))
        .with(Prop::Status, PropertyValue::select("Done"))
        .with(Prop::Kind, PropertyValue::select("Task"))
}

/// Inserts `project` with `count` subtasks and returns the subtask ids.
pub fn seed_with_subtasks(store: &MemoryStore, project: Record, count: u128) -> Vec<String> {
    let base = 100 * (count + 1);
    let ids: Vec<String> = (0..count).map(|i| uid(base + i)).collect();
    for (i, id) in ids.iter().enumerate() {
        store.insert(Collection::Tasks, subtask(id, &format!("Subtask {}", i + 1)));
    }
    store.insert(
        Collection::Tasks,
        project.with(Prop::ChildLink, PropertyValue::relation(ids.clone())),
    );
    ids
}

pub fn text(record: &Record, prop: Prop) -> Option<String> {
    record.text(prop).unwrap().map(str::to_string)
}

pub fn relation(record: &Record, prop: Prop) -> Vec<String> {
    record.relation(prop).unwrap().0.to_vec()
}
