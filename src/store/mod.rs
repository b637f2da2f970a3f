//! The page store the migration reads from and writes to.

use async_trait::async_trait;
use serde::Serialize;

use crate::model::{Collection, MigrationMarker, Person, Prop, PropertyMap, Record};
use crate::AppResult;

pub mod memory;
pub mod notion;

pub use memory::MemoryStore;
pub use notion::NotionStore;

/// Relations come back from page reads capped at this many entries.
pub const RELATION_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Marker(MigrationMarker),
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        let marker = record.marker().ok().flatten();
        match self {
            Filter::Marker(expected) => marker == Some(*expected),
        }
    }
}

/// Result of a relation read. `has_more` is only set when the store
/// stopped before the end of the list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelationPage {
    pub ids: Vec<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records of `collection` matching `filter`, in store order.
    async fn query(&self, collection: Collection, filter: Filter) -> AppResult<Vec<Record>>;

    async fn retrieve(&self, id: &str) -> AppResult<Record>;

    /// Sparse update: only the listed properties change.
    async fn update(&self, id: &str, properties: PropertyMap) -> AppResult<Record>;

    /// Reads every entry of a relation property, page by page.
    async fn read_relation(&self, id: &str, prop: Prop) -> AppResult<RelationPage>;

    async fn list_principals(&self) -> AppResult<Vec<Person>>;

    async fn create(&self, collection: Collection, properties: PropertyMap) -> AppResult<Record>;

    /// Raw schema document of a collection, used for diagnostics dumps.
    async fn collection_schema(&self, collection: Collection) -> AppResult<serde_json::Value>;
}

/// Returns the full relation list, going back to the store only when the
/// page read was truncated.
pub async fn full_relation(
    store: &dyn RecordStore,
    record: &Record,
    prop: Prop,
) -> AppResult<Vec<String>> {
    let (ids, has_more) = record.relation(prop)?;
    if !has_more {
        return Ok(ids.to_vec());
    }
    let page = store.read_relation(&record.id, prop).await?;
    Ok(page.ids)
}
