use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use super::{Filter, RecordStore, RelationPage, RELATION_PAGE_SIZE};
use crate::model::{Collection, Person, Prop, PropertyMap, PropertyValue, Record};
use crate::transfer::{page_url, DEFAULT_PAGE_BASE};
use crate::{AppError, AppResult};

/// One `update` call as the store received it.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    pub id: String,
    pub properties: PropertyMap,
}

#[derive(Default)]
struct MemoryState {
    order: Vec<String>,
    records: BTreeMap<String, (Collection, Record)>,
    principals: Vec<Person>,
    updates: Vec<UpdateEntry>,
    relation_reads: usize,
    failing: HashSet<String>,
}

/// In-process store with the same visible behaviour as the remote one:
/// relations are truncated on page reads and only complete through
/// [`RecordStore::read_relation`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, collection: Collection, mut record: Record) {
        if record.url.is_empty() {
            record.url = page_url(DEFAULT_PAGE_BASE, &record.id);
        }
        let mut state = self.state();
        if !state.records.contains_key(&record.id) {
            state.order.push(record.id.clone());
        }
        state.records.insert(record.id.clone(), (collection, record));
    }

    pub fn add_principal(&self, person: Person) {
        self.state().principals.push(person);
    }

    /// The operator's manual move between databases.
    pub fn move_record(&self, id: &str, to: Collection) -> AppResult<()> {
        let mut state = self.state();
        let entry = state.records.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.0 = to;
        Ok(())
    }

    /// Makes every later `update` of `id` fail with a store error.
    pub fn fail_updates_for(&self, id: &str) {
        self.state().failing.insert(id.to_string());
    }

    /// Untruncated copy of a stored record.
    pub fn snapshot(&self, id: &str) -> Option<Record> {
        self.state().records.get(id).map(|(_, record)| record.clone())
    }

    pub fn collection_of(&self, id: &str) -> Option<Collection> {
        self.state().records.get(id).map(|(collection, _)| *collection)
    }

    pub fn updates(&self) -> Vec<UpdateEntry> {
        self.state().updates.clone()
    }

    pub fn updates_for(&self, id: &str) -> Vec<PropertyMap> {
        self.state()
            .updates
            .iter()
            .filter(|entry| entry.id == id)
            .map(|entry| entry.properties.clone())
            .collect()
    }

    pub fn relation_reads(&self) -> usize {
        self.state().relation_reads
    }
}

fn not_found(id: &str) -> AppError {
    AppError::new(AppError::NOT_FOUND, format!("Could not find page with ID: {id}"))
        .with_context("page_id", id.to_string())
}

/// What a page read returns: long relations cut at the page size.
fn as_page(record: &Record) -> Record {
    let mut page = record.clone();
    for value in page.properties.values_mut() {
        if let PropertyValue::Relation { ids, has_more } = value {
            if ids.len() > RELATION_PAGE_SIZE {
                ids.truncate(RELATION_PAGE_SIZE);
                *has_more = true;
            }
        }
    }
    page
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query(&self, collection: Collection, filter: Filter) -> AppResult<Vec<Record>> {
        let state = self.state();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|(owner, record)| *owner == collection && filter.matches(record))
            .map(|(_, record)| as_page(record))
            .collect())
    }

    async fn retrieve(&self, id: &str) -> AppResult<Record> {
        let state = self.state();
        state
            .records
            .get(id)
            .map(|(_, record)| as_page(record))
            .ok_or_else(|| not_found(id))
    }

    async fn update(&self, id: &str, properties: PropertyMap) -> AppResult<Record> {
        let mut state = self.state();
        if state.failing.contains(id) {
            return Err(AppError::new("STORE/HTTP", "update rejected by store")
                .with_context("page_id", id.to_string()));
        }
        let (_, record) = state.records.get_mut(id).ok_or_else(|| not_found(id))?;
        record.apply(&properties);
        let page = as_page(record);
        state.updates.push(UpdateEntry {
            id: id.to_string(),
            properties,
        });
        Ok(page)
    }

    async fn read_relation(&self, id: &str, prop: Prop) -> AppResult<RelationPage> {
        let mut state = self.state();
        state.relation_reads += 1;
        let (_, record) = state.records.get(id).ok_or_else(|| not_found(id))?;
        let ids = record
            .relation(prop)
            .map_err(AppError::from)?
            .0
            .to_vec();
        Ok(RelationPage {
            ids,
            has_more: false,
        })
    }

    async fn list_principals(&self) -> AppResult<Vec<Person>> {
        Ok(self.state().principals.clone())
    }

    async fn create(&self, collection: Collection, properties: PropertyMap) -> AppResult<Record> {
        let mut record = Record::new(Uuid::new_v4().hyphenated().to_string());
        record.apply(&properties);
        self.insert(collection, record.clone());
        self.retrieve(&record.id).await
    }

    async fn collection_schema(&self, collection: Collection) -> AppResult<serde_json::Value> {
        let state = self.state();
        let mut properties = serde_json::Map::new();
        for (owner, record) in state.records.values() {
            if *owner != collection {
                continue;
            }
            for (name, value) in &record.properties {
                properties
                    .entry(name.clone())
                    .or_insert_with(|| json!({ "type": value.kind().as_str() }));
            }
        }
        Ok(json!({
            "object": "database",
            "title": collection.label(),
            "properties": properties,
        }))
    }
}
