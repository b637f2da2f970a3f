//! HTTP client for the Notion REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Filter, RecordStore, RelationPage};
use crate::config::MigrationConfig;
use crate::model::{Collection, Person, Prop, PropertyMap, Record};
use crate::{AppError, AppResult};

pub mod codec;

pub const API_BASE: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

pub struct NotionStore {
    http: Client,
    token: String,
    base_url: String,
    source_database_id: String,
    destination_database_id: String,
    page_delay: Duration,
}

impl NotionStore {
    pub fn new(token: impl Into<String>, config: &MigrationConfig) -> AppResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AppError::new(
                AppError::MISSING_TOKEN,
                "A Notion integration token is required (--token or NOTION_TOKEN)",
            ));
        }
        let http = Client::builder()
            .user_agent(concat!("taskmover/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            token,
            base_url: API_BASE.to_string(),
            source_database_id: config.source_database_id.clone(),
            destination_database_id: config.destination_database_id.clone(),
            page_delay: config.page_delay(),
        })
    }

    /// Points the client at another host, e.g. a local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn database_id(&self, collection: Collection) -> &str {
        match collection {
            Collection::Tasks => &self.source_database_id,
            Collection::Projects => &self.destination_database_id,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/v1/{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> AppResult<Value> {
        let response = request.send().await.map_err(|err| {
            AppError::from(err).with_context("operation", operation.to_string())
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Value>().await?);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Err(api_error(status, &body).with_context("operation", operation.to_string()))
    }

    async fn retrieve_raw(&self, id: &str) -> AppResult<Value> {
        self.send(
            self.request(Method::GET, &format!("pages/{id}")),
            "retrieve_page",
        )
        .await
    }
}

fn api_error(status: StatusCode, body: &Value) -> AppError {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string();
    let code = match status {
        StatusCode::UNAUTHORIZED => AppError::UNAUTHORIZED,
        StatusCode::FORBIDDEN => AppError::FORBIDDEN,
        StatusCode::NOT_FOUND => AppError::NOT_FOUND,
        StatusCode::TOO_MANY_REQUESTS => AppError::RATE_LIMITED,
        StatusCode::BAD_REQUEST => "STORE/INVALID_REQUEST",
        _ => "STORE/HTTP",
    };
    let mut error = AppError::new(code, message).with_context("status", status.as_u16().to_string());
    if let Some(api_code) = body.get("code").and_then(Value::as_str) {
        error = error.with_context("api_code", api_code.to_string());
    }
    error
}

fn marker_filter(filter: Filter) -> Value {
    let property = Prop::Marker.name();
    match filter {
        Filter::Marker(marker) => json!({
            "property": property,
            "select": { "equals": marker.as_str() }
        }),
    }
}

fn next_cursor(body: &Value) -> Option<String> {
    let has_more = body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
    if !has_more {
        return None;
    }
    body.get("next_cursor")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn results(body: &Value) -> &[Value] {
    body.get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[async_trait]
impl RecordStore for NotionStore {
    async fn query(&self, collection: Collection, filter: Filter) -> AppResult<Vec<Record>> {
        let database_id = self.database_id(collection);
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "filter": marker_filter(filter), "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let page = self
                .send(
                    self.request(Method::POST, &format!("databases/{database_id}/query"))
                        .json(&body),
                    "query_database",
                )
                .await
                .map_err(|err| err.with_context("collection", collection.as_str()))?;
            for item in results(&page) {
                records.push(codec::decode_page(item)?);
            }
            debug!(
                target: "taskmover",
                event = "store_query_page",
                collection = collection.as_str(),
                fetched = records.len()
            );
            match next_cursor(&page) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    async fn retrieve(&self, id: &str) -> AppResult<Record> {
        let raw = self
            .retrieve_raw(id)
            .await
            .map_err(|err| err.with_context("page_id", id.to_string()))?;
        codec::decode_page(&raw)
    }

    async fn update(&self, id: &str, properties: PropertyMap) -> AppResult<Record> {
        let body = json!({ "properties": codec::encode_properties(&properties)? });
        let raw = self
            .send(
                self.request(Method::PATCH, &format!("pages/{id}")).json(&body),
                "update_page",
            )
            .await
            .map_err(|err| err.with_context("page_id", id.to_string()))?;
        codec::decode_page(&raw)
    }

    async fn read_relation(&self, id: &str, prop: Prop) -> AppResult<RelationPage> {
        let page = self.retrieve_raw(id).await?;
        let property_id = page
            .get("properties")
            .and_then(|props| props.get(prop.name()))
            .and_then(|property| property.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::new(AppError::NOT_FOUND, format!("page has no '{prop}' property"))
                    .with_context("page_id", id.to_string())
            })?
            .to_string();

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            if pages > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            let mut request = self
                .request(
                    Method::GET,
                    &format!("pages/{id}/properties/{property_id}"),
                )
                .query(&[("page_size", PAGE_SIZE.to_string())]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("start_cursor", cursor.as_str())]);
            }
            let body = self
                .send(request, "read_relation")
                .await
                .map_err(|err| {
                    err.with_context("page_id", id.to_string())
                        .with_context("property", prop.name())
                })?;
            pages += 1;
            for item in results(&body) {
                if let Some(related) = item
                    .get("relation")
                    .and_then(|relation| relation.get("id"))
                    .and_then(Value::as_str)
                {
                    ids.push(related.to_string());
                }
            }
            match next_cursor(&body) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(
            target: "taskmover",
            event = "relation_read",
            page_id = %id,
            property = prop.name(),
            pages,
            entries = ids.len()
        );
        Ok(RelationPage {
            ids,
            has_more: false,
        })
    }

    async fn list_principals(&self) -> AppResult<Vec<Person>> {
        let mut people = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = self
                .request(Method::GET, "users")
                .query(&[("page_size", PAGE_SIZE.to_string())]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("start_cursor", cursor.as_str())]);
            }
            let body = self.send(request, "list_users").await?;
            for user in results(&body) {
                if user.get("type").and_then(Value::as_str) == Some("bot") {
                    continue;
                }
                match codec::decode_person(user) {
                    Some(person) => people.push(person),
                    None => warn!(target: "taskmover", event = "user_without_id"),
                }
            }
            match next_cursor(&body) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(people)
    }

    async fn create(&self, collection: Collection, properties: PropertyMap) -> AppResult<Record> {
        let body = json!({
            "parent": { "database_id": self.database_id(collection) },
            "properties": codec::encode_properties(&properties)?,
        });
        let raw = self
            .send(self.request(Method::POST, "pages").json(&body), "create_page")
            .await
            .map_err(|err| err.with_context("collection", collection.as_str()))?;
        codec::decode_page(&raw)
    }

    async fn collection_schema(&self, collection: Collection) -> AppResult<Value> {
        let database_id = self.database_id(collection);
        self.send(
            self.request(Method::GET, &format!("databases/{database_id}")),
            "retrieve_database",
        )
        .await
        .map_err(|err| err.with_context("collection", collection.as_str()))
    }
}
