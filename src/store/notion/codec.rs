//! Conversion between Notion property objects and [`PropertyValue`].

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::model::{DateRange, Person, PropertyMap, PropertyValue, Record};
use crate::{AppError, AppResult};

/// Notion rejects text objects longer than this.
pub const MAX_TEXT_CHARS: usize = 2000;

pub fn decode_page(page: &Value) -> AppResult<Record> {
    let id = page
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("page without id"))?;
    let mut record = Record::new(id);
    record.url = page
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    record.collection_id = page
        .get("parent")
        .and_then(|parent| parent.get("database_id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(properties) = page.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            record
                .properties
                .insert(name.clone(), decode_property(property));
        }
    }
    Ok(record)
}

pub fn decode_property(property: &Value) -> PropertyValue {
    let kind = property
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let body = property.get(kind).unwrap_or(&Value::Null);
    match kind {
        "title" => PropertyValue::Title(plain_text(body)),
        "rich_text" => PropertyValue::Text(plain_text(body)),
        "select" | "status" => PropertyValue::Select(
            body.get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        "people" => PropertyValue::People(
            body.as_array()
                .map(|users| users.iter().filter_map(decode_person).collect())
                .unwrap_or_default(),
        ),
        "relation" => PropertyValue::Relation {
            ids: body
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            has_more: property
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        "number" => PropertyValue::Number(body.as_f64()),
        "date" => PropertyValue::Date(body.get("start").and_then(Value::as_str).map(|start| {
            DateRange {
                start: start.to_string(),
                end: body
                    .get("end")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        })),
        "created_time" | "last_edited_time" => body
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| PropertyValue::Timestamp(ts.with_timezone(&Utc)))
            .unwrap_or(PropertyValue::Unsupported {
                kind: kind.to_string(),
            }),
        other => PropertyValue::Unsupported {
            kind: other.to_string(),
        },
    }
}

pub fn decode_person(user: &Value) -> Option<Person> {
    let id = user.get("id").and_then(Value::as_str)?;
    Some(Person {
        id: id.to_string(),
        name: user
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        email: user
            .get("person")
            .and_then(|person| person.get("email"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn plain_text(body: &Value) -> String {
    body.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    part.get("plain_text")
                        .or_else(|| part.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn text_objects(text: &str) -> Value {
    let chars: Vec<char> = text.chars().collect();
    Value::Array(
        chars
            .chunks(MAX_TEXT_CHARS)
            .map(|chunk| {
                json!({
                    "type": "text",
                    "text": { "content": chunk.iter().collect::<String>() }
                })
            })
            .collect(),
    )
}

pub fn encode_property(value: &PropertyValue) -> AppResult<Value> {
    let encoded = match value {
        PropertyValue::Title(text) => json!({ "title": text_objects(text) }),
        PropertyValue::Text(text) => json!({ "rich_text": text_objects(text) }),
        PropertyValue::Select(Some(name)) => json!({ "select": { "name": name } }),
        PropertyValue::Select(None) => json!({ "select": null }),
        PropertyValue::People(people) => json!({
            "people": people
                .iter()
                .map(|person| json!({ "object": "user", "id": person.id }))
                .collect::<Vec<_>>()
        }),
        PropertyValue::Relation { ids, .. } => json!({
            "relation": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>()
        }),
        PropertyValue::Number(number) => json!({ "number": number }),
        PropertyValue::Date(Some(range)) => {
            json!({ "date": { "start": range.start, "end": range.end } })
        }
        PropertyValue::Date(None) => json!({ "date": null }),
        PropertyValue::Timestamp(_) | PropertyValue::Unsupported { .. } => {
            return Err(AppError::new(
                "STORE/READ_ONLY_PROPERTY",
                format!("{} properties cannot be written", value.kind()),
            ))
        }
    };
    Ok(encoded)
}

pub fn encode_properties(properties: &PropertyMap) -> AppResult<Value> {
    let mut out = Map::new();
    for (name, value) in properties {
        let encoded =
            encode_property(value).map_err(|err| err.with_context("property", name.clone()))?;
        out.insert(name.clone(), encoded);
    }
    Ok(Value::Object(out))
}

fn malformed(message: &str) -> AppError {
    AppError::new("STORE/MALFORMED_RESPONSE", message.to_string())
}
