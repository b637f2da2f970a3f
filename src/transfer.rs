//! Text encoding for relation lists parked in a transfer field across the move.
//!
//! Writes always join with [`DELIMITER`]. Reads split on the bare comma and
//! trim, so fields written by hand with `,` decode the same way.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::AppError;

pub const DELIMITER: &str = ", ";
pub const DEFAULT_PAGE_BASE: &str = "https://www.notion.so";

static TRAILING_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9a-f]{32})$").expect("static regex compiles"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFormat {
    #[default]
    Ids,
    Urls,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("segment {index} '{segment}' is not a page id or page URL")]
    InvalidSegment { index: usize, segment: String },
}

impl From<TransferError> for AppError {
    fn from(error: TransferError) -> Self {
        let TransferError::InvalidSegment { index, ref segment } = error;
        AppError::new(AppError::TRANSFER_INVALID, error.to_string())
            .with_context("segment_index", index.to_string())
            .with_context("segment", segment.clone())
    }
}

pub fn encode<S: AsRef<str>>(ids: &[S]) -> String {
    ids.iter()
        .map(|id| id.as_ref().trim())
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

pub fn encode_urls<S: AsRef<str>>(ids: &[S], base: &str) -> String {
    ids.iter()
        .map(|id| page_url(base, id.as_ref()))
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

pub fn encode_as<S: AsRef<str>>(ids: &[S], format: TransferFormat, base: &str) -> String {
    match format {
        TransferFormat::Ids => encode(ids),
        TransferFormat::Urls => encode_urls(ids, base),
    }
}

pub fn page_url(base: &str, id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), id.trim().replace('-', ""))
}

pub fn decode(text: &str) -> Result<Vec<String>, TransferError> {
    text.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .enumerate()
        .map(|(index, segment)| decode_segment(segment).ok_or_else(|| invalid(index, segment)))
        .collect()
}

fn invalid(index: usize, segment: &str) -> TransferError {
    TransferError::InvalidSegment {
        index,
        segment: segment.to_string(),
    }
}

fn decode_segment(segment: &str) -> Option<String> {
    if segment.contains('/') {
        return id_from_url(segment);
    }
    Uuid::try_parse(segment).ok().map(|_| segment.to_string())
}

/// Recovers the hyphenated id from a page URL such as
/// `https://www.notion.so/Some-Title-0123456789abcdef0123456789abcdef?pvs=4`.
pub fn id_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let last = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())?;
    let hex = TRAILING_HEX.captures(last)?.get(1)?.as_str();
    Some(hyphenate(&hex.to_ascii_lowercase()))
}

/// Reinserts the 8-4-4-4-12 grouping. Expects exactly 32 ASCII hex chars.
fn hyphenate(hex: &str) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
