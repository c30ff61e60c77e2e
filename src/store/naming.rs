//! Filename encoding for work items.
//!
//! Every work-item file is named `{YYYYMMDD_HHMMSS}_{tag}_{id}.json` (tag
//! optional). The id after the final `_` is the only dedup key across runs,
//! so [`encode_file_name`] and [`decode_id`] must stay exact inverses.

use chrono::{DateTime, Local};

use crate::error::StoreError;

/// Extension of every work-item document.
pub const EXTENSION: &str = ".json";

/// Sortable creation-time prefix, second granularity.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    format_timestamp(Local::now())
}

pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Reject ids that would not survive a round trip through [`decode_id`].
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let bad = id.is_empty()
        || id
            .chars()
            .any(|c| matches!(c, '_' | '.' | '/' | '\\') || c.is_control());
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Build the on-disk filename for a work item.
pub fn encode_file_name(timestamp: &str, tag: Option<&str>, id: &str) -> Result<String, StoreError> {
    validate_id(id)?;
    Ok(match tag {
        Some(tag) if !tag.is_empty() => format!("{timestamp}_{tag}_{id}{EXTENSION}"),
        _ => format!("{timestamp}_{id}{EXTENSION}"),
    })
}

/// Derive the work-item id from a filename.
///
/// Returns `None` for anything that is not a visible `.json` document
/// (claim sentinels, temp files, directories).
pub fn decode_id(file_name: &str) -> Option<&str> {
    if !is_document_name(file_name) {
        return None;
    }
    let stem = file_name.strip_suffix(EXTENSION)?;
    let id = match stem.rsplit_once('_') {
        Some((_, id)) => id,
        None => stem,
    };
    (!id.is_empty()).then_some(id)
}

/// Whether a directory entry name is a work-item document.
pub fn is_document_name(file_name: &str) -> bool {
    file_name.ends_with(EXTENSION) && !file_name.starts_with('.')
}

/// Name of the advisory claim sentinel for `id`.
pub fn claim_file_name(id: &str) -> String {
    format!(".{id}.claim")
}
