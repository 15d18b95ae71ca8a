//! Cache key construction.
//!
//! Query results are keyed by a stable signature of the rendered SQL and its
//! bindings, so two descriptions that render identically share one entry.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::CacheError;

const PREFIX: &str = "wp";

/// Hex SHA-256 of the SQL text followed by the JSON form of its bindings.
pub fn signature<B: Serialize + ?Sized>(sql: &str, bindings: &B) -> Result<String, CacheError> {
    let encoded = serde_json::to_string(bindings).map_err(CacheError::Codec)?;
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hasher.update(encoded.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub fn post_by_id(id: u64) -> String {
    format!("{PREFIX}-get-post-{id}")
}

pub fn posts_by_query(signature: &str) -> String {
    format!("{PREFIX}-get-posts-by-query-{signature}")
}

pub fn count_by_query(signature: &str) -> String {
    format!("{PREFIX}-get-count-by-query-{signature}")
}

pub fn term_taxonomy_by_query(signature: &str) -> String {
    format!("{PREFIX}-get-term-taxonomy-by-query-{signature}")
}

pub fn menu_items_by_slug(signature: &str) -> String {
    format!("{PREFIX}-get-menu-items-by-slug-{signature}")
}
