//! Services and query factories over the repository traits.

pub mod error;
pub mod factory;
pub mod handlers;
pub mod meta;
pub mod ordering;
pub mod posts;
pub mod query;
pub mod repos;

use tracing::warn;

use crate::cache::{InvalidationPolicy, QueryCache};

/// Drop cached query results after a write when the cache runs with
/// [`InvalidationPolicy::OnWrite`]. Failures are logged, not returned.
pub(crate) fn invalidate_after_write(cache: Option<&QueryCache>, op: &'static str) {
    let Some(cache) = cache else {
        return;
    };
    if cache.policy() != InvalidationPolicy::OnWrite {
        return;
    }
    if let Err(err) = cache.invalidate_written() {
        warn!(
            target_module = "application",
            op,
            error = %err,
            "failed to invalidate cached queries after write"
        );
    }
}
