//! Ordered collections of posts kept in a position meta key.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use metrics::histogram;
use tokio::sync::Mutex;
use tracing::info;

use crate::application::invalidate_after_write;
use crate::application::repos::{OrderedGroupRepo, RepoError};
use crate::cache::QueryCache;
use crate::domain::entities::MetaOwner;
use crate::domain::ordering::{GroupEntry, RequestedPosition, RerankPlan};
use crate::domain::posts::Post;

const SOURCE: &str = "application::ordering";

pub(crate) const METRIC_RERANK_MS: &str = "presskit_rerank_ms";

type GroupKey = (String, String);

pub struct OrderingService {
    repo: Arc<dyn OrderedGroupRepo>,
    locks: DashMap<GroupKey, Arc<Mutex<()>>>,
    cache: Option<Arc<QueryCache>>,
}

impl OrderingService {
    pub fn new(repo: Arc<dyn OrderedGroupRepo>) -> Self {
        Self {
            repo,
            locks: DashMap::new(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Members of the collection in position order.
    pub async fn group(&self, post_type: &str, meta_key: &str) -> Result<Vec<GroupEntry>, RepoError> {
        self.repo.group(post_type, meta_key).await
    }

    /// Move `post` within the collection of its post type ordered by
    /// `meta_key`, keeping positions dense.
    ///
    /// Moves within one collection run one at a time in this process; the
    /// MySQL adapter additionally locks the group rows.
    pub async fn rearrange_order(
        &self,
        post: &Post,
        meta_key: &str,
        requested: RequestedPosition,
    ) -> Result<RerankPlan, RepoError> {
        let Some(owner) = post.owner() else {
            return Err(RepoError::OwnerNotPersisted {
                owner: MetaOwner::Post(post.record().id),
            });
        };
        let post_type = post.post_type().to_string();

        let lock = self.group_lock(&post_type, meta_key);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let plan = self
            .repo
            .rerank(&post_type, meta_key, owner.id(), requested)
            .await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RERANK_MS).record(elapsed_ms);

        info!(
            target_module = SOURCE,
            op = "rearrange_order",
            post_id = owner.id(),
            post_type = %post_type,
            meta_key,
            requested = ?requested,
            shifted = plan.shifts.len(),
            own = ?plan.own,
            elapsed_ms,
            "reranked collection"
        );

        if !plan.is_noop() {
            invalidate_after_write(self.cache.as_deref(), "ordering.rearrange");
        }
        Ok(plan)
    }

    fn group_lock(&self, post_type: &str, meta_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((post_type.to_string(), meta_key.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
