//! Cache-aside query factories.
//!
//! Every read is keyed by the signature of the rendered query. On a miss the
//! query runs, each result goes through the handler chain, and the processed
//! result is stored for the configured TTL. A failing query or handler stores
//! nothing.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::application::handlers::{HandlerError, MenuItemHandlers, PostHandlers};
use crate::application::meta::MetaService;
use crate::application::query::{
    MenuItemsQuery, MetaCondition, PostQuery, SortDirection, SortKey, Tables, TermQuery,
};
use crate::application::repos::{PostsRepo, RepoError, TermsRepo};
use crate::cache::{CacheError, QueryCache, keys};
use crate::config::MetaKeys;
use crate::domain::entities::{MenuItem, TermTaxonomy};
use crate::domain::posts::Post;
use crate::domain::types::Taxonomy;
use crate::domain::variants::{PostVariant, TermVariant, post_types, term_types};

const SOURCE: &str = "application::factory";

const POPULAR_ALIAS: &str = "popular";
const PRIMARY_CATEGORY_ALIAS: &str = "primary_category";
const FEATURED_ALIAS: &str = "featured";
const POSITION_ALIAS: &str = "position";

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Filters shared by the curated post lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub post_types: Vec<String>,
    pub limit: u64,
    /// Only posts whose primary category meta equals this term id.
    pub primary_category: Option<u64>,
    pub exclude: Vec<u64>,
}

impl ListFilter {
    pub fn new<I, S>(post_types: I, limit: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            post_types: post_types.into_iter().map(Into::into).collect(),
            limit,
            primary_category: None,
            exclude: Vec::new(),
        }
    }

    pub fn primary_category(mut self, term_id: u64) -> Self {
        self.primary_category = Some(term_id);
        self
    }

    pub fn exclude(mut self, ids: &[u64]) -> Self {
        self.exclude.extend_from_slice(ids);
        self
    }
}

/// Cached reads of posts.
pub struct PostFactory {
    cache: Arc<QueryCache>,
    use_cache: AtomicBool,
    posts: Arc<dyn PostsRepo>,
    meta: MetaService,
    terms: Arc<TermFactory>,
    handlers: PostHandlers,
    tables: Tables,
    meta_keys: MetaKeys,
}

impl PostFactory {
    pub fn new(
        cache: Arc<QueryCache>,
        posts: Arc<dyn PostsRepo>,
        meta: MetaService,
        terms: Arc<TermFactory>,
        tables: Tables,
    ) -> Self {
        Self {
            cache,
            use_cache: AtomicBool::new(true),
            posts,
            meta,
            terms,
            handlers: PostHandlers::new(),
            tables,
            meta_keys: MetaKeys::default(),
        }
    }

    pub fn with_handlers(mut self, handlers: PostHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_meta_keys(mut self, meta_keys: MetaKeys) -> Self {
        self.meta_keys = meta_keys;
        self
    }

    pub fn handlers(&self) -> &PostHandlers {
        &self.handlers
    }

    pub fn terms(&self) -> &Arc<TermFactory> {
        &self.terms
    }

    /// Route reads of this factory through the cache again.
    pub fn enable_cache(&self) {
        self.use_cache.store(true, Ordering::Release);
    }

    /// Read straight from the repositories; the shared cache is untouched.
    pub fn disable_cache(&self) {
        self.use_cache.store(false, Ordering::Release);
    }

    pub fn is_caching(&self) -> bool {
        self.use_cache.load(Ordering::Acquire)
    }

    /// One post by id, with meta loaded and handlers run.
    pub async fn find(&self, id: u64) -> Result<Option<Post>, FactoryError> {
        let key = keys::post_by_id(id);
        self.remember(&key, move || async move {
            let Some(record) = self.posts.find_post(id).await? else {
                return Ok(None);
            };
            let mut posts = vec![Post::from_stored(record, Vec::new())];
            self.hydrate(&mut posts).await?;
            Ok(posts.pop())
        })
        .await
    }

    pub async fn query(&self, query: &PostQuery) -> Result<Vec<Post>, FactoryError> {
        let signature = query.render(&self.tables).signature()?;
        let key = keys::posts_by_query(&signature);
        self.remember(&key, move || async move {
            let records = self.posts.query_posts(query).await?;
            let mut posts: Vec<Post> = records
                .into_iter()
                .map(|record| Post::from_stored(record, Vec::new()))
                .collect();
            self.hydrate(&mut posts).await?;
            Ok(posts)
        })
        .await
    }

    /// [`PostFactory::query`] with each post specialized by its `post_type`.
    pub async fn query_typed(&self, query: &PostQuery) -> Result<Vec<PostVariant>, FactoryError> {
        let posts = self.query(query).await?;
        Ok(post_types().hydrate_all(posts))
    }

    /// Matching rows; handlers do not run.
    pub async fn count(&self, query: &PostQuery) -> Result<u64, FactoryError> {
        let signature = query.render_count(&self.tables).signature()?;
        let key = keys::count_by_query(&signature);
        self.remember(&key, move || async move { Ok(self.posts.count_posts(query).await?) })
            .await
    }

    /// Published posts carrying a popularity rank, highest rank first.
    pub async fn popular(&self, filter: &ListFilter) -> Result<Vec<Post>, FactoryError> {
        let query = self
            .list_query(filter)
            .with_meta(
                POPULAR_ALIAS,
                &self.meta_keys.popular_rank,
                MetaCondition::Present,
            )
            .order_by(
                SortKey::Meta {
                    alias: POPULAR_ALIAS.to_string(),
                    numeric: true,
                },
                SortDirection::Desc,
            );
        self.query(&query).await
    }

    /// Published posts, newest first.
    pub async fn latest(&self, filter: &ListFilter) -> Result<Vec<Post>, FactoryError> {
        let query = self
            .list_query(filter)
            .order_by(SortKey::PostDate, SortDirection::Desc);
        self.query(&query).await
    }

    /// Published posts flagged as featured, by featured position. Posts with
    /// no position come first.
    pub async fn featured(&self, filter: &ListFilter) -> Result<Vec<Post>, FactoryError> {
        let query = self
            .list_query(filter)
            .with_meta(
                FEATURED_ALIAS,
                &self.meta_keys.featured,
                MetaCondition::Equals("1".to_string()),
            )
            .with_meta(
                POSITION_ALIAS,
                &self.meta_keys.featured_position,
                MetaCondition::Optional,
            )
            .order_by(
                SortKey::Meta {
                    alias: POSITION_ALIAS.to_string(),
                    numeric: true,
                },
                SortDirection::Asc,
            );
        self.query(&query).await
    }

    /// Posts sharing the first tag of `post`, newest first, without `post`
    /// itself. Untagged or unsaved posts have no related posts.
    pub async fn related(&self, post: &Post, limit: u64) -> Result<Vec<Post>, FactoryError> {
        let Some(id) = post.id() else {
            return Ok(Vec::new());
        };
        let tags = self
            .terms
            .query(&TermQuery::new().taxonomy(Taxonomy::PostTag).attached_to(id).limit(1))
            .await?;
        let Some(tag) = tags.first() else {
            debug!(target_module = SOURCE, op = "related", post_id = id, "post has no tags");
            return Ok(Vec::new());
        };
        let query = PostQuery::new()
            .in_terms(Taxonomy::PostTag, &[tag.term_id])
            .exclude(&[id])
            .order_by(SortKey::PostDate, SortDirection::Desc)
            .limit(limit);
        self.query(&query).await
    }

    fn list_query(&self, filter: &ListFilter) -> PostQuery {
        let mut query = PostQuery::new()
            .published()
            .post_types(filter.post_types.iter().cloned())
            .exclude(&filter.exclude)
            .limit(filter.limit);
        if let Some(term_id) = filter.primary_category {
            query = query.with_meta(
                PRIMARY_CATEGORY_ALIAS,
                &self.meta_keys.primary_category,
                MetaCondition::Equals(term_id.to_string()),
            );
        }
        query
    }

    async fn hydrate(&self, posts: &mut [Post]) -> Result<(), FactoryError> {
        self.meta.load_into(posts).await?;
        for post in posts.iter_mut() {
            self.handlers.run(post)?;
        }
        Ok(())
    }

    async fn remember<T, F, Fut>(&self, key: &str, compute: F) -> Result<T, FactoryError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FactoryError>>,
    {
        if !self.is_caching() {
            return compute().await;
        }
        let ttl = self.cache.config().post_ttl();
        self.cache.remember(key, ttl, compute).await
    }
}

/// Cached reads of term taxonomies and navigation menus.
pub struct TermFactory {
    cache: Arc<QueryCache>,
    use_cache: AtomicBool,
    terms: Arc<dyn TermsRepo>,
    menu_handlers: MenuItemHandlers,
    tables: Tables,
}

impl TermFactory {
    pub fn new(cache: Arc<QueryCache>, terms: Arc<dyn TermsRepo>, tables: Tables) -> Self {
        Self {
            cache,
            use_cache: AtomicBool::new(true),
            terms,
            menu_handlers: MenuItemHandlers::new(),
            tables,
        }
    }

    pub fn with_menu_handlers(mut self, handlers: MenuItemHandlers) -> Self {
        self.menu_handlers = handlers;
        self
    }

    pub fn enable_cache(&self) {
        self.use_cache.store(true, Ordering::Release);
    }

    pub fn disable_cache(&self) {
        self.use_cache.store(false, Ordering::Release);
    }

    pub fn is_caching(&self) -> bool {
        self.use_cache.load(Ordering::Acquire)
    }

    pub async fn query(&self, query: &TermQuery) -> Result<Vec<TermTaxonomy>, FactoryError> {
        let signature = query.render(&self.tables).signature()?;
        let key = keys::term_taxonomy_by_query(&signature);
        let ttl = self.cache.config().term_ttl();
        self.remember(&key, ttl, move || async move { Ok(self.terms.query_terms(query).await?) })
            .await
    }

    pub async fn query_typed(&self, query: &TermQuery) -> Result<Vec<TermVariant>, FactoryError> {
        let taxonomies = self.query(query).await?;
        Ok(term_types().hydrate_all(taxonomies))
    }

    pub async fn first(&self, query: TermQuery) -> Result<Option<TermTaxonomy>, FactoryError> {
        let mut found = self.query(&query.limit(1)).await?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    pub async fn category_by_id(&self, term_id: u64) -> Result<Option<TermTaxonomy>, FactoryError> {
        self.first(TermQuery::new().category().term_id(term_id)).await
    }

    pub async fn category_by_slug(&self, slug: &str) -> Result<Option<TermTaxonomy>, FactoryError> {
        self.first(TermQuery::new().category().slug(slug)).await
    }

    pub async fn menu_by_id(&self, term_id: u64) -> Result<Option<TermTaxonomy>, FactoryError> {
        self.first(TermQuery::new().menu().term_id(term_id)).await
    }

    pub async fn menu_by_slug(&self, slug: &str) -> Result<Option<TermTaxonomy>, FactoryError> {
        self.first(TermQuery::new().menu().slug(slug)).await
    }

    /// Every taxonomy attached to a post (categories, tags, format, ...).
    pub async fn taxonomies_for(&self, post_id: u64) -> Result<Vec<TermTaxonomy>, FactoryError> {
        self.query(&TermQuery::new().attached_to(post_id)).await
    }

    /// Items of the menu with this slug, in menu order. The handler registered
    /// for an item's type runs on that item.
    pub async fn menu_items_by_slug(
        &self,
        slug: &str,
        item_type: Option<&str>,
        limit: u64,
    ) -> Result<Vec<MenuItem>, FactoryError> {
        let mut query = MenuItemsQuery::new(slug).limit(limit);
        if let Some(item_type) = item_type {
            query = query.item_type(item_type);
        }
        let signature = query.render(&self.tables).signature()?;
        let key = keys::menu_items_by_slug(&signature);
        let ttl = self.cache.config().menu_ttl();
        self.remember(&key, ttl, move || async move {
            let mut items = self.terms.menu_items(&query).await?;
            for item in items.iter_mut() {
                self.menu_handlers.run(item)?;
            }
            Ok(items)
        })
        .await
    }

    async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, FactoryError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FactoryError>>,
    {
        if !self.is_caching() {
            return compute().await;
        }
        self.cache.remember(key, ttl, compute).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_filter_builder_collects_exclusions() {
        let filter = ListFilter::new(["post", "page"], 5)
            .primary_category(12)
            .exclude(&[1, 2])
            .exclude(&[3]);
        assert_eq!(filter.post_types, vec!["post".to_string(), "page".to_string()]);
        assert_eq!(filter.primary_category, Some(12));
        assert_eq!(filter.exclude, vec![1, 2, 3]);
    }

    #[test]
    fn factory_errors_keep_their_source_message() {
        let err = FactoryError::from(HandlerError::failed("shortcodes", "boom"));
        assert_eq!(err.to_string(), "handler `shortcodes` failed: boom");
        let err = FactoryError::from(RepoError::Timeout);
        assert_eq!(err.to_string(), "database timeout");
    }
}
