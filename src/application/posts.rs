use std::sync::Arc;

use time::UtcOffset;
use tracing::{debug, info};

use crate::application::invalidate_after_write;
use crate::application::meta::MetaService;
use crate::application::repos::{PostsRepo, RepoError};
use crate::cache::QueryCache;
use crate::domain::entities::{PostColumn, gmt_from_site, now_utc, site_time};
use crate::domain::meta_value::MetaValue;
use crate::domain::posts::{AttributeName, Post};

const SOURCE: &str = "application::posts";

/// Loads and persists posts together with their meta.
#[derive(Clone)]
pub struct PostService {
    posts: Arc<dyn PostsRepo>,
    meta: MetaService,
    cache: Option<Arc<QueryCache>>,
    utc_offset: UtcOffset,
}

impl PostService {
    pub fn new(posts: Arc<dyn PostsRepo>, meta: MetaService) -> Self {
        Self {
            posts,
            meta,
            cache: None,
            utc_offset: UtcOffset::UTC,
        }
    }

    /// Offset of the site's timezone, used for the local date columns.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.meta = self.meta.with_cache(cache.clone());
        self.cache = Some(cache);
        self
    }

    pub fn meta(&self) -> &MetaService {
        &self.meta
    }

    /// Load a post and its meta snapshot straight from the repositories.
    pub async fn find(&self, id: u64) -> Result<Option<Post>, RepoError> {
        let Some(record) = self.posts.find_post(id).await? else {
            return Ok(None);
        };
        let mut post = Post::from_stored(record, Vec::new());
        self.meta.load_into(std::slice::from_mut(&mut post)).await?;
        Ok(Some(post))
    }

    /// Read an attribute, going to the meta store for non-schema names.
    ///
    /// Unlike [`Post::get_attribute`] this sees meta written since the post was
    /// loaded. Unsaved posts answer `None` for every non-schema name.
    pub async fn attribute(&self, post: &Post, name: &str) -> Result<Option<MetaValue>, RepoError> {
        match AttributeName::resolve(name) {
            AttributeName::Column(_) => Ok(post.get_attribute(name)),
            AttributeName::Meta(key) => match post.owner() {
                Some(owner) => self.meta.get(owner, &key).await,
                None => Ok(None),
            },
        }
    }

    /// Persist the post.
    ///
    /// `post_modified` is stamped in site time and `post_modified_gmt` in UTC.
    /// A new post gets the same pair for its publication date unless the
    /// caller set `post_date`, in which case only the GMT column is derived.
    /// A new post is inserted first so its meta has an owner. Buffered extra
    /// attributes are then written one by one with single-value semantics and
    /// leave the buffer as they are stored; dirty schema columns are written
    /// last. Nothing is rolled back if a later step fails.
    pub async fn save(&self, post: &mut Post) -> Result<(), RepoError> {
        let utc = now_utc();
        let local = site_time(utc, self.utc_offset);
        let created = !post.exists();
        let date_given = post.dirty_columns().contains(&PostColumn::PostDate);
        let gmt_given = post.dirty_columns().contains(&PostColumn::PostDateGmt);
        {
            let offset = self.utc_offset;
            let record = post.record_mut();
            record.post_modified = local;
            record.post_modified_gmt = Some(utc);
            if created && !date_given {
                record.post_date = local;
                record.post_date_gmt = Some(utc);
            } else if created && !gmt_given {
                record.post_date_gmt = Some(gmt_from_site(record.post_date, offset));
            }
        }

        if created {
            let id = self.posts.insert_post(post.record()).await?;
            post.mark_persisted(id);
            post.clear_dirty();
            info!(
                target_module = SOURCE,
                op = "save",
                post_id = id,
                post_type = post.post_type(),
                "inserted post"
            );
        } else {
            post.touch(PostColumn::PostModified);
            post.touch(PostColumn::PostModifiedGmt);
        }

        let owner = post
            .owner()
            .ok_or_else(|| RepoError::Integrity {
                message: "post has no id after insert".to_string(),
            })?;

        let keys: Vec<String> = post.pending_meta().keys().cloned().collect();
        for key in &keys {
            let Some(value) = post.pending_meta().get(key).cloned() else {
                continue;
            };
            self.meta.set(owner, key, &value).await?;
            post.take_pending_meta(key);
        }
        if !keys.is_empty() {
            let records = self.meta.records(owner).await?;
            post.replace_meta(records);
        }

        let columns: Vec<PostColumn> = post.dirty_columns().iter().copied().collect();
        if !columns.is_empty() {
            self.posts.update_post(post.record(), &columns).await?;
            post.clear_dirty();
        }

        debug!(
            target_module = SOURCE,
            op = "save",
            post_id = owner.id(),
            created,
            meta_written = keys.len(),
            columns_written = columns.len()
        );
        invalidate_after_write(self.cache.as_deref(), "posts.save");
        Ok(())
    }
}
