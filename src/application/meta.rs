use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::application::invalidate_after_write;
use crate::application::repos::{MetaRepo, OptionsRepo, RepoError};
use crate::cache::QueryCache;
use crate::domain::entities::{MetaOwner, MetaRecord};
use crate::domain::meta_value::MetaValue;
use crate::domain::posts::Post;

const SOURCE: &str = "application::meta";

/// Typed access to `postmeta`, `termmeta` and `usermeta`.
///
/// Values are encoded with [`MetaValue::to_storage`] on write and decoded on
/// read; undecodable stored text comes back as a string.
#[derive(Clone)]
pub struct MetaService {
    repo: Arc<dyn MetaRepo>,
    cache: Option<Arc<QueryCache>>,
}

impl MetaService {
    pub fn new(repo: Arc<dyn MetaRepo>) -> Self {
        Self { repo, cache: None }
    }

    /// Writes through this service invalidate the cache's tracked keys.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn repo(&self) -> &Arc<dyn MetaRepo> {
        &self.repo
    }

    /// First value for the key.
    pub async fn get(&self, owner: MetaOwner, key: &str) -> Result<Option<MetaValue>, RepoError> {
        let record = self.repo.first_meta(owner, key).await?;
        Ok(record.as_ref().map(MetaRecord::value))
    }

    /// Every value for the key, oldest first.
    pub async fn get_all(&self, owner: MetaOwner, key: &str) -> Result<Vec<MetaValue>, RepoError> {
        let records = self.repo.all_meta(owner).await?;
        Ok(records
            .iter()
            .filter(|record| record.meta_key == key)
            .map(MetaRecord::value)
            .collect())
    }

    pub async fn records(&self, owner: MetaOwner) -> Result<Vec<MetaRecord>, RepoError> {
        self.repo.all_meta(owner).await
    }

    /// Replace the first value for the key, or add one if there is none.
    pub async fn set(
        &self,
        owner: MetaOwner,
        key: &str,
        value: &MetaValue,
    ) -> Result<MetaRecord, RepoError> {
        self.write(owner, key, value, true).await
    }

    /// Append another value for the key.
    pub async fn add(
        &self,
        owner: MetaOwner,
        key: &str,
        value: &MetaValue,
    ) -> Result<MetaRecord, RepoError> {
        self.write(owner, key, value, false).await
    }

    pub async fn delete(&self, owner: MetaOwner, key: &str) -> Result<u64, RepoError> {
        let removed = self.repo.delete_meta(owner, key).await?;
        debug!(
            target_module = SOURCE,
            op = "delete",
            owner = owner.kind(),
            owner_id = owner.id(),
            meta_key = key,
            removed
        );
        invalidate_after_write(self.cache.as_deref(), "meta.delete");
        Ok(removed)
    }

    /// Attach each post's meta snapshot with one repository call.
    pub async fn load_into(&self, posts: &mut [Post]) -> Result<(), RepoError> {
        let owners: Vec<MetaOwner> = posts.iter().filter_map(Post::owner).collect();
        if owners.is_empty() {
            return Ok(());
        }
        let mut grouped: HashMap<MetaOwner, Vec<MetaRecord>> = HashMap::new();
        for record in self.repo.all_meta_for(&owners).await? {
            grouped.entry(record.owner).or_default().push(record);
        }
        for post in posts.iter_mut() {
            if let Some(owner) = post.owner() {
                let mut records = grouped.remove(&owner).unwrap_or_default();
                records.sort_by_key(|record| record.meta_id);
                post.replace_meta(records);
            }
        }
        Ok(())
    }

    async fn write(
        &self,
        owner: MetaOwner,
        key: &str,
        value: &MetaValue,
        single: bool,
    ) -> Result<MetaRecord, RepoError> {
        let stored = value.to_storage();
        let record = self.repo.upsert_meta(owner, key, &stored, single).await?;
        debug!(
            target_module = SOURCE,
            op = if single { "set" } else { "add" },
            owner = owner.kind(),
            owner_id = owner.id(),
            meta_key = key,
            meta_id = record.meta_id
        );
        invalidate_after_write(self.cache.as_deref(), "meta.write");
        Ok(record)
    }
}

/// Reads from the `options` table.
#[derive(Clone)]
pub struct OptionsService {
    repo: Arc<dyn OptionsRepo>,
}

impl OptionsService {
    pub fn new(repo: Arc<dyn OptionsRepo>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, name: &str) -> Result<Option<MetaValue>, RepoError> {
        let record = self.repo.option(name).await?;
        Ok(record.map(|record| record.value()))
    }
}
