//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::query::{MenuItemsQuery, PostQuery, TermQuery};
use crate::domain::entities::{
    MenuItem, MetaOwner, MetaRecord, OptionRecord, PostColumn, PostRecord, TermTaxonomy,
};
use crate::domain::ordering::{GroupEntry, RequestedPosition, RerankPlan};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("{} {} does not exist; save it before writing meta", .owner.kind(), .owner.id())]
    OwnerNotPersisted { owner: MetaOwner },
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn find_post(&self, id: u64) -> Result<Option<PostRecord>, RepoError>;

    async fn query_posts(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError>;

    async fn count_posts(&self, query: &PostQuery) -> Result<u64, RepoError>;

    /// Insert a new row and return its `ID`. `record.id` is ignored.
    async fn insert_post(&self, record: &PostRecord) -> Result<u64, RepoError>;

    /// Write the listed columns of an existing row.
    async fn update_post(
        &self,
        record: &PostRecord,
        columns: &[PostColumn],
    ) -> Result<(), RepoError>;
}

/// Key-value records attached to posts, terms and users.
///
/// Records are returned in `meta_id` order, so the first record for a key is
/// the one single-valued reads and writes use. Values are stored text.
#[async_trait]
pub trait MetaRepo: Send + Sync {
    async fn all_meta(&self, owner: MetaOwner) -> Result<Vec<MetaRecord>, RepoError>;

    async fn all_meta_for(&self, owners: &[MetaOwner]) -> Result<Vec<MetaRecord>, RepoError>;

    async fn first_meta(&self, owner: MetaOwner, key: &str)
    -> Result<Option<MetaRecord>, RepoError>;

    /// With `single`, update the first record for the key in place (inserting
    /// when there is none); otherwise always insert. Fails with
    /// [`RepoError::OwnerNotPersisted`] when the owner row does not exist.
    async fn upsert_meta(
        &self,
        owner: MetaOwner,
        key: &str,
        value: &str,
        single: bool,
    ) -> Result<MetaRecord, RepoError>;

    /// Remove every record for the key; returns how many were removed.
    async fn delete_meta(&self, owner: MetaOwner, key: &str) -> Result<u64, RepoError>;
}

/// Posts of one type ordered by a numeric meta value.
#[async_trait]
pub trait OrderedGroupRepo: Send + Sync {
    /// Members of the group in position order. Records whose value is not a
    /// positive integer are not members.
    async fn group(&self, post_type: &str, meta_key: &str) -> Result<Vec<GroupEntry>, RepoError>;

    /// Read the group, plan the move and write it, as one unit with respect
    /// to other reranks of the same group.
    async fn rerank(
        &self,
        post_type: &str,
        meta_key: &str,
        owner_id: u64,
        requested: RequestedPosition,
    ) -> Result<RerankPlan, RepoError>;
}

#[async_trait]
pub trait TermsRepo: Send + Sync {
    async fn query_terms(&self, query: &TermQuery) -> Result<Vec<TermTaxonomy>, RepoError>;

    async fn menu_items(&self, query: &MenuItemsQuery) -> Result<Vec<MenuItem>, RepoError>;
}

#[async_trait]
pub trait OptionsRepo: Send + Sync {
    async fn option(&self, name: &str) -> Result<Option<OptionRecord>, RepoError>;
}
