//! The meta-aware post model.
//!
//! A [`Post`] is the typed `posts` row plus everything WordPress hangs off it
//! through `postmeta`. Attribute access is explicit and two-tiered: schema
//! columns are matched directly, anything else is a meta key. Assignments are
//! buffered until the post is saved (see `application::posts::PostService`).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::entities::{MetaOwner, MetaRecord, PostColumn, PostRecord, TermTaxonomy, snake_case};
use super::error::DomainError;
use super::meta_value::MetaValue;
use super::types::{PostStatus, Taxonomy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    record: PostRecord,
    exists: bool,
    meta: Vec<MetaRecord>,
    #[serde(default)]
    dirty: BTreeSet<PostColumn>,
    #[serde(default)]
    extra: BTreeMap<String, MetaValue>,
    #[serde(default)]
    handlers: Vec<String>,
}

/// Where an attribute name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeName {
    Column(PostColumn),
    Meta(String),
}

impl AttributeName {
    pub fn resolve(name: &str) -> Self {
        match PostColumn::from_name(name) {
            Some(column) => AttributeName::Column(column),
            None => AttributeName::Meta(snake_case(name)),
        }
    }
}

impl Post {
    /// A transient post of the given type.
    pub fn new(post_type: &str) -> Self {
        Self {
            record: PostRecord::draft(post_type),
            exists: false,
            meta: Vec::new(),
            dirty: BTreeSet::new(),
            extra: BTreeMap::new(),
            handlers: Vec::new(),
        }
    }

    /// A post hydrated from storage together with its meta rows.
    pub fn from_stored(record: PostRecord, meta: Vec<MetaRecord>) -> Self {
        Self {
            record,
            exists: true,
            meta,
            dirty: BTreeSet::new(),
            extra: BTreeMap::new(),
            handlers: Vec::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// The row id, once the post has been persisted.
    pub fn id(&self) -> Option<u64> {
        self.exists.then_some(self.record.id)
    }

    pub fn owner(&self) -> Option<MetaOwner> {
        self.id().map(MetaOwner::Post)
    }

    pub fn record(&self) -> &PostRecord {
        &self.record
    }

    pub fn post_type(&self) -> &str {
        &self.record.post_type
    }

    pub fn title(&self) -> &str {
        &self.record.post_title
    }

    pub fn slug(&self) -> &str {
        &self.record.post_name
    }

    pub fn content(&self) -> &str {
        &self.record.post_content
    }

    pub fn excerpt(&self) -> &str {
        &self.record.post_excerpt
    }

    pub fn status(&self) -> &str {
        &self.record.post_status
    }

    pub fn is_published(&self) -> bool {
        self.record.post_status == PostStatus::Publish.as_str()
    }

    pub fn has_excerpt(&self) -> bool {
        !self.record.post_excerpt.is_empty()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.record.post_title = title.into();
        self.dirty.insert(PostColumn::PostTitle);
    }

    pub fn set_slug(&mut self, slug: impl Into<String>) {
        self.record.post_name = slug.into();
        self.dirty.insert(PostColumn::PostName);
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.record.post_content = content.into();
        self.dirty.insert(PostColumn::PostContent);
    }

    pub fn set_excerpt(&mut self, excerpt: impl Into<String>) {
        self.record.post_excerpt = excerpt.into();
        self.dirty.insert(PostColumn::PostExcerpt);
    }

    pub fn set_status(&mut self, status: PostStatus) {
        self.record.post_status = status.as_str().to_string();
        self.dirty.insert(PostColumn::PostStatus);
    }

    /// Read an attribute: schema columns first, then the loaded meta.
    ///
    /// Non-schema names are never answered for a post that has not been saved,
    /// even if they were assigned in memory.
    pub fn get_attribute(&self, name: &str) -> Option<MetaValue> {
        match AttributeName::resolve(name) {
            AttributeName::Column(column) => Some(self.record.get(column)),
            AttributeName::Meta(key) => {
                if !self.exists {
                    return None;
                }
                self.meta(&key)
            }
        }
    }

    /// Assign an attribute. Schema columns are validated and marked dirty;
    /// other names are buffered for the meta table until the next save.
    pub fn set_attribute(&mut self, name: &str, value: MetaValue) -> Result<(), DomainError> {
        match AttributeName::resolve(name) {
            AttributeName::Column(PostColumn::Id) => Err(DomainError::validation(
                "`ID` is assigned by the database",
            )),
            AttributeName::Column(column) => {
                self.record.set(column, value)?;
                self.dirty.insert(column);
                Ok(())
            }
            AttributeName::Meta(key) => {
                self.extra.insert(key, value);
                Ok(())
            }
        }
    }

    /// First loaded meta value for `key`, decoded.
    pub fn meta(&self, key: &str) -> Option<MetaValue> {
        self.meta
            .iter()
            .find(|record| record.meta_key == key)
            .map(MetaRecord::value)
    }

    pub fn has_meta(&self, key: &str) -> bool {
        self.meta.iter().any(|record| record.meta_key == key)
    }

    pub fn meta_records(&self) -> &[MetaRecord] {
        &self.meta
    }

    pub fn replace_meta(&mut self, meta: Vec<MetaRecord>) {
        self.meta = meta;
    }

    pub fn dirty_columns(&self) -> &BTreeSet<PostColumn> {
        &self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.extra.is_empty()
    }

    pub fn pending_meta(&self) -> &BTreeMap<String, MetaValue> {
        &self.extra
    }

    /// Remove and return one buffered meta assignment.
    pub fn take_pending_meta(&mut self, key: &str) -> Option<MetaValue> {
        self.extra.remove(key)
    }

    pub(crate) fn record_mut(&mut self) -> &mut PostRecord {
        &mut self.record
    }

    pub(crate) fn touch(&mut self, column: PostColumn) {
        self.dirty.insert(column);
    }

    pub(crate) fn mark_persisted(&mut self, id: u64) {
        self.record.id = id;
        self.exists = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn handlers(&self) -> &[String] {
        &self.handlers
    }

    pub fn record_handler(&mut self, name: &str) {
        self.handlers.push(name.to_string());
    }

    /// Fails unless the named handler has processed this post.
    pub fn require_handler(&self, name: &str) -> Result<(), DomainError> {
        if self.handlers.iter().any(|ran| ran == name) {
            Ok(())
        } else {
            Err(DomainError::HandlerNotRun {
                name: name.to_string(),
            })
        }
    }
}

/// The post format (`aside`, `video`, ...) from a post's taxonomies.
pub fn post_format(taxonomies: &[TermTaxonomy]) -> Option<String> {
    taxonomies
        .iter()
        .find(|taxonomy| taxonomy.taxonomy == Taxonomy::PostFormat.as_str())
        .and_then(TermTaxonomy::slug)
        .map(|slug| slug.trim_start_matches("post-format-").to_string())
}

pub fn tags(taxonomies: &[TermTaxonomy]) -> impl Iterator<Item = &TermTaxonomy> {
    taxonomies
        .iter()
        .filter(|taxonomy| taxonomy.taxonomy == Taxonomy::PostTag.as_str())
}

pub fn categories(taxonomies: &[TermTaxonomy]) -> impl Iterator<Item = &TermTaxonomy> {
    taxonomies
        .iter()
        .filter(|taxonomy| taxonomy.taxonomy == Taxonomy::Category.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TermRecord;

    fn stored_post() -> Post {
        let mut record = PostRecord::draft("post");
        record.id = 7;
        record.post_title = "Stored".into();
        Post::from_stored(
            record,
            vec![
                MetaRecord {
                    meta_id: 1,
                    owner: MetaOwner::Post(7),
                    meta_key: "subtitle".into(),
                    meta_value: Some("first".into()),
                },
                MetaRecord {
                    meta_id: 2,
                    owner: MetaOwner::Post(7),
                    meta_key: "subtitle".into(),
                    meta_value: Some("second".into()),
                },
            ],
        )
    }

    #[test]
    fn unsaved_posts_never_expose_meta_attributes() {
        let mut post = Post::new("post");
        post.set_attribute("subtitle", MetaValue::from("draft"))
            .expect("buffered");

        assert_eq!(post.get_attribute("subtitle"), None);
        assert_eq!(post.pending_meta().get("subtitle"), Some(&MetaValue::from("draft")));
        assert_eq!(post.id(), None);
    }

    #[test]
    fn schema_columns_are_read_directly() {
        let post = stored_post();
        assert_eq!(post.get_attribute("postTitle"), Some(MetaValue::from("Stored")));
        assert_eq!(post.get_attribute("ID"), Some(MetaValue::Int(7)));
    }

    #[test]
    fn meta_lookup_returns_first_match() {
        let post = stored_post();
        assert_eq!(post.get_attribute("subtitle"), Some(MetaValue::from("first")));
        assert!(post.has_meta("subtitle"));
        assert_eq!(post.get_attribute("missing"), None);
    }

    #[test]
    fn camel_case_meta_names_map_to_snake_case_keys() {
        let mut post = stored_post();
        post.set_attribute("featuredPosition", MetaValue::Int(2))
            .expect("buffered");
        assert!(post.pending_meta().contains_key("featured_position"));
    }

    #[test]
    fn schema_assignments_mark_columns_dirty() {
        let mut post = stored_post();
        post.set_attribute("post_excerpt", MetaValue::from("short"))
            .expect("column accepted");
        assert!(post.dirty_columns().contains(&PostColumn::PostExcerpt));
        assert!(post.has_excerpt());
        assert!(post.set_attribute("ID", MetaValue::Int(3)).is_err());
    }

    #[test]
    fn require_handler_checks_recorded_names() {
        let mut post = stored_post();
        assert!(post.require_handler("shortcodes").is_err());
        post.record_handler("shortcodes");
        assert!(post.require_handler("shortcodes").is_ok());
    }

    #[test]
    fn post_format_strips_prefix() {
        let taxonomies = vec![TermTaxonomy {
            term_taxonomy_id: 4,
            term_id: 4,
            taxonomy: "post_format".into(),
            description: String::new(),
            parent: 0,
            count: 1,
            term: Some(TermRecord {
                term_id: 4,
                name: "Video".into(),
                slug: "post-format-video".into(),
                term_group: 0,
            }),
            handlers: Vec::new(),
        }];
        assert_eq!(post_format(&taxonomies).as_deref(), Some("video"));
        assert_eq!(tags(&taxonomies).count(), 0);
    }
}
