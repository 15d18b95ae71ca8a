//! Discriminator-driven hydration.
//!
//! Rows are hydrated into the base entity and then handed to a
//! [`TypeRegistry`], which looks the discriminator value (`post_type` for posts,
//! `taxonomy` for term taxonomies) up in a table of constructors and falls back
//! to a default. Registries are plain values; the process-wide ones are
//! installed once at startup and read-only afterwards. Installing after the
//! first read, or twice, is rejected.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::OnceCell;

use super::entities::TermTaxonomy;
use super::error::DomainError;
use super::posts::Post;
use super::types::{
    POST_TYPE_ATTACHMENT, POST_TYPE_NAV_MENU_ITEM, POST_TYPE_PAGE, POST_TYPE_POST, Taxonomy,
};

/// Entities that carry a discriminator column.
pub trait Discriminated {
    fn discriminator(&self) -> &str;
}

impl Discriminated for Post {
    fn discriminator(&self) -> &str {
        self.post_type()
    }
}

impl Discriminated for TermTaxonomy {
    fn discriminator(&self) -> &str {
        &self.taxonomy
    }
}

pub type Constructor<E, V> = fn(E) -> V;

pub struct TypeRegistry<E, V> {
    fallback: Constructor<E, V>,
    constructors: HashMap<String, Constructor<E, V>>,
}

impl<E, V> fmt::Debug for TypeRegistry<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry")
            .field("registered", &names)
            .finish()
    }
}

impl<E: Discriminated, V> TypeRegistry<E, V> {
    pub fn new(fallback: Constructor<E, V>) -> Self {
        Self {
            fallback,
            constructors: HashMap::new(),
        }
    }

    pub fn register(mut self, value: impl Into<String>, constructor: Constructor<E, V>) -> Self {
        self.constructors.insert(value.into(), constructor);
        self
    }

    pub fn is_registered(&self, value: &str) -> bool {
        self.constructors.contains_key(value)
    }

    pub fn hydrate(&self, entity: E) -> V {
        let constructor = self
            .constructors
            .get(entity.discriminator())
            .copied()
            .unwrap_or(self.fallback);
        constructor(entity)
    }

    pub fn hydrate_all(&self, entities: Vec<E>) -> Vec<V> {
        entities
            .into_iter()
            .map(|entity| self.hydrate(entity))
            .collect()
    }
}

/// Post specializations known to the crate.
#[derive(Debug, Clone, PartialEq)]
pub enum PostVariant {
    Article(Post),
    Page(Post),
    Attachment(Post),
    MenuItem(Post),
    /// A custom post type registered by the application.
    Custom(Post),
    /// No constructor registered for the post type.
    Generic(Post),
}

impl PostVariant {
    pub fn post(&self) -> &Post {
        match self {
            PostVariant::Article(post)
            | PostVariant::Page(post)
            | PostVariant::Attachment(post)
            | PostVariant::MenuItem(post)
            | PostVariant::Custom(post)
            | PostVariant::Generic(post) => post,
        }
    }

    pub fn into_post(self) -> Post {
        match self {
            PostVariant::Article(post)
            | PostVariant::Page(post)
            | PostVariant::Attachment(post)
            | PostVariant::MenuItem(post)
            | PostVariant::Custom(post)
            | PostVariant::Generic(post) => post,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermVariant {
    Category(TermTaxonomy),
    Tag(TermTaxonomy),
    Menu(TermTaxonomy),
    PostFormat(TermTaxonomy),
    Custom(TermTaxonomy),
    Generic(TermTaxonomy),
}

impl TermVariant {
    pub fn taxonomy(&self) -> &TermTaxonomy {
        match self {
            TermVariant::Category(term)
            | TermVariant::Tag(term)
            | TermVariant::Menu(term)
            | TermVariant::PostFormat(term)
            | TermVariant::Custom(term)
            | TermVariant::Generic(term) => term,
        }
    }
}

pub type PostTypeRegistry = TypeRegistry<Post, PostVariant>;
pub type TermTypeRegistry = TypeRegistry<TermTaxonomy, TermVariant>;

/// Built-in post types; extend with `.register("video", PostVariant::Custom)`.
pub fn default_post_types() -> PostTypeRegistry {
    TypeRegistry::new(PostVariant::Generic)
        .register(POST_TYPE_POST, PostVariant::Article)
        .register(POST_TYPE_PAGE, PostVariant::Page)
        .register(POST_TYPE_ATTACHMENT, PostVariant::Attachment)
        .register(POST_TYPE_NAV_MENU_ITEM, PostVariant::MenuItem)
}

pub fn default_term_types() -> TermTypeRegistry {
    TypeRegistry::new(TermVariant::Generic)
        .register(Taxonomy::Category.as_str(), TermVariant::Category)
        .register(Taxonomy::PostTag.as_str(), TermVariant::Tag)
        .register(Taxonomy::NavMenu.as_str(), TermVariant::Menu)
        .register(Taxonomy::PostFormat.as_str(), TermVariant::PostFormat)
}

static POST_TYPES: OnceCell<PostTypeRegistry> = OnceCell::new();
static TERM_TYPES: OnceCell<TermTypeRegistry> = OnceCell::new();

pub fn install_post_types(registry: PostTypeRegistry) -> Result<(), DomainError> {
    POST_TYPES
        .set(registry)
        .map_err(|_| DomainError::invariant("post type registry already installed"))
}

pub fn install_term_types(registry: TermTypeRegistry) -> Result<(), DomainError> {
    TERM_TYPES
        .set(registry)
        .map_err(|_| DomainError::invariant("term type registry already installed"))
}

/// The process-wide post registry; the built-in one if none was installed.
pub fn post_types() -> &'static PostTypeRegistry {
    POST_TYPES.get_or_init(default_post_types)
}

pub fn term_types() -> &'static TermTypeRegistry {
    TERM_TYPES.get_or_init(default_term_types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PostRecord;

    fn stored(post_type: &str) -> Post {
        let mut record = PostRecord::draft(post_type);
        record.id = 1;
        Post::from_stored(record, Vec::new())
    }

    #[test]
    fn registered_types_get_their_variant() {
        let registry = default_post_types().register("video", PostVariant::Custom);

        assert!(matches!(registry.hydrate(stored("post")), PostVariant::Article(_)));
        assert!(matches!(registry.hydrate(stored("page")), PostVariant::Page(_)));
        assert!(matches!(registry.hydrate(stored("video")), PostVariant::Custom(_)));
    }

    #[test]
    fn unregistered_types_fall_back_to_default() {
        let registry = default_post_types();
        let variant = registry.hydrate(stored("podcast"));
        assert!(matches!(variant, PostVariant::Generic(_)));
        assert!(variant.post().exists());
        assert_eq!(variant.into_post().post_type(), "podcast");
    }

    #[test]
    fn custom_variant_enums_are_supported() {
        #[derive(Debug)]
        enum Shape {
            Plain,
            Video(u64),
        }
        let registry: TypeRegistry<Post, Shape> = TypeRegistry::new(|_| Shape::Plain)
            .register("video", |post| Shape::Video(post.record().id));

        assert!(matches!(registry.hydrate(stored("video")), Shape::Video(1)));
        assert!(matches!(registry.hydrate(stored("post")), Shape::Plain));
    }

    #[test]
    fn term_taxonomies_are_specialized() {
        let taxonomy = TermTaxonomy {
            term_taxonomy_id: 3,
            term_id: 3,
            taxonomy: "nav_menu".into(),
            description: String::new(),
            parent: 0,
            count: 0,
            term: None,
            handlers: Vec::new(),
        };
        assert!(matches!(default_term_types().hydrate(taxonomy), TermVariant::Menu(_)));
    }
}
