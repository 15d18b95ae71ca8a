//! Shared domain enumerations aligned with WordPress column values.

use serde::{Deserialize, Serialize};

/// Values stored in `posts.post_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostStatus {
    Publish,
    Future,
    Draft,
    Pending,
    Private,
    Trash,
    AutoDraft,
    Inherit,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Future => "future",
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Private => "private",
            PostStatus::Trash => "trash",
            PostStatus::AutoDraft => "auto-draft",
            PostStatus::Inherit => "inherit",
        }
    }
}

/// Values stored in `term_taxonomy.taxonomy` that the query layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Taxonomy {
    Category,
    PostTag,
    NavMenu,
    PostFormat,
}

impl Taxonomy {
    pub fn as_str(self) -> &'static str {
        match self {
            Taxonomy::Category => "category",
            Taxonomy::PostTag => "post_tag",
            Taxonomy::NavMenu => "nav_menu",
            Taxonomy::PostFormat => "post_format",
        }
    }
}

/// Post types with a built-in meaning.
pub const POST_TYPE_POST: &str = "post";
pub const POST_TYPE_PAGE: &str = "page";
pub const POST_TYPE_ATTACHMENT: &str = "attachment";
pub const POST_TYPE_NAV_MENU_ITEM: &str = "nav_menu_item";
