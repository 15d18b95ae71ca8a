//! Persisted WordPress records.

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::error::DomainError;
use super::meta_value::MetaValue;
use super::types::PostStatus;

/// WordPress `DATETIME` text form.
pub const DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub fn format_datetime(value: PrimitiveDateTime) -> String {
    value
        .format(DATETIME_FORMAT)
        .unwrap_or_else(|_| value.to_string())
}

pub fn parse_datetime(value: &str) -> Result<PrimitiveDateTime, DomainError> {
    PrimitiveDateTime::parse(value.trim(), DATETIME_FORMAT)
        .map_err(|err| DomainError::validation(format!("invalid datetime `{value}`: {err}")))
}

/// The current time in UTC, as stored in the `*_gmt` columns.
pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Wall-clock time of a site `offset` away from UTC. Saturates at the
/// calendar bounds.
pub fn site_time(utc: PrimitiveDateTime, offset: UtcOffset) -> PrimitiveDateTime {
    utc.checked_add(Duration::seconds(i64::from(offset.whole_seconds())))
        .unwrap_or(utc)
}

/// Inverse of [`site_time`].
pub fn gmt_from_site(local: PrimitiveDateTime, offset: UtcOffset) -> PrimitiveDateTime {
    local
        .checked_sub(Duration::seconds(i64::from(offset.whole_seconds())))
        .unwrap_or(local)
}

/// The fixed columns of `posts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostColumn {
    Id,
    PostAuthor,
    PostDate,
    PostDateGmt,
    PostContent,
    PostTitle,
    PostExcerpt,
    PostStatus,
    CommentStatus,
    PingStatus,
    PostPassword,
    PostName,
    ToPing,
    Pinged,
    PostModified,
    PostModifiedGmt,
    PostContentFiltered,
    PostParent,
    Guid,
    MenuOrder,
    PostType,
    PostMimeType,
    CommentCount,
}

impl PostColumn {
    pub const ALL: [PostColumn; 23] = [
        PostColumn::Id,
        PostColumn::PostAuthor,
        PostColumn::PostDate,
        PostColumn::PostDateGmt,
        PostColumn::PostContent,
        PostColumn::PostTitle,
        PostColumn::PostExcerpt,
        PostColumn::PostStatus,
        PostColumn::CommentStatus,
        PostColumn::PingStatus,
        PostColumn::PostPassword,
        PostColumn::PostName,
        PostColumn::ToPing,
        PostColumn::Pinged,
        PostColumn::PostModified,
        PostColumn::PostModifiedGmt,
        PostColumn::PostContentFiltered,
        PostColumn::PostParent,
        PostColumn::Guid,
        PostColumn::MenuOrder,
        PostColumn::PostType,
        PostColumn::PostMimeType,
        PostColumn::CommentCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PostColumn::Id => "ID",
            PostColumn::PostAuthor => "post_author",
            PostColumn::PostDate => "post_date",
            PostColumn::PostDateGmt => "post_date_gmt",
            PostColumn::PostContent => "post_content",
            PostColumn::PostTitle => "post_title",
            PostColumn::PostExcerpt => "post_excerpt",
            PostColumn::PostStatus => "post_status",
            PostColumn::CommentStatus => "comment_status",
            PostColumn::PingStatus => "ping_status",
            PostColumn::PostPassword => "post_password",
            PostColumn::PostName => "post_name",
            PostColumn::ToPing => "to_ping",
            PostColumn::Pinged => "pinged",
            PostColumn::PostModified => "post_modified",
            PostColumn::PostModifiedGmt => "post_modified_gmt",
            PostColumn::PostContentFiltered => "post_content_filtered",
            PostColumn::PostParent => "post_parent",
            PostColumn::Guid => "guid",
            PostColumn::MenuOrder => "menu_order",
            PostColumn::PostType => "post_type",
            PostColumn::PostMimeType => "post_mime_type",
            PostColumn::CommentCount => "comment_count",
        }
    }

    /// Resolve an attribute name (`ID`, `id`, `post_title`, `postTitle`) to a column.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "ID" || name == "id" {
            return Some(PostColumn::Id);
        }
        let snake = snake_case(name);
        PostColumn::ALL
            .into_iter()
            .find(|column| column.name() == snake)
    }
}

/// camelCase / StudlyCase to snake_case; already-snake names pass through.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (index, ch) in name.char_indices() {
        if ch.is_ascii_uppercase() {
            if index > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// A row of `posts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: u64,
    pub post_author: u64,
    pub post_date: PrimitiveDateTime,
    pub post_date_gmt: Option<PrimitiveDateTime>,
    pub post_content: String,
    pub post_title: String,
    pub post_excerpt: String,
    pub post_status: String,
    pub comment_status: String,
    pub ping_status: String,
    pub post_password: String,
    pub post_name: String,
    pub to_ping: String,
    pub pinged: String,
    pub post_modified: PrimitiveDateTime,
    pub post_modified_gmt: Option<PrimitiveDateTime>,
    pub post_content_filtered: String,
    pub post_parent: u64,
    pub guid: String,
    pub menu_order: i64,
    pub post_type: String,
    pub post_mime_type: String,
    pub comment_count: i64,
}

impl PostRecord {
    /// Defaults WordPress applies to a fresh `wp_insert_post`. Dates start in
    /// UTC; saving restamps them in the site's timezone.
    pub fn draft(post_type: &str) -> Self {
        let now = now_utc();
        Self {
            id: 0,
            post_author: 0,
            post_date: now,
            post_date_gmt: Some(now),
            post_content: String::new(),
            post_title: String::new(),
            post_excerpt: String::new(),
            post_status: PostStatus::Draft.as_str().to_string(),
            comment_status: "open".to_string(),
            ping_status: "open".to_string(),
            post_password: String::new(),
            post_name: String::new(),
            to_ping: String::new(),
            pinged: String::new(),
            post_modified: now,
            post_modified_gmt: Some(now),
            post_content_filtered: String::new(),
            post_parent: 0,
            guid: String::new(),
            menu_order: 0,
            post_type: post_type.to_string(),
            post_mime_type: String::new(),
            comment_count: 0,
        }
    }

    pub fn get(&self, column: PostColumn) -> MetaValue {
        let text = |value: &String| MetaValue::String(value.clone());
        let date = |value: &PrimitiveDateTime| MetaValue::String(format_datetime(*value));
        let opt_date = |value: &Option<PrimitiveDateTime>| match value {
            Some(value) => date(value),
            None => MetaValue::Null,
        };
        match column {
            PostColumn::Id => MetaValue::Int(self.id as i64),
            PostColumn::PostAuthor => MetaValue::Int(self.post_author as i64),
            PostColumn::PostDate => date(&self.post_date),
            PostColumn::PostDateGmt => opt_date(&self.post_date_gmt),
            PostColumn::PostContent => text(&self.post_content),
            PostColumn::PostTitle => text(&self.post_title),
            PostColumn::PostExcerpt => text(&self.post_excerpt),
            PostColumn::PostStatus => text(&self.post_status),
            PostColumn::CommentStatus => text(&self.comment_status),
            PostColumn::PingStatus => text(&self.ping_status),
            PostColumn::PostPassword => text(&self.post_password),
            PostColumn::PostName => text(&self.post_name),
            PostColumn::ToPing => text(&self.to_ping),
            PostColumn::Pinged => text(&self.pinged),
            PostColumn::PostModified => date(&self.post_modified),
            PostColumn::PostModifiedGmt => opt_date(&self.post_modified_gmt),
            PostColumn::PostContentFiltered => text(&self.post_content_filtered),
            PostColumn::PostParent => MetaValue::Int(self.post_parent as i64),
            PostColumn::Guid => text(&self.guid),
            PostColumn::MenuOrder => MetaValue::Int(self.menu_order),
            PostColumn::PostType => text(&self.post_type),
            PostColumn::PostMimeType => text(&self.post_mime_type),
            PostColumn::CommentCount => MetaValue::Int(self.comment_count),
        }
    }

    pub fn set(&mut self, column: PostColumn, value: MetaValue) -> Result<(), DomainError> {
        let name = column.name();
        match column {
            PostColumn::Id => self.id = to_unsigned(name, &value)?,
            PostColumn::PostAuthor => self.post_author = to_unsigned(name, &value)?,
            PostColumn::PostDate => self.post_date = to_datetime(name, &value)?,
            PostColumn::PostDateGmt => self.post_date_gmt = to_optional_datetime(name, &value)?,
            PostColumn::PostContent => self.post_content = to_text(name, &value)?,
            PostColumn::PostTitle => self.post_title = to_text(name, &value)?,
            PostColumn::PostExcerpt => self.post_excerpt = to_text(name, &value)?,
            PostColumn::PostStatus => self.post_status = to_text(name, &value)?,
            PostColumn::CommentStatus => self.comment_status = to_text(name, &value)?,
            PostColumn::PingStatus => self.ping_status = to_text(name, &value)?,
            PostColumn::PostPassword => self.post_password = to_text(name, &value)?,
            PostColumn::PostName => self.post_name = to_text(name, &value)?,
            PostColumn::ToPing => self.to_ping = to_text(name, &value)?,
            PostColumn::Pinged => self.pinged = to_text(name, &value)?,
            PostColumn::PostModified => self.post_modified = to_datetime(name, &value)?,
            PostColumn::PostModifiedGmt => {
                self.post_modified_gmt = to_optional_datetime(name, &value)?
            }
            PostColumn::PostContentFiltered => self.post_content_filtered = to_text(name, &value)?,
            PostColumn::PostParent => self.post_parent = to_unsigned(name, &value)?,
            PostColumn::Guid => self.guid = to_text(name, &value)?,
            PostColumn::MenuOrder => self.menu_order = to_signed(name, &value)?,
            PostColumn::PostType => self.post_type = to_text(name, &value)?,
            PostColumn::PostMimeType => self.post_mime_type = to_text(name, &value)?,
            PostColumn::CommentCount => self.comment_count = to_signed(name, &value)?,
        }
        Ok(())
    }
}

fn to_text(column: &str, value: &MetaValue) -> Result<String, DomainError> {
    value
        .to_plain_string()
        .ok_or_else(|| DomainError::validation(format!("`{column}` cannot hold a composite value")))
}

fn to_signed(column: &str, value: &MetaValue) -> Result<i64, DomainError> {
    value
        .as_i64()
        .ok_or_else(|| DomainError::validation(format!("`{column}` requires an integer")))
}

fn to_unsigned(column: &str, value: &MetaValue) -> Result<u64, DomainError> {
    let signed = to_signed(column, value)?;
    u64::try_from(signed)
        .map_err(|_| DomainError::validation(format!("`{column}` must not be negative")))
}

fn to_datetime(column: &str, value: &MetaValue) -> Result<PrimitiveDateTime, DomainError> {
    match value {
        MetaValue::String(text) => parse_datetime(text),
        _ => Err(DomainError::validation(format!(
            "`{column}` requires a `YYYY-MM-DD HH:MM:SS` datetime"
        ))),
    }
}

fn to_optional_datetime(
    column: &str,
    value: &MetaValue,
) -> Result<Option<PrimitiveDateTime>, DomainError> {
    match value {
        MetaValue::Null => Ok(None),
        other => to_datetime(column, other).map(Some),
    }
}

/// The entity a meta row hangs off, which also selects the meta table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MetaOwner {
    Post(u64),
    Term(u64),
    User(u64),
}

impl MetaOwner {
    pub fn id(self) -> u64 {
        match self {
            MetaOwner::Post(id) | MetaOwner::Term(id) | MetaOwner::User(id) => id,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            MetaOwner::Post(_) => "post",
            MetaOwner::Term(_) => "term",
            MetaOwner::User(_) => "user",
        }
    }
}

/// A row of `postmeta`, `termmeta` or `usermeta`. `meta_value` is stored text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub meta_id: u64,
    pub owner: MetaOwner,
    pub meta_key: String,
    pub meta_value: Option<String>,
}

impl MetaRecord {
    pub fn value(&self) -> MetaValue {
        match self.meta_value.as_deref() {
            Some(raw) => MetaValue::from_storage(raw),
            None => MetaValue::Null,
        }
    }
}

/// A row of `terms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub term_id: u64,
    pub name: String,
    pub slug: String,
    pub term_group: i64,
}

/// A row of `term_taxonomy` with its term eagerly attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermTaxonomy {
    pub term_taxonomy_id: u64,
    pub term_id: u64,
    pub taxonomy: String,
    pub description: String,
    pub parent: u64,
    pub count: i64,
    pub term: Option<TermRecord>,
    #[serde(default)]
    pub handlers: Vec<String>,
}

impl TermTaxonomy {
    pub fn slug(&self) -> Option<&str> {
        self.term.as_ref().map(|term| term.slug.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.term.as_ref().map(|term| term.name.as_str())
    }
}

/// One resolved entry of a navigation menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: u64,
    pub menu_order: i64,
    pub item_type: Option<String>,
    pub object_id: Option<String>,
    pub parent_id: Option<String>,
    pub url: Option<String>,
    pub slug: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub handlers: Vec<String>,
}

/// A row of `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRecord {
    pub option_id: u64,
    pub option_name: String,
    pub option_value: String,
    pub autoload: String,
}

impl OptionRecord {
    pub fn value(&self) -> MetaValue {
        MetaValue::from_storage(&self.option_value)
    }

    pub fn autoloads(&self) -> bool {
        matches!(self.autoload.as_str(), "yes" | "on" | "auto" | "auto-on")
    }
}
