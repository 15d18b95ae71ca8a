//! Query descriptions.
//!
//! A [`PostQuery`], [`TermQuery`] or [`MenuItemsQuery`] is plain data. It renders
//! to MySQL text with `?` placeholders plus an ordered list of bindings; the
//! rendered form is what the cache signature is computed from and what the
//! MySQL adapter executes. Other adapters evaluate the description directly.

use serde::{Deserialize, Serialize};

use crate::cache::{self, CacheError};
use crate::domain::types::{PostStatus, Taxonomy};

/// Table names under a configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    prefix: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new("wp_")
    }
}

impl Tables {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn table(&self, name: &str) -> String {
        format!("`{}{}`", self.prefix, name)
    }

    pub fn posts(&self) -> String {
        self.table("posts")
    }

    pub fn postmeta(&self) -> String {
        self.table("postmeta")
    }

    pub fn terms(&self) -> String {
        self.table("terms")
    }

    pub fn term_taxonomy(&self) -> String {
        self.table("term_taxonomy")
    }

    pub fn term_relationships(&self) -> String {
        self.table("term_relationships")
    }

    pub fn termmeta(&self) -> String {
        self.table("termmeta")
    }

    pub fn usermeta(&self) -> String {
        self.table("usermeta")
    }

    pub fn users(&self) -> String {
        self.table("users")
    }

    pub fn options(&self) -> String {
        self.table("options")
    }
}

/// A value bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    Int(i64),
    UInt(u64),
    Text(String),
}

impl From<&str> for Binding {
    fn from(value: &str) -> Self {
        Binding::Text(value.to_string())
    }
}

impl From<String> for Binding {
    fn from(value: String) -> Self {
        Binding::Text(value)
    }
}

impl From<u64> for Binding {
    fn from(value: u64) -> Self {
        Binding::UInt(value)
    }
}

impl From<i64> for Binding {
    fn from(value: i64) -> Self {
        Binding::Int(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub sql: String,
    pub bindings: Vec<Binding>,
}

impl RenderedQuery {
    pub fn signature(&self) -> Result<String, CacheError> {
        cache::signature(&self.sql, &self.bindings)
    }
}

/// Accumulates SQL fragments and their bindings in text order.
#[derive(Default)]
struct SqlWriter {
    sql: String,
    bindings: Vec<Binding>,
}

impl SqlWriter {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn bind(&mut self, value: impl Into<Binding>) {
        self.sql.push('?');
        self.bindings.push(value.into());
    }

    fn bind_list<T: Clone + Into<Binding>>(&mut self, values: &[T]) {
        self.push("(");
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                self.push(", ");
            }
            self.bind(value.clone());
        }
        self.push(")");
    }

    fn finish(self) -> RenderedQuery {
        RenderedQuery {
            sql: self.sql,
            bindings: self.bindings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// How a meta clause constrains the posts it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaCondition {
    /// At least one record with the key.
    Present,
    /// At least one record with the key and exactly this stored value.
    Equals(String),
    /// No constraint; the clause only exposes the value for ordering.
    Optional,
}

/// A meta key attached to a post query under an alias.
///
/// The value used for ordering is the key's first record (lowest `meta_id`),
/// or NULL when the post has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaClause {
    pub alias: String,
    pub key: String,
    pub condition: MetaCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    PostDate,
    MenuOrder,
    Id,
    Title,
    /// The value of the meta clause with this alias.
    Meta { alias: String, numeric: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// Posts related to one of the given terms of a taxonomy (any term if empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermFilter {
    pub taxonomy: String,
    pub term_ids: Vec<u64>,
}

/// A description of a `posts` query. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostQuery {
    pub statuses: Vec<String>,
    pub post_types: Vec<String>,
    pub ids: Vec<u64>,
    pub exclude_ids: Vec<u64>,
    pub slug: Option<String>,
    pub meta: Vec<MetaClause>,
    pub terms: Vec<TermFilter>,
    pub order: Vec<PostOrder>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl PostQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: PostStatus) -> Self {
        self.statuses.push(status.as_str().to_string());
        self
    }

    pub fn published(self) -> Self {
        self.status(PostStatus::Publish)
    }

    pub fn post_type(mut self, post_type: &str) -> Self {
        self.post_types.push(post_type.to_string());
        self
    }

    pub fn post_types<I, S>(mut self, post_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_types.extend(post_types.into_iter().map(Into::into));
        self
    }

    pub fn id(mut self, id: u64) -> Self {
        self.ids.push(id);
        self
    }

    pub fn exclude(mut self, ids: &[u64]) -> Self {
        self.exclude_ids.extend_from_slice(ids);
        self
    }

    pub fn slug(mut self, slug: &str) -> Self {
        self.slug = Some(slug.to_string());
        self
    }

    pub fn with_meta(mut self, alias: &str, key: &str, condition: MetaCondition) -> Self {
        self.meta.push(MetaClause {
            alias: alias.to_string(),
            key: key.to_string(),
            condition,
        });
        self
    }

    pub fn in_terms(mut self, taxonomy: Taxonomy, term_ids: &[u64]) -> Self {
        self.terms.push(TermFilter {
            taxonomy: taxonomy.as_str().to_string(),
            term_ids: term_ids.to_vec(),
        });
        self
    }

    pub fn order_by(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.order.push(PostOrder { key, direction });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn meta_clause(&self, alias: &str) -> Option<(usize, &MetaClause)> {
        self.meta
            .iter()
            .enumerate()
            .find(|(_, clause)| clause.alias == alias)
    }

    /// `SELECT p.* ...` with ordering and paging.
    pub fn render(&self, tables: &Tables) -> RenderedQuery {
        let mut out = SqlWriter::default();
        out.push(&format!("SELECT p.* FROM {} AS p", tables.posts()));
        self.write_filters(tables, &mut out);
        self.write_order(tables, &mut out);
        match (self.limit, self.offset) {
            (Some(limit), None) => {
                out.push(" LIMIT ");
                out.bind(limit);
            }
            (limit, Some(offset)) => {
                out.push(" LIMIT ");
                out.bind(limit.unwrap_or(u64::MAX));
                out.push(" OFFSET ");
                out.bind(offset);
            }
            (None, None) => {}
        }
        out.finish()
    }

    /// `SELECT COUNT(*) ...` over the same filters; ordering and paging are ignored.
    pub fn render_count(&self, tables: &Tables) -> RenderedQuery {
        let mut out = SqlWriter::default();
        out.push(&format!("SELECT COUNT(*) FROM {} AS p", tables.posts()));
        self.write_filters(tables, &mut out);
        out.finish()
    }

    fn write_filters(&self, tables: &Tables, out: &mut SqlWriter) {
        out.push(" WHERE 1 = 1");
        if !self.statuses.is_empty() {
            out.push(" AND p.post_status IN ");
            out.bind_list(&self.statuses);
        }
        if !self.post_types.is_empty() {
            out.push(" AND p.post_type IN ");
            out.bind_list(&self.post_types);
        }
        if !self.ids.is_empty() {
            out.push(" AND p.ID IN ");
            out.bind_list(&self.ids);
        }
        if !self.exclude_ids.is_empty() {
            out.push(" AND p.ID NOT IN ");
            out.bind_list(&self.exclude_ids);
        }
        if let Some(slug) = &self.slug {
            out.push(" AND p.post_name = ");
            out.bind(slug.as_str());
        }
        for (index, clause) in self.meta.iter().enumerate() {
            let alias = format!("m{index}");
            let value = match &clause.condition {
                MetaCondition::Optional => continue,
                MetaCondition::Present => None,
                MetaCondition::Equals(value) => Some(value),
            };
            out.push(&format!(
                " AND EXISTS (SELECT 1 FROM {table} AS {alias} WHERE {alias}.post_id = p.ID AND {alias}.meta_key = ",
                table = tables.postmeta()
            ));
            out.bind(clause.key.as_str());
            if let Some(value) = value {
                out.push(&format!(" AND {alias}.meta_value = "));
                out.bind(value.as_str());
            }
            out.push(")");
        }
        for (index, filter) in self.terms.iter().enumerate() {
            let tr = format!("tr{index}");
            let tt = format!("tt{index}");
            out.push(&format!(
                " AND EXISTS (SELECT 1 FROM {relationships} AS {tr} INNER JOIN {taxonomy} AS {tt} ON {tt}.term_taxonomy_id = {tr}.term_taxonomy_id WHERE {tr}.object_id = p.ID AND {tt}.taxonomy = ",
                relationships = tables.term_relationships(),
                taxonomy = tables.term_taxonomy()
            ));
            out.bind(filter.taxonomy.as_str());
            if !filter.term_ids.is_empty() {
                out.push(&format!(" AND {tt}.term_id IN "));
                out.bind_list(&filter.term_ids);
            }
            out.push(")");
        }
    }

    fn write_order(&self, tables: &Tables, out: &mut SqlWriter) {
        let mut first = true;
        for order in &self.order {
            let column = match &order.key {
                SortKey::PostDate => Some("p.post_date".to_string()),
                SortKey::MenuOrder => Some("p.menu_order".to_string()),
                SortKey::Id => Some("p.ID".to_string()),
                SortKey::Title => Some("p.post_title".to_string()),
                SortKey::Meta { .. } => None,
            };
            out.push(if first { " ORDER BY " } else { ", " });
            first = false;
            match (column, &order.key) {
                (Some(column), _) => out.push(&column),
                (None, SortKey::Meta { alias, numeric }) => {
                    let key = self
                        .meta_clause(alias)
                        .map(|(_, clause)| clause.key.as_str())
                        .unwrap_or(alias.as_str());
                    out.push(if *numeric { "CAST(" } else { "" });
                    out.push(&format!(
                        "(SELECT o.meta_value FROM {} AS o WHERE o.post_id = p.ID AND o.meta_key = ",
                        tables.postmeta()
                    ));
                    out.bind(key);
                    out.push(" ORDER BY o.meta_id LIMIT 1)");
                    out.push(if *numeric { " AS DECIMAL(20, 6))" } else { "" });
                }
                (None, _) => {}
            }
            out.push(" ");
            out.push(order.direction.sql());
        }
    }
}

/// A description of a `term_taxonomy` query; each row carries its term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermQuery {
    pub taxonomy: Option<String>,
    pub term_ids: Vec<u64>,
    pub slugs: Vec<String>,
    /// Only taxonomies attached to this object (post).
    pub object_id: Option<u64>,
    pub limit: Option<u64>,
}

impl TermQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = Some(taxonomy.as_str().to_string());
        self
    }

    pub fn category(self) -> Self {
        self.taxonomy(Taxonomy::Category)
    }

    pub fn menu(self) -> Self {
        self.taxonomy(Taxonomy::NavMenu)
    }

    pub fn term_id(mut self, term_id: u64) -> Self {
        self.term_ids.push(term_id);
        self
    }

    /// Empty slugs are ignored.
    pub fn slug(mut self, slug: &str) -> Self {
        if !slug.is_empty() {
            self.slugs.push(slug.to_string());
        }
        self
    }

    pub fn attached_to(mut self, object_id: u64) -> Self {
        self.object_id = Some(object_id);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn render(&self, tables: &Tables) -> RenderedQuery {
        let mut out = SqlWriter::default();
        out.push(&format!(
            "SELECT tt.term_taxonomy_id, tt.term_id, tt.taxonomy, tt.description, tt.parent, tt.count, \
             t.name, t.slug, t.term_group FROM {} AS tt INNER JOIN {} AS t ON t.term_id = tt.term_id WHERE 1 = 1",
            tables.term_taxonomy(),
            tables.terms()
        ));
        if let Some(taxonomy) = &self.taxonomy {
            out.push(" AND tt.taxonomy = ");
            out.bind(taxonomy.as_str());
        }
        if !self.term_ids.is_empty() {
            out.push(" AND tt.term_id IN ");
            out.bind_list(&self.term_ids);
        }
        if !self.slugs.is_empty() {
            out.push(" AND t.slug IN ");
            out.bind_list(&self.slugs);
        }
        if let Some(object_id) = self.object_id {
            out.push(&format!(
                " AND EXISTS (SELECT 1 FROM {} AS tr WHERE tr.term_taxonomy_id = tt.term_taxonomy_id AND tr.object_id = ",
                tables.term_relationships()
            ));
            out.bind(object_id);
            out.push(")");
        }
        out.push(" ORDER BY tt.term_taxonomy_id ASC");
        if let Some(limit) = self.limit {
            out.push(" LIMIT ");
            out.bind(limit);
        }
        out.finish()
    }
}

pub const DEFAULT_MENU_ITEM_LIMIT: u64 = 10;

/// The published items of the `nav_menu` with the given slug, by `menu_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItemsQuery {
    pub menu_slug: String,
    /// Only items whose `_menu_item_object` equals this.
    pub item_type: Option<String>,
    pub limit: u64,
}

impl MenuItemsQuery {
    pub fn new(menu_slug: &str) -> Self {
        Self {
            menu_slug: menu_slug.to_string(),
            item_type: None,
            limit: DEFAULT_MENU_ITEM_LIMIT,
        }
    }

    pub fn item_type(mut self, item_type: &str) -> Self {
        self.item_type = Some(item_type.to_string());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn render(&self, tables: &Tables) -> RenderedQuery {
        let posts = tables.posts();
        let meta = tables.postmeta();
        let terms = tables.terms();
        let mut out = SqlWriter::default();
        out.push(&format!(
            "SELECT r.object_id AS id, p.menu_order AS menu_order, \
             m1.meta_value AS item_type, m2.meta_value AS object_id, \
             m3.meta_value AS parent_id, m4.meta_value AS url, \
             CASE WHEN m1.meta_value IN ('post', 'custom') THEN p.post_name \
                  WHEN m1.meta_value IN ('category', 'product_cat') THEN linked_term.slug \
                  WHEN m1.meta_value = 'page' THEN page.post_name \
                  ELSE m5.meta_value END AS slug, \
             CASE WHEN m1.meta_value IN ('category', 'product_cat') THEN linked_term.name \
                  WHEN m1.meta_value = 'page' THEN page.post_title \
                  ELSE p.post_title END AS name \
             FROM {relationships} AS r \
             INNER JOIN {posts} AS p ON p.ID = r.object_id \
             LEFT JOIN {meta} AS m1 ON m1.post_id = r.object_id AND m1.meta_key = '_menu_item_object' \
             LEFT JOIN {meta} AS m2 ON m2.post_id = r.object_id AND m2.meta_key = '_menu_item_object_id' \
             LEFT JOIN {meta} AS m3 ON m3.post_id = r.object_id AND m3.meta_key = '_menu_item_menu_item_parent' \
             LEFT JOIN {meta} AS m4 ON m4.post_id = r.object_id AND m4.meta_key = '_menu_item_url' \
             LEFT JOIN {meta} AS m5 ON m5.post_id = r.object_id AND m5.meta_key = '_menu_item_xfn' \
             LEFT JOIN {terms} AS linked_term ON linked_term.term_id = m2.meta_value \
             LEFT JOIN {posts} AS page ON page.ID = m2.meta_value \
             WHERE r.term_taxonomy_id = (SELECT menu.term_taxonomy_id FROM {taxonomy} AS menu \
             INNER JOIN {terms} AS menu_term ON menu_term.term_id = menu.term_id \
             WHERE menu.taxonomy = 'nav_menu' AND menu_term.slug = ",
            relationships = tables.term_relationships(),
            taxonomy = tables.term_taxonomy(),
        ));
        out.bind(self.menu_slug.as_str());
        out.push(" LIMIT 1) AND p.post_type = 'nav_menu_item' AND p.post_status = 'publish'");
        if let Some(item_type) = &self.item_type {
            out.push(" AND m1.meta_value = ");
            out.bind(item_type.as_str());
        }
        out.push(" ORDER BY p.menu_order ASC LIMIT ");
        out.bind(self.limit);
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_style_query_renders_filters_in_binding_order() {
        let query = PostQuery::new()
            .published()
            .post_types(["post", "page"])
            .exclude(&[3])
            .order_by(SortKey::PostDate, SortDirection::Desc)
            .limit(5);
        let rendered = query.render(&Tables::default());

        assert_eq!(
            rendered.sql,
            "SELECT p.* FROM `wp_posts` AS p WHERE 1 = 1 AND p.post_status IN (?) \
             AND p.post_type IN (?, ?) AND p.ID NOT IN (?) ORDER BY p.post_date DESC LIMIT ?"
        );
        assert_eq!(
            rendered.bindings,
            vec![
                Binding::from("publish"),
                Binding::from("post"),
                Binding::from("page"),
                Binding::UInt(3),
                Binding::UInt(5),
            ]
        );
    }

    #[test]
    fn meta_clauses_bind_key_then_value() {
        let query = PostQuery::new()
            .with_meta("featured", "_featured", MetaCondition::Equals("1".into()))
            .with_meta("position", "_featured_position", MetaCondition::Optional)
            .order_by(
                SortKey::Meta {
                    alias: "position".into(),
                    numeric: true,
                },
                SortDirection::Asc,
            );
        let rendered = query.render(&Tables::new("blog_"));

        assert!(rendered.sql.contains("FROM `blog_postmeta` AS m0"));
        assert!(!rendered.sql.contains("AS m1"));
        assert!(rendered.sql.contains("ORDER BY CAST((SELECT o.meta_value"));
        assert_eq!(
            rendered.bindings,
            vec![
                Binding::from("_featured"),
                Binding::from("1"),
                Binding::from("_featured_position"),
            ]
        );
    }

    #[test]
    fn count_ignores_order_and_paging() {
        let query = PostQuery::new()
            .published()
            .order_by(SortKey::Id, SortDirection::Asc)
            .limit(2)
            .offset(4);
        let rendered = query.render_count(&Tables::default());
        assert!(rendered.sql.starts_with("SELECT COUNT(*)"));
        assert!(!rendered.sql.contains("ORDER BY"));
        assert!(!rendered.sql.contains("LIMIT"));
        assert_eq!(rendered.bindings.len(), 1);
    }

    #[test]
    fn identical_descriptions_share_a_signature() {
        let build = || PostQuery::new().published().post_type("post").limit(10);
        let first = build().render(&Tables::default()).signature().expect("signature");
        let second = build().render(&Tables::default()).signature().expect("signature");
        let other = build()
            .limit(11)
            .render(&Tables::default())
            .signature()
            .expect("signature");
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn term_query_filters_by_slug_and_object() {
        let rendered = TermQuery::new()
            .menu()
            .slug("main")
            .attached_to(12)
            .limit(1)
            .render(&Tables::default());
        assert_eq!(
            rendered.bindings,
            vec![
                Binding::from("nav_menu"),
                Binding::from("main"),
                Binding::UInt(12),
                Binding::UInt(1),
            ]
        );
        assert!(rendered.sql.contains("INNER JOIN `wp_terms` AS t"));
    }

    #[test]
    fn empty_slug_is_not_a_filter() {
        assert!(TermQuery::new().slug("").slugs.is_empty());
    }

    #[test]
    fn menu_item_query_binds_type_and_limit() {
        let rendered = MenuItemsQuery::new("main")
            .item_type("page")
            .limit(3)
            .render(&Tables::default());
        assert_eq!(
            rendered.bindings,
            vec![Binding::from("main"), Binding::from("page"), Binding::UInt(3)]
        );
        assert_eq!(MenuItemsQuery::new("main").limit, DEFAULT_MENU_ITEM_LIMIT);
    }
}
