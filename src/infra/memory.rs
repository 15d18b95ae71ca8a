//! In-process repositories over the same WordPress tables.
//!
//! Query descriptions are evaluated structurally instead of rendered to SQL,
//! with MySQL's semantics where they matter: the first meta record per key
//! wins, NULL sorts first ascending and non-numeric text casts to zero. Used by
//! the integration tests and for local runs without a database.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::application::query::{
    MenuItemsQuery, MetaCondition, PostQuery, SortDirection, SortKey, TermQuery,
};
use crate::application::repos::{
    MetaRepo, OptionsRepo, OrderedGroupRepo, PostsRepo, RepoError, TermsRepo,
};
use crate::cache::lock::mutex_lock;
use crate::domain::entities::{
    MenuItem, MetaOwner, MetaRecord, OptionRecord, PostColumn, PostRecord, TermRecord,
    TermTaxonomy,
};
use crate::domain::ordering::{
    GroupEntry, OwnPosition, RequestedPosition, RerankPlan, collect_group, plan_move,
};
use crate::domain::types::{POST_TYPE_NAV_MENU_ITEM, PostStatus, Taxonomy};

const SOURCE: &str = "infra::memory";

#[derive(Default)]
struct Tables {
    posts: BTreeMap<u64, PostRecord>,
    meta: Vec<MetaRecord>,
    terms: BTreeMap<u64, TermRecord>,
    taxonomies: BTreeMap<u64, TermTaxonomy>,
    relationships: BTreeSet<(u64, u64)>,
    users: BTreeSet<u64>,
    options: BTreeMap<String, OptionRecord>,
    next_post_id: u64,
    next_meta_id: u64,
    next_term_id: u64,
    next_term_taxonomy_id: u64,
    next_user_id: u64,
    next_option_id: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

impl Tables {
    fn owner_exists(&self, owner: MetaOwner) -> bool {
        match owner {
            MetaOwner::Post(id) => self.posts.contains_key(&id),
            MetaOwner::Term(id) => self.terms.contains_key(&id),
            MetaOwner::User(id) => self.users.contains(&id),
        }
    }

    fn first_value(&self, owner: MetaOwner, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|record| record.owner == owner && record.meta_key == key)
            .and_then(|record| record.meta_value.as_deref())
    }

    fn insert_meta(&mut self, owner: MetaOwner, key: &str, value: &str) -> MetaRecord {
        let record = MetaRecord {
            meta_id: next(&mut self.next_meta_id),
            owner,
            meta_key: key.to_string(),
            meta_value: Some(value.to_string()),
        };
        self.meta.push(record.clone());
        record
    }

    fn set_first_meta(&mut self, owner: MetaOwner, key: &str, value: &str) -> MetaRecord {
        match self
            .meta
            .iter_mut()
            .find(|record| record.owner == owner && record.meta_key == key)
        {
            Some(existing) => {
                existing.meta_value = Some(value.to_string());
                existing.clone()
            }
            None => self.insert_meta(owner, key, value),
        }
    }

    fn with_term(&self, taxonomy: &TermTaxonomy) -> TermTaxonomy {
        TermTaxonomy {
            term: self.terms.get(&taxonomy.term_id).cloned(),
            ..taxonomy.clone()
        }
    }

    fn post_matches(&self, query: &PostQuery, record: &PostRecord) -> bool {
        let owner = MetaOwner::Post(record.id);
        let has = |list: &[String], value: &str| list.is_empty() || list.iter().any(|v| v == value);

        has(&query.statuses, &record.post_status)
            && has(&query.post_types, &record.post_type)
            && (query.ids.is_empty() || query.ids.contains(&record.id))
            && !query.exclude_ids.contains(&record.id)
            && query
                .slug
                .as_ref()
                .is_none_or(|slug| *slug == record.post_name)
            && query.meta.iter().all(|clause| {
                let mut records = self
                    .meta
                    .iter()
                    .filter(|meta| meta.owner == owner && meta.meta_key == clause.key);
                match &clause.condition {
                    MetaCondition::Optional => true,
                    MetaCondition::Present => records.next().is_some(),
                    MetaCondition::Equals(value) => {
                        records.any(|meta| meta.meta_value.as_deref() == Some(value.as_str()))
                    }
                }
            })
            && query.terms.iter().all(|filter| {
                self.relationships
                    .iter()
                    .filter(|(object_id, _)| *object_id == record.id)
                    .filter_map(|(_, tt_id)| self.taxonomies.get(tt_id))
                    .any(|taxonomy| {
                        taxonomy.taxonomy == filter.taxonomy
                            && (filter.term_ids.is_empty()
                                || filter.term_ids.contains(&taxonomy.term_id))
                    })
            })
    }

    fn compare_posts(&self, query: &PostQuery, left: &PostRecord, right: &PostRecord) -> Ordering {
        for order in &query.order {
            let ordering = match &order.key {
                SortKey::PostDate => left.post_date.cmp(&right.post_date),
                SortKey::MenuOrder => left.menu_order.cmp(&right.menu_order),
                SortKey::Id => left.id.cmp(&right.id),
                SortKey::Title => left.post_title.cmp(&right.post_title),
                SortKey::Meta { alias, numeric } => {
                    let key = query
                        .meta_clause(alias)
                        .map(|(_, clause)| clause.key.as_str())
                        .unwrap_or(alias.as_str());
                    let left = self.first_value(MetaOwner::Post(left.id), key);
                    let right = self.first_value(MetaOwner::Post(right.id), key);
                    if *numeric {
                        cast_decimal(left)
                            .partial_cmp(&cast_decimal(right))
                            .unwrap_or(Ordering::Equal)
                    } else {
                        left.cmp(&right)
                    }
                }
            };
            let ordering = match order.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn group(&self, post_type: &str, meta_key: &str) -> Vec<GroupEntry> {
        collect_group(self.meta.iter().filter_map(|record| match record.owner {
            MetaOwner::Post(id)
                if record.meta_key == meta_key
                    && self
                        .posts
                        .get(&id)
                        .is_some_and(|post| post.post_type == post_type) =>
            {
                Some((record.meta_id, id, record.meta_value.as_deref()))
            }
            _ => None,
        }))
    }
}

/// `CAST(value AS DECIMAL)`: NULL stays NULL, unparsable text is zero.
fn cast_decimal(value: Option<&str>) -> Option<f64> {
    value.map(|text| text.trim().parse::<f64>().unwrap_or(0.0))
}

#[derive(Clone, Default)]
pub struct InMemoryRepositories {
    tables: Arc<Mutex<Tables>>,
    post_reads: Arc<AtomicUsize>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many post reads (`find_post`, `query_posts`, `count_posts`) reached
    /// this store.
    pub fn post_reads(&self) -> usize {
        self.post_reads.load(AtomicOrdering::Relaxed)
    }

    fn count_read(&self) {
        self.post_reads.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn seed_post(&self, mut record: PostRecord) -> u64 {
        let mut tables = mutex_lock(&self.tables, SOURCE, "seed_post");
        let id = if record.id == 0 {
            next(&mut tables.next_post_id)
        } else {
            tables.next_post_id = tables.next_post_id.max(record.id);
            record.id
        };
        record.id = id;
        tables.posts.insert(id, record);
        id
    }

    /// A published post with a title and slug.
    pub fn seed_published(&self, post_type: &str, title: &str, slug: &str) -> u64 {
        let mut record = PostRecord::draft(post_type);
        record.post_status = PostStatus::Publish.as_str().to_string();
        record.post_title = title.to_string();
        record.post_name = slug.to_string();
        self.seed_post(record)
    }

    pub fn seed_meta(&self, owner: MetaOwner, key: &str, value: &str) -> u64 {
        let mut tables = mutex_lock(&self.tables, SOURCE, "seed_meta");
        tables.insert_meta(owner, key, value).meta_id
    }

    pub fn seed_user(&self) -> u64 {
        let mut tables = mutex_lock(&self.tables, SOURCE, "seed_user");
        let id = next(&mut tables.next_user_id);
        tables.users.insert(id);
        id
    }

    /// A term with its taxonomy row; returns the taxonomy row.
    pub fn seed_term(&self, taxonomy: Taxonomy, name: &str, slug: &str) -> TermTaxonomy {
        let mut tables = mutex_lock(&self.tables, SOURCE, "seed_term");
        let term_id = next(&mut tables.next_term_id);
        let term_taxonomy_id = next(&mut tables.next_term_taxonomy_id);
        let term = TermRecord {
            term_id,
            name: name.to_string(),
            slug: slug.to_string(),
            term_group: 0,
        };
        let row = TermTaxonomy {
            term_taxonomy_id,
            term_id,
            taxonomy: taxonomy.as_str().to_string(),
            description: String::new(),
            parent: 0,
            count: 0,
            term: None,
            handlers: Vec::new(),
        };
        tables.terms.insert(term_id, term);
        tables.taxonomies.insert(term_taxonomy_id, row.clone());
        tables.with_term(&row)
    }

    pub fn relate(&self, object_id: u64, term_taxonomy_id: u64) {
        let mut tables = mutex_lock(&self.tables, SOURCE, "relate");
        if tables.relationships.insert((object_id, term_taxonomy_id))
            && let Some(taxonomy) = tables.taxonomies.get_mut(&term_taxonomy_id)
        {
            taxonomy.count += 1;
        }
    }

    pub fn seed_option(&self, name: &str, value: &str, autoload: &str) {
        let mut tables = mutex_lock(&self.tables, SOURCE, "seed_option");
        let option_id = next(&mut tables.next_option_id);
        tables.options.insert(
            name.to_string(),
            OptionRecord {
                option_id,
                option_name: name.to_string(),
                option_value: value.to_string(),
                autoload: autoload.to_string(),
            },
        );
    }

    /// A published `nav_menu_item` in `menu` pointing at `object_id` of `item_type`.
    pub fn seed_menu_item(
        &self,
        menu: &TermTaxonomy,
        title: &str,
        menu_order: i64,
        item_type: &str,
        object_id: &str,
    ) -> u64 {
        let mut record = PostRecord::draft(POST_TYPE_NAV_MENU_ITEM);
        record.post_status = PostStatus::Publish.as_str().to_string();
        record.post_title = title.to_string();
        record.menu_order = menu_order;
        let id = self.seed_post(record);
        self.seed_meta(MetaOwner::Post(id), "_menu_item_object", item_type);
        self.seed_meta(MetaOwner::Post(id), "_menu_item_object_id", object_id);
        self.seed_meta(MetaOwner::Post(id), "_menu_item_menu_item_parent", "0");
        self.relate(id, menu.term_taxonomy_id);
        id
    }
}

#[async_trait]
impl PostsRepo for InMemoryRepositories {
    async fn find_post(&self, id: u64) -> Result<Option<PostRecord>, RepoError> {
        self.count_read();
        let tables = mutex_lock(&self.tables, SOURCE, "find_post");
        Ok(tables.posts.get(&id).cloned())
    }

    async fn query_posts(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError> {
        self.count_read();
        let tables = mutex_lock(&self.tables, SOURCE, "query_posts");
        let mut matched: Vec<&PostRecord> = tables
            .posts
            .values()
            .filter(|record| tables.post_matches(query, record))
            .collect();
        matched.sort_by(|left, right| tables.compare_posts(query, left, right));

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_posts(&self, query: &PostQuery) -> Result<u64, RepoError> {
        self.count_read();
        let tables = mutex_lock(&self.tables, SOURCE, "count_posts");
        let count = tables
            .posts
            .values()
            .filter(|record| tables.post_matches(query, record))
            .count();
        Ok(count as u64)
    }

    async fn insert_post(&self, record: &PostRecord) -> Result<u64, RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "insert_post");
        let id = next(&mut tables.next_post_id);
        let mut stored = record.clone();
        stored.id = id;
        tables.posts.insert(id, stored);
        Ok(id)
    }

    async fn update_post(
        &self,
        record: &PostRecord,
        columns: &[PostColumn],
    ) -> Result<(), RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "update_post");
        let stored = tables.posts.get_mut(&record.id).ok_or(RepoError::NotFound)?;
        for column in columns.iter().filter(|column| **column != PostColumn::Id) {
            stored
                .set(*column, record.get(*column))
                .map_err(|err| RepoError::InvalidInput {
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetaRepo for InMemoryRepositories {
    async fn all_meta(&self, owner: MetaOwner) -> Result<Vec<MetaRecord>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "all_meta");
        Ok(tables
            .meta
            .iter()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect())
    }

    async fn all_meta_for(&self, owners: &[MetaOwner]) -> Result<Vec<MetaRecord>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "all_meta_for");
        Ok(tables
            .meta
            .iter()
            .filter(|record| owners.contains(&record.owner))
            .cloned()
            .collect())
    }

    async fn first_meta(
        &self,
        owner: MetaOwner,
        key: &str,
    ) -> Result<Option<MetaRecord>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "first_meta");
        Ok(tables
            .meta
            .iter()
            .find(|record| record.owner == owner && record.meta_key == key)
            .cloned())
    }

    async fn upsert_meta(
        &self,
        owner: MetaOwner,
        key: &str,
        value: &str,
        single: bool,
    ) -> Result<MetaRecord, RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "upsert_meta");
        if !tables.owner_exists(owner) {
            return Err(RepoError::OwnerNotPersisted { owner });
        }
        Ok(if single {
            tables.set_first_meta(owner, key, value)
        } else {
            tables.insert_meta(owner, key, value)
        })
    }

    async fn delete_meta(&self, owner: MetaOwner, key: &str) -> Result<u64, RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "delete_meta");
        let before = tables.meta.len();
        tables
            .meta
            .retain(|record| !(record.owner == owner && record.meta_key == key));
        Ok((before - tables.meta.len()) as u64)
    }
}

#[async_trait]
impl OrderedGroupRepo for InMemoryRepositories {
    async fn group(&self, post_type: &str, meta_key: &str) -> Result<Vec<GroupEntry>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "group");
        Ok(tables.group(post_type, meta_key))
    }

    async fn rerank(
        &self,
        post_type: &str,
        meta_key: &str,
        owner_id: u64,
        requested: RequestedPosition,
    ) -> Result<RerankPlan, RepoError> {
        let mut tables = mutex_lock(&self.tables, SOURCE, "rerank");
        let owner = MetaOwner::Post(owner_id);
        if !tables.owner_exists(owner) {
            return Err(RepoError::OwnerNotPersisted { owner });
        }

        let plan = plan_move(&tables.group(post_type, meta_key), owner_id, requested);
        for shift in &plan.shifts {
            if let Some(record) = tables
                .meta
                .iter_mut()
                .find(|record| record.meta_id == shift.meta_id)
            {
                record.meta_value = Some(shift.to.to_string());
            }
        }
        match plan.own {
            OwnPosition::Keep => {}
            OwnPosition::Set(position) => {
                tables.set_first_meta(owner, meta_key, &position.to_string());
            }
            OwnPosition::Delete => tables
                .meta
                .retain(|record| !(record.owner == owner && record.meta_key == meta_key)),
        }
        Ok(plan)
    }
}

#[async_trait]
impl TermsRepo for InMemoryRepositories {
    async fn query_terms(&self, query: &TermQuery) -> Result<Vec<TermTaxonomy>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "query_terms");
        let limit = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(tables
            .taxonomies
            .values()
            .filter(|row| tables.terms.contains_key(&row.term_id))
            .filter(|row| {
                query
                    .taxonomy
                    .as_ref()
                    .is_none_or(|taxonomy| *taxonomy == row.taxonomy)
            })
            .filter(|row| query.term_ids.is_empty() || query.term_ids.contains(&row.term_id))
            .map(|row| tables.with_term(row))
            .filter(|row| {
                query.slugs.is_empty()
                    || row
                        .slug()
                        .is_some_and(|slug| query.slugs.iter().any(|wanted| wanted == slug))
            })
            .filter(|row| {
                query.object_id.is_none_or(|object_id| {
                    tables
                        .relationships
                        .contains(&(object_id, row.term_taxonomy_id))
                })
            })
            .take(limit)
            .collect())
    }

    async fn menu_items(&self, query: &MenuItemsQuery) -> Result<Vec<MenuItem>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "menu_items");
        let Some(menu) = tables.taxonomies.values().find(|row| {
            row.taxonomy == Taxonomy::NavMenu.as_str()
                && tables
                    .terms
                    .get(&row.term_id)
                    .is_some_and(|term| term.slug == query.menu_slug)
        }) else {
            return Ok(Vec::new());
        };

        let mut items: Vec<MenuItem> = tables
            .relationships
            .iter()
            .filter(|(_, tt_id)| *tt_id == menu.term_taxonomy_id)
            .filter_map(|(object_id, _)| tables.posts.get(object_id))
            .filter(|post| {
                post.post_type == POST_TYPE_NAV_MENU_ITEM
                    && post.post_status == PostStatus::Publish.as_str()
            })
            .map(|post| resolve_menu_item(&tables, post))
            .filter(|item| {
                query
                    .item_type
                    .as_ref()
                    .is_none_or(|wanted| item.item_type.as_ref() == Some(wanted))
            })
            .collect();
        items.sort_by_key(|item| item.menu_order);
        items.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        Ok(items)
    }
}

fn resolve_menu_item(tables: &Tables, post: &PostRecord) -> MenuItem {
    let owner = MetaOwner::Post(post.id);
    let meta = |key: &str| tables.first_value(owner, key).map(str::to_string);
    let item_type = meta("_menu_item_object");
    let object_id = meta("_menu_item_object_id");
    let target_id = object_id
        .as_deref()
        .and_then(|value| value.trim().parse::<u64>().ok());
    let linked_term = target_id.and_then(|id| tables.terms.get(&id));
    let page = target_id.and_then(|id| tables.posts.get(&id));

    let (slug, name) = match item_type.as_deref() {
        Some("post" | "custom") => (Some(post.post_name.clone()), Some(post.post_title.clone())),
        Some("category" | "product_cat") => (
            linked_term.map(|term| term.slug.clone()),
            linked_term.map(|term| term.name.clone()),
        ),
        Some("page") => (
            page.map(|page| page.post_name.clone()),
            page.map(|page| page.post_title.clone()),
        ),
        _ => (meta("_menu_item_xfn"), Some(post.post_title.clone())),
    };

    MenuItem {
        id: post.id,
        menu_order: post.menu_order,
        item_type,
        object_id,
        parent_id: meta("_menu_item_menu_item_parent"),
        url: meta("_menu_item_url"),
        slug,
        name,
        handlers: Vec::new(),
    }
}

#[async_trait]
impl OptionsRepo for InMemoryRepositories {
    async fn option(&self, name: &str) -> Result<Option<OptionRecord>, RepoError> {
        let tables = mutex_lock(&self.tables, SOURCE, "option");
        Ok(tables.options.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn numeric_meta_order_puts_missing_values_first() {
        let repos = InMemoryRepositories::new();
        let ranked = repos.seed_published("post", "Ranked", "ranked");
        let unranked = repos.seed_published("post", "Unranked", "unranked");
        let text = repos.seed_published("post", "Text", "text");
        repos.seed_meta(MetaOwner::Post(ranked), "_rank", "3");
        repos.seed_meta(MetaOwner::Post(text), "_rank", "abc");

        let query = PostQuery::new()
            .with_meta("rank", "_rank", MetaCondition::Optional)
            .order_by(
                SortKey::Meta {
                    alias: "rank".into(),
                    numeric: true,
                },
                SortDirection::Asc,
            );
        let ids: Vec<u64> = repos
            .query_posts(&query)
            .await
            .expect("query")
            .iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec![unranked, text, ranked]);
    }

    #[tokio::test]
    async fn equals_condition_checks_any_record() {
        let repos = InMemoryRepositories::new();
        let id = repos.seed_published("post", "Flagged", "flagged");
        repos.seed_meta(MetaOwner::Post(id), "_featured", "0");
        repos.seed_meta(MetaOwner::Post(id), "_featured", "1");

        let query = PostQuery::new().with_meta("f", "_featured", MetaCondition::Equals("1".into()));
        assert_eq!(repos.count_posts(&query).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn page_menu_items_take_the_page_title() {
        let repos = InMemoryRepositories::new();
        let menu = repos.seed_term(Taxonomy::NavMenu, "Main", "main");
        let page = repos.seed_published("page", "About us", "about");
        repos.seed_menu_item(&menu, "ignored", 1, "page", &page.to_string());

        let items = repos
            .menu_items(&MenuItemsQuery::new("main"))
            .await
            .expect("menu items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name.as_deref(), Some("About us"));
        assert_eq!(items[0].slug.as_deref(), Some("about"));
    }
}
