use async_trait::async_trait;

use crate::application::query::{MenuItemsQuery, TermQuery};
use crate::application::repos::{RepoError, TermsRepo};
use crate::domain::entities::{MenuItem, TermRecord, TermTaxonomy};

use super::{MySqlRepositories, bind_query_as, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TermRow {
    term_taxonomy_id: u64,
    term_id: u64,
    taxonomy: String,
    description: String,
    parent: u64,
    count: i64,
    name: String,
    slug: String,
    term_group: i64,
}

impl From<TermRow> for TermTaxonomy {
    fn from(row: TermRow) -> Self {
        TermTaxonomy {
            term_taxonomy_id: row.term_taxonomy_id,
            term_id: row.term_id,
            taxonomy: row.taxonomy,
            description: row.description,
            parent: row.parent,
            count: row.count,
            term: Some(TermRecord {
                term_id: row.term_id,
                name: row.name,
                slug: row.slug,
                term_group: row.term_group,
            }),
            handlers: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MenuItemRow {
    id: u64,
    menu_order: i32,
    item_type: Option<String>,
    object_id: Option<String>,
    parent_id: Option<String>,
    url: Option<String>,
    slug: Option<String>,
    name: Option<String>,
}

impl From<MenuItemRow> for MenuItem {
    fn from(row: MenuItemRow) -> Self {
        MenuItem {
            id: row.id,
            menu_order: row.menu_order.into(),
            item_type: row.item_type,
            object_id: row.object_id,
            parent_id: row.parent_id,
            url: row.url,
            slug: row.slug,
            name: row.name,
            handlers: Vec::new(),
        }
    }
}

#[async_trait]
impl TermsRepo for MySqlRepositories {
    async fn query_terms(&self, query: &TermQuery) -> Result<Vec<TermTaxonomy>, RepoError> {
        let rendered = query.render(self.tables());
        let rows = bind_query_as(sqlx::query_as::<_, TermRow>(&rendered.sql), &rendered.bindings)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(TermTaxonomy::from).collect())
    }

    async fn menu_items(&self, query: &MenuItemsQuery) -> Result<Vec<MenuItem>, RepoError> {
        let rendered = query.render(self.tables());
        let rows = bind_query_as(
            sqlx::query_as::<_, MenuItemRow>(&rendered.sql),
            &rendered.bindings,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(MenuItem::from).collect())
    }
}
