use async_trait::async_trait;

use crate::application::query::Tables;
use crate::application::repos::{MetaRepo, RepoError};
use crate::domain::entities::{MetaOwner, MetaRecord};

use super::{MySqlRepositories, map_sqlx_error};

/// Where one owner kind keeps its meta and its own rows.
struct MetaTable {
    table: String,
    id_column: &'static str,
    owner_column: &'static str,
    owner_table: String,
    owner_pk: &'static str,
}

impl MetaTable {
    fn for_owner(tables: &Tables, owner: MetaOwner) -> Self {
        match owner {
            MetaOwner::Post(_) => Self {
                table: tables.postmeta(),
                id_column: "meta_id",
                owner_column: "post_id",
                owner_table: tables.posts(),
                owner_pk: "ID",
            },
            MetaOwner::Term(_) => Self {
                table: tables.termmeta(),
                id_column: "meta_id",
                owner_column: "term_id",
                owner_table: tables.terms(),
                owner_pk: "term_id",
            },
            MetaOwner::User(_) => Self {
                table: tables.usermeta(),
                id_column: "umeta_id",
                owner_column: "user_id",
                owner_table: tables.users(),
                owner_pk: "ID",
            },
        }
    }

    fn select(&self) -> String {
        format!(
            "SELECT {id} AS meta_id, {owner} AS owner_id, meta_key, meta_value FROM {table}",
            id = self.id_column,
            owner = self.owner_column,
            table = self.table
        )
    }
}

#[derive(sqlx::FromRow)]
struct MetaRow {
    meta_id: u64,
    owner_id: u64,
    meta_key: Option<String>,
    meta_value: Option<String>,
}

impl MetaRow {
    fn into_record(self, owner_of: impl Fn(u64) -> MetaOwner) -> MetaRecord {
        MetaRecord {
            meta_id: self.meta_id,
            owner: owner_of(self.owner_id),
            meta_key: self.meta_key.unwrap_or_default(),
            meta_value: self.meta_value,
        }
    }
}

fn owner_constructor(owner: MetaOwner) -> fn(u64) -> MetaOwner {
    match owner {
        MetaOwner::Post(_) => MetaOwner::Post,
        MetaOwner::Term(_) => MetaOwner::Term,
        MetaOwner::User(_) => MetaOwner::User,
    }
}

impl MySqlRepositories {
    async fn owner_exists(&self, owner: MetaOwner) -> Result<bool, RepoError> {
        let meta = MetaTable::for_owner(self.tables(), owner);
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            meta.owner_table, meta.owner_pk
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(owner.id())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(count > 0)
    }
}

#[async_trait]
impl MetaRepo for MySqlRepositories {
    async fn all_meta(&self, owner: MetaOwner) -> Result<Vec<MetaRecord>, RepoError> {
        let meta = MetaTable::for_owner(self.tables(), owner);
        let sql = format!(
            "{} WHERE {} = ? ORDER BY {} ASC",
            meta.select(),
            meta.owner_column,
            meta.id_column
        );
        let rows = sqlx::query_as::<_, MetaRow>(&sql)
            .bind(owner.id())
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        let owner_of = owner_constructor(owner);
        Ok(rows.into_iter().map(|row| row.into_record(owner_of)).collect())
    }

    async fn all_meta_for(&self, owners: &[MetaOwner]) -> Result<Vec<MetaRecord>, RepoError> {
        let mut records = Vec::new();
        for kind in [MetaOwner::Post(0), MetaOwner::Term(0), MetaOwner::User(0)] {
            let ids: Vec<u64> = owners
                .iter()
                .filter(|owner| owner.kind() == kind.kind())
                .map(|owner| owner.id())
                .collect();
            if ids.is_empty() {
                continue;
            }
            let meta = MetaTable::for_owner(self.tables(), kind);
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "{} WHERE {} IN ({placeholders}) ORDER BY {} ASC",
                meta.select(),
                meta.owner_column,
                meta.id_column
            );
            let mut query = sqlx::query_as::<_, MetaRow>(&sql);
            for id in &ids {
                query = query.bind(*id);
            }
            let rows = query
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)?;
            let owner_of = owner_constructor(kind);
            records.extend(rows.into_iter().map(|row| row.into_record(owner_of)));
        }
        Ok(records)
    }

    async fn first_meta(
        &self,
        owner: MetaOwner,
        key: &str,
    ) -> Result<Option<MetaRecord>, RepoError> {
        let meta = MetaTable::for_owner(self.tables(), owner);
        let sql = format!(
            "{} WHERE {} = ? AND meta_key = ? ORDER BY {} ASC LIMIT 1",
            meta.select(),
            meta.owner_column,
            meta.id_column
        );
        let row = sqlx::query_as::<_, MetaRow>(&sql)
            .bind(owner.id())
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        let owner_of = owner_constructor(owner);
        Ok(row.map(|row| row.into_record(owner_of)))
    }

    async fn upsert_meta(
        &self,
        owner: MetaOwner,
        key: &str,
        value: &str,
        single: bool,
    ) -> Result<MetaRecord, RepoError> {
        if !self.owner_exists(owner).await? {
            return Err(RepoError::OwnerNotPersisted { owner });
        }
        let meta = MetaTable::for_owner(self.tables(), owner);

        if single && let Some(existing) = self.first_meta(owner, key).await? {
            let sql = format!(
                "UPDATE {} SET meta_value = ? WHERE {} = ?",
                meta.table, meta.id_column
            );
            sqlx::query(&sql)
                .bind(value)
                .bind(existing.meta_id)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;
            return Ok(MetaRecord {
                meta_value: Some(value.to_string()),
                ..existing
            });
        }

        let sql = format!(
            "INSERT INTO {} ({}, meta_key, meta_value) VALUES (?, ?, ?)",
            meta.table, meta.owner_column
        );
        let result = sqlx::query(&sql)
            .bind(owner.id())
            .bind(key)
            .bind(value)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(MetaRecord {
            meta_id: result.last_insert_id(),
            owner,
            meta_key: key.to_string(),
            meta_value: Some(value.to_string()),
        })
    }

    async fn delete_meta(&self, owner: MetaOwner, key: &str) -> Result<u64, RepoError> {
        let meta = MetaTable::for_owner(self.tables(), owner);
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND meta_key = ?",
            meta.table, meta.owner_column
        );
        let result = sqlx::query(&sql)
            .bind(owner.id())
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_meta_uses_umeta_id() {
        let meta = MetaTable::for_owner(&Tables::new("blog_"), MetaOwner::User(3));
        assert_eq!(
            meta.select(),
            "SELECT umeta_id AS meta_id, user_id AS owner_id, meta_key, meta_value FROM `blog_usermeta`"
        );
        assert_eq!(meta.owner_table, "`blog_users`");
    }

    #[test]
    fn term_meta_is_owned_by_terms() {
        let meta = MetaTable::for_owner(&Tables::default(), MetaOwner::Term(1));
        assert_eq!(meta.table, "`wp_termmeta`");
        assert_eq!(meta.owner_pk, "term_id");
    }
}
