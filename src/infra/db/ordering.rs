use async_trait::async_trait;
use sqlx::{MySql, Transaction};

use crate::application::query::Tables;
use crate::application::repos::{OrderedGroupRepo, RepoError};
use crate::domain::entities::MetaOwner;
use crate::domain::ordering::{
    GroupEntry, OwnPosition, RequestedPosition, RerankPlan, collect_group, plan_move,
};

use super::{MySqlRepositories, map_sqlx_error};

type GroupRow = (u64, u64, Option<String>);

fn group_sql(tables: &Tables, lock: bool) -> String {
    format!(
        "SELECT m.meta_id, m.post_id, m.meta_value FROM {meta} AS m \
         INNER JOIN {posts} AS p ON p.ID = m.post_id \
         WHERE p.post_type = ? AND m.meta_key = ? ORDER BY m.meta_id ASC{suffix}",
        meta = tables.postmeta(),
        posts = tables.posts(),
        suffix = if lock { " FOR UPDATE" } else { "" }
    )
}

fn entries(rows: &[GroupRow]) -> Vec<GroupEntry> {
    collect_group(
        rows.iter()
            .map(|(meta_id, owner_id, value)| (*meta_id, *owner_id, value.as_deref())),
    )
}

impl MySqlRepositories {
    async fn write_own_position(
        &self,
        tx: &mut Transaction<'_, MySql>,
        meta_key: &str,
        owner_id: u64,
        own: OwnPosition,
    ) -> Result<(), RepoError> {
        let meta = self.tables().postmeta();
        match own {
            OwnPosition::Keep => Ok(()),
            OwnPosition::Set(position) => {
                let existing: Option<u64> = sqlx::query_scalar(&format!(
                    "SELECT meta_id FROM {meta} WHERE post_id = ? AND meta_key = ? \
                     ORDER BY meta_id ASC LIMIT 1"
                ))
                .bind(owner_id)
                .bind(meta_key)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;

                let value = position.to_string();
                match existing {
                    Some(meta_id) => {
                        sqlx::query(&format!("UPDATE {meta} SET meta_value = ? WHERE meta_id = ?"))
                            .bind(value)
                            .bind(meta_id)
                            .execute(&mut **tx)
                            .await
                            .map_err(map_sqlx_error)?;
                    }
                    None => {
                        sqlx::query(&format!(
                            "INSERT INTO {meta} (post_id, meta_key, meta_value) VALUES (?, ?, ?)"
                        ))
                        .bind(owner_id)
                        .bind(meta_key)
                        .bind(value)
                        .execute(&mut **tx)
                        .await
                        .map_err(map_sqlx_error)?;
                    }
                }
                Ok(())
            }
            OwnPosition::Delete => {
                sqlx::query(&format!(
                    "DELETE FROM {meta} WHERE post_id = ? AND meta_key = ?"
                ))
                .bind(owner_id)
                .bind(meta_key)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl OrderedGroupRepo for MySqlRepositories {
    async fn group(&self, post_type: &str, meta_key: &str) -> Result<Vec<GroupEntry>, RepoError> {
        let rows: Vec<GroupRow> = sqlx::query_as(&group_sql(self.tables(), false))
            .bind(post_type)
            .bind(meta_key)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(entries(&rows))
    }

    async fn rerank(
        &self,
        post_type: &str,
        meta_key: &str,
        owner_id: u64,
        requested: RequestedPosition,
    ) -> Result<RerankPlan, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let owner_rows: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE ID = ?",
            self.tables().posts()
        ))
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if owner_rows == 0 {
            return Err(RepoError::OwnerNotPersisted {
                owner: MetaOwner::Post(owner_id),
            });
        }

        let rows: Vec<GroupRow> = sqlx::query_as(&group_sql(self.tables(), true))
            .bind(post_type)
            .bind(meta_key)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let plan = plan_move(&entries(&rows), owner_id, requested);
        if plan.is_noop() {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(plan);
        }

        let update = format!(
            "UPDATE {} SET meta_value = ? WHERE meta_id = ?",
            self.tables().postmeta()
        );
        for shift in &plan.shifts {
            sqlx::query(&update)
                .bind(shift.to.to_string())
                .bind(shift.meta_id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        self.write_own_position(&mut tx, meta_key, owner_id, plan.own)
            .await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_without_positive_positions_are_not_members() {
        let rows = vec![
            (10, 1, Some("2".to_string())),
            (11, 2, Some("1".to_string())),
            (12, 3, Some("0".to_string())),
            (13, 4, None),
            (14, 2, Some("9".to_string())),
        ];
        let group = entries(&rows);
        let owners: Vec<u64> = group.iter().map(|entry| entry.owner_id).collect();
        assert_eq!(owners, vec![2, 1]);
    }

    #[test]
    fn locking_select_appends_for_update() {
        let tables = Tables::new("blog_");
        assert!(group_sql(&tables, true).ends_with("FOR UPDATE"));
        assert!(group_sql(&tables, false).contains("`blog_postmeta` AS m"));
    }
}
