use async_trait::async_trait;
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, Row};
use time::PrimitiveDateTime;
use time::macros::datetime;

use crate::application::query::{Binding, PostQuery};
use crate::application::repos::{PostsRepo, RepoError};
use crate::domain::entities::{PostColumn, PostRecord};
use crate::domain::meta_value::MetaValue;

use super::{MySqlRepositories, bind_query, bind_query_as, bind_query_scalar, map_sqlx_error};

/// MySQL's zero date, which WordPress stores for unset GMT columns.
const ZERO_DATETIME_TEXT: &str = "0000-00-00 00:00:00";
const EPOCH_FALLBACK: PrimitiveDateTime = datetime!(1970-01-01 0:00);

struct PostRow(PostRecord);

/// Zero or otherwise undecodable dates read as `None`.
fn optional_datetime(row: &MySqlRow, column: &str) -> Option<PrimitiveDateTime> {
    row.try_get::<Option<PrimitiveDateTime>, _>(column)
        .ok()
        .flatten()
}

impl<'r> FromRow<'r, MySqlRow> for PostRow {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Self(PostRecord {
            id: row.try_get("ID")?,
            post_author: row.try_get("post_author")?,
            post_date: optional_datetime(row, "post_date").unwrap_or(EPOCH_FALLBACK),
            post_date_gmt: optional_datetime(row, "post_date_gmt"),
            post_content: row.try_get("post_content")?,
            post_title: row.try_get("post_title")?,
            post_excerpt: row.try_get("post_excerpt")?,
            post_status: row.try_get("post_status")?,
            comment_status: row.try_get("comment_status")?,
            ping_status: row.try_get("ping_status")?,
            post_password: row.try_get("post_password")?,
            post_name: row.try_get("post_name")?,
            to_ping: row.try_get("to_ping")?,
            pinged: row.try_get("pinged")?,
            post_modified: optional_datetime(row, "post_modified").unwrap_or(EPOCH_FALLBACK),
            post_modified_gmt: optional_datetime(row, "post_modified_gmt"),
            post_content_filtered: row.try_get("post_content_filtered")?,
            post_parent: row.try_get("post_parent")?,
            guid: row.try_get("guid")?,
            menu_order: row.try_get::<i32, _>("menu_order")?.into(),
            post_type: row.try_get("post_type")?,
            post_mime_type: row.try_get("post_mime_type")?,
            comment_count: row.try_get("comment_count")?,
        }))
    }
}

/// The value written for one column. Dates go over the wire as text so unset
/// GMT dates can be stored as the zero date.
fn column_binding(record: &PostRecord, column: PostColumn) -> Binding {
    match record.get(column) {
        MetaValue::Int(value) => Binding::Int(value),
        MetaValue::Null => Binding::Text(ZERO_DATETIME_TEXT.to_string()),
        other => Binding::Text(other.to_plain_string().unwrap_or_default()),
    }
}

fn writable_columns(columns: &[PostColumn]) -> Vec<PostColumn> {
    columns
        .iter()
        .copied()
        .filter(|column| *column != PostColumn::Id)
        .collect()
}

#[async_trait]
impl PostsRepo for MySqlRepositories {
    async fn find_post(&self, id: u64) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!("SELECT * FROM {} WHERE ID = ? LIMIT 1", self.tables().posts());
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(|PostRow(record)| record))
    }

    async fn query_posts(&self, query: &PostQuery) -> Result<Vec<PostRecord>, RepoError> {
        let rendered = query.render(self.tables());
        let rows = bind_query_as(sqlx::query_as::<_, PostRow>(&rendered.sql), &rendered.bindings)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|PostRow(record)| record).collect())
    }

    async fn count_posts(&self, query: &PostQuery) -> Result<u64, RepoError> {
        let rendered = query.render_count(self.tables());
        let count: i64 =
            bind_query_scalar(sqlx::query_scalar::<_, i64>(&rendered.sql), &rendered.bindings)
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn insert_post(&self, record: &PostRecord) -> Result<u64, RepoError> {
        let columns = writable_columns(&PostColumn::ALL);
        let names: Vec<&str> = columns.iter().map(|column| column.name()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.tables().posts(),
            names.join(", ")
        );
        let bindings: Vec<Binding> = columns
            .iter()
            .map(|column| column_binding(record, *column))
            .collect();

        let result = bind_query(sqlx::query(&sql), &bindings)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.last_insert_id())
    }

    async fn update_post(
        &self,
        record: &PostRecord,
        columns: &[PostColumn],
    ) -> Result<(), RepoError> {
        let columns = writable_columns(columns);
        if columns.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = columns
            .iter()
            .map(|column| format!("{} = ?", column.name()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE ID = ?",
            self.tables().posts(),
            assignments.join(", ")
        );
        let mut bindings: Vec<Binding> = columns
            .iter()
            .map(|column| column_binding(record, *column))
            .collect();
        bindings.push(Binding::UInt(record.id));

        let result = bind_query(sqlx::query(&sql), &bindings)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 && !self.post_exists(record.id).await? {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

impl MySqlRepositories {
    pub(crate) async fn post_exists(&self, id: u64) -> Result<bool, RepoError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE ID = ?", self.tables().posts());
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::format_datetime;

    #[test]
    fn unset_gmt_dates_bind_as_zero_date() {
        let mut record = PostRecord::draft("post");
        record.post_date_gmt = None;
        assert_eq!(
            column_binding(&record, PostColumn::PostDateGmt),
            Binding::Text(ZERO_DATETIME_TEXT.to_string())
        );
        assert_eq!(
            column_binding(&record, PostColumn::PostDate),
            Binding::Text(format_datetime(record.post_date))
        );
        assert_eq!(column_binding(&record, PostColumn::MenuOrder), Binding::Int(0));
    }

    #[test]
    fn id_is_never_written() {
        let columns = writable_columns(&[PostColumn::Id, PostColumn::PostTitle]);
        assert_eq!(columns, vec![PostColumn::PostTitle]);
    }
}
