use async_trait::async_trait;

use crate::application::repos::{OptionsRepo, RepoError};
use crate::domain::entities::OptionRecord;

use super::{MySqlRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct OptionRow {
    option_id: u64,
    option_name: String,
    option_value: String,
    autoload: String,
}

impl From<OptionRow> for OptionRecord {
    fn from(row: OptionRow) -> Self {
        OptionRecord {
            option_id: row.option_id,
            option_name: row.option_name,
            option_value: row.option_value,
            autoload: row.autoload,
        }
    }
}

#[async_trait]
impl OptionsRepo for MySqlRepositories {
    async fn option(&self, name: &str) -> Result<Option<OptionRecord>, RepoError> {
        let sql = format!(
            "SELECT option_id, option_name, option_value, autoload FROM {} \
             WHERE option_name = ? LIMIT 1",
            self.tables().options()
        );
        let row = sqlx::query_as::<_, OptionRow>(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(OptionRecord::from))
    }
}
