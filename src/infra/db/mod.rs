//! MySQL-backed repository implementations over the WordPress schema.

mod meta;
mod options;
mod ordering;
mod posts;
mod terms;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions};
use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::{MySql, Transaction, query};

use crate::application::query::{Binding, Tables};

#[derive(Clone)]
pub struct MySqlRepositories {
    pool: Arc<MySqlPool>,
    tables: Tables,
}

impl MySqlRepositories {
    pub fn new(pool: MySqlPool, tables: Tables) -> Self {
        Self {
            pool: Arc::new(pool),
            tables,
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub async fn begin(&self) -> Result<Transaction<'_, MySql>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<MySqlPool, sqlx::Error> {
        MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

pub(crate) fn bind_query<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    bindings: &'q [Binding],
) -> Query<'q, MySql, MySqlArguments> {
    for binding in bindings {
        query = match binding {
            Binding::Int(value) => query.bind(*value),
            Binding::UInt(value) => query.bind(*value),
            Binding::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

pub(crate) fn bind_query_as<'q, O>(
    mut query: QueryAs<'q, MySql, O, MySqlArguments>,
    bindings: &'q [Binding],
) -> QueryAs<'q, MySql, O, MySqlArguments> {
    for binding in bindings {
        query = match binding {
            Binding::Int(value) => query.bind(*value),
            Binding::UInt(value) => query.bind(*value),
            Binding::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

pub(crate) fn bind_query_scalar<'q, O>(
    mut query: QueryScalar<'q, MySql, O, MySqlArguments>,
    bindings: &'q [Binding],
) -> QueryScalar<'q, MySql, O, MySqlArguments> {
    for binding in bindings {
        query = match binding {
            Binding::Int(value) => query.bind(*value),
            Binding::UInt(value) => query.bind(*value),
            Binding::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}
