use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{merge, new_item, ItemStore, StoreError};
use crate::schema::{Item, RowFilter};

const CREATE_ITEMS: &str = "CREATE TABLE IF NOT EXISTS items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    list_key TEXT NOT NULL,
    data TEXT NOT NULL
)";

/// Items stored as JSON documents in a single SQLite table.
///
/// Row filters are applied to decoded documents after loading.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and its schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // every in-memory connection would be a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 10 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_ITEMS).execute(&pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS items_list_key ON items (list_key)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode(list_key: &str, id: &str, data: &str) -> Result<Item, StoreError> {
    serde_json::from_str::<Item>(data).map_err(|source| StoreError::Corrupt {
        list_key: list_key.to_string(),
        id: id.to_string(),
        source,
    })
}

fn encode(item: &Item) -> String {
    Value::Object(item.clone()).to_string()
}

fn not_found(list_key: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        list_key: list_key.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn find_many(&self, list_key: &str, filter: &RowFilter) -> Result<Vec<Item>, StoreError> {
        if *filter == RowFilter::Never {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, (String, String)>("SELECT id, data FROM items WHERE list_key = ? ORDER BY seq")
            .bind(list_key)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, data) in rows {
            let item = decode(list_key, &id, &data)?;
            if filter.matches(&item) {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn find_one(&self, list_key: &str, id: &str, filter: &RowFilter) -> Result<Option<Item>, StoreError> {
        if *filter == RowFilter::Never {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, (String,)>("SELECT data FROM items WHERE list_key = ? AND id = ?")
            .bind(list_key)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((data,)) => {
                let item = decode(list_key, id, &data)?;
                Ok(filter.matches(&item).then_some(item))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, list_key: &str, data: Item) -> Result<Item, StoreError> {
        let id = Uuid::new_v4().to_string();
        let item = new_item(id.clone(), data);

        sqlx::query("INSERT INTO items (id, list_key, data) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(list_key)
            .bind(encode(&item))
            .execute(&self.pool)
            .await?;

        Ok(item)
    }

    async fn update(&self, list_key: &str, id: &str, data: Item) -> Result<Item, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (stored,) = sqlx::query_as::<_, (String,)>("SELECT data FROM items WHERE list_key = ? AND id = ?")
            .bind(list_key)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| not_found(list_key, id))?;

        let mut item = decode(list_key, id, &stored)?;
        merge(&mut item, data);

        sqlx::query("UPDATE items SET data = ? WHERE list_key = ? AND id = ?")
            .bind(encode(&item))
            .bind(list_key)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(item)
    }

    async fn delete(&self, list_key: &str, id: &str) -> Result<Item, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (stored,) = sqlx::query_as::<_, (String,)>("SELECT data FROM items WHERE list_key = ? AND id = ?")
            .bind(list_key)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| not_found(list_key, id))?;
        let item = decode(list_key, id, &stored)?;

        sqlx::query("DELETE FROM items WHERE list_key = ? AND id = ?")
            .bind(list_key)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(item)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
