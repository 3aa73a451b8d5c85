//! Storage collaborators. The engine hands a store a validated [`RowFilter`];
//! how the store applies it is its own business.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::schema::{Item, RowFilter};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{list_key} item {id} not found")]
    NotFound { list_key: String, id: String },
    #[error("stored {list_key} item {id} is not a valid document: {source}")]
    Corrupt {
        list_key: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Item persistence, one collection per list key.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Every item of the list matching `filter`, in insertion order.
    async fn find_many(&self, list_key: &str, filter: &RowFilter) -> Result<Vec<Item>, StoreError>;

    /// The item with `id`, if it exists and matches `filter`.
    async fn find_one(&self, list_key: &str, id: &str, filter: &RowFilter) -> Result<Option<Item>, StoreError> {
        let filter = filter.clone().and(RowFilter::id_equals(id));
        Ok(self.find_many(list_key, &filter).await?.into_iter().next())
    }

    /// Insert `data` under a fresh id and return the stored item.
    async fn create(&self, list_key: &str, data: Item) -> Result<Item, StoreError>;

    /// Merge `data` into the stored item and return the result.
    async fn update(&self, list_key: &str, id: &str, data: Item) -> Result<Item, StoreError>;

    /// Remove the item and return what was stored.
    async fn delete(&self, list_key: &str, id: &str) -> Result<Item, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn new_item(id: String, data: Item) -> Item {
    let mut item = data;
    item.insert("id".to_string(), serde_json::Value::String(id));
    item
}

fn merge(item: &mut Item, data: Item) {
    for (key, value) in data {
        if key != "id" {
            item.insert(key, value);
        }
    }
}
