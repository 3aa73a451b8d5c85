use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{merge, new_item, ItemStore, StoreError};
use crate::schema::{Item, RowFilter};

/// Items kept in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: RwLock<HashMap<String, Vec<Item>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn has_id(item: &Item, id: &str) -> bool {
    item.get("id").and_then(|v| v.as_str()) == Some(id)
}

fn not_found(list_key: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        list_key: list_key.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn find_many(&self, list_key: &str, filter: &RowFilter) -> Result<Vec<Item>, StoreError> {
        if *filter == RowFilter::Never {
            return Ok(Vec::new());
        }
        let lists = self.lists.read().await;
        Ok(lists
            .get(list_key)
            .map(|items| items.iter().filter(|item| filter.matches(item)).cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, list_key: &str, data: Item) -> Result<Item, StoreError> {
        let item = new_item(Uuid::new_v4().to_string(), data);
        self.lists
            .write()
            .await
            .entry(list_key.to_string())
            .or_default()
            .push(item.clone());
        Ok(item)
    }

    async fn update(&self, list_key: &str, id: &str, data: Item) -> Result<Item, StoreError> {
        let mut lists = self.lists.write().await;
        let item = lists
            .get_mut(list_key)
            .and_then(|items| items.iter_mut().find(|item| has_id(item, id)))
            .ok_or_else(|| not_found(list_key, id))?;
        merge(item, data);
        Ok(item.clone())
    }

    async fn delete(&self, list_key: &str, id: &str) -> Result<Item, StoreError> {
        let mut lists = self.lists.write().await;
        let items = lists.get_mut(list_key).ok_or_else(|| not_found(list_key, id))?;
        let index = items
            .iter()
            .position(|item| has_id(item, id))
            .ok_or_else(|| not_found(list_key, id))?;
        Ok(items.remove(index))
    }
}
