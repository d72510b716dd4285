//! External collaborator contracts: web search and the key-value store
//! backing session-scoped temporary knowledge bases.

mod web_search;

pub use web_search::{
    convert_web_results, temp_kb_key, TempKbState, WebSearchProvider, WebSearchResult,
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::Result;

/// Minimal key-value contract (`{get, set}`), e.g. a redis-like store.
/// Last-writer-wins is acceptable for the temp-KB state kept here.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process [`KvStore`] used for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
