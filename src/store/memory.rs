// DANS : src/store/memory.rs

use super::DocumentStore;
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    /// Texte JSON brut, pour pouvoir y déposer des documents corrompus.
    documents: HashMap<String, String>,
    queues: HashMap<String, VecDeque<String>>,
    index_created: bool,
}

/// Backend en mémoire, même sémantique que Redis (CAS et invalidation atomiques).
/// Utilisé par les tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Connection("verrou du store mémoire empoisonné".to_string()))
    }

    /// Dépose un texte arbitraire sous `key`, JSON valide ou non.
    pub fn insert_raw(&self, key: &str, raw: &str) -> Result<(), StoreError> {
        self.lock()?.documents.insert(key.to_string(), raw.to_string());
        Ok(())
    }

    pub fn document(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let state = self.lock()?;
        state
            .documents
            .get(key)
            .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
            .transpose()
    }

    pub fn document_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.documents.len())
    }

    pub fn queue_snapshot(&self, queue: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn index_created(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.index_created)
    }
}

fn parse_object(key: &str, raw: &str) -> Result<serde_json::Map<String, Value>, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(StoreError::Command(format!("{} n'est pas un document JSON", key))),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.documents.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.documents.contains_key(key))
    }

    async fn set_document(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let json = serde_json::to_string(document)?;
        self.lock()?.documents.insert(key.to_string(), json);
        Ok(())
    }

    async fn invalidate(&self, key: &str, raw_state: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let raw = state
            .documents
            .get(key)
            .ok_or_else(|| StoreError::Command(format!("{} : document absent", key)))?;
        let mut object = parse_object(key, raw)?;
        object.insert("isValid".to_string(), Value::Bool(false));
        object.insert("rawState".to_string(), Value::String(raw_state.to_string()));
        let json = serde_json::to_string(&Value::Object(object))?;
        state.documents.insert(key.to_string(), json);
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, expected_raw_state: &str, document: &Value) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(raw) = state.documents.get(key) else {
            return Ok(false);
        };
        let current = parse_object(key, raw)?;
        if current.get("rawState").and_then(Value::as_str) != Some(expected_raw_state) {
            return Ok(false);
        }
        let json = serde_json::to_string(document)?;
        state.documents.insert(key.to_string(), json);
        Ok(true)
    }

    async fn push_queue(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop_queue(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.queues.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        self.lock()?.index_created = true;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        *self.lock()? = MemoryState::default();
        Ok(())
    }
}
