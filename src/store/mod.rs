// DANS : src/store/mod.rs

//! Accès au document store : documents JSON par pool, file de revalidation,
//! index secondaire pour les lecteurs externes.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryDocumentStore;
pub use redis_store::RedisDocumentStore;

use crate::error::StoreError;
use crate::state::PoolDocument;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub const POOL_KEY_PREFIX: &str = "pools:";
pub const UPDATE_QUEUE: &str = "update_queue";
pub const POOL_INDEX_NAME: &str = "idx:pools";

pub fn pool_key(address: &str) -> String {
    format!("{}{}", POOL_KEY_PREFIX, address)
}

/// Le contrat minimal attendu du document store.
///
/// Toutes les opérations doivent être sûres en accès concurrent depuis
/// plusieurs listeners et workers, sans verrou externe.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Le document brut (texte JSON), ou `None` si la clé n'existe pas.
    async fn get_document(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Écrit (ou remplace) le document entier.
    async fn set_document(&self, key: &str, document: &Value) -> Result<(), StoreError>;

    /// Mise à jour partielle : `rawState = raw_state`, `isValid = false`.
    async fn invalidate(&self, key: &str, raw_state: &str) -> Result<(), StoreError>;

    /// Remplace le document entier seulement si son `rawState` courant vaut
    /// `expected_raw_state`. Atomique. Retourne `false` si la garde échoue.
    async fn compare_and_set(&self, key: &str, expected_raw_state: &str, document: &Value) -> Result<bool, StoreError>;

    async fn push_queue(&self, queue: &str, value: &str) -> Result<(), StoreError>;

    /// Non bloquant : `None` si la file est vide.
    async fn pop_queue(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Crée l'index secondaire s'il n'existe pas encore.
    async fn ensure_index(&self) -> Result<(), StoreError>;

    /// Vide complètement la base (documents, file, index).
    async fn flush(&self) -> Result<(), StoreError>;
}

/// Résultat de la lecture d'un document de pool.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentLookup {
    Found(PoolDocument),
    Absent,
    /// Présent mais illisible comme `PoolDocument`.
    Malformed(String),
}

/// Façade typée au-dessus d'un `DocumentStore` : clés, file et schéma des pools.
#[derive(Clone)]
pub struct PoolStore {
    backend: Arc<dyn DocumentStore>,
    queue: String,
}

impl PoolStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            queue: UPDATE_QUEUE.to_string(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    pub async fn load(&self, address: &str) -> Result<DocumentLookup, StoreError> {
        let Some(raw) = self.backend.get_document(&pool_key(address)).await? else {
            return Ok(DocumentLookup::Absent);
        };
        match serde_json::from_str::<PoolDocument>(&raw) {
            Ok(document) => Ok(DocumentLookup::Found(document)),
            Err(e) => {
                warn!(pool = %address, error = %e, "Document de pool illisible.");
                Ok(DocumentLookup::Malformed(e.to_string()))
            }
        }
    }

    pub async fn exists(&self, address: &str) -> Result<bool, StoreError> {
        self.backend.exists(&pool_key(address)).await
    }

    pub async fn create(&self, address: &str, document: &PoolDocument) -> Result<(), StoreError> {
        let value = serde_json::to_value(document)?;
        self.backend.set_document(&pool_key(address), &value).await
    }

    pub async fn invalidate(&self, address: &str, raw_state: &str) -> Result<(), StoreError> {
        self.backend.invalidate(&pool_key(address), raw_state).await
    }

    /// Écrit le document revalidé si personne n'a changé `rawState` entre-temps.
    pub async fn commit_revalidation(
        &self,
        address: &str,
        expected_raw_state: &str,
        document: &PoolDocument,
    ) -> Result<bool, StoreError> {
        let value = serde_json::to_value(document)?;
        self.backend
            .compare_and_set(&pool_key(address), expected_raw_state, &value)
            .await
    }

    pub async fn enqueue(&self, address: &str) -> Result<(), StoreError> {
        self.backend.push_queue(&self.queue, address).await
    }

    pub async fn dequeue(&self) -> Result<Option<String>, StoreError> {
        self.backend.pop_queue(&self.queue).await
    }
}
