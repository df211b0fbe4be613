// DANS : src/store/redis_store.rs

use super::{DocumentStore, POOL_INDEX_NAME, POOL_KEY_PREFIX};
use crate::error::StoreError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use serde_json::Value;
use tracing::{debug, info};

/// Écriture conditionnelle sur `$.rawState`, exécutée côté serveur.
/// Retour : 1 écrit, 0 garde échouée, -1 document absent.
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('JSON.GET', KEYS[1], '$.rawState')
if not current then
    return -1
end
local values = cjson.decode(current)
if values[1] ~= ARGV[1] then
    return 0
end
redis.call('JSON.SET', KEYS[1], '$', ARGV[2])
return 1
"#;

/// Backend Redis (modules RedisJSON et RediSearch requis).
#[derive(Clone)]
pub struct RedisDocumentStore {
    manager: ConnectionManager,
    compare_and_set: Script,
}

impl RedisDocumentStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!(redis_url = %redis_url, "Client Redis connecté.");
        Ok(Self {
            manager,
            compare_and_set: Script::new(COMPARE_AND_SET_SCRIPT),
        })
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn get_document(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let document: Option<String> = redis::cmd("JSON.GET").arg(key).query_async(&mut conn).await?;
        Ok(document)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn set_document(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(document)?;
        let _: () = redis::cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(json)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, key: &str, raw_state: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        // La valeur d'un chemin JSON.SET est elle-même du JSON : la chaîne doit être quotée.
        let raw_state_json = serde_json::to_string(raw_state)?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("JSON.SET").arg(key).arg("$.isValid").arg("false").ignore()
            .cmd("JSON.SET").arg(key).arg("$.rawState").arg(raw_state_json).ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, expected_raw_state: &str, document: &Value) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(document)?;
        let written: i64 = self
            .compare_and_set
            .key(key)
            .arg(expected_raw_state)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn push_queue(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.rpush(queue, value).await?;
        Ok(())
    }

    async fn pop_queue(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.lpop(queue, None).await?;
        Ok(value)
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<()> = redis::cmd("FT.CREATE")
            .arg(POOL_INDEX_NAME)
            .arg("ON").arg("JSON")
            .arg("PREFIX").arg(1).arg(POOL_KEY_PREFIX)
            .arg("SCHEMA")
            .arg("$.baseMint").arg("AS").arg("baseMint").arg("TEXT").arg("SORTABLE").arg("UNF")
            .arg("$.quoteMint").arg("AS").arg("quoteMint").arg("TEXT").arg("SORTABLE").arg("UNF")
            // Champ numérique : lastUpdated. Le volume du catalogue n'est pas gardé dans le document.
            .arg("$.lastUpdated").arg("AS").arg("lastUpdated").arg("NUMERIC")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => {
                info!(index = POOL_INDEX_NAME, "Index créé.");
                Ok(())
            }
            Err(e) if e.to_string().contains("Index already exists") => {
                debug!(index = POOL_INDEX_NAME, "Index déjà présent.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        info!("Base Redis vidée.");
        Ok(())
    }
}
