//! Tests d'intégration du pipeline : notification -> invalidation -> file -> revalidation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytemuck::Zeroable;
use pooldb_updater::data_pipeline::discovery::raydium;
use pooldb_updater::data_pipeline::{
    AccountNotification, DiscardReason, IngestOutcome, IngestionListener, RevalidationOutcome, RevalidationWorker,
    WorkerPool,
};
use pooldb_updater::decoders::raydium::amm_v4::{encode_pool, PoolRecord, RAYDIUM_AMM_V4_PROGRAM_ID, TRADEABLE_STATUS};
use pooldb_updater::error::{PoolSyncError, StoreError};
use pooldb_updater::rpc::AccountFetcher;
use pooldb_updater::state::PoolDocument;
use pooldb_updater::store::{pool_key, DocumentLookup, DocumentStore, MemoryDocumentStore, PoolStore, UPDATE_QUEUE};
use serde_json::Value;
use solana_sdk::{account::Account, pubkey::Pubkey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const INACTIVE_STATUS: u64 = 1;

/// Fetcher de comptes piloté par le test.
#[derive(Default)]
struct ScriptedFetcher {
    accounts: Mutex<HashMap<Pubkey, Account>>,
    unavailable: Mutex<bool>,
}

impl ScriptedFetcher {
    fn set_account(&self, address: Pubkey, account: Account) {
        self.accounts.lock().unwrap().insert(address, account);
    }

    fn set_balance(&self, vault: Pubkey, amount: u64) {
        self.set_account(vault, vault_account(amount));
    }

    fn go_offline(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    fn lookup(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        if *self.unavailable.lock().unwrap() {
            return Err(anyhow!("nœud RPC injoignable"));
        }
        let accounts = self.accounts.lock().unwrap();
        Ok(addresses.iter().map(|a| accounts.get(a).cloned()).collect())
    }
}

#[async_trait]
impl AccountFetcher for ScriptedFetcher {
    async fn fetch_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        self.lookup(addresses)
    }
}

/// Livre une nouvelle notification pour le pool pendant le premier fetch des vaults.
struct RacingFetcher {
    inner: Arc<ScriptedFetcher>,
    listener: IngestionListener,
    pending: Mutex<Option<(Pubkey, Vec<u8>)>>,
}

#[async_trait]
impl AccountFetcher for RacingFetcher {
    async fn fetch_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let pending = self.pending.lock().unwrap().take();
        if let Some((pool, bytes)) = pending {
            self.listener.handle(&pool, &bytes).await?;
        }
        self.inner.lookup(addresses)
    }
}

#[derive(Clone, Copy)]
struct TestPool {
    address: Pubkey,
    base_vault: Pubkey,
    quote_vault: Pubkey,
    base_mint: Pubkey,
    quote_mint: Pubkey,
}

impl TestPool {
    fn new() -> Self {
        Self {
            address: Pubkey::new_unique(),
            base_vault: Pubkey::new_unique(),
            quote_vault: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
            quote_mint: Pubkey::new_unique(),
        }
    }

    fn key(&self) -> String {
        self.address.to_string()
    }

    /// Octets d'un compte de pool. `nonce` sert à distinguer deux états successifs.
    fn bytes(&self, status: u64, pnl: (u64, u64), decimals: (u64, u64), nonce: u64) -> Vec<u8> {
        let mut record = PoolRecord::zeroed();
        record.status = status;
        record.nonce = nonce;
        record.base_decimal = decimals.0;
        record.quote_decimal = decimals.1;
        record.out_put.base_need_take_pnl = pnl.0;
        record.out_put.quote_need_take_pnl = pnl.1;
        record.base_vault = self.base_vault;
        record.quote_vault = self.quote_vault;
        record.base_mint = self.base_mint;
        record.quote_mint = self.quote_mint;
        encode_pool(&record)
    }

    fn tradeable(&self, nonce: u64) -> Vec<u8> {
        self.bytes(TRADEABLE_STATUS, (0, 0), (0, 0), nonce)
    }
}

fn vault_account(amount: u64) -> Account {
    let mut data = vec![0u8; 165];
    data[64..72].copy_from_slice(&amount.to_le_bytes());
    Account { lamports: 2_039_280, data, owner: spl_token::ID, executable: false, rent_epoch: 0 }
}

struct Harness {
    memory: Arc<MemoryDocumentStore>,
    store: PoolStore,
    listener: IngestionListener,
    fetcher: Arc<ScriptedFetcher>,
    worker: RevalidationWorker,
}

fn harness() -> Harness {
    let memory = Arc::new(MemoryDocumentStore::new());
    let store = PoolStore::new(memory.clone());
    let listener = IngestionListener::new(store.clone(), RAYDIUM_AMM_V4_PROGRAM_ID);
    let fetcher = Arc::new(ScriptedFetcher::default());
    let worker = RevalidationWorker::new(0, store.clone(), fetcher.clone(), Duration::from_millis(5));
    Harness { memory, store, listener, fetcher, worker }
}

impl Harness {
    async fn document(&self, pool: &TestPool) -> PoolDocument {
        match self.store.load(&pool.key()).await.unwrap() {
            DocumentLookup::Found(document) => document,
            other => panic!("document attendu pour {}, obtenu {:?}", pool.key(), other),
        }
    }

    fn queue(&self) -> Vec<String> {
        self.memory.queue_snapshot(UPDATE_QUEUE).unwrap()
    }

    async fn next(&self) -> RevalidationOutcome {
        let address = self.store.dequeue().await.unwrap().expect("file vide");
        self.worker.revalidate(&address).await.unwrap()
    }
}

#[tokio::test]
async fn end_to_end_inactive_then_tradeable_then_revalidated() {
    let h = harness();
    let pool = TestPool::new();

    let b0 = pool.bytes(INACTIVE_STATUS, (0, 0), (0, 0), 0);
    let outcome = h.listener.handle(&pool.address, &b0).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Discarded(DiscardReason::NotTradeable { status: INACTIVE_STATUS })));
    assert_eq!(h.store.load(&pool.key()).await.unwrap(), DocumentLookup::Absent);
    assert!(h.queue().is_empty());

    let b1 = pool.tradeable(1);
    let outcome = h.listener.handle(&pool.address, &b1).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Created));
    let created = h.document(&pool).await;
    assert_eq!(created.raw_state, STANDARD.encode(&b1));
    assert!(!created.is_valid);
    assert_eq!(created.base_reserve, "0");
    assert_eq!(created.quote_reserve, "0");
    assert_eq!(created.pool_price, "0");
    assert_eq!(created.last_updated, 0);
    assert_eq!(created.program_id, RAYDIUM_AMM_V4_PROGRAM_ID.to_string());
    assert_eq!(created.base_mint, pool.base_mint.to_string());
    assert_eq!(h.queue(), vec![pool.key()]);

    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);
    assert!(matches!(h.next().await, RevalidationOutcome::Committed));

    let valid = h.document(&pool).await;
    assert!(valid.is_valid);
    assert_eq!(valid.raw_state, STANDARD.encode(&b1));
    assert_eq!(valid.base_reserve, "1000");
    assert_eq!(valid.quote_reserve, "2000");
    assert_eq!(valid.mint_a_amount, "1000");
    assert_eq!(valid.mint_b_amount, "2000");
    assert_eq!(valid.pool_price, "2");
    assert!(valid.last_updated > 0);
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn stored_document_uses_consumer_field_names() {
    let h = harness();
    let pool = TestPool::new();
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();

    let raw = h.memory.document(&pool_key(&pool.key())).unwrap().unwrap();
    for field in [
        "rawState", "baseReserve", "quoteReserve", "mintAAmount", "mintBAmount", "poolPrice",
        "lastUpdated", "isValid", "accountId", "programId", "baseMint", "quoteMint",
    ] {
        assert!(raw.get(field).is_some(), "champ absent : {}", field);
    }
    assert_eq!(raw["accountId"], pool.key());
}

#[tokio::test]
async fn change_on_existing_pool_marks_it_stale_and_requeues() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();
    h.worker.drain().await.unwrap();
    assert!(h.document(&pool).await.is_valid);

    // Un pool déjà suivi reste suivi, quel que soit son statut.
    let b2 = pool.bytes(INACTIVE_STATUS, (0, 0), (0, 0), 2);
    let outcome = h.listener.handle(&pool.address, &b2).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Invalidated));

    let stale = h.document(&pool).await;
    assert!(!stale.is_valid);
    assert_eq!(stale.raw_state, STANDARD.encode(&b2));
    assert_eq!(stale.pool_price, "2");
    assert_eq!(h.queue(), vec![pool.key()]);

    assert!(matches!(h.next().await, RevalidationOutcome::Committed));
    let revalidated = h.document(&pool).await;
    assert!(revalidated.is_valid);
    assert_eq!(revalidated.raw_state, STANDARD.encode(&b2));
}

#[tokio::test]
async fn revalidating_unchanged_pool_twice_gives_identical_fields() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 5_000_000_000);
    h.fetcher.set_balance(pool.quote_vault, 750_000_000);
    let bytes = pool.bytes(TRADEABLE_STATUS, (0, 0), (9, 6), 1);
    h.listener.handle(&pool.address, &bytes).await.unwrap();

    assert!(matches!(h.next().await, RevalidationOutcome::Committed));
    let first = h.document(&pool).await;

    h.store.enqueue(&pool.key()).await.unwrap();
    assert!(matches!(h.next().await, RevalidationOutcome::Committed));
    let second = h.document(&pool).await;

    assert_eq!(first.pool_price, "150");
    assert_eq!(
        (&first.base_reserve, &first.quote_reserve, &first.mint_a_amount, &first.mint_b_amount, &first.pool_price),
        (&second.base_reserve, &second.quote_reserve, &second.mint_a_amount, &second.mint_b_amount, &second.pool_price)
    );
    assert_eq!(first.raw_state, second.raw_state);
}

#[tokio::test]
async fn burst_of_changes_yields_duplicate_entries_processed_idempotently() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 3_000);

    for nonce in 1..=3 {
        h.listener.handle(&pool.address, &pool.tradeable(nonce)).await.unwrap();
    }
    assert_eq!(h.queue().len(), 3);

    assert_eq!(h.worker.drain().await.unwrap(), 3);
    let document = h.document(&pool).await;
    assert!(document.is_valid);
    assert_eq!(document.raw_state, STANDARD.encode(pool.tradeable(3)));
    assert_eq!(document.pool_price, "3");
}

#[tokio::test]
async fn write_back_is_refused_when_raw_state_changed_mid_flight() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);

    let b1 = pool.tradeable(1);
    let b2 = pool.tradeable(2);
    h.listener.handle(&pool.address, &b1).await.unwrap();

    let racing = Arc::new(RacingFetcher {
        inner: h.fetcher.clone(),
        listener: h.listener.clone(),
        pending: Mutex::new(Some((pool.address, b2.clone()))),
    });
    let worker = RevalidationWorker::new(1, h.store.clone(), racing, Duration::from_millis(5));

    let address = h.store.dequeue().await.unwrap().unwrap();
    let outcome = worker.revalidate(&address).await.unwrap();
    assert!(matches!(outcome, RevalidationOutcome::Superseded));

    let document = h.document(&pool).await;
    assert_eq!(document.raw_state, STANDARD.encode(&b2));
    assert!(!document.is_valid);
    assert_eq!(document.pool_price, "0");
    assert_eq!(h.queue(), vec![pool.key()]);

    // L'entrée déposée par la notification concurrente revalide l'état le plus récent.
    assert_eq!(worker.drain().await.unwrap(), 1);
    let document = h.document(&pool).await;
    assert!(document.is_valid);
    assert_eq!(document.raw_state, STANDARD.encode(&b2));
}

#[tokio::test]
async fn negative_reserve_abandons_without_requeue() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);
    h.listener
        .handle(&pool.address, &pool.bytes(TRADEABLE_STATUS, (1_500, 0), (0, 0), 1))
        .await
        .unwrap();

    let outcome = h.next().await;
    assert!(matches!(outcome, RevalidationOutcome::Abandoned(PoolSyncError::NegativeReserve { .. })));
    assert!(!h.document(&pool).await.is_valid);
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn empty_base_reserve_is_division_by_zero() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 700);
    h.fetcher.set_balance(pool.quote_vault, 2_000);
    h.listener
        .handle(&pool.address, &pool.bytes(TRADEABLE_STATUS, (700, 0), (0, 0), 1))
        .await
        .unwrap();

    assert!(matches!(h.next().await, RevalidationOutcome::Abandoned(PoolSyncError::DivisionByZero)));
    assert!(!h.document(&pool).await.is_valid);
}

#[tokio::test]
async fn missing_or_foreign_vault_is_a_missing_auxiliary_account() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();

    match h.next().await {
        RevalidationOutcome::Abandoned(PoolSyncError::MissingAuxiliaryAccount { address, .. }) => {
            assert_eq!(address, pool.quote_vault)
        }
        other => panic!("abandon attendu, obtenu {:?}", other),
    }

    let mut foreign = vault_account(2_000);
    foreign.owner = Pubkey::new_unique();
    h.fetcher.set_account(pool.quote_vault, foreign);
    h.store.enqueue(&pool.key()).await.unwrap();
    assert!(matches!(
        h.next().await,
        RevalidationOutcome::Abandoned(PoolSyncError::MissingAuxiliaryAccount { .. })
    ));

    let mut truncated = vault_account(2_000);
    truncated.data.truncate(72);
    h.fetcher.set_account(pool.quote_vault, truncated);
    h.store.enqueue(&pool.key()).await.unwrap();
    assert!(matches!(
        h.next().await,
        RevalidationOutcome::Abandoned(PoolSyncError::MissingAuxiliaryAccount { .. })
    ));
    assert!(!h.document(&pool).await.is_valid);
}

#[tokio::test]
async fn total_fetch_failure_abandons_item() {
    let h = harness();
    let pool = TestPool::new();
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();
    h.fetcher.go_offline();

    assert!(matches!(
        h.next().await,
        RevalidationOutcome::Abandoned(PoolSyncError::MissingAuxiliaryAccount { .. })
    ));
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn undecodable_notification_changes_nothing() {
    let h = harness();
    let pool = TestPool::new();

    let outcome = h.listener.handle(&pool.address, &[0u8; 100]).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Discarded(DiscardReason::Malformed(_))));
    assert_eq!(h.memory.document_count().unwrap(), 0);
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn corrupt_documents_and_bad_queue_entries_are_contained() {
    let h = harness();
    let broken = TestPool::new();
    let healthy = TestPool::new();
    h.fetcher.set_balance(healthy.base_vault, 1_000);
    h.fetcher.set_balance(healthy.quote_vault, 4_000);

    h.memory.insert_raw(&pool_key(&broken.key()), "{ pas du json").unwrap();
    h.store.enqueue(&broken.key()).await.unwrap();
    h.store.enqueue("pas-une-adresse").await.unwrap();
    h.store.enqueue(&Pubkey::new_unique().to_string()).await.unwrap();
    h.listener.handle(&healthy.address, &healthy.tradeable(1)).await.unwrap();

    assert!(matches!(
        h.next().await,
        RevalidationOutcome::Abandoned(PoolSyncError::MalformedAccountData(_))
    ));
    assert!(matches!(
        h.next().await,
        RevalidationOutcome::Abandoned(PoolSyncError::MalformedAccountData(_))
    ));
    assert!(matches!(h.next().await, RevalidationOutcome::DocumentMissing));
    assert!(matches!(h.next().await, RevalidationOutcome::Committed));
    assert_eq!(h.document(&healthy).await.pool_price, "4");

    // Une notification pour le document corrompu est écartée sans arrêter le listener.
    let outcome = h.listener.handle(&broken.address, &broken.tradeable(1)).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Discarded(DiscardReason::StoreRejected(_))));
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn raw_state_that_is_not_a_pool_is_abandoned() {
    let h = harness();
    let pool = TestPool::new();
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();
    h.store
        .backend()
        .invalidate(&pool_key(&pool.key()), &STANDARD.encode([1u8, 2, 3]))
        .await
        .unwrap();

    assert!(matches!(
        h.next().await,
        RevalidationOutcome::Abandoned(PoolSyncError::MalformedAccountData(_))
    ));
}

#[tokio::test]
async fn worker_loop_drains_queue_and_stops_on_shutdown() {
    let h = harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = RevalidationWorker::new(7, h.store.clone(), h.fetcher.clone(), Duration::from_millis(5));
    let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.document(&pool).await.is_valid {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("le worker n'a pas revalidé le pool");

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("le worker ne s'est pas arrêté")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn backfill_feeds_catalog_pools_through_the_listener() {
    let h = harness();
    let tradeable = TestPool::new();
    let inactive = TestPool::new();
    let missing = TestPool::new();
    for (pool, status) in [(&tradeable, TRADEABLE_STATUS), (&inactive, INACTIVE_STATUS)] {
        h.fetcher.set_account(
            pool.address,
            Account {
                lamports: 1,
                data: pool.bytes(status, (0, 0), (0, 0), 1),
                owner: RAYDIUM_AMM_V4_PROGRAM_ID,
                executable: false,
                rent_epoch: 0,
            },
        );
    }

    let report = raydium::backfill(
        &h.listener,
        h.fetcher.as_ref(),
        &[tradeable.address, inactive.address, missing.address],
    )
    .await
    .unwrap();

    assert_eq!(report.requested, 3);
    assert_eq!(report.enqueued, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.not_found, 1);
    assert_eq!(h.queue(), vec![tradeable.key()]);
    assert!(h.memory.document(&pool_key(&inactive.key())).unwrap().is_none());
}

#[tokio::test]
async fn index_and_flush_go_through_the_backend() {
    let h = harness();
    let pool = TestPool::new();
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();
    h.store.backend().ensure_index().await.unwrap();
    h.store.backend().ensure_index().await.unwrap();
    assert!(h.memory.index_created().unwrap());

    h.store.backend().flush().await.unwrap();
    assert_eq!(h.memory.document_count().unwrap(), 0);
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn listener_run_applies_notifications_in_arrival_order() {
    let h = harness();
    let pool = TestPool::new();
    let (tx, rx) = mpsc::channel(8);
    let first = pool.tradeable(1);
    let second = pool.tradeable(2);
    for (slot, data) in [(10, first), (11, second.clone())] {
        tx.send(AccountNotification { address: pool.address, data, slot }).await.unwrap();
    }
    drop(tx);

    h.listener.run(rx).await.unwrap();

    let document = h.document(&pool).await;
    assert_eq!(document.raw_state, STANDARD.encode(&second));
    assert!(!document.is_valid);
    assert_eq!(h.queue(), vec![pool.key(), pool.key()]);
}

/// Panne simulée sur une opération du store.
#[derive(Clone, Copy)]
enum Fault {
    /// Serveur injoignable.
    Unreachable,
    /// Commande refusée pour cette clé.
    Rejected,
}

impl Fault {
    fn error(self, operation: &str) -> StoreError {
        match self {
            Fault::Unreachable => StoreError::Connection(format!("{} : connexion refusée", operation)),
            Fault::Rejected => StoreError::Command(format!("{} : WRONGTYPE", operation)),
        }
    }
}

/// Store en mémoire dont on peut faire échouer une opération, une fois ou jusqu'à réparation.
struct FaultyStore {
    inner: MemoryDocumentStore,
    faults: Mutex<HashMap<&'static str, (Fault, bool)>>,
}

impl FaultyStore {
    fn new() -> Self {
        Self { inner: MemoryDocumentStore::new(), faults: Mutex::new(HashMap::new()) }
    }

    fn fail(&self, operation: &'static str, fault: Fault) {
        self.faults.lock().unwrap().insert(operation, (fault, false));
    }

    fn fail_once(&self, operation: &'static str, fault: Fault) {
        self.faults.lock().unwrap().insert(operation, (fault, true));
    }

    fn heal(&self, operation: &'static str) {
        self.faults.lock().unwrap().remove(operation);
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get(operation).copied() {
            Some((fault, once)) => {
                if once {
                    faults.remove(operation);
                }
                Err(fault.error(operation))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get_document(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check("get_document")?;
        self.inner.get_document(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check("exists")?;
        self.inner.exists(key).await
    }

    async fn set_document(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        self.check("set_document")?;
        self.inner.set_document(key, document).await
    }

    async fn invalidate(&self, key: &str, raw_state: &str) -> Result<(), StoreError> {
        self.check("invalidate")?;
        self.inner.invalidate(key, raw_state).await
    }

    async fn compare_and_set(&self, key: &str, expected_raw_state: &str, document: &Value) -> Result<bool, StoreError> {
        self.check("compare_and_set")?;
        self.inner.compare_and_set(key, expected_raw_state, document).await
    }

    async fn push_queue(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        self.check("push_queue")?;
        self.inner.push_queue(queue, value).await
    }

    async fn pop_queue(&self, queue: &str) -> Result<Option<String>, StoreError> {
        self.check("pop_queue")?;
        self.inner.pop_queue(queue).await
    }

    async fn ensure_index(&self) -> Result<(), StoreError> {
        self.check("ensure_index")?;
        self.inner.ensure_index().await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.check("flush")?;
        self.inner.flush().await
    }
}

struct FaultyHarness {
    faulty: Arc<FaultyStore>,
    store: PoolStore,
    listener: IngestionListener,
    fetcher: Arc<ScriptedFetcher>,
    worker: RevalidationWorker,
}

fn faulty_harness() -> FaultyHarness {
    let faulty = Arc::new(FaultyStore::new());
    let store = PoolStore::new(faulty.clone());
    let listener = IngestionListener::new(store.clone(), RAYDIUM_AMM_V4_PROGRAM_ID);
    let fetcher = Arc::new(ScriptedFetcher::default());
    let worker = RevalidationWorker::new(0, store.clone(), fetcher.clone(), Duration::from_millis(5));
    FaultyHarness { faulty, store, listener, fetcher, worker }
}

impl FaultyHarness {
    fn queue(&self) -> Vec<String> {
        self.faulty.inner.queue_snapshot(UPDATE_QUEUE).unwrap()
    }

    fn raw_state(&self, pool: &TestPool) -> Option<Value> {
        self.faulty.inner.document(&pool_key(&pool.key())).unwrap().map(|d| d["rawState"].clone())
    }
}

#[tokio::test]
async fn unreachable_store_stops_the_listener_without_enqueueing() {
    let h = faulty_harness();
    let fresh = TestPool::new();
    h.faulty.fail("exists", Fault::Unreachable);
    let result = h.listener.handle(&fresh.address, &fresh.tradeable(1)).await;
    assert!(matches!(result, Err(StoreError::Connection(_))));
    assert!(h.raw_state(&fresh).is_none());
    assert!(h.queue().is_empty());
    h.faulty.heal("exists");

    let tracked = TestPool::new();
    let b1 = tracked.tradeable(1);
    h.listener.handle(&tracked.address, &b1).await.unwrap();
    h.store.dequeue().await.unwrap();

    h.faulty.fail("invalidate", Fault::Unreachable);
    let result = h.listener.handle(&tracked.address, &tracked.tradeable(2)).await;
    assert!(matches!(result, Err(StoreError::Connection(_))));
    assert_eq!(h.raw_state(&tracked), Some(Value::String(STANDARD.encode(&b1))));
    assert!(h.queue().is_empty());
}

#[tokio::test]
async fn rejected_write_discards_only_that_notification() {
    let h = faulty_harness();
    let pool = TestPool::new();
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();
    h.store.dequeue().await.unwrap();

    h.faulty.fail_once("invalidate", Fault::Rejected);
    let outcome = h.listener.handle(&pool.address, &pool.tradeable(2)).await.unwrap();
    assert!(matches!(
        outcome,
        IngestOutcome::Discarded(DiscardReason::StoreRejected(StoreError::Command(_)))
    ));
    assert!(h.queue().is_empty());

    let b3 = pool.tradeable(3);
    let outcome = h.listener.handle(&pool.address, &b3).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Invalidated));
    assert_eq!(h.raw_state(&pool), Some(Value::String(STANDARD.encode(&b3))));
    assert_eq!(h.queue(), vec![pool.key()]);
}

#[tokio::test]
async fn unreachable_store_stops_the_worker_instead_of_abandoning() {
    let h = faulty_harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();

    h.faulty.fail("get_document", Fault::Unreachable);
    let result = h.worker.revalidate(&pool.key()).await;
    assert!(matches!(result, Err(StoreError::Connection(_))));
    h.faulty.heal("get_document");

    h.faulty.fail("compare_and_set", Fault::Unreachable);
    let result = h.worker.revalidate(&pool.key()).await;
    assert!(matches!(result, Err(StoreError::Connection(_))));
    let raw = h.faulty.inner.document(&pool_key(&pool.key())).unwrap().unwrap();
    assert_eq!(raw["isValid"], Value::Bool(false));
}

#[tokio::test]
async fn rejected_write_back_abandons_only_that_item() {
    let h = faulty_harness();
    let pool = TestPool::new();
    h.fetcher.set_balance(pool.base_vault, 1_000);
    h.fetcher.set_balance(pool.quote_vault, 2_000);
    h.listener.handle(&pool.address, &pool.tradeable(1)).await.unwrap();

    h.faulty.fail_once("compare_and_set", Fault::Rejected);
    let outcome = h.worker.revalidate(&pool.key()).await.unwrap();
    assert!(matches!(
        outcome,
        RevalidationOutcome::Abandoned(PoolSyncError::StoreUnavailable(StoreError::Command(_)))
    ));
    assert_eq!(outcome.label(), "store_error");

    assert!(matches!(h.worker.revalidate(&pool.key()).await.unwrap(), RevalidationOutcome::Committed));
}

#[tokio::test]
async fn worker_loop_returns_when_store_is_unreachable() {
    let h = faulty_harness();
    h.faulty.fail("pop_queue", Fault::Unreachable);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = tokio::time::timeout(Duration::from_secs(5), h.worker.run(shutdown_rx))
        .await
        .expect("le worker aurait dû s'arrêter");
    assert!(matches!(result, Err(StoreError::Connection(_))));
}

#[tokio::test]
async fn worker_pool_stops_every_worker_on_first_store_loss() {
    let h = faulty_harness();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    // Un seul worker tombe sur la panne, les autres continuent de sonder une file vide.
    h.faulty.fail_once("pop_queue", Fault::Unreachable);
    let mut workers = WorkerPool::spawn(3, &h.store, h.fetcher.clone(), Duration::from_millis(5), &shutdown_rx);
    assert_eq!(workers.len(), 3);

    let result = tokio::time::timeout(Duration::from_secs(5), workers.wait())
        .await
        .expect("le groupe de workers aurait dû s'arrêter au premier échec");
    let error = result.unwrap_err();
    assert!(matches!(error.downcast_ref::<StoreError>(), Some(StoreError::Connection(_))));
    assert!(workers.is_empty());
}

#[tokio::test]
async fn worker_pool_finishes_cleanly_on_shutdown() {
    let h = faulty_harness();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = WorkerPool::spawn(2, &h.store, h.fetcher.clone(), Duration::from_millis(5), &shutdown_rx);

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), workers.wait())
        .await
        .expect("les workers ne se sont pas arrêtés");
    assert!(result.is_ok());
    assert!(workers.is_empty());
}
