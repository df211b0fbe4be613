// DANS : src/data_pipeline/revalidation.rs

use crate::decoders::decode_account;
use crate::error::{PoolSyncError, StoreError};
use crate::math;
use crate::monitoring::metrics::{QUEUE_EMPTY_POLLS, REVALIDATION_LATENCY, REVALIDATION_OUTCOMES};
use crate::rpc::AccountFetcher;
use crate::store::{DocumentLookup, PoolStore};
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use std::{str::FromStr, sync::Arc, time::{Duration, Instant}};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum RevalidationOutcome {
    /// Document réécrit avec `isValid = true`.
    Committed,
    /// `rawState` a changé pendant le calcul : rien n'est écrit, une entrée plus récente est en file.
    Superseded,
    DocumentMissing,
    /// Abandon sans remise en file ; le prochain changement on-chain relancera le pool.
    Abandoned(PoolSyncError),
}

impl RevalidationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RevalidationOutcome::Committed => "committed",
            RevalidationOutcome::Superseded => "superseded",
            RevalidationOutcome::DocumentMissing => "document_missing",
            RevalidationOutcome::Abandoned(e) => e.label(),
        }
    }
}

/// Vide la file de revalidation : relit le document, lit les vaults, recalcule,
/// puis écrit si `rawState` n'a pas bougé.
pub struct RevalidationWorker {
    id: usize,
    store: PoolStore,
    fetcher: Arc<dyn AccountFetcher>,
    poll_interval: Duration,
}

impl RevalidationWorker {
    pub fn new(id: usize, store: PoolStore, fetcher: Arc<dyn AccountFetcher>, poll_interval: Duration) -> Self {
        Self { id, store, fetcher, poll_interval }
    }

    /// Un cycle complet pour `address`. Seule une perte du store remonte en erreur.
    pub async fn revalidate(&self, address: &str) -> Result<RevalidationOutcome, StoreError> {
        let started = Instant::now();
        let outcome = match self.cycle(address).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => match e {
                PoolSyncError::StoreUnavailable(inner) => return Err(inner),
                other => RevalidationOutcome::Abandoned(other),
            },
            Err(e) => RevalidationOutcome::Abandoned(e),
        };
        REVALIDATION_LATENCY.observe(started.elapsed().as_secs_f64());
        REVALIDATION_OUTCOMES.with_label_values(&[outcome.label()]).inc();

        match &outcome {
            RevalidationOutcome::Committed => {
                debug!(worker = self.id, pool = %address, "[Worker] Pool revalidé.")
            }
            RevalidationOutcome::Superseded => {
                info!(worker = self.id, pool = %address, "[Worker] rawState modifié pendant le calcul, écriture annulée.")
            }
            RevalidationOutcome::DocumentMissing => {
                warn!(worker = self.id, pool = %address, "[Worker] Aucun document pour ce pool, abandon.")
            }
            RevalidationOutcome::Abandoned(e) => {
                warn!(worker = self.id, pool = %address, reason = e.label(), error = %e, "[Worker] Revalidation abandonnée.")
            }
        }
        Ok(outcome)
    }

    async fn cycle(&self, address: &str) -> Result<RevalidationOutcome, PoolSyncError> {
        Pubkey::from_str(address)
            .map_err(|e| PoolSyncError::MalformedAccountData(format!("entrée de file '{}' : {}", address, e)))?;

        let document = match self.store.load(address).await? {
            DocumentLookup::Found(document) => document,
            DocumentLookup::Absent => return Ok(RevalidationOutcome::DocumentMissing),
            DocumentLookup::Malformed(reason) => {
                return Err(PoolSyncError::MalformedAccountData(format!("document : {}", reason)));
            }
        };
        let record = document.record()?;
        let (base_vault, quote_vault) = record.vaults();
        let (base_balance, quote_balance) = self.fetch_vault_balances(base_vault, quote_vault).await?;

        let quote = math::compute(&record, base_balance as u128, quote_balance as u128)?;
        let updated = document.revalidated(base_balance, quote_balance, &quote, Utc::now().timestamp_millis());

        if self.store.commit_revalidation(address, &document.raw_state, &updated).await? {
            Ok(RevalidationOutcome::Committed)
        } else {
            Ok(RevalidationOutcome::Superseded)
        }
    }

    async fn fetch_vault_balances(&self, base_vault: Pubkey, quote_vault: Pubkey) -> Result<(u64, u64), PoolSyncError> {
        let vaults = [base_vault, quote_vault];
        let accounts = self
            .fetcher
            .fetch_accounts(&vaults)
            .await
            .map_err(|e| PoolSyncError::MissingAuxiliaryAccount {
                address: base_vault,
                reason: format!("lecture groupée des vaults échouée : {:#}", e),
            })?;

        let mut balances = [0u64; 2];
        for (i, vault) in vaults.iter().enumerate() {
            let missing = |reason: String| PoolSyncError::MissingAuxiliaryAccount { address: *vault, reason };
            let account = accounts
                .get(i)
                .and_then(Option::as_ref)
                .ok_or_else(|| missing("compte introuvable".to_string()))?;
            if account.owner != spl_token::ID {
                return Err(missing(format!("propriétaire {} au lieu du programme SPL Token", account.owner)));
            }
            balances[i] = decode_account(&account.data).map_err(|e| missing(e.to_string()))?.amount;
        }
        Ok((balances[0], balances[1]))
    }

    /// Traite la file jusqu'à la trouver vide. Retourne le nombre d'entrées traitées.
    pub async fn drain(&self) -> Result<usize, StoreError> {
        let mut processed = 0;
        while let Some(address) = self.store.dequeue().await? {
            self.revalidate(&address).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Boucle principale. S'arrête entre deux entrées dès que `shutdown` passe à `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        info!("[Worker {}] Démarrage (attente sur file vide : {:?}).", self.id, self.poll_interval);
        while !*shutdown.borrow() {
            match self.store.dequeue().await? {
                Some(address) => {
                    self.revalidate(&address).await?;
                }
                None => {
                    QUEUE_EMPTY_POLLS.inc();
                    tokio::select! {
                        _ = sleep(self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("[Worker {}] Arrêt.", self.id);
        Ok(())
    }
}

/// Groupe de workers partageant un même signal d'arrêt.
///
/// Un worker qui perd le store arrête tout le groupe : les autres sont
/// annulés et l'erreur remonte à l'appelant, qui peut sortir du process.
pub struct WorkerPool {
    workers: JoinSet<Result<(), StoreError>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        store: &PoolStore,
        fetcher: Arc<dyn AccountFetcher>,
        poll_interval: Duration,
        shutdown: &watch::Receiver<bool>,
    ) -> Self {
        let mut workers = JoinSet::new();
        for id in 0..count {
            let worker = RevalidationWorker::new(id, store.clone(), fetcher.clone(), poll_interval);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                let result = worker.run(shutdown).await;
                if let Err(e) = &result {
                    error!("[Worker {}] Store indisponible, arrêt du worker : {}", id, e);
                }
                result
            });
        }
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Attend la fin de tous les workers, ou le premier échec.
    ///
    /// Au premier échec, les workers restants sont annulés. Utilisable comme
    /// branche d'un `tokio::select!`.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        while let Some(joined) = self.workers.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => anyhow::Error::new(e).context("Un worker s'est arrêté"),
                Err(e) => anyhow::Error::new(e).context("Tâche worker interrompue"),
            };
            self.workers.abort_all();
            // Au retour, plus aucune tâche ne tourne.
            while self.workers.join_next().await.is_some() {}
            return Err(failure);
        }
        Ok(())
    }

    pub fn abort(&mut self) {
        self.workers.abort_all();
    }
}
