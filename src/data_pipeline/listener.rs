// DANS : src/data_pipeline/listener.rs

use crate::data_pipeline::subscription::AccountNotification;
use crate::decoders::decode_pool;
use crate::error::{PoolSyncError, StoreError};
use crate::monitoring::metrics::{INGEST_OUTCOMES, LAST_NOTIFICATION_SLOT, NOTIFICATIONS_RECEIVED};
use crate::state::pool_document::{encode_raw_state, PoolDocument};
use crate::store::PoolStore;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pourquoi une notification n'a rien changé.
#[derive(Debug)]
pub enum DiscardReason {
    Malformed(PoolSyncError),
    /// Pool inconnu et pas encore échangeable.
    NotTradeable { status: u64 },
    /// Le store a refusé l'écriture pour cette clé (document corrompu, mauvais type).
    StoreRejected(StoreError),
}

#[derive(Debug)]
pub enum IngestOutcome {
    Created,
    Invalidated,
    Discarded(DiscardReason),
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Created => "created",
            IngestOutcome::Invalidated => "invalidated",
            IngestOutcome::Discarded(DiscardReason::Malformed(_)) => "malformed",
            IngestOutcome::Discarded(DiscardReason::NotTradeable { .. }) => "not_tradeable",
            IngestOutcome::Discarded(DiscardReason::StoreRejected(_)) => "store_rejected",
        }
    }

    /// Le pool a été mis en file de revalidation.
    pub fn is_enqueued(&self) -> bool {
        matches!(self, IngestOutcome::Created | IngestOutcome::Invalidated)
    }
}

/// Reçoit les mises à jour de comptes de pool et invalide / crée les documents.
#[derive(Clone)]
pub struct IngestionListener {
    store: PoolStore,
    program_id: Pubkey,
}

impl IngestionListener {
    pub fn new(store: PoolStore, program_id: Pubkey) -> Self {
        Self { store, program_id }
    }

    /// Traite une notification. Seule une perte du store remonte en erreur.
    pub async fn handle(&self, address: &Pubkey, data: &[u8]) -> Result<IngestOutcome, StoreError> {
        let outcome = self.apply(address, data).await?;
        INGEST_OUTCOMES.with_label_values(&[outcome.label()]).inc();
        Ok(outcome)
    }

    async fn apply(&self, address: &Pubkey, data: &[u8]) -> Result<IngestOutcome, StoreError> {
        let record = match decode_pool(data) {
            Ok(record) => record,
            Err(e) => {
                warn!(pool = %address, error = %e, "[Listener] Notification indécodable, ignorée.");
                return Ok(IngestOutcome::Discarded(DiscardReason::Malformed(e)));
            }
        };
        let key = address.to_string();

        let written = if self.store.exists(&key).await? {
            self.store
                .invalidate(&key, &encode_raw_state(data))
                .await
                .map(|_| IngestOutcome::Invalidated)
        } else {
            if !record.is_tradeable() {
                debug!(pool = %address, status = record.status(), "[Listener] Nouveau pool non échangeable, ignoré.");
                return Ok(IngestOutcome::Discarded(DiscardReason::NotTradeable { status: record.status() }));
            }
            let document = PoolDocument::template(address, &self.program_id, data, &record);
            self.store.create(&key, &document).await.map(|_| IngestOutcome::Created)
        };

        let outcome = match written {
            Ok(outcome) => outcome,
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!(pool = %address, error = %e, "[Listener] Écriture refusée par le store, notification ignorée.");
                return Ok(IngestOutcome::Discarded(DiscardReason::StoreRejected(e)));
            }
        };

        self.store.enqueue(&key).await?;
        debug!(pool = %address, outcome = outcome.label(), "[Listener] Pool mis en file.");
        Ok(outcome)
    }

    /// Consomme les notifications dans l'ordre de réception jusqu'à fermeture du canal.
    pub async fn run(&self, mut notifications: mpsc::Receiver<AccountNotification>) -> Result<(), StoreError> {
        info!("[Listener] Démarrage du traitement des notifications.");
        while let Some(notification) = notifications.recv().await {
            NOTIFICATIONS_RECEIVED.inc();
            LAST_NOTIFICATION_SLOT.set(notification.slot as i64);
            self.handle(&notification.address, &notification.data).await?;
        }
        info!("[Listener] Canal de notifications fermé.");
        Ok(())
    }
}
