use crate::monitoring::metrics::{RPC_REQUEST_LATENCY, RPC_REQUESTS_TOTAL};
use anyhow::{Context, Result};
use solana_client::{client_error::{ClientError, ClientErrorKind}, nonblocking::rpc_client::RpcClient};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::{future::Future, sync::Arc, time::{Duration, Instant}};
use tokio::time::sleep;
use tracing::warn;

/// Un "wrapper" autour du RpcClient de Solana qui ajoute une logique de
/// ré-essai automatique pour les appels RPC qui échouent à cause d'erreurs réseau temporaires.
#[derive(Clone)]
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    max_retries: u8,
    delay_ms: u64,
}

impl ResilientRpcClient {
    /// Construit un nouveau client RPC résilient, en commitment `confirmed`.
    pub fn new(rpc_url: String, max_retries: u8, delay_ms: u64) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed())),
            max_retries,
            delay_ms,
        }
    }

    /// Seules les erreurs de transport sont retentées. Une réponse JSON-RPC
    /// d'erreur du nœud (`RpcError`) est définitive pour cet appel.
    fn is_retryable(error: &ClientError) -> bool {
        matches!(error.kind, ClientErrorKind::Reqwest(_) | ClientErrorKind::Io(_))
    }

    /// Exécute `call` jusqu'à `max_retries + 1` fois tant que l'erreur est temporaire.
    async fn with_retry<T, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt: u8 = 0;
        loop {
            let started = Instant::now();
            let result = call().await;
            RPC_REQUEST_LATENCY
                .with_label_values(&[method])
                .observe(started.elapsed().as_secs_f64());
            match result {
                Ok(value) => {
                    RPC_REQUESTS_TOTAL.with_label_values(&[method, "success"]).inc();
                    return Ok(value);
                }
                Err(e) if Self::is_retryable(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    RPC_REQUESTS_TOTAL.with_label_values(&[method, "retry"]).inc();
                    warn!(method, attempt, error = %e, "[RPC] Erreur temporaire, nouvelle tentative.");
                    sleep(Duration::from_millis(self.delay_ms)).await;
                }
                Err(e) => {
                    RPC_REQUESTS_TOTAL.with_label_values(&[method, "failure"]).inc();
                    return Err(e).with_context(|| format!("Échec final de {}", method));
                }
            }
        }
    }

    /// Récupère plusieurs comptes. Un compte inexistant donne `None` à sa position.
    pub async fn get_multiple_accounts(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let client = &self.client;
        self.with_retry("get_multiple_accounts", move || client.get_multiple_accounts(pubkeys))
            .await
    }
}
