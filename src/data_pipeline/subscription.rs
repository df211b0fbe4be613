// DANS : src/data_pipeline/subscription.rs

use crate::decoders::raydium::amm_v4::POOL_RECORD_SPAN;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::RpcFilterType,
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::str::FromStr;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Une mise à jour de compte reçue du nœud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNotification {
    pub address: Pubkey,
    pub data: Vec<u8>,
    pub slot: u64,
}

fn program_subscribe_config() -> RpcProgramAccountsConfig {
    RpcProgramAccountsConfig {
        filters: Some(vec![RpcFilterType::DataSize(POOL_RECORD_SPAN as u64)]),
        account_config: RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// S'abonne aux comptes de `program_id` et pousse chaque notification dans `tx`.
///
/// Retourne `Ok(())` sur arrêt demandé (via `shutdown`) ou si le récepteur a
/// été fermé, après désabonnement. Retourne une erreur si le flux se termine
/// de lui-même : à l'appelant de se reconnecter.
pub async fn stream_program_accounts(
    wss_url: &str,
    program_id: Pubkey,
    tx: mpsc::Sender<AccountNotification>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let client = PubsubClient::new(wss_url)
        .await
        .with_context(|| format!("Connexion WebSocket à {} impossible", wss_url))?;
    let (mut stream, unsubscribe) = client
        .program_subscribe(&program_id, Some(program_subscribe_config()))
        .await
        .with_context(|| format!("programSubscribe sur {} refusé", program_id))?;
    info!("[Listener] Abonné aux comptes du programme {}.", program_id);

    if *shutdown.borrow() {
        unsubscribe().await;
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("[Listener] Arrêt demandé, désabonnement.");
                unsubscribe().await;
                return Ok(());
            }
            message = stream.next() => {
                let Some(response) = message else {
                    bail!("Le flux programSubscribe s'est terminé");
                };
                let keyed = response.value;
                let address = match Pubkey::from_str(&keyed.pubkey) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!(pubkey = %keyed.pubkey, error = %e, "[Listener] Adresse de compte illisible, notification ignorée.");
                        continue;
                    }
                };
                let data = match &keyed.account.data {
                    UiAccountData::Binary(encoded, UiAccountEncoding::Base64) => match STANDARD.decode(encoded) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(pool = %address, error = %e, "[Listener] Données base64 invalides, notification ignorée.");
                            continue;
                        }
                    },
                    _ => {
                        warn!(pool = %address, "[Listener] Encodage inattendu, notification ignorée.");
                        continue;
                    }
                };
                let notification = AccountNotification { address, data, slot: response.context.slot };
                if tx.send(notification).await.is_err() {
                    info!("[Listener] Récepteur fermé, désabonnement.");
                    unsubscribe().await;
                    return Ok(());
                }
            }
        }
    }
}
