use crate::data_pipeline::listener::IngestionListener;
use crate::decoders::raydium::amm_v4::RAYDIUM_AMM_V4_PROGRAM_ID;
use crate::error::StoreError;
use crate::rpc::AccountFetcher;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RaydiumApiV3Response<T> {
    success: bool,
    data: Option<T>,
    msg: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ApiPoolsPage {
    #[serde(default)]
    count: i64,
    data: Vec<PoolInfo>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub id: String,
    pub program_id: String,
    #[serde(default)]
    pub day: VolumeInfo,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    #[serde(default)]
    pub volume: f64,
}

const PAGE_SIZE: usize = 500;
/// Limite de `getMultipleAccounts`.
const ACCOUNT_BATCH_SIZE: usize = 100;

/// Faut-il demander la page suivante ?
///
/// Les pages sont triées par volume 24h décroissant : dès que la première entrée
/// d'une page passe sous `min_volume`, on considère que la suite est en dessous aussi.
/// La page courante est conservée en entier.
fn should_fetch_next_page(has_next_page: bool, page: &[PoolInfo], min_volume: f64) -> bool {
    match page.first() {
        Some(first) => has_next_page && first.day.volume >= min_volume,
        None => false,
    }
}

/// Adresses des pools AMM V4 d'une page du catalogue (les autres programmes sont ignorés).
fn amm_v4_addresses(page: &[PoolInfo]) -> Vec<Pubkey> {
    let program_id = RAYDIUM_AMM_V4_PROGRAM_ID.to_string();
    page.iter()
        .filter(|pool| pool.program_id == program_id)
        .filter_map(|pool| match Pubkey::from_str(&pool.id) {
            Ok(address) => Some(address),
            Err(e) => {
                warn!(id = %pool.id, error = %e, "[Backfill] Identifiant de pool illisible, ignoré.");
                None
            }
        })
        .collect()
}

// Interroge l'API V3 de Raydium, page par page, et garde les pools AMM V4.
pub async fn fetch_amm_v4_pools(api_url: &str, min_volume: f64) -> Result<Vec<Pubkey>> {
    let client = reqwest::Client::new();
    let mut all_pools: Vec<Pubkey> = Vec::new();
    let mut current_page = 1;

    info!("[Backfill] Récupération du catalogue Raydium (volume 24h minimal : {}).", min_volume);

    loop {
        let url = format!(
            "{}/pools/info/list?poolType=standard&poolSortField=volume24h&sortType=desc&pageSize={}&page={}",
            api_url.trim_end_matches('/'), PAGE_SIZE, current_page
        );

        let raw_text = client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Requête de la page {} du catalogue", current_page))?
            .text()
            .await?;
        let response_body: RaydiumApiV3Response<ApiPoolsPage> = serde_json::from_str(&raw_text)
            .with_context(|| {
                let preview: String = raw_text.chars().take(500).collect();
                format!("Réponse de la page {} indécodable : {}", current_page, preview)
            })?;

        if !response_body.success {
            let error_msg = response_body.msg.unwrap_or_else(|| "Erreur API inconnue".to_string());
            return Err(anyhow!("L'API Raydium a retourné une erreur: {}", error_msg));
        }

        let Some(page) = response_body.data else {
            break;
        };
        if current_page == 1 {
            info!("[Backfill] Nombre total de pools disponibles selon l'API : {}", page.count);
        }
        let selected = amm_v4_addresses(&page.data);
        info!(
            "[Backfill] Page {} : {} pools, dont {} AMM V4.",
            current_page, page.data.len(), selected.len()
        );
        all_pools.extend(selected);

        if !should_fetch_next_page(page.has_next_page, &page.data, min_volume) {
            break;
        }
        current_page += 1;
    }

    info!("[Backfill] Catalogue parcouru : {} pools AMM V4 retenus.", all_pools.len());
    Ok(all_pools)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub requested: usize,
    /// Pools créés ou invalidés, donc mis en file.
    pub enqueued: usize,
    pub discarded: usize,
    pub not_found: usize,
}

/// Lit les comptes des pools et les fait passer par le même chemin que les notifications.
pub async fn backfill(
    listener: &IngestionListener,
    fetcher: &dyn AccountFetcher,
    pools: &[Pubkey],
) -> Result<BackfillReport, StoreError> {
    let mut report = BackfillReport { requested: pools.len(), ..Default::default() };

    for batch in pools.chunks(ACCOUNT_BATCH_SIZE) {
        let accounts = match fetcher.fetch_accounts(batch).await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(batch = batch.len(), error = %format!("{:#}", e), "[Backfill] Lot de comptes illisible, ignoré.");
                report.not_found += batch.len();
                continue;
            }
        };
        for (address, account) in batch.iter().zip(accounts.iter()) {
            let Some(account) = account else {
                report.not_found += 1;
                continue;
            };
            if listener.handle(address, &account.data).await?.is_enqueued() {
                report.enqueued += 1;
            } else {
                report.discarded += 1;
            }
        }
    }

    info!(
        "[Backfill] Terminé : {} demandés, {} en file, {} ignorés, {} introuvables.",
        report.requested, report.enqueued, report.discarded, report.not_found
    );
    Ok(report)
}
