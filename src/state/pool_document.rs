// DANS : src/state/pool_document.rs

use crate::decoders::{decode_pool, PoolRecord};
use crate::error::PoolSyncError;
use crate::math::ReserveQuote;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Le document stocké pour chaque pool, lu tel quel par les consommateurs externes.
///
/// Les montants sont des chaînes décimales (pas d'entiers natifs) pour ne jamais
/// déborder côté lecteur. `is_valid == false` signifie que `raw_state` est à jour
/// mais que les réserves / le prix ne l'ont pas encore été recalculés.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDocument {
    /// État brut du compte de pool, en base64.
    pub raw_state: String,
    pub base_reserve: String,
    pub quote_reserve: String,
    /// Soldes bruts des vaults, avant soustraction des montants dus au protocole.
    pub mint_a_amount: String,
    pub mint_b_amount: String,
    pub pool_price: String,
    /// Millisecondes depuis l'epoch Unix ; 0 tant que le pool n'a jamais été revalidé.
    pub last_updated: i64,
    pub is_valid: bool,
    pub account_id: String,
    pub program_id: String,
    #[serde(default)]
    pub base_mint: String,
    #[serde(default)]
    pub quote_mint: String,
}

impl PoolDocument {
    /// Document initial d'un pool nouvellement observé : tout à zéro, invalide.
    pub fn template(account_id: &Pubkey, program_id: &Pubkey, raw: &[u8], record: &PoolRecord) -> Self {
        let (base_mint, quote_mint) = record.mints();
        Self {
            raw_state: encode_raw_state(raw),
            base_reserve: "0".to_string(),
            quote_reserve: "0".to_string(),
            mint_a_amount: "0".to_string(),
            mint_b_amount: "0".to_string(),
            pool_price: "0".to_string(),
            last_updated: 0,
            is_valid: false,
            account_id: account_id.to_string(),
            program_id: program_id.to_string(),
            base_mint: base_mint.to_string(),
            quote_mint: quote_mint.to_string(),
        }
    }

    pub fn raw_bytes(&self) -> Result<Vec<u8>, PoolSyncError> {
        STANDARD
            .decode(&self.raw_state)
            .map_err(|e| PoolSyncError::MalformedAccountData(format!("rawState n'est pas du base64 : {}", e)))
    }

    /// Décode le `raw_state` du document.
    pub fn record(&self) -> Result<PoolRecord, PoolSyncError> {
        decode_pool(&self.raw_bytes()?)
    }

    /// Copie du document avec les champs dérivés recalculés, marquée valide.
    /// `raw_state` est conservé : c'est la garde de l'écriture conditionnelle.
    pub fn revalidated(&self, base_balance: u64, quote_balance: u64, quote: &ReserveQuote, now_ms: i64) -> Self {
        Self {
            base_reserve: quote.base_reserve.to_string(),
            quote_reserve: quote.quote_reserve.to_string(),
            mint_a_amount: base_balance.to_string(),
            mint_b_amount: quote_balance.to_string(),
            pool_price: quote.price.to_string(),
            last_updated: now_ms,
            is_valid: true,
            ..self.clone()
        }
    }
}

pub fn encode_raw_state(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}
