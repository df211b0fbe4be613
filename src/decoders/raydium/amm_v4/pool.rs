// DANS: src/decoders/raydium/amm_v4/pool.rs

use crate::error::PoolSyncError;
use bytemuck::{Pod, Zeroable};
use solana_sdk::{pubkey, pubkey::Pubkey};
use std::mem::size_of;

pub const RAYDIUM_AMM_V4_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");

/// Taille exacte d'un compte de pool AMM V4.
pub const POOL_RECORD_SPAN: usize = 752;

/// Statut "swap only" : le pool est actif et échangeable.
pub const TRADEABLE_STATUS: u64 = 6;

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct PoolFees {
    pub min_separate_numerator: u64,
    pub min_separate_denominator: u64,
    pub trade_fee_numerator: u64,
    pub trade_fee_denominator: u64,
    pub pnl_numerator: u64,
    pub pnl_denominator: u64,
    pub swap_fee_numerator: u64,
    pub swap_fee_denominator: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct PoolOutPutData {
    pub base_need_take_pnl: u64,
    pub quote_need_take_pnl: u64,
    pub quote_total_pnl: u64,
    pub base_total_pnl: u64,
    pub pool_open_time: u64,
    pub punish_pc_amount: u64,
    pub punish_coin_amount: u64,
    pub orderbook_to_init_time: u64,
    pub swap_base_in_amount: u128,
    pub swap_quote_out_amount: u128,
    pub swap_base_2_quote_fee: u64,
    pub swap_quote_in_amount: u128,
    pub swap_base_out_amount: u128,
    pub swap_quote_2_base_fee: u64,
}

/// État on-chain d'un pool AMM V4, tel qu'il est stocké dans le compte.
///
/// La struct est `packed` : lire un champ entier le copie, ne jamais en
/// prendre une référence. Les accesseurs ci-dessous font la copie.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq)]
pub struct PoolRecord {
    pub status: u64,
    pub nonce: u64,
    pub max_order: u64,
    pub depth: u64,
    pub base_decimal: u64,
    pub quote_decimal: u64,
    pub state: u64,
    pub reset_flag: u64,
    pub min_size: u64,
    pub vol_max_cut_ratio: u64,
    pub amount_wave_ratio: u64,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
    pub min_price_multiplier: u64,
    pub max_price_multiplier: u64,
    pub system_decimal_value: u64,
    pub fees: PoolFees,
    pub out_put: PoolOutPutData,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub open_orders: Pubkey,
    pub market_id: Pubkey,
    pub market_program_id: Pubkey,
    pub target_orders: Pubkey,
    pub withdraw_queue: Pubkey,
    pub lp_vault: Pubkey,
    pub owner: Pubkey,
    pub lp_reserve: u64,
    pub padding: [u64; 3],
}

const _: () = assert!(size_of::<PoolRecord>() == POOL_RECORD_SPAN);

impl PoolRecord {
    pub fn status(&self) -> u64 {
        self.status
    }

    pub fn is_tradeable(&self) -> bool {
        self.status() == TRADEABLE_STATUS
    }

    pub fn base_decimal(&self) -> u64 {
        self.base_decimal
    }

    pub fn quote_decimal(&self) -> u64 {
        self.quote_decimal
    }

    /// Montant base dû au protocole, encore présent dans le vault.
    pub fn base_need_take_pnl(&self) -> u64 {
        self.out_put.base_need_take_pnl
    }

    pub fn quote_need_take_pnl(&self) -> u64 {
        self.out_put.quote_need_take_pnl
    }

    pub fn vaults(&self) -> (Pubkey, Pubkey) {
        (self.base_vault, self.quote_vault)
    }

    pub fn mints(&self) -> (Pubkey, Pubkey) {
        (self.base_mint, self.quote_mint)
    }
}

/// Décode les données brutes d'un compte de pool AMM V4.
pub fn decode_pool(data: &[u8]) -> Result<PoolRecord, PoolSyncError> {
    if data.len() != POOL_RECORD_SPAN {
        return Err(PoolSyncError::MalformedAccountData(format!(
            "AMM V4 : {} octets reçus, {} attendus",
            data.len(),
            POOL_RECORD_SPAN
        )));
    }
    bytemuck::try_pod_read_unaligned::<PoolRecord>(data)
        .map_err(|e| PoolSyncError::MalformedAccountData(format!("AMM V4 : {:?}", e)))
}

/// Ré-encode un `PoolRecord`, toujours sur `POOL_RECORD_SPAN` octets.
pub fn encode_pool(record: &PoolRecord) -> Vec<u8> {
    bytemuck::bytes_of(record).to_vec()
}
