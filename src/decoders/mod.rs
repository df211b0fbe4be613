// src/decoders/mod.rs

// Les layouts binaires : le pool Raydium AMM V4 et les comptes de jetons (vaults).
pub mod raydium;
pub mod spl_token_decoders;

pub use raydium::amm_v4::{decode_pool, encode_pool, PoolRecord};
pub use spl_token_decoders::account::{decode_account, DecodedSplAccount};
