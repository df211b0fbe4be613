pub mod pool;

pub use pool::{
    decode_pool, encode_pool, PoolRecord, POOL_RECORD_SPAN, RAYDIUM_AMM_V4_PROGRAM_ID, TRADEABLE_STATUS,
};
