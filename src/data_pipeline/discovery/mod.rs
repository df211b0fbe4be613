// src/data_pipeline/discovery/mod.rs

// Sources externes interrogées pour la population initiale des pools.
pub mod raydium;
