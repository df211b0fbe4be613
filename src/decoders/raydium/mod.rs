// Seul le programme AMM V4 est suivi par le pipeline.
pub mod amm_v4;
