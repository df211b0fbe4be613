// DANS : src/state/mod.rs

pub mod pool_document;

pub use pool_document::PoolDocument;
