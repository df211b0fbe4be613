// src/lib.rs

// On déclare tous nos modules principaux pour les rendre publics et
// utilisables par le binaire (pooldb_updater) et les tests d'intégration.
pub mod config;
pub mod data_pipeline;
pub mod decoders;
pub mod error;
pub mod math;
pub mod monitoring;
pub mod rpc;
pub mod state;
pub mod store;
