// src/data_pipeline/mod.rs

// Abonnement WebSocket -> listener (invalidation) -> file -> workers (revalidation).
pub mod discovery;
pub mod listener;
pub mod revalidation;
pub mod subscription;

pub use listener::{DiscardReason, IngestOutcome, IngestionListener};
pub use revalidation::{RevalidationOutcome, RevalidationWorker, WorkerPool};
pub use subscription::{stream_program_accounts, AccountNotification};
