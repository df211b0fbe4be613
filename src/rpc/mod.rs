// DANS : src/rpc/mod.rs

pub mod resilient_client;

pub use resilient_client::ResilientRpcClient;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::{account::Account, pubkey::Pubkey};

/// Lecture groupée de comptes. Le résultat a la même longueur et le même ordre
/// que `addresses` ; `Err` signifie un échec total de l'appel.
#[async_trait]
pub trait AccountFetcher: Send + Sync {
    async fn fetch_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;
}

#[async_trait]
impl AccountFetcher for ResilientRpcClient {
    async fn fetch_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        self.get_multiple_accounts(addresses).await
    }
}
