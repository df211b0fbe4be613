// DANS : src/error.rs

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Côté d'un pool (base = coin, quote = pc dans le vocabulaire Raydium).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSide {
    Base,
    Quote,
}

impl std::fmt::Display for PoolSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolSide::Base => write!(f, "base"),
            PoolSide::Quote => write!(f, "quote"),
        }
    }
}

/// Erreurs de la synchronisation d'un pool.
///
/// Toutes les variantes sauf `StoreUnavailable` sont limitées à un seul
/// événement / item de la file : on log, on abandonne, on passe au suivant.
#[derive(Error, Debug)]
pub enum PoolSyncError {
    #[error("Données de compte malformées : {0}")]
    MalformedAccountData(String),

    #[error("Réserve {side} négative : solde du vault {balance} < montant dû au protocole {pending}")]
    NegativeReserve {
        side: PoolSide,
        balance: u128,
        pending: u128,
    },

    #[error("Division par zéro : la réserve base est nulle")]
    DivisionByZero,

    #[error("Valeur hors du domaine décimal : {0}")]
    PriceOutOfRange(String),

    #[error("Compte auxiliaire {address} indisponible : {reason}")]
    MissingAuxiliaryAccount { address: Pubkey, reason: String },

    /// Erreur du store pendant le traitement d'un item. Fatale seulement si
    /// le store est injoignable (voir `StoreError::is_unavailable`).
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl PoolSyncError {
    /// Seule une perte du document store doit arrêter un composant.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolSyncError::StoreUnavailable(e) if e.is_unavailable())
    }

    /// Libellé court pour les métriques.
    pub fn label(&self) -> &'static str {
        match self {
            PoolSyncError::MalformedAccountData(_) => "malformed_account_data",
            PoolSyncError::NegativeReserve { .. } => "negative_reserve",
            PoolSyncError::DivisionByZero => "division_by_zero",
            PoolSyncError::PriceOutOfRange(_) => "price_out_of_range",
            PoolSyncError::MissingAuxiliaryAccount { .. } => "missing_auxiliary_account",
            PoolSyncError::StoreUnavailable(_) => "store_error",
        }
    }
}

/// Erreurs du document store / de la file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connexion au document store impossible : {0}")]
    Connection(String),

    #[error("Commande refusée par le document store : {0}")]
    Command(String),

    #[error("Erreur de sérialisation du document : {0}")]
    Serialization(String),
}

impl StoreError {
    /// Le store est injoignable. Une commande refusée sur une clé précise
    /// (mauvais type, document corrompu) reste un problème local à l'item.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_an_unreachable_store_is_fatal() {
        assert!(PoolSyncError::from(StoreError::Connection("refusée".into())).is_fatal());
        assert!(!PoolSyncError::from(StoreError::Command("WRONGTYPE".into())).is_fatal());
        assert!(!PoolSyncError::DivisionByZero.is_fatal());
        assert!(!PoolSyncError::NegativeReserve { side: PoolSide::Base, balance: 1, pending: 2 }.is_fatal());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(PoolSyncError::DivisionByZero.label(), "division_by_zero");
        assert_eq!(
            PoolSyncError::MissingAuxiliaryAccount { address: Pubkey::default(), reason: String::new() }.label(),
            "missing_auxiliary_account"
        );
    }
}
