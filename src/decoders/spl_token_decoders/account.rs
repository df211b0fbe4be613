use crate::error::PoolSyncError;
use solana_sdk::pubkey::Pubkey;

/// Taille d'un compte de jeton SPL.
pub const SPL_TOKEN_ACCOUNT_LEN: usize = 165;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSplAccount {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

/// Décode les données brutes d'un compte de jeton SPL (un vault de pool).
/// Layout : mint [0..32], owner [32..64], amount [64..72], little-endian.
pub fn decode_account(data: &[u8]) -> Result<DecodedSplAccount, PoolSyncError> {
    if data.len() < SPL_TOKEN_ACCOUNT_LEN {
        return Err(PoolSyncError::MalformedAccountData(format!(
            "compte SPL : {} octets, au moins {} attendus",
            data.len(),
            SPL_TOKEN_ACCOUNT_LEN
        )));
    }
    let read_key = |range: std::ops::Range<usize>| -> Result<Pubkey, PoolSyncError> {
        let bytes: [u8; 32] = data[range]
            .try_into()
            .map_err(|_| PoolSyncError::MalformedAccountData("compte SPL : adresse tronquée".to_string()))?;
        Ok(Pubkey::new_from_array(bytes))
    };
    let amount_bytes: [u8; 8] = data[64..72]
        .try_into()
        .map_err(|_| PoolSyncError::MalformedAccountData("compte SPL : montant tronqué".to_string()))?;

    Ok(DecodedSplAccount {
        mint: read_key(0..32)?,
        owner: read_key(32..64)?,
        amount: u64::from_le_bytes(amount_bytes),
    })
}
