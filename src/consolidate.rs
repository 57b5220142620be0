//! Signature checks for sweeping a booth's residual balances.
//!
//! The consolidator signs the booth address right-aligned in a 32-byte word,
//! treated directly as the ECDSA prehash. Recovery yields the signer's
//! secp256k1 key, whose Keccak-derived 20-byte address is compared with the
//! configured consolidator.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;

use crate::address::Address;
use crate::digest::keccak256;

/// Signature malformation or recovery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsolidationError {
    /// `v` is not 0, 1, 27 or 28.
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    /// `r`/`s` do not form a valid signature.
    #[error("invalid signature scalars: {0}")]
    InvalidScalars(String),
    /// Public key recovery failed.
    #[error("signature recovery failed: {0}")]
    Recovery(String),
    /// Recovered key has an unexpected encoding.
    #[error("unexpected recovered public key format")]
    KeyFormat,
}

/// Ethereum-style `(v, r, s)` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSignature {
    /// Recovery id, either raw (0/1) or offset by 27.
    pub v: u8,
    /// Big-endian `r` scalar.
    pub r: [u8; 32],
    /// Big-endian `s` scalar.
    pub s: [u8; 32],
}

/// Message a consolidator signs for `booth`.
pub fn consolidation_message(booth: &Address) -> [u8; 32] {
    booth.to_word()
}

/// Address controlled by `key`: the last 20 bytes of the Keccak-256 of the
/// uncompressed public point without its tag byte.
pub fn address_of(key: &VerifyingKey) -> Result<Address, ConsolidationError> {
    let point = key.to_encoded_point(false);
    let bytes = point.as_bytes();
    if bytes.len() != 65 || bytes[0] != 0x04 {
        return Err(ConsolidationError::KeyFormat);
    }
    Ok(Address::from_word(&keccak256(&bytes[1..])))
}

/// Recovers the address that produced `signature` over `message`.
pub fn recover_signer(
    message: &[u8; 32],
    signature: &SweepSignature,
) -> Result<Address, ConsolidationError> {
    let parity = match signature.v {
        0 | 1 => signature.v,
        27 | 28 => signature.v - 27,
        other => return Err(ConsolidationError::InvalidRecoveryId(other)),
    };
    let sig = Signature::from_scalars(signature.r, signature.s)
        .map_err(|err| ConsolidationError::InvalidScalars(err.to_string()))?;
    // a high-S signature recovers through its low-S twin with the opposite y parity
    let (sig, parity) = match sig.normalize_s() {
        Some(low) => (low, parity ^ 1),
        None => (sig, parity),
    };
    let recid =
        RecoveryId::from_byte(parity).ok_or(ConsolidationError::InvalidRecoveryId(signature.v))?;
    let key = VerifyingKey::recover_from_prehash(message, &sig, recid)
        .map_err(|err| ConsolidationError::Recovery(err.to_string()))?;
    address_of(&key)
}

/// Produces the signature a consolidator submits to sweep `booth`.
pub fn sign_consolidation(
    key: &SigningKey,
    booth: &Address,
) -> Result<SweepSignature, ConsolidationError> {
    let message = consolidation_message(booth);
    let (sig, recid) = key
        .sign_prehash_recoverable(&message)
        .map_err(|err| ConsolidationError::Recovery(err.to_string()))?;
    let bytes = sig.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Ok(SweepSignature {
        v: recid.to_byte() + 27,
        r,
        s,
    })
}
