//! 32-byte digests, Keccak-256 hashing and hex helpers shared by the tree,
//! the card payload and the consolidation message.

use sha3::{Digest, Keccak256};

/// Fixed-width digest used for tree nodes, leaves and card payloads.
pub type Digest32 = [u8; 32];

/// All-zero digest; the default leaf and the payload of a freshly minted card.
pub const ZERO_DIGEST: Digest32 = [0u8; 32];

/// Keccak-256 over an arbitrary byte string.
pub fn keccak256(data: &[u8]) -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Keccak-256 over `left || right`; the interior node combiner of the tree.
pub fn hash_pair(left: &Digest32, right: &Digest32) -> Digest32 {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Encodes a digest as `0x`-prefixed lowercase hex.
pub fn digest_to_hex(digest: &Digest32) -> String {
    format!("0x{}", hex::encode(digest))
}

/// Parses a 32-byte digest from hex, with or without a `0x` prefix.
pub fn digest_from_hex(input: &str) -> Result<Digest32, String> {
    let trimmed = input.trim();
    let raw = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(raw).map_err(|err| format!("invalid digest hex: {err}"))?;
    if bytes.len() != 32 {
        return Err(format!("digest must be 32 bytes, got {}", bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
