//! Voter-side mirror of a balance card's tree.
//!
//! The booth only ever sees a card's root, so the voter keeps the populated
//! leaves locally to draft proofs and follows each committed receipt.

use num_bigint::BigInt;
use thiserror::Error;

use crate::booth::{BallotReceipt, BallotRequest};
use crate::cards::CardId;
use crate::digest::{digest_to_hex, Digest32};
use crate::leaf::{decode_leaf, encode_leaf, LeafError};
use crate::merkle::{MerkleError, SparseMerkleTree};

/// Wallet bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// Tree failure.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// Weight outside the leaf range.
    #[error(transparent)]
    Leaf(#[from] LeafError),
    /// Receipt belongs to another card.
    #[error("receipt for card {actual} applied to wallet of card {expected}")]
    WrongCard {
        /// Wallet card.
        expected: CardId,
        /// Receipt card.
        actual: CardId,
    },
    /// Local tree disagrees with the booth.
    #[error("local root {local} diverges from committed root {committed}")]
    RootDivergence {
        /// Root after applying the receipt locally.
        local: String,
        /// Root written by the booth.
        committed: String,
    },
}

/// Local copy of one card's per-motion weights.
#[derive(Debug, Clone)]
pub struct CardWallet {
    card_id: CardId,
    tree: SparseMerkleTree,
}

impl CardWallet {
    /// Wallet for a freshly minted card.
    pub fn new(card_id: CardId, depth: usize) -> Result<Self, WalletError> {
        Ok(Self {
            card_id,
            tree: SparseMerkleTree::new(depth)?,
        })
    }

    /// Wallet restored from known `(motion, weight)` pairs.
    pub fn from_weights<I>(card_id: CardId, depth: usize, weights: I) -> Result<Self, WalletError>
    where
        I: IntoIterator<Item = (u64, BigInt)>,
    {
        let mut wallet = Self::new(card_id, depth)?;
        for (motion, weight) in weights {
            wallet.tree.insert(motion, encode_leaf(&weight)?)?;
        }
        Ok(wallet)
    }

    /// Card this wallet mirrors.
    pub fn card_id(&self) -> CardId {
        self.card_id
    }

    /// Root the card should currently carry.
    pub fn root(&self) -> Digest32 {
        self.tree.root()
    }

    /// Underlying tree.
    pub fn tree(&self) -> &SparseMerkleTree {
        &self.tree
    }

    /// Weight recorded for `motion`.
    pub fn weight(&self, motion: u64) -> Result<BigInt, WalletError> {
        Ok(decode_leaf(&self.tree.get(motion)?))
    }

    /// Request moving the weight on `motion` to `next`.
    pub fn draft(&self, motion: u64, next: BigInt) -> Result<BallotRequest, WalletError> {
        Ok(BallotRequest {
            card_id: self.card_id,
            proof: self.tree.create_proof(motion)?,
            previous: self.weight(motion)?,
            next,
        })
    }

    /// Follows a committed ballot; the local root must match the booth's.
    pub fn apply(&mut self, receipt: &BallotReceipt) -> Result<(), WalletError> {
        if receipt.card_id != self.card_id {
            return Err(WalletError::WrongCard {
                expected: self.card_id,
                actual: receipt.card_id,
            });
        }
        let mut updated = self.tree.clone();
        updated.insert(receipt.motion_id, encode_leaf(&receipt.plan.next)?)?;
        let local = updated.root();
        if local != receipt.new_root {
            return Err(WalletError::RootDivergence {
                local: digest_to_hex(&local),
                committed: digest_to_hex(&receipt.new_root),
            });
        }
        self.tree = updated;
        Ok(())
    }
}
