#![deny(missing_docs)]

//! # voting_booth
//!
//! A quadratic voting booth whose per-voter state lives in a sparse Merkle
//! tree. Each voter holds a *balance card* whose only payload is the root of
//! a fixed-depth tree; leaf `i` is the voter's signed weight on motion `i`,
//! stored as a 256-bit two's-complement integer scaled by `10^18`.
//!
//! Casting a ballot on a motion means presenting the leaf's Merkle path and
//! the weight currently recorded there. The booth checks the path against the
//! card's root, charges the marginal quadratic cost in voice credits, releases
//! tally tokens to the YES or NO pool, and writes the recomputed root back.
//!
//! * [`merkle`]: sparse tree, default-node table, proofs (full and compact).
//! * [`leaf`]: signed fixed-point leaf codec.
//! * [`ballot`]: quadratic charge and tally rules.
//! * [`booth`]: the state transition and the signature-gated sweep.
//! * [`client`]: the voter-side mirror used to draft ballots.
//!
//! ```rust
//! use voting_booth::{plan_ballot, parse_units, Side};
//!
//! let plan = plan_ballot(&parse_units("2").unwrap(), &parse_units("3").unwrap()).unwrap();
//! assert_eq!(plan.charge, parse_units("5").unwrap().magnitude().clone());
//! assert_eq!(plan.side, Some(Side::Yes));
//! ```

mod address;
pub mod ballot;
pub mod booth;
pub mod cards;
pub mod client;
pub mod config;
pub mod consolidate;
mod digest;
pub mod leaf;
pub mod ledger;
pub mod merkle;

pub use address::Address;
pub use ballot::{plan_ballot, quadratic_cost, BallotError, BallotPlan, Side};
pub use booth::{BallotReceipt, BallotRequest, BoothError, Collaborators, VotingBooth};
pub use cards::{BalanceCards, CardError, CardId, CardRecord, CardRegistry};
pub use client::{CardWallet, WalletError};
pub use config::{BoothConfig, ConfigError};
pub use consolidate::{
    address_of, consolidation_message, recover_signer, sign_consolidation, ConsolidationError,
    SweepSignature,
};
pub use digest::{digest_from_hex, digest_to_hex, keccak256, Digest32, ZERO_DIGEST};
pub use leaf::{decode_leaf, encode_leaf, format_units, parse_units, LeafError};
pub use ledger::{LedgerError, MemoryLedger, TokenLedger};
pub use merkle::{
    compute_root, root_from_proof, verify_and_compute_new_root, CompactProof, DefaultHashes,
    MerkleError, MerkleProof, SparseMerkleTree, DEFAULT_DEPTH,
};
