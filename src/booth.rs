//! The voting booth: proof-checked ballot casting and signature-gated sweeps.
//!
//! A booth serves one motion. Casting a ballot authenticates the voter's
//! claimed previous weight against the root stored on their balance card,
//! settles the quadratic charge and tally release, and writes the new root
//! back to the card. Settlement runs against a staged copy of the
//! collaborators, which replaces the live state only when every step succeeded.

use log::{debug, info, warn};
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use thiserror::Error;

use crate::address::Address;
use crate::ballot::{plan_ballot, BallotError, BallotPlan, Side};
use crate::cards::{BalanceCards, CardError, CardId};
use crate::config::{BoothConfig, ConfigError};
use crate::consolidate::{consolidation_message, recover_signer, ConsolidationError, SweepSignature};
use crate::digest::{digest_to_hex, Digest32, ZERO_DIGEST};
use crate::leaf::{encode_leaf, format_units, LeafError};
use crate::ledger::{LedgerError, TokenLedger};
use crate::merkle::{
    verify_and_compute_new_root, CompactProof, DefaultHashes, MerkleError, MerkleProof,
};

/// Reasons a cast or sweep is refused. None of them leave partial effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoothError {
    /// The claimed previous weight and proof do not reproduce the card root.
    #[error("stale proof for card {card}: does not reproduce root {root}")]
    StaleProof {
        /// Card whose root was checked.
        card: CardId,
        /// Root on record, hex encoded.
        root: String,
    },
    /// Proof does not carry one sibling per tree level.
    #[error("proof carries {actual} siblings, expected {expected}")]
    ProofLengthMismatch {
        /// Tree depth.
        expected: usize,
        /// Siblings supplied.
        actual: usize,
    },
    /// Motion index does not fit the tree.
    #[error("leaf index {index} outside a depth-{depth} tree")]
    IndexOutOfRange {
        /// Offending index.
        index: u64,
        /// Tree depth.
        depth: usize,
    },
    /// Any other tree failure (depth, compact proof decoding).
    #[error(transparent)]
    Merkle(MerkleError),
    /// Weight outside the signed 256-bit range.
    #[error(transparent)]
    Leaf(#[from] LeafError),
    /// Transition rejected by the ballot rules.
    #[error(transparent)]
    Ballot(#[from] BallotError),
    /// Voter cannot cover the charge.
    #[error("insufficient voice credits for {voter}: needed {needed}, available {available}")]
    InsufficientVoiceCredits {
        /// Card owner.
        voter: Address,
        /// Charge.
        needed: BigUint,
        /// Voter balance.
        available: BigUint,
    },
    /// Voter has not allowed the booth to pull the charge.
    #[error("booth allowance from {voter} too low: needed {needed}, available {available}")]
    InsufficientAllowance {
        /// Card owner.
        voter: Address,
        /// Charge.
        needed: BigUint,
        /// Remaining allowance.
        available: BigUint,
    },
    /// Booth holds too few tally tokens to release.
    #[error("tally reserve exhausted: needed {needed}, available {available}")]
    TallyReserveExhausted {
        /// Tally to release.
        needed: BigUint,
        /// Booth balance.
        available: BigUint,
    },
    /// Booth is neither owner nor approved operator of the card.
    #[error("booth is not approved to write card {0}")]
    BoothNotApproved(CardId),
    /// Card registry failure.
    #[error(transparent)]
    Card(#[from] CardError),
    /// Other ledger failure.
    #[error(transparent)]
    Ledger(LedgerError),
    /// Sweep signed by someone other than the consolidator.
    #[error("unauthorised signer {signer}")]
    UnauthorizedSigner {
        /// Recovered address.
        signer: Address,
    },
    /// Sweep signature could not be recovered.
    #[error(transparent)]
    InvalidSignature(#[from] ConsolidationError),
    /// Booth configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<MerkleError> for BoothError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::ProofLengthMismatch { expected, actual } => {
                Self::ProofLengthMismatch { expected, actual }
            }
            MerkleError::IndexOutOfRange { index, depth } => Self::IndexOutOfRange { index, depth },
            other => Self::Merkle(other),
        }
    }
}

/// A voter's request to move their weight on the booth's motion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotRequest {
    /// Card holding the voter's tree root.
    pub card_id: CardId,
    /// Sibling path for the motion's leaf under the card's current root.
    pub proof: MerkleProof,
    /// Weight currently recorded in the leaf (fixed point, 10^18).
    pub previous: BigInt,
    /// Requested weight (fixed point, 10^18).
    pub next: BigInt,
}

/// Committed effects of a cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotReceipt {
    /// Card that was updated.
    pub card_id: CardId,
    /// Card owner charged for the ballot.
    pub voter: Address,
    /// Motion (leaf index) that changed.
    pub motion_id: u64,
    /// Root before the cast.
    pub previous_root: Digest32,
    /// Root written to the card.
    pub new_root: Digest32,
    /// Charge, tally and routing.
    pub plan: BallotPlan,
    /// Pool that received the charge and tally, if any.
    pub pool: Option<Address>,
}

/// External state a booth settles against.
///
/// Each cast stages a full clone of this value, so its cost grows with the
/// number of stored cards and accounts. That is linear in the in-memory
/// stores; a large backend should implement the traits on a cheaply cloned
/// handle with its own transaction.
#[derive(Debug, Clone, Default)]
pub struct Collaborators<C, L> {
    /// Balance-card registry.
    pub cards: C,
    /// Voice-credit ledger.
    pub voice_credits: L,
    /// Tally-token ledger.
    pub votes: L,
}

/// Booth bound to one motion.
#[derive(Debug, Clone)]
pub struct VotingBooth {
    config: BoothConfig,
    defaults: DefaultHashes,
}

impl VotingBooth {
    /// Validates `config` and precomputes the tree's default nodes.
    pub fn new(config: BoothConfig) -> Result<Self, BoothError> {
        config.validate()?;
        let defaults = DefaultHashes::new(config.tree_depth)?;
        Ok(Self { config, defaults })
    }

    /// Deployment configuration.
    pub fn config(&self) -> &BoothConfig {
        &self.config
    }

    /// Default nodes of the card trees.
    pub fn defaults(&self) -> &DefaultHashes {
        &self.defaults
    }

    /// Pool address for `side`.
    pub fn pool(&self, side: Side) -> Address {
        match side {
            Side::Yes => self.config.yes_box,
            Side::No => self.config.no_box,
        }
    }

    /// Root recorded for `card`; a zero payload stands for the empty tree.
    pub fn card_root<C: BalanceCards>(&self, cards: &C, card: CardId) -> Result<Digest32, BoothError> {
        let data = cards.read_data(card)?;
        if data == ZERO_DIGEST {
            return Ok(self.defaults.empty_root());
        }
        Ok(data)
    }

    /// Casts a ballot whose proof arrives in compact wire form.
    pub fn cast_compact_ballot<C, L>(
        &self,
        state: &mut Collaborators<C, L>,
        card_id: CardId,
        compact_proof: &[u8],
        previous: BigInt,
        next: BigInt,
    ) -> Result<BallotReceipt, BoothError>
    where
        C: BalanceCards + Clone,
        L: TokenLedger + Clone,
    {
        let proof = CompactProof::from_bytes(compact_proof)?.expand(&self.defaults)?;
        let request = BallotRequest {
            card_id,
            proof,
            previous,
            next,
        };
        self.cast_ballot(state, &request)
    }

    /// Verifies, settles and records a ballot. Either every effect lands or none does.
    pub fn cast_ballot<C, L>(
        &self,
        state: &mut Collaborators<C, L>,
        request: &BallotRequest,
    ) -> Result<BallotReceipt, BoothError>
    where
        C: BalanceCards + Clone,
        L: TokenLedger + Clone,
    {
        let card = request.card_id;
        let booth = self.config.booth;
        let voter = state.cards.owner_of(card)?;
        if !state.cards.is_authorized(&booth, card)? {
            return Err(BoothError::BoothNotApproved(card));
        }

        let old_leaf = encode_leaf(&request.previous)?;
        let new_leaf = encode_leaf(&request.next)?;
        let previous_root = self.card_root(&state.cards, card)?;
        let new_root = verify_and_compute_new_root(
            self.config.tree_depth,
            self.config.motion_id,
            &request.proof,
            &old_leaf,
            &new_leaf,
            &previous_root,
        )
        .map_err(|err| match err {
            MerkleError::ProofMismatch => {
                warn!(
                    "QSYS|mod=BOOTH|evt=STALE_PROOF|card={card}|motion={}|root={}",
                    self.config.motion_id,
                    digest_to_hex(&previous_root)
                );
                BoothError::StaleProof {
                    card,
                    root: digest_to_hex(&previous_root),
                }
            }
            other => other.into(),
        })?;

        let plan = plan_ballot(&request.previous, &request.next)?;
        let pool = plan.side.map(|side| self.pool(side));
        debug!(
            "QSYS|mod=BOOTH|evt=PLAN|card={card}|prev={}|next={}|charge={}|tally={}",
            format_units(&plan.previous),
            format_units(&plan.next),
            plan.charge,
            plan.tally
        );

        let mut staged = state.clone();
        if let Some(pool) = pool {
            self.settle(&mut staged, &voter, &pool, &plan)?;
        }
        staged.cards.write_data(&booth, card, new_root)?;
        *state = staged;

        info!(
            "QSYS|mod=BOOTH|evt=CAST|card={card}|voter={voter}|motion={}|side={}|charge={}|tally={}|root={}",
            self.config.motion_id,
            plan.side.map(|side| side.to_string()).unwrap_or_else(|| "none".to_string()),
            plan.charge,
            plan.tally,
            digest_to_hex(&new_root)
        );
        Ok(BallotReceipt {
            card_id: card,
            voter,
            motion_id: self.config.motion_id,
            previous_root,
            new_root,
            plan,
            pool,
        })
    }

    fn settle<C, L: TokenLedger>(
        &self,
        staged: &mut Collaborators<C, L>,
        voter: &Address,
        pool: &Address,
        plan: &BallotPlan,
    ) -> Result<(), BoothError> {
        let booth = self.config.booth;
        if !plan.charge.is_zero() {
            staged
                .voice_credits
                .transfer_from(&booth, voter, pool, &plan.charge)
                .map_err(|err| match err {
                    LedgerError::InsufficientBalance {
                        needed, available, ..
                    } => BoothError::InsufficientVoiceCredits {
                        voter: *voter,
                        needed,
                        available,
                    },
                    LedgerError::InsufficientAllowance {
                        needed, available, ..
                    } => BoothError::InsufficientAllowance {
                        voter: *voter,
                        needed,
                        available,
                    },
                    other => BoothError::Ledger(other),
                })?;
        }
        if !plan.tally.is_zero() {
            staged
                .votes
                .transfer(&booth, pool, &plan.tally)
                .map_err(|err| match err {
                    LedgerError::InsufficientBalance {
                        needed, available, ..
                    } => BoothError::TallyReserveExhausted { needed, available },
                    other => BoothError::Ledger(other),
                })?;
        }
        Ok(())
    }

    /// Sweeps the booth's whole balance on `ledger` to the consolidator when
    /// `signature` over the booth address recovers to that consolidator.
    pub fn consolidate<L: TokenLedger>(
        &self,
        ledger: &mut L,
        signature: &SweepSignature,
    ) -> Result<BigUint, BoothError> {
        let booth = self.config.booth;
        let signer = recover_signer(&consolidation_message(&booth), signature)?;
        if signer != self.config.consolidator {
            warn!("QSYS|mod=BOOTH|evt=SWEEP_REJECTED|signer={signer}");
            return Err(BoothError::UnauthorizedSigner { signer });
        }
        let balance = ledger.balance_of(&booth);
        ledger
            .transfer(&booth, &self.config.consolidator, &balance)
            .map_err(BoothError::Ledger)?;
        info!(
            "QSYS|mod=BOOTH|evt=SWEEP|to={}|amount={balance}",
            self.config.consolidator
        );
        Ok(balance)
    }
}
