//! Balance cards: transferable tokens carrying one 32-byte payload each.
//!
//! The payload is the root of the holder's ballot tree. Only the owner or the
//! single approved operator may rewrite it.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use thiserror::Error;

use crate::address::Address;
use crate::digest::{Digest32, ZERO_DIGEST};

/// Card identifier.
pub type CardId = u64;

/// Failures surfaced by the card registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    /// No card with this id exists.
    #[error("unknown card {0}")]
    UnknownCard(CardId),
    /// A card with this id already exists.
    #[error("card {0} already minted")]
    AlreadyMinted(CardId),
    /// Caller is neither the owner nor the approved operator.
    #[error("{caller} is not authorised for card {card}")]
    NotAuthorized {
        /// Card being accessed.
        card: CardId,
        /// Rejected caller.
        caller: Address,
    },
    /// Persistence failure.
    #[error("card registry I/O error: {0}")]
    Io(String),
}

/// Card operations the booth relies on.
pub trait BalanceCards {
    /// Current holder of `card`.
    fn owner_of(&self, card: CardId) -> Result<Address, CardError>;

    /// Operator currently approved for `card`, if any.
    fn approved(&self, card: CardId) -> Result<Option<Address>, CardError>;

    /// Current payload of `card`.
    fn read_data(&self, card: CardId) -> Result<Digest32, CardError>;

    /// Replaces the payload; `caller` must be the owner or approved operator.
    fn write_data(&mut self, caller: &Address, card: CardId, data: Digest32)
        -> Result<(), CardError>;

    /// `true` when `caller` may write the payload of `card`.
    fn is_authorized(&self, caller: &Address, card: CardId) -> Result<bool, CardError> {
        let owner = self.owner_of(card)?;
        Ok(&owner == caller || self.approved(card)?.as_ref() == Some(caller))
    }
}

/// Stored state of one card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRecord {
    /// Holder.
    pub owner: Address,
    /// Approved operator, cleared on transfer.
    pub approved: Option<Address>,
    /// Tree root payload.
    pub data: Digest32,
}

/// In-memory card registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CardRegistry {
    cards: BTreeMap<CardId, CardRecord>,
}

impl CardRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON; missing file -> empty registry.
    pub fn load(path: &Path) -> Result<Self, CardError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| CardError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CardError::Io(e.to_string()))
    }

    /// Persist to JSON.
    pub fn save(&self, path: &Path) -> Result<(), CardError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CardError::Io(e.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| CardError::Io(e.to_string()))?;
        fs::write(path, data).map_err(|e| CardError::Io(e.to_string()))
    }

    /// Issues `card` to `owner` with an all-zero payload.
    pub fn mint(&mut self, owner: &Address, card: CardId) -> Result<(), CardError> {
        if self.cards.contains_key(&card) {
            return Err(CardError::AlreadyMinted(card));
        }
        self.cards.insert(
            card,
            CardRecord {
                owner: *owner,
                approved: None,
                data: ZERO_DIGEST,
            },
        );
        Ok(())
    }

    /// Approves `operator` for `card`; only the owner may do so.
    pub fn approve(
        &mut self,
        caller: &Address,
        operator: &Address,
        card: CardId,
    ) -> Result<(), CardError> {
        let record = self.record_mut(card)?;
        if &record.owner != caller {
            return Err(CardError::NotAuthorized {
                card,
                caller: *caller,
            });
        }
        record.approved = Some(*operator);
        Ok(())
    }

    /// Moves `card` to `to`; the payload travels with it and approval is cleared.
    pub fn transfer(&mut self, caller: &Address, to: &Address, card: CardId) -> Result<(), CardError> {
        if !self.is_authorized(caller, card)? {
            return Err(CardError::NotAuthorized {
                card,
                caller: *caller,
            });
        }
        let record = self.record_mut(card)?;
        record.owner = *to;
        record.approved = None;
        Ok(())
    }

    /// Full record of `card`.
    pub fn record(&self, card: CardId) -> Result<&CardRecord, CardError> {
        self.cards.get(&card).ok_or(CardError::UnknownCard(card))
    }

    fn record_mut(&mut self, card: CardId) -> Result<&mut CardRecord, CardError> {
        self.cards.get_mut(&card).ok_or(CardError::UnknownCard(card))
    }
}

impl BalanceCards for CardRegistry {
    fn owner_of(&self, card: CardId) -> Result<Address, CardError> {
        Ok(self.record(card)?.owner)
    }

    fn approved(&self, card: CardId) -> Result<Option<Address>, CardError> {
        Ok(self.record(card)?.approved)
    }

    fn read_data(&self, card: CardId) -> Result<Digest32, CardError> {
        Ok(self.record(card)?.data)
    }

    fn write_data(
        &mut self,
        caller: &Address,
        card: CardId,
        data: Digest32,
    ) -> Result<(), CardError> {
        if !self.is_authorized(caller, card)? {
            return Err(CardError::NotAuthorized {
                card,
                caller: *caller,
            });
        }
        self.record_mut(card)?.data = data;
        Ok(())
    }
}
