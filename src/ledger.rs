//! Fungible-token ledgers for voice credits and tally tokens.
//!
//! The booth only needs balance queries, allowances and the two transfer
//! primitives, so that is all [`TokenLedger`] exposes. [`MemoryLedger`] is the
//! in-process implementation used by the CLI and the tests.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use thiserror::Error;

use crate::address::Address;

/// Failures surfaced by a token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Sender balance is below the transfer amount.
    #[error("insufficient balance for {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        /// Debited account.
        account: Address,
        /// Transfer amount.
        needed: BigUint,
        /// Balance at the time of the transfer.
        available: BigUint,
    },
    /// Spender allowance is below the transfer amount.
    #[error("insufficient allowance for {spender} on {owner}: needed {needed}, available {available}")]
    InsufficientAllowance {
        /// Account whose tokens are pulled.
        owner: Address,
        /// Account pulling the tokens.
        spender: Address,
        /// Transfer amount.
        needed: BigUint,
        /// Remaining allowance.
        available: BigUint,
    },
    /// Persistence failure.
    #[error("ledger I/O error: {0}")]
    Io(String),
}

/// Minimal fungible-token surface the booth settles against.
pub trait TokenLedger {
    /// Balance held by `owner`.
    fn balance_of(&self, owner: &Address) -> BigUint;

    /// Amount `spender` may still pull from `owner`.
    fn allowance(&self, owner: &Address, spender: &Address) -> BigUint;

    /// Sets the amount `spender` may pull from `owner`.
    fn approve(&mut self, owner: &Address, spender: &Address, amount: BigUint);

    /// Moves `amount` from `from` to `to`.
    fn transfer(&mut self, from: &Address, to: &Address, amount: &BigUint)
        -> Result<(), LedgerError>;

    /// Moves `amount` from `from` to `to` on behalf of `spender`, consuming allowance.
    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &BigUint,
    ) -> Result<(), LedgerError>;
}

/// Ledger held in memory and persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    /// Display symbol (`VOICE`, `VOTE`).
    pub symbol: String,
    balances: BTreeMap<Address, BigUint>,
    allowances: BTreeMap<Address, BTreeMap<Address, BigUint>>,
}

impl MemoryLedger {
    /// Empty ledger with the given symbol.
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    /// Load from JSON; missing file -> empty ledger.
    pub fn load(path: &Path, symbol: &str) -> Result<Self, LedgerError> {
        if !path.exists() {
            return Ok(Self::new(symbol));
        }
        let bytes = fs::read(path).map_err(|e| LedgerError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Io(e.to_string()))
    }

    /// Persist to JSON.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LedgerError::Io(e.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| LedgerError::Io(e.to_string()))?;
        fs::write(path, data).map_err(|e| LedgerError::Io(e.to_string()))
    }

    /// Creates `amount` new tokens owned by `to`.
    pub fn mint(&mut self, to: &Address, amount: BigUint) {
        let balance = self.balances.entry(*to).or_default();
        *balance += amount;
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> BigUint {
        self.balances.values().sum()
    }

    fn debit(&mut self, account: &Address, amount: &BigUint) -> Result<(), LedgerError> {
        let available = self.balance_of(account);
        if &available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *account,
                needed: amount.clone(),
                available,
            });
        }
        let remaining = available - amount;
        if remaining.is_zero() {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, remaining);
        }
        Ok(())
    }
}

impl TokenLedger for MemoryLedger {
    fn balance_of(&self, owner: &Address) -> BigUint {
        self.balances.get(owner).cloned().unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> BigUint {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .cloned()
            .unwrap_or_default()
    }

    fn approve(&mut self, owner: &Address, spender: &Address, amount: BigUint) {
        let spenders = self.allowances.entry(*owner).or_default();
        if amount.is_zero() {
            spenders.remove(spender);
        } else {
            spenders.insert(*spender, amount);
        }
    }

    fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &BigUint,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.mint(to, amount.clone());
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &BigUint,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.balance_of(from);
        if &available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                needed: amount.clone(),
                available,
            });
        }
        let allowed = self.allowance(from, spender);
        if &allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                needed: amount.clone(),
                available: allowed,
            });
        }
        self.transfer(from, to, amount)?;
        self.approve(from, spender, allowed - amount);
        Ok(())
    }
}
