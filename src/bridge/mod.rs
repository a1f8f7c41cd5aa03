//! Bridge accounting for a single ledger instance.
//!
//! Each remote chain gets a [`BridgePosition`]. Sending value out locks it in
//! escrow (or burns representation that previously came in from that
//! chain); receiving value releases escrow first and mints representation
//! for the remainder. The controller only ever touches the instance it
//! belongs to: moving value between two instances is two calls sequenced by
//! the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::LedgerError,
    ledger::{book::AccountBook, serde_amount, Address, Amount, ChainId},
};

/// Net position of this ledger against one remote chain.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgePosition {
    /// Tokens locked here while represented on the remote chain.
    #[serde(with = "serde_amount")]
    pub escrowed: Amount,
    /// Representation minted here for tokens locked on the remote chain.
    #[serde(with = "serde_amount")]
    pub minted: Amount,
}

impl BridgePosition {
    fn is_empty(&self) -> bool {
        self.escrowed == 0 && self.minted == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound { to: ChainId },
    Inbound { from: ChainId },
}

/// How a bridge amount was split between escrow and supply changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeSettlement {
    /// Outbound: moved into escrow. Inbound: released from escrow.
    pub escrow: Amount,
    /// Outbound: representation burned. Inbound: representation minted.
    pub supply: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeController {
    local: ChainId,
    positions: BTreeMap<ChainId, BridgePosition>,
}

impl BridgeController {
    pub fn new(local: ChainId) -> Self {
        Self {
            local,
            positions: BTreeMap::new(),
        }
    }

    pub(crate) fn from_positions(
        local: ChainId,
        positions: BTreeMap<ChainId, BridgePosition>,
    ) -> Self {
        let positions = positions
            .into_iter()
            .filter(|(_, position)| !position.is_empty())
            .collect();
        Self { local, positions }
    }

    pub fn chain_id(&self) -> ChainId {
        self.local
    }

    pub fn position(&self, remote: ChainId) -> BridgePosition {
        self.positions.get(&remote).copied().unwrap_or_default()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&ChainId, &BridgePosition)> {
        self.positions.iter()
    }

    /// Total tokens held in escrow across all remote chains.
    pub fn escrowed(&self) -> Option<Amount> {
        self.positions
            .values()
            .try_fold(0u128, |acc, position| acc.checked_add(position.escrowed))
    }

    /// Classifies a route relative to this chain.
    pub fn route(&self, from: ChainId, to: ChainId) -> Result<Direction, LedgerError> {
        if from == to {
            return Err(LedgerError::InvalidRoute { from, to });
        }
        if from == self.local {
            Ok(Direction::Outbound { to })
        } else if to == self.local {
            Ok(Direction::Inbound { from })
        } else {
            Err(LedgerError::WrongChain {
                local: self.local,
                from,
                to,
            })
        }
    }

    /// Debits `account` and parks the amount against `to`, burning
    /// representation minted from `to` before locking anything in escrow.
    pub fn send(
        &mut self,
        book: &mut AccountBook,
        total_supply: &mut Amount,
        account: &Address,
        amount: Amount,
        to: ChainId,
    ) -> Result<BridgeSettlement, LedgerError> {
        let mut position = self.position(to);
        let burned = position.minted.min(amount);
        let locked = amount - burned;
        let escrowed = position
            .escrowed
            .checked_add(locked)
            .ok_or(LedgerError::InvalidAmount("escrow overflow"))?;
        let supply = total_supply
            .checked_sub(burned)
            .ok_or(LedgerError::InvalidAmount("supply underflow"))?;

        book.debit(account, amount)?;

        position.minted -= burned;
        position.escrowed = escrowed;
        self.store(to, position);
        *total_supply = supply;
        debug!(chain = self.local, to, %account, amount, burned, locked, "bridged out");
        Ok(BridgeSettlement {
            escrow: locked,
            supply: burned,
        })
    }

    /// Credits `account` with value arriving from `from`, releasing escrow
    /// locked toward `from` before minting representation.
    pub fn receive(
        &mut self,
        book: &mut AccountBook,
        total_supply: &mut Amount,
        account: &Address,
        amount: Amount,
        from: ChainId,
    ) -> Result<BridgeSettlement, LedgerError> {
        let mut position = self.position(from);
        let released = position.escrowed.min(amount);
        let minted = amount - released;
        let representation = position
            .minted
            .checked_add(minted)
            .ok_or(LedgerError::InvalidAmount("representation overflow"))?;
        let supply = total_supply
            .checked_add(minted)
            .ok_or(LedgerError::InvalidAmount("supply overflow"))?;

        book.credit(account, amount)?;

        position.escrowed -= released;
        position.minted = representation;
        self.store(from, position);
        *total_supply = supply;
        debug!(chain = self.local, from, %account, amount, released, minted, "bridged in");
        Ok(BridgeSettlement {
            escrow: released,
            supply: minted,
        })
    }

    fn store(&mut self, remote: ChainId, position: BridgePosition) {
        if position.is_empty() {
            self.positions.remove(&remote);
        } else {
            self.positions.insert(remote, position);
        }
    }
}
