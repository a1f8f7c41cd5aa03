use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    bridge::{BridgeController, BridgePosition, Direction},
    error::LedgerError,
};

pub mod book;
pub mod snapshot;

use book::AccountBook;

pub type Amount = u128;
pub type ChainId = u64;

/// Opaque 20-byte account identity, printed as `0x`-prefixed hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Reserved address: never receives tokens, shows up as the sender of mints.
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derives an address from public key material: the last 20 bytes of its
    /// SHA-256 digest.
    pub fn derive(public_key: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(public_key).into();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AddressParseError {
    #[error("address must be 20 bytes (40 hex chars), got {0} bytes")]
    Length(usize),
    #[error("invalid address hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s)?;
        let bytes: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// Amounts travel as decimal strings so no consumer has to fit them in a
/// 64-bit integer; plain integers are still accepted on input.
pub mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Str(String),
    }

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Int(value) => Ok(value as Amount),
            Repr::Str(s) => s.trim().replace('_', "").parse().map_err(D::Error::custom),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMeta {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Mints are transfers from [`Address::ZERO`].
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
    },
    /// `burned + escrowed == amount`.
    BridgeOut {
        account: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
        to_chain: ChainId,
        #[serde(with = "serde_amount")]
        burned: Amount,
        #[serde(with = "serde_amount")]
        escrowed: Amount,
    },
    /// `released + minted == amount`.
    BridgeIn {
        account: Address,
        #[serde(with = "serde_amount")]
        amount: Amount,
        from_chain: ChainId,
        #[serde(with = "serde_amount")]
        released: Amount,
        #[serde(with = "serde_amount")]
        minted: Amount,
    },
    OwnershipTransferred {
        previous: Address,
        new: Address,
    },
}

impl LedgerEvent {
    /// Chains this event onto `previous`.
    pub fn chain_hash(&self, previous: Option<&[u8; 32]>) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"event");
        if let Some(previous) = previous {
            hasher.update(previous);
        }
        match self {
            LedgerEvent::Transfer { from, to, amount } => {
                hasher.update(b"transfer");
                hasher.update(from.as_bytes());
                hasher.update(to.as_bytes());
                hasher.update(amount.to_le_bytes());
            }
            LedgerEvent::Approval {
                owner,
                spender,
                amount,
            } => {
                hasher.update(b"approval");
                hasher.update(owner.as_bytes());
                hasher.update(spender.as_bytes());
                hasher.update(amount.to_le_bytes());
            }
            LedgerEvent::BridgeOut {
                account,
                amount,
                to_chain,
                burned,
                escrowed,
            } => {
                hasher.update(b"bridge_out");
                hasher.update(account.as_bytes());
                hasher.update(amount.to_le_bytes());
                hasher.update(to_chain.to_le_bytes());
                hasher.update(burned.to_le_bytes());
                hasher.update(escrowed.to_le_bytes());
            }
            LedgerEvent::BridgeIn {
                account,
                amount,
                from_chain,
                released,
                minted,
            } => {
                hasher.update(b"bridge_in");
                hasher.update(account.as_bytes());
                hasher.update(amount.to_le_bytes());
                hasher.update(from_chain.to_le_bytes());
                hasher.update(released.to_le_bytes());
                hasher.update(minted.to_le_bytes());
            }
            LedgerEvent::OwnershipTransferred { previous, new } => {
                hasher.update(b"ownership");
                hasher.update(previous.as_bytes());
                hasher.update(new.as_bytes());
            }
        }
        hasher.finalize().into()
    }
}

/// Position of the ledger in its own history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Number of successfully applied mutations.
    pub height: u64,
    #[serde(with = "snapshot::serde_hash_opt")]
    pub last_event_hash: Option<[u8; 32]>,
}

/// One deployed token: metadata, balances, allowances, supply, owner and the
/// bridge positions of the chain it lives on.
#[derive(Clone, Debug)]
pub struct TokenLedger {
    meta: TokenMeta,
    owner: Address,
    total_supply: Amount,
    book: AccountBook,
    bridge: BridgeController,
    history: SnapshotMetadata,
    /// Full history, carried in every snapshot. It grows with each applied
    /// mutation; `history` alone is enough to verify the chain head.
    events: Vec<LedgerEvent>,
}

impl TokenLedger {
    /// Deploys a ledger on `chain_id`, minting `initial_supply` to `owner`.
    pub fn new(
        meta: TokenMeta,
        owner: Address,
        chain_id: ChainId,
        initial_supply: Amount,
    ) -> Result<Self, LedgerError> {
        if owner.is_zero() {
            return Err(LedgerError::InvalidReceiver(owner));
        }
        let mut ledger = Self {
            meta,
            owner,
            total_supply: 0,
            book: AccountBook::new(),
            bridge: BridgeController::new(chain_id),
            history: SnapshotMetadata::default(),
            events: Vec::new(),
        };
        if initial_supply > 0 {
            ledger.mint_unchecked(&owner, initial_supply)?;
        }
        info!(
            chain = chain_id,
            %owner,
            symbol = %ledger.meta.symbol,
            supply = initial_supply,
            "token ledger deployed"
        );
        Ok(ledger)
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn symbol(&self) -> &str {
        &self.meta.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.meta.decimals
    }

    pub fn meta(&self) -> &TokenMeta {
        &self.meta
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn chain_id(&self) -> ChainId {
        self.bridge.chain_id()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.book.balance_of(account)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.book.allowance(owner, spender)
    }

    pub fn bridge_position(&self, remote: ChainId) -> BridgePosition {
        self.bridge.position(remote)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn height(&self) -> u64 {
        self.history.height
    }

    pub fn last_event_hash(&self) -> Option<[u8; 32]> {
        self.history.last_event_hash
    }

    pub fn transfer(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::InvalidReceiver(*to));
        }
        self.book.move_balance(caller, to, amount)?;
        self.record(LedgerEvent::Transfer {
            from: *caller,
            to: *to,
            amount,
        });
        Ok(())
    }

    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if spender.is_zero() {
            return Err(LedgerError::InvalidSpender(*spender));
        }
        self.book.set_allowance(owner, spender, amount);
        self.record(LedgerEvent::Approval {
            owner: *owner,
            spender: *spender,
            amount,
        });
        Ok(())
    }

    /// Returns the new allowance.
    pub fn increase_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: Amount,
    ) -> Result<Amount, LedgerError> {
        if spender.is_zero() {
            return Err(LedgerError::InvalidSpender(*spender));
        }
        let amount = self.book.increase_allowance(owner, spender, delta)?;
        self.record(LedgerEvent::Approval {
            owner: *owner,
            spender: *spender,
            amount,
        });
        Ok(amount)
    }

    /// Returns the new allowance.
    pub fn decrease_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: Amount,
    ) -> Result<Amount, LedgerError> {
        if spender.is_zero() {
            return Err(LedgerError::InvalidSpender(*spender));
        }
        let amount = self.book.decrease_allowance(owner, spender, delta)?;
        self.record(LedgerEvent::Approval {
            owner: *owner,
            spender: *spender,
            amount,
        });
        Ok(amount)
    }

    /// Moves `amount` from `from` to `to` on behalf of `spender`, spending the
    /// allowance `from` granted to `spender`.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::InvalidReceiver(*to));
        }
        let allowance = self.book.allowance(from, spender);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                have: allowance,
                need: amount,
            });
        }
        self.book.move_balance(from, to, amount)?;
        self.book.consume_allowance(from, spender, amount)?;
        self.record(LedgerEvent::Transfer {
            from: *from,
            to: *to,
            amount,
        });
        Ok(())
    }

    /// Owner-only mint.
    pub fn safe_mint(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.ensure_owner(caller, "safe_mint")?;
        if to.is_zero() {
            return Err(LedgerError::InvalidReceiver(*to));
        }
        self.mint_unchecked(to, amount)
    }

    pub fn transfer_ownership(
        &mut self,
        caller: &Address,
        new_owner: &Address,
    ) -> Result<(), LedgerError> {
        self.ensure_owner(caller, "transfer_ownership")?;
        if new_owner.is_zero() {
            return Err(LedgerError::InvalidReceiver(*new_owner));
        }
        let previous = std::mem::replace(&mut self.owner, *new_owner);
        self.record(LedgerEvent::OwnershipTransferred {
            previous,
            new: *new_owner,
        });
        Ok(())
    }

    /// Moves `amount` of `account`'s value across `from_chain -> to_chain`,
    /// applying only this ledger's side of the route.
    ///
    /// Outbound calls may come from the account itself or the owner; inbound
    /// calls credit fresh value and are owner-only.
    pub fn bridge(
        &mut self,
        caller: &Address,
        account: &Address,
        amount: Amount,
        from_chain: ChainId,
        to_chain: ChainId,
    ) -> Result<(), LedgerError> {
        let direction = self.bridge.route(from_chain, to_chain)?;
        if account.is_zero() {
            return Err(LedgerError::InvalidReceiver(*account));
        }
        match direction {
            Direction::Outbound { to } => {
                if caller != account {
                    self.ensure_owner(caller, "bridge out")?;
                }
                let settled = self.bridge.send(
                    &mut self.book,
                    &mut self.total_supply,
                    account,
                    amount,
                    to,
                )?;
                self.record(LedgerEvent::BridgeOut {
                    account: *account,
                    amount,
                    to_chain: to,
                    burned: settled.supply,
                    escrowed: settled.escrow,
                });
            }
            Direction::Inbound { from } => {
                self.ensure_owner(caller, "bridge in")?;
                let settled = self.bridge.receive(
                    &mut self.book,
                    &mut self.total_supply,
                    account,
                    amount,
                    from,
                )?;
                self.record(LedgerEvent::BridgeIn {
                    account: *account,
                    amount,
                    from_chain: from,
                    released: settled.escrow,
                    minted: settled.supply,
                });
            }
        }
        Ok(())
    }

    /// `sum(balances) + escrow == total_supply`.
    pub fn supply_is_consistent(&self) -> bool {
        match (self.book.circulating(), self.bridge.escrowed()) {
            (Some(circulating), Some(escrowed)) => {
                circulating.checked_add(escrowed) == Some(self.total_supply)
            }
            _ => false,
        }
    }

    fn ensure_owner(&self, caller: &Address, action: &'static str) -> Result<(), LedgerError> {
        if *caller != self.owner {
            warn!(chain = self.chain_id(), %caller, action, "rejected non-owner call");
            return Err(LedgerError::Unauthorized { caller: *caller });
        }
        Ok(())
    }

    fn mint_unchecked(&mut self, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount("supply overflow"))?;
        self.book.credit(to, amount)?;
        self.total_supply = supply;
        self.record(LedgerEvent::Transfer {
            from: Address::ZERO,
            to: *to,
            amount,
        });
        Ok(())
    }

    fn record(&mut self, event: LedgerEvent) {
        let hash = event.chain_hash(self.history.last_event_hash.as_ref());
        debug!(chain = self.chain_id(), height = self.history.height + 1, ?event, "applied");
        self.history.height += 1;
        self.history.last_event_hash = Some(hash);
        self.events.push(event);
    }
}
