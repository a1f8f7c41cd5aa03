use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    bridge::{BridgeController, BridgePosition},
    error::LedgerError,
};

use super::{
    book::AccountBook, serde_amount, Address, Amount, ChainId, LedgerEvent, SnapshotMetadata,
    TokenLedger, TokenMeta,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllowanceEntry {
    pub owner: Address,
    pub spender: Address,
    #[serde(with = "serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub chain_id: ChainId,
    pub owner: Address,
    pub token: TokenMeta,
    #[serde(with = "serde_amount")]
    pub total_supply: Amount,
    pub accounts: BTreeMap<Address, AmountValue>,
    pub allowances: Vec<AllowanceEntry>,
    pub bridge: BTreeMap<ChainId, BridgePosition>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "serde_hash")]
    pub state_root: [u8; 32],
}

/// Balance wrapper so map values serialize the same way as other amounts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct AmountValue(#[serde(with = "serde_amount")] pub Amount);

impl TokenLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        let accounts: BTreeMap<Address, AmountValue> = self
            .book
            .balances()
            .map(|(account, balance)| (*account, AmountValue(*balance)))
            .collect();
        let allowances: Vec<AllowanceEntry> = self
            .book
            .allowances()
            .map(|((owner, spender), amount)| AllowanceEntry {
                owner: *owner,
                spender: *spender,
                amount: *amount,
            })
            .collect();
        let bridge: BTreeMap<ChainId, BridgePosition> = self
            .bridge
            .positions()
            .map(|(chain, position)| (*chain, *position))
            .collect();
        let state_root = compute_state_root(
            self.chain_id(),
            &self.owner,
            &self.meta,
            self.total_supply,
            &accounts,
            &allowances,
            &bridge,
        );
        LedgerSnapshot {
            meta: self.history.clone(),
            chain_id: self.chain_id(),
            owner: self.owner,
            token: self.meta.clone(),
            total_supply: self.total_supply,
            accounts,
            allowances,
            bridge,
            events: self.events.clone(),
            state_root,
        }
    }

    pub fn state_root(&self) -> [u8; 32] {
        self.snapshot().state_root
    }

    /// Rebuilds a ledger, rejecting snapshots whose root, supply or event
    /// history does not check out.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        snapshot.ensure_canonical()?;
        let expected = compute_state_root(
            snapshot.chain_id,
            &snapshot.owner,
            &snapshot.token,
            snapshot.total_supply,
            &snapshot.accounts,
            &snapshot.allowances,
            &snapshot.bridge,
        );
        if expected != snapshot.state_root {
            return Err(LedgerError::CorruptSnapshot(format!(
                "state root mismatch: expected {}, found {}",
                hex::encode(expected),
                hex::encode(snapshot.state_root)
            )));
        }
        if snapshot.meta.height != snapshot.events.len() as u64 {
            return Err(LedgerError::CorruptSnapshot(format!(
                "height {} does not match {} events",
                snapshot.meta.height,
                snapshot.events.len()
            )));
        }
        let last_hash = snapshot
            .events
            .iter()
            .fold(None, |prev: Option<[u8; 32]>, event| {
                Some(event.chain_hash(prev.as_ref()))
            });
        if last_hash != snapshot.meta.last_event_hash {
            return Err(LedgerError::CorruptSnapshot(
                "event hash chain does not match".into(),
            ));
        }

        let snapshot_root = snapshot.state_root;
        let mut book = AccountBook::new();
        for (account, balance) in &snapshot.accounts {
            book.credit(account, balance.0)?;
        }
        for entry in &snapshot.allowances {
            book.set_allowance(&entry.owner, &entry.spender, entry.amount);
        }
        let ledger = Self {
            meta: snapshot.token,
            owner: snapshot.owner,
            total_supply: snapshot.total_supply,
            book,
            bridge: BridgeController::from_positions(snapshot.chain_id, snapshot.bridge),
            history: snapshot.meta,
            events: snapshot.events,
        };
        if !ledger.supply_is_consistent() {
            return Err(LedgerError::CorruptSnapshot(
                "balances and escrow do not add up to total supply".into(),
            ));
        }
        if ledger.state_root() != snapshot_root {
            return Err(LedgerError::CorruptSnapshot(
                "restored state does not reproduce the state root".into(),
            ));
        }
        Ok(ledger)
    }
}

impl LedgerSnapshot {
    /// A snapshot must list state exactly as [`TokenLedger::snapshot`] emits
    /// it: no zero entries, allowances strictly ordered by `(owner, spender)`.
    fn ensure_canonical(&self) -> Result<(), LedgerError> {
        if let Some((account, _)) = self.accounts.iter().find(|(_, balance)| balance.0 == 0) {
            return Err(LedgerError::CorruptSnapshot(format!(
                "zero balance entry for {account}"
            )));
        }
        if let Some(entry) = self.allowances.iter().find(|entry| entry.amount == 0) {
            return Err(LedgerError::CorruptSnapshot(format!(
                "zero allowance entry for {} -> {}",
                entry.owner, entry.spender
            )));
        }
        if let Some(pair) = self
            .allowances
            .windows(2)
            .find(|pair| (pair[0].owner, pair[0].spender) >= (pair[1].owner, pair[1].spender))
        {
            return Err(LedgerError::CorruptSnapshot(format!(
                "allowance {} -> {} is duplicated or out of order",
                pair[1].owner, pair[1].spender
            )));
        }
        if let Some((chain, _)) = self
            .bridge
            .iter()
            .find(|(_, position)| position.escrowed == 0 && position.minted == 0)
        {
            return Err(LedgerError::CorruptSnapshot(format!(
                "empty bridge position for chain {chain}"
            )));
        }
        Ok(())
    }
}

fn compute_state_root(
    chain_id: ChainId,
    owner: &Address,
    token: &TokenMeta,
    total_supply: Amount,
    accounts: &BTreeMap<Address, AmountValue>,
    allowances: &[AllowanceEntry],
    bridge: &BTreeMap<ChainId, BridgePosition>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"token");
    hasher.update(chain_id.to_le_bytes());
    hasher.update(owner.as_bytes());
    hasher.update((token.name.len() as u64).to_le_bytes());
    hasher.update(token.name.as_bytes());
    hasher.update((token.symbol.len() as u64).to_le_bytes());
    hasher.update(token.symbol.as_bytes());
    hasher.update([token.decimals]);
    hasher.update(total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (account, balance) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.0.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for entry in allowances {
        let mut hasher = Sha256::new();
        hasher.update(b"allowance");
        hasher.update(entry.owner.as_bytes());
        hasher.update(entry.spender.as_bytes());
        hasher.update(entry.amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (chain, position) in bridge {
        let mut hasher = Sha256::new();
        hasher.update(b"bridge");
        hasher.update(chain.to_le_bytes());
        hasher.update(position.escrowed.to_le_bytes());
        hasher.update(position.minted.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"bridge-token-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

pub(crate) mod serde_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("hash must be 32 bytes"))
    }
}

pub(crate) mod serde_hash_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    struct Hash(#[serde(with = "super::serde_hash")] [u8; 32]);

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(Hash).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Hash>::deserialize(deserializer)?.map(|hash| hash.0))
    }
}
