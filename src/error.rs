use thiserror::Error;

use crate::ledger::{Address, Amount, ChainId};

/// Canonical error type returned by every ledger, bridge and environment
/// operation. A returned error always means no state was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The debited account holds less than the requested amount.
    #[error("insufficient balance in {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: Address,
        have: Amount,
        need: Amount,
    },

    /// The spender's remaining allowance is below the requested amount.
    #[error("insufficient allowance for {spender} on {owner}: have {have}, need {need}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        have: Amount,
        need: Amount,
    },

    /// A privileged call was made by someone other than the ledger owner.
    #[error("caller {caller} is not authorized")]
    Unauthorized { caller: Address },

    /// Arithmetic on amounts would overflow.
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("invalid receiver {0}")]
    InvalidReceiver(Address),

    #[error("invalid spender {0}")]
    InvalidSpender(Address),

    /// Bridging from a chain to itself.
    #[error("invalid bridge route {from} -> {to}")]
    InvalidRoute { from: ChainId, to: ChainId },

    /// Neither end of the bridge route is the chain this ledger lives on.
    #[error("ledger on chain {local} is not an endpoint of {from} -> {to}")]
    WrongChain {
        local: ChainId,
        from: ChainId,
        to: ChainId,
    },

    #[error("no ledger deployed on chain {0}")]
    UnknownChain(ChainId),

    #[error("a ledger is already deployed on chain {0}")]
    DuplicateChain(ChainId),

    /// Snapshot failed verification on restore.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}
