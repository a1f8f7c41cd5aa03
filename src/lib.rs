//! Fungible token ledger with owner-gated minting and a two-chain bridge.
//!
//! The crate is split into a handful of small building blocks:
//!
//! * [`ledger`]: the account book, token metadata, supply accounting, the
//!   event log and verifiable snapshots of a single ledger instance.
//! * [`bridge`]: per-remote-chain escrow and representation accounting that
//!   moves value in and out of a ledger instance.
//! * [`env`]: an in-process chain environment hosting one ledger per chain
//!   id, deterministic signers, and caller-sequenced cross-instance bridging.
//! * [`config`]: TOML deployment parameters.
//! * [`state`]: a ledger persisted as a JSON snapshot file.
//!
//! Every mutating operation checks all of its preconditions before touching
//! state, so a returned [`LedgerError`] always leaves the ledger unchanged.

pub mod bridge;
pub mod config;
pub mod env;
pub mod ledger;
pub mod state;

mod error;

pub use error::LedgerError;
