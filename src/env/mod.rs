//! In-process chain environment.
//!
//! Hosts one [`TokenLedger`] per chain id and hands out deterministic
//! signers, standing in for the node and wallet a deployed token would
//! normally sit behind. Bridging between two hosted ledgers is two local
//! calls sequenced here; there is no shared state between instances.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    config::DeployConfig,
    error::LedgerError,
    ledger::{Address, Amount, ChainId, TokenLedger},
};

/// An ed25519 key pair and the address derived from it.
#[derive(Clone, Debug)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&secret);
        let address = Address::derive(key.verifying_key().as_bytes());
        Self { key, address }
    }

    pub fn generate() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        Self::from_secret(key.to_bytes())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(message)
    }
}

/// Checks that `signature` over `message` was made by the key behind `address`.
pub fn verify_signed_by(
    address: &Address,
    key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> bool {
    Address::derive(key.as_bytes()) == *address && key.verify_strict(message, signature).is_ok()
}

pub struct ChainEnv {
    seed: [u8; 32],
    ledgers: BTreeMap<ChainId, TokenLedger>,
}

impl ChainEnv {
    pub fn new(seed: &[u8]) -> Self {
        Self {
            seed: Sha256::digest(seed).into(),
            ledgers: BTreeMap::new(),
        }
    }

    /// `count` signers derived from the environment seed; the first is the
    /// conventional deployer.
    pub fn signers(&self, count: usize) -> Vec<Signer> {
        (0..count as u64)
            .map(|index| {
                let mut hasher = Sha256::new();
                hasher.update(b"signer");
                hasher.update(self.seed);
                hasher.update(index.to_le_bytes());
                Signer::from_secret(hasher.finalize().into())
            })
            .collect()
    }

    pub fn deploy(
        &mut self,
        config: &DeployConfig,
        owner: &Address,
    ) -> Result<ChainId, LedgerError> {
        let chain = config.chain_id;
        if self.ledgers.contains_key(&chain) {
            return Err(LedgerError::DuplicateChain(chain));
        }
        let ledger =
            TokenLedger::new(config.token_meta(), *owner, chain, config.initial_supply)?;
        self.ledgers.insert(chain, ledger);
        info!(chain, "ledger registered in environment");
        Ok(chain)
    }

    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.ledgers.keys().copied()
    }

    pub fn ledger(&self, chain: ChainId) -> Result<&TokenLedger, LedgerError> {
        self.ledgers
            .get(&chain)
            .ok_or(LedgerError::UnknownChain(chain))
    }

    pub fn ledger_mut(&mut self, chain: ChainId) -> Result<&mut TokenLedger, LedgerError> {
        self.ledgers
            .get_mut(&chain)
            .ok_or(LedgerError::UnknownChain(chain))
    }

    /// Sends `amount` of `account`'s tokens from the ledger on `from` to the
    /// ledger on `to`: an outbound call on `from`, then an inbound call on
    /// `to`. If the inbound leg is rejected the outbound leg is reversed with
    /// an inbound call on `from`.
    pub fn bridge_across(
        &mut self,
        caller: &Address,
        account: &Address,
        amount: Amount,
        from: ChainId,
        to: ChainId,
    ) -> Result<(), LedgerError> {
        self.ledger(to)?;
        self.ledger_mut(from)?
            .bridge(caller, account, amount, from, to)?;
        match self
            .ledger_mut(to)?
            .bridge(caller, account, amount, from, to)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(from, to, %account, amount, %err, "inbound leg rejected, reversing");
                let source = self.ledger_mut(from)?;
                let owner = source.owner();
                source.bridge(&owner, account, amount, to, from)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_chains() -> (ChainEnv, Vec<Signer>) {
        let mut env = ChainEnv::new(b"bridge-token-test");
        let signers = env.signers(3);
        let config = DeployConfig {
            initial_supply: 10_000,
            ..DeployConfig::default()
        };
        env.deploy(&config, &signers[0].address()).unwrap();
        env.deploy(&config.on_chain(2), &signers[0].address())
            .unwrap();
        (env, signers)
    }

    #[test]
    fn signers_are_deterministic_and_distinct() {
        let a = ChainEnv::new(b"seed").signers(3);
        let b = ChainEnv::new(b"seed").signers(3);
        let c = ChainEnv::new(b"other").signers(1);
        assert_eq!(a[1].address(), b[1].address());
        assert_ne!(a[0].address(), a[1].address());
        assert_ne!(a[0].address(), c[0].address());
    }

    #[test]
    fn signatures_bind_to_address() {
        let signer = Signer::generate();
        let other = Signer::generate();
        let signature = signer.sign(b"transfer");
        assert!(verify_signed_by(
            &signer.address(),
            &signer.verifying_key(),
            b"transfer",
            &signature
        ));
        assert!(!verify_signed_by(
            &other.address(),
            &signer.verifying_key(),
            b"transfer",
            &signature
        ));
        assert!(!verify_signed_by(
            &signer.address(),
            &signer.verifying_key(),
            b"approve",
            &signature
        ));
    }

    #[test]
    fn duplicate_and_unknown_chains() {
        let (mut env, signers) = two_chains();
        assert_eq!(
            env.deploy(&DeployConfig::default(), &signers[0].address())
                .unwrap_err(),
            LedgerError::DuplicateChain(1)
        );
        assert_eq!(env.ledger(3).unwrap_err(), LedgerError::UnknownChain(3));
        assert_eq!(env.chains().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn round_trip_across_chains() {
        let (mut env, signers) = two_chains();
        let owner = signers[0].address();
        let user = signers[1].address();
        env.ledger_mut(1).unwrap().transfer(&owner, &user, 1_000).unwrap();

        env.bridge_across(&owner, &user, 400, 1, 2).unwrap();
        assert_eq!(env.ledger(1).unwrap().balance_of(&user), 600);
        assert_eq!(env.ledger(2).unwrap().balance_of(&user), 400);
        assert_eq!(env.ledger(1).unwrap().bridge_position(2).escrowed, 400);
        assert_eq!(env.ledger(2).unwrap().bridge_position(1).minted, 400);
        assert_eq!(env.ledger(2).unwrap().total_supply(), 10_400);

        env.bridge_across(&owner, &user, 400, 2, 1).unwrap();
        assert_eq!(env.ledger(1).unwrap().balance_of(&user), 1_000);
        assert_eq!(env.ledger(2).unwrap().balance_of(&user), 0);
        assert_eq!(env.ledger(1).unwrap().bridge_position(2).escrowed, 0);
        assert_eq!(env.ledger(2).unwrap().total_supply(), 10_000);
        for chain in [1, 2] {
            assert!(env.ledger(chain).unwrap().supply_is_consistent());
        }
    }

    #[test]
    fn rejected_inbound_leg_is_reversed() {
        let (mut env, signers) = two_chains();
        let owner = signers[0].address();
        let user = signers[1].address();
        env.ledger_mut(1).unwrap().transfer(&owner, &user, 1_000).unwrap();

        // The user may send their own funds out, but only the owner relays inbound.
        let err = env.bridge_across(&user, &user, 300, 1, 2).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
        assert_eq!(env.ledger(1).unwrap().balance_of(&user), 1_000);
        assert_eq!(env.ledger(2).unwrap().balance_of(&user), 0);
        assert_eq!(env.ledger(1).unwrap().total_supply(), 10_000);
        assert_eq!(
            env.ledger(1).unwrap().bridge_position(2),
            Default::default()
        );
    }

    #[test]
    fn unknown_destination_touches_nothing() {
        let (mut env, signers) = two_chains();
        let owner = signers[0].address();
        let height = env.ledger(1).unwrap().height();
        assert_eq!(
            env.bridge_across(&owner, &owner, 1, 1, 9).unwrap_err(),
            LedgerError::UnknownChain(9)
        );
        assert_eq!(env.ledger(1).unwrap().height(), height);
    }
}
