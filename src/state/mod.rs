//! Ledger state kept on disk as a JSON [`LedgerSnapshot`].
//!
//! Writes go to a sibling `.tmp` file and are renamed into place, so a
//! rejected operation or an interrupted write never alters the state file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    config::{ConfigError, DeployConfig},
    error::LedgerError,
    ledger::{snapshot::LedgerSnapshot, Address, TokenLedger},
};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not a ledger snapshot: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("encode snapshot: {0}")]
    Encode(serde_json::Error),
    #[error("{0} already holds a ledger; pass --force to replace it")]
    AlreadyDeployed(PathBuf),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> StateError {
    let path = path.to_path_buf();
    move |source| StateError::Io {
        action,
        path,
        source,
    }
}

pub fn load(path: &Path) -> Result<TokenLedger, StateError> {
    let bytes = fs::read(path).map_err(io_err("read ledger state", path))?;
    let snapshot: LedgerSnapshot =
        serde_json::from_slice(&bytes).map_err(|source| StateError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(TokenLedger::from_snapshot(snapshot)?)
}

pub fn save(path: &Path, ledger: &TokenLedger) -> Result<(), StateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err("create state dir", parent))?;
    }
    let json = serde_json::to_vec_pretty(&ledger.snapshot()).map_err(StateError::Encode)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(io_err("write", &tmp))?;
    fs::rename(&tmp, path).map_err(io_err("replace", path))?;
    Ok(())
}

/// Deploys a fresh ledger into `path`. An existing file is only replaced
/// with `force`.
pub fn deploy(
    path: &Path,
    config: &DeployConfig,
    owner: Address,
    force: bool,
) -> Result<TokenLedger, StateError> {
    if path.exists() && !force {
        return Err(StateError::AlreadyDeployed(path.to_path_buf()));
    }
    let ledger = TokenLedger::new(
        config.token_meta(),
        owner,
        config.chain_id,
        config.initial_supply,
    )?;
    save(path, &ledger)?;
    Ok(ledger)
}

/// Loads the ledger, applies `op`, and writes it back only if `op` succeeded.
pub fn mutate<T, F>(path: &Path, op: F) -> Result<T, StateError>
where
    F: FnOnce(&mut TokenLedger) -> Result<T, LedgerError>,
{
    let mut ledger = load(path)?;
    let out = op(&mut ledger)?;
    save(path, &ledger)?;
    info!(height = ledger.height(), root = %hex::encode(ledger.state_root()), "state saved");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn config() -> DeployConfig {
        DeployConfig {
            initial_supply: 10_000,
            ..DeployConfig::default()
        }
    }

    #[test]
    fn transfer_persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.state.json");
        deploy(&path, &config(), addr(1), false).unwrap();

        mutate(&path, |l| l.transfer(&addr(1), &addr(2), 1_000)).unwrap();

        let ledger = load(&path).unwrap();
        assert_eq!(ledger.balance_of(&addr(2)), 1_000);
        assert_eq!(ledger.balance_of(&addr(1)), 9_000);
        assert_eq!(ledger.height(), 2);
    }

    #[test]
    fn rejected_operation_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.state.json");
        deploy(&path, &config(), addr(1), false).unwrap();
        let before = fs::read(&path).unwrap();

        let err = mutate(&path, |l| l.transfer(&addr(2), &addr(1), 1)).unwrap_err();
        assert!(matches!(
            err,
            StateError::Ledger(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn deploy_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.state.json");
        deploy(&path, &config(), addr(1), false).unwrap();
        mutate(&path, |l| l.transfer(&addr(1), &addr(2), 5)).unwrap();

        assert!(matches!(
            deploy(&path, &config(), addr(3), false),
            Err(StateError::AlreadyDeployed(_))
        ));
        assert_eq!(load(&path).unwrap().owner(), addr(1));

        deploy(&path, &config().on_chain(2), addr(3), true).unwrap();
        let ledger = load(&path).unwrap();
        assert_eq!(ledger.owner(), addr(3));
        assert_eq!(ledger.chain_id(), 2);
        assert_eq!(ledger.balance_of(&addr(2)), 0);
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/ledger.state.json");
        deploy(&path, &config(), addr(1), false).unwrap();
        assert_eq!(load(&path).unwrap().total_supply(), 10_000);
    }

    #[test]
    fn missing_or_garbled_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.state.json");
        assert!(matches!(load(&path), Err(StateError::Io { .. })));

        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(load(&path), Err(StateError::Decode { .. })));
    }
}
