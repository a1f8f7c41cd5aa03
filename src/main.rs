use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use bridge_token::{
    config::DeployConfig,
    env::Signer,
    ledger::{Address, Amount, ChainId, TokenLedger},
    state,
};
use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};

#[derive(Parser, Debug)]
#[command(name = "bridge-token")]
#[command(version, about = "Token ledger with owner-gated minting and a two-chain bridge", long_about = None)]
struct Cli {
    /// Ledger state file (JSON snapshot)
    #[arg(short, long, global = true, default_value = "ledger.state.json")]
    state: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an ed25519 keypair and print its address
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Deploy a fresh ledger into the state file
    Deploy {
        /// TOML deployment config; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        owner: Address,
        /// Override the configured chain id
        #[arg(long)]
        chain_id: Option<ChainId>,
        /// Replace an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Token metadata, supply, owner, bridge positions and state root
    Info,
    Balance {
        account: Address,
    },
    Allowance {
        owner: Address,
        spender: Address,
    },
    Transfer {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        to: Address,
        #[command(flatten)]
        amount: AmountArg,
    },
    Approve(AllowanceArgs),
    IncreaseAllowance(AllowanceArgs),
    DecreaseAllowance(AllowanceArgs),
    /// Spend an allowance: move tokens from `--from` to `--to` as `--spender`
    TransferFrom {
        #[arg(long)]
        spender: Address,
        #[arg(long)]
        from: Address,
        #[arg(long)]
        to: Address,
        #[command(flatten)]
        amount: AmountArg,
    },
    /// Owner-only mint
    Mint {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        to: Address,
        #[command(flatten)]
        amount: AmountArg,
    },
    TransferOwnership {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        new_owner: Address,
    },
    /// Apply this ledger's side of a bridge transfer
    Bridge {
        #[arg(long)]
        caller: Address,
        #[arg(long)]
        account: Address,
        #[command(flatten)]
        amount: AmountArg,
        #[arg(long)]
        from_chain: ChainId,
        #[arg(long)]
        to_chain: ChainId,
    },
    /// Print the event log as JSON lines
    Events,
}

#[derive(Args, Debug)]
struct AmountArg {
    /// Amount in base units
    #[arg(long)]
    amount: Amount,
}

#[derive(Args, Debug)]
struct AllowanceArgs {
    #[arg(long)]
    owner: Address,
    #[arg(long)]
    spender: Address,
    #[command(flatten)]
    amount: AmountArg,
}

fn load_ledger(path: &Path) -> Result<TokenLedger> {
    state::load(path).wrap_err("run `deploy` first to create a ledger")
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).wrap_err("mkdir out-dir")?;
    let signer = Signer::generate();
    fs::write(out_dir.join("sk.hex"), hex::encode(signer.secret_bytes()))?;
    fs::write(
        out_dir.join("pk.hex"),
        hex::encode(signer.verifying_key().as_bytes()),
    )?;
    fs::write(out_dir.join("address.txt"), signer.address().to_string())?;
    println!("{}", signer.address());
    eprintln!("keypair written → {}", out_dir.display());
    Ok(())
}

fn deploy_cmd(
    path: &Path,
    config: Option<&Path>,
    owner: Address,
    chain_id: Option<ChainId>,
    force: bool,
) -> Result<()> {
    let mut config = match config {
        Some(config) => DeployConfig::load(config)?,
        None => DeployConfig::default(),
    };
    if let Some(chain_id) = chain_id {
        config = config.on_chain(chain_id);
    }
    let ledger = state::deploy(path, &config, owner, force)?;
    println!(
        "deployed {} ({}) on chain {} → {}",
        ledger.name(),
        ledger.symbol(),
        ledger.chain_id(),
        path.display()
    );
    Ok(())
}

fn info_cmd(path: &Path) -> Result<()> {
    let ledger = load_ledger(path)?;
    let snapshot = ledger.snapshot();
    let mut out = std::io::stdout().lock();
    writeln!(out, "{:<14}{}", "name:", ledger.name())?;
    writeln!(out, "{:<14}{}", "symbol:", ledger.symbol())?;
    writeln!(out, "{:<14}{}", "decimals:", ledger.decimals())?;
    writeln!(out, "{:<14}{}", "total supply:", ledger.total_supply())?;
    writeln!(out, "{:<14}{}", "owner:", ledger.owner())?;
    writeln!(out, "{:<14}{}", "chain id:", ledger.chain_id())?;
    writeln!(out, "{:<14}{}", "height:", ledger.height())?;
    writeln!(out, "{:<14}{}", "state root:", hex::encode(snapshot.state_root))?;
    for (chain, position) in &snapshot.bridge {
        writeln!(
            out,
            "{:<14}escrowed {} / minted {}",
            format!("bridge {chain}:"),
            position.escrowed,
            position.minted
        )?;
    }
    Ok(())
}

fn events_cmd(path: &Path) -> Result<()> {
    let ledger = load_ledger(path)?;
    let mut out = std::io::stdout().lock();
    for event in ledger.events() {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.state.as_path();

    match cli.cmd {
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Deploy {
            config,
            owner,
            chain_id,
            force,
        } => deploy_cmd(path, config.as_deref(), owner, chain_id, force),
        Command::Info => info_cmd(path),
        Command::Balance { account } => {
            println!("{}", load_ledger(path)?.balance_of(&account));
            Ok(())
        }
        Command::Allowance { owner, spender } => {
            println!("{}", load_ledger(path)?.allowance(&owner, &spender));
            Ok(())
        }
        Command::Transfer { from, to, amount } => {
            Ok(state::mutate(path, |l| l.transfer(&from, &to, amount.amount))?)
        }
        Command::Approve(args) => Ok(state::mutate(path, |l| {
            l.approve(&args.owner, &args.spender, args.amount.amount)
        })?),
        Command::IncreaseAllowance(args) => {
            let now = state::mutate(path, |l| {
                l.increase_allowance(&args.owner, &args.spender, args.amount.amount)
            })?;
            println!("{now}");
            Ok(())
        }
        Command::DecreaseAllowance(args) => {
            let now = state::mutate(path, |l| {
                l.decrease_allowance(&args.owner, &args.spender, args.amount.amount)
            })?;
            println!("{now}");
            Ok(())
        }
        Command::TransferFrom {
            spender,
            from,
            to,
            amount,
        } => Ok(state::mutate(path, |l| {
            l.transfer_from(&spender, &from, &to, amount.amount)
        })?),
        Command::Mint { caller, to, amount } => {
            Ok(state::mutate(path, |l| l.safe_mint(&caller, &to, amount.amount))?)
        }
        Command::TransferOwnership { caller, new_owner } => {
            Ok(state::mutate(path, |l| l.transfer_ownership(&caller, &new_owner))?)
        }
        Command::Bridge {
            caller,
            account,
            amount,
            from_chain,
            to_chain,
        } => Ok(state::mutate(path, |l| {
            l.bridge(&caller, &account, amount.amount, from_chain, to_chain)
        })?),
        Command::Events => events_cmd(path),
    }
}
