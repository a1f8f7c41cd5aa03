use bridge_token::ledger::{Address, Amount, TokenLedger, TokenMeta};
use proptest::prelude::*;

const ACCOUNTS: u8 = 4;

#[derive(Clone, Debug)]
enum Op {
    Transfer { from: u8, to: u8, amount: Amount },
    Approve { owner: u8, spender: u8, amount: Amount },
    IncreaseAllowance { owner: u8, spender: u8, amount: Amount },
    TransferFrom { spender: u8, from: u8, to: u8, amount: Amount },
    Mint { caller: u8, to: u8, amount: Amount },
    Bridge { caller: u8, account: u8, amount: Amount, outbound: bool },
}

fn account(index: u8) -> Address {
    Address::from_bytes([index + 1; 20])
}

fn amount() -> impl Strategy<Value = Amount> {
    prop_oneof![0..2_000u128, Just(Amount::MAX)]
}

fn op() -> impl Strategy<Value = Op> {
    let idx = || 0..ACCOUNTS;
    prop_oneof![
        (idx(), idx(), amount()).prop_map(|(from, to, amount)| Op::Transfer { from, to, amount }),
        (idx(), idx(), amount())
            .prop_map(|(owner, spender, amount)| Op::Approve { owner, spender, amount }),
        (idx(), idx(), amount()).prop_map(|(owner, spender, amount)| Op::IncreaseAllowance {
            owner,
            spender,
            amount
        }),
        (idx(), idx(), idx(), amount()).prop_map(|(spender, from, to, amount)| {
            Op::TransferFrom {
                spender,
                from,
                to,
                amount,
            }
        }),
        (idx(), idx(), amount()).prop_map(|(caller, to, amount)| Op::Mint { caller, to, amount }),
        (idx(), idx(), amount(), any::<bool>()).prop_map(|(caller, account, amount, outbound)| {
            Op::Bridge {
                caller,
                account,
                amount,
                outbound,
            }
        }),
    ]
}

fn apply(ledger: &mut TokenLedger, op: &Op) -> bool {
    let result = match *op {
        Op::Transfer { from, to, amount } => ledger.transfer(&account(from), &account(to), amount),
        Op::Approve {
            owner,
            spender,
            amount,
        } => ledger.approve(&account(owner), &account(spender), amount),
        Op::IncreaseAllowance {
            owner,
            spender,
            amount,
        } => ledger
            .increase_allowance(&account(owner), &account(spender), amount)
            .map(|_| ()),
        Op::TransferFrom {
            spender,
            from,
            to,
            amount,
        } => ledger.transfer_from(&account(spender), &account(from), &account(to), amount),
        Op::Mint { caller, to, amount } => ledger.safe_mint(&account(caller), &account(to), amount),
        Op::Bridge {
            caller,
            account: holder,
            amount,
            outbound,
        } => {
            let (from, to) = if outbound { (1, 2) } else { (2, 1) };
            ledger.bridge(&account(caller), &account(holder), amount, from, to)
        }
    };
    result.is_ok()
}

proptest! {
    #[test]
    fn supply_matches_balances_plus_escrow(ops in prop::collection::vec(op(), 1..64)) {
        let meta = TokenMeta { name: "Token".into(), symbol: "TKN".into(), decimals: 18 };
        let mut ledger = TokenLedger::new(meta, account(0), 1, 10_000).unwrap();
        for op in &ops {
            let before = ledger.snapshot();
            let applied = apply(&mut ledger, op);
            prop_assert!(ledger.supply_is_consistent());
            if !applied {
                prop_assert_eq!(ledger.snapshot(), before);
            }
        }
    }
}
