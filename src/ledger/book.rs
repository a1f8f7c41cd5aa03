use std::collections::BTreeMap;

use crate::error::LedgerError;

use super::{Address, Amount};

/// Balances and allowances of one ledger instance.
///
/// Zero entries are never stored, so two books holding the same balances
/// compare equal and hash to the same state root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountBook {
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let next = self
            .balance_of(account)
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount("balance overflow"))?;
        self.store_balance(account, next);
        Ok(())
    }

    pub fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let have = self.balance_of(account);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *account,
                have,
                need: amount,
            });
        }
        self.store_balance(account, have - amount);
        Ok(())
    }

    /// Debits `from` and credits `to` as one step: both sides are checked
    /// before either is written.
    pub fn move_balance(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let have = self.balance_of(from);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                have,
                need: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount("balance overflow"))?;
        self.store_balance(from, have - amount);
        self.store_balance(to, credited);
        Ok(())
    }

    pub fn set_allowance(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        if amount == 0 {
            self.allowances.remove(&(*owner, *spender));
        } else {
            self.allowances.insert((*owner, *spender), amount);
        }
    }

    pub fn increase_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: Amount,
    ) -> Result<Amount, LedgerError> {
        let next = self
            .allowance(owner, spender)
            .checked_add(delta)
            .ok_or(LedgerError::InvalidAmount("allowance overflow"))?;
        self.set_allowance(owner, spender, next);
        Ok(next)
    }

    pub fn decrease_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: Amount,
    ) -> Result<Amount, LedgerError> {
        self.consume_allowance(owner, spender, delta)?;
        Ok(self.allowance(owner, spender))
    }

    pub fn consume_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let have = self.allowance(owner, spender);
        if have < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                have,
                need: amount,
            });
        }
        self.set_allowance(owner, spender, have - amount);
        Ok(())
    }

    /// Sum of every balance in the book, `None` if it does not fit an [`Amount`].
    pub fn circulating(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0u128, |acc, balance| acc.checked_add(*balance))
    }

    pub fn balances(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    pub fn allowances(&self) -> impl Iterator<Item = (&(Address, Address), &Amount)> {
        self.allowances.iter()
    }

    fn store_balance(&mut self, account: &Address, amount: Amount) {
        if amount == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn unknown_accounts_read_as_zero() {
        let book = AccountBook::new();
        assert_eq!(book.balance_of(&addr(1)), 0);
        assert_eq!(book.allowance(&addr(1), &addr(2)), 0);
    }

    #[test]
    fn debit_rejects_overdraft_without_mutating() {
        let mut book = AccountBook::new();
        book.credit(&addr(1), 100).unwrap();
        let err = book.debit(&addr(1), 101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: addr(1),
                have: 100,
                need: 101,
            }
        );
        assert_eq!(book.balance_of(&addr(1)), 100);
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let mut book = AccountBook::new();
        book.credit(&addr(1), Amount::MAX).unwrap();
        assert!(matches!(
            book.credit(&addr(1), 1),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(book.balance_of(&addr(1)), Amount::MAX);
    }

    #[test]
    fn move_balance_checks_receiver_before_debiting() {
        let mut book = AccountBook::new();
        book.credit(&addr(1), 10).unwrap();
        book.credit(&addr(2), Amount::MAX).unwrap();
        assert!(book.move_balance(&addr(1), &addr(2), 5).is_err());
        assert_eq!(book.balance_of(&addr(1)), 10);
        assert_eq!(book.balance_of(&addr(2)), Amount::MAX);
    }

    #[test]
    fn self_move_keeps_balance() {
        let mut book = AccountBook::new();
        book.credit(&addr(1), 10).unwrap();
        book.move_balance(&addr(1), &addr(1), 10).unwrap();
        assert_eq!(book.balance_of(&addr(1)), 10);
        assert!(book.move_balance(&addr(1), &addr(1), 11).is_err());
    }

    #[test]
    fn allowance_accumulates_and_is_consumed() {
        let mut book = AccountBook::new();
        book.set_allowance(&addr(1), &addr(2), 1_000);
        assert_eq!(book.increase_allowance(&addr(1), &addr(2), 500).unwrap(), 1_500);
        book.consume_allowance(&addr(1), &addr(2), 1_500).unwrap();
        assert_eq!(book.allowance(&addr(1), &addr(2)), 0);
        assert_eq!(book.allowances().count(), 0);
        assert!(matches!(
            book.consume_allowance(&addr(1), &addr(2), 1),
            Err(LedgerError::InsufficientAllowance { have: 0, need: 1, .. })
        ));
    }

    #[test]
    fn increase_allowance_overflow_is_rejected() {
        let mut book = AccountBook::new();
        book.set_allowance(&addr(1), &addr(2), Amount::MAX);
        assert_eq!(
            book.increase_allowance(&addr(1), &addr(2), 1),
            Err(LedgerError::InvalidAmount("allowance overflow"))
        );
        assert_eq!(book.allowance(&addr(1), &addr(2)), Amount::MAX);
    }

    #[test]
    fn zero_balances_are_pruned() {
        let mut book = AccountBook::new();
        book.credit(&addr(1), 5).unwrap();
        book.debit(&addr(1), 5).unwrap();
        assert_eq!(book, AccountBook::new());
    }
}
