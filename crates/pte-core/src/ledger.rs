//! Ledger store
//!
//! Authoritative in-memory map of payout address to accrued balance for the
//! running process. Persistence belongs to `pte-storage`; this type only
//! knows how to credit and how to be replaced wholesale.

use crate::error::LedgerError;
use crate::types::{Address, Amount};
use std::collections::BTreeMap;

/// Serialized ledger shape: `{ "<address>": <balance> }`
pub type Ledger = BTreeMap<Address, Amount>;

/// Compute `rate * seconds` without truncation
pub fn credit_amount(rate: Amount, seconds: u64) -> Result<Amount, LedgerError> {
    rate.checked_mul(seconds as u128)
        .ok_or(LedgerError::CreditOverflow { rate, seconds })
}

/// In-memory address to balance map
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerStore {
    balances: Ledger,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a loaded snapshot
    pub fn from_snapshot(snapshot: Ledger) -> Self {
        Self { balances: snapshot }
    }

    /// Balance for an address, `None` if it has never been credited
    pub fn get(&self, address: &Address) -> Option<Amount> {
        self.balances.get(address).copied()
    }

    /// Add `amount` to an address, creating the entry on first credit.
    ///
    /// Returns the new balance. On overflow the entry is left untouched.
    pub fn credit(&mut self, address: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        match self.balances.get_mut(address) {
            Some(balance) => {
                let updated = balance.checked_add(amount).ok_or_else(|| LedgerError::Overflow {
                    address: address.clone(),
                    balance: *balance,
                    amount,
                })?;
                *balance = updated;
                Ok(updated)
            }
            None => {
                self.balances.insert(address.clone(), amount);
                Ok(amount)
            }
        }
    }

    /// Replace every entry with `snapshot` (startup load and resync)
    pub fn replace_all(&mut self, snapshot: Ledger) {
        self.balances = snapshot;
    }

    /// Clone of the current balances for persistence
    pub fn snapshot(&self) -> Ledger {
        self.balances.clone()
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Sum of all balances, `None` if it does not fit an amount
    pub fn total(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0u128, |acc, balance| acc.checked_add(*balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ONE_PTE;
    use proptest::prelude::*;

    fn addr(fill: char) -> Address {
        Address::parse(&format!("0x{}", fill.to_string().repeat(40))).unwrap()
    }

    #[test]
    fn test_credit_creates_entry() {
        let mut ledger = LedgerStore::new();
        assert_eq!(ledger.get(&addr('a')), None);

        assert_eq!(ledger.credit(&addr('a'), 5).unwrap(), 5);
        assert_eq!(ledger.get(&addr('a')), Some(5));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_zero_credit_creates_entry() {
        let mut ledger = LedgerStore::new();
        ledger.credit(&addr('b'), 0).unwrap();
        assert_eq!(ledger.get(&addr('b')), Some(0));
    }

    #[test]
    fn test_credit_overflow_leaves_entry() {
        let mut ledger = LedgerStore::new();
        ledger.credit(&addr('c'), u128::MAX - 1).unwrap();

        let err = ledger.credit(&addr('c'), 2).unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(ledger.get(&addr('c')), Some(u128::MAX - 1));

        assert_eq!(ledger.credit(&addr('c'), 1).unwrap(), u128::MAX);
    }

    #[test]
    fn test_replace_all() {
        let mut ledger = LedgerStore::new();
        ledger.credit(&addr('a'), 100).unwrap();

        let mut snapshot = Ledger::new();
        snapshot.insert(addr('d'), 7);
        ledger.replace_all(snapshot.clone());

        assert_eq!(ledger.get(&addr('a')), None);
        assert_eq!(ledger.snapshot(), snapshot);
    }

    #[test]
    fn test_credit_amount() {
        assert_eq!(credit_amount(ONE_PTE, 10).unwrap(), 10 * ONE_PTE);
        assert_eq!(credit_amount(ONE_PTE, 0).unwrap(), 0);
        assert!(credit_amount(u128::MAX, 2).is_err());
    }

    #[test]
    fn test_total() {
        let mut ledger = LedgerStore::new();
        ledger.credit(&addr('a'), 3).unwrap();
        ledger.credit(&addr('b'), 4).unwrap();
        assert_eq!(ledger.total(), Some(7));

        ledger.credit(&addr('c'), u128::MAX).unwrap();
        assert_eq!(ledger.total(), None);
    }

    proptest! {
        #[test]
        fn prop_credit_adds_rate_times_seconds(
            before in 0u128..=u64::MAX as u128,
            rate in 0u128..=u64::MAX as u128,
            seconds in 0u64..=1_000_000,
        ) {
            let mut ledger = LedgerStore::new();
            ledger.credit(&addr('e'), before).unwrap();

            let amount = credit_amount(rate, seconds).unwrap();
            let after = ledger.credit(&addr('e'), amount).unwrap();
            prop_assert_eq!(after, before + rate * seconds as u128);
        }

        #[test]
        fn prop_credit_is_additive(
            rate in 0u128..=u64::MAX as u128,
            s1 in 0u64..=1_000_000,
            s2 in 0u64..=1_000_000,
        ) {
            let mut split = LedgerStore::new();
            split.credit(&addr('f'), credit_amount(rate, s1).unwrap()).unwrap();
            split.credit(&addr('f'), credit_amount(rate, s2).unwrap()).unwrap();

            let mut once = LedgerStore::new();
            once.credit(&addr('f'), credit_amount(rate, s1 + s2).unwrap()).unwrap();

            prop_assert_eq!(split.get(&addr('f')), once.get(&addr('f')));
        }
    }
}
