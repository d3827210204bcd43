//! Shadow balances: the same append-only, revertible history scheme as
//! [`crate::shadow::storage`], keyed by address instead of `(address, slot)`
//! and indexed by [`crate::ids::CallId`] instead of [`crate::ids::DcfgId`]
//! (native value transfers are call-level events, not basic-block-level
//! ones).

use alloc::vec::Vec;
use alloy_primitives::{map::HashMap, Address};

use crate::ids::CallId;
use crate::provenance::{new_balance_word, DataSource, Word};

/// One version of an account's balance.
#[derive(Debug, Clone)]
pub struct BalanceValue {
    addr: Address,
    hid: usize,
    source: Word,
    reads: Vec<CallId>,
    write: Option<CallId>,
}

impl BalanceValue {
    /// The provenance of this value's 32 bytes.
    pub fn sources(&self) -> &Word {
        &self.source
    }

    /// Every call that read this version.
    pub fn reads(&self) -> &[CallId] {
        &self.reads
    }

    /// The call that wrote this version, if any.
    pub fn write(&self) -> Option<&CallId> {
        self.write.as_ref()
    }
}

/// Per-address balance value histories for one transaction.
#[derive(Debug, Default)]
pub struct ShadowBalance {
    accounts: HashMap<Address, Vec<BalanceValue>>,
}

impl ShadowBalance {
    /// A fresh, empty shadow balance table.
    pub fn new() -> Self {
        Self::default()
    }

    /// `BALANCE`/`SELFBALANCE`: returns the account's current balance,
    /// recording `call_id` as a reader. An account with no recorded history
    /// reads as an implicit zero with no provenance, materialized as
    /// `hid == 0`.
    pub fn read_balance(&mut self, addr: Address, call_id: CallId) -> Word {
        let versions = self.accounts.entry(addr).or_default();
        if let Some(current) = versions.last_mut() {
            current.reads.push(call_id);
            return current.source.clone();
        }
        let word = new_balance_word(addr, 0, None);
        versions.push(BalanceValue { addr, hid: 0, source: word.clone(), reads: alloc::vec![call_id], write: None });
        word
    }

    /// Records a balance-changing transfer (native value in/out), appending
    /// a new version and returning its `hid`.
    pub fn write_balance(&mut self, addr: Address, value: Word, call_id: CallId) -> usize {
        let versions = self.accounts.entry(addr).or_default();
        let hid = versions.len();
        let ancestor = merge_word_into_data_source(&value);
        versions.push(BalanceValue { addr, hid, source: new_balance_word(addr, hid, ancestor), reads: Vec::new(), write: Some(call_id) });
        hid
    }

    /// Truncates `addr`'s balance history back to `hid` on a reverted call.
    pub fn revert(&mut self, addr: Address, hid: usize) {
        let Some(versions) = self.accounts.get_mut(&addr) else { return };
        if hid == 0 {
            self.accounts.remove(&addr);
        } else if hid < versions.len() {
            versions.truncate(hid);
        }
    }

    /// The full recorded history of an account's balance, oldest first.
    pub fn history(&self, addr: Address) -> &[BalanceValue] {
        self.accounts.get(&addr).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn merge_word_into_data_source(value: &Word) -> Option<DataSource> {
    let refs: Vec<&DataSource> = value.iter().filter_map(|c| c.as_ref().map(|rc| rc.as_ref())).collect();
    if refs.is_empty() {
        return None;
    }
    Some(crate::provenance::merge_data_sources(&refs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{new_word_with_nil_ancestor, DataSourceLocation, SourceType};

    #[test]
    fn unwritten_account_reads_as_zero_with_hid_zero() {
        let mut balance = ShadowBalance::new();
        let addr = Address::ZERO;
        balance.read_balance(addr, CallId::root());
        assert_eq!(balance.history(addr).len(), 1);
        assert_eq!(balance.history(addr)[0].hid, 0);
    }

    #[test]
    fn write_then_revert_truncates_history() {
        let mut balance = ShadowBalance::new();
        let addr = Address::ZERO;
        let value = new_word_with_nil_ancestor(SourceType::Origin, DataSourceLocation::Address(addr), 32);
        balance.write_balance(addr, value.clone(), CallId::root());
        balance.write_balance(addr, value, CallId::root().child(0));
        assert_eq!(balance.history(addr).len(), 2);
        balance.revert(addr, 1);
        assert_eq!(balance.history(addr).len(), 1);
    }
}
