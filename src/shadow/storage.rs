//! Shadow storage: an append-only, revertible history of every value ever
//! written to a contract's storage slot.
//!
//! Every `SSTORE` appends a new [`StorageValue`] rather than overwriting the
//! previous one; a `REVERT` truncates the affected slots' histories back to
//! the point the reverted call entered. The index into a slot's history is
//! its `hid` ("history id"), the same value [`crate::provenance::DataSourceLocation::Storage`]
//! carries.

use alloc::vec::Vec;
use alloy_primitives::{map::HashMap, Address, B256};

use crate::ids::DcfgId;
use crate::provenance::{new_storage_word, DataSource, DataSourceRef, Word};

/// One version of a storage slot's value.
#[derive(Debug, Clone)]
pub struct StorageValue {
    addr: Address,
    slot: B256,
    hid: usize,
    source: Word,
    slot_source: Option<DataSource>,
    reads: Vec<DcfgId>,
    write: Option<DcfgId>,
}

impl StorageValue {
    /// The provenance of this value's 32 bytes.
    pub fn sources(&self) -> &Word {
        &self.source
    }

    /// Every basic-block occurrence that read this version.
    pub fn reads(&self) -> &[DcfgId] {
        &self.reads
    }

    /// The basic-block occurrence that wrote this version, if any (the
    /// implicit zero-value version at `hid == 0` has no writer).
    pub fn write(&self) -> Option<&DcfgId> {
        self.write.as_ref()
    }

    /// The provenance of the slot key expression used to reach this value.
    pub fn slot_source(&self) -> Option<&DataSource> {
        self.slot_source.as_ref()
    }
}

/// Per-address, per-slot storage value histories for one transaction.
#[derive(Debug, Default)]
pub struct ShadowStorage {
    slots: HashMap<Address, HashMap<B256, Vec<StorageValue>>>,
}

impl ShadowStorage {
    /// A fresh, empty shadow storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// `SLOAD`: returns the slot's current value, recording this block
    /// occurrence as a reader. A slot with no recorded history reads as an
    /// implicit zero with no provenance, and that zero-value version is
    /// materialized as `hid == 0` so subsequent reads see the same reader
    /// list.
    pub fn sload(&mut self, addr: Address, slot: B256, slot_source: Option<DataSource>, dcfg_id: DcfgId) -> Word {
        let versions = self.slots.entry(addr).or_default().entry(slot).or_default();
        if let Some(current) = versions.last_mut() {
            current.reads.push(dcfg_id);
            return current.source.clone();
        }
        let word = new_storage_word(addr, slot, 0, None);
        versions.push(StorageValue {
            addr,
            slot,
            hid: 0,
            source: word.clone(),
            slot_source,
            reads: alloc::vec![dcfg_id],
            write: None,
        });
        word
    }

    /// `SSTORE`: appends a new version to the slot's history and returns its
    /// `hid`.
    pub fn sstore(
        &mut self,
        addr: Address,
        slot: B256,
        slot_source: Option<DataSource>,
        value: Word,
        dcfg_id: DcfgId,
    ) -> usize {
        let versions = self.slots.entry(addr).or_default().entry(slot).or_default();
        let hid = versions.len();
        let ancestor = merge_word_into_data_source(&value);
        versions.push(StorageValue {
            addr,
            slot,
            hid,
            source: new_storage_word(addr, slot, hid, ancestor),
            slot_source,
            reads: Vec::new(),
            write: Some(dcfg_id),
        });
        hid
    }

    /// Truncates `(addr, slot)`'s history back to `hid`, discarding every
    /// version written after a reverted call entered. `hid == 0` drops the
    /// slot's history entirely (nothing survives a revert to before the
    /// slot's first write within this transaction).
    pub fn revert(&mut self, addr: Address, slot: B256, hid: usize) {
        let Some(by_slot) = self.slots.get_mut(&addr) else { return };
        let Some(versions) = by_slot.get_mut(&slot) else { return };
        if hid == 0 {
            by_slot.remove(&slot);
        } else if hid < versions.len() {
            versions.truncate(hid);
        }
    }

    /// The full recorded history of a slot, oldest first, for graph
    /// materialization.
    pub fn history(&self, addr: Address, slot: B256) -> &[StorageValue] {
        self.slots.get(&addr).and_then(|by_slot| by_slot.get(&slot)).map(Vec::as_slice).unwrap_or(&[])
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
    use crate::ids::CallId;
    use crate::provenance::{new_word_with_nil_ancestor, DataSourceLocation, SourceType};

    fn dcfg(n: i64) -> DcfgId {
        DcfgId::new(CallId::root(), n, 0)
    }

    #[test]
    fn unwritten_slot_reads_as_zero_with_hid_zero() {
        let mut storage = ShadowStorage::new();
        let addr = Address::ZERO;
        let slot = B256::ZERO;
        storage.sload(addr, slot, None, dcfg(0));
        assert_eq!(storage.history(addr, slot).len(), 1);
        assert_eq!(storage.history(addr, slot)[0].hid, 0);
    }

    #[test]
    fn sstore_appends_and_revert_truncates() {
        let mut storage = ShadowStorage::new();
        let addr = Address::ZERO;
        let slot = B256::ZERO;
        let value = new_word_with_nil_ancestor(SourceType::Origin, DataSourceLocation::Address(addr), 32);
        let hid1 = storage.sstore(addr, slot, None, value, dcfg(0));
        let hid2 = storage.sstore(addr, slot, None, value, dcfg(1));
        assert_eq!((hid1, hid2), (0, 1));
        assert_eq!(storage.history(addr, slot).len(), 2);
        storage.revert(addr, slot, 1);
        assert_eq!(storage.history(addr, slot).len(), 1);
    }

    #[test]
    fn revert_to_hid_zero_drops_slot_entirely() {
        let mut storage = ShadowStorage::new();
        let addr = Address::ZERO;
        let slot = B256::ZERO;
        let value = new_word_with_nil_ancestor(SourceType::Origin, DataSourceLocation::Address(addr), 32);
        storage.sstore(addr, slot, None, value, dcfg(0));
        storage.revert(addr, slot, 0);
        assert!(storage.history(addr, slot).is_empty());
    }
}
