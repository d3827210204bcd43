//! Shadow memory: tracks per-byte provenance alongside the real EVM memory,
//! sparsely — untouched offsets simply carry no entry.

use alloy_primitives::map::HashMap;

use crate::provenance::{DataSourceRef, Word};

/// A transaction-scoped shadow memory for one call frame.
#[derive(Debug, Default)]
pub struct ShadowMemory {
    cells: HashMap<u64, DataSourceRef>,
}

impl ShadowMemory {
    /// A fresh, empty shadow memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// `MLOAD`: the provenance of the 32 bytes starting at `offset`.
    pub fn mload(&self, offset: u64) -> Word {
        core::array::from_fn(|i| self.cells.get(&(offset + i as u64)).cloned())
    }

    /// Provenance of an arbitrary-length byte range, e.g. for `SHA3`'s
    /// input or a `CALL`'s forwarded calldata.
    pub fn mload_chunk(&self, start: u64, size: u64) -> alloc::vec::Vec<Option<DataSourceRef>> {
        (start..start + size).map(|i| self.cells.get(&i).cloned()).collect()
    }

    /// `MSTORE`: records provenance for each byte of `value` that carries any
    /// (a `None` cell leaves the existing entry, if any, untouched — matching
    /// the real EVM only ever overwriting memory it actually writes to).
    pub fn mstore(&mut self, offset: u64, value: &Word) {
        for (i, cell) in value.iter().enumerate() {
            if let Some(source) = cell {
                self.cells.insert(offset + i as u64, source.clone());
            }
        }
    }

    /// `MSTORE8`.
    pub fn mstore8(&mut self, offset: u64, value: Option<DataSourceRef>) {
        if let Some(source) = value {
            self.cells.insert(offset, source);
        }
    }

    /// Writes an arbitrary-length byte range, e.g. `CALLDATACOPY`/`CODECOPY`
    /// into memory. `value` is clamped to `size` if shorter.
    pub fn mstore_chunk(&mut self, start: u64, size: u64, value: &[Option<DataSourceRef>]) {
        if value.is_empty() {
            return;
        }
        let size = size.min(value.len() as u64);
        for i in 0..size {
            if let Some(source) = &value[i as usize] {
                self.cells.insert(start + i, source.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{new_word_with_nil_ancestor, DataSourceLocation, SourceType};
    use alloy_primitives::Address;

    #[test]
    fn mstore_then_mload_roundtrips() {
        let mut mem = ShadowMemory::new();
        let word = new_word_with_nil_ancestor(SourceType::Origin, DataSourceLocation::Address(Address::ZERO), 32);
        mem.mstore(0, &word);
        let loaded = mem.mload(0);
        assert!(loaded.iter().all(|c| c.is_some()));
    }

    #[test]
    fn untouched_offsets_carry_no_provenance() {
        let mem = ShadowMemory::new();
        assert!(mem.mload(0).iter().all(|c| c.is_none()));
    }
}
