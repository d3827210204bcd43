//! `Word`: a 256-bit EVM word modeled as 32 independent provenance cells,
//! and the merge operations opcodes use to combine them.

use alloc::rc::Rc;
use alloc::vec::Vec;
use alloy_primitives::Address;
use core::array;

use crate::ids::CallId;

use super::{DataSource, DataSourceLocation, SourceType};

/// A reference-counted [`DataSource`], shared across every `Word` cell that
/// traces back to the same provenance set.
pub type DataSourceRef = Rc<DataSource>;

/// A 256-bit word's provenance: one optional source per byte, most
/// significant byte first (matching the EVM's big-endian stack/memory
/// layout). A `None` cell means that byte has no recorded provenance (e.g.
/// it's a constant zero from padding).
pub type Word = [Option<DataSourceRef>; 32];

/// A word with no provenance recorded for any byte.
pub fn nil_word() -> Word {
    array::from_fn(|_| None)
}

/// Merges the `DataSource`s referenced by two single-cell source refs.
///
/// `None` is the merge identity: `byte_merge(None, x) == x`. When both cells
/// carry provenance, the result is a fresh `DataSource` holding the
/// type-partitioned union of both (§4.2's dedup rules applied per type).
pub fn byte_merge(a: Option<&DataSourceRef>, b: Option<&DataSourceRef>) -> Option<DataSourceRef> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x.clone()),
        (None, Some(y)) => Some(y.clone()),
        (Some(x), Some(y)) => Some(Rc::new(merge_data_sources(&[x.as_ref(), y.as_ref()]))),
    }
}

/// Elementwise [`byte_merge`] of two words, e.g. the transfer function for a
/// binary arithmetic opcode like `ADD` or `MUL`.
pub fn word_merge(a: &Word, b: &Word) -> Word {
    array::from_fn(|i| byte_merge(a[i].as_ref(), b[i].as_ref()))
}

/// Broadcasts a single `DataSource` to every byte of a word — used for
/// pseudo-values (`ADDRESS`, `BALANCE`, `GASPRICE`, ...) whose provenance
/// isn't meaningfully byte-granular.
pub fn cellwise_broadcast(ds: DataSourceRef) -> Word {
    array::from_fn(|_| Some(ds.clone()))
}

/// Merges every non-`None` cell of a byte-provenance slice into a single
/// `DataSource`, e.g. the transfer function for an opcode that consumes a
/// whole word (or an arbitrary-length memory/calldata range) and produces
/// one scalar result (`ISZERO`, a `JUMPI` condition, `SHA3`'s input, ...).
/// Accepts both [`Word`]s and [`DataCells`] slices.
///
/// Returns `None` if the range carries no provenance at all.
pub fn merge_cells(cells: &[Option<DataSourceRef>]) -> Option<DataSourceRef> {
    let refs: Vec<&DataSource> = cells.iter().filter_map(|c| c.as_ref().map(|rc| rc.as_ref())).collect();
    if refs.is_empty() {
        return None;
    }
    Some(Rc::new(merge_data_sources(&refs)))
}

/// Merges several `DataSource`s into one: for each `SourceType` present in
/// any input, collects every `Source` tagged with it and deduplicates per
/// [`super::merge_sources`].
pub fn merge_data_sources(sources: &[&DataSource]) -> DataSource {
    let mut by_type: alloc::collections::BTreeMap<SourceType, Vec<super::SourceRef>> =
        alloc::collections::BTreeMap::new();
    for ds in sources {
        for (ty, list) in &ds.sources {
            by_type.entry(*ty).or_default().extend(list.iter().cloned());
        }
    }
    for list in by_type.values_mut() {
        let taken = core::mem::take(list);
        *list = super::merge_sources(taken);
    }
    DataSource { sources: by_type }
}

/// Builds a word whose provenance is a single fresh, ancestor-less `Source`
/// broadcast to its low `size` bytes (right-aligned, matching how the EVM
/// right-justifies short context values like `ADDRESS` or `CALLER` within a
/// 32-byte stack word). `size == 32` broadcasts to the whole word.
pub fn new_word_with_nil_ancestor(ty: SourceType, loc: DataSourceLocation, size: usize) -> Word {
    let ds = Rc::new(DataSource::single(ty, loc, None));
    let mut word = nil_word();
    let start = 32usize.saturating_sub(size);
    for cell in word.iter_mut().take(32).skip(start) {
        *cell = Some(ds.clone());
    }
    word
}

/// One provenance cell per byte of a variable-length payload — a call's
/// input or output buffer, or a contract's code — as opposed to [`Word`]'s
/// fixed 32 cells. Unlike a `Word`'s cells, every position here is
/// materialized (`Some`): even a byte with no ancestor still carries a fresh
/// `Source` recording *where* it was read from.
pub type DataCells = Vec<Option<DataSourceRef>>;

/// Builds a call's input buffer: one `CallData` source per byte, positioned
/// by its offset into the call, each chained to the corresponding entry of
/// `ancestors` (the argument window's provenance at the call site, or all
/// `None` for the transaction's top-level input).
pub fn new_call_data_cells(call_id: &CallId, ancestors: &[Option<DataSourceRef>]) -> DataCells {
    new_io_data_cells(SourceType::CallData, call_id, ancestors)
}

/// Builds a call's output buffer: one `ReturnData` source per byte, chained
/// to the corresponding entry of `ancestors` (the returned memory window's
/// provenance at `RETURN`/`REVERT` time).
pub fn new_return_data_cells(call_id: &CallId, ancestors: &[Option<DataSourceRef>]) -> DataCells {
    new_io_data_cells(SourceType::ReturnData, call_id, ancestors)
}

fn new_io_data_cells(ty: SourceType, call_id: &CallId, ancestors: &[Option<DataSourceRef>]) -> DataCells {
    ancestors
        .iter()
        .enumerate()
        .map(|(pos, ancestor)| {
            let ancestor = ancestor.as_ref().map(|rc| (**rc).clone());
            Some(Rc::new(DataSource::single(ty, DataSourceLocation::IoData { call_id: call_id.clone(), pos }, ancestor)))
        })
        .collect()
}

/// `CODECOPY`/`EXTCODECOPY`: one `Code` source per byte of `addr`'s code
/// starting at `start`, with no ancestor (code is treated as a root source).
pub fn new_code_cells(addr: Address, start: u64, size: u64) -> DataCells {
    (0..size)
        .map(|i| Some(Rc::new(DataSource::single(SourceType::Code, DataSourceLocation::Code { addr, pos: (start + i) as usize }, None))))
        .collect()
}

/// Slices `data[start..start+size]`, clamping both bounds to `data`'s length
/// and right-padding the result with `None` out to `size` — mirrors the
/// original's `getData`/`rightPadNil`: an out-of-range read yields cells with
/// no provenance rather than an error.
pub fn get_data(data: &[Option<DataSourceRef>], start: u64, size: u64) -> DataCells {
    let len = data.len() as u64;
    let start = start.min(len);
    let end = (start + size).min(len);
    let mut out: DataCells = data[start as usize..end as usize].to_vec();
    out.resize(size as usize, None);
    out
}

/// Packs exactly 32 [`DataCells`] into a [`Word`], e.g. the result of
/// `CALLDATALOAD`. Shorter input is right-zero-padded with `None`; longer
/// input is truncated.
pub fn cells_to_word(cells: &[Option<DataSourceRef>]) -> Word {
    array::from_fn(|i| cells.get(i).cloned().flatten())
}

/// `SLOAD`: the whole word's provenance is the storage slot's current
/// version, chained to whatever was `SSTORE`d to produce that version.
pub fn new_storage_word(addr: Address, slot: alloy_primitives::B256, hid: usize, ancestor: Option<DataSource>) -> Word {
    let ds = Rc::new(DataSource::single(SourceType::Storage, DataSourceLocation::Storage { addr, slot, hid }, ancestor));
    cellwise_broadcast(ds)
}

/// `BALANCE`/`SELFBALANCE`: the whole word's provenance is the account's
/// current balance version, chained to what produced that version.
pub fn new_balance_word(addr: Address, hid: usize, ancestor: Option<DataSource>) -> Word {
    let ds = Rc::new(DataSource::single(SourceType::Balance, DataSourceLocation::Balance { addr, hid }, ancestor));
    cellwise_broadcast(ds)
}

/// The success/failure flag a `CALL`-family opcode pushes after returning:
/// provenance is simply "the outcome of this call".
pub fn new_exec_result(call_id: &CallId) -> Word {
    let ds = Rc::new(DataSource::single(SourceType::ExecutionResult, DataSourceLocation::Call(call_id.clone()), None));
    cellwise_broadcast(ds)
}

/// `CALLVALUE`: unlike the other context pseudo-values, each byte gets its
/// own `Source` (rather than one broadcast `Source`) so it can carry its own
/// ancestor — the corresponding byte of the value argument's provenance at
/// the call site that created `call_id`.
pub fn new_call_value(call_id: &CallId, value_ancestor: &Word) -> Word {
    array::from_fn(|i| {
        let ancestor = value_ancestor[i].as_ref().map(|rc| (**rc).clone());
        Some(Rc::new(DataSource::single(SourceType::CallValue, DataSourceLocation::Call(call_id.clone()), ancestor)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CallId;

    #[test]
    fn byte_merge_identity() {
        let word = new_word_with_nil_ancestor(SourceType::Origin, DataSourceLocation::Address(Address::ZERO), 20);
        assert_eq!(byte_merge(None, word[31].as_ref()).unwrap().sources, word[31].as_ref().unwrap().sources);
    }

    #[test]
    fn word_with_nil_ancestor_right_aligns() {
        let word = new_word_with_nil_ancestor(SourceType::Origin, DataSourceLocation::Address(Address::ZERO), 20);
        assert!(word[0..12].iter().all(|c| c.is_none()));
        assert!(word[12..32].iter().all(|c| c.is_some()));
        // every populated byte shares the exact same source (single broadcast Source).
        let first = Rc::as_ptr(word[12].as_ref().unwrap());
        assert!(word[12..32].iter().all(|c| Rc::as_ptr(c.as_ref().unwrap()) == first));
    }

    #[test]
    fn call_data_cells_chain_ancestors_by_position() {
        let call_id = CallId::root();
        let cells = new_call_data_cells(&call_id, &alloc::vec![None, None, None, None]);
        assert_eq!(cells.len(), 4);
        assert!(cells.iter().all(|c| c.is_some()));
    }

    #[test]
    fn get_data_pads_past_input_length() {
        let call_id = CallId::root();
        let cells = new_call_data_cells(&call_id, &alloc::vec![None; 4]);
        let sliced = get_data(&cells, 0, 32);
        assert_eq!(sliced.len(), 32);
        assert!(sliced[0..4].iter().all(|c| c.is_some()));
        assert!(sliced[4..32].iter().all(|c| c.is_none()));
    }

    #[test]
    fn merge_cells_of_empty_word_is_none() {
        assert!(merge_cells(&nil_word()).is_none());
    }

    #[test]
    fn call_value_carries_per_cell_ancestor() {
        let call_id = CallId::root();
        let cells = new_call_data_cells(&call_id, &alloc::vec![None; 32]);
        let ancestor = cells_to_word(&get_data(&cells, 0, 32));
        let value = new_call_value(&call_id, &ancestor);
        // every cell is its own distinct Source (not a single broadcast one).
        assert_ne!(Rc::as_ptr(value[0].as_ref().unwrap()), Rc::as_ptr(value[1].as_ref().unwrap()));
    }
}
