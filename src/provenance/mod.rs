//! Byte-granular dataflow provenance: which source bytes could have
//! influenced a computed byte, and through what ancestor chain.
//!
//! [`Word`] is the fundamental unit — a 256-bit stack/memory word modeled as
//! 32 independent provenance cells. [`DataSource`] is a set of [`Source`]s
//! keyed by [`SourceType`]; merging two `DataSource`s is a type-partitioned
//! set union with a location-specific dedup rule (see [`merge_sources`]).

mod word;

pub use word::{
    byte_merge, cellwise_broadcast, cells_to_word, get_data, merge_cells, merge_data_sources,
    new_balance_word, new_call_data_cells, new_call_value, new_code_cells, new_exec_result,
    new_return_data_cells, new_storage_word, new_word_with_nil_ancestor, nil_word, word_merge,
    DataCells, DataSourceRef, Word,
};

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use alloy_primitives::{Address, B256};
use core::fmt;

use crate::ids::CallId;

/// The category of value a byte's provenance could trace back to.
///
/// Mirrors the EVM context opcodes plus the handful of pseudo-sources
/// (`Storage`, `Balance`, `ExecutionResult`) the shadow VM synthesizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum SourceType {
    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallData,
    CallDataSize,
    CodeSize,
    Code,
    GasPrice,
    ExtCodeSize,
    ReturnData,
    ReturnDataSize,
    ExtCodeHash,
    BlockHash,
    Coinbase,
    BlockTimestamp,
    BlockNumber,
    Difficulty,
    Random,
    GasLimit,
    ChainId,
    SelfBalance,
    BaseFee,
    Pc,
    MemorySize,
    GasLeft,
    Storage,
    ExecutionResult,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a [`Source`]'s bytes physically live.
///
/// A closed tagged union in place of the original's per-variant interface
/// implementations — the location shape is determined entirely by the
/// `SourceType` it's attached to (§3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataSourceLocation {
    /// No location info (e.g. block-context pseudo-sources).
    None,
    /// A byte of calldata or return data at `pos` within `call_id`'s payload.
    IoData {
        /// The call whose input/output this byte belongs to.
        call_id: CallId,
        /// Byte offset within that payload.
        pos: usize,
    },
    /// A byte of a contract's code at `pos`.
    Code {
        /// The contract address the code belongs to.
        addr: Address,
        /// Byte offset within that contract's code.
        pos: usize,
    },
    /// A storage slot version.
    Storage {
        /// Owning contract address.
        addr: Address,
        /// Storage slot key.
        slot: B256,
        /// History id (version) of the slot at the time this source was produced.
        hid: usize,
    },
    /// A bare address (e.g. `ADDRESS`/`CALLER`'s identity, `EXTCODESIZE`'s target).
    Address(Address),
    /// A balance version.
    Balance {
        /// The account the balance belongs to.
        addr: Address,
        /// History id (version) of the balance at the time this source was produced.
        hid: usize,
    },
    /// A call identity (e.g. `CALLVALUE`'s owning call, `ExecutionResult`'s call).
    Call(CallId),
}

/// One unit of provenance: a typed, located value with an optional ancestor
/// chain (the `DataSource` that produced the value wrapped here, e.g. the
/// merged cells that were `SSTORE`d to produce a `Storage` source).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Source {
    /// The kind of source this is.
    pub ty: SourceType,
    /// Where it lives.
    pub loc: DataSourceLocation,
    /// The provenance that produced this source's value, if any.
    pub ancestor: Option<DataSource>,
}

/// A reference-counted handle to a [`Source`], shared across every [`Word`]
/// cell and `DataSource` entry that traces back to it. Identity-based dedup
/// rules (§4.2) compare these by pointer.
pub type SourceRef = Rc<Source>;

/// A set of [`Source`]s, partitioned by [`SourceType`], tracing everything
/// that could have influenced one provenance cell or a merged group of them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataSource {
    /// Sources, grouped by type.
    pub sources: BTreeMap<SourceType, Vec<SourceRef>>,
}

impl DataSource {
    /// An empty data source (no provenance recorded).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A data source with a single `Source`.
    pub fn single(ty: SourceType, loc: DataSourceLocation, ancestor: Option<DataSource>) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(ty, alloc::vec![Rc::new(Source { ty, loc, ancestor })]);
        Self { sources }
    }

    /// Iterates every `Source` across every type, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceRef> {
        self.sources.values().flatten()
    }

    /// Whether this data source carries no sources at all.
    pub fn is_empty(&self) -> bool {
        self.sources.values().all(|v| v.is_empty())
    }
}

/// Deduplicates a list of same-`SourceType` sources according to the rule
/// tied to their (shared) location variant:
///
/// - `IoData`, `Storage`, `Balance`: identity (pointer) dedup.
/// - `Code`: dedup by `(address, position)`.
/// - `Address`: dedup by address.
/// - `Call`: dedup by string encoding.
/// - `None`: keep only the first.
///
/// All elements of `sources` are assumed to share the same location variant
/// (callers only ever invoke this per `SourceType` bucket, and a given
/// `SourceType` always carries one location shape).
pub fn merge_sources(sources: Vec<SourceRef>) -> Vec<SourceRef> {
    let Some(first) = sources.first() else { return sources };
    match &first.loc {
        DataSourceLocation::IoData { .. }
        | DataSourceLocation::Storage { .. }
        | DataSourceLocation::Balance { .. } => {
            let mut seen: Vec<*const Source> = Vec::with_capacity(sources.len());
            let mut out = Vec::with_capacity(sources.len());
            for s in sources {
                let ptr = Rc::as_ptr(&s);
                if !seen.contains(&ptr) {
                    seen.push(ptr);
                    out.push(s);
                }
            }
            out
        }
        DataSourceLocation::Code { .. } => {
            let mut seen: Vec<(Address, usize)> = Vec::with_capacity(sources.len());
            let mut out = Vec::with_capacity(sources.len());
            for s in sources {
                let DataSourceLocation::Code { addr, pos } = &s.loc else { unreachable!() };
                let key = (*addr, *pos);
                if !seen.contains(&key) {
                    seen.push(key);
                    out.push(s);
                }
            }
            out
        }
        DataSourceLocation::Address(_) => {
            let mut seen: Vec<Address> = Vec::with_capacity(sources.len());
            let mut out = Vec::with_capacity(sources.len());
            for s in sources {
                let DataSourceLocation::Address(addr) = &s.loc else { unreachable!() };
                if !seen.contains(addr) {
                    seen.push(*addr);
                    out.push(s);
                }
            }
            out
        }
        DataSourceLocation::Call(_) => {
            let mut seen: Vec<String> = Vec::with_capacity(sources.len());
            let mut out = Vec::with_capacity(sources.len());
            for s in sources {
                let DataSourceLocation::Call(call_id) = &s.loc else { unreachable!() };
                let key = call_id.to_string();
                if !seen.contains(&key) {
                    seen.push(key);
                    out.push(s);
                }
            }
            out
        }
        DataSourceLocation::None => alloc::vec![first.clone()],
    }
}
