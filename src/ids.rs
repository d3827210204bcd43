//! Hierarchical identifiers for call frames and executed basic blocks.

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::cmp::Ordering;
use core::fmt;

use crate::error::ReplayError;

/// Identifies a call frame by the path of sibling indices from the root.
///
/// The root call is the empty path. `CallId([0])` is the root's first child,
/// `CallId([0, 2])` is that child's third child, and so on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CallId(Vec<i64>);

impl CallId {
    /// The root call id (the empty path).
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a call id from an explicit path of sibling indices.
    pub fn new(path: impl Into<Vec<i64>>) -> Self {
        Self(path.into())
    }

    /// Number of ancestors between this call and the root.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root call id.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The parent call id, obtained by dropping the last sibling index.
    ///
    /// The root is its own fixed point under this operation in the sense
    /// that `CallId::root().parent() == CallId::root()`.
    pub fn parent(&self) -> Self {
        if self.0.is_empty() {
            return Self::root();
        }
        Self(self.0[..self.0.len() - 1].to_vec())
    }

    /// Appends a sibling index, descending one level into the call tree.
    pub fn child(&self, sibling_index: i64) -> Self {
        let mut path = self.0.clone();
        path.push(sibling_index);
        Self(path)
    }

    /// The longest common prefix of this id and `other`.
    pub fn common_parent(&self, other: &Self) -> Self {
        let n = self.0.iter().zip(other.0.iter()).take_while(|(a, b)| a == b).count();
        Self(self.0[..n].to_vec())
    }

    /// Raw sibling-index path, read-only.
    pub fn path(&self) -> &[i64] {
        &self.0
    }

    pub(crate) fn from_path(path: Vec<i64>) -> Self {
        Self(path)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0")?;
        for idx in &self.0 {
            write!(f, ":{idx}")?;
        }
        Ok(())
    }
}

impl core::str::FromStr for CallId {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "0" {
            return Ok(Self::root());
        }
        let mut parts = s.split(':');
        if parts.next() != Some("0") {
            return Err(ReplayError::MalformedId(s.to_string()));
        }
        let path = parts
            .map(|p| p.parse::<i64>().map_err(|_| ReplayError::MalformedId(s.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(path))
    }
}

impl PartialOrd for CallId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CallId {
    /// Lexicographic order over the sibling-index path, depth-breaking ties
    /// by treating a shorter path as smaller than any of its extensions. This
    /// agrees with a depth-first, left-to-right traversal of the call tree.
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Identifies one occurrence of an executed basic block within a transaction.
///
/// A `DcfgId` is a `CallId` plus the id of the basic block inside that call's
/// DCFG chain, plus a snapshot of how many sibling calls had completed when
/// the block was entered (`call_count`) — the same block executed before and
/// after a nested call within the same parent block are distinguishable by
/// position alone, but `call_count` lets a `DcfgId` be compared against ids
/// from sibling or nested calls without walking the tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DcfgId {
    call_id: CallId,
    block_id: i64,
    call_count: i64,
}

impl DcfgId {
    /// Builds a new dcfg id.
    pub fn new(call_id: CallId, block_id: i64, call_count: i64) -> Self {
        Self { call_id, block_id, call_count }
    }

    /// The call this block occurrence belongs to.
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// The block's sequential id within its call.
    pub fn block_id(&self) -> i64 {
        self.block_id
    }

    /// Number of sibling calls completed in the parent when this block ran.
    pub fn call_count(&self) -> i64 {
        self.call_count
    }
}

impl fmt::Display for DcfgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.call_id, self.block_id, self.call_count)
    }
}

impl core::str::FromStr for DcfgId {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '-');
        let call_count = parts.next().ok_or_else(|| ReplayError::MalformedId(s.to_string()))?;
        let block_id = parts.next().ok_or_else(|| ReplayError::MalformedId(s.to_string()))?;
        let call_id = parts.next().ok_or_else(|| ReplayError::MalformedId(s.to_string()))?;
        Ok(Self {
            call_id: call_id.parse()?,
            block_id: block_id
                .parse()
                .map_err(|_| ReplayError::MalformedId(s.to_string()))?,
            call_count: call_count
                .parse()
                .map_err(|_| ReplayError::MalformedId(s.to_string()))?,
        })
    }
}

impl PartialOrd for DcfgId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DcfgId {
    fn cmp(&self, other: &Self) -> Ordering {
        let common = self.call_id.common_parent(&other.call_id);
        let (a, b) = (self.call_id.depth(), other.call_id.depth());
        if common.depth() == a || common.depth() == b {
            // One call id is a prefix of the other (or they're equal): same call frame.
            if a == b {
                return self.block_id.cmp(&other.block_id);
            }
            if a > b {
                // `self` is nested inside (or past) `other`'s call; compare against
                // the sibling-count snapshot at the point `other` entered.
                return match self.call_id.path()[b].cmp(&other.call_count) {
                    Ordering::Less => Ordering::Less,
                    _ => Ordering::Greater,
                };
            }
            return match self.call_count.cmp(&other.call_id.path()[a]) {
                Ordering::Greater => Ordering::Greater,
                _ => Ordering::Less,
            };
        }
        self.call_id.cmp(&other.call_id)
    }
}

/// Formats a string identifier into the `<CallId>-<blockId>-<callCount>` wire
/// form used by [`DcfgId::to_string`], exposed for callers that only have the
/// parts on hand.
pub fn format_dcfg_id(call_id: &CallId, block_id: i64, call_count: i64) -> String {
    format!("{call_id}-{block_id}-{call_count}")
}
