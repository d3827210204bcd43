//! Chain-specific plumbing injected into the emulator.
//!
//! The original implementation resolved precompiles and address/hash
//! conversions through process-wide function variables. Here that's an
//! explicit value passed through the emulator instead.

use alloc::boxed::Box;
use alloy_primitives::{Address, U256};
use core::fmt;

/// Minimal block header fields needed to resolve the active precompile set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Block number.
    pub number: u64,
    /// Block difficulty (zero post-merge; callers on PoW chains set it).
    pub difficulty: U256,
}

/// Resolves which addresses are precompiles for a given header, and anything
/// else that depends on the target chain's rules.
///
/// A precompile target still occupies a slot in its parent's child-call list
/// in the ingest format, but never gets a nested frame replayed for it (no
/// `CaptureEnter`/`CaptureExit`), so the emulator must recognize a
/// `CALL`-family target as a precompile before deciding whether to open a
/// child frame for it or just advance past its slot.
pub trait ChainAdapter: fmt::Debug {
    /// Whether `address` is a precompile under the rules active at `header`.
    fn is_precompile(&self, address: Address, header: &Header) -> bool;
}

/// The canonical Ethereum precompile range, addresses `0x01..=0x09`
/// (ECRECOVER through BLAKE2F), ignoring hardfork-specific extensions.
///
/// This is the set the dataflow tracer's own precompile short-circuit (§4.3)
/// is written against; a chain with a wider or narrower precompile range
/// should supply its own [`ChainAdapter`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticPrecompileRange;

impl ChainAdapter for StaticPrecompileRange {
    fn is_precompile(&self, address: Address, _header: &Header) -> bool {
        let bytes = address.into_array();
        bytes[..19].iter().all(|b| *b == 0) && (1..=9).contains(&bytes[19])
    }
}

/// Whether a class-1 "step flagged an error but the frame has none" mismatch
/// aborts the replay (`Strict`) or is logged and treated as no error (`Warn`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorMode {
    /// Abort the replay with [`crate::error::ReplayError::MissingFrameError`].
    Strict,
    /// Log a warning via `tracing::warn!` and proceed as if there were no error.
    #[default]
    Warn,
}

/// Replay-wide configuration: the chain adapter and the error-handling mode.
#[derive(Debug)]
pub struct ReplayConfig {
    chain: Box<dyn ChainAdapter>,
    error_mode: ErrorMode,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { chain: Box::new(StaticPrecompileRange), error_mode: ErrorMode::default() }
    }
}

impl ReplayConfig {
    /// Starts a config using the given chain adapter.
    pub fn new(chain: impl ChainAdapter + 'static) -> Self {
        Self { chain: Box::new(chain), error_mode: ErrorMode::default() }
    }

    /// Sets the error-handling mode, returning `self` for chaining.
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// The configured chain adapter.
    pub fn chain(&self) -> &dyn ChainAdapter {
        self.chain.as_ref()
    }

    /// The configured error-handling mode.
    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }
}
