//! Error types for the replay engine.
//!
//! Fatal integrity errors (this enum) abort the current transaction replay
//! and are returned to the caller. Re-enterable in-trace faults and
//! missing-data warnings never surface here — they are handled internally
//! (see the tracer modules) and only logged via `tracing`.

use alloc::string::String;

/// A fatal integrity error that aborts the current transaction replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// A `CALL`-family opcode was observed but the matching call-frame's
    /// recorded type doesn't match the opcode that entered it.
    #[error("opcode/frame-type mismatch at call id {call_id}: expected {expected}, frame says {actual}")]
    OpcodeFrameMismatch {
        /// The call id at the mismatching boundary.
        call_id: String,
        /// The opcode mnemonic observed in the structured log.
        expected: String,
        /// The frame's recorded type.
        actual: String,
    },

    /// A structured-log step carried an opcode mnemonic not in the dispatch
    /// table.
    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),

    /// Appending bytes to a basic block at a pc the block doesn't expect, or
    /// with bytes that don't match what's already recorded there.
    #[error("inconsistent basic block at pc {pc}: {reason}")]
    InconsistentBasicBlock {
        /// Offset within the code the append was attempted at.
        pc: u64,
        /// What went wrong.
        reason: String,
    },

    /// Malformed hex encountered while decoding an ingest payload.
    #[error("malformed hex in {field}: {value:?}")]
    MalformedHex {
        /// Name of the field being decoded.
        field: String,
        /// The offending raw value.
        value: String,
    },

    /// A structured-log step flagged an error but its frame carried no error
    /// string, and strict mode is enabled (see [`crate::chain::ReplayConfig`]).
    #[error("step at pc {pc} flagged an error but the enclosing call frame has none")]
    MissingFrameError {
        /// Offset within the code the step was at.
        pc: u64,
    },

    /// The chain adapter could not resolve whether an address is a
    /// precompile for the given header.
    #[error("failed to resolve precompile set for header")]
    PrecompileResolution,

    /// A `CallId`/`DcfgId` wire string could not be parsed.
    #[error("malformed identifier: {0:?}")]
    MalformedId(String),

    /// The graph sink returned a shape the materializer didn't expect.
    #[error("unexpected shape from graph sink: {0}")]
    UnexpectedSinkShape(String),
}
