//! Reconstructs an execution property graph from a completed EVM transaction
//! trace: the call tree, native/ERC-20 value flows, the dynamic control-flow
//! graph of executed basic blocks, and a byte-granular dataflow provenance
//! graph tying every computed byte back to its ultimate sources.
//!
//! The engine replays a structured-log trace plus its call-frame tree through
//! four cooperating shadow tracers ([`tracing::call_id`], [`tracing::dcfg`],
//! [`tracing::dataflow`], [`tracing::call_trace`]), driven by
//! [`emulator::TraceEmulator`]. It never executes contract bytecode itself —
//! it is strictly a replayer over an authoritative, already-executed trace.

#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]

extern crate alloc;

/// Chain-specific plumbing (precompile resolution, replay configuration).
pub mod chain;

/// Fatal integrity errors surfaced to callers.
pub mod error;

/// The graph materializer: the abstract node/edge shape emitted to an
/// external graph sink (§6 is out of scope; this module only specifies what
/// gets walked and in what order).
pub mod graph;

/// Hierarchical call and dynamic-control-flow-graph identifiers.
pub mod ids;

/// JSON ingest wire types (`ExecutionResult`, `StructLogRes`, `CallFrame`)
/// and the decoded runtime view the tracers operate on.
pub mod ingest;

/// Opcode mnemonic table built on `revm`'s opcode byte constants.
pub mod opcode;

/// Byte-granular provenance: `SourceType`, `DataSource`, `Word`, and their
/// merge algebra.
pub mod provenance;

/// Shadow storage and balance maps: history-indexed, revertible per-slot and
/// per-address value timelines.
pub mod shadow;

/// The trace emulator and the four cooperating tracers it drives.
pub mod tracing;

pub use chain::{ChainAdapter, Header, ReplayConfig};
pub use error::ReplayError;
pub use ids::{CallId, DcfgId};
pub use tracing::emulator::{TraceEmulator, TraceResult};
pub use tracing::Tracer;
