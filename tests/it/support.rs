//! Shared fixture builders for the end-to-end scenario and invariant tests.

use epg_tracers::chain::{Header, ReplayConfig, StaticPrecompileRange};
use epg_tracers::ingest::{CallFrame, ExecutionResult, StructLogRes};
use epg_tracers::TraceEmulator;

pub fn header() -> Header {
    Header::default()
}

pub fn config() -> ReplayConfig {
    ReplayConfig::new(StaticPrecompileRange)
}

pub fn frame(kind: &str, from: &str, to: &str, value: &str) -> CallFrame {
    CallFrame {
        kind: kind.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        value: value.to_string(),
        gas: "0x5208".to_string(),
        gas_used: "0x5208".to_string(),
        input: "0x".to_string(),
        output: "0x".to_string(),
        error: String::new(),
        calls: Vec::new(),
    }
}

pub fn step(pc: u64, op: &str, depth: i64, stack: &[&str]) -> StructLogRes {
    StructLogRes {
        pc,
        op: op.to_string(),
        gas: 1_000_000,
        gas_cost: 3,
        depth,
        error: None,
        stack: Some(stack.iter().map(|s| s.to_string()).collect()),
        memory: Some(Vec::new()),
        storage: None,
    }
}

pub fn exec(logs: Vec<StructLogRes>) -> ExecutionResult {
    ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: logs }
}

pub const ALICE: &str = "0x0000000000000000000000000000000000000001";
pub const BOB: &str = "0x0000000000000000000000000000000000000002";
pub const CAROL: &str = "0x0000000000000000000000000000000000000003";
/// Outside the `StaticPrecompileRange` (addresses `0x01..=0x09`), unlike
/// [`CAROL`] — use this wherever a fixture needs a real contract callee that
/// must not be mistaken for a precompile.
pub const DAVE: &str = "0x000000000000000000000000000000000000000a";

pub fn emulator() -> TraceEmulator {
    TraceEmulator::new()
}
