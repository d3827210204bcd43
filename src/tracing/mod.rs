//! The trace emulator and the four cooperating shadow tracers it drives.
//!
//! Each tracer implements the same [`Tracer`] lifecycle a native EVM debug
//! tracer exposes (`capture_start`/`capture_state`/`capture_enter`/
//! `capture_exit`/`capture_end`, plus the transaction-level and fault hooks);
//! [`emulator::TraceEmulator`] replays an ingested trace by feeding it that
//! same sequence of callbacks, exactly as a live EVM would have.

pub mod call_id;
pub mod call_trace;
pub mod dataflow;
pub mod dcfg;
pub mod emulator;

use alloy_primitives::{Address, U256};
use revm::bytecode::opcode::OpCode;

use crate::ingest::ScopeContext;

/// The lifecycle interface every shadow tracer implements.
///
/// Default bodies are no-ops — only the hooks a given tracer actually cares
/// about need overriding.
pub trait Tracer {
    /// Fired once per transaction, before `capture_start`.
    fn capture_tx_start(&mut self, _gas_limit: u64) {}

    /// Fired once per transaction, after the outermost `capture_end`.
    fn capture_tx_end(&mut self, _rest_gas: u64) {}

    /// Fired when the top-level call frame begins.
    fn capture_start(
        &mut self,
        _from: Address,
        _to: Address,
        _create: bool,
        _input: &[u8],
        _gas: u64,
        _value: U256,
    ) {
    }

    /// Fired when the top-level call frame ends.
    fn capture_end(&mut self, _output: &[u8], _gas_used: u64, _err: Option<&str>) {}

    /// Fired when a nested call frame (`CALL`-family, `CREATE`-family, or
    /// `SELFDESTRUCT`) begins.
    #[allow(clippy::too_many_arguments)]
    fn capture_enter(
        &mut self,
        _typ: OpCode,
        _from: Address,
        _to: Address,
        _input: &[u8],
        _gas: u64,
        _value: U256,
    ) {
    }

    /// Fired when a nested call frame ends.
    fn capture_exit(&mut self, _output: &[u8], _gas_used: u64, _err: Option<&str>) {}

    /// Fired once per executed opcode, with the machine state *before* that
    /// opcode runs.
    #[allow(clippy::too_many_arguments)]
    fn capture_state(
        &mut self,
        _pc: u64,
        _op: OpCode,
        _gas: u64,
        _cost: u64,
        _scope: &ScopeContext,
        _return_data: &[u8],
        _depth: i64,
        _err: Option<&str>,
    ) {
    }

    /// Fired instead of `capture_state` when a step faulted.
    #[allow(clippy::too_many_arguments)]
    fn capture_fault(
        &mut self,
        _pc: u64,
        _op: OpCode,
        _gas: u64,
        _cost: u64,
        _scope: &ScopeContext,
        _depth: i64,
        _err: Option<&str>,
    ) {
    }
}
