//! The trace emulator: replays an ingested structured-log trace and
//! call-frame tree through the four shadow tracers, in the fixed lifecycle
//! sequence `CaptureStart → (CaptureState* | (CaptureEnter … CaptureExit))* →
//! CaptureEnd`.
//!
//! The emulator never executes bytecode. It trusts the trace as the
//! authoritative record of what the real EVM did and only reconciles step
//! events against the call-frame tree to know when a nested call begins or
//! ends.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use alloy_primitives::{Address, B256, U256};
use revm::bytecode::opcode;
use revm::bytecode::opcode::OpCode;

use crate::chain::{Header, ReplayConfig};
use crate::chain::ErrorMode;
use crate::error::ReplayError;
use crate::ingest::{decode_memory, decode_stack, CallFrame, ExecutionResult, ScopeContext};
use crate::opcode::op_from_mnemonic;

use super::call_id::CallIdTracer;
use super::call_trace::{self, CallTrace, CallTraceTracer};
use super::dataflow::DataflowTracer;
use super::dcfg::{Dcfg, DcfgTracer};

/// One level of the emulator's call stack: the call-frame tree node
/// currently executing, the address its code runs as, and which of its
/// child frames will be consumed next.
#[derive(Clone, Copy, Debug)]
struct CallCursor<'a> {
    frame: &'a CallFrame,
    addr: Address,
    index: usize,
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn address_from_stack_word(word: U256) -> Address {
    Address::from_word(B256::from(word.to_be_bytes()))
}

/// Replays a trace by driving the four shadow tracers through its lifecycle.
#[derive(Debug, Default)]
pub struct TraceEmulator {
    call_id: CallIdTracer,
    dcfg: DcfgTracer,
    call_trace: CallTraceTracer,
    dataflow: DataflowTracer,
}

impl TraceEmulator {
    /// A fresh emulator with empty tracers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays `trace`/`call_frame` (captured under `header`'s chain rules),
    /// returning the reconstructed [`TraceResult`] or a fatal integrity
    /// error (§7 class 1).
    pub fn execute_trace(mut self, trace: &ExecutionResult, call_frame: &CallFrame, header: &Header, config: &ReplayConfig) -> Result<TraceResult, ReplayError> {
        let root = call_frame.decode()?;
        let create = call_frame.kind == "CREATE";

        self.call_id.capture_start(root.from, root.to, create, &root.input, root.gas, root.value);
        let root_call_id = self.call_id.current_call_id();
        self.dcfg.capture_start(root_call_id.clone(), root.to, create);
        self.call_trace.capture_start(root_call_id.clone(), root.from, root.to, create, root.value);
        self.dataflow.capture_start(root_call_id, root.from, root.to, &root.input, root.value);

        let mut call_stack: Vec<CallCursor> = alloc::vec![CallCursor { frame: call_frame, addr: root.to, index: 0 }];
        let mut new_call = false;

        for (i, step) in trace.struct_logs.iter().enumerate() {
            if new_call {
                new_call = false;
                if step.pc != 0 {
                    self.exit_eoa_callee(&mut call_stack)?;
                }
            }

            let cursor = *call_stack.last().expect("call stack never empties mid-replay");
            let op = op_from_mnemonic(&step.op)?;
            let scope = ScopeContext {
                memory: decode_memory(step.memory.as_deref().unwrap_or_default())?,
                stack: decode_stack(step.stack.as_deref().unwrap_or_default())?,
                contract_address: cursor.addr,
            };

            let step_err = self.classify_step_error(step, trace, i, cursor.frame, config)?;

            self.capture_state_all(step.pc, op, &scope)?;

            if let Some(err) = step_err {
                if call_stack.len() > 1 {
                    let decoded = cursor.frame.decode()?;
                    self.exit_all(&decoded.output, decoded.gas_used, Some(err.as_str()));
                    call_stack.pop();
                    if let Some(parent) = call_stack.last_mut() {
                        parent.index += 1;
                    }
                }
                continue;
            }

            match op.get() {
                opcode::CALL | opcode::CALLCODE | opcode::DELEGATECALL | opcode::STATICCALL | opcode::CREATE | opcode::CREATE2 => {
                    let is_create = matches!(op.get(), opcode::CREATE | opcode::CREATE2);
                    let target = address_from_stack_word(scope.stack[scope.stack.len() - 2]);
                    if !is_create && config.chain().is_precompile(target, header) {
                        // No CaptureEnter/CaptureExit is issued for a precompile
                        // target, but the call-frame tree still carries a slot
                        // for it, so the parent's child cursor must advance past
                        // it to stay aligned with the next real child call.
                        if let Some(last) = call_stack.last_mut() {
                            last.index += 1;
                        }
                        continue;
                    }

                    let child_frame: &CallFrame = &cursor.frame.calls[cursor.index];
                    if op.to_string() != child_frame.kind {
                        return Err(ReplayError::OpcodeFrameMismatch {
                            call_id: self.call_id.current_call_id().to_string(),
                            expected: op.to_string(),
                            actual: child_frame.kind.clone(),
                        });
                    }
                    let addr = if matches!(op.get(), opcode::CALLCODE | opcode::DELEGATECALL) { cursor.addr } else { crate::ingest::hex_to_address(&child_frame.to)? };
                    let decoded = child_frame.decode()?;

                    self.enter_all(op, decoded.from, decoded.to, &decoded.input, decoded.gas, decoded.value);

                    call_stack.push(CallCursor { frame: child_frame, addr, index: 0 });
                    new_call = true;
                }

                opcode::SELFDESTRUCT => {
                    let f_index = call_stack.len() - 1;
                    let child_frame: &CallFrame = &call_stack[f_index].frame.calls[call_stack[f_index].index];
                    let decoded_child = child_frame.decode()?;

                    self.enter_all(op, decoded_child.from, decoded_child.to, &decoded_child.input, decoded_child.gas, decoded_child.value);
                    call_stack.push(CallCursor { frame: child_frame, addr: Address::ZERO, index: 0 });

                    let child_err = non_empty(&child_frame.error);
                    self.exit_all(&decoded_child.output, decoded_child.gas_used, child_err.as_deref());
                    call_stack.pop();
                    call_stack[f_index].index += 1;

                    // SELFDESTRUCT also stops the frame that executed it.
                    if call_stack.len() > 1 {
                        let f_frame = call_stack[f_index].frame;
                        let decoded_f = f_frame.decode()?;
                        let f_err = non_empty(&f_frame.error);
                        self.exit_all(&decoded_f.output, decoded_f.gas_used, f_err.as_deref());
                        call_stack.pop();
                        if let Some(parent) = call_stack.last_mut() {
                            parent.index += 1;
                        }
                    }
                }

                opcode::STOP | opcode::RETURN | opcode::REVERT => {
                    if call_stack.len() > 1 {
                        let frame = cursor.frame;
                        let decoded = frame.decode()?;
                        let err = non_empty(&frame.error);
                        self.exit_all(&decoded.output, decoded.gas_used, err.as_deref());
                        call_stack.pop();
                        if let Some(parent) = call_stack.last_mut() {
                            parent.index += 1;
                        }
                    }
                }

                _ => {}
            }
        }

        let root_err = non_empty(&call_frame.error);
        self.call_trace.capture_end(root_err.as_deref());

        Ok(TraceResult { call_id: self.call_id, dcfg: self.dcfg, call_trace: self.call_trace, dataflow: self.dataflow })
    }

    fn exit_eoa_callee(&mut self, call_stack: &mut Vec<CallCursor>) -> Result<(), ReplayError> {
        let cursor = *call_stack.last().expect("exit_eoa_callee: call stack non-empty");
        let decoded = cursor.frame.decode()?;
        let err = non_empty(&cursor.frame.error);
        self.exit_all(&decoded.output, decoded.gas_used, err.as_deref());
        if call_stack.len() > 1 {
            call_stack.pop();
            if let Some(parent) = call_stack.last_mut() {
                parent.index += 1;
            }
        }
        Ok(())
    }

    fn classify_step_error(
        &self,
        step: &crate::ingest::StructLogRes,
        trace: &ExecutionResult,
        i: usize,
        frame: &CallFrame,
        config: &ReplayConfig,
    ) -> Result<Option<String>, ReplayError> {
        if step.error.is_some() {
            if frame.error.is_empty() {
                return match config.error_mode() {
                    ErrorMode::Strict => Err(ReplayError::MissingFrameError { pc: step.pc }),
                    ErrorMode::Warn => {
                        tracing::warn!(pc = step.pc, "step flagged an error but the enclosing call frame has none");
                        Ok(None)
                    }
                };
            }
            return Ok(Some(frame.error.clone()));
        }

        if !frame.error.is_empty() {
            let next_is_shallower = trace.struct_logs.get(i + 1).map(|next| next.depth < step.depth).unwrap_or(false);
            if next_is_shallower {
                return Ok(Some(frame.error.clone()));
            }
        }

        Ok(None)
    }

    fn capture_state_all(&mut self, pc: u64, op: OpCode, scope: &ScopeContext) -> Result<(), ReplayError> {
        let jumpi_condition = if op.get() == opcode::JUMPI { self.dataflow.read_stack(1) } else { None };

        self.dcfg.capture_state(pc, op, scope, self.call_id.current_call_count(), jumpi_condition)?;
        let dcfg_id = self.dcfg.current_dcfg_node_id(self.call_id.current_call_count());

        let log3_amount_tracker = if op.get() == opcode::LOG3 {
            call_trace::erc20_transfer_memory_window(scope).and_then(|(start, size)| self.dataflow.read_memory(start, size))
        } else {
            None
        };
        self.call_trace.capture_state(op, scope, dcfg_id.clone(), log3_amount_tracker);

        self.dataflow.capture_state(pc, op, scope, &dcfg_id)
    }

    fn enter_all(&mut self, typ: OpCode, from: Address, to: Address, input: &[u8], gas: u64, value: U256) {
        self.call_id.capture_enter(typ, from, to, input, gas, value);
        let call_id = self.call_id.current_call_id();

        self.dcfg.capture_enter(typ, from, to, call_id.clone()).expect("dcfg: frame type already validated by the caller");

        let amount_tracker = self.dataflow.read_call_value();
        self.call_trace.capture_enter(call_id.clone(), typ, from, to, value, amount_tracker);

        self.dataflow.capture_enter(typ, from, to, value, call_id).expect("dataflow: entering a freshly validated frame");
    }

    fn exit_all(&mut self, output: &[u8], gas_used: u64, err: Option<&str>) {
        self.call_id.capture_exit(output, gas_used, err);
        self.dcfg.capture_exit(err);
        self.call_trace.capture_exit(err);
        self.dataflow.capture_exit(err);
    }
}

/// The complete reconstructed state of a replayed transaction: the call
/// tree and its flows, the dynamic control-flow graph, and the byte-granular
/// dataflow provenance graph.
#[derive(Debug)]
pub struct TraceResult {
    call_id: CallIdTracer,
    dcfg: DcfgTracer,
    call_trace: CallTraceTracer,
    dataflow: DataflowTracer,
}

impl TraceResult {
    /// The flat call-trace arena, in the order traces were opened.
    pub fn traces(&self) -> &[CallTrace] {
        self.call_trace.traces()
    }

    /// The dynamic control-flow graph built up across the whole replay.
    pub fn dcfg(&self) -> &Dcfg {
        self.dcfg.dcfg()
    }

    /// The dataflow tracer's final shadow state (storage/balance history,
    /// per-call shadow stacks are dropped with their contexts on exit).
    pub fn dataflow(&self) -> &DataflowTracer {
        &self.dataflow
    }

    /// Every top-level `JUMPI` condition's provenance, keyed by the dcfg id
    /// of the basic block the branch ended.
    pub fn jumpi_data_sources(&self) -> alloc::collections::BTreeMap<String, Option<crate::provenance::DataSourceRef>> {
        self.dcfg.jumpi_data_sources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::StaticPrecompileRange;
    use crate::ingest::StructLogRes;
    use alloc::string::ToString;
    use alloc::vec;

    fn header() -> Header {
        Header::default()
    }

    fn leaf_frame(kind: &str, from: &str, to: &str, value: &str) -> CallFrame {
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

    fn log(pc: u64, op: &str, depth: i64) -> StructLogRes {
        StructLogRes { pc, op: op.to_string(), gas: 1_000_000, gas_cost: 3, depth, error: None, stack: Some(Vec::new()), memory: Some(Vec::new()), storage: None }
    }

    #[test]
    fn empty_transaction_opens_and_closes_the_root_trace() {
        let frame = leaf_frame("CALL", "0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x0");
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: vec![log(0, "STOP", 1)] };
        let result = TraceEmulator::new().execute_trace(&trace, &frame, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();
        assert_eq!(result.traces().len(), 1);
        assert!(result.traces()[0].flows.is_empty());
    }

    #[test]
    fn native_transfer_is_recorded_as_a_flow_on_root() {
        let frame = leaf_frame("CALL", "0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x64");
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: vec![log(0, "STOP", 1)] };
        let result = TraceEmulator::new().execute_trace(&trace, &frame, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();
        assert_eq!(result.traces()[0].flows.len(), 1);
        assert_eq!(result.traces()[0].flows[0].amount, U256::from(100u64));
    }

    #[test]
    fn sstore_then_stop_builds_one_dcfg_node() {
        let frame = leaf_frame("CALL", "0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x0");
        let steps = vec![
            StructLogRes {
                pc: 0,
                op: "SSTORE".to_string(),
                gas: 1_000_000,
                gas_cost: 20000,
                depth: 1,
                error: None,
                stack: Some(alloc::vec!["0x0".to_string(), "0x2a".to_string()]),
                memory: Some(Vec::new()),
                storage: None,
            },
            log(1, "STOP", 1),
        ];
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: steps };
        let result = TraceEmulator::new().execute_trace(&trace, &frame, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();
        assert!(result.dcfg().root().is_some());
        assert_eq!(result.dataflow().get_storage_history(&crate::tracing::dataflow::StorageLocation { addr: Address::ZERO, slot: B256::ZERO, hid: 0 }).len(), 1);
    }

    #[test]
    fn nested_call_then_revert_rewinds_the_trace_and_storage() {
        let mut root = leaf_frame("CALL", "0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x0");
        let child = leaf_frame("CALL", "0x0000000000000000000000000000000000000002", "0x0000000000000000000000000000000000000003", "0x0");
        root.calls.push(child.clone());
        let mut reverted_child = child;
        reverted_child.error = "execution reverted".to_string();
        root.calls[0] = reverted_child;

        let steps = vec![
            StructLogRes {
                pc: 0,
                op: "CALL".to_string(),
                gas: 1_000_000,
                gas_cost: 700,
                depth: 1,
                error: None,
                // bottom -> top: retLength, retOffset, argsLength, argsOffset, value, addr, gas.
                // `addr` sits at stack[len-2], matching the emulator's call-target read.
                stack: Some(alloc::vec![
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0000000000000000000000000000000000000003".to_string(),
                    "0x0".to_string(),
                ]),
                memory: Some(Vec::new()),
                storage: None,
            },
            StructLogRes {
                pc: 0,
                op: "SSTORE".to_string(),
                gas: 900_000,
                gas_cost: 20000,
                depth: 2,
                error: None,
                stack: Some(alloc::vec!["0x0".to_string(), "0x7".to_string()]),
                memory: Some(Vec::new()),
                storage: None,
            },
            StructLogRes {
                pc: 1,
                op: "REVERT".to_string(),
                gas: 880_000,
                gas_cost: 0,
                depth: 2,
                error: Some(String::new()),
                stack: Some(alloc::vec!["0x0".to_string(), "0x0".to_string()]),
                memory: Some(Vec::new()),
                storage: None,
            },
            log(1, "STOP", 1),
        ];
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: steps };
        let result = TraceEmulator::new().execute_trace(&trace, &root, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();
        // the reverted child's trace is rewound out of the arena entirely, leaving only root.
        assert_eq!(result.traces().len(), 1);
        let history = result.dataflow().get_storage_history(&crate::tracing::dataflow::StorageLocation { addr: Address::from_slice(&alloy_primitives::hex::decode("0000000000000000000000000000000000000003").unwrap()), slot: B256::ZERO, hid: 0 });
        assert!(history.is_empty());
    }

    #[test]
    fn precompile_call_advances_the_child_cursor_past_the_next_real_call() {
        // The precompile target (address 1) occupies calls[0]'s slot even
        // though it never gets a nested frame; calls[1] is the real callee
        // that must be matched up against the *second* STATICCALL.
        let mut frame = leaf_frame("CALL", "0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x0");
        let precompile_child = leaf_frame("STATICCALL", "0x0000000000000000000000000000000000000002", "0x0000000000000000000000000000000000000001", "0x0");
        let real_child = leaf_frame("STATICCALL", "0x0000000000000000000000000000000000000002", "0x000000000000000000000000000000000000000a", "0x0");
        frame.calls.push(precompile_child);
        frame.calls.push(real_child);

        let steps = vec![
            StructLogRes {
                pc: 0,
                op: "STATICCALL".to_string(),
                gas: 1_000_000,
                gas_cost: 700,
                depth: 1,
                error: None,
                // bottom -> top: retLength, retOffset, argsLength, argsOffset, addr, gas.
                stack: Some(alloc::vec![
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0000000000000000000000000000000000000001".to_string(),
                    "0x0".to_string(),
                ]),
                memory: Some(Vec::new()),
                storage: None,
            },
            StructLogRes {
                pc: 1,
                op: "STATICCALL".to_string(),
                gas: 990_000,
                gas_cost: 700,
                depth: 1,
                error: None,
                stack: Some(alloc::vec![
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x0".to_string(),
                    "0x000000000000000000000000000000000000000a".to_string(),
                    "0x0".to_string(),
                ]),
                memory: Some(Vec::new()),
                storage: None,
            },
            log(0, "STOP", 2),
            log(2, "STOP", 1),
        ];
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: steps };
        let result = TraceEmulator::new().execute_trace(&trace, &frame, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();
        // root + the one real nested call; the precompile never opens a trace.
        assert_eq!(result.traces().len(), 2);
    }
}
