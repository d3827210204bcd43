//! The dataflow tracer: shadows the real stack, memory, storage, and balance
//! state with byte-granular provenance, so every computed value can be
//! traced back to the calldata, storage, balance, or block-context bytes
//! that produced it.
//!
//! [`Context`] holds one call frame's shadow state; [`DataflowTracer`] keeps
//! a stack of them (one per active call) alongside the transaction-wide
//! revertible [`ShadowStorage`]/[`ShadowBalance`]. The actual per-opcode
//! transfer functions live in [`ops`].

mod ops;

use alloc::string::String;
use alloc::vec::Vec;
use alloy_primitives::{Address, B256, U256};
use revm::bytecode::opcode::OpCode;

use crate::error::ReplayError;
use crate::ids::{CallId, DcfgId};
use crate::ingest::ScopeContext;
use crate::provenance::{
    merge_cells, new_call_data_cells, new_call_value, new_exec_result, new_return_data_cells, DataCells, DataSourceRef, Word,
};
use crate::shadow::{BalanceValue, ShadowBalance, ShadowMemory, ShadowStack, ShadowStorage, StorageValue};

/// A pending storage write made within a call frame, recorded so a reverted
/// frame can roll its writes back out of [`ShadowStorage`]'s history.
#[derive(Clone, Debug)]
pub struct StorageLocation {
    /// The contract whose storage was written.
    pub addr: Address,
    /// The slot written.
    pub slot: B256,
    /// The history id the write produced.
    pub hid: usize,
}

/// A pending balance write made within a call frame, recorded so a reverted
/// frame can roll it back out of [`ShadowBalance`]'s history.
#[derive(Clone, Debug)]
pub struct BalanceLocation {
    /// The account whose balance was written.
    pub addr: Address,
    /// The history id the write produced.
    pub hid: usize,
}

/// One call frame's shadow execution state: its own memory and stack, the
/// provenance of its call arguments and value, and the writes it has made
/// (pending reconciliation into the parent frame on `capture_exit`).
#[derive(Debug)]
pub struct Context {
    call_id: CallId,
    addr: Address,
    code_addr: Address,
    caller: Address,
    mem: ShadowMemory,
    sta: ShadowStack,
    call_value: Word,
    child_call_value: Word,
    child_call_data: DataCells,
    call_data: DataCells,
    ret_offset: u64,
    ret_length: u64,
    return_data: DataCells,
    child_return_data: DataCells,
    storage_writes: Vec<StorageLocation>,
    balance_writes: Vec<BalanceLocation>,
}

/// Drives the shadow stack/memory/storage/balance state from the emulator's
/// lifecycle callbacks.
///
/// Like [`super::dcfg::DcfgTracer`], this tracer's methods take more than the
/// shared [`super::Tracer`] signature carries (the current dcfg node id, for
/// `SLOAD`/`SSTORE`'s provenance) — the composite emulator calls these
/// directly.
#[derive(Debug, Default)]
pub struct DataflowTracer {
    ctx_stack: Vec<Context>,
    stg: ShadowStorage,
    bal: ShadowBalance,
}

impl DataflowTracer {
    /// A fresh tracer, before any `capture_start`.
    pub fn new() -> Self {
        Self::default()
    }

    fn ctx(&self) -> &Context {
        self.ctx_stack.last().expect("dataflow: capture_start not yet called")
    }

    fn ctx_mut(&mut self) -> &mut Context {
        self.ctx_stack.last_mut().expect("dataflow: capture_start not yet called")
    }

    /// See [`super::Tracer::capture_start`]. `call_id` is the root call id
    /// assigned by the call-id tracer.
    pub fn capture_start(&mut self, call_id: CallId, from: Address, to: Address, input: &[u8], value: U256) {
        let call_value = new_call_value(&call_id, &crate::provenance::nil_word());
        let ctx = Context {
            call_id: call_id.clone(),
            addr: to,
            code_addr: to,
            caller: from,
            mem: ShadowMemory::new(),
            sta: ShadowStack::new(),
            call_value,
            child_call_value: crate::provenance::nil_word(),
            child_call_data: DataCells::new(),
            call_data: new_call_data_cells(&call_id, &alloc::vec![None; input.len()]),
            ret_offset: 0,
            ret_length: 0,
            return_data: DataCells::new(),
            child_return_data: DataCells::new(),
            storage_writes: Vec::new(),
            balance_writes: Vec::new(),
        };

        self.ctx_stack.push(ctx);
        if value > U256::ZERO {
            let hid = self.bal.write_balance(to, self.ctx().call_value.clone(), call_id);
            self.ctx_mut().balance_writes.push(BalanceLocation { addr: to, hid });
        }
    }

    /// See [`super::Tracer::capture_enter`]. `call_id` is the id of the frame
    /// being entered, as assigned by the call-id tracer.
    pub fn capture_enter(&mut self, typ: OpCode, from: Address, to: Address, value: U256, call_id: CallId) -> Result<(), ReplayError> {
        use revm::bytecode::opcode;

        let pre = self.ctx();
        let addr = match typ.get() {
            opcode::CALLCODE | opcode::DELEGATECALL => from,
            _ => to,
        };
        let (caller, call_value) = if typ.get() == opcode::DELEGATECALL {
            (pre.caller, pre.call_value.clone())
        } else {
            (from, pre.child_call_value.clone())
        };
        let child_call_data = pre.child_call_data.clone();

        let ctx = Context {
            call_id: call_id.clone(),
            addr,
            code_addr: to,
            caller,
            mem: ShadowMemory::new(),
            sta: ShadowStack::new(),
            call_value: call_value.clone(),
            child_call_value: crate::provenance::nil_word(),
            child_call_data: DataCells::new(),
            call_data: new_call_data_cells(&call_id, &child_call_data),
            ret_offset: 0,
            ret_length: 0,
            return_data: DataCells::new(),
            child_return_data: DataCells::new(),
            storage_writes: Vec::new(),
            balance_writes: Vec::new(),
        };

        self.ctx_stack.push(ctx);

        let writes_balance = matches!(
            typ.get(),
            opcode::CALL | opcode::CREATE | opcode::CREATE2 | opcode::SELFDESTRUCT
        );
        if writes_balance && value > U256::ZERO {
            let hid = self.bal.write_balance(to, call_value, call_id);
            self.ctx_mut().balance_writes.push(BalanceLocation { addr: to, hid });
        }

        Ok(())
    }

    /// See [`super::Tracer::capture_exit`]. Splices the child frame's
    /// returned bytes into the caller's memory at its recorded
    /// `ret_offset`/`ret_length`, then either folds the child's pending
    /// storage/balance writes up into the caller (success) or reverts them
    /// out of the shadow histories (failure).
    pub fn capture_exit(&mut self, err: Option<&str>) {
        let child = self.ctx_stack.pop().expect("dataflow: ctx stack underflow on exit");
        let call_id = child.call_id.clone();
        let child_return_data = child.return_data.clone();

        let ctx = self.ctx_mut();
        ctx.child_return_data = child_return_data.clone();
        ctx.mem.mstore_chunk(ctx.ret_offset, ctx.ret_length, &child_return_data);
        ctx.ret_offset = 0;
        ctx.ret_length = 0;
        ctx.sta.push(new_exec_result(&call_id));

        if err.is_none() {
            ctx.storage_writes.extend(child.storage_writes);
            ctx.balance_writes.extend(child.balance_writes);
        } else {
            for w in &child.storage_writes {
                self.stg.revert(w.addr, w.slot, w.hid);
            }
            for w in &child.balance_writes {
                self.bal.revert(w.addr, w.hid);
            }
        }
    }

    /// See [`super::Tracer::capture_state`]. `dcfg_node_id` is the current
    /// dcfg tracer's node id, needed by `SLOAD`/`SSTORE` to stamp their
    /// reader/writer receipts.
    pub fn capture_state(&mut self, pc: u64, op: OpCode, scope: &ScopeContext, dcfg_node_id: &DcfgId) -> Result<(), ReplayError> {
        let ctx = self.ctx_stack.last_mut().expect("dataflow: capture_start not yet called");
        ops::exec(pc, op, ctx, &mut self.stg, &mut self.bal, scope, dcfg_node_id)
    }

    /// The merged provenance of `size` bytes of the current frame's memory
    /// starting at `start`.
    pub fn read_memory(&self, start: u64, size: u64) -> Option<DataSourceRef> {
        merge_cells(&self.ctx().mem.mload_chunk(start, size))
    }

    /// The merged provenance of the `pos`-th stack word from the top
    /// (`pos == 0` is the top).
    pub fn read_stack(&self, pos: usize) -> Option<DataSourceRef> {
        merge_cells(self.ctx().sta.peek(pos))
    }

    /// The merged provenance of the value being forwarded to the call about
    /// to be entered.
    pub fn read_call_value(&self) -> Option<DataSourceRef> {
        merge_cells(&self.ctx().child_call_value)
    }

    /// The recorded version history of a storage slot.
    pub fn get_storage_history(&self, loc: &StorageLocation) -> &[StorageValue] {
        self.stg.history(loc.addr, loc.slot)
    }

    /// The recorded version history of an account's balance.
    pub fn get_balance_history(&self, loc: &BalanceLocation) -> &[BalanceValue] {
        self.bal.history(loc.addr)
    }
}
