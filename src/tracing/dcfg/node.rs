//! The dynamic control-flow graph's node types.
//!
//! A `ContractNode` is one call frame's execution within a contract; a
//! `DcfgNode` is one basic block occurrence within that frame. Both graphs
//! are cyclic in the original (a contract node's caller back-pointer, a dcfg
//! node's parent/child links, a call ref pointing both into the dcfg chain
//! that made the call and the contract node it entered) — here every
//! cross-reference is an index into [`super::Dcfg`]'s arenas rather than an
//! owned or shared pointer, so the graph can be built with plain `Vec`s and
//! no interior mutability.

use alloc::vec::Vec;
use alloy_primitives::Address;
use revm::bytecode::opcode::OpCode;

use crate::ids::CallId;

/// Index of a [`ContractNode`] within [`super::Dcfg`]'s contract-node arena.
pub type ContractNodeId = usize;

/// Index of a [`DcfgNode`] within [`super::Dcfg`]'s dcfg-node arena.
pub type DcfgNodeId = usize;

/// Index of a [`crate::tracing::dcfg::basic_block::BasicBlock`] within
/// [`super::Dcfg`]'s basic-block arena.
pub type BasicBlockId = usize;

/// One call frame's execution context within the dynamic control-flow graph:
/// which contract ran, who called it and with what opcode, and the chain of
/// basic blocks it executed.
#[derive(Clone, Debug)]
pub struct ContractNode {
    call_id: CallId,
    addr: Address,
    code_addr: Address,
    /// The contract node that made this call, `None` for the root.
    caller: Option<ContractNodeId>,
    /// The opcode the caller used to enter this frame (meaningless for the
    /// root, which the transaction enters directly).
    enter_mode: Option<OpCode>,
    /// The first dcfg node this frame executed, set once known.
    dcfg_node_entry: Option<DcfgNodeId>,
    /// Calls this frame made, in execution order.
    calls: Vec<CallRef>,
    /// The dcfg node most recently appended to this frame's chain — where
    /// the next basic block (or nested call) attaches.
    dcfg_node_cursor: Option<DcfgNodeId>,
}

impl ContractNode {
    /// Builds a new, entry-less contract node.
    pub fn new(call_id: CallId, addr: Address, code_addr: Address, caller: Option<ContractNodeId>, enter_mode: Option<OpCode>) -> Self {
        Self {
            call_id,
            addr,
            code_addr,
            caller,
            enter_mode,
            dcfg_node_entry: None,
            calls: Vec::new(),
            dcfg_node_cursor: None,
        }
    }

    /// The call frame this node models.
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// The account whose storage/balance this frame operates against.
    pub fn address(&self) -> Address {
        self.addr
    }

    /// The account whose code is executing (differs from `address` under
    /// `DELEGATECALL`/`CALLCODE`).
    pub fn code_address(&self) -> Address {
        self.code_addr
    }

    /// The contract node that made this call.
    pub fn caller(&self) -> Option<ContractNodeId> {
        self.caller
    }

    /// The opcode the caller used to enter this frame.
    pub fn enter_mode(&self) -> Option<OpCode> {
        self.enter_mode
    }

    /// The first dcfg node this frame executed.
    pub fn entry(&self) -> Option<DcfgNodeId> {
        self.dcfg_node_entry
    }

    /// Sets the frame's entry node, once, on the first basic block it executes.
    pub fn set_entry(&mut self, id: DcfgNodeId) {
        self.dcfg_node_entry.get_or_insert(id);
    }

    /// The dcfg node the next basic block or nested call attaches after.
    pub fn cursor(&self) -> Option<DcfgNodeId> {
        self.dcfg_node_cursor
    }

    /// Advances the cursor to `id`.
    pub fn set_cursor(&mut self, id: DcfgNodeId) {
        self.dcfg_node_cursor = Some(id);
    }

    /// Clears the cursor: the frame's current basic block terminated
    /// (`STOP`/`RETURN`/`REVERT`) without handing off to a successor block.
    pub fn clear_cursor(&mut self) {
        self.dcfg_node_cursor = None;
    }

    /// Calls made by this frame, in execution order.
    pub fn calls(&self) -> &[CallRef] {
        &self.calls
    }

    /// Records a call made from this frame.
    pub fn push_call(&mut self, call_ref: CallRef) {
        self.calls.push(call_ref);
    }

    /// The contract nodes this frame called into, in execution order.
    pub fn callees(&self) -> impl Iterator<Item = ContractNodeId> + '_ {
        self.calls.iter().map(|r| r.contract_node)
    }
}

/// One occurrence of a basic block within a call frame's execution: the
/// contract it belongs to, the opcode that exited it (a jump target's
/// branch opcode, or `None` for the terminal block of a frame), and its
/// links within the frame's execution-order chain.
#[derive(Clone, Debug)]
pub struct DcfgNode {
    contract_node: ContractNodeId,
    basic_block: BasicBlockId,
    id: i64,
    call_count: i64,
    calls: Vec<CallRef>,
    parent: Option<DcfgNodeId>,
    child: Option<DcfgNodeId>,
    /// The opcode this block ended on, if it's a block-ending opcode
    /// (`JUMP`/`JUMPI`/terminator); `None` while the block is still open.
    opcode: Option<OpCode>,
    /// The `JUMPI` condition that was evaluated when this block exited, if
    /// it ended on a `JUMPI`.
    condition: Option<bool>,
    /// The pc the next instruction within this block is expected at.
    pc_cursor: u64,
}

impl DcfgNode {
    /// Builds a new dcfg node with no successors yet.
    pub fn new(contract_node: ContractNodeId, basic_block: BasicBlockId, id: i64, call_count: i64, parent: Option<DcfgNodeId>) -> Self {
        Self {
            contract_node,
            basic_block,
            id,
            call_count,
            calls: Vec::new(),
            parent,
            child: None,
            opcode: None,
            condition: None,
            pc_cursor: 0,
        }
    }

    /// The contract node this block occurrence belongs to.
    pub fn contract_node(&self) -> ContractNodeId {
        self.contract_node
    }

    /// The basic block this node is one occurrence of.
    pub fn basic_block(&self) -> BasicBlockId {
        self.basic_block
    }

    /// This node's sequential id within its contract node's chain.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Number of sibling calls completed in the parent frame when this block
    /// ran.
    pub fn call_count(&self) -> i64 {
        self.call_count
    }

    /// The dcfg node immediately preceding this one in the same frame.
    pub fn parent(&self) -> Option<DcfgNodeId> {
        self.parent
    }

    /// The dcfg node immediately following this one in the same frame.
    pub fn child(&self) -> Option<DcfgNodeId> {
        self.child
    }

    /// Links `child` as this node's successor.
    pub fn set_child(&mut self, child: DcfgNodeId) {
        self.child = Some(child);
    }

    /// The branch opcode (`JUMP`/`JUMPI`) that led control into this node, if
    /// it was reached that way rather than by falling off a `JUMPDEST` split
    /// or being a frame's first block.
    pub fn opcode(&self) -> Option<OpCode> {
        self.opcode
    }

    /// Records the opcode (and, for `JUMPI`, whether the branch was taken)
    /// that led into this node.
    pub fn set_branch(&mut self, opcode: OpCode, condition: bool) {
        self.opcode = Some(opcode);
        self.condition = Some(condition);
    }

    /// Whether the `JUMPI` that led into this node took the branch
    /// (`true` for an unconditional `JUMP` too).
    pub fn condition(&self) -> Option<bool> {
        self.condition
    }

    /// The pc of the most recent call-entering opcode executed within this
    /// node's basic block.
    pub fn pc_cursor(&self) -> u64 {
        self.pc_cursor
    }

    /// Records the pc of a call-entering opcode just executed in this block.
    pub fn set_pc_cursor(&mut self, pc: u64) {
        self.pc_cursor = pc;
    }

    /// Calls made while this block was executing.
    pub fn calls(&self) -> &[CallRef] {
        &self.calls
    }

    /// Records a call made while this block was executing.
    pub fn push_call(&mut self, call_ref: CallRef) {
        self.calls.push(call_ref);
    }
}

/// One call made from a dcfg node: the pc it was made at, and the contract
/// node it entered.
#[derive(Clone, Copy, Debug)]
pub struct CallRef {
    /// Sequential id of the call (its index among its frame's siblings).
    pub id: u64,
    /// The pc the `CALL`-family opcode was executed at.
    pub pc: u64,
    /// The dcfg node the call was made from.
    pub dcfg_node: DcfgNodeId,
    /// The contract node the call entered.
    pub contract_node: ContractNodeId,
}
