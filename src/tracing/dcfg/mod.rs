//! The dynamic control-flow graph tracer: reconstructs, per contract call,
//! the chain of basic blocks actually executed and how control passed
//! between them (fallthrough, `JUMP`, `JUMPI`, or a nested call).
//!
//! [`Dcfg`] is the arena holding every basic block and node built up across
//! the whole replay; [`DcfgTracer`] drives it from the emulator's lifecycle
//! callbacks. Cross-references between nodes (a contract node's caller, a
//! dcfg node's parent/child, a call's source and destination) are plain
//! indices into `Dcfg`'s arenas rather than shared pointers.

pub mod basic_block;
pub mod node;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use alloy_primitives::map::HashMap;
use alloy_primitives::Address;
use revm::bytecode::opcode::{self, OpCode};

use crate::error::ReplayError;
use crate::ids::{CallId, DcfgId};
use crate::ingest::ScopeContext;
use crate::provenance::DataSourceRef;

pub use basic_block::{is_block_end_op, is_enter_op, BasicBlock, BasicBlockType};
pub use node::{BasicBlockId, CallRef, ContractNode, ContractNodeId, DcfgNode, DcfgNodeId};

fn is_push_op(op: OpCode) -> bool {
    (opcode::PUSH0..=opcode::PUSH32).contains(&op.get())
}

/// The arena of every basic block, contract-call node, and dcfg node built
/// up while replaying a transaction.
#[derive(Debug, Default)]
pub struct Dcfg {
    basic_blocks: HashMap<Address, HashMap<u64, BasicBlockId>>,
    creation_basic_blocks: HashMap<Address, HashMap<u64, BasicBlockId>>,
    basic_block_arena: Vec<BasicBlock>,
    contract_nodes: Vec<ContractNode>,
    dcfg_nodes: Vec<DcfgNode>,
    root: Option<ContractNodeId>,
    contract_node_stack: Vec<ContractNodeId>,
}

impl Dcfg {
    /// The transaction's root contract node.
    pub fn root(&self) -> Option<ContractNodeId> {
        self.root
    }

    /// The contract node currently executing.
    pub fn current_contract_node(&self) -> ContractNodeId {
        *self.contract_node_stack.last().expect("dcfg: no active contract node")
    }

    /// Looks up a contract node by id.
    pub fn contract_node(&self, id: ContractNodeId) -> &ContractNode {
        &self.contract_nodes[id]
    }

    /// Looks up a dcfg node by id.
    pub fn dcfg_node(&self, id: DcfgNodeId) -> &DcfgNode {
        &self.dcfg_nodes[id]
    }

    /// Looks up a basic block by id.
    pub fn basic_block(&self, id: BasicBlockId) -> &BasicBlock {
        &self.basic_block_arena[id]
    }

    /// Total number of contract nodes built so far.
    pub fn contract_node_count(&self) -> usize {
        self.contract_nodes.len()
    }

    /// Total number of dcfg nodes built so far.
    pub fn dcfg_node_count(&self) -> usize {
        self.dcfg_nodes.len()
    }

    /// Begins the transaction: creates the root contract node and pushes it
    /// onto the active-call stack.
    pub fn start(&mut self, call_id: CallId, to: Address, create: bool) -> ContractNodeId {
        let enter_mode = OpCode::new(if create { opcode::CREATE } else { opcode::CALL }).expect("CALL/CREATE are valid opcodes");
        let id = self.contract_nodes.len();
        self.contract_nodes.push(ContractNode::new(call_id, to, to, None, Some(enter_mode)));
        self.root = Some(id);
        self.contract_node_stack.push(id);
        id
    }

    /// Enters a nested call frame, recording it as a call from the current
    /// cursor's basic block.
    pub fn enter(&mut self, call_id: CallId, from: Address, to: Address, enter_mode: OpCode) -> Result<ContractNodeId, ReplayError> {
        let addr = match enter_mode.get() {
            opcode::CALL | opcode::STATICCALL | opcode::CREATE | opcode::CREATE2 | opcode::SELFDESTRUCT => to,
            opcode::DELEGATECALL | opcode::CALLCODE => from,
            _ => {
                return Err(ReplayError::OpcodeFrameMismatch {
                    call_id: call_id.to_string(),
                    expected: String::from("CALL-family"),
                    actual: enter_mode.to_string(),
                })
            }
        };
        let code_addr = to;

        let current = self.current_contract_node();
        let cursor = self.contract_nodes[current]
            .cursor()
            .expect("dcfg: enter before any basic block recorded for the caller");

        let new_id = self.contract_nodes.len();
        self.contract_nodes.push(ContractNode::new(call_id, addr, code_addr, Some(current), Some(enter_mode)));

        let call_ref = CallRef {
            id: self.dcfg_nodes[cursor].calls().len() as u64,
            pc: self.dcfg_nodes[cursor].pc_cursor(),
            dcfg_node: cursor,
            contract_node: new_id,
        };
        self.dcfg_nodes[cursor].push_call(call_ref);
        self.contract_nodes[current].push_call(call_ref);

        self.contract_node_stack.push(new_id);
        Ok(new_id)
    }

    /// Leaves the current call frame, restoring the caller as the cursor.
    pub fn exit(&mut self) {
        self.contract_node_stack.pop();
    }

    /// Appends bytes to the current cursor's basic block without running the
    /// full per-opcode bookkeeping — used to back-fill a `PUSH`'s immediate
    /// operand once its value is known.
    pub fn append_instructions(&mut self, pc: u64, instructions: &[u8]) -> Result<(), ReplayError> {
        let contract_node_id = self.current_contract_node();
        let cursor = self.contract_nodes[contract_node_id]
            .cursor()
            .expect("dcfg: append before any basic block recorded");
        let bb_id = self.dcfg_nodes[cursor].basic_block();
        self.basic_block_arena[bb_id].add_instructions(pc, instructions)
    }

    /// Records one executed opcode byte at `pc`, splitting or terminating
    /// the current basic block as needed.
    pub fn add_instructions(&mut self, call_count: i64, pc: u64, instructions: &[u8], scope: &ScopeContext) -> Result<(), ReplayError> {
        let contract_node_id = self.current_contract_node();
        let op = OpCode::new(instructions[0]).ok_or_else(|| ReplayError::UnknownOpcode(alloc::format!("{:#04x}", instructions[0])))?;

        if self.contract_nodes[contract_node_id].cursor().is_none() {
            let bb_id = self.get_basic_block(contract_node_id, pc);
            let node_id = self.dcfg_nodes.len();
            self.dcfg_nodes.push(DcfgNode::new(contract_node_id, bb_id, 0, call_count, None));
            self.contract_nodes[contract_node_id].set_entry(node_id);
            self.contract_nodes[contract_node_id].set_cursor(node_id);
        }

        // A basic block's bytes sometimes contain a `JUMPDEST` mid-span (a
        // jump target that lands inside a run of instructions already being
        // recorded under an earlier pc) — split it into its own node so
        // `JUMPDEST`s always start a node.
        let cursor = self.contract_nodes[contract_node_id].cursor().expect("cursor just ensured");
        if op.get() == opcode::JUMPDEST {
            let bb_id = self.dcfg_nodes[cursor].basic_block();
            if let Some(bb_pc) = self.basic_block_arena[bb_id].pc() {
                if bb_pc != pc {
                    let new_bb_id = self.get_basic_block(contract_node_id, pc);
                    let new_node_id = self.dcfg_nodes[cursor].id() + 1;
                    let child_id = self.dcfg_nodes.len();
                    self.dcfg_nodes.push(DcfgNode::new(contract_node_id, new_bb_id, new_node_id, call_count, Some(cursor)));
                    self.dcfg_nodes[cursor].set_child(child_id);
                    self.contract_nodes[contract_node_id].set_cursor(child_id);
                }
            }
        }

        let cursor = self.contract_nodes[contract_node_id].cursor().expect("cursor just ensured");
        let bb_id = self.dcfg_nodes[cursor].basic_block();
        self.basic_block_arena[bb_id].add_instructions(pc, instructions)?;

        if is_enter_op(op) {
            self.dcfg_nodes[cursor].set_pc_cursor(pc);
        }

        if is_block_end_op(op) {
            match op.get() {
                opcode::JUMPI => {
                    let condition = !scope.stack[scope.stack.len() - 2].is_zero();
                    let dest_pc = if condition { scope.stack[scope.stack.len() - 1].saturating_to::<u64>() } else { pc + 1 };
                    self.push_successor(contract_node_id, cursor, dest_pc, call_count, Some((op, condition)));
                }
                opcode::JUMP => {
                    let dest_pc = scope.stack[scope.stack.len() - 1].saturating_to::<u64>();
                    self.push_successor(contract_node_id, cursor, dest_pc, call_count, Some((op, true)));
                }
                opcode::SELFDESTRUCT => {}
                _ => self.contract_nodes[contract_node_id].clear_cursor(),
            }
        }

        Ok(())
    }

    fn push_successor(&mut self, contract_node_id: ContractNodeId, cursor: DcfgNodeId, dest_pc: u64, call_count: i64, branch: Option<(OpCode, bool)>) {
        let new_bb_id = self.get_basic_block(contract_node_id, dest_pc);
        let new_node_id = self.dcfg_nodes[cursor].id() + 1;
        let mut child = DcfgNode::new(contract_node_id, new_bb_id, new_node_id, call_count, Some(cursor));
        if let Some((opcode, condition)) = branch {
            child.set_branch(opcode, condition);
        }
        let child_id = self.dcfg_nodes.len();
        self.dcfg_nodes.push(child);
        self.dcfg_nodes[cursor].set_child(child_id);
        self.contract_nodes[contract_node_id].set_cursor(child_id);
    }

    fn get_basic_block(&mut self, contract_node_id: ContractNodeId, pc: u64) -> BasicBlockId {
        let contract_node = &self.contract_nodes[contract_node_id];
        let code_addr = contract_node.code_address();
        let is_creation = matches!(contract_node.enter_mode().map(OpCode::get), Some(opcode::CREATE) | Some(opcode::CREATE2));

        let map = if is_creation { &mut self.creation_basic_blocks } else { &mut self.basic_blocks };
        if let Some(&id) = map.get(&code_addr).and_then(|by_pc| by_pc.get(&pc)) {
            return id;
        }

        let block_type = if is_creation { BasicBlockType::Creation } else { BasicBlockType::Runtime };
        let id = self.basic_block_arena.len();
        self.basic_block_arena.push(BasicBlock::new(block_type, code_addr));
        map.entry(code_addr).or_default().insert(pc, id);
        id
    }
}

/// Drives a [`Dcfg`] from the emulator's lifecycle callbacks.
///
/// Unlike [`super::call_id::CallIdTracer`], this tracer's methods need
/// information the shared [`super::Tracer`] signature doesn't carry (the
/// current call count, the dataflow tracer's provenance for a `JUMPI`
/// condition) — the composite emulator calls these bespoke methods directly
/// rather than through `dyn Tracer`.
#[derive(Debug, Default)]
pub struct DcfgTracer {
    dcfg: Dcfg,
    jumpi_stack: Vec<Vec<(DcfgId, Option<DataSourceRef>)>>,
    is_previous_push: Option<u8>,
}

impl DcfgTracer {
    /// A fresh tracer, before any `capture_start`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dynamic control-flow graph built so far.
    pub fn dcfg(&self) -> &Dcfg {
        &self.dcfg
    }

    /// See [`super::Tracer::capture_start`].
    pub fn capture_start(&mut self, call_id: CallId, to: Address, create: bool) {
        self.jumpi_stack.push(Vec::new());
        self.dcfg.start(call_id, to, create);
    }

    /// See [`super::Tracer::capture_enter`]. `call_id` is the id of the
    /// frame being entered, as assigned by the call-id tracer.
    pub fn capture_enter(&mut self, typ: OpCode, from: Address, to: Address, call_id: CallId) -> Result<(), ReplayError> {
        self.jumpi_stack.push(Vec::new());
        self.dcfg.enter(call_id, from, to, typ)?;
        Ok(())
    }

    /// See [`super::Tracer::capture_exit`]. A successful exit folds the
    /// child frame's captured `JUMPI` conditions up into its caller's list;
    /// an erroring exit drops them (their destination call's effects were
    /// rolled back).
    pub fn capture_exit(&mut self, err: Option<&str>) {
        let child = self.jumpi_stack.pop().expect("dcfg: jumpi stack underflow on exit");
        if err.is_none() {
            if let Some(parent) = self.jumpi_stack.last_mut() {
                parent.extend(child);
            }
        }
        self.dcfg.exit();
    }

    /// See [`super::Tracer::capture_state`]. `call_count` is the current
    /// call-id tracer's sibling count; `jumpi_condition` is the dataflow
    /// tracer's provenance for the second-from-top stack item, supplied by
    /// the caller only when `op` is `JUMPI` (otherwise ignored).
    pub fn capture_state(
        &mut self,
        pc: u64,
        op: OpCode,
        scope: &ScopeContext,
        call_count: i64,
        jumpi_condition: Option<DataSourceRef>,
    ) -> Result<(), ReplayError> {
        if let Some(push_byte) = self.is_previous_push.take() {
            self.backfill_push(pc, push_byte, scope)?;
        }

        if is_push_op(op) {
            self.is_previous_push = Some(op.get());
        }

        if op.get() == opcode::JUMPI {
            let dcfg_node_id = self.current_dcfg_node_id(call_count);
            self.jumpi_stack
                .last_mut()
                .expect("dcfg: capture_start not yet called")
                .push((dcfg_node_id, jumpi_condition));
        }

        self.dcfg.add_instructions(call_count, pc, &[op.get()], scope)
    }

    fn backfill_push(&mut self, pc: u64, push_byte: u8, scope: &ScopeContext) -> Result<(), ReplayError> {
        let length = (push_byte as i32 - opcode::PUSH1 as i32 + 1).max(0) as u64;
        let mut instructions = alloc::vec![0u8; length as usize];

        let top = scope.stack.last().copied().unwrap_or_default();
        let bytes = top.to_be_bytes::<32>();
        let minimal_start = bytes.iter().position(|&b| b != 0).unwrap_or(32);
        let minimal = &bytes[minimal_start..];

        if (length as usize) < minimal.len() {
            return Err(ReplayError::InconsistentBasicBlock { pc, reason: String::from("push immediate too short for stack top") });
        }
        if !minimal.is_empty() {
            let start = length as usize - minimal.len();
            instructions[start..].copy_from_slice(minimal);
        }

        self.dcfg.append_instructions(pc.saturating_sub(length), &instructions)
    }

    /// The call id of the frame currently executing.
    pub fn current_call_id(&self) -> CallId {
        let id = self.dcfg.current_contract_node();
        self.dcfg.contract_node(id).call_id().clone()
    }

    /// The dcfg id of the basic block currently executing.
    pub fn current_dcfg_node_id(&self, current_call_count: i64) -> DcfgId {
        let contract_node_id = self.dcfg.current_contract_node();
        let contract_node = self.dcfg.contract_node(contract_node_id);
        match contract_node.cursor() {
            None => DcfgId::new(contract_node.call_id().clone(), 0, current_call_count),
            Some(cursor) => {
                let node = self.dcfg.dcfg_node(cursor);
                DcfgId::new(contract_node.call_id().clone(), node.id(), node.call_count())
            }
        }
    }

    /// The provenance captured for every `JUMPI` condition evaluated at the
    /// top level of the transaction, keyed by the dcfg id of the block the
    /// `JUMPI` ended.
    pub fn jumpi_data_sources(&self) -> BTreeMap<String, Option<DataSourceRef>> {
        self.jumpi_stack
            .first()
            .map(|entries| entries.iter().map(|(id, ds)| (id.to_string(), ds.clone())).collect())
            .unwrap_or_default()
    }
}
