//! The call tracer: builds the flat tree of [`CallTrace`]s and the native
//! and ERC-20 [`Flow`]s attached to them.
//!
//! Unlike the other three tracers, `CallTraceTracer` never looks at
//! provenance or dcfg structure directly — it receives the current call id,
//! dcfg id, and any already-resolved amount provenance as plain parameters,
//! supplied by whatever drives the lifecycle. This keeps it decoupled from
//! the tracers it logically depends on.

use alloc::vec::Vec;
use alloy_primitives::{address, b256, Address, B256, U256};
use revm::bytecode::opcode;
use revm::bytecode::opcode::OpCode;

use crate::ids::{CallId, DcfgId};
use crate::ingest::ScopeContext;
use crate::provenance::DataSourceRef;

/// Sentinel asset address for a native-value (ether) flow, as opposed to an
/// ERC-20 token address.
pub const NATIVE_TOKEN_ADDRESS: Address = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

/// Topic0 of `Transfer(address,address,uint256)`.
pub const ERC20_TRANSFER_TOPIC: B256 = b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Index of a [`CallTrace`] within [`CallTraceTracer`]'s flat arena.
pub type CallTraceId = usize;

/// A native-value or ERC-20 asset transfer attached to a [`CallTrace`].
#[derive(Clone, Debug)]
pub struct Flow {
    /// Sender.
    pub from: Address,
    /// Receiver.
    pub to: Address,
    /// [`NATIVE_TOKEN_ADDRESS`] for a value transfer, the token contract for
    /// an ERC-20 transfer.
    pub asset: Address,
    /// Amount transferred.
    pub amount: U256,
    /// This flow's position within its owning trace's flow list.
    pub index: usize,
    /// The dcfg node occurrence that produced this flow.
    pub dcfg_id: DcfgId,
    /// Provenance of the amount, if the dataflow tracer could resolve one.
    pub amount_tracker: Option<DataSourceRef>,
}

impl Flow {
    /// Whether this is a native-value flow rather than an ERC-20 one.
    pub fn is_ether(&self) -> bool {
        self.asset == NATIVE_TOKEN_ADDRESS
    }

    fn ether(from: Address, to: Address, amount: U256, index: usize, dcfg_id: DcfgId, amount_tracker: Option<DataSourceRef>) -> Self {
        Self { from, to, asset: NATIVE_TOKEN_ADDRESS, amount, index, dcfg_id, amount_tracker }
    }

    fn erc20(from: Address, to: Address, asset: Address, amount: U256, index: usize, dcfg_id: DcfgId, amount_tracker: Option<DataSourceRef>) -> Self {
        Self { from, to, asset, amount, index, dcfg_id, amount_tracker }
    }
}

/// One call frame in the flat trace tree: who called whom, with what opcode,
/// and the flows it (or, for native value, its caller) recorded.
#[derive(Clone, Debug)]
pub struct CallTrace {
    /// The frame's call id.
    pub id: CallId,
    /// Caller address.
    pub from: Address,
    /// Callee address.
    pub to: Address,
    /// The opcode that induced this frame (`CALL` for the top-level frame
    /// entered via `capture_start`, meaningful only as a frame-kind tag).
    pub kind: OpCode,
    /// The frame that made this call. The root trace is its own parent.
    pub parent: CallTraceId,
    /// Flows recorded against this trace.
    pub flows: Vec<Flow>,
}

/// Builds the call tree and its flows as a trace replays.
#[derive(Debug)]
pub struct CallTraceTracer {
    traces: Vec<CallTrace>,
    current: Option<CallTraceId>,
    call_boundaries: Vec<usize>,
    call_stack: Vec<OpCode>,
    last_dcfg_id: DcfgId,
}

impl Default for CallTraceTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTraceTracer {
    /// A fresh tracer, before any `capture_start`.
    pub fn new() -> Self {
        Self {
            traces: Vec::new(),
            current: None,
            call_boundaries: Vec::new(),
            call_stack: Vec::new(),
            last_dcfg_id: DcfgId::new(CallId::root(), 0, 0),
        }
    }

    /// The flat trace arena built so far, in the order traces were opened.
    pub fn traces(&self) -> &[CallTrace] {
        &self.traces
    }

    /// See [`super::Tracer::capture_start`].
    pub fn capture_start(&mut self, call_id: CallId, from: Address, to: Address, create: bool, value: U256) {
        let byte = if create { opcode::CREATE } else { opcode::CALL };
        let typ = OpCode::new(byte).expect("CREATE/CALL are valid opcodes");
        self.call_stack.push(typ);
        self.record_call(call_id, typ, from, to, value, None);
    }

    /// See [`super::Tracer::capture_enter`]. `amount_tracker` is the
    /// dataflow tracer's already-resolved provenance for the call's value
    /// argument, or `None` if the caller didn't have one on hand.
    pub fn capture_enter(&mut self, call_id: CallId, typ: OpCode, from: Address, to: Address, value: U256, amount_tracker: Option<DataSourceRef>) {
        self.call_stack.push(typ);
        self.record_call(call_id, typ, from, to, value, amount_tracker);
    }

    /// See [`super::Tracer::capture_exit`].
    pub fn capture_exit(&mut self, err: Option<&str>) {
        if err.is_none() {
            self.return_call();
        } else {
            self.rewind_call();
        }
        self.call_stack.pop();
    }

    /// See [`super::Tracer::capture_end`].
    pub fn capture_end(&mut self, _err: Option<&str>) {
        self.return_call(); // unnecessary, only to clear callBoundaries
        self.call_stack.pop();
    }

    /// See [`super::Tracer::capture_state`]. `dcfg_id` is the current step's
    /// dcfg node occurrence; `log3_amount_tracker` is the dataflow tracer's
    /// memory-window provenance for this step, pre-resolved by the caller
    /// since a `LOG3` Transfer match isn't known until this call decodes it.
    pub fn capture_state(&mut self, op: OpCode, scope: &ScopeContext, dcfg_id: DcfgId, log3_amount_tracker: Option<DataSourceRef>) {
        if op.get() == opcode::LOG3 {
            if let Some((from, to, amount)) = decode_erc20_transfer(scope) {
                let asset = scope.contract_address;
                self.record_erc20_flow(from, to, asset, amount, log3_amount_tracker, dcfg_id.clone());
            }
        }
        self.last_dcfg_id = dcfg_id;
    }

    fn record_call(&mut self, call_id: CallId, typ: OpCode, from: Address, to: Address, value: U256, amount_tracker: Option<DataSourceRef>) {
        let new_idx = self.traces.len();
        let parent = self.current.unwrap_or(new_idx);
        self.traces.push(CallTrace { id: call_id, from, to, kind: typ, parent, flows: Vec::new() });
        self.current = Some(new_idx);
        self.call_boundaries.push(new_idx);
        self.record_ether_flow(from, to, value, amount_tracker);
    }

    // Preserved quirk: this attaches to the *parent* trace's flow list, not
    // the trace that was just opened. At the root, parent == self, so a
    // value-carrying top-level call's inflow ends up on the root trace.
    fn record_ether_flow(&mut self, from: Address, to: Address, amount: U256, amount_tracker: Option<DataSourceRef>) {
        if amount == U256::ZERO {
            return;
        }
        let current = self.current.expect("record_call always sets current before this runs");
        let parent = self.traces[current].parent;
        let index = self.traces[parent].flows.len();
        let dcfg_id = self.last_dcfg_id.clone();
        self.traces[parent].flows.push(Flow::ether(from, to, amount, index, dcfg_id, amount_tracker));
    }

    fn record_erc20_flow(&mut self, from: Address, to: Address, asset: Address, amount: U256, amount_tracker: Option<DataSourceRef>, dcfg_id: DcfgId) {
        if amount == U256::ZERO {
            return;
        }
        let current = self.current.expect("record_erc20_flow: no active call trace");
        let index = self.traces[current].flows.len();
        self.traces[current].flows.push(Flow::erc20(from, to, asset, amount, index, dcfg_id, amount_tracker));
    }

    fn return_call(&mut self) {
        if self.call_boundaries.pop().is_some() {
            self.current = self.call_boundaries.last().copied();
        }
    }

    fn rewind_call(&mut self) {
        if let Some(&boundary) = self.call_boundaries.last() {
            self.traces.truncate(boundary);
            self.call_boundaries.pop();
            self.current = if self.call_boundaries.is_empty() { None } else { Some(self.traces.len() - 1) };
        }
    }
}

fn top(scope: &ScopeContext, i: usize) -> U256 {
    scope.stack[scope.stack.len() - 1 - i]
}

fn address_from_u256(value: U256) -> Address {
    Address::from_word(B256::from(value.to_be_bytes()))
}

/// If `scope`'s pre-pop stack matches a `LOG3`-encoded ERC-20 `Transfer`,
/// returns the memory window its amount lives in — so a caller can resolve
/// that window's provenance through the dataflow tracer before
/// [`CallTraceTracer::capture_state`] runs and the real step executes.
pub fn erc20_transfer_memory_window(scope: &ScopeContext) -> Option<(u64, u64)> {
    let topic0 = top(scope, 2);
    if B256::from(topic0.to_be_bytes()) != ERC20_TRANSFER_TOPIC {
        return None;
    }
    Some((top(scope, 0).to::<u64>(), top(scope, 1).to::<u64>()))
}

/// Matches `LOG3`'s pre-pop stack against the ERC-20 `Transfer` signature and
/// decodes `from`/`to`/`amount`. Returns `None` if the topic doesn't match or
/// the memory window falls outside the captured buffer.
fn decode_erc20_transfer(scope: &ScopeContext) -> Option<(Address, Address, U256)> {
    let (m_start, m_size) = erc20_transfer_memory_window(scope)?;
    let from = address_from_u256(top(scope, 3));
    let to = address_from_u256(top(scope, 4));
    let start = m_start as usize;
    let end = start.checked_add(m_size as usize)?;
    if end > scope.memory.len() {
        return None;
    }
    Some((from, to, U256::from_be_slice(&scope.memory[start..end])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_op() -> OpCode {
        OpCode::new(opcode::CALL).unwrap()
    }

    #[test]
    fn root_trace_is_its_own_parent() {
        let mut tracer = CallTraceTracer::new();
        tracer.capture_start(CallId::root(), Address::ZERO, Address::ZERO, false, U256::ZERO);
        assert_eq!(tracer.traces()[0].parent, 0);
    }

    #[test]
    fn native_transfer_attaches_to_root_when_root_carries_value() {
        let mut tracer = CallTraceTracer::new();
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        tracer.capture_start(CallId::root(), a, b, false, U256::from(10u64));
        assert_eq!(tracer.traces().len(), 1);
        assert_eq!(tracer.traces()[0].flows.len(), 1);
        let flow = &tracer.traces()[0].flows[0];
        assert!(flow.is_ether());
        assert_eq!(flow.from, a);
        assert_eq!(flow.to, b);
        assert_eq!(flow.amount, U256::from(10u64));
    }

    #[test]
    fn nested_call_attaches_its_inflow_to_the_caller() {
        let mut tracer = CallTraceTracer::new();
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        let c = Address::repeat_byte(0xC);
        tracer.capture_start(CallId::root(), a, b, false, U256::ZERO);
        tracer.capture_enter(CallId::root().child(0), call_op(), b, c, U256::from(5u64), None);
        assert_eq!(tracer.traces().len(), 2);
        assert!(tracer.traces()[1].flows.is_empty());
        assert_eq!(tracer.traces()[0].flows.len(), 1);
        assert_eq!(tracer.traces()[0].flows[0].from, b);
        assert_eq!(tracer.traces()[0].flows[0].to, c);
    }

    #[test]
    fn failed_call_is_rewound_out_of_the_trace_list() {
        let mut tracer = CallTraceTracer::new();
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        tracer.capture_start(CallId::root(), a, b, false, U256::ZERO);
        tracer.capture_enter(CallId::root().child(0), call_op(), b, Address::repeat_byte(0xC), U256::ZERO, None);
        tracer.capture_exit(Some("execution reverted"));
        assert_eq!(tracer.traces().len(), 1);
    }

    #[test]
    fn successful_call_returns_current_to_the_caller() {
        let mut tracer = CallTraceTracer::new();
        let a = Address::repeat_byte(0xA);
        let b = Address::repeat_byte(0xB);
        tracer.capture_start(CallId::root(), a, b, false, U256::ZERO);
        tracer.capture_enter(CallId::root().child(0), call_op(), b, Address::repeat_byte(0xC), U256::ZERO, None);
        tracer.capture_exit(None);
        assert_eq!(tracer.traces().len(), 2);
        assert_eq!(tracer.current, Some(0));
    }

    #[test]
    fn erc20_transfer_log_is_recorded_on_the_emitting_trace() {
        let mut tracer = CallTraceTracer::new();
        tracer.capture_start(CallId::root(), Address::ZERO, Address::ZERO, false, U256::ZERO);

        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let token = Address::repeat_byte(0x33);
        let mut memory = alloc::vec![0u8; 32];
        memory[31] = 100;
        let scope = ScopeContext {
            memory,
            stack: alloc::vec![
                U256::from_be_slice(to.as_slice()),
                U256::from_be_slice(from.as_slice()),
                U256::from_be_bytes(ERC20_TRANSFER_TOPIC.0),
                U256::from(32u64),
                U256::ZERO,
            ],
            contract_address: token,
        };
        let dcfg_id = DcfgId::new(CallId::root(), 0, 0);
        tracer.capture_state(OpCode::new(opcode::LOG3).unwrap(), &scope, dcfg_id, None);

        assert_eq!(tracer.traces()[0].flows.len(), 1);
        let flow = &tracer.traces()[0].flows[0];
        assert!(!flow.is_ether());
        assert_eq!(flow.asset, token);
        assert_eq!(flow.from, from);
        assert_eq!(flow.to, to);
        assert_eq!(flow.amount, U256::from(100u64));
    }
}
