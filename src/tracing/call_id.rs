//! Assigns each call frame its [`CallId`] as the trace is replayed.
//!
//! A call id is the path of *completed* sibling counts down to (but
//! excluding) the currently-executing frame — pushing a new `0` on
//! `capture_enter`/`capture_start` and incrementing the popped counter on
//! `capture_exit` is enough to derive it without ever looking at the call
//! tree itself.

use alloc::vec::Vec;
use alloy_primitives::Address;

use crate::ids::CallId;

/// Tracks the current call id across the lifecycle of a trace replay.
#[derive(Debug, Default)]
pub struct CallIdTracer {
    call_frame_ids: Vec<i64>,
}

impl CallIdTracer {
    /// A fresh tracer, before any `capture_start`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The call id of the frame currently executing.
    pub fn current_call_id(&self) -> CallId {
        CallId::from_path(self.call_frame_ids[..self.call_frame_ids.len() - 1].to_vec())
    }

    /// How many of the current frame's siblings have already completed.
    pub fn current_call_count(&self) -> i64 {
        *self.call_frame_ids.last().expect("capture_start not yet called")
    }

    /// See [`super::Tracer::capture_start`].
    pub fn capture_start(&mut self, _from: Address, _to: Address, _create: bool, _input: &[u8], _gas: u64, _value: alloy_primitives::U256) {
        self.call_frame_ids.push(0);
    }

    /// See [`super::Tracer::capture_enter`].
    pub fn capture_enter(&mut self, _typ: revm::bytecode::opcode::OpCode, _from: Address, _to: Address, _input: &[u8], _gas: u64, _value: alloy_primitives::U256) {
        self.call_frame_ids.push(0);
    }

    /// See [`super::Tracer::capture_exit`].
    pub fn capture_exit(&mut self, _output: &[u8], _gas_used: u64, _err: Option<&str>) {
        self.call_frame_ids.pop();
        if let Some(last) = self.call_frame_ids.last_mut() {
            *last += 1;
        }
    }
}

impl super::Tracer for CallIdTracer {
    fn capture_start(&mut self, from: Address, to: Address, create: bool, input: &[u8], gas: u64, value: alloy_primitives::U256) {
        CallIdTracer::capture_start(self, from, to, create, input, gas, value)
    }

    fn capture_enter(&mut self, typ: revm::bytecode::opcode::OpCode, from: Address, to: Address, input: &[u8], gas: u64, value: alloy_primitives::U256) {
        CallIdTracer::capture_enter(self, typ, from, to, input, gas, value)
    }

    fn capture_exit(&mut self, output: &[u8], gas_used: u64, err: Option<&str>) {
        CallIdTracer::capture_exit(self, output, gas_used, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::Tracer;
    use alloy_primitives::U256;

    fn drive_one_call_through_the_tracer_trait(tracer: &mut impl Tracer, op: revm::bytecode::opcode::OpCode) {
        tracer.capture_start(Address::ZERO, Address::ZERO, false, &[], 0, U256::ZERO);
        tracer.capture_enter(op, Address::ZERO, Address::ZERO, &[], 0, U256::ZERO);
    }

    #[test]
    fn tracer_trait_dispatch_matches_the_inherent_lifecycle_methods() {
        let mut tracer = CallIdTracer::new();
        let op = revm::bytecode::opcode::OpCode::new(revm::bytecode::opcode::CALL).unwrap();
        drive_one_call_through_the_tracer_trait(&mut tracer, op);
        assert_eq!(tracer.current_call_id(), CallId::root().child(0));
    }

    #[test]
    fn root_call_id_is_empty_path() {
        let mut tracer = CallIdTracer::new();
        tracer.capture_start(Address::ZERO, Address::ZERO, false, &[], 0, U256::ZERO);
        assert!(tracer.current_call_id().is_root());
    }

    #[test]
    fn siblings_increment_after_exit() {
        let mut tracer = CallIdTracer::new();
        tracer.capture_start(Address::ZERO, Address::ZERO, false, &[], 0, U256::ZERO);
        let op = revm::bytecode::opcode::OpCode::new(revm::bytecode::opcode::CALL).unwrap();
        tracer.capture_enter(op, Address::ZERO, Address::ZERO, &[], 0, U256::ZERO);
        assert_eq!(tracer.current_call_id(), CallId::root().child(0));
        tracer.capture_exit(&[], 0, None);
        tracer.capture_enter(op, Address::ZERO, Address::ZERO, &[], 0, U256::ZERO);
        assert_eq!(tracer.current_call_id(), CallId::root().child(1));
    }
}
