//! A contiguous run of opcodes executed without an intervening jump target:
//! the node type of the dynamic control-flow graph.

use alloc::string::String;
use alloc::vec::Vec;
use alloy_primitives::Address;
use revm::bytecode::opcode::{self, OpCode};

use crate::error::ReplayError;

/// Which code a basic block's bytes were read from: a contract's runtime
/// code, or its in-flight creation (init) code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BasicBlockType {
    /// Bytes came from a deployed contract's runtime code.
    Runtime,
    /// Bytes came from a `CREATE`/`CREATE2` frame's init code.
    Creation,
}

/// Whether `op` always terminates the basic block it appears in (the last
/// instruction executed before control either leaves the call or jumps
/// elsewhere).
pub fn is_block_end_op(op: OpCode) -> bool {
    matches!(
        op.get(),
        opcode::STOP | opcode::SELFDESTRUCT | opcode::RETURN | opcode::REVERT | opcode::JUMP | opcode::JUMPI
    )
}

/// Whether `op` enters a new call frame (and so also ends the current basic
/// block, even though the callee may return control to the same pc).
pub fn is_enter_op(op: OpCode) -> bool {
    matches!(
        op.get(),
        opcode::CALL
            | opcode::CALLCODE
            | opcode::DELEGATECALL
            | opcode::STATICCALL
            | opcode::CREATE
            | opcode::CREATE2
            | opcode::SELFDESTRUCT
    )
}

/// A maximal straight-line run of bytecode: starts at a jump target (or the
/// start of code) and ends at a jump, a call-entering opcode, or a
/// terminator (`STOP`/`RETURN`/`REVERT`/`SELFDESTRUCT`).
///
/// Built incrementally as the emulator steps through a contract's execution:
/// `pc` is unset until the first byte is appended, and later appends either
/// extend the block or are checked for consistency against what's already
/// recorded (the same block may be re-entered by a loop or a second call
/// into the same contract).
#[derive(Clone, Debug)]
pub struct BasicBlock {
    block_type: BasicBlockType,
    code_addr: Address,
    pc: Option<u64>,
    code: Vec<u8>,
}

impl BasicBlock {
    /// A fresh, empty basic block for `code_addr`'s runtime or creation code.
    pub fn new(block_type: BasicBlockType, code_addr: Address) -> Self {
        Self { block_type, code_addr, pc: None, code: Vec::new() }
    }

    /// Which code (runtime or creation) this block belongs to.
    pub fn block_type(&self) -> BasicBlockType {
        self.block_type
    }

    /// The contract address this block's code belongs to.
    pub fn address(&self) -> Address {
        self.code_addr
    }

    /// This block's starting program counter, once it has any instructions.
    pub fn pc(&self) -> Option<u64> {
        self.pc
    }

    /// The block's recorded bytes.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Number of recorded bytes.
    pub fn len(&self) -> u64 {
        self.code.len() as u64
    }

    /// Whether the block has recorded any instructions yet.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Whether the block's last byte is a `JUMP`.
    pub fn is_jump(&self) -> bool {
        self.code.last().copied() == Some(opcode::JUMP)
    }

    /// Whether the block's last byte is a `JUMPI`.
    pub fn is_jumpi(&self) -> bool {
        self.code.last().copied() == Some(opcode::JUMPI)
    }

    /// The `length` bytes starting at `pc`, or `None` if that range falls
    /// outside the block's recorded span.
    pub fn snippet(&self, pc: u64, length: u64) -> Option<&[u8]> {
        let start = self.pc?;
        if pc < start || pc + length > start + self.len() {
            return None;
        }
        let lo = (pc - start) as usize;
        let hi = lo + length as usize;
        Some(&self.code[lo..hi])
    }

    /// Appends (or reconciles) `instructions` observed at `pc`.
    ///
    /// The first call fixes the block's starting pc. A subsequent call that
    /// lands exactly at the current end extends the block; one that falls
    /// entirely within the already-recorded span must match byte-for-byte
    /// (the block was re-entered); any other shape is an integrity
    /// violation.
    pub fn add_instructions(&mut self, pc: u64, instructions: &[u8]) -> Result<(), ReplayError> {
        let start = *self.pc.get_or_insert(pc);

        if pc == start + self.len() {
            self.code.extend_from_slice(instructions);
        } else if pc >= start && pc + instructions.len() as u64 <= start + self.len() {
            let lo = (pc - start) as usize;
            let hi = lo + instructions.len();
            if &self.code[lo..hi] != instructions {
                return Err(ReplayError::InconsistentBasicBlock {
                    pc,
                    reason: String::from("instructions differ from the ones already recorded at this pc"),
                });
            }
        } else {
            return Err(ReplayError::InconsistentBasicBlock {
                pc,
                reason: String::from("append does not extend or fall within the recorded span"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_append_fixes_start_pc() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        assert!(block.pc().is_none());
        block.add_instructions(10, &[0x60, 0x01]).unwrap();
        assert_eq!(block.pc(), Some(10));
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn contiguous_append_extends() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        block.add_instructions(0, &[0x60, 0x01]).unwrap();
        block.add_instructions(2, &[0x00]).unwrap();
        assert_eq!(block.code(), &[0x60, 0x01, 0x00]);
    }

    #[test]
    fn re_entering_with_matching_bytes_is_a_no_op() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        block.add_instructions(0, &[0x60, 0x01, 0x00]).unwrap();
        assert!(block.add_instructions(0, &[0x60, 0x01]).is_ok());
    }

    #[test]
    fn re_entering_with_conflicting_bytes_errors() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        block.add_instructions(0, &[0x60, 0x01, 0x00]).unwrap();
        assert!(matches!(
            block.add_instructions(0, &[0x61]),
            Err(ReplayError::InconsistentBasicBlock { .. })
        ));
    }

    #[test]
    fn append_past_recorded_span_errors() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        block.add_instructions(10, &[0x60, 0x01]).unwrap();
        assert!(matches!(
            block.add_instructions(50, &[0x00]),
            Err(ReplayError::InconsistentBasicBlock { .. })
        ));
    }

    #[test]
    fn snippet_respects_bounds() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        block.add_instructions(0, &[0x60, 0x01, 0x00]).unwrap();
        assert_eq!(block.snippet(0, 2), Some(&[0x60, 0x01][..]));
        assert!(block.snippet(0, 10).is_none());
    }

    #[test]
    fn last_byte_classifies_jump_kind() {
        let mut block = BasicBlock::new(BasicBlockType::Runtime, Address::ZERO);
        block.add_instructions(0, &[0x60, 0x01, opcode::JUMPI]).unwrap();
        assert!(block.is_jumpi());
        assert!(!block.is_jump());
    }
}
