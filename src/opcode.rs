//! Opcode mnemonic lookup built on `revm`'s opcode byte table.
//!
//! The ingest format carries opcodes as mnemonic strings (`"PUSH1"`,
//! `"SSTORE"`, ...); this module builds the reverse mapping once from
//! `revm::bytecode::opcode::OpCode`'s own `Display` impl rather than hand
//! rolling a second opcode table.

use alloc::boxed::Box;
use alloc::string::ToString;
use alloy_primitives::map::HashMap;
use revm::bytecode::opcode::OpCode;
use std::sync::OnceLock;

use crate::error::ReplayError;

fn mnemonic_table() -> &'static HashMap<&'static str, OpCode> {
    static TABLE: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::default();
        for byte in 0u8..=255 {
            if let Some(op) = OpCode::new(byte) {
                let name: &'static str = Box::leak(op.to_string().into_boxed_str());
                table.insert(name, op);
            }
        }
        table
    })
}

/// Resolves a mnemonic (`"ADD"`, `"PUSH1"`, ...) to the corresponding
/// [`OpCode`].
pub fn op_from_mnemonic(mnemonic: &str) -> Result<OpCode, ReplayError> {
    mnemonic_table()
        .get(mnemonic)
        .copied()
        .ok_or_else(|| ReplayError::UnknownOpcode(mnemonic.to_string()))
}

/// The length, in bytes, of the immediate operand pushed by a `PUSHn`
/// opcode (`PUSH1` => 1, ..., `PUSH32` => 32), or `0` for `PUSH0` and any
/// non-push opcode.
pub fn push_immediate_len(op: OpCode) -> u64 {
    let byte = op.get();
    if (0x60..=0x7f).contains(&byte) {
        (byte - 0x5f) as u64
    } else {
        0
    }
}

/// Whether `op` is `PUSH1..=PUSH32` (excludes `PUSH0`).
pub fn is_push_with_immediate(op: OpCode) -> bool {
    push_immediate_len(op) > 0
}
