//! JSON wire types for a trace ingest payload: the structured-log trace
//! (`debug_traceTransaction` with `"tracer": null`) and the call-frame tree
//! (`callTracer`). Decoding a [`CallFrame`] or a [`StructLogRes`]'s stack and
//! memory snapshots from their hex-string wire form happens here; turning
//! the decoded values into provenance belongs to the tracer modules.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use alloy_primitives::{Address, U256};

use crate::error::ReplayError;

/// Every structured log emitted while replaying a transaction in debug mode,
/// plus the transaction's overall execution status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ExecutionResult {
    /// Total gas used by the transaction.
    pub gas: u64,
    /// Whether the top-level call reverted.
    pub failed: bool,
    /// Hex-encoded return data of the top-level call.
    #[cfg_attr(feature = "serde", serde(default))]
    pub return_value: String,
    /// The structured log, one entry per executed opcode.
    pub struct_logs: Vec<StructLogRes>,
}

/// One structured-log entry: the state of the machine before executing the
/// opcode at `pc`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StructLogRes {
    /// Program counter.
    pub pc: u64,
    /// Opcode mnemonic (`"PUSH1"`, `"SSTORE"`, ...).
    pub op: String,
    /// Gas remaining before this step.
    pub gas: u64,
    /// Gas this step cost.
    pub gas_cost: u64,
    /// Call-stack depth (1-indexed; the top-level call is depth 1).
    pub depth: i64,
    /// Set when this step's opcode execution failed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub error: Option<String>,
    /// Hex-encoded stack words, bottom to top, if the trace requested stack
    /// capture.
    #[cfg_attr(feature = "serde", serde(default))]
    pub stack: Option<Vec<String>>,
    /// Hex-encoded 32-byte memory words, in order, if the trace requested
    /// memory capture.
    #[cfg_attr(feature = "serde", serde(default))]
    pub memory: Option<Vec<String>>,
    /// Touched storage slots at this step, if the trace requested storage
    /// capture.
    #[cfg_attr(feature = "serde", serde(default))]
    pub storage: Option<alloy_primitives::map::HashMap<String, String>>,
}

/// One node of the call-frame tree (`callTracer`'s output shape).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CallFrame {
    /// The call-frame kind: `"CALL"`, `"DELEGATECALL"`, `"STATICCALL"`,
    /// `"CALLCODE"`, `"CREATE"`, or `"CREATE2"`.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,
    /// Caller address.
    pub from: String,
    /// Callee address (absent for some failed `CREATE`s).
    #[cfg_attr(feature = "serde", serde(default))]
    pub to: String,
    /// Hex-encoded value transferred with the call, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: String,
    /// Hex-encoded gas provided.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gas: String,
    /// Hex-encoded gas used.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gas_used: String,
    /// Hex-encoded call input.
    pub input: String,
    /// Hex-encoded call output, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub output: String,
    /// Revert reason / error string, if the call failed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub error: String,
    /// Nested calls made by this frame, in execution order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub calls: Vec<CallFrame>,
}

/// The replayer's view of the machine state at one structured-log step:
/// memory and stack contents, and the address the currently-executing code
/// belongs to. Mirrors `callTracer`'s and `debug_traceTransaction`'s shared
/// notion of a "scope", decoded from their hex wire form.
#[derive(Clone, Debug, Default)]
pub struct ScopeContext {
    /// The flat memory buffer at this step, decoded from the captured 32-byte
    /// memory words.
    pub memory: Vec<u8>,
    /// The stack, bottom to top.
    pub stack: Vec<U256>,
    /// The address of the contract whose code is executing.
    pub contract_address: Address,
}

/// A [`CallFrame`]'s fields decoded out of their hex wire encoding.
#[derive(Clone, Debug)]
pub struct DecodedCallFrame {
    /// Caller address.
    pub from: Address,
    /// Callee address.
    pub to: Address,
    /// Value transferred with the call.
    pub value: U256,
    /// Gas provided.
    pub gas: u64,
    /// Gas used.
    pub gas_used: u64,
    /// Call input.
    pub input: Vec<u8>,
    /// Call output.
    pub output: Vec<u8>,
}

impl CallFrame {
    /// Decodes this frame's hex-encoded fields.
    pub fn decode(&self) -> Result<DecodedCallFrame, ReplayError> {
        Ok(DecodedCallFrame {
            from: hex_to_address(&self.from)?,
            to: hex_to_address(&self.to)?,
            value: if self.value.is_empty() { U256::ZERO } else { hex_to_u256(&self.value)? },
            gas: if self.gas.is_empty() { 0 } else { hex_to_u64(&self.gas)? },
            gas_used: if self.gas_used.is_empty() { 0 } else { hex_to_u64(&self.gas_used)? },
            input: if self.input.is_empty() { Vec::new() } else { hex_to_bytes(&self.input)? },
            output: if self.output.is_empty() { Vec::new() } else { hex_to_bytes(&self.output)? },
        })
    }

    /// Whether this frame's `type` is one of the `CALL`-family opcodes that
    /// doesn't create a new contract.
    pub fn is_call(&self) -> bool {
        matches!(self.kind.as_str(), "CALL" | "DELEGATECALL" | "STATICCALL" | "CALLCODE")
    }

    /// Whether this frame's `type` is `CREATE` or `CREATE2`.
    pub fn is_create(&self) -> bool {
        matches!(self.kind.as_str(), "CREATE" | "CREATE2")
    }
}

/// Decodes a structured-log step's captured stack (bottom to top) into
/// stack words.
pub fn decode_stack(stack: &[String]) -> Result<Vec<U256>, ReplayError> {
    stack.iter().map(|s| hex_to_u256_lenient(s)).collect()
}

/// Decodes a structured-log step's captured memory snapshot (a sequence of
/// 32-byte words) into a flat byte buffer.
pub fn decode_memory(memory: &[String]) -> Result<Vec<u8>, ReplayError> {
    let mut out = Vec::with_capacity(memory.len() * 32);
    for word in memory {
        let bytes = hex_to_bytes(word)?;
        if bytes.len() != 32 {
            return Err(ReplayError::MalformedHex { field: "memory".to_string(), value: word.clone() });
        }
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

/// Decodes a `0x`-prefixed hex string into bytes.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, ReplayError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let padded;
    let digits = if stripped.len() % 2 != 0 {
        padded = alloc::format!("0{stripped}");
        padded.as_str()
    } else {
        stripped
    };
    alloy_primitives::hex::decode(digits)
        .map_err(|_| ReplayError::MalformedHex { field: "hex".to_string(), value: s.to_string() })
}

/// Decodes a `0x`-prefixed hex string into an address, left-padding or
/// truncating isn't performed — the string must encode exactly 20 bytes.
pub fn hex_to_address(s: &str) -> Result<Address, ReplayError> {
    let bytes = hex_to_bytes(s)?;
    if bytes.len() != 20 {
        return Err(ReplayError::MalformedHex { field: "address".to_string(), value: s.to_string() });
    }
    Ok(Address::from_slice(&bytes))
}

/// Decodes a `0x`-prefixed hex string into a `U256`, accepting any length up
/// to 32 bytes (shorter strings are treated as left-zero-padded).
pub fn hex_to_u256(s: &str) -> Result<U256, ReplayError> {
    let bytes = hex_to_bytes(s)?;
    if bytes.len() > 32 {
        return Err(ReplayError::MalformedHex { field: "u256".to_string(), value: s.to_string() });
    }
    Ok(U256::from_be_slice(&bytes))
}

/// Like [`hex_to_u256`] but also accepts non-`0x`-prefixed strings, matching
/// the structured log's occasionally bare stack-word encoding.
fn hex_to_u256_lenient(s: &str) -> Result<U256, ReplayError> {
    hex_to_u256(s)
}

/// Decodes a `0x`-prefixed hex string into a `u64` (e.g. a `CallFrame`'s
/// `gas`/`gasUsed` fields).
pub fn hex_to_u64(s: &str) -> Result<u64, ReplayError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(stripped, 16).map_err(|_| ReplayError::MalformedHex { field: "u64".to_string(), value: s.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_call_frame_value_and_input() {
        let frame = CallFrame {
            kind: "CALL".to_string(),
            from: "0x0000000000000000000000000000000000000001".to_string(),
            to: "0x0000000000000000000000000000000000000002".to_string(),
            value: "0x64".to_string(),
            gas: "0x5208".to_string(),
            gas_used: "0x5208".to_string(),
            input: "0xdeadbeef".to_string(),
            output: String::new(),
            error: String::new(),
            calls: Vec::new(),
        };
        let decoded = frame.decode().unwrap();
        assert_eq!(decoded.value, U256::from(100u64));
        assert_eq!(decoded.input, alloc::vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn decode_memory_rejects_short_words() {
        assert!(decode_memory(&["0x01".to_string()]).is_err());
    }

    #[test]
    fn call_frame_kind_classification() {
        let mut frame = CallFrame::default();
        frame.kind = "DELEGATECALL".to_string();
        assert!(frame.is_call());
        assert!(!frame.is_create());
        frame.kind = "CREATE2".to_string();
        assert!(frame.is_create());
    }

    #[test]
    fn odd_length_hex_is_left_padded() {
        assert_eq!(hex_to_bytes("0x4").unwrap(), alloc::vec![0x04]);
    }
}
