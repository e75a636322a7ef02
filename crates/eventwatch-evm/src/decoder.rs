//! ABI event decoding — signature hashing and log → named-args decoding.
//!
//! Indexed parameters are recovered from topics[1..]; non-indexed parameters
//! are ABI-decoded from the data payload as a sequence. Decoded values are
//! normalized to JSON: addresses and byte values as `0x…` hex strings,
//! integers as decimal strings (no precision loss for uint256), booleans and
//! strings as themselves.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::B256;
use std::collections::BTreeMap;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use eventwatch_core::abi::EventDef;

use crate::reader::RawLog;

/// Why a log that matched the address/topic filter could not be decoded.
/// Always surfaced to the operator — a malformed or stale ABI is a
/// data-integrity problem, never silently dropped.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("missing topic {index} for indexed parameter '{param}'")]
    MissingTopic { index: usize, param: String },

    #[error("invalid hex in {what}: {reason}")]
    InvalidHex { what: String, reason: String },

    #[error("unsupported ABI type '{ty}': {reason}")]
    BadType { ty: String, reason: String },

    #[error("ABI decode failed: {reason}")]
    AbiDecode { reason: String },

    #[error("data payload mismatch: expected {expected} values, got {got}")]
    Arity { expected: usize, got: usize },
}

/// topics[0] filter value for an event: keccak256 of its canonical signature.
///
/// e.g. `Transfer(address,address,uint256)` →
/// `0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef`
pub fn event_topic0(def: &EventDef) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(def.signature().as_bytes());
    hasher.finalize(&mut output);
    format!("{:#x}", B256::from(output))
}

/// Decode a raw log against an event definition into named arguments.
pub fn decode_log(
    def: &EventDef,
    log: &RawLog,
) -> Result<BTreeMap<String, serde_json::Value>, DecodeFailure> {
    let mut args = BTreeMap::new();

    // Indexed parameters → topics[1..], in declaration order
    let mut topic_index = 1;
    for input in def.indexed_inputs() {
        let topic = log
            .topics
            .get(topic_index)
            .ok_or_else(|| DecodeFailure::MissingTopic {
                index: topic_index,
                param: input.name.clone(),
            })?;
        args.insert(input.name.clone(), decode_topic(topic, &input.ty)?);
        topic_index += 1;
    }

    // Non-indexed parameters → data payload, ABI-encoded as a sequence
    let data_inputs = def.data_inputs();
    if !data_inputs.is_empty() {
        let types: Vec<DynSolType> = data_inputs
            .iter()
            .map(|i| parse_type(&i.ty))
            .collect::<Result<_, _>>()?;
        let data = decode_hex(&log.data, "data payload")?;

        let decoded = DynSolType::Tuple(types)
            .abi_decode_sequence(&data)
            .map_err(|e| DecodeFailure::AbiDecode { reason: e.to_string() })?;
        let values = match decoded {
            DynSolValue::Tuple(vals) => vals,
            other => vec![other],
        };
        if values.len() != data_inputs.len() {
            return Err(DecodeFailure::Arity {
                expected: data_inputs.len(),
                got: values.len(),
            });
        }
        for (input, value) in data_inputs.iter().zip(values) {
            args.insert(input.name.clone(), normalize(value));
        }
    }

    Ok(args)
}

/// Decode a single indexed topic (always 32 bytes).
///
/// Reference types (string, bytes, arrays, tuples) are stored in topics as
/// the keccak256 of their encoding — the original value is unrecoverable, so
/// the raw hash is returned as-is.
fn decode_topic(topic_hex: &str, ty: &str) -> Result<serde_json::Value, DecodeFailure> {
    if is_reference_type(ty) {
        return Ok(serde_json::Value::String(topic_hex.to_string()));
    }

    let bytes = decode_hex(topic_hex, "topic")?;
    let dyn_type = parse_type(ty)?;
    let value = dyn_type
        .abi_decode(&bytes)
        .map_err(|e| DecodeFailure::AbiDecode {
            reason: format!("topic decode: {e}"),
        })?;
    Ok(normalize(value))
}

fn is_reference_type(ty: &str) -> bool {
    ty == "string" || ty == "bytes" || ty.ends_with(']') || ty.starts_with("tuple") || ty.starts_with('(')
}

fn parse_type(ty: &str) -> Result<DynSolType, DecodeFailure> {
    ty.parse::<DynSolType>().map_err(|e| DecodeFailure::BadType {
        ty: ty.to_string(),
        reason: e.to_string(),
    })
}

fn decode_hex(hex_str: &str, what: &str) -> Result<Vec<u8>, DecodeFailure> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(stripped).map_err(|e| DecodeFailure::InvalidHex {
        what: what.to_string(),
        reason: e.to_string(),
    })
}

/// Convert a decoded `DynSolValue` to its JSON representation.
fn normalize(value: DynSolValue) -> serde_json::Value {
    match value {
        DynSolValue::Bool(b) => serde_json::Value::Bool(b),
        DynSolValue::Int(i, _) => serde_json::Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => serde_json::Value::String(u.to_string()),
        DynSolValue::Address(a) => serde_json::Value::String(format!("{a:#x}")),
        DynSolValue::FixedBytes(word, size) => {
            serde_json::Value::String(format!("0x{}", hex::encode(&word[..size])))
        }
        DynSolValue::Bytes(b) => serde_json::Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => serde_json::Value::String(s),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            serde_json::Value::Array(vals.into_iter().map(normalize).collect())
        }
        DynSolValue::Function(f) => {
            serde_json::Value::String(format!("0x{}", hex::encode(f.to_vec())))
        }
    }
}
