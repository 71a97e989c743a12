//! Demand payload layout.
//!
//! Payloads use the Solidity `abi.encode(struct)` layout, encoded and decoded
//! with `alloy-dyn-abi` against a field list known only at runtime. Every
//! field takes a 32-byte head slot in declaration order; variable-length
//! fields store an offset there and are tail-encoded after all heads. A
//! struct with any variable-length field is itself preceded by one offset
//! word (`0x20`).
//!
//! ```text
//! (address oracle, bytes data)
//!
//! 0x00  0000..0020                  offset of the struct
//! 0x20  0000..<oracle>              head[0]
//! 0x40  0000..0040                  head[1] = offset of `data` in the struct
//! 0x60  0000..<len>                 tail: length of `data`
//! 0x80  <data, right-padded to 32>
//! ```
//!
//! Untrusted input goes through [`Layout`] before alloy sees it: offsets must
//! stay in bounds and tails must not overlap, so the decoded value can never
//! be larger than the input.

use std::fmt;

pub use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{hex, U256};
use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::error::{DemandError, Result};

const WORD: usize = 32;

// ---------------------------------------------------------------------------
// Field kinds and values
// ---------------------------------------------------------------------------

/// Parse a Solidity type name such as `uint256`, `bytes32` or `address[]`.
pub fn parse_kind(s: &str) -> Result<DynSolType> {
    DynSolType::parse(s.trim())
        .map_err(|e| DemandError::InvalidSchema(format!("unsupported type '{}': {e}", s.trim())))
}

/// Canonical Solidity name of `kind`.
pub fn kind_name(kind: &DynSolType) -> String {
    kind.sol_type_name().into_owned()
}

/// A `uint256` value.
pub fn uint<T>(v: T) -> DynSolValue
where
    U256: alloy_primitives::ruint::UintTryFrom<T>,
{
    DynSolValue::Uint(U256::from(v), 256)
}

/// Whether `value` is a member of `kind`, width limits included.
pub fn fits(kind: &DynSolType, value: &DynSolValue) -> bool {
    match (kind, value) {
        (DynSolType::Bool, DynSolValue::Bool(_))
        | (DynSolType::Address, DynSolValue::Address(_))
        | (DynSolType::Bytes, DynSolValue::Bytes(_))
        | (DynSolType::String, DynSolValue::String(_))
        | (DynSolType::Function, DynSolValue::Function(_)) => true,
        (DynSolType::Uint(bits), DynSolValue::Uint(v, size)) => {
            size == bits && v.bit_len() <= *bits
        }
        (DynSolType::Int(bits), DynSolValue::Int(_, size)) => size == bits,
        (DynSolType::FixedBytes(n), DynSolValue::FixedBytes(word, size)) => {
            size == n && word[*n..].iter().all(|b| *b == 0)
        }
        (DynSolType::Array(inner), DynSolValue::Array(values)) => {
            values.iter().all(|v| fits(inner, v))
        }
        (DynSolType::FixedArray(inner, n), DynSolValue::FixedArray(values)) => {
            values.len() == *n && values.iter().all(|v| fits(inner, v))
        }
        (DynSolType::Tuple(kinds), DynSolValue::Tuple(values)) => {
            kinds.len() == values.len() && kinds.iter().zip(values).all(|(k, v)| fits(k, v))
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Struct encoding
// ---------------------------------------------------------------------------

pub fn encode_struct(values: Vec<DynSolValue>) -> Vec<u8> {
    DynSolValue::Tuple(values).abi_encode()
}

/// Decode a whole struct. Only the canonical encoding is accepted: the input
/// must re-encode to exactly the same bytes.
pub fn decode_struct(kinds: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>> {
    let values = decode_checked(kinds, data)?;
    let canonical = encode_struct(values.clone());
    if canonical != data {
        return Err(DemandError::decode(format!(
            "non-canonical encoding: expected {} bytes, got {}",
            canonical.len(),
            data.len()
        )));
    }
    Ok(values)
}

/// Decode the leading `kinds` of a longer struct, ignoring the rest.
pub fn decode_struct_prefix(kinds: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>> {
    decode_checked(kinds, data)
}

fn decode_checked(kinds: &[DynSolType], data: &[u8]) -> Result<Vec<DynSolValue>> {
    let ty = DynSolType::Tuple(kinds.to_vec());
    Layout { data }.param(&ty)?;
    let decoded = ty
        .abi_decode(data)
        .map_err(|e| DemandError::decode(e.to_string()))?;
    let DynSolValue::Tuple(values) = decoded else {
        return Err(DemandError::decode("struct did not decode as a tuple"));
    };
    for (i, (kind, value)) in kinds.iter().zip(&values).enumerate() {
        if !fits(kind, value) {
            return Err(DemandError::decode(format!(
                "field {i} is out of range for {}",
                kind_name(kind)
            )));
        }
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// Layout bounds
// ---------------------------------------------------------------------------

/// Walks the offsets and lengths of an encoding without materialising it.
struct Layout<'a> {
    data: &'a [u8],
}

fn head_size(kind: &DynSolType) -> usize {
    if kind.is_dynamic() {
        return WORD;
    }
    match kind {
        DynSolType::Tuple(kinds) => kinds.iter().map(head_size).fold(0, usize::saturating_add),
        DynSolType::FixedArray(inner, n) => head_size(inner).saturating_mul(*n),
        _ => WORD,
    }
}

impl Layout<'_> {
    fn within(&self, end: Option<usize>, what: &str) -> Result<usize> {
        end.filter(|end| *end <= self.data.len()).ok_or_else(|| {
            DemandError::decode(format!("{what} runs past the end of {} bytes", self.data.len()))
        })
    }

    /// A word that must hold a small offset or length.
    fn small_word(&self, at: usize) -> Result<usize> {
        let end = self.within(at.checked_add(WORD), "word")?;
        let word = &self.data[at..end];
        let (high, low) = word.split_at(WORD - 8);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(low);
        if high.iter().any(|b| *b != 0) {
            return Err(DemandError::decode(format!("offset or length at {at} is out of range")));
        }
        usize::try_from(u64::from_be_bytes(buf))
            .map_err(|_| DemandError::decode(format!("offset or length at {at} is out of range")))
    }

    /// A top-level parameter: one offset word first when dynamic.
    fn param(&self, kind: &DynSolType) -> Result<usize> {
        if kind.is_dynamic() {
            let offset = self.small_word(0)?;
            if offset < WORD {
                return Err(DemandError::decode("struct offset points into its own head"));
            }
            self.value(kind, offset)
        } else {
            self.value(kind, 0)
        }
    }

    /// Check a value of `kind` encoded at `at`; returns the end of its encoding.
    fn value(&self, kind: &DynSolType, at: usize) -> Result<usize> {
        match kind {
            DynSolType::Bytes | DynSolType::String => {
                let len = self.small_word(at)?;
                let padded = len.checked_add(WORD - 1).map(|n| n / WORD * WORD);
                let end = padded.and_then(|p| p.checked_add(at + WORD));
                self.within(end, "byte string")
            }
            DynSolType::Array(inner) => {
                let n = self.small_word(at)?;
                let start = at + WORD;
                // every element needs at least one head word
                self.within(
                    n.checked_mul(WORD).and_then(|len| len.checked_add(start)),
                    "array",
                )?;
                self.sequence(std::iter::repeat(inner.as_ref()).take(n), start)
            }
            DynSolType::FixedArray(inner, n) => {
                self.sequence(std::iter::repeat(inner.as_ref()).take(*n), at)
            }
            DynSolType::Tuple(kinds) => self.sequence(kinds.iter(), at),
            _ => self.within(at.checked_add(WORD), "word"),
        }
    }

    /// Heads at `start`, then tails in increasing, non-overlapping order.
    fn sequence<'k, I>(&self, kinds: I, start: usize) -> Result<usize>
    where
        I: Iterator<Item = &'k DynSolType> + Clone,
    {
        let heads = kinds.clone().map(head_size).fold(0, usize::saturating_add);
        let head_end = self.within(start.checked_add(heads), "head")?;
        let mut head = start;
        let mut tail_end = head_end;
        for kind in kinds {
            if kind.is_dynamic() {
                let offset = self.small_word(head)?;
                let target = start.checked_add(offset).unwrap_or(usize::MAX);
                if target < tail_end {
                    return Err(DemandError::decode(format!(
                        "tail at {target} overlaps earlier data ending at {tail_end}"
                    )));
                }
                tail_end = self.value(kind, target)?;
                head += WORD;
            } else {
                head = self.value(kind, head)?;
            }
        }
        Ok(tail_end)
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Human-readable and serde rendering of a decoded value. Integers render as
/// decimal strings, byte strings as `0x` hex.
pub struct ValueView<'a>(pub &'a DynSolValue);

fn write_list(f: &mut fmt::Formatter<'_>, open: &str, values: &[DynSolValue], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", ValueView(v))?;
    }
    f.write_str(close)
}

impl fmt::Display for ValueView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            DynSolValue::Bool(b) => write!(f, "{b}"),
            DynSolValue::Int(v, _) => write!(f, "{v}"),
            DynSolValue::Uint(v, _) => write!(f, "{v}"),
            DynSolValue::FixedBytes(word, n) => write!(f, "0x{}", hex::encode(&word[..*n])),
            DynSolValue::Address(a) => write!(f, "{a}"),
            DynSolValue::Function(func) => write!(f, "{func}"),
            DynSolValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            DynSolValue::String(s) => write!(f, "{s:?}"),
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
                write_list(f, "[", values, "]")
            }
            DynSolValue::Tuple(values) => write_list(f, "(", values, ")"),
            #[allow(unreachable_patterns)]
            _ => f.write_str("<custom>"),
        }
    }
}

impl Serialize for ValueView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            DynSolValue::Bool(b) => serializer.serialize_bool(*b),
            DynSolValue::String(s) => serializer.serialize_str(s),
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for v in values {
                    seq.serialize_element(&ValueView(v))?;
                }
                seq.end()
            }
            _ => serializer.collect_str(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
