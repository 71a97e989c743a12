use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use alloy_dyn_abi::{DynSolType, DynSolValue};

use crate::abi::{self, ValueView};
use crate::error::{DemandError, Result};
use crate::registry::ArbiterDemandParser;
use crate::types::{Address, Bytes, B256, U256};

/// Leading field every composing arbiter carries: the wrapped arbiter.
pub const BASE_ARBITER: &str = "baseArbiter";
/// Leading field every composing arbiter carries: the wrapped demand.
pub const BASE_DEMAND: &str = "baseDemand";
/// Fan-out composition: the list of child arbiters.
pub const ARBITERS: &str = "arbiters";
/// Fan-out composition: the list of child demands, parallel to `arbiters`.
pub const DEMANDS: &str = "demands";

// ---------------------------------------------------------------------------
// FieldSpec / DemandSchema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(with = "kind_serde")]
    pub kind: DynSolType,
}

/// Field kinds travel as their Solidity type names.
mod kind_serde {
    use alloy_dyn_abi::DynSolType;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(kind: &DynSolType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::abi::kind_name(kind))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DynSolType, D::Error> {
        let name = String::deserialize(deserializer)?;
        crate::abi::parse_kind(&name).map_err(de::Error::custom)
    }
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: DynSolType) -> Self {
        FieldSpec {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered field list describing one arbiter's demand struct.
///
/// Schemas are plain data. They can be written as a signature string:
///
/// ```rust,ignore
/// let schema = DemandSchema::parse("TrustedOracle", "address oracle, bytes data")?;
/// ```
///
/// or deserialized from config (`{name, fields: [{name, kind}]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl DemandSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self> {
        let schema = DemandSchema {
            name: name.into(),
            fields,
        };
        schema.check()?;
        Ok(schema)
    }

    /// Parse a comma-separated `"<type> <name>"` list.
    pub fn parse(name: impl Into<String>, signature: &str) -> Result<Self> {
        let name = name.into();
        let mut fields = Vec::new();
        for part in signature.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut words = part.split_whitespace();
            let (Some(kind), Some(field), None) = (words.next(), words.next(), words.next()) else {
                return Err(DemandError::InvalidSchema(format!(
                    "expected '<type> <name>' in '{part}' of schema '{name}'"
                )));
            };
            fields.push(FieldSpec::new(field, abi::parse_kind(kind)?));
        }
        DemandSchema::new(name, fields)
    }

    pub fn kinds(&self) -> Vec<DynSolType> {
        self.fields.iter().map(|f| f.kind.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn check(&self) -> Result<()> {
        for (i, f) in self.fields.iter().enumerate() {
            if f.name.is_empty() {
                return Err(DemandError::InvalidSchema(format!(
                    "field {i} of schema '{}' has no name",
                    self.name
                )));
            }
            if self.fields[..i].iter().any(|g| g.name == f.name) {
                return Err(DemandError::DuplicateField {
                    schema: self.name.clone(),
                    field: f.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for DemandSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", abi::kind_name(&field.kind), field.name)?;
        }
        f.write_str(")")
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A decoded demand struct: named values in declaration order.
///
/// Equality compares fields by name, so two records holding the same values
/// are equal whatever order they were built in.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, DynSolValue)>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder-style insert; replaces an existing field of the same name.
    pub fn with(mut self, name: impl Into<String>, value: DynSolValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: DynSolValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        match self.get(name)? {
            DynSolValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            DynSolValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn uint(&self, name: &str) -> Option<U256> {
        match self.get(name)? {
            DynSolValue::Uint(v, _) => Some(*v),
            _ => None,
        }
    }

    /// A `bytes32` field.
    pub fn b256(&self, name: &str) -> Option<B256> {
        match self.get(name)? {
            DynSolValue::FixedBytes(word, 32) => Some(*word),
            _ => None,
        }
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.get(name)? {
            DynSolValue::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn array(&self, name: &str) -> Option<&[DynSolValue]> {
        match self.get(name)? {
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DynSolValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, &ValueView(value))?;
        }
        map.end()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {}", ValueView(value))?;
        }
        f.write_str("}")
    }
}

// ---------------------------------------------------------------------------
// DemandCodec
// ---------------------------------------------------------------------------

/// Whether an arbiter wraps another arbiter's demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecShape {
    NonComposing,
    Composing,
}

/// Encode/decode pair for one arbiter's demand struct, built from a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandCodec {
    schema: DemandSchema,
    shape: CodecShape,
    kinds: Vec<DynSolType>,
}

impl DemandCodec {
    /// Leaf codec: the schema's fields, as given.
    pub fn non_composing(schema: DemandSchema) -> Result<Self> {
        schema.check()?;
        let kinds = schema.kinds();
        Ok(DemandCodec {
            schema,
            shape: CodecShape::NonComposing,
            kinds,
        })
    }

    /// Wrapping codec: `baseArbiter: address, baseDemand: bytes` followed by
    /// the schema's own fields.
    pub fn composing(schema: DemandSchema) -> Result<Self> {
        for reserved in [BASE_ARBITER, BASE_DEMAND] {
            if schema.field(reserved).is_some() {
                return Err(DemandError::DuplicateField {
                    schema: schema.name.clone(),
                    field: reserved.to_string(),
                });
            }
        }
        let mut fields = vec![
            FieldSpec::new(BASE_ARBITER, DynSolType::Address),
            FieldSpec::new(BASE_DEMAND, DynSolType::Bytes),
        ];
        fields.extend(schema.fields);
        let schema = DemandSchema::new(schema.name, fields)?;
        let kinds = schema.kinds();
        Ok(DemandCodec {
            schema,
            shape: CodecShape::Composing,
            kinds,
        })
    }

    pub fn schema(&self) -> &DemandSchema {
        &self.schema
    }

    pub fn shape(&self) -> CodecShape {
        self.shape
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn encode(&self, record: &Record) -> Result<Bytes> {
        let mismatch = |reason: String| DemandError::ShapeMismatch {
            schema: self.schema.name.clone(),
            reason,
        };
        if record.len() != self.schema.fields.len() {
            return Err(mismatch(format!(
                "expected {} fields, got {}",
                self.schema.fields.len(),
                record.len()
            )));
        }
        let mut values = Vec::with_capacity(self.schema.fields.len());
        for field in &self.schema.fields {
            let value = record
                .get(&field.name)
                .ok_or_else(|| mismatch(format!("missing field '{}'", field.name)))?;
            if !abi::fits(&field.kind, value) {
                return Err(mismatch(format!(
                    "field '{}' is not a {}",
                    field.name,
                    abi::kind_name(&field.kind)
                )));
            }
            values.push(value.clone());
        }
        Ok(Bytes::from(abi::encode_struct(values)))
    }

    pub fn decode(&self, data: &[u8]) -> Result<Record> {
        let values = abi::decode_struct(&self.kinds, data).map_err(|e| match e {
            DemandError::Decode(reason) => {
                DemandError::Decode(format!("{}: {reason}", self.schema.name))
            }
            other => other,
        })?;
        Ok(Record {
            fields: self
                .schema
                .fields
                .iter()
                .map(|f| f.name.clone())
                .zip(values)
                .collect(),
        })
    }

    /// Registry parser for this codec: simple, or composing over a single base.
    pub fn parser(&self) -> ArbiterDemandParser {
        match self.shape {
            CodecShape::NonComposing => ArbiterDemandParser::simple(self.clone()),
            CodecShape::Composing => ArbiterDemandParser::composing_single(self.clone()),
        }
    }

    /// Registry parser for N-ary composition over `address[] arbiters, bytes[] demands`.
    pub fn fanout_parser(&self) -> Result<ArbiterDemandParser> {
        let has = |name: &str, kind: DynSolType| {
            self.schema
                .field(name)
                .is_some_and(|f| f.kind == DynSolType::Array(Box::new(kind)))
        };
        if !has(ARBITERS, DynSolType::Address) || !has(DEMANDS, DynSolType::Bytes) {
            return Err(DemandError::InvalidSchema(format!(
                "fan-out schema '{}' needs 'address[] {ARBITERS}' and 'bytes[] {DEMANDS}'",
                self.schema.name
            )));
        }
        Ok(ArbiterDemandParser::composing_fanout(self.clone()))
    }
}

impl FromStr for DemandSchema {
    type Err = DemandError;

    /// `Name(type field, ...)`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = s
            .split_once('(')
            .ok_or_else(|| DemandError::InvalidSchema(format!("expected 'Name(...)', got '{s}'")))?;
        let body = rest
            .strip_suffix(')')
            .ok_or_else(|| DemandError::InvalidSchema(format!("unterminated schema '{s}'")))?;
        DemandSchema::parse(name.trim(), body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
