use alloy_dyn_abi::DynSolValue;
use serde::Serialize;
use std::collections::HashMap;

use crate::codec::{DemandCodec, Record, ARBITERS, BASE_ARBITER, BASE_DEMAND, DEMANDS};
use crate::error::{DemandError, Result};
use crate::types::{Address, Bytes, Demand};

/// Default bound on composed-demand nesting. A root-only tree has depth 1.
pub const MAX_DEMAND_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// ArbiterDemandParser
// ---------------------------------------------------------------------------

/// How a parser's decoded record leads to child demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Leaf: no children.
    Simple,
    /// One child from `baseArbiter` / `baseDemand`.
    ComposingSingle,
    /// N children from parallel `arbiters[]` / `demands[]`.
    ComposingFanout,
}

/// The decode half of a codec, tagged with its composition kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterDemandParser {
    codec: DemandCodec,
    kind: ParserKind,
}

impl ArbiterDemandParser {
    pub fn simple(codec: DemandCodec) -> Self {
        ArbiterDemandParser {
            codec,
            kind: ParserKind::Simple,
        }
    }

    pub fn composing_single(codec: DemandCodec) -> Self {
        ArbiterDemandParser {
            codec,
            kind: ParserKind::ComposingSingle,
        }
    }

    pub fn composing_fanout(codec: DemandCodec) -> Self {
        ArbiterDemandParser {
            codec,
            kind: ParserKind::ComposingFanout,
        }
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    pub fn is_composing(&self) -> bool {
        self.kind != ParserKind::Simple
    }

    pub fn label(&self) -> &str {
        self.codec.name()
    }

    pub fn codec(&self) -> &DemandCodec {
        &self.codec
    }

    pub fn parse(&self, data: &[u8]) -> Result<Record> {
        self.codec.decode(data)
    }

    /// Child demands carried by a record this parser produced, in order.
    fn children(&self, arbiter: Address, record: &Record) -> Result<Vec<Demand>> {
        match self.kind {
            ParserKind::Simple => Ok(Vec::new()),
            ParserKind::ComposingSingle => {
                let base = record.address(BASE_ARBITER);
                let demand = record.bytes(BASE_DEMAND);
                match (base, demand) {
                    (Some(base), Some(demand)) => {
                        Ok(vec![Demand::new(base, Bytes::copy_from_slice(demand))])
                    }
                    _ => Err(DemandError::MissingComposition { arbiter }),
                }
            }
            ParserKind::ComposingFanout => {
                let (Some(arbiters), Some(demands)) = (record.array(ARBITERS), record.array(DEMANDS))
                else {
                    return Err(DemandError::MissingComposition { arbiter });
                };
                if arbiters.len() != demands.len() {
                    return Err(DemandError::Decode(format!(
                        "{}: {} arbiters but {} demands",
                        self.label(),
                        arbiters.len(),
                        demands.len()
                    )));
                }
                arbiters
                    .iter()
                    .zip(demands)
                    .map(|(a, d)| match (a, d) {
                        (DynSolValue::Address(a), DynSolValue::Bytes(d)) => {
                            Ok(Demand::new(*a, Bytes::copy_from_slice(d)))
                        }
                        _ => Err(DemandError::MissingComposition { arbiter }),
                    })
                    .collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ParsedDemand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandKind {
    Simple,
    Composing,
    Unknown,
}

impl DemandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemandKind::Simple => "simple",
            DemandKind::Composing => "composing",
            DemandKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DemandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a resolved demand tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDemand {
    pub arbiter: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub demand_data: Bytes,
    pub parsed: Option<Record>,
    pub kind: DemandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<Vec<ParsedDemand>>,
}

impl ParsedDemand {
    fn unknown(demand: &Demand) -> Self {
        ParsedDemand {
            arbiter: demand.arbiter,
            label: None,
            demand_data: demand.demand.clone(),
            parsed: None,
            kind: DemandKind::Unknown,
            nested: None,
        }
    }

    pub fn children(&self) -> &[ParsedDemand] {
        self.nested.as_deref().unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// ArbiterRegistry
// ---------------------------------------------------------------------------

/// Arbiter address to parser map. Built up front, then shared read-only.
#[derive(Debug, Clone)]
pub struct ArbiterRegistry {
    parsers: HashMap<Address, ArbiterDemandParser>,
    max_depth: usize,
}

impl Default for ArbiterRegistry {
    fn default() -> Self {
        ArbiterRegistry::new()
    }
}

impl ArbiterRegistry {
    pub fn new() -> Self {
        ArbiterRegistry {
            parsers: HashMap::new(),
            max_depth: MAX_DEMAND_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Last registration for an address wins.
    pub fn register(&mut self, address: Address, parser: ArbiterDemandParser) {
        if let Some(prev) = self.parsers.insert(address, parser) {
            tracing::debug!(arbiter = %address, previous = prev.label(), "arbiter parser replaced");
        }
    }

    pub fn register_codec(&mut self, address: Address, codec: &DemandCodec) {
        self.register(address, codec.parser());
    }

    pub fn get_parser(&self, address: &Address) -> Option<&ArbiterDemandParser> {
        self.parsers.get(address)
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Resolve `demand` into a tree, recursing through composing arbiters.
    ///
    /// Unregistered arbiters become `unknown` leaves. Malformed bytes for a
    /// registered arbiter, and nesting deeper than [`Self::max_depth`], abort
    /// the whole resolution.
    pub fn parse_demand(&self, demand: &Demand) -> Result<ParsedDemand> {
        self.resolve(demand, 1)
    }

    fn resolve(&self, demand: &Demand, depth: usize) -> Result<ParsedDemand> {
        if depth > self.max_depth {
            return Err(DemandError::RecursionLimitExceeded {
                limit: self.max_depth,
                arbiter: demand.arbiter,
            });
        }
        let Some(parser) = self.parsers.get(&demand.arbiter) else {
            tracing::debug!(arbiter = %demand.arbiter, depth, "unregistered arbiter");
            return Ok(ParsedDemand::unknown(demand));
        };

        let record = parser.parse(&demand.demand)?;
        let (kind, nested) = if parser.is_composing() {
            let nested = parser
                .children(demand.arbiter, &record)?
                .iter()
                .map(|child| self.resolve(child, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            (DemandKind::Composing, Some(nested))
        } else {
            (DemandKind::Simple, None)
        };

        Ok(ParsedDemand {
            arbiter: demand.arbiter,
            label: Some(parser.label().to_string()),
            demand_data: demand.demand.clone(),
            parsed: Some(record),
            kind,
            nested,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
