//! `demand-core`: escrow demand encoding and arbiter demand trees.
//!
//! A demand is an `(arbiter, bytes)` pair. The bytes are a positional tuple
//! whose layout belongs to the arbiter; composing arbiters embed further
//! demands inside theirs, so one demand describes a tree of arbiters.
//!
//! # Architecture
//!
//! ```text
//! DemandSchema    ← field list as data: "address oracle, bytes data"
//!     │
//!     ▼
//! DemandCodec     ← encode/decode Record <-> Bytes (alloy-dyn-abi tuple layout)
//!     │              non-composing, or composing (baseArbiter, baseDemand, ..)
//!     ▼
//! ArbiterRegistry ← Address -> ArbiterDemandParser {simple | single | fanout}
//!     │              parse_demand() recurses, depth-bounded
//!     ▼
//! ParsedDemand    ← tree; tree.rs walks it (all_arbiters, structure_description)
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use demand_core::{abi, ArbiterRegistry, Demand, DemandCodec, DemandSchema, Record};
//!
//! let codec = DemandCodec::non_composing(DemandSchema::parse("MinAmount", "uint256 minAmount")?)?;
//! let mut registry = ArbiterRegistry::new();
//! registry.register_codec(arbiter, &codec);
//!
//! let bytes = codec.encode(&Record::new().with("minAmount", abi::uint(100u64)))?;
//! let tree = registry.parse_demand(&Demand::new(arbiter, bytes))?;
//! println!("{}", demand_core::structure_description(&tree));
//! ```

pub mod abi;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod escrow;
pub mod registry;
pub mod tree;
pub mod types;

pub use abi::{DynSolType, DynSolValue};
pub use catalog::{decision_key, ArbiterAddresses, BuiltinArbiter};
pub use codec::{CodecShape, DemandCodec, DemandSchema, FieldSpec, Record};
pub use error::{DemandError, Result};
pub use registry::{
    ArbiterDemandParser, ArbiterRegistry, DemandKind, ParsedDemand, ParserKind, MAX_DEMAND_DEPTH,
};
pub use tree::{all_arbiters, is_fully_parseable, structure_description};
pub use types::{Address, Attestation, Bytes, Demand, TxRef, Uid, B256, U256};
