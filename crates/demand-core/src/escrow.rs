//! The `(arbiter, demand)` header every escrow obligation leads with.

use alloy_dyn_abi::{DynSolType, DynSolValue};

use crate::abi;
use crate::error::{DemandError, Result};
use crate::types::{Bytes, Demand};

fn header() -> [DynSolType; 2] {
    [DynSolType::Address, DynSolType::Bytes]
}

impl Demand {
    /// Extract the demand from escrow obligation data. Fields after the
    /// header belong to the obligation type and are ignored.
    pub fn from_escrow_data(data: &[u8]) -> Result<Demand> {
        let values = abi::decode_struct_prefix(&header(), data)?;
        match values.as_slice() {
            [DynSolValue::Address(arbiter), DynSolValue::Bytes(demand)] => {
                Ok(Demand::new(*arbiter, Bytes::copy_from_slice(demand)))
            }
            _ => Err(DemandError::decode("escrow header is not (address, bytes)")),
        }
    }

    /// Encode escrow obligation data: this demand followed by `rest`.
    pub fn to_escrow_data(&self, rest: Vec<DynSolValue>) -> Bytes {
        let mut values = vec![
            DynSolValue::Address(self.arbiter),
            DynSolValue::Bytes(self.demand.to_vec()),
        ];
        values.extend(rest);
        Bytes::from(abi::encode_struct(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    #[test]
    fn header_is_read_from_longer_obligation_data() {
        let demand = Demand::new(Address::repeat_byte(0x42), vec![1, 2, 3, 4, 5]);
        let data = demand.to_escrow_data(vec![
            DynSolValue::Address(Address::repeat_byte(0x77)),
            abi::uint(1_000u64),
        ]);
        assert_eq!(Demand::from_escrow_data(&data).unwrap(), demand);
    }

    #[test]
    fn bare_header_round_trips() {
        let demand = Demand::new(Address::repeat_byte(0x42), Bytes::new());
        let data = demand.to_escrow_data(vec![]);
        assert_eq!(Demand::from_escrow_data(&data).unwrap(), demand);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Demand::from_escrow_data(&[0u8; 16]).is_err());
    }
}
