use serde::{Deserialize, Serialize};

use demand_core::{Address, Attestation, B256};

use crate::ledger::BlockRange;

/// Narrows which pending obligations an arbitration pass looks at.
///
/// Every field is optional and off by default. Times and ages are unix
/// seconds; block bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrateFilters {
    // time window
    pub min_time: Option<u64>,
    pub max_time: Option<u64>,
    pub min_age: Option<u64>,
    pub max_age: Option<u64>,
    pub exclude_expired: bool,

    // attestation properties
    pub specific_attester: Option<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_attesters: Vec<Address>,
    pub specific_recipient: Option<Address>,
    pub exclude_revoked: bool,
    pub require_ref_uid: bool,
    pub specific_schema: Option<B256>,

    // block range
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub max_block_range: Option<u64>,

    // batch shaping
    pub max_obligations: Option<usize>,
    pub prioritize_recent: bool,

    pub only_if_escrow_demands_current_oracle: bool,
    pub skip_already_arbitrated: bool,
}

impl ArbitrateFilters {
    /// Whether `att` passes every attestation-level predicate at time `now`.
    pub fn admits(&self, att: &Attestation, now: u64) -> bool {
        let age = now.saturating_sub(att.time);
        self.min_time.map_or(true, |t| att.time >= t)
            && self.max_time.map_or(true, |t| att.time <= t)
            && self.min_age.map_or(true, |a| age >= a)
            && self.max_age.map_or(true, |a| age <= a)
            && !(self.exclude_expired && att.is_expired_at(now))
            && self.specific_attester.map_or(true, |a| att.attester == a)
            && !self.exclude_attesters.contains(&att.attester)
            && self.specific_recipient.map_or(true, |r| att.recipient == r)
            && !(self.exclude_revoked && att.is_revoked())
            && !(self.require_ref_uid && !att.has_ref())
            && self.specific_schema.map_or(true, |s| att.schema == s)
    }

    /// The block range to scan given the current `head`, or `None` when it is
    /// empty. `max_block_range` keeps the most recent blocks.
    pub fn block_range(&self, head: u64) -> Option<BlockRange> {
        let to = self.to_block.map_or(head, |t| t.min(head));
        let mut from = self.from_block.unwrap_or(0);
        if let Some(max) = self.max_block_range.filter(|m| *m > 0) {
            from = from.max((to + 1).saturating_sub(max));
        }
        (from <= to).then(|| BlockRange::new(from, to))
    }
}
