//! Read-only traversals over a resolved [`ParsedDemand`] tree.

use std::fmt::Write as _;

use crate::abi::ValueView;
use crate::codec::{ARBITERS, BASE_ARBITER, BASE_DEMAND, DEMANDS};
use crate::registry::{DemandKind, ParsedDemand};
use crate::types::Address;

/// Pre-order iterator over a demand tree.
pub struct Walk<'a> {
    stack: Vec<&'a ParsedDemand>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ParsedDemand;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

impl ParsedDemand {
    /// Root first, then children left to right, depth first.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Tree height; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        1 + self.children().iter().map(ParsedDemand::depth).max().unwrap_or(0)
    }

    /// Every node judged by `arbiter`, in pre-order.
    pub fn find(&self, arbiter: Address) -> impl Iterator<Item = &ParsedDemand> {
        self.walk().filter(move |node| node.arbiter == arbiter)
    }
}

/// Every arbiter in the tree, root first, duplicates kept.
pub fn all_arbiters(tree: &ParsedDemand) -> Vec<Address> {
    tree.walk().map(|node| node.arbiter).collect()
}

/// True iff no node anywhere in the tree is `unknown`.
pub fn is_fully_parseable(tree: &ParsedDemand) -> bool {
    tree.walk().all(|node| node.kind != DemandKind::Unknown)
}

/// Indented rendering of the tree: one header line per node followed by its
/// own field values. Fields that only carry children are left out; the
/// children are rendered beneath instead.
///
/// ```text
/// Wrapper 0xbbbb…bbbb (composing)
///   extra: true
///   MinAmount 0xaaaa…aaaa (simple)
///     minAmount: 100
/// ```
pub fn structure_description(tree: &ParsedDemand) -> String {
    let mut out = String::new();
    describe(tree, 0, &mut out);
    out
}

fn describe(node: &ParsedDemand, level: usize, out: &mut String) {
    let pad = "  ".repeat(level);
    let label = node.label.as_deref().unwrap_or("unknown");
    let _ = writeln!(out, "{pad}{label} {} ({})", node.arbiter, node.kind);

    match &node.parsed {
        Some(record) => {
            let composing = node.kind == DemandKind::Composing;
            for (name, value) in record.iter() {
                if composing && [BASE_ARBITER, BASE_DEMAND, ARBITERS, DEMANDS].contains(&name) {
                    continue;
                }
                let _ = writeln!(out, "{pad}  {name}: {}", ValueView(value));
            }
        }
        None => {
            let _ = writeln!(out, "{pad}  data: {}", node.demand_data);
        }
    }

    for child in node.children() {
        describe(child, level + 1, out);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::uint;
    use alloy_dyn_abi::DynSolValue;
    use crate::codec::Record;
    use crate::types::Bytes;

    fn leaf(arbiter: u8, kind: DemandKind) -> ParsedDemand {
        ParsedDemand {
            arbiter: Address::repeat_byte(arbiter),
            label: (kind != DemandKind::Unknown).then(|| format!("Leaf{arbiter}")),
            demand_data: Bytes::from(vec![arbiter]),
            parsed: (kind != DemandKind::Unknown)
                .then(|| Record::new().with("n", uint(arbiter as u64))),
            kind,
            nested: None,
        }
    }

    fn node(arbiter: u8, children: Vec<ParsedDemand>) -> ParsedDemand {
        ParsedDemand {
            arbiter: Address::repeat_byte(arbiter),
            label: Some("And".to_string()),
            demand_data: Bytes::new(),
            parsed: Some(
                Record::new()
                    .with(ARBITERS, DynSolValue::Array(vec![]))
                    .with(DEMANDS, DynSolValue::Array(vec![])),
            ),
            kind: DemandKind::Composing,
            nested: Some(children),
        }
    }

    fn sample() -> ParsedDemand {
        // 1 -> [2 -> [3], 3, 4?]
        node(
            1,
            vec![
                node(2, vec![leaf(3, DemandKind::Simple)]),
                leaf(3, DemandKind::Simple),
                leaf(4, DemandKind::Unknown),
            ],
        )
    }

    #[test]
    fn all_arbiters_is_pre_order_with_duplicates() {
        let got = all_arbiters(&sample());
        let want: Vec<_> = [1, 2, 3, 3, 4].into_iter().map(Address::repeat_byte).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn fully_parseable_tracks_unknown_nodes_at_any_depth() {
        assert!(!is_fully_parseable(&sample()));
        assert!(is_fully_parseable(&leaf(1, DemandKind::Simple)));
        assert!(!is_fully_parseable(&leaf(1, DemandKind::Unknown)));
        let deep = node(1, vec![node(2, vec![leaf(9, DemandKind::Unknown)])]);
        assert!(!is_fully_parseable(&deep));
    }

    #[test]
    fn depth_and_find() {
        let tree = sample();
        assert_eq!(tree.depth(), 3);
        assert_eq!(leaf(1, DemandKind::Simple).depth(), 1);
        assert_eq!(tree.find(Address::repeat_byte(3)).count(), 2);
        assert_eq!(tree.find(Address::repeat_byte(7)).count(), 0);
    }

    #[test]
    fn description_is_stable_and_indented() {
        let a = structure_description(&sample());
        assert_eq!(a, structure_description(&sample()));
        let lines: Vec<_> = a.lines().collect();
        assert!(lines[0].starts_with("And 0x0101"));
        assert!(lines[0].ends_with("(composing)"));
        assert!(lines[1].starts_with("  And 0x0202"));
        assert!(lines.contains(&"      n: 3"));
        assert!(lines.contains(&"    data: 0x04"));
        assert!(!a.contains("arbiters:"));
    }
}
