//! Family-relation computation over the registry.
//!
//! Two relays are considered operated together — and so should never
//! appear together in one circuit — if any of three independent rules
//! applies. All three are deliberately permissive: false positives (two
//! unrelated relays wrongly called family) cost a little path
//! diversity; false negatives cost anonymity.

use crate::accessors;
use crate::config::ReconcilerConfig;
use crate::ids::{self, NicknameAssertion};
use crate::record::RelayRecord;
use crate::store::Store;

fn declared_family<'a>(record: &'a RelayRecord) -> &'a [String] {
    record
        .descriptor()
        .map(|d| d.declared_family.as_slice())
        .filter(|f| !f.is_empty())
        .or_else(|| record.microdesc().map(|md| md.data.declared_family.as_slice()))
        .unwrap_or(&[])
}

/// True if `record`'s declared-family list names `other`, per the
/// `hex_digest_nickname_matches`-style rule: a `$`-prefixed entry
/// matches by identity (optionally asserting the Named binding or a
/// mere nickname match), anything else matches by case-insensitive
/// nickname.
fn declares(record: &RelayRecord, other: &RelayRecord) -> bool {
    declared_family(record).iter().any(|entry| {
        if let Some(parsed) = ids::parse_hex_id(entry) {
            if parsed.id != other.identity() {
                return false;
            }
            match parsed.assertion {
                NicknameAssertion::None => true,
                NicknameAssertion::Named => {
                    accessors::is_named(other)
                        && parsed
                            .nickname
                            .as_deref()
                            .is_some_and(|n| accessors::nickname(other) == Some(n))
                }
                NicknameAssertion::Unverified => parsed
                    .nickname
                    .as_deref()
                    .is_some_and(|n| accessors::nickname(other) == Some(n)),
            }
        } else {
            accessors::nickname(other).is_some_and(|n| ids::nicknames_eq(entry, n))
        }
    })
}

/// True if `a` and `b` are in the same family, under the subnet rule,
/// mutual family declaration, or a configured family set.
pub fn in_same_family(config: &ReconcilerConfig, a: &RelayRecord, b: &RelayRecord) -> bool {
    if a.identity() == b.identity() {
        return true;
    }

    if let (Some(addr_a), Some(addr_b)) = (accessors::primary_ipv4(a), accessors::primary_ipv4(b)) {
        if config
            .subnet_config
            .addrs_in_same_subnet(&addr_a.ip(), &addr_b.ip())
        {
            return true;
        }
    }

    if declares(a, b) && declares(b, a) {
        return true;
    }

    if config
        .family_sets
        .iter()
        .any(|set| set.contains(&a.identity()) && set.contains(&b.identity()))
    {
        return true;
    }

    false
}

/// Expand `node` into the sequence of every record it shares a family
/// with by any rule, appending to `out`. Duplicates are permitted by
/// design (see the open-question note on `expand`); callers that need
/// uniqueness deduplicate by identity digest themselves.
pub fn expand(
    store: &Store,
    config: &ReconcilerConfig,
    node: &RelayRecord,
    out: &mut Vec<crate::ids::RelayId>,
) {
    if store.get_by_id(&node.identity()).is_some() {
        out.push(node.identity());
    }

    if let Some(node_addr) = accessors::primary_ipv4(node) {
        for other in store.iterate() {
            if other.identity() == node.identity() {
                continue;
            }
            if let Some(other_addr) = accessors::primary_ipv4(other) {
                if config
                    .subnet_config
                    .addrs_in_same_subnet(&node_addr.ip(), &other_addr.ip())
                {
                    out.push(other.identity());
                }
            }
        }
    }

    for other in store.iterate() {
        if other.identity() == node.identity() {
            continue;
        }
        if declares(node, other) && declares(other, node) {
            out.push(other.identity());
        }
    }

    for set in &config.family_sets {
        if set.contains(&node.identity()) {
            out.extend(set.iter().copied());
        }
    }
}
