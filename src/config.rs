//! Configuration read by the Reconciler, Family Resolver, Selectors, and
//! Readiness Evaluator.
//!
//! Loading this configuration from a config file or builder is out of
//! scope for this crate (see the crate's purpose and scope notes); these
//! are plain `serde`-deserializable structs so that an embedding
//! application's config loader can produce them directly.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::ids::RelayId;
use serde::Deserialize;

/// Configuration for determining when two relays have addresses "too
/// close" in the network to be treated as unrelated.
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct SubnetConfig {
    /// Consider IPv4 nodes in the same /x to be the same family.
    ///
    /// If this value is 0, all nodes with IPv4 addresses are considered
    /// to be in the same family. If this value is above 32, no nodes are
    /// ever placed in the same family by this rule.
    subnets_family_v4: u8,
    /// Consider IPv6 nodes in the same /x to be the same family.
    ///
    /// Same semantics as `subnets_family_v4`, but for a /x out of 128
    /// bits.
    subnets_family_v6: u8,
    /// Whether this rule is enforced at all (`EnforceDistinctSubnets`).
    enabled: bool,
}

impl Default for SubnetConfig {
    fn default() -> Self {
        Self::new(true, 16, 32)
    }
}

impl SubnetConfig {
    /// Construct a new `SubnetConfig`.
    pub fn new(enabled: bool, subnets_family_v4: u8, subnets_family_v6: u8) -> Self {
        Self {
            enabled,
            subnets_family_v4,
            subnets_family_v6,
        }
    }

    /// Return true if the two addresses are in the same subnet,
    /// according to this configuration. Always false if the rule is
    /// disabled.
    pub fn addrs_in_same_subnet(&self, a: &IpAddr, b: &IpAddr) -> bool {
        if !self.enabled {
            return false;
        }
        match (a, b) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let bits = self.subnets_family_v4;
                if bits == 0 {
                    return true;
                }
                if bits > 32 {
                    return false;
                }
                let a = u32::from_be_bytes(a.octets());
                let b = u32::from_be_bytes(b.octets());
                (a >> (32 - bits)) == (b >> (32 - bits))
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let bits = self.subnets_family_v6;
                if bits == 0 {
                    return true;
                }
                if bits > 128 {
                    return false;
                }
                let a = u128::from_be_bytes(a.octets());
                let b = u128::from_be_bytes(b.octets());
                (a >> (128 - bits)) == (b >> (128 - bits))
            }
            _ => false,
        }
    }
}

/// A configured set of relays, identified by identity digest, that the
/// operator has declared to be operated together as one family.
///
/// This is distinct from a relay's own *declared* family (which comes
/// from the descriptor/microdescriptor and requires mutual declaration
/// to count); membership in a configured family set is unconditional.
#[derive(Clone, Debug, Default)]
pub struct FamilySet {
    members: HashSet<RelayId>,
}

impl FamilySet {
    /// Build a family set from a list of relay identities.
    pub fn new(members: impl IntoIterator<Item = RelayId>) -> Self {
        FamilySet {
            members: members.into_iter().collect(),
        }
    }

    /// True if `id` is a member of this set.
    pub fn contains(&self, id: &RelayId) -> bool {
        self.members.contains(id)
    }

    /// Iterate over the set's members.
    pub fn iter(&self) -> impl Iterator<Item = &RelayId> {
        self.members.iter()
    }
}

/// A configuration-level set of relays specified by identity, nickname,
/// or address — used for `EntryNodes`, `ExitNodes`, and exit-exclusion
/// lists.
#[derive(Clone, Debug, Default)]
pub struct RouterSet {
    /// Matches by identity digest.
    by_id: HashSet<RelayId>,
    /// Matches by case-insensitive nickname.
    by_nickname: Vec<String>,
    /// Matches by exact IPv4 address (ignoring port).
    by_addr: HashSet<IpAddr>,
}

impl RouterSet {
    /// An empty router set, matching nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if this set has no members at all.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_nickname.is_empty() && self.by_addr.is_empty()
    }

    /// Add a relay identity to this set.
    pub fn add_id(&mut self, id: RelayId) {
        self.by_id.insert(id);
    }

    /// Add a nickname to this set.
    pub fn add_nickname(&mut self, nickname: impl Into<String>) {
        self.by_nickname.push(nickname.into());
    }

    /// Add an address to this set.
    pub fn add_addr(&mut self, addr: IpAddr) {
        self.by_addr.insert(addr);
    }

    /// True if `id`/`nickname`/`addrs` match any member of this set.
    pub fn matches(&self, id: &RelayId, nickname: Option<&str>, addrs: &[IpAddr]) -> bool {
        if self.by_id.contains(id) {
            return true;
        }
        if let Some(nick) = nickname {
            if self
                .by_nickname
                .iter()
                .any(|n| crate::ids::nicknames_eq(n, nick))
            {
                return true;
            }
        }
        addrs.iter().any(|a| self.by_addr.contains(a))
    }
}

/// Whether this process is acting as a directory authority.
///
/// Authorities compute their own opinion of relay flags instead of
/// trusting the consensus (which they themselves generate by voting);
/// ordinary clients and relays always take consensus flags as
/// authoritative. See [`crate::reconciler::Reconciler::install_consensus`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum OperatingMode {
    /// An ordinary client or relay: trust consensus-supplied flags.
    #[default]
    Client,
    /// A directory authority: flags are computed locally, not copied
    /// from the consensus.
    Authority,
}

/// Configuration consulted by the [`crate::reconciler::Reconciler`], the
/// [`crate::family`] resolver, the [`crate::selectors`] helpers, and the
/// [`crate::readiness`] evaluator.
#[derive(Clone, Debug, Default)]
pub struct ReconcilerConfig {
    /// Whether this process is a directory authority.
    pub mode: OperatingMode,
    /// Subnet-family policy.
    pub subnet_config: SubnetConfig,
    /// Operator-configured family sets.
    pub family_sets: Vec<FamilySet>,
    /// If set, restrict guard selection (and the readiness
    /// computation's guard fraction) to this set.
    pub entry_nodes: Option<RouterSet>,
    /// If set, restrict exit selection (and the readiness computation's
    /// exit fraction) to this set.
    pub exit_nodes: Option<RouterSet>,
    /// Relays that should never be used as an exit enclave, regardless
    /// of their policy.
    pub exit_exclude_nodes: RouterSet,
    /// The firewall-preference policy consulted when recomputing
    /// `ipv6_preferred` during consensus installation: prefer IPv6 OR
    /// addresses when both families are reachable.
    pub prefer_ipv6: bool,
    /// Override for the minimum-paths-for-circuits percentage threshold.
    /// Falls back to the network-supplied `min_paths_for_circs_pct`
    /// parameter (default 60, clamped to `[25, 95]`) when unset.
    pub min_paths_for_circs_pct_override: Option<u8>,
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn subnet_defaults_match_v4_16_v6_32() {
        let c = SubnetConfig::default();
        assert!(c.addrs_in_same_subnet(
            &"10.0.0.1".parse().unwrap(),
            &"10.0.200.200".parse().unwrap()
        ));
        assert!(!c.addrs_in_same_subnet(
            &"10.0.0.1".parse().unwrap(),
            &"10.1.0.1".parse().unwrap()
        ));
    }

    #[test]
    fn subnet_disabled_never_matches() {
        let c = SubnetConfig::new(false, 16, 32);
        assert!(!c.addrs_in_same_subnet(
            &"10.0.0.1".parse().unwrap(),
            &"10.0.0.2".parse().unwrap()
        ));
    }

    #[test]
    fn subnet_zero_bits_means_all_v4_nodes_are_one_family() {
        let c = SubnetConfig::new(true, 0, 0);
        assert!(c.addrs_in_same_subnet(
            &"1.2.3.4".parse().unwrap(),
            &"255.255.255.255".parse().unwrap()
        ));
        assert!(c.addrs_in_same_subnet(
            &"::1".parse().unwrap(),
            &"fe80::1".parse().unwrap()
        ));
    }

    #[test]
    fn router_set_matches_by_each_field() {
        let mut rs = RouterSet::empty();
        assert!(rs.is_empty());
        let id = RelayId::from([7; 20]);
        rs.add_id(id);
        rs.add_nickname("Relay");
        rs.add_addr("1.2.3.4".parse().unwrap());
        assert!(!rs.is_empty());

        assert!(rs.matches(&id, None, &[]));
        assert!(rs.matches(
            &RelayId::from([0; 20]),
            Some("relay"),
            &[]
        ));
        assert!(rs.matches(
            &RelayId::from([0; 20]),
            None,
            &["1.2.3.4".parse().unwrap()]
        ));
        assert!(!rs.matches(&RelayId::from([0; 20]), Some("other"), &[]));
    }
}
