//! Pure, read-only queries over a [`RelayRecord`].
//!
//! Every accessor here follows the same source-preference rule: prefer
//! the descriptor over the consensus entry, which is preferred over the
//! microdescriptor, unless documented otherwise. None of these ever
//! fail outright; absent information is always a `None`/`false`, never
//! an error (see the crate's error-handling design).

use std::net::SocketAddr;

use tor_llcrypto::pk::ed25519::Ed25519Identity;

use crate::ids::{self, RelayId};
use crate::record::RelayRecord;

/// Which address family an exit-policy exactness question is being
/// asked about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddrFamily {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

fn is_valid_nonzero(addr: &SocketAddr) -> bool {
    addr.port() != 0 && !addr.ip().is_unspecified()
}

/// The record's nickname: the consensus entry's if present, else the
/// descriptor's, else absent.
pub fn nickname(record: &RelayRecord) -> Option<&str> {
    record
        .consensus_entry()
        .map(|e| e.nickname.as_str())
        .or_else(|| record.descriptor().map(|d| d.nickname.as_str()))
}

/// The record's Ed25519 identity key: the descriptor's signing-cert key
/// if non-zero, else the microdescriptor's, else absent.
pub fn ed25519_identity(record: &RelayRecord) -> Option<Ed25519Identity> {
    if let Some(id) = record.descriptor().and_then(|d| d.ed25519_id) {
        if id.as_bytes().iter().any(|&b| b != 0) {
            return Some(id);
        }
    }
    record.microdesc().and_then(|md| md.data.ed25519_id)
}

/// The record's RSA identity digest: just its primary key.
pub fn rsa_identity(record: &RelayRecord) -> RelayId {
    record.identity()
}

/// The record's primary IPv4 OR address and port: descriptor first,
/// then consensus entry. `None` if neither yields a valid, non-zero
/// address.
pub fn primary_ipv4(record: &RelayRecord) -> Option<SocketAddr> {
    record
        .descriptor()
        .and_then(|d| d.or_addr_v4)
        .or_else(|| record.consensus_entry().and_then(|e| e.or_addr_v4))
        .filter(is_valid_nonzero)
}

/// The record's preferred IPv6 OR address and port: descriptor, then
/// consensus entry, then microdescriptor.
pub fn preferred_ipv6(record: &RelayRecord) -> Option<SocketAddr> {
    record
        .descriptor()
        .and_then(|d| d.or_addr_v6)
        .or_else(|| record.consensus_entry().and_then(|e| e.or_addr_v6))
        .or_else(|| record.microdesc().and_then(|md| md.data.or_addr_v6))
        .filter(is_valid_nonzero)
}

/// The record's preferred OR address and port overall: IPv6 if
/// `ipv6_preferred` and usable, else IPv4.
pub fn preferred_or_address(record: &RelayRecord) -> Option<SocketAddr> {
    if record.ipv6_preferred() {
        if let Some(v6) = preferred_ipv6(record) {
            return Some(v6);
        }
    }
    primary_ipv4(record)
}

/// Every OR address the record can be reached at: one IPv4 (if valid)
/// and one IPv6 (if valid), with the same per-family preference order
/// as [`primary_ipv4`] and [`preferred_ipv6`].
pub fn all_or_addresses(record: &RelayRecord) -> Vec<SocketAddr> {
    primary_ipv4(record)
        .into_iter()
        .chain(preferred_ipv6(record))
        .collect()
}

/// True if the record's exit policy rejects every address and port.
pub fn exit_policy_rejects_all(record: &RelayRecord) -> bool {
    if record.rejects_all_flag() {
        return true;
    }
    if let Some(d) = record.descriptor() {
        if d.policy_is_reject_star {
            return true;
        }
        return false;
    }
    if let Some(md) = record.microdesc() {
        return match &md.data.exit_policy {
            Some(p) => p.is_reject_star(),
            None => true,
        };
    }
    // No policy source at all.
    true
}

/// Whether an exit-policy judgment for `family` can be made *exactly*
/// from this record's currently attached sources.
///
/// Unspecified family is always exact (the caller isn't asking about
/// addresses at all, just ports); IPv4 is exact iff a full descriptor
/// is attached; IPv6 is never exact, since microdescriptor policies
/// carry no address information.
pub fn exit_policy_exactness(record: &RelayRecord, family: Option<AddrFamily>) -> bool {
    match family {
        None => true,
        Some(AddrFamily::V4) => record.descriptor().is_some(),
        Some(AddrFamily::V6) => false,
    }
}

/// Whether this relay's nickname is bound to its identity by the
/// consensus ("Named").
pub fn is_named(record: &RelayRecord) -> bool {
    match (nickname(record), record.consensus_entry()) {
        (Some(nick), Some(entry)) => entry.is_named && ids::nicknames_eq(&entry.nickname, nick),
        _ => false,
    }
}

/// The record's verbose nickname: `$HEX`, `$HEX=NICK` if named, or
/// `$HEX~NICK` if not.
pub fn verbose_nickname(record: &RelayRecord) -> String {
    ids::format_verbose_nickname(&record.identity(), nickname(record), is_named(record))
}

/// True if the microdescriptor carries a Curve25519 onion key.
///
/// Supplemental accessor mirroring `node_has_curve25519_onion_key` from
/// the original C implementation.
pub fn has_curve25519_onion_key(record: &RelayRecord) -> bool {
    record
        .microdesc()
        .is_some_and(|md| md.data.onion_key.is_some())
}

/// True if the record's consensus entry asserts Ed25519 link-handshake
/// support.
///
/// Supplemental accessor mirroring
/// `node_supports_ed25519_link_authentication`.
pub fn supports_ed25519_link_authentication(record: &RelayRecord) -> bool {
    record
        .consensus_entry()
        .is_some_and(|e| e.supports_ed25519_link_handshake)
}

/// The relay's self-reported platform string, if its descriptor is
/// attached.
///
/// Supplemental accessor mirroring `node_get_platform`.
pub fn platform(record: &RelayRecord) -> Option<&str> {
    record.descriptor().and_then(|d| d.platform.as_deref())
}

/// The relay's self-reported uptime in seconds, if its descriptor is
/// attached.
///
/// Supplemental accessor mirroring `node_get_declared_uptime`.
pub fn declared_uptime(record: &RelayRecord) -> Option<u64> {
    record.descriptor().and_then(|d| d.uptime)
}

/// A human-readable rendering of the record's preferred OR address, or
/// a placeholder if it has none.
///
/// Supplemental accessor mirroring `node_get_address_string`.
pub fn address_string(record: &RelayRecord) -> String {
    match preferred_or_address(record) {
        Some(addr) => addr.to_string(),
        None => "<unknown address>".to_string(),
    }
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
    use crate::doc::{ConsensusEntry, DescriptorDigest, RelayDescriptor, RelayFlags, RelayPurpose};
    use crate::policy::ExitPolicy;

    fn id(b: u8) -> RelayId {
        RelayId::from([b; 20])
    }

    fn descriptor(identity: RelayId, nickname: &str) -> RelayDescriptor {
        RelayDescriptor {
            identity_digest: identity,
            nickname: nickname.to_string(),
            platform: Some("tor 0.4.8 on Linux".to_string()),
            uptime: Some(12345),
            or_addr_v4: Some("10.0.0.1:9001".parse().unwrap()),
            dir_addr_v4: None,
            or_addr_v6: None,
            declared_family: Vec::new(),
            exit_policy: ExitPolicy::new_reject_all(),
            policy_is_reject_star: true,
            allow_single_hop_exits: false,
            ed25519_id: None,
            supports_tunnelled_dir_requests: true,
            protocols: Default::default(),
            purpose: RelayPurpose::General,
        }
    }

    fn consensus_entry(identity: RelayId, nickname: &str, named: bool) -> ConsensusEntry {
        ConsensusEntry {
            identity_digest: identity,
            nickname: nickname.to_string(),
            descriptor_digest: DescriptorDigest::Full([0; 20]),
            or_addr_v4: Some("10.0.0.1:9001".parse().unwrap()),
            dir_addr_v4: None,
            or_addr_v6: None,
            flags: RelayFlags::RUNNING,
            supports_ed25519_link_handshake: false,
            is_named: named,
            bandwidth_weight: 1000,
            bandwidth_measured: true,
        }
    }

    #[test]
    fn nickname_prefers_consensus_entry() {
        let mut r = crate::record::RelayRecord::new(id(1));
        r.set_descriptor(descriptor(id(1), "descname"));
        assert_eq!(nickname(&r), Some("descname"));
        r.set_consensus_entry(consensus_entry(id(1), "consname", false));
        assert_eq!(nickname(&r), Some("consname"));
    }

    #[test]
    fn primary_ipv4_rejects_zero_port() {
        let mut r = crate::record::RelayRecord::new(id(2));
        let mut d = descriptor(id(2), "x");
        d.or_addr_v4 = Some("10.0.0.1:0".parse().unwrap());
        r.set_descriptor(d);
        assert_eq!(primary_ipv4(&r), None);
    }

    #[test]
    fn is_named_requires_matching_entry_and_flag() {
        let mut r = crate::record::RelayRecord::new(id(3));
        r.set_consensus_entry(consensus_entry(id(3), "alice", true));
        assert!(is_named(&r));

        let mut r2 = crate::record::RelayRecord::new(id(4));
        r2.set_consensus_entry(consensus_entry(id(4), "bob", false));
        assert!(!is_named(&r2));
    }

    #[test]
    fn verbose_nickname_uses_named_joiner() {
        let mut r = crate::record::RelayRecord::new(id(5));
        r.set_consensus_entry(consensus_entry(id(5), "carol", true));
        let v = verbose_nickname(&r);
        assert!(v.contains("=carol"));
    }

    #[test]
    fn exit_policy_rejects_all_with_no_sources() {
        let r = crate::record::RelayRecord::new(id(6));
        assert!(exit_policy_rejects_all(&r));
    }
}
