//! Registry-wide queries used by path selection.

use std::net::Ipv4Addr;

use crate::accessors::{self, AddrFamily};
use crate::config::{ReconcilerConfig, RouterSet};
use crate::doc::{ConsensusDocument, DescriptorDigest, Flavor, RelayFlags};
use crate::policy::PolicyResult;
use crate::record::RelayRecord;
use crate::store::Store;

/// Find the first running relay whose primary IPv4 address exactly
/// equals `addr`, whose exit policy accepts `addr:port`, and that isn't
/// in the configured exit-exclusion set.
pub fn find_exact_exit_enclave<'s>(
    store: &'s Store,
    config: &ReconcilerConfig,
    addr: Ipv4Addr,
    port: u16,
) -> Option<&'s RelayRecord> {
    store.iterate().find(|record| {
        if !record.flags().contains(RelayFlags::RUNNING) {
            return false;
        }
        let Some(primary) = accessors::primary_ipv4(record) else {
            return false;
        };
        if primary.ip() != std::net::IpAddr::V4(addr) {
            return false;
        }
        if exit_policy_accepts(record, std::net::IpAddr::V4(addr), port).is_rejected() {
            return false;
        }
        let nick = accessors::nickname(record);
        !config
            .exit_exclude_nodes
            .matches(&record.identity(), nick, &accessors::all_or_addresses(record).iter().map(|a| a.ip()).collect::<Vec<_>>())
    })
}

/// Evaluate a record's exit-policy judgment for `addr:port`, preferring
/// the descriptor's exact policy and falling back to the
/// microdescriptor's compact summary.
fn exit_policy_accepts(
    record: &RelayRecord,
    addr: std::net::IpAddr,
    port: u16,
) -> PolicyResult {
    if let Some(d) = record.descriptor() {
        return d.exit_policy.compare(addr, port);
    }
    if let Some(md) = record.microdesc() {
        if let Some(policy) = &md.data.exit_policy {
            return policy.compare_port(port);
        }
    }
    PolicyResult::Rejected
}

/// True iff every running, sufficiently-stable relay's policy judgment
/// for `addr:port` is a rejection (exact or probable).
///
/// `need_uptime` additionally restricts the scan to relays flagged
/// Stable, mirroring the "don't worry about flaky relays" filter in the
/// original `router_exit_policy_all_routers_reject`-style check.
pub fn all_reject(store: &Store, addr: std::net::IpAddr, port: u16, need_uptime: bool) -> bool {
    store.iterate().all(|record| {
        if !record.flags().contains(RelayFlags::RUNNING) {
            return true;
        }
        if need_uptime && !record.flags().contains(RelayFlags::STABLE) {
            return true;
        }
        exit_policy_accepts(record, addr, port).is_rejected()
    })
}

/// A restriction applied by [`count_usable`].
#[derive(Clone, Debug, Default)]
pub struct UsableFilter<'a> {
    /// Restrict to relays carrying the consensus Exit flag.
    pub exit_only: bool,
    /// Restrict to relays carrying this flag (a generalization of
    /// `exit_only`, used by the Readiness Evaluator to select the
    /// guard- and exit-flagged subsets for its weighted fractions).
    pub required_flag: Option<RelayFlags>,
    /// Restrict to relays in this router-set, if given.
    pub router_set: Option<&'a RouterSet>,
}

/// Whether a client would consider using a router with these consensus
/// flags at all: it must be flagged `Valid` and `Running`.
pub(crate) fn client_would_use_router(flags: RelayFlags) -> bool {
    flags.contains(RelayFlags::VALID) && flags.contains(RelayFlags::RUNNING)
}

/// Count how many of the current consensus's entries this process
/// would use (`num_usable`) and how many of those have their backing
/// descriptor or microdescriptor locally available (`num_present`),
/// under an optional filter.
pub fn count_usable<'s>(
    store: &'s Store,
    consensus: &ConsensusDocument,
    filter: &UsableFilter<'_>,
) -> (usize, usize, Vec<&'s RelayRecord>) {
    let mut num_usable = 0;
    let mut num_present = 0;
    let mut records = Vec::new();

    for entry in &consensus.entries {
        if filter.exit_only && !entry.flags.contains(RelayFlags::EXIT) {
            continue;
        }
        if let Some(flag) = filter.required_flag {
            if !entry.flags.contains(flag) {
                continue;
            }
        }
        if let Some(set) = filter.router_set {
            if !set.matches(&entry.identity_digest, Some(entry.nickname.as_str()), &[]) {
                continue;
            }
        }
        if !client_would_use_router(entry.flags) {
            continue;
        }
        num_usable += 1;

        if let Some(record) = store.get_by_id(&entry.identity_digest) {
            let present = match consensus.flavor {
                Flavor::Full => record.descriptor().is_some(),
                Flavor::Microdesc => record.microdesc().is_some(),
            };
            if present {
                num_present += 1;
            }
            records.push(record);
        }
    }

    (num_usable, num_present, records)
}

/// Count usable descriptors restricted to relays carrying the Exit
/// flag.
pub fn count_usable_exits<'s>(
    store: &'s Store,
    consensus: &ConsensusDocument,
) -> (usize, usize, Vec<&'s RelayRecord>) {
    count_usable(
        store,
        consensus,
        &UsableFilter {
            exit_only: true,
            ..Default::default()
        },
    )
}

/// True iff every family member could, from this relay's own exit
/// policy, exactly answer a query for `family`. Thin wrapper kept for
/// callers that phrase the question per-relay rather than per-record.
pub fn exit_policy_exactness(record: &RelayRecord, family: Option<AddrFamily>) -> bool {
    accessors::exit_policy_exactness(record, family)
}
