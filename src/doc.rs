//! Input types handed to this crate by its collaborators.
//!
//! Everything in this module is produced by the Descriptor Parser (for
//! [`RelayDescriptor`] and [`Microdescriptor`]) or the Directory Client
//! (for [`ConsensusDocument`]), both out of scope here. This crate never
//! constructs these from raw bytes; it only consumes already-validated
//! values.

use std::net::SocketAddr;
use std::time::SystemTime;

use crate::ids::RelayId;
use crate::policy::{CompactPolicy, ExitPolicy};
use bitflags::bitflags;
use tor_llcrypto::pk::curve25519;
use tor_llcrypto::pk::ed25519::Ed25519Identity;
use tor_protover::Protocols;

bitflags! {
    /// Flags a consensus can set on a router-status entry.
    ///
    /// Mirrors the boolean flag set described for `consensus_entry` and
    /// `RelayRecord`: `Valid`, `Running`, `Fast`, `Stable`, `Guard`,
    /// `Exit`, `BadExit`, `HsDir`, plus `V2Dir`, which the core doesn't
    /// store on the record but does consult when computing weights.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RelayFlags: u16 {
        /// The authorities consider this relay valid.
        const VALID = 1 << 0;
        /// The authorities observed this relay running recently.
        const RUNNING = 1 << 1;
        /// The authorities consider this relay fast enough for general use.
        const FAST = 1 << 2;
        /// The authorities consider this relay stable enough for long-lived streams.
        const STABLE = 1 << 3;
        /// The authorities consider this relay suitable as a guard.
        const POSSIBLE_GUARD = 1 << 4;
        /// The authorities consider this relay suitable as an exit.
        const EXIT = 1 << 5;
        /// The authorities believe this relay's exit policy is unsafe to use.
        const BAD_EXIT = 1 << 6;
        /// The authorities consider this relay a hidden-service directory.
        const HS_DIR = 1 << 7;
        /// The relay supports the v2 directory protocol.
        const V2_DIR = 1 << 8;
    }
}

/// The flavor of a consensus document: which kind of per-relay digest its
/// entries carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flavor {
    /// Entries reference full relay descriptors by a 20-byte digest.
    Full,
    /// Entries reference microdescriptors by a 32-byte digest.
    Microdesc,
}

/// A validated relay descriptor, as produced by the Descriptor Parser.
#[derive(Clone, Debug)]
pub struct RelayDescriptor {
    /// The relay's identity digest.
    pub identity_digest: RelayId,
    /// The relay's self-chosen nickname.
    pub nickname: String,
    /// The relay's self-reported software string.
    pub platform: Option<String>,
    /// The relay's self-reported uptime, in seconds.
    pub uptime: Option<u64>,
    /// The relay's primary IPv4 OR address and port.
    pub or_addr_v4: Option<SocketAddr>,
    /// The relay's primary IPv4 directory port, if it has one.
    pub dir_addr_v4: Option<SocketAddr>,
    /// An additional IPv6 OR address and port, if any.
    pub or_addr_v6: Option<SocketAddr>,
    /// Nicknames this relay declares as being operated together with it.
    pub declared_family: Vec<String>,
    /// The relay's full exit policy.
    pub exit_policy: ExitPolicy,
    /// True if the relay's exit policy is exactly "reject *:*".
    pub policy_is_reject_star: bool,
    /// True if the relay allows single-hop exit traffic (a discouraged
    /// and dangerous configuration).
    pub allow_single_hop_exits: bool,
    /// The Ed25519 identity key taken from the relay's signing
    /// certificate, if the relay has Ed25519 keys at all.
    pub ed25519_id: Option<Ed25519Identity>,
    /// True if the relay advertises support for tunnelled (BEGIN_DIR)
    /// directory requests.
    pub supports_tunnelled_dir_requests: bool,
    /// The relay's advertised sub-protocol versions.
    pub protocols: Protocols,
    /// What this descriptor is for: ordinary relay use, a bridge, etc.
    pub purpose: RelayPurpose,
}

/// What a descriptor is for.
///
/// The core never filters on this itself; it is exposed so that callers
/// (e.g. a bridge-aware path builder) can.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[non_exhaustive]
pub enum RelayPurpose {
    /// An ordinary relay descriptor, usable for general circuits.
    #[default]
    General,
    /// A descriptor for a bridge relay.
    Bridge,
    /// A descriptor retained only for controller or testing use.
    Controller,
}

impl RelayDescriptor {
    /// The relay's OR addresses, as a set usable for subnet-family
    /// comparisons and change detection.
    pub fn or_addresses(&self) -> Vec<SocketAddr> {
        self.or_addr_v4.into_iter().chain(self.or_addr_v6).collect()
    }
}

/// A validated microdescriptor, as produced by the Descriptor Parser and
/// held by an external microdescriptor cache.
#[derive(Clone, Debug)]
pub struct Microdescriptor {
    /// The 32-byte digest identifying this microdescriptor.
    pub digest: [u8; 32],
    /// The relay's Ed25519 identity key, if known.
    pub ed25519_id: Option<Ed25519Identity>,
    /// The relay's Curve25519 onion key, if known.
    pub onion_key: Option<curve25519::PublicKey>,
    /// An IPv6 OR address and port, if the relay advertises one.
    pub or_addr_v6: Option<SocketAddr>,
    /// A compact summary of the relay's exit policy, if any.
    pub exit_policy: Option<CompactPolicy>,
    /// Nicknames this relay declares as being operated together with it,
    /// if the microdescriptor carries family information.
    pub declared_family: Vec<String>,
}

/// A single entry in a consensus document, describing one relay as the
/// directory authorities see it.
#[derive(Clone, Debug)]
pub struct ConsensusEntry {
    /// The relay's identity digest.
    pub identity_digest: RelayId,
    /// The relay's nickname, as voted by the authorities.
    pub nickname: String,
    /// The digest of the descriptor or microdescriptor this entry
    /// references; 20 bytes for [`Flavor::Full`], 32 for
    /// [`Flavor::Microdesc`] (only the first 32 bytes are meaningful in
    /// the full-flavor case, and only the first 20 in the microdesc
    /// case).
    pub descriptor_digest: DescriptorDigest,
    /// The relay's primary IPv4 OR address and port.
    pub or_addr_v4: Option<SocketAddr>,
    /// The relay's IPv4 directory port, if any.
    pub dir_addr_v4: Option<SocketAddr>,
    /// An additional IPv6 OR address and port, if any.
    pub or_addr_v6: Option<SocketAddr>,
    /// The flags the authorities assigned this relay.
    pub flags: RelayFlags,
    /// True if the relay's consensus entry asserts support for the
    /// Ed25519 link handshake.
    pub supports_ed25519_link_handshake: bool,
    /// True if this relay is bound to its nickname ("Named") by the
    /// consensus.
    pub is_named: bool,
    /// The relay's weighted bandwidth, as voted by the bandwidth
    /// authorities or self-reported, in consensus units.
    pub bandwidth_weight: u64,
    /// True if the above weight came from bandwidth-authority
    /// measurement rather than the relay's own claim.
    pub bandwidth_measured: bool,
}

/// A descriptor digest as carried by a consensus entry: either the
/// 20-byte digest of a full descriptor, or the 32-byte digest of a
/// microdescriptor, depending on the consensus [`Flavor`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorDigest {
    /// A 20-byte digest of a full relay descriptor.
    Full([u8; 20]),
    /// A 32-byte digest of a microdescriptor.
    Micro([u8; 32]),
}

/// A validated consensus document, as produced by the Directory Client.
#[derive(Clone, Debug)]
pub struct ConsensusDocument {
    /// Which kind of descriptor digest this consensus's entries carry.
    pub flavor: Flavor,
    /// The time after which this consensus is valid.
    pub valid_after: SystemTime,
    /// The time after which a client should try to fetch a fresher
    /// consensus.
    pub fresh_until: SystemTime,
    /// The time after which this consensus should no longer be used at
    /// all.
    pub valid_until: SystemTime,
    /// Integer-valued network parameters voted on by the authorities.
    pub params: Vec<(String, i32)>,
    /// The listed relays, in the order the consensus lists them.
    pub entries: Vec<ConsensusEntry>,
}

impl ConsensusDocument {
    /// Find the entry for a given identity, if listed.
    pub fn entry_by_id(&self, id: &RelayId) -> Option<&ConsensusEntry> {
        self.entries.iter().find(|e| &e.identity_digest == id)
    }

    /// Find the entry whose descriptor digest equals `digest`.
    pub fn entry_by_descriptor_digest(&self, digest: &DescriptorDigest) -> Option<&ConsensusEntry> {
        self.entries
            .iter()
            .find(|e| &e.descriptor_digest == digest)
    }

    /// True if `now` falls within this consensus's validity window,
    /// ignoring any clock-skew tolerance (that's the Directory Client's
    /// job; this is the "Strict" timeliness check).
    pub fn is_live_at(&self, now: SystemTime) -> bool {
        now >= self.valid_after && now <= self.valid_until
    }
}
