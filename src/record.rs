//! The merged per-relay record and the shared microdescriptor handle it
//! may hold a reference to.

use std::cell::Cell;
use std::rc::Rc;

use crate::doc::{ConsensusEntry, Microdescriptor, RelayDescriptor, RelayFlags, RelayPurpose};
use crate::geoip::{CountryId, COUNTRY_UNKNOWN};
use crate::ids::RelayId;

/// A microdescriptor together with the refcount of records currently
/// holding it.
///
/// Microdescriptors are owned by an external cache; this crate only
/// holds a shared, reference-counted handle (`Rc`, not `Arc` — the
/// whole registry runs under the single-threaded cooperative model
/// described in the crate's concurrency notes) and contributes exactly
/// one count to `held_by_nodes` for as long as some record's
/// `microdesc` field points at it.
#[derive(Debug)]
pub struct MicrodescHandle {
    /// The microdescriptor's contents.
    pub data: Microdescriptor,
    held_by_nodes: Cell<usize>,
}

impl MicrodescHandle {
    /// Wrap a microdescriptor in a fresh handle with a zero refcount.
    pub fn new(data: Microdescriptor) -> Rc<Self> {
        Rc::new(MicrodescHandle {
            data,
            held_by_nodes: Cell::new(0),
        })
    }

    /// How many records currently hold this microdescriptor.
    pub fn held_by_nodes(&self) -> usize {
        self.held_by_nodes.get()
    }

    pub(crate) fn incref(&self) {
        self.held_by_nodes.set(
            self.held_by_nodes
                .get()
                .checked_add(1)
                .expect("microdesc refcount overflow"),
        );
    }

    pub(crate) fn decref(&self) {
        let count = self.held_by_nodes.get();
        assert!(count > 0, "microdesc refcount underflow");
        self.held_by_nodes.set(count - 1);
    }
}

/// A shared, refcounted reference to a cached microdescriptor.
pub type SharedMicrodesc = Rc<MicrodescHandle>;

/// Where entry-guard suitability and the "have consensus path" question
/// should read the Exit/Guard flags from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlagSource {
    /// Copy flags from the consensus (ordinary client/relay behavior).
    Consensus,
    /// Compute flags locally (directory authority behavior; not
    /// implemented by this crate — see its purpose and scope notes).
    Authority,
}

/// A single relay's merged view across descriptor, consensus entry, and
/// microdescriptor.
///
/// Mutation is restricted to the [`crate::reconciler::Reconciler`] and
/// the [`crate::store::Store`], except for the one-shot
/// `name_lookup_warned` latch and the cached `country`, both of which
/// accessors are permitted to set even through a shared reference (see
/// the data model's lifecycle notes).
#[derive(Debug)]
pub struct RelayRecord {
    identity: RelayId,
    descriptor: Option<RelayDescriptor>,
    consensus_entry: Option<ConsensusEntry>,
    microdesc: Option<SharedMicrodesc>,

    flags: RelayFlags,
    rejects_all: bool,
    ipv6_preferred: bool,

    country: Cell<CountryId>,
    last_reachable: u64,
    last_reachable6: u64,
    name_lookup_warned: Cell<bool>,

    /// Position in the store's ordered sequence; `-1` when detached.
    sequence_index: isize,
}

impl RelayRecord {
    /// Construct a brand-new, sourceless record for `identity`, as
    /// `get_or_create` does on first reference.
    pub(crate) fn new(identity: RelayId) -> Self {
        RelayRecord {
            identity,
            descriptor: None,
            consensus_entry: None,
            microdesc: None,
            flags: RelayFlags::empty(),
            rejects_all: false,
            ipv6_preferred: false,
            country: Cell::new(COUNTRY_UNKNOWN),
            last_reachable: 0,
            last_reachable6: 0,
            name_lookup_warned: Cell::new(false),
            sequence_index: -1,
        }
    }

    /// The record's primary key.
    pub fn identity(&self) -> RelayId {
        self.identity
    }

    /// The record's full descriptor, if attached.
    pub fn descriptor(&self) -> Option<&RelayDescriptor> {
        self.descriptor.as_ref()
    }

    /// The record's current consensus entry, if any.
    pub fn consensus_entry(&self) -> Option<&ConsensusEntry> {
        self.consensus_entry.as_ref()
    }

    /// The record's attached microdescriptor, if any.
    pub fn microdesc(&self) -> Option<&SharedMicrodesc> {
        self.microdesc.as_ref()
    }

    /// The descriptor's purpose, or the default (general-purpose) if no
    /// descriptor is attached.
    pub fn purpose(&self) -> RelayPurpose {
        self.descriptor
            .as_ref()
            .map(|d| d.purpose)
            .unwrap_or_default()
    }

    /// I2: at least one of `descriptor`, `consensus_entry` is present.
    pub fn is_usable(&self) -> bool {
        self.descriptor.is_some() || self.consensus_entry.is_some()
    }

    /// I3: `microdesc` is present only if `consensus_entry` is too.
    pub fn satisfies_i3(&self) -> bool {
        self.microdesc.is_none() || self.consensus_entry.is_some()
    }

    /// The flags copied from (or, under authority mode, computed for)
    /// the record's consensus entry.
    pub fn flags(&self) -> RelayFlags {
        self.flags
    }

    pub(crate) fn set_flags(&mut self, flags: RelayFlags) {
        self.flags = flags;
    }

    pub(crate) fn clear_flags(&mut self) {
        self.flags = RelayFlags::empty();
    }

    /// Whether an authority-computed judgment marks this relay's exit
    /// policy as rejecting everything. See the accessor "exit policy
    /// rejects all", which also consults the descriptor/microdesc
    /// policies directly.
    pub fn rejects_all_flag(&self) -> bool {
        self.rejects_all
    }

    pub(crate) fn set_rejects_all_flag(&mut self, value: bool) {
        self.rejects_all = value;
    }

    /// Whether this record's preferred OR address family is IPv6.
    pub fn ipv6_preferred(&self) -> bool {
        self.ipv6_preferred
    }

    pub(crate) fn set_ipv6_preferred(&mut self, value: bool) {
        self.ipv6_preferred = value;
    }

    /// The cached GeoIP country, or [`COUNTRY_UNKNOWN`].
    pub fn country(&self) -> CountryId {
        self.country.get()
    }

    /// Cache a GeoIP lookup result. Permitted through a shared
    /// reference: this is observer-cached state, not relay state.
    pub fn set_country_cache(&self, country: CountryId) {
        self.country.set(country);
    }

    pub(crate) fn reset_country(&self) {
        self.country.set(COUNTRY_UNKNOWN);
    }

    /// Last successful IPv4 reachability probe, in seconds since the
    /// epoch, or 0 if never / reset by an address change.
    pub fn last_reachable(&self) -> u64 {
        self.last_reachable
    }

    /// Last successful IPv6 reachability probe.
    pub fn last_reachable6(&self) -> u64 {
        self.last_reachable6
    }

    pub(crate) fn reset_reachability(&mut self) {
        self.last_reachable = 0;
        self.last_reachable6 = 0;
    }

    /// Whether a "couldn't look up nickname" warning has already been
    /// emitted for this record (one-shot latch).
    pub fn name_lookup_warned(&self) -> bool {
        self.name_lookup_warned.get()
    }

    /// Set the one-shot warning latch. Permitted through a shared
    /// reference for the same reason as [`Self::set_country_cache`].
    pub fn set_name_lookup_warned(&self) {
        self.name_lookup_warned.set(true);
    }

    /// This record's position in the store's ordered sequence, or `-1`
    /// if currently detached from the store.
    pub fn sequence_index(&self) -> isize {
        self.sequence_index
    }

    pub(crate) fn set_sequence_index(&mut self, index: isize) {
        self.sequence_index = index;
    }

    pub(crate) fn set_descriptor(&mut self, descriptor: RelayDescriptor) -> Option<RelayDescriptor> {
        self.descriptor.replace(descriptor)
    }

    pub(crate) fn clear_descriptor(&mut self) -> Option<RelayDescriptor> {
        self.descriptor.take()
    }

    pub(crate) fn set_consensus_entry(&mut self, entry: ConsensusEntry) {
        self.consensus_entry = Some(entry);
    }

    pub(crate) fn clear_consensus_entry(&mut self) {
        self.consensus_entry = None;
    }

    pub(crate) fn set_microdesc(&mut self, md: SharedMicrodesc) {
        md.incref();
        self.microdesc = Some(md);
    }

    /// Clear the attached microdescriptor, if any, decrementing its
    /// refcount. Returns true if a microdescriptor was actually
    /// cleared.
    pub(crate) fn clear_microdesc(&mut self) -> bool {
        if let Some(md) = self.microdesc.take() {
            md.decref();
            true
        } else {
            false
        }
    }

    /// Clear the microdescriptor only if it is exactly `md` (by
    /// pointer identity), per `detach_microdesc`'s contract.
    pub(crate) fn clear_microdesc_if_same(&mut self, md: &SharedMicrodesc) -> bool {
        let matches = self
            .microdesc
            .as_ref()
            .is_some_and(|cur| Rc::ptr_eq(cur, md));
        if matches {
            self.clear_microdesc()
        } else {
            false
        }
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

    fn id(b: u8) -> RelayId {
        RelayId::from([b; 20])
    }

    #[test]
    fn new_record_is_unusable_and_detached() {
        let r = RelayRecord::new(id(1));
        assert!(!r.is_usable());
        assert!(r.satisfies_i3());
        assert_eq!(r.sequence_index(), -1);
        assert_eq!(r.country(), COUNTRY_UNKNOWN);
    }

    #[test]
    fn microdesc_refcount_tracks_attach_detach() {
        let md = MicrodescHandle::new(Microdescriptor {
            digest: [9; 32],
            ed25519_id: None,
            onion_key: None,
            or_addr_v6: None,
            exit_policy: None,
            declared_family: Vec::new(),
        });
        assert_eq!(md.held_by_nodes(), 0);

        let mut r = RelayRecord::new(id(2));
        r.set_microdesc(md.clone());
        assert_eq!(md.held_by_nodes(), 1);

        assert!(r.clear_microdesc_if_same(&md));
        assert_eq!(md.held_by_nodes(), 0);
        assert!(!r.clear_microdesc_if_same(&md)); // already cleared
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn decref_without_incref_panics() {
        let md = MicrodescHandle::new(Microdescriptor {
            digest: [0; 32],
            ed25519_id: None,
            onion_key: None,
            or_addr_v6: None,
            exit_policy: None,
            declared_family: Vec::new(),
        });
        md.decref();
    }
}
