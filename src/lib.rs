#![doc = include_str!("../README.md")]
// @@ begin lint list maintained by maint/add_warning @@
#![cfg_attr(not(ci_arti_stable), allow(renamed_and_removed_lints))]
#![cfg_attr(not(ci_arti_nightly), allow(unknown_lints))]
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_in_scrutinee)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

mod accessors;
mod config;
mod doc;
mod err;
mod family;
mod geoip;
mod ids;
mod mdcache;
mod policy;
mod readiness;
mod reconciler;
mod record;
mod selectors;
mod store;
mod weight;

use std::net::Ipv4Addr;
use std::time::SystemTime;

use tracing::debug;

pub use accessors::{
    address_string, all_or_addresses, declared_uptime, ed25519_identity, exit_policy_exactness,
    exit_policy_rejects_all, has_curve25519_onion_key, is_named, nickname, platform,
    preferred_ipv6, preferred_or_address, primary_ipv4, rsa_identity,
    supports_ed25519_link_authentication, verbose_nickname, AddrFamily,
};
pub use config::{FamilySet, OperatingMode, ReconcilerConfig, RouterSet, SubnetConfig};
pub use doc::{
    ConsensusDocument, ConsensusEntry, DescriptorDigest, Flavor, Microdescriptor, RelayDescriptor,
    RelayFlags, RelayPurpose,
};
pub use err::{Error, Result};
pub use geoip::{CountryId, GeoipResolver, NullGeoipResolver, COUNTRY_UNKNOWN};
pub use ids::{format_verbose_nickname, nicknames_eq, parse_hex_id, NicknameAssertion, ParsedHexId, RelayId};
pub use mdcache::{EmptyMicrodescCache, MicrodescCache};
pub use policy::{CompactPolicy, ExitPolicy, PolicyResult};
pub use readiness::{ConsensusPathState, ReadinessEvaluator, ReadinessEvent};
pub use record::{RelayRecord, SharedMicrodesc};
pub use selectors::UsableFilter;

use reconciler::Reconciler;
use store::Store;

/// The merged relay directory core.
///
/// Owns the [`Store`] of per-relay records, the currently installed
/// consensus (if any), and the collaborators the [`Reconciler`] needs
/// to mutate them; exposes the registry's full public surface —
/// attach/detach operations, read-only accessors, family resolution,
/// path-selection queries, and directory-readiness evaluation — as a
/// single handle.
///
/// Not `Sync`: this crate follows the single-threaded cooperative
/// concurrency model described in its design notes, so `RelayRegistry`
/// is meant to live behind whatever single-task ownership the embedding
/// application already uses (e.g. a `RefCell` or a task-local), not
/// behind a lock.
pub struct RelayRegistry {
    store: Store,
    consensus: Option<ConsensusDocument>,
    geoip: Box<dyn GeoipResolver>,
    mdcache: Box<dyn MicrodescCache>,
    config: ReconcilerConfig,
    readiness: ReadinessEvaluator,
}

impl RelayRegistry {
    /// Construct an empty registry with no consensus installed yet.
    pub fn new(
        geoip: Box<dyn GeoipResolver>,
        mdcache: Box<dyn MicrodescCache>,
        config: ReconcilerConfig,
    ) -> Self {
        RelayRegistry {
            store: Store::new(),
            consensus: None,
            geoip,
            mdcache,
            config,
            readiness: ReadinessEvaluator::new(),
        }
    }

    /// Construct an empty registry with no GeoIP database and no
    /// microdescriptor cache loaded yet, using client-default
    /// configuration.
    pub fn new_client_default() -> Self {
        RelayRegistry::new(
            Box::new(NullGeoipResolver),
            Box::new(EmptyMicrodescCache),
            ReconcilerConfig::default(),
        )
    }

    /// Replace the registry's configuration.
    pub fn set_config(&mut self, config: ReconcilerConfig) {
        self.config = config;
        self.readiness.mark_dirty();
    }

    /// The registry's current configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// How many records the registry currently holds.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True if the registry holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The currently installed consensus, if any.
    pub fn consensus(&self) -> Option<&ConsensusDocument> {
        self.consensus.as_ref()
    }

    /// Look up a relay's merged record by identity digest.
    pub fn get_by_id(&self, id: &RelayId) -> Option<&RelayRecord> {
        self.store.get_by_id(id)
    }

    /// Look up a relay's merged record by nickname, case-insensitively.
    /// Returns the first matching record in sequence order if more than
    /// one relay currently claims the nickname.
    pub fn get_by_nickname(&self, nickname: &str) -> Option<&RelayRecord> {
        self.store.get_by_nickname(nickname)
    }

    /// Look up a relay's merged record by verbose identifier (see
    /// [`parse_hex_id`]'s grammar), verifying whatever assertion the
    /// identifier's nickname suffix carries.
    ///
    /// `$HEX` alone always resolves by digest with no further check.
    /// `$HEX=NICK` additionally requires the record be `Named` with
    /// exactly that nickname; `$HEX~NICK` requires only that the
    /// record's current nickname matches, case-insensitively, with no
    /// claim about Named status. Either assertion failing is treated as
    /// absence of information, not an error: this returns `None`, the
    /// same as a bare digest that isn't in the registry at all.
    pub fn get_by_hex_id(&self, s: &str) -> Option<&RelayRecord> {
        let parsed = parse_hex_id(s)?;
        let record = self.store.get_by_id(&parsed.id)?;

        match parsed.assertion {
            NicknameAssertion::None => Some(record),
            NicknameAssertion::Named => {
                let nick = parsed.nickname.as_deref()?;
                if is_named(record) && nickname(record).is_some_and(|n| nicknames_eq(n, nick)) {
                    Some(record)
                } else {
                    None
                }
            }
            NicknameAssertion::Unverified => {
                let nick = parsed.nickname.as_deref()?;
                if nickname(record).is_some_and(|n| nicknames_eq(n, nick)) {
                    Some(record)
                } else {
                    None
                }
            }
        }
    }

    /// Borrow-only iteration over every record the registry holds.
    pub fn iterate(&self) -> impl Iterator<Item = &RelayRecord> {
        self.store.iterate()
    }

    fn reconciler(&mut self) -> Reconciler<'_> {
        Reconciler::new(
            &mut self.store,
            &mut self.consensus,
            self.geoip.as_ref(),
            self.mdcache.as_ref(),
            &self.config,
        )
    }

    /// Attach a freshly parsed relay descriptor, returning whatever
    /// descriptor it replaced (if any).
    pub fn attach_descriptor(&mut self, descriptor: RelayDescriptor) -> Option<RelayDescriptor> {
        let (_, previous) = self.reconciler().attach_descriptor(descriptor);
        self.readiness.mark_dirty();
        previous
    }

    /// Detach a relay descriptor, dropping its record entirely if that
    /// leaves it non-usable.
    pub fn detach_descriptor(&mut self, descriptor: &RelayDescriptor) {
        self.reconciler().detach_descriptor(descriptor);
        self.readiness.mark_dirty();
    }

    /// Attach a freshly parsed microdescriptor, if the current
    /// microdesc-flavored consensus references it.
    pub fn attach_microdesc(&mut self, md: Microdescriptor) {
        self.reconciler().attach_microdesc(md);
        self.readiness.mark_dirty();
    }

    /// Detach a microdescriptor from `id`'s record, if it's still the
    /// exact one pointed to by `md`.
    pub fn detach_microdesc(&mut self, id: RelayId, md: &SharedMicrodesc) {
        self.reconciler().detach_microdesc(id, md);
        self.readiness.mark_dirty();
    }

    /// Install a freshly fetched consensus document, reconciling it
    /// against every currently held descriptor and microdescriptor.
    pub fn install_consensus(&mut self, consensus: ConsensusDocument) {
        self.reconciler().install_consensus(consensus);
        self.readiness.mark_dirty();
        debug!("consensus installed; readiness marked stale");
    }

    /// Run the full registry consistency audit (I1-I6), panicking on
    /// the first violation found. Intended for debug and test use.
    pub fn audit(&self) {
        reconciler::audit_store(&self.store);
    }

    /// Release every record the registry holds, detaching all
    /// microdescriptors first so their refcounts return to zero before
    /// the backing storage itself is dropped.
    pub fn free_all(&mut self) {
        for record in self.store.iterate_mut() {
            record.clear_microdesc();
            record.set_sequence_index(-1);
        }
        self.store = Store::new();
        self.consensus = None;
        self.readiness.mark_dirty();
    }

    /// Recompute directory readiness if it's been marked stale since
    /// the last call, then return whatever transition (if any)
    /// occurred.
    ///
    /// `fetch_delay_reason` and `entry_guard_info_sufficient` surface
    /// the two external collaborators this crate doesn't itself
    /// implement: the Directory Client's fetch scheduler and the
    /// entry-guard subsystem's own readiness opinion.
    pub fn refresh_readiness(
        &mut self,
        now: SystemTime,
        fetch_delay_reason: Option<&str>,
        entry_guard_info_sufficient: bool,
    ) -> Option<ReadinessEvent> {
        self.readiness.refresh(
            &self.store,
            self.consensus.as_ref(),
            &self.config,
            now,
            fetch_delay_reason,
            entry_guard_info_sufficient,
        )
    }

    /// Whether the registry believes it currently has enough directory
    /// information to build circuits, as of the last
    /// [`Self::refresh_readiness`] call.
    pub fn have_min_dir_info(&self) -> bool {
        self.readiness.have_min_dir_info()
    }

    /// A human-readable explanation of the current readiness state
    /// (empty when ready).
    pub fn readiness_status(&self) -> &str {
        self.readiness.status()
    }

    /// `Ok(())` if the registry has enough directory information to
    /// build circuits, as of the last [`Self::refresh_readiness`] call;
    /// otherwise an [`Error`] describing why not.
    pub fn require_min_dir_info(&self) -> Result<()> {
        if self.consensus.is_none() {
            return Err(Error::NoConsensus);
        }
        if !self.readiness.have_min_dir_info() {
            return Err(Error::NotEnoughInfo(self.readiness.status().to_string()));
        }
        Ok(())
    }

    /// Whether the consensus currently supports Exit circuits or only
    /// Internal ones, as of the last [`Self::refresh_readiness`] call.
    pub fn consensus_path(&self) -> ConsensusPathState {
        self.readiness.have_consensus_path()
    }

    /// Find the first running relay whose primary IPv4 address exactly
    /// equals `addr`, whose exit policy accepts `addr:port`, and that
    /// isn't in the configured exit-exclusion set.
    pub fn find_exact_exit_enclave(&self, addr: Ipv4Addr, port: u16) -> Option<&RelayRecord> {
        selectors::find_exact_exit_enclave(&self.store, &self.config, addr, port)
    }

    /// True iff every running (and, if `need_uptime`, Stable) relay's
    /// exit policy rejects `addr:port`.
    pub fn all_reject(&self, addr: std::net::IpAddr, port: u16, need_uptime: bool) -> bool {
        selectors::all_reject(&self.store, addr, port, need_uptime)
    }

    /// Count how many consensus entries this process would use, and
    /// how many of those have their descriptor or microdescriptor
    /// available locally, under `filter`.
    pub fn count_usable(&self, filter: &UsableFilter<'_>) -> (usize, usize, Vec<&RelayRecord>) {
        let Some(consensus) = &self.consensus else {
            return (0, 0, Vec::new());
        };
        selectors::count_usable(&self.store, consensus, filter)
    }

    /// True if `a` and `b` are in the same family under any of the
    /// subnet, mutual-declaration, or configured-set rules.
    pub fn in_same_family(&self, a: &RelayRecord, b: &RelayRecord) -> bool {
        family::in_same_family(&self.config, a, b)
    }

    /// Expand `node` into the sequence of every record it shares a
    /// family with, by any rule. Duplicates are possible; see
    /// [`family::expand`]'s docs for why that's by design.
    pub fn expand_family(&self, node: &RelayRecord, out: &mut Vec<RelayId>) {
        family::expand(&self.store, &self.config, node, out)
    }
}

impl Default for RelayRegistry {
    fn default() -> Self {
        RelayRegistry::new_client_default()
    }
}
