//! The Readiness Evaluator: "do we have enough directory information to
//! build circuits?"

use std::time::SystemTime;

use tracing::info;

use crate::accessors;
use crate::config::ReconcilerConfig;
use crate::doc::{ConsensusDocument, RelayFlags};
use crate::selectors::{self, UsableFilter};
use crate::store::Store;
use crate::weight::{self, WeightRole, WeightSet};

/// Whether the merged registry currently believes it can build a
/// three-hop circuit out to the public Internet, or only internal
/// (non-Exit) circuits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ConsensusPathState {
    /// Not yet evaluated.
    #[default]
    Unknown,
    /// The consensus lists at least one usable Exit relay.
    Exit,
    /// The consensus has no usable Exit relay; only internal circuits
    /// can be built.
    Internal,
}

/// A readiness state transition, analogous to the `ENOUGH_DIR_INFO` /
/// `NOT_ENOUGH_DIR_INFO` control-port events in the original.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadinessEvent {
    /// Went from not-ready to ready.
    EnoughDirInfo,
    /// Went from ready to not-ready; circuit building may now fail.
    NotEnoughDirInfo,
}

/// Tracks whether the registry has enough directory information to
/// build circuits, recomputed on demand by [`Self::refresh`].
#[derive(Debug, Default)]
pub struct ReadinessEvaluator {
    have_min_dir_info: bool,
    have_consensus_path: ConsensusPathState,
    needs_recompute: bool,
    status: String,
}

impl ReadinessEvaluator {
    /// A freshly constructed evaluator: not ready, and due for a
    /// recompute before its state means anything.
    pub fn new() -> Self {
        ReadinessEvaluator {
            have_min_dir_info: false,
            have_consensus_path: ConsensusPathState::Unknown,
            needs_recompute: true,
            status: String::new(),
        }
    }

    /// The cached "enough directory info" result, as of the last
    /// [`Self::refresh`].
    pub fn have_min_dir_info(&self) -> bool {
        self.have_min_dir_info
    }

    /// Whether the consensus currently supports Exit circuits,
    /// Internal-only circuits, or hasn't been evaluated yet.
    pub fn have_consensus_path(&self) -> ConsensusPathState {
        self.have_consensus_path
    }

    /// Whether [`Self::refresh`] needs to be called before
    /// [`Self::have_min_dir_info`] can be trusted.
    pub fn needs_recompute(&self) -> bool {
        self.needs_recompute
    }

    /// A bounded-size, human-readable explanation of the current
    /// readiness state (empty when ready).
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Mark the cached readiness result stale. Any mutation to the
    /// registry that could affect readiness (installing a consensus,
    /// attaching or detaching a descriptor or microdescriptor) should
    /// call this.
    pub fn mark_dirty(&mut self) {
        self.needs_recompute = true;
    }

    /// Recompute readiness from scratch.
    ///
    /// `fetch_delay_reason` and `entry_guard_info_sufficient` stand in
    /// for two external collaborators out of this crate's scope (the
    /// Directory Client's fetch scheduler and the Path Builder's
    /// entry-guard tracker); callers pass their current answers in.
    pub fn refresh(
        &mut self,
        store: &Store,
        consensus: Option<&ConsensusDocument>,
        config: &ReconcilerConfig,
        now: SystemTime,
        fetch_delay_reason: Option<&str>,
        entry_guard_info_sufficient: bool,
    ) -> Option<ReadinessEvent> {
        self.needs_recompute = false;
        let previously_ready = self.have_min_dir_info;
        let mut ready = true;

        if let Some(reason) = fetch_delay_reason {
            self.status = reason.to_string();
            ready = false;
        }

        let live_consensus = consensus.filter(|c| c.is_live_at(now));
        if ready && live_consensus.is_none() {
            self.status = "no (recent) usable consensus".to_string();
            ready = false;
        }

        if ready && !entry_guard_info_sufficient {
            self.status = "not enough directory information about our entry guards".to_string();
            ready = false;
        }

        if ready {
            let consensus = live_consensus.expect("checked above");
            let (frac_paths, detail) =
                compute_frac_paths_available(store, consensus, config, &mut self.have_consensus_path);
            let threshold = weight::min_paths_for_circs_pct(consensus, config.min_paths_for_circs_pct_override);
            let pct = (frac_paths * 100.0).round() as i64;
            if pct < i64::from(threshold) {
                self.status = format!("{detail} ({pct}% of paths usable, need {threshold}%)");
                ready = false;
            } else {
                self.status.clear();
            }
        }

        self.have_min_dir_info = ready;

        if !previously_ready && ready {
            info!("enough directory information to build circuits");
            Some(ReadinessEvent::EnoughDirInfo)
        } else if previously_ready && !ready {
            self.have_consensus_path = ConsensusPathState::Unknown;
            info!(status = %self.status, "no longer enough directory information; circuits may fail to build");
            Some(ReadinessEvent::NotEnoughDirInfo)
        } else {
            None
        }
    }
}

fn frac_nodes_with_descriptors(
    store: &Store,
    consensus: &ConsensusDocument,
    weights: &WeightSet,
    role: WeightRole,
    filter: &UsableFilter<'_>,
) -> f64 {
    let mut total = 0u64;
    let mut have = 0u64;
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
        if !selectors::client_would_use_router(entry.flags) {
            continue;
        }
        let w = weights.weight_for_role(entry, role);
        total += w;
        if node_has_descriptor(store, consensus, entry) {
            have += w;
        }
    }
    if total == 0 {
        1.0
    } else {
        have as f64 / total as f64
    }
}

/// Same as [`frac_nodes_with_descriptors`], but additionally excludes
/// any entry whose record's exit policy is known to reject everything
/// — used for the `ExitNodes`-unflagged fallback.
fn frac_nodes_with_descriptors_unrejected(
    store: &Store,
    consensus: &ConsensusDocument,
    weights: &WeightSet,
    filter: &UsableFilter<'_>,
) -> f64 {
    let mut total = 0u64;
    let mut have = 0u64;
    for entry in &consensus.entries {
        if let Some(set) = filter.router_set {
            if !set.matches(&entry.identity_digest, Some(entry.nickname.as_str()), &[]) {
                continue;
            }
        }
        if !selectors::client_would_use_router(entry.flags) {
            continue;
        }
        if let Some(record) = store.get_by_id(&entry.identity_digest) {
            if accessors::exit_policy_rejects_all(record) {
                continue;
            }
        }
        let w = weights.weight_for_role(entry, WeightRole::Exit);
        total += w;
        if node_has_descriptor(store, consensus, entry) {
            have += w;
        }
    }
    if total == 0 {
        1.0
    } else {
        have as f64 / total as f64
    }
}

fn node_has_descriptor(
    store: &Store,
    consensus: &ConsensusDocument,
    entry: &crate::doc::ConsensusEntry,
) -> bool {
    store
        .get_by_id(&entry.identity_digest)
        .is_some_and(|r| match consensus.flavor {
            crate::doc::Flavor::Full => r.descriptor().is_some(),
            crate::doc::Flavor::Microdesc => r.microdesc().is_some(),
        })
}

/// Compute the weighted guard/middle/exit path-availability product,
/// updating `have_consensus_path` along the way, and a short
/// human-readable breakdown for the status string.
pub fn compute_frac_paths_available(
    store: &Store,
    consensus: &ConsensusDocument,
    config: &ReconcilerConfig,
    have_consensus_path: &mut ConsensusPathState,
) -> (f64, String) {
    let weights = WeightSet::from_consensus(consensus);

    let mid_filter = UsableFilter::default();
    let (mid_usable, mid_present, _) = selectors::count_usable(store, consensus, &mid_filter);

    let guard_filter = match &config.entry_nodes {
        Some(set) => UsableFilter {
            router_set: Some(set),
            ..Default::default()
        },
        None => UsableFilter {
            required_flag: Some(RelayFlags::POSSIBLE_GUARD),
            ..Default::default()
        },
    };
    let (guard_usable, guard_present, _) = selectors::count_usable(store, consensus, &guard_filter);

    let exit_filter = UsableFilter {
        required_flag: Some(RelayFlags::EXIT),
        ..Default::default()
    };
    let (exit_usable, exit_present, _) = selectors::count_usable(store, consensus, &exit_filter);

    let was_exit = matches!(have_consensus_path, ConsensusPathState::Exit);
    *have_consensus_path = if exit_usable >= 1 {
        ConsensusPathState::Exit
    } else {
        ConsensusPathState::Internal
    };
    if was_exit && matches!(have_consensus_path, ConsensusPathState::Internal) {
        info!("the consensus no longer lists any usable Exit relay; only internal circuits can be built");
    }

    let f_guard = frac_nodes_with_descriptors(store, consensus, &weights, WeightRole::Guard, &guard_filter);
    let f_mid = frac_nodes_with_descriptors(store, consensus, &weights, WeightRole::Middle, &mid_filter);
    let mut f_exit = frac_nodes_with_descriptors(store, consensus, &weights, WeightRole::Exit, &exit_filter);

    if let Some(exit_set) = &config.exit_nodes {
        let myexit_filter = UsableFilter {
            router_set: Some(exit_set),
            required_flag: Some(RelayFlags::EXIT),
            ..Default::default()
        };
        let (myexits_usable, ..) = selectors::count_usable(store, consensus, &myexit_filter);
        let f_myexit = frac_nodes_with_descriptors(store, consensus, &weights, WeightRole::Exit, &myexit_filter);

        let myexit_unflagged_filter = UsableFilter {
            router_set: Some(exit_set),
            ..Default::default()
        };
        let f_myexit_unflagged =
            frac_nodes_with_descriptors_unrejected(store, consensus, &weights, &myexit_unflagged_filter);

        let chosen = if myexits_usable == 0 {
            f_myexit_unflagged
        } else {
            f_myexit
        };
        f_exit = f_exit.min(chosen);
    }

    if !matches!(have_consensus_path, ConsensusPathState::Exit) {
        f_exit = 1.0;
    }

    let detail = format!(
        "{guard_present}/{guard_usable} guards, {mid_present}/{mid_usable} mid, {exit_present}/{exit_usable} exits"
    );

    (f_guard * f_mid * f_exit, detail)
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
    use crate::doc::{ConsensusEntry, DescriptorDigest, Flavor};
    use crate::ids::RelayId;

    fn id(b: u8) -> RelayId {
        RelayId::from([b; 20])
    }

    fn entry(id: u8, flags: RelayFlags) -> ConsensusEntry {
        ConsensusEntry {
            identity_digest: RelayId::from([id; 20]),
            nickname: "r".to_string(),
            descriptor_digest: DescriptorDigest::Micro([id; 32]),
            or_addr_v4: Some(format!("10.0.0.{id}:9001").parse().unwrap()),
            dir_addr_v4: None,
            or_addr_v6: None,
            flags,
            supports_ed25519_link_handshake: false,
            is_named: false,
            bandwidth_weight: 1000,
            bandwidth_measured: true,
        }
    }

    fn consensus(entries: Vec<ConsensusEntry>) -> ConsensusDocument {
        ConsensusDocument {
            flavor: Flavor::Microdesc,
            valid_after: SystemTime::UNIX_EPOCH,
            fresh_until: SystemTime::UNIX_EPOCH,
            valid_until: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(3600),
            params: vec![("min_paths_for_circs_pct".to_string(), 60)],
            entries,
        }
    }

    #[test]
    fn refresh_fails_with_no_consensus() {
        let store = Store::new();
        let config = ReconcilerConfig::default();
        let mut eval = ReadinessEvaluator::new();
        let event = eval.refresh(&store, None, &config, SystemTime::UNIX_EPOCH, None, true);
        assert!(!eval.have_min_dir_info());
        assert!(event.is_none()); // was already not-ready
        assert!(!eval.status().is_empty());
    }

    #[test]
    fn refresh_fails_on_fetch_delay() {
        let store = Store::new();
        let config = ReconcilerConfig::default();
        let mut eval = ReadinessEvaluator::new();
        eval.refresh(
            &store,
            None,
            &config,
            SystemTime::UNIX_EPOCH,
            Some("waiting for bootstrap"),
            true,
        );
        assert_eq!(eval.status(), "waiting for bootstrap");
    }

    #[test]
    fn exit_only_consensus_is_ready_with_full_weight() {
        let mut store = Store::new();
        let flags = RelayFlags::VALID | RelayFlags::RUNNING | RelayFlags::POSSIBLE_GUARD | RelayFlags::EXIT;
        for b in 1..=3u8 {
            store.get_or_create(id(b));
        }
        let consensus = consensus(vec![
            entry(1, RelayFlags::VALID | RelayFlags::RUNNING | RelayFlags::EXIT),
            entry(2, RelayFlags::VALID | RelayFlags::RUNNING | RelayFlags::POSSIBLE_GUARD),
            entry(3, flags),
        ]);

        // Attach microdescriptors so num_present == num_usable.
        for b in 1..=3u8 {
            let md = crate::record::MicrodescHandle::new(crate::doc::Microdescriptor {
                digest: [b; 32],
                ed25519_id: None,
                onion_key: None,
                or_addr_v6: None,
                exit_policy: None,
                declared_family: Vec::new(),
            });
            store.get_by_id_mut(&id(b)).unwrap().set_microdesc(md);
        }

        let config = ReconcilerConfig::default();
        let mut eval = ReadinessEvaluator::new();
        let event = eval.refresh(
            &store,
            Some(&consensus),
            &config,
            SystemTime::UNIX_EPOCH,
            None,
            true,
        );
        assert!(eval.have_min_dir_info());
        assert_eq!(eval.have_consensus_path(), ConsensusPathState::Exit);
        assert_eq!(event, Some(ReadinessEvent::EnoughDirInfo));
    }
}
