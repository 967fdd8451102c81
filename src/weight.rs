//! Bandwidth-weighting machinery backing the Readiness Evaluator's
//! weighted guard/middle/exit fractions.
//!
//! Mirrors the consensus bandwidth-weighting scheme used to pick relays
//! at random: a relay's apparent bandwidth is scaled by a per-role,
//! per-kind weight drawn from the consensus's own `Wxx` parameters, so
//! that scarce functionality (e.g. Exit bandwidth) isn't overused for
//! unrelated roles.

use bitflags::bitflags;

use crate::doc::{ConsensusDocument, ConsensusEntry, RelayFlags};

/// A relay's consensus-reported bandwidth weight, tagged with whether
/// it came from bandwidth-authority measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelayBandwidth {
    /// An unmeasured, self-reported weight.
    Unmeasured(u64),
    /// A bandwidth-authority-measured weight.
    Measured(u64),
}

impl RelayBandwidth {
    fn from_entry(entry: &ConsensusEntry) -> Self {
        if entry.bandwidth_measured {
            RelayBandwidth::Measured(entry.bandwidth_weight)
        } else {
            RelayBandwidth::Unmeasured(entry.bandwidth_weight)
        }
    }

    fn is_measured(self) -> bool {
        matches!(self, RelayBandwidth::Measured(_))
    }

    fn is_nonzero(self) -> bool {
        match self {
            RelayBandwidth::Measured(w) | RelayBandwidth::Unmeasured(w) => w != 0,
        }
    }
}

/// How to find a relay's base bandwidth, decided once per consensus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BandwidthFn {
    /// No weights at all: treat every relay as weight 1.
    Uniform,
    /// No measured weights: count unmeasured weights as-is.
    IncludeUnmeasured,
    /// Measured weights exist; only use those.
    MeasuredOnly,
}

impl BandwidthFn {
    fn pick<'a>(mut weights: impl Clone + Iterator<Item = &'a RelayBandwidth>) -> Self {
        let has_measured = weights.clone().any(|w| w.is_measured());
        let has_nonzero = weights.clone().any(|w| w.is_nonzero());
        let has_nonzero_measured = weights.any(|w| w.is_measured() && w.is_nonzero());

        if !has_nonzero {
            BandwidthFn::Uniform
        } else if !has_measured {
            BandwidthFn::IncludeUnmeasured
        } else if has_nonzero_measured {
            BandwidthFn::MeasuredOnly
        } else {
            BandwidthFn::Uniform
        }
    }

    fn apply(self, w: RelayBandwidth) -> u32 {
        use BandwidthFn::*;
        use RelayBandwidth::*;
        match (self, w) {
            (Uniform, _) => 1,
            (IncludeUnmeasured, Unmeasured(u)) => u as u32,
            (IncludeUnmeasured, Measured(m)) => m as u32,
            (MeasuredOnly, Unmeasured(_)) => 0,
            (MeasuredOnly, Measured(m)) => m as u32,
        }
    }
}

/// The circuit position a relay is being considered for.
#[derive(Clone, Debug, Copy, Eq, PartialEq)]
#[non_exhaustive]
pub enum WeightRole {
    /// Selecting a relay to use as a guard.
    Guard,
    /// Selecting a relay to use as a middle hop.
    Middle,
    /// Selecting a relay to deliver traffic to the Internet.
    Exit,
    /// Selecting a relay for a one-hop directory request.
    BeginDir,
    /// No additional weighting beyond bandwidth.
    Unweighted,
}

/// One kind of relay's weight across every role.
#[derive(Clone, Debug, Copy, Default)]
struct RoleWeights {
    as_guard: u32,
    as_middle: u32,
    as_exit: u32,
    as_dir: u32,
}

impl std::ops::Mul<u32> for RoleWeights {
    type Output = Self;
    fn mul(self, rhs: u32) -> Self {
        RoleWeights {
            as_guard: self.as_guard * rhs,
            as_middle: self.as_middle * rhs,
            as_exit: self.as_exit * rhs,
            as_dir: self.as_dir * rhs,
        }
    }
}

impl std::ops::Div<u32> for RoleWeights {
    type Output = Self;
    fn div(self, rhs: u32) -> Self {
        RoleWeights {
            as_guard: self.as_guard / rhs,
            as_middle: self.as_middle / rhs,
            as_exit: self.as_exit / rhs,
            as_dir: self.as_dir / rhs,
        }
    }
}

impl RoleWeights {
    fn max_weight(&self) -> u32 {
        [self.as_guard, self.as_middle, self.as_exit, self.as_dir]
            .into_iter()
            .max()
            .unwrap_or(0)
    }

    fn for_role(&self, role: WeightRole) -> u32 {
        match role {
            WeightRole::Guard => self.as_guard,
            WeightRole::Middle => self.as_middle,
            WeightRole::Exit => self.as_exit,
            WeightRole::BeginDir => self.as_dir,
            WeightRole::Unweighted => 1,
        }
    }
}

bitflags! {
    /// A relay's kind, for weighting purposes: whether it carries the
    /// Guard, Exit, and/or V2Dir flags.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    struct WeightKind: u8 {
        const GUARD = 1 << 0;
        const EXIT = 1 << 1;
        const DIR = 1 << 2;
    }
}

impl WeightKind {
    fn for_entry(entry: &ConsensusEntry) -> Self {
        let mut r = WeightKind::empty();
        if entry.flags.contains(RelayFlags::POSSIBLE_GUARD) {
            r |= WeightKind::GUARD;
        }
        if entry.flags.contains(RelayFlags::EXIT) {
            r |= WeightKind::EXIT;
        }
        if entry.flags.contains(RelayFlags::V2_DIR) {
            r |= WeightKind::DIR;
        }
        r
    }

    fn idx(self) -> usize {
        self.bits() as usize
    }
}

/// Read a named integer parameter out of a consensus's `params` list,
/// or `default` if absent.
fn param(consensus: &ConsensusDocument, name: &str, default: i32) -> i32 {
    consensus
        .params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

const DFLT_WEIGHT: i32 = 1;

fn w_param(consensus: &ConsensusDocument, name: &str) -> u32 {
    if name == "---" {
        0
    } else {
        clamp_to_pos(param(consensus, name, DFLT_WEIGHT))
    }
}

fn clamp_to_pos(inp: i32) -> u32 {
    if inp < 0 {
        0
    } else {
        inp as u32
    }
}

fn calculate_shift(a: u64, b: u64) -> u32 {
    let bits_for_product = log2_upper(a) + log2_upper(b);
    if bits_for_product < 64 {
        0
    } else {
        bits_for_product - 64
    }
}

fn log2_upper(n: u64) -> u32 {
    64 - n.leading_zeros()
}

/// Bandwidth weights derived from a consensus, used to weight relays by
/// role when computing the path-availability fractions.
#[derive(Debug, Clone)]
pub struct WeightSet {
    bandwidth_fn: BandwidthFn,
    shift: u8,
    w: [RoleWeights; 8],
}

impl WeightSet {
    /// Compute the weight set for `consensus`.
    pub fn from_consensus(consensus: &ConsensusDocument) -> Self {
        let weights: Vec<RelayBandwidth> = consensus
            .entries
            .iter()
            .map(RelayBandwidth::from_entry)
            .collect();
        let bandwidth_fn = BandwidthFn::pick(weights.iter());
        let weight_scale = (w_param(consensus, "bwweightscale").max(1)) as u32;

        let total_bw: u64 = weights
            .iter()
            .map(|w| u64::from(bandwidth_fn.apply(*w)))
            .sum();

        Self::from_parts(bandwidth_fn, total_bw, weight_scale, consensus)
    }

    fn from_parts(
        bandwidth_fn: BandwidthFn,
        total_bw: u64,
        weight_scale: u32,
        p: &ConsensusDocument,
    ) -> Self {
        let weight_scale = weight_scale.max(1);

        let single = |g: &str, m: &str, e: &str, d: &str| RoleWeights {
            as_guard: w_param(p, g),
            as_middle: w_param(p, m),
            as_exit: w_param(p, e),
            as_dir: w_param(p, d),
        };

        let w_none = single("Wgm", "Wmm", "Wem", "Wbm");
        let w_guard = single("Wgg", "Wmg", "Weg", "Wbg");
        let w_exit = single("---", "Wme", "Wee", "Wbe");
        let w_both = single("Wgd", "Wmd", "Wed", "Wbd");

        let w = [
            w_none,
            w_guard,
            w_exit,
            w_both,
            (w_none * w_param(p, "Wmb")) / weight_scale,
            (w_guard * w_param(p, "Wgb")) / weight_scale,
            (w_exit * w_param(p, "Web")) / weight_scale,
            (w_both * w_param(p, "Wdb")) / weight_scale,
        ];

        let w_max = w.iter().map(RoleWeights::max_weight).max().unwrap_or(1);
        let shift = calculate_shift(total_bw, u64::from(w_max)) as u8;

        WeightSet {
            bandwidth_fn,
            shift,
            w,
        }
    }

    /// The 64-bit weight to use for `entry` in role `role`.
    ///
    /// Does not check whether `entry` actually matches `role` (e.g.
    /// whether it's actually flagged Guard for [`WeightRole::Guard`]) —
    /// that's the caller's job, same as upstream.
    pub fn weight_for_role(&self, entry: &ConsensusEntry, role: WeightRole) -> u64 {
        let kind = WeightKind::for_entry(entry);
        let bw = RelayBandwidth::from_entry(entry);
        let ws = &self.w[kind.idx()];
        let router_bw = self.bandwidth_fn.apply(bw);
        let router_weight = u64::from(router_bw) * u64::from(ws.for_role(role));
        router_weight >> self.shift
    }
}

/// Read `min_paths_for_circs_pct` (default 60, clamped to `[25, 95]`)
/// from the consensus, unless `override_pct` is given.
pub fn min_paths_for_circs_pct(consensus: &ConsensusDocument, override_pct: Option<u8>) -> u8 {
    let raw = override_pct
        .map(i32::from)
        .unwrap_or_else(|| param(consensus, "min_paths_for_circs_pct", 60));
    raw.clamp(25, 95) as u8
}
