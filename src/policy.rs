//! Exit-policy judgments.
//!
//! A relay's full descriptor carries an exact, port-range exit policy; its
//! microdescriptor carries only a *compact* summary of that policy (a short
//! list of accepted or rejected ports). Judgments made from the compact
//! form are therefore only ever "probable", never exact, for anything the
//! summary didn't spell out explicitly.

use std::net::IpAddr;

/// The result of checking whether a policy allows traffic to a given
/// address and port.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PolicyResult {
    /// The policy exactly accepts this address and port.
    Accepted,
    /// The policy's summary suggests this would be accepted, but the
    /// judgment isn't exact (derived from a microdescriptor's compact
    /// policy without address information).
    ProbablyAccepted,
    /// The policy's summary suggests this would be rejected, but the
    /// judgment isn't exact.
    ProbablyRejected,
    /// The policy exactly rejects this address and port.
    Rejected,
}

impl PolicyResult {
    /// True for `Rejected` or `ProbablyRejected`.
    pub fn is_rejected(self) -> bool {
        matches!(self, PolicyResult::Rejected | PolicyResult::ProbablyRejected)
    }

    /// True for `Accepted` or `ProbablyAccepted`.
    pub fn is_accepted(self) -> bool {
        !self.is_rejected()
    }
}

/// A full, address-and-port-exact exit policy, as found in a relay
/// descriptor.
///
/// Represented as an ordered list of accept/reject port-range rules
/// applied in order, the way a real Tor exit policy is evaluated; the
/// final implicit rule is "reject *:*".
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExitPolicy {
    /// Rules in the order they should be applied.
    rules: Vec<PolicyRule>,
}

/// One rule in a full exit policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct PolicyRule {
    /// Whether this rule accepts or rejects matching traffic.
    accept: bool,
    /// Inclusive low port.
    lo: u16,
    /// Inclusive high port.
    hi: u16,
}

impl ExitPolicy {
    /// Construct a policy from `(accept, lo, hi)` triples, applied in
    /// order.
    pub fn from_rules(rules: impl IntoIterator<Item = (bool, u16, u16)>) -> Self {
        ExitPolicy {
            rules: rules
                .into_iter()
                .map(|(accept, lo, hi)| PolicyRule { accept, lo, hi })
                .collect(),
        }
    }

    /// A policy that rejects every address and port.
    pub fn new_reject_all() -> Self {
        ExitPolicy { rules: Vec::new() }
    }

    /// True if this policy is exactly equivalent to "reject *:*".
    pub fn is_reject_star(&self) -> bool {
        self.rules.iter().all(|r| !r.accept)
    }

    /// Evaluate this policy for `_addr` and `port`.
    ///
    /// A full policy never depends on the address beyond accept/reject by
    /// port range in this simplified model, so the judgment is always
    /// exact.
    pub fn compare(&self, _addr: IpAddr, port: u16) -> PolicyResult {
        for rule in &self.rules {
            if port >= rule.lo && port <= rule.hi {
                return if rule.accept {
                    PolicyResult::Accepted
                } else {
                    PolicyResult::Rejected
                };
            }
        }
        PolicyResult::Rejected
    }
}

/// A compact exit-policy summary, as found in a microdescriptor: a short
/// list of ports that are (depending on `accept_style`) either the only
/// accepted ports, or the only rejected ones.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompactPolicy {
    /// If true, `ports` lists the accepted ports and everything else is
    /// rejected. If false, `ports` lists the rejected ports and
    /// everything else is accepted.
    accept_style: bool,
    /// The listed ports.
    ports: Vec<(u16, u16)>,
}

impl CompactPolicy {
    /// Construct an accept-style compact policy ("accept these ports,
    /// reject the rest").
    pub fn accept(ports: impl IntoIterator<Item = (u16, u16)>) -> Self {
        CompactPolicy {
            accept_style: true,
            ports: ports.into_iter().collect(),
        }
    }

    /// Construct a reject-style compact policy ("reject these ports,
    /// accept the rest").
    pub fn reject(ports: impl IntoIterator<Item = (u16, u16)>) -> Self {
        CompactPolicy {
            accept_style: false,
            ports: ports.into_iter().collect(),
        }
    }

    /// True if this compact policy is equivalent to "reject *:*".
    pub fn is_reject_star(&self) -> bool {
        self.accept_style && self.ports.is_empty()
    }

    /// Judge `port` against this compact policy. Since a compact policy
    /// carries no address information, the result is never exact.
    pub fn compare_port(&self, port: u16) -> PolicyResult {
        let listed = self.ports.iter().any(|(lo, hi)| port >= *lo && port <= *hi);
        match (self.accept_style, listed) {
            (true, true) => PolicyResult::ProbablyAccepted,
            (true, false) => PolicyResult::ProbablyRejected,
            (false, true) => PolicyResult::ProbablyRejected,
            (false, false) => PolicyResult::ProbablyAccepted,
        }
    }
}
