//! The interface this crate consumes from the external microdescriptor
//! cache.
//!
//! Microdescriptors are parsed and stored by the Descriptor Parser and
//! its cache, not by this crate (see the crate's purpose and scope
//! notes). When [`crate::reconciler::Reconciler::install_consensus`]
//! needs to attach the microdescriptor a new consensus entry points at,
//! it looks the digest up through this trait rather than owning the
//! cache itself.

use crate::record::SharedMicrodesc;

/// A cache of microdescriptors, keyed by their 32-byte digest.
pub trait MicrodescCache {
    /// Look up the microdescriptor with the given digest, if cached.
    fn lookup(&self, digest: &[u8; 32]) -> Option<SharedMicrodesc>;
}

/// A cache with nothing in it, for use by clients that haven't fetched
/// any microdescriptors yet (or in tests).
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyMicrodescCache;

impl MicrodescCache for EmptyMicrodescCache {
    fn lookup(&self, _digest: &[u8; 32]) -> Option<SharedMicrodesc> {
        None
    }
}
