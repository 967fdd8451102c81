//! The interface this crate consumes from the GeoIP Resolver.
//!
//! Geo-IP lookup itself is out of scope (see the crate's purpose and
//! scope notes); this module only declares the contract the Reconciler
//! calls into whenever a record's address set changes.

use std::net::IpAddr;

/// A country code, or "unknown".
///
/// The registry stores this as a plain integer rather than a two-letter
/// code so that "unknown" has an unambiguous, totally-ordered sentinel
/// value (`-1`) that's cheap to store per-record.
pub type CountryId = i16;

/// The sentinel value for "country unknown".
pub const COUNTRY_UNKNOWN: CountryId = -1;

/// An external collaborator that can map an address to a country.
pub trait GeoipResolver {
    /// Look up the country for `addr`. Returns [`COUNTRY_UNKNOWN`] if the
    /// address isn't in the database, or if no database is loaded.
    fn country_for(&self, addr: IpAddr) -> CountryId;
}

/// A resolver that never knows anything, for use when no GeoIP database
/// has been loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullGeoipResolver;

impl GeoipResolver for NullGeoipResolver {
    fn country_for(&self, _addr: IpAddr) -> CountryId {
        COUNTRY_UNKNOWN
    }
}
