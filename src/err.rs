//! Declare the error type for tor-relaydir.

use thiserror::Error;

/// An error returned by the relay directory core.
///
/// This only covers the recoverable, surfaced failure modes described in
/// the crate's error-handling design: absence of information is always
/// represented as `None`/`false`, never as an `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// We have never installed a usable consensus, so there is nothing to
    /// evaluate readiness against.
    #[error("no usable consensus has been installed")]
    NoConsensus,

    /// We don't have enough directory info to build circuits.
    #[error("not enough directory information to build circuits: {0}")]
    NotEnoughInfo(String),
}

/// A `Result` using the [`Error`] type from this crate.
pub type Result<T> = std::result::Result<T, Error>;
