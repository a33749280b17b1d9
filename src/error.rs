//! definition of the general master error types

use core::fmt;
use crate::driver::DriverError;

/**
    error reported by the master controller during the configuration or activation phase

    All variants are fatal for the running system: none of them can be raised from inside the
    cyclic loop, and after receiving one the caller must not proceed to [crate::Master::run].
    Recoverable per-cycle conditions (link flicker, slave dropout, incomplete exchange) are
    reported through the `log` warning sink instead and never interrupt the loop.
*/
#[derive(Clone, Debug)]
pub enum MasterError {
    /// misuse of the configuration surface, like duplicate slave addressing or a registration
    /// attempted after activation
    Configuration(&'static str),

    /// the identified master instance could not be acquired, either unavailable or already
    /// claimed by an other process
    Connection(DriverError),

    /// the transition to operational exchange failed, the domain layout is not usable
    Activation(ActivationError),

    /// fault reported by the underlying driver outside of connection/activation
    Driver(DriverError),
}

/// reasons for an activation failure
#[derive(Clone, Debug)]
pub enum ActivationError {
    /// no domain holds any registration, there is no process data to exchange
    NoProcessData,
    /// the given domain has a registration table with no entries
    EmptyDomain(u32),
    /// the driver computed a layout that does not cover every registration record
    LayoutMismatch(u32),
    /// the driver could not reserve the process data buffers
    Driver(DriverError),
}

/// convenient alias to simplify return annotations
pub type MasterResult<T=()> = core::result::Result<T, MasterError>;

impl fmt::Display for MasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {}", msg),
            Self::Connection(err) => write!(f, "connection error: {}", err),
            Self::Activation(err) => write!(f, "activation error: {}", err),
            Self::Driver(err) => write!(f, "driver error: {}", err),
        }
    }
}
impl fmt::Display for ActivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProcessData => write!(f, "no process data registered in any domain"),
            Self::EmptyDomain(id) => write!(f, "domain {} has an empty registration table", id),
            Self::LayoutMismatch(id) => write!(f, "driver layout does not cover domain {}", id),
            Self::Driver(err) => write!(f, "driver could not reserve process data: {}", err),
        }
    }
}

impl std::error::Error for MasterError {}
impl std::error::Error for ActivationError {}

impl From<DriverError> for MasterError {
    fn from(src: DriverError) -> Self {
        MasterError::Driver(src)
    }
}
impl From<ActivationError> for MasterError {
    fn from(src: ActivationError) -> Self {
        MasterError::Activation(src)
    }
}
