/*!
    This module provides the trait [Driver], the capability boundary to the underlying fieldbus
    master implementation.

    Everything wire-related lives behind this trait: frame transmission, datagram encoding,
    working counter computation, mailbox transport. The controller on top of it only sequences
    calls and owns the memory layout, so any master backend (a kernel-module binding, a
    user-space stack, a simulator for tests) can be injected without touching the cyclic logic.

    The split between the configuration phase and the cyclic phase matters for implementors:
    everything up to [Driver::activate] may allocate and block, everything after it is called
    from the real-time loop and must not.
*/

use std::sync::Arc;
use core::fmt;

use crate::sdo::SdoError;
use crate::mailbox::RequestState;


/// identifier of a process data domain, chosen by the application
pub type DomainId = u32;

/// driver-side handle to a configured slave, returned by [Driver::configure_slave]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlaveHandle(pub usize);

/// driver-side handle to an asynchronous object dictionary request
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub usize);

/// one record of a domain registration table
///
/// The table is built during configuration and handed to the driver which computes, at
/// activation, where each record lands in the domain process data image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdoEntryRegistration {
    /// alias of the slave the channel belongs to
    pub alias: u16,
    /// topological position of the slave
    pub position: u16,
    /// index of the mapped object in the slave's dictionary
    pub index: u16,
    /// subindex in the object
    pub sub: u8,
    /// bit length of the channel value
    pub bits: u16,
}

/// position of one registered channel in a domain image, computed by the driver at activation
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PdoPlacement {
    /// byte offset in the domain image
    pub byte: u32,
    /// bit position inside the addressed byte
    pub bit: u32,
}

/// layout of one domain after activation
#[derive(Clone, Debug)]
pub struct DomainLayout {
    pub id: DomainId,
    /// byte size of the process data image
    pub size: usize,
    /// placement of every registration record, in table order
    pub placements: Vec<PdoPlacement>,
}

/// communication state of a slave application layer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AlState {
    #[default]
    Init,
    PreOperational,
    SafeOperational,
    Operational,
}

/// snapshot of the master/link health, see [Driver::master_state]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MasterState {
    /// number of slaves currently answering on the segment
    pub slaves_responding: u32,
    /// whether the network link is up
    pub link_up: bool,
}

/// completeness of the last process data exchange of one domain
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WorkingCounterState {
    /// no slave processed the datagram
    #[default]
    Zero,
    /// some but not all expected slaves processed the datagram
    Incomplete,
    /// all expected slaves processed the datagram
    Complete,
}

/// snapshot of one domain's exchange health, see [Driver::domain_state]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainState {
    pub working_counter: u16,
    pub wc_state: WorkingCounterState,
}

/// snapshot of one configured slave's health, see [Driver::slave_state]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SlaveConfigState {
    /// the slave answers on the segment
    pub online: bool,
    /// the slave reached operational exchange
    pub operational: bool,
    pub al_state: AlState,
}


/**
    fieldbus master backend injected into [crate::Master]

    The controller guarantees the following call ordering to implementors:

    - [connect](Self::connect) first, exactly once
    - [create_domain](Self::create_domain), [register_pdo_entry](Self::register_pdo_entry),
      [configure_slave](Self::configure_slave), [sdo_download](Self::sdo_download) and
      [create_sdo_request](Self::create_sdo_request) in any order during configuration
    - [activate](Self::activate) exactly once, freezing the registration tables
    - after activation only the cyclic and query methods are called, from one single thread

    Cyclic methods ([read_domain](Self::read_domain), [write_domain](Self::write_domain),
    [exchange](Self::exchange), the request and state queries) are on the real-time path and
    must neither block nor allocate.
*/
pub trait Driver {
    /// acquire the identified master instance, failing if it is unavailable or already claimed
    fn connect(&mut self, master_id: u32) -> Result<(), DriverError>;

    /// declare a process data domain, identified by the application-chosen id
    fn create_domain(&mut self, domain: DomainId) -> Result<(), DriverError>;

    /// append one record to a domain registration table
    fn register_pdo_entry(&mut self, domain: DomainId, entry: &PdoEntryRegistration) -> Result<(), DriverError>;

    /// create a configuration handle for the slave at the given (alias, position) address
    fn configure_slave(&mut self, alias: u16, position: u16) -> Result<SlaveHandle, DriverError>;

    /// blocking object dictionary write, only used before activation
    fn sdo_download(&mut self, position: u16, index: u16, sub: u8, data: &[u8]) -> Result<(), SdoError>;

    /// create an asynchronous object dictionary read request of a fixed byte size
    fn create_sdo_request(&mut self, slave: SlaveHandle, index: u16, sub: u8, size: usize) -> Result<RequestHandle, DriverError>;

    /// reserve the process data buffers, compute every registration placement, and start the
    /// transition of the segment toward operational exchange
    fn activate(&mut self) -> Result<Vec<DomainLayout>, DriverError>;

    /// copy the latest received process data of a domain into the given image
    fn read_domain(&mut self, domain: DomainId, data: &mut [u8]) -> Result<(), DriverError>;

    /// stage the given image as the next process data to transmit for a domain
    fn write_domain(&mut self, domain: DomainId, data: &[u8]) -> Result<(), DriverError>;

    /// transmit the staged process data and latch whatever the segment answered
    fn exchange(&mut self) -> Result<(), DriverError>;

    /// start an asynchronous read of the requested object, any previous result is discarded
    fn request_read(&mut self, request: RequestHandle);

    /// current state of an asynchronous request, non-blocking
    fn request_state(&mut self, request: RequestHandle) -> RequestState;

    /// copy the payload of a completed request, `data` is sized to the request's fixed size
    fn request_data(&mut self, request: RequestHandle, data: &mut [u8]) -> Result<(), DriverError>;

    /// current master/link health
    fn master_state(&mut self) -> MasterState;

    /// exchange completeness of the given domain
    fn domain_state(&mut self, domain: DomainId) -> DomainState;

    /// health of the given configured slave
    fn slave_state(&mut self, slave: SlaveHandle) -> SlaveConfigState;
}


/// fault reported by a [Driver] implementation
#[derive(Clone, Debug)]
pub enum DriverError {
    /// the requested resource does not exist or is claimed by someone else
    Unavailable(&'static str),
    /// error caused by the communication support, exterior to the driver
    Io(Arc<std::io::Error>),
    /// operation failed inside the driver
    Failed(&'static str),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            Self::Io(err) => write!(f, "io: {}", err),
            Self::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}
impl std::error::Error for DriverError {}

impl From<std::io::Error> for DriverError {
    fn from(src: std::io::Error) -> Self {
        DriverError::Io(Arc::new(src))
    }
}
