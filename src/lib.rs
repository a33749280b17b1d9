/*!
    A deterministic cyclic master controller for EtherCAT-class fieldbus networks.

    The wire protocol itself is not here: it lives behind the injected [driver::Driver]
    capability. This crate owns what sits on top of it and is hard to get right anywhere:
    the frozen process data layout, the bounded per-cycle behavior, the cooperative
    cancellation and the graceful degradation when part of the hardware drops out.
*/

mod clock;
mod config;
mod domain;
mod error;
mod mailbox;
mod master;
mod rt;
mod sdo;

pub mod driver;
pub mod slave;

pub use crate::clock::{interval_ns, CycleClock, CycleStats};
pub use crate::config::{MasterConfig, SdoConfigItem};
pub use crate::domain::{Domain, DomainRegistry, Entry};
pub use crate::error::{ActivationError, MasterError, MasterResult};
pub use crate::mailbox::{Mailbox, RequestId, RequestState, SdoRequest, MAX_SDO_PAYLOAD};
pub use crate::master::{Cycle, Master, StopHandle, DEFAULT_DOMAIN};
pub use crate::rt::{Priority, RtContext};
pub use crate::sdo::{SdoAbortCode, SdoConfigEntry, SdoError};
pub use crate::slave::{shared, Device, PdoChannel, SharedDevice, SlaveAddress, SlaveInfo};
