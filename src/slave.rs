/*!
    The slave device capability and the per-slave registry records.

    The controller is agnostic to what a slave actually is: a drive, an encoder, an io block.
    Each concrete device type implements [Device] to declare the process data channels it
    needs, to decode/encode its bytes at the offsets the driver assigned, and to receive
    asynchronous configuration values. The controller never interprets payloads itself.
*/

use std::sync::{Arc, Mutex};

use crate::driver::{SlaveHandle, SlaveConfigState};


/// two-part identifier locating a physical device on the fieldbus segment
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SlaveAddress {
    pub alias: u16,
    pub position: u16,
}
impl SlaveAddress {
    pub fn new(alias: u16, position: u16) -> Self {
        Self {alias, position}
    }
}
impl core::fmt::Display for SlaveAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.alias, self.position)
    }
}

/// one cyclic process data channel required by a device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PdoChannel {
    /// index of the mapped object in the device dictionary
    pub index: u16,
    /// subindex in the object
    pub sub: u8,
    /// bit length of the channel value
    pub bits: u16,
}

/**
    capability implemented by each concrete device type

    [decode](Self::decode) and [encode](Self::encode) are called from the real-time loop, once
    per cycle each, with the offset arrays assigned at activation. Both receive exactly one
    offset and one bit position per channel declared by [channels](Self::channels), in
    declaration order. They must not block or allocate.

    [on_sdo_value](Self::on_sdo_value) is called from the slower mailbox delivery path, outside
    of any timing guarantee.
*/
pub trait Device: Send {
    /// process data channels this device needs in its domain
    fn channels(&self) -> Vec<PdoChannel>;

    /// read the device inputs out of the freshly received domain image
    fn decode(&mut self, data: &[u8], offsets: &[u32], bit_positions: &[u32]);

    /// write the device outputs into the domain image about to be transmitted
    fn encode(&mut self, data: &mut [u8], offsets: &[u32], bit_positions: &[u32]);

    /// receive one asynchronous configuration value, keyed by its dictionary index
    fn on_sdo_value(&mut self, index: u16, value: &[u8]) {
        let _ = (index, value);
    }
}

/// shared handle to a device, cloned between the controller and the user callback
pub type SharedDevice = Arc<Mutex<dyn Device>>;

/// wrap a device for sharing with the controller
pub fn shared<D: Device + 'static>(device: D) -> SharedDevice {
    Arc::new(Mutex::new(device))
}


/**
    registry record for one added slave

    Created by [crate::Master::add_slave] with a zeroed observed state, never destroyed before
    the master itself. The observed state is refreshed by the periodic supervision and only
    ever used to report transitions, a stale or offline slave does not stop the loop.
*/
pub struct SlaveInfo {
    pub(crate) address: SlaveAddress,
    pub(crate) handle: SlaveHandle,
    pub(crate) device: SharedDevice,
    /// last observed configuration state, zeroed until the first supervision pass
    pub(crate) state: SlaveConfigState,
}
impl SlaveInfo {
    pub(crate) fn new(address: SlaveAddress, handle: SlaveHandle, device: SharedDevice) -> Self {
        Self {
            address,
            handle,
            device,
            state: SlaveConfigState::default(),
        }
    }
    /// the (alias, position) pair the slave was added with
    pub fn address(&self) -> SlaveAddress {self.address}
    /// last observed configuration state
    pub fn state(&self) -> SlaveConfigState {self.state}
    /// the shared device capability
    pub fn device(&self) -> &SharedDevice {&self.device}
}
