/*!
    Asynchronous object dictionary reads, polled from the cyclic loop.

    A mailbox transaction takes many cycles to complete, so reading a configuration object
    while the loop runs can never be a blocking call. Instead the application creates one
    [SdoRequest] per (slave, object) pair it wants to poll, triggers a read with
    [initiate_read](SdoRequest::initiate_read), and checks the request state from the callback
    until it completes. Completion is consumed explicitly: a fresh value requires a fresh
    `initiate_read`, nothing re-arms itself.

    The request payload has a fixed byte size decided at creation, bounded by
    [MAX_SDO_PAYLOAD], so the delivery path never allocates.
*/

use log::warn;

use crate::{
    driver::{Driver, RequestHandle},
    slave::SlaveInfo,
    error::{MasterError, MasterResult},
    };


/// largest fixed payload size an [SdoRequest] may be created with
pub const MAX_SDO_PAYLOAD: usize = 32;

/// identifier of a request in the master's collection
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) usize);

/// state of an asynchronous object dictionary request
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RequestState {
    /// no read was ever initiated, there is nothing to poll
    #[default]
    Unused,
    /// a read is in flight, the payload is not available yet
    Busy,
    /// the last initiated read completed, the payload is available
    Success,
    /// the last initiated read failed, there is no payload
    Error,
}

/**
    one asynchronous read of a slave's dictionary object

    state machine: `Unused --initiate_read--> Busy --> {Success, Error}`, and `initiate_read`
    again from any terminal state. The only operation that triggers a transition from the
    application side is `initiate_read`, polling only observes what the driver reports.
*/
pub struct SdoRequest {
    handle: RequestHandle,
    index: u16,
    sub: u8,
    size: usize,
    /// owning slave, index in the master's registry, used for delivery
    slave: usize,
    state: RequestState,
    /// whether the current completion was already delivered to the slave
    delivered: bool,
}
impl SdoRequest {
    pub(crate) fn new(handle: RequestHandle, index: u16, sub: u8, size: usize, slave: usize) -> Self {
        Self {
            handle,
            index,
            sub,
            size,
            slave,
            state: RequestState::Unused,
            delivered: false,
        }
    }

    /// index of the requested object
    pub fn index(&self) -> u16 {self.index}
    /// subindex of the requested object
    pub fn sub(&self) -> u8 {self.sub}
    /// fixed payload size in bytes
    pub fn size(&self) -> usize {self.size}
    /// index of the owning slave in the master's registry
    pub fn slave(&self) -> usize {self.slave}

    /// current state, as last polled
    pub fn state(&self) -> RequestState {self.state}
    /// the last initiated read completed and its payload is available
    pub fn is_complete(&self) -> bool {self.state == RequestState::Success}
    /// no read was ever initiated, or nothing is in flight nor completed
    pub fn is_unused(&self) -> bool {self.state == RequestState::Unused}

    /// start a fresh read, discarding any previous completion
    pub(crate) fn initiate_read(&mut self, driver: &mut impl Driver) {
        driver.request_read(self.handle);
        self.state = RequestState::Busy;
        self.delivered = false;
    }

    /// refresh the state from the driver, non-blocking
    ///
    /// only a request in flight has anything to learn from the driver, terminal states stay
    /// as they are until the next `initiate_read`
    pub(crate) fn poll(&mut self, driver: &mut impl Driver) -> RequestState {
        if self.state == RequestState::Busy {
            self.state = driver.request_state(self.handle);
        }
        self.state
    }

    /**
        copy the completed payload out of the driver and deliver it to the owning slave

        Returns whether a value was delivered: `Ok(true)` on a fresh completion, `Ok(false)`
        when this completion was already delivered (nothing is delivered twice without an
        intervening `initiate_read`). Calling while the request is [Busy](RequestState::Busy),
        [Error](RequestState::Error) or [Unused](RequestState::Unused) is a usage error.
    */
    pub(crate) fn process_data(
        &mut self,
        driver: &mut impl Driver,
        slaves: &[SlaveInfo],
    ) -> MasterResult<bool> {
        match self.state {
            RequestState::Success => (),
            RequestState::Busy =>
                return Err(MasterError::Configuration("sdo request payload read while busy")),
            RequestState::Error =>
                return Err(MasterError::Configuration("sdo request payload read after error")),
            RequestState::Unused =>
                return Err(MasterError::Configuration("sdo request payload read before any read")),
        }
        if self.delivered {
            return Ok(false);
        }

        let mut payload = heapless::Vec::<u8, MAX_SDO_PAYLOAD>::new();
        payload.resize_default(self.size)
            .map_err(|_| MasterError::Configuration("sdo request size exceeds the payload bound"))?;
        driver.request_data(self.handle, &mut payload)?;

        let slave = &slaves[self.slave];
        slave.device.lock().unwrap().on_sdo_value(self.index, &payload);
        self.delivered = true;
        Ok(true)
    }
}


/// collection of the outstanding requests, exclusively owned by the engine
pub struct Mailbox {
    requests: Vec<SdoRequest>,
}
impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {requests: Vec::new()}
    }

    pub(crate) fn push(&mut self, request: SdoRequest) -> RequestId {
        self.requests.push(request);
        RequestId(self.requests.len() - 1)
    }

    pub fn len(&self) -> usize {self.requests.len()}
    pub fn is_empty(&self) -> bool {self.requests.is_empty()}

    pub fn get(&self, id: RequestId) -> Option<&SdoRequest> {
        self.requests.get(id.0)
    }
    pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut SdoRequest> {
        self.requests.get_mut(id.0)
    }

    /// refresh every in-flight request from the driver, warning on fresh failures
    pub(crate) fn poll_all(&mut self, driver: &mut impl Driver) {
        for request in self.requests.iter_mut() {
            if request.state == RequestState::Busy
            && request.poll(driver) == RequestState::Error {
                warn!("sdo request {:#06x}:{} on slave #{} failed",
                    request.index, request.sub, request.slave);
            }
        }
    }
}
