/*!
    This module exposes the master controller running the deterministic cyclic exchange.

    The lifecycle is strict: configuration (add slaves, write initial dictionary values),
    then one activation freezing the memory layout, then the blocking cyclic loop.

    ## Example

    The following is the typical wiring of a controller

    ```ignore
    let mut master = Master::connect(driver, 0)?;
    master.set_frequency(1000.0)?;
    master.add_slave(0, 1, slave::shared(drive))?;
    master.config_slave_sdo(1, &SdoConfigEntry {index: 0x6060, sub: 0, value: 8, size: 1})?;
    master.activate()?;

    let rt = RtContext::init(Priority::Realtime)?;
    rt.catch_interrupt(master.stop_handle())?;

    master.run(|cycle| {
        // compose commands through the shared device handles
    })?;
    ```

    In this example `drive` is any value implementing [Device](crate::slave::Device) and
    `driver` the injected fieldbus backend.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::*};
use std::time::{Duration, Instant};
use log::{debug, info, warn};

use crate::{
    clock::{interval_ns, CycleClock, CycleStats, Pacer},
    config::MasterConfig,
    domain::DomainRegistry,
    driver::{DomainId, Driver},
    error::{ActivationError, MasterError, MasterResult},
    mailbox::{Mailbox, RequestId, RequestState, SdoRequest, MAX_SDO_PAYLOAD},
    sdo::{SdoAbortCode, SdoConfigEntry, SdoError},
    slave::{SharedDevice, SlaveAddress, SlaveInfo},
    };


/// domain used by [Master::add_slave] when no explicit domain is given
pub const DEFAULT_DOMAIN: DomainId = 0;

const DEFAULT_FREQUENCY: f64 = 1000.;
const DEFAULT_CHECK_STATE_FREQUENCY: u32 = 10;


/// clonable handle clearing the cooperative run flag, safe to use from an other thread or
/// from a signal handler
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}
impl StopHandle {
    /// request the loop to exit at the next cycle boundary
    pub fn stop(&self) {
        self.running.store(false, Release);
    }
}


/**
    deterministic cyclic master controller over an injected fieldbus [Driver]

    One instance owns the whole exchange: the domain registry and its process data images, the
    per-slave records, the outstanding mailbox requests and the cycle clock. Everything cyclic
    runs on the single thread calling [run](Self::run), the only cross-thread interaction is
    the cooperative [StopHandle].
*/
pub struct Master<D: Driver> {
    driver: D,
    domains: DomainRegistry,
    slaves: Vec<SlaveInfo>,
    mailbox: Mailbox,
    clock: CycleClock,
    /// loop period in nanoseconds, derived once from the configured frequency
    interval_ns: u64,
    /// period of the health checks, in cycles
    check_state_frequency: u32,
    running: Arc<AtomicBool>,
    activated: bool,
    /// id snapshot taken at activation, so the loop iterates without allocating
    domain_ids: Vec<DomainId>,
    last_master_state: crate::driver::MasterState,
}

impl<D: Driver> Master<D> {
    /// acquire the identified master instance through the given driver
    pub fn connect(mut driver: D, master_id: u32) -> MasterResult<Self> {
        driver.connect(master_id).map_err(MasterError::Connection)?;
        info!("connected to master {}", master_id);
        Ok(Self {
            driver,
            domains: DomainRegistry::new(),
            slaves: Vec::new(),
            mailbox: Mailbox::new(),
            clock: CycleClock::new(),
            interval_ns: interval_ns(DEFAULT_FREQUENCY),
            check_state_frequency: DEFAULT_CHECK_STATE_FREQUENCY,
            running: Arc::new(AtomicBool::new(false)),
            activated: false,
            domain_ids: Vec::new(),
            last_master_state: Default::default(),
        })
    }

    /// set the loop frequency in Hz, deriving the cycle period
    pub fn set_frequency(&mut self, frequency: f64) -> MasterResult<()> {
        if ! (frequency > 0.) {
            return Err(MasterError::Configuration("frequency must be strictly positive"));
        }
        self.interval_ns = interval_ns(frequency);
        Ok(())
    }
    /// cycle period derived from the configured frequency
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }
    /// set the period of the health checks, in cycles
    pub fn set_check_state_frequency(&mut self, cycles: u32) -> MasterResult<()> {
        if cycles == 0 {
            return Err(MasterError::Configuration("check_state_frequency must be at least 1"));
        }
        self.check_state_frequency = cycles;
        Ok(())
    }

    /// apply a declarative configuration, including its initial dictionary values
    ///
    /// must happen after the addressed slaves were added and before activation
    pub fn configure(&mut self, config: &MasterConfig) -> MasterResult<()> {
        config.validate()?;
        self.set_frequency(config.frequency)?;
        self.set_check_state_frequency(config.check_state_frequency)?;
        for item in &config.sdo {
            self.config_slave_sdo(item.position, &item.entry)
                .map_err(|err| {
                    warn!("initial sdo value {} for position {} refused: {}",
                        item.entry, item.position, err);
                    MasterError::Configuration("an initial sdo value was refused")
                })?;
        }
        Ok(())
    }

    /**
        add a slave device to the master, in the default domain

        The device declares its process data channels, which are appended to the domain's
        registration table. Fails on duplicate (alias, position) addressing or when the driver
        refuses the configuration handle.
    */
    pub fn add_slave(&mut self, alias: u16, position: u16, device: SharedDevice) -> MasterResult<usize> {
        self.add_slave_in(DEFAULT_DOMAIN, alias, position, device)
    }

    /// add a slave device to the master, registering its channels in the given domain
    pub fn add_slave_in(&mut self, domain: DomainId, alias: u16, position: u16, device: SharedDevice) -> MasterResult<usize> {
        if self.activated {
            return Err(MasterError::Configuration("slaves cannot be added after activation"));
        }
        let address = SlaveAddress::new(alias, position);
        if self.slaves.iter().any(|slave| slave.address == address) {
            return Err(MasterError::Configuration("a slave is already added at this address"));
        }
        let handle = self.driver.configure_slave(alias, position)
            .map_err(|err| {
                warn!("slave {}: configuration handle refused: {}", address, err);
                MasterError::Configuration("the driver refused the slave configuration handle")
            })?;
        if ! self.domains.contains(domain) {
            self.driver.create_domain(domain)?;
        }
        let channels = device.lock().unwrap().channels();
        let index = self.slaves.len();
        self.domains.register(domain, index, address, &channels)?;
        self.slaves.push(SlaveInfo::new(address, handle, device));
        debug!("slave {} added with {} channels in domain {}", address, channels.len(), domain);
        Ok(index)
    }

    /**
        write one configuration value in a slave's object dictionary, before activation only

        A communication failure and a protocol rejection are distinct outcomes: the former
        carries no abort code, the latter carries the rejection reason, including the
        master-local [UnknownSlave](SdoAbortCode::UnknownSlave) when the position was never
        added.
    */
    pub fn config_slave_sdo(&mut self, position: u16, entry: &SdoConfigEntry) -> Result<(), SdoError> {
        if self.activated {
            return Err(SdoError::Communication("sdo configuration is closed after activation"));
        }
        if ! self.slaves.iter().any(|slave| slave.address.position == position) {
            return Err(SdoError::Rejected(SdoAbortCode::UnknownSlave));
        }
        if ! matches!(entry.size, 1 | 2 | 4) {
            return Err(SdoError::Communication("unsupported sdo value size"));
        }
        self.driver.sdo_download(position, entry.index, entry.sub, &entry.bytes()[.. entry.size as usize])
    }

    /**
        create an asynchronous read request for one of a slave's dictionary objects

        Requests are created before activation, once per (slave, object) pair to poll, and
        live as long as the master. The returned id addresses the request in
        [initiate_read](Self::initiate_read), [request_state](Self::request_state) and
        [process_data](Self::process_data), from here or from the [Cycle] context.
    */
    pub fn sdo_request(&mut self, position: u16, index: u16, sub: u8, size: usize) -> MasterResult<RequestId> {
        if self.activated {
            return Err(MasterError::Configuration("sdo requests must be created before activation"));
        }
        if size == 0 || size > MAX_SDO_PAYLOAD {
            return Err(MasterError::Configuration("sdo request size out of bounds"));
        }
        let slave = self.slaves.iter().position(|slave| slave.address.position == position)
            .ok_or(MasterError::Configuration("sdo request for a slave that was never added"))?;
        let handle = self.driver.create_sdo_request(self.slaves[slave].handle, index, sub, size)?;
        Ok(self.mailbox.push(SdoRequest::new(handle, index, sub, size, slave)))
    }

    /// start a fresh asynchronous read of the given request
    pub fn initiate_read(&mut self, id: RequestId) -> MasterResult<()> {
        self.mailbox.get_mut(id)
            .ok_or(MasterError::Configuration("unknown sdo request"))?
            .initiate_read(&mut self.driver);
        Ok(())
    }
    /// refresh and return the state of the given request, non-blocking
    pub fn request_state(&mut self, id: RequestId) -> MasterResult<RequestState> {
        Ok(self.mailbox.get_mut(id)
            .ok_or(MasterError::Configuration("unknown sdo request"))?
            .poll(&mut self.driver))
    }
    /// deliver a completed request payload to its owning slave, at most once per completion
    pub fn process_data(&mut self, id: RequestId) -> MasterResult<bool> {
        self.mailbox.get_mut(id)
            .ok_or(MasterError::Configuration("unknown sdo request"))?
            .process_data(&mut self.driver, &self.slaves)
    }
    /// read access to an outstanding request
    pub fn request(&self, id: RequestId) -> Option<&SdoRequest> {
        self.mailbox.get(id)
    }

    /**
        freeze every registration table, reserve the process data buffers and start the
        transition toward operational exchange

        Must be called exactly once, after all [add_slave](Self::add_slave) and
        [config_slave_sdo](Self::config_slave_sdo) calls and before [run](Self::run). Fails if
        any domain is empty or if the driver cannot reserve the layout.
    */
    pub fn activate(&mut self) -> MasterResult<()> {
        if self.activated {
            return Err(MasterError::Configuration("activate() must be called exactly once"));
        }
        if self.domains.is_empty() {
            return Err(ActivationError::NoProcessData.into());
        }
        for id in self.domains.ids() {
            let domain = self.domains.get(id)
                .ok_or(ActivationError::LayoutMismatch(id))?;
            if domain.registrations().is_empty() {
                return Err(ActivationError::EmptyDomain(id).into());
            }
        }
        // hand the complete registration tables down to the driver
        for id in self.domains.ids() {
            let domain = self.domains.get(id)
                .ok_or(ActivationError::LayoutMismatch(id))?;
            for reg in domain.registrations() {
                self.driver.register_pdo_entry(id, reg)
                    .map_err(ActivationError::Driver)?;
            }
        }
        let layouts = self.driver.activate()
            .map_err(ActivationError::Driver)?;
        self.domains.finalize(&layouts)?;
        self.domain_ids = self.domains.ids().collect();
        self.activated = true;
        info!("activated with {} slaves in {} domains", self.slaves.len(), self.domain_ids.len());
        Ok(())
    }

    /// refresh one domain's process data image from the wire and let its devices decode
    pub fn read_data(&mut self, id: DomainId) -> MasterResult<()> {
        if ! self.activated {
            return Err(MasterError::Configuration("process data is not available before activation"));
        }
        let domain = self.domains.get_mut(id)
            .ok_or(MasterError::Configuration("unknown domain"))?;
        self.driver.read_domain(id, &mut domain.data)?;
        for entry in domain.entries.iter() {
            self.slaves[entry.slave].device.lock().unwrap()
                .decode(&domain.data, &entry.offset, &entry.bit_position);
        }
        Ok(())
    }

    /// let one domain's devices encode their outputs, then flush the image to the wire
    pub fn write_data(&mut self, id: DomainId) -> MasterResult<()> {
        if ! self.activated {
            return Err(MasterError::Configuration("process data is not available before activation"));
        }
        let domain = self.domains.get_mut(id)
            .ok_or(MasterError::Configuration("unknown domain"))?;
        for entry in domain.entries.iter() {
            self.slaves[entry.slave].device.lock().unwrap()
                .encode(&mut domain.data, &entry.offset, &entry.bit_position);
        }
        self.driver.write_domain(id, &domain.data)?;
        Ok(())
    }

    /// transmit the staged process data and latch the segment's answer
    pub fn exchange(&mut self) -> MasterResult<()> {
        self.driver.exchange().map_err(MasterError::Driver)
    }

    /// one full exchange of a single domain outside the cyclic loop
    pub fn update(&mut self, domain: DomainId) -> MasterResult<()> {
        self.read_data(domain)?;
        self.write_data(domain)?;
        self.exchange()
    }

    /**
        blocking cyclic loop, until [stop](Self::stop) clears the cooperative flag

        Each cycle: wait for the next period boundary, refresh all domains (devices decode),
        run the callback, flush all domains (devices encode), exchange the frame, then every
        `check_state_frequency` cycles poll the master/slave/domain health. Per-cycle faults
        are reported as warnings and never break the loop. A stop request always lets the
        current cycle complete its flush and exchange.
    */
    pub fn run<F>(&mut self, mut callback: F) -> MasterResult<()>
    where F: FnMut(&mut Cycle<'_, D>)
    {
        if ! self.activated {
            return Err(MasterError::Configuration("run() requires a successful activation"));
        }
        let mut pacer = Pacer::new(self.interval_ns);
        let mut stats = CycleStats::new();
        self.clock.reset();
        self.running.store(true, Release);
        info!("cyclic exchange started, period {} ns", self.interval_ns);

        pacer.start();
        while self.running.load(Acquire) {
            pacer.wait();
            let began = Instant::now();

            for i in 0 .. self.domain_ids.len() {
                let id = self.domain_ids[i];
                if let Err(err) = self.read_data(id) {
                    warn!("domain {}: refresh failed: {}", id, err);
                }
            }
            self.mailbox.poll_all(&mut self.driver);

            {
                let mut cycle = Cycle {
                    driver: &mut self.driver,
                    mailbox: &mut self.mailbox,
                    slaves: &self.slaves,
                    clock: &self.clock,
                    running: &self.running,
                };
                callback(&mut cycle);
            }

            for i in 0 .. self.domain_ids.len() {
                let id = self.domain_ids[i];
                if let Err(err) = self.write_data(id) {
                    warn!("domain {}: flush failed: {}", id, err);
                }
            }
            if let Err(err) = self.driver.exchange() {
                warn!("frame exchange failed: {}", err);
            }

            self.clock.advance();
            stats.record(began.elapsed().as_nanos() as u64, self.interval_ns);
            if self.clock.cycles() % self.check_state_frequency as u64 == 0 {
                self.check_states();
            }
        }

        info!("cyclic exchange stopped after {} cycles, {:.6} s",
            self.clock.cycles(), self.clock.elapsed().as_secs_f64());
        info!("cycle duration: min {} ns, mean {} ns, max {} ns, {} overruns",
            stats.min_ns.min(stats.max_ns), stats.mean_ns(), stats.max_ns, stats.overruns);
        Ok(())
    }

    /// request the loop to exit at the next cycle boundary, callable from the callback
    pub fn stop(&self) {
        self.running.store(false, Release);
    }
    /// handle to stop the loop from an other thread or a signal context
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {running: self.running.clone()}
    }

    /// time of the last completed cycle since `run()` started
    pub fn elapsed_time(&self) -> Duration {
        self.clock.elapsed()
    }
    /// number of completed cycles since `run()` started
    pub fn elapsed_cycles(&self) -> u64 {
        self.clock.cycles()
    }

    /// read access to the injected driver, for state queries the controller does not cover
    pub fn driver(&self) -> &D {&self.driver}
    /// the domain registry
    pub fn domains(&self) -> &DomainRegistry {&self.domains}
    /// the added slaves, in addition order
    pub fn slaves(&self) -> &[SlaveInfo] {&self.slaves}
    /// the outstanding mailbox requests
    pub fn mailbox(&self) -> &Mailbox {&self.mailbox}

    fn check_states(&mut self) {
        self.check_master_state();
        self.check_domain_states();
        self.check_slave_states();
    }

    /// link and population transitions, observational only
    fn check_master_state(&mut self) {
        let state = self.driver.master_state();
        if state.link_up != self.last_master_state.link_up {
            warn!("master: link {}", if state.link_up {"up"} else {"down"});
        }
        if state.slaves_responding != self.last_master_state.slaves_responding {
            warn!("master: {} slaves responding, {} configured",
                state.slaves_responding, self.slaves.len());
        }
        self.last_master_state = state;
    }

    /// working counter transitions, a mismatch means partial process data for that domain
    fn check_domain_states(&mut self) {
        for i in 0 .. self.domain_ids.len() {
            let id = self.domain_ids[i];
            let state = self.driver.domain_state(id);
            let Some(domain) = self.domains.get_mut(id) else {continue};
            if state.working_counter != domain.last_state.working_counter {
                warn!("domain {}: working counter changed to {}", id, state.working_counter);
            }
            if state.wc_state != domain.last_state.wc_state {
                warn!("domain {}: exchange is {:?}", id, state.wc_state);
            }
            domain.last_state = state;
        }
    }

    /// per-slave online/operational transitions, a dropped slave only goes stale
    fn check_slave_states(&mut self) {
        for slave in self.slaves.iter_mut() {
            let state = self.driver.slave_state(slave.handle);
            if state.online != slave.state.online {
                warn!("slave {}: {}", slave.address, if state.online {"online"} else {"offline"});
            }
            if state.operational != slave.state.operational {
                warn!("slave {}: {}operational", slave.address, if state.operational {""} else {"not "});
            }
            slave.state = state;
        }
    }
}


/**
    cyclic context handed to the run callback

    It exposes what the application may touch from inside a cycle: the clock queries, the
    cooperative stop, and the mailbox request operations. Process data itself is reached
    through the shared device handles, which decode right before the callback and encode
    right after it.
*/
pub struct Cycle<'a, D: Driver> {
    driver: &'a mut D,
    mailbox: &'a mut Mailbox,
    slaves: &'a [SlaveInfo],
    clock: &'a CycleClock,
    running: &'a AtomicBool,
}
impl<D: Driver> Cycle<'_, D> {
    /// number of completed cycles since `run()` started
    pub fn cycles(&self) -> u64 {
        self.clock.cycles()
    }
    /// time of the last completed cycle since `run()` started
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
    /// request the loop to exit once the current cycle completed its flush and exchange
    pub fn stop(&self) {
        self.running.store(false, Release);
    }

    /// start a fresh asynchronous read of the given request
    pub fn initiate_read(&mut self, id: RequestId) -> MasterResult<()> {
        self.mailbox.get_mut(id)
            .ok_or(MasterError::Configuration("unknown sdo request"))?
            .initiate_read(self.driver);
        Ok(())
    }
    /// refresh and return the state of the given request, non-blocking
    pub fn request_state(&mut self, id: RequestId) -> MasterResult<RequestState> {
        Ok(self.mailbox.get_mut(id)
            .ok_or(MasterError::Configuration("unknown sdo request"))?
            .poll(self.driver))
    }
    /// deliver a completed request payload to its owning slave, at most once per completion
    pub fn process_data(&mut self, id: RequestId) -> MasterResult<bool> {
        self.mailbox.get_mut(id)
            .ok_or(MasterError::Configuration("unknown sdo request"))?
            .process_data(self.driver, self.slaves)
    }
    /// read access to an outstanding request
    pub fn request(&self, id: RequestId) -> Option<&SdoRequest> {
        self.mailbox.get(id)
    }
}
