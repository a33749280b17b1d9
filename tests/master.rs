//! end-to-end tests of the controller lifecycle against a scripted driver

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etherloop::{
    driver::{
        Driver, DriverError, DomainId, DomainLayout, DomainState, MasterState,
        PdoEntryRegistration, PdoPlacement, RequestHandle, SlaveConfigState, SlaveHandle,
        WorkingCounterState, AlState,
        },
    slave::{Device, PdoChannel, SharedDevice},
    Master, MasterError, ActivationError, RequestState, SdoAbortCode, SdoConfigEntry, SdoError,
    };


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Read,
    Write,
    Exchange,
}

struct MockRequest {
    state: RequestState,
    /// state queries consumed before a busy request reaches a terminal state
    countdown: u32,
    payload: Vec<u8>,
}

/// scripted in-memory driver, every call is recorded
#[derive(Default)]
struct MockDriver {
    connected: Option<u32>,
    domains: BTreeMap<DomainId, Vec<PdoEntryRegistration>>,
    slaves: Vec<(u16, u16)>,
    requests: Vec<MockRequest>,
    activated: bool,
    /// byte served for every input position by read_domain
    input: u8,
    /// queries a busy request stays busy for
    request_latency: u32,
    /// complete busy requests with Error instead of Success
    fail_requests: bool,
    ops: Vec<Op>,
    exchanges: u64,
    master_state_queries: u64,
    downloads: Vec<(u16, u16, u8, Vec<u8>)>,
    last_output: Vec<u8>,
}
impl MockDriver {
    fn new() -> Self {
        Self {
            input: 0x5a,
            request_latency: 1,
            .. Default::default()
        }
    }
}
impl Driver for MockDriver {
    fn connect(&mut self, master_id: u32) -> Result<(), DriverError> {
        if master_id != 0 {
            return Err(DriverError::Unavailable("no such master instance"));
        }
        self.connected = Some(master_id);
        Ok(())
    }
    fn create_domain(&mut self, domain: DomainId) -> Result<(), DriverError> {
        self.domains.insert(domain, Vec::new());
        Ok(())
    }
    fn register_pdo_entry(&mut self, domain: DomainId, entry: &PdoEntryRegistration) -> Result<(), DriverError> {
        self.domains.get_mut(&domain)
            .ok_or(DriverError::Failed("registration in an unknown domain"))?
            .push(entry.clone());
        Ok(())
    }
    fn configure_slave(&mut self, alias: u16, position: u16) -> Result<SlaveHandle, DriverError> {
        self.slaves.push((alias, position));
        Ok(SlaveHandle(self.slaves.len() - 1))
    }
    fn sdo_download(&mut self, position: u16, index: u16, sub: u8, data: &[u8]) -> Result<(), SdoError> {
        self.downloads.push((position, index, sub, data.to_vec()));
        Ok(())
    }
    fn create_sdo_request(&mut self, _slave: SlaveHandle, _index: u16, _sub: u8, size: usize) -> Result<RequestHandle, DriverError> {
        self.requests.push(MockRequest {
            state: RequestState::Unused,
            countdown: 0,
            payload: (0 .. size).map(|i| 0x10 + i as u8).collect(),
        });
        Ok(RequestHandle(self.requests.len() - 1))
    }
    fn activate(&mut self) -> Result<Vec<DomainLayout>, DriverError> {
        self.activated = true;
        Ok(self.domains.iter()
            .map(|(&id, regs)| {
                let mut bits = 0u32;
                let placements = regs.iter()
                    .map(|reg| {
                        let placement = PdoPlacement {byte: bits / 8, bit: bits % 8};
                        bits += reg.bits as u32;
                        placement
                    })
                    .collect();
                DomainLayout {id, size: ((bits + 7) / 8) as usize, placements}
            })
            .collect())
    }
    fn read_domain(&mut self, _domain: DomainId, data: &mut [u8]) -> Result<(), DriverError> {
        self.ops.push(Op::Read);
        data.fill(self.input);
        Ok(())
    }
    fn write_domain(&mut self, _domain: DomainId, data: &[u8]) -> Result<(), DriverError> {
        self.ops.push(Op::Write);
        self.last_output = data.to_vec();
        Ok(())
    }
    fn exchange(&mut self) -> Result<(), DriverError> {
        self.ops.push(Op::Exchange);
        self.exchanges += 1;
        Ok(())
    }
    fn request_read(&mut self, request: RequestHandle) {
        let req = &mut self.requests[request.0];
        req.state = RequestState::Busy;
        req.countdown = self.request_latency;
    }
    fn request_state(&mut self, request: RequestHandle) -> RequestState {
        let fail = self.fail_requests;
        let req = &mut self.requests[request.0];
        if req.state == RequestState::Busy {
            if req.countdown > 0 {
                req.countdown -= 1;
            } else {
                req.state = if fail {RequestState::Error} else {RequestState::Success};
            }
        }
        req.state
    }
    fn request_data(&mut self, request: RequestHandle, data: &mut [u8]) -> Result<(), DriverError> {
        let req = &self.requests[request.0];
        data.copy_from_slice(&req.payload[.. data.len()]);
        Ok(())
    }
    fn master_state(&mut self) -> MasterState {
        self.master_state_queries += 1;
        MasterState {
            slaves_responding: self.slaves.len() as u32,
            link_up: true,
        }
    }
    fn domain_state(&mut self, _domain: DomainId) -> DomainState {
        DomainState {
            working_counter: self.slaves.len() as u16,
            wc_state: WorkingCounterState::Complete,
        }
    }
    fn slave_state(&mut self, _slave: SlaveHandle) -> SlaveConfigState {
        SlaveConfigState {
            online: true,
            operational: self.activated,
            al_state: if self.activated {AlState::Operational} else {AlState::Init},
        }
    }
}


/// device recording everything the controller hands it
struct Probe {
    channels: Vec<PdoChannel>,
    decoded: Vec<u8>,
    decodes: u64,
    output: u8,
    sdo_values: Vec<(u16, Vec<u8>)>,
}
impl Probe {
    fn new() -> Self {
        Self {
            channels: vec![
                PdoChannel {index: 0x6041, sub: 0, bits: 16},
                PdoChannel {index: 0x6064, sub: 0, bits: 8},
            ],
            decoded: Vec::new(),
            decodes: 0,
            output: 0x77,
            sdo_values: Vec::new(),
        }
    }
}
impl Device for Probe {
    fn channels(&self) -> Vec<PdoChannel> {
        self.channels.clone()
    }
    fn decode(&mut self, data: &[u8], offsets: &[u32], _bit_positions: &[u32]) {
        self.decodes += 1;
        self.decoded = offsets.iter().map(|&offset| data[offset as usize]).collect();
    }
    fn encode(&mut self, data: &mut [u8], offsets: &[u32], _bit_positions: &[u32]) {
        for &offset in offsets {
            data[offset as usize] = self.output;
        }
    }
    fn on_sdo_value(&mut self, index: u16, value: &[u8]) {
        self.sdo_values.push((index, value.to_vec()));
    }
}

fn probed_master() -> (Master<MockDriver>, Arc<Mutex<Probe>>) {
    let probe = Arc::new(Mutex::new(Probe::new()));
    let device: SharedDevice = probe.clone();
    let mut master = Master::connect(MockDriver::new(), 0).unwrap();
    master.set_frequency(10_000.0).unwrap();
    master.add_slave(0, 1, device).unwrap();
    (master, probe)
}


#[test]
fn connect_rejects_unavailable_master() {
    let refused = Master::connect(MockDriver::new(), 7);
    assert!(matches!(refused, Err(MasterError::Connection(_))));
}

#[test]
fn activation_requires_process_data() {
    // nothing added at all
    let mut master = Master::connect(MockDriver::new(), 0).unwrap();
    assert!(matches!(
        master.activate(),
        Err(MasterError::Activation(ActivationError::NoProcessData)),
        ));

    // one slave with one non-empty domain activates fine
    let (mut master, _probe) = probed_master();
    master.activate().unwrap();
}

#[test]
fn activation_happens_exactly_once() {
    let (mut master, _probe) = probed_master();
    master.activate().unwrap();
    assert!(matches!(master.activate(), Err(MasterError::Configuration(_))));
}

#[test]
fn registration_is_closed_after_activation() {
    let (mut master, _probe) = probed_master();
    master.add_slave(0, 2, etherloop::slave::shared(Probe::new())).unwrap();
    master.activate().unwrap();

    let refused = master.add_slave(0, 3, etherloop::slave::shared(Probe::new()));
    assert!(matches!(refused, Err(MasterError::Configuration(_))));
}

#[test]
fn duplicate_addressing_is_refused() {
    let (mut master, _probe) = probed_master();
    let refused = master.add_slave(0, 1, etherloop::slave::shared(Probe::new()));
    assert!(matches!(refused, Err(MasterError::Configuration(_))));
}

#[test]
fn run_requires_activation() {
    let (mut master, _probe) = probed_master();
    assert!(matches!(master.run(|_| ()), Err(MasterError::Configuration(_))));
}

#[test]
fn frequency_derives_the_interval() {
    let (mut master, _probe) = probed_master();
    master.set_frequency(1000.0).unwrap();
    assert_eq!(master.interval(), Duration::from_micros(1000));
    master.set_frequency(7.0).unwrap();
    assert_eq!(master.interval(), Duration::from_nanos(142_857_143));
    assert!(master.set_frequency(0.0).is_err());
}

#[test]
fn loop_counts_cycles() {
    let (mut master, _probe) = probed_master();
    master.activate().unwrap();
    master.run(|cycle| {
        if cycle.cycles() == 24 {
            cycle.stop();
        }
    }).unwrap();
    assert_eq!(master.elapsed_cycles(), 25);
    assert_eq!(master.driver().exchanges, 25);
    // discrete time derives from the cycle count
    assert!(master.elapsed_time() >= Duration::from_micros(24 * 100));
}

#[test]
fn supervision_fires_on_the_configured_period() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut master, _probe) = probed_master();
    // the default period is 10 cycles
    master.activate().unwrap();
    master.run(|cycle| {
        if cycle.cycles() == 99 {
            cycle.stop();
        }
    }).unwrap();
    assert_eq!(master.elapsed_cycles(), 100);
    assert_eq!(master.driver().master_state_queries, 10);
}

#[test]
fn stop_lets_the_cycle_complete() {
    let (mut master, _probe) = probed_master();
    master.activate().unwrap();
    master.run(|cycle| cycle.stop()).unwrap();

    // the stopping cycle still flushed and exchanged, in order
    assert_eq!(master.elapsed_cycles(), 1);
    assert_eq!(master.driver().ops, vec![Op::Read, Op::Write, Op::Exchange]);
}

#[test]
fn devices_decode_and_encode_at_their_offsets() {
    let (mut master, probe) = probed_master();
    master.activate().unwrap();
    master.run(|cycle| cycle.stop()).unwrap();

    let probe = probe.lock().unwrap();
    // 16 + 8 bits mapped contiguously: channel bytes at offsets 0 and 2
    assert_eq!(probe.decodes, 1);
    assert_eq!(probe.decoded, vec![0x5a, 0x5a]);
    assert_eq!(master.driver().last_output, vec![0x77, 0x5a, 0x77]);
}

#[test]
fn sdo_config_reaches_the_driver() {
    let (mut master, _probe) = probed_master();
    let entry = SdoConfigEntry {index: 0x6060, sub: 0, value: 8, size: 1};
    master.config_slave_sdo(1, &entry).unwrap();
    assert_eq!(master.driver().downloads, vec![(1, 0x6060, 0, vec![8])]);
}

#[test]
fn sdo_config_rejects_an_unknown_slave() {
    let (mut master, _probe) = probed_master();
    let entry = SdoConfigEntry {index: 0x6060, sub: 0, value: 8, size: 1};
    let refused = master.config_slave_sdo(9, &entry);
    assert_eq!(refused, Err(SdoError::Rejected(SdoAbortCode::UnknownSlave)));
    assert_eq!(refused.unwrap_err().abort_code(), Some(SdoAbortCode::UnknownSlave));
}

#[test]
fn sdo_config_is_closed_after_activation() {
    let (mut master, _probe) = probed_master();
    master.activate().unwrap();
    let entry = SdoConfigEntry {index: 0x6060, sub: 0, value: 8, size: 1};
    assert!(matches!(
        master.config_slave_sdo(1, &entry),
        Err(SdoError::Communication(_)),
        ));
}

#[test]
fn sdo_request_walks_its_state_machine() {
    let (mut master, probe) = probed_master();
    let request = master.sdo_request(1, 0x1018, 0, 4).unwrap();

    // nothing moves before initiate_read
    assert!(master.request(request).unwrap().is_unused());
    assert_eq!(master.request_state(request).unwrap(), RequestState::Unused);
    assert!(master.process_data(request).is_err());

    // initiate_read is the only trigger
    master.initiate_read(request).unwrap();
    assert_eq!(master.request(request).unwrap().state(), RequestState::Busy);
    assert!(master.process_data(request).is_err());

    // one poll of latency, then completion
    assert_eq!(master.request_state(request).unwrap(), RequestState::Busy);
    assert_eq!(master.request_state(request).unwrap(), RequestState::Success);
    assert!(master.request(request).unwrap().is_complete());

    // delivered exactly once per completion
    assert_eq!(master.process_data(request).unwrap(), true);
    assert_eq!(master.process_data(request).unwrap(), false);
    {
        let probe = probe.lock().unwrap();
        assert_eq!(probe.sdo_values, vec![(0x1018, vec![0x10, 0x11, 0x12, 0x13])]);
    }

    // a fresh read re-arms the delivery
    master.initiate_read(request).unwrap();
    assert!(master.process_data(request).is_err());
    master.request_state(request).unwrap();
    assert_eq!(master.request_state(request).unwrap(), RequestState::Success);
    assert_eq!(master.process_data(request).unwrap(), true);
    assert_eq!(probe.lock().unwrap().sdo_values.len(), 2);
}

#[test]
fn failed_sdo_request_never_delivers() {
    let probe = Arc::new(Mutex::new(Probe::new()));
    let device: SharedDevice = probe.clone();
    let mut driver = MockDriver::new();
    driver.fail_requests = true;
    driver.request_latency = 0;

    let mut master = Master::connect(driver, 0).unwrap();
    master.add_slave(0, 1, device).unwrap();
    let request = master.sdo_request(1, 0x1018, 0, 4).unwrap();

    master.initiate_read(request).unwrap();
    assert_eq!(master.request_state(request).unwrap(), RequestState::Error);
    assert!(master.process_data(request).is_err());
    assert!(probe.lock().unwrap().sdo_values.is_empty());
}

#[test]
fn requests_are_created_before_activation_only() {
    let (mut master, _probe) = probed_master();
    master.activate().unwrap();
    assert!(matches!(
        master.sdo_request(1, 0x1018, 0, 4),
        Err(MasterError::Configuration(_)),
        ));
}

#[test]
fn requests_can_be_driven_from_the_callback() {
    let (mut master, probe) = probed_master();
    let request = master.sdo_request(1, 0x1018, 0, 2).unwrap();
    master.activate().unwrap();

    master.run(move |cycle| {
        match cycle.cycles() {
            0 => cycle.initiate_read(request).unwrap(),
            _ => {
                if cycle.request(request).unwrap().is_complete() {
                    cycle.process_data(request).unwrap();
                    cycle.stop();
                }
            }
        }
    }).unwrap();

    assert_eq!(probe.lock().unwrap().sdo_values, vec![(0x1018, vec![0x10, 0x11])]);
}

#[test]
fn update_exchanges_one_domain() {
    let (mut master, probe) = probed_master();
    master.activate().unwrap();
    master.update(etherloop::DEFAULT_DOMAIN).unwrap();
    assert_eq!(master.driver().ops, vec![Op::Read, Op::Write, Op::Exchange]);
    assert_eq!(probe.lock().unwrap().decodes, 1);
}
