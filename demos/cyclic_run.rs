//! cyclic exchange against a simulated segment: one drive, 1 kHz, stop with ctrl-c

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use etherloop::{
    driver::*,
    slave::{Device, PdoChannel},
    Master, Priority, RtContext, SdoConfigEntry,
    };


/// stand-in segment: echoes the commanded position back as the measured one, one cycle late
#[derive(Default)]
struct SimDriver {
    domains: BTreeMap<DomainId, Vec<PdoEntryRegistration>>,
    images: BTreeMap<DomainId, Vec<u8>>,
    slaves: u32,
    activated: bool,
}
impl Driver for SimDriver {
    fn connect(&mut self, master_id: u32) -> Result<(), DriverError> {
        if master_id != 0 {return Err(DriverError::Unavailable("only master 0 is simulated"))}
        Ok(())
    }
    fn create_domain(&mut self, domain: DomainId) -> Result<(), DriverError> {
        self.domains.insert(domain, Vec::new());
        Ok(())
    }
    fn register_pdo_entry(&mut self, domain: DomainId, entry: &PdoEntryRegistration) -> Result<(), DriverError> {
        self.domains.get_mut(&domain).ok_or(DriverError::Failed("unknown domain"))?.push(entry.clone());
        Ok(())
    }
    fn configure_slave(&mut self, _alias: u16, _position: u16) -> Result<SlaveHandle, DriverError> {
        self.slaves += 1;
        Ok(SlaveHandle(self.slaves as usize - 1))
    }
    fn sdo_download(&mut self, _position: u16, _index: u16, _sub: u8, _data: &[u8]) -> Result<(), etherloop::SdoError> {
        Ok(())
    }
    fn create_sdo_request(&mut self, _slave: SlaveHandle, _index: u16, _sub: u8, _size: usize) -> Result<RequestHandle, DriverError> {
        Ok(RequestHandle(0))
    }
    fn activate(&mut self) -> Result<Vec<DomainLayout>, DriverError> {
        self.activated = true;
        Ok(self.domains.iter()
            .map(|(&id, regs)| {
                let mut bits = 0;
                let placements = regs.iter()
                    .map(|reg| {
                        let placement = PdoPlacement {byte: bits / 8, bit: bits % 8};
                        bits += reg.bits as u32;
                        placement
                    })
                    .collect();
                let size = ((bits + 7) / 8) as usize;
                self.images.insert(id, vec![0; size]);
                DomainLayout {id, size, placements}
            })
            .collect())
    }
    fn read_domain(&mut self, domain: DomainId, data: &mut [u8]) -> Result<(), DriverError> {
        data.copy_from_slice(&self.images[&domain]);
        Ok(())
    }
    fn write_domain(&mut self, domain: DomainId, data: &[u8]) -> Result<(), DriverError> {
        // loop the command back: what was written becomes next cycle's measurement
        self.images.get_mut(&domain).ok_or(DriverError::Failed("unknown domain"))?
            .copy_from_slice(data);
        Ok(())
    }
    fn exchange(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
    fn request_read(&mut self, _request: RequestHandle) {}
    fn request_state(&mut self, _request: RequestHandle) -> etherloop::RequestState {
        etherloop::RequestState::Success
    }
    fn request_data(&mut self, _request: RequestHandle, data: &mut [u8]) -> Result<(), DriverError> {
        data.fill(0);
        Ok(())
    }
    fn master_state(&mut self) -> MasterState {
        MasterState {slaves_responding: self.slaves, link_up: true}
    }
    fn domain_state(&mut self, _domain: DomainId) -> DomainState {
        DomainState {working_counter: self.slaves as u16, wc_state: WorkingCounterState::Complete}
    }
    fn slave_state(&mut self, _slave: SlaveHandle) -> SlaveConfigState {
        SlaveConfigState {online: true, operational: self.activated, al_state: AlState::Operational}
    }
}


/// minimal position drive: one command channel out, one measurement channel in
#[derive(Default)]
struct Drive {
    target: i32,
    position: i32,
}
impl Device for Drive {
    fn channels(&self) -> Vec<PdoChannel> {
        vec![
            PdoChannel {index: 0x607a, sub: 0, bits: 32},
            PdoChannel {index: 0x6064, sub: 0, bits: 32},
        ]
    }
    fn decode(&mut self, data: &[u8], offsets: &[u32], _bit_positions: &[u32]) {
        let at = offsets[1] as usize;
        self.position = i32::from_le_bytes(data[at .. at + 4].try_into().unwrap());
    }
    fn encode(&mut self, data: &mut [u8], offsets: &[u32], _bit_positions: &[u32]) {
        let at = offsets[0] as usize;
        data[at .. at + 4].copy_from_slice(&self.target.to_le_bytes());
    }
}


fn main() {
    env_logger::init();

    let drive = Arc::new(Mutex::new(Drive::default()));

    let mut master = Master::connect(SimDriver::default(), 0).unwrap();
    master.set_frequency(1000.0).unwrap();
    master.add_slave(0, 1, drive.clone()).unwrap();
    master.config_slave_sdo(1, &SdoConfigEntry {index: 0x6060, sub: 0, value: 8, size: 1}).unwrap();
    master.activate().unwrap();

    // elevation needs privileges, run degraded without them
    match RtContext::init(Priority::Realtime) {
        Ok(rt) => rt.catch_interrupt(master.stop_handle()).unwrap(),
        Err(err) => eprintln!("running without realtime scheduling: {}", err),
    }

    let handle = drive.clone();
    master.run(move |cycle| {
        let mut drive = handle.lock().unwrap();
        drive.target += 1000;
        if cycle.cycles() % 1000 == 0 {
            println!("t={:.3}s position={}", cycle.elapsed().as_secs_f64(), drive.position);
        }
        if cycle.cycles() >= 5000 {
            cycle.stop();
        }
    }).unwrap();

    println!("done: {} cycles in {:.3}s", master.elapsed_cycles(), master.elapsed_time().as_secs_f64());
}
