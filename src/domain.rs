/*!
    This module provides the registry of process data domains and their memory layout.

    A domain is a contiguous process data image exchanged as one block every cycle. Its layout
    is built in two phases:

    - during configuration, each added slave appends its channels to the domain's registration
      table. The table is ordered and append only, and an [Entry] is pre-allocated for the
      slave with one offset slot per channel.
    - at activation, the driver computes where every record lands in the image
      ([crate::driver::DomainLayout]) and the registry distributes those placements into the
      entries. From that point the tables and offset arrays are frozen, mutating them would
      make every computed offset meaningless.

    During the cyclic phase the registry only hands out the image buffers, the offsets are read
    by the devices themselves.
*/

use std::collections::BTreeMap;

use crate::{
    driver::{DomainId, DomainLayout, DomainState, PdoEntryRegistration},
    slave::{PdoChannel, SlaveAddress},
    error::{MasterError, MasterResult, ActivationError},
    };


/// offsets of one slave's channels in a domain image
///
/// The two arrays are parallel and sized exactly to the number of channels the slave
/// registered in this domain. Both are zeroed until activation and read-only after it.
pub struct Entry {
    /// index of the slave in the master's registry
    pub(crate) slave: usize,
    /// byte offset of each channel in the domain image
    pub(crate) offset: Box<[u32]>,
    /// bit position of each channel inside its byte
    pub(crate) bit_position: Box<[u32]>,
}
impl Entry {
    /// index of the owning slave in the master's registry
    pub fn slave(&self) -> usize {self.slave}
    /// number of channels this entry covers
    pub fn num_pdos(&self) -> usize {self.offset.len()}
    pub fn offsets(&self) -> &[u32] {&self.offset}
    pub fn bit_positions(&self) -> &[u32] {&self.bit_position}
}

/// one process data domain
pub struct Domain {
    /// registration table, append only until activation and untouched after
    pub(crate) regs: Vec<PdoEntryRegistration>,
    /// process data image, empty until activation
    pub(crate) data: Vec<u8>,
    /// per-slave offset records, in registration order
    pub(crate) entries: Vec<Entry>,
    /// last observed exchange state, refreshed by supervision
    pub(crate) last_state: DomainState,
}
impl Domain {
    fn new() -> Self {
        Self {
            regs: Vec::new(),
            data: Vec::new(),
            entries: Vec::new(),
            last_state: DomainState::default(),
        }
    }
    /// the registration table
    pub fn registrations(&self) -> &[PdoEntryRegistration] {&self.regs}
    /// per-slave offset records
    pub fn entries(&self) -> &[Entry] {&self.entries}
    /// the process data image, empty before activation
    pub fn data(&self) -> &[u8] {&self.data}
    /// last observed exchange state
    pub fn state(&self) -> DomainState {self.last_state}
}

/// id-indexed registry of value-owned domains
pub struct DomainRegistry {
    domains: BTreeMap<DomainId, Domain>,
    frozen: bool,
}
impl DomainRegistry {
    pub(crate) fn new() -> Self {
        Self {
            domains: BTreeMap::new(),
            frozen: false,
        }
    }

    pub fn contains(&self, id: DomainId) -> bool {
        self.domains.contains_key(&id)
    }
    pub fn get(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(&id)
    }
    pub(crate) fn get_mut(&mut self, id: DomainId) -> Option<&mut Domain> {
        self.domains.get_mut(&id)
    }
    /// domain ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item=DomainId> + '_ {
        self.domains.keys().copied()
    }
    /// whether activation froze the registration tables
    pub fn is_frozen(&self) -> bool {self.frozen}
    /// true when no domain holds any registration
    pub fn is_empty(&self) -> bool {
        self.domains.values().all(|domain| domain.regs.is_empty())
    }

    /// append one slave's channels to a domain table and pre-allocate its entry
    ///
    /// succeeds unconditionally before activation, fails unconditionally after
    pub(crate) fn register(
        &mut self,
        id: DomainId,
        slave: usize,
        address: SlaveAddress,
        channels: &[PdoChannel],
    ) -> MasterResult<()> {
        if self.frozen {
            return Err(MasterError::Configuration("domain registration is closed after activation"));
        }
        let domain = self.domains.entry(id).or_insert_with(Domain::new);
        for channel in channels {
            domain.regs.push(PdoEntryRegistration {
                alias: address.alias,
                position: address.position,
                index: channel.index,
                sub: channel.sub,
                bits: channel.bits,
            });
        }
        domain.entries.push(Entry {
            slave,
            offset: vec![0; channels.len()].into_boxed_slice(),
            bit_position: vec![0; channels.len()].into_boxed_slice(),
        });
        Ok(())
    }

    /// distribute the driver-computed placements into the entries and freeze the layout
    pub(crate) fn finalize(&mut self, layouts: &[DomainLayout]) -> MasterResult<()> {
        for (&id, domain) in self.domains.iter_mut() {
            let layout = layouts.iter()
                .find(|layout| layout.id == id)
                .ok_or(ActivationError::LayoutMismatch(id))?;
            if layout.placements.len() != domain.regs.len() {
                return Err(ActivationError::LayoutMismatch(id).into());
            }
            domain.data = vec![0; layout.size];
            let mut placements = layout.placements.iter();
            for entry in domain.entries.iter_mut() {
                for i in 0 .. entry.offset.len() {
                    // cannot run dry: placements cover the table and entries partition it
                    let placement = placements.next()
                        .ok_or(ActivationError::LayoutMismatch(id))?;
                    entry.offset[i] = placement.byte;
                    entry.bit_position[i] = placement.bit;
                }
            }
        }
        self.frozen = true;
        Ok(())
    }
}
