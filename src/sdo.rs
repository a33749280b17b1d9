/*!
    Types to address and configure the slave's dictionary objects (SDO).

    Cyclic process data and SDOs live on different planes: an SDO access is an acknowledged
    mailbox transaction that can take many cycles, so the only SDO operations the controller
    offers are an immediate write during the configuration phase
    ([crate::Master::config_slave_sdo]) and polled asynchronous reads during the cyclic phase
    ([crate::mailbox]).
*/

use core::fmt;
use serde::Deserialize;


/// one configuration value to write in a slave's object dictionary before activation
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SdoConfigEntry {
    /// index of the object in the dictionary
    pub index: u16,
    /// subindex in the object
    #[serde(default)]
    pub sub: u8,
    /// value to write, in host order
    pub value: u32,
    /// byte size of the dictionary entry, 1, 2 or 4
    pub size: u8,
}
impl SdoConfigEntry {
    /// little endian byte rendition of the value, tailed to [size](Self::size)
    pub fn bytes(&self) -> [u8; 4] {
        self.value.to_le_bytes()
    }
}
impl fmt::Display for SdoConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}:{} = {:#x} ({} bytes)", self.index, self.sub, self.value, self.size)
    }
}


/**
    abort code answered by a slave refusing an SDO access

    The values follow ETG.1000.6 5.6.2.7, except [UnknownSlave](Self::UnknownSlave) which is a
    master-local code reported when the addressed position was never configured on this master
    and no slave could be asked at all.
*/
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SdoAbortCode {
    /// SDO protocol timeout
    Timeout = 0x05_04_00_00,
    /// client/server command specifier not valid or unknown
    UnsupportedCommand = 0x05_04_00_01,
    /// unsupported access to an object
    UnsupportedAccess = 0x06_01_00_00,
    /// attempt to read a write only object
    WriteOnly = 0x06_01_00_01,
    /// attempt to write a read only object
    ReadOnly = 0x06_01_00_02,
    /// the object does not exist in the object directory
    InvalidIndex = 0x06_02_00_00,
    /// access failed due to a hardware error
    HardwareError = 0x06_06_00_00,
    /// data type does not match, length of service parameter does not match
    InvalidLength = 0x06_07_00_10,
    /// subindex does not exist
    InvalidSubIndex = 0x06_09_00_11,
    /// value range of parameter exceeded
    ValueOutOfRange = 0x06_09_00_30,
    /// general error
    GeneralError = 0x08_00_00_00,
    /// data cannot be transferred or stored to the application
    Refused = 0x08_00_00_20,
    /// data cannot be stored because of the present device state
    StateRefused = 0x08_00_00_22,
    /// master-local: the addressed position is not configured on this master
    UnknownSlave = 0xff_00_00_01,
}
impl SdoAbortCode {
    /// raw abort code value
    pub fn code(self) -> u32 {self as u32}
    /// the abort concerns the addressed object or subitem
    pub fn object_related(self) -> bool {self.code() >> 24 == 0x06}
    /// the abort comes from the device application rather than the protocol
    pub fn device_related(self) -> bool {self.code() >> 24 == 0x08}
    /// the abort was issued by the master itself, the slave was never reached
    pub fn master_local(self) -> bool {self.code() >> 24 == 0xff}
}
impl fmt::Display for SdoAbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#010x})", self, self.code())
    }
}


/**
    error reported by an SDO access

    The two variants separate the cases the caller must distinguish: a communication failure
    means the request never completed and carries no answer, a rejection means the transaction
    completed and the reason is in the abort code.
*/
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SdoError {
    /// the request could not be transmitted or received no answer
    Communication(&'static str),
    /// the access was refused, with the rejection reason
    Rejected(SdoAbortCode),
}
impl SdoError {
    /// the abort code if the access was refused, [None] on a communication failure
    pub fn abort_code(&self) -> Option<SdoAbortCode> {
        match self {
            Self::Rejected(code) => Some(*code),
            Self::Communication(_) => None,
        }
    }
}
impl fmt::Display for SdoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Communication(msg) => write!(f, "sdo communication failure: {}", msg),
            Self::Rejected(code) => write!(f, "sdo access rejected: {}", code),
        }
    }
}
impl std::error::Error for SdoError {}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_code_classes() {
        assert!(SdoAbortCode::InvalidIndex.object_related());
        assert!(SdoAbortCode::StateRefused.device_related());
        assert!(SdoAbortCode::UnknownSlave.master_local());
        assert!(! SdoAbortCode::Timeout.object_related());
    }

    #[test]
    fn config_entry_bytes() {
        let entry = SdoConfigEntry {index: 0x6060, sub: 0, value: 0x0308, size: 2};
        assert_eq!(&entry.bytes()[.. entry.size as usize], &[0x08, 0x03]);
    }

    #[test]
    fn sdo_error_abort_code() {
        assert_eq!(
            SdoError::Rejected(SdoAbortCode::UnknownSlave).abort_code(),
            Some(SdoAbortCode::UnknownSlave),
            );
        assert_eq!(SdoError::Communication("no answer").abort_code(), None);
    }
}
