/*!
    Declarative configuration surface, loadable from TOML.

    Everything here is applied strictly before activation: the loop frequency, the supervision
    period and the initial object dictionary values. A typical file:

    ```toml
    frequency = 1000.0
    check_state_frequency = 10

    [[sdo]]
    position = 1
    index = 0x6060
    value = 8
    size = 1
    ```
*/

use serde::Deserialize;

use crate::sdo::SdoConfigEntry;
use crate::error::{MasterError, MasterResult};


fn default_check_state_frequency() -> u32 {10}

/// one initial dictionary value, addressed to a slave position
#[derive(Clone, Debug, Deserialize)]
pub struct SdoConfigItem {
    /// topological position of the addressed slave
    pub position: u16,
    #[serde(flatten)]
    pub entry: SdoConfigEntry,
}

/// configuration of one master controller
#[derive(Clone, Debug, Deserialize)]
pub struct MasterConfig {
    /// identifier of the underlying master instance to claim
    #[serde(default)]
    pub master_id: u32,
    /// control loop frequency in Hz
    pub frequency: f64,
    /// period, in cycles, of the master/slave/domain health checks
    #[serde(default = "default_check_state_frequency")]
    pub check_state_frequency: u32,
    /// dictionary values written before activation, in order
    #[serde(default)]
    pub sdo: Vec<SdoConfigItem>,
}
impl MasterConfig {
    /// parse and validate a TOML rendition
    pub fn from_toml(text: &str) -> MasterResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|_| MasterError::Configuration("unparsable master configuration"))?;
        config.validate()?;
        Ok(config)
    }

    /// read, parse and validate a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> MasterResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| MasterError::Configuration("unreadable master configuration file"))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> MasterResult<()> {
        if ! (self.frequency > 0.) {
            return Err(MasterError::Configuration("frequency must be strictly positive"));
        }
        if self.check_state_frequency == 0 {
            return Err(MasterError::Configuration("check_state_frequency must be at least 1"));
        }
        for item in &self.sdo {
            if ! matches!(item.entry.size, 1 | 2 | 4) {
                return Err(MasterError::Configuration("sdo value size must be 1, 2 or 4 bytes"));
            }
        }
        Ok(())
    }
}
