use serde::{Serialize, Serializer};
use std::hash::Hash;

use super::constants::{BIAS_CHANNELS_PER_MODULE, MAX_RESISTOR_SETTING, PULSER_CHANNELS};
use super::error::ValidationError;

const LED_GROUP_MIN: u32 = 100_000_000;
const LED_GROUP_MAX: u32 = 199_999_999;

/// Pulser setting decoded from a LED group id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PulserSetting {
    /// 1-based pulser output
    pub channel: u16,
    pub series: u16,
    pub parallel: u16,
}

/// LED group identifier, encoded as the 9-digit decimal 1CCSSSPPP
/// (pulser channel CC, series resistor SSS, parallel resistor PPP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LedGroupId(pub u32);

impl LedGroupId {
    pub fn decode(&self) -> Result<PulserSetting, ValidationError> {
        if !(LED_GROUP_MIN..=LED_GROUP_MAX).contains(&self.0) {
            return Err(ValidationError::LedGroupEncoding(self.0));
        }
        let channel = ((self.0 / 1_000_000) % 100) as u16;
        let series = ((self.0 / 1_000) % 1_000) as u16;
        let parallel = (self.0 % 1_000) as u16;

        if channel == 0 || channel as usize > PULSER_CHANNELS {
            return Err(ValidationError::PulserChannel(channel));
        }
        if series > MAX_RESISTOR_SETTING {
            return Err(ValidationError::ResistorSetting(series));
        }
        if parallel > MAX_RESISTOR_SETTING {
            return Err(ValidationError::ResistorSetting(parallel));
        }
        Ok(PulserSetting {
            channel,
            series,
            parallel,
        })
    }
}

/// A SiPM bias supply output: module number and 1-based channel within the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BiasChannelId {
    pub module: u16,
    pub channel: u16,
}

impl BiasChannelId {
    pub fn new(module: u16, channel: u16, modules: u16) -> Result<Self, ValidationError> {
        if channel == 0 || channel > BIAS_CHANNELS_PER_MODULE {
            return Err(ValidationError::BiasChannel(channel));
        }
        if module >= modules {
            return Err(ValidationError::BiasModule(module));
        }
        Ok(Self { module, channel })
    }

    /// Unique number for this bias output
    pub fn uuid(&self) -> u32 {
        generate_uuid(self.module, self.channel)
    }
}

// The uuid is unique by construction, so it is the only thing hashed
impl Hash for BiasChannelId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid().hash(state)
    }
}

/// An ADC64 digitizer input. Serializes as `[adc, channel]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdcChannelId {
    pub adc: u16,
    pub channel: u16,
}

impl Serialize for AdcChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.adc, self.channel).serialize(serializer)
    }
}

/// Generate a unique id number for a bias module/channel pair
pub fn generate_uuid(module: u16, channel: u16) -> u32 {
    (channel as u32) + (module as u32) * 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_led_group() {
        let setting = LedGroupId(103_045_200).decode().unwrap();
        assert_eq!(
            setting,
            PulserSetting {
                channel: 3,
                series: 45,
                parallel: 200
            }
        );
    }

    #[test]
    fn test_led_group_rejections() {
        assert_eq!(
            LedGroupId(3_045_200).decode(),
            Err(ValidationError::LedGroupEncoding(3_045_200))
        );
        assert_eq!(
            LedGroupId(117_000_000).decode(),
            Err(ValidationError::PulserChannel(17))
        );
        assert_eq!(
            LedGroupId(100_010_010).decode(),
            Err(ValidationError::PulserChannel(0))
        );
        assert_eq!(
            LedGroupId(101_256_000).decode(),
            Err(ValidationError::ResistorSetting(256))
        );
        assert_eq!(
            LedGroupId(101_000_999).decode(),
            Err(ValidationError::ResistorSetting(999))
        );
    }

    #[test]
    fn test_bias_channel_range() {
        assert!(BiasChannelId::new(0, 1, 4).is_ok());
        assert!(BiasChannelId::new(3, 128, 4).is_ok());
        assert_eq!(
            BiasChannelId::new(0, 0, 4),
            Err(ValidationError::BiasChannel(0))
        );
        assert_eq!(
            BiasChannelId::new(0, 129, 4),
            Err(ValidationError::BiasChannel(129))
        );
        assert_eq!(
            BiasChannelId::new(4, 1, 4),
            Err(ValidationError::BiasModule(4))
        );
        assert_eq!(BiasChannelId::new(2, 17, 4).unwrap().uuid(), 2_017);
    }

    #[test]
    fn test_adc_channel_serializes_as_pair() {
        let id = AdcChannelId { adc: 1, channel: 63 };
        assert_eq!(serde_json::to_string(&id).unwrap(), "[1,63]");
    }
}
