//! Acquisition-card settings shared by every protocol.
//!
//! The card is described by environment variables, set once per rig:
//!
//! | variable                  | meaning                                   | default |
//! |---------------------------|-------------------------------------------|---------|
//! | `COMEDI_DEVICE`           | device file of the card                   |         |
//! | `AI_SUBDEVICE`            | analog input subdevice                    |         |
//! | `AO_SUBDEVICE`            | analog output subdevice                   |         |
//! | `AI_CONVERSION_FACTOR_CC` | input conversion factor (current clamp)   |         |
//! | `AO_CONVERSION_FACTOR_CC` | output conversion factor (current clamp)  |         |
//! | `RANGE`                   | analog input range, e.g. `[-10,+10]`      |         |
//! | `GROUND_REFERENCE`        | `GRSE` or `NRSE`                          |         |
//! | `AI_CHANNEL`              | channel the membrane potential is read on | 0       |
//! | `AO_CHANNEL`              | channel the current is injected on        | 0       |
//! | `SAMPLING_RATE`           | sampling rate, in Hz                      | 20000   |

use std::str::FromStr;

use lcg_backend::{GroundReference, InputRange, RealNeuronAttrs};
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};

pub const DEFAULT_SAMPLING_RATE: f64 = 20000.0;
pub const KERNEL_FILE: &str = "kernel.dat";

#[derive(Debug, Clone, PartialEq)]
pub struct DaqSettings {
    pub device_file: String,
    pub input_subdevice: u32,
    pub output_subdevice: u32,
    pub input_conversion_factor: f64,
    pub output_conversion_factor: f64,
    pub input_range: InputRange,
    pub reference: GroundReference,
    pub ai_channel: u32,
    pub ao_channel: u32,
    pub sampling_rate: f64,
}

struct Lookup<F: Fn(&str) -> Option<String>> {
    get: F,
}

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn required(&self, name: &'static str) -> ProtocolResult<String> {
        (self.get)(name).ok_or(ProtocolError::MissingSetting { name })
    }

    fn parse<T>(&self, name: &'static str, value: String) -> ProtocolResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let parsed = value.trim().parse::<T>();
        parsed.map_err(|e| ProtocolError::InvalidSetting {
            name,
            reason: e.to_string(),
            value,
        })
    }

    fn parsed<T>(&self, name: &'static str) -> ProtocolResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.required(name)?;
        self.parse(name, value)
    }

    fn parsed_or<T>(&self, name: &'static str, default: T) -> ProtocolResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.get)(name) {
            Some(value) => self.parse(name, value),
            None => Ok(default),
        }
    }
}

impl DaqSettings {
    pub fn from_env() -> ProtocolResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the settings through `get`, which maps a variable name to its value.
    ///
    /// # Example
    /// ```
    /// use lcgexp_backend::settings::DaqSettings;
    /// use maplit::hashmap;
    ///
    /// let env = hashmap! {
    ///     "COMEDI_DEVICE" => "/dev/comedi0",
    ///     "AI_SUBDEVICE" => "0",
    ///     "AO_SUBDEVICE" => "1",
    ///     "AI_CONVERSION_FACTOR_CC" => "20",
    ///     "AO_CONVERSION_FACTOR_CC" => "0.0025",
    ///     "RANGE" => "[-10,+10]",
    ///     "GROUND_REFERENCE" => "GRSE",
    /// };
    /// let settings = DaqSettings::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap();
    /// assert_eq!(settings.output_subdevice, 1);
    /// assert_eq!(settings.sampling_rate, 20000.0);
    /// ```
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> ProtocolResult<Self> {
        let env = Lookup { get };
        let settings = DaqSettings {
            device_file: env.required("COMEDI_DEVICE")?,
            input_subdevice: env.parsed("AI_SUBDEVICE")?,
            output_subdevice: env.parsed("AO_SUBDEVICE")?,
            input_conversion_factor: env.parsed("AI_CONVERSION_FACTOR_CC")?,
            output_conversion_factor: env.parsed("AO_CONVERSION_FACTOR_CC")?,
            input_range: env.parsed("RANGE")?,
            reference: env.parsed("GROUND_REFERENCE")?,
            ai_channel: env.parsed_or("AI_CHANNEL", 0)?,
            ao_channel: env.parsed_or("AO_CHANNEL", 0)?,
            sampling_rate: env.parsed_or("SAMPLING_RATE", DEFAULT_SAMPLING_RATE)?,
        };
        if !(settings.sampling_rate > 0.0) {
            return Err(ProtocolError::InvalidSetting {
                name: "SAMPLING_RATE",
                value: settings.sampling_rate.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        debug!(device = %settings.device_file, ai = settings.ai_channel, ao = settings.ao_channel, "loaded DAQ settings");
        Ok(settings)
    }

    /// The recorded neuron, as used by every protocol: spike threshold at -20 mV, initial
    /// potential at -65 mV, electrode kernel in `kernel.dat`.
    pub fn real_neuron(&self) -> RealNeuronAttrs {
        RealNeuronAttrs {
            device_file: self.device_file.clone(),
            input_subdevice: self.input_subdevice,
            output_subdevice: self.output_subdevice,
            read_channel: self.ai_channel,
            write_channel: self.ao_channel,
            input_conversion_factor: self.input_conversion_factor,
            output_conversion_factor: self.output_conversion_factor,
            input_range: self.input_range,
            reference: self.reference,
            spike_threshold: -20.0,
            initial_value: -65.0,
            kernel_file: Some(KERNEL_FILE.to_string()),
            hold_last_value: false,
            adaptive_threshold: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;
    use std::collections::HashMap;

    fn rig() -> HashMap<&'static str, &'static str> {
        hashmap! {
            "COMEDI_DEVICE" => "/dev/comedi0",
            "AI_SUBDEVICE" => "0",
            "AO_SUBDEVICE" => "1",
            "AI_CONVERSION_FACTOR_CC" => "20",
            "AO_CONVERSION_FACTOR_CC" => "0.0025",
            "RANGE" => "+-5",
            "GROUND_REFERENCE" => "NRSE",
            "AO_CHANNEL" => "2",
        }
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> ProtocolResult<DaqSettings> {
        DaqSettings::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    mod loading {
        use super::*;

        #[test]
        fn defaults_and_overrides() {
            let settings = load(&rig()).unwrap();
            assert_eq!(settings.input_range, InputRange::PlusMinusFive);
            assert_eq!(settings.reference, GroundReference::Nrse);
            assert_eq!(settings.ai_channel, 0);
            assert_eq!(settings.ao_channel, 2);
            assert_eq!(settings.real_neuron().write_channel, 2);
        }

        #[test]
        fn missing_variable() {
            let mut env = rig();
            env.remove("AO_SUBDEVICE");
            match load(&env) {
                Err(ProtocolError::MissingSetting { name }) => assert_eq!(name, "AO_SUBDEVICE"),
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn invalid_variable() {
            let mut env = rig();
            env.insert("GROUND_REFERENCE", "DIFF");
            assert!(matches!(
                load(&env),
                Err(ProtocolError::InvalidSetting { name: "GROUND_REFERENCE", .. })
            ));
            let mut env = rig();
            env.insert("SAMPLING_RATE", "-1");
            assert!(matches!(
                load(&env),
                Err(ProtocolError::InvalidSetting { name: "SAMPLING_RATE", .. })
            ));
        }
    }
}
