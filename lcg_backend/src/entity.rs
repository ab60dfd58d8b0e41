//! Typed entities of a configuration document.
//!
//! Every [`Entity`] has a caller-assigned id, an ordered set of connections (ids of the entities it
//! routes its output to) and an [`EntityKind`] holding the fixed attribute set of its type.
//! Attributes are validated when the entity is built, so a malformed value is rejected here rather
//! than by the external executable.
//!
//! | kind                                  | tag                       | attributes                          |
//! |---------------------------------------|---------------------------|-------------------------------------|
//! | [`EntityKind::Recorder`]              | `H5Recorder`              | `compress`                          |
//! | [`EntityKind::RealNeuron`]            | `RealNeuron`              | see [`RealNeuronAttrs`]             |
//! | [`EntityKind::Waveform`]              | `Waveform`                | `filename`, `units`, `triggered`    |
//! | [`EntityKind::ConductanceStimulus`]   | `ConductanceStimulus`     | `E`                                 |
//! | [`EntityKind::NmdaConductanceStimulus`] | `NMDAConductanceStimulus` | `E`, `K1`, `K2`                   |
//! | [`EntityKind::OrnsteinUhlenbeck`]     | `OUconductance`           | `G0`, `sigma`, `tau`, `E`           |

use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};

use crate::error::{LcgResult, ValidationError};
use crate::utils::{format_number, parse_flag};

/// Analog input range of the acquisition card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputRange {
    #[default]
    PlusMinusTen,
    PlusMinusFive,
    PlusMinusOne,
    PlusMinusZeroPointTwo,
}

impl fmt::Display for InputRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InputRange::PlusMinusTen => "PlusMinusTen",
                InputRange::PlusMinusFive => "PlusMinusFive",
                InputRange::PlusMinusOne => "PlusMinusOne",
                InputRange::PlusMinusZeroPointTwo => "PlusMinusZeroPointTwo",
            }
        )
    }
}

impl FromStr for InputRange {
    type Err = ValidationError;

    /// Accepts the canonical names as well as the `[-10,+10]` and `+-10` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PlusMinusTen" | "[-10,+10]" | "+-10" => Ok(InputRange::PlusMinusTen),
            "PlusMinusFive" | "[-5,+5]" | "+-5" => Ok(InputRange::PlusMinusFive),
            "PlusMinusOne" | "[-1,+1]" | "+-1" => Ok(InputRange::PlusMinusOne),
            "PlusMinusZeroPointTwo" | "[-0.2,+0.2]" | "+-0.2" => {
                Ok(InputRange::PlusMinusZeroPointTwo)
            }
            other => Err(malformed(
                "RealNeuron",
                "inputRange",
                format!("unknown input range {:?}", other),
            )),
        }
    }
}

/// Ground reference of the analog channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroundReference {
    #[default]
    Grse,
    Nrse,
}

impl fmt::Display for GroundReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                GroundReference::Grse => "GRSE",
                GroundReference::Nrse => "NRSE",
            }
        )
    }
}

impl FromStr for GroundReference {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "GRSE" => Ok(GroundReference::Grse),
            "NRSE" => Ok(GroundReference::Nrse),
            other => Err(malformed(
                "RealNeuron",
                "reference",
                format!("unknown reference mode {:?}", other),
            )),
        }
    }
}

/// Attributes of a neuron recorded and stimulated through an acquisition card.
#[derive(Debug, Clone, PartialEq)]
pub struct RealNeuronAttrs {
    pub device_file: String,
    pub input_subdevice: u32,
    pub output_subdevice: u32,
    pub read_channel: u32,
    pub write_channel: u32,
    pub input_conversion_factor: f64,
    pub output_conversion_factor: f64,
    pub input_range: InputRange,
    pub reference: GroundReference,
    pub spike_threshold: f64,
    /// Initial membrane potential (`V0`).
    pub initial_value: f64,
    pub kernel_file: Option<String>,
    pub hold_last_value: bool,
    pub adaptive_threshold: bool,
}

/// Attributes of an Ornstein-Uhlenbeck conductance source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OuAttrs {
    /// Mean conductance `G0`.
    pub mean: f64,
    pub sigma: f64,
    /// Time constant, in seconds.
    pub time_constant: f64,
    pub reversal_potential: f64,
}

/// Closed catalog of entity types, each with its fixed attribute set.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Recorder {
        compress: bool,
    },
    RealNeuron(RealNeuronAttrs),
    Waveform {
        filename: String,
        units: String,
        triggered: bool,
    },
    ConductanceStimulus {
        reversal_potential: f64,
    },
    NmdaConductanceStimulus {
        reversal_potential: f64,
        block_k1: f64,
        block_k2: f64,
    },
    OrnsteinUhlenbeck(OuAttrs),
}

fn malformed(entity: &'static str, attribute: &'static str, reason: String) -> ValidationError {
    ValidationError::MalformedAttribute {
        entity,
        attribute,
        reason,
    }
}

fn check_finite(entity: &'static str, attribute: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(malformed(entity, attribute, format!("{} is not finite", value)))
    }
}

fn check_not_empty(entity: &'static str, attribute: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(malformed(entity, attribute, "value is empty".to_string()))
    } else {
        Ok(())
    }
}

impl EntityKind {
    /// Tag under which the entity is written.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Recorder { .. } => "H5Recorder",
            EntityKind::RealNeuron(_) => "RealNeuron",
            EntityKind::Waveform { .. } => "Waveform",
            EntityKind::ConductanceStimulus { .. } => "ConductanceStimulus",
            EntityKind::NmdaConductanceStimulus { .. } => "NMDAConductanceStimulus",
            EntityKind::OrnsteinUhlenbeck(_) => "OUconductance",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.type_name();
        match self {
            EntityKind::Recorder { .. } => Ok(()),
            EntityKind::RealNeuron(attrs) => {
                check_not_empty(name, "deviceFile", &attrs.device_file)?;
                for (attribute, value) in [
                    ("inputConversionFactor", attrs.input_conversion_factor),
                    ("outputConversionFactor", attrs.output_conversion_factor),
                ] {
                    check_finite(name, attribute, value)?;
                    if value == 0.0 {
                        return Err(malformed(name, attribute, "conversion factor is zero".to_string()));
                    }
                }
                check_finite(name, "spikeThreshold", attrs.spike_threshold)?;
                check_finite(name, "V0", attrs.initial_value)?;
                if let Some(kernel) = &attrs.kernel_file {
                    check_not_empty(name, "kernelFile", kernel)?;
                }
                Ok(())
            }
            EntityKind::Waveform { filename, units, .. } => {
                check_not_empty(name, "filename", filename)?;
                check_not_empty(name, "units", units)
            }
            EntityKind::ConductanceStimulus { reversal_potential } => {
                check_finite(name, "E", *reversal_potential)
            }
            EntityKind::NmdaConductanceStimulus {
                reversal_potential,
                block_k1,
                block_k2,
            } => {
                check_finite(name, "E", *reversal_potential)?;
                check_finite(name, "K1", *block_k1)?;
                check_finite(name, "K2", *block_k2)
            }
            EntityKind::OrnsteinUhlenbeck(attrs) => {
                check_finite(name, "G0", attrs.mean)?;
                check_finite(name, "sigma", attrs.sigma)?;
                check_finite(name, "tau", attrs.time_constant)?;
                check_finite(name, "E", attrs.reversal_potential)?;
                if attrs.sigma < 0.0 {
                    return Err(malformed(name, "sigma", format!("{} is negative", attrs.sigma)));
                }
                if attrs.time_constant <= 0.0 {
                    return Err(malformed(
                        name,
                        "tau",
                        format!("{} is not positive", attrs.time_constant),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Attributes as `(tag, value)` pairs, in the order they are written.
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        let flag = |b: bool| (if b { "true" } else { "false" }).to_string();
        match self {
            EntityKind::Recorder { compress } => vec![("compress", flag(*compress))],
            EntityKind::RealNeuron(attrs) => {
                let mut params = vec![
                    ("deviceFile", attrs.device_file.clone()),
                    ("inputSubdevice", attrs.input_subdevice.to_string()),
                    ("outputSubdevice", attrs.output_subdevice.to_string()),
                    ("readChannel", attrs.read_channel.to_string()),
                    ("writeChannel", attrs.write_channel.to_string()),
                    ("inputConversionFactor", format_number(attrs.input_conversion_factor)),
                    ("outputConversionFactor", format_number(attrs.output_conversion_factor)),
                    ("inputRange", attrs.input_range.to_string()),
                    ("reference", attrs.reference.to_string()),
                    ("spikeThreshold", format_number(attrs.spike_threshold)),
                    ("V0", format_number(attrs.initial_value)),
                ];
                if let Some(kernel) = &attrs.kernel_file {
                    params.push(("kernelFile", kernel.clone()));
                }
                params.push(("holdLastValue", flag(attrs.hold_last_value)));
                params.push(("adaptiveThreshold", flag(attrs.adaptive_threshold)));
                params
            }
            EntityKind::Waveform {
                filename,
                units,
                triggered,
            } => vec![
                ("filename", filename.clone()),
                ("units", units.clone()),
                ("triggered", flag(*triggered)),
            ],
            EntityKind::ConductanceStimulus { reversal_potential } => {
                vec![("E", format_number(*reversal_potential))]
            }
            EntityKind::NmdaConductanceStimulus {
                reversal_potential,
                block_k1,
                block_k2,
            } => vec![
                ("E", format_number(*reversal_potential)),
                ("K1", format_number(*block_k1)),
                ("K2", format_number(*block_k2)),
            ],
            EntityKind::OrnsteinUhlenbeck(attrs) => vec![
                ("G0", format_number(attrs.mean)),
                ("sigma", format_number(attrs.sigma)),
                ("tau", format_number(attrs.time_constant)),
                ("E", format_number(attrs.reversal_potential)),
            ],
        }
    }

    /// Rebuilds a kind from its tag and the attributes read from a written document.
    pub fn from_parameters(type_name: &str, params: &IndexMap<String, String>) -> LcgResult<Self> {
        let lookup = AttrLookup { params };
        let kind = match type_name {
            "H5Recorder" => EntityKind::Recorder {
                compress: lookup.flag_or("H5Recorder", "compress", true)?,
            },
            "RealNeuron" => {
                let e = "RealNeuron";
                EntityKind::RealNeuron(RealNeuronAttrs {
                    device_file: lookup.text(e, "deviceFile")?,
                    input_subdevice: lookup.parse(e, "inputSubdevice")?,
                    output_subdevice: lookup.parse(e, "outputSubdevice")?,
                    read_channel: lookup.parse(e, "readChannel")?,
                    write_channel: lookup.parse(e, "writeChannel")?,
                    input_conversion_factor: lookup.parse(e, "inputConversionFactor")?,
                    output_conversion_factor: lookup.parse(e, "outputConversionFactor")?,
                    input_range: match params.get("inputRange") {
                        Some(v) => v.parse()?,
                        None => InputRange::default(),
                    },
                    reference: match params.get("reference") {
                        Some(v) => v.parse()?,
                        None => GroundReference::default(),
                    },
                    spike_threshold: lookup.parse(e, "spikeThreshold")?,
                    initial_value: lookup.parse(e, "V0")?,
                    kernel_file: params.get("kernelFile").cloned(),
                    hold_last_value: lookup.flag_or(e, "holdLastValue", false)?,
                    adaptive_threshold: lookup.flag_or(e, "adaptiveThreshold", false)?,
                })
            }
            "Waveform" => EntityKind::Waveform {
                filename: lookup.text("Waveform", "filename")?,
                units: params
                    .get("units")
                    .cloned()
                    .unwrap_or_else(|| "N/A".to_string()),
                triggered: lookup.flag_or("Waveform", "triggered", false)?,
            },
            "ConductanceStimulus" => EntityKind::ConductanceStimulus {
                reversal_potential: lookup.parse("ConductanceStimulus", "E")?,
            },
            "NMDAConductanceStimulus" => {
                let e = "NMDAConductanceStimulus";
                EntityKind::NmdaConductanceStimulus {
                    reversal_potential: lookup.parse(e, "E")?,
                    block_k1: lookup.parse(e, "K1")?,
                    block_k2: lookup.parse(e, "K2")?,
                }
            }
            "OUconductance" => {
                let e = "OUconductance";
                EntityKind::OrnsteinUhlenbeck(OuAttrs {
                    mean: lookup.parse(e, "G0")?,
                    sigma: lookup.parse(e, "sigma")?,
                    time_constant: lookup.parse(e, "tau")?,
                    reversal_potential: lookup.parse(e, "E")?,
                })
            }
            other => {
                return Err(malformed(
                    "entity",
                    "name",
                    format!("unknown entity type {:?}", other),
                )
                .into())
            }
        };
        kind.validate()?;
        Ok(kind)
    }
}

struct AttrLookup<'a> {
    params: &'a IndexMap<String, String>,
}

impl AttrLookup<'_> {
    fn text(&self, entity: &'static str, attribute: &'static str) -> Result<String, ValidationError> {
        self.params
            .get(attribute)
            .cloned()
            .ok_or_else(|| malformed(entity, attribute, "attribute is missing".to_string()))
    }

    fn parse<T: FromStr>(&self, entity: &'static str, attribute: &'static str) -> Result<T, ValidationError> {
        let text = self.text(entity, attribute)?;
        text.trim()
            .parse::<T>()
            .map_err(|_| malformed(entity, attribute, format!("cannot parse {:?}", text)))
    }

    fn flag_or(&self, entity: &'static str, attribute: &'static str, default: bool) -> Result<bool, ValidationError> {
        match self.params.get(attribute) {
            None => Ok(default),
            Some(text) => parse_flag(text)
                .ok_or_else(|| malformed(entity, attribute, format!("{:?} is not a boolean", text))),
        }
    }
}

/// A node of the configuration graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: u32,
    connections: IndexSet<u32>,
    kind: EntityKind,
}

impl Entity {
    /// Builds an entity, validating its attributes.
    ///
    /// Connections keep their order; repeated ids are kept once.
    ///
    /// # Example
    /// ```
    /// use lcg_backend::entity::*;
    ///
    /// let stim = Entity::conductance_stimulus(5, [1], 0.0).unwrap();
    /// assert_eq!(stim.type_name(), "ConductanceStimulus");
    /// assert_eq!(stim.connections().iter().copied().collect::<Vec<_>>(), vec![1]);
    ///
    /// // Attributes are checked on construction
    /// assert!(Entity::waveform(2, [0, 1], "", "pA").is_err());
    /// ```
    pub fn new(id: u32, connections: impl IntoIterator<Item = u32>, kind: EntityKind) -> LcgResult<Self> {
        kind.validate()?;
        Ok(Entity {
            id,
            connections: connections.into_iter().collect(),
            kind,
        })
    }

    pub fn recorder(id: u32, connections: impl IntoIterator<Item = u32>, compress: bool) -> LcgResult<Self> {
        Self::new(id, connections, EntityKind::Recorder { compress })
    }

    pub fn real_neuron(
        id: u32,
        connections: impl IntoIterator<Item = u32>,
        attrs: RealNeuronAttrs,
    ) -> LcgResult<Self> {
        Self::new(id, connections, EntityKind::RealNeuron(attrs))
    }

    pub fn waveform(
        id: u32,
        connections: impl IntoIterator<Item = u32>,
        filename: &str,
        units: &str,
    ) -> LcgResult<Self> {
        Self::new(
            id,
            connections,
            EntityKind::Waveform {
                filename: filename.to_string(),
                units: units.to_string(),
                triggered: false,
            },
        )
    }

    pub fn conductance_stimulus(
        id: u32,
        connections: impl IntoIterator<Item = u32>,
        reversal_potential: f64,
    ) -> LcgResult<Self> {
        Self::new(
            id,
            connections,
            EntityKind::ConductanceStimulus { reversal_potential },
        )
    }

    pub fn nmda_conductance_stimulus(
        id: u32,
        connections: impl IntoIterator<Item = u32>,
        reversal_potential: f64,
        block_k1: f64,
        block_k2: f64,
    ) -> LcgResult<Self> {
        Self::new(
            id,
            connections,
            EntityKind::NmdaConductanceStimulus {
                reversal_potential,
                block_k1,
                block_k2,
            },
        )
    }

    pub fn ornstein_uhlenbeck(
        id: u32,
        connections: impl IntoIterator<Item = u32>,
        attrs: OuAttrs,
    ) -> LcgResult<Self> {
        Self::new(id, connections, EntityKind::OrnsteinUhlenbeck(attrs))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn connections(&self) -> &IndexSet<u32> {
        &self.connections
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}) -> {:?}",
            self.type_name(),
            self.id,
            self.connections.iter().collect::<Vec<_>>()
        )
    }
}
