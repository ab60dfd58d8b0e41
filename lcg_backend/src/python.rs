//! Python bindings, built with the `python` feature.
//!
//! The module exposes the stimulus builder, the configuration document and the trace loader:
//!
//! ```python
//! from lcg_backend import Stimulus, Config, load_trace
//!
//! stim = Stimulus()
//! stim.constant(1.0, 0.0)
//! stim.sine(5.0, 100.0, 10.0)
//! stim.constant(1.0, 0.0)
//! tend = stim.encode("current.stim")
//!
//! cfg = Config(20000.0, tend + 0.1)
//! cfg.add_recorder(0, [])
//! cfg.add_waveform(1, [0], "current.stim", "pA")
//! cfg.write("config.xml")
//!
//! channels, info = load_trace("recording.h5")
//! ```
//!
//! Rust errors are raised as Python exceptions: `IOError` for I/O failures, `RuntimeError` when a
//! written document is modified, `ValueError` otherwise.

use std::path::Path;

use indexmap::IndexMap;
use numpy::IntoPyArray;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::DocumentState;
use crate::container::AttrValue;
use crate::encoder::StimulusEncoder;
use crate::entity::Entity;
use crate::error::{ErrorKind, LcgError};
use crate::stimulus::{Operator, Param, StimulusSegment, TypeCode, WaveformKind, PARAM_SLOTS};
use crate::trace::TraceReader;

impl From<LcgError> for PyErr {
    fn from(err: LcgError) -> PyErr {
        let msg = err.to_string();
        match err.kind() {
            ErrorKind::Io => PyIOError::new_err(msg),
            ErrorKind::State => PyRuntimeError::new_err(msg),
            ErrorKind::Format | ErrorKind::Validation => PyValueError::new_err(msg),
        }
    }
}

/// Generates the [`ConfigGraph`](crate::config::ConfigGraph) accessors and the Python methods of a configuration class.
///
/// PyO3 cannot export trait methods, so each `ConfigGraph` method is wrapped by an inherent
/// method. The struct must have the fields `sampling_rate: f64`, `duration: f64`,
/// `entities: IndexMap<u32, Entity>` and `state: DocumentState`. Connections are passed as Python
/// lists, and entity enumerations as their canonical names (`"PlusMinusTen"`, `"GRSE"`).
///
/// The mutable accessors belong to a crate-private trait, so the macro is only usable here.
macro_rules! impl_config_boilerplate {
    ($cfg_type: ty) => {
        impl $crate::config::sealed::DocumentStorage for $cfg_type {
            fn entities_(&mut self) -> &mut ::indexmap::IndexMap<u32, $crate::entity::Entity> {
                &mut self.entities
            }
            fn state_(&mut self) -> &mut $crate::config::DocumentState {
                &mut self.state
            }
        }

        impl $crate::config::ConfigGraph for $cfg_type {
            fn entities(&self) -> &::indexmap::IndexMap<u32, $crate::entity::Entity> {
                &self.entities
            }
            fn sampling_rate(&self) -> f64 {
                self.sampling_rate
            }
            fn duration(&self) -> f64 {
                self.duration
            }
            fn state(&self) -> &$crate::config::DocumentState {
                &self.state
            }
        }

        #[::pyo3::pymethods]
        impl $cfg_type {
            pub fn is_written(&self) -> bool {
                $crate::config::ConfigGraph::is_written(self)
            }

            pub fn has_entity(&self, id: u32) -> bool {
                $crate::config::ConfigGraph::has_entity(self, id)
            }

            pub fn entity_ids(&self) -> Vec<u32> {
                $crate::config::ConfigGraph::entities(self).keys().copied().collect()
            }

            #[pyo3(signature = (id, connections, compress = true))]
            pub fn add_recorder(
                &mut self,
                id: u32,
                connections: Vec<u32>,
                compress: bool,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::config::ConfigGraph::add_recorder(self, id, &connections, compress)?)
            }

            #[pyo3(signature = (
                id,
                connections,
                device_file,
                input_subdevice,
                output_subdevice,
                read_channel,
                write_channel,
                input_conversion_factor,
                output_conversion_factor,
                input_range = "PlusMinusTen",
                reference = "GRSE",
                spike_threshold = -20.0,
                initial_value = -65.0,
                kernel_file = None,
                hold_last_value = false,
                adaptive_threshold = false
            ))]
            pub fn add_real_neuron(
                &mut self,
                id: u32,
                connections: Vec<u32>,
                device_file: &str,
                input_subdevice: u32,
                output_subdevice: u32,
                read_channel: u32,
                write_channel: u32,
                input_conversion_factor: f64,
                output_conversion_factor: f64,
                input_range: &str,
                reference: &str,
                spike_threshold: f64,
                initial_value: f64,
                kernel_file: Option<String>,
                hold_last_value: bool,
                adaptive_threshold: bool,
            ) -> ::pyo3::PyResult<()> {
                let attrs = $crate::entity::RealNeuronAttrs {
                    device_file: device_file.to_string(),
                    input_subdevice,
                    output_subdevice,
                    read_channel,
                    write_channel,
                    input_conversion_factor,
                    output_conversion_factor,
                    input_range: input_range
                        .parse()
                        .map_err($crate::error::LcgError::from)?,
                    reference: reference.parse().map_err($crate::error::LcgError::from)?,
                    spike_threshold,
                    initial_value,
                    kernel_file,
                    hold_last_value,
                    adaptive_threshold,
                };
                Ok($crate::config::ConfigGraph::add_real_neuron(self, id, &connections, attrs)?)
            }

            #[pyo3(signature = (id, connections, filename, units = "N/A"))]
            pub fn add_waveform(
                &mut self,
                id: u32,
                connections: Vec<u32>,
                filename: &str,
                units: &str,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::config::ConfigGraph::add_waveform(
                    self,
                    id,
                    &connections,
                    filename,
                    units,
                )?)
            }

            pub fn add_conductance_stimulus(
                &mut self,
                id: u32,
                connections: Vec<u32>,
                reversal_potential: f64,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::config::ConfigGraph::add_conductance_stimulus(
                    self,
                    id,
                    &connections,
                    reversal_potential,
                )?)
            }

            #[pyo3(signature = (id, connections, reversal_potential, block_k1 = 0.33, block_k2 = 0.06))]
            pub fn add_nmda_conductance_stimulus(
                &mut self,
                id: u32,
                connections: Vec<u32>,
                reversal_potential: f64,
                block_k1: f64,
                block_k2: f64,
            ) -> ::pyo3::PyResult<()> {
                Ok($crate::config::ConfigGraph::add_nmda_conductance_stimulus(
                    self,
                    id,
                    &connections,
                    reversal_potential,
                    block_k1,
                    block_k2,
                )?)
            }

            pub fn add_ornstein_uhlenbeck(
                &mut self,
                id: u32,
                connections: Vec<u32>,
                mean: f64,
                sigma: f64,
                time_constant: f64,
                reversal_potential: f64,
            ) -> ::pyo3::PyResult<()> {
                let attrs = $crate::entity::OuAttrs {
                    mean,
                    sigma,
                    time_constant,
                    reversal_potential,
                };
                Ok($crate::config::ConfigGraph::add_ornstein_uhlenbeck(self, id, &connections, attrs)?)
            }

            pub fn to_xml(&self) -> ::pyo3::PyResult<String> {
                Ok($crate::config::ConfigGraph::to_xml(self)?)
            }

            pub fn write(&mut self, path: &str) -> ::pyo3::PyResult<()> {
                Ok($crate::config::ConfigGraph::write(self, ::std::path::Path::new(path))?)
            }
        }
    };
}

#[pyclass]
pub struct Config {
    sampling_rate: f64,
    duration: f64,
    entities: IndexMap<u32, Entity>,
    state: DocumentState,
}

impl_config_boilerplate!(Config);

#[pymethods]
impl Config {
    #[new]
    pub fn new(sampling_rate: f64, duration: f64) -> PyResult<Self> {
        // Same checks as a native document
        crate::config::ConfigDocument::new(sampling_rate, duration)?;
        Ok(Config {
            sampling_rate,
            duration,
            entities: IndexMap::new(),
            state: DocumentState::Building,
        })
    }
}

/// Ordered list of stimulus segments.
#[pyclass]
#[derive(Default)]
pub struct Stimulus {
    segments: Vec<StimulusSegment>,
}

fn slots(values: Vec<f64>) -> PyResult<[Param; PARAM_SLOTS]> {
    if values.len() > PARAM_SLOTS {
        return Err(PyValueError::new_err(format!(
            "at most {} parameters per segment, got {}",
            PARAM_SLOTS,
            values.len()
        )));
    }
    let mut params = [0.0; PARAM_SLOTS];
    params[..values.len()].copy_from_slice(&values);
    Ok(crate::stimulus::params(params))
}

#[pymethods]
impl Stimulus {
    #[new]
    pub fn new() -> Self {
        Stimulus::default()
    }

    /// Appends a raw record. Negative codes start composites.
    #[pyo3(signature = (
        duration,
        code,
        params,
        fix_seed = false,
        seed = None,
        subcode = 0,
        operator = 0,
        exponent = 1.0
    ))]
    pub fn append(
        &mut self,
        duration: f64,
        code: i32,
        params: Vec<f64>,
        fix_seed: bool,
        seed: Option<u64>,
        subcode: i32,
        operator: i32,
        exponent: f64,
    ) -> PyResult<()> {
        let type_code = TypeCode::from_code(code)
            .ok_or_else(|| PyValueError::new_err(format!("unknown stimulus code {}", code)))?;
        let mut segment = StimulusSegment::new(duration, type_code, slots(params)?);
        segment.fix_seed = fix_seed;
        segment.seed = seed;
        segment.subcode = match subcode {
            0 => None,
            c => Some(
                WaveformKind::from_code(c)
                    .ok_or_else(|| PyValueError::new_err(format!("unknown subcode {}", c)))?,
            ),
        };
        segment.operator = Operator::from_code(operator)
            .ok_or_else(|| PyValueError::new_err(format!("unknown operator {}", operator)))?;
        segment.exponent = exponent;
        self.segments.push(segment);
        Ok(())
    }

    pub fn constant(&mut self, duration: f64, value: f64) {
        self.segments.push(StimulusSegment::constant(duration, value));
    }

    pub fn sine(&mut self, duration: f64, amplitude: f64, frequency: f64) {
        self.segments.push(StimulusSegment::sine(duration, amplitude, frequency));
    }

    #[pyo3(signature = (duration, mean, std, tau, seed = None))]
    pub fn ornstein_uhlenbeck(&mut self, duration: f64, mean: f64, std: f64, tau: f64, seed: Option<u64>) {
        self.segments
            .push(StimulusSegment::ornstein_uhlenbeck(duration, mean, std, tau, seed));
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    fn __len__(&self) -> usize {
        self.segments.len()
    }

    /// Writes the records to `path` and returns the total duration.
    pub fn encode(&self, path: &str) -> PyResult<f64> {
        Ok(StimulusEncoder::new().encode(&self.segments, path)?)
    }
}

fn attr_to_py(py: Python<'_>, value: &AttrValue) -> PyObject {
    match value {
        AttrValue::Int(v) => v.into_py(py),
        AttrValue::Float(v) => v.into_py(py),
        AttrValue::Text(s) => s.into_py(py),
        AttrValue::FloatArray(v) => v.clone().into_pyarray(py).to_object(py),
        AttrValue::Matrix(m) => m.clone().into_pyarray(py).to_object(py),
    }
}

/// Loads a trace file. Returns the list of channels, each a dict with `id`, `name`, `data` and
/// the optional `metadata`/`parameters` plus the channel attributes, and the info dict. Version-2
/// events are stored in the info dict under `events`.
#[pyfunction]
pub fn load_trace(py: Python<'_>, path: &str) -> PyResult<(Vec<PyObject>, PyObject)> {
    let trace = TraceReader::open(Path::new(path))?;

    let mut channels = Vec::with_capacity(trace.channels.len());
    for chan in trace.channels {
        let dict = PyDict::new(py);
        dict.set_item("id", chan.id)?;
        dict.set_item("name", chan.name)?;
        dict.set_item("data", chan.data.into_pyarray(py))?;
        if let Some(metadata) = chan.metadata {
            dict.set_item("metadata", metadata.into_pyarray(py))?;
        }
        if let Some(parameters) = chan.parameters {
            dict.set_item("parameters", parameters.into_pyarray(py))?;
        }
        for (name, value) in &chan.attributes {
            dict.set_item(name, attr_to_py(py, value))?;
        }
        channels.push(dict.to_object(py));
    }

    let info = PyDict::new(py);
    for (name, value) in &trace.info {
        info.set_item(name, attr_to_py(py, value))?;
    }
    if let Some(events) = trace.events {
        let table = PyDict::new(py);
        table.set_item("timestamp", events.timestamp.into_pyarray(py))?;
        table.set_item("sender", events.sender.into_pyarray(py))?;
        table.set_item("code", events.code.into_pyarray(py))?;
        info.set_item("events", table)?;
    }
    Ok((channels, info.to_object(py)))
}

#[pymodule]
fn lcg_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<Stimulus>()?;
    m.add_class::<Config>()?;
    m.add_function(wrap_pyfunction!(load_trace, m)?)?;
    Ok(())
}
