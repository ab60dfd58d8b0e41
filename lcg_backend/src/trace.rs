//! Decoding of recorded trace files.
//!
//! The hardware-run executable has written its traces in three layouts over time. This module
//! turns any of them into one normalized [`TraceFile`]:
//!
//! | version | channel data                | per-channel extras                              | timing                          |
//! |---------|-----------------------------|-------------------------------------------------|---------------------------------|
//! | 0       | `/Data/<Name>-<id>`         | `/Metadata/<Name>-<id>`, `/Parameters/<Name>-<id>` | `/Misc/Simulation_properties` |
//! | 1       | `/Data/<Name>-<id>`         | attributes of the dataset                       | `/Misc/Simulation_properties`   |
//! | 2       | `/Entities/<id>/Data`       | `/Entities/<id>/Metadata`, group attributes     | attributes of `/Info`           |
//!
//! Version 2 files may also carry an `/Events` group with the `Timestamp`, `Sender` and `Code`
//! tables.
//!
//! The version is detected once by [`FormatVersion::detect`], and [`FormatVersion::decode`] is
//! the only place where the layouts are told apart. Unknown versions are refused: nothing is
//! returned from a file that cannot be decoded completely.
//!
//! ```
//! use lcg_backend::container::{AttrValue, MemoryContainer};
//! use lcg_backend::trace::{FormatVersion, TraceReader};
//! use ndarray::array;
//!
//! let mut c = MemoryContainer::new("trace.h5");
//! c.set_attr("/Info", "version", AttrValue::Int(2))
//!     .set_attr("/Info", "dt", AttrValue::Float(0.5))
//!     .set_attr("/Info", "tend", AttrValue::Float(1.0))
//!     .add_vector("/Entities/1/Data", array![-65., -64.]);
//!
//! let trace = TraceReader::read(&c).unwrap();
//! assert_eq!(trace.version, FormatVersion::V2);
//! assert_eq!(trace.channels[0].id, 1);
//! assert!(!trace.has_events());
//! ```

use std::fmt;

use indexmap::IndexMap;
use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Events};
use crate::container::{AttrValue, TraceContainer};
use crate::error::{LcgError, LcgResult};
use crate::utils::split_node_name;

const SIMULATION_PROPERTIES: &str = "/Misc/Simulation_properties";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V0,
    V1,
    V2,
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl FormatVersion {
    pub fn number(&self) -> i64 {
        match self {
            FormatVersion::V0 => 0,
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }

    pub fn from_number(number: i64) -> Option<Self> {
        match number {
            0 => Some(FormatVersion::V0),
            1 => Some(FormatVersion::V1),
            2 => Some(FormatVersion::V2),
            _ => None,
        }
    }

    /// Detects the layout of a container.
    ///
    /// An explicit `version` attribute on `/Info` wins. Without it, a top-level `/Metadata`
    /// group means version 0 and anything else is taken as version 1.
    pub fn detect<C: TraceContainer + ?Sized>(container: &C) -> LcgResult<Self> {
        if container.has_node("/Info") {
            if let Some(value) = container.attributes("/Info")?.get("version") {
                let number = value.as_i64().ok_or_else(|| {
                    LcgError::format(
                        container.source(),
                        None,
                        format!("version attribute {:?} is not an integer", value),
                    )
                })?;
                return FormatVersion::from_number(number).ok_or_else(|| {
                    LcgError::format(container.source(), Some(number), "unsupported trace version")
                });
            }
        }
        if container.has_node("/Metadata") {
            Ok(FormatVersion::V0)
        } else {
            Ok(FormatVersion::V1)
        }
    }

    /// Decodes a container laid out according to `self`.
    pub fn decode<C: TraceContainer + ?Sized>(self, container: &C) -> LcgResult<TraceFile> {
        let decoder = Decoder {
            container,
            version: self,
        };
        let trace = match self {
            FormatVersion::V0 => decoder.v0(),
            FormatVersion::V1 => decoder.v1(),
            FormatVersion::V2 => decoder.v2(),
        }?;
        trace.check_lengths();
        Ok(trace)
    }
}

/// Normalized content of a trace file.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFile {
    pub version: FormatVersion,
    /// Sampling interval, in seconds.
    pub dt: f64,
    pub tend: f64,
    pub channels: Vec<Channel>,
    /// Event table, only ever present in version-2 files.
    pub events: Option<Events>,
    /// File-level information: `dt`, `tend` and `version` for versions 0 and 1, every
    /// attribute of `/Info` for version 2.
    pub info: IndexMap<String, AttrValue>,
}

impl TraceFile {
    pub fn has_events(&self) -> bool {
        self.events.is_some()
    }

    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.iter().find(|chan| chan.id == id)
    }

    pub fn channel_ids(&self) -> Vec<u32> {
        self.channels.iter().map(|chan| chan.id).collect()
    }

    /// Sample times of the longest channel.
    pub fn time_axis(&self) -> Array1<f64> {
        let n = self.channels.iter().map(|chan| chan.data.len()).max().unwrap_or(0);
        Array1::from_iter((0..n).map(|idx| idx as f64 * self.dt))
    }

    /// Times at which channel `id` crosses `threshold` upwards, `None` if the channel does not exist.
    ///
    /// # Example
    /// ```
    /// use lcg_backend::container::{AttrValue, MemoryContainer};
    /// use lcg_backend::trace::TraceReader;
    /// use ndarray::array;
    ///
    /// let mut c = MemoryContainer::new("trace.h5");
    /// c.set_attr("/Info", "version", AttrValue::Int(2))
    ///     .set_attr("/Info", "dt", AttrValue::Float(0.1))
    ///     .set_attr("/Info", "tend", AttrValue::Float(0.5))
    ///     .add_vector("/Entities/1/Data", array![-60., 10., -60., -60., 20.]);
    ///
    /// let trace = TraceReader::read(&c).unwrap();
    /// assert_eq!(trace.find_spikes(1, 0.0).unwrap(), vec![0.0, 0.30000000000000004]);
    /// assert!(trace.find_spikes(7, 0.0).is_none());
    /// ```
    pub fn find_spikes(&self, id: u32, threshold: f64) -> Option<Vec<f64>> {
        let chan = self.channel(id)?;
        Some(
            chan.threshold_crossings(threshold)
                .into_iter()
                .map(|idx| idx as f64 * self.dt)
                .collect(),
        )
    }

    /// Whether every channel holds `tend / dt` samples, give or take one.
    pub fn is_consistent(&self) -> bool {
        self.inconsistent_channels().is_empty()
    }

    fn inconsistent_channels(&self) -> Vec<(u32, usize, usize)> {
        if !(self.dt > 0.0 && self.tend > 0.0) {
            return vec![];
        }
        let expected = (self.tend / self.dt).round() as usize;
        self.channels
            .iter()
            .filter(|chan| chan.data.len().abs_diff(expected) > 1)
            .map(|chan| (chan.id, chan.data.len(), expected))
            .collect()
    }

    fn check_lengths(&self) {
        for (id, samples, expected) in self.inconsistent_channels() {
            warn!(
                channel = id,
                samples,
                expected,
                "channel length does not match tend / dt"
            );
        }
    }
}

/// Entry point for reading traces.
pub struct TraceReader;

impl TraceReader {
    /// Detects the version of `container` and decodes it.
    pub fn read<C: TraceContainer + ?Sized>(container: &C) -> LcgResult<TraceFile> {
        let version = FormatVersion::detect(container)?;
        debug!(source = %container.source().display(), %version, "detected trace version");
        let trace = version.decode(container)?;
        info!(
            source = %container.source().display(),
            %version,
            channels = trace.channels.len(),
            events = trace.events.as_ref().map_or(0, Events::len),
            "trace decoded"
        );
        Ok(trace)
    }

    /// Opens and decodes an HDF5 trace file.
    #[cfg(feature = "hdf5")]
    pub fn open(path: impl AsRef<std::path::Path>) -> LcgResult<TraceFile> {
        let container = crate::h5::Hdf5Container::open(path)?;
        Self::read(&container)
    }
}

struct Decoder<'a, C: TraceContainer + ?Sized> {
    container: &'a C,
    version: FormatVersion,
}

impl<'a, C: TraceContainer + ?Sized> Decoder<'a, C> {
    fn error(&self, reason: impl Into<String>) -> LcgError {
        LcgError::format(self.container.source(), Some(self.version.number()), reason)
    }

    fn require(&self, path: &str) -> LcgResult<()> {
        if self.container.has_node(path) {
            Ok(())
        } else {
            Err(self.error(format!("required node {} is missing", path)))
        }
    }

    fn number(&self, attrs: &IndexMap<String, AttrValue>, name: &str, node: &str) -> LcgResult<f64> {
        attrs
            .get(name)
            .and_then(AttrValue::as_f64)
            .ok_or_else(|| self.error(format!("{} has no numeric attribute {}", node, name)))
    }

    fn node_id<'n>(&self, group: &str, node: &'n str) -> LcgResult<(&'n str, u32)> {
        split_node_name(node)
            .ok_or_else(|| self.error(format!("{}/{} does not end with a numeric id", group, node)))
    }

    fn insert(&self, channels: &mut IndexMap<u32, Channel>, chan: Channel) -> LcgResult<()> {
        if channels.contains_key(&chan.id) {
            return Err(self.error(format!("channel id {} appears twice", chan.id)));
        }
        channels.insert(chan.id, chan);
        Ok(())
    }

    /// `dt` and `tend` of the legacy layouts, plus the info map built from them.
    fn legacy_timing(&self) -> LcgResult<(f64, f64, IndexMap<String, AttrValue>)> {
        self.require(SIMULATION_PROPERTIES)?;
        let attrs = self.container.attributes(SIMULATION_PROPERTIES)?;
        let dt = self.number(&attrs, "dt", SIMULATION_PROPERTIES)?;
        let tend = self.number(&attrs, "tend", SIMULATION_PROPERTIES)?;
        let mut info = IndexMap::new();
        info.insert("dt".to_string(), AttrValue::Float(dt));
        info.insert("tend".to_string(), AttrValue::Float(tend));
        info.insert("version".to_string(), AttrValue::Int(self.version.number()));
        Ok((dt, tend, info))
    }

    /// Channels stored under `/Data`, along with their node names in the same order.
    fn data_channels(&self) -> LcgResult<(IndexMap<u32, Channel>, Vec<String>)> {
        self.require("/Data")?;
        let nodes = self.container.children("/Data")?;
        let mut channels = IndexMap::new();
        for node in &nodes {
            let (name, id) = self.node_id("/Data", node)?;
            let data = self.container.read_vector(&format!("/Data/{}", node))?;
            self.insert(&mut channels, Channel::new(id, name, data))?;
        }
        Ok((channels, nodes))
    }

    fn v0(&self) -> LcgResult<TraceFile> {
        let (mut channels, _) = self.data_channels()?;
        for group in ["/Metadata", "/Parameters"] {
            if !self.container.has_node(group) {
                continue;
            }
            for node in self.container.children(group)? {
                let (_, id) = self.node_id(group, &node)?;
                let table = self.container.read_matrix(&format!("{}/{}", group, node))?;
                let chan = channels
                    .get_mut(&id)
                    .ok_or_else(|| self.error(format!("{}/{} matches no data channel", group, node)))?;
                if group == "/Metadata" {
                    chan.metadata = Some(table);
                } else {
                    chan.parameters = Some(table);
                }
            }
        }
        let (dt, tend, info) = self.legacy_timing()?;
        Ok(TraceFile {
            version: self.version,
            dt,
            tend,
            channels: channels.into_values().collect(),
            events: None,
            info,
        })
    }

    fn v1(&self) -> LcgResult<TraceFile> {
        let (mut channels, nodes) = self.data_channels()?;
        for (chan, node) in channels.values_mut().zip(&nodes) {
            let path = format!("/Data/{}", node);
            for (name, value) in self.container.attributes(&path)? {
                let is_metadata = name.len() > 8
                    && name.get(..8).map_or(false, |p| p.eq_ignore_ascii_case("metadata"));
                if is_metadata {
                    let table = value
                        .as_matrix()
                        .ok_or_else(|| self.error(format!("{} attribute {} is not numeric", path, name)))?;
                    chan.metadata = Some(table);
                } else {
                    chan.attributes.insert(name.to_lowercase(), value);
                }
            }
        }
        let (dt, tend, info) = self.legacy_timing()?;
        Ok(TraceFile {
            version: self.version,
            dt,
            tend,
            channels: channels.into_values().collect(),
            events: None,
            info,
        })
    }

    fn v2(&self) -> LcgResult<TraceFile> {
        self.require("/Entities")?;
        let info = self.container.attributes("/Info")?;
        let dt = self.number(&info, "dt", "/Info")?;
        let tend = self.number(&info, "tend", "/Info")?;

        let mut channels = IndexMap::new();
        for node in self.container.children("/Entities")? {
            let id = node
                .parse::<u32>()
                .map_err(|_| self.error(format!("/Entities/{} is not a numeric id", node)))?;
            let base = format!("/Entities/{}", node);
            let data = self.container.read_vector(&format!("{}/Data", base))?;
            let attributes: IndexMap<String, AttrValue> = self
                .container
                .attributes(&base)?
                .into_iter()
                .map(|(name, value)| (name.to_lowercase(), value))
                .collect();
            let name = attributes
                .get("name")
                .and_then(AttrValue::as_str)
                .unwrap_or("Entity")
                .to_string();
            let mut chan = Channel::new(id, &name, data);
            let metadata = format!("{}/Metadata", base);
            if self.container.has_node(&metadata) {
                chan.metadata = Some(self.container.read_matrix(&metadata)?);
            }
            chan.attributes = attributes;
            self.insert(&mut channels, chan)?;
        }

        Ok(TraceFile {
            version: self.version,
            dt,
            tend,
            channels: channels.into_values().collect(),
            events: self.events()?,
            info,
        })
    }

    fn events(&self) -> LcgResult<Option<Events>> {
        if !self.container.has_node("/Events") {
            return Ok(None);
        }
        let read = |table: &str| self.container.read_vector(&format!("/Events/{}", table));
        let events = Events {
            timestamp: read("Timestamp")?,
            sender: read("Sender")?,
            code: read("Code")?,
        };
        if events.sender.len() != events.len() || events.code.len() != events.len() {
            return Err(self.error(format!(
                "event tables differ in length (timestamp {}, sender {}, code {})",
                events.len(),
                events.sender.len(),
                events.code.len()
            )));
        }
        Ok(Some(events))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::container::MemoryContainer;
    use crate::error::ErrorKind;
    use ndarray::array;

    fn legacy_timing(c: &mut MemoryContainer) {
        c.set_attr(SIMULATION_PROPERTIES, "dt", AttrValue::Float(0.25))
            .set_attr(SIMULATION_PROPERTIES, "tend", AttrValue::Float(1.0));
    }

    mod detection {
        use super::*;

        #[test]
        fn explicit_version_wins() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_group("/Metadata").set_attr("/Info", "version", AttrValue::Int(1));
            assert_eq!(FormatVersion::detect(&c).unwrap(), FormatVersion::V1);
        }

        #[test]
        fn fallbacks() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_group("/Data");
            assert_eq!(FormatVersion::detect(&c).unwrap(), FormatVersion::V1);
            c.add_group("/Metadata");
            assert_eq!(FormatVersion::detect(&c).unwrap(), FormatVersion::V0);
            // An /Info group without a version attribute is not enough for version 2
            c.set_attr("/Info", "dt", AttrValue::Float(0.1));
            assert_eq!(FormatVersion::detect(&c).unwrap(), FormatVersion::V0);
        }

        #[test]
        fn unknown_version_is_refused() {
            let mut c = MemoryContainer::new("t.h5");
            c.set_attr("/Info", "version", AttrValue::Int(3));
            let err = TraceReader::read(&c).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format);
            assert!(err.to_string().contains("version 3"), "{}", err);
        }
    }

    mod legacy {
        use super::*;

        #[test]
        fn v0_joins_tables_by_id() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_vector("/Data/RealNeuron-1", array![1., 2., 3., 4.])
                .add_vector("/Data/Waveform-2", array![0., 0., 1., 1.])
                .add_matrix("/Metadata/Waveform-2", array![[0.5, 1., 0., 0., 0., 0., 0., 0., 0., 0., 0., 1.]])
                .add_matrix("/Parameters/RealNeuron-1", array![[0.01, 20.]]);
            legacy_timing(&mut c);

            let trace = TraceReader::read(&c).unwrap();
            assert_eq!(trace.version, FormatVersion::V0);
            assert_eq!(trace.channel_ids(), vec![1, 2]);
            assert_eq!(trace.channel(1).unwrap().parameters.as_ref().unwrap().shape(), &[1, 2]);
            assert!(trace.channel(1).unwrap().metadata.is_none());
            assert!(trace.channel(2).unwrap().metadata.is_some());
            assert_eq!(trace.info["version"], AttrValue::Int(0));
            assert!(trace.is_consistent());
        }

        #[test]
        fn v0_unmatched_metadata_is_an_error() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_vector("/Data/RealNeuron-1", array![1.])
                .add_matrix("/Metadata/Waveform-9", array![[1.]]);
            legacy_timing(&mut c);
            assert_eq!(TraceReader::read(&c).unwrap_err().kind(), ErrorKind::Format);
        }

        #[test]
        fn duplicate_ids_are_refused() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_vector("/Data/RealNeuron-1", array![1.])
                .add_vector("/Data/Waveform-1", array![1.]);
            legacy_timing(&mut c);
            assert_eq!(TraceReader::read(&c).unwrap_err().kind(), ErrorKind::Format);
        }

        #[test]
        fn v1_attributes_are_lower_cased() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_vector("/Data/Waveform-2", array![0., 1., 1., 0.])
                .set_attr("/Data/Waveform-2", "Units", AttrValue::Text("pA".into()))
                .set_attr("/Data/Waveform-2", "Metadata_2", AttrValue::Matrix(array![[1., 2.]]))
                .set_attr("/Data/Waveform-2", "metadata", AttrValue::Int(4));
            legacy_timing(&mut c);

            let trace = TraceReader::read(&c).unwrap();
            let chan = trace.channel(2).unwrap();
            assert_eq!(chan.units(), Some("pA"));
            assert_eq!(chan.metadata, Some(array![[1., 2.]]));
            // exactly "metadata" is too short to be the metadata table
            assert_eq!(chan.attributes["metadata"], AttrValue::Int(4));
        }

        #[test]
        fn missing_timing_is_an_error() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_vector("/Data/RealNeuron-1", array![1.]);
            let err = TraceReader::read(&c).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format);
            assert!(err.to_string().contains("Simulation_properties"), "{}", err);
        }

        #[test]
        fn names_need_an_id_suffix() {
            let mut c = MemoryContainer::new("t.h5");
            c.add_vector("/Data/RealNeuron", array![1.]);
            legacy_timing(&mut c);
            assert_eq!(TraceReader::read(&c).unwrap_err().kind(), ErrorKind::Format);
        }
    }

    mod entities {
        use super::*;

        fn v2() -> MemoryContainer {
            let mut c = MemoryContainer::new("t.h5");
            c.set_attr("/Info", "version", AttrValue::Int(2))
                .set_attr("/Info", "dt", AttrValue::Float(0.25))
                .set_attr("/Info", "tend", AttrValue::Float(1.0))
                .add_vector("/Entities/0/Data", array![0., 0., 0., 0.])
                .add_vector("/Entities/1/Data", array![-65., 10., -65., -65.])
                .set_attr("/Entities/1", "Name", AttrValue::Text("RealNeuron".into()))
                .set_attr("/Entities/1", "Units", AttrValue::Text("mV".into()));
            c
        }

        #[test]
        fn self_contained_channels() {
            let trace = TraceReader::read(&v2()).unwrap();
            assert_eq!(trace.channel_ids(), vec![0, 1]);
            assert_eq!(trace.channel(0).unwrap().name, "Entity");
            let neuron = trace.channel(1).unwrap();
            assert_eq!(neuron.name, "RealNeuron");
            assert_eq!(neuron.units(), Some("mV"));
            assert_eq!(trace.find_spikes(1, 0.0), Some(vec![0.0]));
            assert_eq!(trace.time_axis(), array![0., 0.25, 0.5, 0.75]);
            assert!(!trace.info.contains_key("events"));
        }

        #[test]
        fn events_are_decoded() {
            let mut c = v2();
            c.add_vector("/Events/Timestamp", array![0.1, 0.2])
                .add_vector("/Events/Sender", array![1., 1.])
                .add_vector("/Events/Code", array![0., 0.]);
            let trace = TraceReader::read(&c).unwrap();
            assert_eq!(trace.events.as_ref().unwrap().sent_by(1), vec![0.1, 0.2]);

            c.add_vector("/Events/Code", array![0.]);
            assert_eq!(TraceReader::read(&c).unwrap_err().kind(), ErrorKind::Format);
        }

        #[test]
        fn non_numeric_entity_names_are_refused() {
            let mut c = v2();
            c.add_vector("/Entities/neuron/Data", array![0.]);
            assert_eq!(TraceReader::read(&c).unwrap_err().kind(), ErrorKind::Format);
        }
    }
}
