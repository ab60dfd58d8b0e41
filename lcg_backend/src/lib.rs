//! Data model and serialization layer for lcg electrophysiology experiments.
//!
//! A trial goes through three artifacts, each handled by one part of this crate:
//!
//! - stimulus files, built from [`StimulusSegment`]s and written by [`StimulusEncoder`];
//! - the configuration document consumed by the hardware-run executable, assembled through the
//!   [`ConfigGraph`] trait (implemented by [`ConfigDocument`]);
//! - the recorded trace, decoded by [`TraceReader`] into a [`TraceFile`] whatever its format
//!   version.
//!
//! ```
//! use lcg_backend::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let stim = dir.path().join("current.stim");
//! let mut encoder = StimulusEncoder::with_source(RngSeedSource::from_seed(1));
//! let tend = encoder
//!     .encode(&[StimulusSegment::constant(1.0, 0.0), StimulusSegment::sine(5.0, 100.0, 10.0)], &stim)
//!     .unwrap();
//!
//! let mut doc = ConfigDocument::new(20000.0, tend).unwrap();
//! doc.add_recorder(0, &[], true).unwrap();
//! doc.add_waveform(1, &[0], stim.to_str().unwrap(), "pA").unwrap();
//! doc.write(&dir.path().join("config.xml")).unwrap();
//! ```

pub mod channel;
pub mod config;
pub mod container;
pub mod encoder;
pub mod entity;
pub mod error;
#[cfg(feature = "hdf5")]
pub mod h5;
#[cfg(feature = "python")]
pub mod python;
pub mod seed;
pub mod stimulus;
pub mod trace;
pub mod utils;

pub use channel::{Channel, Events};
pub use config::{ConfigDocument, ConfigGraph, DocumentState};
pub use container::{AttrValue, MemoryContainer, TraceContainer};
pub use encoder::{parse_stim_file, substitute_placeholders, StimulusEncoder};
pub use entity::{Entity, EntityKind, GroundReference, InputRange, OuAttrs, RealNeuronAttrs};
pub use error::{ErrorKind, LcgError, LcgResult, ValidationError};
#[cfg(feature = "hdf5")]
pub use h5::Hdf5Container;
pub use seed::{
    reseed_process_source_from_time, seed_process_source, seeded_process_draws, ProcessSeedSource, RngSeedSource,
    SeedSource,
};
pub use stimulus::{Operator, Param, StimulusSegment, TypeCode, WaveformKind};
pub use trace::{FormatVersion, TraceFile, TraceReader};
