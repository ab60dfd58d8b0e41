//! # lcgexp_backend
//!
//! Experiment protocols written on top of [`lcg_backend`]. A protocol is the configuration
//! document and the stimulus files of one recording, written into a single directory from
//! which the hardware-run executable is started.
//!
//! The acquisition card is described by [`settings::DaqSettings`], usually read from the
//! environment. [`protocols::ProtocolWriter`] writes the protocols; the correlated-background
//! protocol lives in [`correlations`].
//!
//! ```
//! use lcgexp_backend::*;
//! use maplit::hashmap;
//!
//! let env = hashmap! {
//!     "COMEDI_DEVICE" => "/dev/comedi0",
//!     "AI_SUBDEVICE" => "0",
//!     "AO_SUBDEVICE" => "1",
//!     "AI_CONVERSION_FACTOR_CC" => "20",
//!     "AO_CONVERSION_FACTOR_CC" => "0.0025",
//!     "RANGE" => "[-10,+10]",
//!     "GROUND_REFERENCE" => "GRSE",
//! };
//! let settings = DaqSettings::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut writer = ProtocolWriter::new(dir.path(), settings);
//! let out = writer.spontaneous_config(0.0, (10.0, 2.0), (40.0, 8.0), 5.0).unwrap();
//! assert!(out.config.ends_with("spontaneous.xml"));
//! assert_eq!(out.stimuli.len(), 3);
//! ```

pub mod correlations;
pub mod error;
pub mod protocols;
pub mod settings;

pub use correlations::{CorrelatedSeeds, CorrelatedTrial, NmdaBlock, SplitConductance};
pub use error::{ProtocolError, ProtocolResult};
pub use protocols::{
    conductance_burst, BackgroundCurrent, Conductance, ProtocolOutput, ProtocolWriter, PulsesParams, WrittenFile,
};
pub use settings::DaqSettings;
