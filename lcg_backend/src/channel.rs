//! Normalized records decoded from a trace file.
//!
//! Whatever the format version of the file, every recorded entity becomes a [`Channel`] and the
//! optional event table becomes [`Events`]. See [`crate::trace`] for the decoders.

use indexmap::IndexMap;
use ndarray::{Array1, Array2};

use crate::container::AttrValue;
use crate::error::{LcgResult, ValidationError};
use crate::stimulus::{StimulusSegment, RECORD_FIELDS};

/// The output of one recorded entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: u32,
    /// Type of the entity that produced the channel (e.g. `RealNeuron`, `Waveform`).
    pub name: String,
    pub data: Array1<f64>,
    /// Per-pulse markers. Waveform channels store the rows of their stimulus file here.
    pub metadata: Option<Array2<f64>>,
    pub parameters: Option<Array2<f64>>,
    /// Remaining attributes (units, calibration, ...), keys in lower case.
    pub attributes: IndexMap<String, AttrValue>,
}

impl Channel {
    pub fn new(id: u32, name: &str, data: Array1<f64>) -> Self {
        Channel {
            id,
            name: name.to_string(),
            data,
            metadata: None,
            parameters: None,
            attributes: IndexMap::new(),
        }
    }

    pub fn units(&self) -> Option<&str> {
        self.attributes.get("units").and_then(AttrValue::as_str)
    }

    /// Decodes the stimulus rows stored in the metadata of a waveform channel.
    ///
    /// Returns `Ok(None)` when the channel has no metadata.
    ///
    /// # Example
    /// ```
    /// use lcg_backend::channel::Channel;
    /// use ndarray::array;
    ///
    /// let mut chan = Channel::new(2, "Waveform", array![0., 0., 1., 1.]);
    /// chan.metadata = Some(array![
    ///     [1., 1., 0., 0., 0., 0., 0., 0., 0., 0., 0., 1.],
    ///     [1., 1., 1., 0., 0., 0., 0., 0., 0., 0., 0., 1.],
    /// ]);
    /// let segments = chan.stimulus_segments().unwrap().unwrap();
    /// assert_eq!(segments.len(), 2);
    /// assert_eq!(segments[1].params[0].value(), Some(1.0));
    /// ```
    pub fn stimulus_segments(&self) -> LcgResult<Option<Vec<StimulusSegment>>> {
        let metadata = match &self.metadata {
            Some(m) => m,
            None => return Ok(None),
        };
        if metadata.ncols() != RECORD_FIELDS {
            return Err(ValidationError::MalformedRecord {
                line: 0,
                reason: format!(
                    "metadata of channel {} has {} columns, expected {}",
                    self.id,
                    metadata.ncols(),
                    RECORD_FIELDS
                ),
            }
            .into());
        }
        let segments = metadata
            .rows()
            .into_iter()
            .enumerate()
            .map(|(idx, row)| {
                let values: Vec<f64> = row.iter().copied().collect();
                StimulusSegment::from_values(idx + 1, &values)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(segments))
    }

    /// Indices of the upward crossings of `threshold`.
    pub fn threshold_crossings(&self, threshold: f64) -> Vec<usize> {
        self.data
            .windows(2)
            .into_iter()
            .enumerate()
            .filter(|(_, w)| w[0] < threshold && w[1] >= threshold)
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Event table of version-2 trace files: three parallel sequences of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct Events {
    pub timestamp: Array1<f64>,
    pub sender: Array1<f64>,
    pub code: Array1<f64>,
}

impl Events {
    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// Timestamps of the events emitted by entity `sender`.
    pub fn sent_by(&self, sender: u32) -> Vec<f64> {
        self.timestamp
            .iter()
            .zip(self.sender.iter())
            .filter(|&(_, &s)| s == f64::from(sender))
            .map(|(&t, _)| t)
            .collect()
    }
}
