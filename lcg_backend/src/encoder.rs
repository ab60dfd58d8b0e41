//! Serialization of stimulus segments into stimulus files.
//!
//! A stimulus file is plain text with one record per segment and exactly 12 whitespace-separated
//! fields per record (see [`crate::stimulus`] for the field order). The file is consumed by the
//! external hardware-run executable, so the field count and order never change.
//!
//! ## Encoding
//!
//! [`StimulusEncoder::encode`] validates every segment before anything touches the disk, resolves
//! unset seeds through the encoder's [`SeedSource`], writes the file and returns the total
//! duration. Callers size the `duration` of an enclosing configuration document with it.
//!
//! ## Templates
//!
//! Protocols that sweep a parameter across trials write a template once, with named placeholders
//! in the swept slots ([`StimulusEncoder::encode_template`]), and produce each trial's file with
//! [`substitute_placeholders`].
//!
//! ```
//! use lcg_backend::encoder::*;
//! use lcg_backend::seed::RngSeedSource;
//! use lcg_backend::stimulus::*;
//! use maplit::hashmap;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let template = dir.path().join("current_template.stim");
//! let mut encoder = StimulusEncoder::with_source(RngSeedSource::from_seed(1));
//! let segments = vec![
//!     StimulusSegment::sine(30.0, 100.0, Param::named("F").unwrap()),
//!     StimulusSegment::constant(1.0, 0.0),
//! ];
//! encoder.encode_template(&segments, &template).unwrap();
//!
//! let trial = dir.path().join("current.stim");
//! let total = substitute_placeholders(&template, &hashmap! {"F".to_string() => 10.0}, &trial).unwrap();
//! assert_eq!(total, 31.0);
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{LcgError, LcgResult, ValidationError};
use crate::seed::{ProcessSeedSource, SeedSource};
use crate::stimulus::*;
use crate::utils::format_number;

pub struct StimulusEncoder<S: SeedSource = ProcessSeedSource> {
    seeds: S,
}

impl StimulusEncoder<ProcessSeedSource> {
    /// Encoder drawing default seeds from the process-wide source.
    pub fn new() -> Self {
        Self::with_source(ProcessSeedSource)
    }
}

impl Default for StimulusEncoder<ProcessSeedSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SeedSource> StimulusEncoder<S> {
    pub fn with_source(seeds: S) -> Self {
        StimulusEncoder { seeds }
    }

    pub fn seeds_(&mut self) -> &mut S {
        &mut self.seeds
    }

    /// Writes `segments` to `path` and returns their total duration.
    ///
    /// # Errors
    ///
    /// - `Validation` if a segment has a negative duration, a parameter slot still holds a
    ///   placeholder, or a composite group is inconsistent. Nothing is written in that case.
    /// - `Io` if the file cannot be written.
    ///
    /// # Example
    ///
    /// ```
    /// use lcg_backend::encoder::StimulusEncoder;
    /// use lcg_backend::seed::RngSeedSource;
    /// use lcg_backend::stimulus::*;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let path = dir.path().join("pulses.stim");
    /// let mut encoder = StimulusEncoder::with_source(RngSeedSource::from_seed(0));
    /// let total = encoder
    ///     .encode(&[StimulusSegment::constant(1.0, 0.0), StimulusSegment::constant(0.5, -300.0)], &path)
    ///     .unwrap();
    /// assert_eq!(total, 1.5);
    /// assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    /// ```
    pub fn encode(&mut self, segments: &[StimulusSegment], path: impl AsRef<Path>) -> LcgResult<f64> {
        self.write(segments, path.as_ref(), false)
    }

    /// Like [`StimulusEncoder::encode`], but placeholders are written verbatim.
    pub fn encode_template(
        &mut self,
        segments: &[StimulusSegment],
        path: impl AsRef<Path>,
    ) -> LcgResult<f64> {
        self.write(segments, path.as_ref(), true)
    }

    /// Renders the records of `segments` without writing them.
    pub fn render(
        &mut self,
        segments: &[StimulusSegment],
        allow_placeholders: bool,
    ) -> LcgResult<(String, f64)> {
        let total = validate_segments(segments, allow_placeholders)?;
        let mut body = String::new();
        for segment in segments {
            let seed = match segment.seed {
                Some(seed) => seed,
                None => self.seeds.next_seed(),
            };
            body.push_str(&segment.record_fields(seed).join("\t"));
            body.push('\n');
        }
        Ok((body, total))
    }

    fn write(
        &mut self,
        segments: &[StimulusSegment],
        path: &Path,
        allow_placeholders: bool,
    ) -> LcgResult<f64> {
        let (body, total) = self.render(segments, allow_placeholders)?;
        fs::write(path, body).map_err(|e| LcgError::io(path, e))?;
        debug!(
            path = %path.display(),
            records = segments.len(),
            total_duration = total,
            template = allow_placeholders,
            "wrote stimulus file"
        );
        Ok(total)
    }
}

/// Checks every segment and returns the total duration.
///
/// Durations must be non-negative and finite, and so must the numeric parameters and the
/// exponent. The rows of a composite must be consecutive, all
/// carry the same code, and only the first one may have a non-zero duration.
pub fn validate_segments(segments: &[StimulusSegment], allow_placeholders: bool) -> LcgResult<f64> {
    let mut total = 0.0;
    for (index, segment) in segments.iter().enumerate() {
        if segment.duration < 0.0 {
            return Err(ValidationError::NegativeDuration {
                index,
                duration: segment.duration,
            }
            .into());
        }
        if !segment.duration.is_finite() {
            return Err(malformed(index, format!("duration {} is not finite", segment.duration)));
        }
        if !allow_placeholders {
            if let Some(name) = segment.placeholders().next() {
                return Err(malformed(index, format!("placeholder {} has no value", name)));
            }
        }
        for (slot, param) in segment.params.iter().enumerate() {
            if let Param::Value(value) = param {
                if !value.is_finite() {
                    return Err(malformed(index, format!("parameter {} is {}", slot + 1, value)));
                }
            }
        }
        if !segment.exponent.is_finite() {
            return Err(malformed(index, format!("exponent {} is not finite", segment.exponent)));
        }
        total += segment.duration;
    }
    check_composites(segments)?;
    Ok(total)
}

fn check_composites(segments: &[StimulusSegment]) -> LcgResult<()> {
    let mut index = 0;
    while index < segments.len() {
        let rows = match segments[index].type_code {
            TypeCode::Composite(rows) => rows,
            TypeCode::Waveform(_) => {
                index += 1;
                continue;
            }
        };
        if rows == 0 || index + rows > segments.len() {
            return Err(malformed(
                index,
                format!("composite of {} rows does not fit the segment list", rows),
            ));
        }
        for (offset, follower) in segments[index + 1..index + rows].iter().enumerate() {
            if follower.type_code != TypeCode::Composite(rows) {
                return Err(malformed(
                    index + 1 + offset,
                    format!("expected row {} of a {}-row composite", offset + 2, rows),
                ));
            }
            if follower.duration != 0.0 {
                return Err(malformed(
                    index + 1 + offset,
                    "composite follower rows must have zero duration".to_string(),
                ));
            }
        }
        index += rows;
    }
    Ok(())
}

fn malformed(index: usize, reason: String) -> LcgError {
    ValidationError::MalformedRecord {
        line: index + 1,
        reason,
    }
    .into()
}

/// Reads a stimulus file back into segments. Placeholders are accepted in the parameter slots,
/// so templates can be read as well.
pub fn parse_stim_file(path: impl AsRef<Path>) -> LcgResult<Vec<StimulusSegment>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| LcgError::io(path, e))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            StimulusSegment::from_tokens(idx + 1, &tokens).map_err(LcgError::from)
        })
        .collect()
}

/// Fills the placeholders of the template at `template` with `values`, writes the result to
/// `output` and returns the total duration.
///
/// Only whole fields are substituted. A placeholder without a value fails with a
/// `Validation` error and leaves `output` untouched.
pub fn substitute_placeholders(
    template: impl AsRef<Path>,
    values: &HashMap<String, f64>,
    output: impl AsRef<Path>,
) -> LcgResult<f64> {
    let (template, output) = (template.as_ref(), output.as_ref());
    let contents = fs::read_to_string(template).map_err(|e| LcgError::io(template, e))?;

    let mut body = String::new();
    let mut segments = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = Vec::with_capacity(RECORD_FIELDS);
        for token in line.split_whitespace() {
            if token.parse::<f64>().is_ok() {
                fields.push(token.to_string());
                continue;
            }
            match values.get(token) {
                Some(value) => fields.push(format_number(*value)),
                None => {
                    return Err(ValidationError::MalformedRecord {
                        line: idx + 1,
                        reason: format!("placeholder {} has no value", token),
                    }
                    .into())
                }
            }
        }
        let tokens: Vec<&str> = fields.iter().map(String::as_str).collect();
        segments.push(StimulusSegment::from_tokens(idx + 1, &tokens)?);
        body.push_str(&fields.join("\t"));
        body.push('\n');
    }

    let total = validate_segments(&segments, false)?;
    fs::write(output, body).map_err(|e| LcgError::io(output, e))?;
    debug!(
        template = %template.display(),
        output = %output.display(),
        total_duration = total,
        "substituted stimulus template"
    );
    Ok(total)
}
