//! Provides the data model of stimulus segments, the time-bounded waveform primitives that make
//! up a stimulus file.
//!
//! ## Main Structures and Enumerations:
//!
//! - [`WaveformKind`]: the waveforms understood by the stimulus generator (constant level,
//!   Ornstein-Uhlenbeck noise, sinusoid, square wave, pulse train, Gaussian noise, exponential).
//! - [`TypeCode`]: the signed code of a record. A positive code selects a single waveform,
//!   a negative code `-n` marks one row of an `n`-row composite waveform.
//! - [`Operator`]: how a composite row is combined with the rows before it.
//! - [`Param`]: a parameter slot, either a number or a named placeholder filled in later
//!   (see [`substitute_placeholders`]).
//! - [`StimulusSegment`]: one record of a stimulus file.
//!
//! ## Record layout
//!
//! Every segment is serialized as exactly 12 fields, in this order:
//!
//! | # | field      | meaning                                                   |
//! |---|------------|-----------------------------------------------------------|
//! | 1 | duration   | seconds; `0` for the follower rows of a composite          |
//! | 2 | code       | [`TypeCode`]                                              |
//! | 3-7 | p1..p5   | waveform parameters, meaning depends on the waveform      |
//! | 8 | fixseed    | `1` if the seed below must be used as is                  |
//! | 9 | seed       | seed of the random draw                                   |
//! | 10 | subcode   | waveform of a composite row, `0` otherwise                |
//! | 11 | operator  | [`Operator`]                                              |
//! | 12 | exponent  | the row's value is raised to this power                   |
//!
//! [`substitute_placeholders`]: crate::encoder::substitute_placeholders

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{LcgResult, ValidationError};
use crate::utils::format_number;

/// Number of fields of one stimulus record.
pub const RECORD_FIELDS: usize = 12;

/// Number of waveform parameter slots (`p1..p5`).
pub const PARAM_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveformKind {
    Constant,
    OrnsteinUhlenbeck,
    Sine,
    Square,
    PulseTrain,
    GaussianNoise,
    Exponential,
}

impl WaveformKind {
    pub fn code(&self) -> i32 {
        match self {
            WaveformKind::Constant => 1,
            WaveformKind::OrnsteinUhlenbeck => 2,
            WaveformKind::Sine => 3,
            WaveformKind::Square => 4,
            WaveformKind::PulseTrain => 8,
            WaveformKind::GaussianNoise => 11,
            WaveformKind::Exponential => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(WaveformKind::Constant),
            2 => Some(WaveformKind::OrnsteinUhlenbeck),
            3 => Some(WaveformKind::Sine),
            4 => Some(WaveformKind::Square),
            8 => Some(WaveformKind::PulseTrain),
            11 => Some(WaveformKind::GaussianNoise),
            12 => Some(WaveformKind::Exponential),
            _ => None,
        }
    }

    /// Whether the waveform consumes a random draw.
    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            WaveformKind::OrnsteinUhlenbeck | WaveformKind::GaussianNoise
        )
    }
}

impl fmt::Display for WaveformKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                WaveformKind::Constant => "CONST",
                WaveformKind::OrnsteinUhlenbeck => "OU",
                WaveformKind::Sine => "SINE",
                WaveformKind::Square => "SQUARE",
                WaveformKind::PulseTrain => "PULSES",
                WaveformKind::GaussianNoise => "GAUSS",
                WaveformKind::Exponential => "EXP",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Waveform(WaveformKind),
    /// One row of a composite spanning the given number of rows.
    Composite(usize),
}

impl TypeCode {
    pub fn code(&self) -> i32 {
        match self {
            TypeCode::Waveform(kind) => kind.code(),
            TypeCode::Composite(rows) => -(*rows as i32),
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        if code < 0 {
            Some(TypeCode::Composite(code.unsigned_abs() as usize))
        } else {
            WaveformKind::from_code(code).map(TypeCode::Waveform)
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeCode::Waveform(kind) => write!(f, "{}", kind),
            TypeCode::Composite(rows) => write!(f, "COMPOSITE({})", rows),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    None,
    Sum,
    Product,
}

impl Operator {
    pub fn code(&self) -> i32 {
        match self {
            Operator::None => 0,
            Operator::Sum => 1,
            Operator::Product => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Operator::None),
            1 => Some(Operator::Sum),
            2 => Some(Operator::Product),
            _ => None,
        }
    }
}

/// Content of a parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(f64),
    /// Placeholder substituted after the file is written, e.g. `F` for a frequency
    /// swept across trials.
    Named(String),
}

impl Param {
    /// Builds a placeholder. Names follow identifier rules so that they cannot be
    /// mistaken for numbers in the written record.
    ///
    /// ```
    /// use lcg_backend::stimulus::Param;
    ///
    /// assert!(Param::named("F").is_ok());
    /// assert!(Param::named("I_step").is_ok());
    /// assert!(Param::named("1e3").is_err());
    /// ```
    pub fn named(name: &str) -> LcgResult<Param> {
        static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
        let is_identifier = IDENTIFIER
            .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
            .as_ref()
            .map_or(false, |re| re.is_match(name));
        // "inf" and "nan" would be read back as numbers
        let lowered = name.to_ascii_lowercase();
        if !is_identifier || lowered == "inf" || lowered == "nan" || lowered == "infinity" {
            return Err(ValidationError::MalformedRecord {
                line: 0,
                reason: format!("{:?} is not a valid placeholder name", name),
            }
            .into());
        }
        Ok(Param::Named(name.to_string()))
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Param::Value(v) => Some(*v),
            Param::Named(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Param::Value(v) => format_number(*v),
            Param::Named(name) => name.clone(),
        }
    }
}

/// Numeric parameter slots.
pub fn params(values: [f64; PARAM_SLOTS]) -> [Param; PARAM_SLOTS] {
    values.map(Param::Value)
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Value(value)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// One record of a stimulus file.
///
/// Constructors exist for the waveforms used by the protocol scripts; anything else can be
/// assembled with [`StimulusSegment::new`] and the `with_*` modifiers.
///
/// # Example
///
/// A one-second baseline, five seconds of OU conductance and one more second of baseline:
///
/// ```
/// use lcg_backend::stimulus::*;
///
/// let segments = vec![
///     StimulusSegment::constant(1.0, 0.0),
///     StimulusSegment::ornstein_uhlenbeck(5.0, 12.0, 3.0, 5.0, None),
///     StimulusSegment::constant(1.0, 0.0),
/// ];
/// assert_eq!(segments.iter().map(|s| s.duration).sum::<f64>(), 7.0);
/// assert_eq!(segments[1].type_code.code(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusSegment {
    pub duration: f64,
    pub type_code: TypeCode,
    pub params: [Param; PARAM_SLOTS],
    pub fix_seed: bool,
    /// `None` lets the encoder draw a seed at encode time.
    pub seed: Option<u64>,
    pub subcode: Option<WaveformKind>,
    pub operator: Operator,
    pub exponent: f64,
}

impl StimulusSegment {
    pub fn new(duration: f64, type_code: TypeCode, params: [Param; PARAM_SLOTS]) -> Self {
        StimulusSegment {
            duration,
            type_code,
            params,
            fix_seed: false,
            seed: None,
            subcode: None,
            operator: Operator::None,
            exponent: 1.0,
        }
    }

    pub fn constant(duration: f64, value: impl Into<Param>) -> Self {
        Self::new(
            duration,
            TypeCode::Waveform(WaveformKind::Constant),
            [value.into(), Param::Value(0.0), Param::Value(0.0), Param::Value(0.0), Param::Value(0.0)],
        )
    }

    /// Ornstein-Uhlenbeck noise with the given mean, standard deviation and time constant (ms).
    /// The seed is fixed, so that a given seed always reproduces the same realization.
    pub fn ornstein_uhlenbeck(
        duration: f64,
        mean: f64,
        std: f64,
        tau: f64,
        seed: Option<u64>,
    ) -> Self {
        let mut segment = Self::new(
            duration,
            TypeCode::Waveform(WaveformKind::OrnsteinUhlenbeck),
            params([mean, std, tau, 0.0, 0.0]),
        );
        segment.fix_seed = true;
        segment.seed = seed;
        segment
    }

    pub fn sine(duration: f64, amplitude: impl Into<Param>, frequency: impl Into<Param>) -> Self {
        Self::new(
            duration,
            TypeCode::Waveform(WaveformKind::Sine),
            [
                amplitude.into(),
                frequency.into(),
                Param::Value(0.0),
                Param::Value(0.0),
                Param::Value(0.0),
            ],
        )
    }

    /// One row of an `rows`-row composite. The first row of a composite carries its duration
    /// and [`Operator::None`], the following rows have zero duration and say how they combine
    /// with what precedes them.
    pub fn composite(
        duration: f64,
        rows: usize,
        subcode: WaveformKind,
        operator: Operator,
        params: [Param; PARAM_SLOTS],
    ) -> Self {
        let mut segment = Self::new(duration, TypeCode::Composite(rows), params);
        segment.subcode = Some(subcode);
        segment.operator = operator;
        segment
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_fix_seed(mut self, fix_seed: bool) -> Self {
        self.fix_seed = fix_seed;
        self
    }

    pub fn with_exponent(mut self, exponent: f64) -> Self {
        self.exponent = exponent;
        self
    }

    /// Names of the placeholders used by this segment, in slot order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|p| match p {
            Param::Named(name) => Some(name.as_str()),
            Param::Value(_) => None,
        })
    }

    /// The 12 fields of this segment's record, using `seed` for the seed slot.
    pub fn record_fields(&self, seed: u64) -> Vec<String> {
        let mut fields = Vec::with_capacity(RECORD_FIELDS);
        fields.push(format_number(self.duration));
        fields.push(self.type_code.code().to_string());
        fields.extend(self.params.iter().map(|p| p.render()));
        fields.push((if self.fix_seed { "1" } else { "0" }).to_string());
        fields.push(seed.to_string());
        fields.push(self.subcode.map(|k| k.code()).unwrap_or(0).to_string());
        fields.push(self.operator.code().to_string());
        fields.push(format_number(self.exponent));
        fields
    }

    /// Decodes a record from its textual fields. Parameter slots may hold placeholders,
    /// every other field must be numeric.
    pub fn from_tokens(line: usize, tokens: &[&str]) -> Result<Self, ValidationError> {
        check_field_count(line, tokens.len())?;
        let number = |idx: usize| -> Result<f64, ValidationError> {
            tokens[idx]
                .parse::<f64>()
                .map_err(|_| ValidationError::MalformedRecord {
                    line,
                    reason: format!("field {} ({:?}) is not a number", idx + 1, tokens[idx]),
                })
        };
        let mut numbers = [0.0; RECORD_FIELDS];
        let mut params: Vec<Param> = Vec::with_capacity(PARAM_SLOTS);
        for idx in 0..RECORD_FIELDS {
            if (2..2 + PARAM_SLOTS).contains(&idx) {
                let param = match tokens[idx].parse::<f64>() {
                    Ok(v) => Param::Value(v),
                    Err(_) => Param::named(tokens[idx]).map_err(|_| {
                        ValidationError::MalformedRecord {
                            line,
                            reason: format!("slot p{} holds {:?}", idx - 1, tokens[idx]),
                        }
                    })?,
                };
                params.push(param);
            } else {
                numbers[idx] = number(idx)?;
            }
        }
        Self::from_parts(line, &numbers, params)
    }

    /// Decodes a record from a numeric row, as stored in the metadata of recorded waveforms.
    pub fn from_values(line: usize, values: &[f64]) -> Result<Self, ValidationError> {
        check_field_count(line, values.len())?;
        let params = values[2..2 + PARAM_SLOTS]
            .iter()
            .map(|&v| Param::Value(v))
            .collect();
        Self::from_parts(line, values, params)
    }

    fn from_parts(line: usize, values: &[f64], params: Vec<Param>) -> Result<Self, ValidationError> {
        let malformed = |reason: String| ValidationError::MalformedRecord { line, reason };
        let integer = |idx: usize, what: &str| -> Result<i32, ValidationError> {
            let v = values[idx];
            if v.fract() != 0.0 || !v.is_finite() {
                return Err(malformed(format!("{} {} is not an integer", what, v)));
            }
            Ok(v as i32)
        };

        let code = integer(1, "code")?;
        let type_code = TypeCode::from_code(code)
            .ok_or_else(|| malformed(format!("unknown code {}", code)))?;
        let seed = values[8];
        if seed < 0.0 || seed.fract() != 0.0 {
            return Err(malformed(format!("seed {} is not a non-negative integer", seed)));
        }
        let subcode = match integer(9, "subcode")? {
            0 => None,
            c => Some(
                WaveformKind::from_code(c)
                    .ok_or_else(|| malformed(format!("unknown subcode {}", c)))?,
            ),
        };
        let op = integer(10, "operator")?;
        let operator =
            Operator::from_code(op).ok_or_else(|| malformed(format!("unknown operator {}", op)))?;
        let params: [Param; PARAM_SLOTS] = params
            .try_into()
            .map_err(|_| malformed("wrong number of parameter slots".to_string()))?;

        Ok(StimulusSegment {
            duration: values[0],
            type_code,
            params,
            fix_seed: values[7] != 0.0,
            seed: Some(seed as u64),
            subcode,
            operator,
            exponent: values[11],
        })
    }
}

fn check_field_count(line: usize, count: usize) -> Result<(), ValidationError> {
    if count != RECORD_FIELDS {
        return Err(ValidationError::MalformedRecord {
            line,
            reason: format!("expected {} fields, found {}", RECORD_FIELDS, count),
        });
    }
    Ok(())
}

impl fmt::Display for StimulusSegment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| p.render())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "[{}s, {}, {{{}}}", self.duration, self.type_code, params)?;
        if let Some(subcode) = self.subcode {
            write!(f, ", {} {:?}", subcode, self.operator)?;
        }
        write!(f, "]")
    }
}
