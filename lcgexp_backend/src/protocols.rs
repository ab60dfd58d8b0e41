//! Protocol writers.
//!
//! A protocol is the set of artifacts one trial needs: a configuration document and the stimulus
//! files it references. A [`ProtocolWriter`] writes them into its directory, with file names
//! relative to that directory, since the hardware-run executable is started from there.
//!
//! Conductances are given as plain numbers (mean, standard deviation, time constant in ms).
//! Computing them from firing rates and membrane properties is left to the caller.

use std::path::{Path, PathBuf};

use lcg_backend::stimulus::params;
use lcg_backend::*;
use tracing::info;

use crate::error::{ProtocolError, ProtocolResult};
use crate::settings::DaqSettings;

pub const CURRENT_STIM: &str = "current.stim";
pub const GEXC_STIM: &str = "gexc.stim";
pub const GINH_STIM: &str = "ginh.stim";

/// Seed of the pulse protocols, fixed so that repeated runs are identical.
pub const PULSES_SEED: u64 = 5061983;
/// Seeds of the background conductances of the sinusoid protocol.
pub const SINUSOID_EXC_SEED: u64 = 5061983;
pub const SINUSOID_INH_SEED: u64 = 7051983;
/// Seed written in the step-current protocols, which draw nothing.
pub const STEP_SEED: u64 = 3532765;

pub const EXC_TAU_MS: f64 = 5.0;
pub const INH_TAU_MS: f64 = 10.0;
pub const EXC_REVERSAL: f64 = 0.0;
pub const INH_REVERSAL: f64 = -80.0;

/// A written stimulus file and its total duration.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolOutput {
    pub config: PathBuf,
    pub stimuli: Vec<WrittenFile>,
}

/// An Ornstein-Uhlenbeck conductance. `tau` is in ms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conductance {
    pub mean: f64,
    pub std: f64,
    pub tau: f64,
    /// `None` draws a seed when the file is written.
    pub seed: Option<u64>,
}

impl Conductance {
    pub fn new(mean: f64, std: f64, tau: f64) -> Self {
        Conductance {
            mean,
            std,
            tau,
            seed: None,
        }
    }

    pub fn excitatory(mean: f64, std: f64) -> Self {
        Self::new(mean, std, EXC_TAU_MS)
    }

    pub fn inhibitory(mean: f64, std: f64) -> Self {
        Self::new(mean, std, INH_TAU_MS)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub(crate) fn segment(&self, duration: f64) -> StimulusSegment {
        StimulusSegment::ornstein_uhlenbeck(duration, self.mean, self.std, self.tau, self.seed)
    }

    /// Quiet period, conductance, quiet period.
    pub(crate) fn trial(&self, before: f64, duration: f64, after: f64) -> Vec<StimulusSegment> {
        vec![
            StimulusSegment::constant(before, 0.0),
            self.segment(duration),
            StimulusSegment::constant(after, 0.0),
        ]
    }
}

/// Current added to the sinusoidal modulation of [`ProtocolWriter::sinusoids_config`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackgroundCurrent {
    None,
    Dc(f64),
    /// Ornstein-Uhlenbeck current, `tau` in ms.
    Noisy { mean: f64, std: f64, tau: f64 },
}

/// Parameters of [`ProtocolWriter::pulses_stimulus`].
#[derive(Debug, Clone, PartialEq)]
pub struct PulsesParams {
    /// Frequency of the pulses within a burst, in Hz.
    pub frequency: f64,
    /// Frequency of the bursts, in Hz. Defaults to `frequency`.
    pub burst_frequency: Option<f64>,
    /// Duration of a single pulse, in ms.
    pub pulse_duration: f64,
    pub amplitude: f64,
    /// Number of bursts.
    pub repetitions: u32,
    /// Quiet period before and after the pulses, in seconds.
    pub delay: f64,
    pub pulses_in_burst: u32,
    /// Adds a single pulse 0.5 s after the train.
    pub with_recovery: bool,
}

impl Default for PulsesParams {
    fn default() -> Self {
        PulsesParams {
            frequency: 10.0,
            burst_frequency: None,
            pulse_duration: 1.0,
            amplitude: 1000.0,
            repetitions: 10,
            delay: 1.0,
            pulses_in_burst: 1,
            with_recovery: true,
        }
    }
}

/// The recording protocol of the step-current recordings: a short hyperpolarizing pulse and a
/// longer step to estimate passive properties, followed by the test step of amplitude `current`.
fn step_protocol(settle: f64, current: Param, duration: f64, tail: f64) -> Vec<StimulusSegment> {
    vec![
        StimulusSegment::constant(0.5, 0.0),
        StimulusSegment::constant(0.01, -300.0),
        StimulusSegment::constant(0.5, 0.0),
        StimulusSegment::constant(0.6, -100.0),
        StimulusSegment::constant(settle, 0.0),
        StimulusSegment::constant(duration, current),
        StimulusSegment::constant(tail, 0.0),
    ]
}

/// Writes the stimulus and configuration files of the protocols into one directory.
pub struct ProtocolWriter<S: SeedSource = ProcessSeedSource> {
    dir: PathBuf,
    settings: DaqSettings,
    encoder: StimulusEncoder<S>,
}

impl ProtocolWriter<ProcessSeedSource> {
    /// Writer drawing unset seeds from the process-wide source.
    pub fn new(dir: impl AsRef<Path>, settings: DaqSettings) -> Self {
        Self::with_source(dir, settings, ProcessSeedSource)
    }
}

impl<S: SeedSource> ProtocolWriter<S> {
    pub fn with_source(dir: impl AsRef<Path>, settings: DaqSettings, seeds: S) -> Self {
        ProtocolWriter {
            dir: dir.as_ref().to_path_buf(),
            settings,
            encoder: StimulusEncoder::with_source(seeds),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings(&self) -> &DaqSettings {
        &self.settings
    }

    pub(crate) fn stimulus(&mut self, name: &str, segments: &[StimulusSegment]) -> ProtocolResult<WrittenFile> {
        let path = self.dir.join(name);
        let duration = self.encoder.encode(segments, &path)?;
        Ok(WrittenFile { path, duration })
    }

    pub(crate) fn template(&mut self, name: &str, segments: &[StimulusSegment]) -> ProtocolResult<WrittenFile> {
        let path = self.dir.join(name);
        let duration = self.encoder.encode_template(segments, &path)?;
        Ok(WrittenFile { path, duration })
    }

    /// A document holding the recorder (id 0) and the recorded neuron (id 1).
    pub(crate) fn neuron_document(&self, duration: f64) -> ProtocolResult<ConfigDocument> {
        let mut doc = ConfigDocument::new(self.settings.sampling_rate, duration)?;
        doc.add_recorder(0, &[], true)?;
        doc.add_real_neuron(1, &[0], self.settings.real_neuron())?;
        Ok(doc)
    }

    pub(crate) fn write_document(&self, mut doc: ConfigDocument, name: &str) -> ProtocolResult<PathBuf> {
        let path = self.dir.join(name);
        doc.write(&path)?;
        Ok(path)
    }

    /// A train of pulses with an optional recovery pulse, written to `pulses.stim`.
    ///
    /// The train is a two-row composite: a pulse train at `frequency` multiplied by a gating
    /// train at the burst frequency. Returns the written file and its duration.
    pub fn pulses_stimulus(&mut self, pulses: &PulsesParams) -> ProtocolResult<WrittenFile> {
        let f0 = pulses.frequency;
        let f1 = pulses.burst_frequency.unwrap_or(f0);
        if !(f0 > 0.0 && f1 > 0.0) {
            return Err(ProtocolError::parameter("frequency", "must be positive"));
        }
        if pulses.repetitions == 0 {
            return Err(ProtocolError::parameter("repetitions", "at least one burst is needed"));
        }

        let mut segments = vec![StimulusSegment::constant(pulses.delay, 0.0)];
        segments.push(StimulusSegment::composite(
            f64::from(pulses.repetitions) / f1,
            2,
            WaveformKind::PulseTrain,
            Operator::None,
            params([pulses.amplitude, -f0, pulses.pulse_duration, 0.0, 0.0]),
        ));
        segments.push(StimulusSegment::composite(
            0.0,
            2,
            WaveformKind::PulseTrain,
            Operator::Product,
            params([1.0, -f1, f64::from(pulses.pulses_in_burst) * 1000.0 / f0, 0.0, 0.0]),
        ));
        if pulses.with_recovery {
            segments.push(StimulusSegment::constant(0.5, 0.0));
            segments.push(StimulusSegment::constant(pulses.pulse_duration / 1000.0, pulses.amplitude));
        }
        segments.push(StimulusSegment::constant(pulses.delay, 0.0));
        let segments: Vec<_> = segments.into_iter().map(|s| s.with_seed(PULSES_SEED)).collect();

        let written = self.stimulus("pulses.stim", &segments)?;
        info!(path = %written.path.display(), duration = written.duration, "wrote pulses stimulus");
        Ok(written)
    }

    /// Excitatory and inhibitory conductances, each preceded by `before` and followed by `after`
    /// seconds without input, written to `gexc.stim` and `ginh.stim`.
    pub fn conductance_stimuli(
        &mut self,
        exc: Conductance,
        inh: Conductance,
        duration: f64,
        before: f64,
        after: f64,
    ) -> ProtocolResult<Vec<WrittenFile>> {
        Ok(vec![
            self.stimulus(GEXC_STIM, &exc.trial(before, duration, after))?,
            self.stimulus(GINH_STIM, &inh.trial(before, duration, after))?,
        ])
    }

    /// Configuration with the neuron (id 1), the current waveform (id 2) and the excitatory and
    /// inhibitory conductance waveforms (ids 3 and 4) driving conductance stimuli (ids 5 and 6).
    fn background_document(&self, duration: f64, names: [&str; 3]) -> ProtocolResult<ConfigDocument> {
        let mut doc = self.neuron_document(duration)?;
        doc.add_waveform(2, &[0, 1], names[0], "pA")?;
        doc.add_waveform(3, &[0, 5], names[1], "nS")?;
        doc.add_waveform(4, &[0, 6], names[2], "nS")?;
        doc.add_conductance_stimulus(5, &[1], EXC_REVERSAL)?;
        doc.add_conductance_stimulus(6, &[1], INH_REVERSAL)?;
        Ok(doc)
    }

    fn background_conductances(
        &mut self,
        exc: Conductance,
        inh: Conductance,
        duration: f64,
        names: [&str; 2],
    ) -> ProtocolResult<Vec<WrittenFile>> {
        // The conductances start once the passive-property steps are over
        Ok(vec![
            self.stimulus(names[0], &exc.trial(2.61, duration, 1.0))?,
            self.stimulus(names[1], &inh.trial(2.61, duration, 1.0))?,
        ])
    }

    /// A current step of amplitude `current` on top of background conductances.
    ///
    /// Writes `config_name`, `current.stim`, `gexc.stim` and `ginh.stim`. The documented duration
    /// is `duration` plus the 3.61 s of the passive-property steps.
    pub fn i_plus_bg_g_config(
        &mut self,
        current: f64,
        exc: Conductance,
        inh: Conductance,
        duration: f64,
        config_name: &str,
    ) -> ProtocolResult<ProtocolOutput> {
        let doc = self.background_document(duration + 3.61, [CURRENT_STIM, GEXC_STIM, GINH_STIM])?;
        let config = self.write_document(doc, config_name)?;

        let mut stimuli = vec![self.stimulus(CURRENT_STIM, &step_protocol(1.0, current.into(), duration, 1.0))?];
        stimuli.extend(self.background_conductances(exc, inh, duration, [GEXC_STIM, GINH_STIM])?);
        info!(config = %config.display(), current, duration, "wrote current plus background protocol");
        Ok(ProtocolOutput { config, stimuli })
    }

    /// [`ProtocolWriter::i_plus_bg_g_config`] with 5 ms excitatory and 10 ms inhibitory time
    /// constants, written to `spontaneous.xml`. Conductances are given as `(mean, std)`.
    pub fn spontaneous_config(
        &mut self,
        current: f64,
        exc: (f64, f64),
        inh: (f64, f64),
        duration: f64,
    ) -> ProtocolResult<ProtocolOutput> {
        self.i_plus_bg_g_config(
            current,
            Conductance::excitatory(exc.0, exc.1),
            Conductance::inhibitory(inh.0, inh.1),
            duration,
            "spontaneous.xml",
        )
    }

    /// Sinusoidal current of amplitude `amplitude` on top of `background` and of background
    /// conductances with fixed seeds.
    ///
    /// The frequency is left as the placeholder `F` in `current_template.stim`; the conductances
    /// go to `gexc_template.stim` and `ginh_template.stim`. The configuration, `sinusoids.xml`,
    /// refers to the files the templates are instantiated into (`current.stim`, `gexc.stim`,
    /// `ginh.stim`).
    pub fn sinusoids_config(
        &mut self,
        background: BackgroundCurrent,
        amplitude: f64,
        exc: (f64, f64),
        inh: (f64, f64),
        duration: f64,
    ) -> ProtocolResult<ProtocolOutput> {
        let doc = self.background_document(duration + 3.61, [CURRENT_STIM, GEXC_STIM, GINH_STIM])?;
        let config = self.write_document(doc, "sinusoids.xml")?;

        let frequency = Param::named("F")?;
        let modulation = |operator: Operator| {
            StimulusSegment::composite(
                0.0,
                2,
                WaveformKind::Sine,
                operator,
                [
                    Param::Value(amplitude),
                    frequency.clone(),
                    Param::Value(0.0),
                    Param::Value(0.0),
                    Param::Value(0.0),
                ],
            )
            .with_seed(0)
        };
        let mut current = match background {
            BackgroundCurrent::Dc(level) if level != 0.0 => vec![
                StimulusSegment::composite(
                    duration,
                    2,
                    WaveformKind::Constant,
                    Operator::None,
                    params([level, 0.0, 0.0, 0.0, 0.0]),
                )
                .with_seed(0),
                modulation(Operator::Sum),
            ],
            BackgroundCurrent::Noisy { mean, std, tau } if mean != 0.0 || std != 0.0 => vec![
                StimulusSegment::composite(
                    duration,
                    2,
                    WaveformKind::OrnsteinUhlenbeck,
                    Operator::None,
                    params([mean, std, tau, 0.0, 0.0]),
                )
                .with_fix_seed(true)
                .with_seed(SINUSOID_EXC_SEED),
                modulation(Operator::Sum),
            ],
            _ => vec![StimulusSegment::sine(duration, amplitude, frequency.clone()).with_seed(0)],
        };
        current.push(StimulusSegment::constant(1.0, 0.0).with_seed(0));

        let mut stimuli = vec![self.template("current_template.stim", &current)?];
        stimuli.extend(self.background_conductances(
            Conductance::excitatory(exc.0, exc.1).with_seed(SINUSOID_EXC_SEED),
            Conductance::inhibitory(inh.0, inh.1).with_seed(SINUSOID_INH_SEED),
            duration,
            ["gexc_template.stim", "ginh_template.stim"],
        )?);
        info!(config = %config.display(), ?background, amplitude, "wrote sinusoids protocol");
        Ok(ProtocolOutput { config, stimuli })
    }

    /// Background conductances plus a current step whose amplitude is left as the placeholder `I`
    /// in `template.stim`. The configuration is written to `gain_modulation.xml`.
    pub fn gain_modulation_config(
        &mut self,
        exc: (f64, f64),
        inh: (f64, f64),
        duration: f64,
    ) -> ProtocolResult<ProtocolOutput> {
        // three more seconds of background before the step
        let background = duration + 3.0;
        let doc = self.background_document(background + 3.61, [CURRENT_STIM, GEXC_STIM, GINH_STIM])?;
        let config = self.write_document(doc, "gain_modulation.xml")?;

        let current: Vec<_> = step_protocol(4.0, Param::named("I")?, duration, 1.0)
            .into_iter()
            .map(|s| s.with_seed(STEP_SEED))
            .collect();
        let mut stimuli = vec![self.template("template.stim", &current)?];
        stimuli.extend(self.background_conductances(
            Conductance::excitatory(exc.0, exc.1),
            Conductance::inhibitory(inh.0, inh.1),
            background,
            [GEXC_STIM, GINH_STIM],
        )?);
        info!(config = %config.display(), duration, "wrote gain modulation protocol");
        Ok(ProtocolOutput { config, stimuli })
    }

    /// One step-current file per amplitude from `i_min` to `i_max` included, named `fi_01.stim`,
    /// `fi_02.stim`, ... With `noisy`, the quiet period before the step lasts 4 s instead of 1 s.
    pub fn fi_stimuli(
        &mut self,
        i_min: f64,
        i_max: f64,
        i_step: f64,
        noisy: bool,
    ) -> ProtocolResult<Vec<WrittenFile>> {
        if !(i_step > 0.0) {
            return Err(ProtocolError::parameter("i_step", "must be positive"));
        }
        if i_max < i_min {
            return Err(ProtocolError::parameter("i_max", "must not be below i_min"));
        }
        let steps = ((i_max - i_min) / i_step + 1e-9).floor() as usize + 1;
        let settle = if noisy { 4.0 } else { 1.0 };
        let mut written = Vec::with_capacity(steps);
        for k in 0..steps {
            let current = i_min + k as f64 * i_step;
            let segments: Vec<_> = step_protocol(settle, current.into(), 5.0, 0.1)
                .into_iter()
                .map(|s| s.with_seed(STEP_SEED))
                .collect();
            written.push(self.stimulus(&format!("fi_{:02}.stim", k + 1), &segments)?);
        }
        info!(files = written.len(), i_min, i_max, "wrote f-I stimuli");
        Ok(written)
    }

    /// Configuration driving the neuron with two Ornstein-Uhlenbeck conductances computed online
    /// (ids 2 and 3), written to `ou.xml`. No stimulus file is needed.
    pub fn noisy_background_config(
        &mut self,
        exc: Conductance,
        inh: Conductance,
        duration: f64,
    ) -> ProtocolResult<PathBuf> {
        let mut doc = self.neuron_document(duration)?;
        for (id, g, reversal) in [(2, exc, EXC_REVERSAL), (3, inh, INH_REVERSAL)] {
            doc.add_ornstein_uhlenbeck(
                id,
                &[0, 1],
                OuAttrs {
                    mean: g.mean,
                    sigma: g.std,
                    time_constant: g.tau / 1000.0,
                    reversal_potential: reversal,
                },
            )?;
        }
        let config = self.write_document(doc, "ou.xml")?;
        info!(config = %config.display(), "wrote noisy background protocol");
        Ok(config)
    }
}

/// Segments of a conductance with bursts of activity.
///
/// The conductance is Ornstein-Uhlenbeck noise with time constant `tau` (ms) driven at rate `r0`
/// until the first burst time. Each following interval, up to `duration`, is a four-row composite
/// in which the rate jumps by `dr` at the start of the interval and relaxes back with time
/// constant `tau_b` (ms). `burst_times` must be increasing and below `duration`.
pub fn conductance_burst(
    duration: f64,
    g: f64,
    tau: f64,
    r0: f64,
    dr: f64,
    burst_times: &[f64],
    tau_b: f64,
    seeds: &mut impl SeedSource,
) -> ProtocolResult<Vec<StimulusSegment>> {
    if burst_times.is_empty() {
        return Err(ProtocolError::parameter("burst_times", "at least one burst time is needed"));
    }
    let mut times = burst_times.to_vec();
    times.push(duration);
    if times.windows(2).any(|w| w[1] <= w[0]) || times[0] < 0.0 {
        return Err(ProtocolError::parameter(
            "burst_times",
            "must be non-negative, increasing and below the duration",
        ));
    }

    let tau_sec = tau / 1000.0;
    let mut segments = vec![StimulusSegment::ornstein_uhlenbeck(
        times[0],
        g * tau * r0,
        g * (r0 * tau / 2.0).sqrt(),
        tau,
        Some(seeds.next_seed()),
    )];
    for w in times.windows(2) {
        segments.push(
            StimulusSegment::composite(
                w[1] - w[0],
                4,
                WaveformKind::OrnsteinUhlenbeck,
                Operator::None,
                params([0.0, 1.0, tau, 0.0, 0.0]),
            )
            .with_fix_seed(true)
            .with_seed(seeds.next_seed()),
        );
        segments.push(
            StimulusSegment::composite(
                0.0,
                4,
                WaveformKind::Exponential,
                Operator::Product,
                params([dr, 1.0, tau_b, 0.0, r0]),
            )
            .with_seed(0)
            .with_exponent(0.5),
        );
        segments.push(
            StimulusSegment::composite(
                0.0,
                4,
                WaveformKind::Constant,
                Operator::Product,
                params([g * (tau_sec / 2.0).sqrt(), 0.0, 0.0, 0.0, 0.0]),
            )
            .with_seed(0),
        );
        segments.push(
            StimulusSegment::composite(
                0.0,
                4,
                WaveformKind::Exponential,
                Operator::Sum,
                params([g * tau_sec * dr, 1.0, tau_b, 0.0, g * tau_sec * r0]),
            )
            .with_seed(0),
        );
    }
    Ok(segments)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::DaqSettings;

    fn rig() -> DaqSettings {
        DaqSettings {
            device_file: "/dev/comedi0".to_string(),
            input_subdevice: 0,
            output_subdevice: 1,
            input_conversion_factor: 20.0,
            output_conversion_factor: 0.0025,
            input_range: InputRange::PlusMinusTen,
            reference: GroundReference::Grse,
            ai_channel: 0,
            ao_channel: 0,
            sampling_rate: 20000.0,
        }
    }

    fn writer(dir: &Path) -> ProtocolWriter<impl SeedSource> {
        ProtocolWriter::with_source(dir, rig(), RngSeedSource::from_seed(7))
    }

    mod stimuli {
        use super::*;

        #[test]
        fn pulses_with_recovery() {
            let dir = tempfile::tempdir().unwrap();
            let written = writer(dir.path()).pulses_stimulus(&PulsesParams::default()).unwrap();
            // delay + 10 bursts at 10 Hz + recovery + delay
            assert!((written.duration - (1.0 + 1.0 + 0.5 + 0.001 + 1.0)).abs() < 1e-12);
            let segments = parse_stim_file(&written.path).unwrap();
            assert_eq!(segments.len(), 6);
            assert_eq!(segments[1].type_code, TypeCode::Composite(2));
            assert_eq!(segments[2].operator, Operator::Product);
            assert!(segments.iter().all(|s| s.seed == Some(PULSES_SEED)));
        }

        #[test]
        fn pulses_need_a_frequency() {
            let dir = tempfile::tempdir().unwrap();
            let pulses = PulsesParams {
                frequency: 0.0,
                ..PulsesParams::default()
            };
            assert!(matches!(
                writer(dir.path()).pulses_stimulus(&pulses),
                Err(ProtocolError::InvalidParameter { name: "frequency", .. })
            ));
        }

        #[test]
        fn explicit_conductance_seeds() {
            let dir = tempfile::tempdir().unwrap();
            let written = writer(dir.path())
                .conductance_stimuli(
                    Conductance::excitatory(10.0, 2.0).with_seed(11),
                    Conductance::inhibitory(40.0, 8.0),
                    5.0,
                    0.5,
                    0.5,
                )
                .unwrap();
            assert_eq!(written.len(), 2);
            assert!(written.iter().all(|w| w.duration == 6.0));
            let exc = parse_stim_file(&written[0].path).unwrap();
            assert_eq!(exc[1].seed, Some(11));
            assert!(exc[1].fix_seed);
            let inh = parse_stim_file(&written[1].path).unwrap();
            assert_eq!(inh[1].params[2].value(), Some(INH_TAU_MS));
        }

        #[test]
        fn fi_files_cover_the_range() {
            let dir = tempfile::tempdir().unwrap();
            let written = writer(dir.path()).fi_stimuli(100.0, 400.0, 100.0, false).unwrap();
            let names: Vec<_> = written
                .iter()
                .map(|w| w.path.file_name().unwrap().to_string_lossy().to_string())
                .collect();
            assert_eq!(names, vec!["fi_01.stim", "fi_02.stim", "fi_03.stim", "fi_04.stim"]);
            let last = parse_stim_file(&written[3].path).unwrap();
            assert_eq!(last[5].params[0].value(), Some(400.0));
        }

        #[test]
        fn bursts_are_four_row_composites() {
            let mut seeds = RngSeedSource::from_seed(1);
            let segments =
                conductance_burst(10.0, 0.5, 5.0, 100.0, 50.0, &[2.0, 6.0], 200.0, &mut seeds).unwrap();
            assert_eq!(segments.len(), 1 + 2 * 4);
            assert_eq!(segments.iter().map(|s| s.duration).sum::<f64>(), 10.0);
            encoder::validate_segments(&segments, false).unwrap();

            let err = conductance_burst(10.0, 0.5, 5.0, 100.0, 50.0, &[6.0, 2.0], 200.0, &mut seeds);
            assert!(err.is_err());
        }
    }

    mod configs {
        use super::*;

        #[test]
        fn current_plus_background() {
            let dir = tempfile::tempdir().unwrap();
            let out = writer(dir.path())
                .spontaneous_config(0.0, (10.0, 2.0), (40.0, 8.0), 10.0)
                .unwrap();
            let doc = ConfigDocument::parse(&out.config).unwrap();
            assert_eq!(doc.entities().keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5, 6]);
            assert!((doc.duration() - 13.61).abs() < 1e-9);
            for stim in &out.stimuli {
                assert!((stim.duration - 13.61).abs() < 1e-9, "{:?}", stim);
            }
        }

        #[test]
        fn sinusoid_template_keeps_the_frequency_open() {
            let dir = tempfile::tempdir().unwrap();
            let out = writer(dir.path())
                .sinusoids_config(BackgroundCurrent::Dc(50.0), 20.0, (10.0, 2.0), (40.0, 8.0), 30.0)
                .unwrap();
            let template = &out.stimuli[0];
            assert!(template.path.ends_with("current_template.stim"));
            let contents = std::fs::read_to_string(&template.path).unwrap();
            assert!(contents.lines().nth(1).unwrap().contains("\tF\t"));

            let exc = parse_stim_file(&out.stimuli[1].path).unwrap();
            assert_eq!(exc[1].seed, Some(SINUSOID_EXC_SEED));
            assert!(!dir.path().join(CURRENT_STIM).exists());
        }

        #[test]
        fn ou_entities_use_seconds() {
            let dir = tempfile::tempdir().unwrap();
            let config = writer(dir.path())
                .noisy_background_config(Conductance::excitatory(10.0, 2.0), Conductance::inhibitory(40.0, 8.0), 5.0)
                .unwrap();
            let doc = ConfigDocument::parse(&config).unwrap();
            match doc.entity(3).unwrap().kind() {
                EntityKind::OrnsteinUhlenbeck(attrs) => {
                    assert_eq!(attrs.time_constant, 0.01);
                    assert_eq!(attrs.reversal_potential, INH_REVERSAL);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
