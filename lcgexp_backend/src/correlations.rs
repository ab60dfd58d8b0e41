//! Correlated synaptic background.
//!
//! Every receptor type is split into a private conductance, different in every trial, and a
//! common one, whose realization is shared by all trials with the same repetition index. The
//! common draws are reproducible across sessions because their seeds come from fixed values.

use std::path::PathBuf;

use lcg_backend::*;
use tracing::{debug, info};

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocols::{Conductance, ProtocolWriter, WrittenFile, EXC_REVERSAL, INH_REVERSAL};

pub const CORRELATIONS_XML: &str = "correlations.xml";

pub const AMPA_SEED: u64 = 5061983;
pub const GABA_SEED: u64 = 7051983;
pub const NMDA_SEED: u64 = 723587;

pub const NMDA_TAU_MS: f64 = 100.0;

const AMPA_FILES: [&str; 2] = ["gampa.stim", "gampa_common.stim"];
const GABA_FILES: [&str; 2] = ["ggaba.stim", "ggaba_common.stim"];
const NMDA_FILES: [&str; 2] = ["gnmda.stim", "gnmda_common.stim"];

/// Magnesium-block coefficients of the NMDA conductance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmdaBlock {
    pub k1: f64,
    pub k2: f64,
}

impl Default for NmdaBlock {
    fn default() -> Self {
        NmdaBlock { k1: 0.6, k2: 0.06 }
    }
}

/// Private and common part of one receptor type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConductance {
    pub private: Conductance,
    pub common: Conductance,
}

impl SplitConductance {
    /// Splits `total` in proportion to the correlation coefficient `c`: the common part gets
    /// `c` times the mean and standard deviation, the private part the rest.
    pub fn linear(total: Conductance, c: f64) -> ProtocolResult<Self> {
        if !(0.0..=1.0).contains(&c) {
            return Err(ProtocolError::parameter("correlation", "must be between 0 and 1"));
        }
        let part = |k: f64| Conductance::new(k * total.mean, k * total.std, total.tau);
        Ok(SplitConductance {
            private: part(1.0 - c),
            common: part(c),
        })
    }
}

/// One trial of the correlated-background protocol. Durations are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedTrial {
    pub before: f64,
    pub duration: f64,
    pub after: f64,
    pub ampa: SplitConductance,
    pub gaba: SplitConductance,
    pub nmda: Option<SplitConductance>,
}

/// Seeds of the common conductances, one per repetition.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedSeeds {
    pub ampa: Vec<u64>,
    pub gaba: Vec<u64>,
    pub nmda: Option<Vec<u64>>,
}

impl CorrelatedSeeds {
    /// Draws `reps` seeds per receptor from the process-wide source seeded with the fixed
    /// receptor seeds, then re-seeds it from the wall clock so that the private draws that
    /// follow differ between sessions.
    ///
    /// # Example
    /// ```
    /// use lcgexp_backend::correlations::CorrelatedSeeds;
    ///
    /// let first = CorrelatedSeeds::draw(4, true);
    /// let second = CorrelatedSeeds::draw(4, true);
    /// assert_eq!(first, second);
    /// assert_eq!(first.ampa.len(), 4);
    /// ```
    pub fn draw(reps: usize, with_nmda: bool) -> Self {
        let seeds = CorrelatedSeeds {
            ampa: seeded_process_draws(AMPA_SEED, reps),
            gaba: seeded_process_draws(GABA_SEED, reps),
            nmda: with_nmda.then(|| seeded_process_draws(NMDA_SEED, reps)),
        };
        let reseed = reseed_process_source_from_time();
        debug!(reps, with_nmda, reseed, "drew common seeds");
        seeds
    }

    pub fn reps(&self) -> usize {
        self.ampa.len()
    }
}

fn seed_for(seeds: &[u64], rep: usize, receptor: &'static str) -> ProtocolResult<u64> {
    seeds.get(rep).copied().ok_or_else(|| {
        ProtocolError::parameter(
            "rep",
            format!("no {} seed for repetition {} ({} drawn)", receptor, rep, seeds.len()),
        )
    })
}

impl<S: SeedSource> ProtocolWriter<S> {
    /// Writes `correlations.xml`: private and common AMPA and GABA conductances as waveform and
    /// conductance-stimulus pairs (ids 2 to 9), plus two NMDA pairs (ids 10 to 13) when `nmda`
    /// is given.
    pub fn correlated_background_config(
        &mut self,
        before: f64,
        duration: f64,
        after: f64,
        nmda: Option<NmdaBlock>,
    ) -> ProtocolResult<PathBuf> {
        let mut doc = self.neuron_document(before + duration + after)?;
        let pairs = [
            (AMPA_FILES[0], EXC_REVERSAL),
            (GABA_FILES[0], INH_REVERSAL),
            (AMPA_FILES[1], EXC_REVERSAL),
            (GABA_FILES[1], INH_REVERSAL),
        ];
        for (id, (file, reversal)) in (2u32..).step_by(2).zip(pairs) {
            doc.add_waveform(id, &[0, id + 1], file, "nS")?;
            doc.add_conductance_stimulus(id + 1, &[1], reversal)?;
        }
        if let Some(block) = nmda {
            for (id, file) in [(10u32, NMDA_FILES[0]), (12, NMDA_FILES[1])] {
                doc.add_waveform(id, &[0, id + 1], file, "nS")?;
                doc.add_nmda_conductance_stimulus(id + 1, &[1], EXC_REVERSAL, block.k1, block.k2)?;
            }
        }
        let config = self.write_document(doc, CORRELATIONS_XML)?;
        info!(config = %config.display(), nmda = nmda.is_some(), "wrote correlated background configuration");
        Ok(config)
    }

    /// Writes the stimulus files of repetition `rep`.
    ///
    /// Private conductances keep their own seed if they have one and draw a fresh one
    /// otherwise. Common conductances always use the seeds of `rep`.
    pub fn correlated_trial_stimuli(
        &mut self,
        trial: &CorrelatedTrial,
        seeds: &CorrelatedSeeds,
        rep: usize,
    ) -> ProtocolResult<Vec<WrittenFile>> {
        let mut receptors = vec![
            (trial.ampa, AMPA_FILES, seed_for(&seeds.ampa, rep, "AMPA")?),
            (trial.gaba, GABA_FILES, seed_for(&seeds.gaba, rep, "GABA")?),
        ];
        if let Some(nmda) = trial.nmda {
            let nmda_seeds = seeds
                .nmda
                .as_deref()
                .ok_or_else(|| ProtocolError::parameter("seeds", "no NMDA seeds were drawn"))?;
            receptors.push((nmda, NMDA_FILES, seed_for(nmda_seeds, rep, "NMDA")?));
        }

        let mut written = Vec::with_capacity(2 * receptors.len());
        for (split, [private_file, common_file], common_seed) in receptors {
            let private = split.private.trial(trial.before, trial.duration, trial.after);
            written.push(self.stimulus(private_file, &private)?);
            let common = split
                .common
                .with_seed(common_seed)
                .trial(trial.before, trial.duration, trial.after);
            written.push(self.stimulus(common_file, &common)?);
        }
        debug!(rep, files = written.len(), "wrote correlated trial stimuli");
        Ok(written)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::DaqSettings;

    fn writer(dir: &std::path::Path) -> ProtocolWriter<impl SeedSource> {
        let settings = DaqSettings {
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
        };
        ProtocolWriter::with_source(dir, settings, RngSeedSource::from_seed(5))
    }

    fn trial(nmda: bool) -> CorrelatedTrial {
        CorrelatedTrial {
            before: 0.1,
            duration: 1.1,
            after: 0.3,
            ampa: SplitConductance::linear(Conductance::excitatory(10.0, 3.0), 0.25).unwrap(),
            gaba: SplitConductance::linear(Conductance::inhibitory(30.0, 6.0), 0.25).unwrap(),
            nmda: nmda.then(|| {
                SplitConductance::linear(Conductance::new(2.0, 0.5, NMDA_TAU_MS), 0.25).unwrap()
            }),
        }
    }

    fn seeds() -> CorrelatedSeeds {
        CorrelatedSeeds {
            ampa: vec![11, 12],
            gaba: vec![21, 22],
            nmda: Some(vec![31, 32]),
        }
    }

    mod config {
        use super::*;

        #[test]
        fn nmda_pairs_are_optional() {
            let dir = tempfile::tempdir().unwrap();
            let config = writer(dir.path())
                .correlated_background_config(0.1, 1.1, 0.3, None)
                .unwrap();
            let doc = ConfigDocument::parse(&config).unwrap();
            assert_eq!(doc.entities().len(), 10);
            assert!((doc.duration() - 1.5).abs() < 1e-12);

            let dir = tempfile::tempdir().unwrap();
            let config = writer(dir.path())
                .correlated_background_config(0.1, 1.1, 0.3, Some(NmdaBlock::default()))
                .unwrap();
            let doc = ConfigDocument::parse(&config).unwrap();
            assert_eq!(doc.entities().len(), 14);
            assert_eq!(doc.entity(13).unwrap().type_name(), "NMDAConductanceStimulus");
            assert_eq!(doc.entity(12).unwrap().connections().iter().copied().collect::<Vec<_>>(), vec![0, 13]);
        }
    }

    mod trials {
        use super::*;

        #[test]
        fn common_channels_share_the_repetition_seed() {
            let dir = tempfile::tempdir().unwrap();
            let mut writer = writer(dir.path());
            let written = writer.correlated_trial_stimuli(&trial(true), &seeds(), 1).unwrap();
            assert_eq!(written.len(), 6);
            for file in &written {
                assert!((file.duration - 1.5).abs() < 1e-12);
            }
            let common_seed = |name: &str| parse_stim_file(dir.path().join(name)).unwrap()[1].seed;
            assert_eq!(common_seed("gampa_common.stim"), Some(12));
            assert_eq!(common_seed("ggaba_common.stim"), Some(22));
            assert_eq!(common_seed("gnmda_common.stim"), Some(32));

            let common = parse_stim_file(dir.path().join("gampa_common.stim")).unwrap();
            assert_eq!(common[1].params[0].value(), Some(2.5));
        }

        #[test]
        fn missing_seeds_are_refused() {
            let dir = tempfile::tempdir().unwrap();
            let mut writer = writer(dir.path());
            assert!(matches!(
                writer.correlated_trial_stimuli(&trial(false), &seeds(), 2),
                Err(ProtocolError::InvalidParameter { name: "rep", .. })
            ));
            let no_nmda = CorrelatedSeeds {
                nmda: None,
                ..seeds()
            };
            assert!(writer.correlated_trial_stimuli(&trial(true), &no_nmda, 0).is_err());
        }

        #[test]
        fn correlation_outside_unit_interval() {
            assert!(SplitConductance::linear(Conductance::excitatory(1.0, 1.0), 1.5).is_err());
        }
    }
}
