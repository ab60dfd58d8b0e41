use std::path::PathBuf;

use lcgexp_backend::*;
use maplit::hashmap;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Settings used when the environment does not describe a card, so that the protocols can be
// inspected without a rig.
fn demo_settings() -> ProtocolResult<DaqSettings> {
    let demo = hashmap! {
        "COMEDI_DEVICE" => "/dev/comedi0",
        "AI_SUBDEVICE" => "0",
        "AO_SUBDEVICE" => "1",
        "AI_CONVERSION_FACTOR_CC" => "20",
        "AO_CONVERSION_FACTOR_CC" => "0.0025",
        "RANGE" => "[-10,+10]",
        "GROUND_REFERENCE" => "GRSE",
    };
    DaqSettings::from_lookup(|name| demo.get(name).map(|v| v.to_string()))
}

// Writes the spontaneous-activity protocol and the first repetition of the correlated
// background protocol into the directory given as first argument (default: the current
// directory).
fn run(dir: PathBuf) -> ProtocolResult<()> {
    let settings = match DaqSettings::from_env() {
        Ok(settings) => settings,
        Err(ProtocolError::MissingSetting { name }) => {
            warn!(missing = name, "card not configured, using demo settings");
            demo_settings()?
        }
        Err(err) => return Err(err),
    };

    let mut writer = ProtocolWriter::new(&dir, settings);
    let out = writer.spontaneous_config(0.0, (10.0, 2.5), (40.0, 10.0), 10.0)?;
    info!(config = %out.config.display(), files = out.stimuli.len(), "spontaneous protocol ready");

    let seeds = CorrelatedSeeds::draw(10, false);
    let trial = CorrelatedTrial {
        before: 0.1,
        duration: 1.1,
        after: 0.3,
        ampa: SplitConductance::linear(Conductance::excitatory(10.0, 2.5), 0.1)?,
        gaba: SplitConductance::linear(Conductance::inhibitory(40.0, 10.0), 0.1)?,
        nmda: None,
    };
    writer.correlated_background_config(trial.before, trial.duration, trial.after, None)?;
    let written = writer.correlated_trial_stimuli(&trial, &seeds, 0)?;
    info!(files = written.len(), reps = seeds.reps(), "correlated background ready");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    if let Err(err) = run(dir) {
        error!("{}", err);
        std::process::exit(1);
    }
}
