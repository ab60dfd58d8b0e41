use std::path::PathBuf;

use lcg_backend::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Writes a step-current protocol into the directory given as first argument (default: the
// current directory) and reads the configuration back.
fn run(dir: PathBuf) -> LcgResult<()> {
    let stim = dir.join("current.stim");
    let segments = [
        StimulusSegment::constant(1.0, 0.0),
        StimulusSegment::constant(2.0, 150.0),
        StimulusSegment::constant(1.0, 0.0),
    ];
    let tend = StimulusEncoder::new().encode(&segments, &stim)?;

    let mut doc = ConfigDocument::new(20000.0, tend)?;
    doc.add_recorder(0, &[], true)?;
    doc.add_waveform(1, &[0], &stim.display().to_string(), "pA")?;
    let config = dir.join("config.xml");
    doc.write(&config)?;

    let parsed = ConfigDocument::parse(&config)?;
    for entity in parsed.entities().values() {
        info!(%entity, "entity");
    }
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
        error!(kind = %err.kind(), "{}", err);
        std::process::exit(1);
    }
}
