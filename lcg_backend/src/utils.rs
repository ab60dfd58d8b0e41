// Small helpers shared by the encoder, the configuration writer and the trace reader
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

/// Milliseconds since the epoch, used to re-seed the process-wide randomness source.
pub fn wall_clock_seed() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() * 1000 + u64::from(duration.subsec_millis())
}

/// Splits a storage-node name of form `<Name>-<id>` (e.g. `RealNeuron-1`) into its
/// name and numeric id. Returns `None` when the name does not carry an id suffix.
///
/// # Example
/// ```
/// use lcg_backend::utils::split_node_name;
///
/// assert_eq!(split_node_name("H5Recorder-0"), Some(("H5Recorder", 0)));
/// assert_eq!(split_node_name("Waveform-with-dash-12"), Some(("Waveform-with-dash", 12)));
/// assert_eq!(split_node_name("Simulation_properties"), None);
/// ```
pub fn split_node_name(node: &str) -> Option<(&str, u32)> {
    static NODE_NAME: OnceLock<Option<Regex>> = OnceLock::new();
    let re = NODE_NAME
        .get_or_init(|| Regex::new(r"^(?P<name>.+)-(?P<id>\d+)$").ok())
        .as_ref()?;
    let caps = re.captures(node)?;
    let name = caps.name("name")?.as_str();
    let id = caps.name("id")?.as_str().parse::<u32>().ok()?;
    Some((name, id))
}

/// Formats a float the way the record files expect it: integral values without a
/// fractional part, everything else with the shortest representation that round-trips.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Parses a case-insensitive `true`/`false` flag.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numbers_keep_integers_compact() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-300.0), "-300");
        assert_eq!(format_number(0.01), "0.01");
        assert_eq!(format_number(-0.5), "-0.5");
    }

    #[test]
    fn flags_are_case_insensitive() {
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("FALSE"), Some(false));
        assert_eq!(parse_flag("yes"), None);
    }

    #[test]
    fn node_names_need_numeric_suffix() {
        assert_eq!(split_node_name("RealNeuron-1"), Some(("RealNeuron", 1)));
        assert_eq!(split_node_name("RealNeuron-"), None);
        assert_eq!(split_node_name("-3"), None);
    }

    #[test]
    fn node_names_split_from_many_threads() {
        std::thread::scope(|scope| {
            for id in 0..8u32 {
                scope.spawn(move || {
                    let node = format!("Waveform-{}", id);
                    for _ in 0..100 {
                        assert_eq!(split_node_name(&node), Some(("Waveform", id)));
                        assert_eq!(split_node_name("Misc"), None);
                    }
                });
            }
        });
    }
}
