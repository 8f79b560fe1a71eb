//! Shared CLI helpers used across multiple commands.

use audiohal_config::{KeyValuePairs, Topology, paths};
use audiohal_core::SampleSpec;
use audiohal_route::Direction;

/// Parse a `key=value` string for clap's `value_parser`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid criterion '{s}' (expected Name=Literal)"))
}

/// Parse a `;`-separated parameter blob for clap's `value_parser`.
pub fn parse_pairs(s: &str) -> Result<KeyValuePairs, String> {
    s.parse().map_err(|e| format!("{e}"))
}

/// Load a topology by path or name.
///
/// Names are looked up in the user and system topology directories.
pub fn load_topology(name: &str) -> anyhow::Result<Topology> {
    let Some(path) = paths::find_topology(name) else {
        anyhow::bail!(
            "topology '{name}' not found (searched {} and {})",
            paths::user_topologies_dir().display(),
            paths::system_topologies_dir().display()
        );
    };
    Ok(Topology::load(&path)?)
}

/// Sample spec described by a parameter blob.
pub fn spec_from_pairs(pairs: &KeyValuePairs) -> anyhow::Result<SampleSpec> {
    Ok(pairs.stream_config(Direction::Output)?.spec)
}
