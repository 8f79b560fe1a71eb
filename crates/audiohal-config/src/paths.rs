//! Platform-specific locations of topology files and the parameter store.
//!
//! - **User config**: `~/.config/audiohal/` (Linux), `~/Library/Application Support/audiohal/` (macOS)
//! - **User topologies**: `<user config>/topologies/`
//! - **System topologies**: `/etc/audiohal/topologies/` (Unix)
//! - **Parameter store**: `<user config>/parameters.conf`

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

const APP_NAME: &str = "audiohal";
const TOPOLOGIES_SUBDIR: &str = "topologies";
const PARAMETER_FILE: &str = "parameters.conf";

/// Returns the user-specific configuration directory.
///
/// Falls back to the current directory if the config directory cannot be
/// determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns the user-specific topology directory.
pub fn user_topologies_dir() -> PathBuf {
    user_config_dir().join(TOPOLOGIES_SUBDIR)
}

/// Returns the system-wide topology directory.
pub fn system_topologies_dir() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/etc").join(APP_NAME).join(TOPOLOGIES_SUBDIR)
    }
    #[cfg(not(unix))]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join(TOPOLOGIES_SUBDIR)
    }
}

/// Default location of the persisted parameter store.
pub fn parameter_store_path() -> PathBuf {
    user_config_dir().join(PARAMETER_FILE)
}

/// Find a topology file by path or name.
///
/// An existing file path is returned as is. Otherwise `name` (with `.toml`
/// added when missing) is looked up in the user, then the system topology
/// directory.
pub fn find_topology(name: &str) -> Option<PathBuf> {
    let path = PathBuf::from(name);
    if path.is_file() {
        return Some(path);
    }
    let filename = if name.ends_with(".toml") {
        name.to_string()
    } else {
        format!("{name}.toml")
    };
    [user_topologies_dir(), system_topologies_dir()]
        .into_iter()
        .map(|dir| dir.join(&filename))
        .find(|p| p.is_file())
}

/// Ensure the user config directory exists.
pub fn ensure_user_config_dir() -> Result<PathBuf> {
    let dir = user_config_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    }
    Ok(dir)
}

/// Topology files in `dir`, sorted by name. Empty if the directory cannot be
/// read.
pub fn list_topologies(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn user_paths_share_the_app_dir() {
        assert!(user_config_dir().ends_with(APP_NAME));
        assert!(user_topologies_dir().starts_with(user_config_dir()));
        assert_eq!(parameter_store_path().file_name().unwrap(), PARAMETER_FILE);
    }

    #[test]
    fn find_topology_accepts_a_file_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("board.toml");
        fs::write(&path, "").unwrap();
        assert_eq!(find_topology(path.to_str().unwrap()), Some(path));
    }

    #[test]
    fn find_topology_misses_unknown_names() {
        assert_eq!(find_topology("no_such_board_3f9a"), None);
    }

    #[test]
    fn list_topologies_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.toml"), "").unwrap();
        fs::write(dir.path().join("a.toml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let names: Vec<_> = list_topologies(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.toml", "b.toml"]);
        assert!(list_topologies(&dir.path().join("missing")).is_empty());
    }
}
