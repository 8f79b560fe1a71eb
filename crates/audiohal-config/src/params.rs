//! Key/value parameter blobs and their persisted store.
//!
//! Parameters travel as `;`-separated entries, each either `key=value` or a
//! bare `key`:
//!
//! ```text
//! output_flags=2;output_usecase=0;mic_mute
//! ```
//!
//! [`KeyValuePairs`] keeps them ordered by key. [`ParameterStore`] persists a
//! blob to disk and replaces the file atomically on save.
//!
//! # Example
//!
//! ```rust
//! use audiohal_config::KeyValuePairs;
//!
//! let mut pairs: KeyValuePairs = "rate=44100;format=pcm16".parse()?;
//! pairs.add_literal("channels", "2")?;
//! assert_eq!(pairs.get("rate"), Some("44100"));
//! assert_eq!(pairs.to_string(), "channels=2;format=pcm16;rate=44100");
//! # Ok::<(), audiohal_config::ParameterError>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use audiohal_core::{SampleFormat, SampleSpec};
use audiohal_route::{Direction, StreamConfig};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

const PAIR_DELIMITER: char = ';';
const PAIR_ASSOCIATOR: char = '=';

/// Well-known parameter keys.
pub mod keys {
    use audiohal_route::Direction;

    /// Routing of compressed offload playback.
    pub const COMPRESS_OFFLOAD_ROUTING: &str = "key_compress_offload_routing";
    /// Host platform mode.
    pub const ANDROID_MODE: &str = "android_mode";
    /// Microphone mute.
    pub const MIC_MUTE: &str = "mic_mute";
    /// Voice-over-IP band type.
    pub const VOIP_BAND_TYPE: &str = "voip_band_type";
    /// Requested pre-processing effects of a capture stream.
    pub const PRE_PROC_REQUESTED: &str = "pre_proc_requested";
    /// Stream sample rate.
    pub const SAMPLE_RATE: &str = "sample_rate";
    /// Stream sample format literal.
    pub const FORMAT: &str = "format";
    /// Stream channel count.
    pub const CHANNELS: &str = "channels";

    /// Key holding the devices of `direction`.
    pub fn devices(direction: Direction) -> &'static str {
        match direction {
            Direction::Input => "input_devices",
            Direction::Output => "output_devices",
        }
    }

    /// Key holding the stream flags of `direction`.
    pub fn flags(direction: Direction) -> &'static str {
        match direction {
            Direction::Input => "input_flags",
            Direction::Output => "output_flags",
        }
    }

    /// Key holding the use case (input source) of `direction`.
    pub fn use_case(direction: Direction) -> &'static str {
        match direction {
            Direction::Input => "input_sources",
            Direction::Output => "output_usecase",
        }
    }
}

/// Errors from parsing and editing key/value pairs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterError {
    /// An entry has a value but no key.
    #[error("missing key in entry '{0}'")]
    MissingKey(String),

    /// The key was already present; its value was overwritten.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The key is not present.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// The value of a key does not parse.
    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue {
        /// Key.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Ordered set of key/value parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValuePairs {
    map: BTreeMap<String, String>,
}

impl KeyValuePairs {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every entry of a `;`-separated blob.
    ///
    /// Empty entries are skipped. An entry without a key stops parsing with
    /// [`ParameterError::MissingKey`], keeping the entries before it.
    /// Overwritten keys are reported as [`ParameterError::AlreadyExists`]
    /// once the whole blob has been added.
    pub fn add(&mut self, pairs: &str) -> std::result::Result<(), ParameterError> {
        let mut overwritten = None;
        for entry in pairs.split(PAIR_DELIMITER).filter(|e| !e.is_empty()) {
            let (key, value) = entry.split_once(PAIR_ASSOCIATOR).unwrap_or((entry, ""));
            if key.is_empty() {
                return Err(ParameterError::MissingKey(entry.to_string()));
            }
            if let Err(err) = self.add_literal(key, value) {
                overwritten = Some(err);
            }
        }
        overwritten.map_or(Ok(()), Err)
    }

    /// Sets one key. The value is stored even when the key existed, in which
    /// case [`ParameterError::AlreadyExists`] is returned.
    pub fn add_literal(&mut self, key: &str, value: &str) -> std::result::Result<(), ParameterError> {
        match self.map.insert(key.to_string(), value.to_string()) {
            Some(_) => Err(ParameterError::AlreadyExists(key.to_string())),
            None => Ok(()),
        }
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Value of `key` parsed as `T`. `Ok(None)` when absent.
    pub fn get_as<T: FromStr>(&self, key: &str) -> std::result::Result<Option<T>, ParameterError> {
        self.get(key)
            .map(|value| {
                parse_number(value).ok_or_else(|| ParameterError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> std::result::Result<String, ParameterError> {
        self.map
            .remove(key)
            .ok_or_else(|| ParameterError::UnknownKey(key.to_string()))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no key is set.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Builds the stream request described by these pairs.
    ///
    /// Reads [`keys::SAMPLE_RATE`], [`keys::FORMAT`], [`keys::CHANNELS`] and
    /// the direction's flags and use-case keys; absent keys keep the default.
    pub fn stream_config(&self, direction: Direction) -> std::result::Result<StreamConfig, ParameterError> {
        let default = SampleSpec::default();
        let rate = self.get_as(keys::SAMPLE_RATE)?.unwrap_or(default.rate());
        let channels = self.get_as(keys::CHANNELS)?.unwrap_or(default.channel_count());
        let format = match self.get(keys::FORMAT) {
            None => default.format(),
            Some(literal) => SampleFormat::from_literal(literal).ok_or_else(|| {
                ParameterError::InvalidValue {
                    key: keys::FORMAT.to_string(),
                    value: literal.to_string(),
                }
            })?,
        };
        Ok(StreamConfig {
            spec: SampleSpec::new(channels, format, rate),
            flags: self.get_as(keys::flags(direction))?.unwrap_or(0),
            use_case: self.get_as(keys::use_case(direction))?.unwrap_or(0),
            effects: self.get_as(keys::PRE_PROC_REQUESTED)?.unwrap_or(0),
        })
    }
}

/// Decimal, or hex with a `0x` prefix for types that parse from `u32`.
fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    if let Ok(v) = value.parse() {
        return Some(v);
    }
    let hex = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    u32::from_str_radix(hex, 16).ok()?.to_string().parse().ok()
}

impl FromStr for KeyValuePairs {
    type Err = ParameterError;

    /// Parses a blob; duplicate keys are an error here.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut pairs = Self::new();
        pairs.add(s)?;
        Ok(pairs)
    }
}

impl fmt::Display for KeyValuePairs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, "{PAIR_DELIMITER}")?;
            }
            write!(f, "{key}{PAIR_ASSOCIATOR}{value}")?;
        }
        Ok(())
    }
}

/// Key/value parameters persisted to a file.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    path: PathBuf,
    pairs: KeyValuePairs,
}

impl ParameterStore {
    /// Creates an empty store backed by `path`. Nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pairs: KeyValuePairs::new(),
        }
    }

    /// Opens the store at `path`, merging the persisted blob if the file
    /// exists. A missing file gives an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path);
        let content = match std::fs::read_to_string(&store.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("params: no store at {}", store.path.display());
                return Ok(store);
            }
            Err(e) => return Err(ConfigError::read_file(&store.path, e)),
        };
        store.merge(content.trim_end())?;
        debug!(
            "params: loaded {} key(s) from {}",
            store.pairs.len(),
            store.path.display()
        );
        Ok(store)
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored parameters.
    pub fn pairs(&self) -> &KeyValuePairs {
        &self.pairs
    }

    /// Adds a blob; overwritten keys are not an error.
    pub fn merge(&mut self, blob: &str) -> Result<()> {
        match self.pairs.add(blob) {
            Ok(()) | Err(ParameterError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Sets one key (last write wins).
    pub fn set(&mut self, key: &str, value: &str) {
        let _ = self.pairs.add_literal(key, value);
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Result<String> {
        Ok(self.pairs.remove(key)?)
    }

    /// Writes the blob next to the backing file and renames it into place.
    ///
    /// A failed write leaves the previous file untouched.
    pub fn save(&self) -> Result<()> {
        let path = self.path.as_path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let tmp = temp_path(path);
        if let Err(e) = std::fs::write(&tmp, self.pairs.to_string()) {
            let _ = std::fs::remove_file(&tmp);
            return Err(ConfigError::write_file(path, e));
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!("params: could not replace {}: {e}", path.display());
            let _ = std::fs::remove_file(&tmp);
            return Err(ConfigError::write_file(path, e));
        }
        debug!("params: saved {} key(s) to {}", self.pairs.len(), path.display());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "params".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.tmp"))
}
