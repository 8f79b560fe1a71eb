//! TOML topology description.
//!
//! A topology file declares everything a [`RouteManager`] needs before its
//! service starts: ports, mutual exclusion groups, routes with their PCM
//! configuration, criterion types and criteria. Routes may carry
//! applicability rules, which [`Topology::policy`] turns into a
//! [`RulePolicy`].
//!
//! # TOML Format
//!
//! ```toml
//! name = "tablet"
//!
//! [[port]]
//! name = "speaker"
//!
//! [[port]]
//! name = "headset"
//!
//! [[group]]
//! name = "outputs"
//! ports = ["speaker", "headset"]
//!
//! [[route]]
//! name = "Media"
//! direction = "output"
//! dst = "speaker"
//!
//! [[route.rule]]
//! criterion = "Accessory"
//! values = ["None"]
//!
//! [route.stream]
//! card_name = "default"
//! spec = { channels = 2, format = "pcm16", rate = 48000 }
//!
//! [[criterion_type]]
//! name = "AccessoryType"
//! values = [{ literal = "None", value = 0 }, { literal = "Headset", value = 1 }]
//!
//! [[criterion]]
//! name = "Accessory"
//! type = "AccessoryType"
//! default = "None"
//! ```

use std::collections::HashSet;
use std::path::Path;

use audiohal_core::{SampleFormat, SampleSpec, channel};
use audiohal_route::{
    AudioCapabilities, AudioCapability, DeviceFactory, Direction, INPUT_FLAG_PRIMARY,
    OUTPUT_FLAG_PRIMARY, RouteManager, StreamRouteConfig, route_key,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::policy::{Rule, RulePolicy};

/// A complete routing topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Topology {
    /// Optional name of the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Ports, in declaration order.
    #[serde(default, rename = "port")]
    pub ports: Vec<PortEntry>,

    /// Mutual exclusion groups.
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupEntry>,

    /// Routes, in declaration (priority) order.
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteEntry>,

    /// User criterion types.
    #[serde(default, rename = "criterion_type")]
    pub criterion_types: Vec<CriterionTypeEntry>,

    /// User criteria.
    #[serde(default, rename = "criterion")]
    pub criteria: Vec<CriterionEntry>,
}

/// A port declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortEntry {
    /// Port name.
    pub name: String,
}

/// A group of mutually exclusive ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Member port names.
    pub ports: Vec<String>,
}

/// Route direction as written in topology files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteDirection {
    /// Playback.
    Output,
    /// Capture.
    Input,
}

impl From<RouteDirection> for Direction {
    fn from(direction: RouteDirection) -> Self {
        match direction {
            RouteDirection::Output => Direction::Output,
            RouteDirection::Input => Direction::Input,
        }
    }
}

/// A route declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteEntry {
    /// Route name, shared by the two halves of a full-duplex route.
    pub name: String,
    /// Direction.
    pub direction: RouteDirection,
    /// Source port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Destination port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    /// Applicability of a route without rules.
    #[serde(default = "default_true")]
    pub applicable: bool,
    /// Applicability rules; all must hold.
    #[serde(default, rename = "rule", skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleEntry>,
    /// PCM configuration; absent for a stream-less route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamRouteEntry>,
}

impl RouteEntry {
    /// Route key (`Name_Playback` or `Name_Capture`).
    pub fn key(&self) -> String {
        route_key(&self.name, self.direction.into())
    }
}

fn default_true() -> bool {
    true
}

/// One applicability rule: the criterion must hold one of the literals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleEntry {
    /// Criterion name.
    pub criterion: String,
    /// Accepted literals.
    pub values: Vec<String>,
}

/// Sample spec as written in topology files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecEntry {
    /// Channel count.
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Format literal (`pcm16`, `pcm8_24`, `pcm32`).
    #[serde(default = "default_format")]
    pub format: String,
    /// Rate in Hz.
    #[serde(default = "default_rate")]
    pub rate: u32,
}

impl Default for SpecEntry {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            format: default_format(),
            rate: default_rate(),
        }
    }
}

impl SpecEntry {
    /// Resolves the spec.
    pub fn to_spec(&self) -> Result<SampleSpec> {
        let format = parse_format(&self.format)?;
        if self.rate == 0 || self.channels == 0 {
            return Err(ConfigError::invalid(format!(
                "spec needs a rate and channels, got {} Hz x {}",
                self.rate, self.channels
            )));
        }
        Ok(SampleSpec::new(self.channels, format, self.rate))
    }
}

fn default_channels() -> u32 {
    2
}

fn default_format() -> String {
    "pcm16".to_string()
}

fn default_rate() -> u32 {
    48000
}

fn parse_format(literal: &str) -> Result<SampleFormat> {
    SampleFormat::from_literal(literal)
        .ok_or_else(|| ConfigError::invalid(format!("unknown sample format '{literal}'")))
}

/// An alternative native profile of a stream route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityEntry {
    /// Rates in preference order.
    pub rates: Vec<u32>,
    /// Format literal.
    pub format: String,
    /// Channel counts in preference order.
    pub channels: Vec<u32>,
}

/// PCM configuration of a stream route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamRouteEntry {
    /// Sound card name.
    #[serde(default = "default_card")]
    pub card_name: String,
    /// PCM device number.
    #[serde(default)]
    pub device_id: u32,
    /// Native spec.
    #[serde(default)]
    pub spec: SpecEntry,
    /// Frames per period.
    #[serde(default = "default_period_size")]
    pub period_size: usize,
    /// Periods per buffer.
    #[serde(default = "default_period_count")]
    pub period_count: usize,
    /// Silence written before playback starts.
    #[serde(default)]
    pub silence_prolog_ms: u32,
    /// Open the device before the path is enabled.
    #[serde(default)]
    pub pre_enable: bool,
    /// Close the device after the path is disabled.
    #[serde(default)]
    pub post_disable: bool,
    /// Accepted stream flags; the primary flag of the direction when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    /// Accepted use cases.
    #[serde(default)]
    pub use_cases: u32,
    /// Implemented pre-processing effects.
    #[serde(default)]
    pub effects: u32,
    /// Managed external devices.
    #[serde(default)]
    pub devices: u32,
    /// Alternative native profiles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<CapabilityEntry>,
}

impl Default for StreamRouteEntry {
    fn default() -> Self {
        Self {
            card_name: default_card(),
            device_id: 0,
            spec: SpecEntry::default(),
            period_size: default_period_size(),
            period_count: default_period_count(),
            silence_prolog_ms: 0,
            pre_enable: false,
            post_disable: false,
            flags: None,
            use_cases: 0,
            effects: 0,
            devices: 0,
            capabilities: Vec::new(),
        }
    }
}

fn default_card() -> String {
    "default".to_string()
}

fn default_period_size() -> usize {
    960
}

fn default_period_count() -> usize {
    4
}

impl StreamRouteEntry {
    /// Builds the route configuration.
    pub fn to_config(&self, direction: Direction) -> Result<StreamRouteConfig> {
        if self.period_size == 0 || self.period_count == 0 {
            return Err(ConfigError::invalid("period size and count must be non-zero"));
        }
        let capabilities = self
            .capabilities
            .iter()
            .map(|c| {
                Ok(AudioCapability::new(
                    c.rates.clone(),
                    parse_format(&c.format)?,
                    c.channels
                        .iter()
                        .map(|&n| channel::mask_for_count(n))
                        .collect::<Vec<_>>(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let primary = match direction {
            Direction::Output => OUTPUT_FLAG_PRIMARY,
            Direction::Input => INPUT_FLAG_PRIMARY,
        };
        Ok(StreamRouteConfig {
            require_pre_enable: self.pre_enable,
            require_post_disable: self.post_disable,
            card_name: self.card_name.clone(),
            device_id: self.device_id,
            spec: self.spec.to_spec()?,
            period_size: self.period_size,
            period_count: self.period_count,
            silence_prolog_ms: self.silence_prolog_ms,
            flag_mask: self.flags.unwrap_or(primary),
            use_case_mask: self.use_cases,
            effects_mask: self.effects,
            supported_device_mask: self.devices,
            capabilities: AudioCapabilities(capabilities),
        })
    }
}

/// A criterion type declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionTypeEntry {
    /// Type name.
    pub name: String,
    /// Bitfield type.
    #[serde(default)]
    pub inclusive: bool,
    /// Literal/value pairs.
    #[serde(default)]
    pub values: Vec<ValuePairEntry>,
}

/// One literal/value pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValuePairEntry {
    /// Literal.
    pub literal: String,
    /// Numeric value.
    pub value: i32,
}

/// A criterion declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionEntry {
    /// Criterion name.
    pub name: String,
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Initial literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Topology {
    /// Load a topology from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let topology = Self::from_toml(&content)?;
        debug!(
            "topology: loaded {} port(s), {} route(s) from {}",
            topology.ports.len(),
            topology.routes.len(),
            path.display()
        );
        Ok(topology)
    }

    /// Load a topology from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Convert the topology to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save the topology to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Checks names and references that the route manager cannot check on
    /// its own before anything is declared.
    pub fn validate(&self) -> Result<()> {
        let ports: HashSet<&str> = self.ports.iter().map(|p| p.name.as_str()).collect();
        if ports.len() != self.ports.len() {
            return Err(ConfigError::invalid("duplicate port name"));
        }
        for group in &self.groups {
            if let Some(missing) = group.ports.iter().find(|p| !ports.contains(p.as_str())) {
                return Err(ConfigError::invalid(format!(
                    "group '{}' names unknown port '{missing}'",
                    group.name
                )));
            }
        }
        let criteria: HashSet<&str> = self.criteria.iter().map(|c| c.name.as_str()).collect();
        for route in &self.routes {
            if route.src.is_none() && route.dst.is_none() {
                return Err(ConfigError::invalid(format!(
                    "route '{}' has no port",
                    route.key()
                )));
            }
            if let Some(rule) = route
                .rules
                .iter()
                .find(|r| !criteria.contains(r.criterion.as_str()))
            {
                return Err(ConfigError::invalid(format!(
                    "route '{}' rule names unknown criterion '{}'",
                    route.key(),
                    rule.criterion
                )));
            }
            if let Some(stream) = &route.stream {
                stream.to_config(route.direction.into())?;
            }
        }
        Ok(())
    }

    /// Declares the topology on `manager`.
    ///
    /// Routes without rules get their `applicable` flag here; routes with
    /// rules are left to the [`RulePolicy`].
    pub fn apply(&self, manager: &RouteManager) -> Result<()> {
        self.validate()?;
        for port in &self.ports {
            manager.add_port(&port.name)?;
        }
        for group in &self.groups {
            for member in &group.ports {
                manager.add_port_group(&group.name, member)?;
            }
        }
        for ty in &self.criterion_types {
            manager.add_criterion_type(&ty.name, ty.inclusive)?;
            for pair in &ty.values {
                manager.add_criterion_type_value_pair(&ty.name, &pair.literal, pair.value)?;
            }
        }
        for criterion in &self.criteria {
            manager.add_criterion(
                &criterion.name,
                &criterion.type_name,
                criterion.default.as_deref(),
            )?;
        }
        for route in &self.routes {
            let direction = route.direction.into();
            let (src, dst) = (route.src.as_deref(), route.dst.as_deref());
            match &route.stream {
                Some(stream) => {
                    manager.add_stream_route(&route.name, src, dst, direction, stream.to_config(direction)?)?;
                }
                None => {
                    manager.add_route(&route.name, src, dst, direction)?;
                }
            }
            if route.rules.is_empty() {
                manager.set_route_applicable(&route.key(), route.applicable)?;
            }
        }
        Ok(())
    }

    /// Rule policy for the routes that carry rules.
    pub fn policy(&self) -> RulePolicy {
        self.routes
            .iter()
            .filter(|r| !r.rules.is_empty())
            .fold(RulePolicy::new(), |policy, route| {
                route.rules.iter().fold(policy, |policy, rule| {
                    policy.with_rule(
                        &route.key(),
                        Rule::new(&rule.criterion, rule.values.iter().map(String::as_str)),
                    )
                })
            })
    }

    /// Builds a manager with this topology declared and its rule policy
    /// installed. The service is not started.
    pub fn build(&self, factory: Box<dyn DeviceFactory>) -> Result<RouteManager> {
        let manager = RouteManager::new(factory).with_policy(Box::new(self.policy()));
        self.apply(&manager)?;
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiohal_route::MockDeviceFactory;
    use tempfile::TempDir;

    const HDMI: &str = r#"
        [[port]]
        name = "hdmi"

        [[route]]
        name = "Hdmi"
        direction = "output"
        dst = "hdmi"

        [route.stream]
        spec = { channels = 2, format = "pcm8_24", rate = 48000 }
        capabilities = [{ rates = [48000, 192000], format = "pcm8_24", channels = [2, 6, 8] }]
    "#;

    // --- parsing ---

    #[test]
    fn defaults_fill_stream_routes() {
        let topology = Topology::from_toml(HDMI).unwrap();
        let route = &topology.routes[0];
        assert!(route.applicable);
        assert_eq!(route.key(), "Hdmi_Playback");

        let config = route
            .stream
            .as_ref()
            .unwrap()
            .to_config(Direction::Output)
            .unwrap();
        assert_eq!(config.flag_mask, OUTPUT_FLAG_PRIMARY);
        assert_eq!(config.period_size, 960);
        assert_eq!(config.spec.format(), SampleFormat::Pcm8_24);
        let cap = config.capabilities.iter().next().unwrap();
        assert_eq!(
            cap.channel_masks,
            vec![channel::STEREO, channel::SURROUND_5_1, channel::SURROUND_7_1]
        );
    }

    #[test]
    fn unknown_format_is_invalid() {
        let toml = HDMI.replace("\"pcm8_24\", rate", "\"float\", rate");
        let topology = Topology::from_toml(&toml).unwrap();
        assert!(matches!(
            topology.validate(),
            Err(ConfigError::InvalidTopology(_))
        ));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            Topology::from_toml("[[port]]\nname = 3"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    // --- validation ---

    #[test]
    fn group_with_unknown_port_is_invalid() {
        let mut topology = Topology::from_toml(HDMI).unwrap();
        topology.groups.push(GroupEntry {
            name: "outputs".to_string(),
            ports: vec!["hdmi".to_string(), "speaker".to_string()],
        });
        let err = topology.validate().unwrap_err();
        assert!(err.to_string().contains("speaker"), "got: {err}");
    }

    #[test]
    fn rule_with_unknown_criterion_is_invalid() {
        let mut topology = Topology::from_toml(HDMI).unwrap();
        topology.routes[0].rules.push(RuleEntry {
            criterion: "Mode".to_string(),
            values: vec!["Normal".to_string()],
        });
        assert!(topology.validate().is_err());
    }

    // --- files ---

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("platform").join("topology.toml");
        let topology = Topology::from_toml(HDMI).unwrap();
        topology.save(&path).unwrap();
        assert_eq!(Topology::load(&path).unwrap(), topology);
    }

    #[test]
    fn load_missing_file() {
        assert!(matches!(
            Topology::load("/nonexistent/topology.toml"),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    // --- apply ---

    #[test]
    fn apply_declares_routes() {
        let topology = Topology::from_toml(HDMI).unwrap();
        let manager = topology
            .build(Box::new(MockDeviceFactory::new()))
            .unwrap();
        manager.start_service().unwrap();
        let snap = manager.snapshot();
        assert_eq!(snap.ports[0].name, "hdmi");
        assert!(snap.routes[0].applicable);
        assert_eq!(
            manager.capabilities("Hdmi_Playback").unwrap().iter().count(),
            1
        );
    }

    #[test]
    fn apply_reports_route_errors() {
        let mut topology = Topology::from_toml(HDMI).unwrap();
        topology.routes[0].dst = Some("nowhere".to_string());
        let manager = RouteManager::new(Box::new(MockDeviceFactory::new()));
        assert!(matches!(
            topology.apply(&manager),
            Err(ConfigError::Route(audiohal_route::RouteError::UnknownPort(_)))
        ));
    }
}
