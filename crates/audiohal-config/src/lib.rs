//! Configuration for audiohal: topology files, rule policy and parameters.
//!
//! # Features
//!
//! - **Topology**: Describe ports, groups, routes and criteria in TOML and
//!   declare them on a [`RouteManager`](audiohal_route::RouteManager)
//! - **Rule policy**: Route applicability from criterion literals
//! - **Parameters**: `;`-separated key/value blobs and an atomically saved store
//! - **Paths**: Platform-specific config and topology directories
//!
//! # Example
//!
//! ```rust
//! use audiohal_config::Topology;
//! use audiohal_route::MockDeviceFactory;
//!
//! let topology = Topology::from_toml(r#"
//!     [[port]]
//!     name = "speaker"
//!
//!     [[route]]
//!     name = "Media"
//!     direction = "output"
//!     dst = "speaker"
//!
//!     [route.stream]
//!     spec = { channels = 2, format = "pcm16", rate = 48000 }
//! "#)?;
//!
//! let manager = topology.build(Box::new(MockDeviceFactory::new()))?;
//! manager.start_service()?;
//! assert_eq!(manager.snapshot().routes[0].key, "Media_Playback");
//! # Ok::<(), audiohal_config::ConfigError>(())
//! ```

mod error;
mod policy;
mod topology;

/// Key/value parameter blobs and the persisted store.
pub mod params;

/// Platform-specific paths.
pub mod paths;

pub use error::{ConfigError, Result};
pub use params::{KeyValuePairs, ParameterError, ParameterStore};
pub use policy::{Rule, RulePolicy};
pub use topology::{
    CapabilityEntry, CriterionEntry, CriterionTypeEntry, GroupEntry, PortEntry, RouteDirection,
    RouteEntry, RuleEntry, SpecEntry, StreamRouteEntry, Topology, ValuePairEntry,
};
