//! audiohal-route - routing graph, stream attachment and route manager
//!
//! This crate decides which physical ports each stream may use, keeps
//! mutually exclusive ports apart, and binds streams to PCM devices through
//! a conversion pipeline from `audiohal-core`.
//!
//! # Core Abstractions
//!
//! ## Topology
//!
//! - [`RoutingGraph`] - Arenas of [`Port`]s, [`PortGroup`]s and [`Route`]s with
//!   reference-counted mutual exclusion
//! - [`RouteKind`] - Stream-less path or [`StreamRoute`] backed by a device
//! - [`AudioCapabilities`] - Alternative native specs of a stream route
//!
//! ## Streams and Devices
//!
//! - [`Stream`] - Attach/detach state machine plus the `read`/`write` data path
//! - [`AudioDevice`] / [`DeviceFactory`] - PCM endpoint abstraction
//! - [`MockDevice`] / [`MockDeviceFactory`] - Recording in-memory backend
//!
//! ## Policy and Criteria
//!
//! - [`CriterionSet`] - Typed criteria with pending and committed values
//! - [`PolicyEngine`] - Decides route applicability and applies each
//!   [`RoutingStage`]
//!
//! ## Facade
//!
//! - [`RouteManager`] - Context object running five-stage routing cycles
//! - [`RouteInterface`] / [`StreamInterface`] - Capability interfaces
//!
//! # Example
//!
//! ```rust
//! use audiohal_route::{Direction, MockDeviceFactory, RouteManager};
//!
//! let manager = RouteManager::new(Box::new(MockDeviceFactory::new()));
//! manager.add_port("modem")?;
//! manager.add_route("Voice", Some("modem"), None, Direction::Output)?;
//! manager.start_service()?;
//! manager.set_route_applicable("Voice_Playback", true)?;
//! manager.reconsider_routing()?;
//!
//! let snapshot = manager.snapshot();
//! assert!(snapshot.routes[0].used);
//! assert_eq!(manager.audio_criterion("OpenedPlaybackRoutes")?, "Voice");
//! # Ok::<(), audiohal_route::RouteError>(())
//! ```

pub mod capabilities;
pub mod criterion;
pub mod device;
pub mod error;
pub mod graph;
pub mod interface;
pub mod manager;
pub mod policy;
pub mod port;
pub mod route;
pub mod stage;
pub mod stream;
pub mod stream_route;

pub use capabilities::{AudioCapabilities, AudioCapability};
pub use criterion::{Criterion, CriterionSet, CriterionType};
pub use device::{
    AudioDevice, DeviceEvent, DeviceFactory, DeviceParams, MockDevice, MockDeviceFactory,
    MockDeviceLog,
};
pub use error::{DeviceError, Result, RouteError};
pub use graph::{MAX_ROUTES_PER_DIRECTION, RoutingGraph};
pub use interface::{Interface, RouteInterface, StreamInterface};
pub use manager::{
    PortStatus, ROUTAGE_STATE, RouteManager, RouteStatus, RoutingSnapshot, StreamStatus,
    closing_routes_criterion, opened_routes_criterion, route_criterion_type,
};
pub use policy::{NoopPolicy, PolicyEngine, RouteControl};
pub use port::{GroupId, Port, PortGroup, PortId, PortState};
pub use route::{Direction, Route, RouteId, RouteKind, route_key};
pub use stage::RoutingStage;
pub use stream::{AttachState, Stream, StreamConfig, StreamId};
pub use stream_route::{INPUT_FLAG_PRIMARY, OUTPUT_FLAG_PRIMARY, StreamRoute, StreamRouteConfig};
