//! Capability interfaces of the route manager.
//!
//! Callers discover what a manager supports through
//! [`RouteManager::interfaces`] and then work against the matching trait
//! object, so a topology loader only sees [`RouteInterface`] and a stream
//! layer only sees [`StreamInterface`].

use std::sync::Arc;

use crate::Direction;
use crate::error::Result;
use crate::manager::RouteManager;
use crate::port::{GroupId, PortId};
use crate::route::RouteId;
use crate::stream::{Stream, StreamConfig, StreamId};
use crate::stream_route::StreamRouteConfig;

/// Interfaces a [`RouteManager`] implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Topology and criteria declaration ([`RouteInterface`]).
    Route,
    /// Service, streams, criteria values and routing ([`StreamInterface`]).
    Stream,
}

impl Interface {
    /// Interface name.
    pub fn name(self) -> &'static str {
        match self {
            Interface::Route => "RouteInterface",
            Interface::Stream => "StreamInterface",
        }
    }
}

const INTERFACES: [Interface; 2] = [Interface::Route, Interface::Stream];

/// Topology and criteria declaration, used before the service starts.
pub trait RouteInterface: Send + Sync {
    /// Declares a port.
    fn add_port(&self, name: &str) -> Result<PortId>;
    /// Adds a port to a group, declaring the group on first use.
    fn add_port_group(&self, group: &str, member: &str) -> Result<GroupId>;
    /// Declares a route without a PCM device.
    fn add_route(
        &self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
    ) -> Result<RouteId>;
    /// Declares a route backed by a PCM device.
    fn add_stream_route(
        &self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
        config: StreamRouteConfig,
    ) -> Result<RouteId>;
    /// Replaces a stream route's configuration.
    fn update_stream_route_config(&self, key: &str, config: StreamRouteConfig) -> Result<()>;
    /// Declares a criterion type.
    fn add_criterion_type(&self, name: &str, inclusive: bool) -> Result<bool>;
    /// Adds a value pair to a criterion type.
    fn add_criterion_type_value_pair(&self, type_name: &str, literal: &str, value: i32)
    -> Result<()>;
    /// Declares a criterion.
    fn add_criterion(&self, name: &str, type_name: &str, default_literal: Option<&str>)
    -> Result<()>;
}

/// Runtime entry points used by the stream layer.
pub trait StreamInterface: Send + Sync {
    /// Starts the service.
    fn start_service(&self) -> Result<()>;
    /// Stops the service.
    fn stop_service(&self);
    /// Registers a stream.
    fn add_stream(&self, direction: Direction, config: StreamConfig) -> Arc<Stream>;
    /// Unregisters a stream.
    fn remove_stream(&self, id: StreamId) -> Result<()>;
    /// Marks a stream as started.
    fn start_stream(&self, id: StreamId) -> Result<()>;
    /// Marks a stream as stopped.
    fn stop_stream(&self, id: StreamId) -> Result<()>;
    /// Stages a criterion value.
    fn set_audio_criterion(&self, name: &str, literal: &str) -> Result<bool>;
    /// Formatted committed criterion value.
    fn audio_criterion(&self, name: &str) -> Result<String>;
    /// Runs a routing cycle.
    fn reconsider_routing(&self) -> Result<()>;
    /// Sets the voice volume.
    fn set_voice_volume(&self, gain: f32) -> Result<()>;
    /// Latency for a stream, in microseconds.
    fn latency_us(&self, stream: StreamId) -> Result<u64>;
    /// Period for a stream, in microseconds.
    fn period_us(&self, stream: StreamId) -> Result<u64>;
}

impl RouteManager {
    /// Interfaces this manager implements.
    pub fn interfaces(&self) -> &'static [Interface] {
        &INTERFACES
    }

    /// The manager as a [`RouteInterface`].
    pub fn as_route_interface(&self) -> &dyn RouteInterface {
        self
    }

    /// The manager as a [`StreamInterface`].
    pub fn as_stream_interface(&self) -> &dyn StreamInterface {
        self
    }
}

impl RouteInterface for RouteManager {
    fn add_port(&self, name: &str) -> Result<PortId> {
        RouteManager::add_port(self, name)
    }

    fn add_port_group(&self, group: &str, member: &str) -> Result<GroupId> {
        RouteManager::add_port_group(self, group, member)
    }

    fn add_route(
        &self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
    ) -> Result<RouteId> {
        RouteManager::add_route(self, name, src, dst, direction)
    }

    fn add_stream_route(
        &self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
        config: StreamRouteConfig,
    ) -> Result<RouteId> {
        RouteManager::add_stream_route(self, name, src, dst, direction, config)
    }

    fn update_stream_route_config(&self, key: &str, config: StreamRouteConfig) -> Result<()> {
        RouteManager::update_stream_route_config(self, key, config)
    }

    fn add_criterion_type(&self, name: &str, inclusive: bool) -> Result<bool> {
        RouteManager::add_criterion_type(self, name, inclusive)
    }

    fn add_criterion_type_value_pair(
        &self,
        type_name: &str,
        literal: &str,
        value: i32,
    ) -> Result<()> {
        RouteManager::add_criterion_type_value_pair(self, type_name, literal, value)
    }

    fn add_criterion(
        &self,
        name: &str,
        type_name: &str,
        default_literal: Option<&str>,
    ) -> Result<()> {
        RouteManager::add_criterion(self, name, type_name, default_literal)
    }
}

impl StreamInterface for RouteManager {
    fn start_service(&self) -> Result<()> {
        RouteManager::start_service(self)
    }

    fn stop_service(&self) {
        RouteManager::stop_service(self)
    }

    fn add_stream(&self, direction: Direction, config: StreamConfig) -> Arc<Stream> {
        RouteManager::add_stream(self, direction, config)
    }

    fn remove_stream(&self, id: StreamId) -> Result<()> {
        RouteManager::remove_stream(self, id)
    }

    fn start_stream(&self, id: StreamId) -> Result<()> {
        RouteManager::start_stream(self, id)
    }

    fn stop_stream(&self, id: StreamId) -> Result<()> {
        RouteManager::stop_stream(self, id)
    }

    fn set_audio_criterion(&self, name: &str, literal: &str) -> Result<bool> {
        RouteManager::set_audio_criterion(self, name, literal)
    }

    fn audio_criterion(&self, name: &str) -> Result<String> {
        RouteManager::audio_criterion(self, name)
    }

    fn reconsider_routing(&self) -> Result<()> {
        RouteManager::reconsider_routing(self)
    }

    fn set_voice_volume(&self, gain: f32) -> Result<()> {
        RouteManager::set_voice_volume(self, gain)
    }

    fn latency_us(&self, stream: StreamId) -> Result<u64> {
        RouteManager::latency_us(self, stream)
    }

    fn period_us(&self, stream: StreamId) -> Result<u64> {
        RouteManager::period_us(self, stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceFactory;

    #[test]
    fn interfaces_are_listed_by_name() {
        let m = RouteManager::new(Box::new(MockDeviceFactory::new()));
        let names: Vec<_> = m.interfaces().iter().map(|i| i.name()).collect();
        assert_eq!(names, ["RouteInterface", "StreamInterface"]);
    }

    #[test]
    fn trait_objects_reach_the_manager() {
        let m = RouteManager::new(Box::new(MockDeviceFactory::new()));
        let topology = m.as_route_interface();
        topology.add_port("speaker").unwrap();
        topology
            .add_route("Media", None, Some("speaker"), Direction::Output)
            .unwrap();

        let streams = m.as_stream_interface();
        streams.start_service().unwrap();
        assert!(m.is_started());
        assert!(matches!(
            topology.add_port("headset"),
            Err(crate::RouteError::TopologyLocked)
        ));
        let s = streams.add_stream(Direction::Output, StreamConfig::default());
        assert!(streams.start_stream(s.id()).is_ok());
    }
}
