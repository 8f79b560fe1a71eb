//! Error types for routing, criteria and stream attachment.

use audiohal_core::ConversionError;
use thiserror::Error;

use crate::Direction;
use crate::stream::AttachState;

/// Errors reported by an [`AudioDevice`](crate::AudioDevice) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device could not be opened.
    #[error("failed to open {card}:{device}: {reason}")]
    Open {
        /// Card name from the route config.
        card: String,
        /// PCM device number on the card.
        device: u32,
        /// Backend-specific reason.
        reason: String,
    },

    /// Closing the device failed.
    #[error("failed to close device: {0}")]
    Close(String),

    /// A read or write was attempted on a device that is not open.
    #[error("device is not open")]
    NotOpen,

    /// The backend rejected a read or write.
    #[error("device i/o failed: {0}")]
    Io(String),
}

/// Errors reported by the routing graph, criteria and the route manager.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No port with this name or id exists.
    #[error("unknown port: {0}")]
    UnknownPort(String),

    /// No port group with this name or id exists.
    #[error("unknown port group: {0}")]
    UnknownGroup(String),

    /// No route with this key or id exists.
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// No stream with this id is registered.
    #[error("unknown stream: {0}")]
    UnknownStream(u32),

    /// An element with the same name is already registered.
    #[error("duplicate {kind} name: {name}")]
    DuplicateName {
        /// Element kind ("port", "route", "criterion", ...).
        kind: &'static str,
        /// The clashing name.
        name: String,
    },

    /// Every criterion bit of this direction is taken.
    #[error("too many {0} routes: at most 32 per direction")]
    TooManyRoutes(Direction),

    /// Topology changes are refused once the service is started.
    #[error("topology is locked while the route manager is started")]
    TopologyLocked,

    /// No criterion with this name exists.
    #[error("unknown criterion: {0}")]
    UnknownCriterion(String),

    /// No criterion type with this name exists.
    #[error("unknown criterion type: {0}")]
    UnknownCriterionType(String),

    /// The literal does not name a value of the criterion type.
    #[error("invalid literal {literal:?} for criterion type {criterion_type}")]
    InvalidLiteral {
        /// Criterion type that rejected the literal.
        criterion_type: String,
        /// The rejected literal.
        literal: String,
    },

    /// Voice volume must lie in `[0.0, 1.0]`.
    #[error("voice volume {0} out of range [0.0, 1.0]")]
    VolumeOutOfRange(f32),

    /// The stream is not in a state that allows this transition.
    #[error("stream {stream} cannot {action} while {state}")]
    InvalidTransition {
        /// Stream id.
        stream: u32,
        /// Requested action ("attach" or "detach").
        action: &'static str,
        /// Current attachment state.
        state: AttachState,
    },

    /// The route cannot take a stream right now.
    #[error("route {route} unavailable: {reason}")]
    RouteUnavailable {
        /// Route key.
        route: String,
        /// Why the route was refused.
        reason: &'static str,
    },

    /// Stream and route directions differ.
    #[error("direction mismatch: stream is {stream}, route is {route}")]
    DirectionMismatch {
        /// Stream direction.
        stream: Direction,
        /// Route direction.
        route: Direction,
    },

    /// A write was attempted on a stream without a route.
    #[error("stream {0} is not routed")]
    NotRouted(u32),

    /// The route device failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The conversion pipeline could not be configured or run.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Attaching a stream during the enable stage failed.
    #[error("failed to attach route {route}: {source}")]
    AttachFailed {
        /// Route key.
        route: String,
        /// Underlying failure.
        source: Box<RouteError>,
    },
}

impl RouteError {
    /// Create a duplicate-name error.
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        RouteError::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    /// Create a route-unavailable error.
    pub fn unavailable(route: impl Into<String>, reason: &'static str) -> Self {
        RouteError::RouteUnavailable {
            route: route.into(),
            reason,
        }
    }

    /// Wrap an attach failure with the route it happened on.
    pub fn attach_failed(route: impl Into<String>, source: RouteError) -> Self {
        RouteError::AttachFailed {
            route: route.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RouteError>;
