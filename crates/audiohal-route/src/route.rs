//! Routes: a named path through one or two ports in one direction.

use std::fmt;

use crate::port::PortId;
use crate::stage::RoutingStage;
use crate::stream_route::StreamRoute;

/// Audio direction of a route or stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Capture.
    Input,
    /// Playback.
    Output,
}

impl Direction {
    /// Both directions, capture first.
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// Array index for per-direction tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }

    /// Whether this is playback.
    #[inline]
    pub fn is_output(self) -> bool {
        self == Direction::Output
    }

    /// Suffix appended to a route name to build its key.
    pub fn key_suffix(self) -> &'static str {
        match self {
            Direction::Input => "_Capture",
            Direction::Output => "_Playback",
        }
    }

    /// Word used in criterion names ("Capture" / "Playback").
    pub fn criterion_word(self) -> &'static str {
        match self {
            Direction::Input => "Capture",
            Direction::Output => "Playback",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Arena index of a route in the routing graph.
///
/// Ids are assigned in declaration order and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub(crate) u32);

impl RouteId {
    /// Returns the raw index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteId({})", self.0)
    }
}

/// Whether a route carries a stream.
#[derive(Debug)]
pub enum RouteKind {
    /// Path-only route (e.g. a modem or Bluetooth SCO link) with no PCM device.
    StreamLess,
    /// Route backed by a PCM device that streams attach to.
    Stream(StreamRoute),
}

/// Builds the unique key of a route: `<name>_Playback` or `<name>_Capture`.
pub fn route_key(name: &str, direction: Direction) -> String {
    format!("{name}{}", direction.key_suffix())
}

/// A route in the routing graph.
#[derive(Debug)]
pub struct Route {
    pub(crate) id: RouteId,
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) ports: [Option<PortId>; 2],
    pub(crate) mask: u32,
    pub(crate) applicable: bool,
    pub(crate) forced_stage: RoutingStage,
    /// Blocked by a port chosen earlier in the current planning pass.
    pub(crate) blocked: bool,
    pub(crate) used: bool,
    pub(crate) previously_used: bool,
    /// Ports are activated in the committed port state.
    pub(crate) active: bool,
    pub(crate) kind: RouteKind,
}

impl Route {
    pub(crate) fn new(
        id: RouteId,
        name: &str,
        direction: Direction,
        ports: [Option<PortId>; 2],
        mask: u32,
        kind: RouteKind,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            direction,
            ports,
            mask,
            applicable: false,
            forced_stage: RoutingStage::NONE,
            blocked: false,
            used: false,
            previously_used: false,
            active: false,
            kind,
        }
    }

    /// Route id.
    pub fn id(&self) -> RouteId {
        self.id
    }

    /// Route name, shared by the playback and capture routes of a full-duplex path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique key (`<name>_Playback` / `<name>_Capture`).
    pub fn key(&self) -> String {
        route_key(&self.name, self.direction)
    }

    /// Route direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Ports used by the route.
    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.ports.iter().flatten().copied()
    }

    /// Criterion bit of this route within its direction.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Applicability set by the policy engine.
    pub fn is_applicable(&self) -> bool {
        self.applicable
    }

    /// Stages the policy engine forced on this route.
    pub fn forced_stage(&self) -> RoutingStage {
        self.forced_stage
    }

    /// Selected by the last planning pass.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Selected by the planning pass before the last one.
    pub fn previously_used(&self) -> bool {
        self.previously_used
    }

    /// Blocked during the last planning pass.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Whether the route's ports are currently activated.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the route carries streams.
    pub fn is_stream_route(&self) -> bool {
        matches!(self.kind, RouteKind::Stream(_))
    }

    /// Stream-route data, if any.
    pub fn stream_route(&self) -> Option<&StreamRoute> {
        match &self.kind {
            RouteKind::Stream(sr) => Some(sr),
            RouteKind::StreamLess => None,
        }
    }

    pub(crate) fn stream_route_mut(&mut self) -> Option<&mut StreamRoute> {
        match &mut self.kind {
            RouteKind::Stream(sr) => Some(sr),
            RouteKind::StreamLess => None,
        }
    }

    fn still_used(&self) -> bool {
        self.previously_used && self.used
    }

    /// Stays in use but must be muted and reconfigured.
    pub fn need_reflow(&self) -> bool {
        let stream_changed = self
            .stream_route()
            .is_some_and(|sr| sr.current_stream() != sr.new_stream());
        self.still_used()
            && (self.forced_stage.contains(RoutingStage::FLOW)
                || self.forced_stage.contains(RoutingStage::PATH)
                || stream_changed)
    }

    /// Stays in use but its path must be torn down and rebuilt.
    pub fn need_repath(&self) -> bool {
        self.still_used() && self.forced_stage.contains(RoutingStage::PATH)
    }

    /// Start of a planning pass: remember the previous selection and clear
    /// the current one.
    pub(crate) fn reset_availability(&mut self) {
        self.blocked = false;
        self.previously_used = self.used;
        self.used = false;
        if let Some(sr) = self.stream_route_mut() {
            sr.new_stream = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(kind: RouteKind) -> Route {
        Route::new(RouteId(0), "Media", Direction::Output, [None, None], 1, kind)
    }

    #[test]
    fn key_uses_direction_suffix() {
        assert_eq!(route_key("Media", Direction::Output), "Media_Playback");
        assert_eq!(route_key("Voice", Direction::Input), "Voice_Capture");
        assert_eq!(route(RouteKind::StreamLess).key(), "Media_Playback");
    }

    #[test]
    fn reflow_and_repath_need_continuous_use() {
        let mut r = route(RouteKind::StreamLess);
        r.forced_stage = RoutingStage::PATH;
        r.used = true;
        assert!(!r.need_repath());
        r.previously_used = true;
        assert!(r.need_repath());
        assert!(r.need_reflow());

        r.forced_stage = RoutingStage::FLOW;
        assert!(!r.need_repath());
        assert!(r.need_reflow());

        r.forced_stage = RoutingStage::CONFIGURE;
        assert!(!r.need_reflow());
    }

    #[test]
    fn reset_shifts_usage() {
        let mut r = route(RouteKind::StreamLess);
        r.used = true;
        r.blocked = true;
        r.reset_availability();
        assert!(r.previously_used());
        assert!(!r.is_used());
        assert!(!r.is_blocked());
        r.reset_availability();
        assert!(!r.previously_used());
    }

    #[test]
    fn direction_tables() {
        assert_eq!(Direction::Input.index(), 0);
        assert_eq!(Direction::Output.index(), 1);
        assert_eq!(Direction::Output.criterion_word(), "Playback");
        assert_eq!(Direction::Input.to_string(), "input");
    }
}
