//! Ports and mutually exclusive port groups.

use std::fmt;

use crate::Direction;
use crate::route::RouteId;

/// Arena index of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) u32);

impl PortId {
    /// Returns the raw index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortId({})", self.0)
    }
}

/// Arena index of a port group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    /// Returns the raw index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

/// Reference-counted exclusivity state of one port.
///
/// The routing graph keeps one committed copy per port and builds a fresh
/// copy for every planning pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortState {
    /// Number of active routes on the port.
    pub active: u32,
    /// Number of active group peers blocking the port.
    pub block_refs: u32,
    /// Route holding the port, per direction.
    pub owners: [Option<RouteId>; 2],
}

impl PortState {
    /// Whether a group peer blocks the port.
    pub fn is_exclusion_blocked(&self) -> bool {
        self.block_refs > 0
    }

    /// Route holding the port in `direction`.
    pub fn owner(&self, direction: Direction) -> Option<RouteId> {
        self.owners[direction.index()]
    }
}

/// A physical or logical audio endpoint.
#[derive(Debug, Clone)]
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) name: String,
    pub(crate) groups: Vec<GroupId>,
    pub(crate) routes: Vec<RouteId>,
    pub(crate) forced_blocked: bool,
    pub(crate) state: PortState,
}

impl Port {
    pub(crate) fn new(id: PortId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            groups: Vec::new(),
            routes: Vec::new(),
            forced_blocked: false,
            state: PortState::default(),
        }
    }

    /// Port id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Groups this port belongs to.
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// Routes using this port, in declaration order.
    pub fn routes(&self) -> &[RouteId] {
        &self.routes
    }

    /// Whether the port is blocked by an external request or by an active
    /// group peer.
    pub fn is_blocked(&self) -> bool {
        self.forced_blocked || self.state.is_exclusion_blocked()
    }

    /// Whether an external request blocks the port.
    pub fn is_forced_blocked(&self) -> bool {
        self.forced_blocked
    }

    /// Number of active group peers blocking the port.
    pub fn block_refs(&self) -> u32 {
        self.state.block_refs
    }

    /// Whether at least one active route uses the port.
    pub fn is_active(&self) -> bool {
        self.state.active > 0
    }

    /// Route holding the port in `direction`.
    pub fn attached_route(&self, direction: Direction) -> Option<RouteId> {
        self.state.owner(direction)
    }
}

/// A set of ports of which at most one may be active at a time.
#[derive(Debug, Clone)]
pub struct PortGroup {
    pub(crate) id: GroupId,
    pub(crate) name: String,
    pub(crate) ports: Vec<PortId>,
}

impl PortGroup {
    pub(crate) fn new(id: GroupId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            ports: Vec::new(),
        }
    }

    /// Group id.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member ports.
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }
}
