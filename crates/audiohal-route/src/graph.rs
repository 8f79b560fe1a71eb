//! Routing graph: arenas of ports, port groups and routes.
//!
//! Ports are the endpoints, routes connect one or two ports in one direction,
//! and port groups declare which ports are mutually exclusive. Exclusion is
//! reference counted: activating a port (0 → 1 active routes) adds a block to
//! every other member of every group the port belongs to, and releasing it
//! (1 → 0) removes those blocks again. A port sharing groups with several
//! active peers stays blocked until the last of them is released.
//!
//! The graph keeps two views of this state. The committed view, stored on
//! each [`Port`], follows the routes whose streams are actually attached. A
//! planning pass builds a fresh view from scratch, selecting routes in
//! declaration order so that the first declared candidate wins a contested
//! port.
//!
//! # Example
//!
//! ```rust
//! use audiohal_route::RoutingGraph;
//!
//! let mut graph = RoutingGraph::new();
//! let speaker = graph.add_port("speaker").unwrap();
//! let headset = graph.add_port("headset").unwrap();
//! let outputs = graph.add_port_group("outputs").unwrap();
//! graph.add_port_to_group(outputs, speaker).unwrap();
//! graph.add_port_to_group(outputs, headset).unwrap();
//!
//! graph.block_mutual_exclusive_port(speaker).unwrap();
//! assert!(graph.port(headset).unwrap().is_blocked());
//! graph.release_mutual_exclusive_port(speaker).unwrap();
//! assert!(!graph.port(headset).unwrap().is_blocked());
//! ```

use tracing::{debug, trace};

use crate::Direction;
use crate::error::{Result, RouteError};
use crate::port::{GroupId, Port, PortGroup, PortId, PortState};
use crate::route::{Route, RouteId, RouteKind, route_key};
use crate::stage::RoutingStage;

/// Maximum routes per direction: one criterion bit each.
pub const MAX_ROUTES_PER_DIRECTION: u32 = 32;

/// Arena-backed routing topology.
#[derive(Debug, Default)]
pub struct RoutingGraph {
    ports: Vec<Port>,
    groups: Vec<PortGroup>,
    routes: Vec<Route>,
    route_count: [u32; 2],
}

impl RoutingGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // --- topology ---

    /// Registers a port.
    pub fn add_port(&mut self, name: &str) -> Result<PortId> {
        if self.port_id(name).is_some() {
            return Err(RouteError::duplicate("port", name));
        }
        let id = PortId(self.ports.len() as u32);
        self.ports.push(Port::new(id, name));
        debug!("graph: added port {name} as {id}");
        Ok(id)
    }

    /// Registers an empty port group.
    pub fn add_port_group(&mut self, name: &str) -> Result<GroupId> {
        if self.group_id(name).is_some() {
            return Err(RouteError::duplicate("port group", name));
        }
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(PortGroup::new(id, name));
        debug!("graph: added port group {name} as {id}");
        Ok(id)
    }

    /// Adds `port` to `group`. Adding a member twice is a no-op.
    pub fn add_port_to_group(&mut self, group: GroupId, port: PortId) -> Result<()> {
        self.check_port(port)?;
        let g = self
            .groups
            .get_mut(group.0 as usize)
            .ok_or_else(|| RouteError::UnknownGroup(group.to_string()))?;
        if g.ports.contains(&port) {
            return Ok(());
        }
        g.ports.push(port);
        self.ports[port.0 as usize].groups.push(group);
        trace!("graph: {port} joins {group}");
        Ok(())
    }

    /// Registers a route through up to two ports.
    ///
    /// Route names are unique per direction; the criterion bit is the next
    /// free bit of the direction.
    pub fn add_route(
        &mut self,
        name: &str,
        src: Option<PortId>,
        dst: Option<PortId>,
        direction: Direction,
        kind: RouteKind,
    ) -> Result<RouteId> {
        if self.route_id(name, direction).is_some() {
            return Err(RouteError::duplicate("route", route_key(name, direction)));
        }
        for port in [src, dst].into_iter().flatten() {
            self.check_port(port)?;
        }
        let count = &mut self.route_count[direction.index()];
        if *count >= MAX_ROUTES_PER_DIRECTION {
            return Err(RouteError::TooManyRoutes(direction));
        }
        let mask = 1u32 << *count;
        *count += 1;

        let id = RouteId(self.routes.len() as u32);
        let ports = [src, dst];
        for port in ports.iter().flatten() {
            self.ports[port.0 as usize].routes.push(id);
        }
        self.routes
            .push(Route::new(id, name, direction, ports, mask, kind));
        debug!(
            "graph: added route {} as {id} (mask {mask:#x})",
            route_key(name, direction)
        );
        Ok(id)
    }

    fn check_port(&self, port: PortId) -> Result<()> {
        if (port.0 as usize) < self.ports.len() {
            Ok(())
        } else {
            Err(RouteError::UnknownPort(port.to_string()))
        }
    }

    fn check_route(&self, route: RouteId) -> Result<()> {
        if (route.0 as usize) < self.routes.len() {
            Ok(())
        } else {
            Err(RouteError::UnknownRoute(route.to_string()))
        }
    }

    // --- lookup ---

    /// All ports in declaration order.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// All port groups in declaration order.
    pub fn groups(&self) -> &[PortGroup] {
        &self.groups
    }

    /// All routes in declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Port by id.
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id.0 as usize)
    }

    /// Port group by id.
    pub fn group(&self, id: GroupId) -> Option<&PortGroup> {
        self.groups.get(id.0 as usize)
    }

    /// Route by id.
    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(id.0 as usize)
    }

    pub(crate) fn route_mut(&mut self, id: RouteId) -> Result<&mut Route> {
        self.routes
            .get_mut(id.0 as usize)
            .ok_or_else(|| RouteError::UnknownRoute(id.to_string()))
    }

    /// Port id by name.
    pub fn port_id(&self, name: &str) -> Option<PortId> {
        self.ports.iter().find(|p| p.name == name).map(|p| p.id)
    }

    /// Port group id by name.
    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    /// Route id by name and direction.
    pub fn route_id(&self, name: &str, direction: Direction) -> Option<RouteId> {
        self.routes
            .iter()
            .find(|r| r.direction == direction && r.name == name)
            .map(|r| r.id)
    }

    /// Route id by key (`<name>_Playback` / `<name>_Capture`).
    pub fn route_id_by_key(&self, key: &str) -> Option<RouteId> {
        Direction::ALL.iter().find_map(|&dir| {
            key.strip_suffix(dir.key_suffix())
                .and_then(|name| self.route_id(name, dir))
        })
    }

    // --- mutual exclusion ---

    /// Activates `port` in the committed state, blocking its group peers on
    /// the first activation.
    pub fn block_mutual_exclusive_port(&mut self, port: PortId) -> Result<()> {
        self.check_port(port)?;
        let mut states = self.committed_states();
        block_in(&mut states, &self.ports, &self.groups, port);
        self.store_states(&states);
        Ok(())
    }

    /// Releases one activation of `port`, unblocking its group peers on the
    /// last release.
    pub fn release_mutual_exclusive_port(&mut self, port: PortId) -> Result<()> {
        self.check_port(port)?;
        let mut states = self.committed_states();
        release_in(&mut states, &self.ports, &self.groups, port);
        self.store_states(&states);
        Ok(())
    }

    fn committed_states(&self) -> Vec<PortState> {
        self.ports.iter().map(|p| p.state).collect()
    }

    fn store_states(&mut self, states: &[PortState]) {
        for (port, state) in self.ports.iter_mut().zip(states) {
            port.state = *state;
        }
    }

    // --- external controls ---

    /// Forces a port blocked or unblocked. Returns whether the flag changed.
    pub fn set_port_blocked(&mut self, port: PortId, blocked: bool) -> Result<bool> {
        self.check_port(port)?;
        let p = &mut self.ports[port.0 as usize];
        if p.forced_blocked == blocked {
            return Ok(false);
        }
        p.forced_blocked = blocked;
        debug!("graph: port {} forced {}", p.name, if blocked { "blocked" } else { "unblocked" });
        Ok(true)
    }

    /// Sets whether the policy allows a route.
    pub fn set_route_applicable(&mut self, route: RouteId, applicable: bool) -> Result<()> {
        self.route_mut(route)?.applicable = applicable;
        Ok(())
    }

    /// Requests (or clears) a mute/unmute cycle on a route that stays in use.
    pub fn set_route_need_reconfigure(&mut self, route: RouteId, need: bool) -> Result<()> {
        self.route_mut(route)?
            .forced_stage
            .set(RoutingStage::FLOW, need);
        Ok(())
    }

    /// Requests (or clears) a disable/enable cycle on a route that stays in use.
    pub fn set_route_need_reroute(&mut self, route: RouteId, need: bool) -> Result<()> {
        self.route_mut(route)?
            .forced_stage
            .set(RoutingStage::PATH, need);
        Ok(())
    }

    // --- availability ---

    fn ports_free(&self, route: &Route, states: &[PortState]) -> bool {
        route.ports().all(|p| {
            let port = &self.ports[p.0 as usize];
            let state = &states[p.0 as usize];
            !port.forced_blocked
                && !state.is_exclusion_blocked()
                && state
                    .owners
                    .iter()
                    .flatten()
                    .all(|&owner| owner == route.id || self.routes[owner.0 as usize].name == route.name)
        })
    }

    /// Whether `route` may be activated now against the committed port state.
    pub fn is_route_available(&self, route: RouteId) -> bool {
        self.route(route).is_some_and(|r| {
            let states = self.committed_states();
            r.applicable && self.ports_free(r, &states)
        })
    }

    pub(crate) fn activate_route(&mut self, route: RouteId) -> Result<()> {
        self.check_route(route)?;
        let r = &self.routes[route.0 as usize];
        if r.active {
            return Ok(());
        }
        let dir = r.direction.index();
        let mut states = self.committed_states();
        for port in r.ports() {
            block_in(&mut states, &self.ports, &self.groups, port);
            states[port.0 as usize].owners[dir] = Some(route);
        }
        self.store_states(&states);
        self.routes[route.0 as usize].active = true;
        trace!("graph: activated {route}");
        Ok(())
    }

    pub(crate) fn deactivate_route(&mut self, route: RouteId) -> Result<()> {
        self.check_route(route)?;
        let r = &self.routes[route.0 as usize];
        if !r.active {
            return Ok(());
        }
        let dir = r.direction.index();
        let mut states = self.committed_states();
        for port in r.ports() {
            states[port.0 as usize].owners[dir] = None;
            release_in(&mut states, &self.ports, &self.groups, port);
        }
        self.store_states(&states);
        self.routes[route.0 as usize].active = false;
        trace!("graph: deactivated {route}");
        Ok(())
    }

    // --- planning ---

    /// Starts a planning pass: shifts each route's usage to
    /// `previously_used` and returns an empty port state.
    pub(crate) fn begin_plan(&mut self) -> Plan {
        for route in &mut self.routes {
            route.reset_availability();
        }
        Plan {
            states: vec![PortState::default(); self.ports.len()],
        }
    }

    /// Whether `route` can be selected given the routes already planned.
    /// Records the planning `blocked` flag.
    pub(crate) fn is_plannable(&mut self, route: RouteId, plan: &Plan) -> bool {
        let Some(r) = self.routes.get(route.0 as usize) else {
            return false;
        };
        let free = self.ports_free(r, &plan.states);
        let applicable = r.applicable;
        trace!(
            "graph: plan {} applicable={applicable} free={free}",
            r.key()
        );
        self.routes[route.0 as usize].blocked = !free;
        applicable && free
    }

    /// Selects `route` in the plan, blocking its ports' group peers.
    pub(crate) fn select(&mut self, route: RouteId, plan: &mut Plan) {
        let Some(r) = self.routes.get_mut(route.0 as usize) else {
            return;
        };
        r.used = true;
        let dir = r.direction.index();
        let ports: Vec<PortId> = r.ports().collect();
        for port in ports {
            block_in(&mut plan.states, &self.ports, &self.groups, port);
            plan.states[port.0 as usize].owners[dir] = Some(route);
        }
    }
}

/// Port state of an in-progress planning pass.
#[derive(Debug)]
pub(crate) struct Plan {
    states: Vec<PortState>,
}

fn peers<'a>(
    ports: &'a [Port],
    groups: &'a [PortGroup],
    port: PortId,
) -> impl Iterator<Item = PortId> + 'a {
    ports[port.0 as usize]
        .groups
        .iter()
        .flat_map(move |g| groups[g.0 as usize].ports.iter().copied())
        .filter(move |&peer| peer != port)
}

fn block_in(states: &mut [PortState], ports: &[Port], groups: &[PortGroup], port: PortId) {
    let state = &mut states[port.0 as usize];
    state.active += 1;
    if state.active != 1 {
        return;
    }
    for peer in peers(ports, groups, port) {
        states[peer.0 as usize].block_refs += 1;
    }
}

fn release_in(states: &mut [PortState], ports: &[Port], groups: &[PortGroup], port: PortId) {
    let state = &mut states[port.0 as usize];
    if state.active == 0 {
        return;
    }
    state.active -= 1;
    if state.active != 0 {
        return;
    }
    for peer in peers(ports, groups, port) {
        let refs = &mut states[peer.0 as usize].block_refs;
        *refs = refs.saturating_sub(1);
    }
}
