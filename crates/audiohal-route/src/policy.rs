//! Policy engine hooks.
//!
//! The route manager decides *when* routes change; a [`PolicyEngine`] decides
//! *which* routes are allowed. At the start of each routing cycle the engine
//! evaluates the criteria and adjusts route applicability, forced stages and
//! forced port blocks through a [`RouteControl`]. During the cycle it is told
//! about every stage it should apply to the audio path.

use crate::criterion::CriterionSet;
use crate::error::{Result, RouteError};
use crate::graph::RoutingGraph;
use crate::route::Route;
use crate::stage::RoutingStage;

/// Routing policy.
pub trait PolicyEngine: Send + Sync {
    /// Adjusts routes from the criteria. Runs before planning.
    ///
    /// User criteria staged since the last cycle are still pending here; read
    /// [`Criterion::pending`](crate::Criterion::pending) to see them.
    fn evaluate(&mut self, criteria: &CriterionSet, control: &mut RouteControl<'_>) -> Result<()>;

    /// Applies the audio path configuration for `stage`.
    fn apply(&mut self, stage: RoutingStage, criteria: &CriterionSet) {
        let _ = (stage, criteria);
    }

    /// Voice call volume changed.
    fn set_voice_volume(&mut self, gain: f32) {
        let _ = gain;
    }
}

/// Policy that leaves routes as the manager's controls set them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPolicy;

impl PolicyEngine for NoopPolicy {
    fn evaluate(&mut self, _criteria: &CriterionSet, _control: &mut RouteControl<'_>) -> Result<()> {
        Ok(())
    }
}

/// Route and port controls handed to [`PolicyEngine::evaluate`].
pub struct RouteControl<'a> {
    graph: &'a mut RoutingGraph,
}

impl<'a> RouteControl<'a> {
    pub(crate) fn new(graph: &'a mut RoutingGraph) -> Self {
        Self { graph }
    }

    /// Read access to the topology.
    pub fn graph(&self) -> &RoutingGraph {
        self.graph
    }

    /// All routes in declaration order.
    pub fn routes(&self) -> &[Route] {
        self.graph.routes()
    }

    /// Sets whether the route with `key` may be selected.
    pub fn set_applicable(&mut self, key: &str, applicable: bool) -> Result<()> {
        let id = self.route_id(key)?;
        self.graph.set_route_applicable(id, applicable)
    }

    /// Forces a mute/unmute cycle on the route with `key` while it stays in use.
    pub fn set_need_reconfigure(&mut self, key: &str, need: bool) -> Result<()> {
        let id = self.route_id(key)?;
        self.graph.set_route_need_reconfigure(id, need)
    }

    /// Forces a disable/enable cycle on the route with `key` while it stays in use.
    pub fn set_need_reroute(&mut self, key: &str, need: bool) -> Result<()> {
        let id = self.route_id(key)?;
        self.graph.set_route_need_reroute(id, need)
    }

    /// Forces a port blocked. Returns whether the flag changed.
    pub fn set_port_blocked(&mut self, port: &str, blocked: bool) -> Result<bool> {
        let id = self
            .graph
            .port_id(port)
            .ok_or_else(|| RouteError::UnknownPort(port.to_string()))?;
        self.graph.set_port_blocked(id, blocked)
    }

    fn route_id(&self, key: &str) -> Result<crate::RouteId> {
        self.graph
            .route_id_by_key(key)
            .ok_or_else(|| RouteError::UnknownRoute(key.to_string()))
    }
}
