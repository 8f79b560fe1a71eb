//! Route manager: the context object that owns the routing graph, the
//! criteria, the streams and the policy, and runs routing cycles.
//!
//! A routing cycle ([`RouteManager::reconsider_routing`]) runs under the
//! manager's write lock, so observers taking the read side (queries,
//! [`RouteManager::snapshot`]) never see a half-applied cycle. When the plan
//! differs from the previous one the cycle runs five stages, publishing the
//! stage in the `RoutageState` criterion and the affected routes in the
//! `Opened*Routes` / `Closing*Routes` criteria before each apply:
//!
//! | stage     | `RoutageState`          | streams                           |
//! |-----------|-------------------------|-----------------------------------|
//! | mute      | `Flow`                  |                                   |
//! | disable   | `Path`                  | detach routes going away          |
//! | configure | `Configure`             | swap streams on routes kept alive |
//! | enable    | `Path\|Configure`       | attach routes coming up           |
//! | unmute    | `Flow\|Path\|Configure` |                                   |
//!
//! User criteria staged with [`RouteManager::set_audio_criterion`] are only
//! committed at the configure stage, so the mute and disable stages still
//! apply the old configuration.
//!
//! # Example
//!
//! ```rust
//! use audiohal_route::{
//!     Direction, MockDeviceFactory, OUTPUT_FLAG_PRIMARY, RouteManager, StreamConfig,
//!     StreamRouteConfig,
//! };
//!
//! let manager = RouteManager::new(Box::new(MockDeviceFactory::new()));
//! manager.add_port("speaker")?;
//! let config = StreamRouteConfig {
//!     flag_mask: OUTPUT_FLAG_PRIMARY,
//!     ..StreamRouteConfig::default()
//! };
//! manager.add_stream_route("Media", None, Some("speaker"), Direction::Output, config)?;
//! manager.start_service()?;
//! manager.set_route_applicable("Media_Playback", true)?;
//!
//! let stream = manager.add_stream(Direction::Output, StreamConfig::default());
//! manager.start_stream(stream.id())?;
//! manager.reconsider_routing()?;
//! assert!(stream.is_routed());
//! # Ok::<(), audiohal_route::RouteError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use audiohal_core::{LinearResampler, ResamplerPrimitive};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, trace, warn};

use crate::Direction;
use crate::capabilities::{AudioCapabilities, AudioCapability};
use crate::criterion::CriterionSet;
use crate::device::DeviceFactory;
use crate::error::{Result, RouteError};
use crate::graph::RoutingGraph;
use crate::policy::{NoopPolicy, PolicyEngine, RouteControl};
use crate::port::{GroupId, PortId};
use crate::route::{RouteId, RouteKind, route_key};
use crate::stage::RoutingStage;
use crate::stream::{AttachState, Stream, StreamConfig, StreamId};
use crate::stream_route::{StreamRoute, StreamRouteConfig};

/// Criterion (and criterion type) carrying the current routing stage.
pub const ROUTAGE_STATE: &str = "RoutageState";

/// Name of the criterion listing the routes kept open during a stage.
pub fn opened_routes_criterion(direction: Direction) -> String {
    format!("Opened{}Routes", direction.criterion_word())
}

/// Name of the criterion listing the routes being closed during a stage.
pub fn closing_routes_criterion(direction: Direction) -> String {
    format!("Closing{}Routes", direction.criterion_word())
}

/// Name of the inclusive criterion type holding one bit per route.
pub fn route_criterion_type(direction: Direction) -> String {
    format!("Route{}Type", direction.criterion_word())
}

#[derive(Debug, Clone, Copy, Default)]
struct RouteMasks {
    prev: u32,
    enabled: u32,
    need_reflow: u32,
    need_repath: u32,
}

impl RouteMasks {
    fn changed(&self) -> bool {
        self.prev != self.enabled || self.need_reflow != 0 || self.need_repath != 0
    }
}

struct RoutingState {
    graph: RoutingGraph,
    criteria: CriterionSet,
    policy: Box<dyn PolicyEngine>,
    factory: Box<dyn DeviceFactory>,
    primitive: Arc<dyn ResamplerPrimitive>,
    streams: Vec<Arc<Stream>>,
    next_stream: u32,
    masks: [RouteMasks; 2],
    started: bool,
    voice_volume: f32,
}

/// Routing context object.
///
/// Every method takes `&self`; share the manager behind an `Arc` between the
/// control thread and stream threads.
pub struct RouteManager {
    state: RwLock<RoutingState>,
}

impl fmt::Debug for RouteManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("RouteManager")
            .field("started", &state.started)
            .field("routes", &state.graph.routes().len())
            .field("streams", &state.streams.len())
            .finish()
    }
}

impl RouteManager {
    /// Creates a manager whose stream routes get their devices from `factory`.
    ///
    /// The policy defaults to [`NoopPolicy`] and resampling to
    /// [`LinearResampler`].
    pub fn new(factory: Box<dyn DeviceFactory>) -> Self {
        let mut criteria = CriterionSet::new();
        for dir in Direction::ALL {
            criteria.add_type(&route_criterion_type(dir), true);
        }
        criteria.add_type(ROUTAGE_STATE, true);
        for (stage, literal) in [
            (RoutingStage::FLOW, "Flow"),
            (RoutingStage::PATH, "Path"),
            (RoutingStage::CONFIGURE, "Configure"),
        ] {
            // The type was just declared.
            let _ = criteria.add_value_pair(ROUTAGE_STATE, literal, stage.bits() as i32);
        }

        Self {
            state: RwLock::new(RoutingState {
                graph: RoutingGraph::new(),
                criteria,
                policy: Box::new(NoopPolicy),
                factory,
                primitive: Arc::new(LinearResampler::default()),
                streams: Vec::new(),
                next_stream: 0,
                masks: [RouteMasks::default(); 2],
                started: false,
                voice_volume: 1.0,
            }),
        }
    }

    /// Replaces the policy engine.
    pub fn with_policy(mut self, policy: Box<dyn PolicyEngine>) -> Self {
        self.state.get_mut().policy = policy;
        self
    }

    /// Replaces the resampling primitive used by route spec selection and
    /// stream pipelines.
    pub fn with_resampler(mut self, primitive: Arc<dyn ResamplerPrimitive>) -> Self {
        self.state.get_mut().primitive = primitive;
        self
    }

    fn topology(&self) -> Result<RwLockWriteGuard<'_, RoutingState>> {
        let state = self.state.write();
        if state.started {
            return Err(RouteError::TopologyLocked);
        }
        Ok(state)
    }

    // --- topology ---

    /// Declares a port.
    pub fn add_port(&self, name: &str) -> Result<PortId> {
        self.topology()?.graph.add_port(name)
    }

    /// Adds port `member` to group `group`, declaring the group on first use.
    pub fn add_port_group(&self, group: &str, member: &str) -> Result<GroupId> {
        let mut state = self.topology()?;
        let port = state
            .graph
            .port_id(member)
            .ok_or_else(|| RouteError::UnknownPort(member.to_string()))?;
        let group = match state.graph.group_id(group) {
            Some(id) => id,
            None => state.graph.add_port_group(group)?,
        };
        state.graph.add_port_to_group(group, port)?;
        Ok(group)
    }

    /// Declares a route without a PCM device.
    pub fn add_route(
        &self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
    ) -> Result<RouteId> {
        let mut state = self.topology()?;
        state.add_route(name, src, dst, direction, RouteKind::StreamLess)
    }

    /// Declares a route backed by a PCM device.
    pub fn add_stream_route(
        &self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
        config: StreamRouteConfig,
    ) -> Result<RouteId> {
        let mut state = self.topology()?;
        let device = state.factory.create(&route_key(name, direction), &config);
        let kind = RouteKind::Stream(StreamRoute::new(config, device));
        state.add_route(name, src, dst, direction, kind)
    }

    /// Replaces the configuration of the stream route with `key`.
    pub fn update_stream_route_config(&self, key: &str, config: StreamRouteConfig) -> Result<()> {
        let mut state = self.topology()?;
        let id = state.route_id(key)?;
        let sr = state
            .graph
            .route_mut(id)?
            .stream_route_mut()
            .ok_or_else(|| RouteError::unavailable(key, "not a stream route"))?;
        sr.config = config;
        debug!("route manager: updated config of {key}");
        Ok(())
    }

    /// Declares a criterion type. Returns `false` when it already exists.
    pub fn add_criterion_type(&self, name: &str, inclusive: bool) -> Result<bool> {
        Ok(self.topology()?.criteria.add_type(name, inclusive))
    }

    /// Adds a `literal = value` pair to a criterion type.
    pub fn add_criterion_type_value_pair(
        &self,
        type_name: &str,
        literal: &str,
        value: i32,
    ) -> Result<()> {
        self.topology()?
            .criteria
            .add_value_pair(type_name, literal, value)
    }

    /// Declares a criterion, optionally initialised from a literal.
    pub fn add_criterion(
        &self,
        name: &str,
        type_name: &str,
        default_literal: Option<&str>,
    ) -> Result<()> {
        self.topology()?
            .criteria
            .add_criterion(name, type_name, default_literal)
    }

    // --- service ---

    /// Creates the routing criteria and locks the topology.
    pub fn start_service(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.started {
            warn!("route manager: service already started");
            return Ok(());
        }
        for dir in Direction::ALL {
            let ty = route_criterion_type(dir);
            for name in [opened_routes_criterion(dir), closing_routes_criterion(dir)] {
                if state.criteria.get(&name).is_none() {
                    state.criteria.add_criterion(&name, &ty, None)?;
                }
            }
        }
        if state.criteria.get(ROUTAGE_STATE).is_none() {
            state
                .criteria
                .add_criterion(ROUTAGE_STATE, ROUTAGE_STATE, None)?;
        }
        // Apply everything pending on the first cycle.
        state
            .criteria
            .set_state(ROUTAGE_STATE, RoutingStage::ALL.bits() as i32)?;
        state.started = true;
        debug!(
            "route manager: started with {} ports, {} routes",
            state.graph.ports().len(),
            state.graph.routes().len()
        );
        Ok(())
    }

    /// Stops serving routing requests. Attached streams stay attached.
    pub fn stop_service(&self) {
        let mut state = self.state.write();
        if state.started {
            state.started = false;
            debug!("route manager: stopped");
        }
    }

    /// Whether the service is started.
    pub fn is_started(&self) -> bool {
        self.state.read().started
    }

    // --- streams ---

    /// Registers a stream. It asks for a route once started.
    pub fn add_stream(&self, direction: Direction, config: StreamConfig) -> Arc<Stream> {
        let mut state = self.state.write();
        let id = StreamId(state.next_stream);
        state.next_stream += 1;
        let stream = Arc::new(Stream::new(id, direction, config));
        state.streams.push(Arc::clone(&stream));
        debug!("route manager: added {direction} {id}");
        stream
    }

    /// Unregisters a stream, detaching it first if it is routed.
    pub fn remove_stream(&self, id: StreamId) -> Result<()> {
        let mut state = self.state.write();
        let pos = state
            .streams
            .iter()
            .position(|s| s.id() == id)
            .ok_or(RouteError::UnknownStream(id.0))?;
        let stream = Arc::clone(&state.streams[pos]);
        stream.set_started(false);
        if let Some(route) = stream.route() {
            state.detach_route(route)?;
        }
        state.streams.remove(pos);
        debug!("route manager: removed {id}");
        Ok(())
    }

    /// Marks a stream as wanting a route. Takes effect at the next routing cycle.
    pub fn start_stream(&self, id: StreamId) -> Result<()> {
        self.state.read().stream(id)?.set_started(true);
        Ok(())
    }

    /// Marks a stream as no longer wanting a route. Takes effect at the next
    /// routing cycle.
    pub fn stop_stream(&self, id: StreamId) -> Result<()> {
        self.state.read().stream(id)?.set_started(false);
        Ok(())
    }

    /// Registered stream by id.
    pub fn stream(&self, id: StreamId) -> Option<Arc<Stream>> {
        self.state.read().stream(id).ok()
    }

    /// All registered streams.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.state.read().streams.clone()
    }

    /// Attaches `stream` to the stream route with `route` outside a routing
    /// cycle.
    ///
    /// The route must be applicable, its ports free and its device not held
    /// by another stream; otherwise the call fails with
    /// [`RouteError::RouteUnavailable`] and nothing changes.
    pub fn attach_stream(&self, stream: StreamId, route: &str) -> Result<()> {
        let mut state = self.state.write();
        let id = state.route_id(route)?;
        let stream = state.stream(stream)?;
        let applicable = state.graph.route(id).is_some_and(|r| r.is_applicable());
        if !applicable {
            return Err(RouteError::unavailable(route, "not applicable"));
        }
        if !state.graph.is_route_available(id) {
            return Err(RouteError::unavailable(route, "port blocked"));
        }
        state.attach_route(id, &stream)?;
        state.mark_used(id, true);
        Ok(())
    }

    /// Detaches `stream` from its route outside a routing cycle.
    pub fn detach_stream(&self, stream: StreamId) -> Result<()> {
        let mut state = self.state.write();
        let stream = state.stream(stream)?;
        let Some(route) = stream.route() else {
            return Err(RouteError::InvalidTransition {
                stream: stream.id().0,
                action: "detach",
                state: stream.state(),
            });
        };
        state.detach_route(route)?;
        state.mark_used(route, false);
        Ok(())
    }

    // --- criteria ---

    /// Stages a criterion value from a literal. Returns whether the pending
    /// value changed; an unchanged value needs no routing cycle.
    pub fn set_audio_criterion(&self, name: &str, literal: &str) -> Result<bool> {
        self.state.write().criteria.set_literal(name, literal)
    }

    /// Committed value of a criterion, formatted with its type's literals.
    pub fn audio_criterion(&self, name: &str) -> Result<String> {
        self.state.read().criteria.formatted(name)
    }

    /// Committed numeric value of a criterion.
    pub fn criterion_value(&self, name: &str) -> Result<i32> {
        self.state.read().criteria.value(name)
    }

    // --- routing ---

    /// Runs one routing cycle.
    ///
    /// Ignored (with a warning) while the service is stopped. If a stream
    /// fails to attach, the routes it would have taken and every route
    /// enabled after it are released, the remaining stages still run, and
    /// the first failure is returned as [`RouteError::AttachFailed`].
    pub fn reconsider_routing(&self) -> Result<()> {
        let mut state = self.state.write();
        if !state.started {
            warn!("route manager: routing request ignored, service not started");
            return Ok(());
        }
        state.evaluate_policy()?;
        if !state.prepare() {
            debug!("route manager: routing unchanged, applying criteria");
            state.commit_and_apply();
            return Ok(());
        }
        state.log_plan();
        state.execute()
    }

    // --- controls ---

    /// Sets whether the route with `key` may be selected.
    pub fn set_route_applicable(&self, key: &str, applicable: bool) -> Result<()> {
        let mut state = self.state.write();
        let id = state.route_id(key)?;
        state.graph.set_route_applicable(id, applicable)
    }

    /// Forces a mute/unmute cycle on the route with `key` while it stays in use.
    pub fn set_route_need_reconfigure(&self, key: &str, need: bool) -> Result<()> {
        let mut state = self.state.write();
        let id = state.route_id(key)?;
        state.graph.set_route_need_reconfigure(id, need)
    }

    /// Forces a disable/enable cycle on the route with `key` while it stays in use.
    pub fn set_route_need_reroute(&self, key: &str, need: bool) -> Result<()> {
        let mut state = self.state.write();
        let id = state.route_id(key)?;
        state.graph.set_route_need_reroute(id, need)
    }

    /// Forces a port blocked or unblocked. Returns whether the flag changed.
    pub fn set_port_blocked(&self, port: &str, blocked: bool) -> Result<bool> {
        let mut state = self.state.write();
        let id = state
            .graph
            .port_id(port)
            .ok_or_else(|| RouteError::UnknownPort(port.to_string()))?;
        state.graph.set_port_blocked(id, blocked)
    }

    // --- queries ---

    /// Latency of the route serving `stream`, in microseconds.
    ///
    /// A routed stream reports its attached route; otherwise the first stream
    /// route of its direction matching its flags answers. Zero when none does.
    pub fn latency_us(&self, stream: StreamId) -> Result<u64> {
        let state = self.state.read();
        let stream = state.stream(stream)?;
        if stream.is_routed() {
            return Ok(stream.latency_us());
        }
        Ok(state
            .matching_route(&stream)
            .map_or(0, StreamRouteConfig::latency_us))
    }

    /// Period of the route serving `stream`, in microseconds.
    pub fn period_us(&self, stream: StreamId) -> Result<u64> {
        let state = self.state.read();
        let stream = state.stream(stream)?;
        if stream.is_routed() {
            return Ok(stream.period_us());
        }
        Ok(state
            .matching_route(&stream)
            .map_or(0, StreamRouteConfig::period_us))
    }

    /// Capabilities of the stream route with `key`. A route without declared
    /// capabilities reports its configured spec as the only one.
    pub fn capabilities(&self, key: &str) -> Result<AudioCapabilities> {
        let state = self.state.read();
        let id = state.route_id(key)?;
        let config = state
            .graph
            .route(id)
            .and_then(|r| r.stream_route())
            .map(StreamRoute::config)
            .ok_or_else(|| RouteError::unavailable(key, "not a stream route"))?;
        if !config.capabilities.is_empty() {
            return Ok(config.capabilities.clone());
        }
        let spec = &config.spec;
        Ok(AudioCapabilities(vec![AudioCapability::new(
            vec![spec.rate()],
            spec.format(),
            vec![spec.channel_mask()],
        )]))
    }

    /// Sets the voice call volume and forwards it to the policy engine.
    pub fn set_voice_volume(&self, gain: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(RouteError::VolumeOutOfRange(gain));
        }
        let mut state = self.state.write();
        state.voice_volume = gain;
        state.policy.set_voice_volume(gain);
        debug!("route manager: voice volume {gain}");
        Ok(())
    }

    /// Last voice volume set.
    pub fn voice_volume(&self) -> f32 {
        self.state.read().voice_volume
    }

    /// Consistent view of ports, routes, streams and criteria.
    pub fn snapshot(&self) -> RoutingSnapshot {
        let state = self.state.read();
        let graph = &state.graph;
        let ports = graph
            .ports()
            .iter()
            .map(|p| PortStatus {
                name: p.name().to_string(),
                blocked: p.is_blocked(),
                active: p.is_active(),
            })
            .collect();
        let routes = graph
            .routes()
            .iter()
            .map(|r| RouteStatus {
                key: r.key(),
                applicable: r.is_applicable(),
                used: r.is_used(),
                active: r.is_active(),
                stream: r.stream_route().and_then(StreamRoute::current_stream),
            })
            .collect();
        let streams = state
            .streams
            .iter()
            .map(|s| StreamStatus {
                id: s.id(),
                direction: s.direction(),
                started: s.is_started(),
                state: s.state(),
                route: s.route().and_then(|r| graph.route(r)).map(|r| r.key()),
            })
            .collect();
        let criteria = state
            .criteria
            .criteria()
            .iter()
            .map(|c| {
                let value = state
                    .criteria
                    .formatted(c.name())
                    .unwrap_or_else(|_| c.value().to_string());
                (c.name().to_string(), value)
            })
            .collect();
        RoutingSnapshot {
            started: state.started,
            ports,
            routes,
            streams,
            criteria,
        }
    }
}

/// Port as seen by [`RouteManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    /// Port name.
    pub name: String,
    /// Forced or exclusion blocked.
    pub blocked: bool,
    /// Used by an attached route.
    pub active: bool,
}

/// Route as seen by [`RouteManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStatus {
    /// Route key.
    pub key: String,
    /// Allowed by the policy.
    pub applicable: bool,
    /// Selected by the last routing cycle.
    pub used: bool,
    /// Ports activated.
    pub active: bool,
    /// Attached stream.
    pub stream: Option<StreamId>,
}

/// Stream as seen by [`RouteManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    /// Stream id.
    pub id: StreamId,
    /// Stream direction.
    pub direction: Direction,
    /// Wants a route.
    pub started: bool,
    /// Attachment state.
    pub state: AttachState,
    /// Key of the attached route.
    pub route: Option<String>,
}

/// Consistent view of the routing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSnapshot {
    /// Service started.
    pub started: bool,
    /// Ports in declaration order.
    pub ports: Vec<PortStatus>,
    /// Routes in declaration order.
    pub routes: Vec<RouteStatus>,
    /// Streams in registration order.
    pub streams: Vec<StreamStatus>,
    /// Committed criteria as `(name, formatted value)`.
    pub criteria: Vec<(String, String)>,
}

impl RoutingState {
    fn route_id(&self, key: &str) -> Result<RouteId> {
        self.graph
            .route_id_by_key(key)
            .ok_or_else(|| RouteError::UnknownRoute(key.to_string()))
    }

    fn port(&self, name: Option<&str>) -> Result<Option<PortId>> {
        name.map(|n| {
            self.graph
                .port_id(n)
                .ok_or_else(|| RouteError::UnknownPort(n.to_string()))
        })
        .transpose()
    }

    fn stream(&self, id: StreamId) -> Result<Arc<Stream>> {
        self.streams
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or(RouteError::UnknownStream(id.0))
    }

    fn add_route(
        &mut self,
        name: &str,
        src: Option<&str>,
        dst: Option<&str>,
        direction: Direction,
        kind: RouteKind,
    ) -> Result<RouteId> {
        let src = self.port(src)?;
        let dst = self.port(dst)?;
        let id = self.graph.add_route(name, src, dst, direction, kind)?;
        let mask = self.graph.route(id).map_or(0, |r| r.mask());
        self.criteria
            .add_value_pair(&route_criterion_type(direction), name, mask as i32)?;
        Ok(id)
    }

    fn matching_route(&self, stream: &Stream) -> Option<&StreamRouteConfig> {
        let dir = stream.direction();
        self.graph
            .routes()
            .iter()
            .filter(|r| r.direction() == dir)
            .filter_map(|r| r.stream_route())
            .map(StreamRoute::config)
            .find(|c| c.is_matching(stream.config(), dir))
    }

    fn mark_used(&mut self, id: RouteId, used: bool) {
        let Ok(route) = self.graph.route_mut(id) else {
            return;
        };
        route.used = used;
        let (dir, mask) = (route.direction().index(), route.mask());
        if used {
            self.masks[dir].enabled |= mask;
        } else {
            self.masks[dir].enabled &= !mask;
        }
    }

    // --- planning ---

    fn evaluate_policy(&mut self) -> Result<()> {
        let mut control = RouteControl::new(&mut self.graph);
        self.policy.evaluate(&self.criteria, &mut control)
    }

    /// Plans routes from scratch. Returns whether the routing changed.
    fn prepare(&mut self) -> bool {
        for m in &mut self.masks {
            *m = RouteMasks {
                prev: m.enabled,
                ..RouteMasks::default()
            };
        }
        let mut plan = self.graph.begin_plan();
        let mut claimed = Vec::new();
        for index in 0..self.graph.routes().len() {
            let id = RouteId(index as u32);
            let selected = self.graph.is_plannable(id, &plan) && self.claim_stream(id, &mut claimed);
            if selected {
                self.graph.select(id, &mut plan);
            }
            let Some(route) = self.graph.route(id) else {
                continue;
            };
            let m = &mut self.masks[route.direction().index()];
            if selected {
                m.enabled |= route.mask();
            }
            if route.need_reflow() {
                m.need_reflow |= route.mask();
            }
            if route.need_repath() {
                m.need_repath |= route.mask();
            }
        }
        self.masks.iter().any(RouteMasks::changed)
    }

    /// Binds the first started, unclaimed, matching stream to a stream route.
    /// Stream-less routes need no stream.
    fn claim_stream(&mut self, id: RouteId, claimed: &mut Vec<StreamId>) -> bool {
        let Some(route) = self.graph.route(id) else {
            return false;
        };
        let Some(sr) = route.stream_route() else {
            return true;
        };
        let dir = route.direction();
        let found = self
            .streams
            .iter()
            .find(|s| {
                s.direction() == dir
                    && s.is_started()
                    && !claimed.contains(&s.id())
                    && sr.config().is_matching(s.config(), dir)
            })
            .map(|s| s.id());
        let Some(stream) = found else {
            return false;
        };
        claimed.push(stream);
        if let Some(sr) = self
            .graph
            .route_mut(id)
            .ok()
            .and_then(|r| r.stream_route_mut())
        {
            sr.new_stream = Some(stream);
        }
        trace!("route manager: {stream} selected for {id}");
        true
    }

    fn mask_literal(&self, direction: Direction, mask: u32) -> String {
        self.criteria
            .criterion_type(&route_criterion_type(direction))
            .map_or_else(|| format!("{mask:#x}"), |t| t.format_value(mask as i32))
    }

    fn log_plan(&self) {
        for dir in Direction::ALL {
            let m = self.masks[dir.index()];
            debug!(
                "route manager: {dir} routes {} -> {} (reflow {}, repath {})",
                self.mask_literal(dir, m.prev),
                self.mask_literal(dir, m.enabled),
                self.mask_literal(dir, m.need_reflow),
                self.mask_literal(dir, m.need_repath),
            );
        }
    }

    // --- stages ---

    fn execute(&mut self) -> Result<()> {
        self.mute_stage()?;
        self.disable_stage()?;
        // The first attach failure releases every route enabled after it.
        let mut failure = None;
        self.configure_stage(&mut failure)?;
        self.enable_stage(&mut failure)?;
        self.unmute_stage()?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_stage(&mut self, stage: RoutingStage) -> Result<()> {
        debug!("route manager: stage {stage}");
        self.criteria.set_state(ROUTAGE_STATE, stage.bits() as i32)?;
        Ok(())
    }

    fn set_route_criteria(&mut self, direction: Direction, opened: u32, closing: u32) -> Result<()> {
        self.criteria
            .set_state(&opened_routes_criterion(direction), opened as i32)?;
        self.criteria
            .set_state(&closing_routes_criterion(direction), closing as i32)?;
        Ok(())
    }

    fn apply(&mut self, stage: RoutingStage) {
        self.policy.apply(stage, &self.criteria);
    }

    fn commit_and_apply(&mut self) {
        self.criteria.commit_all();
        let stage = self
            .criteria
            .value(ROUTAGE_STATE)
            .map_or(RoutingStage::ALL, |v| RoutingStage::from_bits_truncate(v as u32));
        self.apply(stage);
    }

    fn mute_stage(&mut self) -> Result<()> {
        self.set_stage(RoutingStage::FLOW)?;
        for dir in Direction::ALL {
            let m = self.masks[dir.index()];
            self.set_route_criteria(
                dir,
                m.prev & m.enabled & !m.need_reflow,
                (m.prev & !m.enabled) | m.need_reflow,
            )?;
        }
        self.apply(RoutingStage::FLOW);
        Ok(())
    }

    fn disable_stage(&mut self) -> Result<()> {
        self.set_stage(RoutingStage::PATH)?;
        for dir in Direction::ALL {
            let m = self.masks[dir.index()];
            self.set_route_criteria(
                dir,
                m.prev & m.enabled & !m.need_repath,
                (m.prev & !m.enabled) | m.need_repath,
            )?;
        }
        let targets = self.route_ids(|r| (r.previously_used() && !r.is_used()) || r.need_repath());
        for &id in &targets {
            if !self.requires_post_disable(id) {
                self.disable_route(id);
            }
        }
        self.apply(RoutingStage::PATH);
        for &id in &targets {
            if self.requires_post_disable(id) {
                self.disable_route(id);
            }
        }
        Ok(())
    }

    fn configure_stage(&mut self, failure: &mut Option<RouteError>) -> Result<()> {
        self.set_stage(RoutingStage::CONFIGURE)?;
        // Repathed routes are re-attached by the enable stage.
        let swapped = self.route_ids(|r| {
            r.need_reflow()
                && !r.need_repath()
                && r
                    .stream_route()
                    .is_some_and(|sr| sr.current_stream() != sr.new_stream())
        });
        // Detach everything first: a stream may move between two kept routes.
        for &id in &swapped {
            self.disable_route(id);
        }
        for &id in &swapped {
            self.enable_or_release(id, failure);
        }
        for dir in Direction::ALL {
            let enabled = self.masks[dir.index()].enabled;
            self.set_route_criteria(dir, enabled, 0)?;
        }
        self.criteria.commit_all();
        self.apply(RoutingStage::CONFIGURE);
        Ok(())
    }

    fn enable_stage(&mut self, failure: &mut Option<RouteError>) -> Result<()> {
        let stage = RoutingStage::PATH | RoutingStage::CONFIGURE;
        self.set_stage(stage)?;
        let targets = self.route_ids(|r| (!r.previously_used() && r.is_used()) || r.need_repath());
        for &id in &targets {
            if self.requires_pre_enable(id) {
                self.enable_or_release(id, failure);
            }
        }
        self.apply(stage);
        for &id in &targets {
            if !self.requires_pre_enable(id) {
                self.enable_or_release(id, failure);
            }
        }
        if failure.is_some() {
            for dir in Direction::ALL {
                let enabled = self.masks[dir.index()].enabled;
                self.criteria
                    .set_state(&opened_routes_criterion(dir), enabled as i32)?;
            }
        }
        Ok(())
    }

    fn unmute_stage(&mut self) -> Result<()> {
        self.set_stage(RoutingStage::ALL)?;
        self.apply(RoutingStage::ALL);
        Ok(())
    }

    // --- route transitions ---

    fn route_ids(&self, pred: impl Fn(&crate::Route) -> bool) -> Vec<RouteId> {
        self.graph
            .routes()
            .iter()
            .filter(|r| pred(r))
            .map(|r| r.id())
            .collect()
    }

    fn requires_pre_enable(&self, id: RouteId) -> bool {
        self.graph
            .route(id)
            .and_then(|r| r.stream_route())
            .is_some_and(|sr| sr.config().require_pre_enable)
    }

    fn requires_post_disable(&self, id: RouteId) -> bool {
        self.graph
            .route(id)
            .and_then(|r| r.stream_route())
            .is_some_and(|sr| sr.config().require_post_disable)
    }

    fn disable_route(&mut self, id: RouteId) {
        if let Err(err) = self.detach_route(id) {
            warn!("route manager: failed to disable {id}: {err}");
        }
    }

    fn enable_route(&mut self, id: RouteId) -> Result<()> {
        let new_stream = self
            .graph
            .route(id)
            .and_then(|r| r.stream_route())
            .map(StreamRoute::new_stream);
        match new_stream {
            // Stream-less route.
            None => self.graph.activate_route(id),
            Some(None) => Ok(()),
            Some(Some(sid)) => {
                let stream = self.stream(sid)?;
                self.attach_route(id, &stream)
            }
        }
    }

    fn enable_or_release(&mut self, id: RouteId, failure: &mut Option<RouteError>) {
        if failure.is_some() {
            trace!("route manager: releasing {id} after attach failure");
            self.release_route(id);
            return;
        }
        if let Err(err) = self.enable_route(id) {
            *failure = Some(self.fail_route(id, err));
        }
    }

    fn fail_route(&mut self, id: RouteId, err: RouteError) -> RouteError {
        let key = self
            .graph
            .route(id)
            .map_or_else(|| id.to_string(), |r| r.key());
        error!("route manager: failed to attach {key}: {err}");
        self.release_route(id);
        RouteError::attach_failed(key, err)
    }

    fn release_route(&mut self, id: RouteId) {
        if let Some(sr) = self
            .graph
            .route_mut(id)
            .ok()
            .and_then(|r| r.stream_route_mut())
        {
            sr.new_stream = None;
        }
        self.mark_used(id, false);
    }

    fn attach_route(&mut self, id: RouteId, stream: &Arc<Stream>) -> Result<()> {
        let primitive = Arc::clone(&self.primitive);
        let route = self.graph.route_mut(id)?;
        let key = route.key();
        let direction = route.direction();
        let Some(sr) = route.stream_route_mut() else {
            return Err(RouteError::unavailable(key, "route carries no stream"));
        };
        let Some(device) = sr.device.get_mut().take() else {
            return Err(RouteError::unavailable(key, "device held by another stream"));
        };
        let spec = sr.config.spec_for(stream.spec(), direction, primitive.as_ref());
        let params = sr.config.device_params(direction, spec);
        if let Err(failure) = stream.attach(id, device, &params, sr.config.silence_prolog_ms, primitive)
        {
            *sr.device.get_mut() = Some(failure.device);
            return Err(failure.error);
        }
        sr.current_stream = Some(stream.id());
        self.graph.activate_route(id)?;
        stream.complete_attach();
        debug!(
            "route manager: {} attached to {key} at {}",
            stream.id(),
            params.spec
        );
        Ok(())
    }

    fn detach_route(&mut self, id: RouteId) -> Result<()> {
        let current = self
            .graph
            .route_mut(id)?
            .stream_route_mut()
            .and_then(|sr| sr.current_stream.take());
        let mut result = Ok(());
        if let Some(stream) = current.and_then(|sid| self.stream(sid).ok()) {
            match stream.detach() {
                Ok(device) => {
                    if let Some(sr) = self.graph.route_mut(id)?.stream_route_mut() {
                        *sr.device.get_mut() = Some(device);
                    }
                    debug!("route manager: {} detached from {id}", stream.id());
                }
                Err(err) => result = Err(err),
            }
        }
        self.graph.deactivate_route(id)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceFactory;
    use crate::stream_route::OUTPUT_FLAG_PRIMARY;

    fn manager() -> RouteManager {
        let m = RouteManager::new(Box::new(MockDeviceFactory::new()));
        m.add_port("speaker").unwrap();
        m.add_port("headset").unwrap();
        m.add_port_group("outputs", "speaker").unwrap();
        m.add_port_group("outputs", "headset").unwrap();
        for (name, port) in [("Media", "speaker"), ("Headset", "headset")] {
            let config = StreamRouteConfig {
                flag_mask: OUTPUT_FLAG_PRIMARY,
                ..StreamRouteConfig::default()
            };
            m.add_stream_route(name, None, Some(port), Direction::Output, config)
                .unwrap();
        }
        m
    }

    // --- topology ---

    #[test]
    fn topology_is_locked_after_start() {
        let m = manager();
        m.start_service().unwrap();
        assert!(matches!(m.add_port("earpiece"), Err(RouteError::TopologyLocked)));
        assert!(matches!(
            m.add_criterion_type("ModeType", false),
            Err(RouteError::TopologyLocked)
        ));
        m.stop_service();
        assert!(m.add_port("earpiece").is_ok());
    }

    #[test]
    fn routes_register_type_literals() {
        let m = manager();
        m.start_service().unwrap();
        let state = m.state.read();
        let ty = state
            .criteria
            .criterion_type(&route_criterion_type(Direction::Output))
            .unwrap();
        assert_eq!(ty.literal_to_value("Media"), Some(1));
        assert_eq!(ty.literal_to_value("Headset"), Some(2));
    }

    #[test]
    fn route_needs_known_ports() {
        let m = manager();
        assert!(matches!(
            m.add_route("Modem", Some("modem"), None, Direction::Output),
            Err(RouteError::UnknownPort(_))
        ));
    }

    #[test]
    fn start_service_creates_routing_criteria() {
        let m = manager();
        m.start_service().unwrap();
        assert_eq!(m.audio_criterion(ROUTAGE_STATE).unwrap(), "Flow|Path|Configure");
        assert_eq!(m.audio_criterion("OpenedPlaybackRoutes").unwrap(), "none");
        assert_eq!(m.audio_criterion("ClosingCaptureRoutes").unwrap(), "none");
        // Restart keeps the criteria.
        m.stop_service();
        assert!(m.start_service().is_ok());
    }

    // --- routing ---

    #[test]
    fn routing_ignored_before_start() {
        let m = manager();
        m.set_route_applicable("Media_Playback", true).unwrap();
        let s = m.add_stream(Direction::Output, StreamConfig::default());
        m.start_stream(s.id()).unwrap();
        m.reconsider_routing().unwrap();
        assert!(!s.is_routed());
    }

    #[test]
    fn first_declared_route_wins() {
        let m = manager();
        m.start_service().unwrap();
        m.set_route_applicable("Media_Playback", true).unwrap();
        m.set_route_applicable("Headset_Playback", true).unwrap();
        let a = m.add_stream(Direction::Output, StreamConfig::default());
        let b = m.add_stream(Direction::Output, StreamConfig::default());
        m.start_stream(a.id()).unwrap();
        m.start_stream(b.id()).unwrap();
        m.reconsider_routing().unwrap();

        // Speaker and headset exclude each other: only Media is routed.
        assert_eq!(m.snapshot().streams[0].route.as_deref(), Some("Media_Playback"));
        assert!(!b.is_routed());
        assert_eq!(m.audio_criterion("OpenedPlaybackRoutes").unwrap(), "Media");
    }

    #[test]
    fn unchanged_routing_only_commits() {
        let m = manager();
        m.add_criterion_type("ModeType", false).unwrap();
        m.add_criterion_type_value_pair("ModeType", "Normal", 0).unwrap();
        m.add_criterion_type_value_pair("ModeType", "InCall", 2).unwrap();
        m.add_criterion("Mode", "ModeType", Some("Normal")).unwrap();
        m.start_service().unwrap();

        assert!(m.set_audio_criterion("Mode", "InCall").unwrap());
        assert!(!m.set_audio_criterion("Mode", "InCall").unwrap());
        assert_eq!(m.audio_criterion("Mode").unwrap(), "Normal");
        m.reconsider_routing().unwrap();
        assert_eq!(m.audio_criterion("Mode").unwrap(), "InCall");
    }

    // --- manual attach ---

    #[test]
    fn manual_attach_checks_route() {
        let m = manager();
        let a = m.add_stream(Direction::Output, StreamConfig::default());
        let b = m.add_stream(Direction::Output, StreamConfig::default());
        assert!(matches!(
            m.attach_stream(a.id(), "Media_Playback"),
            Err(RouteError::RouteUnavailable { reason: "not applicable", .. })
        ));

        m.set_route_applicable("Media_Playback", true).unwrap();
        m.attach_stream(a.id(), "Media_Playback").unwrap();
        assert!(a.is_routed());

        let err = m.attach_stream(b.id(), "Media_Playback").unwrap_err();
        assert!(matches!(err, RouteError::RouteUnavailable { .. }));
        assert_eq!(m.snapshot().routes[0].stream, Some(a.id()));
        assert_eq!(b.state(), AttachState::Detached);

        m.detach_stream(a.id()).unwrap();
        assert!(!a.is_routed());
        assert!(matches!(
            m.detach_stream(a.id()),
            Err(RouteError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn manual_attach_refuses_blocked_port() {
        let m = manager();
        m.set_route_applicable("Media_Playback", true).unwrap();
        m.set_route_applicable("Headset_Playback", true).unwrap();
        let a = m.add_stream(Direction::Output, StreamConfig::default());
        let b = m.add_stream(Direction::Output, StreamConfig::default());
        m.attach_stream(a.id(), "Media_Playback").unwrap();
        assert!(matches!(
            m.attach_stream(b.id(), "Headset_Playback"),
            Err(RouteError::RouteUnavailable { reason: "port blocked", .. })
        ));
    }

    // --- queries ---

    #[test]
    fn voice_volume_range() {
        let m = manager();
        assert!(m.set_voice_volume(0.5).is_ok());
        assert_eq!(m.voice_volume(), 0.5);
        assert!(matches!(
            m.set_voice_volume(1.5),
            Err(RouteError::VolumeOutOfRange(_))
        ));
        assert!(m.set_voice_volume(f32::NAN).is_err());
        assert_eq!(m.voice_volume(), 0.5);
    }

    #[test]
    fn latency_from_matching_route() {
        let m = manager();
        let s = m.add_stream(Direction::Output, StreamConfig::default());
        assert_eq!(m.latency_us(s.id()).unwrap(), 80_000);
        assert_eq!(m.period_us(s.id()).unwrap(), 20_000);

        let deep = m.add_stream(
            Direction::Output,
            StreamConfig {
                flags: 0x8,
                ..StreamConfig::default()
            },
        );
        assert_eq!(m.latency_us(deep.id()).unwrap(), 0);
        assert!(matches!(
            m.latency_us(StreamId(99)),
            Err(RouteError::UnknownStream(99))
        ));
    }

    #[test]
    fn capabilities_default_to_route_spec() {
        let m = manager();
        let caps = m.capabilities("Media_Playback").unwrap();
        assert_eq!(caps.0.len(), 1);
        assert_eq!(caps.0[0].rates, vec![48000]);
        assert!(m.capabilities("Media_Capture").is_err());
    }

    #[test]
    fn remove_routed_stream_releases_ports() {
        let m = manager();
        m.start_service().unwrap();
        m.set_route_applicable("Media_Playback", true).unwrap();
        let s = m.add_stream(Direction::Output, StreamConfig::default());
        m.start_stream(s.id()).unwrap();
        m.reconsider_routing().unwrap();
        assert!(m.snapshot().ports[1].blocked);

        m.remove_stream(s.id()).unwrap();
        assert_eq!(s.state(), AttachState::Detached);
        let snap = m.snapshot();
        assert!(!snap.ports[1].blocked);
        assert!(snap.streams.is_empty());
        assert!(m.stream(s.id()).is_none());
    }
}
