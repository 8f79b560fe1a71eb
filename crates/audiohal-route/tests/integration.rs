//! Integration tests for the route manager.
//!
//! Drives full routing cycles against the mock device backend: stage
//! sequencing and the routing criteria, port group exclusion while streams
//! move between routes, attach failure rollback, full-duplex routes, and the
//! HDMI rate adaptation scenario.

use std::sync::Arc;

use audiohal_core::{SampleFormat, SampleSpec, channel, pcm};
use audiohal_route::{
    AttachState, AudioCapabilities, AudioCapability, CriterionSet, DeviceEvent, Direction,
    INPUT_FLAG_PRIMARY, MockDeviceFactory, MockDeviceLog, OUTPUT_FLAG_PRIMARY, PolicyEngine,
    ROUTAGE_STATE, RouteControl, RouteError, RouteManager, RoutingStage, StreamConfig,
    StreamRouteConfig,
};
use parking_lot::Mutex;

fn playback() -> StreamRouteConfig {
    StreamRouteConfig {
        flag_mask: OUTPUT_FLAG_PRIMARY,
        ..StreamRouteConfig::default()
    }
}

fn capture() -> StreamRouteConfig {
    StreamRouteConfig {
        flag_mask: INPUT_FLAG_PRIMARY,
        ..StreamRouteConfig::default()
    }
}

fn pcm16(rate: u32) -> StreamConfig {
    StreamConfig {
        spec: SampleSpec::new(2, SampleFormat::Pcm16, rate),
        ..StreamConfig::default()
    }
}

/// What the policy saw at one apply.
#[derive(Debug, Clone, PartialEq)]
struct Applied {
    stage: RoutingStage,
    routage_state: i32,
    opened: i32,
    closing: i32,
    accessory: i32,
}

/// Makes `Media` applicable without an accessory and `Headset` with one,
/// and records every apply.
#[derive(Default)]
struct AccessoryPolicy {
    applied: Arc<Mutex<Vec<Applied>>>,
}

impl PolicyEngine for AccessoryPolicy {
    fn evaluate(&mut self, criteria: &CriterionSet, control: &mut RouteControl<'_>) -> audiohal_route::Result<()> {
        let headset = criteria.get("Accessory").is_some_and(|c| c.pending() == 1);
        control.set_applicable("Media_Playback", !headset)?;
        control.set_applicable("Headset_Playback", headset)?;
        Ok(())
    }

    fn apply(&mut self, stage: RoutingStage, criteria: &CriterionSet) {
        let value = |name: &str| criteria.value(name).unwrap_or(-1);
        self.applied.lock().push(Applied {
            stage,
            routage_state: value(ROUTAGE_STATE),
            opened: value("OpenedPlaybackRoutes"),
            closing: value("ClosingPlaybackRoutes"),
            accessory: value("Accessory"),
        });
    }
}

/// Speaker and headset exclude each other.
fn accessory_manager() -> (RouteManager, MockDeviceLog, Arc<Mutex<Vec<Applied>>>) {
    let factory = MockDeviceFactory::new();
    let log = factory.log();
    let policy = AccessoryPolicy::default();
    let applied = Arc::clone(&policy.applied);
    let m = RouteManager::new(Box::new(factory)).with_policy(Box::new(policy));
    m.add_port("speaker").unwrap();
    m.add_port("headset").unwrap();
    m.add_port_group("outputs", "speaker").unwrap();
    m.add_port_group("outputs", "headset").unwrap();
    m.add_stream_route("Media", None, Some("speaker"), Direction::Output, playback())
        .unwrap();
    m.add_stream_route("Headset", None, Some("headset"), Direction::Output, playback())
        .unwrap();
    m.add_criterion_type("AccessoryType", false).unwrap();
    m.add_criterion_type_value_pair("AccessoryType", "None", 0)
        .unwrap();
    m.add_criterion_type_value_pair("AccessoryType", "Headset", 1)
        .unwrap();
    m.add_criterion("Accessory", "AccessoryType", Some("None"))
        .unwrap();
    m.start_service().unwrap();
    (m, log, applied)
}

// --- stages ---

#[test]
fn cycle_runs_five_stages_in_order() {
    let (m, _log, applied) = accessory_manager();
    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();

    let stages: Vec<u32> = applied.lock().iter().map(|a| a.stage.bits()).collect();
    assert_eq!(stages, vec![1, 2, 4, 6, 7]);
    let states: Vec<i32> = applied.lock().iter().map(|a| a.routage_state).collect();
    assert_eq!(states, vec![1, 2, 4, 6, 7]);

    // Media opens at the configure stage.
    let opened: Vec<i32> = applied.lock().iter().map(|a| a.opened).collect();
    assert_eq!(opened, vec![0, 0, 1, 1, 1]);
    assert!(s.is_routed());
}

#[test]
fn stopping_a_stream_closes_its_route() {
    let (m, log, applied) = accessory_manager();
    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();
    applied.lock().clear();

    m.stop_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();
    let seen = applied.lock().clone();
    // Mute and disable announce Media as closing.
    assert_eq!((seen[0].opened, seen[0].closing), (0, 1));
    assert_eq!((seen[1].opened, seen[1].closing), (0, 1));
    assert_eq!((seen[2].opened, seen[2].closing), (0, 0));
    assert_eq!(s.state(), AttachState::Detached);
    assert!(!log.is_open("Media_Playback"));
}

#[test]
fn unchanged_plan_applies_once() {
    let (m, _log, applied) = accessory_manager();
    m.reconsider_routing().unwrap();
    let seen = applied.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].stage, RoutingStage::ALL);
}

#[test]
fn user_criteria_commit_at_configure() {
    let (m, _log, applied) = accessory_manager();
    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();
    applied.lock().clear();

    assert!(m.set_audio_criterion("Accessory", "Headset").unwrap());
    // Same value again: nothing changes, no cycle needed.
    assert!(!m.set_audio_criterion("Accessory", "Headset").unwrap());
    assert_eq!(m.audio_criterion("Accessory").unwrap(), "None");

    m.reconsider_routing().unwrap();
    let accessory: Vec<i32> = applied.lock().iter().map(|a| a.accessory).collect();
    assert_eq!(accessory, vec![0, 0, 1, 1, 1]);
    assert_eq!(m.audio_criterion("Accessory").unwrap(), "Headset");
}

// --- exclusion ---

#[test]
fn stream_moves_between_exclusive_ports() {
    let (m, log, _applied) = accessory_manager();
    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();

    let snap = m.snapshot();
    assert_eq!(snap.streams[0].route.as_deref(), Some("Media_Playback"));
    assert!(!snap.ports[0].blocked);
    assert!(snap.ports[1].blocked);

    m.set_audio_criterion("Accessory", "Headset").unwrap();
    m.reconsider_routing().unwrap();

    let snap = m.snapshot();
    assert_eq!(snap.streams[0].route.as_deref(), Some("Headset_Playback"));
    assert!(snap.ports[0].blocked);
    assert!(!snap.ports[1].blocked);
    assert!(!log.is_open("Media_Playback"));
    assert!(log.is_open("Headset_Playback"));

    // Media closes before Headset opens.
    let events = log.events();
    let closed = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::Closed { route } if route == "Media_Playback"))
        .unwrap();
    let opened = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::Opened { route, .. } if route == "Headset_Playback"))
        .unwrap();
    assert!(closed < opened);
}

#[test]
fn forced_port_block_keeps_route_down() {
    let (m, _log, _applied) = accessory_manager();
    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(s.id()).unwrap();
    assert!(m.set_port_blocked("speaker", true).unwrap());
    m.reconsider_routing().unwrap();
    assert!(!s.is_routed());

    assert!(m.set_port_blocked("speaker", false).unwrap());
    m.reconsider_routing().unwrap();
    assert!(s.is_routed());
}

// --- reflow and repath ---

#[test]
fn new_stream_on_kept_route_is_swapped_at_configure() {
    let (m, log, applied) = accessory_manager();
    let a = m.add_stream(Direction::Output, pcm16(48000));
    let b = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(a.id()).unwrap();
    m.reconsider_routing().unwrap();
    applied.lock().clear();

    m.stop_stream(a.id()).unwrap();
    m.start_stream(b.id()).unwrap();
    m.reconsider_routing().unwrap();

    assert_eq!(a.state(), AttachState::Detached);
    assert!(b.is_routed());
    let seen = applied.lock().clone();
    // Reflow: muted, but the path stays.
    assert_eq!((seen[0].opened, seen[0].closing), (0, 1));
    assert_eq!((seen[1].opened, seen[1].closing), (1, 0));
    assert_eq!(log.open_count("Media_Playback"), 2);
}

#[test]
fn forced_reroute_cycles_the_device() {
    let (m, log, _applied) = accessory_manager();
    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();
    assert_eq!(log.open_count("Media_Playback"), 1);

    m.set_route_need_reroute("Media_Playback", true).unwrap();
    m.reconsider_routing().unwrap();
    assert_eq!(log.open_count("Media_Playback"), 2);
    assert!(s.is_routed());

    // The request sticks until cleared.
    m.set_route_need_reroute("Media_Playback", false).unwrap();
    m.reconsider_routing().unwrap();
    assert_eq!(log.open_count("Media_Playback"), 2);
}

// --- attach failure ---

fn two_route_manager() -> (RouteManager, MockDeviceLog) {
    let factory = MockDeviceFactory::new();
    let log = factory.log();
    let m = RouteManager::new(Box::new(factory));
    m.add_port("speaker").unwrap();
    m.add_port("hdmi").unwrap();
    m.add_stream_route("Media", None, Some("speaker"), Direction::Output, playback())
        .unwrap();
    m.add_stream_route("Hdmi", None, Some("hdmi"), Direction::Output, playback())
        .unwrap();
    m.start_service().unwrap();
    m.set_route_applicable("Media_Playback", true).unwrap();
    m.set_route_applicable("Hdmi_Playback", true).unwrap();
    (m, log)
}

#[test]
fn attach_failure_rolls_back_and_releases_later_routes() {
    let (m, log) = two_route_manager();
    let a = m.add_stream(Direction::Output, pcm16(48000));
    let b = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(a.id()).unwrap();
    m.start_stream(b.id()).unwrap();
    log.fail_open("Media_Playback", true);

    let err = m.reconsider_routing().unwrap_err();
    match err {
        RouteError::AttachFailed { route, source } => {
            assert_eq!(route, "Media_Playback");
            assert!(matches!(*source, RouteError::Device(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(a.state(), AttachState::Detached);
    assert_eq!(b.state(), AttachState::Detached);
    assert_eq!(log.open_count("Hdmi_Playback"), 0);
    let snap = m.snapshot();
    assert!(snap.routes.iter().all(|r| !r.used && !r.active));
    assert!(snap.ports.iter().all(|p| !p.active));
    assert_eq!(m.audio_criterion("OpenedPlaybackRoutes").unwrap(), "none");
    assert_eq!(m.audio_criterion(ROUTAGE_STATE).unwrap(), "Flow|Path|Configure");

    log.fail_open("Media_Playback", false);
    m.reconsider_routing().unwrap();
    assert!(a.is_routed());
    assert!(b.is_routed());
    assert_eq!(m.audio_criterion("OpenedPlaybackRoutes").unwrap(), "Media|Hdmi");
}

#[test]
fn swap_failure_at_configure_releases_newly_used_routes() {
    let (m, log) = two_route_manager();
    let a = m.add_stream(Direction::Output, pcm16(48000));
    let b = m.add_stream(Direction::Output, pcm16(48000));
    let c = m.add_stream(Direction::Output, pcm16(48000));
    m.start_stream(a.id()).unwrap();
    m.reconsider_routing().unwrap();
    assert_eq!(log.open_count("Media_Playback"), 1);

    // Media keeps its path but swaps a for b; Hdmi is newly used by c.
    m.stop_stream(a.id()).unwrap();
    m.start_stream(b.id()).unwrap();
    m.start_stream(c.id()).unwrap();
    log.fail_open("Media_Playback", true);

    let err = m.reconsider_routing().unwrap_err();
    assert!(matches!(err, RouteError::AttachFailed { ref route, .. } if route == "Media_Playback"));
    assert_eq!(a.state(), AttachState::Detached);
    assert_eq!(b.state(), AttachState::Detached);
    assert_eq!(c.state(), AttachState::Detached);
    assert_eq!(log.open_count("Hdmi_Playback"), 0);
    let snap = m.snapshot();
    assert!(snap.routes.iter().all(|r| !r.used && !r.active));
    assert_eq!(m.audio_criterion("OpenedPlaybackRoutes").unwrap(), "none");

    log.fail_open("Media_Playback", false);
    m.reconsider_routing().unwrap();
    assert!(b.is_routed());
    assert!(c.is_routed());
    assert_eq!(m.audio_criterion("OpenedPlaybackRoutes").unwrap(), "Media|Hdmi");
}

#[test]
fn second_attach_to_held_route_leaves_first_intact() {
    let (m, log) = two_route_manager();
    let a = m.add_stream(Direction::Output, pcm16(48000));
    let b = m.add_stream(Direction::Output, pcm16(48000));
    m.attach_stream(a.id(), "Media_Playback").unwrap();

    assert!(matches!(
        m.attach_stream(b.id(), "Media_Playback"),
        Err(RouteError::RouteUnavailable { .. })
    ));
    assert!(matches!(
        m.attach_stream(a.id(), "Hdmi_Playback"),
        Err(RouteError::InvalidTransition { .. })
    ));
    assert_eq!(a.state(), AttachState::Attached);
    assert!(log.is_open("Media_Playback"));
    assert!(!log.is_open("Hdmi_Playback"));
    assert_eq!(b.state(), AttachState::Detached);
}

#[test]
fn detach_clears_port_blocks_even_when_close_fails() {
    let factory = MockDeviceFactory::new();
    let log = factory.log();
    let m = RouteManager::new(Box::new(factory));
    m.add_port("speaker").unwrap();
    m.add_port("earpiece").unwrap();
    m.add_port_group("outputs", "speaker").unwrap();
    m.add_port_group("outputs", "earpiece").unwrap();
    m.add_stream_route("Media", None, Some("speaker"), Direction::Output, playback())
        .unwrap();
    m.set_route_applicable("Media_Playback", true).unwrap();

    let s = m.add_stream(Direction::Output, pcm16(48000));
    m.attach_stream(s.id(), "Media_Playback").unwrap();
    assert!(m.snapshot().ports[1].blocked);

    log.fail_close("Media_Playback", true);
    m.detach_stream(s.id()).unwrap();
    assert_eq!(s.state(), AttachState::Detached);
    assert!(!m.snapshot().ports[1].blocked);
}

// --- full duplex ---

#[test]
fn full_duplex_route_shares_its_port() {
    let m = RouteManager::new(Box::new(MockDeviceFactory::new()));
    m.add_port("bt").unwrap();
    m.add_stream_route("Voice", Some("bt"), None, Direction::Output, playback())
        .unwrap();
    m.add_stream_route("Voice", Some("bt"), None, Direction::Input, capture())
        .unwrap();
    m.add_stream_route("Record", Some("bt"), None, Direction::Input, capture())
        .unwrap();
    m.start_service().unwrap();
    for key in ["Voice_Playback", "Voice_Capture", "Record_Capture"] {
        m.set_route_applicable(key, true).unwrap();
    }

    let out = m.add_stream(Direction::Output, pcm16(48000));
    let mic = m.add_stream(Direction::Input, pcm16(48000));
    let rec = m.add_stream(Direction::Input, pcm16(48000));
    for s in [&out, &mic, &rec] {
        m.start_stream(s.id()).unwrap();
    }
    m.reconsider_routing().unwrap();

    assert!(out.is_routed());
    assert!(mic.is_routed());
    // bt is held by the Voice pair; a differently named route cannot join.
    assert!(!rec.is_routed());
    assert_eq!(m.audio_criterion("OpenedCaptureRoutes").unwrap(), "Voice");
}

// --- ordering around apply ---

struct OpenAtApply {
    log: MockDeviceLog,
    seen: Arc<Mutex<Vec<(String, bool)>>>,
}

impl PolicyEngine for OpenAtApply {
    fn evaluate(&mut self, _: &CriterionSet, _: &mut RouteControl<'_>) -> audiohal_route::Result<()> {
        Ok(())
    }

    fn apply(&mut self, stage: RoutingStage, _: &CriterionSet) {
        if stage == RoutingStage::PATH | RoutingStage::CONFIGURE {
            let mut seen = self.seen.lock();
            for key in ["Early_Playback", "Late_Playback"] {
                seen.push((key.to_string(), self.log.is_open(key)));
            }
        }
    }
}

#[test]
fn pre_enable_routes_open_before_the_path_is_applied() {
    let factory = MockDeviceFactory::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let policy = OpenAtApply {
        log: factory.log(),
        seen: Arc::clone(&seen),
    };
    let m = RouteManager::new(Box::new(factory)).with_policy(Box::new(policy));
    m.add_port("a").unwrap();
    m.add_port("b").unwrap();
    let early = StreamRouteConfig {
        require_pre_enable: true,
        ..playback()
    };
    m.add_stream_route("Early", None, Some("a"), Direction::Output, early)
        .unwrap();
    m.add_stream_route("Late", None, Some("b"), Direction::Output, playback())
        .unwrap();
    m.start_service().unwrap();
    m.set_route_applicable("Early_Playback", true).unwrap();
    m.set_route_applicable("Late_Playback", true).unwrap();
    for _ in 0..2 {
        let s = m.add_stream(Direction::Output, pcm16(48000));
        m.start_stream(s.id()).unwrap();
    }
    m.reconsider_routing().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            ("Early_Playback".to_string(), true),
            ("Late_Playback".to_string(), false)
        ]
    );
}

// --- HDMI rate adaptation ---

fn hdmi_manager(config: StreamRouteConfig) -> (RouteManager, MockDeviceLog) {
    let factory = MockDeviceFactory::new();
    let log = factory.log();
    let m = RouteManager::new(Box::new(factory));
    m.add_port("hdmi").unwrap();
    m.add_stream_route("Hdmi", None, Some("hdmi"), Direction::Output, config)
        .unwrap();
    m.start_service().unwrap();
    m.set_route_applicable("Hdmi_Playback", true).unwrap();
    (m, log)
}

#[test]
fn hdmi_capabilities_pick_the_direct_rate() {
    let config = StreamRouteConfig {
        spec: SampleSpec::new(2, SampleFormat::Pcm8_24, 48000),
        capabilities: AudioCapabilities(vec![AudioCapability::new(
            vec![48000, 192000],
            SampleFormat::Pcm8_24,
            vec![channel::STEREO, channel::SURROUND_5_1, channel::SURROUND_7_1],
        )]),
        ..playback()
    };
    let (m, _log) = hdmi_manager(config);
    let s = m.add_stream(Direction::Output, pcm16(44100));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();

    let route_spec = s.route_spec().unwrap();
    assert_eq!(route_spec.rate(), 48000);
    assert_eq!(route_spec.format(), SampleFormat::Pcm8_24);
    assert!(
        s.pipeline_stages()
            .contains(&"resample 44100 -> 48000".to_string())
    );
}

#[test]
fn hdmi_at_192k_pivots_through_48k() {
    let config = StreamRouteConfig {
        spec: SampleSpec::new(2, SampleFormat::Pcm8_24, 192000),
        ..playback()
    };
    let (m, log) = hdmi_manager(config);
    let s = m.add_stream(Direction::Output, pcm16(44100));
    m.start_stream(s.id()).unwrap();
    m.reconsider_routing().unwrap();

    assert_eq!(
        s.pipeline_stages(),
        vec![
            "resample 44100 -> 48000 -> 192000".to_string(),
            "reformat pcm16 -> pcm8_24".to_string(),
        ]
    );
    assert!(log.events().iter().any(|e| matches!(
        e,
        DeviceEvent::Opened { route, spec } if route == "Hdmi_Playback" && spec.rate() == 192000
    )));

    // 10 ms of stereo Pcm16 at 44.1 kHz.
    let data = pcm::i16_to_bytes(&vec![0i16; 441 * 2]);
    assert_eq!(s.write(&data).unwrap(), data.len());
    // 1920 frames of stereo Pcm8_24 at 192 kHz.
    assert_eq!(log.written("Hdmi_Playback").len(), 1920 * 8);
    assert!(m.latency_us(s.id()).unwrap() > 0);
}
