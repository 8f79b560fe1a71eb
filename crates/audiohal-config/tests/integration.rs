//! Integration tests for audiohal-config.
//!
//! Loads the demo tablet topology, builds a route manager from it and drives
//! the rule policy through accessory, call and HDMI changes.

use audiohal_config::{KeyValuePairs, ParameterStore, Topology};
use audiohal_core::SampleFormat;
use audiohal_route::{AttachState, Direction, MockDeviceFactory, RouteManager, StreamConfig};
use tempfile::TempDir;

fn demo_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/tablet.toml")
}

fn tablet() -> RouteManager {
    let topology = Topology::load(demo_path()).unwrap();
    let manager = topology.build(Box::new(MockDeviceFactory::new())).unwrap();
    manager.start_service().unwrap();
    manager
}

fn stream(blob: &str, direction: Direction) -> StreamConfig {
    blob.parse::<KeyValuePairs>()
        .unwrap()
        .stream_config(direction)
        .unwrap()
}

fn route_of(manager: &RouteManager, index: usize) -> Option<String> {
    manager.snapshot().streams[index].route.clone()
}

// ============================================================================
// Topology file
// ============================================================================

#[test]
fn demo_topology_is_valid() {
    let topology = Topology::load(demo_path()).unwrap();
    topology.validate().unwrap();
    assert_eq!(topology.name.as_deref(), Some("tablet"));
    assert_eq!(topology.routes.len(), 7);

    // Survives a save/load cycle unchanged.
    let dir = TempDir::new().unwrap();
    let copy = dir.path().join("tablet.toml");
    topology.save(&copy).unwrap();
    assert_eq!(Topology::load(&copy).unwrap(), topology);
}

#[test]
fn demo_declares_routing_criteria() {
    let manager = tablet();
    assert_eq!(manager.audio_criterion("Mode").unwrap(), "Normal");
    assert_eq!(manager.audio_criterion("OpenedPlaybackRoutes").unwrap(), "none");
    assert_eq!(manager.interfaces().len(), 2);
}

// ============================================================================
// Rule policy
// ============================================================================

#[test]
fn accessory_moves_media_to_headset() {
    let manager = tablet();
    let out = manager.add_stream(Direction::Output, StreamConfig::default());
    manager.start_stream(out.id()).unwrap();
    manager.reconsider_routing().unwrap();
    assert_eq!(route_of(&manager, 0).as_deref(), Some("Media_Playback"));

    manager.set_audio_criterion("Accessory", "Headset").unwrap();
    manager.reconsider_routing().unwrap();
    assert_eq!(route_of(&manager, 0).as_deref(), Some("Headset_Playback"));
    assert_eq!(
        manager.audio_criterion("OpenedPlaybackRoutes").unwrap(),
        "Headset"
    );
}

#[test]
fn call_takes_the_earpiece_and_blocks_media() {
    let manager = tablet();
    let out = manager.add_stream(Direction::Output, StreamConfig::default());
    manager.start_stream(out.id()).unwrap();
    manager.reconsider_routing().unwrap();

    manager.set_audio_criterion("Mode", "InCall").unwrap();
    manager.reconsider_routing().unwrap();
    assert_eq!(out.state(), AttachState::Detached);
    assert_eq!(manager.audio_criterion("OpenedPlaybackRoutes").unwrap(), "Voice");
    assert_eq!(manager.audio_criterion("OpenedCaptureRoutes").unwrap(), "Voice");

    let snap = manager.snapshot();
    let speaker = snap.ports.iter().find(|p| p.name == "speaker").unwrap();
    assert!(speaker.blocked);

    manager.set_audio_criterion("Mode", "Normal").unwrap();
    manager.reconsider_routing().unwrap();
    assert!(out.is_routed());
}

#[test]
fn direct_stream_follows_hdmi_plug() {
    let manager = tablet();
    let direct = manager.add_stream(
        Direction::Output,
        stream("sample_rate=44100;format=pcm16;channels=2;output_flags=8", Direction::Output),
    );
    manager.start_stream(direct.id()).unwrap();
    manager.reconsider_routing().unwrap();
    assert!(!direct.is_routed());

    manager.set_audio_criterion("HdmiConnected", "true").unwrap();
    manager.reconsider_routing().unwrap();
    let spec = direct.route_spec().unwrap();
    assert_eq!(spec.rate(), 48000);
    assert_eq!(spec.format(), SampleFormat::Pcm8_24);
}

#[test]
fn capture_follows_accessory() {
    let manager = tablet();
    let mic = manager.add_stream(
        Direction::Input,
        stream("sample_rate=16000;channels=1", Direction::Input),
    );
    manager.start_stream(mic.id()).unwrap();
    manager.reconsider_routing().unwrap();
    assert_eq!(route_of(&manager, 0).as_deref(), Some("Record_Capture"));

    manager.set_audio_criterion("Accessory", "Headset").unwrap();
    manager.reconsider_routing().unwrap();
    assert_eq!(route_of(&manager, 0).as_deref(), Some("HeadsetRecord_Capture"));
}

// ============================================================================
// Parameter store
// ============================================================================

#[test]
fn parameter_store_persists_criteria_literals() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("parameters.conf");

    let mut store = ParameterStore::load(&path).unwrap();
    store.merge("Mode=InCall;Accessory=Headset").unwrap();
    store.save().unwrap();

    let manager = tablet();
    let store = ParameterStore::load(&path).unwrap();
    for (name, literal) in store.pairs().iter() {
        manager.set_audio_criterion(name, literal).unwrap();
    }
    manager.reconsider_routing().unwrap();
    assert_eq!(manager.audio_criterion("Mode").unwrap(), "InCall");
    assert_eq!(manager.audio_criterion("Accessory").unwrap(), "Headset");
}
