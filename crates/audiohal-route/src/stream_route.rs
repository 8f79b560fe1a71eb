//! Stream routes and their PCM configuration.

use std::fmt;

use audiohal_core::{ResamplerPrimitive, SampleSpec};
use parking_lot::Mutex;

use crate::Direction;
use crate::capabilities::AudioCapabilities;
use crate::device::{AudioDevice, DeviceParams};
use crate::stream::{StreamConfig, StreamId};

/// Output flag assumed for an output stream that declares no flags.
pub const OUTPUT_FLAG_PRIMARY: u32 = 0x2;
/// Input flag assumed for an input stream that declares no flags.
pub const INPUT_FLAG_PRIMARY: u32 = 0x10;

/// PCM configuration and matching masks of a stream route.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRouteConfig {
    /// Open the device before the enable stage applies the path.
    pub require_pre_enable: bool,
    /// Close the device after the disable stage applies the path.
    pub require_post_disable: bool,
    /// Sound card name.
    pub card_name: String,
    /// PCM device number on the card.
    pub device_id: u32,
    /// Native spec of the endpoint.
    pub spec: SampleSpec,
    /// Frames per period.
    pub period_size: usize,
    /// Periods per buffer.
    pub period_count: usize,
    /// Silence written before the first samples of a playback stream.
    pub silence_prolog_ms: u32,
    /// Stream flags the route accepts.
    pub flag_mask: u32,
    /// Use cases the route accepts.
    pub use_case_mask: u32,
    /// Pre-processing effects the route implements.
    pub effects_mask: u32,
    /// External devices the route manages (hot-pluggable sinks).
    pub supported_device_mask: u32,
    /// Alternative native specs, empty when only `spec` is supported.
    pub capabilities: AudioCapabilities,
}

impl Default for StreamRouteConfig {
    fn default() -> Self {
        Self {
            require_pre_enable: false,
            require_post_disable: false,
            card_name: "default".to_string(),
            device_id: 0,
            spec: SampleSpec::default(),
            period_size: 960,
            period_count: 4,
            silence_prolog_ms: 0,
            flag_mask: 0,
            use_case_mask: 0,
            effects_mask: 0,
            supported_device_mask: 0,
            capabilities: AudioCapabilities::default(),
        }
    }
}

impl StreamRouteConfig {
    /// Native spec the route runs at for `stream`.
    ///
    /// With capabilities declared, each item takes the first capability value
    /// the stream can reach, falling back to the configured spec per item.
    pub fn spec_for(
        &self,
        stream: &SampleSpec,
        direction: Direction,
        primitive: &dyn ResamplerPrimitive,
    ) -> SampleSpec {
        if self.capabilities.is_empty() {
            return self.spec.clone();
        }
        let caps = &self.capabilities;
        let rate = caps
            .rate_near(stream.rate(), direction, primitive)
            .unwrap_or(self.spec.rate());
        let format = caps
            .format_near(stream.format(), direction)
            .unwrap_or(self.spec.format());
        let mask = caps
            .channel_mask_near(stream.channel_mask(), direction)
            .unwrap_or(self.spec.channel_mask());

        let spec = SampleSpec::with_mask(mask, format, rate);
        if spec.channel_count() == self.spec.channel_count() {
            spec.with_channels_policy(self.spec.channels_policy().to_vec())
        } else {
            spec
        }
    }

    /// Device parameters for a stream running at `spec`.
    pub fn device_params(&self, direction: Direction, spec: SampleSpec) -> DeviceParams {
        DeviceParams {
            card_name: self.card_name.clone(),
            device_id: self.device_id,
            direction,
            spec,
            period_size: self.period_size,
            period_count: self.period_count,
        }
    }

    /// Buffer latency in microseconds.
    pub fn latency_us(&self) -> u64 {
        self.spec
            .frames_to_usec(self.period_size * self.period_count)
    }

    /// Period duration in microseconds.
    pub fn period_us(&self) -> u64 {
        self.spec.frames_to_usec(self.period_size)
    }

    /// Whether a stream with these flags, use case and effects can use the route.
    pub fn is_matching(&self, stream: &StreamConfig, direction: Direction) -> bool {
        let flags = match (stream.flags, direction) {
            (0, Direction::Output) => OUTPUT_FLAG_PRIMARY,
            (0, Direction::Input) => INPUT_FLAG_PRIMARY,
            (flags, _) => flags,
        };
        flags & self.flag_mask == flags
            && stream.use_case & self.use_case_mask == stream.use_case
            && stream.effects & self.effects_mask == stream.effects
    }
}

/// Stream-specific state of a route: its config, its PCM device while no
/// stream holds it, and the streams bound to it.
pub struct StreamRoute {
    pub(crate) config: StreamRouteConfig,
    /// Taken by the attached stream and handed back on detach. Only locked
    /// by queries; the manager reaches it through `get_mut`.
    pub(crate) device: Mutex<Option<Box<dyn AudioDevice>>>,
    pub(crate) current_stream: Option<StreamId>,
    pub(crate) new_stream: Option<StreamId>,
}

impl StreamRoute {
    pub(crate) fn new(config: StreamRouteConfig, device: Box<dyn AudioDevice>) -> Self {
        Self {
            config,
            device: Mutex::new(Some(device)),
            current_stream: None,
            new_stream: None,
        }
    }

    /// Route configuration.
    pub fn config(&self) -> &StreamRouteConfig {
        &self.config
    }

    /// Whether the device is parked on the route (no stream holds it).
    pub fn has_device(&self) -> bool {
        self.device.lock().is_some()
    }

    /// Stream attached after the last routing cycle.
    pub fn current_stream(&self) -> Option<StreamId> {
        self.current_stream
    }

    /// Stream selected by the current planning pass.
    pub fn new_stream(&self) -> Option<StreamId> {
        self.new_stream
    }
}

impl fmt::Debug for StreamRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRoute")
            .field("config", &self.config)
            .field("has_device", &self.has_device())
            .field("current_stream", &self.current_stream)
            .field("new_stream", &self.new_stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::AudioCapability;
    use audiohal_core::{LinearResampler, SampleFormat, channel};

    fn stream(flags: u32, use_case: u32, effects: u32) -> StreamConfig {
        StreamConfig {
            spec: SampleSpec::default(),
            flags,
            use_case,
            effects,
        }
    }

    // --- matching ---

    #[test]
    fn empty_output_flags_default_to_primary() {
        let config = StreamRouteConfig {
            flag_mask: OUTPUT_FLAG_PRIMARY,
            ..StreamRouteConfig::default()
        };
        assert!(config.is_matching(&stream(0, 0, 0), Direction::Output));
        assert!(!config.is_matching(&stream(0x4, 0, 0), Direction::Output));
        assert!(!config.is_matching(&stream(0, 0, 0), Direction::Input));
    }

    #[test]
    fn use_case_and_effects_must_be_covered() {
        let config = StreamRouteConfig {
            flag_mask: INPUT_FLAG_PRIMARY,
            use_case_mask: 0b011,
            effects_mask: 0b1,
            ..StreamRouteConfig::default()
        };
        assert!(config.is_matching(&stream(0, 0b01, 0b1), Direction::Input));
        assert!(!config.is_matching(&stream(0, 0b100, 0), Direction::Input));
        assert!(!config.is_matching(&stream(0, 0, 0b10), Direction::Input));
    }

    // --- geometry ---

    #[test]
    fn latency_and_period_from_config_spec() {
        let config = StreamRouteConfig {
            period_size: 480,
            period_count: 4,
            ..StreamRouteConfig::default()
        };
        assert_eq!(config.period_us(), 10_000);
        assert_eq!(config.latency_us(), 40_000);
    }

    // --- capabilities ---

    #[test]
    fn spec_for_without_capabilities_is_configured_spec() {
        let config = StreamRouteConfig::default();
        let lin = LinearResampler::default();
        let s = SampleSpec::new(1, SampleFormat::Pcm16, 16000);
        assert_eq!(config.spec_for(&s, Direction::Output, &lin), config.spec);
    }

    #[test]
    fn spec_for_hdmi_picks_near_values() {
        let config = StreamRouteConfig {
            spec: SampleSpec::new(2, SampleFormat::Pcm8_24, 48000),
            capabilities: vec![AudioCapability::new(
                [48000, 192000],
                SampleFormat::Pcm8_24,
                [channel::STEREO, channel::SURROUND_5_1, channel::SURROUND_7_1],
            )]
            .into(),
            ..StreamRouteConfig::default()
        };
        let lin = LinearResampler::default();
        let s = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
        let native = config.spec_for(&s, Direction::Output, &lin);
        assert_eq!(native.rate(), 48000);
        assert_eq!(native.format(), SampleFormat::Pcm8_24);
        assert_eq!(native.channel_mask(), channel::STEREO);
    }
}
