//! Sample spec capabilities of a stream route.
//!
//! A route whose endpoint can run at several rates, formats or layouts (HDMI
//! sinks are the usual case) lists them as [`AudioCapability`] entries. When a
//! stream is attached the route picks the first capability value that the
//! stream can reach through the conversion pipeline, so that conversion is
//! kept to a minimum.

use std::fmt;

use audiohal_core::{AudioResampler, Reformatter, Remapper, ResamplerPrimitive, SampleFormat};

use crate::Direction;

/// One supported profile of a route endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCapability {
    /// Supported rates, in preference order.
    pub rates: Vec<u32>,
    /// The single supported sample format.
    pub format: SampleFormat,
    /// Supported channel masks, in preference order.
    pub channel_masks: Vec<u32>,
}

impl AudioCapability {
    /// Creates a capability.
    pub fn new(
        rates: impl Into<Vec<u32>>,
        format: SampleFormat,
        channel_masks: impl Into<Vec<u32>>,
    ) -> Self {
        Self {
            rates: rates.into(),
            format,
            channel_masks: channel_masks.into(),
        }
    }

    /// First supported rate equal to `rate` or reachable by resampling in
    /// the stream's direction.
    pub fn rate_near(
        &self,
        rate: u32,
        direction: Direction,
        primitive: &dyn ResamplerPrimitive,
    ) -> Option<u32> {
        self.rates.iter().copied().find(|&supported| {
            let (src, dst) = oriented(rate, supported, direction);
            supported == rate || AudioResampler::supports(primitive, src, dst)
        })
    }

    /// First supported channel mask equal to `mask` or reachable by remapping
    /// in the stream's direction.
    pub fn channel_mask_near(&self, mask: u32, direction: Direction) -> Option<u32> {
        self.channel_masks.iter().copied().find(|&supported| {
            let (src, dst) = oriented(mask.count_ones(), supported.count_ones(), direction);
            supported == mask || Remapper::supports(src, dst)
        })
    }

    /// The supported format if it equals `format` or is reachable by
    /// reformatting in the stream's direction.
    pub fn format_near(&self, format: SampleFormat, direction: Direction) -> Option<SampleFormat> {
        let (src, dst) = oriented(format, self.format, direction);
        (self.format == format || Reformatter::supports(src, dst)).then_some(self.format)
    }
}

/// Orders a (stream, route) pair as (source, destination) of the conversion.
fn oriented<T>(stream: T, route: T, direction: Direction) -> (T, T) {
    match direction {
        Direction::Output => (stream, route),
        Direction::Input => (route, stream),
    }
}

impl fmt::Display for AudioCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rates: Vec<String> = self.rates.iter().map(u32::to_string).collect();
        let masks: Vec<String> = self
            .channel_masks
            .iter()
            .map(|m| format!("{m:#x}"))
            .collect();
        write!(
            f,
            "format {} rates [{}] masks [{}]",
            self.format,
            rates.join("|"),
            masks.join("|")
        )
    }
}

/// All profiles of a route endpoint. Empty means the route only runs at its
/// configured spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioCapabilities(pub Vec<AudioCapability>);

impl AudioCapabilities {
    /// Whether no capability is declared.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the declared profiles.
    pub fn iter(&self) -> std::slice::Iter<'_, AudioCapability> {
        self.0.iter()
    }

    /// First rate near `rate` across all profiles.
    pub fn rate_near(
        &self,
        rate: u32,
        direction: Direction,
        primitive: &dyn ResamplerPrimitive,
    ) -> Option<u32> {
        self.0
            .iter()
            .find_map(|c| c.rate_near(rate, direction, primitive))
    }

    /// First channel mask near `mask` across all profiles.
    pub fn channel_mask_near(&self, mask: u32, direction: Direction) -> Option<u32> {
        self.0.iter().find_map(|c| c.channel_mask_near(mask, direction))
    }

    /// First format near `format` across all profiles.
    pub fn format_near(&self, format: SampleFormat, direction: Direction) -> Option<SampleFormat> {
        self.0.iter().find_map(|c| c.format_near(format, direction))
    }
}

impl From<Vec<AudioCapability>> for AudioCapabilities {
    fn from(caps: Vec<AudioCapability>) -> Self {
        Self(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiohal_core::{LinearResampler, channel};

    fn hdmi() -> AudioCapability {
        AudioCapability::new(
            [48000, 192000],
            SampleFormat::Pcm8_24,
            [channel::STEREO, channel::SURROUND_5_1, channel::SURROUND_7_1],
        )
    }

    // --- near lookups ---

    #[test]
    fn hdmi_rate_near_prefers_first_reachable() {
        let lin = LinearResampler::default();
        let caps = hdmi();
        assert_eq!(caps.rate_near(48000, Direction::Output, &lin), Some(48000));
        assert_eq!(caps.rate_near(44100, Direction::Output, &lin), Some(48000));
        assert_eq!(caps.rate_near(12345, Direction::Output, &lin), None);
    }

    #[test]
    fn hdmi_mask_near() {
        let caps = hdmi();
        assert_eq!(
            caps.channel_mask_near(channel::STEREO, Direction::Output),
            Some(channel::STEREO)
        );
        assert_eq!(
            caps.channel_mask_near(channel::MONO, Direction::Output),
            Some(channel::STEREO)
        );
        // No 6ch -> 2ch remap, so the exact 5.1 entry is picked.
        assert_eq!(
            caps.channel_mask_near(channel::SURROUND_5_1, Direction::Output),
            Some(channel::SURROUND_5_1)
        );
        assert_eq!(caps.channel_mask_near(channel::QUAD, Direction::Output), Some(channel::STEREO));
    }

    #[test]
    fn mask_near_without_remap_falls_through_to_exact() {
        let caps = AudioCapability::new([48000], SampleFormat::Pcm16, [channel::SURROUND_5_1]);
        assert_eq!(
            caps.channel_mask_near(channel::SURROUND_5_1, Direction::Output),
            Some(channel::SURROUND_5_1)
        );
        assert_eq!(caps.channel_mask_near(channel::STEREO, Direction::Output), None);
    }

    #[test]
    fn format_near_uses_reformat_support() {
        let caps = hdmi();
        assert_eq!(
            caps.format_near(SampleFormat::Pcm16, Direction::Output),
            Some(SampleFormat::Pcm8_24)
        );
        assert_eq!(caps.format_near(SampleFormat::Pcm32, Direction::Output), None);
    }

    #[test]
    fn input_direction_swaps_conversion_order() {
        let lin = LinearResampler::new(vec![16000, 48000], 6);
        let caps = AudioCapability::new([48000], SampleFormat::Pcm16, [channel::STEREO]);
        // Capture converts route (48000) to stream (16000).
        assert_eq!(caps.rate_near(16000, Direction::Input, &lin), Some(48000));
    }

    // --- collections ---

    #[test]
    fn collection_searches_profiles_in_order() {
        let lin = LinearResampler::default();
        let caps = AudioCapabilities::from(vec![
            AudioCapability::new([12345], SampleFormat::Pcm32, [channel::SURROUND_7_1]),
            hdmi(),
        ]);
        assert_eq!(caps.rate_near(44100, Direction::Output, &lin), Some(48000));
        assert_eq!(
            caps.format_near(SampleFormat::Pcm32, Direction::Output),
            Some(SampleFormat::Pcm32)
        );
        assert!(AudioCapabilities::default().is_empty());
    }

    #[test]
    fn display_lists_profile() {
        assert_eq!(
            hdmi().to_string(),
            "format pcm8_24 rates [48000|192000] masks [0x3|0x3f|0x63f]"
        );
    }
}
