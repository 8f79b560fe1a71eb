//! PCM stream descriptions.
//!
//! A [`SampleSpec`] is the (rate, format, channel layout) tuple describing the
//! shape of interleaved PCM data. It is an immutable value: the `with_*`
//! methods return a modified copy. Everything else in the workspace consumes
//! it, from the frame/byte arithmetic used for buffer sizing to the converter
//! chain ordering in [`crate::ConversionPipeline`].
//!
//! # Example
//!
//! ```rust
//! use audiohal_core::{SampleFormat, SampleSpec};
//!
//! let spec = SampleSpec::new(2, SampleFormat::Pcm16, 48000);
//! assert_eq!(spec.frame_size(), 4);
//! assert_eq!(spec.frames_to_usec(480), 10_000);
//! ```

use core::fmt;

/// Maximum number of interleaved channels a spec may describe.
pub const MAX_CHANNELS: u32 = 32;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Channel position bits, in interleaving order.
pub mod channel {
    /// Front left.
    pub const FRONT_LEFT: u32 = 0x1;
    /// Front right.
    pub const FRONT_RIGHT: u32 = 0x2;
    /// Front center.
    pub const FRONT_CENTER: u32 = 0x4;
    /// Low frequency effects.
    pub const LOW_FREQUENCY: u32 = 0x8;
    /// Back left.
    pub const BACK_LEFT: u32 = 0x10;
    /// Back right.
    pub const BACK_RIGHT: u32 = 0x20;
    /// Side left.
    pub const SIDE_LEFT: u32 = 0x200;
    /// Side right.
    pub const SIDE_RIGHT: u32 = 0x400;

    /// Single channel.
    pub const MONO: u32 = FRONT_LEFT;
    /// Left and right.
    pub const STEREO: u32 = FRONT_LEFT | FRONT_RIGHT;
    /// Front and back pairs.
    pub const QUAD: u32 = STEREO | BACK_LEFT | BACK_RIGHT;
    /// 5.1 surround.
    pub const SURROUND_5_1: u32 = QUAD | FRONT_CENTER | LOW_FREQUENCY;
    /// 7.1 surround.
    pub const SURROUND_7_1: u32 = SURROUND_5_1 | SIDE_LEFT | SIDE_RIGHT;

    /// Returns the conventional mask for a channel count.
    ///
    /// Counts without a named layout get the lowest `count` bits.
    pub fn mask_for_count(count: u32) -> u32 {
        match count {
            0 => 0,
            1 => MONO,
            2 => STEREO,
            4 => QUAD,
            6 => SURROUND_5_1,
            8 => SURROUND_7_1,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }
}

/// PCM sample layout.
///
/// The declaration order is meaningful: the conversion pipeline compares
/// formats to decide whether a reformat happens before or after the other
/// stages, narrowing first and widening last.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleFormat {
    /// Signed 16-bit samples.
    #[default]
    Pcm16,
    /// 24-bit samples left-padded in a signed 32-bit container (Q8.23).
    Pcm8_24,
    /// Signed 32-bit samples.
    Pcm32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm16 => 2,
            Self::Pcm8_24 | Self::Pcm32 => 4,
        }
    }

    /// Parses the literal used in topology files (`pcm16`, `pcm8_24`, `pcm32`).
    pub fn from_literal(literal: &str) -> Option<Self> {
        match literal.to_ascii_lowercase().as_str() {
            "pcm16" | "pcm_16_bit" | "s16" => Some(Self::Pcm16),
            "pcm8_24" | "pcm_8_24_bit" | "s24_in_32" => Some(Self::Pcm8_24),
            "pcm32" | "pcm_32_bit" | "s32" => Some(Self::Pcm32),
            _ => None,
        }
    }

    fn ordinal(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pcm16 => "pcm16",
            Self::Pcm8_24 => "pcm8_24",
            Self::Pcm32 => "pcm32",
        };
        f.write_str(name)
    }
}

/// How a channel participates in channel remapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelPolicy {
    /// Take the matching source channel.
    #[default]
    Copy,
    /// Take the average of all valid source channels.
    Average,
    /// The channel carries nothing meaningful: skipped as a source, silenced as
    /// a destination.
    Ignore,
}

/// The individual components of a [`SampleSpec`], in conversion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleSpecItem {
    /// Channel count (and channel policy).
    ChannelCount,
    /// Sample format.
    Format,
    /// Sample rate.
    Rate,
}

impl SampleSpecItem {
    /// All items, in the order the pipeline walks them.
    pub const ALL: [SampleSpecItem; 3] = [Self::ChannelCount, Self::Format, Self::Rate];

    /// The next item in conversion order.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::ChannelCount => Some(Self::Format),
            Self::Format => Some(Self::Rate),
            Self::Rate => None,
        }
    }
}

impl fmt::Display for SampleSpecItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChannelCount => "channel count",
            Self::Format => "format",
            Self::Rate => "rate",
        };
        f.write_str(name)
    }
}

/// Description of an interleaved PCM stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SampleSpec {
    rate: u32,
    format: SampleFormat,
    channel_mask: u32,
    channels_policy: Vec<ChannelPolicy>,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self::new(2, SampleFormat::Pcm16, DEFAULT_SAMPLE_RATE)
    }
}

impl SampleSpec {
    /// Creates a spec with the conventional mask for `channels` and an all-`Copy` policy.
    ///
    /// The channel count is clamped to [`MAX_CHANNELS`].
    pub fn new(channels: u32, format: SampleFormat, rate: u32) -> Self {
        Self::with_mask(channel::mask_for_count(channels.min(MAX_CHANNELS)), format, rate)
    }

    /// Creates a spec from an explicit channel mask.
    pub fn with_mask(channel_mask: u32, format: SampleFormat, rate: u32) -> Self {
        Self {
            rate,
            format,
            channel_mask,
            channels_policy: vec![ChannelPolicy::Copy; channel_mask.count_ones() as usize],
        }
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Sample format.
    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Channel position bitset.
    #[inline]
    pub fn channel_mask(&self) -> u32 {
        self.channel_mask
    }

    /// Number of interleaved channels, always `channel_mask.count_ones()`.
    #[inline]
    pub fn channel_count(&self) -> u32 {
        self.channel_mask.count_ones()
    }

    /// Per-channel remapping policy.
    pub fn channels_policy(&self) -> &[ChannelPolicy] {
        &self.channels_policy
    }

    /// Policy of one channel; out-of-range channels read as `Copy`.
    pub fn channel_policy(&self, channel: usize) -> ChannelPolicy {
        self.channels_policy
            .get(channel)
            .copied()
            .unwrap_or(ChannelPolicy::Copy)
    }

    /// Returns a copy with another rate.
    pub fn with_rate(&self, rate: u32) -> Self {
        Self {
            rate,
            ..self.clone()
        }
    }

    /// Returns a copy with another format.
    pub fn with_format(&self, format: SampleFormat) -> Self {
        Self {
            format,
            ..self.clone()
        }
    }

    /// Returns a copy with another channel mask.
    ///
    /// The policy is reset to `Copy` when the channel count changes.
    pub fn with_channel_mask(&self, channel_mask: u32) -> Self {
        let mut spec = self.clone();
        if channel_mask.count_ones() != self.channel_count() {
            spec.channels_policy = vec![ChannelPolicy::Copy; channel_mask.count_ones() as usize];
        }
        spec.channel_mask = channel_mask;
        spec
    }

    /// Returns a copy with another channel policy, padded with `Copy` or
    /// truncated to the channel count.
    pub fn with_channels_policy(&self, policy: impl Into<Vec<ChannelPolicy>>) -> Self {
        let mut policy = policy.into();
        policy.resize(self.channel_count() as usize, ChannelPolicy::Copy);
        Self {
            channels_policy: policy,
            ..self.clone()
        }
    }

    /// Numeric value of an item, used to order converters.
    pub fn item_value(&self, item: SampleSpecItem) -> u32 {
        match item {
            SampleSpecItem::ChannelCount => self.channel_count(),
            SampleSpecItem::Format => self.format.ordinal(),
            SampleSpecItem::Rate => self.rate,
        }
    }

    /// Returns a copy where `item` is taken from `other`.
    ///
    /// Taking the channel count also takes `other`'s mask and policy.
    pub fn with_item_from(&self, item: SampleSpecItem, other: &SampleSpec) -> Self {
        match item {
            SampleSpecItem::ChannelCount => Self {
                channel_mask: other.channel_mask,
                channels_policy: other.channels_policy.clone(),
                ..self.clone()
            },
            SampleSpecItem::Format => self.with_format(other.format),
            SampleSpecItem::Rate => self.with_rate(other.rate),
        }
    }

    /// Whether `item` is equal in both specs. Channel count equality includes the policy.
    pub fn item_eq(item: SampleSpecItem, a: &SampleSpec, b: &SampleSpec) -> bool {
        match item {
            SampleSpecItem::ChannelCount => {
                a.channel_count() == b.channel_count() && a.channels_policy == b.channels_policy
            }
            SampleSpecItem::Format => a.format == b.format,
            SampleSpecItem::Rate => a.rate == b.rate,
        }
    }

    /// Whether no item differs between the two specs, ignoring channel positions.
    pub fn is_equivalent(&self, other: &SampleSpec) -> bool {
        SampleSpecItem::ALL
            .iter()
            .all(|&item| Self::item_eq(item, self, other))
    }

    /// Size of one sample in bytes.
    #[inline]
    pub fn sample_size(&self) -> usize {
        self.format.bytes_per_sample()
    }

    /// Size of one frame (one sample per channel) in bytes.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.sample_size() * self.channel_count() as usize
    }

    /// Number of whole frames in `bytes`.
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.frame_size() {
            0 => 0,
            size => bytes / size,
        }
    }

    /// Number of bytes in `frames` frames.
    #[inline]
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    /// Duration of `frames` frames in microseconds (0 for a zero rate).
    /// Saturates instead of overflowing.
    pub fn frames_to_usec(&self, frames: usize) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        (frames as u64).saturating_mul(1_000_000) / u64::from(self.rate)
    }

    /// Number of frames in `usec` microseconds. Saturates instead of
    /// overflowing.
    pub fn usec_to_frames(&self, usec: u64) -> usize {
        let frames = usec.saturating_mul(u64::from(self.rate)) / 1_000_000;
        usize::try_from(frames).unwrap_or(usize::MAX)
    }
}

/// Frames needed at `dst`'s rate to hold `frames` frames at `src`'s rate, rounded up.
///
/// This is the rounding every resampling stage applies to its output.
pub fn convert_src_to_dst_frames(frames: usize, src: &SampleSpec, dst: &SampleSpec) -> usize {
    let src_rate = u64::from(src.rate());
    if src_rate == 0 {
        return 0;
    }
    ((frames as u64 * u64::from(dst.rate()) + src_rate - 1) / src_rate) as usize
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}/{}ch(0x{:x})",
            self.rate,
            self.format,
            self.channel_count(),
            self.channel_mask
        )
    }
}
