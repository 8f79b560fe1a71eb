//! Channel count and channel policy conversion.
//!
//! Narrow layouts fan out to wider ones and wide layouts fold down by
//! averaging. Stereo to stereo applies the per-channel [`ChannelPolicy`].

use super::{Converter, check_single_item};
use crate::error::{ConversionError, Result};
use crate::pcm::{read_sample, write_sample};
use crate::sample_spec::{ChannelPolicy, SampleSpec, SampleSpecItem};

const MONO: u32 = 1;
const STEREO: u32 = 2;
const QUAD: u32 = 4;
const MULTI_8: u32 = 8;

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BACK_LEFT: usize = 2;
const BACK_RIGHT: usize = 3;

/// Channel count pairs the remapper handles. Stereo to stereo only applies
/// when the channel policies differ.
const SUPPORTED: [(u32, u32); 11] = [
    (MONO, STEREO),
    (MONO, QUAD),
    (MONO, MULTI_8),
    (STEREO, STEREO),
    (STEREO, MONO),
    (STEREO, QUAD),
    (STEREO, MULTI_8),
    (QUAD, MONO),
    (QUAD, STEREO),
    (MULTI_8, MONO),
    (MULTI_8, STEREO),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    /// Average of valid source channels into every non-ignored destination channel.
    Spread,
    StereoToQuad,
    QuadToStereo,
    /// Same channel count, different policy.
    StereoPolicy,
}

/// Channel count and channel policy converter.
#[derive(Debug, Default)]
pub struct Remapper {
    src: SampleSpec,
    dst: SampleSpec,
    width: usize,
    layout: Option<Layout>,
}

impl Remapper {
    /// Creates an unconfigured remapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `src_channels -> dst_channels` remap is available.
    pub fn supports(src_channels: u32, dst_channels: u32) -> bool {
        SUPPORTED.contains(&(src_channels, dst_channels))
    }

    fn average(&self, input: &[u8], frame: usize) -> i32 {
        let channels = self.src.channel_count() as usize;
        let mut sum = 0i64;
        let mut valid = 0i64;
        for ch in 0..channels {
            if self.src.channel_policy(ch) != ChannelPolicy::Ignore {
                sum += i64::from(read_sample(input, self.width, frame * channels + ch));
                valid += 1;
            }
        }
        if valid == 0 { 0 } else { (sum / valid) as i32 }
    }

    /// Average of the non-ignored source channels among `picks`.
    fn average_of(&self, input: &[u8], frame: usize, picks: [usize; 2]) -> i32 {
        let channels = self.src.channel_count() as usize;
        let mut sum = 0i64;
        let mut valid = 0i64;
        for ch in picks {
            if self.src.channel_policy(ch) != ChannelPolicy::Ignore {
                sum += i64::from(read_sample(input, self.width, frame * channels + ch));
                valid += 1;
            }
        }
        if valid == 0 { 0 } else { (sum / valid) as i32 }
    }

    fn policy_sample(&self, input: &[u8], frame: usize, ch: usize) -> i32 {
        match self.dst.channel_policy(ch) {
            ChannelPolicy::Ignore => 0,
            ChannelPolicy::Average => self.average(input, frame),
            ChannelPolicy::Copy if self.src.channel_policy(ch) != ChannelPolicy::Ignore => {
                let channels = self.src.channel_count() as usize;
                read_sample(input, self.width, frame * channels + ch)
            }
            ChannelPolicy::Copy => self.average(input, frame),
        }
    }
}

impl Converter for Remapper {
    fn item(&self) -> SampleSpecItem {
        SampleSpecItem::ChannelCount
    }

    fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()> {
        self.layout = None;
        check_single_item(SampleSpecItem::ChannelCount, src, dst)?;
        let (from, to) = (src.channel_count(), dst.channel_count());
        if !Self::supports(from, to) {
            return Err(ConversionError::unsupported(SampleSpecItem::ChannelCount, src, dst));
        }
        let layout = match (from, to) {
            (STEREO, STEREO) => Layout::StereoPolicy,
            (STEREO, QUAD) => Layout::StereoToQuad,
            (QUAD, STEREO) => Layout::QuadToStereo,
            _ => Layout::Spread,
        };
        self.src = src.clone();
        self.dst = dst.clone();
        self.width = src.sample_size();
        self.layout = Some(layout);
        Ok(())
    }

    fn src_spec(&self) -> &SampleSpec {
        &self.src
    }

    fn dst_spec(&self) -> &SampleSpec {
        &self.dst
    }

    fn process(&mut self, input: &[u8], frames: usize, output: &mut [u8]) -> Result<usize> {
        let layout = self.layout.ok_or(ConversionError::NotConfigured)?;
        let src_ch = self.src.channel_count() as usize;
        let dst_ch = self.dst.channel_count() as usize;
        let w = self.width;

        for frame in 0..frames {
            let out = frame * dst_ch;
            match layout {
                Layout::Spread => {
                    let avg = self.average(input, frame);
                    for ch in 0..dst_ch {
                        let value = if self.dst.channel_policy(ch) == ChannelPolicy::Ignore {
                            0
                        } else {
                            avg
                        };
                        write_sample(output, w, out + ch, value);
                    }
                }
                Layout::StereoToQuad => {
                    let l = read_sample(input, w, frame * src_ch + LEFT);
                    let r = read_sample(input, w, frame * src_ch + RIGHT);
                    write_sample(output, w, out + LEFT, l);
                    write_sample(output, w, out + RIGHT, r);
                    write_sample(output, w, out + BACK_LEFT, l);
                    write_sample(output, w, out + BACK_RIGHT, r);
                }
                Layout::QuadToStereo => {
                    let l = self.average_of(input, frame, [LEFT, BACK_LEFT]);
                    let r = self.average_of(input, frame, [RIGHT, BACK_RIGHT]);
                    write_sample(output, w, out + LEFT, l);
                    write_sample(output, w, out + RIGHT, r);
                }
                Layout::StereoPolicy => {
                    let l = self.policy_sample(input, frame, LEFT);
                    let r = self.policy_sample(input, frame, RIGHT);
                    write_sample(output, w, out + LEFT, l);
                    write_sample(output, w, out + RIGHT, r);
                }
            }
        }
        Ok(frames)
    }
}
