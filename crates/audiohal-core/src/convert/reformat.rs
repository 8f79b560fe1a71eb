//! Sample format conversion between Pcm16 and Pcm8_24.

use super::{Converter, check_single_item};
use crate::error::{ConversionError, Result};
use crate::pcm::{read_sample, write_sample};
use crate::sample_spec::{SampleFormat, SampleSpec, SampleSpecItem};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    /// Pcm16 to Pcm8_24.
    Widen,
    /// Pcm8_24 to Pcm16.
    Narrow,
}

/// Sample format converter between Pcm16 and Pcm8_24.
#[derive(Debug, Default)]
pub struct Reformatter {
    src: SampleSpec,
    dst: SampleSpec,
    direction: Option<Direction>,
}

impl Reformatter {
    /// Creates an unconfigured reformatter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `src -> dst` format change is available.
    pub fn supports(src: SampleFormat, dst: SampleFormat) -> bool {
        matches!(
            (src, dst),
            (SampleFormat::Pcm16, SampleFormat::Pcm8_24) | (SampleFormat::Pcm8_24, SampleFormat::Pcm16)
        )
    }
}

impl Converter for Reformatter {
    fn item(&self) -> SampleSpecItem {
        SampleSpecItem::Format
    }

    fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()> {
        self.direction = None;
        check_single_item(SampleSpecItem::Format, src, dst)?;
        let direction = match (src.format(), dst.format()) {
            (SampleFormat::Pcm16, SampleFormat::Pcm8_24) => Direction::Widen,
            (SampleFormat::Pcm8_24, SampleFormat::Pcm16) => Direction::Narrow,
            _ => return Err(ConversionError::unsupported(SampleSpecItem::Format, src, dst)),
        };
        self.src = src.clone();
        self.dst = dst.clone();
        self.direction = Some(direction);
        Ok(())
    }

    fn src_spec(&self) -> &SampleSpec {
        &self.src
    }

    fn dst_spec(&self) -> &SampleSpec {
        &self.dst
    }

    fn process(&mut self, input: &[u8], frames: usize, output: &mut [u8]) -> Result<usize> {
        let direction = self.direction.ok_or(ConversionError::NotConfigured)?;
        let samples = frames * self.src.channel_count() as usize;
        match direction {
            Direction::Widen => {
                for i in 0..samples {
                    // Q15 into the upper 24 bits of a Q8.23 container.
                    let s = read_sample(input, 2, i);
                    write_sample(output, 4, i, (s << 16) >> 8);
                }
            }
            Direction::Narrow => {
                for i in 0..samples {
                    let s = read_sample(input, 4, i);
                    write_sample(output, 2, i, s.wrapping_shl(8) >> 16);
                }
            }
        }
        Ok(frames)
    }
}
