//! Converter stages.
//!
//! Each stage changes exactly one [`SampleSpecItem`] and requires every other
//! item to be identical between its source and destination spec. The
//! [`ConversionPipeline`](crate::ConversionPipeline) chains stages so that a
//! full (channels, format, rate) change becomes a sequence of single-item
//! steps.
//!
//! | stage         | item         | data                                   |
//! |---------------|--------------|----------------------------------------|
//! | [`Remapper`]  | channels     | 16-bit or 32-bit containers            |
//! | [`Reformatter`] | format     | Pcm16 ↔ Pcm8_24                        |
//! | [`AudioResampler`] | rate    | Pcm16, direct or through the pivot rate |

mod reformat;
mod remap;
mod resample;

pub use reformat::Reformatter;
pub use remap::Remapper;
pub use resample::{
    AudioResampler, LinearResampler, PIVOT_SAMPLE_RATE, ResampleKernel, Resampler,
    ResamplerPrimitive,
};

use crate::error::{ConversionError, Result};
use crate::sample_spec::{SampleSpec, SampleSpecItem, convert_src_to_dst_frames};

/// A single-item conversion step over interleaved byte buffers.
pub trait Converter {
    /// Item this converter changes.
    fn item(&self) -> SampleSpecItem;

    /// Prepares the converter for `src -> dst`.
    ///
    /// Fails when the converter's own item is equal in both specs, when any
    /// other item differs, or when the specific change is not supported.
    fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()>;

    /// Spec of the data this converter consumes.
    fn src_spec(&self) -> &SampleSpec;

    /// Spec of the data this converter produces.
    fn dst_spec(&self) -> &SampleSpec;

    /// Upper bound on output frames for `in_frames` input frames.
    fn max_output_frames(&self, in_frames: usize) -> usize {
        convert_src_to_dst_frames(in_frames, self.src_spec(), self.dst_spec())
    }

    /// Converts `frames` frames from `input` into `output` and returns the
    /// number of frames written.
    ///
    /// `output` must hold at least `dst_spec().frames_to_bytes(max_output_frames(frames))` bytes.
    fn process(&mut self, input: &[u8], frames: usize, output: &mut [u8]) -> Result<usize>;
}

/// Checks the single-item rule shared by every converter.
pub(crate) fn check_single_item(
    item: SampleSpecItem,
    src: &SampleSpec,
    dst: &SampleSpec,
) -> Result<()> {
    for other in SampleSpecItem::ALL {
        let equal = SampleSpec::item_eq(other, src, dst);
        if (other == item && equal) || (other != item && !equal) {
            return Err(ConversionError::unsupported(item, src, dst));
        }
    }
    Ok(())
}

/// A configured pipeline stage.
///
/// Stages are a closed set, so they are a tagged variant rather than trait objects.
#[derive(Debug)]
pub enum Stage {
    /// Channel remapping.
    Remap(Remapper),
    /// Sample format change.
    Reformat(Reformatter),
    /// Sample rate change, possibly two resamplers deep.
    Resample(AudioResampler),
}

impl Stage {
    fn inner(&self) -> &dyn Converter {
        match self {
            Stage::Remap(c) => c,
            Stage::Reformat(c) => c,
            Stage::Resample(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Converter {
        match self {
            Stage::Remap(c) => c,
            Stage::Reformat(c) => c,
            Stage::Resample(c) => c,
        }
    }
}

impl Converter for Stage {
    fn item(&self) -> SampleSpecItem {
        self.inner().item()
    }

    fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()> {
        self.inner_mut().configure(src, dst)
    }

    fn src_spec(&self) -> &SampleSpec {
        self.inner().src_spec()
    }

    fn dst_spec(&self) -> &SampleSpec {
        self.inner().dst_spec()
    }

    fn max_output_frames(&self, in_frames: usize) -> usize {
        self.inner().max_output_frames(in_frames)
    }

    fn process(&mut self, input: &[u8], frames: usize, output: &mut [u8]) -> Result<usize> {
        self.inner_mut().process(input, frames, output)
    }
}
