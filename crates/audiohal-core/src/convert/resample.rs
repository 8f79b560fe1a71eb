//! Rate conversion.
//!
//! The resampling math itself lives behind [`ResamplerPrimitive`], which
//! declares which rate pairs it converts directly. [`AudioResampler`] adds
//! the fallback: when the primitive refuses a pair, the conversion is split
//! into `src -> PIVOT_SAMPLE_RATE -> dst`.

use std::fmt;
use std::sync::Arc;

use super::{Converter, check_single_item};
use crate::error::{ConversionError, Result};
use crate::pcm::{read_sample, write_sample};
use crate::sample_spec::{SampleFormat, SampleSpec, SampleSpecItem, convert_src_to_dst_frames};

/// Intermediate rate used when a direct conversion is not available.
pub const PIVOT_SAMPLE_RATE: u32 = 48000;

/// A configured resampling kernel for one (channels, src rate, dst rate) triple.
pub trait ResampleKernel: Send {
    /// Resamples interleaved 16-bit `input` into `output`.
    ///
    /// `output` holds at least `ceil(in_frames * dst / src)` frames. Returns
    /// the number of frames written.
    fn process(&mut self, input: &[i16], output: &mut [i16]) -> usize;
}

/// External resampling primitive.
pub trait ResamplerPrimitive: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Whether `src_rate -> dst_rate` is converted directly.
    fn supports(&self, src_rate: u32, dst_rate: u32) -> bool;

    /// Builds a kernel, or `None` when the conversion is not supported.
    fn create(&self, channels: u32, src_rate: u32, dst_rate: u32) -> Option<Box<dyn ResampleKernel>>;
}

/// Reference linear-interpolation primitive.
///
/// Direct conversions are limited to pairs of [`LinearResampler::rates`] where
/// one side is 48 kHz or the ratio is an integer no larger than `max_ratio`.
/// Anything else must go through the pivot.
#[derive(Clone, Debug)]
pub struct LinearResampler {
    rates: Vec<u32>,
    max_ratio: u32,
}

impl Default for LinearResampler {
    fn default() -> Self {
        Self {
            rates: vec![
                8000, 11025, 16000, 22050, 32000, 44100, 48000, 96000, 192000,
            ],
            max_ratio: 6,
        }
    }
}

impl LinearResampler {
    /// Creates a primitive with a custom rate table and ratio limit.
    pub fn new(rates: impl Into<Vec<u32>>, max_ratio: u32) -> Self {
        Self {
            rates: rates.into(),
            max_ratio,
        }
    }

    /// Rates the primitive accepts on either side.
    pub fn rates(&self) -> &[u32] {
        &self.rates
    }
}

impl ResamplerPrimitive for LinearResampler {
    fn name(&self) -> &str {
        "linear"
    }

    fn supports(&self, src_rate: u32, dst_rate: u32) -> bool {
        if !self.rates.contains(&src_rate) || !self.rates.contains(&dst_rate) {
            return false;
        }
        if src_rate == dst_rate || src_rate == 48000 || dst_rate == 48000 {
            return true;
        }
        let (lo, hi) = if src_rate < dst_rate {
            (src_rate, dst_rate)
        } else {
            (dst_rate, src_rate)
        };
        hi % lo == 0 && hi / lo <= self.max_ratio
    }

    fn create(&self, channels: u32, src_rate: u32, dst_rate: u32) -> Option<Box<dyn ResampleKernel>> {
        if channels == 0 || !self.supports(src_rate, dst_rate) {
            return None;
        }
        Some(Box::new(LinearKernel {
            channels: channels as usize,
            src_rate: u64::from(src_rate),
            dst_rate: u64::from(dst_rate),
        }))
    }
}

struct LinearKernel {
    channels: usize,
    src_rate: u64,
    dst_rate: u64,
}

impl ResampleKernel for LinearKernel {
    fn process(&mut self, input: &[i16], output: &mut [i16]) -> usize {
        let in_frames = input.len() / self.channels;
        if in_frames == 0 {
            return 0;
        }
        let out_frames = ((in_frames as u64 * self.dst_rate).div_ceil(self.src_rate) as usize)
            .min(output.len() / self.channels);
        let last = in_frames - 1;
        for j in 0..out_frames {
            let pos = j as u64 * self.src_rate;
            let i0 = ((pos / self.dst_rate) as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = (pos % self.dst_rate) as f32 / self.dst_rate as f32;
            for ch in 0..self.channels {
                let a = f32::from(input[i0 * self.channels + ch]);
                let b = f32::from(input[i1 * self.channels + ch]);
                let v = a + (b - a) * frac;
                output[j * self.channels + ch] = v.round().clamp(-32768.0, 32767.0) as i16;
            }
        }
        out_frames
    }
}

/// Single-step rate converter over 16-bit samples.
pub struct Resampler {
    primitive: Arc<dyn ResamplerPrimitive>,
    src: SampleSpec,
    dst: SampleSpec,
    kernel: Option<Box<dyn ResampleKernel>>,
    scratch_in: Vec<i16>,
    scratch_out: Vec<i16>,
}

impl fmt::Debug for Resampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resampler")
            .field("primitive", &self.primitive.name())
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("configured", &self.kernel.is_some())
            .finish_non_exhaustive()
    }
}

impl Resampler {
    /// Creates an unconfigured resampler backed by `primitive`.
    pub fn new(primitive: Arc<dyn ResamplerPrimitive>) -> Self {
        Self {
            primitive,
            src: SampleSpec::default(),
            dst: SampleSpec::default(),
            kernel: None,
            scratch_in: Vec::new(),
            scratch_out: Vec::new(),
        }
    }

    /// `(src, dst)` rates of the configured conversion.
    pub fn rates(&self) -> (u32, u32) {
        (self.src.rate(), self.dst.rate())
    }
}

impl Converter for Resampler {
    fn item(&self) -> SampleSpecItem {
        SampleSpecItem::Rate
    }

    fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()> {
        if self.kernel.is_some() && src == &self.src && dst == &self.dst {
            return Ok(());
        }
        self.kernel = None;
        if src.rate() == 0 || dst.rate() == 0 {
            return Err(ConversionError::InvalidRate {
                src: src.rate(),
                dst: dst.rate(),
            });
        }
        check_single_item(SampleSpecItem::Rate, src, dst)?;
        if src.format() != SampleFormat::Pcm16 {
            return Err(ConversionError::unsupported(SampleSpecItem::Rate, src, dst));
        }
        let kernel = self
            .primitive
            .create(src.channel_count(), src.rate(), dst.rate())
            .ok_or_else(|| ConversionError::unsupported(SampleSpecItem::Rate, src, dst))?;
        self.src = src.clone();
        self.dst = dst.clone();
        self.kernel = Some(kernel);
        Ok(())
    }

    fn src_spec(&self) -> &SampleSpec {
        &self.src
    }

    fn dst_spec(&self) -> &SampleSpec {
        &self.dst
    }

    fn process(&mut self, input: &[u8], frames: usize, output: &mut [u8]) -> Result<usize> {
        let kernel = self.kernel.as_mut().ok_or(ConversionError::NotConfigured)?;
        let channels = self.src.channel_count() as usize;
        let out_capacity = convert_src_to_dst_frames(frames, &self.src, &self.dst);

        self.scratch_in.clear();
        self.scratch_in
            .extend((0..frames * channels).map(|i| read_sample(input, 2, i) as i16));
        self.scratch_out.resize(out_capacity * channels, 0);

        let written = kernel.process(&self.scratch_in, &mut self.scratch_out);
        for (i, &s) in self.scratch_out[..written * channels].iter().enumerate() {
            write_sample(output, 2, i, i32::from(s));
        }
        Ok(written)
    }
}

/// Rate converter with pivot fallback.
///
/// After a successful `configure` it holds one resampler (direct) or two
/// (`src -> PIVOT_SAMPLE_RATE`, then `PIVOT_SAMPLE_RATE -> dst`), in
/// execution order. A failed `configure` leaves it empty.
pub struct AudioResampler {
    primitive: Arc<dyn ResamplerPrimitive>,
    src: SampleSpec,
    dst: SampleSpec,
    active: Vec<Resampler>,
    pivot_buf: Vec<u8>,
}

impl fmt::Debug for AudioResampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioResampler")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl AudioResampler {
    /// Creates an unconfigured resampler backed by `primitive`.
    pub fn new(primitive: Arc<dyn ResamplerPrimitive>) -> Self {
        Self {
            primitive,
            src: SampleSpec::default(),
            dst: SampleSpec::default(),
            active: Vec::new(),
            pivot_buf: Vec::new(),
        }
    }

    /// Whether `primitive` can take `src_rate` to `dst_rate`, directly or through the pivot.
    pub fn supports(primitive: &dyn ResamplerPrimitive, src_rate: u32, dst_rate: u32) -> bool {
        src_rate == dst_rate
            || primitive.supports(src_rate, dst_rate)
            || (primitive.supports(src_rate, PIVOT_SAMPLE_RATE)
                && primitive.supports(PIVOT_SAMPLE_RATE, dst_rate))
    }

    /// Number of active resamplers: 0 when unconfigured, 1 direct, 2 pivoted.
    pub fn active_stage_count(&self) -> usize {
        self.active.len()
    }

    /// `(src, dst)` rates of each active resampler, in execution order.
    pub fn stage_rates(&self) -> Vec<(u32, u32)> {
        self.active.iter().map(Resampler::rates).collect()
    }

    fn configure_pivot(&self, src: &SampleSpec, dst: &SampleSpec) -> Result<Vec<Resampler>> {
        let pivot = src.with_rate(PIVOT_SAMPLE_RATE);
        let mut first = Resampler::new(Arc::clone(&self.primitive));
        first.configure(src, &pivot)?;
        let mut second = Resampler::new(Arc::clone(&self.primitive));
        second.configure(&pivot, dst)?;
        Ok(vec![first, second])
    }
}

impl Converter for AudioResampler {
    fn item(&self) -> SampleSpecItem {
        SampleSpecItem::Rate
    }

    fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()> {
        self.active.clear();
        if src.rate() == 0 || dst.rate() == 0 {
            return Err(ConversionError::InvalidRate {
                src: src.rate(),
                dst: dst.rate(),
            });
        }
        check_single_item(SampleSpecItem::Rate, src, dst)?;

        let mut direct = Resampler::new(Arc::clone(&self.primitive));
        let stages = match direct.configure(src, dst) {
            Ok(()) => vec![direct],
            Err(ConversionError::UnsupportedConversion { .. }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "resampler: {} -> {} not direct, pivoting at {PIVOT_SAMPLE_RATE}",
                    src.rate(),
                    dst.rate()
                );
                self.configure_pivot(src, dst)?
            }
            Err(e) => return Err(e),
        };

        self.src = src.clone();
        self.dst = dst.clone();
        self.active = stages;
        Ok(())
    }

    fn src_spec(&self) -> &SampleSpec {
        &self.src
    }

    fn dst_spec(&self) -> &SampleSpec {
        &self.dst
    }

    fn max_output_frames(&self, in_frames: usize) -> usize {
        self.active
            .iter()
            .fold(in_frames, |frames, stage| stage.max_output_frames(frames))
    }

    fn process(&mut self, input: &[u8], frames: usize, output: &mut [u8]) -> Result<usize> {
        match self.active.as_mut_slice() {
            [] => Err(ConversionError::NotConfigured),
            [direct] => direct.process(input, frames, output),
            [first, second] => {
                let pivot_frames = first.max_output_frames(frames);
                let bytes = first.dst_spec().frames_to_bytes(pivot_frames + 1);
                if self.pivot_buf.len() < bytes {
                    self.pivot_buf.resize(bytes, 0);
                }
                let n = first.process(input, frames, &mut self.pivot_buf)?;
                let used = first.dst_spec().frames_to_bytes(n);
                second.process(&self.pivot_buf[..used], n, output)
            }
            _ => Err(ConversionError::NotConfigured),
        }
    }
}
