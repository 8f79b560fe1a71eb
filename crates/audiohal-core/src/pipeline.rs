//! Sample conversion pipeline.
//!
//! [`ConversionPipeline`] turns a `(src, dst)` pair of [`SampleSpec`]s into an
//! ordered chain of single-item [`Stage`]s and pushes buffers through it.
//!
//! ## Stage ordering
//!
//! Items are visited in [`SampleSpecItem`] order (channels, format, rate).
//! For each item, if the source value is larger than the destination value
//! the converter for that item runs *before* the later items; otherwise it runs
//! *after* them. Reductions happen early and expansions late, so the
//! resampler sees as few channels as possible and always works on 16-bit data
//! when either side is 16-bit.
//!
//! ```text
//! 2ch/pcm8_24/44100 -> 1ch/pcm16/192000
//!
//!   remap 2->1 ─► reformat 8_24->16 ─► resample 44100->48000->192000
//! ```
//!
//! # Example
//!
//! ```rust
//! use audiohal_core::{ConversionPipeline, SampleFormat, SampleSpec};
//!
//! let src = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
//! let dst = SampleSpec::new(2, SampleFormat::Pcm16, 48000);
//!
//! let mut pipeline = ConversionPipeline::new();
//! pipeline.configure(&src, &dst).unwrap();
//!
//! let input = vec![0u8; src.frames_to_bytes(441)];
//! let output = pipeline.convert(&input, 441).unwrap();
//! assert_eq!(dst.bytes_to_frames(output.len()), 480);
//! ```

use std::mem;
use std::sync::Arc;

use crate::convert::{
    AudioResampler, Converter, LinearResampler, Reformatter, Remapper, ResamplerPrimitive, Stage,
};
use crate::error::{ConversionError, Result};
use crate::sample_spec::{SampleSpec, SampleSpecItem, convert_src_to_dst_frames};

/// Source of input frames for [`ConversionPipeline::pull_converted`].
pub trait BufferProvider {
    /// Writes up to `frames` frames in the pipeline's source spec into `buf`
    /// and returns how many were written.
    fn fill(&mut self, buf: &mut [u8], frames: usize) -> Result<usize>;
}

/// Ordered chain of converter stages between two sample specs.
pub struct ConversionPipeline {
    primitive: Arc<dyn ResamplerPrimitive>,
    src: SampleSpec,
    dst: SampleSpec,
    stages: Vec<Stage>,
    /// Intermediate output of every stage but the last.
    buffers: Vec<Vec<u8>>,
    /// Converted frames not yet handed out by `pull_converted`.
    pending: Vec<u8>,
    pending_frames: usize,
    pull_in: Vec<u8>,
}

impl std::fmt::Debug for ConversionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPipeline")
            .field("primitive", &self.primitive.name())
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl Default for ConversionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionPipeline {
    /// Creates an empty pipeline using the reference [`LinearResampler`].
    pub fn new() -> Self {
        Self::with_primitive(Arc::new(LinearResampler::default()))
    }

    /// Creates an empty pipeline using a specific resampling primitive.
    pub fn with_primitive(primitive: Arc<dyn ResamplerPrimitive>) -> Self {
        Self {
            primitive,
            src: SampleSpec::default(),
            dst: SampleSpec::default(),
            stages: Vec::new(),
            buffers: Vec::new(),
            pending: Vec::new(),
            pending_frames: 0,
            pull_in: Vec::new(),
        }
    }

    /// The resampling primitive backing rate stages.
    pub fn primitive(&self) -> &Arc<dyn ResamplerPrimitive> {
        &self.primitive
    }

    /// Builds the stage chain for `src -> dst`.
    ///
    /// Equivalent specs yield an empty chain that copies data through. On
    /// failure the chain is left empty.
    pub fn configure(&mut self, src: &SampleSpec, dst: &SampleSpec) -> Result<()> {
        self.stages.clear();
        self.buffers.clear();
        self.pending.clear();
        self.pending_frames = 0;
        self.src = src.clone();
        self.dst = dst.clone();

        if src.is_equivalent(dst) {
            #[cfg(feature = "tracing")]
            tracing::debug!("pipeline: {src} -> {dst} passthrough");
            return Ok(());
        }

        let mut current = src.clone();
        if let Err(e) = self.add_converters(SampleSpecItem::ChannelCount, &mut current, dst) {
            #[cfg(feature = "tracing")]
            tracing::warn!("pipeline: cannot convert {src} -> {dst}: {e}");
            self.stages.clear();
            return Err(e);
        }
        debug_assert!(current.is_equivalent(dst));

        self.buffers
            .resize_with(self.stages.len().saturating_sub(1), Vec::new);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "pipeline: {src} -> {dst} with {} stage(s)",
            self.stages.len()
        );
        Ok(())
    }

    fn add_converters(
        &mut self,
        item: SampleSpecItem,
        current: &mut SampleSpec,
        dst: &SampleSpec,
    ) -> Result<()> {
        if current.item_value(item) > dst.item_value(item) {
            self.add_stage(item, current, dst)?;
        }
        if let Some(next) = item.next() {
            self.add_converters(next, current, dst)?;
        }
        if !SampleSpec::item_eq(item, current, dst) {
            self.add_stage(item, current, dst)?;
        }
        Ok(())
    }

    fn add_stage(
        &mut self,
        item: SampleSpecItem,
        current: &mut SampleSpec,
        dst: &SampleSpec,
    ) -> Result<()> {
        let step = current.with_item_from(item, dst);
        let mut stage = match item {
            SampleSpecItem::ChannelCount => Stage::Remap(Remapper::new()),
            SampleSpecItem::Format => Stage::Reformat(Reformatter::new()),
            SampleSpecItem::Rate => Stage::Resample(AudioResampler::new(Arc::clone(&self.primitive))),
        };
        stage.configure(current, &step)?;
        self.stages.push(stage);
        *current = step;
        Ok(())
    }

    /// Configured source spec.
    pub fn src_spec(&self) -> &SampleSpec {
        &self.src
    }

    /// Configured destination spec.
    pub fn dst_spec(&self) -> &SampleSpec {
        &self.dst
    }

    /// Active stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether data is copied through unchanged.
    pub fn is_passthrough(&self) -> bool {
        self.stages.is_empty()
    }

    /// Rates of each resampler in the chain, in execution order.
    pub fn resample_rates(&self) -> Vec<(u32, u32)> {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                Stage::Resample(r) => Some(r.stage_rates()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Upper bound on output frames for `in_frames` input frames.
    pub fn max_output_frames(&self, in_frames: usize) -> usize {
        self.stages
            .iter()
            .fold(in_frames, |frames, stage| stage.max_output_frames(frames))
    }

    /// Converts `frames` frames of `src` into a freshly allocated buffer.
    pub fn convert(&mut self, src: &[u8], frames: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.dst.frames_to_bytes(self.max_output_frames(frames))];
        let written = self.convert_into(src, frames, &mut out)?;
        out.truncate(self.dst.frames_to_bytes(written));
        Ok(out)
    }

    /// Converts `frames` frames of `src` into `dst` and returns the number of
    /// frames written.
    ///
    /// `dst` must hold `max_output_frames(frames)` frames. A failing stage
    /// aborts the call and its partial output is not reported.
    pub fn convert_into(&mut self, src: &[u8], frames: usize, dst: &mut [u8]) -> Result<usize> {
        let in_bytes = self.src.frames_to_bytes(frames);
        if src.len() < in_bytes {
            return Err(ConversionError::InputTooShort {
                needed: in_bytes,
                got: src.len(),
            });
        }
        let needed = self.dst.frames_to_bytes(self.max_output_frames(frames));
        if dst.len() < needed {
            return Err(ConversionError::BufferTooSmall {
                needed,
                got: dst.len(),
            });
        }

        if self.stages.is_empty() {
            dst[..in_bytes].copy_from_slice(&src[..in_bytes]);
            return Ok(frames);
        }

        let last = self.stages.len() - 1;
        let mut frames = frames;
        let mut bytes = in_bytes;
        for (i, stage) in self.stages.iter_mut().enumerate() {
            let (done, rest) = self.buffers.split_at_mut(i);
            let input: &[u8] = if i == 0 { src } else { &done[i - 1][..bytes] };
            let written = if i == last {
                stage.process(input, frames, dst)?
            } else {
                let out = &mut rest[0];
                // One spare frame for resampler rounding.
                let need = stage
                    .dst_spec()
                    .frames_to_bytes(stage.max_output_frames(frames) + 1);
                if out.len() < need {
                    out.resize(need, 0);
                }
                stage.process(input, frames, out)?
            };
            bytes = stage.dst_spec().frames_to_bytes(written);
            frames = written;
        }
        Ok(frames)
    }

    /// Fills `dst` with exactly `frames` converted frames, pulling source data
    /// from `provider` as needed.
    ///
    /// Surplus output produced by rounding is kept for the next call.
    pub fn pull_converted(
        &mut self,
        dst: &mut [u8],
        frames: usize,
        provider: &mut dyn BufferProvider,
    ) -> Result<()> {
        let out_bytes = self.dst.frames_to_bytes(frames);
        if dst.len() < out_bytes {
            return Err(ConversionError::BufferTooSmall {
                needed: out_bytes,
                got: dst.len(),
            });
        }

        let mut pending = mem::take(&mut self.pending);
        let mut pull_in = mem::take(&mut self.pull_in);
        let result = self.fill_pending(&mut pending, &mut pull_in, frames, provider);
        if result.is_ok() {
            dst[..out_bytes].copy_from_slice(&pending[..out_bytes]);
            let held = self.dst.frames_to_bytes(self.pending_frames);
            pending.copy_within(out_bytes..held, 0);
            self.pending_frames -= frames;
        }
        self.pending = pending;
        self.pull_in = pull_in;
        result
    }

    fn fill_pending(
        &mut self,
        pending: &mut Vec<u8>,
        pull_in: &mut Vec<u8>,
        frames: usize,
        provider: &mut dyn BufferProvider,
    ) -> Result<()> {
        while self.pending_frames < frames {
            let missing = frames - self.pending_frames;
            let wanted = convert_src_to_dst_frames(missing, &self.dst, &self.src).max(1);
            pull_in.resize(self.src.frames_to_bytes(wanted), 0);
            let got = provider.fill(pull_in, wanted)?.min(wanted);
            if got == 0 {
                return Err(ConversionError::Provider("provider returned no frames".into()));
            }

            let start = self.dst.frames_to_bytes(self.pending_frames);
            let end = start + self.dst.frames_to_bytes(self.max_output_frames(got));
            if pending.len() < end {
                pending.resize(end, 0);
            }
            let written = self.convert_into(pull_in, got, &mut pending[start..end])?;
            self.pending_frames += written;
        }
        Ok(())
    }
}

impl Stage {
    /// One-line description used in logs and tool output.
    pub fn describe(&self) -> String {
        let src = self.src_spec();
        let dst = self.dst_spec();
        match self {
            Stage::Remap(_) => format!(
                "remap {}ch -> {}ch",
                src.channel_count(),
                dst.channel_count()
            ),
            Stage::Reformat(_) => format!("reformat {} -> {}", src.format(), dst.format()),
            Stage::Resample(r) => {
                let rates = r.stage_rates();
                let mut text = format!("resample {}", src.rate());
                for (_, to) in rates {
                    text.push_str(&format!(" -> {to}"));
                }
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SampleFormat;
    use crate::pcm::{bytes_to_i16, bytes_to_i32, i16_to_bytes};

    fn describe(p: &ConversionPipeline) -> Vec<String> {
        p.stages().iter().map(Stage::describe).collect()
    }

    // --- configure ---

    #[test]
    fn equal_specs_are_passthrough() {
        let spec = SampleSpec::default();
        let mut p = ConversionPipeline::new();
        p.configure(&spec, &spec).unwrap();
        assert!(p.is_passthrough());
    }

    #[test]
    fn widening_runs_after_rate() {
        let src = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
        let dst = SampleSpec::new(2, SampleFormat::Pcm8_24, 48000);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        assert_eq!(
            describe(&p),
            vec!["resample 44100 -> 48000", "reformat pcm16 -> pcm8_24"]
        );
    }

    #[test]
    fn narrowing_runs_before_rate() {
        let src = SampleSpec::new(2, SampleFormat::Pcm8_24, 44100);
        let dst = SampleSpec::new(1, SampleFormat::Pcm16, 192000);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        assert_eq!(
            describe(&p),
            vec![
                "remap 2ch -> 1ch",
                "reformat pcm8_24 -> pcm16",
                "resample 44100 -> 48000 -> 192000"
            ]
        );
        assert_eq!(p.resample_rates(), vec![(44100, 48000), (48000, 192000)]);
    }

    #[test]
    fn upmix_runs_last() {
        let src = SampleSpec::new(1, SampleFormat::Pcm16, 16000);
        let dst = SampleSpec::new(2, SampleFormat::Pcm16, 48000);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        assert_eq!(describe(&p), vec!["resample 16000 -> 48000", "remap 1ch -> 2ch"]);
    }

    #[test]
    fn policy_only_change_adds_remap() {
        let src = SampleSpec::default();
        let dst = src.with_channels_policy([
            crate::ChannelPolicy::Copy,
            crate::ChannelPolicy::Ignore,
        ]);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        assert_eq!(describe(&p), vec!["remap 2ch -> 2ch"]);
    }

    #[test]
    fn failure_leaves_empty_chain() {
        let ok_src = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
        let mut p = ConversionPipeline::new();
        p.configure(&ok_src, &ok_src.with_rate(48000)).unwrap();

        let src = SampleSpec::new(2, SampleFormat::Pcm16, 48000);
        let dst = SampleSpec::new(6, SampleFormat::Pcm16, 48000);
        assert!(p.configure(&src, &dst).is_err());
        assert!(p.stages().is_empty());
    }

    #[test]
    fn pcm32_rate_change_is_unsupported() {
        let src = SampleSpec::new(2, SampleFormat::Pcm32, 44100);
        let mut p = ConversionPipeline::new();
        let err = p.configure(&src, &src.with_rate(48000)).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::UnsupportedConversion { item: SampleSpecItem::Rate, .. }
        ));
    }

    // --- convert ---

    #[test]
    fn passthrough_copies_input() {
        let spec = SampleSpec::default();
        let mut p = ConversionPipeline::new();
        p.configure(&spec, &spec).unwrap();
        let input = i16_to_bytes(&[1, 2, 3, 4]);
        assert_eq!(p.convert(&input, 2).unwrap(), input);
    }

    #[test]
    fn multi_stage_convert_produces_dst_layout() {
        let src = SampleSpec::new(2, SampleFormat::Pcm16, 48000);
        let dst = SampleSpec::new(1, SampleFormat::Pcm8_24, 48000);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        let input = i16_to_bytes(&[100, 300, -100, -300]);
        let out = p.convert(&input, 2).unwrap();
        assert_eq!(bytes_to_i32(&out), vec![200 << 8, -200 << 8]);
    }

    #[test]
    fn convert_into_rejects_small_destination() {
        let src = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &src.with_rate(48000)).unwrap();
        let input = vec![0u8; src.frames_to_bytes(441)];
        let mut out = vec![0u8; 16];
        let err = p.convert_into(&input, 441, &mut out).unwrap_err();
        assert!(matches!(err, ConversionError::BufferTooSmall { .. }));
    }

    #[test]
    fn convert_into_rejects_short_input() {
        let spec = SampleSpec::default();
        let mut p = ConversionPipeline::new();
        p.configure(&spec, &spec).unwrap();
        let err = p.convert_into(&[0u8; 3], 1, &mut [0u8; 4]).unwrap_err();
        assert!(matches!(err, ConversionError::InputTooShort { needed: 4, got: 3 }));
    }

    #[test]
    fn rate_conversion_frame_count() {
        let src = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
        let dst = src.with_rate(192000);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        let out = p.convert(&vec![0u8; src.frames_to_bytes(441)], 441).unwrap();
        assert_eq!(dst.bytes_to_frames(out.len()), 1920);
    }

    // --- pull model ---

    struct Ramp {
        next: i16,
        calls: usize,
    }

    impl BufferProvider for Ramp {
        fn fill(&mut self, buf: &mut [u8], frames: usize) -> Result<usize> {
            self.calls += 1;
            for i in 0..frames {
                crate::pcm::write_sample(buf, 2, i, i32::from(self.next));
                self.next = self.next.wrapping_add(1);
            }
            Ok(frames)
        }
    }

    struct Dry;

    impl BufferProvider for Dry {
        fn fill(&mut self, _buf: &mut [u8], _frames: usize) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn pull_delivers_exact_frames_and_keeps_surplus() {
        let src = SampleSpec::new(1, SampleFormat::Pcm16, 44100);
        let dst = src.with_rate(48000);
        let mut p = ConversionPipeline::new();
        p.configure(&src, &dst).unwrap();
        let mut provider = Ramp { next: 0, calls: 0 };

        let mut out = vec![0u8; dst.frames_to_bytes(100)];
        p.pull_converted(&mut out, 100, &mut provider).unwrap();
        // ceil(100 * 44100 / 48000) = 92 input frames -> 101 output frames.
        assert_eq!(p.pending_frames, 1);
        p.pull_converted(&mut out[..2], 1, &mut provider).unwrap();
        assert_eq!(p.pending_frames, 0);
        assert_eq!(provider.calls, 1);
    }

    #[test]
    fn pull_passthrough_is_identity() {
        let spec = SampleSpec::new(1, SampleFormat::Pcm16, 48000);
        let mut p = ConversionPipeline::new();
        p.configure(&spec, &spec).unwrap();
        let mut provider = Ramp { next: 10, calls: 0 };
        let mut out = vec![0u8; 6];
        p.pull_converted(&mut out, 3, &mut provider).unwrap();
        assert_eq!(bytes_to_i16(&out), vec![10, 11, 12]);
    }

    #[test]
    fn pull_from_dry_provider_fails() {
        let spec = SampleSpec::default();
        let mut p = ConversionPipeline::new();
        p.configure(&spec, &spec).unwrap();
        let err = p.pull_converted(&mut [0u8; 8], 2, &mut Dry).unwrap_err();
        assert!(matches!(err, ConversionError::Provider(_)));
    }
}
