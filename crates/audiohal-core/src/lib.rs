//! Sample specifications and sample conversion for the audiohal routing core.
//!
//! This crate holds the leaf value type shared by the whole workspace,
//! [`SampleSpec`], and the [`ConversionPipeline`] that adapts a stream's
//! PCM layout to the native layout of the route it is attached to.
//!
//! # Features
//!
//! - **Sample specs**: rate, format, channel mask and per-channel policy, with
//!   the frame/byte/microsecond arithmetic used for buffer sizing
//! - **Converter stages**: channel remapping, Pcm16/Pcm8_24 reformatting, and
//!   rate conversion with a fixed 48 kHz pivot fallback
//! - **Pipeline**: item-ordered stage chaining, push (`convert`) and pull
//!   (`pull_converted`) data paths
//!
//! Resampling math is delegated to a [`ResamplerPrimitive`]. The bundled
//! [`LinearResampler`] declares a restricted set of direct ratios so the pivot
//! path is exercised the way constrained hardware resamplers require.
//!
//! # Example
//!
//! ```rust
//! use audiohal_core::{ConversionPipeline, SampleFormat, SampleSpec};
//!
//! let stream = SampleSpec::new(2, SampleFormat::Pcm16, 44100);
//! let hdmi = SampleSpec::new(2, SampleFormat::Pcm8_24, 192000);
//!
//! let mut pipeline = ConversionPipeline::new();
//! pipeline.configure(&stream, &hdmi).unwrap();
//! assert_eq!(pipeline.resample_rates(), vec![(44100, 48000), (48000, 192000)]);
//! ```

pub mod convert;
mod error;
pub mod pcm;
mod pipeline;
mod sample_spec;

pub use convert::{
    AudioResampler, Converter, LinearResampler, PIVOT_SAMPLE_RATE, Reformatter, Remapper,
    ResampleKernel, Resampler, ResamplerPrimitive, Stage,
};
pub use error::{ConversionError, Result};
pub use pipeline::{BufferProvider, ConversionPipeline};
pub use sample_spec::{
    ChannelPolicy, DEFAULT_SAMPLE_RATE, MAX_CHANNELS, SampleFormat, SampleSpec, SampleSpecItem,
    channel, convert_src_to_dst_frames,
};
