//! Error types for sample conversion.

use thiserror::Error;

use crate::sample_spec::{SampleSpec, SampleSpecItem};

/// Errors reported by converter stages and the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// No converter handles this source/destination pair.
    #[error("unsupported {item} conversion: {src} -> {dst}")]
    UnsupportedConversion {
        /// Item the failing converter works on.
        item: SampleSpecItem,
        /// Source spec handed to the converter.
        src: SampleSpec,
        /// Destination spec handed to the converter.
        dst: SampleSpec,
    },

    /// A sample rate of zero was requested.
    #[error("invalid sample rate: {src} Hz -> {dst} Hz")]
    InvalidRate {
        /// Source rate.
        src: u32,
        /// Destination rate.
        dst: u32,
    },

    /// A stage was used before a successful `configure`.
    #[error("converter used before configuration")]
    NotConfigured,

    /// The caller-supplied output buffer cannot hold the converted frames.
    #[error("output buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },

    /// The input buffer holds fewer bytes than the announced frame count needs.
    #[error("input buffer too short: need {needed} bytes, got {got}")]
    InputTooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },

    /// A buffer provider failed to deliver input.
    #[error("buffer provider failed: {0}")]
    Provider(String),
}

impl ConversionError {
    /// Create an unsupported conversion error.
    pub fn unsupported(item: SampleSpecItem, src: &SampleSpec, dst: &SampleSpec) -> Self {
        ConversionError::UnsupportedConversion {
            item,
            src: src.clone(),
            dst: dst.clone(),
        }
    }
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConversionError>;
