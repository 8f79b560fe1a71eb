//! Native-endian sample access over interleaved byte buffers.
//!
//! Converter stages see PCM data as raw bytes, the way a device hands it
//! over. These helpers read and write one sample at a time as `i32`
//! regardless of the container width (2 or 4 bytes).

/// Reads sample `index` from a buffer of `width`-byte samples.
#[inline]
pub fn read_sample(buf: &[u8], width: usize, index: usize) -> i32 {
    let at = index * width;
    if width == 2 {
        i32::from(i16::from_ne_bytes([buf[at], buf[at + 1]]))
    } else {
        i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }
}

/// Writes sample `index` into a buffer of `width`-byte samples.
///
/// 16-bit containers saturate.
#[inline]
pub fn write_sample(buf: &mut [u8], width: usize, index: usize, value: i32) {
    let at = index * width;
    if width == 2 {
        let v = value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        buf[at..at + 2].copy_from_slice(&v.to_ne_bytes());
    } else {
        buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Encodes `i16` samples as native-endian bytes.
pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

/// Decodes native-endian bytes as `i16` samples; a trailing odd byte is dropped.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_ne_bytes([c[0], c[1]]))
        .collect()
}

/// Encodes `i32` samples as native-endian bytes.
pub fn i32_to_bytes(samples: &[i32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

/// Decodes native-endian bytes as `i32` samples.
pub fn bytes_to_i32(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
