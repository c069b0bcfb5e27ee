//! Raw capture frames.

use bytes::Bytes;

/// One fixed-duration block of captured audio (16-bit PCM, interleaved).
///
/// Ephemeral: produced by the capture pump, consumed once by the VAD and
/// the active transport, then discarded.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw samples (i16 PCM, interleaved).
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Capture timestamp in ms since capture start.
    pub timestamp_ms: u64,
    /// Frame duration in ms (10-20ms).
    pub duration_ms: u64,
}

impl AudioFrame {
    /// Pack samples as little-endian bytes for the wire.
    pub fn to_wire_bytes(&self) -> Bytes {
        let pcm: Vec<u8> = self.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Bytes::from(pcm)
    }
}
