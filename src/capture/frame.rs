use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Published frame with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Arrival timestamp on the producer side
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata, timestamp: Instant) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp,
        }
    }

    /// Bytes in one frame of the given geometry
    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats the encoder accepts on stdin.
///
/// Fixed for a session; the encoder learns it from its argument vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Name passed to `-pix_fmt`
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
        }
    }
}

/// Image as delivered by the data source's sensor callback
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Strictly increasing; gaps mean frames were dropped upstream
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub raw_data: Bytes,
}
