//! Shared capture data types.

use std::time::Instant;

/// A single captured frame in interleaved RGB24 layout
/// (`width * height * 3` bytes, row-major).
#[derive(Clone)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw RGB24 pixel data.
    pub data: Vec<u8>,
    /// Monotonic timestamp taken when the frame was grabbed.
    pub captured_at: Instant,
}

impl Frame {
    /// Expected byte length for the frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// True when every pixel is black. A long run of blank frames is
    /// how revoked screen-recording permission manifests on some
    /// platforms: the grab succeeds but returns nothing.
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: Vec<u8>) -> Frame {
        Frame {
            width: 2,
            height: 1,
            data,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn blank_detection() {
        assert!(frame(vec![0; 6]).is_blank());
        assert!(!frame(vec![0, 0, 0, 0, 0, 1]).is_blank());
    }

    #[test]
    fn expected_len_matches_rgb24() {
        assert_eq!(frame(vec![0; 6]).expected_len(), 6);
    }
}
