//! JSON text codec for frames crossing a transport

use crate::{Frame, Kind, ProtocolError};

/// Maximum encoded frame size (16KB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

/// Frame codec for socket and pub/sub payloads
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with a custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame to sparse JSON text
    pub fn encode(&self, frame: &Frame) -> Result<String, ProtocolError> {
        if frame.kind() == Kind::Timer {
            return Err(ProtocolError::TimerFrame);
        }
        let text = frame.as_json();
        self.check_size(text.len())?;
        Ok(text)
    }

    /// Decode a frame from JSON text
    pub fn decode(&self, text: &str) -> Result<Frame, ProtocolError> {
        self.check_size(text.len())?;
        Frame::from_json(text)
    }

    /// Decode a frame from raw bytes, which must be UTF-8 JSON
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Frame, ProtocolError> {
        self.check_size(bytes.len())?;
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ProtocolError::InvalidFrame(format!("not utf-8: {}", e)))?;
        Frame::from_json(text)
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}
