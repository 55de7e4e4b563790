//! JSON codec for the wire envelope
//!
//! The transport is message-oriented, so a frame is exactly one JSON
//! envelope. `decode` never panics; a malformed frame yields a typed error
//! that the connection layer logs and drops without tearing down the link.

use crate::envelope::Envelope;

/// Maximum frame size (16 MB)
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Encode an envelope into a JSON text frame
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(text)
}

/// Decode a JSON text frame into an envelope
pub fn decode(frame: &str) -> Result<Envelope, CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(frame)?)
}
