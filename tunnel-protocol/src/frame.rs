//! Frame envelope and the size-bounded codec that (de)serializes it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_MAX_FRAME_SIZE;

/// The kind of a [`Frame`], carried on the wire as the `type` field.
///
/// `Unknown` absorbs any tag this build doesn't recognize so that a
/// forward-compatible addition to the protocol doesn't fail the whole
/// decode — the codec logs and discards frames of unknown kind instead of
/// closing the link over them (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Register,
    Request,
    Response,
    Error,
    Heartbeat,
    Pong,
    #[serde(other)]
    Unknown,
}

/// A single message on the tunnel link (§3, §6).
///
/// `payload` is left as an untyped [`serde_json::Value`] at this layer —
/// its shape depends on `kind` and is validated by the handler for that
/// kind, not by the codec (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub timestamp: i64,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Frame {
    /// Builds a frame with the given `kind`, timestamped `now`.
    pub fn new(id: impl Into<String>, kind: FrameKind, now_millis: i64) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp: now_millis,
            agent_id: None,
            payload: None,
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Serialize) -> Result<Self, CodecError> {
        self.payload = Some(serde_json::to_value(payload).map_err(CodecError::Encode)?);
        Ok(self)
    }

    /// Deserializes `payload` into `T`, failing if the frame carries none.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CodecError> {
        let value = self.payload.clone().ok_or(CodecError::MissingPayload)?;
        serde_json::from_value(value).map_err(CodecError::Encode)
    }
}

/// Errors raised while encoding or decoding a [`Frame`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame exceeds maximum size of {limit} bytes (was {actual})")]
    FrameTooLarge { limit: usize, actual: usize },
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame payload error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame carries no payload")]
    MissingPayload,
}

/// Encodes/decodes frames while enforcing a maximum wire size.
///
/// A frame at exactly `max_frame_size` bytes is accepted; one byte larger
/// is rejected (§8 boundary behavior), at which point the caller is
/// expected to close the link (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Serializes `frame` to its wire text, rejecting it if too large.
    pub fn encode(&self, frame: &Frame) -> Result<String, CodecError> {
        let text = serde_json::to_string(frame).map_err(CodecError::Encode)?;
        self.check_size(text.len())?;
        Ok(text)
    }

    /// Parses wire text into a [`Frame`], rejecting it if too large.
    pub fn decode(&self, text: &str) -> Result<Frame, CodecError> {
        self.check_size(text.len())?;
        serde_json::from_str(text).map_err(CodecError::Malformed)
    }

    fn check_size(&self, actual: usize) -> Result<(), CodecError> {
        if actual > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                limit: self.max_frame_size,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ErrorFramePayload;

    fn sample_frame() -> Frame {
        Frame::new("req-1", FrameKind::Error, 0)
            .with_payload(ErrorFramePayload {
                message: "boom".into(),
                code: Some("X".into()),
            })
            .unwrap()
    }

    #[test]
    fn round_trips_known_kind() {
        let codec = FrameCodec::default();
        let frame = sample_frame();
        let text = codec.encode(&frame).unwrap();
        let decoded = codec.decode(&text).unwrap();
        assert_eq!(decoded.kind, FrameKind::Error);
        assert_eq!(decoded.id, "req-1");
    }

    #[test]
    fn unknown_kind_does_not_fail_decode() {
        let codec = FrameCodec::default();
        let text = r#"{"id":"x","type":"future_kind","timestamp":0}"#;
        let decoded = codec.decode(text).unwrap();
        assert_eq!(decoded.kind, FrameKind::Unknown);
    }

    #[test]
    fn accepts_frame_at_exactly_the_limit() {
        let text = codec_text_of_len(40);
        let codec = FrameCodec::new(text.len());
        assert!(codec.decode(&text).is_ok());
    }

    #[test]
    fn rejects_frame_one_byte_over_the_limit() {
        let text = codec_text_of_len(40);
        let codec = FrameCodec::new(text.len() - 1);
        assert!(matches!(
            codec.decode(&text),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    fn codec_text_of_len(min_len: usize) -> String {
        let codec = FrameCodec::default();
        let mut text = codec.encode(&sample_frame()).unwrap();
        while text.len() < min_len {
            text.push(' ');
        }
        text
    }

    #[test]
    fn missing_payload_is_an_error() {
        let frame = Frame::new("id", FrameKind::Heartbeat, 0);
        let result = frame.payload_as::<ErrorFramePayload>();
        assert!(matches!(result, Err(CodecError::MissingPayload)));
    }
}
