//! # Tunnel Wire Protocol
//!
//! Shared types for the reverse HTTP tunnel: the framed message exchanged
//! between relay and agent ([`frame`]), the kind-dependent payload shapes
//! carried inside a frame ([`payload`]), and the prefix-based routing table
//! used to pick a local target for a request ([`mapping`]).
//!
//! Both `relay` and `agent` depend on this crate so the wire format is
//! defined exactly once instead of being hand-duplicated on each side.

pub mod frame;
pub mod mapping;
pub mod payload;

pub use frame::{CodecError, Frame, FrameCodec, FrameKind};
pub use mapping::Mapping;
pub use payload::{
    ErrorFramePayload, RegisterConfirmPayload, RegisterRequestPayload, RequestFramePayload,
    ResponseFramePayload,
};

/// Default maximum size, in bytes, of a single encoded frame (§4.1).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;
