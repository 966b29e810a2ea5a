//! # Zentropi Protocol
//!
//! Frame model, kinds and the JSON wire codec shared by every Zentropi agent
//! and transport.

#![warn(missing_docs)]

/// Frame structure and serialization
pub mod frame;

/// JSON codec for transports
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::WireCodec;
pub use error::ProtocolError;
pub use frame::{truncate_name, validate_name, Frame, FrameBuilder, Kind, Meta};
