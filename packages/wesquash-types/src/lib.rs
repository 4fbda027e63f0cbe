//! # wesquash-types
//!
//! Shared wire and rotation types for the WeSquash motion stream.
//!
//! These types are used by:
//! - `backend-rust`: decoding controller packets and driving the orientation pipeline
//! - `packages/controller`: encoding sensor samples and running the transports
//!
//! ## Coordinate Conventions
//!
//! - **Device frame**: right-hand, Z = up (what the handheld sensor reports)
//! - **Consumer frame**: right-hand, Y = up (what the renderer expects)
//!
//! ## Ports
//!
//! | Port | Proto | Use |
//! |------|-------|-----|
//! | 9079 | UDP broadcast | discovery beacon |
//! | 9080 | WebSocket | reliable fallback |
//! | 9081 | UDP | primary sensor stream |

pub mod codec;
pub mod discovery;
pub mod messages;
pub mod orientation;
pub mod quat;

pub use codec::{CodecError, Command, Packet, SensorPacket};
pub use discovery::Announcement;
pub use messages::{MessageError, SensorMessage, WsMessage};
pub use orientation::{OrientationSource, RawSample};
pub use quat::{Quat, Vec3};

pub const DISCOVERY_PORT: u16 = 9079;
pub const WS_PORT: u16 = 9080;
pub const UDP_PORT: u16 = 9081;

/// WebSocket sub-protocol negotiated by the fallback transport.
pub const WS_SUBPROTOCOL: &str = "wesquash";
