//! Request authentication: per-request HMAC signatures with replay
//! protection, and short-lived signed bearer tokens for the device and
//! app principal kinds.

pub mod device;
pub mod hmac;
pub mod replay;
pub mod token;

/// HMAC request headers (device → service).
pub const HEADER_SERIAL: &str = "x-device-serial";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_SIGNATURE: &str = "x-signature";
