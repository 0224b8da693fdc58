//! KISS transport (C3): SLIP-style framing between host and TNC, and a
//! port multiplexer that owns the shared byte stream.

mod codec;
mod device;

pub use codec::{encode, KissCodec, KissCommand, KissFrame};
pub use device::{InitParam, KissDevice, KissDeviceConfig, KissPort, MAX_PORTS};
