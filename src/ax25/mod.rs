//! AX.25 link-layer codec (C2): frame encode/decode over the callsign
//! path (§4.1) with a CRC-16/X.25 frame check sequence.

mod fcs;
mod frame;

pub use fcs::{append as append_fcs, compute as compute_fcs, verify as verify_fcs};
pub use frame::{decode, encode, Frame, Modulo, SType, USubtype};
