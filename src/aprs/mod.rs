//! APRS payload codec (C6): data-type recognition, message/ACK/REJ
//! parsing, and the MIC-E position decoder.

pub mod message;
pub mod mic_e;
mod packet;

pub use message::{
    encode_ack_or_reject, encode_message, parse_ack_or_reject, parse_message, AckOrReject,
    MessageFrame, ReplyAck,
};
pub use packet::{AprsFrame, DataType};
