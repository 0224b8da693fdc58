//! SLIP-style KISS framing: the byte-at-a-time state machine described in
//! §4.3. `KissCodec::decode_byte` is fed one byte at a time (as bytes
//! arrive off the wire) and returns a frame once a closing delimiter is
//! seen; `encode` builds the delimited, escaped wire form of a frame.

use bytes::{Bytes, BytesMut};

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;
const RETURN_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KissCommand {
    Data,
    TxDelay,
    Persist,
    SlotTime,
    TxTail,
    FullDuplex,
    SetHardware,
    Return,
    Unknown(u8),
}

impl KissCommand {
    fn from_nibble(nibble: u8) -> Self {
        match nibble {
            0x0 => KissCommand::Data,
            0x1 => KissCommand::TxDelay,
            0x2 => KissCommand::Persist,
            0x3 => KissCommand::SlotTime,
            0x4 => KissCommand::TxTail,
            0x5 => KissCommand::FullDuplex,
            0x6 => KissCommand::SetHardware,
            other => KissCommand::Unknown(other),
        }
    }

    fn to_nibble(self) -> u8 {
        match self {
            KissCommand::Data => 0x0,
            KissCommand::TxDelay => 0x1,
            KissCommand::Persist => 0x2,
            KissCommand::SlotTime => 0x3,
            KissCommand::TxTail => 0x4,
            KissCommand::FullDuplex => 0x5,
            KissCommand::SetHardware => 0x6,
            KissCommand::Return => 0xF,
            KissCommand::Unknown(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KissFrame {
    pub port: u8,
    pub command: KissCommand,
    pub data: Bytes,
}

impl KissFrame {
    pub fn data(port: u8, data: impl Into<Bytes>) -> Self {
        KissFrame {
            port,
            command: KissCommand::Data,
            data: data.into(),
        }
    }

    fn header_byte(&self) -> u8 {
        if self.command == KissCommand::Return {
            RETURN_BYTE
        } else {
            (self.port << 4) | self.command.to_nibble()
        }
    }
}

/// Encodes a single KISS frame to its delimited, escaped wire form.
pub fn encode(frame: &KissFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.data.len() + 4);
    out.push(FEND);
    push_escaped(&mut out, frame.header_byte());
    for &b in frame.data.as_ref() {
        push_escaped(&mut out, b);
    }
    out.push(FEND);
    out
}

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    match byte {
        FEND => {
            out.push(FESC);
            out.push(TFEND);
        }
        FESC => {
            out.push(FESC);
            out.push(TFESC);
        }
        other => out.push(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InFrame,
    Escape,
}

/// Byte-at-a-time KISS decoder. Unknown escape sequences and truncated
/// escapes drop the in-progress frame and resynchronize on the next
/// delimiter; empty frames (back-to-back delimiters) are silently
/// swallowed.
#[derive(Debug)]
pub struct KissCodec {
    buf: BytesMut,
    state: State,
}

impl Default for KissCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl KissCodec {
    pub fn new() -> Self {
        KissCodec {
            buf: BytesMut::with_capacity(1024),
            state: State::Idle,
        }
    }

    /// Feeds one byte into the decoder. Returns a decoded frame when a
    /// closing `FEND` completes a non-empty frame.
    pub fn decode_byte(&mut self, byte: u8) -> Option<KissFrame> {
        if self.state == State::Escape {
            self.state = State::InFrame;
            match byte {
                TFEND => self.buf.extend_from_slice(&[FEND]),
                TFESC => self.buf.extend_from_slice(&[FESC]),
                other => {
                    log::warn!("kiss: unrecognized escape sequence 0x{other:02x}, dropping frame");
                    self.buf.clear();
                    self.state = State::Idle;
                }
            }
            return None;
        }

        match byte {
            FEND => {
                if self.state == State::InFrame && !self.buf.is_empty() {
                    let bytes = self.buf.split().freeze();
                    self.state = State::Idle;
                    Self::parse(&bytes)
                } else {
                    self.state = State::InFrame;
                    self.buf.clear();
                    None
                }
            }
            FESC => {
                if self.state == State::InFrame {
                    self.state = State::Escape;
                }
                None
            }
            other => {
                if self.state == State::InFrame {
                    self.buf.extend_from_slice(&[other]);
                }
                None
            }
        }
    }

    fn parse(bytes: &Bytes) -> Option<KissFrame> {
        if bytes.is_empty() {
            return None;
        }
        let header = bytes[0];
        if header == RETURN_BYTE {
            return Some(KissFrame {
                port: 0,
                command: KissCommand::Return,
                data: Bytes::new(),
            });
        }
        let port = header >> 4;
        let command = KissCommand::from_nibble(header & 0x0F);
        Some(KissFrame {
            port,
            command,
            data: bytes.slice(1..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut KissCodec, bytes: &[u8]) -> Vec<KissFrame> {
        bytes.iter().filter_map(|&b| codec.decode_byte(b)).collect()
    }

    #[test]
    fn s3_escape_round_trip() {
        let frame = KissFrame::data(2, Bytes::from_static(&[0xC0, 0xDB, 0x00]));
        let wire = encode(&frame);
        assert_eq!(wire, vec![0xC0, 0x20, 0xDB, 0xDC, 0xDB, 0xDD, 0x00, 0xC0]);

        let mut codec = KissCodec::new();
        let decoded = decode_all(&mut codec, &wire);
        assert_eq!(decoded, vec![frame]);
    }

    #[test]
    fn back_to_back_delimiters_yield_no_empty_frames() {
        let mut codec = KissCodec::new();
        let decoded = decode_all(&mut codec, &[0xC0, 0xC0, 0xC0, 0x00, 0x41, 0xC0]);
        assert_eq!(decoded, vec![KissFrame::data(0, Bytes::from_static(b"A"))]);
    }

    #[test]
    fn unknown_escape_drops_frame_and_resyncs() {
        let mut codec = KissCodec::new();
        let mut decoded = decode_all(&mut codec, &[0xC0, 0x00, 0xDB, 0xFF, 0xC0]);
        assert!(decoded.is_empty());
        decoded.extend(decode_all(&mut codec, &[0xC0, 0x00, 0x41, 0xC0]));
        assert_eq!(decoded, vec![KissFrame::data(0, Bytes::from_static(b"A"))]);
    }

    #[test]
    fn multi_port_dispatch() {
        let frame = KissFrame::data(15, Bytes::from_static(b"hi"));
        let wire = encode(&frame);
        assert_eq!(wire[1], 0xF0);
        let mut codec = KissCodec::new();
        assert_eq!(decode_all(&mut codec, &wire), vec![frame]);
    }

    #[test]
    fn return_command_round_trips() {
        let frame = KissFrame {
            port: 0,
            command: KissCommand::Return,
            data: Bytes::new(),
        };
        let wire = encode(&frame);
        assert_eq!(wire, vec![0xC0, 0xFF, 0xC0]);
        let mut codec = KissCodec::new();
        assert_eq!(decode_all(&mut codec, &wire), vec![frame]);
    }

    #[test]
    fn tnc_init_command_nibbles_round_trip() {
        for (cmd, nibble) in [
            (KissCommand::TxDelay, 0x1),
            (KissCommand::Persist, 0x2),
            (KissCommand::SlotTime, 0x3),
            (KissCommand::TxTail, 0x4),
            (KissCommand::FullDuplex, 0x5),
            (KissCommand::SetHardware, 0x6),
        ] {
            let frame = KissFrame {
                port: 3,
                command: cmd,
                data: Bytes::from_static(&[0x0A]),
            };
            let wire = encode(&frame);
            assert_eq!(wire[1], (3 << 4) | nibble);
            let mut codec = KissCodec::new();
            assert_eq!(decode_all(&mut codec, &wire), vec![frame]);
        }
    }
}
