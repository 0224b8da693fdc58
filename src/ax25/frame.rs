//! AX.25 frame codec (§4.2): bit-exact encode/decode of the header, path,
//! control field variants, PID, payload and FCS.

use crate::callsign::Path;
use crate::error::Error;
use bytes::Bytes;

use super::fcs;

/// Which control-field width is in effect for I/S frames. U-frames
/// (including UI) always use a single control octet regardless of this
/// setting; only connected-mode I/S frames extend to two octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modulo {
    #[default]
    Mod8,
    Mod128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SType {
    Rr,
    Rnr,
    Rej,
    Srej,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum USubtype {
    Sabm,
    Sabme,
    Disc,
    Dm,
    Ua,
    Frmr,
    Xid,
    Test,
}

/// A decoded AX.25 frame. Only [`Frame::Ui`] is acted on by the upper
/// layer (C5/C7); the other variants decode faithfully but are otherwise
/// opaque to this crate, per spec: "the codec must tolerate these but the
/// upper layer handles only UI frames."
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Ui {
        path: Path,
        pf: bool,
        pid: u8,
        payload: Bytes,
    },
    U {
        path: Path,
        subtype: USubtype,
        pf: bool,
    },
    S {
        path: Path,
        stype: SType,
        modulo: Modulo,
        nr: u8,
        pf: bool,
    },
    I {
        path: Path,
        modulo: Modulo,
        nr: u8,
        ns: u8,
        pf: bool,
        pid: u8,
        payload: Bytes,
    },
    /// Decoded but not one of the above (reserved/unrecognized U subtype).
    Unknown {
        path: Path,
        control: u8,
        pf: bool,
    },
}

impl Frame {
    pub fn path(&self) -> &Path {
        match self {
            Frame::Ui { path, .. }
            | Frame::U { path, .. }
            | Frame::S { path, .. }
            | Frame::I { path, .. }
            | Frame::Unknown { path, .. } => path,
        }
    }

    pub fn is_ui(&self) -> bool {
        matches!(self, Frame::Ui { .. })
    }
}

const UI_KEY: u8 = 0x03;
const SABM_KEY: u8 = 0x2F;
const SABME_KEY: u8 = 0x6F;
const DISC_KEY: u8 = 0x43;
const DM_KEY: u8 = 0x0F;
const UA_KEY: u8 = 0x63;
const FRMR_KEY: u8 = 0x87;
const XID_KEY: u8 = 0xAF;
const TEST_KEY: u8 = 0xE3;

fn u_subtype_from_key(key: u8) -> Option<USubtype> {
    Some(match key {
        SABM_KEY => USubtype::Sabm,
        SABME_KEY => USubtype::Sabme,
        DISC_KEY => USubtype::Disc,
        DM_KEY => USubtype::Dm,
        UA_KEY => USubtype::Ua,
        FRMR_KEY => USubtype::Frmr,
        XID_KEY => USubtype::Xid,
        TEST_KEY => USubtype::Test,
        _ => return None,
    })
}

fn u_subtype_key(subtype: USubtype) -> u8 {
    match subtype {
        USubtype::Sabm => SABM_KEY,
        USubtype::Sabme => SABME_KEY,
        USubtype::Disc => DISC_KEY,
        USubtype::Dm => DM_KEY,
        USubtype::Ua => UA_KEY,
        USubtype::Frmr => FRMR_KEY,
        USubtype::Xid => XID_KEY,
        USubtype::Test => TEST_KEY,
    }
}

fn stype_from_bits(bits: u8) -> SType {
    match bits & 0x03 {
        0b00 => SType::Rr,
        0b01 => SType::Rnr,
        0b10 => SType::Rej,
        _ => SType::Srej,
    }
}

fn stype_bits(stype: SType) -> u8 {
    match stype {
        SType::Rr => 0b00,
        SType::Rnr => 0b01,
        SType::Rej => 0b10,
        SType::Srej => 0b11,
    }
}

/// Decodes a full AX.25 frame including FCS verification.
///
/// `modulo` selects the control-field width to assume for I/S frames;
/// ignored for U-frames (including UI), which are always single-octet.
pub fn decode(bytes: &[u8], modulo: Modulo) -> Result<Frame, Error> {
    if bytes.len() < 2 {
        return Err(Error::Truncated {
            needed: 16,
            got: bytes.len(),
        });
    }
    let body = fcs::verify(bytes).map_err(|(expected, actual)| Error::BadFcs { expected, actual })?;

    let (path, mut offset) = Path::decode(body)?;
    if offset >= body.len() {
        return Err(Error::Truncated {
            needed: offset + 1,
            got: body.len(),
        });
    }
    let control = body[offset];
    offset += 1;

    if control & 0x01 == 0 {
        // I frame
        let (ns, nr, pf, consumed) = decode_i_control(body, offset, control, modulo)?;
        offset += consumed;
        if offset >= body.len() {
            return Err(Error::Truncated {
                needed: offset + 1,
                got: body.len(),
            });
        }
        let pid = body[offset];
        offset += 1;
        let payload = Bytes::copy_from_slice(&body[offset..]);
        return Ok(Frame::I {
            path,
            modulo,
            nr,
            ns,
            pf,
            pid,
            payload,
        });
    }

    if control & 0x03 == 0x01 {
        // S frame
        let (stype, nr, pf, consumed) = decode_s_control(body, offset, control, modulo)?;
        offset += consumed;
        return Ok(Frame::S {
            path,
            stype,
            modulo,
            nr,
            pf,
        });
    }

    // U frame family (low two bits == 11)
    let pf = control & 0x10 != 0;
    let key = control & !0x10;
    if key == UI_KEY {
        if offset >= body.len() {
            return Err(Error::Truncated {
                needed: offset + 1,
                got: body.len(),
            });
        }
        let pid = body[offset];
        offset += 1;
        let payload = Bytes::copy_from_slice(&body[offset..]);
        return Ok(Frame::Ui {
            path,
            pf,
            pid,
            payload,
        });
    }
    if let Some(subtype) = u_subtype_from_key(key) {
        return Ok(Frame::U { path, subtype, pf });
    }
    Ok(Frame::Unknown { path, control, pf })
}

fn decode_i_control(
    body: &[u8],
    offset: usize,
    first: u8,
    modulo: Modulo,
) -> Result<(u8, u8, bool, usize), Error> {
    match modulo {
        Modulo::Mod8 => {
            let ns = (first >> 1) & 0x07;
            let pf = first & 0x10 != 0;
            let nr = (first >> 5) & 0x07;
            Ok((ns, nr, pf, 0))
        }
        Modulo::Mod128 => {
            if offset >= body.len() {
                return Err(Error::Truncated {
                    needed: offset + 1,
                    got: body.len(),
                });
            }
            let second = body[offset];
            let ns = (first >> 1) & 0x7F;
            let pf = second & 0x01 != 0;
            let nr = (second >> 1) & 0x7F;
            Ok((ns, nr, pf, 1))
        }
    }
}

fn decode_s_control(
    body: &[u8],
    offset: usize,
    first: u8,
    modulo: Modulo,
) -> Result<(SType, u8, bool, usize), Error> {
    match modulo {
        Modulo::Mod8 => {
            let stype = stype_from_bits(first >> 2);
            let pf = first & 0x10 != 0;
            let nr = (first >> 5) & 0x07;
            Ok((stype, nr, pf, 0))
        }
        Modulo::Mod128 => {
            if offset >= body.len() {
                return Err(Error::Truncated {
                    needed: offset + 1,
                    got: body.len(),
                });
            }
            let second = body[offset];
            let stype = stype_from_bits(first >> 2);
            let pf = second & 0x01 != 0;
            let nr = (second >> 1) & 0x7F;
            Ok((stype, nr, pf, 1))
        }
    }
}

/// Encodes a frame, appending a freshly-computed FCS.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, Error> {
    let mut buf = frame.path().encode()?;
    match frame {
        Frame::Ui { pf, pid, payload, .. } => {
            buf.push(UI_KEY | if *pf { 0x10 } else { 0 });
            buf.push(*pid);
            buf.extend_from_slice(payload);
        }
        Frame::U { subtype, pf, .. } => {
            buf.push(u_subtype_key(*subtype) | if *pf { 0x10 } else { 0 });
        }
        Frame::S {
            stype,
            modulo,
            nr,
            pf,
            ..
        } => encode_s_control(&mut buf, *stype, *modulo, *nr, *pf),
        Frame::I {
            modulo,
            nr,
            ns,
            pf,
            pid,
            payload,
            ..
        } => {
            encode_i_control(&mut buf, *modulo, *nr, *ns, *pf);
            buf.push(*pid);
            buf.extend_from_slice(payload);
        }
        Frame::Unknown { control, pf, .. } => {
            buf.push((*control & !0x10) | if *pf { 0x10 } else { 0 });
        }
    }
    fcs::append(&mut buf);
    Ok(buf)
}

fn encode_s_control(buf: &mut Vec<u8>, stype: SType, modulo: Modulo, nr: u8, pf: bool) {
    match modulo {
        Modulo::Mod8 => {
            let first = 0b01 | (stype_bits(stype) << 2) | (if pf { 0x10 } else { 0 }) | (nr << 5);
            buf.push(first);
        }
        Modulo::Mod128 => {
            let first = 0b01 | (stype_bits(stype) << 2);
            let second = (nr << 1) | if pf { 0x01 } else { 0 };
            buf.push(first);
            buf.push(second);
        }
    }
}

fn encode_i_control(buf: &mut Vec<u8>, modulo: Modulo, nr: u8, ns: u8, pf: bool) {
    match modulo {
        Modulo::Mod8 => {
            let first = (ns << 1) | (if pf { 0x10 } else { 0 }) | (nr << 5);
            buf.push(first);
        }
        Modulo::Mod128 => {
            let first = ns << 1;
            let second = (nr << 1) | if pf { 0x01 } else { 0 };
            buf.push(first);
            buf.push(second);
        }
    }
}
