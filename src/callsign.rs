//! AX.25 callsign and path addressing (§4.1 of the specification).

use crate::error::Error;
use std::fmt;

/// An AX.25 station address: a 1-6 character base callsign, an SSID in
/// `0..=15`, and the command/has-been-digipeated bit.
///
/// Equality and hashing only consider `base` and `ssid` — the C/H bit and
/// the two reserved bits are not significant for routing, per spec.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Callsign {
    base: [u8; 6],
    base_len: u8,
    ssid: u8,
    /// Command bit on the wire; for a path entry this doubles as the
    /// "has-been-digipeated" (`*`) flag once the frame has been relayed.
    ch_bit: bool,
}

/// Maximum number of digipeater slots in a path, per spec (§3 invariants,
/// the Open Questions note the source is inconsistent; this spec fixes it
/// at 8).
pub const MAX_DIGIPEATERS: usize = 8;

impl Callsign {
    /// Builds a callsign from an already-validated base string and SSID.
    /// Panics if `base` is empty, longer than 6 characters, not uppercase
    /// alphanumeric, or `ssid > 15` — use [`Callsign::parse`] for
    /// untrusted input.
    pub fn new(base: &str, ssid: u8) -> Self {
        Self::try_new(base, ssid).expect("invalid callsign literal")
    }

    pub fn try_new(base: &str, ssid: u8) -> Result<Self, Error> {
        if base.is_empty() || base.len() > 6 {
            return Err(Error::MalformedCallsign(base.to_string()));
        }
        if ssid > 15 {
            return Err(Error::MalformedCallsign(format!("{base}-{ssid}")));
        }
        let upper = base.to_ascii_uppercase();
        if !upper.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::MalformedCallsign(base.to_string()));
        }
        let mut packed = [b' '; 6];
        for (i, b) in upper.bytes().enumerate() {
            packed[i] = b;
        }
        Ok(Callsign {
            base: packed,
            base_len: upper.len() as u8,
            ssid,
            ch_bit: false,
        })
    }

    /// Parses `BASE[-SSID][*]`. The trailing `*` marks the callsign as
    /// having already been digipeated (sets the C/H bit).
    pub fn parse(input: &str) -> Result<Self, Error> {
        let (input, digipeated) = match input.strip_suffix('*') {
            Some(rest) => (rest, true),
            None => (input, false),
        };
        let mut parts = input.splitn(2, '-');
        let base = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
            Error::MalformedCallsign(format!("{input}{}", if digipeated { "*" } else { "" }))
        })?;
        let ssid = match parts.next() {
            Some(s) => s
                .parse::<u8>()
                .map_err(|_| Error::MalformedCallsign(input.to_string()))?,
            None => 0,
        };
        let mut call = Callsign::try_new(base, ssid)?;
        call.ch_bit = digipeated;
        Ok(call)
    }

    pub fn base(&self) -> &str {
        std::str::from_utf8(&self.base[..self.base_len as usize]).unwrap()
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Whether the command/has-been-digipeated bit is set.
    pub fn ch_bit(&self) -> bool {
        self.ch_bit
    }

    pub fn set_ch_bit(&mut self, value: bool) {
        self.ch_bit = value;
    }

    pub fn with_ch_bit(mut self, value: bool) -> Self {
        self.ch_bit = value;
        self
    }

    /// Encodes the 7-octet wire form. `last` marks this as the final
    /// address in the path (sets the low bit).
    pub fn to_wire(self, last: bool) -> [u8; 7] {
        let mut addr = [0x40u8; 7]; // ' ' << 1
        for i in 0..self.base_len as usize {
            addr[i] = self.base[i] << 1;
        }
        let mut ssid_octet: u8 = 0b0110_0000; // reserved bits default set
        if self.ch_bit {
            ssid_octet |= 0x80;
        }
        ssid_octet |= self.ssid << 1;
        if last {
            ssid_octet |= 0x01;
        }
        addr[6] = ssid_octet;
        addr
    }

    /// Decodes a 7-octet wire address. Returns the callsign and whether
    /// the low (last-address) bit was set.
    pub fn from_wire(bytes: &[u8; 7]) -> Result<(Self, bool), Error> {
        let mut base = [b' '; 6];
        for i in 0..6 {
            base[i] = bytes[i] >> 1;
        }
        let mut len = 6;
        while len > 0 && base[len - 1] == b' ' {
            len -= 1;
        }
        if len == 0 {
            return Err(Error::MalformedCallsign("<empty>".to_string()));
        }
        if !base[..len].iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::MalformedCallsign(
                String::from_utf8_lossy(&base[..len]).to_string(),
            ));
        }
        let ssid_octet = bytes[6];
        let ssid = (ssid_octet >> 1) & 0x0F;
        let ch_bit = ssid_octet & 0x80 != 0;
        let last = ssid_octet & 0x01 != 0;
        Ok((
            Callsign {
                base,
                base_len: len as u8,
                ssid,
                ch_bit,
            },
            last,
        ))
    }
}

impl PartialEq for Callsign {
    fn eq(&self, other: &Self) -> bool {
        self.base() == other.base() && self.ssid == other.ssid
    }
}

impl std::hash::Hash for Callsign {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.base().hash(state);
        self.ssid.hash(state);
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.base())?;
        } else {
            write!(f, "{}-{}", self.base(), self.ssid)?;
        }
        if self.ch_bit {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// An ordered AX.25 address field: destination, source, then 0-8
/// digipeaters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub destination: Callsign,
    pub source: Callsign,
    pub digipeaters: Vec<Callsign>,
}

impl Path {
    pub fn new(destination: Callsign, source: Callsign) -> Self {
        Path {
            destination,
            source,
            digipeaters: Vec::new(),
        }
    }

    pub fn with_digipeaters(mut self, digipeaters: Vec<Callsign>) -> Self {
        self.digipeaters = digipeaters;
        self
    }

    /// Total number of address entries (destination + source + digis).
    pub fn len(&self) -> usize {
        2 + self.digipeaters.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        if self.digipeaters.len() > MAX_DIGIPEATERS {
            return Err(Error::MalformedPath(format!(
                "{} digipeaters exceeds maximum of {MAX_DIGIPEATERS}",
                self.digipeaters.len()
            )));
        }
        let mut out = Vec::with_capacity(self.len() * 7);
        out.extend_from_slice(&self.destination.to_wire(false));
        let source_is_last = self.digipeaters.is_empty();
        out.extend_from_slice(&self.source.to_wire(source_is_last));
        for (i, digi) in self.digipeaters.iter().enumerate() {
            let last = i == self.digipeaters.len() - 1;
            out.extend_from_slice(&digi.to_wire(last));
        }
        Ok(out)
    }

    /// Decodes a path from the front of `bytes`, returning the path and the
    /// number of bytes consumed. Stops at the first low-bit-set octet, or
    /// fails with `MalformedPath` if 10 addresses (destination + source +
    /// 8 digipeaters) are consumed without seeing the terminator.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), Error> {
        const MAX_ADDRESSES: usize = 2 + MAX_DIGIPEATERS;
        let mut addresses = Vec::new();
        let mut offset = 0;
        loop {
            if addresses.len() >= MAX_ADDRESSES {
                return Err(Error::MalformedPath(
                    "path exceeds 10 addresses without a terminator".to_string(),
                ));
            }
            if offset + 7 > bytes.len() {
                return Err(Error::MalformedPath("truncated address field".to_string()));
            }
            let mut chunk = [0u8; 7];
            chunk.copy_from_slice(&bytes[offset..offset + 7]);
            let (call, last) = Callsign::from_wire(&chunk)?;
            offset += 7;
            addresses.push(call);
            if last {
                break;
            }
        }
        if addresses.len() < 2 {
            return Err(Error::MalformedPath(
                "path must contain at least destination and source".to_string(),
            ));
        }
        let destination = addresses.remove(0);
        let source = addresses.remove(0);
        Ok((
            Path {
                destination,
                source,
                digipeaters: addresses,
            },
            offset,
        ))
    }
}
