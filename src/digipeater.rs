//! APRS UI digipeater (C9, §4.9): `WIDEn-N`/`TRACEn-N` and configured
//! alias expansion, confined to the interface a frame arrived on, with
//! queued retransmits that silently expire rather than going out stale.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::ax25::Frame;
use crate::callsign::{Callsign, Path};
use crate::interface::AX25Interface;
use crate::time;

fn wide_trace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(WIDE|TRACE)[1-9]$").expect("static digipeater regex is valid"))
}

fn is_wide_trace(base: &str) -> bool {
    wide_trace_regex().is_match(base)
}

/// Expands `WIDEn-N`/`TRACEn-N` and configured aliases in the path of
/// received UI frames, confined to the interface each frame arrived on.
pub struct APRSDigipeater {
    local_call: Callsign,
    aliases: Mutex<HashSet<String>>,
    digipeater_timeout: Duration,
}

impl APRSDigipeater {
    pub fn new(local_call: Callsign, digipeater_timeout: Duration) -> Arc<Self> {
        Arc::new(APRSDigipeater {
            local_call,
            aliases: Mutex::new(["WIDE", "RELAY", "GATE"].iter().map(|s| s.to_string()).collect()),
            digipeater_timeout,
        })
    }

    /// Adds exact-match alias bases (beyond the built-in `WIDE`/`RELAY`/
    /// `GATE`) that digipeat unconditionally regardless of SSID.
    pub fn add_aliases<I: IntoIterator<Item = String>>(&self, aliases: I) {
        self.aliases.lock().unwrap().extend(aliases);
    }

    /// Subscribes to `interface`'s received frames; any digipeat this
    /// produces is retransmitted back out the same interface.
    pub fn connect(self: &Arc<Self>, interface: Arc<AX25Interface>) {
        let this = self.clone();
        let tx_interface = interface.clone();
        interface.received_msg.connect(move |frame: &Frame| {
            this.on_received(&tx_interface, frame);
        });
    }

    fn on_received(&self, interface: &Arc<AX25Interface>, frame: &Frame) {
        let Frame::Ui { path, pf, pid, payload } = frame else {
            return;
        };
        if path.source == self.local_call || path.digipeaters.iter().any(|d| *d == self.local_call) {
            return;
        }
        let Some(slot) = path.digipeaters.iter().position(|d| !d.ch_bit()) else {
            return;
        };
        let entry = path.digipeaters[slot];

        let new_digis = {
            let aliases = self.aliases.lock().unwrap();
            if aliases.contains(entry.base()) {
                let mut digis = path.digipeaters.clone();
                digis[slot] = self.local_call.with_ch_bit(true);
                Some(digis)
            } else if is_wide_trace(entry.base()) {
                let n = entry.ssid();
                if n == 0 {
                    None
                } else {
                    let mut digis = path.digipeaters.clone();
                    // Unconditional H-bit at N=0, per the Open Questions
                    // resolution: the source only did this in some paths.
                    digis[slot] = Callsign::new(entry.base(), n - 1).with_ch_bit(n - 1 == 0);
                    digis.insert(slot, self.local_call.with_ch_bit(true));
                    Some(digis)
                }
            } else {
                None
            }
        };

        let Some(new_digis) = new_digis else {
            return;
        };
        let new_frame = Frame::Ui {
            path: Path::new(path.destination, path.source).with_digipeaters(new_digis),
            pf: *pf,
            pid: *pid,
            payload: payload.clone(),
        };
        self.enqueue(interface, new_frame);
    }

    /// Enqueues `frame` for retransmission, and arms a timer that cancels
    /// it if C5 hasn't sent it within `digipeater_timeout` — preventing a
    /// frame digipeated onto a busy medium from going out late and feeding
    /// a multi-digipeater "memory" loop.
    fn enqueue(&self, interface: &Arc<AX25Interface>, frame: Frame) {
        match interface.transmit(frame, None) {
            Ok(handle) => {
                time::schedule(self.digipeater_timeout, async move {
                    handle.cancel();
                });
            }
            Err(e) => log::warn!("digipeater: failed to enqueue retransmit: {e}"),
        }
    }
}
