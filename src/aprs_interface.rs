//! APRS send/receive orchestration (C7, §4.7): message-id allocation, the
//! deduplication cache, and dispatch of inbound APRS traffic to bindings
//! registered on the message addressee (as distinct from C4's Router,
//! which binds on the AX.25 destination).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;

use crate::aprs::{
    encode_ack_or_reject, encode_message, parse_ack_or_reject, parse_message, AckOrReject,
    AprsFrame, DataType, MessageFrame, ReplyAck,
};
use crate::ax25::Frame;
use crate::callsign::{Callsign, Path};
use crate::dedup::DedupCache;
use crate::error::Error;
use crate::interface::AX25Interface;
use crate::message_handler::{APRSMessageHandler, RetryConfig};
use crate::router::{BindingId, Router};
use crate::time::SharedRandom;

#[derive(Debug, Clone)]
pub struct APRSInterfaceConfig {
    /// This station's own callsign, used as the source of every outbound
    /// APRS frame.
    pub local_call: Callsign,
    pub aprs_destination: String,
    pub aprs_path: Vec<Callsign>,
    pub listen_destinations: Vec<String>,
    pub listen_altnets: Vec<String>,
    pub msgid_modulo: u32,
    pub deduplication_expiry: Duration,
}

impl Default for APRSInterfaceConfig {
    fn default() -> Self {
        APRSInterfaceConfig {
            local_call: Callsign::new("N0CALL", 0),
            aprs_destination: "APRS".to_string(),
            aprs_path: Vec::new(),
            listen_destinations: Vec::new(),
            listen_altnets: Vec::new(),
            msgid_modulo: 1000,
            deduplication_expiry: Duration::from_secs(28),
        }
    }
}

/// Wraps an [`AX25Interface`], adding the APRS message-id/dedup/handler
/// bookkeeping described in §4.7.
pub struct APRSInterface {
    interface: Arc<AX25Interface>,
    router: Arc<Router>,
    random: SharedRandom,
    local_call: Callsign,
    aprs_destination: String,
    aprs_path: Vec<Callsign>,
    aprs_destinations: Vec<String>,
    altnets: Vec<Regex>,
    msgid_modulo: u32,
    retry_config: RetryConfig,
    msgid_counter: Mutex<u32>,
    dedup: Mutex<DedupCache>,
    handlers: Mutex<HashMap<(Callsign, u32), Arc<APRSMessageHandler>>>,
}

impl APRSInterface {
    pub fn new(
        interface: Arc<AX25Interface>,
        random: SharedRandom,
        config: APRSInterfaceConfig,
        retry_config: RetryConfig,
    ) -> Result<Arc<Self>, Error> {
        let altnets = config
            .listen_altnets
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::MalformedAprsPayload(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let mut aprs_destinations = vec![config.aprs_destination.clone()];
        aprs_destinations.extend(config.listen_destinations.iter().cloned());

        let aprs = Arc::new(APRSInterface {
            interface: interface.clone(),
            router: Arc::new(Router::new()),
            random,
            local_call: config.local_call,
            aprs_destination: config.aprs_destination,
            aprs_path: config.aprs_path,
            aprs_destinations,
            altnets,
            msgid_modulo: config.msgid_modulo.max(2),
            retry_config,
            msgid_counter: Mutex::new(0),
            dedup: Mutex::new(DedupCache::new(config.deduplication_expiry)),
            handlers: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&aprs);
        interface.received_msg.connect(move |frame: &Frame| {
            if let Some(aprs) = weak.upgrade() {
                aprs.on_received(frame);
            }
        });
        let weak_closed = Arc::downgrade(&aprs);
        interface.closed.connect(move |_| {
            if let Some(aprs) = weak_closed.upgrade() {
                aprs.on_device_closed();
            }
        });
        Ok(aprs)
    }

    pub fn bind_exact<F>(&self, base: &str, ssid: Option<u8>, callback: F) -> BindingId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.router.bind_exact(base, ssid, callback)
    }

    pub fn bind_regex<F>(&self, pattern: &str, ssid: Option<u8>, callback: F) -> Result<BindingId, Error>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.router.bind_regex(pattern, ssid, callback)
    }

    pub fn unbind(&self, id: BindingId) {
        self.router.unbind(id);
    }

    /// Builds and sends an APRS message. If `oneshot`, transmits once with
    /// no msgid and returns `None`; otherwise allocates a msgid, registers
    /// a retry handler, starts it, and returns it.
    pub fn send_message(
        self: &Arc<Self>,
        addressee: &str,
        text: &str,
        path: Option<Vec<Callsign>>,
        oneshot: bool,
        replyack: ReplyAck,
    ) -> Result<Option<Arc<APRSMessageHandler>>, Error> {
        let addressee_call = Callsign::parse(addressee)?;
        let digis = path.unwrap_or_else(|| self.aprs_path.clone());
        let msgid = if oneshot { None } else { Some(self.allocate_msgid()?) };

        let frame = self.build_message_frame(
            addressee_call.base(),
            text,
            msgid.map(|m| m.to_string()),
            replyack,
            digis,
        )?;

        if oneshot {
            self.interface.transmit(frame, None)?;
            return Ok(None);
        }

        let msgid = msgid.expect("non-oneshot always allocates a msgid");
        let handler = APRSMessageHandler::new(
            frame,
            self.interface.clone(),
            self.random.clone(),
            self.retry_config,
        );
        self.handlers
            .lock()
            .unwrap()
            .insert((addressee_call, msgid), handler.clone());
        let weak = Arc::downgrade(self);
        handler.done.connect(move |_| {
            if let Some(this) = weak.upgrade() {
                this.handlers.lock().unwrap().remove(&(addressee_call, msgid));
            }
        });
        handler.start();
        Ok(Some(handler))
    }

    /// Emits `ack<msgid>` or `rej<msgid>` for `received`, addressed back to
    /// `sender`, using `aprs_path`. Errors if `received` carried no msgid
    /// (nothing to acknowledge).
    pub fn send_response(self: &Arc<Self>, received: &MessageFrame, sender: &Callsign, ack: bool) -> Result<(), Error> {
        let msgid = received.msgid.clone().ok_or_else(|| {
            Error::MalformedAprsPayload("cannot respond to a message with no msgid".to_string())
        })?;
        let value = if ack {
            AckOrReject::Ack { msgid, ackid: None }
        } else {
            AckOrReject::Reject { msgid, ackid: None }
        };
        let frame = self.build_message_frame(
            sender.base(),
            &encode_ack_or_reject(&value),
            None,
            ReplyAck::None,
            self.aprs_path.clone(),
        )?;
        self.interface.transmit(frame, None)?;
        Ok(())
    }

    fn build_message_frame(
        &self,
        addressee_base: &str,
        text: &str,
        msgid: Option<String>,
        replyack: ReplyAck,
        digipeaters: Vec<Callsign>,
    ) -> Result<Frame, Error> {
        let payload = encode_message(&MessageFrame {
            addressee: addressee_base.to_string(),
            text: text.to_string(),
            msgid,
            replyack,
        });
        Ok(Frame::Ui {
            path: Path::new(Callsign::parse(&self.aprs_destination)?, self.local_call)
                .with_digipeaters(digipeaters),
            pf: false,
            pid: 0xF0,
            payload: Bytes::from(payload.into_bytes()),
        })
    }

    /// Allocates the next msgid in `[1, msgid_modulo)`, skipping values
    /// currently held by a live handler. Per the Open Questions resolution,
    /// reuse while a handler is outstanding is forbidden; exhausting the
    /// space surfaces `QueueFull` rather than blocking.
    fn allocate_msgid(&self) -> Result<u32, Error> {
        let mut counter = self.msgid_counter.lock().unwrap();
        let in_use: std::collections::HashSet<u32> =
            self.handlers.lock().unwrap().keys().map(|(_, id)| *id).collect();
        for _ in 1..self.msgid_modulo {
            *counter = if *counter + 1 >= self.msgid_modulo { 1 } else { *counter + 1 };
            if !in_use.contains(&*counter) {
                return Ok(*counter);
            }
        }
        Err(Error::QueueFull)
    }

    fn on_received(self: &Arc<Self>, frame: &Frame) {
        let Frame::Ui { path, payload, .. } = frame else {
            return;
        };
        let dest_base = path.destination.base();
        let aprs_frame = AprsFrame::recognize(frame, &self.aprs_destinations).or_else(|| {
            self.altnets.iter().any(|re| re.is_match(dest_base)).then(|| AprsFrame {
                path: path.clone(),
                data_type: DataType::from_first_byte(payload.first().copied()),
                payload: payload.clone(),
            })
        });
        let Some(aprs_frame) = aprs_frame else {
            return;
        };

        if self.dedup.lock().unwrap().is_duplicate(&path.source, &path.destination, payload) {
            return;
        }

        if aprs_frame.data_type != DataType::Message {
            return;
        }
        let Ok(msg) = parse_message(&aprs_frame.text()) else {
            return;
        };

        if let Some(ack_or_rej) = parse_ack_or_reject(&msg.text) {
            self.deliver_ack_or_reject(&path.source, ack_or_rej);
            return;
        }

        self.dispatch_to_router(path, &msg, payload);
    }

    /// Fails every outstanding message handler with [`HandlerState::Cancel`]
    /// when the underlying interface's device closes (§7). Each handler's
    /// own `done` callback deregisters it, so the map drains itself.
    fn on_device_closed(&self) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler.cancel();
        }
    }

    fn deliver_ack_or_reject(&self, source: &Callsign, value: AckOrReject) {
        let (msgid_str, is_ack) = match &value {
            AckOrReject::Ack { msgid, .. } => (msgid, true),
            AckOrReject::Reject { msgid, .. } => (msgid, false),
        };
        let Ok(msgid) = msgid_str.parse::<u32>() else {
            return;
        };
        let handler = self.handlers.lock().unwrap().get(&(*source, msgid)).cloned();
        if let Some(handler) = handler {
            if is_ack {
                handler.on_ack();
            } else {
                handler.on_reject();
            }
        }
    }

    /// Dispatches a confirmable message through the addressee-keyed
    /// router: bindings match the AX.25-destination field of a synthetic
    /// frame built from the parsed addressee, not the real wire
    /// destination (which is always the APRS alias, e.g. `APRS`).
    fn dispatch_to_router(&self, path: &Path, msg: &MessageFrame, raw_payload: &Bytes) {
        let Ok(addressee_call) = Callsign::parse(msg.addressee.trim()) else {
            return;
        };
        let synthetic = Frame::Ui {
            path: Path::new(addressee_call, path.source).with_digipeaters(path.digipeaters.clone()),
            pf: false,
            pid: 0xF0,
            payload: raw_payload.clone(),
        };
        self.router.dispatch(&synthetic);
    }
}
