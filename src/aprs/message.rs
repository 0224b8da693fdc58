//! APRS message, ACK and REJ payload parsing/encoding (§4.6, §6).

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Error;

const ADDRESSEE_LEN: usize = 9;

/// Whether an outgoing/incoming message frame also carries reply-ack
/// information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAck {
    /// No `{msgid}` suffix at all, or a bare msgid with no `}`.
    None,
    /// Trailing `}` with nothing after it: advertises reply-ack support
    /// without acking anything yet.
    Capable,
    /// `}ACKID`: this frame also acknowledges `ACKID`.
    Ack(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub addressee: String,
    pub text: String,
    pub msgid: Option<String>,
    pub replyack: ReplyAck,
}

fn valid_id(id: &str) -> bool {
    (1..=5).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Parses `:AAAAAAAAA:TEXT[{MSGID[}ACKID]]`.
pub fn parse_message(payload: &str) -> Result<MessageFrame, Error> {
    if !payload.starts_with(':') {
        return Err(Error::MalformedAprsPayload(
            "message payload must start with ':'".to_string(),
        ));
    }
    if payload.len() < ADDRESSEE_LEN + 2 || payload.as_bytes()[ADDRESSEE_LEN + 1] != b':' {
        return Err(Error::MalformedAprsPayload(
            "message payload missing 9-octet addressee terminator".to_string(),
        ));
    }
    let addressee = payload[1..ADDRESSEE_LEN + 1].trim_end().to_string();
    let rest = &payload[ADDRESSEE_LEN + 2..];

    let Some(brace) = rest.find('{') else {
        return Ok(MessageFrame {
            addressee,
            text: rest.to_string(),
            msgid: None,
            replyack: ReplyAck::None,
        });
    };
    let text = rest[..brace].to_string();
    let after = &rest[brace + 1..];

    let (msgid, replyack) = match after.find('}') {
        Some(close) => {
            let msgid = &after[..close];
            let ackid = &after[close + 1..];
            if !valid_id(msgid) {
                return Err(Error::MalformedAprsPayload(format!("bad msgid {msgid:?}")));
            }
            if ackid.is_empty() {
                (msgid.to_string(), ReplyAck::Capable)
            } else if valid_id(ackid) {
                (msgid.to_string(), ReplyAck::Ack(ackid.to_string()))
            } else {
                return Err(Error::MalformedAprsPayload(format!("bad ackid {ackid:?}")));
            }
        }
        None => {
            if !valid_id(after) {
                return Err(Error::MalformedAprsPayload(format!("bad msgid {after:?}")));
            }
            (after.to_string(), ReplyAck::None)
        }
    };

    Ok(MessageFrame {
        addressee,
        text,
        msgid: Some(msgid),
        replyack,
    })
}

/// Inverse of [`parse_message`]. Never emits `}` unless reply-ack was
/// explicitly requested.
pub fn encode_message(frame: &MessageFrame) -> String {
    let mut addressee = frame.addressee.clone();
    addressee.truncate(ADDRESSEE_LEN);
    let padded = format!("{addressee:<width$}", width = ADDRESSEE_LEN);
    let mut out = format!(":{padded}:{}", frame.text);
    if let Some(msgid) = &frame.msgid {
        out.push('{');
        out.push_str(msgid);
        match &frame.replyack {
            ReplyAck::None => {}
            ReplyAck::Capable => out.push('}'),
            ReplyAck::Ack(ackid) => {
                out.push('}');
                out.push_str(ackid);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOrReject {
    Ack { msgid: String, ackid: Option<String> },
    Reject { msgid: String, ackid: Option<String> },
}

fn ack_reject_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(ack|rej)([A-Za-z0-9]{1,5})(\}([A-Za-z0-9]{1,5}))?$")
            .expect("static ack/rej regex is valid")
    })
}

pub fn parse_ack_or_reject(payload: &str) -> Option<AckOrReject> {
    let caps = ack_reject_regex().captures(payload)?;
    let msgid = caps.get(2)?.as_str().to_string();
    let ackid = caps.get(4).map(|m| m.as_str().to_string());
    Some(match &caps[1] {
        "ack" => AckOrReject::Ack { msgid, ackid },
        _ => AckOrReject::Reject { msgid, ackid },
    })
}

pub fn encode_ack_or_reject(value: &AckOrReject) -> String {
    let (tag, msgid, ackid) = match value {
        AckOrReject::Ack { msgid, ackid } => ("ack", msgid, ackid),
        AckOrReject::Reject { msgid, ackid } => ("rej", msgid, ackid),
    };
    match ackid {
        Some(ackid) => format!("{tag}{msgid}}}{ackid}"),
        None => format!("{tag}{msgid}"),
    }
}
