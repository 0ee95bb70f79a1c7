// Engine.IO v4 / Socket.IO text frame codec for the polling transport.
//
// A polling response carries one or more packets joined by the record
// separator (0x1e). Some servers still prefix packets with `<len>:`.
// Packet types used here:
//   0{json}   open (handshake)        1  close
//   2         ping                    3  pong
//   6         noop                    40 namespace connect
//   44{json}  namespace connect error 42[...] event

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// Separator between packets in one polling payload.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Packets this client sends.
pub const CONNECT: &str = "40";
pub const PONG: &str = "3";

/// Event carrying adapter state, including the adapter password.
pub const ADAPTER_UPDATE: &str = "adapter_update";

/// Handshake payload of an open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: Option<u64>,
    #[serde(default)]
    pub ping_timeout: Option<u64>,
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Connect,
    ConnectError,
    Event { name: String, args: Vec<Value> },
    Noop,
    Unknown(String),
}

/// `{deviceSerial, password}` pulled from an `adapter_update` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterUpdate {
    pub serial: String,
    pub password: String,
}

impl Frame {
    /// The serial/password pair if this is a usable `adapter_update` event.
    pub fn adapter_update(&self) -> Option<AdapterUpdate> {
        let Self::Event { name, args } = self else {
            return None;
        };
        if name != ADAPTER_UPDATE {
            return None;
        }
        let body = args.first()?.as_object()?;
        let serial = body.get("deviceSerial")?.as_str()?;
        let password = body.get("password")?.as_str()?;
        if serial.is_empty() || password.is_empty() {
            return None;
        }
        Some(AdapterUpdate {
            serial: serial.to_owned(),
            password: password.to_owned(),
        })
    }
}

/// Split a polling payload into packets with any `<len>:` prefix removed.
pub fn split(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(RECORD_SEPARATOR)
        .map(strip_length_prefix)
        .filter(|packet| !packet.is_empty())
}

fn strip_length_prefix(packet: &str) -> &str {
    match packet.split_once(':') {
        Some((len, rest)) if !len.is_empty() && len.bytes().all(|b| b.is_ascii_digit()) => rest,
        _ => packet,
    }
}

/// Decode every packet in a polling payload.
pub fn decode(raw: &str) -> Vec<Frame> {
    split(raw).map(decode_packet).collect()
}

/// Decode a single packet (already split and prefix-stripped).
pub fn decode_packet(packet: &str) -> Frame {
    let frame = if let Some(rest) = packet.strip_prefix("42") {
        decode_event(rest).unwrap_or_else(|| Frame::Unknown(packet.to_owned()))
    } else if packet.starts_with("44") {
        Frame::ConnectError
    } else if packet.starts_with("40") {
        Frame::Connect
    } else if let Some(rest) = packet.strip_prefix('0') {
        serde_json::from_str(rest)
            .map(Frame::Open)
            .unwrap_or_else(|_| Frame::Unknown(packet.to_owned()))
    } else {
        match packet {
            "1" => Frame::Close,
            "2" => Frame::Ping,
            "3" => Frame::Pong,
            "6" => Frame::Noop,
            _ => Frame::Unknown(packet.to_owned()),
        }
    };
    trace!(?frame, "decoded packet");
    frame
}

fn decode_event(body: &str) -> Option<Frame> {
    let Value::Array(mut items) = serde_json::from_str(body).ok()? else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    let Value::String(name) = items.remove(0) else {
        return None;
    };
    Some(Frame::Event { name, args: items })
}

/// Encode an event packet: `42["name","arg",...]`.
pub fn encode_event(name: &str, args: &[&str]) -> String {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(Value::from(name));
    items.extend(args.iter().map(|a| Value::from(*a)));
    format!("42{}", Value::Array(items))
}

/// Join packets into one POST body.
pub fn encode_batch<I, S>(packets: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut body = String::new();
    for (i, packet) in packets.into_iter().enumerate() {
        if i > 0 {
            body.push(RECORD_SEPARATOR);
        }
        body.push_str(packet.as_ref());
    }
    body
}
