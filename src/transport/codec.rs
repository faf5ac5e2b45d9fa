//! Socket.IO v2 wire codec
//!
//! Every WebSocket text frame is one Engine.IO (protocol 3) packet: a single
//! type digit followed by its data. Engine.IO `message` packets carry one
//! Socket.IO (protocol 4) packet:
//! ```text
//! <type>[/<namespace>,][<ack id>][<json data>]
//! ```
//! so an event that expects an acknowledgment looks like
//! `42` + `7` + `["get_status",{"key":"..."}]`, and its reply is `43` + `7` + `[...]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Engine.IO open handshake payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(Option<String>),
    Pong(Option<String>),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode one WebSocket text frame
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("Empty Engine.IO frame".to_string()))?;
        let data = chars.as_str();
        let probe = || (!data.is_empty()).then(|| data.to_string());

        match kind {
            '0' => {
                let handshake = serde_json::from_str(data).map_err(|e| {
                    Error::Protocol(format!("Invalid open handshake: {}", e))
                })?;
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(probe())),
            '3' => Ok(Self::Pong(probe())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            'b' => Err(Error::Protocol("Binary Engine.IO frames are not supported".to_string())),
            other => Err(Error::Protocol(format!("Unknown Engine.IO packet type '{}'", other))),
        }
    }

    /// Encode as a WebSocket text frame
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                // Handshake only holds strings and integers
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(probe) => format!("2{}", probe.as_deref().unwrap_or("")),
            Self::Pong(probe) => format!("3{}", probe.as_deref().unwrap_or("")),
            Self::Message(body) => format!("4{}", body),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    Error,
}

impl PacketKind {
    fn digit(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::Error => '4',
        }
    }
}

/// Default namespace
pub const ROOT_NAMESPACE: &str = "/";

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: PacketKind,
    pub namespace: String,
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            namespace: ROOT_NAMESPACE.to_string(),
            id: None,
            data: None,
        }
    }

    /// Namespace connect packet
    pub fn connect() -> Self {
        Self::new(PacketKind::Connect)
    }

    /// Namespace disconnect packet
    pub fn disconnect() -> Self {
        Self::new(PacketKind::Disconnect)
    }

    /// Event packet `[name, payload]`, requesting an ack when `id` is set
    pub fn event(name: &str, payload: Value, id: Option<u64>) -> Self {
        Self {
            id,
            data: Some(Value::Array(vec![Value::String(name.to_string()), payload])),
            ..Self::new(PacketKind::Event)
        }
    }

    /// Acknowledgment packet for `id` carrying `args`
    pub fn ack(id: u64, args: Vec<Value>) -> Self {
        Self {
            id: Some(id),
            data: Some(Value::Array(args)),
            ..Self::new(PacketKind::Ack)
        }
    }

    /// Error packet
    pub fn error(message: &str) -> Self {
        Self {
            data: Some(Value::String(message.to_string())),
            ..Self::new(PacketKind::Error)
        }
    }

    /// Decode the body of an Engine.IO message
    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = match chars.next() {
            Some('0') => PacketKind::Connect,
            Some('1') => PacketKind::Disconnect,
            Some('2') => PacketKind::Event,
            Some('3') => PacketKind::Ack,
            Some('4') => PacketKind::Error,
            Some('5') | Some('6') => {
                return Err(Error::Protocol(
                    "Binary Socket.IO packets are not supported".to_string(),
                ))
            }
            Some(other) => {
                return Err(Error::Protocol(format!(
                    "Unknown Socket.IO packet type '{}'",
                    other
                )))
            }
            None => return Err(Error::Protocol("Empty Socket.IO packet".to_string())),
        };
        let mut rest = chars.as_str();

        let mut namespace = ROOT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    namespace = rest[..end].to_string();
                    rest = &rest[end + 1..];
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| Error::Protocol(format!("Invalid ack id '{}'", &rest[..digits])))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest).map_err(|e| {
                Error::Protocol(format!("Invalid Socket.IO packet data: {}", e))
            })?)
        };

        Ok(Self {
            kind,
            namespace,
            id,
            data,
        })
    }

    /// Encode as the body of an Engine.IO message
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.namespace != ROOT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Encode wrapped in an Engine.IO message frame
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    /// Argument list carried by an ack packet
    ///
    /// An ack always carries an array; anything else is treated as a single argument.
    pub fn into_arguments(self) -> Vec<Value> {
        match self.data {
            Some(Value::Array(args)) => args,
            Some(other) => vec![other],
            None => Vec::new(),
        }
    }

    /// Event name and payload of an event packet
    pub fn event_parts(&self) -> Option<(&str, Option<&Value>)> {
        if self.kind != PacketKind::Event {
            return None;
        }
        let items = self.data.as_ref()?.as_array()?;
        let name = items.first()?.as_str()?;
        Some((name, items.get(1)))
    }
}
