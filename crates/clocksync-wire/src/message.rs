//! Request and response messages carried in frame payloads
//!
//! Payload encoding is little-endian. Strings are a u16 length followed by
//! UTF-8 bytes; an optional string uses length 0 for `None`.

use std::net::SocketAddr;

use bytes::{Buf, BufMut, BytesMut};

use clocksync_core::{NodeId, Role, SyncError, SyncResult, Timestamp, MAX_NODE_ID_LEN};

/// Longest error message carried on the wire
pub const MAX_ERROR_MESSAGE_LEN: usize = 512;

/// Message tags
pub mod tags {
    // Requests served by every participant
    pub const QUERY_TIME: u8 = 0x01;
    pub const APPLY_ADJUSTMENT: u8 = 0x02;
    pub const IDENTITY: u8 = 0x03;
    pub const PING: u8 = 0x04;
    // Coordinator-only requests
    pub const REGISTER: u8 = 0x10;
    pub const TRIGGER_SYNC: u8 = 0x11;
    // Node-only requests
    pub const NOTIFY_CHECKPOINT: u8 = 0x20;

    // Responses
    pub const TIME: u8 = 0x81;
    pub const ACK: u8 = 0x82;
    pub const IDENTITY_REPLY: u8 = 0x83;
    pub const PONG: u8 = 0x84;
    pub const UNSUPPORTED: u8 = 0xFE;
    pub const ERROR: u8 = 0xFF;
}

/// Inbound operation on a clock participant
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    QueryTime,
    ApplyAdjustment { delta_ms: i64 },
    Identity,
    Ping,
    /// `advertise` overrides the datagram source address as the node's handle
    Register {
        id: NodeId,
        advertise: Option<SocketAddr>,
    },
    TriggerSync,
    NotifyCheckpoint { reference: Timestamp },
}

impl Request {
    pub fn tag(&self) -> u8 {
        match self {
            Request::QueryTime => tags::QUERY_TIME,
            Request::ApplyAdjustment { .. } => tags::APPLY_ADJUSTMENT,
            Request::Identity => tags::IDENTITY,
            Request::Ping => tags::PING,
            Request::Register { .. } => tags::REGISTER,
            Request::TriggerSync => tags::TRIGGER_SYNC,
            Request::NotifyCheckpoint { .. } => tags::NOTIFY_CHECKPOINT,
        }
    }

    /// Operation name used in logs and unsupported-capability errors
    pub fn operation(&self) -> &'static str {
        match self {
            Request::QueryTime => "query_time",
            Request::ApplyAdjustment { .. } => "apply_adjustment",
            Request::Identity => "identity",
            Request::Ping => "is_reachable",
            Request::Register { .. } => "register",
            Request::TriggerSync => "trigger_synchronization",
            Request::NotifyCheckpoint { .. } => "notify_checkpoint",
        }
    }

    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Request::QueryTime | Request::Identity | Request::Ping | Request::TriggerSync => {}
            Request::ApplyAdjustment { delta_ms } => buf.put_i64_le(*delta_ms),
            Request::Register { id, advertise } => {
                put_str(buf, id.as_str());
                let addr = advertise.map(|a| a.to_string()).unwrap_or_default();
                put_str(buf, &addr);
            }
            Request::NotifyCheckpoint { reference } => buf.put_i64_le(reference.as_millis()),
        }
    }

    pub fn decode(tag: u8, mut payload: &[u8]) -> SyncResult<Self> {
        let buf = &mut payload;
        let request = match tag {
            tags::QUERY_TIME => Request::QueryTime,
            tags::APPLY_ADJUSTMENT => Request::ApplyAdjustment {
                delta_ms: get_i64(buf)?,
            },
            tags::IDENTITY => Request::Identity,
            tags::PING => Request::Ping,
            tags::REGISTER => {
                let id = get_node_id(buf)?;
                let addr = get_str(buf)?;
                let advertise = if addr.is_empty() {
                    None
                } else {
                    Some(addr.parse().map_err(|_| {
                        SyncError::InvalidWireFormat(format!("Bad advertise address {:?}", addr))
                    })?)
                };
                Request::Register { id, advertise }
            }
            tags::TRIGGER_SYNC => Request::TriggerSync,
            tags::NOTIFY_CHECKPOINT => Request::NotifyCheckpoint {
                reference: Timestamp::from_millis(get_i64(buf)?),
            },
            other => return Err(SyncError::UnknownMessageTag(other)),
        };
        ensure_consumed(buf)?;
        Ok(request)
    }
}

/// Error codes carried in an error response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// The request could not be decoded
    Malformed = 1,
    /// The receiver failed while serving the request
    Internal = 2,
}

impl ErrorCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ErrorCode::Malformed),
            2 => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

/// Reply to a [`Request`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Time(Timestamp),
    Ack,
    Identity(NodeId),
    Pong { reachable: bool },
    /// The receiving role does not serve the requested operation
    Unsupported { role: Role },
    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn tag(&self) -> u8 {
        match self {
            Response::Time(_) => tags::TIME,
            Response::Ack => tags::ACK,
            Response::Identity(_) => tags::IDENTITY_REPLY,
            Response::Pong { .. } => tags::PONG,
            Response::Unsupported { .. } => tags::UNSUPPORTED,
            Response::Error { .. } => tags::ERROR,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Response::Time(_) => "time",
            Response::Ack => "ack",
            Response::Identity(_) => "identity",
            Response::Pong { .. } => "pong",
            Response::Unsupported { .. } => "unsupported",
            Response::Error { .. } => "error",
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Response::Time(t) => buf.put_i64_le(t.as_millis()),
            Response::Ack => {}
            Response::Identity(id) => put_str(buf, id.as_str()),
            Response::Pong { reachable } => buf.put_u8(u8::from(*reachable)),
            Response::Unsupported { role } => buf.put_u8(role_to_byte(*role)),
            Response::Error { code, message } => {
                buf.put_u8(*code as u8);
                put_str(buf, truncate_utf8(message, MAX_ERROR_MESSAGE_LEN));
            }
        }
    }

    pub fn decode(tag: u8, mut payload: &[u8]) -> SyncResult<Self> {
        let buf = &mut payload;
        let response = match tag {
            tags::TIME => Response::Time(Timestamp::from_millis(get_i64(buf)?)),
            tags::ACK => Response::Ack,
            tags::IDENTITY_REPLY => Response::Identity(get_node_id(buf)?),
            tags::PONG => {
                ensure_remaining(buf, 1)?;
                Response::Pong {
                    reachable: buf.get_u8() != 0,
                }
            }
            tags::UNSUPPORTED => {
                ensure_remaining(buf, 1)?;
                let raw = buf.get_u8();
                Response::Unsupported {
                    role: role_from_byte(raw).ok_or_else(|| {
                        SyncError::InvalidWireFormat(format!("Unknown role {}", raw))
                    })?,
                }
            }
            tags::ERROR => {
                ensure_remaining(buf, 1)?;
                let raw = buf.get_u8();
                let code = ErrorCode::from_byte(raw).ok_or_else(|| {
                    SyncError::InvalidWireFormat(format!("Unknown error code {}", raw))
                })?;
                Response::Error {
                    code,
                    message: get_str(buf)?,
                }
            }
            other => return Err(SyncError::UnknownMessageTag(other)),
        };
        ensure_consumed(buf)?;
        Ok(response)
    }
}

fn role_to_byte(role: Role) -> u8 {
    match role {
        Role::Node => 0,
        Role::Coordinator => 1,
    }
}

fn role_from_byte(b: u8) -> Option<Role> {
    match b {
        0 => Some(Role::Node),
        1 => Some(Role::Coordinator),
        _ => None,
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16_le(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn ensure_remaining(buf: &&[u8], needed: usize) -> SyncResult<()> {
    if buf.remaining() < needed {
        return Err(SyncError::BufferTooShort {
            expected: needed,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn ensure_consumed(buf: &&[u8]) -> SyncResult<()> {
    if buf.has_remaining() {
        return Err(SyncError::InvalidWireFormat(format!(
            "{} trailing payload bytes",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_i64(buf: &mut &[u8]) -> SyncResult<i64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_i64_le())
}

fn get_str(buf: &mut &[u8]) -> SyncResult<String> {
    ensure_remaining(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    ensure_remaining(buf, len)?;
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| SyncError::InvalidWireFormat("String is not UTF-8".into()))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

fn get_node_id(buf: &mut &[u8]) -> SyncResult<NodeId> {
    let raw = get_str(buf)?;
    if raw.is_empty() || raw.len() > MAX_NODE_ID_LEN {
        return Err(SyncError::InvalidWireFormat(format!(
            "Node identity length {} out of range",
            raw.len()
        )));
    }
    Ok(NodeId::from(raw))
}
