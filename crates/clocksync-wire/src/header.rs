//! Fixed header for the clocksync wire protocol
//!
//! Fixed header is 14 bytes:
//! - Byte 0: Magic (0xC5)
//! - Byte 1: Version
//! - Byte 2: Frame kind (request / response)
//! - Byte 3: Message tag
//! - Bytes 4-11: Request ID (LE)
//! - Bytes 12-13: Payload length (LE)

use clocksync_core::{SyncError, SyncResult};

/// Fixed header size in bytes
pub const FIXED_HEADER_SIZE: usize = 14;

/// First byte of every frame
pub const WIRE_MAGIC: u8 = 0xC5;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Direction of a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0,
    Response = 1,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameKind::Request),
            1 => Some(FrameKind::Response),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Fixed header structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Wire protocol version
    pub version: u8,
    /// Request or response
    pub kind: FrameKind,
    /// Message tag (see `message::tags`)
    pub tag: u8,
    /// Correlates a response with its request
    pub request_id: u64,
    /// Payload length in bytes
    pub payload_len: u16,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, tag: u8, request_id: u64) -> Self {
        FrameHeader {
            version: WIRE_VERSION,
            kind,
            tag,
            request_id,
            payload_len: 0,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &[u8]) -> SyncResult<Self> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(SyncError::BufferTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        if buf[0] != WIRE_MAGIC {
            return Err(SyncError::InvalidWireFormat(format!(
                "Bad magic byte {:#04x}",
                buf[0]
            )));
        }

        let version = buf[1];
        if version != WIRE_VERSION {
            return Err(SyncError::InvalidWireFormat(format!(
                "Unsupported wire version {}",
                version
            )));
        }

        let kind = FrameKind::from_byte(buf[2])
            .ok_or_else(|| SyncError::InvalidWireFormat(format!("Unknown frame kind {}", buf[2])))?;

        let tag = buf[3];

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&buf[4..12]);
        let request_id = u64::from_le_bytes(id_bytes);

        let payload_len = u16::from_le_bytes([buf[12], buf[13]]);

        Ok(FrameHeader {
            version,
            kind,
            tag,
            request_id,
            payload_len,
        })
    }

    /// Serialize header into the start of `buf`
    pub fn serialize(&self, buf: &mut [u8]) -> SyncResult<()> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Err(SyncError::BufferTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        buf[0] = WIRE_MAGIC;
        buf[1] = self.version;
        buf[2] = self.kind.to_byte();
        buf[3] = self.tag;
        buf[4..12].copy_from_slice(&self.request_id.to_le_bytes());
        buf[12..14].copy_from_slice(&self.payload_len.to_le_bytes());

        Ok(())
    }
}
