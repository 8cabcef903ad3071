//! Complete frame structure for the clocksync wire protocol
//!
//! Frame = Fixed Header + Payload

use bytes::BytesMut;

use clocksync_core::{SyncError, SyncResult};

use crate::{FrameHeader, FrameKind, Request, Response, FIXED_HEADER_SIZE};

/// Maximum frame size (MTU-friendly)
pub const MAX_FRAME_SIZE: usize = 1400;

/// Maximum payload size
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FIXED_HEADER_SIZE;

/// Complete clocksync frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Fixed header
    pub header: FrameHeader,
    /// Encoded message body
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a request frame
    pub fn request(request_id: u64, request: &Request) -> Self {
        let mut payload = BytesMut::new();
        request.encode_payload(&mut payload);
        Frame {
            header: FrameHeader::new(FrameKind::Request, request.tag(), request_id),
            payload: payload.to_vec(),
        }
    }

    /// Build a response frame answering `request_id`
    pub fn response(request_id: u64, response: &Response) -> Self {
        let mut payload = BytesMut::new();
        response.encode_payload(&mut payload);
        Frame {
            header: FrameHeader::new(FrameKind::Response, response.tag(), request_id),
            payload: payload.to_vec(),
        }
    }

    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    #[inline]
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// Decode the payload as a request
    pub fn decode_request(&self) -> SyncResult<Request> {
        if self.header.kind != FrameKind::Request {
            return Err(SyncError::InvalidWireFormat("Expected a request frame".into()));
        }
        Request::decode(self.header.tag, &self.payload)
    }

    /// Decode the payload as a response
    pub fn decode_response(&self) -> SyncResult<Response> {
        if self.header.kind != FrameKind::Response {
            return Err(SyncError::InvalidWireFormat("Expected a response frame".into()));
        }
        Response::decode(self.header.tag, &self.payload)
    }

    /// Parse frame from bytes
    pub fn parse(buf: &[u8]) -> SyncResult<Self> {
        let header = FrameHeader::parse(buf)?;

        let payload_end = FIXED_HEADER_SIZE + header.payload_len as usize;
        if buf.len() != payload_end {
            return Err(SyncError::InvalidWireFormat(format!(
                "Payload length mismatch: header says {}, frame carries {}",
                header.payload_len,
                buf.len() - FIXED_HEADER_SIZE
            )));
        }

        Ok(Frame {
            payload: buf[FIXED_HEADER_SIZE..payload_end].to_vec(),
            header,
        })
    }

    /// Serialize frame to bytes
    pub fn serialize(&self) -> SyncResult<Vec<u8>> {
        let total_size = self.size();

        if total_size > MAX_FRAME_SIZE {
            return Err(SyncError::InvalidWireFormat(format!(
                "Frame too large: {} > {}",
                total_size, MAX_FRAME_SIZE
            )));
        }

        let mut buf = vec![0u8; total_size];

        let mut header = self.header.clone();
        header.payload_len = self.payload.len() as u16;
        header.serialize(&mut buf)?;

        buf[FIXED_HEADER_SIZE..].copy_from_slice(&self.payload);

        Ok(buf)
    }

    /// Calculate total frame size
    pub fn size(&self) -> usize {
        FIXED_HEADER_SIZE + self.payload.len()
    }

    /// Check if frame fits in MTU
    pub fn fits_mtu(&self) -> bool {
        self.size() <= MAX_FRAME_SIZE
    }
}
