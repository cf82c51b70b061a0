// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for bus messages.
//!
//! Every message placed on the bus is a single frame:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: JSON payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::message::{AgentReport, DispatchEnvelope};

/// Maximum payload size (4 MB)
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Message types carried on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Desired state sent to a cluster agent
    Dispatch = 1,
    /// Observation sent back by a cluster agent
    Report = 2,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::Dispatch),
            2 => Ok(MessageType::Report),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("incomplete frame: {0}")]
    Incomplete(&'static str),

    #[error("unexpected message type: expected {expected:?}, got {actual:?}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A framed message with type and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Frame an outbound dispatch envelope
    pub fn dispatch(envelope: &DispatchEnvelope) -> Result<Self, FrameError> {
        Self::new(MessageType::Dispatch, envelope)
    }

    /// Frame an inbound agent report
    pub fn report(report: &AgentReport) -> Result<Self, FrameError> {
        Self::new(MessageType::Report, report)
    }

    /// Create a new frame with the given type and message
    pub fn new<M: Serialize>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = serde_json::to_vec(msg)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as a dispatch envelope
    pub fn decode_dispatch(&self) -> Result<DispatchEnvelope, FrameError> {
        self.expect_type(MessageType::Dispatch)?;
        self.decode()
    }

    /// Decode the payload as an agent report
    pub fn decode_report(&self) -> Result<AgentReport, FrameError> {
        self.expect_type(MessageType::Report)?;
        self.decode()
    }

    /// Decode the payload as JSON, regardless of message type
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    fn expect_type(&self, expected: MessageType) -> Result<(), FrameError> {
        if self.message_type != expected {
            return Err(FrameError::UnexpectedType {
                expected,
                actual: self.message_type,
            });
        }
        Ok(())
    }

    /// Encode the frame to bytes for the bus
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Incomplete("frame header"));
        }

        let length = bytes.get_u32() as usize;
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }

        if bytes.len() < length {
            return Err(FrameError::Incomplete("frame payload"));
        }

        let payload = bytes.split_to(length);
        Ok(Self {
            message_type,
            payload,
        })
    }
}
