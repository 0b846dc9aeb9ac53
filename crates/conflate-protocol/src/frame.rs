// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for session stream framing.
//!
//! A session stream carries a sequence of frames:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: payload (JSON stanza, or empty for keepalive/close)

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::stanza::{Stanza, StanzaError};

/// Maximum frame size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Message types for the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// A stanza payload
    Stanza = 1,
    /// Protocol-level no-op that keeps an idle session alive
    Keepalive = 2,
    /// Orderly end of session
    Close = 3,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::Stanza),
            2 => Ok(MessageType::Keepalive),
            3 => Ok(MessageType::Close),
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

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stanza(#[from] StanzaError),

    #[error("unexpected {0:?} frame")]
    Unexpected(MessageType),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A framed message with type and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a stanza frame
    pub fn stanza(stanza: &Stanza) -> Result<Self, FrameError> {
        let payload = stanza.to_json()?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type: MessageType::Stanza,
            payload: Bytes::from(payload),
        })
    }

    pub fn keepalive() -> Self {
        Self {
            message_type: MessageType::Keepalive,
            payload: Bytes::new(),
        }
    }

    pub fn close() -> Self {
        Self {
            message_type: MessageType::Close,
            payload: Bytes::new(),
        }
    }

    /// Decode the payload of a stanza frame
    pub fn decode_stanza(&self) -> Result<Stanza, FrameError> {
        match self.message_type {
            MessageType::Stanza => Ok(Stanza::from_json(&self.payload)?),
            other => Err(FrameError::Unexpected(other)),
        }
    }

    /// Header followed by payload, ready for the wire.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        out.put_slice(&header(self.message_type, self.payload.len()));
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Parse one frame from the front of `bytes`; trailing bytes are ignored.
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(truncated("header"));
        }
        let mut raw = [0u8; HEADER_SIZE];
        bytes.copy_to_slice(&mut raw);
        let (message_type, length) = parse_header(raw)?;
        if bytes.remaining() < length {
            return Err(truncated("payload"));
        }
        Ok(Self {
            message_type,
            payload: bytes.split_to(length),
        })
    }
}

fn header(message_type: MessageType, length: usize) -> [u8; HEADER_SIZE] {
    let mut raw = [0u8; HEADER_SIZE];
    raw[..4].copy_from_slice(&(length as u32).to_be_bytes());
    raw[4..].copy_from_slice(&(message_type as u16).to_be_bytes());
    raw
}

fn parse_header(raw: [u8; HEADER_SIZE]) -> Result<(MessageType, usize), FrameError> {
    let [l0, l1, l2, l3, t0, t1] = raw;
    let length = u32::from_be_bytes([l0, l1, l2, l3]) as usize;
    let message_type = MessageType::try_from(u16::from_be_bytes([t0, t1]))?;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }
    Ok((message_type, length))
}

fn truncated(part: &str) -> FrameError {
    FrameError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("truncated frame {}", part),
    ))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&header(frame.message_type, frame.payload.len()))
        .await?;
    writer.write_all(&frame.payload).await?;
    Ok(())
}

/// Read one frame. A stream ending before the header is `ConnectionClosed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut raw).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
            _ => e.into(),
        });
    }
    let (message_type, length) = parse_header(raw)?;

    let mut payload = BytesMut::zeroed(length);
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        message_type,
        payload: payload.freeze(),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }

    /// Read frames until the next stanza, skipping keepalives.
    ///
    /// Returns `Ok(None)` when the peer closed the session.
    pub async fn read_stanza(&mut self) -> Result<Option<Stanza>, FrameError> {
        loop {
            let frame = match self.read_frame().await {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => return Ok(None),
                Err(e) => return Err(e),
            };
            match frame.message_type {
                MessageType::Stanza => return frame.decode_stanza().map(Some),
                MessageType::Keepalive => continue,
                MessageType::Close => return Ok(None),
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }

    pub async fn write_stanza(&mut self, stanza: &Stanza) -> Result<(), FrameError> {
        let frame = Frame::stanza(stanza)?;
        self.write_frame(&frame).await
    }
}
