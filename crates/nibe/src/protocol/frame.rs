// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Block framing: start-code dispatch, payload escaping and XOR-8
//! checksums.
//!
//! The length byte counts the payload as transmitted, i.e. with escape
//! doubling applied, and the checksum covers the escaped form as well.
//! A computed checksum of `0x5C` travels as `0xC5` so the response
//! start code never appears as a checksum byte.

use std::fmt;

use super::{ACK, NAK, START_REQUEST, START_RESPONSE};

/// Escape byte doubled inside payloads.
pub const ESCAPE: u8 = 0x5C;
/// Substitute transmitted when a checksum computes to the escape byte.
pub const CHECKSUM_SUBSTITUTE: u8 = 0xC5;

/// Framing failure for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Block extends past the end of the buffer.
    Truncated { needed: usize, got: usize },
    /// Transmitted checksum matches neither the XOR nor its substitute.
    ChecksumMismatch { computed: u8, transmitted: u8 },
    /// A lone escape byte inside an escaped payload.
    BadEscape,
    /// Byte that is no start code.
    UnexpectedByte(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, got } => {
                write!(f, "truncated block: need {needed} bytes, got {got}")
            }
            Self::ChecksumMismatch {
                computed,
                transmitted,
            } => write!(
                f,
                "checksum mismatch: computed {computed:#04x}, transmitted {transmitted:#04x}"
            ),
            Self::BadEscape => write!(f, "lone escape byte in payload"),
            Self::UnexpectedByte(byte) => write!(f, "unexpected byte {byte:#04x} in stream"),
        }
    }
}

impl std::error::Error for FrameError {}

/// XOR of all bytes.
#[must_use]
pub fn xor8(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Double every escape byte.
#[must_use]
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &byte in payload {
        out.push(byte);
        if byte == ESCAPE {
            out.push(ESCAPE);
        }
    }
    out
}

/// Halve every doubled escape byte. A lone escape byte is a framing
/// error; it would have started a new block on the wire.
pub fn unescape(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        let byte = payload[i];
        if byte == ESCAPE {
            if payload.get(i + 1) != Some(&ESCAPE) {
                return Err(FrameError::BadEscape);
            }
            i += 1;
        }
        out.push(byte);
        i += 1;
    }
    Ok(out)
}

fn emit_checksum(computed: u8) -> u8 {
    if computed == ESCAPE {
        CHECKSUM_SUBSTITUTE
    } else {
        computed
    }
}

fn checksum_matches(computed: u8, transmitted: u8) -> bool {
    transmitted == computed || (computed == ESCAPE && transmitted == CHECKSUM_SUBSTITUTE)
}

/// One parsed response block. The payload is unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub address: u16,
    pub command_byte: u8,
    pub payload: Vec<u8>,
}

/// One parsed request block. The payload is unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub command_byte: u8,
    pub payload: Vec<u8>,
}

/// Any block the stream parser recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Ack,
    Nak,
    Response(ResponseFrame),
    Request(RequestFrame),
}

/// Parse a single response block from the start of `buf`.
pub fn parse_response(buf: &[u8]) -> Result<ResponseFrame, FrameError> {
    parse_response_block(buf).map(|(frame, _)| frame).map_err(|(err, _)| err)
}

/// Parse a single request block from the start of `buf`.
pub fn parse_request(buf: &[u8]) -> Result<RequestFrame, FrameError> {
    parse_request_block(buf).map(|(frame, _)| frame).map_err(|(err, _)| err)
}

// 5C | address:u16-be | cmd | len | payload[len] | checksum
// The checksum covers address through the escaped payload.
fn parse_response_block(buf: &[u8]) -> Result<(ResponseFrame, usize), (FrameError, usize)> {
    debug_assert_eq!(buf.first(), Some(&START_RESPONSE));
    if buf.len() < 6 {
        return Err((
            FrameError::Truncated {
                needed: 6,
                got: buf.len(),
            },
            buf.len(),
        ));
    }
    let payload_len = buf[4] as usize;
    let total = 6 + payload_len;
    if buf.len() < total {
        return Err((
            FrameError::Truncated {
                needed: total,
                got: buf.len(),
            },
            buf.len(),
        ));
    }

    let computed = xor8(&buf[1..5 + payload_len]);
    let transmitted = buf[5 + payload_len];
    if !checksum_matches(computed, transmitted) {
        return Err((
            FrameError::ChecksumMismatch {
                computed,
                transmitted,
            },
            total,
        ));
    }

    let payload = unescape(&buf[5..5 + payload_len]).map_err(|err| (err, total))?;
    let frame = ResponseFrame {
        address: u16::from_be_bytes([buf[1], buf[2]]),
        command_byte: buf[3],
        payload,
    };
    Ok((frame, total))
}

// C0 | cmd | len | payload[len] | checksum
// The checksum covers the start byte through the escaped payload.
fn parse_request_block(buf: &[u8]) -> Result<(RequestFrame, usize), (FrameError, usize)> {
    debug_assert_eq!(buf.first(), Some(&START_REQUEST));
    if buf.len() < 4 {
        return Err((
            FrameError::Truncated {
                needed: 4,
                got: buf.len(),
            },
            buf.len(),
        ));
    }
    let payload_len = buf[2] as usize;
    let total = 4 + payload_len;
    if buf.len() < total {
        return Err((
            FrameError::Truncated {
                needed: total,
                got: buf.len(),
            },
            buf.len(),
        ));
    }

    let computed = xor8(&buf[..3 + payload_len]);
    let transmitted = buf[3 + payload_len];
    if !checksum_matches(computed, transmitted) {
        return Err((
            FrameError::ChecksumMismatch {
                computed,
                transmitted,
            },
            total,
        ));
    }

    let payload = unescape(&buf[3..3 + payload_len]).map_err(|err| (err, total))?;
    let frame = RequestFrame {
        command_byte: buf[1],
        payload,
    };
    Ok((frame, total))
}

/// Block-by-block parser over a received buffer.
///
/// Yields one item per recognized block; framing faults are yielded as
/// errors and the parser resynchronizes on the next start code.
#[derive(Debug)]
pub struct BlockStream<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlockStream<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl Iterator for BlockStream<'_> {
    type Item = Result<Block, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let start = *rest.first()?;
        match start {
            ACK => {
                self.pos += 1;
                Some(Ok(Block::Ack))
            }
            NAK => {
                self.pos += 1;
                Some(Ok(Block::Nak))
            }
            START_RESPONSE => match parse_response_block(rest) {
                Ok((frame, consumed)) => {
                    self.pos += consumed;
                    Some(Ok(Block::Response(frame)))
                }
                Err((err, consumed)) => {
                    self.pos += consumed;
                    Some(Err(err))
                }
            },
            START_REQUEST => match parse_request_block(rest) {
                Ok((frame, consumed)) => {
                    self.pos += consumed;
                    Some(Ok(Block::Request(frame)))
                }
                Err((err, consumed)) => {
                    self.pos += consumed;
                    Some(Err(err))
                }
            },
            byte => {
                self.pos += 1;
                Some(Err(FrameError::UnexpectedByte(byte)))
            }
        }
    }
}

/// Build a request block around an unescaped payload.
#[must_use]
pub fn build_request(command: super::Command, payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let mut frame = Vec::with_capacity(4 + escaped.len());
    frame.push(START_REQUEST);
    frame.push(command.byte());
    frame.push(escaped.len() as u8);
    frame.extend_from_slice(&escaped);
    frame.push(emit_checksum(xor8(&frame)));
    frame
}

/// Build a `MODBUS_READ_REQ` block for one coil address.
#[must_use]
pub fn build_read_request(address: u16) -> Vec<u8> {
    build_request(super::Command::ModbusReadReq, &address.to_le_bytes())
}

/// Build a `MODBUS_WRITE_REQ` block for one coil address and its
/// 4-byte encoded value.
#[must_use]
pub fn build_write_request(address: u16, value: [u8; 4]) -> Vec<u8> {
    let mut payload = [0u8; 6];
    payload[..2].copy_from_slice(&address.to_le_bytes());
    payload[2..].copy_from_slice(&value);
    build_request(super::Command::ModbusWriteReq, &payload)
}

/// Build a response block around an unescaped payload.
#[must_use]
pub fn build_response(address: u16, command: super::Command, payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let mut frame = Vec::with_capacity(6 + escaped.len());
    frame.push(START_RESPONSE);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.push(command.byte());
    frame.push(escaped.len() as u8);
    frame.extend_from_slice(&escaped);
    frame.push(emit_checksum(xor8(&frame[1..])));
    frame
}
