// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-command payload grammar on top of the block framing.

use std::fmt;

use super::frame::{RequestFrame, ResponseFrame};
use super::rmu::{decode_rmu_data, RmuDataMessage};
use super::Command;
use crate::heatpump::ProductInfo;

/// Payload does not match the command's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    TooShort { command: u8, length: usize },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { command, length } => write!(
                f,
                "payload of command {command:#04x} too short ({length} bytes)"
            ),
        }
    }
}

impl std::error::Error for MessageError {}

/// One register row of a `MODBUS_DATA_MSG` table frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRow {
    pub address: u16,
    pub raw: [u8; 2],
}

impl DataRow {
    /// Rows at this address pad a table frame to its fixed size.
    pub const PADDING_ADDRESS: u16 = 0xFFFF;

    #[must_use]
    pub fn is_padding(&self) -> bool {
        self.address == Self::PADDING_ADDRESS
    }
}

/// Both readings of the 3-byte `ACCESSORY_VERSION_REQ` payload; which
/// one applies depends on the peer's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessoryVersionReq {
    pub modbus: AccessoryVersion,
    pub rmu: AccessoryVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessoryVersion {
    pub version: u16,
    pub unknown: u8,
}

/// A decoded block payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ModbusReadRequest {
        address: u16,
    },
    ModbusReadResponse {
        address: u16,
        raw: [u8; 4],
    },
    /// Unsolicited table of register updates.
    ModbusDataMessage(Vec<DataRow>),
    ModbusWriteRequest {
        address: u16,
        raw: [u8; 4],
    },
    ModbusWriteResponse {
        accepted: bool,
    },
    ProductInfoMessage(ProductInfo),
    ModbusAddressMessage {
        address: u8,
    },
    StringMessage {
        id: u16,
        text: String,
    },
    RmuWriteRequest {
        index: u8,
        value: Vec<u8>,
    },
    RmuDataMessage(RmuDataMessage),
    AccessoryVersionReq(AccessoryVersionReq),
    /// Tolerated but not understood; payload preserved as-is.
    Unknown {
        command: u8,
        payload: Vec<u8>,
    },
}

/// Decode a response block's payload.
pub fn decode_response(frame: &ResponseFrame) -> Result<Message, MessageError> {
    decode_payload(frame.command_byte, Some(frame.address), &frame.payload)
}

/// Decode a request block's payload.
pub fn decode_request(frame: &RequestFrame) -> Result<Message, MessageError> {
    decode_payload(frame.command_byte, None, &frame.payload)
}

fn decode_payload(
    command_byte: u8,
    address: Option<u16>,
    payload: &[u8],
) -> Result<Message, MessageError> {
    let too_short = || MessageError::TooShort {
        command: command_byte,
        length: payload.len(),
    };

    let Some(command) = Command::from_byte(command_byte) else {
        return Ok(Message::Unknown {
            command: command_byte,
            payload: payload.to_vec(),
        });
    };

    match command {
        Command::ModbusReadReq => {
            if payload.len() < 2 {
                return Err(too_short());
            }
            Ok(Message::ModbusReadRequest {
                address: u16::from_le_bytes([payload[0], payload[1]]),
            })
        }
        Command::ModbusReadResp => {
            if payload.len() < 6 {
                return Err(too_short());
            }
            Ok(Message::ModbusReadResponse {
                address: u16::from_le_bytes([payload[0], payload[1]]),
                raw: [payload[2], payload[3], payload[4], payload[5]],
            })
        }
        Command::ModbusDataMsg => {
            let rows = payload
                .chunks_exact(4)
                .map(|row| DataRow {
                    address: u16::from_le_bytes([row[0], row[1]]),
                    raw: [row[2], row[3]],
                })
                .collect();
            Ok(Message::ModbusDataMessage(rows))
        }
        Command::ModbusWriteReq => {
            if payload.len() < 6 {
                return Err(too_short());
            }
            Ok(Message::ModbusWriteRequest {
                address: u16::from_le_bytes([payload[0], payload[1]]),
                raw: [payload[2], payload[3], payload[4], payload[5]],
            })
        }
        Command::ModbusWriteResp => {
            if payload.is_empty() {
                return Err(too_short());
            }
            Ok(Message::ModbusWriteResponse {
                accepted: payload[0] != 0,
            })
        }
        Command::ProductInfoMsg => {
            if payload.len() < 3 {
                return Err(too_short());
            }
            let model: String = payload[3..]
                .iter()
                .take_while(|&&byte| byte != 0)
                .map(|&byte| byte as char)
                .collect();
            Ok(Message::ProductInfoMessage(ProductInfo {
                model,
                firmware_version: u16::from_be_bytes([payload[1], payload[2]]),
            }))
        }
        Command::ModbusAddressMsg => {
            if payload.is_empty() {
                return Err(too_short());
            }
            Ok(Message::ModbusAddressMessage {
                address: payload[0],
            })
        }
        Command::StringMsg => {
            if payload.len() < 3 {
                return Err(too_short());
            }
            // NUL-terminated ISO-8859-1, which maps 1:1 onto Unicode
            let text: String = payload[3..]
                .iter()
                .take_while(|&&byte| byte != 0)
                .map(|&byte| byte as char)
                .collect();
            Ok(Message::StringMessage {
                id: u16::from_le_bytes([payload[1], payload[2]]),
                text,
            })
        }
        Command::RmuWriteReq => {
            if payload.is_empty() {
                return Err(too_short());
            }
            Ok(Message::RmuWriteRequest {
                index: payload[0],
                value: payload[1..].to_vec(),
            })
        }
        Command::RmuDataMsg => Ok(Message::RmuDataMessage(decode_rmu_data(
            address.unwrap_or_default(),
            payload,
        )?)),
        Command::AccessoryVersionReq => {
            if payload.len() < 3 {
                return Err(too_short());
            }
            Ok(Message::AccessoryVersionReq(AccessoryVersionReq {
                modbus: AccessoryVersion {
                    version: u16::from_le_bytes([payload[0], payload[1]]),
                    unknown: payload[2],
                },
                rmu: AccessoryVersion {
                    version: u16::from_le_bytes([payload[1], payload[2]]),
                    unknown: payload[0],
                },
            }))
        }
    }
}
