// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-layout decoding of `RMU_DATA_MSG` room-unit telemetry.

use super::device;
use super::message::MessageError;

/// Climate system a room unit reports for, derived from the sender
/// address of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimateSystem {
    S1,
    S2,
    S3,
    S4,
}

impl ClimateSystem {
    #[must_use]
    pub fn from_device_address(address: u16) -> Option<Self> {
        match address {
            device::RMU40_S1 => Some(Self::S1),
            device::RMU40_S2 => Some(Self::S2),
            device::RMU40_S3 => Some(Self::S3),
            device::RMU40_S4 => Some(Self::S4),
            _ => None,
        }
    }
}

/// Operational flags carried at payload offset 15, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmuFlags {
    pub raw: u16,
    pub hw_production: bool,
    pub use_room_sensor_s1: bool,
    pub use_room_sensor_s2: bool,
    pub use_room_sensor_s3: bool,
    pub use_room_sensor_s4: bool,
}

impl RmuFlags {
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self {
            raw,
            hw_production: raw & 0x0001 != 0,
            use_room_sensor_s1: raw & 0x0010 != 0,
            use_room_sensor_s2: raw & 0x0020 != 0,
            use_room_sensor_s3: raw & 0x0040 != 0,
            use_room_sensor_s4: raw & 0x0080 != 0,
        }
    }

    /// Room-sensor flag for one climate system.
    #[must_use]
    pub fn use_room_sensor(&self, system: ClimateSystem) -> bool {
        match system {
            ClimateSystem::S1 => self.use_room_sensor_s1,
            ClimateSystem::S2 => self.use_room_sensor_s2,
            ClimateSystem::S3 => self.use_room_sensor_s3,
            ClimateSystem::S4 => self.use_room_sensor_s4,
        }
    }
}

/// Decoded room-unit telemetry.
///
/// Temperatures are fixed point with scale 0.1 and offset −0.5. The
/// per-system fields at offsets 4..8 are room setpoints
/// (`5.0 + raw / 10`) when that system's room-sensor flag is set and
/// plain signed offsets otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RmuDataMessage {
    pub climate_system: Option<ClimateSystem>,
    pub bt1_outdoor_temperature: f64,
    pub bt7_hw_top: f64,
    pub setpoint_or_offset_s1: f64,
    pub setpoint_or_offset_s2: f64,
    pub setpoint_or_offset_s3: f64,
    pub setpoint_or_offset_s4: f64,
    /// Room temperature measured by the sending unit's BT50 sensor.
    pub bt50_room_temp: f64,
    pub temporary_lux: u8,
    pub hw_time_hour: u8,
    pub hw_time_min: u8,
    pub fan_time_hour: u8,
    pub fan_time_min: u8,
    pub flags: RmuFlags,
    pub clock_time_hour: u8,
    pub clock_time_min: u8,
    pub alarm: u8,
    pub operational_mode: u8,
    pub fan_mode: u8,
    pub unknown1: u8,
    pub unknown2: [u8; 2],
}

/// Fixed point with scale 0.1 and offset −0.5, kept in tenths so the
/// division is exact.
fn temperature(raw: u16) -> f64 {
    f64::from(i32::from(raw) - 5) / 10.0
}

/// The outdoor sensor applies its offset with the opposite sign below
/// zero. This reproduces the wire, quirk included.
fn outdoor_temperature(raw: u16) -> f64 {
    let signed = i32::from(raw as i16);
    if signed >= 0 {
        f64::from(signed - 5) / 10.0
    } else {
        f64::from(signed + 5) / 10.0
    }
}

fn setpoint_or_offset(raw: u8, room_sensor: bool) -> f64 {
    if room_sensor {
        f64::from(i32::from(raw) + 50) / 10.0
    } else {
        f64::from(raw as i8)
    }
}

/// Decode an `RMU_DATA_MSG` payload. `address` is the sender address
/// of the enclosing block.
pub fn decode_rmu_data(address: u16, payload: &[u8]) -> Result<RmuDataMessage, MessageError> {
    if payload.len() < 25 {
        return Err(MessageError::TooShort {
            command: super::Command::RmuDataMsg.byte(),
            length: payload.len(),
        });
    }

    let flags = RmuFlags::from_raw(u16::from_be_bytes([payload[15], payload[16]]));

    Ok(RmuDataMessage {
        climate_system: ClimateSystem::from_device_address(address),
        bt1_outdoor_temperature: outdoor_temperature(u16::from_le_bytes([
            payload[0], payload[1],
        ])),
        bt7_hw_top: temperature(u16::from_le_bytes([payload[2], payload[3]])),
        setpoint_or_offset_s1: setpoint_or_offset(payload[4], flags.use_room_sensor_s1),
        setpoint_or_offset_s2: setpoint_or_offset(payload[5], flags.use_room_sensor_s2),
        setpoint_or_offset_s3: setpoint_or_offset(payload[6], flags.use_room_sensor_s3),
        setpoint_or_offset_s4: setpoint_or_offset(payload[7], flags.use_room_sensor_s4),
        bt50_room_temp: temperature(u16::from_le_bytes([payload[8], payload[9]])),
        temporary_lux: payload[10],
        hw_time_hour: payload[11],
        hw_time_min: payload[12],
        fan_time_hour: payload[13],
        fan_time_min: payload[14],
        flags,
        clock_time_hour: payload[17],
        clock_time_min: payload[18],
        alarm: payload[19],
        unknown1: payload[20],
        operational_mode: payload[21],
        fan_mode: payload[22],
        unknown2: [payload[23], payload[24]],
    })
}
