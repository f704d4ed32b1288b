// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Register-pair coil codec for the fieldbus path.

use crate::coil::{Coil, CoilData, CoilSize, RawConversionError};
use crate::codec::{hex_registers, RawCodecError};
use crate::errors::{DecodeError, EncodeError};

/// Encoder/decoder for lists of 16-bit bus registers.
///
/// Narrow widths occupy a single register; signed widths interpret it
/// as two's complement, so s8 −4 travels as 0xFFFC. 32-bit widths span
/// two registers and `word_swap` selects which one carries the low
/// half (`Some(true)`: the first).
#[derive(Debug, Clone, Copy, Default)]
pub struct CoilDataEncoderModbus {
    pub word_swap: Option<bool>,
}

impl CoilDataEncoderModbus {
    #[must_use]
    pub fn new(word_swap: Option<bool>) -> Self {
        Self { word_swap }
    }

    /// Decode one or two registers into a coil reading.
    pub fn decode<'a>(&self, coil: &'a Coil, registers: &[u16]) -> Result<CoilData<'a>, DecodeError> {
        let parsed = self
            .decode_raw_value(coil.size, registers)
            .map_err(|err| self.decode_error(coil, registers, err))?;
        match parsed {
            None => Ok(CoilData::unset(coil)),
            Some(value) => CoilData::from_raw_value(coil, value).map_err(|err| match err {
                RawConversionError::OutOfBounds(value) => DecodeError::OutOfBounds {
                    coil: coil.name.clone(),
                    raw: hex_registers(registers),
                    value,
                },
                RawConversionError::NoMapping(value) => DecodeError::NoMapping {
                    coil: coil.name.clone(),
                    raw: hex_registers(registers),
                    value,
                },
                RawConversionError::BadDate(value) => DecodeError::BadDate {
                    coil: coil.name.clone(),
                    raw: hex_registers(registers),
                    value,
                },
            }),
        }
    }

    /// Encode a validated coil reading into one or two registers.
    pub fn encode(&self, data: &CoilData<'_>) -> Result<Vec<u16>, EncodeError> {
        data.validate().map_err(EncodeError::Validation)?;
        let raw = data.raw_value().map_err(EncodeError::Validation)?;
        self.encode_raw_value(data.coil.size, Some(raw))
            .map_err(|err| match err {
                RawCodecError::WordSwapUnknown => EncodeError::WordSwapUnknown {
                    coil: data.coil.name.clone(),
                },
                _ => EncodeError::OutOfRange {
                    coil: data.coil.name.clone(),
                    value: raw,
                },
            })
    }

    pub(crate) fn decode_raw_value(
        &self,
        size: CoilSize,
        registers: &[u16],
    ) -> Result<Option<i64>, RawCodecError> {
        let expected = size.register_count();
        if registers.len() < expected {
            return Err(RawCodecError::ShortInput {
                expected,
                got: registers.len(),
            });
        }

        let value = match size {
            CoilSize::U8 | CoilSize::U16 => i64::from(registers[0]),
            CoilSize::S8 | CoilSize::S16 => i64::from(registers[0] as i16),
            CoilSize::U32 | CoilSize::S32 => {
                let (low, high) = self.order_registers(registers[0], registers[1])?;
                let merged = (u32::from(high) << 16) | u32::from(low);
                if size == CoilSize::U32 {
                    i64::from(merged)
                } else {
                    i64::from(merged as i32)
                }
            }
        };

        if size.is_sentinel(value) {
            return Ok(None);
        }
        if value < size.min_raw() || value > size.max_raw() {
            return Err(RawCodecError::OutOfRange(value));
        }
        Ok(Some(value))
    }

    pub(crate) fn encode_raw_value(
        &self,
        size: CoilSize,
        value: Option<i64>,
    ) -> Result<Vec<u16>, RawCodecError> {
        let raw = value.unwrap_or_else(|| size.sentinel());
        if value.is_some() && (raw < size.min_raw() || raw > size.max_raw()) {
            return Err(RawCodecError::OutOfRange(raw));
        }

        match size {
            CoilSize::U8 | CoilSize::S8 | CoilSize::U16 | CoilSize::S16 => Ok(vec![raw as u16]),
            CoilSize::U32 | CoilSize::S32 => {
                let merged = raw as u32;
                let low = (merged & 0xFFFF) as u16;
                let high = (merged >> 16) as u16;
                let (first, second) = self.order_registers(low, high)?;
                Ok(vec![first, second])
            }
        }
    }

    /// With `word_swap == true` the first register is the low word.
    fn order_registers(&self, first: u16, second: u16) -> Result<(u16, u16), RawCodecError> {
        match self.word_swap {
            Some(true) => Ok((first, second)),
            Some(false) => Ok((second, first)),
            None => Err(RawCodecError::WordSwapUnknown),
        }
    }

    fn decode_error(&self, coil: &Coil, registers: &[u16], err: RawCodecError) -> DecodeError {
        match err {
            RawCodecError::ShortInput { expected, got } => DecodeError::ShortInput {
                coil: coil.name.clone(),
                raw: hex_registers(registers),
                expected,
                got,
            },
            RawCodecError::OutOfRange(_) => DecodeError::OutOfRange {
                coil: coil.name.clone(),
                raw: hex_registers(registers),
            },
            RawCodecError::WordSwapUnknown => DecodeError::WordSwapUnknown {
                coil: coil.name.clone(),
            },
        }
    }
}
