// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-stream coil codec for the NibeGW UDP path.

use crate::coil::{Coil, CoilData, CoilSize, RawConversionError};
use crate::codec::{hex_encode, RawCodecError};
use crate::errors::{DecodeError, EncodeError};

/// Encoder/decoder for the 4-byte value fields of NibeGW frames.
///
/// `word_swap == Some(true)` means the wire is plain little-endian
/// (low word first); `Some(false)` swaps the two 16-bit halves of
/// 32-bit values. `None` refuses any 32-bit access.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoilDataEncoderNibeGw {
    pub word_swap: Option<bool>,
}

impl CoilDataEncoderNibeGw {
    #[must_use]
    pub fn new(word_swap: Option<bool>) -> Self {
        Self { word_swap }
    }

    /// Decode a value field into a coil reading.
    ///
    /// `raw` may be shorter than 4 bytes (table rows carry 2); it must
    /// cover at least the coil width. The width sentinel decodes to an
    /// unset reading.
    pub fn decode<'a>(&self, coil: &'a Coil, raw: &[u8]) -> Result<CoilData<'a>, DecodeError> {
        let parsed = self
            .decode_raw_value(coil.size, raw)
            .map_err(|err| self.decode_error(coil, raw, err))?;
        match parsed {
            None => Ok(CoilData::unset(coil)),
            Some(value) => CoilData::from_raw_value(coil, value).map_err(|err| match err {
                RawConversionError::OutOfBounds(value) => DecodeError::OutOfBounds {
                    coil: coil.name.clone(),
                    raw: hex_encode(raw),
                    value,
                },
                RawConversionError::NoMapping(value) => DecodeError::NoMapping {
                    coil: coil.name.clone(),
                    raw: hex_encode(raw),
                    value,
                },
                RawConversionError::BadDate(value) => DecodeError::BadDate {
                    coil: coil.name.clone(),
                    raw: hex_encode(raw),
                    value,
                },
            }),
        }
    }

    /// Encode a validated coil reading into the 4-byte wire field.
    pub fn encode(&self, data: &CoilData<'_>) -> Result<[u8; 4], EncodeError> {
        data.validate().map_err(EncodeError::Validation)?;
        let raw = data.raw_value().map_err(EncodeError::Validation)?;
        self.encode_raw_value(data.coil.size, Some(raw))
            .map_err(|err| self.encode_error(data.coil, raw, err))
    }

    /// Parse the declared width out of `raw`; sentinel becomes `None`.
    pub(crate) fn decode_raw_value(
        &self,
        size: CoilSize,
        raw: &[u8],
    ) -> Result<Option<i64>, RawCodecError> {
        let expected = size.byte_len();
        if raw.len() < expected {
            return Err(RawCodecError::ShortInput {
                expected,
                got: raw.len(),
            });
        }

        let value = match size {
            CoilSize::U8 => i64::from(raw[0]),
            CoilSize::S8 => i64::from(raw[0] as i8),
            CoilSize::U16 => i64::from(u16::from_le_bytes([raw[0], raw[1]])),
            CoilSize::S16 => i64::from(i16::from_le_bytes([raw[0], raw[1]])),
            CoilSize::U32 | CoilSize::S32 => {
                let bytes = self.order_words([raw[0], raw[1], raw[2], raw[3]])?;
                if size == CoilSize::U32 {
                    i64::from(u32::from_le_bytes(bytes))
                } else {
                    i64::from(i32::from_le_bytes(bytes))
                }
            }
        };

        if size.is_sentinel(value) {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    /// Emit exactly 4 bytes; `None` emits the width sentinel.
    pub(crate) fn encode_raw_value(
        &self,
        size: CoilSize,
        value: Option<i64>,
    ) -> Result<[u8; 4], RawCodecError> {
        let raw = value.unwrap_or_else(|| size.sentinel());
        if value.is_some() && (raw < size.min_raw() || raw > size.max_raw()) {
            return Err(RawCodecError::OutOfRange(raw));
        }

        let mut out = [0u8; 4];
        match size {
            CoilSize::U8 | CoilSize::S8 => out[0] = raw as u8,
            CoilSize::U16 | CoilSize::S16 => {
                out[..2].copy_from_slice(&(raw as u16).to_le_bytes());
            }
            CoilSize::U32 | CoilSize::S32 => {
                out = self.order_words((raw as u32).to_le_bytes())?;
            }
        }
        Ok(out)
    }

    fn order_words(&self, bytes: [u8; 4]) -> Result<[u8; 4], RawCodecError> {
        match self.word_swap {
            Some(true) => Ok(bytes),
            Some(false) => Ok([bytes[2], bytes[3], bytes[0], bytes[1]]),
            None => Err(RawCodecError::WordSwapUnknown),
        }
    }

    fn decode_error(&self, coil: &Coil, raw: &[u8], err: RawCodecError) -> DecodeError {
        match err {
            RawCodecError::ShortInput { expected, got } => DecodeError::ShortInput {
                coil: coil.name.clone(),
                raw: hex_encode(raw),
                expected,
                got,
            },
            RawCodecError::OutOfRange(_) => DecodeError::OutOfRange {
                coil: coil.name.clone(),
                raw: hex_encode(raw),
            },
            RawCodecError::WordSwapUnknown => DecodeError::WordSwapUnknown {
                coil: coil.name.clone(),
            },
        }
    }

    fn encode_error(&self, coil: &Coil, raw: i64, err: RawCodecError) -> EncodeError {
        match err {
            RawCodecError::WordSwapUnknown => EncodeError::WordSwapUnknown {
                coil: coil.name.clone(),
            },
            _ => EncodeError::OutOfRange {
                coil: coil.name.clone(),
                value: raw,
            },
        }
    }
}
