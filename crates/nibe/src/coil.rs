// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coil descriptors and value carriers.
//!
//! A [`Coil`] is one addressable register on the heat pump: address,
//! width, scaling factor, optional bounds and an optional raw-to-label
//! mapping table. Descriptors are immutable after construction; the
//! current reading travels separately in a [`CoilData`] carrier that
//! borrows its descriptor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::{CoilError, ValidationError};

/// Storage width of a coil on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoilSize {
    #[serde(rename = "u8")]
    U8,
    #[serde(rename = "s8")]
    S8,
    #[serde(rename = "u16")]
    U16,
    #[serde(rename = "s16")]
    S16,
    #[serde(rename = "u32")]
    U32,
    #[serde(rename = "s32")]
    S32,
}

impl CoilSize {
    /// Bytes occupied by this width in a byte-stream payload.
    #[must_use]
    pub fn byte_len(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 => 4,
        }
    }

    /// 16-bit registers occupied by this width on a register bus.
    #[must_use]
    pub fn register_count(self) -> usize {
        if self.is_32bit() {
            2
        } else {
            1
        }
    }

    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(self, Self::S8 | Self::S16 | Self::S32)
    }

    #[must_use]
    pub fn is_32bit(self) -> bool {
        matches!(self, Self::U32 | Self::S32)
    }

    /// The integer-limit sentinel meaning "no measurement".
    ///
    /// Detection is `>= sentinel` for unsigned widths and `<= sentinel`
    /// for signed ones.
    #[must_use]
    pub fn sentinel(self) -> i64 {
        match self {
            Self::U8 => 0xFF,
            Self::S8 => -0x80,
            Self::U16 => 0xFFFF,
            Self::S16 => -0x8000,
            Self::U32 => 0xFFFF_FFFF,
            Self::S32 => -0x8000_0000,
        }
    }

    /// Smallest raw integer representable in this width.
    #[must_use]
    pub fn min_raw(self) -> i64 {
        match self {
            Self::U8 | Self::U16 | Self::U32 => 0,
            Self::S8 => i64::from(i8::MIN),
            Self::S16 => i64::from(i16::MIN),
            Self::S32 => i64::from(i32::MIN),
        }
    }

    /// Largest raw integer representable in this width.
    #[must_use]
    pub fn max_raw(self) -> i64 {
        match self {
            Self::U8 => 0xFF,
            Self::S8 => i64::from(i8::MAX),
            Self::U16 => 0xFFFF,
            Self::S16 => i64::from(i16::MAX),
            Self::U32 => 0xFFFF_FFFF,
            Self::S32 => i64::from(i32::MAX),
        }
    }

    /// Whether a parsed raw integer hits the "unavailable" sentinel.
    #[must_use]
    pub fn is_sentinel(self, raw: i64) -> bool {
        if self.is_signed() {
            raw <= self.sentinel()
        } else {
            raw >= self.sentinel()
        }
    }
}

impl fmt::Display for CoilSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U16 => "u16",
            Self::S16 => "s16",
            Self::U32 => "u32",
            Self::S32 => "s32",
        };
        f.write_str(tag)
    }
}

/// Semantic interpretation of a coil's numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoilKind {
    #[serde(rename = "number")]
    #[default]
    Number,
    /// Raw value counts days since 2007-01-01.
    #[serde(rename = "date")]
    Date,
}

/// First representable date for date coils.
#[must_use]
pub fn date_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2007, 1, 1).expect("2007-01-01 is a valid date")
}

/// Immutable descriptor of one heat pump register.
#[derive(Debug, Clone)]
pub struct Coil {
    pub address: u16,
    pub name: String,
    pub title: String,
    pub size: CoilSize,
    pub factor: i32,
    pub unit: Option<String>,
    pub info: Option<String>,
    pub write: bool,
    pub kind: CoilKind,
    raw_min: Option<i64>,
    raw_max: Option<i64>,
    mappings: Option<BTreeMap<i64, String>>,
    reverse_mappings: Option<HashMap<String, i64>>,
    is_boolean: bool,
}

impl Coil {
    /// Start building a descriptor. Defaults: factor 1, read-only,
    /// unbounded, no mapping, number kind.
    #[must_use]
    pub fn builder(
        address: u16,
        name: impl Into<String>,
        title: impl Into<String>,
        size: CoilSize,
    ) -> CoilBuilder {
        CoilBuilder {
            address,
            name: name.into(),
            title: title.into(),
            size,
            factor: 1,
            unit: None,
            info: None,
            write: false,
            kind: CoilKind::Number,
            raw_min: None,
            raw_max: None,
            mappings: None,
        }
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.write
    }

    #[must_use]
    pub fn is_date(&self) -> bool {
        self.kind == CoilKind::Date
    }

    /// True for factor-1 coils constrained to {0, 1} by bounds or mapping.
    #[must_use]
    pub fn is_boolean(&self) -> bool {
        self.is_boolean
    }

    #[must_use]
    pub fn has_mappings(&self) -> bool {
        self.mappings.is_some()
    }

    #[must_use]
    pub fn mappings(&self) -> Option<&BTreeMap<i64, String>> {
        self.mappings.as_ref()
    }

    /// Raw-units lower bound, if constrained.
    #[must_use]
    pub fn raw_min(&self) -> Option<i64> {
        self.raw_min
    }

    /// Raw-units upper bound, if constrained.
    #[must_use]
    pub fn raw_max(&self) -> Option<i64> {
        self.raw_max
    }

    /// Scaled lower bound (`raw_min / factor`).
    #[must_use]
    pub fn min_value(&self) -> Option<f64> {
        self.raw_min.map(|raw| raw as f64 / f64::from(self.factor))
    }

    /// Scaled upper bound (`raw_max / factor`).
    #[must_use]
    pub fn max_value(&self) -> Option<f64> {
        self.raw_max.map(|raw| raw as f64 / f64::from(self.factor))
    }

    /// Canonical label for a raw value.
    #[must_use]
    pub fn mapping_for(&self, raw: i64) -> Option<&str> {
        self.mappings
            .as_ref()
            .and_then(|m| m.get(&raw))
            .map(String::as_str)
    }

    /// Raw value for a label; the label is uppercased before lookup.
    #[must_use]
    pub fn reverse_mapping_for(&self, label: &str) -> Option<i64> {
        self.reverse_mappings
            .as_ref()
            .and_then(|m| m.get(&label.to_uppercase()))
            .copied()
    }

    /// Bounds check in raw units. Absent bounds do not constrain.
    #[must_use]
    pub fn is_raw_in_range(&self, raw: i64) -> bool {
        if let Some(min) = self.raw_min {
            if raw < min {
                return false;
            }
        }
        if let Some(max) = self.raw_max {
            if raw > max {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Coil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coil {} ({})", self.address, self.name)
    }
}

impl PartialEq for Coil {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.name == other.name
    }
}

/// Builder for [`Coil`]; `build` runs the descriptor invariants.
#[derive(Debug, Clone)]
pub struct CoilBuilder {
    address: u16,
    name: String,
    title: String,
    size: CoilSize,
    factor: i32,
    unit: Option<String>,
    info: Option<String>,
    write: bool,
    kind: CoilKind,
    raw_min: Option<i64>,
    raw_max: Option<i64>,
    mappings: Option<Vec<(i64, String)>>,
}

impl CoilBuilder {
    #[must_use]
    pub fn factor(mut self, factor: i32) -> Self {
        self.factor = factor;
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    #[must_use]
    pub fn writable(mut self) -> Self {
        self.write = true;
        self
    }

    #[must_use]
    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: CoilKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn min(mut self, min: i64) -> Self {
        self.raw_min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: i64) -> Self {
        self.raw_max = Some(max);
        self
    }

    #[must_use]
    pub fn bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.raw_min = min;
        self.raw_max = max;
        self
    }

    #[must_use]
    pub fn mappings<I, S>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        self.mappings = Some(
            mappings
                .into_iter()
                .map(|(raw, label)| (raw, label.into()))
                .collect(),
        );
        self
    }

    pub fn build(self) -> Result<Coil, CoilError> {
        if self.factor < 1 {
            return Err(CoilError::BadFactor {
                name: self.name,
                factor: self.factor,
            });
        }
        if self.mappings.is_some() && self.factor != 1 {
            return Err(CoilError::MappingWithFactor {
                name: self.name,
                factor: self.factor,
            });
        }
        if self.mappings.is_some() && self.kind == CoilKind::Date {
            return Err(CoilError::DateWithMapping { name: self.name });
        }

        let boolean_by_bounds =
            self.factor == 1 && self.raw_min == Some(0) && self.raw_max == Some(1);

        // Labels are canonicalized to uppercase; booleans without an
        // explicit mapping get the synthetic OFF/ON one.
        let mappings: Option<BTreeMap<i64, String>> = match self.mappings {
            Some(entries) => Some(
                entries
                    .into_iter()
                    .map(|(raw, label)| (raw, label.to_uppercase()))
                    .collect(),
            ),
            None if boolean_by_bounds => Some(BTreeMap::from([
                (0, "OFF".to_string()),
                (1, "ON".to_string()),
            ])),
            None => None,
        };

        let reverse_mappings = match &mappings {
            Some(mappings) => {
                let mut reverse = HashMap::with_capacity(mappings.len());
                for (&raw, label) in mappings {
                    if reverse.insert(label.clone(), raw).is_some() {
                        return Err(CoilError::AmbiguousMapping {
                            name: self.name,
                            label: label.clone(),
                        });
                    }
                }
                Some(reverse)
            }
            None => None,
        };

        let is_boolean = self.factor == 1
            && (boolean_by_bounds
                || mappings
                    .as_ref()
                    .is_some_and(|m| m.keys().all(|&raw| raw == 0 || raw == 1)));

        Ok(Coil {
            address: self.address,
            name: self.name,
            title: self.title,
            size: self.size,
            factor: self.factor,
            unit: self.unit,
            info: self.info,
            write: self.write,
            kind: self.kind,
            raw_min: self.raw_min,
            raw_max: self.raw_max,
            mappings,
            reverse_mappings,
            is_boolean,
        })
    }
}

/// One typed coil reading.
#[derive(Debug, Clone, PartialEq)]
pub enum CoilValue {
    Number(f64),
    /// Canonical uppercase label from the coil's mapping table.
    Label(String),
    Date(NaiveDate),
}

impl fmt::Display for CoilValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{value}")
                }
            }
            Self::Label(label) => f.write_str(label),
            Self::Date(date) => write!(f, "{date}"),
        }
    }
}

impl From<f64> for CoilValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CoilValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for CoilValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for CoilValue {
    fn from(value: &str) -> Self {
        Self::Label(value.to_uppercase())
    }
}

impl From<String> for CoilValue {
    fn from(value: String) -> Self {
        Self::Label(value.to_uppercase())
    }
}

impl From<NaiveDate> for CoilValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

/// Why a raw integer could not become a coil value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawConversionError {
    OutOfBounds(i64),
    NoMapping(i64),
    BadDate(i64),
}

/// A coil reading bound to its descriptor. `value == None` means the
/// pump reported "unavailable" (or nothing was read yet).
#[derive(Debug, Clone)]
pub struct CoilData<'a> {
    pub coil: &'a Coil,
    pub value: Option<CoilValue>,
}

impl<'a> CoilData<'a> {
    #[must_use]
    pub fn new(coil: &'a Coil, value: impl Into<CoilValue>) -> Self {
        Self {
            coil,
            value: Some(value.into()),
        }
    }

    #[must_use]
    pub fn unset(coil: &'a Coil) -> Self {
        Self { coil, value: None }
    }

    /// Build a carrier from a raw wire integer.
    ///
    /// The width sentinel yields an unset carrier; otherwise the value
    /// is bounds-checked, mapped or scaled by `1 / factor`, and date
    /// coils count days from 2007-01-01.
    pub(crate) fn from_raw_value(
        coil: &'a Coil,
        raw: i64,
    ) -> Result<Self, RawConversionError> {
        if coil.size.is_sentinel(raw) {
            return Ok(Self::unset(coil));
        }
        if !coil.is_raw_in_range(raw) {
            return Err(RawConversionError::OutOfBounds(raw));
        }
        if coil.is_date() {
            let date = u64::try_from(raw)
                .ok()
                .and_then(|days| date_epoch().checked_add_days(Days::new(days)))
                .ok_or(RawConversionError::BadDate(raw))?;
            return Ok(Self::new(coil, date));
        }
        if coil.has_mappings() {
            let label = coil
                .mapping_for(raw)
                .ok_or(RawConversionError::NoMapping(raw))?;
            return Ok(Self::new(coil, label));
        }
        if coil.factor == 1 {
            Ok(Self::new(coil, raw))
        } else {
            Ok(Self::new(coil, raw as f64 / f64::from(coil.factor)))
        }
    }

    /// Check the carried value against the descriptor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let coil = self.coil;
        let value = self.value.as_ref().ok_or_else(|| ValidationError::Unset {
            coil: coil.name.clone(),
        })?;

        match value {
            CoilValue::Label(label) => {
                if !coil.has_mappings() {
                    return Err(self.wrong_kind());
                }
                if coil.reverse_mapping_for(label).is_none() {
                    return Err(ValidationError::NoMapping {
                        coil: coil.name.clone(),
                        label: label.clone(),
                    });
                }
                Ok(())
            }
            CoilValue::Number(number) => {
                if coil.is_date() || coil.has_mappings() {
                    return Err(self.wrong_kind());
                }
                let min = coil.min_value();
                let max = coil.max_value();
                if min.is_some_and(|min| *number < min) || max.is_some_and(|max| *number > max) {
                    return Err(ValidationError::OutOfBounds {
                        coil: coil.name.clone(),
                        value: *number,
                        min,
                        max,
                    });
                }
                Ok(())
            }
            CoilValue::Date(date) => {
                if !coil.is_date() {
                    return Err(self.wrong_kind());
                }
                let days = date.signed_duration_since(date_epoch()).num_days();
                if days < 0 || days > 65534 {
                    return Err(ValidationError::OutOfBounds {
                        coil: coil.name.clone(),
                        value: days as f64,
                        min: Some(0.0),
                        max: Some(65534.0),
                    });
                }
                Ok(())
            }
        }
    }

    /// The integer that travels on the wire for this value.
    ///
    /// Labels go through the inverse mapping, numbers are scaled by the
    /// factor and truncated toward zero, dates count days since the
    /// 2007-01-01 epoch.
    pub fn raw_value(&self) -> Result<i64, ValidationError> {
        self.validate()?;
        let value = self.value.as_ref().expect("validated above");
        match value {
            CoilValue::Label(label) => Ok(self
                .coil
                .reverse_mapping_for(label)
                .expect("validated above")),
            CoilValue::Number(number) => {
                Ok((number * f64::from(self.coil.factor)).trunc() as i64)
            }
            CoilValue::Date(date) => {
                Ok(date.signed_duration_since(date_epoch()).num_days())
            }
        }
    }

    /// "ON"/"OFF" reading of a boolean coil.
    #[must_use]
    pub fn bool_value(&self) -> Option<bool> {
        match &self.value {
            Some(CoilValue::Label(label)) if self.coil.is_boolean() => match label.as_str() {
                "ON" => Some(true),
                "OFF" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn wrong_kind(&self) -> ValidationError {
        ValidationError::WrongKind {
            coil: self.coil.name.clone(),
            value: self
                .value
                .as_ref()
                .map_or_else(|| "unset".to_string(), ToString::to_string),
        }
    }
}

impl PartialEq for CoilData<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.coil.address == other.coil.address && self.value == other.value
    }
}

impl fmt::Display for CoilData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {value}", self.coil.name),
            None => write!(f, "{}: unavailable", self.coil.name),
        }
    }
}
