// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the heat pump client.
//!
//! Read and write failures split into an I/O class (timeouts, send
//! failures) that the connections retry within their budget, and a
//! semantic class (denied writes, decode failures on a valid frame)
//! that surfaces immediately.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Errors raised while constructing a coil descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoilError {
    /// A value mapping requires factor 1.
    MappingWithFactor { name: String, factor: i32 },
    /// Date coils cannot carry a value mapping.
    DateWithMapping { name: String },
    /// Two raw values map to the same canonical label.
    AmbiguousMapping { name: String, label: String },
    /// Factor must be a positive integer.
    BadFactor { name: String, factor: i32 },
}

impl fmt::Display for CoilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappingWithFactor { name, factor } => {
                write!(f, "coil {name}: mappings require factor 1, got {factor}")
            }
            Self::DateWithMapping { name } => {
                write!(f, "coil {name}: date coils cannot have mappings")
            }
            Self::AmbiguousMapping { name, label } => {
                write!(f, "coil {name}: label {label:?} maps to more than one raw value")
            }
            Self::BadFactor { name, factor } => {
                write!(f, "coil {name}: factor must be >= 1, got {factor}")
            }
        }
    }
}

impl std::error::Error for CoilError {}

/// Lookup failure in a model's coil table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoilNotFound {
    /// No coil registered at this address.
    Address(u16),
    /// No coil registered under this name.
    Name(String),
}

impl fmt::Display for CoilNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "coil with address {address} not found"),
            Self::Name(name) => write!(f, "coil with name '{name}' not found"),
        }
    }
}

impl std::error::Error for CoilNotFound {}

/// A coil value that cannot be written or encoded as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The carrier holds no value.
    Unset { coil: String },
    /// The value kind does not match the descriptor (label for an
    /// unmapped coil, number for a mapped one, date for a non-date one).
    WrongKind { coil: String, value: String },
    /// Scaled value outside the descriptor bounds.
    OutOfBounds {
        coil: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Label not present in the coil's mapping table.
    NoMapping { coil: String, label: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset { coil } => write!(f, "{coil}: value is not set"),
            Self::WrongKind { coil, value } => {
                write!(f, "{coil}: value {value} has the wrong kind for this coil")
            }
            Self::OutOfBounds {
                coil,
                value,
                min,
                max,
            } => {
                write!(f, "{coil}: value {value} out of bounds (")?;
                match min {
                    Some(min) => write!(f, "min {min}, ")?,
                    None => write!(f, "min -, ")?,
                }
                match max {
                    Some(max) => write!(f, "max {max})"),
                    None => write!(f, "max -)"),
                }
            }
            Self::NoMapping { coil, label } => {
                write!(f, "{coil}: mapping not found for label {label:?}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Failure while decoding raw wire data into a coil value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Fewer bytes or registers than the coil width requires.
    ShortInput {
        coil: String,
        raw: String,
        expected: usize,
        got: usize,
    },
    /// Raw integer does not fit the coil width.
    OutOfRange { coil: String, raw: String },
    /// Raw integer outside the descriptor's min/max.
    OutOfBounds { coil: String, raw: String, value: i64 },
    /// Raw integer has no entry in the coil's mapping table.
    NoMapping { coil: String, raw: String, value: i64 },
    /// Raw days offset outside the representable date range.
    BadDate { coil: String, raw: String, value: i64 },
    /// 32-bit access with the word order still unknown.
    WordSwapUnknown { coil: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortInput {
                coil,
                raw,
                expected,
                got,
            } => write!(
                f,
                "failed to decode {coil} from {raw}: got {got} units, expected at least {expected}"
            ),
            Self::OutOfRange { coil, raw } => {
                write!(f, "failed to decode {coil} from {raw}: value does not fit the coil width")
            }
            Self::OutOfBounds { coil, raw, value } => {
                write!(f, "failed to decode {coil} from {raw}: raw value {value} out of bounds")
            }
            Self::NoMapping { coil, raw, value } => {
                write!(f, "failed to decode {coil} from {raw}: no mapping for raw value {value}")
            }
            Self::BadDate { coil, raw, value } => {
                write!(f, "failed to decode {coil} from {raw}: {value} days is not a valid date")
            }
            Self::WordSwapUnknown { coil } => {
                write!(f, "failed to decode {coil}: word swap is not set, cannot parse 32 bit integers")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Failure while encoding a coil value for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// The carrier failed validation before encoding.
    Validation(ValidationError),
    /// Raw integer does not fit the coil width.
    OutOfRange { coil: String, value: i64 },
    /// 32-bit access with the word order still unknown.
    WordSwapUnknown { coil: String },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "failed to encode: {err}"),
            Self::OutOfRange { coil, value } => {
                write!(f, "failed to encode {coil}: value {value} does not fit the coil width")
            }
            Self::WordSwapUnknown { coil } => {
                write!(f, "failed to encode {coil}: word swap is not set, cannot emit 32 bit integers")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<ValidationError> for EncodeError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

/// Failure while loading a model's coil table or identifying a model.
#[derive(Debug)]
pub enum HeatPumpError {
    /// No known model name occurs in the product string.
    ModelIdentificationFailed { product: String },
    /// The register definition artifact could not be parsed at all.
    RegisterDefinition { file: String, reason: String },
    /// A custom definition file could not be read.
    Io(std::io::Error),
}

impl fmt::Display for HeatPumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelIdentificationFailed { product } => {
                write!(f, "no known model matches product {product:?}")
            }
            Self::RegisterDefinition { file, reason } => {
                write!(f, "malformed register definitions in {file}: {reason}")
            }
            Self::Io(err) => write!(f, "failed to read register definitions: {err}"),
        }
    }
}

impl std::error::Error for HeatPumpError {}

impl From<std::io::Error> for HeatPumpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Read failure at the connection surface.
#[derive(Debug)]
pub enum ReadError {
    /// No response arrived within the per-call timeout (I/O class).
    Timeout { coil: String, timeout: Duration },
    /// The request could not be sent (I/O class).
    SendFailed { coil: String, reason: String },
    /// No product info message arrived within the timeout (I/O class).
    ProductInfoTimeout { timeout: Duration },
    /// The response frame parsed but its content is invalid for this coil.
    Decode(DecodeError),
    /// The remote device rejected the read.
    Device { coil: String, reason: String },
    /// The coil is not present in the loaded model table.
    CoilNotFound(CoilNotFound),
    /// The address range or operation is not supported on this transport.
    Unsupported { coil: String, reason: String },
    /// The connection was stopped while the call was waiting.
    ConnectionClosed { coil: String },
}

impl ReadError {
    /// I/O-class failures are retried within the connection's budget.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::SendFailed { .. } | Self::ProductInfoTimeout { .. }
        )
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { coil, timeout } => write!(
                f,
                "timeout waiting for read response for {coil} after {:?}",
                timeout
            ),
            Self::SendFailed { coil, reason } => {
                write!(f, "failed to send read request for {coil}: {reason}")
            }
            Self::ProductInfoTimeout { timeout } => {
                write!(f, "timeout waiting for product info after {:?}", timeout)
            }
            Self::Decode(err) => write!(f, "{err}"),
            Self::Device { coil, reason } => {
                write!(f, "device rejected reading {coil}: {reason}")
            }
            Self::CoilNotFound(err) => write!(f, "{err}"),
            Self::Unsupported { coil, reason } => {
                write!(f, "cannot read {coil}: {reason}")
            }
            Self::ConnectionClosed { coil } => {
                write!(f, "connection closed while reading {coil}")
            }
        }
    }
}

impl std::error::Error for ReadError {}

impl From<DecodeError> for ReadError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

impl From<CoilNotFound> for ReadError {
    fn from(err: CoilNotFound) -> Self {
        Self::CoilNotFound(err)
    }
}

/// Per-coil read failures collected by a `read_coils` stream.
///
/// The stream never fails mid-sequence; this aggregate is yielded once
/// after the last successful item.
#[derive(Debug)]
pub struct ReadErrorGroup {
    pub errors: Vec<ReadError>,
}

impl ReadErrorGroup {
    #[must_use]
    pub fn new(errors: Vec<ReadError>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for ReadErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read some or all coils (")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for ReadErrorGroup {}

/// Write failure at the connection surface.
#[derive(Debug)]
pub enum WriteError {
    /// No write feedback arrived within the per-call timeout (I/O class).
    Timeout { coil: String, timeout: Duration },
    /// The request could not be sent (I/O class).
    SendFailed { coil: String, reason: String },
    /// The pump acknowledged the request and refused it.
    Denied { coil: String },
    /// The value failed validation or encoding.
    Encode(EncodeError),
    /// The coil descriptor is read-only.
    NotWritable { coil: String },
    /// The remote device rejected the write.
    Device { coil: String, reason: String },
    /// The address range or operation is not supported on this transport.
    Unsupported { coil: String, reason: String },
    /// The connection was stopped while the call was waiting.
    ConnectionClosed { coil: String },
}

impl WriteError {
    /// I/O-class failures are retried within the connection's budget.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::SendFailed { .. })
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { coil, timeout } => write!(
                f,
                "timeout waiting for write feedback for {coil} after {:?}",
                timeout
            ),
            Self::SendFailed { coil, reason } => {
                write!(f, "failed to send write request for {coil}: {reason}")
            }
            Self::Denied { coil } => write!(f, "heat pump denied writing {coil}"),
            Self::Encode(err) => write!(f, "{err}"),
            Self::NotWritable { coil } => write!(f, "{coil} is not writable"),
            Self::Device { coil, reason } => {
                write!(f, "device rejected writing {coil}: {reason}")
            }
            Self::Unsupported { coil, reason } => {
                write!(f, "cannot write {coil}: {reason}")
            }
            Self::ConnectionClosed { coil } => {
                write!(f, "connection closed while writing {coil}")
            }
        }
    }
}

impl std::error::Error for WriteError {}

impl From<EncodeError> for WriteError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

/// Transport lifecycle failure.
#[derive(Debug)]
pub enum StartError {
    /// The listening address is already bound by another process.
    AddressInUse(SocketAddr),
    /// Any other socket or stream setup failure.
    Io(std::io::Error),
    /// The transport URL could not be parsed.
    BadUrl(BadTransportUrl),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressInUse(addr) => write!(f, "address {addr} already in use"),
            Self::Io(err) => write!(f, "failed to start connection: {err}"),
            Self::BadUrl(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StartError {}

impl From<std::io::Error> for StartError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// A transport URL the fieldbus connection cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadTransportUrl {
    pub url: String,
    pub reason: String,
}

impl fmt::Display for BadTransportUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad transport url {:?}: {}", self.url, self.reason)
    }
}

impl std::error::Error for BadTransportUrl {}

/// Failure of the connectivity check (read + write-back).
#[derive(Debug)]
pub enum VerifyError {
    Read(ReadError),
    Write(WriteError),
    CoilNotFound(CoilNotFound),
    /// The loaded model has no alarm-reset group to probe.
    NoAlarmResetCoil,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "connectivity check failed: {err}"),
            Self::Write(err) => write!(f, "connectivity check failed: {err}"),
            Self::CoilNotFound(err) => write!(f, "connectivity check failed: {err}"),
            Self::NoAlarmResetCoil => {
                write!(f, "connectivity check failed: no alarm reset coil for this series")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

impl From<ReadError> for VerifyError {
    fn from(err: ReadError) -> Self {
        Self::Read(err)
    }
}

impl From<WriteError> for VerifyError {
    fn from(err: WriteError) -> Self {
        Self::Write(err)
    }
}

impl From<CoilNotFound> for VerifyError {
    fn from(err: CoilNotFound) -> Self {
        Self::CoilNotFound(err)
    }
}
