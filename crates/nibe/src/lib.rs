// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # nibe - client library for Nibe heat pumps
//!
//! Talks to residential Nibe heat pumps over two wire paths behind a
//! single operation surface: the proprietary UDP framing of the
//! NibeGW bridge accessory, and Modbus TCP/RTU for pumps that expose
//! the bus directly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nibe::{Connection, HeatPump, Model, NibeGw, DEFAULT_TIMEOUT};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let heatpump = Arc::new(HeatPump::new(Model::F1255)?);
//! heatpump.subscribe(nibe::event::COIL_UPDATE_EVENT, |event| {
//!     println!("{event:?}");
//! });
//!
//! let connection = NibeGw::builder(heatpump.clone())
//!     .remote_ip("192.168.1.10".parse()?)
//!     .build();
//! connection.start().await?;
//!
//! let coil = heatpump.get_coil_by_address(40004)?;
//! let outdoor = connection.read_coil(coil, DEFAULT_TIMEOUT).await?;
//! println!("{outdoor}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     Connection facade                        |
//! |  read_coil | read_coils | write_coil | product info | verify |
//! +--------------------------------------------------------------+
//! |    NibeGw engine (UDP)       |     Modbus adapter (TCP/RTU)  |
//! |  frame codec | correlation   |  function-class routing       |
//! +--------------------------------------------------------------+
//! |        integer codec (widths, sentinels, word swap)          |
//! +--------------------------------------------------------------+
//! |   HeatPump registry (coil tables) | event bus | coil groups  |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HeatPump`] | Model registry: coil tables, events, word swap |
//! | [`Coil`] | Immutable register descriptor |
//! | [`CoilData`] | One typed reading bound to its descriptor |
//! | [`NibeGw`] | Request/response engine over the UDP bridge |
//! | [`Modbus`] | Fieldbus adapter (feature `modbus`, default on) |

/// Register descriptors and value carriers.
pub mod coil;
/// Static per-series register groups (climate systems, hot water, fans).
pub mod coil_groups;
/// Width-tagged integer codecs for both transports.
pub mod codec;
/// Connection facade and the two transport engines.
pub mod connection;
/// Error taxonomy.
pub mod errors;
/// Named-event subscription with listener fault isolation.
pub mod event;
/// Model registry and product identification.
pub mod heatpump;
/// NibeGW wire protocol (framing, checksums, payload grammar).
pub mod protocol;

pub use coil::{Coil, CoilData, CoilKind, CoilSize, CoilValue};
pub use codec::{CoilDataEncoderModbus, CoilDataEncoderNibeGw};
pub use connection::nibegw::{NibeGw, NibeGwBuilder, TableProcessingMode};
pub use connection::{
    verify_connectivity_read_write_alarm, Connection, ConnectionStatus, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT, READ_PRODUCT_INFO_TIMEOUT,
};
pub use errors::{
    BadTransportUrl, CoilError, CoilNotFound, DecodeError, EncodeError, HeatPumpError, ReadError,
    ReadErrorGroup, StartError, ValidationError, VerifyError, WriteError,
};
pub use event::{Event, EventBus};
pub use heatpump::{identify_model, HeatPump, Model, ProductInfo, Series};

#[cfg(feature = "modbus")]
pub use connection::modbus::{Modbus, ModbusFault, ModbusInterface, TokioModbusClient};

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
