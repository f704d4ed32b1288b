// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The uniform operation surface over both transports.

use std::fmt;
use std::time::Duration;

use futures_lite::Stream;

use crate::coil::{Coil, CoilData};
use crate::coil_groups::unit_coil_group;
use crate::errors::{ReadError, ReadErrorGroup, StartError, VerifyError, WriteError};
use crate::heatpump::{HeatPump, ProductInfo};

pub mod nibegw;

#[cfg(feature = "modbus")]
pub mod modbus;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Product info is broadcast roughly every 15 seconds, so its default
/// timeout is one announcement period plus slack.
pub const READ_PRODUCT_INFO_TIMEOUT: Duration = Duration::from_secs(20);

/// Default retry budget for I/O-class failures.
pub const DEFAULT_RETRIES: u32 = 3;

/// Lifecycle state of a connection.
///
/// The state moves monotonically through Initializing, Listening and
/// Connected; any state can drop to Disconnected on stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Initializing,
    Listening,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Unknown => "unknown",
            Self::Initializing => "initializing",
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(value)
    }
}

struct ReadCoilsState<'a> {
    iter: std::vec::IntoIter<&'a Coil>,
    errors: Vec<ReadError>,
    done: bool,
}

/// Common operation surface of the UDP engine and the fieldbus
/// adapter.
pub trait Connection {
    /// Bring up sockets and background tasks. A no-op by default.
    async fn start(&self) -> Result<(), StartError> {
        Ok(())
    }

    /// Tear down sockets and background tasks. A no-op by default.
    async fn stop(&self) {}

    /// Read one coil and return its decoded value.
    async fn read_coil<'a>(
        &self,
        coil: &'a Coil,
        timeout: Duration,
    ) -> Result<CoilData<'a>, ReadError>;

    /// Write one validated coil value.
    async fn write_coil(&self, data: &CoilData<'_>, timeout: Duration) -> Result<(), WriteError>;

    /// Wait for the pump's product announcement.
    async fn read_product_info(&self, timeout: Duration) -> Result<ProductInfo, ReadError> {
        let _ = timeout;
        Err(ReadError::Unsupported {
            coil: "product-info".to_string(),
            reason: "not available on this connection".to_string(),
        })
    }

    /// Prove two-way communication with the pump.
    async fn verify_connectivity(&self) -> Result<(), VerifyError>;

    /// Read many coils lazily.
    ///
    /// Failed reads never interrupt the sequence; their errors are
    /// collected and yielded once as a [`ReadErrorGroup`] after the
    /// last successful item.
    fn read_coils<'a>(
        &'a self,
        coils: Vec<&'a Coil>,
        timeout: Duration,
    ) -> impl Stream<Item = Result<CoilData<'a>, ReadErrorGroup>> + 'a
    where
        Self: Sized,
    {
        let state = ReadCoilsState {
            iter: coils.into_iter(),
            errors: Vec::new(),
            done: false,
        };
        futures_lite::stream::unfold((self, state), move |(this, mut state)| async move {
            if state.done {
                return None;
            }
            loop {
                match state.iter.next() {
                    Some(coil) => match this.read_coil(coil, timeout).await {
                        Ok(data) => return Some((Ok(data), (this, state))),
                        Err(err) => state.errors.push(err),
                    },
                    None => {
                        if state.errors.is_empty() {
                            return None;
                        }
                        state.done = true;
                        let group = ReadErrorGroup::new(std::mem::take(&mut state.errors));
                        return Some((Err(group), (this, state)));
                    }
                }
            }
        })
    }
}

/// Read the series' alarm-reset coil and write the value straight
/// back. The pump ignores the written value, so a full round trip
/// proves both directions without side effects.
pub async fn verify_connectivity_read_write_alarm<C: Connection>(
    connection: &C,
    heatpump: &HeatPump,
) -> Result<(), VerifyError> {
    let group =
        unit_coil_group(heatpump.series(), "main").ok_or(VerifyError::NoAlarmResetCoil)?;
    let coil = heatpump.get_coil_by_address(group.alarm_reset)?;
    let data = connection.read_coil(coil, DEFAULT_TIMEOUT).await?;
    connection.write_coil(&data, DEFAULT_TIMEOUT).await?;
    Ok(())
}
