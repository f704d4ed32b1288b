// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fieldbus adapter for pumps that expose Modbus TCP or RTU directly.
//!
//! The coil address space partitions into Modbus function classes by
//! `address / 10000`: 0 digital coils, 1 discrete inputs, 3 input
//! registers, 4 holding registers. Each call issues exactly one bus
//! operation with a register count of 1, or 2 for 32-bit widths.
//!
//! The bus client sits behind [`ModbusInterface`] so the adapter can
//! be exercised without a PLC; the production implementation wraps
//! `tokio-modbus` contexts built from a transport URL.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::Slave;
use tokio_serial::SerialStream;

use crate::codec::CoilDataEncoderModbus;
use crate::coil::{Coil, CoilData};
use crate::connection::{
    verify_connectivity_read_write_alarm, Connection, DEFAULT_RETRIES,
};
use crate::errors::{BadTransportUrl, ReadError, StartError, VerifyError, WriteError};
use crate::heatpump::HeatPump;

/// Default Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;
/// Default RTU baud rate.
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// One fault of the underlying bus client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusFault {
    /// Transport-level failure; retried within the budget.
    Io(String),
    /// The device answered with a Modbus exception; not retried.
    Protocol(String),
}

impl ModbusFault {
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl fmt::Display for ModbusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(reason) => write!(f, "bus transport error: {reason}"),
            Self::Protocol(reason) => write!(f, "bus exception: {reason}"),
        }
    }
}

impl std::error::Error for ModbusFault {}

/// Seam over the bus client, one method per Modbus function the
/// adapter uses. Digital values travel as 0/1 words.
pub trait ModbusInterface {
    /// Establish the transport. A no-op for test doubles.
    async fn connect(&self) -> Result<(), StartError> {
        Ok(())
    }

    /// Drop the transport. A no-op for test doubles.
    async fn close(&self) {}

    async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<u16>, ModbusFault>;

    async fn read_discrete_inputs(&self, address: u16, count: u16)
        -> Result<Vec<u16>, ModbusFault>;

    async fn read_input_registers(&self, address: u16, count: u16)
        -> Result<Vec<u16>, ModbusFault>;

    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault>;

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), ModbusFault>;

    async fn write_coils(&self, address: u16, values: &[u16]) -> Result<(), ModbusFault>;
}

/// Map a coil onto its Modbus function class, zero-based register
/// offset and register count.
pub(crate) fn split_modbus_data(coil: &Coil) -> Result<(u16, u16, u16), String> {
    let entity_type = coil.address / 10000;
    let slot = coil.address % 10000;
    if slot == 0 {
        return Err(format!("coil address {} has no register offset", coil.address));
    }
    let count = coil.size.register_count() as u16;
    Ok((entity_type, slot - 1, count))
}

/// Connection over a Modbus TCP or RTU transport.
pub struct Modbus<C = TokioModbusClient>
where
    C: ModbusInterface,
{
    heatpump: Arc<HeatPump>,
    client: C,
    retries: u32,
}

impl Modbus<TokioModbusClient> {
    /// Build a connection from a transport URL (`tcp://host[:port]` or
    /// `rtu://device[?baudrate=N]`). The transport is established by
    /// [`Connection::start`].
    pub fn new(
        heatpump: Arc<HeatPump>,
        url: &str,
        slave_id: u8,
    ) -> Result<Self, BadTransportUrl> {
        let url = parse_transport_url(url)?;
        Ok(Self {
            heatpump,
            client: TokioModbusClient::new(url, slave_id),
            retries: DEFAULT_RETRIES,
        })
    }
}

impl<C: ModbusInterface> Modbus<C> {
    /// Build a connection over a custom bus client.
    #[must_use]
    pub fn with_interface(heatpump: Arc<HeatPump>, client: C) -> Self {
        Self {
            heatpump,
            client,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Retry budget for I/O-class failures.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    #[must_use]
    pub fn heatpump(&self) -> &Arc<HeatPump> {
        &self.heatpump
    }

    fn encoder(&self) -> CoilDataEncoderModbus {
        CoilDataEncoderModbus::new(self.heatpump.word_swap())
    }

    async fn dispatch_read(
        &self,
        entity_type: u16,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        match entity_type {
            0 => self.client.read_coils(address, count).await,
            1 => self.client.read_discrete_inputs(address, count).await,
            3 => self.client.read_input_registers(address, count).await,
            4 => self.client.read_holding_registers(address, count).await,
            _ => unreachable!("entity type validated by the caller"),
        }
    }

    async fn read_coil_impl<'a>(
        &self,
        coil: &'a Coil,
        timeout: Duration,
    ) -> Result<CoilData<'a>, ReadError> {
        let (entity_type, address, count) =
            split_modbus_data(coil).map_err(|reason| ReadError::Unsupported {
                coil: coil.name.clone(),
                reason,
            })?;
        if !matches!(entity_type, 0 | 1 | 3 | 4) {
            return Err(ReadError::Unsupported {
                coil: coil.name.clone(),
                reason: format!("unsupported entity type {entity_type}"),
            });
        }

        log::debug!(
            "reading {} (entity type {entity_type}, register {address}, count {count})",
            coil.name
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(timeout, self.dispatch_read(entity_type, address, count))
                .await
            {
                Ok(Ok(registers)) => {
                    let data = self
                        .encoder()
                        .decode(coil, &registers)
                        .map_err(ReadError::from)?;
                    log::info!("{data}");
                    self.heatpump.notify_coil_update(&data);
                    return Ok(data);
                }
                Ok(Err(fault)) if fault.is_io() => {
                    log::warn!(
                        "read of {} failed (attempt {attempt}/{}): {fault}",
                        coil.name,
                        self.retries
                    );
                    if attempt >= self.retries {
                        return Err(ReadError::SendFailed {
                            coil: coil.name.clone(),
                            reason: fault.to_string(),
                        });
                    }
                }
                Ok(Err(fault)) => {
                    return Err(ReadError::Device {
                        coil: coil.name.clone(),
                        reason: fault.to_string(),
                    });
                }
                Err(_) => {
                    log::debug!(
                        "no read response for {} within {timeout:?} (attempt {attempt}/{})",
                        coil.name,
                        self.retries
                    );
                    if attempt >= self.retries {
                        return Err(ReadError::Timeout {
                            coil: coil.name.clone(),
                            timeout,
                        });
                    }
                }
            }
        }
    }

    async fn write_coil_impl(
        &self,
        data: &CoilData<'_>,
        timeout: Duration,
    ) -> Result<(), WriteError> {
        let coil = data.coil;
        if !coil.is_writable() {
            return Err(WriteError::NotWritable {
                coil: coil.name.clone(),
            });
        }
        let (entity_type, address, _) =
            split_modbus_data(coil).map_err(|reason| WriteError::Unsupported {
                coil: coil.name.clone(),
                reason,
            })?;
        if !matches!(entity_type, 0 | 4) {
            return Err(WriteError::Unsupported {
                coil: coil.name.clone(),
                reason: format!("entity type {entity_type} is read-only"),
            });
        }
        let registers = self.encoder().encode(data)?;

        log::debug!(
            "writing {} (entity type {entity_type}, register {address})",
            coil.name
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            let write = async {
                if entity_type == 4 {
                    self.client.write_registers(address, &registers).await
                } else {
                    self.client.write_coils(address, &registers).await
                }
            };
            match tokio::time::timeout(timeout, write).await {
                Ok(Ok(())) => {
                    log::info!("write succeeded for {}", coil.name);
                    return Ok(());
                }
                Ok(Err(fault)) if fault.is_io() => {
                    log::warn!(
                        "write of {} failed (attempt {attempt}/{}): {fault}",
                        coil.name,
                        self.retries
                    );
                    if attempt >= self.retries {
                        return Err(WriteError::SendFailed {
                            coil: coil.name.clone(),
                            reason: fault.to_string(),
                        });
                    }
                }
                Ok(Err(fault)) => {
                    return Err(WriteError::Device {
                        coil: coil.name.clone(),
                        reason: fault.to_string(),
                    });
                }
                Err(_) => {
                    log::debug!(
                        "no write feedback for {} within {timeout:?} (attempt {attempt}/{})",
                        coil.name,
                        self.retries
                    );
                    if attempt >= self.retries {
                        return Err(WriteError::Timeout {
                            coil: coil.name.clone(),
                            timeout,
                        });
                    }
                }
            }
        }
    }
}

impl<C: ModbusInterface> Connection for Modbus<C> {
    async fn start(&self) -> Result<(), StartError> {
        self.client.connect().await
    }

    async fn stop(&self) {
        self.client.close().await;
    }

    async fn read_coil<'a>(
        &self,
        coil: &'a Coil,
        timeout: Duration,
    ) -> Result<CoilData<'a>, ReadError> {
        self.read_coil_impl(coil, timeout).await
    }

    async fn write_coil(&self, data: &CoilData<'_>, timeout: Duration) -> Result<(), WriteError> {
        self.write_coil_impl(data, timeout).await
    }

    async fn verify_connectivity(&self) -> Result<(), VerifyError> {
        let heatpump = self.heatpump.clone();
        verify_connectivity_read_write_alarm(self, &heatpump).await
    }
}

/// Parsed transport URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportUrl {
    Tcp { host: String, port: u16 },
    Rtu { device: String, baudrate: u32 },
}

pub(crate) fn parse_transport_url(url: &str) -> Result<TransportUrl, BadTransportUrl> {
    let bad = |reason: &str| BadTransportUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if let Some(rest) = url.strip_prefix("tcp://") {
        let (host, port) = if let Some(end) = rest.strip_prefix('[').and_then(|r| r.find(']')) {
            // bracketed IPv6 literal
            let host = &rest[1..=end];
            match rest[end + 2..].strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if rest.len() == end + 2 => (host, None),
                None => return Err(bad("junk after IPv6 literal")),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };
        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| bad("invalid port"))?,
            None => DEFAULT_TCP_PORT,
        };
        return Ok(TransportUrl::Tcp {
            host: host.to_string(),
            port,
        });
    }

    if let Some(rest) = url.strip_prefix("rtu://") {
        let (device, query) = match rest.split_once('?') {
            Some((device, query)) => (device, Some(query)),
            None => (rest, None),
        };
        if device.is_empty() {
            return Err(bad("missing device path"));
        }
        let mut baudrate = DEFAULT_BAUDRATE;
        if let Some(query) = query {
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some(("baudrate", value)) => {
                        baudrate = value.parse().map_err(|_| bad("invalid baudrate"))?;
                    }
                    _ => return Err(bad("unknown query parameter")),
                }
            }
        }
        return Ok(TransportUrl::Rtu {
            device: device.to_string(),
            baudrate,
        });
    }

    Err(bad("unsupported scheme, expected tcp:// or rtu://"))
}

/// `tokio-modbus` backed bus client.
pub struct TokioModbusClient {
    url: TransportUrl,
    slave_id: u8,
    context: tokio::sync::Mutex<Option<Context>>,
}

impl TokioModbusClient {
    fn new(url: TransportUrl, slave_id: u8) -> Self {
        Self {
            url,
            slave_id,
            context: tokio::sync::Mutex::new(None),
        }
    }
}

/// Collapse the client's nested result into a [`ModbusFault`].
fn flatten<T, E1: fmt::Display, E2: fmt::Display>(
    result: Result<Result<T, E2>, E1>,
) -> Result<T, ModbusFault> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(ModbusFault::Protocol(exception.to_string())),
        Err(err) => Err(ModbusFault::Io(err.to_string())),
    }
}

impl ModbusInterface for TokioModbusClient {
    async fn connect(&self) -> Result<(), StartError> {
        let context = match &self.url {
            TransportUrl::Tcp { host, port } => {
                let addr = tokio::net::lookup_host((host.as_str(), *port))
                    .await?
                    .next()
                    .ok_or_else(|| {
                        StartError::Io(std::io::Error::other(format!(
                            "no address found for {host}"
                        )))
                    })?;
                log::info!("connecting to modbus tcp slave {} at {addr}", self.slave_id);
                tokio_modbus::client::tcp::connect_slave(addr, Slave(self.slave_id))
                    .await
                    .map_err(|err| StartError::Io(std::io::Error::other(err.to_string())))?
            }
            TransportUrl::Rtu { device, baudrate } => {
                log::info!(
                    "attaching to modbus rtu slave {} on {device} ({baudrate} baud)",
                    self.slave_id
                );
                let stream = SerialStream::open(&tokio_serial::new(device, *baudrate))
                    .map_err(|err| StartError::Io(std::io::Error::other(err.to_string())))?;
                tokio_modbus::client::rtu::attach_slave(stream, Slave(self.slave_id))
            }
        };
        *self.context.lock().await = Some(context);
        Ok(())
    }

    async fn close(&self) {
        self.context.lock().await.take();
    }

    async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<u16>, ModbusFault> {
        let mut guard = self.context.lock().await;
        let context = not_started(guard.as_mut())?;
        let coils = flatten(context.read_coils(address, count).await)?;
        Ok(coils.into_iter().map(u16::from).collect())
    }

    async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        let mut guard = self.context.lock().await;
        let context = not_started(guard.as_mut())?;
        let inputs = flatten(context.read_discrete_inputs(address, count).await)?;
        Ok(inputs.into_iter().map(u16::from).collect())
    }

    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        let mut guard = self.context.lock().await;
        let context = not_started(guard.as_mut())?;
        flatten(context.read_input_registers(address, count).await)
    }

    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        let mut guard = self.context.lock().await;
        let context = not_started(guard.as_mut())?;
        flatten(context.read_holding_registers(address, count).await)
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), ModbusFault> {
        let mut guard = self.context.lock().await;
        let context = not_started(guard.as_mut())?;
        flatten(context.write_multiple_registers(address, values).await)
    }

    async fn write_coils(&self, address: u16, values: &[u16]) -> Result<(), ModbusFault> {
        let coils: Vec<bool> = values.iter().map(|&value| value != 0).collect();
        let mut guard = self.context.lock().await;
        let context = not_started(guard.as_mut())?;
        flatten(context.write_multiple_coils(address, &coils).await)
    }
}

fn not_started(context: Option<&mut Context>) -> Result<&mut Context, ModbusFault> {
    context.ok_or_else(|| ModbusFault::Io("connection not started".to_string()))
}
