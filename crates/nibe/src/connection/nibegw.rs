// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response engine for the NibeGW UDP bridge.
//!
//! A single receive task parses inbound datagrams and completes the
//! futures installed by callers: per-address read waiters, one write
//! slot and one product-info slot. Frame emission is serialized by a
//! send lock; awaiting is not, so reads of distinct addresses can be
//! outstanding at the same time. Unsolicited table frames feed the
//! `coil_update` event even when no read is pending.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{hex_encode, CoilDataEncoderNibeGw};
use crate::coil::{Coil, CoilData};
use crate::connection::{
    verify_connectivity_read_write_alarm, Connection, ConnectionStatus, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT,
};
use crate::errors::{ReadError, StartError, VerifyError, WriteError};
use crate::event::{
    Event, EventBus, CONNECTION_STATUS_EVENT, PRODUCT_INFO_EVENT, RMU_DATA_EVENT,
};
use crate::heatpump::{HeatPump, ProductInfo};
use crate::protocol::frame::{self, Block, BlockStream};
use crate::protocol::message::{self, DataRow, Message};

/// Default UDP port the gateway listens on.
pub const DEFAULT_LISTENING_PORT: u16 = 9999;
/// Default peer port for read requests.
pub const DEFAULT_REMOTE_READ_PORT: u16 = 9999;
/// Default peer port for write requests.
pub const DEFAULT_REMOTE_WRITE_PORT: u16 = 10000;

/// Boolean register whose ON label means low-word-first 32-bit values.
const WORD_SWAP_ADDRESS: u16 = 48852;

/// How decode failures inside a table frame are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableProcessingMode {
    /// Failed rows are logged and skipped; the rest is emitted.
    #[default]
    Permissive,
    /// Any failed row suppresses the whole frame.
    Strict,
}

/// Configuration for [`NibeGw`].
pub struct NibeGwBuilder {
    heatpump: Arc<HeatPump>,
    remote_ip: Option<IpAddr>,
    remote_read_port: u16,
    remote_write_port: u16,
    listening_ip: IpAddr,
    listening_port: u16,
    retries: u32,
    table_mode: TableProcessingMode,
}

impl NibeGwBuilder {
    /// Address of the gateway. Leave unset to adopt the source of the
    /// first inbound datagram as the peer.
    #[must_use]
    pub fn remote_ip(mut self, ip: IpAddr) -> Self {
        self.remote_ip = Some(ip);
        self
    }

    #[must_use]
    pub fn remote_read_port(mut self, port: u16) -> Self {
        self.remote_read_port = port;
        self
    }

    #[must_use]
    pub fn remote_write_port(mut self, port: u16) -> Self {
        self.remote_write_port = port;
        self
    }

    /// Local address to bind. A multicast address is joined on the
    /// default interface and the socket binds the wildcard address.
    #[must_use]
    pub fn listening_ip(mut self, ip: IpAddr) -> Self {
        self.listening_ip = ip;
        self
    }

    /// Local port to bind; 0 picks an ephemeral port.
    #[must_use]
    pub fn listening_port(mut self, port: u16) -> Self {
        self.listening_port = port;
        self
    }

    /// Retry budget for I/O-class read and write failures.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    #[must_use]
    pub fn table_mode(mut self, mode: TableProcessingMode) -> Self {
        self.table_mode = mode;
        self
    }

    #[must_use]
    pub fn build(self) -> NibeGw {
        NibeGw {
            inner: Arc::new(Inner {
                heatpump: self.heatpump,
                remote_read_port: self.remote_read_port,
                remote_write_port: self.remote_write_port,
                listening_ip: self.listening_ip,
                listening_port: self.listening_port,
                retries: self.retries,
                table_mode: self.table_mode,
                remote_ip: RwLock::new(self.remote_ip),
                socket: RwLock::new(None),
                send_lock: tokio::sync::Mutex::new(()),
                read_waiters: DashMap::new(),
                write_waiter: Mutex::new(None),
                product_waiters: Mutex::new(Vec::new()),
                waiter_ids: AtomicU64::new(0),
                status: Mutex::new(ConnectionStatus::Unknown),
                events: EventBus::new(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Connection to a heat pump through a NibeGW UDP bridge.
pub struct NibeGw {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    heatpump: Arc<HeatPump>,
    remote_read_port: u16,
    remote_write_port: u16,
    listening_ip: IpAddr,
    listening_port: u16,
    retries: u32,
    table_mode: TableProcessingMode,
    remote_ip: RwLock<Option<IpAddr>>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    send_lock: tokio::sync::Mutex<()>,
    read_waiters: DashMap<u16, Vec<(u64, oneshot::Sender<[u8; 4]>)>>,
    write_waiter: Mutex<Option<oneshot::Sender<bool>>>,
    product_waiters: Mutex<Vec<(u64, oneshot::Sender<ProductInfo>)>>,
    waiter_ids: AtomicU64,
    status: Mutex<ConnectionStatus>,
    events: EventBus,
}

/// Removes this caller's read waiter on cancellation or completion.
struct ReadWaiterGuard<'a> {
    inner: &'a Inner,
    address: u16,
    id: u64,
}

impl Drop for ReadWaiterGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.inner.read_waiters.get_mut(&self.address) {
            entry.retain(|(id, _)| *id != self.id);
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.inner
                    .read_waiters
                    .remove_if(&self.address, |_, waiters| waiters.is_empty());
            }
        }
    }
}

impl NibeGw {
    /// Start configuring a connection for one heat pump.
    #[must_use]
    pub fn builder(heatpump: Arc<HeatPump>) -> NibeGwBuilder {
        NibeGwBuilder {
            heatpump,
            remote_ip: None,
            remote_read_port: DEFAULT_REMOTE_READ_PORT,
            remote_write_port: DEFAULT_REMOTE_WRITE_PORT,
            listening_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listening_port: DEFAULT_LISTENING_PORT,
            retries: DEFAULT_RETRIES,
            table_mode: TableProcessingMode::Permissive,
        }
    }

    #[must_use]
    pub fn heatpump(&self) -> &Arc<HeatPump> {
        &self.inner.heatpump
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock()
    }

    /// Local socket address once started. Useful when the listening
    /// port was 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .socket
            .read()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Append a listener for `connection_status`, `product_info` or
    /// `rmu_data` events. Coil updates are dispatched through the
    /// heat pump's own bus.
    pub fn subscribe<F>(&self, event_name: &str, listener: F)
    where
        F: for<'a> Fn(&Event<'a>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event_name, listener);
    }

    async fn start_impl(&self) -> Result<(), StartError> {
        let inner = &self.inner;
        inner.set_status(ConnectionStatus::Initializing);

        let socket = inner.bind_socket()?;
        let socket = Arc::new(UdpSocket::from_std(socket)?);
        log::info!(
            "listening for gateway datagrams on {}",
            socket.local_addr().map_or_else(|_| "?".to_string(), |a| a.to_string())
        );
        *inner.socket.write() = Some(socket.clone());
        inner.set_status(ConnectionStatus::Listening);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(receive_loop(inner.clone(), socket)));
        tasks.push(tokio::spawn(detect_word_swap(inner.clone())));
        Ok(())
    }

    async fn stop_impl(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.inner.socket.write() = None;
        // Dropping the senders fails every pending caller over.
        self.inner.read_waiters.clear();
        self.inner.write_waiter.lock().take();
        self.inner.product_waiters.lock().clear();
        self.inner.set_status(ConnectionStatus::Disconnected);
    }
}

impl Connection for NibeGw {
    async fn start(&self) -> Result<(), StartError> {
        self.start_impl().await
    }

    async fn stop(&self) {
        self.stop_impl().await;
    }

    async fn read_coil<'a>(
        &self,
        coil: &'a Coil,
        timeout: Duration,
    ) -> Result<CoilData<'a>, ReadError> {
        self.inner.read_coil_impl(coil, timeout).await
    }

    async fn write_coil(&self, data: &CoilData<'_>, timeout: Duration) -> Result<(), WriteError> {
        self.inner.write_coil_impl(data, timeout).await
    }

    async fn read_product_info(&self, timeout: Duration) -> Result<ProductInfo, ReadError> {
        self.inner.read_product_info_impl(timeout).await
    }

    async fn verify_connectivity(&self) -> Result<(), VerifyError> {
        let heatpump = self.inner.heatpump.clone();
        verify_connectivity_read_write_alarm(self, &heatpump).await
    }
}

impl Inner {
    fn next_waiter_id(&self) -> u64 {
        self.waiter_ids.fetch_add(1, Ordering::Relaxed)
    }

    fn bind_socket(&self) -> Result<std::net::UdpSocket, StartError> {
        let domain = if self.listening_ip.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let bind_ip = if self.listening_ip.is_multicast() {
            match self.listening_ip {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        } else {
            self.listening_ip
        };
        let bind_addr = SocketAddr::new(bind_ip, self.listening_port);
        socket.bind(&bind_addr.into()).map_err(|err| {
            if err.kind() == std::io::ErrorKind::AddrInUse {
                StartError::AddressInUse(bind_addr)
            } else {
                StartError::Io(err)
            }
        })?;

        match self.listening_ip {
            IpAddr::V4(group) if group.is_multicast() => {
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            }
            IpAddr::V6(group) if group.is_multicast() => {
                socket.join_multicast_v6(&group, 0)?;
            }
            _ => {}
        }

        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.lock();
        if *current == status {
            return;
        }
        *current = status;
        drop(current);
        log::info!("connection status: {status}");
        self.events
            .notify(CONNECTION_STATUS_EVENT, &Event::ConnectionStatus(status));
    }

    async fn send_to_peer(&self, data: &[u8], port: u16) -> Result<(), String> {
        let socket = self
            .socket
            .read()
            .clone()
            .ok_or_else(|| "connection not started".to_string())?;
        let ip = (*self.remote_ip.read()).ok_or_else(|| "peer address unknown".to_string())?;
        log::debug!("sending {} to {ip}:{port}", hex_encode(data));
        socket
            .send_to(data, (ip, port))
            .await
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    fn encoder(&self) -> CoilDataEncoderNibeGw {
        CoilDataEncoderNibeGw::new(self.heatpump.word_swap())
    }

    async fn read_coil_impl<'a>(
        &self,
        coil: &'a Coil,
        timeout: Duration,
    ) -> Result<CoilData<'a>, ReadError> {
        let address = coil.address;
        let id = self.next_waiter_id();
        let (tx, mut rx) = oneshot::channel();
        let leader = {
            let mut entry = self.read_waiters.entry(address).or_default();
            let leader = entry.is_empty();
            entry.push((id, tx));
            leader
        };
        let _guard = ReadWaiterGuard {
            inner: self,
            address,
            id,
        };

        if !leader {
            // A read for this address is already in flight; share its
            // response instead of emitting a second frame.
            return match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(raw)) => self.encoder().decode(coil, &raw).map_err(ReadError::from),
                Ok(Err(_)) => Err(ReadError::ConnectionClosed {
                    coil: coil.name.clone(),
                }),
                Err(_) => Err(ReadError::Timeout {
                    coil: coil.name.clone(),
                    timeout,
                }),
            };
        }

        let request = frame::build_read_request(address);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let sent = {
                let _send = self.send_lock.lock().await;
                self.send_to_peer(&request, self.remote_read_port).await
            };
            if let Err(reason) = sent {
                log::warn!(
                    "read request for {} failed to send (attempt {attempt}/{}): {reason}",
                    coil.name,
                    self.retries
                );
                if attempt >= self.retries {
                    return Err(ReadError::SendFailed {
                        coil: coil.name.clone(),
                        reason,
                    });
                }
                continue;
            }

            match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(raw)) => {
                    return self.encoder().decode(coil, &raw).map_err(ReadError::from);
                }
                Ok(Err(_)) => {
                    return Err(ReadError::ConnectionClosed {
                        coil: coil.name.clone(),
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
        let raw = self.encoder().encode(data)?;
        let request = frame::build_write_request(coil.address, raw);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let (tx, rx) = oneshot::channel();
            let sent = {
                let _send = self.send_lock.lock().await;
                *self.write_waiter.lock() = Some(tx);
                self.send_to_peer(&request, self.remote_write_port).await
            };
            if let Err(reason) = sent {
                self.write_waiter.lock().take();
                log::warn!(
                    "write request for {} failed to send (attempt {attempt}/{}): {reason}",
                    coil.name,
                    self.retries
                );
                if attempt >= self.retries {
                    return Err(WriteError::SendFailed {
                        coil: coil.name.clone(),
                        reason,
                    });
                }
                continue;
            }

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(true)) => {
                    log::info!("write succeeded for {}", coil.name);
                    return Ok(());
                }
                Ok(Ok(false)) => {
                    return Err(WriteError::Denied {
                        coil: coil.name.clone(),
                    });
                }
                Ok(Err(_)) => {
                    return Err(WriteError::ConnectionClosed {
                        coil: coil.name.clone(),
                    });
                }
                Err(_) => {
                    self.write_waiter.lock().take();
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

    async fn read_product_info_impl(&self, timeout: Duration) -> Result<ProductInfo, ReadError> {
        // The pump announces itself periodically; nothing is sent.
        let id = self.next_waiter_id();
        let (tx, mut rx) = oneshot::channel();
        self.product_waiters.lock().push((id, tx));

        let result = tokio::time::timeout(timeout, &mut rx).await;
        self.product_waiters.lock().retain(|(i, _)| *i != id);

        match result {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(_)) => Err(ReadError::ConnectionClosed {
                coil: "product-info".to_string(),
            }),
            Err(_) => Err(ReadError::ProductInfoTimeout { timeout }),
        }
    }

    fn complete_read_waiters(&self, address: u16, raw: [u8; 4]) {
        if let Some((_, waiters)) = self.read_waiters.remove(&address) {
            for (_, tx) in waiters {
                let _ = tx.send(raw);
            }
        }
    }

    fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        log::debug!("received {} from {peer}", hex_encode(data));

        if self.remote_ip.read().is_none() {
            log::info!("adopting {} as the heat pump address", peer.ip());
            *self.remote_ip.write() = Some(peer.ip());
        }
        self.set_status(ConnectionStatus::Connected);

        for block in BlockStream::new(data) {
            match block {
                Ok(Block::Response(response)) => self.handle_response(&response),
                Ok(Block::Request(request)) => match message::decode_request(&request) {
                    Ok(msg) => log::debug!("ignoring request block from {peer}: {msg:?}"),
                    Err(err) => log::warn!("bad request block from {peer}: {err}"),
                },
                Ok(Block::Ack) => log::debug!("ack from {peer}"),
                Ok(Block::Nak) => log::debug!("nak from {peer}"),
                Err(err) => {
                    log::warn!(
                        "dropping malformed block from {peer}: {err} ({})",
                        hex_encode(data)
                    );
                }
            }
        }
    }

    fn handle_response(&self, response: &frame::ResponseFrame) {
        let msg = match message::decode_response(response) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("failed to decode response payload: {err}");
                return;
            }
        };

        match msg {
            Message::ModbusReadResponse { address, raw } => {
                self.complete_read_waiters(address, raw);
                self.emit_coil_update(address, &raw);
            }
            Message::ModbusDataMessage(rows) => self.handle_table_frame(&rows),
            Message::ModbusWriteResponse { accepted } => {
                if let Some(tx) = self.write_waiter.lock().take() {
                    let _ = tx.send(accepted);
                } else {
                    log::debug!("write response with no write in flight");
                }
            }
            Message::ProductInfoMessage(info) => {
                log::info!("product info: {info}");
                self.events
                    .notify(PRODUCT_INFO_EVENT, &Event::ProductInfo(&info));
                for (_, tx) in self.product_waiters.lock().drain(..) {
                    let _ = tx.send(info.clone());
                }
            }
            Message::RmuDataMessage(rmu) => {
                self.events.notify(RMU_DATA_EVENT, &Event::RmuData(&rmu));
            }
            Message::StringMessage { id, text } => {
                log::debug!("string message {id}: {text}");
            }
            Message::ModbusAddressMessage { address } => {
                log::debug!("gateway modbus address is {address:#04x}");
            }
            Message::Unknown { command, payload } => {
                log::debug!(
                    "unknown command {command:#04x} with payload {}",
                    hex_encode(&payload)
                );
            }
            other => log::debug!("ignoring {other:?}"),
        }
    }

    fn emit_coil_update(&self, address: u16, raw: &[u8]) {
        let coil = match self.heatpump.get_coil_by_address(address) {
            Ok(coil) => coil,
            Err(_) => {
                log::warn!("unable to decode: coil {address} not found");
                return;
            }
        };
        match self.encoder().decode(coil, raw) {
            Ok(data) => {
                log::info!("{data}");
                self.heatpump.notify_coil_update(&data);
            }
            Err(err) => log::error!("unable to decode: {err}"),
        }
    }

    /// Decode a table frame and emit updates in ascending address
    /// order. 32-bit registers span two consecutive rows (low word
    /// first); rows at 0xFFFF are padding.
    fn handle_table_frame(&self, rows: &[DataRow]) {
        let mut table: BTreeMap<u16, [u8; 2]> = BTreeMap::new();
        for row in rows {
            if row.is_padding() {
                continue;
            }
            table.insert(row.address, row.raw);
        }

        let strict = self.table_mode == TableProcessingMode::Strict;
        let encoder = self.encoder();
        let mut updates: Vec<(CoilData<'_>, [u8; 4])> = Vec::new();
        let mut suppress = false;

        let mut iter = table.iter().peekable();
        while let Some((&address, &low)) = iter.next() {
            let coil = match self.heatpump.get_coil_by_address(address) {
                Ok(coil) => coil,
                Err(_) => {
                    log::debug!("table row for unknown coil {address}");
                    continue;
                }
            };

            let raw: [u8; 4] = if coil.size.is_32bit() {
                let high = match iter.peek() {
                    Some(&(&next, &high)) if next == address.wrapping_add(1) => Some(high),
                    _ => None,
                };
                match high {
                    Some(high) => {
                        iter.next();
                        [low[0], low[1], high[0], high[1]]
                    }
                    None => {
                        log::warn!("32-bit coil {} is missing its high word row", coil.name);
                        if strict {
                            suppress = true;
                        }
                        continue;
                    }
                }
            } else {
                [low[0], low[1], 0, 0]
            };

            match encoder.decode(coil, &raw) {
                Ok(data) => updates.push((data, raw)),
                Err(err) => {
                    log::warn!("failed to decode table row: {err}");
                    if strict {
                        suppress = true;
                    }
                }
            }
        }

        if suppress {
            log::warn!("suppressing table frame because a row failed to decode");
            return;
        }

        for (data, raw) in &updates {
            log::info!("{data}");
            self.heatpump.notify_coil_update(data);
            self.complete_read_waiters(data.coil.address, *raw);
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; 2048];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => inner.handle_datagram(&buf[..len], peer),
            Err(err) => log::warn!("receive failed: {err}"),
        }
    }
}

/// Probe the word-swap setting once a peer is known, unless the heat
/// pump was configured with one already.
async fn detect_word_swap(inner: Arc<Inner>) {
    if inner.heatpump.word_swap().is_some() {
        return;
    }
    let Ok(coil) = inner.heatpump.get_coil_by_address(WORD_SWAP_ADDRESS) else {
        log::debug!("model has no word swap coil, skipping auto detection");
        return;
    };

    while inner.remote_ip.read().is_none() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    match inner.read_coil_impl(coil, DEFAULT_TIMEOUT).await {
        Ok(data) => match data.bool_value() {
            Some(word_swap) => {
                inner.heatpump.set_word_swap(word_swap);
                log::info!("detected word swap: {word_swap}");
            }
            None => log::warn!("word swap coil reported no usable value"),
        },
        Err(err) => {
            // 32-bit operations keep failing with a configuration
            // error until the setting is resolved.
            log::warn!("word swap auto detection failed: {err}");
        }
    }
}
