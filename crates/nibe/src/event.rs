// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named-event subscription with per-listener fault isolation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::coil::CoilData;
use crate::connection::ConnectionStatus;
use crate::heatpump::ProductInfo;
use crate::protocol::rmu::RmuDataMessage;

/// Event name for decoded register updates.
pub const COIL_UPDATE_EVENT: &str = "coil_update";
/// Event name for connection state changes.
pub const CONNECTION_STATUS_EVENT: &str = "connection_status";
/// Event name for product information messages.
pub const PRODUCT_INFO_EVENT: &str = "product_info";
/// Event name for decoded room-unit telemetry.
pub const RMU_DATA_EVENT: &str = "rmu_data";

/// Payload delivered to event listeners.
#[derive(Debug)]
pub enum Event<'a> {
    CoilUpdate(&'a CoilData<'a>),
    ConnectionStatus(ConnectionStatus),
    ProductInfo(&'a ProductInfo),
    RmuData(&'a RmuDataMessage),
}

type Listener = Arc<dyn for<'a> Fn(&Event<'a>) + Send + Sync>;

/// Listener registry keyed by event name.
///
/// Listeners run synchronously in insertion order on the notifying
/// thread. A panicking listener is caught and logged; it never aborts
/// the remaining dispatch or the caller.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event_name`.
    pub fn subscribe<F>(&self, event_name: &str, listener: F)
    where
        F: for<'a> Fn(&Event<'a>) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Invoke every listener registered for `event_name`.
    pub fn notify(&self, event_name: &str, event: &Event<'_>) {
        // Snapshot outside the lock so listeners may subscribe again.
        let listeners: Vec<Listener> = match self.listeners.read().get(event_name) {
            Some(listeners) => listeners.clone(),
            None => return,
        };

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::error!("listener for event '{event_name}' panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("EventBus")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
