// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fieldbus adapter tests over a scripted mock bus client.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_lite::StreamExt;
use nibe::event::Event;
use nibe::{
    Coil, CoilData, CoilSize, CoilValue, Connection, DecodeError, HeatPump, Model, Modbus,
    ModbusFault, ModbusInterface, ReadError, WriteError, DEFAULT_TIMEOUT,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    ReadCoils(u16, u16),
    ReadDiscreteInputs(u16, u16),
    ReadInputRegisters(u16, u16),
    ReadHoldingRegisters(u16, u16),
    WriteRegisters(u16, Vec<u16>),
    WriteCoils(u16, Vec<u16>),
}

#[derive(Default)]
struct MockState {
    reads: Mutex<VecDeque<Result<Vec<u16>, ModbusFault>>>,
    writes: Mutex<VecDeque<Result<(), ModbusFault>>>,
    calls: Mutex<Vec<Call>>,
}

/// Scripted bus client: queued read results are popped in order; an
/// empty queue never answers (for timeout tests). Writes default to
/// success.
#[derive(Default, Clone)]
struct MockBus {
    state: Arc<MockState>,
}

impl MockBus {
    fn queue_read(&self, result: Result<Vec<u16>, ModbusFault>) {
        self.state.reads.lock().push_back(result);
    }

    fn queue_write(&self, result: Result<(), ModbusFault>) {
        self.state.writes.lock().push_back(result);
    }

    fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    async fn next_read(&self, call: Call) -> Result<Vec<u16>, ModbusFault> {
        self.state.calls.lock().push(call);
        let next = self.state.reads.lock().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    fn next_write(&self, call: Call) -> Result<(), ModbusFault> {
        self.state.calls.lock().push(call);
        self.state.writes.lock().pop_front().unwrap_or(Ok(()))
    }
}

impl ModbusInterface for MockBus {
    async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<u16>, ModbusFault> {
        self.next_read(Call::ReadCoils(address, count)).await
    }

    async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        self.next_read(Call::ReadDiscreteInputs(address, count)).await
    }

    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        self.next_read(Call::ReadInputRegisters(address, count)).await
    }

    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusFault> {
        self.next_read(Call::ReadHoldingRegisters(address, count))
            .await
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), ModbusFault> {
        self.next_write(Call::WriteRegisters(address, values.to_vec()))
    }

    async fn write_coils(&self, address: u16, values: &[u16]) -> Result<(), ModbusFault> {
        self.next_write(Call::WriteCoils(address, values.to_vec()))
    }
}

fn setup() -> (Modbus<MockBus>, MockBus, Arc<HeatPump>) {
    let heatpump = Arc::new(HeatPump::new(Model::S1255).unwrap());
    heatpump.set_word_swap(true);
    let bus = MockBus::default();
    let connection = Modbus::with_interface(heatpump.clone(), bus.clone());
    (connection, bus, heatpump)
}

fn coil(address: u16, size: CoilSize) -> Coil {
    Coil::builder(address, "test", "test", size).build().unwrap()
}

fn writable_coil(address: u16, size: CoilSize) -> Coil {
    Coil::builder(address, "test", "test", size)
        .writable()
        .build()
        .unwrap()
}

#[tokio::test]
async fn read_holding_registers_by_width() {
    let cases: &[(CoilSize, &[u16], f64)] = &[
        (CoilSize::U32, &[1, 0], 1.0),
        (CoilSize::U32, &[0, 32768], 2_147_483_648.0),
        (CoilSize::U16, &[1], 1.0),
        (CoilSize::U16, &[32768], 32768.0),
        (CoilSize::U8, &[1], 1.0),
        (CoilSize::U8, &[128], 128.0),
    ];
    for &(size, raw, expected) in cases {
        let (connection, bus, _heatpump) = setup();
        bus.queue_read(Ok(raw.to_vec()));

        let coil = coil(40001, size);
        let data = connection.read_coil(&coil, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(data.value, Some(CoilValue::Number(expected)), "{size}");
        assert_eq!(
            bus.calls(),
            vec![Call::ReadHoldingRegisters(0, size.register_count() as u16)]
        );
    }
}

#[tokio::test]
async fn read_input_registers_with_sign() {
    let cases: &[(CoilSize, &[u16], f64)] = &[
        (CoilSize::U32, &[1, 0], 1.0),
        (CoilSize::S32, &[0xFFF6, 0xFFFF], -10.0),
        (CoilSize::U16, &[1], 1.0),
        (CoilSize::S16, &[0xFFF6], -10.0),
        (CoilSize::U8, &[1], 1.0),
    ];
    for &(size, raw, expected) in cases {
        let (connection, bus, _heatpump) = setup();
        bus.queue_read(Ok(raw.to_vec()));

        let coil = coil(30001, size);
        let data = connection.read_coil(&coil, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(data.value, Some(CoilValue::Number(expected)), "{size}");
        assert_eq!(
            bus.calls(),
            vec![Call::ReadInputRegisters(0, size.register_count() as u16)]
        );
    }
}

#[tokio::test]
async fn read_discrete_inputs_and_coils() {
    for &(address, raw, expected) in &[(10001u16, 1u16, 1.0f64), (10001, 0, 0.0)] {
        let (connection, bus, _heatpump) = setup();
        bus.queue_read(Ok(vec![raw]));
        let coil = coil(address, CoilSize::U8);
        let data = connection.read_coil(&coil, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(data.value, Some(CoilValue::Number(expected)));
        assert_eq!(bus.calls(), vec![Call::ReadDiscreteInputs(0, 1)]);
    }

    for &(address, raw, expected) in &[(1u16, 1u16, 1.0f64), (1, 0, 0.0)] {
        let (connection, bus, _heatpump) = setup();
        bus.queue_read(Ok(vec![raw]));
        let coil = coil(address, CoilSize::U8);
        let data = connection.read_coil(&coil, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(data.value, Some(CoilValue::Number(expected)));
        assert_eq!(bus.calls(), vec![Call::ReadCoils(0, 1)]);
    }
}

#[tokio::test]
async fn write_holding_registers_by_width() {
    let cases: &[(CoilSize, f64, &[u16])] = &[
        (CoilSize::U32, 1.0, &[1, 0]),
        (CoilSize::U32, 2_147_483_648.0, &[0, 32768]),
        (CoilSize::U16, 1.0, &[1]),
        (CoilSize::U16, 32768.0, &[32768]),
        (CoilSize::U8, 1.0, &[1]),
        (CoilSize::U8, 128.0, &[128]),
    ];
    for &(size, value, expected) in cases {
        let (connection, bus, _heatpump) = setup();
        let coil = writable_coil(40002, size);
        let data = CoilData::new(&coil, value);
        connection.write_coil(&data, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(
            bus.calls(),
            vec![Call::WriteRegisters(1, expected.to_vec())],
            "{size}"
        );
    }
}

#[tokio::test]
async fn write_digital_coils_sign_extends() {
    let cases: &[(CoilSize, f64, &[u16])] = &[
        (CoilSize::U8, 1.0, &[1]),
        (CoilSize::U8, 0.0, &[0]),
        (CoilSize::S8, -10.0, &[0xFFF6]),
        (CoilSize::S16, -10.0, &[0xFFF6]),
        (CoilSize::S32, -10.0, &[0xFFF6, 0xFFFF]),
    ];
    for &(size, value, expected) in cases {
        let (connection, bus, _heatpump) = setup();
        let coil = writable_coil(2, size);
        let data = CoilData::new(&coil, value);
        connection.write_coil(&data, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(bus.calls(), vec![Call::WriteCoils(1, expected.to_vec())], "{size}");
    }
}

#[tokio::test]
async fn read_out_of_bounds_is_a_decode_error() {
    let (connection, bus, _heatpump) = setup();
    bus.queue_read(Ok(vec![0]));

    let coil = Coil::builder(1, "test", "test", CoilSize::U8)
        .min(1)
        .max(2)
        .build()
        .unwrap();
    let err = connection
        .read_coil(&coil, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReadError::Decode(DecodeError::OutOfBounds { .. })
    ));
}

#[tokio::test]
async fn read_coils_stream_aggregates_bus_failures() {
    let (connection, bus, _heatpump) = setup();
    let connection = connection.retries(1);
    bus.queue_read(Err(ModbusFault::Io("connection reset".to_string())));

    let coil = coil(1, CoilSize::U8);
    let stream = connection.read_coils(vec![&coil], DEFAULT_TIMEOUT);
    futures_lite::pin!(stream);

    let mut successes = 0;
    let mut group = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(_) => successes += 1,
            Err(err) => group = Some(err),
        }
    }
    assert_eq!(successes, 0);
    assert_eq!(group.expect("group error").errors.len(), 1);
}

#[tokio::test]
async fn io_faults_are_retried_then_surfaced() {
    let (connection, bus, _heatpump) = setup();
    for _ in 0..3 {
        bus.queue_read(Err(ModbusFault::Io("broken pipe".to_string())));
    }

    let coil = coil(40001, CoilSize::U16);
    let err = connection
        .read_coil(&coil, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::SendFailed { .. }));
    assert_eq!(bus.calls().len(), 3, "one bus operation per attempt");
}

#[tokio::test]
async fn bus_exceptions_are_not_retried() {
    let (connection, bus, _heatpump) = setup();
    bus.queue_read(Err(ModbusFault::Protocol("illegal data address".to_string())));

    let coil = coil(40001, CoilSize::U16);
    let err = connection
        .read_coil(&coil, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Device { .. }));
    assert_eq!(bus.calls().len(), 1);
}

#[tokio::test]
async fn read_timeout_retries_then_surfaces() {
    let (connection, _bus, _heatpump) = setup();

    let coil = coil(40001, CoilSize::U16);
    let start = Instant::now();
    let err = connection
        .read_coil(&coil, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Timeout { .. }));
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn write_io_fault_surfaces_after_budget() {
    let (connection, bus, _heatpump) = setup();
    let connection = connection.retries(1);
    bus.queue_write(Err(ModbusFault::Io("broken pipe".to_string())));

    let coil = writable_coil(40002, CoilSize::U8);
    let data = CoilData::new(&coil, 1);
    let err = connection
        .write_coil(&data, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::SendFailed { .. }));
}

#[tokio::test]
async fn unsupported_entity_types_are_rejected() {
    let (connection, bus, _heatpump) = setup();

    let unknown_class = coil(20001, CoilSize::U16);
    let err = connection
        .read_coil(&unknown_class, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Unsupported { .. }));

    // input registers are read-only
    let input_register = writable_coil(30001, CoilSize::U16);
    let data = CoilData::new(&input_register, 1);
    let err = connection
        .write_coil(&data, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Unsupported { .. }));

    let read_only = coil(40001, CoilSize::U16);
    let data = CoilData::new(&read_only, 1);
    let err = connection
        .write_coil(&data, DEFAULT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::NotWritable { .. }));

    assert!(bus.calls().is_empty(), "no bus traffic for rejected calls");
}

#[tokio::test]
async fn successful_reads_feed_coil_updates() {
    let (connection, bus, heatpump) = setup();
    bus.queue_read(Ok(vec![151]));

    let updates = Arc::new(Mutex::new(Vec::new()));
    let observed = updates.clone();
    heatpump.subscribe(nibe::event::COIL_UPDATE_EVENT, move |event| {
        if let Event::CoilUpdate(data) = event {
            observed.lock().push((data.coil.address, data.value.clone()));
        }
    });

    // hot water load on the S series table
    let coil = heatpump.get_coil_by_address(30010).unwrap();
    let data = connection.read_coil(coil, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(data.value, Some(CoilValue::Number(15.1)));
    assert_eq!(
        *updates.lock(),
        vec![(30010, Some(CoilValue::Number(15.1)))]
    );
}

#[tokio::test]
async fn verify_connectivity_round_trips_alarm_reset() {
    let (connection, bus, _heatpump) = setup();
    bus.queue_read(Ok(vec![0]));

    connection.verify_connectivity().await.unwrap();
    assert_eq!(
        bus.calls(),
        vec![
            Call::ReadHoldingRegisters(22, 1),
            Call::WriteRegisters(22, vec![0]),
        ]
    );
}
