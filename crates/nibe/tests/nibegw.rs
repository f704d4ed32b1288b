// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests of the UDP engine against a scripted fake pump on
//! the loopback interface.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nibe::event::{Event, CONNECTION_STATUS_EVENT, PRODUCT_INFO_EVENT};
use nibe::{
    CoilValue, Connection, ConnectionStatus, HeatPump, Model, NibeGw, ReadError, WriteError,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

fn unhex(s: &str) -> Vec<u8> {
    let clean: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    clean
        .as_bytes()
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

async fn fake_pump() -> (Arc<UdpSocket>, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (Arc::new(socket), addr)
}

async fn started_engine(pump_port: u16) -> (NibeGw, Arc<HeatPump>) {
    let heatpump = Arc::new(HeatPump::new(Model::F1255).unwrap());
    heatpump.set_word_swap(true);
    let gw = NibeGw::builder(heatpump.clone())
        .remote_ip("127.0.0.1".parse().unwrap())
        .remote_read_port(pump_port)
        .remote_write_port(pump_port)
        .listening_ip("127.0.0.1".parse().unwrap())
        .listening_port(0)
        .build();
    gw.start().await.unwrap();
    (gw, heatpump)
}

/// Expect one request frame and answer it.
fn respond_once(
    pump: Arc<UdpSocket>,
    expected: &'static str,
    reply: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        let (len, from) = pump.recv_from(&mut buf).await.unwrap();
        assert_eq!(hex(&buf[..len]), expected);
        pump.send_to(&unhex(reply), from).await.unwrap();
    })
}

/// Count every datagram the pump receives, never answering.
fn count_requests(pump: Arc<UdpSocket>) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let observed = counter.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            if pump.recv_from(&mut buf).await.is_ok() {
                observed.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    counter
}

#[tokio::test]
async fn read_s32_coil() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let responder = respond_once(pump, "c06902a0a9a2", "5c00206a06a0a9f5120000a2");

    let coil = heatpump.get_coil_by_address(43424).unwrap();
    let data = gw.read_coil(coil, Duration::from_secs(2)).await.unwrap();
    assert_eq!(data.value, Some(CoilValue::Number(4853.0)));

    responder.await.unwrap();
    gw.stop().await;
}

#[tokio::test]
async fn status_transitions_emit_once() {
    let (pump, pump_addr) = fake_pump().await;
    let heatpump = Arc::new(HeatPump::new(Model::F1255).unwrap());
    heatpump.set_word_swap(true);
    let gw = NibeGw::builder(heatpump.clone())
        .remote_ip("127.0.0.1".parse().unwrap())
        .remote_read_port(pump_addr.port())
        .remote_write_port(pump_addr.port())
        .listening_ip("127.0.0.1".parse().unwrap())
        .listening_port(0)
        .build();

    assert_eq!(gw.status(), ConnectionStatus::Unknown);
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let observed = statuses.clone();
    gw.subscribe(CONNECTION_STATUS_EVENT, move |event| {
        if let Event::ConnectionStatus(status) = event {
            observed.lock().push(*status);
        }
    });

    gw.start().await.unwrap();
    assert_eq!(gw.status(), ConnectionStatus::Listening);

    let engine_addr = gw.local_addr().unwrap();
    pump.send_to(&unhex("5c00206a06a0a9f5120000a2"), engine_addr)
        .await
        .unwrap();
    wait_for(|| gw.status() == ConnectionStatus::Connected).await;

    // a second datagram must not emit another connected event
    pump.send_to(&unhex("5c00206a06a0a9f5120000a2"), engine_addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    gw.stop().await;
    assert_eq!(
        *statuses.lock(),
        vec![
            ConnectionStatus::Initializing,
            ConnectionStatus::Listening,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
}

#[tokio::test]
async fn write_enum_coil() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let responder = respond_once(pump, "c06b0604bc0400000011", "5c00206c01014c");

    let coil = heatpump.get_coil_by_address(48132).unwrap();
    let data = nibe::CoilData::new(coil, "One time increase");
    gw.write_coil(&data, Duration::from_secs(2)).await.unwrap();

    responder.await.unwrap();
    gw.stop().await;
}

#[tokio::test]
async fn write_s32_coil() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let responder = respond_once(pump, "c06b06ec9f9cffffffbd", "5c00206c01014c");

    let coil = heatpump.get_coil_by_address(40940).unwrap();
    let data = nibe::CoilData::new(coil, -10);
    gw.write_coil(&data, Duration::from_secs(2)).await.unwrap();

    responder.await.unwrap();
    gw.stop().await;
}

#[tokio::test]
async fn write_denied_does_not_retry() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;

    let counter = Arc::new(AtomicUsize::new(0));
    let observed = counter.clone();
    let responder_pump = pump.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            let (_, from) = responder_pump.recv_from(&mut buf).await.unwrap();
            observed.fetch_add(1, Ordering::SeqCst);
            responder_pump
                .send_to(&unhex("5c00206c01004d"), from)
                .await
                .unwrap();
        }
    });

    let coil = heatpump.get_coil_by_address(48132).unwrap();
    let data = nibe::CoilData::new(coil, "One time increase");
    let err = gw
        .write_coil(&data, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Denied { .. }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1, "denied writes must not retry");
    gw.stop().await;
}

#[tokio::test]
async fn read_timeout_retries_three_times() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let counter = count_requests(pump);

    let coil = heatpump.get_coil_by_address(43086).unwrap();
    let start = Instant::now();
    let err = gw
        .read_coil(coil, Duration::from_millis(100))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ReadError::Timeout { .. }));
    assert!(
        elapsed >= Duration::from_millis(300) && elapsed <= Duration::from_millis(450),
        "three 100ms attempts expected, took {elapsed:?}"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 3, "one frame per attempt");
    gw.stop().await;
}

#[tokio::test]
async fn read_decode_failure_is_not_retried() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    // 4853 is no valid prio mapping entry
    let responder = respond_once(pump.clone(), "c069024ea84d", "5c00206a064ea8f51200004d");

    let coil = heatpump.get_coil_by_address(43086).unwrap();
    let start = Instant::now();
    let err = gw
        .read_coil(coil, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::Decode(_)));
    assert!(start.elapsed() < Duration::from_millis(500), "no retry on decode failure");

    responder.await.unwrap();
    gw.stop().await;
}

#[tokio::test]
async fn read_product_info_resolves_from_broadcast() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, _heatpump) = started_engine(pump_addr.port()).await;

    let products = Arc::new(Mutex::new(Vec::new()));
    let observed = products.clone();
    gw.subscribe(PRODUCT_INFO_EVENT, move |event| {
        if let Event::ProductInfo(info) = event {
            observed.lock().push((*info).clone());
        }
    });

    let engine_addr = gw.local_addr().unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pump.send_to(
            &unhex("5c00206d0d0124e346313235352d313220529f"),
            engine_addr,
        )
        .await
        .unwrap();
    });

    let info = gw
        .read_product_info(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(info.model, "F1255-12 R");
    assert_eq!(info.firmware_version, 9443);
    assert_eq!(info.identify_model().unwrap(), Model::F1255);
    assert_eq!(products.lock().len(), 1);
    gw.stop().await;
}

#[tokio::test]
async fn product_info_times_out_without_broadcast() {
    let (_pump, pump_addr) = fake_pump().await;
    let (gw, _heatpump) = started_engine(pump_addr.port()).await;
    let err = gw
        .read_product_info(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::ProductInfoTimeout { .. }));
    gw.stop().await;
}

fn collect_updates(heatpump: &HeatPump) -> Arc<Mutex<Vec<(u16, Option<CoilValue>)>>> {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let observed = updates.clone();
    heatpump.subscribe(nibe::event::COIL_UPDATE_EVENT, move |event| {
        if let Event::CoilUpdate(data) = event {
            observed.lock().push((data.coil.address, data.value.clone()));
        }
    });
    updates
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn number(value: f64) -> Option<CoilValue> {
    Some(CoilValue::Number(value))
}

fn label(value: &str) -> Option<CoilValue> {
    Some(CoilValue::Label(value.to_string()))
}

#[tokio::test]
async fn table_frame_with_32bit_pairs_and_mappings() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let updates = collect_updates(&heatpump);

    let engine_addr = gw.local_addr().unwrap();
    pump.send_to(
        &unhex(
            "5c00206850c9af0000889c7100a9a90a00a3a91400aba90000939c0000949c0000919c3c00929c0000\
             8f9c0000909c00003ab95000ada94600a7a91400faa90200ffff0000ffff0000ffff0000ffff0000ffff0000f0",
        ),
        engine_addr,
    )
    .await
    .unwrap();

    wait_for(|| updates.lock().len() >= 12).await;
    assert_eq!(
        *updates.lock(),
        vec![
            (40072, number(11.3)),
            (40079, number(0.0)),
            (40081, number(6.0)),
            (40083, number(0.0)),
            (43427, label("STOPPED")),
            (43431, label("ON")),
            (43433, label("OFF")),
            (43435, label("OFF")),
            (43437, number(70.0)),
            (43514, number(2.0)),
            (45001, number(0.0)),
            (47418, number(80.0)),
        ]
    );
    gw.stop().await;
}

#[tokio::test]
async fn table_frame_emits_in_ascending_address_order() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let updates = collect_updates(&heatpump);

    let engine_addr = gw.local_addr().unwrap();
    pump.send_to(
        &unhex(
            "5c00206850 489ce400 4c9ce300 4e9ca101 889c4500 d5a1ae00 d6a1a300 fda718f8 \
             c5a5ad98c6a50100 cda5d897cea50100 cfa51fb7d0a50600 98a96d23 99a90000 a0a9cf05 \
             a1a90000 9ca9a01a 9da90000 449c4500 e5",
        ),
        engine_addr,
    )
    .await
    .unwrap();

    wait_for(|| updates.lock().len() >= 14).await;
    assert_eq!(
        *updates.lock(),
        vec![
            (40004, number(6.9)),
            (40008, number(22.8)),
            (40012, number(22.7)),
            (40014, number(41.7)),
            (40072, number(6.9)),
            (41429, number(17.4)),
            (41430, number(16.3)),
            (42437, number(10462.1)),
            (42445, number(10440.8)),
            (42447, number(44009.5)),
            (43005, number(-202.4)),
            (43416, number(9069.0)),
            (43420, number(6816.0)),
            (43424, number(1487.0)),
        ]
    );
    gw.stop().await;
}

#[tokio::test]
async fn permissive_mode_skips_only_failing_rows() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let updates = collect_updates(&heatpump);

    // second row carries 245, which is no prio mapping entry
    let engine_addr = gw.local_addr().unwrap();
    pump.send_to(&unhex("5c00206808449c45004ea8f500ce"), engine_addr)
        .await
        .unwrap();

    wait_for(|| !updates.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*updates.lock(), vec![(40004, number(6.9))]);
    gw.stop().await;
}

#[tokio::test]
async fn strict_mode_suppresses_the_whole_frame() {
    let (pump, pump_addr) = fake_pump().await;
    let heatpump = Arc::new(HeatPump::new(Model::F1255).unwrap());
    heatpump.set_word_swap(true);
    let gw = NibeGw::builder(heatpump.clone())
        .remote_ip("127.0.0.1".parse().unwrap())
        .remote_read_port(pump_addr.port())
        .listening_ip("127.0.0.1".parse().unwrap())
        .listening_port(0)
        .table_mode(nibe::TableProcessingMode::Strict)
        .build();
    gw.start().await.unwrap();
    let updates = collect_updates(&heatpump);

    let engine_addr = gw.local_addr().unwrap();
    pump.send_to(&unhex("5c00206808449c45004ea8f500ce"), engine_addr)
        .await
        .unwrap();

    wait_for(|| gw.status() == ConnectionStatus::Connected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(updates.lock().is_empty(), "strict mode must drop the frame");
    gw.stop().await;
}

#[tokio::test]
async fn word_swap_is_detected_on_start() {
    let (pump, pump_addr) = fake_pump().await;
    let heatpump = Arc::new(HeatPump::new(Model::F1255).unwrap());
    assert_eq!(heatpump.word_swap(), None);
    let gw = NibeGw::builder(heatpump.clone())
        .remote_ip("127.0.0.1".parse().unwrap())
        .remote_read_port(pump_addr.port())
        .listening_ip("127.0.0.1".parse().unwrap())
        .listening_port(0)
        .build();
    gw.start().await.unwrap();

    // the engine probes the word swap register by itself
    let responder = respond_once(pump, "c06902d4bec1", "5c00206a06d4be0100000027");
    responder.await.unwrap();
    wait_for(|| heatpump.word_swap() == Some(true)).await;
    gw.stop().await;
}

#[tokio::test]
async fn table_frame_completes_pending_read() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;

    let coil = heatpump.get_coil_by_address(43424).unwrap();
    let engine_addr = gw.local_addr().unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        // table row pair for 43424/43425 carrying 1487
        pump.send_to(
            &unhex("5c00206808a0a9cf05a1a900008b"),
            engine_addr,
        )
        .await
        .unwrap();
    });

    let data = gw.read_coil(coil, Duration::from_secs(2)).await.unwrap();
    assert_eq!(data.value, Some(CoilValue::Number(1487.0)));
    gw.stop().await;
}

#[tokio::test]
async fn duplicate_concurrent_reads_share_one_exchange() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;

    let counter = Arc::new(AtomicUsize::new(0));
    let observed = counter.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        let (len, from) = pump.recv_from(&mut buf).await.unwrap();
        observed.fetch_add(1, Ordering::SeqCst);
        assert_eq!(hex(&buf[..len]), "c06902a0a9a2");
        tokio::time::sleep(Duration::from_millis(50)).await;
        pump.send_to(&unhex("5c00206a06a0a9f5120000a2"), from)
            .await
            .unwrap();
        // keep draining so a second request would be counted
        loop {
            if pump.recv_from(&mut buf).await.is_ok() {
                observed.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let coil = heatpump.get_coil_by_address(43424).unwrap();
    let (first, second) = tokio::join!(
        gw.read_coil(coil, Duration::from_secs(2)),
        gw.read_coil(coil, Duration::from_secs(2)),
    );
    assert_eq!(first.unwrap().value, Some(CoilValue::Number(4853.0)));
    assert_eq!(second.unwrap().value, Some(CoilValue::Number(4853.0)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1, "only one frame on the wire");
    gw.stop().await;
}

#[tokio::test]
async fn peer_discovery_adopts_first_sender() {
    let (pump, pump_addr) = fake_pump().await;
    let heatpump = Arc::new(HeatPump::new(Model::F1255).unwrap());
    heatpump.set_word_swap(true);
    let gw = NibeGw::builder(heatpump.clone())
        .remote_read_port(pump_addr.port())
        .remote_write_port(pump_addr.port())
        .listening_ip("127.0.0.1".parse().unwrap())
        .listening_port(0)
        .build();
    gw.start().await.unwrap();

    // no peer configured: the first inbound datagram nominates one
    let engine_addr = gw.local_addr().unwrap();
    pump.send_to(
        &unhex("5c00206d0d0124e346313235352d313220529f"),
        engine_addr,
    )
    .await
    .unwrap();
    wait_for(|| gw.status() == ConnectionStatus::Connected).await;

    let responder = respond_once(pump, "c06902a0a9a2", "5c00206a06a0a9f5120000a2");
    let coil = heatpump.get_coil_by_address(43424).unwrap();
    let data = gw.read_coil(coil, Duration::from_secs(2)).await.unwrap();
    assert_eq!(data.value, Some(CoilValue::Number(4853.0)));

    responder.await.unwrap();
    gw.stop().await;
}

#[tokio::test]
async fn read_without_peer_fails_to_send() {
    let (_pump, pump_addr) = fake_pump().await;
    let heatpump = Arc::new(HeatPump::new(Model::F1255).unwrap());
    heatpump.set_word_swap(true);
    let gw = NibeGw::builder(heatpump.clone())
        .remote_read_port(pump_addr.port())
        .listening_ip("127.0.0.1".parse().unwrap())
        .listening_port(0)
        .build();
    gw.start().await.unwrap();

    let coil = heatpump.get_coil_by_address(43424).unwrap();
    let err = gw
        .read_coil(coil, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::SendFailed { .. }));
    gw.stop().await;
}

#[tokio::test]
async fn stop_fails_pending_reads_over() {
    let (_pump, pump_addr) = fake_pump().await;
    let (gw, heatpump) = started_engine(pump_addr.port()).await;
    let gw = Arc::new(gw);

    let coil = heatpump.get_coil_by_address(43424).unwrap().clone();
    let reader = {
        let gw = gw.clone();
        tokio::spawn(async move {
            gw.read_coil(&coil, Duration::from_secs(5)).await.map(|_| ())
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    gw.stop().await;
    let err = reader.await.unwrap().unwrap_err();
    assert!(matches!(err, ReadError::ConnectionClosed { .. }));
}

#[tokio::test]
async fn verify_connectivity_reads_and_writes_alarm_reset() {
    let (pump, pump_addr) = fake_pump().await;
    let (gw, _heatpump) = started_engine(pump_addr.port()).await;

    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        // read of the alarm reset coil
        let (len, from) = pump.recv_from(&mut buf).await.unwrap();
        assert_eq!(hex(&buf[..len]), "c0690273b068");
        pump.send_to(&unhex("5c00206a0673b0000000008f"), from)
            .await
            .unwrap();
        // write-back of the value just read
        let (len, from) = pump.recv_from(&mut buf).await.unwrap();
        assert_eq!(hex(&buf[..len]), "c06b0673b0000000006e");
        pump.send_to(&unhex("5c00206c01014c"), from).await.unwrap();
    });

    gw.verify_connectivity().await.unwrap();
    gw.stop().await;
}
