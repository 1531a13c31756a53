//! End-to-end pipeline tests against a simulated sensor board.
//!
//! The board side of a `tokio::io::duplex` pipe plays the device: it reads
//! query frames and answers them with scripted packets.

use std::sync::Arc;
use std::time::Duration;

use lightwire_core::{AlertLevel, HostEvent};
use lightwire_host::{ChannelSink, Controller, HostConfig, HostError, PollerConfig, StopReason};
use lightwire_protocol::{
    FrameReader, FrameWriter, LightReading, Message, QueryCommand, StringMessage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::UnboundedReceiver;

fn reading_packet(value: i16) -> Vec<u8> {
    Message::Reading(LightReading::new(value))
        .to_packet()
        .as_bytes()
        .to_vec()
}

fn text_packet(text: &str) -> Vec<u8> {
    Message::Text(StringMessage::new(text))
        .to_packet()
        .as_bytes()
        .to_vec()
}

fn drain(events: &mut UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Answers each query with the next reading; closes the link on the query
/// after the last one. Returns how many queries it saw.
async fn answer_queries(device: DuplexStream, values: Vec<i16>) -> usize {
    let (rx, tx) = tokio::io::split(device);
    let mut frames = FrameReader::new(rx);
    let mut writer = FrameWriter::new(tx);
    let mut queries = 0;
    let mut values = values.into_iter();

    while let Some(frame) = frames.read_frame().await.unwrap() {
        let raw = lightwire_protocol::decode_frame(&frame).unwrap();
        assert!(QueryCommand::matches(&raw), "unexpected outbound packet {raw:?}");
        queries += 1;

        match values.next() {
            Some(value) => writer.write_packet(&reading_packet(value)).await.unwrap(),
            None => break,
        }
    }
    queries
}

#[tokio::test]
async fn n_readings_take_n_plus_one_queries() {
    let (host, device) = tokio::io::duplex(1024);
    let (sink, mut events) = ChannelSink::channel();

    let values = vec![10, 120, 400, 950, 800];
    let board = tokio::spawn(answer_queries(device, values.clone()));
    let handle = Controller::spawn(host, HostConfig::new(), Arc::new(sink)).unwrap();

    let queries = board.await.unwrap();
    let stats = handle.stats();
    let reason = handle.join().await.unwrap();

    assert_eq!(reason, StopReason::TransportClosed);
    assert_eq!(queries, values.len() + 1);
    assert_eq!(stats.retries, 0);

    let events = drain(&mut events);
    let readings: Vec<i16> = events
        .iter()
        .filter_map(|e| match e {
            HostEvent::Reading(r) => Some(r.value),
            _ => None,
        })
        .collect();
    assert_eq!(readings, values);

    let alerts: Vec<(AlertLevel, i16)> = events
        .iter()
        .filter_map(|e| match e {
            HostEvent::Alert(a) => Some((a.level, a.value)),
            _ => None,
        })
        .collect();
    assert_eq!(alerts, vec![(AlertLevel::Low, 10), (AlertLevel::High, 950)]);
}

#[tokio::test]
async fn bad_frames_are_dropped_and_text_is_shown() {
    let (host, device) = tokio::io::duplex(1024);
    let (sink, mut events) = ChannelSink::channel();
    let handle = Controller::spawn(host, HostConfig::new(), Arc::new(sink)).unwrap();

    let (rx, mut tx) = tokio::io::split(device);
    let mut frames = FrameReader::new(rx);

    // Wait for the kickoff query before talking.
    frames.read_frame().await.unwrap().unwrap();

    tx.write_all(b"!!not base64!!\n\n").await.unwrap();
    tx.write_all(b"AAcA\n").await.unwrap(); // type 7
    tx.write_all(b"AAAJSGk=\n").await.unwrap(); // declares 9 bytes, carries 2
    let mut writer = FrameWriter::new(tx);
    writer.write_packet(&text_packet("Hello")).await.unwrap();
    writer.write_packet(&reading_packet(300)).await.unwrap();

    // The reading is answered with the next query.
    frames.read_frame().await.unwrap().unwrap();

    let stats = handle.stats();
    drop(frames);
    drop(writer);
    assert_eq!(handle.join().await.unwrap(), StopReason::TransportClosed);

    assert_eq!(stats.decode_failures, 3);
    assert_eq!(stats.protocol_violations, 1);
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.readings, 1);

    let events = drain(&mut events);
    assert!(events.contains(&HostEvent::message("Hello")));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, HostEvent::Reading(r) if r.value == 300))
    );
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_after_retries() {
    let (host, mut device) = tokio::io::duplex(1024);
    let (sink, _events) = ChannelSink::channel();
    let config = HostConfig::new()
        .with_poller(PollerConfig::new(Duration::from_millis(500)).with_max_retries(2));
    let handle = Controller::spawn(host, config, Arc::new(sink)).unwrap();

    let board = tokio::spawn(async move {
        let mut seen = Vec::new();
        device.read_to_end(&mut seen).await.unwrap();
        seen
    });

    let err = handle.join().await.unwrap_err();
    match err {
        HostError::ResponseTimeout { attempts, timeout } => {
            assert_eq!(attempts, 3);
            assert_eq!(timeout, Duration::from_millis(500));
        }
        other => panic!("unexpected error: {other}"),
    }

    let seen = board.await.unwrap();
    assert_eq!(seen, b"/wAA\n/wAA\n/wAA\n");
}

#[tokio::test]
async fn manual_trigger_without_autostart() {
    let (host, device) = tokio::io::duplex(1024);
    let (sink, _events) = ChannelSink::channel();
    let config = HostConfig::new()
        .with_poller(PollerConfig::default().with_autostart(false));
    let handle = Controller::spawn(host, config, Arc::new(sink)).unwrap();

    let (rx, _tx) = tokio::io::split(device);
    let mut frames = FrameReader::new(rx);

    let early = tokio::time::timeout(Duration::from_millis(50), frames.read_frame()).await;
    assert!(early.is_err(), "no query before the trigger");

    handle.trigger().await.unwrap();
    let frame = frames.read_frame().await.unwrap().unwrap();
    assert_eq!(&frame[..], b"/wAA");

    handle.shutdown();
    assert_eq!(handle.join().await.unwrap(), StopReason::Shutdown);
}

#[tokio::test]
async fn readings_can_be_muted() {
    let (host, device) = tokio::io::duplex(1024);
    let (sink, mut events) = ChannelSink::channel();
    let config = HostConfig::new().with_report_readings(false);
    let board = tokio::spawn(answer_queries(device, vec![500, 5]));
    let handle = Controller::spawn(host, config, Arc::new(sink)).unwrap();

    board.await.unwrap();
    handle.join().await.unwrap();

    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].to_string(), "Low Light (5)");
}
