mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use common::{reading, RecordingSleeper, ScriptedChannel, ScriptedOpener, HANDSHAKE};
use pretty_assertions::assert_eq;
use thermolink_core::config::{CalibrationContext, LinkSettings};
use thermolink_core::discovery::{
    Backoff, BackoffPolicy, FixedPorts, PortScanner, Reconnector, ScanOrder,
};
use thermolink_core::shutdown::{Sleeper, StopSignal, SystemSleeper};
use thermolink_core::telemetry::{
    ChannelSink, Sink, SinkDispatcher, TelemetryLoop, TelemetryRecord, TickOutcome,
};
use thermolink_core::thermocouple::TemperatureStatus;

/// 1.234 mV with the cold junction at 22 °C (ITS-90 type K)
const BASE_CELSIUS: f64 = 52.1755;

fn calibration() -> CalibrationContext {
    let mut calibration = CalibrationContext::default();
    calibration.limiter.seed = Some(42);
    calibration
}

fn pipeline_with(
    opener: &ScriptedOpener,
    ports: &[&str],
    sleeper: Arc<dyn Sleeper>,
    backoff: Backoff,
    sinks: Vec<Box<dyn Sink>>,
) -> TelemetryLoop {
    let scanner = PortScanner::new(
        Box::new(opener.clone()),
        LinkSettings::default(),
        ScanOrder::AsListed,
    );
    let source = FixedPorts(ports.iter().map(|p| p.to_string()).collect());
    let reconnector = Reconnector::new(scanner, Box::new(source), backoff, sleeper.clone());
    TelemetryLoop::new(
        calibration(),
        Duration::from_millis(500),
        reconnector,
        SinkDispatcher::new(sinks, 16).unwrap(),
        sleeper,
    )
}

fn pipeline(
    opener: &ScriptedOpener,
    ports: &[&str],
    sleeper: &RecordingSleeper,
) -> (TelemetryLoop, Receiver<TelemetryRecord>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let telemetry = pipeline_with(
        opener,
        ports,
        Arc::new(sleeper.clone()),
        Backoff::new(Duration::from_millis(500), BackoffPolicy::default()),
        vec![Box::new(ChannelSink::new(tx))],
    );
    (telemetry, rx)
}

fn published(outcome: TickOutcome) -> TelemetryRecord {
    match outcome {
        TickOutcome::Published(record) => record,
        other => panic!("expected a published record, got {other:?}"),
    }
}

fn millis(delays: &[Duration]) -> Vec<u64> {
    delays.iter().map(|d| d.as_millis() as u64).collect()
}

#[test]
fn test_reading_and_glitch_end_to_end() {
    let opener = ScriptedOpener::default();
    let channel = ScriptedChannel::new(HANDSHAKE);
    channel.push(&reading("+1.234E-3 VDC"));
    channel.push(&reading("+3.307E-3 VDC"));
    opener.attach("COM3", channel);

    let sleeper = RecordingSleeper::default();
    let (mut telemetry, rx) = pipeline(&opener, &["COM3"], &sleeper);
    let stop = StopSignal::new();

    assert_eq!(telemetry.tick(&stop), TickOutcome::LinkAcquired);

    let first = published(telemetry.tick(&stop));
    assert_eq!(first.temperature.status, TemperatureStatus::Valid);
    assert!((first.temperature.celsius - BASE_CELSIUS).abs() < 0.01);
    assert!(!first.limited);
    assert_eq!(first.port, "COM3");
    assert_eq!(first.instrument.as_deref(), Some("FLUKE, 45, 0, 1.6 D1.0"));

    // +3.307 mV is about 50 °C hotter; the published value moves at most
    // one threshold toward it
    let second = published(telemetry.tick(&stop));
    assert!(second.limited);
    let rise = second.temperature.celsius - first.temperature.celsius;
    assert!(rise >= 0.1 - 1e-9, "rise {rise}");
    assert!(rise <= 1.8 + 1e-9, "rise {rise}");
    assert_eq!(telemetry.last_accepted(), Some(second.temperature));

    let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(delivered, first);
}

#[test]
fn test_scan_moves_past_silent_port() {
    let opener = ScriptedOpener::default();
    opener.attach("COM1", ScriptedChannel::new("hello\r\n"));
    opener.attach("COM3", ScriptedChannel::new(HANDSHAKE));

    let sleeper = RecordingSleeper::default();
    let (mut telemetry, _rx) = pipeline(&opener, &["COM1", "COM2", "COM3"], &sleeper);

    assert_eq!(telemetry.tick(&StopSignal::new()), TickOutcome::LinkAcquired);
    assert_eq!(opener.opened(), vec!["COM1", "COM2", "COM3"]);
    assert_eq!(telemetry.link().unwrap().endpoint().port_name, "COM3");
}

#[test]
fn test_reconnects_after_three_failed_scans() {
    let opener = ScriptedOpener::default();
    for _ in 0..3 {
        opener.attach("COM3", ScriptedChannel::default());
    }
    let channel = ScriptedChannel::new(HANDSHAKE);
    channel.push(&reading("+1.234E-3 VDC"));
    opener.attach("COM3", channel);

    let sleeper = RecordingSleeper::default();
    let (mut telemetry, _rx) = pipeline(&opener, &["COM3"], &sleeper);
    let stop = StopSignal::new();

    for _ in 0..3 {
        assert_eq!(telemetry.tick(&stop), TickOutcome::Searching);
        assert!(!telemetry.is_connected());
    }
    assert_eq!(telemetry.tick(&stop), TickOutcome::LinkAcquired);
    let record = published(telemetry.tick(&stop));
    assert!((record.temperature.celsius - BASE_CELSIUS).abs() < 0.01);

    assert_eq!(millis(&sleeper.delays()), vec![500, 5000, 5000, 5000]);
}

#[test]
fn test_link_loss_rescans_with_short_delay() {
    let opener = ScriptedOpener::default();
    let first = ScriptedChannel::new(HANDSHAKE);
    first.push(&reading("+1.234E-3 VDC"));
    opener.attach("COM3", first);
    let second = ScriptedChannel::new(HANDSHAKE);
    second.push(&reading("+1.250E-3 VDC"));
    opener.attach("COM3", second);

    let sleeper = RecordingSleeper::default();
    let (mut telemetry, _rx) = pipeline(&opener, &["COM3"], &sleeper);
    let stop = StopSignal::new();

    assert_eq!(telemetry.tick(&stop), TickOutcome::LinkAcquired);
    published(telemetry.tick(&stop));
    assert_eq!(telemetry.tick(&stop), TickOutcome::LinkLost);
    assert!(!telemetry.is_connected());
    assert_eq!(telemetry.tick(&stop), TickOutcome::LinkAcquired);
    let record = published(telemetry.tick(&stop));
    assert!(!record.limited);

    assert_eq!(millis(&sleeper.delays()), vec![500, 500]);
}

#[test]
fn test_malformed_reading_publishes_nothing() {
    let opener = ScriptedOpener::default();
    let channel = ScriptedChannel::new(HANDSHAKE);
    channel.push(&reading("OL VDC"));
    channel.push(&reading("+1.234E-3 VDC"));
    opener.attach("COM3", channel);

    let sleeper = RecordingSleeper::default();
    let (mut telemetry, rx) = pipeline(&opener, &["COM3"], &sleeper);
    let stop = StopSignal::new();

    assert_eq!(telemetry.tick(&stop), TickOutcome::LinkAcquired);
    assert_eq!(telemetry.tick(&stop), TickOutcome::Skipped);
    assert!(telemetry.is_connected());
    assert_eq!(telemetry.last_accepted(), None);

    let record = published(telemetry.tick(&stop));
    let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(delivered, record);
}

#[test]
fn test_out_of_range_is_published_but_not_accepted() {
    let opener = ScriptedOpener::default();
    let channel = ScriptedChannel::new(HANDSHAKE);
    channel.push(&reading("+1.234E-3 VDC"));
    channel.push(&reading("+5.500E-2 VDC"));
    opener.attach("COM3", channel);

    let sleeper = RecordingSleeper::default();
    let (mut telemetry, _rx) = pipeline(&opener, &["COM3"], &sleeper);
    let stop = StopSignal::new();

    telemetry.tick(&stop);
    let valid = published(telemetry.tick(&stop));
    let over = published(telemetry.tick(&stop));
    assert_eq!(over.temperature.status, TemperatureStatus::Overrange);
    assert!(!over.limited);
    assert_eq!(telemetry.last_accepted(), Some(valid.temperature));
}

#[test]
fn test_stop_before_tick() {
    let opener = ScriptedOpener::default();
    let sleeper = RecordingSleeper::default();
    let (mut telemetry, _rx) = pipeline(&opener, &["COM3"], &sleeper);

    let stop = StopSignal::new();
    stop.trigger();
    assert_eq!(telemetry.tick(&stop), TickOutcome::Stopped);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn test_stop_during_scan_skips_remaining_ports() {
    let opener = ScriptedOpener::default();
    let ports: Vec<String> = (1..=10).map(|n| format!("COM{n}")).collect();
    for port in &ports {
        opener.attach(port, ScriptedChannel::default());
    }
    let stop = StopSignal::new();
    opener.stop_on_open(&stop);

    let sleeper = RecordingSleeper::default();
    let names: Vec<&str> = ports.iter().map(String::as_str).collect();
    let (mut telemetry, _rx) = pipeline(&opener, &names, &sleeper);

    assert_eq!(telemetry.tick(&stop), TickOutcome::Stopped);
    assert_eq!(opener.opened(), vec!["COM1"]);
    assert_eq!(telemetry.reconnector().failed_scans(), 0);
}

#[test]
fn test_run_stops_promptly_during_backoff() {
    let opener = ScriptedOpener::default();
    let channel = ScriptedChannel::new(HANDSHAKE);
    channel.push(&reading("+1.234E-3 VDC"));
    opener.attach("COM3", channel);

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut telemetry = pipeline_with(
        &opener,
        &["COM3"],
        Arc::new(SystemSleeper),
        Backoff::new(Duration::ZERO, BackoffPolicy::Fixed { delay_ms: 60_000 }),
        vec![Box::new(ChannelSink::new(tx))],
    );

    let stop = StopSignal::new();
    let loop_stop = stop.clone();
    let handle = thread::spawn(move || telemetry.run(&loop_stop));

    let record = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!((record.temperature.celsius - BASE_CELSIUS).abs() < 0.01);

    // The loop is now waiting out a one-minute backoff
    stop.trigger();
    handle.join().unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(1)).is_err());
}
