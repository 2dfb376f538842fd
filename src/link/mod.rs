//! # Firmware Link Module
//!
//! Handles UDP communication with the antenna firmware.
//!
//! This module handles:
//! - Binding one UDP endpoint for both directions
//! - Polling the firmware status every 10ms, fire-and-forget
//! - Decoding every received datagram and merging status into the store
//! - Forwarding satellite-track pull requests to the orchestrator
//! - Sending queued commands between polls
//! - Rebinding after bind or send failures with a fixed backoff
//!
//! The link runs on its own OS thread with a single-threaded runtime so that
//! poll and receive latency does not depend on load elsewhere in the process.

pub mod port;
pub mod sender;

pub use port::{DatagramPort, UdpPort};
pub use sender::{CommandSender, CommandSink};

use std::net::SocketAddr;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::error::{AcuError, Result, TransportError};
use crate::icd::{decode, encode, Command, Frame};
use crate::telemetry::TelemetryStore;

/// Number of polls between link status log messages (~10 s at 10ms)
const LOG_INTERVAL_POLLS: u64 = 1000;

/// Largest datagram the firmware sends is the 420-byte initial block
const RECV_BUFFER_LEN: usize = 1024;

/// Firmware-originated events the orchestrator must react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareEvent {
    /// The firmware wants the satellite-track block starting at `elapsed_ms`
    SatTrackRequest { elapsed_ms: u32 },
}

/// Resolved link settings
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub firmware: SocketAddr,
    pub bind_addr: String,
    pub poll_interval: Duration,
    pub reconnect_interval: Duration,
}

impl LinkSettings {
    /// Resolve settings from the `[link]` configuration section
    ///
    /// # Errors
    ///
    /// Returns `AcuError::Config` if the firmware address does not parse
    pub fn from_config(config: &LinkConfig) -> Result<Self> {
        use serde::de::Error;

        let firmware = config.firmware_addr.parse::<SocketAddr>().map_err(|e| {
            AcuError::Config(toml::de::Error::custom(format!(
                "link.firmware_addr '{}': {}",
                config.firmware_addr, e
            )))
        })?;

        Ok(Self {
            firmware,
            bind_addr: config.bind_addr.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
        })
    }
}

/// Running counters, logged periodically
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub polls_sent: u64,
    pub commands_sent: u64,
    pub datagrams_received: u64,
    pub status_frames: u64,
    pub status_changes: u64,
    pub decode_errors: u64,
}

/// How a session on one bound socket ended
#[derive(Debug)]
pub enum SessionEnd {
    /// Shutdown was requested; queued commands were flushed
    Shutdown,
    /// Every command sender is gone
    CommandsClosed,
    /// A send failed; the socket should be rebound
    SendFailed(TransportError),
}

/// Route one received datagram.
///
/// Status frames are merged into the store, pull requests become
/// [`FirmwareEvent`]s. Anything that fails to decode is logged and dropped;
/// the next poll re-requests state anyway.
pub fn handle_datagram(
    data: &[u8],
    store: &TelemetryStore,
    events: &mpsc::UnboundedSender<FirmwareEvent>,
    stats: &mut LinkStats,
) {
    stats.datagrams_received += 1;

    match decode(data) {
        Ok(Frame::Status(status)) => {
            stats.status_frames += 1;
            if store.merge(&status) {
                stats.status_changes += 1;
            }
        }
        Ok(Frame::SatTrackRequest { elapsed_ms }) => {
            debug!("Firmware requested track block at {} ms", elapsed_ms);
            if events
                .send(FirmwareEvent::SatTrackRequest { elapsed_ms })
                .is_err()
            {
                warn!("Dropping track block request: orchestrator not listening");
            }
        }
        Ok(Frame::Command(command)) => {
            debug!("Ignoring echoed {} frame", command.name());
        }
        Err(e) => {
            stats.decode_errors += 1;
            debug!("Dropping {} byte datagram: {}", data.len(), e);
        }
    }
}

async fn send_command<P: DatagramPort>(
    port: &P,
    command: &Command,
    stats: &mut LinkStats,
) -> std::result::Result<(), TransportError> {
    let frame = encode(command);
    port.send(&frame).await.map_err(TransportError::Send)?;
    stats.commands_sent += 1;
    debug!("Sent {} ({} bytes)", command.name(), frame.len());
    Ok(())
}

/// Serve one bound port until shutdown or a send failure.
///
/// Polls the firmware every `poll_interval`, receives and routes datagrams,
/// and sends queued commands in arrival order. On shutdown, commands that are
/// already queued (such as a final stop) are flushed before returning.
pub async fn run_session<P: DatagramPort>(
    port: &P,
    store: &TelemetryStore,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<FirmwareEvent>,
    shutdown: &mut watch::Receiver<bool>,
    poll_interval: Duration,
    stats: &mut LinkStats,
) -> SessionEnd {
    let poll_frame = encode(&Command::ReadStatus);
    let mut poll = interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = [0u8; RECV_BUFFER_LEN];
    let mut last_log_polls = stats.polls_sent;

    loop {
        if *shutdown.borrow() {
            return flush_queued(port, commands, stats).await;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return flush_queued(port, commands, stats).await;
                }
            }

            _ = poll.tick() => {
                if let Err(e) = port.send(&poll_frame).await {
                    return SessionEnd::SendFailed(TransportError::Send(e));
                }
                stats.polls_sent += 1;

                if stats.polls_sent - last_log_polls >= LOG_INTERVAL_POLLS {
                    info!(
                        "Link: {} polls, {} commands, {} datagrams ({} status, {} changed, {} dropped)",
                        stats.polls_sent,
                        stats.commands_sent,
                        stats.datagrams_received,
                        stats.status_frames,
                        stats.status_changes,
                        stats.decode_errors
                    );
                    last_log_polls = stats.polls_sent;
                }
            }

            received = port.recv(&mut buf) => {
                match received {
                    Ok(len) => handle_datagram(&buf[..len], store, events, stats),
                    // ICMP port-unreachable and friends surface here; keep going
                    Err(e) => debug!("Receive failed: {}", e),
                }
            }

            command = commands.recv() => {
                match command {
                    Some(command) => {
                        if let Err(e) = send_command(port, &command, stats).await {
                            warn!("Failed to send {}: {}", command.name(), e);
                            return SessionEnd::SendFailed(e);
                        }
                    }
                    None => return SessionEnd::CommandsClosed,
                }
            }
        }
    }
}

async fn flush_queued<P: DatagramPort>(
    port: &P,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    stats: &mut LinkStats,
) -> SessionEnd {
    while let Ok(command) = commands.try_recv() {
        if let Err(e) = send_command(port, &command, stats).await {
            warn!("Failed to flush {}: {}", command.name(), e);
            return SessionEnd::SendFailed(e);
        }
    }
    SessionEnd::Shutdown
}

/// Own the firmware socket for the life of the process.
///
/// Binds, serves a session, and on bind or send failure waits
/// `reconnect_interval` before binding again. Returns once shutdown is
/// requested or every command sender has been dropped.
pub async fn run_link(
    settings: LinkSettings,
    store: TelemetryStore,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<FirmwareEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> LinkStats {
    let mut stats = LinkStats::default();

    loop {
        match UdpPort::bind(&settings.bind_addr, settings.firmware).await {
            Ok(port) => {
                info!(
                    "Polling firmware at {} every {:?}",
                    settings.firmware, settings.poll_interval
                );
                let end = run_session(
                    &port,
                    &store,
                    &mut commands,
                    &events,
                    &mut shutdown,
                    settings.poll_interval,
                    &mut stats,
                )
                .await;

                match end {
                    SessionEnd::Shutdown | SessionEnd::CommandsClosed => {
                        info!(
                            "Firmware link closed after {} polls and {} commands",
                            stats.polls_sent, stats.commands_sent
                        );
                        return stats;
                    }
                    SessionEnd::SendFailed(e) => {
                        error!("Firmware link: {}", e);
                    }
                }
            }
            Err(e) => error!("{}", e),
        }

        warn!("Retrying firmware link in {:?}", settings.reconnect_interval);
        tokio::select! {
            _ = sleep(settings.reconnect_interval) => {}
            _ = shutdown.changed() => {
                info!("Shutdown requested while link was down");
                return stats;
            }
        }
    }
}

/// Start the link on a dedicated `acu-link` thread with its own runtime.
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn spawn_link_thread(
    settings: LinkSettings,
    store: TelemetryStore,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<FirmwareEvent>,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<LinkStats>> {
    let handle = std::thread::Builder::new()
        .name("acu-link".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to build link runtime: {}", e);
                    return LinkStats::default();
                }
            };
            runtime.block_on(run_link(settings, store, commands, events, shutdown))
        })?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::port::mocks::MockPort;
    use super::*;
    use crate::icd::encoder::{encode_sat_track_request, encode_status};
    use crate::icd::protocol::AxisMask;
    use crate::icd::status::StatusSnapshot;
    use crate::telemetry::store::DEFAULT_CONNECTION_TIMEOUT;

    fn status_with_az(az: f32) -> StatusSnapshot {
        let mut s = StatusSnapshot::default();
        s.azimuth.angle = Some(az);
        s
    }

    #[test]
    fn test_handle_status_datagram_merges() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        let (events, _rx) = mpsc::unbounded_channel();
        let mut stats = LinkStats::default();

        handle_datagram(&encode_status(&status_with_az(42.0)), &store, &events, &mut stats);

        assert_eq!(reader.snapshot().azimuth.angle, Some(42.0));
        assert!(reader.is_connected());
        assert_eq!(stats.status_frames, 1);
        assert_eq!(stats.status_changes, 1);
    }

    #[test]
    fn test_handle_request_datagram_emits_event() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut stats = LinkStats::default();

        handle_datagram(&encode_sat_track_request(5000), &store, &events, &mut stats);

        assert_eq!(
            rx.try_recv().unwrap(),
            FirmwareEvent::SatTrackRequest { elapsed_ms: 5000 }
        );
    }

    #[test]
    fn test_handle_corrupt_datagram_is_dropped() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut stats = LinkStats::default();

        let mut frame = encode_status(&status_with_az(1.0));
        frame[10] ^= 0xFF;
        handle_datagram(&frame, &store, &events, &mut stats);
        handle_datagram(&[0x02, 0x10], &store, &events, &mut stats);

        assert_eq!(stats.decode_errors, 2);
        assert_eq!(reader.version(), 0);
        assert!(!reader.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_settings_from_config() {
        let config = LinkConfig::default();
        let settings = LinkSettings::from_config(&config).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(10));
        assert_eq!(settings.reconnect_interval, Duration::from_secs(5));

        let bad = LinkConfig {
            firmware_addr: "not an address".to_string(),
            ..LinkConfig::default()
        };
        assert!(LinkSettings::from_config(&bad).is_err());
    }

    #[tokio::test]
    async fn test_session_polls_and_sends_commands() {
        let port = MockPort::new();
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let (sender, mut commands) = CommandSender::channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown) = watch::channel(false);

        sender.send(Command::Standby).unwrap();

        let session_port = port.clone();
        let session = tokio::spawn(async move {
            let mut stats = LinkStats::default();
            let end = run_session(
                &session_port,
                &store,
                &mut commands,
                &events,
                &mut shutdown,
                Duration::from_millis(10),
                &mut stats,
            )
            .await;
            (end, stats)
        });

        sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(true).unwrap();
        let (end, stats) = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(end, SessionEnd::Shutdown));
        assert!(stats.polls_sent >= 3);
        assert_eq!(stats.commands_sent, 1);

        let poll = encode(&Command::ReadStatus);
        let sent = port.sent_frames();
        assert_eq!(sent.iter().filter(|f| **f == poll).count() as u64, stats.polls_sent);
        assert!(sent.contains(&encode(&Command::Standby)));
    }

    #[tokio::test]
    async fn test_session_routes_received_datagrams() {
        let port = MockPort::new();
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        let (_sender, mut commands) = CommandSender::channel();
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown) = watch::channel(false);

        port.inject(encode_status(&status_with_az(12.5)));
        port.inject(vec![0xFF; 7]);
        port.inject(encode_sat_track_request(700));

        let session_port = port.clone();
        let session = tokio::spawn(async move {
            let mut stats = LinkStats::default();
            run_session(
                &session_port,
                &store,
                &mut commands,
                &events,
                &mut shutdown,
                Duration::from_millis(10),
                &mut stats,
            )
            .await;
            stats
        });

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(FirmwareEvent::SatTrackRequest { elapsed_ms: 700 }));

        shutdown_tx.send(true).unwrap();
        let stats = session.await.unwrap();
        assert_eq!(stats.datagrams_received, 3);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(reader.snapshot().azimuth.angle, Some(12.5));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_stop() {
        let port = MockPort::new();
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let (sender, mut commands) = CommandSender::channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, mut shutdown) = watch::channel(true);

        sender
            .send(Command::AxisStop {
                axes: AxisMask::ALL,
            })
            .unwrap();

        let mut stats = LinkStats::default();
        let end = run_session(
            &port,
            &store,
            &mut commands,
            &events,
            &mut shutdown,
            Duration::from_millis(10),
            &mut stats,
        )
        .await;

        assert!(matches!(end, SessionEnd::Shutdown));
        assert_eq!(
            port.sent_frames().last().unwrap(),
            &encode(&Command::AxisStop {
                axes: AxisMask::ALL
            })
        );
    }

    #[tokio::test]
    async fn test_send_failure_ends_session() {
        let port = MockPort::new();
        port.set_send_error(std::io::ErrorKind::NetworkUnreachable);
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let (_sender, mut commands) = CommandSender::channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let mut stats = LinkStats::default();
        let end = tokio::time::timeout(
            Duration::from_secs(2),
            run_session(
                &port,
                &store,
                &mut commands,
                &events,
                &mut shutdown,
                Duration::from_millis(10),
                &mut stats,
            ),
        )
        .await
        .unwrap();

        match end {
            SessionEnd::SendFailed(TransportError::Send(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::NetworkUnreachable);
            }
            other => panic!("unexpected session end {:?}", other),
        }
        assert_eq!(stats.polls_sent, 0);
    }

    #[tokio::test]
    async fn test_closed_command_channel_ends_session() {
        let port = MockPort::new();
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let (sender, mut commands) = CommandSender::channel();
        drop(sender);
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let mut stats = LinkStats::default();
        let end = tokio::time::timeout(
            Duration::from_secs(2),
            run_session(
                &port,
                &store,
                &mut commands,
                &events,
                &mut shutdown,
                Duration::from_millis(10),
                &mut stats,
            ),
        )
        .await
        .unwrap();

        assert!(matches!(end, SessionEnd::CommandsClosed));
    }

    #[tokio::test]
    async fn test_run_link_over_loopback() {
        let firmware = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = LinkSettings {
            firmware: firmware.local_addr().unwrap(),
            bind_addr: "127.0.0.1:0".to_string(),
            poll_interval: Duration::from_millis(10),
            reconnect_interval: Duration::from_millis(50),
        };
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        let (_sender, commands) = CommandSender::channel();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let link = tokio::spawn(run_link(settings, store, commands, events, shutdown));

        let mut buf = [0u8; 64];
        let (n, acu) = tokio::time::timeout(Duration::from_secs(2), firmware.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], encode(&Command::ReadStatus).as_slice());

        firmware
            .send_to(&encode_status(&status_with_az(200.0)), acu)
            .await
            .unwrap();

        for _ in 0..100 {
            if reader.version() > 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reader.snapshot().azimuth.angle, Some(200.0));

        shutdown_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), link)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.polls_sent >= 1);
    }
}
