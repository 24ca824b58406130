//! TCP delivery of silence events to the downstream controller.
//!
//! The worker owns the receiving end of the notification queue and delivers events one
//! at a time in queue order. An event stays with the worker until a write succeeds:
//! failures are logged, the connection is dropped, and the same event is retried after
//! the reconnect delay. Events queued behind it wait, so order and at-least-once
//! delivery both hold.

use crate::config::{DeliveryMode, ZettaSettings};
use crate::detector::SilenceEvent;
use crate::dispatcher::EventReceiver;
use crossbeam_channel::RecvTimeoutError;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How often an idle worker re-checks the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to controller at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to controller at {addr}: {source}")]
    Write {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub mode: DeliveryMode,
    pub reconnect_delay: Duration,
    pub write_timeout: Option<Duration>,
}

impl TransportConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ZettaSettings> for TransportConfig {
    fn from(zetta: &ZettaSettings) -> Self {
        Self {
            host: zetta.host.clone(),
            port: zetta.port,
            mode: zetta.mode,
            reconnect_delay: zetta.reconnect_delay(),
            write_timeout: zetta.write_timeout(),
        }
    }
}

/// Bytes put on the wire for `event` under `mode`.
pub fn frame(event: &SilenceEvent, mode: DeliveryMode) -> Vec<u8> {
    let mut bytes = event.message.as_bytes().to_vec();
    if mode == DeliveryMode::Persistent {
        bytes.push(b'\n');
    }
    bytes
}

pub struct ControllerTransport {
    config: TransportConfig,
    session: Option<TcpStream>,
}

impl ControllerTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open the long-lived session up front. Per-event mode has nothing to open.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.config.mode == DeliveryMode::Persistent && self.session.is_none() {
            info!(addr = %self.config.addr(), "Opening socket to Zetta");
            self.session = Some(self.open()?);
        }
        Ok(())
    }

    /// One delivery attempt for `event`.
    pub fn deliver(&mut self, event: &SilenceEvent) -> Result<(), TransportError> {
        let payload = frame(event, self.config.mode);
        debug!(message = %event.message, mode = self.config.mode.label(), "Sending message");
        match self.config.mode {
            DeliveryMode::Persistent => {
                if self.session.as_ref().is_some_and(peer_closed) {
                    info!(addr = %self.config.addr(), "Zetta closed the session; reconnecting");
                    self.session = None;
                }
                self.connect()?;
                let result = match self.session.as_mut() {
                    Some(stream) => stream.write_all(&payload).and_then(|()| stream.flush()),
                    None => Ok(()),
                };
                if let Err(source) = result {
                    // The peer may have gone away; reconnect on the next attempt.
                    self.session = None;
                    return Err(self.write_error(source));
                }
                Ok(())
            }
            DeliveryMode::PerEvent => {
                let mut stream = self.open()?;
                stream
                    .write_all(&payload)
                    .and_then(|()| stream.flush())
                    .map_err(|source| self.write_error(source))?;
                if let Err(err) = stream.shutdown(Shutdown::Both) {
                    debug!("controller socket shutdown failed: {err}");
                }
                Ok(())
            }
        }
    }

    fn open(&self) -> Result<TcpStream, TransportError> {
        let addr = self.config.addr();
        let stream = TcpStream::connect(addr.as_str()).map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;
        if let Some(timeout) = self.config.write_timeout {
            stream
                .set_write_timeout(Some(timeout))
                .map_err(|source| TransportError::Connect { addr, source })?;
        }
        Ok(stream)
    }

    fn write_error(&self, source: io::Error) -> TransportError {
        TransportError::Write {
            addr: self.config.addr(),
            source,
        }
    }
}

/// Whether the controller has hung up on `stream`. A write after the peer's FIN still
/// succeeds locally, so the session is checked before it is reused.
fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut buf = [0u8; 1];
    let closed = match stream.peek(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => !matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
    };
    stream.set_nonblocking(false).is_err() || closed
}

/// Run the transport on its own thread.
pub fn spawn_transport_worker(
    transport: ControllerTransport,
    receiver: EventReceiver,
    stop: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("zetta-transport".to_string())
        .spawn(move || run_transport_worker(transport, receiver, &stop))
}

/// Dequeue and deliver until stopped or until the queue closes and drains.
pub fn run_transport_worker(
    mut transport: ControllerTransport,
    receiver: EventReceiver,
    stop: &AtomicBool,
) {
    if let Err(err) = transport.connect() {
        error!("{err}; will retry when the first event arrives");
    }

    while !stop.load(Ordering::Relaxed) {
        let event = match receiver.dequeue_timeout(STOP_POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("notification queue closed; transport worker exiting");
                break;
            }
        };
        if !deliver_until_sent(&mut transport, &event, stop) {
            break;
        }
    }
}

/// Retry `event` until it is written. Returns `false` if stopped first.
fn deliver_until_sent(
    transport: &mut ControllerTransport,
    event: &SilenceEvent,
    stop: &AtomicBool,
) -> bool {
    let mut attempt = 1u32;
    loop {
        match transport.deliver(event) {
            Ok(()) => {
                info!(attempt, "silence notification delivered to Zetta");
                return true;
            }
            Err(err) => error!(attempt, "{err}"),
        }
        if !sleep_unless_stopped(transport.config().reconnect_delay, stop) {
            warn!(message = %event.message, "stopping with an undelivered silence notification");
            return false;
        }
        attempt = attempt.saturating_add(1);
    }
}

fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::notification_queue;
    use crate::sampler::Sample;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;

    fn event(message: &str) -> SilenceEvent {
        SilenceEvent::new(message, Sample::new(-60.0, -70.0))
    }

    fn config(port: u16, mode: DeliveryMode) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".to_string(),
            port,
            mode,
            reconnect_delay: Duration::from_millis(20),
            write_timeout: Some(Duration::from_secs(2)),
        }
    }

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// A port with nothing listening on it.
    fn closed_port() -> u16 {
        let (listener, port) = listener();
        drop(listener);
        port
    }

    #[test]
    fn persistent_frames_end_with_newline() {
        assert_eq!(frame(&event("SILENCE"), DeliveryMode::Persistent), b"SILENCE\n");
    }

    #[test]
    fn per_event_frames_are_bare() {
        assert_eq!(frame(&event("SILENCE"), DeliveryMode::PerEvent), b"SILENCE");
    }

    #[test]
    fn addr_joins_host_and_port() {
        assert_eq!(config(10001, DeliveryMode::Persistent).addr(), "127.0.0.1:10001");
    }

    #[test]
    fn persistent_mode_reuses_one_connection_in_order() {
        let (listener, port) = listener();
        let (tx, rx) = notification_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = spawn_transport_worker(
            ControllerTransport::new(config(port, DeliveryMode::Persistent)),
            rx,
            Arc::clone(&stop),
        )
        .unwrap();

        for tag in ["E1", "E2", "E3"] {
            tx.enqueue(event(tag)).unwrap();
        }

        let (conn, _) = listener.accept().expect("accept");
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut lines = BufReader::new(conn).lines();
        let got: Vec<String> = (0..3).map(|_| lines.next().unwrap().unwrap()).collect();
        assert_eq!(got, vec!["E1", "E2", "E3"]);

        drop(tx);
        worker.join().unwrap();
    }

    #[test]
    fn persistent_mode_reconnects_after_controller_hangs_up() {
        let (listener, port) = listener();
        let (tx, rx) = notification_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = spawn_transport_worker(
            ControllerTransport::new(config(port, DeliveryMode::Persistent)),
            rx,
            Arc::clone(&stop),
        )
        .unwrap();

        tx.enqueue(event("E1")).unwrap();
        let (first, _) = listener.accept().expect("accept");
        first.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut lines = BufReader::new(first).lines();
        assert_eq!(lines.next().unwrap().unwrap(), "E1");
        drop(lines);
        thread::sleep(Duration::from_millis(100));

        tx.enqueue(event("E2")).unwrap();
        tx.enqueue(event("E3")).unwrap();
        let (second, _) = listener.accept().expect("reconnect");
        second.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut lines = BufReader::new(second).lines();
        let got: Vec<String> = (0..2).map(|_| lines.next().unwrap().unwrap()).collect();
        assert_eq!(got, vec!["E2", "E3"]);

        drop(tx);
        worker.join().unwrap();
    }

    #[test]
    fn live_session_is_not_mistaken_for_closed() {
        let (listener, port) = listener();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (server, _) = listener.accept().unwrap();
        assert!(!peer_closed(&client));
        drop(server);
        thread::sleep(Duration::from_millis(100));
        assert!(peer_closed(&client));
    }

    #[test]
    fn per_event_mode_opens_a_connection_per_event() {
        let (listener, port) = listener();
        let (tx, rx) = notification_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = spawn_transport_worker(
            ControllerTransport::new(config(port, DeliveryMode::PerEvent)),
            rx,
            Arc::clone(&stop),
        )
        .unwrap();

        tx.enqueue(event("FIRST")).unwrap();
        tx.enqueue(event("SECOND")).unwrap();

        let mut got = Vec::new();
        for _ in 0..2 {
            let (mut conn, _) = listener.accept().expect("accept");
            conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let mut body = String::new();
            conn.read_to_string(&mut body).unwrap();
            got.push(body);
        }
        assert_eq!(got, vec!["FIRST", "SECOND"]);

        drop(tx);
        worker.join().unwrap();
    }

    #[test]
    fn connect_failure_is_reported() {
        let mut transport =
            ControllerTransport::new(config(closed_port(), DeliveryMode::Persistent));
        let err = transport.connect().unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!transport.is_connected());
    }

    #[test]
    fn per_event_connect_is_lazy() {
        let mut transport = ControllerTransport::new(config(closed_port(), DeliveryMode::PerEvent));
        assert!(transport.connect().is_ok());
        assert!(transport.deliver(&event("x")).is_err());
    }

    #[test]
    fn undelivered_event_is_retried_until_controller_appears() {
        let port = closed_port();
        let (tx, rx) = notification_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = spawn_transport_worker(
            ControllerTransport::new(config(port, DeliveryMode::Persistent)),
            rx,
            Arc::clone(&stop),
        )
        .unwrap();
        tx.enqueue(event("HELD")).unwrap();
        tx.enqueue(event("NEXT")).unwrap();

        // Let a few attempts fail first.
        thread::sleep(Duration::from_millis(100));
        let listener = TcpListener::bind(("127.0.0.1", port)).expect("rebind");
        let (conn, _) = listener.accept().expect("accept");
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut lines = BufReader::new(conn).lines();
        assert_eq!(lines.next().unwrap().unwrap(), "HELD");
        assert_eq!(lines.next().unwrap().unwrap(), "NEXT");

        drop(tx);
        worker.join().unwrap();
    }

    #[test]
    fn stop_flag_ends_an_idle_worker() {
        let (_tx, rx) = notification_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = spawn_transport_worker(
            ControllerTransport::new(config(closed_port(), DeliveryMode::PerEvent)),
            rx,
            Arc::clone(&stop),
        )
        .unwrap();
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }

    #[test]
    fn stop_flag_interrupts_retry_loop() {
        let (tx, rx) = notification_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let mut cfg = config(closed_port(), DeliveryMode::PerEvent);
        cfg.reconnect_delay = Duration::from_secs(60);
        let worker =
            spawn_transport_worker(ControllerTransport::new(cfg), rx, Arc::clone(&stop)).unwrap();
        tx.enqueue(event("stuck")).unwrap();
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
