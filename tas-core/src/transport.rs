//! Blocking transport and the transport thread.
//!
//! The agent runs two threads: this one owns the socket, the control
//! thread owns everything else. They meet only at the [`QueueRouter`]
//! and the [`LinkGate`].
//!
//! ```text
//!  NetworkWorker::new(cfg).configure(addr).start(router)
//!        │
//!        ▼  spawns "tas-transport"
//!  connect ──► set timeouts ──► gate.mark_connected()
//!        │
//!        ▼  loop
//!  flush outgoing ──► read envelope ──► decode ──► push_incoming
//!        ▲                   │
//!        └── receive timeout ┘ (flush, check keep-running)
//! ```

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::codec::{self, LENGTH_SIZE};
use crate::error::{Error, ProtocolError, TransportError};
use crate::link::LinkGate;
use crate::message::Message;
use crate::queue::QueueRouter;

// ── TransportConfig ──────────────────────────────────────────────

/// Socket and framing parameters for the transport thread.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Read timeout; each expiry flushes outgoing queues and checks the
    /// keep-running flag.
    pub receive_timeout: Duration,
    /// Consecutive malformed frames tolerated before declaring desync.
    pub max_consecutive_malformed: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_millis(20),
            max_consecutive_malformed: 8,
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

// ── Transport ────────────────────────────────────────────────────

/// Framed, blocking I/O over any byte stream.
pub struct Transport<S> {
    stream: S,
    router: Arc<QueueRouter>,
    running: Arc<AtomicBool>,
    config: TransportConfig,
    malformed: u32,
}

impl<S: Read + Write> Transport<S> {
    pub fn new(
        stream: S,
        router: Arc<QueueRouter>,
        running: Arc<AtomicBool>,
        config: TransportConfig,
    ) -> Self {
        Self {
            stream,
            router,
            running,
            config,
            malformed: 0,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Read exactly `n` bytes.
    ///
    /// On a receive timeout `on_idle` is called with the number of bytes
    /// read so far; an error from it aborts the read.
    pub fn read_exact<F>(&mut self, n: usize, mut on_idle: F) -> Result<Vec<u8>, TransportError>
    where
        F: FnMut(&mut Self, usize) -> Result<(), TransportError>,
    {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::PeerClosed),
                Ok(k) => filled += k,
                Err(e) if is_timeout(&e) => on_idle(self, filled)?,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(buf)
    }

    pub fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), TransportError> {
        while !bytes.is_empty() {
            match self.stream.write(bytes) {
                Ok(0) => return Err(TransportError::PeerClosed),
                Ok(k) => bytes = &bytes[k..],
                Err(e) if is_timeout(&e) || e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(())
    }

    /// Encode and send everything queued for the editor.
    ///
    /// Returns the number of messages written.
    pub fn flush_outgoing(&mut self) -> Result<usize, TransportError> {
        let entries = self.router.drain_outgoing_all();
        if entries.is_empty() {
            return Ok(0);
        }

        let mut wire = Vec::new();
        let mut sent = 0;
        for entry in entries {
            let kind = entry.message.kind();
            match codec::encode(&entry.message) {
                Ok(frame) => {
                    trace!(%kind, len = frame.len(), "sending");
                    wire.extend_from_slice(&frame);
                    sent += 1;
                }
                Err(e) => warn!(%kind, error = %e, "dropping unencodable outgoing message"),
            }
        }
        self.write_all(&wire)?;
        self.stream.flush()?;
        Ok(sent)
    }

    /// Receive-timeout hook: flush, then stop if asked to and no byte of
    /// the current envelope has been consumed.
    fn idle(&mut self, progress: usize) -> Result<(), TransportError> {
        self.flush_outgoing()?;
        if progress == 0 && !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }

    /// Read one envelope and return its body (kind byte + payload).
    pub fn read_envelope(&mut self) -> Result<Vec<u8>, Error> {
        let header = self.read_exact(LENGTH_SIZE, Self::idle)?;
        let length = u16::from_be_bytes([header[0], header[1]]) as usize;
        if length == 0 {
            return Err(ProtocolError::EmptyFrame.into());
        }
        let body = self.read_exact(length, |t, p| t.idle(LENGTH_SIZE + p))?;
        Ok(body)
    }

    /// Read and decode one message.
    pub fn receive(&mut self) -> Result<Message, Error> {
        let body = self.read_envelope()?;
        Ok(codec::decode_body(&body)?)
    }

    /// Pump messages until shutdown or a fatal error.
    ///
    /// Returns `Ok(())` only for a requested shutdown.
    pub fn run(&mut self) -> Result<(), TransportError> {
        let result = self.pump();
        match result {
            Err(TransportError::Shutdown) => {
                debug!("transport stopping on request");
                Ok(())
            }
            other => other,
        }
    }

    fn pump(&mut self) -> Result<(), TransportError> {
        loop {
            self.flush_outgoing()?;
            match self.receive() {
                Ok(message) => {
                    self.malformed = 0;
                    debug!(kind = %message.kind(), "received");
                    self.router.push_incoming(message);
                }
                Err(Error::Protocol(e)) => {
                    self.malformed += 1;
                    warn!(error = %e, consecutive = self.malformed, "dropping malformed frame");
                    if self.malformed >= self.config.max_consecutive_malformed {
                        return Err(TransportError::Desync(self.malformed));
                    }
                }
                Err(Error::Transport(e)) => return Err(e),
                Err(other) => {
                    return Err(TransportError::Io(io::Error::other(other.to_string())));
                }
            }
        }
    }
}

// ── NetworkWorker ────────────────────────────────────────────────

/// Two-phase transport setup: `configure(address)` then `start(router)`.
#[derive(Debug, Clone, Default)]
pub struct NetworkWorker {
    config: TransportConfig,
    address: Option<String>,
}

impl NetworkWorker {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            address: None,
        }
    }

    /// Set the editor address (`host:port`).
    pub fn configure(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Spawn the transport thread.
    ///
    /// Fails with `NotConfigured` if no address was set.
    pub fn start(self, router: Arc<QueueRouter>) -> Result<NetworkHandle, TransportError> {
        let address = self.address.ok_or(TransportError::NotConfigured)?;
        let config = self.config;
        let gate = Arc::new(LinkGate::new());
        let running = Arc::new(AtomicBool::new(true));
        gate.begin_connect()?;

        let thread = {
            let gate = Arc::clone(&gate);
            let running = Arc::clone(&running);
            let address = address.clone();
            thread::Builder::new()
                .name("tas-transport".into())
                .spawn(move || transport_thread(&address, config, router, running, &gate))?
        };

        Ok(NetworkHandle {
            address,
            gate,
            running,
            thread: Some(thread),
        })
    }
}

fn connect(address: &str, timeout: Duration) -> Result<TcpStream, TransportError> {
    let failed = |reason: String| TransportError::ConnectFailed {
        address: address.to_string(),
        reason,
    };

    let addrs: Vec<SocketAddr> = address
        .to_socket_addrs()
        .map_err(|e| failed(e.to_string()))?
        .collect();

    let mut last = String::from("address resolved to nothing");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last = e.to_string(),
        }
    }
    Err(failed(last))
}

fn serve(
    address: &str,
    config: TransportConfig,
    router: Arc<QueueRouter>,
    running: Arc<AtomicBool>,
    gate: &LinkGate,
) -> Result<(), TransportError> {
    let stream = connect(address, config.connect_timeout)?;
    stream.set_read_timeout(Some(config.receive_timeout))?;
    stream.set_nodelay(true)?;
    gate.mark_connected()?;
    info!(%address, "connected to editor");

    let mut transport = Transport::new(stream, router, running, config);
    transport.run()
}

fn transport_thread(
    address: &str,
    config: TransportConfig,
    router: Arc<QueueRouter>,
    running: Arc<AtomicBool>,
    gate: &LinkGate,
) -> Result<(), TransportError> {
    let result = serve(address, config, router, running, gate);

    gate.begin_disconnect();
    match &result {
        Ok(()) => gate.mark_disconnected("shutdown requested"),
        Err(e) => gate.mark_disconnected(e.to_string()),
    }
    result
}

// ── NetworkHandle ────────────────────────────────────────────────

/// Owner's view of a running transport thread.
///
/// Dropping the handle cancels and joins the thread.
#[derive(Debug)]
pub struct NetworkHandle {
    address: String,
    gate: Arc<LinkGate>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), TransportError>>>,
}

impl NetworkHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Block until the link is up, or fail if it never comes up.
    pub fn wait_connected(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.gate.wait_connected(timeout).map_err(|e| match e {
            TransportError::ConnectFailed { reason, .. } => TransportError::ConnectFailed {
                address: self.address.clone(),
                reason,
            },
            other => other,
        })
    }

    pub fn gate(&self) -> Arc<LinkGate> {
        Arc::clone(&self.gate)
    }

    /// Ask the thread to stop at the next envelope boundary.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the thread and return how it ended.
    pub fn join(mut self) -> Result<(), TransportError> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<(), TransportError> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(TransportError::Io(io::Error::other(
                    "transport thread panicked",
                )))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
            let _ = self.join_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::message::{IsPaused, MessageKind, SetCurrentFrame};

    /// In-memory stream that hands out one byte per read and a timeout
    /// whenever its input runs dry.
    #[derive(Default)]
    struct Trickle {
        input: VecDeque<u8>,
        output: Vec<u8>,
        timeouts: usize,
        closed: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.input.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None if self.closed => Ok(0),
                None => {
                    self.timeouts += 1;
                    Err(io::Error::new(ErrorKind::WouldBlock, "dry"))
                }
            }
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn transport(input: Vec<u8>, closed: bool) -> (Transport<Trickle>, Arc<QueueRouter>, Arc<AtomicBool>) {
        let router = Arc::new(QueueRouter::new());
        let running = Arc::new(AtomicBool::new(true));
        let stream = Trickle {
            input: input.into(),
            closed,
            ..Default::default()
        };
        let t = Transport::new(stream, Arc::clone(&router), Arc::clone(&running), TransportConfig::default());
        (t, router, running)
    }

    fn frames(messages: &[Message]) -> Vec<u8> {
        messages.iter().flat_map(|m| codec::encode(m).unwrap()).collect()
    }

    #[test]
    fn reassembles_envelopes_from_single_bytes() {
        let sent = vec![
            Message::project_name("speedrun"),
            Message::SetCurrentFrame(SetCurrentFrame { frame: 42 }),
        ];
        let (mut t, _, _) = transport(frames(&sent), true);
        assert_eq!(t.receive().unwrap(), sent[0]);
        assert_eq!(t.receive().unwrap(), sent[1]);
        assert!(matches!(
            t.receive(),
            Err(Error::Transport(TransportError::PeerClosed))
        ));
    }

    #[test]
    fn empty_frame_keeps_stream_aligned() {
        let mut wire = vec![0, 0];
        wire.extend(frames(&[Message::IsPaused(IsPaused { paused: true })]));
        let (mut t, _, _) = transport(wire, true);
        assert!(matches!(
            t.receive(),
            Err(Error::Protocol(ProtocolError::EmptyFrame))
        ));
        assert_eq!(t.receive().unwrap(), Message::IsPaused(IsPaused { paused: true }));
    }

    #[test]
    fn idle_flushes_outgoing_and_stops_at_boundary() {
        let (mut t, router, running) = transport(Vec::new(), false);
        router.push_outgoing(Message::done(0, 5, true));
        running.store(false, Ordering::SeqCst);

        assert!(t.run().is_ok());
        let stream = t.into_inner();
        assert_eq!(stream.output, codec::encode(&Message::done(0, 5, true)).unwrap());
        assert_eq!(stream.timeouts, 1);
    }

    #[test]
    fn shutdown_waits_for_partial_envelope() {
        let frame = codec::encode(&Message::project_name("x")).unwrap();
        let (mut t, _, running) = transport(frame[..3].to_vec(), false);
        running.store(false, Ordering::SeqCst);

        // Mid-envelope timeouts do not stop the read; feed the rest once
        // the reader has idled a few times.
        let mut calls = 0;
        let result = t.read_exact(frame.len(), |t, progress| {
            calls += 1;
            assert!(progress > 0);
            if calls == 3 {
                t.stream.input.extend(&frame[3..]);
            }
            t.idle(progress)
        });
        assert_eq!(result.unwrap(), frame);
    }

    #[test]
    fn malformed_frames_escalate_to_desync() {
        let mut wire = Vec::new();
        for _ in 0..3 {
            wire.extend_from_slice(&[0, 1, 0xEE]);
        }
        let (mut t, _, _) = transport(wire, true);
        t.config.max_consecutive_malformed = 3;
        assert!(matches!(t.run(), Err(TransportError::Desync(3))));
    }

    #[test]
    fn good_frame_resets_malformed_count() {
        let mut wire = vec![0, 1, 0xEE, 0, 1, 0xEE];
        wire.extend(frames(&[Message::IsPaused(IsPaused { paused: false })]));
        wire.extend_from_slice(&[0, 1, 0xEE, 0, 1, 0xEE]);
        let (mut t, router, _) = transport(wire, true);
        t.config.max_consecutive_malformed = 3;
        assert!(matches!(t.run(), Err(TransportError::PeerClosed)));
        assert_eq!(router.drain_incoming(MessageKind::IsPaused).len(), 1);
    }

    #[test]
    fn start_without_address_fails() {
        let err = NetworkWorker::new(TransportConfig::default())
            .start(Arc::new(QueueRouter::new()))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured));
    }
}
