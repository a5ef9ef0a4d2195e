//! TCP implementation of [`Transport`].
//!
//! Each endpoint owns three kinds of bounded queue, all sized by the
//! endpoint's high-water mark:
//!
//! ```text
//! send() ──try_send──► outbound ──router task──► per-peer queue ──writer task──► socket
//! socket ──reader task──► topic filter ──try_send──► inbound ──try_recv──► try_receive()
//! ```
//!
//! Only channel operations happen on the caller's thread.  A full outbound
//! queue surfaces as [`TransportError::WouldBlock`]; a full per-peer queue
//! drops the message for that peer only; a full inbound queue drops the
//! newest message.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use framelink_core::protocol::{
    decode_envelope_header, encode_envelope, Envelope, ENVELOPE_HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{
    Endpoint, EndpointConfig, EndpointMode, EndpointStatus, SocketRole, StatusCell, TcpAddress,
    Transport, TransportError,
};

/// Poll period of [`Endpoint::drain`].
const DRAIN_POLL: Duration = Duration::from_millis(5);
/// Pause after a failed `accept` so a persistent error cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type PeerId = u64;
type AddressKey = (EndpointMode, String);
type Registry = Arc<Mutex<HashSet<AddressKey>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Opens TCP endpoints on a Tokio runtime.
///
/// Tracks every live address so a second endpoint on the same address fails
/// with [`TransportError::AddressInUse`] instead of racing the first.
pub struct TcpTransport {
    runtime: Handle,
    registry: Registry,
}

impl TcpTransport {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            registry: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn reserve(&self, key: AddressKey) -> Result<(), TransportError> {
        let mut live = lock(&self.registry);
        if live.contains(&key) {
            return Err(TransportError::AddressInUse(key.1));
        }
        live.insert(key);
        Ok(())
    }

    fn bind(
        &self,
        config: &EndpointConfig,
        address: &TcpAddress,
    ) -> Result<(TcpListener, SocketAddr, AddressKey), TransportError> {
        let requested = (EndpointMode::Bind, address.socket_string());
        let ephemeral = address.port == 0;
        if !ephemeral {
            self.reserve(requested.clone())?;
        }

        let bind_failed = |source| TransportError::BindFailed {
            address: config.address.clone(),
            source,
        };
        let bound = std::net::TcpListener::bind(address.socket_string())
            .and_then(|l| l.set_nonblocking(true).map(|()| l))
            .and_then(|l| {
                let _rt = self.runtime.enter();
                TcpListener::from_std(l)
            })
            .and_then(|l| l.local_addr().map(|addr| (l, addr)));

        match bound {
            Ok((listener, local)) if ephemeral => {
                let key = (EndpointMode::Bind, local.to_string());
                self.reserve(key.clone())?;
                Ok((listener, local, key))
            }
            Ok((listener, local)) => Ok((listener, local, requested)),
            Err(source) => {
                if !ephemeral {
                    lock(&self.registry).remove(&requested);
                }
                Err(bind_failed(source))
            }
        }
    }
}

impl Transport for TcpTransport {
    fn open(&self, config: &EndpointConfig) -> Result<Arc<dyn Endpoint>, TransportError> {
        let mode = config.effective_mode();
        let address = TcpAddress::parse(&config.address, mode)?;
        let hwm = config.high_water_mark.max(1);

        let (outbound_tx, outbound_rx) = mpsc::channel(hwm);
        let (inbound_tx, inbound_rx) = mpsc::channel(hwm);
        let (shutdown, _) = watch::channel(false);

        let (listener, local_addr, key, status) = match mode {
            EndpointMode::Bind => {
                let (listener, local, key) = self.bind(config, &address)?;
                (Some(listener), Some(local), key, EndpointStatus::Ready)
            }
            EndpointMode::Connect => {
                let key = (EndpointMode::Connect, address.socket_string());
                self.reserve(key.clone())?;
                (None, None, key, EndpointStatus::Connecting)
            }
        };

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            role: config.role,
            mode,
            status: StatusCell::new(status),
            closed: AtomicBool::new(false),
            topics: config.topics.iter().map(|t| t.as_bytes().to_vec()).collect(),
            max_body: config.max_body_size,
            hwm,
            peers: Mutex::new(HashMap::new()),
            next_peer: AtomicU64::new(0),
            round_robin: AtomicU64::new(0),
            peer_joined: Notify::new(),
            pending: AtomicUsize::new(0),
            inbound_tx,
            shutdown,
            registry: Arc::clone(&self.registry),
            address_key: key,
        });

        self.runtime.spawn(route_outbound(
            Arc::clone(&shared),
            outbound_rx,
            shared.shutdown.subscribe(),
        ));
        match listener {
            Some(listener) => {
                self.runtime.spawn(accept_loop(
                    Arc::clone(&shared),
                    listener,
                    shared.shutdown.subscribe(),
                ));
            }
            None => {
                self.runtime.spawn(connect_once(
                    Arc::clone(&shared),
                    address.socket_string(),
                    config.connect_timeout(),
                    shared.shutdown.subscribe(),
                ));
            }
        }

        debug!(
            endpoint = %config.name,
            role = %config.role,
            address = %address,
            ?mode,
            "endpoint opened"
        );

        Ok(Arc::new(TcpEndpoint {
            shared,
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            local_addr,
            exchange: Mutex::new(Exchange::Idle),
        }))
    }
}

// ── Shared endpoint state ─────────────────────────────────────────────────────

struct PeerHandle {
    tx: mpsc::Sender<Arc<Vec<u8>>>,
    addr: SocketAddr,
}

struct Inbound {
    peer: PeerId,
    envelope: Envelope,
}

struct Outbound {
    wire: Vec<u8>,
    /// Reply target for repliers.
    peer: Option<PeerId>,
}

/// State shared between the endpoint handle and its background tasks.
struct Shared {
    name: String,
    role: SocketRole,
    mode: EndpointMode,
    status: StatusCell,
    closed: AtomicBool,
    topics: Vec<Vec<u8>>,
    max_body: usize,
    hwm: usize,
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    next_peer: AtomicU64,
    round_robin: AtomicU64,
    peer_joined: Notify,
    /// Messages accepted by `send` and not yet written to a socket.
    pending: AtomicUsize,
    inbound_tx: mpsc::Sender<Inbound>,
    shutdown: watch::Sender<bool>,
    registry: Registry,
    address_key: AddressKey,
}

impl Shared {
    fn accepts(&self, envelope: &Envelope) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|p| envelope.matches_prefix(p))
    }

    fn attach_peer(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            trace!(endpoint = %self.name, "set_nodelay failed: {e}");
        }
        let (reader, writer) = stream.into_split();
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.hwm);
        lock(&self.peers).insert(id, PeerHandle { tx, addr });
        self.peer_joined.notify_waiters();

        debug!(endpoint = %self.name, peer = id, %addr, "peer attached");
        tokio::spawn(write_loop(
            Arc::clone(self),
            id,
            writer,
            rx,
            self.shutdown.subscribe(),
        ));
        tokio::spawn(read_loop(
            Arc::clone(self),
            id,
            reader,
            self.shutdown.subscribe(),
        ));
    }

    fn drop_peer(&self, peer: PeerId) {
        if let Some(handle) = lock(&self.peers).remove(&peer) {
            debug!(endpoint = %self.name, peer, addr = %handle.addr, "peer detached");
        }
    }

    /// Publisher fan-out.  A full peer queue drops the message for that peer.
    fn fan_out(&self, wire: &Arc<Vec<u8>>) {
        for (id, peer) in lock(&self.peers).iter() {
            match peer.tx.try_send(Arc::clone(wire)) {
                Ok(()) => {
                    self.pending.fetch_add(1, Ordering::AcqRel);
                }
                Err(TrySendError::Full(_)) => {
                    trace!(endpoint = %self.name, peer = *id, "peer queue full; message dropped for peer");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    fn peer_sender(&self, peer: PeerId) -> Option<mpsc::Sender<Arc<Vec<u8>>>> {
        lock(&self.peers).get(&peer).map(|p| p.tx.clone())
    }

    fn next_round_robin_peer(&self) -> Option<mpsc::Sender<Arc<Vec<u8>>>> {
        let peers = lock(&self.peers);
        if peers.is_empty() {
            return None;
        }
        let mut ids: Vec<_> = peers.keys().copied().collect();
        ids.sort_unstable();
        let turn = self.round_robin.fetch_add(1, Ordering::Relaxed) as usize % ids.len();
        peers.get(&ids[turn]).map(|p| p.tx.clone())
    }

    /// Hands `wire` to one peer queue, waiting for queue space.
    async fn deliver(&self, tx: mpsc::Sender<Arc<Vec<u8>>>, wire: Arc<Vec<u8>>) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(wire).await.is_ok() {
            true
        } else {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    fn deliver_inbound(&self, peer: PeerId, envelope: Envelope) {
        match self.role {
            SocketRole::Publisher => return,
            SocketRole::Subscriber if !self.accepts(&envelope) => return,
            _ => {}
        }
        match self.inbound_tx.try_send(Inbound { peer, envelope }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(endpoint = %self.name, "inbound queue full; message dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn release_address(&self) {
        lock(&self.registry).remove(&self.address_key);
    }
}

// ── Background tasks ──────────────────────────────────────────────────────────

/// Resolves once the endpoint is closing.  The borrowed watch value is
/// released before returning so callers may await inside `select!` arms.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn route_outbound(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let wire = Arc::new(msg.wire);

        match (shared.role, msg.peer) {
            (SocketRole::Publisher, _) => shared.fan_out(&wire),
            (SocketRole::Replier, Some(peer)) => match shared.peer_sender(peer) {
                Some(tx) => {
                    if !shared.deliver(tx, wire).await {
                        warn!(endpoint = %shared.name, peer, "requester left before the reply was sent");
                    }
                }
                None => warn!(endpoint = %shared.name, peer, "requester left before the reply was sent"),
            },
            (SocketRole::Requester, _) => loop {
                let joined = shared.peer_joined.notified();
                if let Some(tx) = shared.next_round_robin_peer() {
                    if shared.deliver(tx, Arc::clone(&wire)).await {
                        break;
                    }
                    continue;
                }
                tokio::select! {
                    _ = stopped(&mut shutdown) => {
                        shared.pending.fetch_sub(1, Ordering::AcqRel);
                        return;
                    }
                    _ = joined => {}
                }
            },
            _ => {}
        }
        shared.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => shared.attach_peer(stream, addr),
            Err(e) => {
                warn!(endpoint = %shared.name, "accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    trace!(endpoint = %shared.name, "listener released");
}

/// Dials the peer exactly once, giving up after `timeout`.
async fn connect_once(
    shared: Arc<Shared>,
    target: String,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let connected = tokio::select! {
        _ = stopped(&mut shutdown) => return,
        result = dial(&target, timeout) => result,
    };

    match connected {
        Ok((stream, addr)) => {
            shared.attach_peer(stream, addr);
            shared.status.set(EndpointStatus::Ready);
            debug!(endpoint = %shared.name, %addr, "connected");
        }
        Err(e) => {
            warn!(endpoint = %shared.name, %target, "connect failed: {e}");
            shared.status.set(EndpointStatus::Broken);
        }
    }
}

async fn dial(target: &str, timeout: Duration) -> std::io::Result<(TcpStream, SocketAddr)> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no answer within {timeout:?}"),
            ))
        }
    };
    let addr = stream.peer_addr()?;
    Ok((stream, addr))
}

async fn write_loop(
    shared: Arc<Shared>,
    peer: PeerId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Arc<Vec<u8>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wire = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            wire = rx.recv() => match wire {
                Some(wire) => wire,
                None => break,
            },
        };
        let written = writer.write_all(&wire).await;
        shared.pending.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = written {
            debug!(endpoint = %shared.name, peer, "write failed: {e}");
            break;
        }
    }

    rx.close();
    while rx.try_recv().is_ok() {
        shared.pending.fetch_sub(1, Ordering::AcqRel);
    }
    shared.drop_peer(peer);
    let _ = writer.shutdown().await;
}

async fn read_loop(
    shared: Arc<Shared>,
    peer: PeerId,
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let reason = tokio::select! {
        _ = stopped(&mut shutdown) => return,
        reason = read_envelopes(&shared, peer, &mut reader) => reason,
    };

    shared.drop_peer(peer);
    if shared.mode == EndpointMode::Connect {
        warn!(endpoint = %shared.name, "connection lost: {reason}");
        shared.status.set(EndpointStatus::Broken);
    } else {
        debug!(endpoint = %shared.name, peer, "peer disconnected: {reason}");
    }
}

/// Reads envelopes until the stream ends or misbehaves, returning why.
async fn read_envelopes(shared: &Shared, peer: PeerId, reader: &mut OwnedReadHalf) -> String {
    loop {
        let mut header = [0u8; ENVELOPE_HEADER_SIZE];
        if let Err(e) = reader.read_exact(&mut header).await {
            return if e.kind() == std::io::ErrorKind::UnexpectedEof {
                "closed by peer".to_string()
            } else {
                e.to_string()
            };
        }
        let (topic_len, body_len) = match decode_envelope_header(&header, shared.max_body) {
            Ok(lens) => lens,
            Err(e) => return e.to_string(),
        };

        let mut topic = vec![0u8; topic_len];
        let mut body = vec![0u8; body_len];
        if let Err(e) = reader.read_exact(&mut topic).await {
            return e.to_string();
        }
        if let Err(e) = reader.read_exact(&mut body).await {
            return e.to_string();
        }
        shared.deliver_inbound(peer, Envelope { topic, body });
    }
}

// ── Endpoint handle ───────────────────────────────────────────────────────────

/// Request/reply alternation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exchange {
    Idle,
    /// Requester sent a request and must receive before sending again.
    AwaitingReply,
    /// Replier received a request from this peer and owes it a reply.
    Replying(PeerId),
}

/// A TCP-backed [`Endpoint`].  Dropping it closes it.
pub struct TcpEndpoint {
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<Outbound>,
    inbound_rx: Mutex<mpsc::Receiver<Inbound>>,
    local_addr: Option<SocketAddr>,
    exchange: Mutex<Exchange>,
}

impl TcpEndpoint {
    fn enqueue(&self, envelope: &Envelope, peer: Option<PeerId>) -> Result<(), TransportError> {
        let wire = encode_envelope(envelope, self.shared.max_body)?;
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.outbound_tx.try_send(Outbound { wire, peer }) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                match e {
                    TrySendError::Full(_) => Err(TransportError::WouldBlock),
                    TrySendError::Closed(_) => Err(TransportError::Closed),
                }
            }
        }
    }

    fn next_inbound(&self) -> Option<Inbound> {
        match lock(&self.inbound_rx).try_recv() {
            Ok(inbound) => Some(inbound),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn role(&self) -> SocketRole {
        self.shared.role
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.shared.role {
            SocketRole::Subscriber => Err(TransportError::InvalidState("subscribers cannot send")),
            SocketRole::Publisher => self.enqueue(&envelope, None),
            SocketRole::Requester => {
                let mut exchange = lock(&self.exchange);
                if *exchange == Exchange::AwaitingReply {
                    return Err(TransportError::InvalidState(
                        "requester must receive a reply before sending again",
                    ));
                }
                self.enqueue(&envelope, None)?;
                *exchange = Exchange::AwaitingReply;
                Ok(())
            }
            SocketRole::Replier => {
                let mut exchange = lock(&self.exchange);
                let Exchange::Replying(peer) = *exchange else {
                    return Err(TransportError::InvalidState("no request to reply to"));
                };
                // A reply that cannot be queued is lost; the next request
                // may still be received.
                *exchange = Exchange::Idle;
                self.enqueue(&envelope, Some(peer))
            }
        }
    }

    fn try_receive(&self) -> Result<Option<Envelope>, TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.shared.role {
            SocketRole::Publisher => Err(TransportError::InvalidState("publishers cannot receive")),
            SocketRole::Subscriber => Ok(self.next_inbound().map(|i| i.envelope)),
            SocketRole::Requester => {
                let mut exchange = lock(&self.exchange);
                while let Some(inbound) = self.next_inbound() {
                    if *exchange == Exchange::AwaitingReply {
                        *exchange = Exchange::Idle;
                        return Ok(Some(inbound.envelope));
                    }
                    debug!(endpoint = %self.shared.name, "unsolicited reply discarded");
                }
                Ok(None)
            }
            SocketRole::Replier => {
                let mut exchange = lock(&self.exchange);
                if matches!(*exchange, Exchange::Replying(_)) {
                    return Err(TransportError::InvalidState(
                        "previous request has not been answered",
                    ));
                }
                Ok(self.next_inbound().map(|inbound| {
                    *exchange = Exchange::Replying(inbound.peer);
                    inbound.envelope
                }))
            }
        }
    }

    fn status(&self) -> EndpointStatus {
        self.shared.status.get()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.status.close();
        self.shared.shutdown.send_replace(true);
        lock(&self.shared.peers).clear();
        self.shared.release_address();
        debug!(endpoint = %self.shared.name, "endpoint closed");
    }

    async fn drain(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let pending = self.shared.pending.load(Ordering::Acquire);
            if pending == 0 || self.shared.closed.load(Ordering::Acquire) {
                return pending;
            }
            if Instant::now() >= deadline {
                return pending;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn transport() -> TcpTransport {
        TcpTransport::new(Handle::current())
    }

    /// Polls `f` until it yields `Some` or `WAIT` elapses.
    async fn eventually<T>(mut f: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(v) = f() {
                return v;
            }
            assert!(Instant::now() < deadline, "condition not met within {WAIT:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn connect_addr(bound: &Arc<dyn Endpoint>) -> String {
        let port = bound.local_addr().expect("bound endpoint has an address").port();
        format!("tcp://127.0.0.1:{port}")
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port_reports_local_addr() {
        // Arrange
        let t = transport();
        let cfg = EndpointConfig::new("frames", SocketRole::Publisher, "tcp://127.0.0.1:0");

        // Act
        let ep = t.open(&cfg).unwrap();

        // Assert
        assert_eq!(ep.status(), EndpointStatus::Ready);
        assert_ne!(ep.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_second_bind_on_same_address_is_address_in_use() {
        // Arrange
        let t = transport();
        let first = t
            .open(&EndpointConfig::new("a", SocketRole::Publisher, "tcp://127.0.0.1:0"))
            .unwrap();
        let addr = connect_addr(&first);

        // Act
        let second = t.open(&EndpointConfig::new("b", SocketRole::Publisher, addr));

        // Assert
        assert!(matches!(second, Err(TransportError::AddressInUse(_))));
    }

    #[tokio::test]
    async fn test_close_releases_address_for_reuse() {
        // Arrange
        let t = transport();
        let first = t
            .open(&EndpointConfig::new("a", SocketRole::Replier, "tcp://127.0.0.1:0"))
            .unwrap();
        let addr = connect_addr(&first);

        // Act
        first.close();
        first.close();
        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert
        assert!(t.open(&EndpointConfig::new("b", SocketRole::Replier, addr)).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_address_fails_open() {
        let t = transport();
        let result = t.open(&EndpointConfig::new("x", SocketRole::Publisher, "tcp://nowhere"));
        assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_pub_sub_delivers_only_matching_topics() {
        // Arrange
        let t = transport();
        let publisher = t
            .open(&EndpointConfig::new("pub", SocketRole::Publisher, "tcp://127.0.0.1:0"))
            .unwrap();
        let subscriber = t
            .open(
                &EndpointConfig::new("sub", SocketRole::Subscriber, connect_addr(&publisher))
                    .with_topics(["cam0"]),
            )
            .unwrap();
        eventually(|| (subscriber.status() == EndpointStatus::Ready).then_some(())).await;
        // Give the listener time to register the accepted peer.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Act
        publisher.send(Envelope::new("cam1", b"skip".to_vec())).unwrap();
        publisher.send(Envelope::new("cam0", b"keep".to_vec())).unwrap();

        // Assert
        let got = eventually(|| subscriber.try_receive().unwrap()).await;
        assert_eq!(got.topic, b"cam0");
        assert_eq!(got.body, b"keep");
    }

    #[tokio::test]
    async fn test_subscriber_cannot_send_and_publisher_cannot_receive() {
        let t = transport();
        let publisher = t
            .open(&EndpointConfig::new("pub", SocketRole::Publisher, "tcp://127.0.0.1:0"))
            .unwrap();
        let subscriber = t
            .open(&EndpointConfig::new("sub", SocketRole::Subscriber, connect_addr(&publisher)))
            .unwrap();

        assert!(matches!(
            subscriber.send(Envelope::untagged(b"x".to_vec())),
            Err(TransportError::InvalidState(_))
        ));
        assert!(matches!(publisher.try_receive(), Err(TransportError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_request_reply_alternation() {
        // Arrange
        let t = transport();
        let replier = t
            .open(&EndpointConfig::new("rep", SocketRole::Replier, "tcp://127.0.0.1:0"))
            .unwrap();
        let requester = t
            .open(&EndpointConfig::new("req", SocketRole::Requester, connect_addr(&replier)))
            .unwrap();

        // Replier has nothing to answer yet.
        assert!(matches!(
            replier.send(Envelope::untagged(b"early".to_vec())),
            Err(TransportError::InvalidState(_))
        ));

        // Act – request
        requester.send(Envelope::untagged(b"PING".to_vec())).unwrap();
        assert!(matches!(
            requester.send(Envelope::untagged(b"PING".to_vec())),
            Err(TransportError::InvalidState(_))
        ));
        let request = eventually(|| replier.try_receive().unwrap()).await;
        assert_eq!(request.body, b"PING");
        assert!(matches!(replier.try_receive(), Err(TransportError::InvalidState(_))));

        // Act – reply
        replier.send(Envelope::untagged(b"OK pong=true".to_vec())).unwrap();
        let reply = eventually(|| requester.try_receive().unwrap()).await;

        // Assert
        assert_eq!(reply.body, b"OK pong=true");
        assert!(requester.send(Envelope::untagged(b"PING".to_vec())).is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_marks_endpoint_broken() {
        // Arrange – bind then release a port so nothing listens on it
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let t = transport();

        // Act
        let ep = t
            .open(&EndpointConfig::new(
                "sub",
                SocketRole::Subscriber,
                format!("tcp://127.0.0.1:{port}"),
            ))
            .unwrap();

        // Assert
        eventually(|| (ep.status() == EndpointStatus::Broken).then_some(())).await;
    }

    #[tokio::test]
    async fn test_unanswered_connect_times_out_as_broken() {
        // Arrange – TEST-NET-1 is never routed, so the dial either hangs or
        // fails outright
        let t = transport();
        let config = EndpointConfig::new("sub", SocketRole::Subscriber, "tcp://192.0.2.1:5555")
            .with_connect_timeout(Duration::from_millis(50));

        // Act
        let ep = t.open(&config).unwrap();

        // Assert
        eventually(|| (ep.status() == EndpointStatus::Broken).then_some(())).await;
    }

    #[tokio::test]
    async fn test_dial_gives_up_when_the_deadline_passes() {
        let err = dial("192.0.2.1:5555", Duration::ZERO).await.unwrap_err();

        assert!(err.kind() == std::io::ErrorKind::TimedOut || err.raw_os_error().is_some());
    }

    #[test]
    fn test_background_tasks_can_be_spawned_on_a_multi_thread_runtime() {
        use std::future::Future;

        fn accept<F, Fut>(_: F)
        where
            F: Fn(Arc<Shared>, TcpListener, watch::Receiver<bool>) -> Fut,
            Fut: Future + Send,
        {
        }
        fn connect<F, Fut>(_: F)
        where
            F: Fn(Arc<Shared>, String, Duration, watch::Receiver<bool>) -> Fut,
            Fut: Future + Send,
        {
        }
        fn route<F, Fut>(_: F)
        where
            F: Fn(Arc<Shared>, mpsc::Receiver<Outbound>, watch::Receiver<bool>) -> Fut,
            Fut: Future + Send,
        {
        }
        fn peer_io<F, Fut>(_: F)
        where
            F: Fn(Arc<Shared>, PeerId, OwnedReadHalf, watch::Receiver<bool>) -> Fut,
            Fut: Future + Send,
        {
        }

        accept(accept_loop);
        connect(connect_once);
        route(route_outbound);
        peer_io(read_loop);
    }

    #[tokio::test]
    async fn test_peer_loss_marks_connect_endpoint_broken() {
        // Arrange
        let t = transport();
        let publisher = t
            .open(&EndpointConfig::new("pub", SocketRole::Publisher, "tcp://127.0.0.1:0"))
            .unwrap();
        let subscriber = t
            .open(&EndpointConfig::new("sub", SocketRole::Subscriber, connect_addr(&publisher)))
            .unwrap();
        eventually(|| (subscriber.status() == EndpointStatus::Ready).then_some(())).await;

        // Act
        publisher.close();

        // Assert
        eventually(|| (subscriber.status() == EndpointStatus::Broken).then_some(())).await;
    }

    #[tokio::test]
    async fn test_full_outbound_queue_is_would_block() {
        // Arrange – a one-slot queue on a publisher nobody connects to
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let t = transport();
        let publisher = t
            .open(
                &EndpointConfig::new("pub", SocketRole::Publisher, format!("tcp://127.0.0.1:{port}"))
                    .with_high_water_mark(1),
            )
            .unwrap();

        // Act – flood faster than the router can possibly keep up with
        let results: Vec<_> = (0..10_000)
            .map(|_| publisher.send(Envelope::untagged(vec![0u8; 16])))
            .collect();

        // Assert – never an error other than WouldBlock
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(()) | Err(TransportError::WouldBlock))));
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_with_closed() {
        let t = transport();
        let ep = t
            .open(&EndpointConfig::new("pub", SocketRole::Publisher, "tcp://127.0.0.1:0"))
            .unwrap();

        ep.close();

        assert_eq!(ep.status(), EndpointStatus::Closed);
        assert!(matches!(
            ep.send(Envelope::untagged(b"x".to_vec())),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_drain_with_no_peers_returns_zero() {
        let t = transport();
        let ep = t
            .open(&EndpointConfig::new("pub", SocketRole::Publisher, "tcp://127.0.0.1:0"))
            .unwrap();
        ep.send(Envelope::untagged(b"nobody listens".to_vec())).unwrap();

        assert_eq!(ep.drain(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_drain_abandons_requests_without_peer() {
        // Arrange
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let t = transport();
        let req = t
            .open(&EndpointConfig::new(
                "req",
                SocketRole::Requester,
                format!("tcp://127.0.0.1:{port}"),
            ))
            .unwrap();
        req.send(Envelope::untagged(b"PING".to_vec())).unwrap();

        // Act
        let abandoned = req.drain(Duration::from_millis(50)).await;

        // Assert
        assert_eq!(abandoned, 1);
    }
}
