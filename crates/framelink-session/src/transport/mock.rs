//! In-memory transport for tests.
//!
//! [`MockTransport`] hands out [`MockEndpoint`]s that record every sent
//! envelope and return injected envelopes from `try_receive`.  Tests can also
//! force `WouldBlock`, fail opens by endpoint name, and mark endpoints broken
//! to exercise reconnection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use framelink_core::protocol::Envelope;

use super::{
    Endpoint, EndpointConfig, EndpointStatus, SocketRole, StatusCell, Transport, TransportError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock implementation of [`Transport`].
#[derive(Default)]
pub struct MockTransport {
    endpoints: Mutex<HashMap<String, Arc<MockEndpoint>>>,
    failing: Mutex<HashSet<String>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `open` of the endpoint named `name` fail.
    pub fn fail_open(&self, name: &str) {
        lock(&self.failing).insert(name.to_string());
    }

    /// Undoes [`fail_open`](Self::fail_open).
    pub fn allow_open(&self, name: &str) {
        lock(&self.failing).remove(name);
    }

    /// The most recently opened endpoint named `name`.
    pub fn endpoint(&self, name: &str) -> Option<Arc<MockEndpoint>> {
        lock(&self.endpoints).get(name).cloned()
    }

    /// How many times `open` was attempted for `name`, failures included.
    pub fn open_attempts(&self, name: &str) -> usize {
        lock(&self.opens).get(name).copied().unwrap_or(0)
    }
}

impl Transport for MockTransport {
    fn open(&self, config: &EndpointConfig) -> Result<Arc<dyn Endpoint>, TransportError> {
        *lock(&self.opens).entry(config.name.clone()).or_insert(0) += 1;
        if lock(&self.failing).contains(&config.name) {
            return Err(TransportError::BindFailed {
                address: config.address.clone(),
                source: std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "mock failure"),
            });
        }
        let endpoint = Arc::new(MockEndpoint::new(config));
        lock(&self.endpoints).insert(config.name.clone(), Arc::clone(&endpoint));
        Ok(endpoint)
    }
}

/// A mock [`Endpoint`].
pub struct MockEndpoint {
    name: String,
    role: SocketRole,
    status: StatusCell,
    sent: Mutex<Vec<Envelope>>,
    inbox: Mutex<VecDeque<Envelope>>,
    would_block: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    unflushed: AtomicUsize,
}

impl MockEndpoint {
    pub fn new(config: &EndpointConfig) -> Self {
        Self {
            name: config.name.clone(),
            role: config.role,
            status: StatusCell::new(EndpointStatus::Ready),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
            would_block: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            unflushed: AtomicUsize::new(0),
        }
    }

    /// Queues an envelope for `try_receive`.
    pub fn inject(&self, envelope: Envelope) {
        lock(&self.inbox).push_back(envelope);
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<Envelope> {
        lock(&self.sent).clone()
    }

    /// Takes and clears the sent log.
    pub fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// While `true`, every `send` fails with `WouldBlock`.
    pub fn set_would_block(&self, on: bool) {
        self.would_block.store(on, Ordering::Release);
    }

    pub fn set_status(&self, status: EndpointStatus) {
        self.status.set(status);
    }

    /// Makes the next `drain` report `n` abandoned messages.
    pub fn set_unflushed(&self, n: usize) {
        self.unflushed.store(n, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of `close` calls, repeats included.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> SocketRole {
        self.role
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.role.can_send() {
            return Err(TransportError::InvalidState("subscribers cannot send"));
        }
        if self.would_block.load(Ordering::Acquire) {
            return Err(TransportError::WouldBlock);
        }
        lock(&self.sent).push(envelope);
        Ok(())
    }

    fn try_receive(&self) -> Result<Option<Envelope>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.role.can_receive() {
            return Err(TransportError::InvalidState("publishers cannot receive"));
        }
        Ok(lock(&self.inbox).pop_front())
    }

    fn status(&self) -> EndpointStatus {
        self.status.get()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        self.closed.store(true, Ordering::Release);
        self.status.close();
    }

    async fn drain(&self, _timeout: Duration) -> usize {
        self.unflushed.swap(0, Ordering::AcqRel)
    }
}
