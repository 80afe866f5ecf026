//! Broadcast registry
//!
//! The registry owns every live subscriber connection. It is the only place
//! connections are inserted or removed, both under the exclusive lock.
//! Broadcasting copies the per-connection senders under the shared lock and
//! releases it before enqueueing, so no lock is ever held across I/O.
//!
//! A connection leaves the registry when:
//! - its send queue is full or closed during a broadcast
//! - its write loop fails or its transport closes
//! - the liveness sweep finds it silent for longer than the timeout
//! - it is removed explicitly
//!
//! Removing an entry drops the registry's sender, which closes the send
//! queue; the write loop drains what is left and closes the transport.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::Sink;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::codec::NotificationMessage;
use crate::config::HubSettings;
use crate::hub::connection;
use crate::notify::Broadcaster;
use crate::utils::Result;

/// Identifier of a subscriber, derived from its remote address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }

    /// Used when the peer address is not available.
    pub fn generated() -> Self {
        Self(format!("client-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a connection. States only ever move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting = 0,
    /// Registered and visible to broadcasts.
    Active = 1,
    /// Send queue closed, remaining frames being flushed.
    Draining = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct Status {
    state: AtomicU8,
    last_liveness: Mutex<Instant>,
}

/// Shared view of one connection, handed to the transport and the write loop.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    serial: u64,
    status: Arc<Status>,
}

impl ClientHandle {
    fn new(id: ClientId, serial: u64) -> Self {
        Self {
            id,
            serial,
            status: Arc::new(Status {
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                last_liveness: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.status.state.load(Ordering::SeqCst))
    }

    /// Records a liveness signal from the peer.
    pub fn touch(&self) {
        *self
            .status
            .last_liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last_liveness(&self) -> Instant {
        *self
            .status
            .last_liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn advance(&self, to: ConnectionState) {
        self.status.state.fetch_max(to as u8, Ordering::SeqCst);
    }
}

struct ClientConnection {
    handle: ClientHandle,
    sender: mpsc::Sender<WsMessage>,
}

struct Inner {
    clients: RwLock<HashMap<ClientId, ClientConnection>>,
    next_serial: AtomicU64,
    settings: HubSettings,
}

/// Cheaply cloneable handle to the shared registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: RwLock::new(HashMap::new()),
                next_serial: AtomicU64::new(0),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    /// Registers a connection and starts its write loop on `sink`.
    ///
    /// Returns without doing any network I/O. The join handle completes once
    /// the write loop has closed the transport.
    pub fn connect<S>(&self, id: ClientId, sink: S) -> (ClientHandle, JoinHandle<()>)
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let (handle, queue) = self.register(id);
        let writer = tokio::spawn(connection::write_loop(
            self.clone(),
            handle.clone(),
            queue,
            sink,
        ));
        (handle, writer)
    }

    /// Registers a connection and hands back the receiving end of its send
    /// queue. The connection becomes visible to broadcasts atomically.
    pub fn register(&self, id: ClientId) -> (ClientHandle, mpsc::Receiver<WsMessage>) {
        let capacity = self.inner.settings.send_queue_capacity.max(1);
        let (sender, queue) = mpsc::channel(capacity);
        let serial = self.inner.next_serial.fetch_add(1, Ordering::SeqCst);
        let handle = ClientHandle::new(id.clone(), serial);

        let mut clients = self.write_clients();
        handle.advance(ConnectionState::Active);
        let replaced = clients.insert(
            id.clone(),
            ClientConnection {
                handle: handle.clone(),
                sender,
            },
        );
        let total = clients.len();
        drop(clients);

        if let Some(previous) = replaced {
            previous.handle.advance(ConnectionState::Draining);
            warn!(client_id = %id, "replaced existing connection with the same id");
        }
        info!(client_id = %id, total_clients = total, "websocket connection established");

        (handle, queue)
    }

    /// Serializes `message` once and offers it to every registered connection
    /// without waiting. Connections whose queue is full or closed are removed.
    pub fn broadcast(&self, message: &NotificationMessage) -> Result<()> {
        let frame = WsMessage::text(message.to_json()?);

        let targets: Vec<(ClientHandle, mpsc::Sender<WsMessage>)> = self
            .read_clients()
            .values()
            .map(|conn| (conn.handle.clone(), conn.sender.clone()))
            .collect();

        let mut delivered = 0;
        let mut evicted = Vec::new();
        for (handle, sender) in &targets {
            match sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client_id = %handle.id(), "client send queue full, removing client");
                    evicted.push(handle.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(client_id = %handle.id(), "client send queue closed, removing client");
                    evicted.push(handle.clone());
                }
            }
        }
        // Release the cloned senders first so eviction actually closes the queues.
        drop(targets);

        for handle in &evicted {
            self.unsubscribe(handle);
        }

        info!(
            message_type = %message.kind,
            delivered,
            evicted = evicted.len(),
            "broadcasted message to clients"
        );
        Ok(())
    }

    /// Removes the connection registered under `id`, if any. Idempotent.
    pub fn remove_client(&self, id: &ClientId) -> bool {
        let mut clients = self.write_clients();
        let removed = clients.remove(id);
        let remaining = clients.len();
        drop(clients);

        match removed {
            Some(conn) => {
                Self::retire(conn, remaining);
                true
            }
            None => false,
        }
    }

    /// Removes exactly the connection behind `handle`. A newer connection that
    /// reuses the same id is left alone. Idempotent.
    pub fn unsubscribe(&self, handle: &ClientHandle) -> bool {
        let mut clients = self.write_clients();
        let current = clients
            .get(&handle.id)
            .is_some_and(|conn| conn.handle.serial == handle.serial);
        if !current {
            return false;
        }

        let removed = clients.remove(&handle.id);
        let remaining = clients.len();
        drop(clients);

        if let Some(conn) = removed {
            Self::retire(conn, remaining);
        }
        true
    }

    pub fn connected_count(&self) -> usize {
        self.read_clients().len()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.read_clients().contains_key(id)
    }

    /// Removes every connection that has not shown a liveness signal within
    /// the configured timeout. Returns how many were removed.
    pub fn sweep_inactive(&self) -> usize {
        let timeout = self.inner.settings.liveness_timeout();
        let now = Instant::now();

        let mut clients = self.write_clients();
        let stale: Vec<ClientId> = clients
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.handle.last_liveness()) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let retired: Vec<ClientConnection> =
            stale.iter().filter_map(|id| clients.remove(id)).collect();
        let remaining = clients.len();
        drop(clients);

        for conn in &retired {
            info!(client_id = %conn.handle.id, "removing inactive client");
        }
        let count = retired.len();
        for conn in retired {
            Self::retire(conn, remaining);
        }
        count
    }

    /// Runs [`Registry::sweep_inactive`] every sweep interval until `cancel` fires.
    pub fn spawn_liveness_sweep(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.inner.settings.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep_inactive();
                        if removed > 0 {
                            debug!(removed, "liveness sweep finished");
                        }
                    }
                }
            }
        })
    }

    /// Removes every connection, closing all send queues.
    pub fn close_all(&self) {
        let drained: Vec<ClientConnection> =
            self.write_clients().drain().map(|(_, conn)| conn).collect();

        let count = drained.len();
        for conn in drained {
            conn.handle.advance(ConnectionState::Draining);
        }
        info!(closed = count, "closed all client connections");
    }

    fn retire(conn: ClientConnection, remaining: usize) {
        conn.handle.advance(ConnectionState::Draining);
        info!(
            client_id = %conn.handle.id,
            remaining_clients = remaining,
            "client disconnected"
        );
        // Dropping `conn` drops the sender and closes the send queue.
    }

    fn read_clients(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ClientId, ClientConnection>> {
        self.inner
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ClientId, ClientConnection>> {
        self.inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Broadcaster for Registry {
    fn broadcast(&self, message: &NotificationMessage) -> Result<()> {
        Registry::broadcast(self, message)
    }
}
