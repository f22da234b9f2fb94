//! The set of connected reload clients and the broadcast that reaches them.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Text frame instructing a browser tab to reload the page.
pub const RELOAD_MESSAGE: &str = "reload";

/// Identifier of a registered [`ReloadClient`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Utility to send reload requests to clients.
///
/// Cloning a [`Reloader`] yields another handle to the same client set.
#[derive(Clone, Debug, Default)]
pub struct Reloader {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, UnboundedSender<&'static str>>>,
}

impl Reloader {
    /// Create a new [`Reloader`] with no clients.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to the set.
    ///
    /// The client receives every reload sent after this call returns. It is
    /// removed again when the returned handle is dropped.
    pub fn register(&self) -> ReloadClient {
        let id = ClientId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients().insert(id, sender);
        tracing::debug!(client = id.0, "reload client registered");

        ReloadClient {
            id,
            receiver,
            reloader: self.clone(),
        }
    }

    /// Remove a client from the set. Removing an absent client is a no-op.
    pub fn unregister(&self, id: ClientId) {
        if self.clients().remove(&id).is_some() {
            tracing::debug!(client = id.0, "reload client unregistered");
        }
    }

    /// Send a reload request to all open clients.
    ///
    /// Clients that went away without unregistering are dropped from the set
    /// and do not affect delivery to the others. Returns the number of clients
    /// the message was handed to.
    pub fn reload(&self) -> usize {
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|_, sender| sender.send(RELOAD_MESSAGE).is_ok());
        let delivered = clients.len();
        drop(clients);

        if delivered < before {
            tracing::debug!(stale = before - delivered, "skipped closed reload clients");
        }
        tracing::info!(clients = delivered, "reload sent");
        delivered
    }

    /// Disconnect every client.
    ///
    /// Each [`ReloadClient::recv`] returns `None` once its pending messages
    /// are consumed, which the connection handler treats as a close.
    pub fn close_all(&self) {
        let closed = std::mem::take(&mut *self.clients());
        tracing::debug!(clients = closed.len(), "closing reload clients");
    }

    /// Number of clients currently in the set.
    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, UnboundedSender<&'static str>>> {
        // The map stays consistent even if a holder panicked.
        self.shared
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One connected browser tab, as seen by the [`Reloader`].
#[derive(Debug)]
pub struct ReloadClient {
    id: ClientId,
    receiver: UnboundedReceiver<&'static str>,
    reloader: Reloader,
}

impl ReloadClient {
    /// The identifier this client was registered under.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Wait for the next message, or `None` once the client was closed.
    pub async fn recv(&mut self) -> Option<&'static str> {
        self.receiver.recv().await
    }
}

impl Drop for ReloadClient {
    fn drop(&mut self) {
        self.reloader.unregister(self.id);
    }
}
