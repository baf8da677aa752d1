//! Live viewer server
//!
//! An axum HTTP + WebSocket server that mirrors project stores to connected
//! browsers. It never writes a store directly: edits go through
//! [`Session`], and every change (from this server, from CLI processes over
//! `/api/notify`, or from the notification trail) is fanned out by the
//! [`Hub`].

mod routes;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{drain_notifications, Delivery, Notification, Notify};
use crate::ops::{Session, SessionOptions};
use crate::registry::RegistryEntry;

pub use routes::{router, ViewerState};

/// Outbound queue depth per connection
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

enum HubCommand {
    Register {
        id: u64,
        sender: mpsc::Sender<String>,
    },
    Unregister(u64),
    Broadcast(String),
}

/// Connection registry owned by a single coordinating task.
///
/// Each client gets a bounded queue. A broadcast that finds a client's queue
/// full (or closed) drops that client, which closes its connection, instead
/// of waiting on it.
pub struct Hub;

impl Hub {
    /// Start the coordinator on the current tokio runtime
    pub fn spawn() -> HubHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<HubCommand>();
        let clients = Arc::new(AtomicUsize::new(0));
        let count = clients.clone();

        tokio::spawn(async move {
            let mut peers: HashMap<u64, mpsc::Sender<String>> = HashMap::new();
            while let Some(command) = rx.recv().await {
                match command {
                    HubCommand::Register { id, sender } => {
                        peers.insert(id, sender);
                        info!(client = id, clients = peers.len(), "viewer connected");
                    }
                    HubCommand::Unregister(id) => {
                        if peers.remove(&id).is_some() {
                            info!(client = id, clients = peers.len(), "viewer disconnected");
                        }
                    }
                    HubCommand::Broadcast(message) => {
                        peers.retain(|id, sender| match sender.try_send(message.clone()) {
                            Ok(()) => true,
                            Err(err) => {
                                warn!(client = *id, error = %err, "dropping viewer");
                                false
                            }
                        });
                    }
                }
                count.store(peers.len(), Ordering::Relaxed);
            }
            debug!("viewer hub stopped");
        });

        HubHandle {
            tx,
            clients,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

/// Cheap, cloneable handle to the hub
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    clients: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Add a connection; messages for it arrive on the returned receiver
    pub fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let _ = self.tx.send(HubCommand::Register { id, sender });
        (id, receiver)
    }

    pub fn unregister(&self, id: u64) {
        let _ = self.tx.send(HubCommand::Unregister(id));
    }

    /// Queue `payload` for every connected viewer. Returns the number of
    /// viewers connected when the broadcast was queued.
    pub fn broadcast(&self, payload: &serde_json::Value) -> Result<usize> {
        let message = serde_json::to_string(payload)?;
        self.tx
            .send(HubCommand::Broadcast(message))
            .map_err(|_| Error::OperationFailed("viewer hub is not running".to_string()))?;
        Ok(self.client_count())
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

impl Notify for HubHandle {
    fn notify(&self, notification: &Notification) -> Result<Delivery> {
        let clients = self.broadcast(&notification.viewer_payload())?;
        Ok(Delivery::Broadcast { clients })
    }
}

/// Rebroadcast notification files dropped by CLI processes that found no
/// viewer listening. The returned watcher must be kept alive.
pub fn watch_notifications(dir: &Path, hub: HubHandle) -> Result<RecommendedWatcher> {
    std::fs::create_dir_all(dir)?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = ::notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })
    .map_err(|err| Error::OperationFailed(format!("failed to start watcher: {err}")))?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|err| {
            Error::OperationFailed(format!("failed to watch {}: {err}", dir.display()))
        })?;

    let dir = dir.to_path_buf();
    tokio::spawn(async move {
        replay_trail(&dir, &hub).await;
        while let Some(event) = rx.recv().await {
            match event {
                Ok(event) if event.kind.is_create() || event.kind.is_modify() => {
                    replay_trail(&dir, &hub).await;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "notification watcher error"),
            }
        }
    });

    Ok(watcher)
}

async fn replay_trail(dir: &Path, hub: &HubHandle) {
    let path = dir.to_path_buf();
    let drained = tokio::task::spawn_blocking(move || drain_notifications(&path)).await;
    let notifications = match drained {
        Ok(Ok(notifications)) => notifications,
        Ok(Err(err)) => {
            warn!(error = %err, "failed to read notification trail");
            return;
        }
        Err(err) => {
            warn!(error = %err, "notification trail task failed");
            return;
        }
    };
    for notification in notifications {
        if let Err(err) = hub.broadcast(&notification.viewer_payload()) {
            warn!(error = %err, "failed to rebroadcast notification");
        }
    }
}

/// Serve the viewer on `127.0.0.1:port` until the process is stopped.
///
/// Edits made through the viewer are announced on its own hub. `current` is
/// the project the server was started from, if any.
pub async fn serve(
    config: Config,
    options: SessionOptions,
    port: u16,
    current: Option<RegistryEntry>,
) -> Result<()> {
    let hub = Hub::spawn();
    let session = Session::with_sink(config, options, Arc::new(hub.clone()))?;
    let _watcher = watch_notifications(&session.storage().notifications_dir(), hub.clone())?;

    let app = router(ViewerState::new(session, hub, current));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "viewer listening");
    axum::serve(listener, app).await?;
    Ok(())
}
