//! Stream registry
//!
//! Owns the id -> stream session map. One coarse mutex guards the map and
//! the counters; it is only held for the map operation itself and never
//! across socket I/O. Sessions are short-lived and contention is low, so
//! the map is not sharded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tapline_external_media::{Encapsulation, ExternalMedia};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StreamError};
use crate::socket::{ClientWriter, SwitchWriter};

/// Snapshot of one registry entry. Cheap to clone; the sockets are shared.
#[derive(Clone)]
pub struct StreamSession {
    pub id: Uuid,
    /// Distinguishes entries registered under the same id
    pub generation: u64,
    pub encapsulation: Encapsulation,
    pub external_media: Option<ExternalMedia>,
    client: Arc<dyn ClientWriter>,
    switch: Option<Arc<dyn SwitchWriter>>,
    closed: watch::Receiver<bool>,
}

impl StreamSession {
    pub fn client_writer(&self) -> Arc<dyn ClientWriter> {
        self.client.clone()
    }

    pub fn switch_writer(&self) -> Option<Arc<dyn SwitchWriter>> {
        self.switch.clone()
    }

    pub fn has_switch_socket(&self) -> bool {
        self.switch.is_some()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the session has been terminated or replaced
    pub async fn closed(&self) {
        let mut rx = self.closed.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("encapsulation", &self.encapsulation)
            .field("external_media", &self.external_media.as_ref().map(|m| m.id))
            .field("has_switch_socket", &self.switch.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct StreamEntry {
    generation: u64,
    encapsulation: Encapsulation,
    external_media: Option<ExternalMedia>,
    client: Arc<dyn ClientWriter>,
    switch: Option<Arc<dyn SwitchWriter>>,
    closed_tx: watch::Sender<bool>,
}

impl StreamEntry {
    fn snapshot(&self, id: Uuid) -> StreamSession {
        StreamSession {
            id,
            generation: self.generation,
            encapsulation: self.encapsulation,
            external_media: self.external_media.clone(),
            client: self.client.clone(),
            switch: self.switch.clone(),
            closed: self.closed_tx.subscribe(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_created: u64,
    pub total_terminated: u64,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, StreamEntry>,
    stats: RegistryStats,
    next_generation: u64,
}

impl Inner {
    /// Entry under `session.id`, only if it is still the one `session` was
    /// taken from
    fn current(&self, session: &StreamSession) -> Option<&StreamEntry> {
        self.sessions
            .get(&session.id)
            .filter(|entry| entry.generation == session.generation)
    }

    fn remove(&mut self, id: Uuid) -> Option<StreamEntry> {
        let entry = self.sessions.remove(&id)?;
        self.stats.total_terminated += 1;
        Some(entry)
    }
}

#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<Inner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client side of a stream. An existing entry under the
    /// same id is replaced; its waiters are released but its sockets are
    /// left to their owners.
    pub fn create(
        &self,
        id: Uuid,
        client: Arc<dyn ClientWriter>,
        encapsulation: Encapsulation,
    ) -> StreamSession {
        let (closed_tx, _) = watch::channel(false);
        let (session, replaced) = {
            let mut inner = self.inner.lock();
            inner.next_generation += 1;
            let entry = StreamEntry {
                generation: inner.next_generation,
                encapsulation,
                external_media: None,
                client,
                switch: None,
                closed_tx,
            };
            let session = entry.snapshot(id);
            inner.stats.total_created += 1;
            (session, inner.sessions.insert(id, entry))
        };
        if let Some(old) = replaced {
            warn!(stream_id = %id, "Replacing existing stream session");
            old.closed_tx.send_replace(true);
        }

        debug!(stream_id = %id, encapsulation = %encapsulation, "Created stream session");
        session
    }

    /// Hook the switch connection into its session. A session takes one
    /// switch connection; a second one is refused.
    pub fn attach_switch_socket(
        &self,
        id: Uuid,
        socket: Arc<dyn SwitchWriter>,
    ) -> Result<StreamSession> {
        let mut inner = self.inner.lock();
        let entry = inner.sessions.get_mut(&id).ok_or(StreamError::NotFound(id))?;
        if entry.switch.is_some() {
            return Err(StreamError::AlreadyAttached(id));
        }
        entry.switch = Some(socket);
        Ok(entry.snapshot(id))
    }

    pub fn attach_external_media_info(
        &self,
        id: Uuid,
        info: ExternalMedia,
    ) -> Result<StreamSession> {
        let mut inner = self.inner.lock();
        let entry = inner.sessions.get_mut(&id).ok_or(StreamError::NotFound(id))?;
        entry.external_media = Some(info);
        Ok(entry.snapshot(id))
    }

    pub fn get(&self, id: Uuid) -> Result<StreamSession> {
        self.inner
            .lock()
            .sessions
            .get(&id)
            .map(|entry| entry.snapshot(id))
            .ok_or(StreamError::NotFound(id))
    }

    /// Current switch socket of a session, `None` while the switch has not
    /// dialed in yet
    pub fn switch_writer(&self, id: Uuid) -> Result<Option<Arc<dyn SwitchWriter>>> {
        self.inner
            .lock()
            .sessions
            .get(&id)
            .map(|entry| entry.switch.clone())
            .ok_or(StreamError::NotFound(id))
    }

    /// Switch socket of the entry `session` was taken from. `NotFound` once
    /// that entry is gone, even if a newer one took its id.
    pub fn current_switch_writer(
        &self,
        session: &StreamSession,
    ) -> Result<Option<Arc<dyn SwitchWriter>>> {
        self.inner
            .lock()
            .current(session)
            .map(|entry| entry.switch.clone())
            .ok_or(StreamError::NotFound(session.id))
    }

    /// Remove the session and close both of its sockets. Safe to call any
    /// number of times; only the first call for a live session releases
    /// anything and returns `true`.
    pub async fn terminate(&self, id: Uuid) -> bool {
        let entry = self.inner.lock().remove(id);
        Self::release(id, entry).await
    }

    /// Like [`terminate`](Self::terminate), but leaves a newer session
    /// registered under the same id alone
    pub async fn terminate_session(&self, session: &StreamSession) -> bool {
        let entry = {
            let mut inner = self.inner.lock();
            if inner.current(session).is_some() {
                inner.remove(session.id)
            } else {
                None
            }
        };
        Self::release(session.id, entry).await
    }

    async fn release(id: Uuid, entry: Option<StreamEntry>) -> bool {
        let Some(entry) = entry else {
            return false;
        };

        // wake the forwarding loops first so none of them holds a writer
        entry.closed_tx.send_replace(true);

        if let Err(e) = entry.client.close().await {
            debug!(stream_id = %id, "Client socket close failed: {}", e);
        }
        if let Some(switch) = entry.switch {
            if let Err(e) = switch.close().await {
                debug!(stream_id = %id, "Switch socket close failed: {}", e);
            }
        }

        debug!(stream_id = %id, "Terminated stream session");
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.lock().sessions.keys().copied().collect()
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.lock().stats
    }
}
