//! Process-wide table of live log streams.
//!
//! The registry is the single source of truth for whether a connection may
//! still receive output. Each entry carries a kill token: firing it (or
//! removing the entry, which fires it too) tells the owning supervisor to
//! kill its log process and tells both output pumps to stop.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dockscope_common::error::{DockscopeError, Result};
use dockscope_common::types::{ConnectionId, ConnectionInfo};
use tokio_util::sync::CancellationToken;

/// A live log stream: the connection and the process serving it.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Connection the process serves.
    pub connection: ConnectionInfo,
    /// OS process ID of the log process.
    pub pid: Option<u32>,
    /// Argument vector the log process was started with.
    pub command: Vec<String>,
    kill: CancellationToken,
}

impl RegistryEntry {
    /// Returns whether a kill has been requested for this entry.
    pub fn kill_requested(&self) -> bool {
        self.kill.is_cancelled()
    }
}

/// Concurrent map from connection ID to its live log process.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, RegistryEntry>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a launched log process for a connection.
    ///
    /// Returns the entry's kill token, which the caller watches to learn
    /// when the stream must stop.
    ///
    /// # Errors
    ///
    /// Returns [`DockscopeError::AlreadyRegistered`] if the connection
    /// already has an entry.
    pub fn register(
        &self,
        connection: ConnectionInfo,
        pid: Option<u32>,
        command: Vec<String>,
    ) -> Result<CancellationToken> {
        match self.entries.entry(connection.id) {
            Entry::Occupied(_) => Err(DockscopeError::AlreadyRegistered {
                connection: connection.id,
            }),
            Entry::Vacant(slot) => {
                let kill = CancellationToken::new();
                tracing::debug!(
                    connection = %connection.id,
                    container = %connection.container_id,
                    ?pid,
                    "registered log stream"
                );
                let _ = slot.insert(RegistryEntry {
                    connection,
                    pid,
                    command,
                    kill: kill.clone(),
                });
                Ok(kill)
            }
        }
    }

    /// Removes a connection's entry and fires its kill token.
    ///
    /// Returns the removed entry, or `None` if there was none; calling it
    /// twice is harmless.
    pub fn unregister(&self, id: &ConnectionId) -> Option<RegistryEntry> {
        let (_, entry) = self.entries.remove(id)?;
        entry.kill.cancel();
        tracing::debug!(connection = %id, "unregistered log stream");
        Some(entry)
    }

    /// Returns whether output may still be pushed to `id`.
    ///
    /// False as soon as the entry is removed or a kill was requested.
    pub fn is_live(&self, id: &ConnectionId) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| !entry.kill.is_cancelled())
    }

    /// Requests a forced kill of the connection's log process if it is live.
    ///
    /// Returns whether a kill was requested. Unknown IDs and already-killed
    /// entries are no-ops.
    pub fn force_kill_if_live(&self, id: &ConnectionId) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        if entry.kill.is_cancelled() {
            return false;
        }
        entry.kill.cancel();
        tracing::info!(connection = %id, pid = ?entry.pid, "kill requested for log process");
        true
    }

    /// Requests a kill for every live entry. Returns how many were signaled.
    pub fn kill_all(&self) -> usize {
        let mut signaled = 0;
        for entry in &self.entries {
            if !entry.kill.is_cancelled() {
                entry.kill.cancel();
                signaled += 1;
            }
        }
        if signaled > 0 {
            tracing::info!(count = signaled, "kill requested for all log processes");
        }
        signaled
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no streams are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a copy of the entry for `id`.
    pub fn get(&self, id: &ConnectionId) -> Option<RegistryEntry> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }
}
