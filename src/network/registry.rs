//! Name Registry
//!
//! Process-wide set of display names bound to a queued or in-progress
//! session. Shared between handshake tasks, the matchmaker and match tasks,
//! so every operation is atomic under a single lock.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Longest accepted display name, in bytes.
pub const MAX_NAME_LEN: usize = 72;

/// Why a name could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Empty, longer than 72 bytes, or containing a pipe, control or non-ASCII byte.
    #[error("name is empty, too long, or contains forbidden bytes")]
    InvalidName,

    /// Another client holds this name.
    #[error("name already in use")]
    AlreadyPlaying,

    /// This connection already opened under a name.
    #[error("connection already opened")]
    AlreadyOpen,
}

/// Check length and byte range of a display name.
///
/// Accepts 1..=72 bytes, each in 32..=126 except `|`.
pub fn validate_name(name: &str) -> Result<(), RegistrationError> {
    let bytes = name.as_bytes();

    if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
        return Err(RegistrationError::InvalidName);
    }

    if bytes.iter().any(|&b| b == b'|' || !(32..=126).contains(&b)) {
        return Err(RegistrationError::InvalidName);
    }

    Ok(())
}

/// Active names, each mapped to the peer holding it.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: Mutex<BTreeMap<String, SocketAddr>>,
}

impl NameRegistry {
    /// Create an empty, shareable registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn names(&self) -> MutexGuard<'_, BTreeMap<String, SocketAddr>> {
        // Entries stay consistent even if a holder panicked mid-operation.
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `name` and claim it for `holder`.
    ///
    /// The returned lease releases the name when dropped.
    pub fn register(
        self: &Arc<Self>,
        name: &str,
        holder: SocketAddr,
    ) -> Result<NameLease, RegistrationError> {
        validate_name(name)?;

        let mut names = self.names();
        if names.contains_key(name) {
            return Err(RegistrationError::AlreadyPlaying);
        }
        names.insert(name.to_string(), holder);
        debug!("Registered name {:?} for {}", name, holder);

        Ok(NameLease {
            registry: Arc::clone(self),
            name: name.to_string(),
        })
    }

    /// Drop `name` from the registry. Returns whether it was present.
    pub fn release(&self, name: &str) -> bool {
        let removed = self.names().remove(name).is_some();
        if removed {
            debug!("Released name {:?}", name);
        }
        removed
    }

    /// Is `name` currently held?
    pub fn contains(&self, name: &str) -> bool {
        self.names().contains_key(name)
    }

    /// Peer holding `name`.
    pub fn holder(&self, name: &str) -> Option<SocketAddr> {
        self.names().get(name).copied()
    }

    /// Number of active names.
    pub fn len(&self) -> usize {
        self.names().len()
    }

    /// True when no names are held.
    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// Ownership of one registered name.
///
/// Dropping the lease releases the name, including when the owning task
/// panics or is aborted.
#[derive(Debug)]
pub struct NameLease {
    registry: Arc<NameRegistry>,
    name: String,
}

impl NameLease {
    /// The leased name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}
