//! Per-connection sessions on the server side.
//!
//! A [`Session`] is bound 1:1 to a live connection and owned by the
//! [`SessionRegistry`]. Everything else refers to sessions by
//! [`ConnectionId`].

mod registry;

use serde::Serialize;
use thiserror::Error;

use crate::dispatch::Peer;
use crate::error::Result;
use crate::transport::ConnectionId;

pub use registry::SessionRegistry;

/// Lifecycle misuse of the registry. These indicate a bug in the driver,
/// not a problem with the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("{0} is not registered")]
    NotRegistered(ConnectionId),

    #[error("no current session outside before_process/after_process")]
    NoCurrentSession,
}

/// Application-level session failure, reported to the caller in-band.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("username already taken: {0}")]
    NameTaken(String),

    #[error("no such recipient: {0}")]
    NoSuchRecipient(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// State kept for one connected client.
#[derive(Debug)]
pub struct Session<T = ()> {
    id: ConnectionId,
    peer: Peer,
    name: Option<String>,
    /// Application data attached to the session.
    pub state: T,
}

impl<T: Default> Session<T> {
    pub fn new(peer: Peer) -> Self {
        Self {
            id: peer.id(),
            peer,
            name: None,
            state: T::default(),
        }
    }
}

impl<T> Session<T> {
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Stub for calling back into this client.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Display name, once claimed.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke `method` on this client.
    pub fn call<A>(&self, method: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        self.peer.call(method, args)
    }
}
