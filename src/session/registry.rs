//! Session registry keyed by connection.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use super::{RegistryError, Session, SessionError};
use crate::dispatch::{encode_call, Peer};
use crate::protocol::build_frame;
use crate::transport::{ConnectionId, DisconnectReason};

/// Tracks one [`Session`] per live connection.
///
/// The server calls [`on_client_connected`](Self::on_client_connected) and
/// [`on_client_disconnected`](Self::on_client_disconnected) around each
/// connection's life, and brackets every dispatched frame with
/// [`before_process`](Self::before_process) /
/// [`after_process`](Self::after_process). Inside that bracket the session of
/// the connection that sent the frame is the *current* session.
pub struct SessionRegistry<T = ()> {
    sessions: BTreeMap<ConnectionId, Session<T>>,
    current: Option<ConnectionId>,
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            current: None,
        }
    }

    /// Register a session for a new connection.
    pub fn on_client_connected(&mut self, id: ConnectionId, peer: Peer) -> Result<(), RegistryError>
    where
        T: Default,
    {
        if self.sessions.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        self.sessions.insert(id, Session::new(peer));
        tracing::debug!(conn = %id, sessions = self.sessions.len(), "session registered");
        Ok(())
    }

    /// Remove the session of a closed connection and hand it back.
    pub fn on_client_disconnected(
        &mut self,
        id: ConnectionId,
        reason: &DisconnectReason,
    ) -> Result<Session<T>, RegistryError> {
        let session = self
            .sessions
            .remove(&id)
            .ok_or(RegistryError::NotRegistered(id))?;
        if self.current == Some(id) {
            self.current = None;
        }
        tracing::debug!(conn = %id, %reason, sessions = self.sessions.len(), "session removed");
        Ok(session)
    }

    /// Make the session of `id` current for the frame about to be processed.
    pub fn before_process(&mut self, id: ConnectionId) -> Result<(), RegistryError> {
        if !self.sessions.contains_key(&id) {
            return Err(RegistryError::NotRegistered(id));
        }
        self.current = Some(id);
        Ok(())
    }

    pub fn after_process(&mut self) {
        self.current = None;
    }

    pub fn current_id(&self) -> Result<ConnectionId, RegistryError> {
        self.current.ok_or(RegistryError::NoCurrentSession)
    }

    pub fn current(&self) -> Result<&Session<T>, RegistryError> {
        let id = self.current_id()?;
        self.sessions.get(&id).ok_or(RegistryError::NotRegistered(id))
    }

    pub fn current_mut(&mut self) -> Result<&mut Session<T>, RegistryError> {
        let id = self.current_id()?;
        self.sessions
            .get_mut(&id)
            .ok_or(RegistryError::NotRegistered(id))
    }

    /// Give the current session a display name.
    ///
    /// Fails with [`SessionError::NameTaken`] when another session holds the
    /// name. Claiming the name the current session already has is a no-op.
    pub fn claim_name(&mut self, name: &str) -> Result<(), SessionError> {
        let id = self.current_id()?;
        if let Some(holder) = self.find_by_name(name) {
            if holder.id() != id {
                return Err(SessionError::NameTaken(name.to_string()));
            }
        }

        let session = self.current_mut()?;
        session.name = Some(name.to_string());
        tracing::debug!(conn = %id, name, "name claimed");
        Ok(())
    }

    /// Call `method` on every session except the current one.
    ///
    /// Returns how many sessions the call was queued for. Sessions whose
    /// connection is already gone are skipped.
    pub fn broadcast<A>(&self, method: &str, args: &A) -> Result<usize, SessionError>
    where
        A: Serialize + ?Sized,
    {
        let frame = encode_frame(method, args)?;

        let mut delivered = 0;
        for session in self.sessions.values() {
            if Some(session.id()) == self.current {
                continue;
            }
            match session.peer().send_encoded(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    conn = %session.id(),
                    method,
                    error = %e,
                    "skipping broadcast to closed peer"
                ),
            }
        }
        Ok(delivered)
    }

    /// Call `method` on the session holding display name `name`.
    pub fn send_to<A>(&self, name: &str, method: &str, args: &A) -> Result<(), SessionError>
    where
        A: Serialize + ?Sized,
    {
        let session = self
            .find_by_name(name)
            .ok_or_else(|| SessionError::NoSuchRecipient(name.to_string()))?;
        session
            .peer()
            .send_encoded(encode_frame(method, args)?)
            .map_err(|e| SessionError::Delivery(e.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Session<T>> {
        self.sessions.values().find(|s| s.name() == Some(name))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session<T>> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Session<T>> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Sessions in connection order.
    pub fn iter(&self) -> impl Iterator<Item = &Session<T>> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_frame<A>(method: &str, args: &A) -> Result<Bytes, SessionError>
where
    A: Serialize + ?Sized,
{
    encode_call(method, args)
        .and_then(|payload| build_frame(&payload))
        .map_err(|e| SessionError::Delivery(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{writer_channel, WriterConfig, WriterHandle, WriterQueue};

    /// Peer whose queue is held but never drained, so `pending_bytes` shows
    /// what was delivered.
    fn peer() -> (Peer, WriterHandle, WriterQueue) {
        let (handle, queue) = writer_channel(WriterConfig::default());
        let peer = Peer::new(ConnectionId::next(), handle.clone(), None);
        (peer, handle, queue)
    }

    fn connect(registry: &mut SessionRegistry) -> (ConnectionId, WriterHandle, WriterQueue) {
        let (peer, handle, queue) = peer();
        let id = peer.id();
        registry.on_client_connected(id, peer).unwrap();
        (id, handle, queue)
    }

    #[test]
    fn test_size_tracks_connects_minus_disconnects() {
        let mut registry = SessionRegistry::<()>::new();
        let (a, _ha, _qa) = connect(&mut registry);
        let (b, _hb, _qb) = connect(&mut registry);
        let (_c, _hc, _qc) = connect(&mut registry);
        assert_eq!(registry.len(), 3);

        registry.on_client_disconnected(a, &DisconnectReason::PeerClosed).unwrap();
        registry.on_client_disconnected(b, &DisconnectReason::Closed).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(a));
    }

    #[test]
    fn test_double_register_fails() {
        let mut registry = SessionRegistry::<()>::new();
        let (peer, _h, _q) = peer();
        let id = peer.id();

        registry.on_client_connected(id, peer.clone()).unwrap();
        assert_eq!(
            registry.on_client_connected(id, peer),
            Err(RegistryError::AlreadyRegistered(id))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_ids_fail_fast() {
        let mut registry = SessionRegistry::<()>::new();
        let stranger = ConnectionId::next();

        assert!(matches!(
            registry.on_client_disconnected(stranger, &DisconnectReason::Closed),
            Err(RegistryError::NotRegistered(id)) if id == stranger
        ));
        assert_eq!(
            registry.before_process(stranger),
            Err(RegistryError::NotRegistered(stranger))
        );
        assert_eq!(registry.current_id(), Err(RegistryError::NoCurrentSession));
    }

    #[test]
    fn test_current_session_bracket() {
        let mut registry = SessionRegistry::<u32>::new();
        let (peer, _h, _q) = peer();
        let id = peer.id();
        registry.on_client_connected(id, peer).unwrap();

        registry.before_process(id).unwrap();
        registry.current_mut().unwrap().state += 1;
        assert_eq!(registry.current().unwrap().id(), id);
        registry.after_process();

        assert!(registry.current().is_err());
        assert_eq!(registry.get(id).unwrap().state, 1);
    }

    #[test]
    fn test_disconnect_clears_current() {
        let mut registry = SessionRegistry::<()>::new();
        let (a, _h, _q) = connect(&mut registry);

        registry.before_process(a).unwrap();
        registry.on_client_disconnected(a, &DisconnectReason::PeerClosed).unwrap();

        assert_eq!(registry.current_id(), Err(RegistryError::NoCurrentSession));
    }

    #[test]
    fn test_name_collision() {
        let mut registry = SessionRegistry::<()>::new();
        let (a, _ha, _qa) = connect(&mut registry);
        let (b, _hb, _qb) = connect(&mut registry);

        registry.before_process(a).unwrap();
        registry.claim_name("alice").unwrap();
        registry.claim_name("alice").unwrap();
        registry.after_process();

        registry.before_process(b).unwrap();
        assert!(matches!(
            registry.claim_name("alice"),
            Err(SessionError::NameTaken(ref n)) if n == "alice"
        ));
        assert!(registry.current().unwrap().name().is_none());
        registry.claim_name("bob").unwrap();
        registry.after_process();

        assert_eq!(registry.get(a).unwrap().name(), Some("alice"));
        assert_eq!(registry.find_by_name("bob").unwrap().id(), b);
    }

    #[test]
    fn test_claim_name_requires_current() {
        let mut registry = SessionRegistry::<()>::new();
        connect(&mut registry);

        assert!(matches!(
            registry.claim_name("x"),
            Err(SessionError::Registry(RegistryError::NoCurrentSession))
        ));
    }

    #[test]
    fn test_broadcast_excludes_current() {
        let mut registry = SessionRegistry::<()>::new();
        let (a, ha, _qa) = connect(&mut registry);
        let (_b, hb, _qb) = connect(&mut registry);
        let (_c, hc, _qc) = connect(&mut registry);

        registry.before_process(a).unwrap();
        let delivered = registry.broadcast("say", &("alice", "hi")).unwrap();
        registry.after_process();

        assert_eq!(delivered, 2);
        assert_eq!(ha.pending_bytes(), 0);
        assert!(hb.pending_bytes() > 0);
        assert_eq!(hb.pending_bytes(), hc.pending_bytes());
    }

    #[test]
    fn test_broadcast_skips_closed_peers() {
        let mut registry = SessionRegistry::<()>::new();
        let (_a, _ha, qa) = connect(&mut registry);
        let (_b, hb, _qb) = connect(&mut registry);

        drop(qa);
        let delivered = registry.broadcast("say", &"hello").unwrap();

        assert_eq!(delivered, 1);
        assert!(hb.pending_bytes() > 0);
    }

    #[test]
    fn test_send_to_by_name() {
        let mut registry = SessionRegistry::<()>::new();
        let (a, ha, _qa) = connect(&mut registry);
        let (b, hb, _qb) = connect(&mut registry);

        registry.before_process(b).unwrap();
        registry.claim_name("bob").unwrap();
        registry.after_process();

        registry.before_process(a).unwrap();
        registry.send_to("bob", "whisper", &"psst").unwrap();
        assert!(matches!(
            registry.send_to("carol", "whisper", &"psst"),
            Err(SessionError::NoSuchRecipient(ref n)) if n == "carol"
        ));
        registry.after_process();

        assert_eq!(ha.pending_bytes(), 0);
        assert!(hb.pending_bytes() > 0);
    }
}
