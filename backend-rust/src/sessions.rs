//! # sessions
//!
//! Tracks controllers talking to the UDP hub. One session per `(address, port)`;
//! ids are allocated monotonically and never reused. Sessions are refreshed by
//! every valid packet and evicted by [`PeerSessionRegistry::sweep`] once idle
//! past the timeout.
//!
//! Mutated only from the hub task, so no locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PeerSession {
    pub peer_id: u32,
    pub addr: SocketAddr,
    pub last_activity: Instant,
}

/// Outcome of [`PeerSessionRegistry::get_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Existing(u32),
    Created(u32),
    /// At capacity; the caller drops the packet.
    Rejected,
}

impl Admission {
    #[cfg(test)]
    pub fn peer_id(self) -> Option<u32> {
        match self {
            Admission::Existing(id) | Admission::Created(id) => Some(id),
            Admission::Rejected => None,
        }
    }
}

pub struct PeerSessionRegistry {
    sessions: HashMap<u32, PeerSession>,
    by_addr: HashMap<SocketAddr, u32>,
    next_id: u32,
    max_connections: usize,
    timeout: Duration,
}

impl PeerSessionRegistry {
    pub fn new(max_connections: usize, timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
            max_connections,
            timeout,
        }
    }

    pub fn get_or_create(&mut self, addr: SocketAddr, now: Instant) -> Admission {
        if let Some(&id) = self.by_addr.get(&addr) {
            return Admission::Existing(id);
        }
        if self.sessions.len() >= self.max_connections {
            warn!("Peer {addr} rejected: {} sessions at capacity", self.sessions.len());
            return Admission::Rejected;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.sessions.insert(id, PeerSession { peer_id: id, addr, last_activity: now });
        self.by_addr.insert(addr, id);
        info!("Peer #{id} joined from {addr} ({} active)", self.sessions.len());
        Admission::Created(id)
    }

    /// Refresh last activity. Returns false for an unknown id.
    pub fn touch(&mut self, peer_id: u32, now: Instant) -> bool {
        match self.sessions.get_mut(&peer_id) {
            Some(s) => {
                s.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, peer_id: u32) -> Option<PeerSession> {
        let session = self.sessions.remove(&peer_id)?;
        self.by_addr.remove(&session.addr);
        Some(session)
    }

    /// Evict every session idle for longer than the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerSession> {
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_activity) > self.timeout)
            .map(|s| s.peer_id)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(session) = self.remove(id) {
                info!("Peer #{id} ({}) timed out", session.addr);
                evicted.push(session);
            }
        }
        evicted
    }

    #[cfg(test)]
    pub fn get(&self, peer_id: u32) -> Option<&PeerSession> {
        self.sessions.get(&peer_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], port))
    }

    #[test]
    fn test_same_endpoint_reuses_session() {
        let mut reg = PeerSessionRegistry::new(4, Duration::from_secs(15));
        let now = Instant::now();
        assert_eq!(reg.get_or_create(addr(5000), now), Admission::Created(1));
        assert_eq!(reg.get_or_create(addr(5000), now), Admission::Existing(1));
        // Same IP, different port is a different peer.
        assert_eq!(reg.get_or_create(addr(5001), now), Admission::Created(2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_capacity_and_slot_reuse() {
        let mut reg = PeerSessionRegistry::new(2, Duration::from_secs(15));
        let now = Instant::now();
        assert!(reg.get_or_create(addr(1), now).peer_id().is_some());
        assert!(reg.get_or_create(addr(2), now).peer_id().is_some());
        assert_eq!(reg.get_or_create(addr(3), now), Admission::Rejected);

        assert!(reg.remove(1).is_some());
        // Freed slot goes to the new peer with a fresh id.
        assert_eq!(reg.get_or_create(addr(3), now), Admission::Created(3));
        // Existing peers are unaffected by rejections.
        assert_eq!(reg.get_or_create(addr(2), now), Admission::Existing(2));
    }

    #[test]
    fn test_sweep_evicts_only_idle_sessions() {
        let timeout = Duration::from_secs(15);
        let mut reg = PeerSessionRegistry::new(4, timeout);
        let t0 = Instant::now();
        reg.get_or_create(addr(1), t0);
        reg.get_or_create(addr(2), t0);

        let t1 = t0 + Duration::from_secs(10);
        assert!(reg.touch(2, t1));

        assert!(reg.sweep(t0 + timeout).is_empty());

        let evicted = reg.sweep(t0 + Duration::from_secs(16));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].peer_id, 1);
        assert!(reg.get(1).is_none());
        assert!(reg.get(2).is_some());

        // Evicted endpoint comes back as a brand new session.
        let t2 = t0 + Duration::from_secs(17);
        assert_eq!(reg.get_or_create(addr(1), t2), Admission::Created(3));
    }

    #[test]
    fn test_touch_unknown_peer() {
        let mut reg = PeerSessionRegistry::new(1, Duration::from_secs(1));
        assert!(!reg.touch(42, Instant::now()));
        assert!(reg.is_empty());
    }
}
