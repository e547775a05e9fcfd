//! Client manager (C7).
//!
//! An owned map behind a small set of helper methods, each with a unit
//! test: one session per peer address, ticked every loop iteration, with
//! finished sessions swept and multicast fan-out to every session but the
//! originator.

use std::collections::HashMap;
use std::net::SocketAddr;

use switcher_core::env::Environment;
use switcher_core::planner::Carrier;
use switcher_core::session::{Session, SessionAction, SessionState};

/// Tracks one [`Session`] per peer address, keyed by the address it was
/// first seen on.
///
/// The session's own `0x8000 + client_id` id distinguishes it on the wire
/// once established; this map exists so inbound datagrams — which may
/// arrive before a session id is assigned — still route to the right
/// session.
pub struct ClientManager<I> {
    sessions: HashMap<SocketAddr, Session<I>>,
    next_client_id: u16,
}

impl<I: Copy + Ord + std::fmt::Debug> Default for ClientManager<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Copy + Ord + std::fmt::Debug> ClientManager<I> {
    /// An empty manager with no sessions.
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: HashMap::new(), next_client_id: 0 }
    }

    /// The session for `addr`, creating a fresh [`SessionState::Uninitialized`]
    /// one on first contact.
    pub fn get_or_create<E: Environment<Instant = I>>(&mut self, addr: SocketAddr, env: &E) -> &mut Session<I> {
        if !self.sessions.contains_key(&addr) {
            let client_id = self.next_client_id;
            self.next_client_id = self.next_client_id.wrapping_add(1);
            self.sessions.insert(addr, Session::new(client_id, env.now()));
        }
        self.sessions.get_mut(&addr).expect("just inserted if absent")
    }

    /// The session already registered for `addr`, if any.
    #[must_use]
    pub fn get(&mut self, addr: SocketAddr) -> Option<&mut Session<I>> {
        self.sessions.get_mut(&addr)
    }

    /// Tick every session, collecting `(addr, action)` pairs for the driver
    /// to dispatch, and remove any session that reached
    /// [`SessionState::Finished`].
    pub fn run_clients<E: Environment<Instant = I>>(&mut self, env: &E) -> Vec<(SocketAddr, SessionAction)> {
        let mut actions = Vec::new();
        let mut finished = Vec::new();
        for (&addr, session) in &mut self.sessions {
            for action in session.tick(env) {
                if matches!(action, SessionAction::Finished) {
                    finished.push(addr);
                }
                actions.push((addr, action));
            }
        }
        for addr in finished {
            self.sessions.remove(&addr);
        }
        actions
    }

    /// Deliver a shallow copy of `carrier` into every session except
    /// `origin`. Peer copies always carry `ack_of = 0`.
    pub fn send_to_other_clients<E: Environment<Instant = I>>(&mut self, origin: SocketAddr, carrier: &Carrier, env: &E) {
        for (&addr, session) in &mut self.sessions {
            if addr == origin || session.state() != SessionState::Established {
                continue;
            }
            let mut peer_copy = carrier.clone();
            peer_copy.ack_of = 0;
            session.enqueue_carrier(peer_copy, env);
        }
    }

    /// Number of tracked sessions, established or not.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop the session for `addr`, if any. Called when a session's own
    /// tick or an explicit disconnect yields [`SessionAction::Finished`]
    /// outside of [`Self::run_clients`]'s sweep.
    pub fn remove(&mut self, addr: SocketAddr) {
        self.sessions.remove(&addr);
    }
}
