//! Per-client session engine (C6).
//!
//! Uses the action pattern: methods take the environment as input and
//! return actions for the driver (the server loop, or a test harness) to
//! execute. The state machine itself performs no I/O and owns no socket.
//!
//! # State machine
//!
//! ```text
//! UNINITIALIZED --INIT--> WAIT_INIT_ACK --ACK(last sent id)--> ESTABLISHED --idle 3s--> FINISHED
//! ```
//!
//! An INIT received in `WAIT_INIT_ACK` or `ESTABLISHED` (fresh-session or
//! disconnect payload) does not end the session; it resets in-flight state
//! and restarts the handshake back at `WAIT_INIT_ACK`.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use switcher_proto::{is_acked, packet_flags, Envelope, Frame};
use switcher_state::StateStore;

use crate::command::InboundCommand;
use crate::env::Environment;
use crate::error::SessionError;
use crate::planner::{self, Carrier};

/// Ping a silent client after this much inactivity.
pub const LIVENESS_PING_AFTER: Duration = Duration::from_secs(1);
/// Drop a silent client after this much inactivity.
pub const LIVENESS_GOODBYE_AFTER: Duration = Duration::from_secs(3);
/// Resend an unacknowledged COMMAND packet after this long.
pub const RETRANSMIT_AFTER: Duration = Duration::from_millis(500);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No INIT exchange has happened yet.
    Uninitialized,
    /// Server has replied to INIT and is waiting for the client's ACK.
    WaitInitAck,
    /// Handshake complete; normal command dispatch is active.
    Established,
    /// Torn down; the client manager should remove this session.
    Finished,
}

/// Actions a [`Session`] asks its driver to perform.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Send this already-framed envelope to the session's peer.
    Send(Envelope),
    /// Fan this carrier out to every other session (C7), building its own
    /// envelope independently. Its `ack_of` is always `0`: only the
    /// originating session's own copy carries an ack.
    Multicast(Carrier),
    /// The handshake just completed; the driver should call
    /// [`Session::enqueue_initial_dump`] with the initial-state blob (C9).
    EstablishedNeedsInitialDump,
    /// The session has moved to [`SessionState::Finished`] and should be
    /// removed by the client manager on its next sweep.
    Finished,
}

struct InFlightPacket<I> {
    envelope: Envelope,
    last_send_time: I,
}

/// A single client's session state.
///
/// Generic over `Instant` so tests can drive it with a manually-advanced
/// clock instead of `std::time::Instant`.
pub struct Session<I> {
    client_id: u16,
    session_id: u16,
    state: SessionState,
    next_packet_id: u16,
    last_init_reply_packet_id: u16,
    last_acked_inbound_id: u16,
    last_activity: I,
    outbound_carriers: VecDeque<(I, Carrier)>,
    in_flight: Vec<InFlightPacket<I>>,
}

impl<I: Copy + Ord + std::fmt::Debug> Session<I> {
    /// Create a new session in [`SessionState::Uninitialized`].
    pub fn new(client_id: u16, now: I) -> Self {
        Self {
            client_id,
            session_id: 0,
            state: SessionState::Uninitialized,
            next_packet_id: 1,
            last_init_reply_packet_id: 0,
            last_acked_inbound_id: 0,
            last_activity: now,
            outbound_carriers: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    /// The server-assigned client id.
    #[must_use]
    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    /// `0x8000 + client_id` once established, `0` before.
    #[must_use]
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Wraps past 0xFFFF back to 1; 0 is reserved for "no id".
        self.next_packet_id = if id == u16::MAX { 1 } else { id + 1 };
        id
    }

    /// Handle one inbound envelope. `state` is the process-wide switcher
    /// state store, mutated by command application and the response
    /// planner.
    pub fn handle_envelope<E: Environment<Instant = I>>(
        &mut self,
        envelope: &Envelope,
        state: &mut StateStore,
        env: &E,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if self.state == SessionState::Established && envelope.session_id != self.session_id {
            return Err(SessionError::SessionMismatch { expected: self.session_id, actual: envelope.session_id });
        }

        let now = env.now();
        if self.state != SessionState::Finished {
            self.last_activity = now;
        }

        if envelope.is_init() {
            return Ok(self.handle_init(envelope));
        }

        if envelope.is_ack() {
            self.reap_acked(envelope.acked_packet_id);
            if self.state == SessionState::WaitInitAck && is_acked(self.last_init_reply_packet_id, envelope.acked_packet_id) {
                self.session_id = 0x8000 + self.client_id;
                self.state = SessionState::Established;
                tracing::info!(client_id = self.client_id, session_id = self.session_id, "session established");
                return Ok(vec![SessionAction::EstablishedNeedsInitialDump]);
            }
        }

        if self.state != SessionState::Established {
            return Ok(Vec::new());
        }

        if envelope.packet_id != 0 {
            self.last_acked_inbound_id = envelope.packet_id;
        }

        if !envelope.is_command() {
            return Ok(Vec::new());
        }

        let wall = env.wall_clock();
        let Ok(frames) = envelope.frames() else {
            tracing::debug!(client_id = self.client_id, "dropping packet with malformed command frames");
            return Ok(Vec::new());
        };

        let mut carriers = Vec::new();
        for frame in &frames {
            match InboundCommand::parse(frame) {
                Ok(cmd) => carriers.extend(planner::plan(&cmd, state, wall)),
                Err(err) => tracing::debug!(client_id = self.client_id, %err, "dropping frame with bad payload"),
            }
        }

        let mut actions = Vec::new();
        if carriers.is_empty() {
            self.outbound_carriers.push_back((
                now,
                Carrier { frames: Vec::new(), delay: Duration::ZERO, multicast: false, ack_of: envelope.packet_id },
            ));
        } else {
            for (index, mut carrier) in carriers.into_iter().enumerate() {
                if index == 0 {
                    carrier.ack_of = envelope.packet_id;
                }
                if carrier.multicast {
                    let mut peer_copy = carrier.clone();
                    peer_copy.ack_of = 0;
                    actions.push(SessionAction::Multicast(peer_copy));
                }
                let due = env.advance(now, carrier.delay);
                self.outbound_carriers.push_back((due, carrier));
            }
        }

        Ok(actions)
    }

    fn handle_init(&mut self, envelope: &Envelope) -> Vec<SessionAction> {
        let payload_byte = envelope.payload.first().copied();
        match self.state {
            SessionState::Uninitialized => {
                if payload_byte.unwrap_or(1) != 1 {
                    return Vec::new();
                }
                self.start_handshake()
            },
            SessionState::WaitInitAck | SessionState::Established => {
                // A fresh-session (1) or disconnect (4) INIT is treated
                // identically in either state: drop everything in flight and
                // restart the handshake from scratch rather than tearing
                // the session down.
                if payload_byte == Some(1) || payload_byte == Some(4) {
                    self.reset_for_reinit();
                    self.start_handshake()
                } else {
                    Vec::new()
                }
            },
            SessionState::Finished => Vec::new(),
        }
    }

    /// Clear every field a fresh [`Session::new`] would start with, except
    /// `client_id` and `last_activity` (already stamped by the caller).
    /// Used when a connected client sends another INIT instead of ACKing.
    fn reset_for_reinit(&mut self) {
        self.next_packet_id = 1;
        self.last_init_reply_packet_id = 0;
        self.last_acked_inbound_id = 0;
        self.outbound_carriers.clear();
        self.in_flight.clear();
    }

    fn start_handshake(&mut self) -> Vec<SessionAction> {
        self.state = SessionState::WaitInitAck;
        let packet_id = self.next_packet_id();
        self.last_init_reply_packet_id = packet_id;
        vec![SessionAction::Send(self.init_reply_envelope(packet_id))]
    }

    fn init_reply_envelope(&self, packet_id: u16) -> Envelope {
        let mut payload = vec![0x02, 0x00];
        payload.extend_from_slice(&self.client_id.to_be_bytes());
        payload.extend_from_slice(&[0, 0, 0, 0]);
        Envelope {
            flags: packet_flags::INIT,
            session_id: 0,
            acked_packet_id: 0,
            packet_id,
            payload: Bytes::from(payload),
        }
    }

    fn reap_acked(&mut self, acked_packet_id: u16) {
        self.in_flight.retain(|packet| !is_acked(packet.envelope.packet_id, acked_packet_id));
    }

    /// Enqueue the initial-state blob (C9) as a sequence of immediate
    /// carriers, one per setup command group, each becoming its own
    /// independently-ACKed and -retransmitted packet. The driver calls this
    /// after receiving [`SessionAction::EstablishedNeedsInitialDump`].
    pub fn enqueue_initial_dump<E: Environment<Instant = I>>(&mut self, groups: Vec<Vec<Frame>>, env: &E) {
        for frames in groups {
            self.enqueue_carrier(Carrier { frames, delay: Duration::ZERO, multicast: false, ack_of: 0 }, env);
        }
    }

    /// Enqueue an arbitrary carrier, scheduled relative to now per its own
    /// `delay`. Used by the client manager (C7) to deliver a multicast
    /// fan-out copy of another session's carrier into this one's queue.
    pub fn enqueue_carrier<E: Environment<Instant = I>>(&mut self, carrier: Carrier, env: &E) {
        let now = env.now();
        let due = env.advance(now, carrier.delay);
        self.outbound_carriers.push_back((due, carrier));
    }

    /// Periodic maintenance: materialize due carriers, detect liveness
    /// timeouts, and retransmit unacknowledged COMMAND packets.
    pub fn tick<E: Environment<Instant = I>>(&mut self, env: &E) -> Vec<SessionAction> {
        let now = env.now();
        let mut actions = Vec::new();

        // Due carriers fire in FIFO (insertion) order; a not-yet-due carrier
        // ahead of a due one (e.g. an auto-transition's future step queued
        // before a just-arrived Cut) does not block the due one behind it.
        let mut still_pending = VecDeque::with_capacity(self.outbound_carriers.len());
        while let Some((due, carrier)) = self.outbound_carriers.pop_front() {
            if due <= now {
                actions.push(self.materialize(carrier, now));
            } else {
                still_pending.push_back((due, carrier));
            }
        }
        self.outbound_carriers = still_pending;

        if self.state == SessionState::Established {
            if env.elapsed(self.last_activity) > LIVENESS_GOODBYE_AFTER {
                tracing::warn!(client_id = self.client_id, "liveness timeout, sending goodbye");
                let packet_id = self.next_packet_id();
                actions.push(SessionAction::Send(Envelope {
                    flags: packet_flags::INIT,
                    session_id: self.session_id,
                    acked_packet_id: 0,
                    packet_id,
                    payload: Bytes::new(),
                }));
                self.state = SessionState::Finished;
                actions.push(SessionAction::Finished);
            } else if env.elapsed(self.last_activity) > LIVENESS_PING_AFTER {
                let packet_id = self.next_packet_id();
                actions.push(SessionAction::Send(Envelope {
                    flags: packet_flags::COMMAND | packet_flags::ACK,
                    session_id: self.session_id,
                    acked_packet_id: self.last_acked_inbound_id,
                    packet_id,
                    payload: Bytes::new(),
                }));
            }
        }

        for packet in &mut self.in_flight {
            if env.elapsed(packet.last_send_time) > RETRANSMIT_AFTER {
                packet.last_send_time = now;
                let mut envelope = packet.envelope.clone();
                envelope.flags |= packet_flags::RETRANSMIT;
                actions.push(SessionAction::Send(envelope));
            }
        }

        actions
    }

    fn materialize(&mut self, carrier: Carrier, now: I) -> SessionAction {
        let packet_id = self.next_packet_id();
        let is_command = !carrier.frames.is_empty();
        let mut flags = 0u8;
        if is_command {
            flags |= packet_flags::COMMAND;
        }
        if carrier.ack_of != 0 {
            flags |= packet_flags::ACK;
        }
        let payload = Frame::encode_all(&carrier.frames);
        let envelope = Envelope {
            flags,
            session_id: self.session_id,
            acked_packet_id: carrier.ack_of,
            packet_id,
            payload: Bytes::from(payload),
        };
        if is_command {
            self.in_flight.push(InFlightPacket { envelope: envelope.clone(), last_send_time: now });
        }
        SessionAction::Send(envelope)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::env::WallClock;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct TestInstant(u64);

    struct TestEnv {
        millis: Cell<u64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { millis: Cell::new(0) }
        }

        fn advance_by(&self, millis: u64) {
            self.millis.set(self.millis.get() + millis);
        }
    }

    impl Environment for TestEnv {
        type Instant = TestInstant;

        fn now(&self) -> TestInstant {
            TestInstant(self.millis.get())
        }

        fn elapsed(&self, since: TestInstant) -> Duration {
            Duration::from_millis(self.millis.get().saturating_sub(since.0))
        }

        fn advance(&self, instant: TestInstant, by: Duration) -> TestInstant {
            TestInstant(instant.0 + by.as_millis() as u64)
        }

        fn wall_clock(&self) -> WallClock {
            WallClock { hour: 0, minute: 0, second: 0, micros: 0 }
        }
    }

    fn init_request() -> Envelope {
        Envelope {
            flags: packet_flags::INIT,
            session_id: 0,
            acked_packet_id: 0,
            packet_id: 0,
            payload: Bytes::from_static(&[1, 0, 0, 0, 0, 0, 0, 0]),
        }
    }

    fn handshake(session: &mut Session<TestInstant>, state: &mut StateStore, env: &TestEnv) -> u16 {
        let actions = session.handle_envelope(&init_request(), state, env).unwrap();
        let SessionAction::Send(reply) = &actions[0] else { panic!("expected Send") };
        let reply_packet_id = reply.packet_id;

        let ack = Envelope {
            flags: packet_flags::ACK,
            session_id: 0,
            acked_packet_id: reply_packet_id,
            packet_id: 1,
            payload: Bytes::new(),
        };
        let actions = session.handle_envelope(&ack, state, env).unwrap();
        assert!(matches!(actions[0], SessionAction::EstablishedNeedsInitialDump));
        assert_eq!(session.state(), SessionState::Established);
        reply_packet_id
    }

    #[test]
    fn handshake_establishes_session() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(3, env.now());
        handshake(&mut session, &mut state, &env);
        assert_eq!(session.session_id(), 0x8003);
    }

    #[test]
    fn init_while_established_resets_and_restarts_handshake() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        // Queue some outbound work and an in-flight command so the reset
        // can be observed clearing them.
        let cut = Frame::new(*b"DCut", vec![0u8]);
        let payload = Frame::encode_all(&[cut]);
        let command = Envelope {
            flags: packet_flags::COMMAND,
            session_id: session.session_id(),
            acked_packet_id: 0,
            packet_id: 2,
            payload: Bytes::from(payload),
        };
        session.handle_envelope(&command, &mut state, &env).unwrap();
        session.tick(&env);

        let disconnect = Envelope {
            flags: packet_flags::INIT,
            session_id: 0,
            acked_packet_id: 0,
            packet_id: 0,
            payload: Bytes::from_static(&[4, 0, 0, 0, 0, 0, 0, 0]),
        };
        let actions = session.handle_envelope(&disconnect, &mut state, &env).unwrap();
        assert_eq!(session.state(), SessionState::WaitInitAck);
        assert!(matches!(actions.as_slice(), [SessionAction::Send(reply)] if reply.is_init()));

        // The reset handshake can complete again from scratch.
        let SessionAction::Send(reply) = &actions[0] else { unreachable!() };
        let ack = Envelope {
            flags: packet_flags::ACK,
            session_id: 0,
            acked_packet_id: reply.packet_id,
            packet_id: 1,
            payload: Bytes::new(),
        };
        let actions = session.handle_envelope(&ack, &mut state, &env).unwrap();
        assert!(matches!(actions[0], SessionAction::EstablishedNeedsInitialDump));
        assert_eq!(session.state(), SessionState::Established);

        // No stale retransmit survives the reset.
        env.advance_by(600);
        let retransmits: Vec<_> = session
            .tick(&env)
            .into_iter()
            .filter(|a| matches!(a, SessionAction::Send(e) if e.is_retransmit()))
            .collect();
        assert!(retransmits.is_empty());
    }

    #[test]
    fn init_while_wait_init_ack_resets_and_resends() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());

        let first = session.handle_envelope(&init_request(), &mut state, &env).unwrap();
        let SessionAction::Send(first_reply) = &first[0] else { panic!("expected Send") };
        let first_packet_id = first_reply.packet_id;

        let second = session.handle_envelope(&init_request(), &mut state, &env).unwrap();
        let SessionAction::Send(second_reply) = &second[0] else { panic!("expected Send") };
        assert_eq!(session.state(), SessionState::WaitInitAck);
        // The reset restarts the packet id counter from scratch, so a
        // repeated INIT yields the same first reply id, not an incrementing
        // retry counter.
        assert_eq!(second_reply.packet_id, first_packet_id);
    }

    #[test]
    fn cut_command_produces_ack_and_multicast() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        let cut = Frame::new(*b"DCut", vec![0u8]);
        let payload = Frame::encode_all(&[cut]);
        let envelope = Envelope {
            flags: packet_flags::COMMAND,
            session_id: session.session_id(),
            acked_packet_id: 0,
            packet_id: 2,
            payload: Bytes::from(payload),
        };
        let actions = session.handle_envelope(&envelope, &mut state, &env).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SessionAction::Multicast(_)));

        let tick_actions = session.tick(&env);
        let sent: Vec<_> =
            tick_actions.iter().filter(|a| matches!(a, SessionAction::Send(_))).collect();
        assert!(!sent.is_empty());
        if let SessionAction::Send(envelope) = sent.last().unwrap() {
            assert_eq!(envelope.acked_packet_id, 2);
            assert!(envelope.is_ack());
        }
    }

    #[test]
    fn unknown_command_enqueues_bare_ack() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        let unknown = Frame::new(*b"ZZZZ", vec![1, 2]);
        let payload = Frame::encode_all(&[unknown]);
        let envelope = Envelope {
            flags: packet_flags::COMMAND,
            session_id: session.session_id(),
            acked_packet_id: 0,
            packet_id: 5,
            payload: Bytes::from(payload),
        };
        let actions = session.handle_envelope(&envelope, &mut state, &env).unwrap();
        assert!(actions.is_empty());

        let tick_actions = session.tick(&env);
        assert_eq!(tick_actions.len(), 1);
        if let SessionAction::Send(reply) = &tick_actions[0] {
            assert!(reply.is_ack());
            assert!(!reply.is_command());
            assert_eq!(reply.acked_packet_id, 5);
        } else {
            panic!("expected bare ack Send action");
        }
    }

    #[test]
    fn ack_reaps_in_flight_packets_at_or_below_id() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        let set_program = Frame::new(*b"CPgI", vec![0, 0, 0, 3]);
        let payload = Frame::encode_all(&[set_program]);
        let envelope = Envelope {
            flags: packet_flags::COMMAND,
            session_id: session.session_id(),
            acked_packet_id: 0,
            packet_id: 2,
            payload: Bytes::from(payload),
        };
        session.handle_envelope(&envelope, &mut state, &env).unwrap();
        let tick_actions = session.tick(&env);
        let SessionAction::Send(command_envelope) =
            tick_actions.iter().find(|a| matches!(a, SessionAction::Send(e) if e.is_command())).unwrap()
        else {
            panic!("expected a command envelope")
        };
        let sent_id = command_envelope.packet_id;

        let ack = Envelope {
            flags: packet_flags::ACK,
            session_id: session.session_id(),
            acked_packet_id: sent_id,
            packet_id: 3,
            payload: Bytes::new(),
        };
        session.handle_envelope(&ack, &mut state, &env).unwrap();

        // No further retransmit of the now-acked command packet.
        env.advance_by(600);
        let retransmits: Vec<_> = session
            .tick(&env)
            .into_iter()
            .filter(|a| matches!(a, SessionAction::Send(e) if e.is_command() && e.is_retransmit()))
            .collect();
        assert!(retransmits.is_empty());
    }

    #[test]
    fn idle_session_pings_then_says_goodbye() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        env.advance_by(1_100);
        let actions = session.tick(&env);
        assert!(actions.iter().any(|a| matches!(a, SessionAction::Send(e) if e.is_command() && e.is_ack() && e.payload.is_empty())));
        assert_eq!(session.state(), SessionState::Established);

        env.advance_by(2_000);
        let actions = session.tick(&env);
        assert!(actions.iter().any(|a| matches!(a, SessionAction::Finished)));
        assert_eq!(session.state(), SessionState::Finished);
    }

    #[test]
    fn enqueue_carrier_materializes_once_due() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        let carrier = Carrier { frames: vec![Frame::new(*b"Time", vec![0; 8])], delay: Duration::ZERO, multicast: false, ack_of: 0 };
        session.enqueue_carrier(carrier, &env);

        let actions = session.tick(&env);
        assert!(actions.iter().any(|a| matches!(a, SessionAction::Send(e) if e.is_command())));
    }

    #[test]
    fn unacked_command_is_retransmitted_after_500ms() {
        let env = TestEnv::new();
        let mut state = StateStore::new(switcher_state::load_default());
        let mut session = Session::new(1, env.now());
        handshake(&mut session, &mut state, &env);

        let cut = Frame::new(*b"DCut", vec![0u8]);
        let payload = Frame::encode_all(&[cut]);
        let envelope = Envelope {
            flags: packet_flags::COMMAND,
            session_id: session.session_id(),
            acked_packet_id: 0,
            packet_id: 2,
            payload: Bytes::from(payload),
        };
        session.handle_envelope(&envelope, &mut state, &env).unwrap();
        session.tick(&env);

        env.advance_by(600);
        let actions = session.tick(&env);
        assert!(actions.iter().any(|a| matches!(a, SessionAction::Send(e) if e.is_retransmit())));
    }
}
