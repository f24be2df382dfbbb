//! Per-peer handshake and liveness state (spec §4.3). One `Session` exists per remote address
//! known to an endpoint, server or client side, and owns the `AcknowledgeManager` tracking that
//! peer's reliable stream.
use crate::ack::AcknowledgeManager;
use crate::reassembly::ReassemblyBuffer;
use rand::Rng;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const ASK_COOLDOWN: Duration = Duration::from_millis(50);
const RETRANSMIT_COOLDOWN: Duration = Duration::from_millis(50);

/// The handshake state machine. There is no explicit `Disconnected` variant carried on a live
/// `Session`: a peer that has fully disconnected has its session removed from the peer table
/// entirely rather than parked in a terminal state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    /// Server has issued a challenge and is waiting for `CONNECT`. Client has sent `GETCHALLENGE`
    /// and is waiting for `CHALLENGERESP`.
    Challenging,
    /// Client has sent `CONNECT` and is waiting for `CONNECTRESP`. Never observed server-side:
    /// the server moves straight from `Challenging` to `Connected` on a valid `CONNECT`.
    Connecting,
    /// Handshake complete; connected packages are accepted and delivered.
    Connected,
}

/// One remote peer, from first `GETCHALLENGE` through to disconnect.
pub struct Session {
    pub remote: SocketAddr,
    pub state: SessionState,
    pub challenge: u32,
    pub peer_id: u8,
    pub player_name: Option<String>,
    pub next_send_seq: u64,
    pub last_activity: Instant,
    pub ack: AcknowledgeManager,
    /// Reassembles this peer's datagrams into frames. Kept per-session rather than per-socket:
    /// a partial frame from one peer must never be spliced with bytes from another.
    pub reassembly: ReassemblyBuffer,
}

impl Session {
    /// Starts a fresh session in the `Challenging` state with a freshly rolled challenge value.
    /// Used both by a server answering `GETCHALLENGE` and by a client about to send one.
    pub fn new_challenging(remote: SocketAddr, peer_id: u8, now: Instant) -> Session {
        Session {
            remote,
            state: SessionState::Challenging,
            // Spec §4.3: challenge is drawn from [1, 2^32-1] - zero is never issued.
            challenge: rand::thread_rng().gen_range(1, u32::MAX),
            peer_id,
            player_name: None,
            next_send_seq: 1,
            last_activity: now,
            ack: AcknowledgeManager::new(ASK_COOLDOWN, RETRANSMIT_COOLDOWN),
            reassembly: ReassemblyBuffer::new(),
        }
    }

    #[inline]
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    #[inline]
    pub fn is_alive(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_activity) < timeout
    }

    /// Server side: accepts a `CONNECT` whose challenge matches the one issued, moving straight
    /// to `Connected`. A mismatched challenge is the caller's job to detect and log; this simply
    /// refuses to transition and leaves the session in `Challenging` for a retry.
    pub fn accept_connect(&mut self, challenge: u32, name: String, now: Instant) -> bool {
        if self.state != SessionState::Challenging || challenge != self.challenge {
            return false;
        }

        self.player_name = Some(name);
        self.state = SessionState::Connected;
        self.touch(now);
        true
    }

    /// Client side: records the challenge handed back by the server and moves to `Connecting`,
    /// about to send `CONNECT`.
    pub fn receive_challenge(&mut self, challenge: u32, now: Instant) {
        self.challenge = challenge;
        self.state = SessionState::Connecting;
        self.touch(now);
    }

    /// Client side: the server accepted our `CONNECT`.
    pub fn receive_connect_response(&mut self, peer_id: u8, now: Instant) {
        self.peer_id = peer_id;
        self.state = SessionState::Connected;
        self.touch(now);
    }

    #[inline]
    pub fn allocate_sequence(&mut self) -> u64 {
        let seq = self.next_send_seq;
        self.next_send_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn accept_connect_rejects_wrong_challenge() {
        let now = Instant::now();
        let mut session = Session::new_challenging(addr(), 0, now);
        let wrong = session.challenge.wrapping_add(1);

        assert!(!session.accept_connect(wrong, "Alice".into(), now));
        assert_eq!(session.state, SessionState::Challenging);
    }

    #[test]
    fn accept_connect_moves_straight_to_connected() {
        let now = Instant::now();
        let mut session = Session::new_challenging(addr(), 0, now);
        let challenge = session.challenge;

        assert!(session.accept_connect(challenge, "Alice".into(), now));
        assert_eq!(session.state, SessionState::Connected);
        assert_eq!(session.player_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn client_side_handshake_transitions_through_connecting() {
        let now = Instant::now();
        let mut session = Session::new_challenging(addr(), 0, now);

        session.receive_challenge(0xABCD, now);
        assert_eq!(session.state, SessionState::Connecting);

        session.receive_connect_response(7, now);
        assert_eq!(session.state, SessionState::Connected);
        assert_eq!(session.peer_id, 7);
    }

    #[test]
    fn liveness_times_out() {
        let now = Instant::now();
        let session = Session::new_challenging(addr(), 0, now);
        let timeout = Duration::from_secs(15);

        assert!(session.is_alive(now, timeout));
        assert!(!session.is_alive(now + Duration::from_secs(16), timeout));
    }

    #[test]
    fn allocate_sequence_is_monotone_starting_at_one() {
        let now = Instant::now();
        let mut session = Session::new_challenging(addr(), 0, now);

        assert_eq!(session.allocate_sequence(), 1);
        assert_eq!(session.allocate_sequence(), 2);
        assert_eq!(session.allocate_sequence(), 3);
    }
}
