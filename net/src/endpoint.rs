//! `Server`/`Client` facades (spec §5). Each endpoint owns a `UdpSocket`, a single peer table
//! behind one `Mutex`, and three OS threads: one draining the socket, one walking the peer table
//! on a heartbeat cadence, one draining the application's outbound queue. Shutdown is cooperative:
//! an `AtomicBool` tells every thread to stop at its next wakeup, and `shutdown` joins them all.
use crate::config::EndpointConfig;
use crate::crypto::{xor_obfuscate, IdentityCodec, OuterCodec};
use crate::queue::{ApplicationHandle, ApplicationQueues, InboundEvent, OutboundCommand, Target};
use crate::reassembly::ReassemblyBuffer;
use crate::session::{Session, SessionState};
use crate::wire::{
    ChallengeResponse, Connect, ConnectResponse, ConnectedCommand, ConnectedPackage, ConnectionlessPayload,
    Disconnect, Frame, FrameKind, GetChallenge, HeartbeatBody, InfoResponse, PlayerStatus, StatusResponse,
};
use rand::Rng;
use slog::{debug, info, trace, warn, Logger};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(100);
const RECV_BUFFER_SIZE: usize = 4096;

/// Which side of the handshake this endpoint plays. A `Server` answers `GETCHALLENGE`/`CONNECT`
/// from anyone; a `Client` only ever talks to the one `remote` it was pointed at.
enum Role {
    Server { server_id: u32, hostname: String, map_name: String, max_players: u8 },
    Client { remote: SocketAddr, user_id: u32, name: String },
}

struct PeerTable {
    sessions: HashMap<SocketAddr, Session>,
    by_id: HashMap<u8, SocketAddr>,
    next_peer_id: u8,
}

impl PeerTable {
    fn new() -> PeerTable {
        PeerTable { sessions: HashMap::new(), by_id: HashMap::new(), next_peer_id: 1 }
    }
}

struct Shared {
    socket: UdpSocket,
    peers: Mutex<PeerTable>,
    running: AtomicBool,
    inbound_tx: crossbeam_channel::Sender<InboundEvent>,
    codec: Arc<dyn OuterCodec>,
    logger: Logger,
    config: EndpointConfig,
    role: Role,
}

/// A running endpoint: the socket, peer table and worker threads are alive until `shutdown` is
/// called (or the struct is dropped, which shuts it down too).
pub struct Endpoint {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Endpoint {
    fn spawn(shared: Arc<Shared>) -> Endpoint {
        shared.socket.set_read_timeout(Some(SOCKET_READ_TIMEOUT)).expect("read timeout is always valid");

        let threads = vec![
            spawn_receive_thread(Arc::clone(&shared)),
            spawn_heartbeat_thread(Arc::clone(&shared)),
        ];

        Endpoint { shared, threads }
    }

    /// Idempotent: a second call observes `running` already false and simply returns.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!(self.shared.logger, "shutting down endpoint");
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Server-side facade. `bind` brings up the socket and worker threads; the returned
/// `ApplicationHandle` is the application's only window into the transport.
pub struct Server {
    endpoint: Endpoint,
}

impl Server {
    pub fn bind(config: EndpointConfig, logger: Logger) -> io::Result<(Server, ApplicationHandle)> {
        Server::bind_with_codec(config, logger, Arc::new(IdentityCodec))
    }

    pub fn bind_with_codec(
        config: EndpointConfig,
        logger: Logger,
        codec: Arc<dyn OuterCodec>,
    ) -> io::Result<(Server, ApplicationHandle)> {
        let socket = UdpSocket::bind(&config.bind_address)?;
        let queues = ApplicationQueues::new(config.queue_depth);
        let handle = ApplicationHandle::from(&queues);

        let shared = Arc::new(Shared {
            socket,
            peers: Mutex::new(PeerTable::new()),
            running: AtomicBool::new(true),
            inbound_tx: queues.inbound_tx,
            codec,
            logger,
            config,
            role: Role::Server {
                server_id: rand::thread_rng().gen(),
                hostname: "r2-server".into(),
                map_name: "unknown".into(),
                max_players: 4,
            },
        });

        let mut endpoint = Endpoint::spawn(Arc::clone(&shared));
        endpoint.threads.push(spawn_send_thread(shared, queues.outbound_rx));

        Ok((Server { endpoint }, handle))
    }

    /// Sends `DISCONNECT` to a connected peer and removes it from the peer table locally; the
    /// peer's own `InboundEvent::PeerDisconnected` fires once it processes the datagram.
    pub fn disconnect(&self, peer_id: u8, reason: &str) {
        let addr = {
            let mut peers = self.endpoint.shared.peers.lock().unwrap();
            let addr = peers.by_id.remove(&peer_id);
            if let Some(addr) = addr {
                peers.sessions.remove(&addr);
            }
            addr
        };

        if let Some(addr) = addr {
            send_connectionless(
                &self.endpoint.shared,
                addr,
                ConnectionlessPayload::Disconnect(Disconnect { reason: reason.to_string() }),
            );
        }
    }

    pub fn shutdown(self) {
        self.endpoint.shutdown();
    }
}

/// Client-side facade. `connect` kicks off the handshake by sending `GETCHALLENGE` immediately;
/// the application learns the handshake has finished by watching for `InboundEvent::PeerConnected`
/// on the returned handle.
pub struct Client {
    endpoint: Endpoint,
}

impl Client {
    pub fn connect<A: ToSocketAddrs>(
        config: EndpointConfig,
        server_addr: A,
        user_id: u32,
        name: String,
        logger: Logger,
    ) -> io::Result<(Client, ApplicationHandle)> {
        Client::connect_with_codec(config, server_addr, user_id, name, logger, Arc::new(IdentityCodec))
    }

    pub fn connect_with_codec<A: ToSocketAddrs>(
        config: EndpointConfig,
        server_addr: A,
        user_id: u32,
        name: String,
        logger: Logger,
        codec: Arc<dyn OuterCodec>,
    ) -> io::Result<(Client, ApplicationHandle)> {
        let remote = server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let queues = ApplicationQueues::new(config.queue_depth);
        let handle = ApplicationHandle::from(&queues);

        let now = Instant::now();
        let mut peers = PeerTable::new();
        peers.sessions.insert(remote, Session::new_challenging(remote, 0, now));

        let shared = Arc::new(Shared {
            socket,
            peers: Mutex::new(peers),
            running: AtomicBool::new(true),
            inbound_tx: queues.inbound_tx,
            codec,
            logger,
            config,
            role: Role::Client { remote, user_id, name },
        });

        send_connectionless(&shared, remote, ConnectionlessPayload::GetChallenge(GetChallenge { user_id }));

        let mut endpoint = Endpoint::spawn(Arc::clone(&shared));
        endpoint.threads.push(spawn_send_thread(shared, queues.outbound_rx));

        Ok((Client { endpoint }, handle))
    }

    /// Sends `DISCONNECT` to the server and removes the local session state.
    pub fn disconnect(&self, reason: &str) {
        let remote = match &self.endpoint.shared.role {
            Role::Client { remote, .. } => *remote,
            Role::Server { .. } => unreachable!("a Client always holds Role::Client"),
        };

        {
            let mut peers = self.endpoint.shared.peers.lock().unwrap();
            peers.sessions.remove(&remote);
        }

        send_connectionless(
            &self.endpoint.shared,
            remote,
            ConnectionlessPayload::Disconnect(Disconnect { reason: reason.to_string() }),
        );
    }

    pub fn shutdown(self) {
        self.endpoint.shutdown();
    }
}

fn spawn_receive_thread(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        while shared.running.load(Ordering::SeqCst) {
            trace!(shared.logger, "blocking on socket read"; "context" => "receive");
            match shared.socket.recv_from(&mut buf) {
                Ok((n, addr)) => on_datagram(&shared, addr, &buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut => {
                    continue
                }
                Err(err) => warn!(shared.logger, "socket read failed"; "error" => %err),
            }
        }
    })
}

fn spawn_heartbeat_thread(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::spawn(move || {
        while shared.running.load(Ordering::SeqCst) {
            trace!(shared.logger, "sleeping until next heartbeat pass"; "context" => "heartbeat");
            thread::sleep(shared.config.heartbeat_period());
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
            run_heartbeat_pass(&shared);
        }
    })
}

fn spawn_send_thread(shared: Arc<Shared>, outbound_rx: crossbeam_channel::Receiver<OutboundCommand>) -> JoinHandle<()> {
    thread::spawn(move || {
        while shared.running.load(Ordering::SeqCst) {
            trace!(shared.logger, "blocking on outbound queue"; "context" => "send");
            match outbound_rx.recv_timeout(SOCKET_READ_TIMEOUT) {
                Ok(command) => send_outbound(&shared, command),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

fn run_heartbeat_pass(shared: &Arc<Shared>) {
    let now = Instant::now();
    let liveness_timeout = shared.config.liveness_timeout();
    let handshake_timeout = shared.config.handshake_timeout();

    let (alive, dead): (Vec<(SocketAddr, u8, Vec<u64>)>, Vec<(SocketAddr, u8, bool)>) = {
        let mut peers = shared.peers.lock().unwrap();
        let mut alive = Vec::new();
        let mut dead = Vec::new();

        for (&addr, session) in peers.sessions.iter_mut() {
            let was_connected = session.state == SessionState::Connected;
            let timeout = if was_connected { liveness_timeout } else { handshake_timeout };
            if session.is_alive(now, timeout) {
                if was_connected {
                    alive.push((addr, session.peer_id, session.ack.get_lost(now)));
                }
            } else {
                dead.push((addr, session.peer_id, was_connected));
            }
        }

        for (addr, ..) in &dead {
            peers.sessions.remove(addr);
        }
        for (_, peer_id, _) in &dead {
            peers.by_id.remove(peer_id);
        }

        (alive, dead)
    };

    for (addr, lost) in alive.into_iter().map(|(addr, _, lost)| (addr, lost)) {
        send_heartbeat(shared, addr, lost);
    }

    for (addr, peer_id, was_connected) in dead {
        if was_connected {
            warn!(shared.logger, "peer timed out"; "peer_id" => peer_id, "addr" => %addr);
            let _ = shared.inbound_tx.send(InboundEvent::PeerDisconnected { peer_id, reason: "timeout".into() });
        } else {
            debug!(shared.logger, "handshake timed out"; "addr" => %addr);
        }
    }
}

fn send_heartbeat(shared: &Arc<Shared>, addr: SocketAddr, lost_packages: Vec<u64>) {
    let mut payload = Vec::new();
    HeartbeatBody { lost_packages }.encode(&mut payload);
    send_frame(shared, addr, FrameKind::Heartbeat, payload);
}

fn send_outbound(shared: &Arc<Shared>, command: OutboundCommand) {
    let (target, connected_command) = match command {
        OutboundCommand::Component(target, update) => (target, ConnectedCommand::SendComp(update)),
        OutboundCommand::Event(target, update) => (target, ConnectedCommand::SendEvent(update)),
    };

    let now = Instant::now();
    let targets: Vec<SocketAddr> = {
        let peers = shared.peers.lock().unwrap();
        match target {
            Target::Peer(id) => {
                let resolved = peers.by_id.get(&id).copied();
                if resolved.is_none() {
                    warn!(shared.logger, "dropping outbound message, client not found"; "peer_id" => id);
                }
                resolved.into_iter().collect()
            }
            Target::Broadcast => peers
                .sessions
                .iter()
                .filter(|(_, s)| s.state == SessionState::Connected)
                .map(|(&addr, _)| addr)
                .collect(),
        }
    };

    for addr in targets {
        let encoded = {
            let mut peers = shared.peers.lock().unwrap();
            let session = match peers.sessions.get_mut(&addr) {
                Some(session) => session,
                None => {
                    warn!(shared.logger, "dropping outbound message, peer vanished mid-flush"; "addr" => %addr);
                    continue;
                }
            };
            let sequence = session.allocate_sequence();
            let acknowledge = session.ack.last_delivered_seq();
            let package =
                ConnectedPackage { sequence, acknowledge, end_of_content: true, command: connected_command.clone() };
            let encoded = package.encode();
            session.ack.register_sent(sequence, encoded.clone(), now);
            encoded
        };

        send_frame(shared, addr, FrameKind::Connected, encoded);
    }
}

fn send_connectionless(shared: &Arc<Shared>, addr: SocketAddr, payload: ConnectionlessPayload) {
    let mut bytes = Vec::new();
    payload.encode(&mut bytes);
    send_frame(shared, addr, FrameKind::Connectionless, bytes);
}

fn send_frame(shared: &Arc<Shared>, addr: SocketAddr, kind: FrameKind, payload: Vec<u8>) {
    let mut obfuscated = shared.codec.encode(&payload);
    xor_obfuscate(&mut obfuscated);
    let frame = Frame { kind, payload: obfuscated };
    if let Err(err) = shared.socket.send_to(&frame.encode(), addr) {
        warn!(shared.logger, "send failed"; "addr" => %addr, "error" => %err);
        handle_send_failure(shared, addr);
    }
}

/// A `SocketError` on `send_to` (spec §7) is treated as a disconnection: the target is removed
/// from the peer table immediately rather than left to expire via the liveness timeout. A
/// session that had never reached `Connected` is torn down silently, same as a handshake
/// timeout - the application was never told it existed.
fn handle_send_failure(shared: &Arc<Shared>, addr: SocketAddr) {
    let removed = {
        let mut peers = shared.peers.lock().unwrap();
        let session = peers.sessions.remove(&addr);
        if let Some(session) = &session {
            peers.by_id.remove(&session.peer_id);
        }
        session
    };

    if let Some(session) = removed {
        if session.state == SessionState::Connected {
            let _ = shared
                .inbound_tx
                .send(InboundEvent::PeerDisconnected { peer_id: session.peer_id, reason: "io_error".into() });
        }
    }
}

fn on_datagram(shared: &Arc<Shared>, addr: SocketAddr, bytes: &[u8]) {
    let frames: Vec<Vec<u8>> = {
        let mut peers = shared.peers.lock().unwrap();
        match peers.sessions.get_mut(&addr) {
            Some(session) => {
                session.reassembly.ingest(bytes);
                let mut out = Vec::new();
                while let Some(frame) = session.reassembly.extract_frame() {
                    out.push(frame);
                }
                out
            }
            None => {
                let mut scratch = ReassemblyBuffer::new();
                scratch.ingest(bytes);
                scratch.extract_frame().into_iter().collect()
            }
        }
    };

    let now = Instant::now();
    for raw in frames {
        on_frame(shared, addr, &raw, now);
    }
}

fn on_frame(shared: &Arc<Shared>, addr: SocketAddr, raw: &[u8], now: Instant) {
    // Invariant 5: a non-matching magic is discarded silently. "Silently" means DEBUG, not
    // WARNING - garbage on the wire from an unrelated sender is routine, not a protocol fault.
    if !Frame::magic_matches(raw) {
        debug!(shared.logger, "dropping frame with bad magic"; "addr" => %addr);
        return;
    }

    let frame = match Frame::decode(raw) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(shared.logger, "dropping malformed frame"; "addr" => %addr, "error" => %err);
            return;
        }
    };

    let mut payload = frame.payload;
    xor_obfuscate(&mut payload);
    let payload = match shared.codec.decode(&payload) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(shared.logger, "dropping frame, outer codec failed"; "addr" => %addr, "error" => %err);
            return;
        }
    };

    {
        let mut peers = shared.peers.lock().unwrap();
        if let Some(session) = peers.sessions.get_mut(&addr) {
            session.touch(now);
        }
    }

    match frame.kind {
        FrameKind::Connectionless => on_connectionless(shared, addr, &payload, now),
        FrameKind::Connected => on_connected(shared, addr, &payload, now),
        FrameKind::Heartbeat => on_heartbeat(shared, addr, &payload, now),
    }
}

fn on_connectionless(shared: &Arc<Shared>, addr: SocketAddr, payload: &[u8], now: Instant) {
    let mut stream = payload;
    let command = match ConnectionlessPayload::decode(&mut stream) {
        Ok(command) => command,
        Err(err) => {
            warn!(shared.logger, "dropping malformed connectionless command"; "addr" => %addr, "error" => %err);
            return;
        }
    };

    // Invariant 6: a Connected session only accepts connected packages. DISCONNECT is the one
    // named exception (spec §4.3) - it is how a Connected peer tears its own session down.
    if !matches!(command, ConnectionlessPayload::Disconnect(_)) {
        let is_connected = {
            let peers = shared.peers.lock().unwrap();
            peers.sessions.get(&addr).map(|s| s.state == SessionState::Connected).unwrap_or(false)
        };
        if is_connected {
            debug!(shared.logger, "dropping connectionless command from an already-connected peer"; "addr" => %addr);
            return;
        }
    }

    match (&shared.role, command) {
        (Role::Server { .. }, ConnectionlessPayload::GetChallenge(body)) => {
            server_handle_get_challenge(shared, addr, body, now)
        }
        (Role::Server { .. }, ConnectionlessPayload::Connect(body)) => server_handle_connect(shared, addr, body, now),
        (Role::Server { .. }, ConnectionlessPayload::GetInfo) => server_handle_get_info(shared, addr),
        (Role::Server { .. }, ConnectionlessPayload::GetStatus) => server_handle_get_status(shared, addr),
        (Role::Server { .. }, ConnectionlessPayload::Disconnect(body)) => server_handle_disconnect(shared, addr, body),
        (Role::Client { .. }, ConnectionlessPayload::ChallengeResponse(body)) => {
            client_handle_challenge_response(shared, addr, body, now)
        }
        (Role::Client { .. }, ConnectionlessPayload::ConnectResponse(body)) => {
            client_handle_connect_response(shared, addr, body, now)
        }
        (Role::Client { .. }, ConnectionlessPayload::Disconnect(body)) => client_handle_disconnect(shared, addr, body),
        (_, other) => {
            debug!(shared.logger, "ignoring connectionless command for this role"; "addr" => %addr, "command" => ?other)
        }
    }
}

fn server_handle_get_challenge(shared: &Arc<Shared>, addr: SocketAddr, _body: GetChallenge, now: Instant) {
    let challenge = {
        let mut peers = shared.peers.lock().unwrap();
        let session = peers.sessions.entry(addr).or_insert_with(|| Session::new_challenging(addr, 0, now));
        session.touch(now);
        session.challenge
    };
    send_connectionless(shared, addr, ConnectionlessPayload::ChallengeResponse(ChallengeResponse { challenge }));
}

fn server_handle_connect(shared: &Arc<Shared>, addr: SocketAddr, body: Connect, now: Instant) {
    let assigned = {
        let mut peers = shared.peers.lock().unwrap();
        let accepted = match peers.sessions.get_mut(&addr) {
            Some(session) => session.accept_connect(body.challenge, body.name.clone(), now),
            None => false,
        };

        if !accepted {
            None
        } else {
            let peer_id = peers.next_peer_id;
            peers.next_peer_id = peers.next_peer_id.wrapping_add(1);
            peers.by_id.insert(peer_id, addr);
            if let Some(session) = peers.sessions.get_mut(&addr) {
                session.peer_id = peer_id;
            }
            Some(peer_id)
        }
    };

    let server_id = match &shared.role {
        Role::Server { server_id, .. } => *server_id,
        Role::Client { .. } => unreachable!("connect handling only runs server-side"),
    };

    match assigned {
        Some(peer_id) => {
            send_connectionless(
                shared,
                addr,
                ConnectionlessPayload::ConnectResponse(ConnectResponse { client_id: peer_id, server_id }),
            );
            info!(shared.logger, "peer connected"; "peer_id" => peer_id, "addr" => %addr, "name" => %body.name);
            let _ =
                shared.inbound_tx.send(InboundEvent::PeerConnected { peer_id, remote: addr, name: body.name });
        }
        None => {
            warn!(shared.logger, "invalid challenge"; "addr" => %addr);
        }
    }
}

fn server_handle_get_info(shared: &Arc<Shared>, addr: SocketAddr) {
    let (hostname, map_name, max_players, player_count) = {
        let peers = shared.peers.lock().unwrap();
        let player_count =
            peers.sessions.values().filter(|s| s.state == SessionState::Connected).count() as u8;
        match &shared.role {
            Role::Server { hostname, map_name, max_players, .. } => {
                (hostname.clone(), map_name.clone(), *max_players, player_count)
            }
            Role::Client { .. } => unreachable!("GETINFO only answered server-side"),
        }
    };

    send_connectionless(
        shared,
        addr,
        ConnectionlessPayload::InfoResponse(InfoResponse { hostname, map_name, player_count, max_players }),
    );
}

fn server_handle_get_status(shared: &Arc<Shared>, addr: SocketAddr) {
    let players = {
        let peers = shared.peers.lock().unwrap();
        peers
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Connected)
            .map(|s| PlayerStatus { name: s.player_name.clone().unwrap_or_default(), score: 0, ping: 0 })
            .collect()
    };

    send_connectionless(shared, addr, ConnectionlessPayload::StatusResponse(StatusResponse { players }));
}

fn server_handle_disconnect(shared: &Arc<Shared>, addr: SocketAddr, body: Disconnect) {
    let peer_id = {
        let mut peers = shared.peers.lock().unwrap();
        let peer_id = peers.sessions.get(&addr).map(|s| s.peer_id);
        peers.sessions.remove(&addr);
        if let Some(id) = peer_id {
            peers.by_id.remove(&id);
        }
        peer_id
    };

    if let Some(peer_id) = peer_id {
        info!(shared.logger, "peer disconnected"; "peer_id" => peer_id, "reason" => %body.reason);
        let _ = shared.inbound_tx.send(InboundEvent::PeerDisconnected { peer_id, reason: body.reason });
    }
}

fn client_handle_challenge_response(shared: &Arc<Shared>, addr: SocketAddr, body: ChallengeResponse, now: Instant) {
    let name = match &shared.role {
        Role::Client { name, .. } => name.clone(),
        Role::Server { .. } => unreachable!("challenge response only handled client-side"),
    };

    {
        let mut peers = shared.peers.lock().unwrap();
        if let Some(session) = peers.sessions.get_mut(&addr) {
            session.receive_challenge(body.challenge, now);
        }
    }

    send_connectionless(shared, addr, ConnectionlessPayload::Connect(Connect { challenge: body.challenge, name }));
}

fn client_handle_connect_response(shared: &Arc<Shared>, addr: SocketAddr, body: ConnectResponse, now: Instant) {
    let name = {
        let mut peers = shared.peers.lock().unwrap();
        let session = match peers.sessions.get_mut(&addr) {
            Some(session) => session,
            None => return,
        };
        session.receive_connect_response(body.client_id, now);
        session.player_name.clone().unwrap_or_default()
    };

    info!(shared.logger, "connected to server"; "peer_id" => body.client_id, "server_id" => body.server_id);
    let _ = shared.inbound_tx.send(InboundEvent::PeerConnected { peer_id: body.client_id, remote: addr, name });
}

fn client_handle_disconnect(shared: &Arc<Shared>, addr: SocketAddr, body: Disconnect) {
    let peer_id = {
        let peers = shared.peers.lock().unwrap();
        peers.sessions.get(&addr).map(|s| s.peer_id)
    };

    if let Some(peer_id) = peer_id {
        info!(shared.logger, "server closed the connection"; "reason" => %body.reason);
        let _ = shared.inbound_tx.send(InboundEvent::PeerDisconnected { peer_id, reason: body.reason });
    }
}

fn on_connected(shared: &Arc<Shared>, addr: SocketAddr, payload: &[u8], now: Instant) {
    let package = match ConnectedPackage::decode(payload) {
        Ok(package) => package,
        Err(err) => {
            warn!(shared.logger, "dropping malformed connected package"; "addr" => %addr, "error" => %err);
            return;
        }
    };

    if !package.end_of_content {
        warn!(shared.logger, "dropping fragmented package, fragmentation is not supported"; "addr" => %addr);
        return;
    }

    let (peer_id, delivered) = {
        trace!(shared.logger, "acquiring peer table for ack update"; "context" => "ack_manager", "addr" => %addr);
        let mut peers = shared.peers.lock().unwrap();
        let session = match peers.sessions.get_mut(&addr) {
            Some(session) if session.state == SessionState::Connected => session,
            _ => {
                debug!(shared.logger, "dropping connected package from a non-connected peer"; "addr" => %addr);
                return;
            }
        };

        session.ack.approve(package.acknowledge);
        session.ack.register_received(package, now);
        (session.peer_id, session.ack.extract_available())
    };

    for package in delivered {
        let event = match package.command {
            ConnectedCommand::SendComp(update) => InboundEvent::Component(peer_id, update),
            ConnectedCommand::SendEvent(update) => InboundEvent::Event(peer_id, update),
        };
        let _ = shared.inbound_tx.send(event);
    }
}

fn on_heartbeat(shared: &Arc<Shared>, addr: SocketAddr, payload: &[u8], now: Instant) {
    let mut stream = payload;
    let heartbeat = match HeartbeatBody::decode(&mut stream) {
        Ok(body) => body,
        Err(err) => {
            warn!(shared.logger, "dropping malformed heartbeat"; "addr" => %addr, "error" => %err);
            return;
        }
    };

    let resend = {
        trace!(shared.logger, "acquiring peer table for ack update"; "context" => "ack_manager", "addr" => %addr);
        let mut peers = shared.peers.lock().unwrap();
        match peers.sessions.get_mut(&addr) {
            Some(session) if session.state == SessionState::Connected => {
                let current_ack = session.ack.last_delivered_seq();
                session.ack.packages_to_resend(&heartbeat.lost_packages, current_ack, now)
            }
            _ => Vec::new(),
        }
    };

    for encoded in resend {
        send_frame(shared, addr, FrameKind::Connected, encoded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;
    use crate::queue::{InboundEvent, OutboundCommand, Target};
    use crate::wire::EventUpdate;
    use std::time::Duration;

    fn config(port: u16) -> EndpointConfig {
        EndpointConfig {
            bind_address: format!("127.0.0.1:{}", port),
            heartbeat_millis: 20,
            liveness_timeout_secs: 2,
            handshake_timeout_secs: 2,
            log_level: "info".into(),
            queue_depth: 64,
            player_name: None,
        }
    }

    fn recv_event(handle: &ApplicationHandle, timeout: Duration) -> Option<InboundEvent> {
        handle.inbound_rx.recv_timeout(timeout).ok()
    }

    #[test]
    fn handshake_and_event_delivery_end_to_end() {
        let (server, server_handle) = Server::bind(config(28100), discard_logger()).expect("server binds");
        let (client, client_handle) =
            Client::connect(config(28101), "127.0.0.1:28100", 1, "Alice".into(), discard_logger())
                .expect("client connects");

        let connected = recv_event(&server_handle, Duration::from_secs(2));
        assert!(matches!(connected, Some(InboundEvent::PeerConnected { .. })));

        let connected_client_side = recv_event(&client_handle, Duration::from_secs(2));
        assert!(matches!(connected_client_side, Some(InboundEvent::PeerConnected { .. })));

        client_handle
            .outbound_tx
            .send(OutboundCommand::Event(
                Target::Broadcast,
                EventUpdate { event_id: "ping".into(), data: vec![1, 2, 3] },
            ))
            .unwrap();

        let received = recv_event(&server_handle, Duration::from_secs(2));
        match received {
            Some(InboundEvent::Event(_, update)) => {
                assert_eq!(update.event_id, "ping");
                assert_eq!(update.data, vec![1, 2, 3]);
            }
            other => panic!("expected an event, got {:?}", other),
        }

        client.shutdown();
        server.shutdown();
    }

    #[test]
    fn client_initiated_disconnect_notifies_the_server() {
        let (server, server_handle) = Server::bind(config(28102), discard_logger()).expect("server binds");
        let (client, client_handle) =
            Client::connect(config(28103), "127.0.0.1:28102", 2, "Bob".into(), discard_logger())
                .expect("client connects");

        recv_event(&server_handle, Duration::from_secs(2)); // PeerConnected
        recv_event(&client_handle, Duration::from_secs(2)); // PeerConnected

        client.disconnect("requested");

        let left = recv_event(&server_handle, Duration::from_secs(2));
        match left {
            Some(InboundEvent::PeerDisconnected { reason, .. }) => assert_eq!(reason, "requested"),
            other => panic!("expected a disconnect notification, got {:?}", other),
        }

        server.shutdown();
    }

    #[test]
    fn rejected_connect_with_wrong_challenge_never_produces_a_peer_connected_event() {
        let (server, server_handle) = Server::bind(config(28104), discard_logger()).expect("server binds");

        let socket = std::net::UdpSocket::bind("127.0.0.1:28105").unwrap();
        socket.connect("127.0.0.1:28104").unwrap();

        let mut bytes = Vec::new();
        ConnectionlessPayload::Connect(Connect { challenge: 0xBAD, name: "Eve".into() }).encode(&mut bytes);
        let frame = Frame { kind: FrameKind::Connectionless, payload: {
            let mut p = bytes.clone();
            xor_obfuscate(&mut p);
            p
        } };
        socket.send(&frame.encode()).unwrap();

        let event = recv_event(&server_handle, Duration::from_millis(500));
        assert!(event.is_none(), "a CONNECT with no prior GETCHALLENGE must not create a peer");

        server.shutdown();
    }

    #[test]
    fn a_peer_that_goes_silent_is_declared_disconnected_after_the_liveness_timeout() {
        let (server, server_handle) = Server::bind(config(28108), discard_logger()).expect("server binds");
        let (client, client_handle) =
            Client::connect(config(28109), "127.0.0.1:28108", 3, "Frank".into(), discard_logger())
                .expect("client connects");

        assert!(matches!(recv_event(&server_handle, Duration::from_secs(2)), Some(InboundEvent::PeerConnected { .. })));
        assert!(matches!(recv_event(&client_handle, Duration::from_secs(2)), Some(InboundEvent::PeerConnected { .. })));

        // Simulate the client's process vanishing: its heartbeat thread stops along with
        // everything else, so the server should stop hearing from it entirely.
        client.shutdown();

        let disconnected = recv_event(&server_handle, Duration::from_secs(4));
        match disconnected {
            Some(InboundEvent::PeerDisconnected { reason, .. }) => assert_eq!(reason, "timeout"),
            other => panic!("expected a timeout disconnection, got {:?}", other),
        }

        server.shutdown();
    }

    #[test]
    fn stalled_handshake_times_out_without_a_peer_disconnected_event() {
        let mut cfg = config(28106);
        cfg.handshake_timeout_secs = 0; // expires immediately on the next heartbeat pass
        let (server, server_handle) = Server::bind(cfg, discard_logger()).expect("server binds");

        let socket = std::net::UdpSocket::bind("127.0.0.1:28107").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        socket.connect("127.0.0.1:28106").unwrap();

        let mut bytes = Vec::new();
        ConnectionlessPayload::GetChallenge(GetChallenge { user_id: 0 }).encode(&mut bytes);
        let mut obfuscated = bytes.clone();
        xor_obfuscate(&mut obfuscated);
        let frame = Frame { kind: FrameKind::Connectionless, payload: obfuscated };
        socket.send(&frame.encode()).unwrap();

        let mut buf = [0u8; 256];
        socket.recv(&mut buf).expect("server answers GETCHALLENGE");

        // A never-completed handshake must not surface any event (it was never announced as a
        // connection in the first place), just silent teardown.
        let event = recv_event(&server_handle, Duration::from_millis(400));
        assert!(event.is_none(), "an abandoned handshake must not emit PeerConnected or PeerDisconnected");

        server.shutdown();
    }
}
