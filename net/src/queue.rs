//! Application-facing queues. The transport exposes two directions - outbound commands the
//! application wants delivered to peers, and inbound events the transport has decoded and wants
//! to hand off - as bounded `crossbeam-channel` queues rather than the semaphore-gated buffers
//! the protocol notes describe: a bounded channel's `send` already blocks the producer once full,
//! which is the same backpressure the semaphore was for.
use crate::wire::{ComponentUpdate, EventUpdate};
use crossbeam_channel::{Receiver, Sender};
use std::net::SocketAddr;

/// Default bound on every application-facing queue. Past this, a producer's `send` blocks until
/// the transport (or the application) drains it.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Which peers an outbound command is addressed to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Target {
    Peer(u8),
    Broadcast,
}

/// An application-originated command waiting to be framed into a connected package and sent.
#[derive(Debug, Clone)]
pub enum OutboundCommand {
    Component(Target, ComponentUpdate),
    Event(Target, EventUpdate),
}

/// A transport-originated notification handed to the application: either a decoded connected
/// package or a change in peer connectivity.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Component(u8, ComponentUpdate),
    Event(u8, EventUpdate),
    PeerConnected { peer_id: u8, remote: SocketAddr, name: String },
    PeerDisconnected { peer_id: u8, reason: String },
}

/// The pair of bounded channels an `Endpoint` and its application share. The application holds
/// `outbound_tx`/`inbound_rx`; the endpoint holds the other halves.
pub struct ApplicationQueues {
    pub outbound_tx: Sender<OutboundCommand>,
    pub outbound_rx: Receiver<OutboundCommand>,
    pub inbound_tx: Sender<InboundEvent>,
    pub inbound_rx: Receiver<InboundEvent>,
}

impl ApplicationQueues {
    pub fn new(depth: usize) -> ApplicationQueues {
        let (outbound_tx, outbound_rx) = crossbeam_channel::bounded(depth);
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(depth);
        ApplicationQueues { outbound_tx, outbound_rx, inbound_tx, inbound_rx }
    }
}

impl Default for ApplicationQueues {
    fn default() -> Self {
        ApplicationQueues::new(DEFAULT_QUEUE_DEPTH)
    }
}

/// A thin, cloneable handle an application keeps after spawning an endpoint. `Sender`/`Receiver`
/// are already cheap to clone and safe to share across threads, so this is just a named bundle of
/// the two halves an application actually uses.
#[derive(Clone)]
pub struct ApplicationHandle {
    pub outbound_tx: Sender<OutboundCommand>,
    pub inbound_rx: Receiver<InboundEvent>,
}

impl From<&ApplicationQueues> for ApplicationHandle {
    fn from(queues: &ApplicationQueues) -> Self {
        ApplicationHandle { outbound_tx: queues.outbound_tx.clone(), inbound_rx: queues.inbound_rx.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_command_roundtrips_through_the_channel() {
        let queues = ApplicationQueues::new(4);
        let command = OutboundCommand::Event(
            Target::Broadcast,
            EventUpdate { event_id: "tick".into(), data: vec![1, 2, 3] },
        );

        queues.outbound_tx.send(command.clone()).unwrap();
        let received = queues.outbound_rx.recv().unwrap();
        match received {
            OutboundCommand::Event(Target::Broadcast, update) => assert_eq!(update.event_id, "tick"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn full_queue_blocks_a_bounded_sender() {
        let queues = ApplicationQueues::new(1);
        let command = OutboundCommand::Event(Target::Broadcast, EventUpdate { event_id: "a".into(), data: vec![] });

        queues.outbound_tx.send(command.clone()).unwrap();
        assert!(queues.outbound_tx.try_send(command).is_err());
    }

    #[test]
    fn application_handle_shares_the_same_channels() {
        let queues = ApplicationQueues::new(4);
        let handle: ApplicationHandle = (&queues).into();

        queues
            .inbound_tx
            .send(InboundEvent::PeerDisconnected { peer_id: 1, reason: "timeout".into() })
            .unwrap();

        match handle.inbound_rx.recv().unwrap() {
            InboundEvent::PeerDisconnected { peer_id, reason } => {
                assert_eq!(peer_id, 1);
                assert_eq!(reason, "timeout");
            }
            _ => panic!("wrong variant"),
        }
    }
}
