//! In-process communicator: one thread per rank, one rendezvous channel per
//! ordered pair of ranks.
//!
//! A zero-capacity `sync_channel` only completes a send when the receiver
//! takes the message, which gives every send the synchronous semantics the
//! gather protocol relies on. A rank's channel to itself holds one message.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use crate::comm::{Communicator, Message, Rank};
use crate::error::ProtocolError;

pub struct ThreadComm {
    rank: Rank,
    size: usize,
    /// `senders[dest]`
    senders: Vec<SyncSender<Message>>,
    /// `receivers[source]`
    receivers: Vec<Receiver<Message>>,
}

impl ThreadComm {
    /// Communicators for ranks `0..size`, to be moved into one thread each.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let mut senders: Vec<Vec<SyncSender<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Message>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();

        for src in 0..size {
            for dst in 0..size {
                let bound = usize::from(src == dst);
                let (tx, rx) = sync_channel(bound);
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadComm { rank, size, senders, receivers })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: Rank, message: Message) -> Result<(), ProtocolError> {
        self.check_rank(dest)?;
        self.senders[dest]
            .send(message)
            .map_err(|_| ProtocolError::Disconnected { peer: dest })
    }

    fn receive(&self, source: Rank) -> Result<Message, ProtocolError> {
        self.check_rank(source)?;
        self.receivers[source]
            .recv()
            .map_err(|_| ProtocolError::Disconnected { peer: source })
    }
}
