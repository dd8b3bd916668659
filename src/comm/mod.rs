//! Point-to-point transport between the coupling processes.
//!
//! Rank 0 is the coordinator. Every send is synchronous: it returns only once
//! the destination has taken the message. Message tags are the variants of
//! [`Message`].

pub mod threads;

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::error::ProtocolError;
use crate::sampler::SampleBatch;

pub use threads::ThreadComm;

pub type Rank = usize;

/// The rank that gathers samples and runs the integrator.
pub const COORDINATOR: Rank = 0;

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Number of samples about to follow
    SampleCount(usize),
    /// A worker's samples
    Samples(SampleBatch),
    /// The per-cell result, coordinator to everyone
    Field(Vec<f64>),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SampleCount(_) => "sample count",
            Message::Samples(_) => "samples",
            Message::Field(_) => "result field",
        }
    }
}

pub trait Communicator {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// Deliver `message` to `dest`, blocking until `dest` has received it.
    fn send(&self, dest: Rank, message: Message) -> Result<(), ProtocolError>;

    /// Block until a message from `source` arrives.
    fn receive(&self, source: Rank) -> Result<Message, ProtocolError>;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    fn check_rank(&self, rank: Rank) -> Result<(), ProtocolError> {
        if rank < self.size() {
            Ok(())
        } else {
            Err(ProtocolError::RankOutOfRange { rank, size: self.size() })
        }
    }

    /// Root's `message` is returned on every rank; the others pass `None`.
    fn broadcast(&self, root: Rank, message: Option<Message>) -> Result<Message, ProtocolError> {
        self.check_rank(root)?;
        if self.rank() != root {
            return self.receive(root);
        }
        let message = message.ok_or(ProtocolError::UnexpectedMessage {
            source_rank: root,
            expected: "broadcast payload",
            found: "nothing",
        })?;
        for dest in (0..self.size()).filter(|&r| r != root) {
            self.send(dest, message.clone())?;
        }
        Ok(message)
    }
}

/// A world of one: the coordinator alone.
///
/// Messages sent to itself are queued and handed back in order.
#[derive(Debug, Default)]
pub struct SingleProcess {
    loopback: RefCell<VecDeque<Message>>,
}

impl SingleProcess {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SingleProcess {
    fn rank(&self) -> Rank {
        COORDINATOR
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: Rank, message: Message) -> Result<(), ProtocolError> {
        self.check_rank(dest)?;
        self.loopback.borrow_mut().push_back(message);
        Ok(())
    }

    fn receive(&self, source: Rank) -> Result<Message, ProtocolError> {
        self.check_rank(source)?;
        self.loopback
            .borrow_mut()
            .pop_front()
            .ok_or(ProtocolError::Disconnected { peer: source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_has_no_peers() {
        let comm = SingleProcess::new();
        assert!(comm.is_coordinator());
        assert!(matches!(
            comm.send(1, Message::SampleCount(0)),
            Err(ProtocolError::RankOutOfRange { rank: 1, size: 1 })
        ));
        assert!(matches!(comm.receive(0), Err(ProtocolError::Disconnected { peer: 0 })));
    }

    #[test]
    fn single_process_broadcast_returns_the_payload() {
        let comm = SingleProcess::new();
        let msg = comm.broadcast(COORDINATOR, Some(Message::Field(vec![1.0, 2.0]))).unwrap();
        assert_eq!(msg, Message::Field(vec![1.0, 2.0]));
        assert!(comm.broadcast(COORDINATOR, None).is_err());
    }

    #[test]
    fn loopback_preserves_order() {
        let comm = SingleProcess::new();
        comm.send(0, Message::SampleCount(3)).unwrap();
        comm.send(0, Message::Field(vec![])).unwrap();
        assert_eq!(comm.receive(0).unwrap().kind(), "sample count");
        assert_eq!(comm.receive(0).unwrap().kind(), "result field");
    }
}
