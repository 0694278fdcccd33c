//! Message-passing abstraction.

use crate::error::MetaflowError;
use std::collections::VecDeque;
use std::time::Duration;

/// Blocking message passing between a fixed set of ranks.
///
/// Messages are opaque byte buffers. Collectives must be called by every
/// rank in the same order; a failure on one rank is a failure of the
/// collective everywhere.
pub trait Transport: Send {
    /// This process's rank in `0..size`.
    fn rank(&self) -> usize;

    /// Number of ranks. Fixed for the lifetime of the transport.
    fn size(&self) -> usize;

    /// Sends `bytes` to rank `to`.
    fn send(&mut self, to: usize, bytes: Vec<u8>) -> Result<(), MetaflowError>;

    /// Receives the next message from rank `from`, blocking until one arrives.
    fn recv(&mut self, from: usize) -> Result<Vec<u8>, MetaflowError>;

    /// Every rank contributes one buffer and receives all of them, indexed
    /// by rank.
    fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, MetaflowError>;

    /// Sets how long blocking calls wait for a peer. Transports that never
    /// block ignore it.
    fn set_timeout(&mut self, _timeout: Duration) {}

    /// Distributes the buffer of `root` to every rank. Non-root buffers are
    /// ignored.
    fn broadcast(&mut self, root: usize, bytes: Vec<u8>) -> Result<Vec<u8>, MetaflowError> {
        let contribution = if self.rank() == root { bytes } else { Vec::new() };
        let mut gathered = self.all_gather(contribution)?;
        if root >= gathered.len() {
            return Err(MetaflowError::comm(format!(
                "broadcast root {root} out of range for {} ranks",
                gathered.len()
            )));
        }
        Ok(gathered.swap_remove(root))
    }
}

/// Transport of a run with a single rank.
///
/// Collectives return immediately; messages sent to rank 0 are queued and
/// can be received back.
#[derive(Debug, Default)]
pub struct SingleRank {
    queue: VecDeque<Vec<u8>>,
}

impl SingleRank {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for SingleRank {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&mut self, to: usize, bytes: Vec<u8>) -> Result<(), MetaflowError> {
        if to != 0 {
            return Err(MetaflowError::comm(format!("no rank {to} in a single-rank run")));
        }
        self.queue.push_back(bytes);
        Ok(())
    }

    fn recv(&mut self, from: usize) -> Result<Vec<u8>, MetaflowError> {
        if from != 0 {
            return Err(MetaflowError::comm(format!("no rank {from} in a single-rank run")));
        }
        self.queue
            .pop_front()
            .ok_or_else(|| MetaflowError::comm("receive would block forever"))
    }

    fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, MetaflowError> {
        Ok(vec![bytes])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_rank_collectives() {
        let mut t = SingleRank::new();
        assert_eq!(t.all_gather(vec![1, 2]).unwrap(), vec![vec![1, 2]]);
        assert_eq!(t.broadcast(0, vec![7]).unwrap(), vec![7]);
        assert!(t.broadcast(1, vec![7]).is_err());
    }

    #[test]
    fn test_single_rank_loopback() {
        let mut t = SingleRank::new();
        t.send(0, vec![3]).unwrap();
        assert_eq!(t.recv(0).unwrap(), vec![3]);
        assert!(t.recv(0).unwrap_err().is_communication());
        assert!(t.send(1, vec![]).is_err());
    }
}
