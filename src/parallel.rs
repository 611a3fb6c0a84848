//! Message passing between ranks.
//!
//! All parallel work in this crate is single-program-multiple-data: every rank runs the same
//! sequence of operations, and collective operations must be entered by all ranks in the
//! same order. Ranks talk through a [`Communicator`], which only needs blocking
//! point-to-point messages; collectives are built on top of it in [`ExecutionContext`].

use crate::error::DiscretizationError;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::sync::Arc;

pub mod wire;

use wire::{decode_indices, decode_values, encode_indices, encode_values};

/// Message tags used by the collectives of this crate.
pub mod tags {
    pub const BARRIER: u16 = 1;
    pub const ALL_GATHER: u16 = 2;
    pub const EXCHANGE: u16 = 3;
}

/// Blocking point-to-point messaging between the ranks of one run.
///
/// Messages between a pair of ranks are delivered in the order they were sent.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(&self, peer: usize, tag: u16, payload: &[u8]) -> Result<(), DiscretizationError>;

    /// Receives the next message from `peer`, which must carry `tag`.
    fn receive(&self, peer: usize, tag: u16) -> Result<Vec<u8>, DiscretizationError>;
}

/// The communicator of a run with a single rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, peer: usize, _tag: u16, _payload: &[u8]) -> Result<(), DiscretizationError> {
        Err(DiscretizationError::Communication(format!(
            "cannot send to rank {peer} in a serial run"
        )))
    }

    fn receive(&self, peer: usize, _tag: u16) -> Result<Vec<u8>, DiscretizationError> {
        Err(DiscretizationError::Communication(format!(
            "cannot receive from rank {peer} in a serial run"
        )))
    }
}

struct Envelope {
    tag: u16,
    payload: Vec<u8>,
}

/// Ranks emulated by threads of one process, connected by channels.
///
/// Create all ranks with [`ThreadCommunicator::world`] and move each one into its own thread.
pub struct ThreadCommunicator {
    rank: usize,
    // Indexed by destination rank
    senders: Vec<Sender<Envelope>>,
    // Indexed by source rank
    receivers: Vec<Receiver<Envelope>>,
}

impl fmt::Debug for ThreadCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.senders.len())
            .finish()
    }
}

impl ThreadCommunicator {
    /// Creates the communicators of `n_ranks` connected ranks, ordered by rank.
    pub fn world(n_ranks: usize) -> Vec<ThreadCommunicator> {
        // channels[source][destination]
        let channels: Vec<Vec<(Sender<Envelope>, Receiver<Envelope>)>> = (0..n_ranks)
            .map(|_| (0..n_ranks).map(|_| unbounded()).collect())
            .collect();

        (0..n_ranks)
            .map(|rank| ThreadCommunicator {
                rank,
                senders: (0..n_ranks)
                    .map(|destination| channels[rank][destination].0.clone())
                    .collect(),
                receivers: (0..n_ranks)
                    .map(|source| channels[source][rank].1.clone())
                    .collect(),
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), DiscretizationError> {
        if peer < self.senders.len() {
            Ok(())
        } else {
            Err(DiscretizationError::Communication(format!(
                "rank {peer} does not exist in a run with {} ranks",
                self.senders.len()
            )))
        }
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, peer: usize, tag: u16, payload: &[u8]) -> Result<(), DiscretizationError> {
        self.check_peer(peer)?;
        self.senders[peer]
            .send(Envelope {
                tag,
                payload: payload.to_vec(),
            })
            .map_err(|_| DiscretizationError::Communication(format!("rank {peer} has shut down")))
    }

    fn receive(&self, peer: usize, tag: u16) -> Result<Vec<u8>, DiscretizationError> {
        self.check_peer(peer)?;
        let envelope = self.receivers[peer]
            .recv()
            .map_err(|_| DiscretizationError::Communication(format!("rank {peer} has shut down")))?;
        if envelope.tag != tag {
            return Err(DiscretizationError::Communication(format!(
                "expected message with tag {tag} from rank {peer}, got tag {}",
                envelope.tag
            )));
        }
        Ok(envelope.payload)
    }
}

#[cfg(feature = "mpi")]
mod mpi_backend {
    use super::Communicator;
    use crate::error::DiscretizationError;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination as _, Source as _};

    /// Ranks as MPI processes.
    ///
    /// The MPI environment (the `mpi::environment::Universe`) must outlive the communicator.
    pub struct MpiCommunicator {
        world: SimpleCommunicator,
    }

    impl MpiCommunicator {
        pub fn new(world: SimpleCommunicator) -> Self {
            Self { world }
        }
    }

    impl Communicator for MpiCommunicator {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn send(&self, peer: usize, tag: u16, payload: &[u8]) -> Result<(), DiscretizationError> {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(payload, i32::from(tag));
            Ok(())
        }

        fn receive(&self, peer: usize, tag: u16) -> Result<Vec<u8>, DiscretizationError> {
            let (payload, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            Ok(payload)
        }
    }
}

#[cfg(feature = "mpi")]
pub use mpi_backend::MpiCommunicator;

/// Rank, process count and communicator of a run, passed to everything that communicates.
#[derive(Clone)]
pub struct ExecutionContext {
    communicator: Arc<dyn Communicator>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("rank", &self.rank())
            .field("n_ranks", &self.n_ranks())
            .finish()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::serial()
    }
}

impl ExecutionContext {
    pub fn new(communicator: impl Communicator + 'static) -> Self {
        Self {
            communicator: Arc::new(communicator),
        }
    }

    pub fn serial() -> Self {
        Self::new(SerialCommunicator)
    }

    pub fn rank(&self) -> usize {
        self.communicator.rank()
    }

    pub fn n_ranks(&self) -> usize {
        self.communicator.size()
    }

    pub fn is_root(&self) -> bool {
        self.rank() == 0
    }

    pub fn communicator(&self) -> &dyn Communicator {
        self.communicator.as_ref()
    }

    /// Sends a payload to each peer in `outgoing` and receives one from each of them.
    ///
    /// The peers must be distinct, must not include this rank, and the relation must be
    /// symmetric: if rank `a` lists `b`, then `b` lists `a`. Pairs are processed in ascending
    /// order of the peer, the lower rank of each pair sending first, which serializes the
    /// pairwise handshakes without cycles.
    pub fn exchange(&self, outgoing: Vec<(usize, Vec<u8>)>) -> Result<Vec<(usize, Vec<u8>)>, DiscretizationError> {
        let rank = self.rank();
        let mut outgoing = outgoing;
        outgoing.sort_by_key(|(peer, _)| *peer);
        let mut incoming = Vec::with_capacity(outgoing.len());
        for (peer, payload) in outgoing {
            if peer == rank {
                return Err(DiscretizationError::Communication(
                    "a rank cannot exchange with itself".to_string(),
                ));
            }
            let received = if rank < peer {
                self.communicator.send(peer, tags::EXCHANGE, &payload)?;
                self.communicator.receive(peer, tags::EXCHANGE)?
            } else {
                let received = self.communicator.receive(peer, tags::EXCHANGE)?;
                self.communicator.send(peer, tags::EXCHANGE, &payload)?;
                received
            };
            incoming.push((peer, received));
        }
        Ok(incoming)
    }

    /// Gathers one payload from every rank, ordered by rank, on every rank.
    pub fn all_gather_bytes(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>, DiscretizationError> {
        let rank = self.rank();
        let n_ranks = self.n_ranks();
        if n_ranks == 1 {
            return Ok(vec![payload.to_vec()]);
        }
        // Root collects, then forwards every rank's payload in rank order
        if rank == 0 {
            let mut gathered = vec![payload.to_vec()];
            for peer in 1..n_ranks {
                gathered.push(self.communicator.receive(peer, tags::ALL_GATHER)?);
            }
            for peer in 1..n_ranks {
                for chunk in &gathered {
                    self.communicator.send(peer, tags::ALL_GATHER, chunk)?;
                }
            }
            Ok(gathered)
        } else {
            self.communicator.send(0, tags::ALL_GATHER, payload)?;
            (0..n_ranks)
                .map(|_| self.communicator.receive(0, tags::ALL_GATHER))
                .collect()
        }
    }

    pub fn all_gather_usize(&self, value: usize) -> Result<Vec<usize>, DiscretizationError> {
        self.all_gather_bytes(&encode_indices(&[value]))?
            .iter()
            .map(|bytes| match decode_indices(bytes)?.as_slice() {
                [value] => Ok(*value),
                _ => Err(DiscretizationError::Communication("malformed all-gather message".to_string())),
            })
            .collect()
    }

    pub fn all_gather_f64s(&self, values: &[f64]) -> Result<Vec<Vec<f64>>, DiscretizationError> {
        self.all_gather_bytes(&encode_values(values))?
            .iter()
            .map(|bytes| decode_values(bytes))
            .collect()
    }

    /// Sum of `value` over all ranks, identical on every rank.
    pub fn all_reduce_sum(&self, value: f64) -> Result<f64, DiscretizationError> {
        // Summing the gathered values in rank order makes the result bitwise identical everywhere
        Ok(self
            .all_gather_f64s(&[value])?
            .iter()
            .flatten()
            .sum())
    }

    pub fn barrier(&self) -> Result<(), DiscretizationError> {
        let rank = self.rank();
        let n_ranks = self.n_ranks();
        if rank == 0 {
            for peer in 1..n_ranks {
                self.communicator.receive(peer, tags::BARRIER)?;
            }
            for peer in 1..n_ranks {
                self.communicator.send(peer, tags::BARRIER, &[])?;
            }
        } else {
            self.communicator.send(0, tags::BARRIER, &[])?;
            self.communicator.receive(0, tags::BARRIER)?;
        }
        Ok(())
    }
}
