//! Distribution of elements and dofs over ranks.
//!
//! Elements are split into contiguous, balanced ranges. A dof is owned by the rank owning the
//! lowest-numbered element that contains it. Dofs are then renumbered so that every rank owns
//! a contiguous range of the *global* numbering: rank 0 owns the first block, rank 1 the next
//! and so on, each block ordered by the mesh (*natural*) dof number. For structured meshes
//! with contiguous element ranges this renumbering is typically close to the identity.
//!
//! Each rank additionally knows its *ghost* dofs: dofs referenced by its elements but owned
//! by another rank. The *local* numbering of a rank lists its owned dofs first, followed by
//! its ghosts in ascending global order.

use crate::error::DiscretizationError;
use crate::mesh::MeshTopology;
use crate::parallel::wire::{decode_values, encode_values};
use crate::parallel::ExecutionContext;
use crate::space::FunctionSpace;
use itertools::Itertools;
use log::{debug, info};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::ops::Range;

/// The balanced contiguous split of `n` items over `n_ranks` ranks.
///
/// The first `n % n_ranks` ranks receive one extra item.
pub fn balanced_ranges(n: usize, n_ranks: usize) -> Vec<Range<usize>> {
    let base = n / n_ranks;
    let remainder = n % n_ranks;
    let mut start = 0;
    (0..n_ranks)
        .map(|rank| {
            let count = base + usize::from(rank < remainder);
            let range = start..start + count;
            start += count;
            range
        })
        .collect()
}

/// Dofs exchanged with one neighbouring rank, as global dof numbers in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighbourExchange {
    pub rank: usize,
    /// Owned dofs that are ghosts on the neighbour.
    pub send: Vec<usize>,
    /// Ghost dofs owned by the neighbour.
    pub receive: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct MeshPartition {
    rank: usize,
    n_ranks: usize,
    element_ranges: Vec<Range<usize>>,
    owned_ranges: Vec<Range<usize>>,
    natural_to_global: Vec<usize>,
    global_to_natural: Vec<usize>,
    // Owned dofs followed by ghosts, as global numbers
    local_to_global: Vec<usize>,
    global_to_local: FxHashMap<usize, usize>,
    neighbours: Vec<NeighbourExchange>,
}

impl MeshPartition {
    /// Partitions the function space over the ranks of `context`.
    ///
    /// This is collective: all ranks must call it with the same function space. The ranks
    /// compare their views of the ownership ranges, and a mismatch or a gap is reported as
    /// [`DiscretizationError::PartitionInconsistency`].
    pub fn new(context: &ExecutionContext, space: &FunctionSpace) -> Result<Self, DiscretizationError> {
        let rank = context.rank();
        let n_ranks = context.n_ranks();
        let n_elements = space.n_elements();
        let n_dofs = space.n_dofs();
        let element_ranges = balanced_ranges(n_elements, n_ranks);

        let mut element_owner = Vec::with_capacity(n_elements);
        for (r, range) in element_ranges.iter().enumerate() {
            element_owner.extend(range.clone().map(|_| r));
        }

        let mut dof_owner: Vec<Option<usize>> = vec![None; n_dofs];
        let mut element_dofs = vec![0; space.dofs_per_element()];
        for element in 0..n_elements {
            space.populate_element_dofs(&mut element_dofs, element);
            for &dof in &element_dofs {
                dof_owner[dof].get_or_insert(element_owner[element]);
            }
        }
        // Dofs outside of every element follow their predecessor
        let mut previous_owner = 0;
        let dof_owner: Vec<usize> = dof_owner
            .into_iter()
            .map(|owner| {
                let owner = owner.unwrap_or(previous_owner);
                previous_owner = owner;
                owner
            })
            .collect();

        let mut owned_counts = vec![0; n_ranks];
        for &owner in &dof_owner {
            owned_counts[owner] += 1;
        }
        let mut owned_ranges = Vec::with_capacity(n_ranks);
        let mut offset = 0;
        for count in &owned_counts {
            owned_ranges.push(offset..offset + count);
            offset += count;
        }

        let mut next_global: Vec<usize> = owned_ranges.iter().map(|r| r.start).collect();
        let natural_to_global: Vec<usize> = dof_owner
            .iter()
            .map(|&owner| {
                let global = next_global[owner];
                next_global[owner] += 1;
                global
            })
            .collect();
        let mut global_to_natural = vec![0; n_dofs];
        for (natural, &global) in natural_to_global.iter().enumerate() {
            global_to_natural[global] = natural;
        }

        // Ghosts of every rank, and which of them this rank has to send
        let mut ghosts = BTreeSet::new();
        let mut send_lists = vec![BTreeSet::new(); n_ranks];
        for element in 0..n_elements {
            let element_rank = element_owner[element];
            space.populate_element_dofs(&mut element_dofs, element);
            for &dof in &element_dofs {
                let owner = dof_owner[dof];
                if owner == element_rank {
                    continue;
                }
                let global = natural_to_global[dof];
                if element_rank == rank {
                    ghosts.insert(global);
                }
                if owner == rank {
                    send_lists[element_rank].insert(global);
                }
            }
        }

        let owned = owned_ranges[rank].clone();
        let local_to_global: Vec<usize> = owned.clone().chain(ghosts.iter().copied()).collect();
        let global_to_local = local_to_global
            .iter()
            .enumerate()
            .map(|(local, &global)| (global, local))
            .collect();

        let owner_of_global = |global: usize| owned_ranges.partition_point(|r| r.end <= global);
        let neighbours = (0..n_ranks)
            .filter(|&other| other != rank)
            .filter_map(|other| {
                let receive: Vec<usize> = ghosts
                    .iter()
                    .copied()
                    .filter(|&g| owner_of_global(g) == other)
                    .collect();
                let send: Vec<usize> = send_lists[other].iter().copied().collect();
                (!receive.is_empty() || !send.is_empty()).then_some(NeighbourExchange {
                    rank: other,
                    send,
                    receive,
                })
            })
            .collect();

        let partition = Self {
            rank,
            n_ranks,
            element_ranges,
            owned_ranges,
            natural_to_global,
            global_to_natural,
            local_to_global,
            global_to_local,
            neighbours,
        };
        partition.verify_coverage(n_dofs)?;
        partition.verify_agreement(context)?;

        info!(
            "Rank {rank}/{n_ranks}: elements {:?}, owned dofs {:?}, {} ghost dofs, {} neighbours",
            partition.owned_elements(),
            partition.owned_range(),
            partition.n_ghosts(),
            partition.neighbours.len()
        );
        Ok(partition)
    }

    /// Checks that the owned ranges tile `0..n_dofs` without overlap or gap.
    pub fn verify_coverage(&self, n_dofs: usize) -> Result<(), DiscretizationError> {
        let mut expected_start = 0;
        for (r, range) in self.owned_ranges.iter().enumerate() {
            if range.start != expected_start || range.end < range.start {
                return Err(DiscretizationError::PartitionInconsistency(format!(
                    "owned range {range:?} of rank {r} does not start at {expected_start}"
                )));
            }
            expected_start = range.end;
        }
        if expected_start != n_dofs {
            return Err(DiscretizationError::PartitionInconsistency(format!(
                "owned ranges cover {expected_start} dofs, expected {n_dofs}"
            )));
        }
        Ok(())
    }

    /// The startup handshake: every rank reports its owned count, which must match what all
    /// other ranks computed for it.
    fn verify_agreement(&self, context: &ExecutionContext) -> Result<(), DiscretizationError> {
        let counts = context.all_gather_usize(self.owned_range().len())?;
        let expected = self.owned_ranges.iter().map(|r| r.len()).collect_vec();
        if counts != expected {
            return Err(DiscretizationError::PartitionInconsistency(format!(
                "rank {} expected owned counts {expected:?}, ranks reported {counts:?}",
                self.rank
            )));
        }
        let totals = context.all_gather_usize(self.n_dofs_global())?;
        if totals.iter().any(|&total| total != self.n_dofs_global()) {
            return Err(DiscretizationError::PartitionInconsistency(format!(
                "ranks disagree on the number of dofs: {totals:?}"
            )));
        }
        debug!("Rank {}: partition handshake complete", self.rank);
        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn n_dofs_global(&self) -> usize {
        self.natural_to_global.len()
    }

    pub fn owned_elements(&self) -> Range<usize> {
        self.element_ranges[self.rank].clone()
    }

    pub fn element_ranges(&self) -> &[Range<usize>] {
        &self.element_ranges
    }

    /// Global dofs owned by this rank.
    pub fn owned_range(&self) -> Range<usize> {
        self.owned_ranges[self.rank].clone()
    }

    /// Global dofs owned by each rank.
    pub fn owned_ranges(&self) -> &[Range<usize>] {
        &self.owned_ranges
    }

    pub fn n_owned(&self) -> usize {
        self.owned_range().len()
    }

    pub fn n_ghosts(&self) -> usize {
        self.local_to_global.len() - self.n_owned()
    }

    /// Number of owned and ghost dofs.
    pub fn n_local(&self) -> usize {
        self.local_to_global.len()
    }

    /// Ghost dofs of this rank as global numbers, ascending.
    pub fn ghosts(&self) -> &[usize] {
        &self.local_to_global[self.n_owned()..]
    }

    pub fn neighbours(&self) -> &[NeighbourExchange] {
        &self.neighbours
    }

    pub fn owner_of(&self, global: usize) -> Option<usize> {
        let rank = self.owned_ranges.partition_point(|r| r.end <= global);
        (rank < self.n_ranks).then_some(rank)
    }

    pub fn is_owned(&self, global: usize) -> bool {
        self.owned_range().contains(&global)
    }

    pub fn natural_to_global(&self, natural: usize) -> usize {
        self.natural_to_global[natural]
    }

    pub fn global_to_natural(&self, global: usize) -> usize {
        self.global_to_natural[global]
    }

    pub fn local_to_global(&self, local: usize) -> usize {
        self.local_to_global[local]
    }

    /// Local number of an owned or ghost dof.
    pub fn global_to_local(&self, global: usize) -> Option<usize> {
        self.global_to_local.get(&global).copied()
    }

    /// Copies the owners' values into the ghost slots of every rank.
    ///
    /// `values` is indexed by local number. This is collective.
    pub fn update_ghosts(&self, context: &ExecutionContext, values: &mut [f64]) -> Result<(), DiscretizationError> {
        if values.len() != self.n_local() {
            return Err(DiscretizationError::InvalidState(format!(
                "ghost update needs {} local values, got {}",
                self.n_local(),
                values.len()
            )));
        }
        let outgoing = self
            .neighbours
            .iter()
            .map(|neighbour| {
                let payload: Vec<f64> = neighbour
                    .send
                    .iter()
                    .map(|&global| values[global - self.owned_range().start])
                    .collect();
                (neighbour.rank, encode_values(&payload))
            })
            .collect();

        for (peer, payload) in context.exchange(outgoing)? {
            let received = decode_values(&payload)?;
            let neighbour = self
                .neighbours
                .iter()
                .find(|n| n.rank == peer)
                .ok_or_else(|| DiscretizationError::Communication(format!("unexpected ghost data from rank {peer}")))?;
            if received.len() != neighbour.receive.len() {
                return Err(DiscretizationError::Communication(format!(
                    "expected {} ghost values from rank {peer}, got {}",
                    neighbour.receive.len(),
                    received.len()
                )));
            }
            for (&global, value) in neighbour.receive.iter().zip(received) {
                if let Some(local) = self.global_to_local(global) {
                    values[local] = value;
                }
            }
        }
        Ok(())
    }
}
