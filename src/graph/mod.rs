//! Compressed Sparse Row (CSR) graph over pixel indices.
//!
//! Used twice: for the fixed pixel adjacency, built once per grid, and for
//! the donor lists of each flow-routing pass.

/// CSR representation of a directed graph on `0..num_nodes`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsrGraph {
    pub offsets: Vec<usize>,
    pub neighbors: Vec<usize>,
    pub num_nodes: usize,
}

impl CsrGraph {
    /// Pack per-node neighbour lists, keeping each list's order.
    pub fn from_adjacency(adj: &[Vec<usize>]) -> Self {
        let offsets: Vec<usize> = std::iter::once(0)
            .chain(adj.iter().scan(0, |end, list| {
                *end += list.len();
                Some(*end)
            }))
            .collect();
        Self { offsets, neighbors: adj.concat(), num_nodes: adj.len() }
    }

    /// Donor graph: node `r` lists every `d != r` with `receivers[d] == r`.
    pub fn from_receivers(receivers: &[usize]) -> Self {
        let num_nodes = receivers.len();
        let mut counts = vec![0usize; num_nodes];
        for (donor, &recv) in receivers.iter().enumerate() {
            if recv < num_nodes && recv != donor {
                counts[recv] += 1;
            }
        }
        let mut offsets = Vec::with_capacity(num_nodes + 1);
        let mut running = 0;
        offsets.push(running);
        for &c in counts.iter() {
            running += c;
            offsets.push(running);
        }
        let mut neighbors = vec![0usize; running];
        let mut write_pos = offsets.clone();
        for (donor, &recv) in receivers.iter().enumerate() {
            if recv < num_nodes && recv != donor {
                neighbors[write_pos[recv]] = donor;
                write_pos[recv] += 1;
            }
        }
        Self { offsets, neighbors, num_nodes }
    }

    #[inline]
    pub fn neighbors_of(&self, node: usize) -> &[usize] {
        &self.neighbors[self.offsets[node]..self.offsets[node + 1]]
    }

    /// Directed edge count; an undirected adjacency counts each link twice.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    pub fn degree(&self, node: usize) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }
}
