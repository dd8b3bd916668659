//! Single-flow-direction routing on the pixel graph.
//!
//! Each cell drains to its steepest-descent neighbour. Cells with no lower
//! neighbour, and fixed-boundary outlets, are their own receiver. The stack
//! lists receivers before their donors.

use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;

use crate::graph::CsrGraph;
use crate::pixel::PixelGrid;

pub struct FlowRouting {
    /// Downstream receiver of each cell; a cell equal to its receiver is an outlet or sink
    pub receivers: Vec<usize>,
    /// Distance to the receiver along the reference surface [m]; 0 for outlets
    pub receiver_distance: Vec<f64>,
    /// Receivers-first topological order
    pub stack: Vec<usize>,
    pub donor_graph: CsrGraph,
}

impl FlowRouting {
    #[inline]
    pub fn is_outlet(&self, node: usize) -> bool {
        self.receivers[node] == node
    }
}

/// Steepest-descent receivers over `adjacency`, with `fixed[i]` cells pinned as outlets.
pub fn route_steepest_descent(
    grid: &PixelGrid,
    adjacency: &CsrGraph,
    fixed: &[bool],
    elevation: ArrayView1<f64>,
) -> FlowRouting {
    let n = adjacency.num_nodes;

    let (receivers, receiver_distance): (Vec<usize>, Vec<f64>) = (0..n)
        .into_par_iter()
        .map(|i| {
            if fixed[i] {
                return (i, 0.0);
            }
            let h0 = elevation[i];
            let mut max_slope = 0.0f64;
            let mut best = (i, 0.0);
            for &j in adjacency.neighbors_of(i) {
                let dist = grid.distance(i, j);
                if !(dist > 0.0) {
                    continue;
                }
                let s = (h0 - elevation[j]) / dist;
                if s > max_slope {
                    max_slope = s;
                    best = (j, dist);
                }
            }
            best
        })
        .unzip();

    let donor_graph = CsrGraph::from_receivers(&receivers);
    let stack = compute_stack_order(&receivers, &donor_graph);

    FlowRouting { receivers, receiver_distance, stack, donor_graph }
}

/// Breadth-first from every outlet through the donor graph.
fn compute_stack_order(receivers: &[usize], donors: &CsrGraph) -> Vec<usize> {
    let n = receivers.len();
    let mut stack: Vec<usize> = (0..n).filter(|&i| receivers[i] == i).collect();
    stack.reserve(n - stack.len());

    let mut head = 0;
    while head < stack.len() {
        let node = stack[head];
        head += 1;
        stack.extend_from_slice(donors.neighbors_of(node));
    }
    stack
}

/// Sum `source` down the receiver tree: each cell ends up with its own
/// value plus everything upstream of it.
pub fn accumulate_downstream(routing: &FlowRouting, source: ArrayView1<f64>) -> Array1<f64> {
    let mut acc = source.to_owned();
    for &node in routing.stack.iter().rev() {
        let recv = routing.receivers[node];
        if recv != node {
            acc[recv] += acc[node];
        }
    }
    acc
}

/// Upstream contributing area of every cell [m²].
pub fn drainage_area(grid: &PixelGrid, routing: &FlowRouting) -> Array1<f64> {
    let own = Array1::from_shape_fn(routing.receivers.len(), |i| grid.cell_area(i));
    accumulate_downstream(routing, own.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundaryConditions, SideCondition};
    use crate::pixel::Lattice;
    use ndarray::array;

    fn lattice_3x1() -> PixelGrid {
        // 3 x 2 nodes, 10 m apart
        PixelGrid::Lattice(Lattice::new(&[0.0; 3], &[20.0, 10.0, 1.0], [2, 1]).unwrap())
    }

    #[test]
    fn water_runs_to_the_lowest_neighbour() {
        let grid = lattice_3x1();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        // row j = 0: 3, 2, 1 ; row j = 1: 3, 2, 0
        let h = array![3.0, 2.0, 1.0, 3.0, 2.0, 0.0];
        let r = route_steepest_descent(&grid, &adj, &fixed, h.view());

        assert!(r.is_outlet(5));
        assert_eq!(r.receivers[2], 5);
        assert_eq!(r.receivers[4], 5);
        // the axis neighbour (slope 0.1) beats the diagonal (slope 0.07)
        assert_eq!(r.receivers[0], 1);
        assert_eq!(r.receiver_distance[0], 10.0);
        assert_eq!(r.receiver_distance[5], 0.0);
    }

    #[test]
    fn stack_puts_receivers_first() {
        let grid = lattice_3x1();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        let h = array![5.0, 4.0, 3.0, 2.5, 1.5, 0.0];
        let r = route_steepest_descent(&grid, &adj, &fixed, h.view());

        assert_eq!(r.stack.len(), grid.cell_count());
        let pos: Vec<usize> = {
            let mut p = vec![0; r.stack.len()];
            for (k, &node) in r.stack.iter().enumerate() {
                p[node] = k;
            }
            p
        };
        for node in 0..grid.cell_count() {
            assert!(pos[r.receivers[node]] <= pos[node]);
        }
    }

    #[test]
    fn drainage_area_sums_to_the_outlet() {
        let grid = lattice_3x1();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        let h = array![5.0, 4.0, 3.0, 2.5, 1.5, 0.0];
        let r = route_steepest_descent(&grid, &adj, &fixed, h.view());
        let a = drainage_area(&grid, &r);

        let cell = grid.cell_area(0);
        assert!((a[5] - 6.0 * cell).abs() < 1e-9);
        assert!(a.iter().all(|&v| v >= cell));
    }

    #[test]
    fn fixed_cells_never_route() {
        let grid = lattice_3x1();
        let adj = grid.adjacency();
        let bc = BoundaryConditions { left: SideCondition::Fixed, ..BoundaryConditions::default() };
        let fixed: Vec<bool> = (0..grid.cell_count()).map(|c| grid.is_fixed_outlet(c, &bc)).collect();
        let h = array![5.0, 4.0, 3.0, 2.5, 1.5, 0.0];
        let r = route_steepest_descent(&grid, &adj, &fixed, h.view());
        // every node of a 3x2 lattice is on a side
        assert!((0..6).all(|i| r.is_outlet(i)));
    }
}
