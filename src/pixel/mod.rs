//! Discrete surface grids: the common index space every process samples into.
//!
//! A box model gets a regular node lattice over its top face; a shell model
//! gets an equal-area HEALPix pixelization of the outer sphere. Both map a 3D
//! point to a [`PixelIndex`] and expose the topology the erosion integrator
//! walks: neighbours, centres, distances and cell areas.

pub mod healpix;
pub mod lattice;

use log::info;

use crate::config::{BoundaryConditions, Configuration, SideCondition};
use crate::error::ConfigurationError;
use crate::geometry::{GeometryDescriptor, Point3};
use crate::graph::CsrGraph;

pub use healpix::Healpix;
pub use lattice::{Lattice, Side};

pub type PixelIndex = usize;

/// Largest surface grid the coordinator will allocate state and adjacency for.
pub const MAX_SURFACE_CELLS: usize = 1 << 24;

/// Cells of the HEALPix grid for `levels` of total refinement, checked
/// against the pixelization depth and [`MAX_SURFACE_CELLS`].
pub fn shell_cell_count(levels: u32) -> Result<usize, ConfigurationError> {
    let max = healpix::MAX_ORDER - 1;
    if levels > max {
        return Err(ConfigurationError::RefinementTooDeep { levels, max });
    }
    // order <= MAX_ORDER keeps 12 * 4^order inside a u128 with room to spare
    let cells = 12u128 << (2 * (levels + 1));
    if cells > MAX_SURFACE_CELLS as u128 {
        return Err(ConfigurationError::GridTooLarge { cells, max: MAX_SURFACE_CELLS });
    }
    Ok(cells as usize)
}

#[derive(Clone, Debug, PartialEq)]
pub enum PixelGrid {
    Lattice(Lattice),
    Healpix(Healpix),
}

impl PixelGrid {
    /// Build the grid implied by the geometry and refinement settings.
    pub fn from_configuration(cfg: &Configuration) -> Result<Self, ConfigurationError> {
        let grid = match &cfg.geometry {
            GeometryDescriptor::Planar { origin, extents, repetitions } => {
                PixelGrid::Lattice(Lattice::new(origin, extents, *repetitions)?)
            }
            GeometryDescriptor::SphericalShell { outer_radius, .. } => {
                let levels = cfg.coupling.total_refinement();
                shell_cell_count(levels)?;
                PixelGrid::Healpix(Healpix::new(levels + 1, *outer_radius))
            }
        };
        if grid.cell_count() == 0 {
            return Err(ConfigurationError::DegenerateGrid(format!(
                "{} surface grid has no cells",
                cfg.geometry.name()
            )));
        }
        match &grid {
            PixelGrid::Lattice(l) => {
                info!("surface lattice {}x{} nodes, spacing {} x {} m", l.nx, l.ny, l.dx, l.dy);
            }
            PixelGrid::Healpix(h) => {
                info!("HEALPix surface grid nside={} ({} pixels) on R={} m", h.nside(), h.npix(), h.radius());
            }
        }
        Ok(grid)
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        match self {
            PixelGrid::Lattice(l) => l.len(),
            PixelGrid::Healpix(h) => h.npix(),
        }
    }

    /// Cell containing `p`; always in `[0, cell_count())`.
    #[inline]
    pub fn cell_index_of(&self, p: &Point3) -> PixelIndex {
        match self {
            PixelGrid::Lattice(l) => l.cell_index_of(p),
            PixelGrid::Healpix(h) => h.vec2pix(p),
        }
    }

    pub fn neighbors(&self, cell: PixelIndex) -> Vec<PixelIndex> {
        match self {
            PixelGrid::Lattice(l) => l.neighbors(cell),
            PixelGrid::Healpix(h) => h.neighbors(cell),
        }
    }

    /// Distance between two cell centres along the reference surface.
    pub fn distance(&self, a: PixelIndex, b: PixelIndex) -> f64 {
        match self {
            PixelGrid::Lattice(l) => l.distance(a, b),
            PixelGrid::Healpix(h) => h.distance(a, b),
        }
    }

    pub fn cell_area(&self, _cell: PixelIndex) -> f64 {
        match self {
            PixelGrid::Lattice(l) => l.cell_area(),
            PixelGrid::Healpix(h) => h.cell_area(),
        }
    }

    pub fn cell_center(&self, cell: PixelIndex) -> Point3 {
        match self {
            PixelGrid::Lattice(l) => l.cell_center(cell),
            PixelGrid::Healpix(h) => h.cell_center(cell),
        }
    }

    /// Whether `cell` is a base-level outlet under `bc`. The sphere has none.
    pub fn is_fixed_outlet(&self, cell: PixelIndex, bc: &BoundaryConditions) -> bool {
        match self {
            PixelGrid::Lattice(l) => Side::ALL
                .iter()
                .any(|&side| l.on_side(cell, side) && side_condition(bc, side) == SideCondition::Fixed),
            PixelGrid::Healpix(_) => false,
        }
    }

    /// Full neighbour graph, built once and reused by every routing pass.
    pub fn adjacency(&self) -> CsrGraph {
        let adj: Vec<Vec<PixelIndex>> = (0..self.cell_count()).map(|c| self.neighbors(c)).collect();
        CsrGraph::from_adjacency(&adj)
    }
}

fn side_condition(bc: &BoundaryConditions, side: Side) -> SideCondition {
    match side {
        Side::Front => bc.front,
        Side::Right => bc.right,
        Side::Back => bc.back,
        Side::Left => bc.left,
    }
}
