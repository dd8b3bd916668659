//! Regular node lattice over the top face of a box model.
//!
//! Nodes sit on the corners of the host's coarse mesh: `repetitions + 1`
//! nodes per horizontal axis, flattened row-major as `i + nx * j`.

use crate::error::ConfigurationError;
use crate::geometry::Point3;

use super::MAX_SURFACE_CELLS;

/// D8 neighbourhood as (di, dj).
const D8_OFFSETS: [(i64, i64); 8] = [
    (-1, 0), (-1, 1), (0, 1), (1, 1),
    (1, 0),  (1, -1), (0, -1), (-1, -1),
];

/// One side of the lattice, named as seen from above with +y pointing back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// j = 0
    Front,
    /// i = nx − 1
    Right,
    /// j = ny − 1
    Back,
    /// i = 0
    Left,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Front, Side::Right, Side::Back, Side::Left];
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lattice {
    pub nx: usize,
    pub ny: usize,
    pub dx: f64,
    pub dy: f64,
    origin: [f64; 2],
    /// Height of the reference surface, used for cell centres
    z_ref: f64,
}

/// Nodes per axis for `repetitions`, rejecting lattices with no cells or
/// more than [`MAX_SURFACE_CELLS`] nodes.
pub fn node_dims(repetitions: [u32; 2]) -> Result<(usize, usize), ConfigurationError> {
    if repetitions[0] == 0 || repetitions[1] == 0 {
        return Err(ConfigurationError::DegenerateGrid(format!(
            "box repetitions {repetitions:?} leave no lattice cells"
        )));
    }
    let [nx, ny] = repetitions.map(|r| u128::from(r) + 1);
    let cells = nx * ny;
    if cells > MAX_SURFACE_CELLS as u128 {
        return Err(ConfigurationError::GridTooLarge { cells, max: MAX_SURFACE_CELLS });
    }
    // both factors are bounded by the cell limit now
    Ok((nx as usize, ny as usize))
}

impl Lattice {
    pub fn new(
        origin: &Point3,
        extents: &[f64; 3],
        repetitions: [u32; 2],
    ) -> Result<Self, ConfigurationError> {
        let (nx, ny) = node_dims(repetitions)?;
        if !(extents[0] > 0.0 && extents[1] > 0.0) {
            return Err(ConfigurationError::DegenerateGrid(format!(
                "box extents {extents:?} are not positive"
            )));
        }
        Ok(Self {
            nx,
            ny,
            dx: extents[0] / f64::from(repetitions[0]),
            dy: extents[1] / f64::from(repetitions[1]),
            origin: [origin[0], origin[1]],
            z_ref: origin[2] + extents[2],
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    #[inline]
    pub fn flat_index(&self, i: usize, j: usize) -> usize {
        i + self.nx * j
    }

    #[inline]
    pub fn grid_index(&self, idx: usize) -> (usize, usize) {
        (idx % self.nx, idx / self.nx)
    }

    /// Nearest lattice node to `p`, clamped onto the lattice.
    pub fn cell_index_of(&self, p: &Point3) -> usize {
        let i = nearest((p[0] - self.origin[0]) / self.dx, self.nx);
        let j = nearest((p[1] - self.origin[1]) / self.dy, self.ny);
        self.flat_index(i, j)
    }

    pub fn neighbors(&self, idx: usize) -> Vec<usize> {
        let (i, j) = self.grid_index(idx);
        let mut out = Vec::with_capacity(8);
        for &(di, dj) in D8_OFFSETS.iter() {
            let ni = i as i64 + di;
            let nj = j as i64 + dj;
            if ni < 0 || nj < 0 || ni >= self.nx as i64 || nj >= self.ny as i64 {
                continue;
            }
            out.push(self.flat_index(ni as usize, nj as usize));
        }
        out
    }

    pub fn distance(&self, a: usize, b: usize) -> f64 {
        let (ia, ja) = self.grid_index(a);
        let (ib, jb) = self.grid_index(b);
        let ddx = (ia as f64 - ib as f64) * self.dx;
        let ddy = (ja as f64 - jb as f64) * self.dy;
        ddx.hypot(ddy)
    }

    #[inline]
    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }

    pub fn cell_center(&self, idx: usize) -> Point3 {
        let (i, j) = self.grid_index(idx);
        [
            self.origin[0] + i as f64 * self.dx,
            self.origin[1] + j as f64 * self.dy,
            self.z_ref,
        ]
    }

    pub fn on_side(&self, idx: usize, side: Side) -> bool {
        let (i, j) = self.grid_index(idx);
        match side {
            Side::Front => j == 0,
            Side::Right => i == self.nx - 1,
            Side::Back => j == self.ny - 1,
            Side::Left => i == 0,
        }
    }
}

#[inline]
fn nearest(t: f64, n: usize) -> usize {
    // NaN saturates to 0 in the cast
    t.round().clamp(0.0, (n - 1) as f64) as usize
}
