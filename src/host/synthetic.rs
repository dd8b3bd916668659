//! Reference host: a structured top surface with a prescribed velocity field.
//!
//! Stands in for the finite-element solver in tests and in the demo binary.
//! The box top is split into `nx × ny` quads; the shell surface is a cubed
//! sphere with `k × k` quads per cube face. Faces are dealt to ranks in
//! contiguous blocks, the way a space-filling-curve partitioner would.

use std::sync::Arc;

use crate::geometry::{norm, scale, GeometryDescriptor, Point3, SurfaceComponent, Vector3};
use crate::host::{BoundaryConstraints, BoundaryFace, BoundaryId, HostSolver, TimeUnit};

/// Boundary id reported for the symbolic name `"top"`.
pub const TOP_BOUNDARY: BoundaryId = 5;

pub type VelocityFn = Arc<dyn Fn(&Point3) -> Vector3 + Send + Sync>;

pub struct SyntheticHost {
    faces: Vec<BoundaryFace>,
    velocity: VelocityFn,
    timestep_number: u64,
    timestep: f64,
    unit: TimeUnit,
}

impl SyntheticHost {
    /// Whole top surface of `geometry`, owned by a single process.
    ///
    /// `resolution` is the number of quads per box side, or per cube-face side
    /// on the shell.
    pub fn new(geometry: &GeometryDescriptor, resolution: usize, velocity: VelocityFn) -> Self {
        let n = resolution.max(1);
        let faces = match geometry {
            GeometryDescriptor::Planar { origin, extents, .. } => {
                box_top_faces(origin, extents, n, n)
            }
            GeometryDescriptor::SphericalShell { outer_radius, .. } => {
                cubed_sphere_faces(*outer_radius, n)
            }
        };
        Self { faces, velocity, timestep_number: 0, timestep: 0.0, unit: TimeUnit::Years }
    }

    /// Keep only the contiguous block of faces owned by `rank` out of `size`.
    pub fn partitioned(mut self, rank: usize, size: usize) -> Self {
        let total = self.faces.len();
        let size = size.max(1);
        let base = total / size;
        let rem = total % size;
        let start = rank * base + rank.min(rem);
        let len = base + usize::from(rank < rem);
        self.faces = self.faces.into_iter().skip(start).take(len).collect();
        self
    }

    /// Drop every face: a process whose partition does not touch the surface.
    pub fn without_faces(mut self) -> Self {
        self.faces.clear();
        self
    }

    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn set_velocity(&mut self, velocity: VelocityFn) {
        self.velocity = velocity;
    }

    /// Move to the next timestep of length `dt` (host time unit).
    pub fn advance(&mut self, dt: f64) {
        self.timestep_number += 1;
        self.timestep = dt;
    }

    pub fn faces(&self) -> &[BoundaryFace] {
        &self.faces
    }

    /// Every face corner, the support points a nodal constraint would use.
    pub fn support_points(&self) -> Vec<Point3> {
        self.faces.iter().flat_map(|f| f.corners).collect()
    }
}

impl HostSolver for SyntheticHost {
    fn timestep_number(&self) -> u64 {
        self.timestep_number
    }

    fn timestep(&self) -> f64 {
        self.timestep
    }

    fn time_unit(&self) -> TimeUnit {
        self.unit
    }

    fn boundary_id(&self, name: &str) -> Option<BoundaryId> {
        (name == "top").then_some(TOP_BOUNDARY)
    }

    fn owned_boundary_faces(&self, boundary: BoundaryId) -> Vec<BoundaryFace> {
        if boundary == TOP_BOUNDARY {
            self.faces.clone()
        } else {
            Vec::new()
        }
    }

    fn velocity_at(&self, _face: &BoundaryFace, point: &Point3) -> Vector3 {
        (self.velocity)(point)
    }
}

/// Constraint sink that evaluates the installed function at fixed support points.
#[derive(Debug, Default)]
pub struct ConstraintRecorder {
    support_points: Vec<Point3>,
    pub records: Vec<ConstraintRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintRecord {
    pub boundary: BoundaryId,
    pub component: SurfaceComponent,
    pub point: Point3,
    pub value: f64,
}

impl ConstraintRecorder {
    pub fn new(support_points: Vec<Point3>) -> Self {
        Self { support_points, records: Vec::new() }
    }
}

impl BoundaryConstraints for ConstraintRecorder {
    fn interpolate_boundary_values(
        &mut self,
        boundary: BoundaryId,
        component: SurfaceComponent,
        value: &dyn Fn(&Point3) -> f64,
    ) {
        for p in &self.support_points {
            self.records.push(ConstraintRecord { boundary, component, point: *p, value: value(p) });
        }
    }
}

// ---------------------------------------------------------------------------
// Surface meshes
// ---------------------------------------------------------------------------

fn box_top_faces(origin: &Point3, extents: &[f64; 3], nx: usize, ny: usize) -> Vec<BoundaryFace> {
    let z = origin[2] + extents[2];
    let dx = extents[0] / nx as f64;
    let dy = extents[1] / ny as f64;
    let node = |i: usize, j: usize| [origin[0] + i as f64 * dx, origin[1] + j as f64 * dy, z];

    let mut faces = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            faces.push(BoundaryFace::new([node(i, j), node(i + 1, j), node(i, j + 1), node(i + 1, j + 1)]));
        }
    }
    faces
}

/// Cube faces as (normal axis, sign); the two remaining axes span the face.
const CUBE_FACES: [(usize, f64); 6] = [(0, 1.0), (0, -1.0), (1, 1.0), (1, -1.0), (2, 1.0), (2, -1.0)];

fn cubed_sphere_faces(radius: f64, k: usize) -> Vec<BoundaryFace> {
    let mut faces = Vec::with_capacity(6 * k * k);
    for &(axis, sign) in CUBE_FACES.iter() {
        let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
        let node = |i: usize, j: usize| -> Point3 {
            let mut p = [0.0; 3];
            p[axis] = sign;
            p[a] = -1.0 + 2.0 * i as f64 / k as f64;
            p[b] = -1.0 + 2.0 * j as f64 / k as f64;
            scale(&p, radius / norm(&p))
        };
        for j in 0..k {
            for i in 0..k {
                faces.push(BoundaryFace::new([node(i, j), node(i + 1, j), node(i, j + 1), node(i + 1, j + 1)]));
            }
        }
    }
    faces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still() -> VelocityFn {
        Arc::new(|_: &Point3| [0.0; 3])
    }

    #[test]
    fn box_top_covers_the_extent() {
        let g = GeometryDescriptor::Planar {
            origin: [0.0, 0.0, 0.0],
            extents: [10.0, 20.0, 5.0],
            repetitions: [2, 2],
        };
        let host = SyntheticHost::new(&g, 2, still());
        assert_eq!(host.faces().len(), 4);
        let pts = host.support_points();
        assert!(pts.iter().all(|p| p[2] == 5.0));
        assert!(pts.contains(&[10.0, 20.0, 5.0]));
    }

    #[test]
    fn cubed_sphere_corners_lie_on_the_sphere() {
        let g = GeometryDescriptor::SphericalShell { inner_radius: 1.0, outer_radius: 2.0, opening_angle: 360.0 };
        let host = SyntheticHost::new(&g, 3, still());
        assert_eq!(host.faces().len(), 54);
        for p in host.support_points() {
            assert!((norm(&p) - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn partition_blocks_cover_every_face_once() {
        let g = GeometryDescriptor::SphericalShell { inner_radius: 1.0, outer_radius: 2.0, opening_angle: 360.0 };
        let whole = SyntheticHost::new(&g, 2, still()).faces().len();
        let parts: usize = (0..5)
            .map(|r| SyntheticHost::new(&g, 2, still()).partitioned(r, 5).faces().len())
            .sum();
        assert_eq!(parts, whole);
    }

    #[test]
    fn only_top_is_known() {
        let g = GeometryDescriptor::SphericalShell { inner_radius: 1.0, outer_radius: 2.0, opening_angle: 360.0 };
        let host = SyntheticHost::new(&g, 1, still());
        assert_eq!(host.boundary_id("top"), Some(TOP_BOUNDARY));
        assert_eq!(host.boundary_id("bottom"), None);
        assert!(host.owned_boundary_faces(0).is_empty());
    }
}
