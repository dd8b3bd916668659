//! Interfaces to the host finite-element solver.
//!
//! The bridge never sees the host's mesh, degrees of freedom or linear
//! algebra. It reads the deformable boundary through [`HostSolver`] and hands
//! back one scalar velocity function through [`BoundaryConstraints`].

pub mod synthetic;

use crate::geometry::{lerp, Point3, SurfaceComponent, Vector3};

/// Seconds in a mean Gregorian year.
pub const YEAR_IN_SECONDS: f64 = 60.0 * 60.0 * 24.0 * 365.2425;

/// Time unit the host reports timesteps and velocities in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Years,
}

impl TimeUnit {
    /// Convert a duration in this unit to years.
    #[inline]
    pub fn to_years(self, t: f64) -> f64 {
        match self {
            TimeUnit::Seconds => t / YEAR_IN_SECONDS,
            TimeUnit::Years => t,
        }
    }

    /// Convert a rate per this unit to a rate per year.
    #[inline]
    pub fn rate_to_per_year(self, v: f64) -> f64 {
        match self {
            TimeUnit::Seconds => v * YEAR_IN_SECONDS,
            TimeUnit::Years => v,
        }
    }

    /// Convert a rate per year back to a rate per this unit.
    #[inline]
    pub fn rate_from_per_year(self, v: f64) -> f64 {
        match self {
            TimeUnit::Seconds => v / YEAR_IN_SECONDS,
            TimeUnit::Years => v,
        }
    }
}

pub type BoundaryId = u32;

/// A quadrilateral face on the host's boundary.
///
/// Corners are in lexicographic reference order: (0,0), (1,0), (0,1), (1,1).
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryFace {
    pub corners: [Point3; 4],
}

impl BoundaryFace {
    pub fn new(corners: [Point3; 4]) -> Self {
        Self { corners }
    }

    /// Bilinear image of the reference point `(u, v)` in `[0, 1]²`.
    pub fn bilinear(&self, u: f64, v: f64) -> Point3 {
        let [c00, c10, c01, c11] = &self.corners;
        let bottom = lerp(c00, c10, u);
        let top = lerp(c01, c11, u);
        lerp(&bottom, &top, v)
    }
}

/// Read access to the host's current state on this process.
///
/// `Sync` because the sampler evaluates faces in parallel.
pub trait HostSolver: Sync {
    /// Index of the current timestep; 0 before any deformation history exists.
    fn timestep_number(&self) -> u64;

    /// Length of the current timestep in [`HostSolver::time_unit`].
    fn timestep(&self) -> f64;

    fn time_unit(&self) -> TimeUnit;

    /// Boundary id for a symbolic name such as `"top"`.
    fn boundary_id(&self, name: &str) -> Option<BoundaryId>;

    /// Boundary faces on `boundary` owned by this process.
    fn owned_boundary_faces(&self, boundary: BoundaryId) -> Vec<BoundaryFace>;

    /// Velocity of the current solution at a point of `face`, per [`HostSolver::time_unit`].
    fn velocity_at(&self, face: &BoundaryFace, point: &Point3) -> Vector3;
}

/// The host's mesh-velocity constraint system.
pub trait BoundaryConstraints {
    /// Constrain `component` of the mesh velocity on `boundary` to `value(point)`.
    fn interpolate_boundary_values(
        &mut self,
        boundary: BoundaryId,
        component: SurfaceComponent,
        value: &dyn Fn(&Point3) -> f64,
    );
}
