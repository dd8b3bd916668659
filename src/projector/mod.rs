//! Maps the broadcast per-cell result back onto the host's boundary.

use crate::error::{CouplingError, CouplingResult};
use crate::geometry::{Point3, SurfaceComponent};
use crate::host::{BoundaryConstraints, BoundaryId, TimeUnit};
use crate::pixel::PixelGrid;
use crate::stepper::ResultField;

/// The result field as a function of position on the deformable boundary.
pub struct BoundaryVelocityProjector<'a> {
    grid:      &'a PixelGrid,
    field:     &'a ResultField,
    component: SurfaceComponent,
    unit:      TimeUnit,
}

impl<'a> BoundaryVelocityProjector<'a> {
    /// Fails unless `field` holds exactly one value per cell of `grid`.
    pub fn new(
        grid: &'a PixelGrid,
        field: &'a ResultField,
        component: SurfaceComponent,
        unit: TimeUnit,
    ) -> CouplingResult<Self> {
        if field.len() != grid.cell_count() {
            return Err(CouplingError::FieldGridMismatch { expected: grid.cell_count(), found: field.len() });
        }
        Ok(Self { grid, field, component, unit })
    }

    /// Net vertical velocity of the cell containing `p` [m/yr].
    #[inline]
    pub fn velocity_at(&self, p: &Point3) -> f64 {
        // cell_index_of stays below cell_count, which `new` matched to the field
        self.field.velocities[self.grid.cell_index_of(p)]
    }

    /// [`Self::velocity_at`] in the host's time unit.
    #[inline]
    pub fn host_velocity_at(&self, p: &Point3) -> f64 {
        self.unit.rate_from_per_year(self.velocity_at(p))
    }

    pub fn component(&self) -> SurfaceComponent {
        self.component
    }

    /// Constrain the out-of-plane mesh velocity on `boundary`.
    pub fn install<B: BoundaryConstraints + ?Sized>(&self, constraints: &mut B, boundary: BoundaryId) {
        constraints.interpolate_boundary_values(boundary, self.component, &|p: &Point3| self.host_velocity_at(p));
    }
}
