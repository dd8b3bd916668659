// ============================================================================
// Elevation evolution on the coordinator
//
// Advances the grid-wide surface through one host timestep of
//
//   ∂h/∂t = U − K_f·A^m·S^n  [+ K_d·∇²h]
//
// split into sub-steps small enough for the integrator. Each sub-step:
//
//   uplift → steepest-descent routing → drainage area → implicit incision
//          → sediment flux → (hillslope diffusion)
//
// All times are in years; elevations are offsets from the reference surface.
// ============================================================================

use log::{debug, trace};
use ndarray::Array1;

use crate::config::{BoundaryConditions, Configuration};
use crate::erosion::{diffusivities, hillslope_diffusion, implicit_spl_erode, incision_coefficients};
use crate::error::ConfigurationError;
use crate::flow::{accumulate_downstream, drainage_area, route_steepest_descent};
use crate::graph::CsrGraph;
use crate::pixel::{PixelGrid, PixelIndex};

/// Doublings beyond this many sub-steps are refused.
const MAX_SUBSTEPS: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Grid-wide surface state, rebuilt from every gather.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalGridState {
    /// Elevation offset above the reference surface [m]
    pub elevation:          Array1<f64>,
    /// Elevation at the start of the current host timestep [m]
    pub elevation_previous: Array1<f64>,
    /// Sampled normal velocity [m/yr]
    pub uplift_velocity:    Array1<f64>,
}

impl GlobalGridState {
    pub fn new(elevation: Array1<f64>, uplift_velocity: Array1<f64>) -> Self {
        Self {
            elevation_previous: elevation.clone(),
            elevation,
            uplift_velocity,
        }
    }

    pub fn zeros(cells: usize) -> Self {
        Self::new(Array1::zeros(cells), Array1::zeros(cells))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elevation.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elevation.is_empty()
    }
}

/// Integrator accumulators for one host timestep.
#[derive(Clone, Debug, Default)]
pub struct StepperState {
    /// Upstream area of the last sub-step [m²]
    pub drainage_area: Array1<f64>,
    /// Eroded volume routed past each cell, summed over sub-steps [m³]
    pub sediment_flux: Array1<f64>,
}

impl StepperState {
    fn reset(&mut self, cells: usize) {
        self.drainage_area = Array1::zeros(cells);
        self.sediment_flux = Array1::zeros(cells);
    }
}

/// Net vertical velocity per cell [m/yr].
#[derive(Clone, Debug, PartialEq)]
pub struct ResultField {
    pub velocities: Array1<f64>,
}

impl ResultField {
    pub fn new(velocities: Array1<f64>) -> Self {
        Self { velocities }
    }

    pub fn zeros(cells: usize) -> Self {
        Self::new(Array1::zeros(cells))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.velocities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.velocities.is_empty()
    }

    #[inline]
    pub fn get(&self, cell: PixelIndex) -> Option<f64> {
        self.velocities.get(cell).copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.velocities.to_vec()
    }
}

impl From<Vec<f64>> for ResultField {
    fn from(v: Vec<f64>) -> Self {
        Self::new(Array1::from(v))
    }
}

// ---------------------------------------------------------------------------
// Sub-stepping
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubstepPlan {
    pub iterations: u64,
    pub sub_dt:     f64,
}

impl SubstepPlan {
    /// Start from `steps` equal sub-steps and double until none exceeds `maximum_substep`.
    pub fn new(dt: f64, steps: u32, maximum_substep: f64) -> Result<Self, ConfigurationError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(ConfigurationError::InvalidTimestep(dt));
        }
        if steps == 0 || !(maximum_substep > 0.0) {
            return Err(ConfigurationError::InvalidValue {
                key: "maximum_substep",
                value: format!("{maximum_substep} with {steps} steps"),
                reason: "sub-stepping needs at least one step and a positive limit",
            });
        }
        let mut iterations = u64::from(steps);
        let mut sub_dt = dt / iterations as f64;
        while sub_dt > maximum_substep {
            if iterations >= MAX_SUBSTEPS {
                return Err(ConfigurationError::InvalidValue {
                    key: "maximum_substep",
                    value: maximum_substep.to_string(),
                    reason: "timestep would need more than 2^32 sub-steps",
                });
            }
            iterations *= 2;
            sub_dt = dt / iterations as f64;
        }
        Ok(Self { iterations, sub_dt })
    }
}

// ---------------------------------------------------------------------------
// Stepper
// ---------------------------------------------------------------------------

pub struct ElevationEvolutionStepper {
    grid:      PixelGrid,
    adjacency: CsrGraph,
    /// Base-level outlets that are uplifted but never eroded or diffused
    fixed:     Vec<bool>,
    state:     StepperState,
}

impl ElevationEvolutionStepper {
    pub fn new(grid: PixelGrid, boundary_conditions: &BoundaryConditions) -> Self {
        let adjacency = grid.adjacency();
        let fixed: Vec<bool> = (0..grid.cell_count())
            .map(|c| grid.is_fixed_outlet(c, boundary_conditions))
            .collect();
        debug!(
            "surface graph: {} cells, {} directed edges, {} fixed outlets",
            grid.cell_count(),
            adjacency.num_edges(),
            fixed.iter().filter(|&&f| f).count()
        );
        Self { grid, adjacency, fixed, state: StepperState::default() }
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn state(&self) -> &StepperState {
        &self.state
    }

    /// Advance `global` by `dt` years and return the net vertical velocity.
    ///
    /// `cfg` must already be normalized to years.
    pub fn advance(
        &mut self,
        global: &mut GlobalGridState,
        cfg: &Configuration,
        dt: f64,
    ) -> Result<ResultField, ConfigurationError> {
        let n = self.grid.cell_count();
        if global.is_empty() || global.len() != n || global.uplift_velocity.len() != n {
            return Err(ConfigurationError::DegenerateGrid(format!(
                "surface state has {} cells, grid has {n}",
                global.len()
            )));
        }
        let plan = SubstepPlan::new(dt, cfg.coupling.steps_per_solver_step, cfg.coupling.maximum_substep)?;

        global.elevation_previous.assign(&global.elevation);
        self.state.reset(n);
        debug!(
            "advancing {n} cells by {dt} yr in {} sub-steps of {} yr",
            plan.iterations, plan.sub_dt
        );

        for _ in 0..plan.iterations {
            self.substep(global, cfg, plan.sub_dt)?;
        }

        let velocities = (&global.elevation - &global.elevation_previous) / dt;
        Ok(ResultField::new(velocities))
    }

    fn substep(
        &mut self,
        global: &mut GlobalGridState,
        cfg: &Configuration,
        sub_dt: f64,
    ) -> Result<(), ConfigurationError> {
        if cfg.coupling.use_velocities {
            global.elevation.scaled_add(sub_dt, &global.uplift_velocity);
        }

        let routing = route_steepest_descent(&self.grid, &self.adjacency, &self.fixed, global.elevation.view());
        let area = drainage_area(&self.grid, &routing);

        let kf = incision_coefficients(global.elevation.view(), &cfg.erosion);
        let depth = implicit_spl_erode(
            global.elevation.view(),
            &routing,
            area.view(),
            kf.view(),
            &cfg.erosion,
            sub_dt,
        );

        let volume = Array1::from_shape_fn(depth.len(), |i| depth[i] * self.grid.cell_area(i));
        let flux = accumulate_downstream(&routing, volume.view());
        self.state.sediment_flux += &flux;
        self.state.drainage_area = area;

        global.elevation -= &depth;

        if cfg.erosion.hillslope_diffusion {
            let kd = diffusivities(global.elevation.view(), &cfg.erosion);
            hillslope_diffusion(&mut global.elevation, &self.grid, &self.adjacency, &self.fixed, kd.view(), sub_dt)?;
        }
        trace!("sub-step done, max erosion {:.3e} m", depth.fold(0.0f64, |a, &d| a.max(d)));
        Ok(())
    }
}
