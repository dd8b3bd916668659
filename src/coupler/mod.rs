//! One host timestep of surface coupling:
//! sample → gather → evolve → broadcast → constrain.

use log::{debug, info, warn};

use crate::aggregator::DistributedAggregator;
use crate::comm::Communicator;
use crate::config::Configuration;
use crate::error::{ConfigurationError, CouplingError, CouplingResult};
use crate::host::{BoundaryConstraints, BoundaryId, HostSolver, TimeUnit};
use crate::pixel::PixelGrid;
use crate::projector::BoundaryVelocityProjector;
use crate::sampler::SurfaceSampler;
use crate::stepper::{ElevationEvolutionStepper, GlobalGridState, ResultField};

/// Symbolic name of the deformable boundary.
pub const TOP_BOUNDARY_NAME: &str = "top";

pub struct SurfaceCoupler<C: Communicator> {
    /// Normalized to years
    config:      Configuration,
    grid:        PixelGrid,
    comm:        C,
    /// Present on the coordinator only
    stepper:     Option<ElevationEvolutionStepper>,
    surface:     Option<GlobalGridState>,
    last_result: Option<ResultField>,
}

impl<C: Communicator> SurfaceCoupler<C> {
    pub fn new(configuration: Configuration, host_unit: TimeUnit, comm: C) -> CouplingResult<Self> {
        let config = configuration.validated()?.normalized(host_unit);
        let grid = PixelGrid::from_configuration(&config)?;

        let c = &config.coupling;
        if c.use_center_slice_2d {
            warn!("'use_center_slice_2d' is reserved and has no effect");
        }
        debug!(
            "reserved: y_extent_2d={} seed={} initial_noise_magnitude={}",
            c.y_extent_2d, c.seed, c.initial_noise_magnitude
        );

        if comm.is_coordinator() {
            info!(
                "surface coupling on a {} model: {} cells, {} ranks, max sub-step {} yr",
                config.geometry.name(),
                grid.cell_count(),
                comm.size(),
                config.coupling.maximum_substep
            );
        }

        let stepper = comm
            .is_coordinator()
            .then(|| ElevationEvolutionStepper::new(grid.clone(), &config.boundary_conditions));

        Ok(Self { config, grid, comm, stepper, surface: None, last_result: None })
    }

    /// The host must stabilize its free surface while this coupler drives it.
    pub fn needs_surface_stabilization(&self) -> bool {
        true
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn stepper(&self) -> Option<&ElevationEvolutionStepper> {
        self.stepper.as_ref()
    }

    /// Surface state after the last evolution (coordinator only).
    pub fn surface(&self) -> Option<&GlobalGridState> {
        self.surface.as_ref()
    }

    /// Result field of the last completed timestep, on every rank.
    pub fn last_result(&self) -> Option<&ResultField> {
        self.last_result.as_ref()
    }

    /// Collective over all ranks: compute and install the mesh-velocity
    /// constraint on the first of `boundary_ids`.
    pub fn compute_velocity_constraints<H, B>(
        &mut self,
        host: &H,
        constraints: &mut B,
        boundary_ids: &[BoundaryId],
    ) -> CouplingResult<()>
    where
        H: HostSolver + ?Sized,
        B: BoundaryConstraints + ?Sized,
    {
        if host.timestep_number() == 0 {
            debug!("timestep 0: no deformation history, surface left untouched");
            return Ok(());
        }

        let top = host
            .boundary_id(TOP_BOUNDARY_NAME)
            .ok_or_else(|| CouplingError::UnknownBoundary(TOP_BOUNDARY_NAME.to_string()))?;
        let target = *boundary_ids.first().ok_or(CouplingError::NoBoundary)?;
        let unit = host.time_unit();
        let dt = unit.to_years(host.timestep());
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(ConfigurationError::InvalidTimestep(dt).into());
        }

        let sampler = SurfaceSampler::new(
            &self.grid,
            &self.config.geometry,
            self.config.coupling.sample_subdivisions(),
        );
        let samples = sampler.sample(host, top);
        debug!("rank {}: {} local surface samples", self.comm.rank(), samples.len());

        let aggregator = DistributedAggregator::new(
            &self.comm,
            &self.grid,
            self.config.coupling.precision,
            self.config.coupling.collision_policy,
        );
        let gathered = aggregator.gather(samples)?;

        let local_result = match (gathered, self.stepper.as_mut()) {
            (Some(mut state), Some(stepper)) => {
                let result = stepper.advance(&mut state, &self.config, dt)?;
                self.surface = Some(state);
                Some(result)
            }
            _ => None,
        };

        let field = aggregator.broadcast(local_result.as_ref())?;
        if self.comm.is_coordinator() {
            let peak = field.velocities.iter().fold(0.0f64, |a, v| a.max(v.abs()));
            info!("timestep {}: dt = {dt} yr, peak surface velocity {peak:.3e} m/yr", host.timestep_number());
        }

        BoundaryVelocityProjector::new(&self.grid, &field, self.config.geometry.surface_component(), unit)?
            .install(constraints, target);
        self.last_result = Some(field);
        Ok(())
    }
}
