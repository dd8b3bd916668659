//! relief-coupler: surface-process coupling between a partitioned finite-element
//! mantle/lithosphere solver and a FastScape-style landscape evolution integrator.
//!
//! Architecture:
//! - Pixelized surface grid (pixel module): planar lattice for box models,
//!   HEALPix RING pixelization for spherical shells
//! - CSR adjacency (graph module) shared by routing and diffusion
//! - Steepest-descent routing with a receivers-first stack (flow module)
//! - Implicit O(n) stream-power incision + explicit hillslope diffusion (erosion module)
//! - Two-phase gather / broadcast over a pluggable communicator (aggregator, comm modules)
//!
//! Per host timestep the coupler runs:
//! sample boundary → gather on the coordinator → evolve elevation → broadcast
//! → constrain the host's mesh velocity on the deformable boundary.

pub mod error;
pub mod geometry;
pub mod config;
pub mod host;
pub mod pixel;
pub mod graph;
pub mod flow;
pub mod erosion;
pub mod sampler;
pub mod comm;
pub mod aggregator;
pub mod stepper;
pub mod projector;
pub mod coupler;

pub use comm::{Communicator, SingleProcess, ThreadComm};
pub use config::Configuration;
pub use coupler::SurfaceCoupler;
pub use error::{ConfigurationError, CouplingError, CouplingResult, ProtocolError};
pub use geometry::GeometryDescriptor;
pub use host::{BoundaryConstraints, HostSolver, TimeUnit};
pub use pixel::PixelGrid;
pub use stepper::{ElevationEvolutionStepper, GlobalGridState, ResultField};
