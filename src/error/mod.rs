//! Error types for the coupling bridge.
//!
//! Configuration errors are raised while the grid and parameters are set up;
//! protocol errors are raised inside a collective. Both are fatal for the run.

use thiserror::Error;

use crate::comm::Rank;

/// Result alias used throughout the crate.
pub type CouplingResult<T> = Result<T, CouplingError>;

/// Setup faults detected before (or at the start of) evolution.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The geometry model name is not one of the supported variants.
    #[error("unsupported geometry model '{0}': only \"box\" and \"spherical shell\" are supported")]
    UnsupportedGeometry(String),

    /// The geometry model was named but its subsection is absent.
    #[error("geometry model '{model}' selected but its '{section}' subsection is missing")]
    MissingGeometrySection {
        model: String,
        section: &'static str,
    },

    /// A parameter is out of its admissible range.
    #[error("invalid value for '{key}': {value} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The discrete grid would have no cells.
    #[error("degenerate surface grid: {0}")]
    DegenerateGrid(String),

    /// The requested refinement produces a resolution the pixelization cannot index.
    #[error("total surface refinement {levels} exceeds the supported maximum of {max}")]
    RefinementTooDeep { levels: u32, max: u32 },

    /// The grid would hold more cells than the integrator is sized for.
    #[error("surface grid of {cells} cells exceeds the limit of {max}")]
    GridTooLarge { cells: u128, max: usize },

    /// No process contributed a boundary sample in this gather.
    #[error("no surface samples were gathered from any process")]
    NoSurfaceSamples,

    /// The host handed a timestep the integrator cannot advance by.
    #[error("invalid solver timestep {0} yr")]
    InvalidTimestep(f64),

    /// The configuration document could not be read.
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Faults in a cross-process collective.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A payload's length disagrees with the count announced before it.
    #[error("rank {source_rank} announced {announced} samples but sent {received}")]
    SizeMismatch {
        source_rank: Rank,
        announced: usize,
        received: usize,
    },

    /// A message arrived out of protocol order.
    #[error("expected {expected} from rank {source_rank}, received {found}")]
    UnexpectedMessage {
        source_rank: Rank,
        expected: &'static str,
        found: &'static str,
    },

    /// A broadcast result does not cover the local grid.
    #[error("rank {rank} received a result field of {found} cells, expected {expected}")]
    FieldLength {
        rank: Rank,
        expected: usize,
        found: usize,
    },

    /// A peer dropped its end of the transport.
    #[error("rank {peer} is no longer reachable")]
    Disconnected { peer: Rank },

    /// A message was addressed to a rank outside the communicator.
    #[error("rank {rank} is outside a communicator of size {size}")]
    RankOutOfRange { rank: Rank, size: usize },

    /// A sample names a pixel the coordinator's grid does not have.
    #[error("rank {source_rank} sent pixel {pixel}, grid has {cell_count} cells")]
    PixelOutOfRange {
        source_rank: Rank,
        pixel: usize,
        cell_count: usize,
    },

    /// Two ranks wrote different values into one pixel.
    #[error("pixel {pixel} sampled by both rank {first} and rank {second}")]
    OverlappingContribution {
        pixel: usize,
        first: Rank,
        second: Rank,
    },
}

/// Top-level error returned by the coupler.
#[derive(Debug, Error)]
pub enum CouplingError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The host does not know the symbolic boundary name.
    #[error("host has no boundary named '{0}'")]
    UnknownBoundary(String),

    /// A result field was projected through a grid of a different size.
    #[error("result field has {found} cells but the surface grid has {expected}")]
    FieldGridMismatch { expected: usize, found: usize },

    /// The host asked for constraints without naming a boundary.
    #[error("no boundary id given for the mesh velocity constraints")]
    NoBoundary,
}
