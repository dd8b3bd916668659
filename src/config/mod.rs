// ============================================================================
// Coupling configuration
//
// One immutable parameter set, read once before the first host timestep.
// Sections mirror the host's parameter file layout:
//
//   geometry             : model name plus the box / spherical shell subsection
//   coupling             : sub-stepping, surface refinement, collision policy
//   boundary_conditions  : fixed / reflective per side of a box model
//   erosion              : stream-power and hillslope-diffusion coefficients
//
// Time-valued thresholds are given in the host's time unit and converted to
// years exactly once, by `Configuration::normalized`.
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::geometry::GeometryDescriptor;
use crate::host::TimeUnit;
use crate::pixel::shell_cell_count;

/// Largest `additional_refinement_levels + surface_refinement_difference`:
/// at most 2^16 sample sub-divisions per face edge.
pub const MAX_SAMPLE_LEVELS: u32 = 16;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CouplingParams {
    /// Integrator sub-steps per host timestep before stability refinement
    pub steps_per_solver_step:           u32,
    /// Largest sub-step the integrator may take [host time unit until normalized, then yr]
    pub maximum_substep:                 f64,
    /// Surface grid refinement beyond the host's surface mesh
    pub additional_refinement_levels:    u32,
    /// Highest host refinement level expected at the surface
    pub maximum_surface_refinement_level: u32,
    /// Spread between lowest and highest surface refinement levels
    pub surface_refinement_difference:   u32,
    /// Apply the sampled uplift velocities during evolution
    pub use_velocities:                  bool,
    /// Two samples closer than this are treated as the same value [m, m/yr]
    pub precision:                       f64,
    /// What to do when two ranks sample the same pixel differently
    pub collision_policy:                CollisionPolicy,
    /// Reserved: 2D models would only use the centre slice
    pub use_center_slice_2d:             bool,
    /// Reserved: surface y extent for 2D models [m]
    pub y_extent_2d:                     f64,
    /// Reserved: seed for an initial topography perturbation
    pub seed:                            u64,
    /// Reserved: amplitude of the initial topography perturbation [m]
    pub initial_noise_magnitude:         f64,
}

impl Default for CouplingParams {
    fn default() -> Self {
        Self {
            steps_per_solver_step:            10,
            maximum_substep:                  10e3,
            additional_refinement_levels:     0,
            maximum_surface_refinement_level: 1,
            surface_refinement_difference:    0,
            use_velocities:                   true,
            precision:                        0.001,
            collision_policy:                 CollisionPolicy::LastWriterWins,
            use_center_slice_2d:              false,
            y_extent_2d:                      100_000.0,
            seed:                             1000,
            initial_noise_magnitude:          5.0,
        }
    }
}

impl CouplingParams {
    /// Levels that set the spherical pixel resolution, saturating at `u32::MAX`.
    pub fn total_refinement(&self) -> u32 {
        self.sample_levels().saturating_add(self.maximum_surface_refinement_level)
    }

    fn sample_levels(&self) -> u32 {
        self.additional_refinement_levels
            .saturating_add(self.surface_refinement_difference)
    }

    /// Sub-divisions per boundary face edge used by the sampler.
    ///
    /// Clamped to `2^MAX_SAMPLE_LEVELS`, which `Configuration::validate` enforces.
    pub fn sample_subdivisions(&self) -> usize {
        1usize << self.sample_levels().min(MAX_SAMPLE_LEVELS)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Later ranks overwrite earlier ones; collisions are logged.
    LastWriterWins,
    /// A collision aborts the gather.
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideCondition {
    /// Nodes on the side are fixed base-level outlets.
    Fixed,
    /// Nodes on the side are ordinary cells; nothing flows out.
    Reflective,
}

/// One condition per side of a box model's surface grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoundaryConditions {
    /// y = min side
    pub front: SideCondition,
    /// x = max side
    pub right: SideCondition,
    /// y = max side
    pub back:  SideCondition,
    /// x = min side
    pub left:  SideCondition,
}

impl Default for BoundaryConditions {
    fn default() -> Self {
        Self {
            front: SideCondition::Fixed,
            right: SideCondition::Fixed,
            back:  SideCondition::Fixed,
            left:  SideCondition::Fixed,
        }
    }
}

/// Stream-power and hillslope parameters.
///
/// Negative sediment coefficients are the "use the bedrock value" sentinel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErosionParams {
    /// Drainage area exponent m
    pub drainage_area_exponent: f64,
    /// Slope exponent n
    pub slope_exponent:         f64,
    /// Bedrock incision coefficient K_f [m^(1-2m)/yr]
    pub bedrock_incision_rate:  f64,
    /// Sediment incision coefficient; negative selects the bedrock value
    pub sediment_incision_rate: f64,
    /// Bedrock diffusivity K_d [m²/yr]
    pub bedrock_diffusivity:    f64,
    /// Sediment diffusivity; negative selects the bedrock value
    pub sediment_diffusivity:   f64,
    /// Multiplier on K_f and K_d above the orographic elevation control
    pub elevation_factor:       f64,
    /// Elevation offset above which `elevation_factor` applies [m]
    pub orographic_elevation:   Option<f64>,
    /// Run explicit hillslope diffusion after each erosion sub-step
    pub hillslope_diffusion:    bool,
    /// Newton convergence tolerance for n ≠ 1 [m]
    pub tolerance:              f64,
}

impl Default for ErosionParams {
    fn default() -> Self {
        Self {
            drainage_area_exponent: 0.4,
            slope_exponent:         1.0,
            bedrock_incision_rate:  1e-5,
            sediment_incision_rate: -1.0,
            bedrock_diffusivity:    1e-2,
            sediment_diffusivity:   -1.0,
            elevation_factor:       1.0,
            orographic_elevation:   None,
            hillslope_diffusion:    false,
            tolerance:              1e-5,
        }
    }
}

impl ErosionParams {
    /// Parameters under which nothing erodes or diffuses.
    pub fn inert() -> Self {
        Self {
            bedrock_incision_rate: 0.0,
            sediment_incision_rate: -1.0,
            bedrock_diffusivity: 0.0,
            sediment_diffusivity: -1.0,
            ..Self::default()
        }
    }

    pub fn incision_rate(&self, sediment: bool) -> f64 {
        if sediment && self.sediment_incision_rate >= 0.0 {
            self.sediment_incision_rate
        } else {
            self.bedrock_incision_rate
        }
    }

    pub fn diffusivity(&self, sediment: bool) -> f64 {
        if sediment && self.sediment_diffusivity >= 0.0 {
            self.sediment_diffusivity
        } else {
            self.bedrock_diffusivity
        }
    }

    /// Coefficient multiplier for a cell at elevation offset `h`.
    pub fn elevation_scaling(&self, h: f64) -> f64 {
        match self.orographic_elevation {
            Some(control) if h > control => self.elevation_factor,
            _ => 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry section (document form)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeometrySection {
    model: String,
    #[serde(rename = "box")]
    box_model: Option<BoxSection>,
    spherical_shell: Option<ShellSection>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BoxSection {
    #[serde(default)]
    origin: [f64; 3],
    extents: [f64; 3],
    repetitions: [u32; 2],
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ShellSection {
    inner_radius: f64,
    outer_radius: f64,
    opening_angle: f64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self { inner_radius: 3_481_000.0, outer_radius: 6_336_000.0, opening_angle: 360.0 }
    }
}

impl GeometrySection {
    fn into_descriptor(self) -> Result<GeometryDescriptor, ConfigurationError> {
        match self.model.as_str() {
            "box" => {
                let b = self.box_model.ok_or_else(|| ConfigurationError::MissingGeometrySection {
                    model: self.model.clone(),
                    section: "box",
                })?;
                Ok(GeometryDescriptor::Planar {
                    origin: b.origin,
                    extents: b.extents,
                    repetitions: b.repetitions,
                })
            }
            "spherical shell" => {
                let s = self.spherical_shell.unwrap_or_default();
                Ok(GeometryDescriptor::SphericalShell {
                    inner_radius: s.inner_radius,
                    outer_radius: s.outer_radius,
                    opening_angle: s.opening_angle,
                })
            }
            other => Err(ConfigurationError::UnsupportedGeometry(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    geometry: GeometrySection,
    #[serde(default)]
    coupling: CouplingParams,
    #[serde(default)]
    boundary_conditions: BoundaryConditions,
    #[serde(default)]
    erosion: ErosionParams,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    pub geometry:            GeometryDescriptor,
    pub coupling:            CouplingParams,
    pub boundary_conditions: BoundaryConditions,
    pub erosion:             ErosionParams,
}

impl Configuration {
    /// Default parameters around `geometry`, validated.
    pub fn new(geometry: GeometryDescriptor) -> Result<Self, ConfigurationError> {
        Self {
            geometry,
            coupling: CouplingParams::default(),
            boundary_conditions: BoundaryConditions::default(),
            erosion: ErosionParams::default(),
        }
        .validated()
    }

    /// Read a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        let doc: ConfigDocument = serde_json::from_str(text)?;
        Self {
            geometry: doc.geometry.into_descriptor()?,
            coupling: doc.coupling,
            boundary_conditions: doc.boundary_conditions,
            erosion: doc.erosion,
        }
        .validated()
    }

    pub fn validated(self) -> Result<Self, ConfigurationError> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.geometry.validate()?;

        let c = &self.coupling;
        if c.steps_per_solver_step == 0 {
            return Err(invalid("steps_per_solver_step", c.steps_per_solver_step, "at least one sub-step is required"));
        }
        if !(c.maximum_substep > 0.0) || !c.maximum_substep.is_finite() {
            return Err(invalid("maximum_substep", c.maximum_substep, "must be positive and finite"));
        }
        if !(c.precision >= 0.0) {
            return Err(invalid("precision", c.precision, "must not be negative"));
        }
        if c.sample_levels() > MAX_SAMPLE_LEVELS {
            return Err(invalid(
                "additional_refinement_levels",
                format!("{} + {}", c.additional_refinement_levels, c.surface_refinement_difference),
                "sample density per face edge would exceed 2^16",
            ));
        }
        if let GeometryDescriptor::SphericalShell { .. } = self.geometry {
            shell_cell_count(c.total_refinement())?;
        }

        let e = &self.erosion;
        if !(e.drainage_area_exponent >= 0.0) {
            return Err(invalid("drainage_area_exponent", e.drainage_area_exponent, "must not be negative"));
        }
        if !(e.slope_exponent > 0.0) {
            return Err(invalid("slope_exponent", e.slope_exponent, "must be positive"));
        }
        if !(e.bedrock_incision_rate >= 0.0) {
            return Err(invalid("bedrock_incision_rate", e.bedrock_incision_rate, "must not be negative"));
        }
        if !(e.bedrock_diffusivity >= 0.0) {
            return Err(invalid("bedrock_diffusivity", e.bedrock_diffusivity, "must not be negative"));
        }
        if !(e.elevation_factor >= 0.0) {
            return Err(invalid("elevation_factor", e.elevation_factor, "must not be negative"));
        }
        if !(e.tolerance > 0.0) {
            return Err(invalid("tolerance", e.tolerance, "must be positive"));
        }
        Ok(())
    }

    /// Copy with every time-valued threshold expressed in years.
    pub fn normalized(&self, unit: TimeUnit) -> Self {
        let mut out = self.clone();
        out.coupling.maximum_substep = unit.to_years(self.coupling.maximum_substep);
        out
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &'static str) -> ConfigurationError {
    ConfigurationError::InvalidValue { key, value: value.to_string(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::YEAR_IN_SECONDS;

    const SHELL_DOC: &str = r#"{
        "geometry": { "model": "spherical shell",
                      "spherical_shell": { "outer_radius": 6371000.0 } },
        "coupling": { "steps_per_solver_step": 4, "maximum_substep": 500.0 },
        "erosion": { "drainage_area_exponent": 0.5, "sediment_incision_rate": 2e-5 }
    }"#;

    #[test]
    fn shell_document_fills_defaults() {
        let cfg = Configuration::from_json(SHELL_DOC).unwrap();
        match cfg.geometry {
            GeometryDescriptor::SphericalShell { inner_radius, outer_radius, .. } => {
                assert_eq!(inner_radius, 3_481_000.0);
                assert_eq!(outer_radius, 6_371_000.0);
            }
            _ => panic!("expected a shell"),
        }
        assert_eq!(cfg.coupling.steps_per_solver_step, 4);
        assert_eq!(cfg.coupling.additional_refinement_levels, 0);
        assert_eq!(cfg.erosion.slope_exponent, 1.0);
        assert_eq!(cfg.erosion.incision_rate(true), 2e-5);
        assert_eq!(cfg.erosion.incision_rate(false), 1e-5);
    }

    #[test]
    fn unknown_geometry_is_fatal() {
        let doc = r#"{ "geometry": { "model": "chunk" } }"#;
        match Configuration::from_json(doc) {
            Err(ConfigurationError::UnsupportedGeometry(name)) => assert_eq!(name, "chunk"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn box_without_its_section_is_fatal() {
        let doc = r#"{ "geometry": { "model": "box" } }"#;
        assert!(matches!(
            Configuration::from_json(doc),
            Err(ConfigurationError::MissingGeometrySection { .. })
        ));
    }

    #[test]
    fn sediment_sentinel_selects_bedrock() {
        let e = ErosionParams::default();
        assert_eq!(e.incision_rate(true), e.bedrock_incision_rate);
        assert_eq!(e.diffusivity(true), e.bedrock_diffusivity);
    }

    #[test]
    fn orographic_scaling_only_above_control() {
        let e = ErosionParams {
            elevation_factor: 3.0,
            orographic_elevation: Some(1000.0),
            ..ErosionParams::default()
        };
        assert_eq!(e.elevation_scaling(999.0), 1.0);
        assert_eq!(e.elevation_scaling(1500.0), 3.0);
        assert_eq!(ErosionParams::default().elevation_scaling(1e9), 1.0);
    }

    #[test]
    fn normalization_converts_seconds_once() {
        let mut cfg = Configuration::from_json(SHELL_DOC).unwrap();
        cfg.coupling.maximum_substep = 2.0 * YEAR_IN_SECONDS;
        let yr = cfg.normalized(TimeUnit::Seconds);
        assert!((yr.coupling.maximum_substep - 2.0).abs() < 1e-12);
        let same = cfg.normalized(TimeUnit::Years);
        assert_eq!(same.coupling.maximum_substep, cfg.coupling.maximum_substep);
    }

    #[test]
    fn zero_substeps_are_rejected() {
        let mut cfg = Configuration::from_json(SHELL_DOC).unwrap();
        cfg.coupling.steps_per_solver_step = 0;
        assert!(matches!(cfg.validate(), Err(ConfigurationError::InvalidValue { key: "steps_per_solver_step", .. })));
    }

    #[test]
    fn subdivisions_follow_refinement() {
        let c = CouplingParams {
            additional_refinement_levels: 1,
            surface_refinement_difference: 2,
            maximum_surface_refinement_level: 3,
            ..CouplingParams::default()
        };
        assert_eq!(c.sample_subdivisions(), 8);
        assert_eq!(c.total_refinement(), 6);
    }

    #[test]
    fn huge_refinement_levels_are_rejected_not_overflowed() {
        let doc = r#"{
            "geometry": { "model": "spherical shell" },
            "coupling": { "additional_refinement_levels": 4294967295, "surface_refinement_difference": 1 }
        }"#;
        assert!(matches!(
            Configuration::from_json(doc),
            Err(ConfigurationError::InvalidValue { key: "additional_refinement_levels", .. })
        ));

        let doc = r#"{
            "geometry": { "model": "spherical shell" },
            "coupling": { "maximum_surface_refinement_level": 4294967295 }
        }"#;
        assert!(matches!(
            Configuration::from_json(doc),
            Err(ConfigurationError::RefinementTooDeep { levels: u32::MAX, .. })
        ));

        let c = CouplingParams {
            additional_refinement_levels: u32::MAX,
            surface_refinement_difference: 1,
            maximum_surface_refinement_level: u32::MAX,
            ..CouplingParams::default()
        };
        assert_eq!(c.total_refinement(), u32::MAX);
        assert_eq!(c.sample_subdivisions(), 1 << MAX_SAMPLE_LEVELS);
    }

    #[test]
    fn shell_refinement_past_the_cell_limit_is_rejected() {
        let mut cfg = Configuration::from_json(SHELL_DOC).unwrap();
        cfg.coupling.maximum_surface_refinement_level = 12;
        assert!(matches!(cfg.validate(), Err(ConfigurationError::GridTooLarge { .. })));
        cfg.coupling.maximum_surface_refinement_level = 3;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn oversized_box_is_rejected_by_the_document_reader() {
        let doc = r#"{
            "geometry": { "model": "box",
                          "box": { "extents": [1.0, 1.0, 1.0], "repetitions": [4294967295, 4294967295] } }
        }"#;
        assert!(matches!(Configuration::from_json(doc), Err(ConfigurationError::GridTooLarge { .. })));
    }
}
