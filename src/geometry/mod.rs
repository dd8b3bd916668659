//! Reference-surface geometry: the closed set of domain shapes the bridge supports.
//!
//! The host's geometry model is read-only metadata here. Everything the bridge
//! needs from it reduces to two questions about a point on the deformable
//! boundary: how far it sits above the reference surface, and which direction
//! is "up" at that point.

use crate::error::ConfigurationError;
use crate::pixel::lattice::node_dims;

pub type Point3 = [f64; 3];
pub type Vector3 = [f64; 3];

#[inline]
pub fn dot(a: &Vector3, b: &Vector3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn norm(a: &Vector3) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
pub fn scale(a: &Vector3, k: f64) -> Vector3 {
    [a[0] * k, a[1] * k, a[2] * k]
}

/// Linear blend `a + t (b - a)`.
#[inline]
pub fn lerp(a: &Point3, b: &Point3, t: f64) -> Point3 {
    [
        a[0] + t * (b[0] - a[0]),
        a[1] + t * (b[1] - a[1]),
        a[2] + t * (b[2] - a[2]),
    ]
}

/// Which velocity component the bridge drives on the deformable boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceComponent {
    /// The +z component of a box model.
    Vertical,
    /// The component along the outward radius of a shell model.
    Radial,
}

/// Domain shape of the host model.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryDescriptor {
    /// Axis-aligned box; the deformable boundary is the face `z = origin.z + extents.z`.
    Planar {
        origin: Point3,
        extents: [f64; 3],
        /// Coarse mesh repetitions along x and y.
        repetitions: [u32; 2],
    },
    /// Spherical shell centred on the origin; the deformable boundary is the outer sphere.
    SphericalShell {
        inner_radius: f64,
        outer_radius: f64,
        /// Degrees. Accepted for completeness; the surface grid always covers the full sphere.
        opening_angle: f64,
    },
}

impl GeometryDescriptor {
    pub fn name(&self) -> &'static str {
        match self {
            GeometryDescriptor::Planar { .. } => "box",
            GeometryDescriptor::SphericalShell { .. } => "spherical shell",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            GeometryDescriptor::Planar { extents, repetitions, .. } => {
                node_dims(*repetitions)?;
                if extents.iter().any(|&e| !(e > 0.0) || !e.is_finite()) {
                    return Err(ConfigurationError::InvalidValue {
                        key: "extents",
                        value: format!("{extents:?}"),
                        reason: "box extents must be positive and finite",
                    });
                }
            }
            GeometryDescriptor::SphericalShell { inner_radius, outer_radius, opening_angle } => {
                if !(*inner_radius >= 0.0) || !(outer_radius > inner_radius) || !outer_radius.is_finite() {
                    return Err(ConfigurationError::InvalidValue {
                        key: "outer_radius",
                        value: format!("{inner_radius} / {outer_radius}"),
                        reason: "shell radii must satisfy 0 <= inner < outer",
                    });
                }
                if !(*opening_angle > 0.0 && *opening_angle <= 360.0) {
                    return Err(ConfigurationError::InvalidValue {
                        key: "opening_angle",
                        value: opening_angle.to_string(),
                        reason: "opening angle must lie in (0, 360] degrees",
                    });
                }
            }
        }
        Ok(())
    }

    /// Height of the undeformed top boundary (box) or its radius (shell).
    pub fn reference_level(&self) -> f64 {
        match self {
            GeometryDescriptor::Planar { origin, extents, .. } => origin[2] + extents[2],
            GeometryDescriptor::SphericalShell { outer_radius, .. } => *outer_radius,
        }
    }

    /// Signed distance of `p` above the reference surface.
    pub fn elevation_offset(&self, p: &Point3) -> f64 {
        match self {
            GeometryDescriptor::Planar { .. } => p[2] - self.reference_level(),
            GeometryDescriptor::SphericalShell { outer_radius, .. } => norm(p) - outer_radius,
        }
    }

    /// Unit outward normal of the reference surface below `p`.
    pub fn outward_normal(&self, p: &Point3) -> Vector3 {
        match self {
            GeometryDescriptor::Planar { .. } => [0.0, 0.0, 1.0],
            GeometryDescriptor::SphericalShell { .. } => {
                let r = norm(p);
                if r > 0.0 {
                    scale(p, 1.0 / r)
                } else {
                    [0.0, 0.0, 1.0]
                }
            }
        }
    }

    pub fn surface_component(&self) -> SurfaceComponent {
        match self {
            GeometryDescriptor::Planar { .. } => SurfaceComponent::Vertical,
            GeometryDescriptor::SphericalShell { .. } => SurfaceComponent::Radial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> GeometryDescriptor {
        GeometryDescriptor::Planar {
            origin: [0.0, 0.0, -10.0],
            extents: [100.0, 50.0, 10.0],
            repetitions: [4, 2],
        }
    }

    #[test]
    fn box_offsets_are_measured_from_the_top_face() {
        let g = unit_box();
        assert_eq!(g.reference_level(), 0.0);
        assert_eq!(g.elevation_offset(&[3.0, 4.0, 2.5]), 2.5);
        assert_eq!(g.outward_normal(&[3.0, 4.0, 2.5]), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn shell_offsets_are_radial() {
        let g = GeometryDescriptor::SphericalShell {
            inner_radius: 1.0,
            outer_radius: 2.0,
            opening_angle: 360.0,
        };
        assert!((g.elevation_offset(&[0.0, 2.5, 0.0]) - 0.5).abs() < 1e-12);
        let n = g.outward_normal(&[0.0, 0.0, -3.0]);
        assert_eq!(n, [0.0, 0.0, -1.0]);
        assert_eq!(g.surface_component(), SurfaceComponent::Radial);
    }

    #[test]
    fn degenerate_shapes_are_rejected() {
        let flat = GeometryDescriptor::Planar {
            origin: [0.0; 3],
            extents: [1.0, 1.0, 1.0],
            repetitions: [0, 3],
        };
        assert!(matches!(flat.validate(), Err(ConfigurationError::DegenerateGrid(_))));

        let huge = GeometryDescriptor::Planar {
            origin: [0.0; 3],
            extents: [1.0, 1.0, 1.0],
            repetitions: [u32::MAX, u32::MAX],
        };
        assert!(matches!(huge.validate(), Err(ConfigurationError::GridTooLarge { .. })));

        let inverted = GeometryDescriptor::SphericalShell {
            inner_radius: 2.0,
            outer_radius: 1.0,
            opening_angle: 360.0,
        };
        assert!(inverted.validate().is_err());
        assert!(unit_box().validate().is_ok());
    }
}
