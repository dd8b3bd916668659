//! Evaluates the host's deformable boundary at a fixed set of points per face.
//!
//! Every locally owned quadrilateral on the top boundary is sampled on an
//! `(s + 1) × (s + 1)` grid of reference points, corners included. Each point
//! becomes one [`SurfaceSample`] tagged with the pixel it falls in.

use rayon::prelude::*;

use crate::geometry::{dot, norm, scale, GeometryDescriptor, Point3};
use crate::host::{BoundaryFace, BoundaryId, HostSolver};
use crate::pixel::{PixelGrid, PixelIndex};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceSample {
    pub pixel: PixelIndex,
    /// Height above the reference surface [m]
    pub elevation_offset: f64,
    /// Velocity along the outward normal of the reference surface [m/yr]
    pub normal_velocity: f64,
}

/// One process's samples as three parallel arrays, the form they travel in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBatch {
    pub pixels: Vec<PixelIndex>,
    pub elevations: Vec<f64>,
    pub velocities: Vec<f64>,
}

impl SampleBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            pixels: Vec::with_capacity(n),
            elevations: Vec::with_capacity(n),
            velocities: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, s: SurfaceSample) {
        self.pixels.push(s.pixel);
        self.elevations.push(s.elevation_offset);
        self.velocities.push(s.normal_velocity);
    }

    /// Number of complete samples. Arrays of unequal length are truncated to the shortest.
    pub fn len(&self) -> usize {
        self.pixels.len().min(self.elevations.len()).min(self.velocities.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the three arrays agree in length.
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == self.elevations.len() && self.pixels.len() == self.velocities.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SurfaceSample> + '_ {
        self.pixels
            .iter()
            .zip(self.elevations.iter())
            .zip(self.velocities.iter())
            .map(|((&pixel, &elevation_offset), &normal_velocity)| SurfaceSample {
                pixel,
                elevation_offset,
                normal_velocity,
            })
    }
}

impl FromIterator<SurfaceSample> for SampleBatch {
    fn from_iter<I: IntoIterator<Item = SurfaceSample>>(iter: I) -> Self {
        let mut batch = SampleBatch::default();
        for s in iter {
            batch.push(s);
        }
        batch
    }
}

pub struct SurfaceSampler<'a> {
    grid: &'a PixelGrid,
    geometry: &'a GeometryDescriptor,
    subdivisions: usize,
}

impl<'a> SurfaceSampler<'a> {
    pub fn new(grid: &'a PixelGrid, geometry: &'a GeometryDescriptor, subdivisions: usize) -> Self {
        Self { grid, geometry, subdivisions: subdivisions.max(1) }
    }

    /// Points per face.
    pub fn points_per_face(&self) -> usize {
        (self.subdivisions + 1) * (self.subdivisions + 1)
    }

    /// Sample every face of `boundary` owned by this process, in face order then point order.
    pub fn sample<H: HostSolver + ?Sized>(&self, host: &H, boundary: BoundaryId) -> SampleBatch {
        let faces = host.owned_boundary_faces(boundary);
        let unit = host.time_unit();

        let per_face: Vec<Vec<SurfaceSample>> = faces
            .par_iter()
            .map(|face| {
                self.face_points(face)
                    .into_iter()
                    .map(|p| {
                        let v = host.velocity_at(face, &p);
                        let n = self.geometry.outward_normal(&p);
                        SurfaceSample {
                            pixel: self.grid.cell_index_of(&p),
                            elevation_offset: self.geometry.elevation_offset(&p),
                            normal_velocity: unit.rate_to_per_year(dot(&v, &n)),
                        }
                    })
                    .collect()
            })
            .collect();

        let mut batch = SampleBatch::with_capacity(faces.len() * self.points_per_face());
        for s in per_face.into_iter().flatten() {
            batch.push(s);
        }
        batch
    }

    /// Reference points of `face`, v-major.
    ///
    /// On the shell each point is pushed out to the radius interpolated from
    /// the corners, so a face on a curved surface is sampled on that surface.
    pub fn face_points(&self, face: &BoundaryFace) -> Vec<Point3> {
        let s = self.subdivisions;
        let radii = face.corners.map(|c| norm(&c));
        let mut points = Vec::with_capacity(self.points_per_face());

        for b in 0..=s {
            let v = b as f64 / s as f64;
            for a in 0..=s {
                let u = a as f64 / s as f64;
                let p = face.bilinear(u, v);
                let p = match self.geometry {
                    GeometryDescriptor::Planar { .. } => p,
                    GeometryDescriptor::SphericalShell { .. } => {
                        let r = (1.0 - v) * ((1.0 - u) * radii[0] + u * radii[1])
                            + v * ((1.0 - u) * radii[2] + u * radii[3]);
                        let len = norm(&p);
                        if len > 0.0 {
                            scale(&p, r / len)
                        } else {
                            p
                        }
                    }
                };
                points.push(p);
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::synthetic::SyntheticHost;
    use crate::host::{TimeUnit, YEAR_IN_SECONDS};
    use crate::pixel::{Healpix, Lattice};
    use std::sync::Arc;

    fn planar() -> GeometryDescriptor {
        GeometryDescriptor::Planar {
            origin: [0.0, 0.0, -100.0],
            extents: [100.0, 100.0, 100.0],
            repetitions: [2, 2],
        }
    }

    #[test]
    fn face_points_include_corners() {
        let g = planar();
        let grid = PixelGrid::Lattice(Lattice::new(&[0.0, 0.0, -100.0], &[100.0, 100.0, 100.0], [2, 2]).unwrap());
        let sampler = SurfaceSampler::new(&grid, &g, 2);
        let face = BoundaryFace::new([
            [0.0, 0.0, 0.0],
            [50.0, 0.0, 0.0],
            [0.0, 50.0, 0.0],
            [50.0, 50.0, 0.0],
        ]);
        let pts = sampler.face_points(&face);
        assert_eq!(pts.len(), 9);
        assert_eq!(pts[0], face.corners[0]);
        assert_eq!(pts[2], face.corners[1]);
        assert_eq!(pts[8], face.corners[3]);
        assert_eq!(pts[4], [25.0, 25.0, 0.0]);
    }

    #[test]
    fn shell_points_stay_on_the_sphere() {
        let g = GeometryDescriptor::SphericalShell { inner_radius: 1.0, outer_radius: 10.0, opening_angle: 360.0 };
        let grid = PixelGrid::Healpix(Healpix::new(2, 10.0));
        let sampler = SurfaceSampler::new(&grid, &g, 4);
        let host = SyntheticHost::new(&g, 2, Arc::new(|_: &Point3| [0.0; 3]));
        for face in host.faces() {
            for p in sampler.face_points(face) {
                assert!((norm(&p) - 10.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn velocities_are_projected_and_converted_to_years() {
        let g = GeometryDescriptor::SphericalShell { inner_radius: 1.0, outer_radius: 10.0, opening_angle: 360.0 };
        let grid = PixelGrid::Healpix(Healpix::new(2, 10.0));
        // purely radial outflow of 1 m/s plus a tangential part that must drop out
        let host = SyntheticHost::new(
            &g,
            1,
            Arc::new(|p: &Point3| {
                let r = norm(p);
                [p[0] / r - p[1] / r, p[1] / r + p[0] / r, p[2] / r]
            }),
        )
        .with_time_unit(TimeUnit::Seconds);
        let sampler = SurfaceSampler::new(&grid, &g, 1);
        let batch = sampler.sample(&host, crate::host::synthetic::TOP_BOUNDARY);

        assert_eq!(batch.len(), 6 * 4);
        assert!(batch.is_consistent());
        for s in batch.iter() {
            assert!((s.normal_velocity - YEAR_IN_SECONDS).abs() < 1e-3);
            assert!(s.elevation_offset.abs() < 1e-9);
            assert!(s.pixel < grid.cell_count());
        }
    }

    #[test]
    fn unknown_boundary_gives_an_empty_batch() {
        let g = planar();
        let grid = PixelGrid::Lattice(Lattice::new(&[0.0, 0.0, -100.0], &[100.0, 100.0, 100.0], [2, 2]).unwrap());
        let host = SyntheticHost::new(&g, 2, Arc::new(|_: &Point3| [0.0, 0.0, 1.0]));
        let sampler = SurfaceSampler::new(&grid, &g, 1);
        assert!(sampler.sample(&host, 0).is_empty());
        assert_eq!(sampler.sample(&host, crate::host::synthetic::TOP_BOUNDARY).len(), 16);
    }
}
