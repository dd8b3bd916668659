// ============================================================================
// HEALPix RING pixelization
//
// Equal-area cells on the unit sphere. Pixels are numbered ring by ring from
// the north pole. Internally each pixel also has a (x, y, face) address on
// one of the 12 base faces, which is what neighbour lookup works in.
//
//   nside  : cells per base-face edge (a power of two here)
//   npix   : 12·nside²
//   ncap   : pixels in the north polar cap, 2·nside·(nside−1)
// ============================================================================

use std::f64::consts::{FRAC_PI_2, PI};

use crate::geometry::{dot, norm, Point3};

/// Ring number (in units of nside) of the southernmost corner of each base face.
const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
/// Longitude (in units of π/4) of the southernmost corner of each base face.
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

const NB_XOFFSET: [i64; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];
const NB_YOFFSET: [i64; 8] = [0, 1, 1, 1, 0, -1, -1, -1];

// Base face reached when stepping off `face` towards S, SE, E, SW, (self),
// NE, W, NW, N. -1 marks a corner with no face beyond it.
const NB_FACEARRAY: [[i64; 12]; 9] = [
    [8, 9, 10, 11, -1, -1, -1, -1, 10, 11, 8, 9],
    [5, 6, 7, 4, 8, 9, 10, 11, 9, 10, 11, 8],
    [-1, -1, -1, -1, 5, 6, 7, 4, -1, -1, -1, -1],
    [4, 5, 6, 7, 11, 8, 9, 10, 11, 8, 9, 10],
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
    [1, 2, 3, 0, 0, 1, 2, 3, 5, 6, 7, 4],
    [-1, -1, -1, -1, 7, 4, 5, 6, -1, -1, -1, -1],
    [3, 0, 1, 2, 3, 0, 1, 2, 4, 5, 6, 7],
    [2, 3, 0, 1, -1, -1, -1, -1, 0, 1, 2, 3],
];

// Coordinate transform on entering the neighbouring face, per face row
// (north, equatorial, south): bit 1 flips x, bit 2 flips y, bit 4 swaps x/y.
const NB_SWAPARRAY: [[u8; 3]; 9] = [
    [0, 0, 3],
    [0, 0, 6],
    [0, 0, 0],
    [0, 0, 5],
    [0, 0, 0],
    [5, 0, 0],
    [0, 0, 0],
    [6, 0, 0],
    [3, 0, 0],
];

/// Largest supported order: 12·nside² must fit comfortably in an i64.
pub const MAX_ORDER: u32 = 29;

#[derive(Clone, Debug, PartialEq)]
pub struct Healpix {
    order: u32,
    nside: i64,
    npix: i64,
    ncap: i64,
    /// Sphere radius used for cell areas, centres and distances [m]
    radius: f64,
}

impl Healpix {
    /// RING pixelization with `nside = 2^order` on a sphere of `radius`.
    ///
    /// Callers are expected to have checked `order <= MAX_ORDER`.
    pub fn new(order: u32, radius: f64) -> Self {
        let nside = 1i64 << order.min(MAX_ORDER);
        Self {
            order: order.min(MAX_ORDER),
            nside,
            npix: 12 * nside * nside,
            ncap: 2 * nside * (nside - 1),
            radius,
        }
    }

    #[inline]
    pub fn nside(&self) -> usize {
        self.nside as usize
    }

    #[inline]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[inline]
    pub fn npix(&self) -> usize {
        self.npix as usize
    }

    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Pixel containing the direction of `v` from the sphere centre.
    ///
    /// A zero or non-finite vector maps to pixel 0.
    pub fn vec2pix(&self, v: &Point3) -> usize {
        let r = norm(v);
        if !(r > 0.0) || !r.is_finite() {
            return 0;
        }
        let n = self.nside;
        let z = v[2] / r;
        let za = z.abs();
        let phi = v[1].atan2(v[0]);
        let tt = (phi / FRAC_PI_2).rem_euclid(4.0);

        if za <= 2.0 / 3.0 {
            let nl4 = 4 * n;
            let temp1 = n as f64 * (0.5 + tt);
            let temp2 = n as f64 * z * 0.75;
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ir = n + 1 + jp - jm;
            let kshift = 1 - (ir & 1);
            let ip = ((jp + jm - n + kshift + 1 + 2 * nl4) >> 1) % nl4;
            return (self.ncap + (ir - 1) * nl4 + ip) as usize;
        }

        let tp = tt - tt.trunc();
        let tmp = if za < 0.99 {
            n as f64 * (3.0 * (1.0 - za)).sqrt()
        } else {
            // sin(θ) from the horizontal components keeps precision near the poles
            let sth = v[0].hypot(v[1]) / r;
            n as f64 * sth / ((1.0 + za) / 3.0).sqrt()
        };
        let jp = (tp * tmp) as i64;
        let jm = ((1.0 - tp) * tmp) as i64;
        let ir = jp + jm + 1;
        let ip = ((tt * ir as f64) as i64) % (4 * ir);
        let pix = if z > 0.0 {
            2 * ir * (ir - 1) + ip
        } else {
            self.npix - 2 * ir * (ir + 1) + ip
        };
        pix as usize
    }

    /// Unit vector to the centre of `pix`.
    pub fn pix2vec(&self, pix: usize) -> Point3 {
        let p = pix as i64;
        let n = self.nside;
        let fact2 = 4.0 / self.npix as f64;
        let fact1 = (2 * n) as f64 * fact2;

        let (z, phi) = if p < self.ncap {
            let iring = (1 + isqrt(1 + 2 * p)) >> 1;
            let iphi = p + 1 - 2 * iring * (iring - 1);
            let z = 1.0 - (iring * iring) as f64 * fact2;
            (z, (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64)
        } else if p < self.npix - self.ncap {
            let ip = p - self.ncap;
            let tmp = ip >> (self.order + 2);
            let iring = tmp + n;
            let iphi = ip - 4 * n * tmp + 1;
            let fodd = if (iring + n) & 1 == 1 { 1.0 } else { 0.5 };
            let z = (2 * n - iring) as f64 * fact1;
            (z, (iphi as f64 - fodd) * PI / (2 * n) as f64)
        } else {
            let ip = self.npix - p;
            let iring = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
            let z = (iring * iring) as f64 * fact2 - 1.0;
            (z, (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64)
        };

        let sth = ((1.0 - z) * (1.0 + z)).max(0.0).sqrt();
        [sth * phi.cos(), sth * phi.sin(), z]
    }

    /// Face-local address `(x, y, face)` of a RING pixel.
    fn ring2xyf(&self, pix: i64) -> (i64, i64, usize) {
        let n = self.nside;
        let nl2 = 2 * n;

        let (iring, iphi, kshift, nr, face) = if pix < self.ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = pix + 1 - 2 * iring * (iring - 1);
            (iring, iphi, 0, iring, (iphi - 1) / iring)
        } else if pix < self.npix - self.ncap {
            let ip = pix - self.ncap;
            let tmp = ip >> (self.order + 2);
            let iring = tmp + n;
            let iphi = ip - tmp * 4 * n + 1;
            let kshift = (iring + n) & 1;
            let ire = tmp + 1;
            let irm = nl2 + 1 - tmp;
            let ifm = (iphi - (ire >> 1) + n - 1) >> self.order;
            let ifp = (iphi - (irm >> 1) + n - 1) >> self.order;
            let face = if ifp == ifm {
                ifp | 4
            } else if ifp < ifm {
                ifp
            } else {
                ifm + 8
            };
            (iring, iphi, kshift, n, face)
        } else {
            let ip = self.npix - pix;
            let ring_from_south = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * ring_from_south + 1 - (ip - 2 * ring_from_south * (ring_from_south - 1));
            let face = (iphi - 1) / ring_from_south + 8;
            (2 * nl2 - ring_from_south, iphi, 0, ring_from_south, face)
        };

        let irt = iring - (2 + (face >> 2)) * n + 1;
        let mut ipt = 2 * iphi - JPLL[face as usize] * nr - kshift - 1;
        if ipt >= nl2 {
            ipt -= 8 * n;
        }
        ((ipt - irt) >> 1, (-ipt - irt) >> 1, face as usize)
    }

    fn xyf2ring(&self, x: i64, y: i64, face: usize) -> i64 {
        let n = self.nside;
        let nl4 = 4 * n;
        let jr = JRLL[face] * n - x - y - 1;

        let (nr, n_before, kshift) = if jr < n {
            (jr, 2 * jr * (jr - 1), 0)
        } else if jr > 3 * n {
            let nr = nl4 - jr;
            (nr, self.npix - 2 * (nr + 1) * nr, 0)
        } else {
            (n, self.ncap + (jr - n) * nl4, (jr - n) & 1)
        };

        let mut jp = (JPLL[face] * nr + x - y + 1 + kshift) / 2;
        if jp > nl4 {
            jp -= nl4;
        } else if jp < 1 {
            jp += nl4;
        }
        n_before + jp - 1
    }

    /// Distinct neighbours of `pix`, at most eight.
    ///
    /// Pixels at the eight corners where three base faces meet have seven.
    pub fn neighbors(&self, pix: usize) -> Vec<usize> {
        let n = self.nside;
        let (ix, iy, face) = self.ring2xyf(pix as i64);
        let mut out = Vec::with_capacity(8);

        for k in 0..8 {
            let mut x = ix + NB_XOFFSET[k];
            let mut y = iy + NB_YOFFSET[k];
            let mut nbnum = 4usize;
            if x < 0 {
                x += n;
                nbnum -= 1;
            } else if x >= n {
                x -= n;
                nbnum += 1;
            }
            if y < 0 {
                y += n;
                nbnum -= 3;
            } else if y >= n {
                y -= n;
                nbnum += 3;
            }

            let f = NB_FACEARRAY[nbnum][face];
            if f < 0 {
                continue;
            }
            let bits = NB_SWAPARRAY[nbnum][face >> 2];
            if bits & 1 != 0 {
                x = n - x - 1;
            }
            if bits & 2 != 0 {
                y = n - y - 1;
            }
            if bits & 4 != 0 {
                std::mem::swap(&mut x, &mut y);
            }

            let q = self.xyf2ring(x, y, f as usize) as usize;
            if q != pix && !out.contains(&q) {
                out.push(q);
            }
        }
        out
    }

    /// Centre of `pix` on the sphere.
    pub fn cell_center(&self, pix: usize) -> Point3 {
        let u = self.pix2vec(pix);
        [u[0] * self.radius, u[1] * self.radius, u[2] * self.radius]
    }

    /// Great-circle distance between two pixel centres.
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        let u = self.pix2vec(a);
        let v = self.pix2vec(b);
        let cross = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        norm(&cross).atan2(dot(&u, &v)) * self.radius
    }

    /// Every pixel has the same area.
    pub fn cell_area(&self) -> f64 {
        4.0 * PI * self.radius * self.radius / self.npix as f64
    }
}

fn isqrt(v: i64) -> i64 {
    let mut r = (v as f64).sqrt() as i64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn pixel_count_matches_nside() {
        let h = Healpix::new(3, 1.0);
        assert_eq!(h.nside(), 8);
        assert_eq!(h.npix(), 768);
    }

    #[test]
    fn centres_map_to_their_own_pixel() {
        for order in 0..5 {
            let h = Healpix::new(order, 6.371e6);
            for p in 0..h.npix() {
                assert_eq!(h.vec2pix(&h.cell_center(p)), p, "order {order} pixel {p}");
            }
        }
    }

    #[test]
    fn face_addresses_round_trip() {
        let h = Healpix::new(3, 1.0);
        for p in 0..h.npix() as i64 {
            let (x, y, f) = h.ring2xyf(p);
            assert!((0..8).contains(&x) && (0..8).contains(&y) && f < 12);
            assert_eq!(h.xyf2ring(x, y, f), p);
        }
    }

    #[test]
    fn neighbour_relation_is_symmetric() {
        for order in 1..4 {
            let h = Healpix::new(order, 1.0);
            for p in 0..h.npix() {
                let nb = h.neighbors(p);
                assert!(nb.len() == 7 || nb.len() == 8);
                for &q in &nb {
                    assert!(h.neighbors(q).contains(&p), "{p} -> {q} not mirrored");
                }
            }
        }
    }

    #[test]
    fn poles_and_random_directions_land_in_range() {
        let h = Healpix::new(4, 1.0);
        assert!(h.vec2pix(&[0.0, 0.0, 1.0]) < 4);
        assert!(h.vec2pix(&[0.0, 0.0, -1.0]) >= h.npix() - 4);
        assert_eq!(h.vec2pix(&[0.0, 0.0, 0.0]), 0);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let v = [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)];
            let p = h.vec2pix(&v);
            assert!(p < h.npix());
            assert_eq!(h.vec2pix(&[v[0] * 3.0, v[1] * 3.0, v[2] * 3.0]), p);
        }
    }

    #[test]
    fn areas_tile_the_sphere() {
        let h = Healpix::new(2, 2.0);
        let total = h.cell_area() * h.npix() as f64;
        assert!((total - 4.0 * PI * 4.0).abs() < 1e-9);
        let nb = h.neighbors(100)[0];
        let d = h.distance(100, nb);
        assert!(d > 0.0 && d < 2.0);
    }
}
